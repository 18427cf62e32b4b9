//! Embedding traits and vector utilities.
//!
//! Defines [`EmbeddingProvider`] (static model metadata) and the async
//! [`Embedder`] that turns a batch of texts into vectors, plus
//! [`HashEmbedder`], a deterministic offline embedder, and the pure
//! helpers for vector serialization and similarity.
//!
//! Network-backed providers (OpenAI, Ollama, fastembed) live in the
//! `knowledge-router` app crate.

use anyhow::{bail, Result};
use async_trait::async_trait;

/// Static metadata every embedding backend exposes.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Identity recorded on every stored entry: `name@dims`.
    ///
    /// Two vectors are only comparable when their model ids match.
    fn model_id(&self) -> String {
        format!("{}@{}", self.model_name(), self.dims())
    }
}

/// An embedding backend that can compute vectors.
#[async_trait]
pub trait Embedder: EmbeddingProvider {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed `texts` and check the batch is complete and well-formed.
///
/// A backend that drops inputs or returns vectors of the wrong width
/// fails the whole batch rather than producing partial output.
pub async fn embed_checked(embedder: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let vectors = embedder.embed(texts).await?;
    validate_batch(embedder, texts.len(), &vectors)?;
    Ok(vectors)
}

/// Check a batch result against the provider's declared shape.
pub fn validate_batch(
    provider: &dyn EmbeddingProvider,
    inputs: usize,
    vectors: &[Vec<f32>],
) -> Result<()> {
    if vectors.len() != inputs {
        bail!(
            "embedding model {} returned {} vectors for {} inputs",
            provider.model_id(),
            vectors.len(),
            inputs
        );
    }
    let dims = provider.dims();
    if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dims) {
        bail!(
            "embedding model {} returned vector {} with {} dims, expected {}",
            provider.model_id(),
            i,
            v.len(),
            dims
        );
    }
    if vectors.iter().flatten().any(|x| !x.is_finite()) {
        bail!(
            "embedding model {} returned non-finite values",
            provider.model_id()
        );
    }
    Ok(())
}

// ============ Hash Embedder ============

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |h, b| {
        (h ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// Lowercased alphanumeric words of `text`.
pub fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Deterministic feature-hashing embedder.
///
/// Each word contributes a whole-word feature (weight 1.0) and its
/// boundary-marked character trigrams (weight 0.5), hashed with FNV-1a
/// into `dims` signed buckets. The result is L2-normalised. Trigrams give
/// inflected forms ("signature" / "signatures") a high similarity without
/// any model download, which makes this the default offline backend.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    model: String,
    dims: usize,
}

impl HashEmbedder {
    pub const DEFAULT_MODEL: &'static str = "hash-trigram";

    pub fn new(dims: usize) -> Result<Self> {
        Self::with_model(Self::DEFAULT_MODEL, dims)
    }

    pub fn with_model(model: &str, dims: usize) -> Result<Self> {
        if dims == 0 {
            bail!("hash embedder requires dims > 0");
        }
        Ok(Self {
            model: model.to_string(),
            dims,
        })
    }

    /// Embed a single text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];

        for word in words(text) {
            self.add_feature(&mut v, format!("w:{word}").as_bytes(), 1.0);
            let marked: Vec<char> = format!("^{word}$").chars().collect();
            for tri in marked.windows(3) {
                let feature = format!("t:{}", tri.iter().collect::<String>());
                self.add_feature(&mut v, feature.as_bytes(), 0.5);
            }
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }

    fn add_feature(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let h = fnv1a(feature);
        let sign = if h >> 63 == 1 { -1.0 } else { 1.0 };
        v[(h % self.dims as u64) as usize] += sign * weight;
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use knowledge_router_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors,
/// vectors of different lengths, and zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}
