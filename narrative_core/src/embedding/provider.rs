use async_trait::async_trait;

use crate::error::Result;

/// Unified trait for embedding providers (local and remote).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier stored next to every vector this provider produces.
    fn model_id(&self) -> &str;

    /// Length of the produced vectors.
    fn dimension(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Local, dependency-free provider: word unigrams feature-hashed into a fixed
/// number of buckets and L2 normalized.
///
/// Texts sharing vocabulary land near each other, which is enough for
/// similarity search over short narrative descriptions without an inference
/// server.
/// Bumped whenever token bucketing changes, so stored vectors from an older
/// scheme never share a model id with new ones.
const HASH_SCHEME: &str = "fx1";

#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimension: usize,
    seed: u64,
    model_id: String,
}

impl HashingEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self::with_seed(dimension, 0)
    }

    /// Different seeds produce incompatible vector spaces and model ids.
    pub fn with_seed(dimension: usize, seed: u64) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            seed,
            model_id: format!("hashing-{}-{}-s{}", HASH_SCHEME, dimension, seed),
        }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        // FxHash is fixed across builds and toolchains.
        let hash = fxhash::hash64(&(self.seed, token));
        let sign = if hash & 1 == 0 { 1.0 } else { -1.0 };
        ((hash >> 1) as usize % self.dimension, sign)
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= 2)
        {
            let (index, sign) = self.bucket(&token.to_lowercase());
            vector[index] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
