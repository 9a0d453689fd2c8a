//! Deterministic local embedder
//!
//! Content-weighted bag-of-words embedding: each token is feature-hashed
//! into a fixed-dimension bucket with weight proportional to the square of
//! its length, then the vector is L2-normalized. Long content words
//! dominate, so near-paraphrases that share their substantive terms land
//! close in cosine space while stopword differences barely register.
//!
//! This is the default when no external embedding service is wired in; it
//! keeps tests and the demo binary self-contained. The hash is FNV-1a, so
//! embeddings are stable across processes and builds.

use async_trait::async_trait;

use super::{Embedder, VectorError, VectorResult};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Feature-hashing bag-of-words embedder
#[derive(Debug, Clone)]
pub struct NGramEmbedder {
    dim: usize,
}

impl NGramEmbedder {
    /// Create an embedder with the given output dimensionality
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    fn bucket(&self, token: &str) -> usize {
        (fnv1a(token.as_bytes()) % self.dim as u64) as usize
    }
}

#[async_trait]
impl Embedder for NGramEmbedder {
    async fn embed(&self, text: &str) -> VectorResult<Vec<f32>> {
        if text.is_empty() {
            return Err(VectorError::Embedding("empty embedding input".into()));
        }

        let mut vector = vec![0.0f32; self.dim];
        for token in tokenize(text) {
            let weight = (token.chars().count() as f32).powi(2);
            vector[self.bucket(&token)] += weight;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in vector.iter_mut() {
                *x /= norm;
            }
        }
        Ok(vector)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// Lowercased alphanumeric tokens
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// FNV-1a 64-bit; stable across builds, unlike the std hasher
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
