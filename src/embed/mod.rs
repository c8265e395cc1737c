//! Sentence embeddings and similarity metrics.
//!
//! [`HashingEmbedder`] needs no model server: every token seeds a
//! deterministic random vector and a text is the sum of its token vectors.
//! Remote embedders (e.g. [`crate::llm::ollama::OllamaClient`]) implement the
//! same [`Embedder`] trait.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use miette::Diagnostic;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the embedding subsystem.
#[derive(Debug, Error, Diagnostic)]
pub enum EmbedError {
    #[error("embedding backend failed: {message}")]
    #[diagnostic(
        code(kbqa::embed::backend),
        help("Check that the embedding model is available on the configured server.")
    )]
    Backend { message: String },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    #[diagnostic(
        code(kbqa::embed::dim_mismatch),
        help(
            "Vectors compared with each other must come from the same model. \
             Rebuild the example index with the embedder the pipeline uses."
        )
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("unknown similarity metric `{name}`")]
    #[diagnostic(
        code(kbqa::embed::metric),
        help("Valid metrics are: cosine, dot, euclidean.")
    )]
    UnknownMetric { name: String },
}

/// Encodes texts into fixed-size vectors.
pub trait Embedder: Send + Sync {
    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;

    fn encode_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.encode(&[text])?
            .pop()
            .ok_or_else(|| EmbedError::Backend {
                message: "embedder returned no vector".into(),
            })
    }
}

impl<T: Embedder + ?Sized> Embedder for Arc<T> {
    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        (**self).encode(texts)
    }
}

/// How two embeddings are compared. Higher scores mean more similar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    Dot,
    /// Negated Euclidean distance.
    Euclidean,
}

impl SimilarityMetric {
    pub fn score(self, a: &[f32], b: &[f32]) -> Result<f32, EmbedError> {
        if a.len() != b.len() {
            return Err(EmbedError::DimensionMismatch {
                expected: a.len(),
                actual: b.len(),
            });
        }
        Ok(match self {
            Self::Cosine => cosine(a, b),
            Self::Dot => dot(a, b),
            Self::Euclidean => {
                -a.iter()
                    .zip(b)
                    .map(|(x, y)| (x - y) * (x - y))
                    .sum::<f32>()
                    .sqrt()
            }
        })
    }
}

impl std::str::FromStr for SimilarityMetric {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "dot" => Ok(Self::Dot),
            "euclidean" => Ok(Self::Euclidean),
            _ => Err(EmbedError::UnknownMetric { name: s.into() }),
        }
    }
}

impl std::fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cosine => write!(f, "cosine"),
            Self::Dot => write!(f, "dot"),
            Self::Euclidean => write!(f, "euclidean"),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cosine similarity; 0 when either vector is zero.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let na = dot(a, a).sqrt();
    let nb = dot(b, b).sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot(a, b) / (na * nb)
}

/// Deterministic bag-of-tokens embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn token_vector(&self, token: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let mut rng = rand::rngs::StdRng::seed_from_u64(hasher.finish());
        (0..self.dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let v = self.token_vector(&token.to_lowercase());
            for (o, x) in out.iter_mut().zip(v) {
                *o += x;
            }
        }
        out
    }
}

impl Embedder for HashingEmbedder {
    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }
}
