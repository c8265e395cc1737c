//! Embedding-similarity ranking strategy.

use std::sync::Arc;

use crate::candidate::{Candidate, Selection};
use crate::embed::{EmbedError, Embedder, SimilarityMetric};

use super::{DisambigError, DisambiguationContext, Disambiguator, DisambiguatorOptions};

pub const NAME: &str = "sim";

/// Ranks candidates by similarity between the mention and
/// `label + " " + description`.
///
/// When a sentence is available the query text is `label + " " + sentence`.
/// Ties keep the original candidate order.
pub struct SimilarityDisambiguator {
    embedder: Arc<dyn Embedder>,
    metric: SimilarityMetric,
}

pub(super) fn factory(
    options: &DisambiguatorOptions,
) -> Result<Arc<dyn Disambiguator>, DisambigError> {
    let embedder = options
        .embedder
        .clone()
        .ok_or_else(|| DisambigError::MissingEmbedder {
            strategy: NAME.to_string(),
        })?;
    Ok(Arc::new(SimilarityDisambiguator::new(embedder, options.metric)))
}

impl SimilarityDisambiguator {
    pub fn new(embedder: Arc<dyn Embedder>, metric: SimilarityMetric) -> Self {
        Self { embedder, metric }
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    /// Score every candidate against the query, in candidate order.
    pub fn scores(
        &self,
        label: &str,
        candidates: &[Candidate],
        context: &DisambiguationContext,
    ) -> Result<Vec<f32>, DisambigError> {
        let embed_err = |source| DisambigError::Embed {
            label: label.to_string(),
            source,
        };

        let query = match context.sentence.as_deref() {
            Some(sentence) if !sentence.is_empty() => format!("{label} {sentence}"),
            _ => label.to_string(),
        };
        let texts: Vec<String> = candidates.iter().map(Candidate::embedding_text).collect();
        let mut batch: Vec<&str> = Vec::with_capacity(texts.len() + 1);
        batch.push(&query);
        batch.extend(texts.iter().map(String::as_str));

        let vectors = self.embedder.encode(&batch).map_err(embed_err)?;
        if vectors.len() != batch.len() {
            return Err(embed_err(EmbedError::Backend {
                message: format!("asked for {} embeddings, got {}", batch.len(), vectors.len()),
            }));
        }
        let Some((query_vec, candidate_vecs)) = vectors.split_first() else {
            return Err(embed_err(EmbedError::Backend {
                message: "embedder returned no vectors".into(),
            }));
        };
        candidate_vecs
            .iter()
            .map(|v| self.metric.score(query_vec, v).map_err(embed_err))
            .collect()
    }
}

impl Disambiguator for SimilarityDisambiguator {
    fn name(&self) -> &'static str {
        NAME
    }

    fn select(
        &self,
        label: &str,
        candidates: &[Candidate],
        limit: usize,
        context: &DisambiguationContext,
    ) -> Result<Vec<Selection>, DisambigError> {
        if candidates.is_empty() {
            return Err(DisambigError::NoCandidates {
                label: label.to_string(),
            });
        }
        let scores = self.scores(label, candidates, context)?;
        let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
        // Stable sort keeps the original order among equal scores.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        tracing::debug!(label, metric = %self.metric, ?ranked, "ranked candidates");

        if limit > 0 {
            ranked.truncate(limit);
        }
        Ok(ranked
            .into_iter()
            .map(|(i, _)| Selection::from(&candidates[i]))
            .collect())
    }
}
