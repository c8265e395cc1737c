//! First-candidate strategy.

use std::sync::Arc;

use crate::candidate::{Candidate, Selection};

use super::{DisambigError, DisambiguationContext, Disambiguator, DisambiguatorOptions};

pub const NAME: &str = "simple";

/// Always picks the first candidate, which fits every limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstCandidate;

pub(super) fn factory(
    _: &DisambiguatorOptions,
) -> Result<Arc<dyn Disambiguator>, DisambigError> {
    Ok(Arc::new(FirstCandidate))
}

impl Disambiguator for FirstCandidate {
    fn name(&self) -> &'static str {
        NAME
    }

    fn select(
        &self,
        label: &str,
        candidates: &[Candidate],
        _limit: usize,
        _context: &DisambiguationContext,
    ) -> Result<Vec<Selection>, DisambigError> {
        let first = candidates.first().ok_or_else(|| DisambigError::NoCandidates {
            label: label.to_string(),
        })?;
        Ok(vec![Selection::from(first)])
    }
}
