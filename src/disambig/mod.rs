//! Disambiguation strategies: pick the knowledge-base entity a mention refers to.
//!
//! A strategy implements [`Disambiguator::select`] over an already fetched
//! candidate list. The provided trait methods handle fetching candidates
//! from a [`Search`] backend, wrapping picks into typed [`Disambiguated`]
//! records, and classifying the outcome as a [`Resolution`].
//!
//! Strategies are constructed by name through a [`DisambiguatorRegistry`],
//! a static map from name to factory:
//!
//! | name     | strategy                                  |
//! |----------|-------------------------------------------|
//! | `simple` | [`simple::FirstCandidate`]                |
//! | `sim`    | [`similarity::SimilarityDisambiguator`]   |
//! | `llm`    | [`llm::LlmDisambiguator`]                 |

pub mod llm;
pub mod similarity;
pub mod simple;

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, mpsc};

use miette::Diagnostic;
use thiserror::Error;

use crate::candidate::{Candidate, Disambiguated, EntityKind, Selection};
use crate::embed::{EmbedError, Embedder, SimilarityMetric};
use crate::error::KbError;
use crate::kb::Search;
use crate::llm::{ChatModel, LlmError};

/// Errors from disambiguation strategies.
#[derive(Debug, Error, Diagnostic)]
pub enum DisambigError {
    #[error("no candidates to disambiguate the label `{label}`")]
    #[diagnostic(
        code(kbqa::disambig::no_candidates),
        help("Strategies need at least one candidate. Check the search backend and language.")
    )]
    NoCandidates { label: String },

    #[error("could not disambiguate label `{label}` among the candidates")]
    #[diagnostic(
        code(kbqa::disambig::unresolved),
        help(
            "The judge found no candidate that clearly matches the mention. Add context to \
             the question or use the `sim` strategy."
        )
    )]
    Unresolved { label: String },

    #[error("no such disambiguator `{name}`")]
    #[diagnostic(code(kbqa::disambig::unknown_strategy), help("Available strategies: {available}"))]
    UnknownStrategy { name: String, available: String },

    #[error("disambiguating `{label}` needs the sentence it occurs in")]
    #[diagnostic(
        code(kbqa::disambig::missing_context),
        help("Pass the question as `DisambiguationContext::sentence`.")
    )]
    MissingContext { label: String },

    #[error("strategy `{strategy}` needs a chat model")]
    #[diagnostic(
        code(kbqa::disambig::missing_model),
        help("Configure `[model]` or pass a model in `DisambiguatorOptions`.")
    )]
    MissingModel { strategy: String },

    #[error("strategy `{strategy}` needs an embedder")]
    #[diagnostic(
        code(kbqa::disambig::missing_embedder),
        help("Pass an embedder in `DisambiguatorOptions`.")
    )]
    MissingEmbedder { strategy: String },

    #[error("chat model failed while disambiguating `{label}`")]
    #[diagnostic(code(kbqa::disambig::llm))]
    Llm {
        label: String,
        #[source]
        #[diagnostic_source]
        source: LlmError,
    },

    #[error("embedding failed while disambiguating `{label}`")]
    #[diagnostic(code(kbqa::disambig::embed))]
    Embed {
        label: String,
        #[source]
        #[diagnostic_source]
        source: EmbedError,
    },

    #[error("candidate search failed for `{label}`")]
    #[diagnostic(code(kbqa::disambig::search))]
    Kb {
        label: String,
        #[source]
        #[diagnostic_source]
        source: KbError,
    },
}

/// Text surrounding a mention.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisambiguationContext {
    /// Sentence the mention occurs in.
    pub sentence: Option<String>,
    /// Extra free text shown to judges, e.g. the description of a linked entity.
    pub textual_context: Option<String>,
}

impl DisambiguationContext {
    pub fn sentence(sentence: impl Into<String>) -> Self {
        Self {
            sentence: Some(sentence.into()),
            textual_context: None,
        }
    }

    pub fn with_textual_context(mut self, context: Option<String>) -> Self {
        self.textual_context = context.filter(|c| !c.trim().is_empty());
        self
    }
}

/// Outcome of one disambiguation, as a tag rather than an error.
#[derive(Debug)]
pub enum Resolution {
    /// At least one candidate was selected.
    Resolved(Vec<Disambiguated>),
    /// The search produced nothing to choose from.
    NoCandidates,
    /// Candidates existed but none could be chosen.
    Ambiguous,
    /// The strategy or a backend failed.
    BackendError(DisambigError),
}

impl From<Result<Vec<Disambiguated>, DisambigError>> for Resolution {
    fn from(result: Result<Vec<Disambiguated>, DisambigError>) -> Self {
        match result {
            Ok(found) if found.is_empty() => Self::NoCandidates,
            Ok(found) => Self::Resolved(found),
            Err(DisambigError::NoCandidates { .. }) => Self::NoCandidates,
            Err(DisambigError::Unresolved { .. }) => Self::Ambiguous,
            Err(e) => Self::BackendError(e),
        }
    }
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

/// A named disambiguation strategy.
pub trait Disambiguator: Send + Sync {
    /// Registry name of the strategy.
    fn name(&self) -> &'static str;

    /// Choose among `candidates` (never empty) for `label`.
    ///
    /// At most `limit` selections are returned, best first; a `limit` of 0
    /// leaves the number uncapped. Strategies may return fewer.
    fn select(
        &self,
        label: &str,
        candidates: &[Candidate],
        limit: usize,
        context: &DisambiguationContext,
    ) -> Result<Vec<Selection>, DisambigError>;

    /// Disambiguate among known candidates; fails on an empty list.
    fn disambiguate_candidates(
        &self,
        label: &str,
        candidates: &[Candidate],
        kind: EntityKind,
        limit: usize,
        context: &DisambiguationContext,
    ) -> Result<Vec<Disambiguated>, DisambigError> {
        if candidates.is_empty() {
            return Err(DisambigError::NoCandidates {
                label: label.to_string(),
            });
        }
        let picks = self.select(label, candidates, limit, context)?;
        Ok(picks
            .into_iter()
            .map(|s| Disambiguated::from_selection(s, kind))
            .collect())
    }

    /// Fetch up to `limit` candidates for `label` and disambiguate them.
    ///
    /// Returns an empty list when the search finds nothing.
    fn disambiguate(
        &self,
        label: &str,
        search: &dyn Search,
        kind: EntityKind,
        limit: usize,
        language: &str,
        context: &DisambiguationContext,
    ) -> Result<Vec<Disambiguated>, DisambigError> {
        let candidates = fetch_candidates(search, label, kind, limit, language)?;
        if candidates.is_empty() {
            tracing::debug!(label, %kind, "search returned no candidates");
            return Ok(Vec::new());
        }
        self.disambiguate_candidates(label, &candidates, kind, limit, context)
    }

    fn disambiguate_item(
        &self,
        label: &str,
        search: &dyn Search,
        limit: usize,
        language: &str,
        context: &DisambiguationContext,
    ) -> Result<Vec<Disambiguated>, DisambigError> {
        self.disambiguate(label, search, EntityKind::Item, limit, language, context)
    }

    fn disambiguate_property(
        &self,
        label: &str,
        search: &dyn Search,
        limit: usize,
        language: &str,
        context: &DisambiguationContext,
    ) -> Result<Vec<Disambiguated>, DisambigError> {
        self.disambiguate(label, search, EntityKind::Property, limit, language, context)
    }

    /// [`disambiguate`](Self::disambiguate) classified as a [`Resolution`].
    fn resolve(
        &self,
        label: &str,
        search: &dyn Search,
        kind: EntityKind,
        limit: usize,
        language: &str,
        context: &DisambiguationContext,
    ) -> Resolution {
        self.disambiguate(label, search, kind, limit, language, context)
            .into()
    }
}

/// Collect search hits as candidates, skipping hits that fail to load.
pub fn fetch_candidates(
    search: &dyn Search,
    label: &str,
    kind: EntityKind,
    limit: usize,
    language: &str,
) -> Result<Vec<Candidate>, DisambigError> {
    let stream = match kind {
        EntityKind::Item => search.item_descriptor(label, language, limit),
        EntityKind::Property => search.property_descriptor(label, language, limit),
    }
    .map_err(|source| DisambigError::Kb {
        label: label.to_string(),
        source,
    })?;

    let mut candidates = Vec::new();
    for hit in stream {
        match hit {
            Ok((entity, descriptor)) => candidates.push(descriptor.to_candidate(&entity, language)),
            Err(e) => tracing::info!(label, error = %e, "skipping candidate that failed to load"),
        }
    }
    Ok(candidates)
}

/// One disambiguation to run in the background.
#[derive(Debug, Clone)]
pub struct DisambiguationRequest {
    pub label: String,
    pub kind: EntityKind,
    pub limit: usize,
    pub language: String,
    pub context: DisambiguationContext,
}

/// Results of a background disambiguation, yielded one at a time in
/// selection order. A failure is yielded once, as the only item.
pub struct DisambiguationStream {
    rx: mpsc::Receiver<Result<Disambiguated, DisambigError>>,
}

impl Iterator for DisambiguationStream {
    type Item = Result<Disambiguated, DisambigError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

/// Run a disambiguation on the rayon pool and stream its results.
pub fn spawn_disambiguation(
    strategy: Arc<dyn Disambiguator>,
    search: Arc<dyn Search>,
    request: DisambiguationRequest,
) -> DisambiguationStream {
    let (tx, rx) = mpsc::channel();
    rayon::spawn(move || {
        let result = strategy.disambiguate(
            &request.label,
            search.as_ref(),
            request.kind,
            request.limit,
            &request.language,
            &request.context,
        );
        match result {
            Ok(found) => {
                for d in found {
                    if tx.send(Ok(d)).is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
            }
        }
    });
    DisambiguationStream { rx }
}

/// Collaborators a strategy factory may draw on.
#[derive(Clone, Default)]
pub struct DisambiguatorOptions {
    pub model: Option<Arc<dyn ChatModel>>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub metric: SimilarityMetric,
}

impl std::fmt::Debug for DisambiguatorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisambiguatorOptions")
            .field("model", &self.model.as_ref().map(|m| m.model_name().to_string()))
            .field("embedder", &self.embedder.is_some())
            .field("metric", &self.metric)
            .finish()
    }
}

/// Builds a strategy from options.
pub type StrategyFactory =
    fn(&DisambiguatorOptions) -> Result<Arc<dyn Disambiguator>, DisambigError>;

/// Name-keyed map of strategy factories.
#[derive(Clone)]
pub struct DisambiguatorRegistry {
    factories: BTreeMap<&'static str, StrategyFactory>,
}

static BUILTIN: LazyLock<DisambiguatorRegistry> = LazyLock::new(DisambiguatorRegistry::builtin);

impl DisambiguatorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with the `simple`, `sim` and `llm` strategies.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(simple::NAME, simple::factory);
        registry.register(similarity::NAME, similarity::factory);
        registry.register(llm::NAME, llm::factory);
        registry
    }

    /// The process-wide builtin registry.
    pub fn global() -> &'static Self {
        &BUILTIN
    }

    /// Register (or replace) a factory under `name`.
    pub fn register(&mut self, name: &'static str, factory: StrategyFactory) {
        self.factories.insert(name, factory);
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Construct the strategy registered under `name`.
    pub fn create(
        &self,
        name: &str,
        options: &DisambiguatorOptions,
    ) -> Result<Arc<dyn Disambiguator>, DisambigError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| DisambigError::UnknownStrategy {
                name: name.to_string(),
                available: self.names().join(", "),
            })?;
        factory(options)
    }
}

impl Default for DisambiguatorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for DisambiguatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisambiguatorRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;
    use crate::kb::memory::MemoryKb;
    use crate::kb::{Descriptor, DescriptorStream};
    use crate::candidate::EntityRef;
    use crate::error::KbResult;

    fn kb() -> MemoryKb {
        let mut kb = MemoryKb::new();
        kb.add_item("Q90", "Paris", "capital of France");
        kb.add_item("Q167646", "Paris", "genus of plants");
        kb.add_property("P19", "place of birth", "most specific known birth location", None);
        kb
    }

    fn options() -> DisambiguatorOptions {
        DisambiguatorOptions {
            embedder: Some(Arc::new(HashingEmbedder::new(64))),
            ..Default::default()
        }
    }

    #[test]
    fn builtin_names() {
        assert_eq!(
            DisambiguatorRegistry::global().names(),
            vec!["llm", "sim", "simple"]
        );
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = DisambiguatorRegistry::builtin()
            .create("oracle", &options())
            .err()
            .unwrap();
        match err {
            DisambigError::UnknownStrategy { name, available } => {
                assert_eq!(name, "oracle");
                assert_eq!(available, "llm, sim, simple");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn every_strategy_rejects_empty_candidates() {
        struct Echo;
        impl ChatModel for Echo {
            fn invoke(&self, _: &[crate::llm::ChatMessage]) -> Result<String, LlmError> {
                Ok("C1".into())
            }
            fn model_name(&self) -> &str {
                "echo"
            }
        }
        let opts = DisambiguatorOptions {
            model: Some(Arc::new(Echo)),
            ..options()
        };
        let registry = DisambiguatorRegistry::builtin();
        let ctx = DisambiguationContext::sentence("Where is Paris?");
        for name in registry.names() {
            let strategy = registry.create(name, &opts).unwrap();
            let err = strategy
                .disambiguate_candidates("Paris", &[], EntityKind::Item, 5, &ctx)
                .unwrap_err();
            assert!(matches!(err, DisambigError::NoCandidates { .. }), "{name}");
        }
    }

    #[test]
    fn disambiguate_fetches_and_types_results() {
        let strategy = registry_simple();
        let found = strategy
            .disambiguate_item("Paris", &kb(), 10, "en", &DisambiguationContext::default())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity, EntityRef::item("Q90"));
        assert_eq!(found[0].description.as_deref(), Some("capital of France"));

        let props = strategy
            .disambiguate_property("place of birth", &kb(), 10, "en", &DisambiguationContext::default())
            .unwrap();
        assert_eq!(props[0].entity, EntityRef::property("P19"));
    }

    #[test]
    fn no_search_hits_is_empty_not_error() {
        let found = registry_simple()
            .disambiguate_item("Atlantis", &kb(), 10, "en", &DisambiguationContext::default())
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn resolution_tags() {
        let strategy = registry_simple();
        let ctx = DisambiguationContext::default();
        assert!(strategy.resolve("Paris", &kb(), EntityKind::Item, 5, "en", &ctx).is_resolved());
        assert!(matches!(
            strategy.resolve("Atlantis", &kb(), EntityKind::Item, 5, "en", &ctx),
            Resolution::NoCandidates
        ));
        let ambiguous: Resolution = Err(DisambigError::Unresolved { label: "x".into() }).into();
        assert!(matches!(ambiguous, Resolution::Ambiguous));
    }

    struct PartlyBroken;

    impl Search for PartlyBroken {
        fn item_descriptor(&self, _: &str, lang: &str, _: usize) -> KbResult<DescriptorStream<'_>> {
            let mut good = Descriptor::default();
            good.labels.insert(lang.to_string(), "Paris".into());
            Ok(Box::new(
                vec![
                    Err(KbError::Request {
                        message: "bad row".into(),
                    }),
                    Ok((EntityRef::item("Q90"), good)),
                ]
                .into_iter(),
            ))
        }

        fn property_descriptor(&self, _: &str, _: &str, _: usize) -> KbResult<DescriptorStream<'_>> {
            Err(KbError::Timeout { timeout_secs: 1 })
        }
    }

    #[test]
    fn failed_hits_are_skipped_and_failed_searches_surface() {
        let candidates =
            fetch_candidates(&PartlyBroken, "Paris", EntityKind::Item, 10, "en").unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].iri, "Q90");

        let err = fetch_candidates(&PartlyBroken, "born", EntityKind::Property, 10, "en");
        assert!(matches!(err, Err(DisambigError::Kb { .. })));
    }

    #[test]
    fn spawned_disambiguation_streams_results() {
        let stream = spawn_disambiguation(
            registry_simple(),
            Arc::new(kb()),
            DisambiguationRequest {
                label: "Paris".into(),
                kind: EntityKind::Item,
                limit: 10,
                language: "en".into(),
                context: DisambiguationContext::default(),
            },
        );
        let results: Vec<_> = stream.collect::<Result<_, _>>().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, "Paris");
    }

    #[test]
    fn spawned_disambiguation_keeps_selection_order() {
        let strategy = DisambiguatorRegistry::global()
            .create("sim", &options())
            .unwrap();
        let context = DisambiguationContext::sentence("Paris is a genus of flowering plants");
        let expected = strategy
            .disambiguate_item("Paris", &kb(), 10, "en", &context)
            .unwrap();
        assert_eq!(expected.len(), 2);

        let stream = spawn_disambiguation(
            strategy,
            Arc::new(kb()),
            DisambiguationRequest {
                label: "Paris".into(),
                kind: EntityKind::Item,
                limit: 10,
                language: "en".into(),
                context,
            },
        );
        let streamed: Vec<_> = stream.collect::<Result<_, _>>().unwrap();
        assert_eq!(streamed, expected);
    }

    fn registry_simple() -> Arc<dyn Disambiguator> {
        DisambiguatorRegistry::global()
            .create("simple", &DisambiguatorOptions::default())
            .unwrap()
    }
}
