//! Question-answering pipeline: question in, knowledge-base filters out.
//!
//! ```text
//! question ─▶ extract ─▶ link items ─▶ fast property path ─┐
//!                                   └─▶ per-item property ─┴─▶ compile ─▶ filters ─▶ Store
//! ```
//!
//! Each `query()` call works on its own [`QueryState`] and returns an
//! immutable [`QueryOutcome`], so one [`QaPipeline`] can serve concurrent
//! questions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::candidate::{Disambiguated, EntityRef};
use crate::compile::{LabelTriple, ResolvedTriple, compile_filter};
use crate::config::QaConfig;
use crate::disambig::{Disambiguator, DisambiguatorOptions, DisambiguatorRegistry};
use crate::embed::{Embedder, SimilarityMetric};
use crate::error::{ConfigError, ExtractionError, QaError, QaResult};
use crate::extract::fewshot::{self, ExampleIndex};
use crate::extract::{FewShot, TripleExtractor, TriplePattern};
use crate::kb::retrying::Retrying;
use crate::kb::{Filter, Search, Statement, Store, Value};
use crate::llm::{ChatModel, build_model};
use crate::resolve::{
    CandidateFailure, Constraints, PropertyPath, ResolveOptions, Resolved, Resolver,
};
use crate::retry::RetryPolicy;

/// Progress of one query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Fresh,
    TriplesExtracted,
    ItemsLinked,
    PropertiesResolved,
    FastPathResolved,
    FiltersBuilt,
}

impl Stage {
    /// Whether `next` directly follows `self`.
    pub fn precedes(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Self::Fresh, Self::TriplesExtracted)
                | (Self::TriplesExtracted, Self::ItemsLinked)
                | (Self::ItemsLinked, Self::PropertiesResolved)
                | (Self::ItemsLinked, Self::FastPathResolved)
                | (Self::PropertiesResolved, Self::FiltersBuilt)
                | (Self::FastPathResolved, Self::FiltersBuilt)
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Fresh => "fresh",
            Self::TriplesExtracted => "triples-extracted",
            Self::ItemsLinked => "items-linked",
            Self::PropertiesResolved => "properties-resolved",
            Self::FastPathResolved => "fast-path-resolved",
            Self::FiltersBuilt => "filters-built",
        };
        f.write_str(name)
    }
}

/// Mutable state accumulated while answering one question.
#[derive(Debug, Clone, Default)]
pub struct QueryState {
    stage: Stage,
    question: String,
    triple_patterns: Vec<TriplePattern>,
    constraints: Constraints,
    items: Vec<Disambiguated>,
    properties: Vec<Disambiguated>,
    triples: Vec<ResolvedTriple>,
    label_triples: Vec<LabelTriple>,
    filters: Vec<Filter>,
    failures: Vec<CandidateFailure>,
    property_path: Option<PropertyPath>,
}

impl QueryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn triple_patterns(&self) -> &[TriplePattern] {
        &self.triple_patterns
    }

    pub fn items(&self) -> &[Disambiguated] {
        &self.items
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Clear everything and return to [`Stage::Fresh`].
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(self.stage.precedes(next), "{} -> {next}", self.stage);
        tracing::debug!(from = %self.stage, to = %next, "query stage");
        self.stage = next;
    }

    fn absorb(&mut self, resolved: Resolved, path: PropertyPath) {
        self.triples.extend(resolved.triples);
        self.label_triples.extend(resolved.label_triples);
        for p in resolved.properties {
            if !self.properties.contains(&p) {
                self.properties.push(p);
            }
        }
        self.failures.extend(resolved.failures);
        self.property_path = Some(path);
    }

    /// Freeze into an outcome record.
    pub fn into_outcome(self) -> QueryOutcome {
        QueryOutcome {
            stage: self.stage,
            question: self.question,
            triple_patterns: self.triple_patterns,
            constraints: self.constraints,
            items: self.items,
            properties: self.properties,
            triples: self.triples,
            label_triples: self.label_triples,
            filters: self.filters,
            failures: self.failures,
            property_path: self.property_path,
        }
    }
}

/// Everything one query produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub stage: Stage,
    pub question: String,
    /// Patterns returned by extraction.
    pub triple_patterns: Vec<TriplePattern>,
    pub constraints: Constraints,
    /// Linked candidates for the known mention.
    pub items: Vec<Disambiguated>,
    /// Distinct resolved properties.
    pub properties: Vec<Disambiguated>,
    pub triples: Vec<ResolvedTriple>,
    pub label_triples: Vec<LabelTriple>,
    pub filters: Vec<Filter>,
    /// Linked items whose property could not be resolved.
    pub failures: Vec<CandidateFailure>,
    pub property_path: Option<PropertyPath>,
}

/// The question-answering pipeline.
pub struct QaPipeline {
    extractor: TripleExtractor,
    resolver: Resolver,
    store: Arc<dyn Store>,
    retry: RetryPolicy,
}

impl QaPipeline {
    pub fn builder() -> QaPipelineBuilder {
        QaPipelineBuilder::default()
    }

    /// Build from configuration against a knowledge base serving both
    /// search and statements.
    pub fn from_config<K>(config: &QaConfig, kb: Arc<K>) -> QaResult<Self>
    where
        K: Search + Store + 'static,
    {
        let extraction_model = build_model(&config.model, config.model.extraction_model_name())?;
        let linking_model = build_model(&config.model, config.model.linking_model_name())?;
        let embedder = config.build_embedder()?;

        let few_shot = few_shot_from_config(config, &embedder)?;

        Self::builder()
            .model(extraction_model)
            .linking_model(linking_model)
            .embedder(embedder)
            .kb(kb)
            .strategy_name(&config.disambiguation.strategy)
            .metric(config.disambiguation.metric)
            .few_shot(few_shot)
            .resolve_options(config.resolution.clone())
            .retry(config.retry.policy())
            .build()
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Extract triple patterns from `question`, retrying failed attempts.
    pub fn logical_form(&self, question: &str) -> Result<Vec<TriplePattern>, ExtractionError> {
        self.retry
            .run("extract", || self.extractor.extract(question))
    }

    /// Answer `question` up to its filters.
    pub fn query(&self, question: &str) -> QaResult<QueryOutcome> {
        let mut state = QueryState::new();
        self.run(question, &mut state)?;
        Ok(state.into_outcome())
    }

    /// Like [`query`](Self::query), accumulating into a caller-owned state.
    ///
    /// The state is reset first. On failure it keeps the stage reached.
    pub fn run(&self, question: &str, state: &mut QueryState) -> QaResult<()> {
        state.reset();
        state.question = question.to_string();
        let patterns = self.logical_form(question)?;
        if patterns.is_empty() {
            return Err(ExtractionError::NoTriples {
                question: question.to_string(),
            }
            .into());
        }
        self.fill(&patterns, question, state)
    }

    /// Resolve already extracted patterns into filters.
    ///
    /// Exactly one pattern is accepted.
    pub fn generate_filters(
        &self,
        patterns: &[TriplePattern],
        question: &str,
    ) -> QaResult<QueryOutcome> {
        let mut state = QueryState::new();
        state.question = question.to_string();
        self.fill(patterns, question, &mut state)?;
        Ok(state.into_outcome())
    }

    fn fill(
        &self,
        patterns: &[TriplePattern],
        question: &str,
        state: &mut QueryState,
    ) -> QaResult<()> {
        let pattern = match patterns {
            [] => {
                return Err(ExtractionError::NoTriples {
                    question: question.to_string(),
                }
                .into());
            }
            [single] => single,
            many => {
                return Err(ExtractionError::MultipleTriples {
                    question: question.to_string(),
                    count: many.len(),
                }
                .into());
            }
        };
        state.triple_patterns = patterns.to_vec();
        state.advance(Stage::TriplesExtracted);

        let slot = pattern.unknown_slot()?;
        let mention = pattern.main_mention()?;
        let property = pattern.property_mention()?;

        state.constraints = self.resolver.resolve_constraints(pattern, question)?;
        state.items = self.resolver.link_items(mention, question)?;
        state.advance(Stage::ItemsLinked);

        let fast = if self.resolver.options().fast_path {
            self.resolver.fast_property(property).and_then(|p| {
                let resolved =
                    self.resolver
                        .resolve_with_property(slot, &state.items, &p, &state.constraints);
                let compiles = resolved.triples.iter().any(|t| compile_filter(t).is_some());
                if !compiles {
                    tracing::info!(property, "fast path produced no filters, disambiguating");
                }
                compiles.then_some(resolved)
            })
        } else {
            None
        };

        match fast {
            Some(resolved) => {
                state.absorb(resolved, PropertyPath::Fast);
                state.advance(Stage::FastPathResolved);
            }
            None => {
                let resolved = self.resolver.resolve_per_item(
                    pattern,
                    slot,
                    &state.items,
                    question,
                    &state.constraints,
                )?;
                state.absorb(resolved, PropertyPath::Full);
                state.advance(Stage::PropertiesResolved);
            }
        }

        state.filters = state.triples.iter().filter_map(compile_filter).collect();
        state.advance(Stage::FiltersBuilt);
        tracing::info!(
            question,
            items = state.items.len(),
            triples = state.triples.len(),
            filters = state.filters.len(),
            failures = state.failures.len(),
            "built filters"
        );
        Ok(())
    }

    /// Statements matching the outcome's filters, in filter order.
    ///
    /// A filter's stream is opened, with retries, only once the previous
    /// filter's statements are exhausted. A filter that keeps failing to
    /// open yields its last error in place of its statements.
    pub fn statements<'a>(
        &'a self,
        outcome: &'a QueryOutcome,
    ) -> impl Iterator<Item = QaResult<Statement>> + 'a {
        outcome.filters.iter().flat_map(
            move |filter| -> Box<dyn Iterator<Item = QaResult<Statement>> + 'a> {
                match self.retry.run("store.filter", || self.store.filter(filter)) {
                    Ok(stream) => Box::new(stream.map(|s| s.map_err(QaError::from))),
                    Err(e) => Box::new(std::iter::once(Err(QaError::from(e)))),
                }
            },
        )
    }

    /// Subjects of [`statements`](Self::statements).
    pub fn subjects<'a>(
        &'a self,
        outcome: &'a QueryOutcome,
    ) -> impl Iterator<Item = QaResult<EntityRef>> + 'a {
        self.statements(outcome).map(|s| s.map(|s| s.subject))
    }

    /// Values of [`statements`](Self::statements).
    pub fn values<'a>(
        &'a self,
        outcome: &'a QueryOutcome,
    ) -> impl Iterator<Item = QaResult<Value>> + 'a {
        self.statements(outcome).map(|s| s.map(|s| s.value))
    }

    /// Total statements across the outcome's filters.
    pub fn count(&self, outcome: &QueryOutcome) -> QaResult<usize> {
        let mut total = 0;
        for filter in &outcome.filters {
            total += self.retry.run("store.count", || self.store.count(filter))?;
        }
        Ok(total)
    }
}

impl std::fmt::Debug for QaPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QaPipeline")
            .field("few_shot", self.extractor.few_shot())
            .field("resolver", &self.resolver)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Few-shot source selected under `[extraction]`.
///
/// A saved index wins over an example file, which wins over the built-in
/// examples. `few_shot_k = 0` disables few-shot prompting.
pub fn few_shot_from_config(config: &QaConfig, embedder: &Arc<dyn Embedder>) -> QaResult<FewShot> {
    let extraction = &config.extraction;
    if extraction.few_shot_k == 0 {
        return Ok(FewShot::None);
    }
    let index = if let Some(path) = &extraction.index {
        ExampleIndex::load(path)?
    } else if let Some(path) = &extraction.examples {
        let examples = fewshot::load_examples(path, None)?;
        ExampleIndex::build(examples, embedder.as_ref())?
    } else if extraction.default_examples {
        return Ok(FewShot::Fixed(fewshot::default_examples()));
    } else {
        return Ok(FewShot::None);
    };
    tracing::debug!(examples = index.len(), k = extraction.few_shot_k, "few-shot index ready");
    Ok(FewShot::Nearest {
        index: Arc::new(index),
        embedder: embedder.clone(),
        k: extraction.few_shot_k,
    })
}

/// Assembles a [`QaPipeline`], failing on missing components before any
/// network call.
pub struct QaPipelineBuilder {
    model: Option<Arc<dyn ChatModel>>,
    linking_model: Option<Arc<dyn ChatModel>>,
    embedder: Option<Arc<dyn Embedder>>,
    search: Option<Arc<dyn Search>>,
    store: Option<Arc<dyn Store>>,
    strategy: Option<Arc<dyn Disambiguator>>,
    strategy_name: String,
    registry: DisambiguatorRegistry,
    metric: SimilarityMetric,
    few_shot: FewShot,
    system_prompt: Option<String>,
    resolve: ResolveOptions,
    retry: RetryPolicy,
}

impl Default for QaPipelineBuilder {
    fn default() -> Self {
        Self {
            model: None,
            linking_model: None,
            embedder: None,
            search: None,
            store: None,
            strategy: None,
            strategy_name: "llm".into(),
            registry: DisambiguatorRegistry::builtin(),
            metric: SimilarityMetric::default(),
            few_shot: FewShot::None,
            system_prompt: None,
            resolve: ResolveOptions::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl QaPipelineBuilder {
    /// Chat model for extraction, and for linking unless overridden.
    pub fn model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn linking_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.linking_model = Some(model);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn search(mut self, search: Arc<dyn Search>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use one knowledge base for both search and statements.
    pub fn kb<K: Search + Store + 'static>(self, kb: Arc<K>) -> Self {
        self.search(kb.clone()).store(kb)
    }

    /// Use this strategy instead of one from the registry.
    pub fn strategy(mut self, strategy: Arc<dyn Disambiguator>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn strategy_name(mut self, name: &str) -> Self {
        self.strategy_name = name.to_string();
        self
    }

    pub fn registry(mut self, registry: DisambiguatorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn metric(mut self, metric: SimilarityMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn few_shot(mut self, few_shot: FewShot) -> Self {
        self.few_shot = few_shot;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn resolve_options(mut self, options: ResolveOptions) -> Self {
        self.resolve = options;
        self
    }

    pub fn fast_path(mut self, enabled: bool) -> Self {
        self.resolve.fast_path = enabled;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn build(self) -> QaResult<QaPipeline> {
        let model = self
            .model
            .ok_or(ConfigError::MissingComponent { component: "chat model" })?;
        let search = self
            .search
            .ok_or(ConfigError::MissingComponent { component: "search backend" })?;
        let store = self
            .store
            .ok_or(ConfigError::MissingComponent { component: "statement store" })?;

        let strategy = match self.strategy {
            Some(strategy) => strategy,
            None => {
                let options = DisambiguatorOptions {
                    model: Some(self.linking_model.unwrap_or_else(|| model.clone())),
                    embedder: self.embedder,
                    metric: self.metric,
                };
                self.registry.create(&self.strategy_name, &options)?
            }
        };

        let mut extractor = TripleExtractor::new(model).with_few_shot(self.few_shot);
        if let Some(prompt) = self.system_prompt {
            extractor = extractor.with_system_prompt(prompt);
        }

        let resolver = Resolver::new(
            Arc::new(Retrying::new(search, self.retry)),
            Arc::new(Retrying::new(store.clone(), self.retry)),
            strategy,
            self.resolve,
        )?;
        tracing::debug!(strategy = resolver.strategy().name(), "pipeline ready");

        Ok(QaPipeline {
            extractor,
            resolver,
            store,
            retry: self.retry,
        })
    }
}
