//! End-to-end tests for the question-answering pipeline.
//!
//! A scripted chat model stands in for the LLM and an in-memory knowledge
//! base for the remote one, so every stage from extraction to statement
//! retrieval runs for real.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use kbqa::candidate::{Candidate, EntityRef, Selection};
use kbqa::config::QaConfig;
use kbqa::disambig::simple::FirstCandidate;
use kbqa::disambig::{DisambigError, DisambiguationContext, Disambiguator};
use kbqa::error::{ExtractionError, KbError, KbResult, LinkingError, QaError};
use kbqa::extract::{EXTRACTION_PROMPT, FewShot, TriplePattern};
use kbqa::kb::memory::MemoryKb;
use kbqa::kb::{Datatype, Filter, Fingerprint, PropertyInfo, StatementStream, Store, Value};
use kbqa::llm::{ChatMessage, ChatModel, LlmError};
use kbqa::pipeline::{QaPipeline, QueryState, Stage, few_shot_from_config};
use kbqa::resolve::{INSTANCE_OF, PropertyPath};
use kbqa::retry::RetryPolicy;

/// Answers extraction prompts with a fixed reply and linking prompts by term.
struct Scripted {
    extraction: String,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(extraction: &str) -> Arc<Self> {
        Arc::new(Self {
            extraction: extraction.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

impl ChatModel for Scripted {
    fn invoke(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if messages.first().is_some_and(|m| m.content == EXTRACTION_PROMPT) {
            return Ok(self.extraction.clone());
        }
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        let reply = if last.contains("Term: \"Freddie Mercury\"") {
            "<think>the singer, not the statue</think>Q15869"
        } else if last.contains("Term: \"born\"") {
            "P19"
        } else {
            ""
        };
        Ok(reply.to_string())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Keeps every candidate.
struct TakeAll;

impl Disambiguator for TakeAll {
    fn name(&self) -> &'static str {
        "all"
    }

    fn select(
        &self,
        _label: &str,
        candidates: &[Candidate],
        limit: usize,
        _context: &DisambiguationContext,
    ) -> Result<Vec<Selection>, DisambigError> {
        let take = if limit == 0 { candidates.len() } else { limit };
        Ok(candidates.iter().take(take).map(Selection::from).collect())
    }
}

/// Fails the first `failures` statement lookups.
struct Flaky {
    inner: Arc<MemoryKb>,
    failures: usize,
    calls: AtomicUsize,
}

impl Store for Flaky {
    fn filter(&self, filter: &Filter) -> KbResult<StatementStream<'_>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(KbError::Timeout { timeout_secs: 1 });
        }
        self.inner.filter(filter)
    }

    fn filter_properties(&self, filter: &Filter) -> KbResult<Vec<PropertyInfo>> {
        self.inner.filter_properties(filter)
    }
}

/// Counts opened streams and the statements pulled from them.
struct Counting {
    inner: Arc<MemoryKb>,
    opened: AtomicUsize,
    pulled: AtomicUsize,
}

impl Counting {
    fn new(inner: Arc<MemoryKb>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            opened: AtomicUsize::new(0),
            pulled: AtomicUsize::new(0),
        })
    }
}

impl Store for Counting {
    fn filter(&self, filter: &Filter) -> KbResult<StatementStream<'_>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let stream = self.inner.filter(filter)?;
        Ok(Box::new(stream.inspect(move |_| {
            self.pulled.fetch_add(1, Ordering::SeqCst);
        })))
    }

    fn filter_properties(&self, filter: &Filter) -> KbResult<Vec<PropertyInfo>> {
        self.inner.filter_properties(filter)
    }
}

fn kb() -> Arc<MemoryKb> {
    let mut kb = MemoryKb::new();
    let freddie = kb.add_item("Q15869", "Freddie Mercury", "British singer (1946–1991)");
    kb.add_item("Q999", "Freddie Mercury Statue", "statue in Montreux");
    let zanzibar = kb.add_item("Q1867", "Zanzibar", "island in Tanzania");
    let tippu = kb.add_item("Q352", "Tippu Tip", "Swahili-Zanzibari trader");
    let ship = kb.add_item("Q4000", "Spirit of Zanzibar", "ferry");
    let human = kb.add_item("Q5", "human", "species");
    let vessel = kb.add_item("Q11446", "ship", "large watercraft");

    let born = kb.add_property("P19", "place of birth", "birth location", Some(Datatype::Item));
    let instance = kb.add_property(INSTANCE_OF, "instance of", "type", Some(Datatype::Item));
    let birthday = kb.add_property("P569", "date of birth", "birth date", Some(Datatype::Time));
    let viaf = kb.add_property("P214", "VIAF ID", "identifier", Some(Datatype::ExternalId));

    kb.add_statement(&freddie, &born, Value::Entity(zanzibar.clone()));
    kb.add_statement(&freddie, &instance, Value::Entity(human.clone()));
    kb.add_statement(
        &freddie,
        &birthday,
        Value::Literal {
            datatype: Datatype::Time,
            content: "1946-09-05".into(),
        },
    );
    kb.add_statement(
        &freddie,
        &viaf,
        Value::Literal {
            datatype: Datatype::ExternalId,
            content: "64004537".into(),
        },
    );
    kb.add_statement(&tippu, &born, Value::Entity(zanzibar.clone()));
    kb.add_statement(&tippu, &instance, Value::Entity(human));
    kb.add_statement(&ship, &born, Value::Entity(zanzibar));
    kb.add_statement(&ship, &instance, Value::Entity(vessel));
    Arc::new(kb)
}

fn pipeline(model: Arc<Scripted>, strategy: Arc<dyn Disambiguator>) -> QaPipeline {
    QaPipeline::builder()
        .model(model)
        .kb(kb())
        .strategy(strategy)
        .retry(RetryPolicy::none())
        .build()
        .unwrap()
}

fn values(pipeline: &QaPipeline, outcome: &kbqa::pipeline::QueryOutcome) -> Vec<Value> {
    pipeline.values(outcome).map(Result::unwrap).collect()
}

const FREDDIE_BORN: &str = "Where was Freddie Mercury born?";

#[test]
fn fast_path_answers_birthplace() {
    let model = Scripted::new(
        r#"[{"subject": "Freddie Mercury", "property": "place of birth", "object": "?x"}]"#,
    );
    let p = pipeline(model, Arc::new(FirstCandidate));
    let outcome = p.query(FREDDIE_BORN).unwrap();

    assert_eq!(outcome.stage, Stage::FiltersBuilt);
    assert_eq!(outcome.property_path, Some(PropertyPath::Fast));
    assert_eq!(outcome.items[0].entity, EntityRef::item("Q15869"));
    assert_eq!(outcome.filters.len(), 1);
    assert_eq!(
        outcome.label_triples[0].to_string(),
        "(Freddie Mercury, place of birth, ?x)"
    );
    assert_eq!(
        values(&p, &outcome),
        vec![Value::Entity(EntityRef::item("Q1867"))]
    );
    assert_eq!(p.count(&outcome).unwrap(), 1);
}

#[test]
fn fast_path_matches_a_property_labelled_born() {
    let mut kb = MemoryKb::new();
    let freddie = kb.add_item("Q15869", "Freddie Mercury", "British singer");
    let zanzibar = kb.add_item("Q1867", "Zanzibar", "island in Tanzania");
    let born = kb.add_property("P19", "born", "place of birth", Some(Datatype::Item));
    kb.add_statement(&freddie, &born, Value::Entity(zanzibar));

    let model = Scripted::new(
        r#"[{"subject": "Freddie Mercury", "property": "born", "object": "?x"}]"#,
    );
    let p = QaPipeline::builder()
        .model(model.clone())
        .kb(Arc::new(kb))
        .strategy(Arc::new(FirstCandidate))
        .retry(RetryPolicy::none())
        .build()
        .unwrap();
    let outcome = p.query(FREDDIE_BORN).unwrap();

    assert_eq!(outcome.triple_patterns.len(), 1);
    assert_eq!(outcome.items.len(), 1);
    assert_eq!(outcome.property_path, Some(PropertyPath::Fast));
    assert_eq!(outcome.filters.len(), 1);
    let filter = &outcome.filters[0];
    assert_eq!(filter.subject, Fingerprint::Entity(EntityRef::item("Q15869")));
    assert_eq!(filter.property, Fingerprint::Entity(EntityRef::property("P19")));
    assert!(filter.value.is_any());
    assert_eq!(p.statements(&outcome).count(), 1);
    // only the extraction call reached the model
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn inexact_property_label_falls_back_to_full_disambiguation() {
    let model = Scripted::new(
        r#"[{'subject': 'Freddie Mercury', 'property': 'born', 'object': '?x'}]"#,
    );
    let p = pipeline(model, Arc::new(FirstCandidate));
    let outcome = p.query(FREDDIE_BORN).unwrap();

    assert_eq!(outcome.property_path, Some(PropertyPath::Full));
    assert_eq!(outcome.properties[0].entity, EntityRef::property("P19"));
    assert_eq!(
        values(&p, &outcome),
        vec![Value::Entity(EntityRef::item("Q1867"))]
    );
}

#[test]
fn fast_path_can_be_disabled() {
    let model = Scripted::new(
        r#"[{"subject": "Freddie Mercury", "property": "place of birth", "object": "?x"}]"#,
    );
    let p = QaPipeline::builder()
        .model(model)
        .kb(kb())
        .strategy(Arc::new(FirstCandidate))
        .fast_path(false)
        .retry(RetryPolicy::none())
        .build()
        .unwrap();
    let outcome = p.query(FREDDIE_BORN).unwrap();
    assert_eq!(outcome.property_path, Some(PropertyPath::Full));
    assert_eq!(outcome.filters.len(), 1);
}

#[test]
fn literal_ranged_fast_match_falls_back() {
    let model = Scripted::new(
        r#"[{"subject": "Freddie Mercury", "property": "date of birth", "object": "?x"}]"#,
    );
    let p = pipeline(model, Arc::new(FirstCandidate));
    let outcome = p.query("When was Freddie Mercury born?").unwrap();
    assert_eq!(outcome.property_path, Some(PropertyPath::Full));
    assert_eq!(outcome.stage, Stage::FiltersBuilt);
}

#[test]
fn per_item_failures_do_not_abort_the_query() {
    let model = Scripted::new(
        r#"[{"subject": "Freddie Mercury", "property": "born", "object": "?x"}]"#,
    );
    let p = pipeline(model, Arc::new(TakeAll));
    let outcome = p.query(FREDDIE_BORN).unwrap();

    assert_eq!(outcome.items.len(), 2);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].item, EntityRef::item("Q999"));
    assert!(
        outcome
            .triples
            .iter()
            .all(|t| t.subject == Some(EntityRef::item("Q15869")))
    );
    // place of birth and instance of compile; date of birth is literal-ranged.
    assert_eq!(outcome.triples.len(), 3);
    assert_eq!(outcome.filters.len(), 2);
}

#[test]
fn type_constraint_restricts_subjects() {
    let model = Scripted::new(
        r#"[{"subject": "?x", "property": "place of birth", "object": "Zanzibar",
             "constraints": [{"subject": "?x", "property": "a", "object": "human"}]}]"#,
    );
    let p = pipeline(model, Arc::new(FirstCandidate));
    let outcome = p.query("Which people were born in Zanzibar?").unwrap();

    assert_eq!(outcome.constraints.resolved.len(), 1);
    let subjects: Vec<_> = p.subjects(&outcome).map(Result::unwrap).collect();
    assert_eq!(
        subjects,
        vec![EntityRef::item("Q15869"), EntityRef::item("Q352")]
    );
}

#[test]
fn llm_strategy_links_and_picks_properties() {
    let model = Scripted::new(
        r#"```json
[{"subject": "Freddie Mercury", "property": "born", "object": "?x"}]
```"#,
    );
    let p = QaPipeline::builder()
        .model(model.clone())
        .kb(kb())
        .strategy_name("llm")
        .retry(RetryPolicy::none())
        .build()
        .unwrap();
    assert_eq!(p.resolver().strategy().name(), "llm");

    let outcome = p.query(FREDDIE_BORN).unwrap();
    assert_eq!(outcome.items.len(), 1);
    assert_eq!(outcome.items[0].label, "Freddie Mercury");
    assert_eq!(outcome.properties[0].entity, EntityRef::property("P19"));
    // extraction, item linking, property choice
    assert_eq!(model.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn multiple_triples_are_rejected() {
    let model = Scripted::new(
        r#"[{"subject": "Freddie Mercury", "property": "place of birth", "object": "?x"},
            {"subject": "Freddie Mercury", "property": "date of birth", "object": "?x"}]"#,
    );
    let p = pipeline(model, Arc::new(FirstCandidate));
    let err = p.query(FREDDIE_BORN).unwrap_err();
    assert!(matches!(
        err,
        QaError::Extraction(ExtractionError::MultipleTriples { count: 2, .. })
    ));
}

#[test]
fn empty_extraction_is_no_triples() {
    let p = pipeline(Scripted::new("[]"), Arc::new(FirstCandidate));
    let err = p.query("Hello there").unwrap_err();
    assert!(matches!(
        err,
        QaError::Extraction(ExtractionError::NoTriples { .. })
    ));
}

#[test]
fn unparseable_extraction_is_retried_then_reported() {
    let model = Scripted::new("I cannot help with that.");
    let p = QaPipeline::builder()
        .model(model.clone())
        .kb(kb())
        .strategy(Arc::new(FirstCandidate))
        .retry(RetryPolicy::fixed(2, Duration::ZERO))
        .build()
        .unwrap();
    let err = p.query(FREDDIE_BORN).unwrap_err();
    assert!(matches!(
        err,
        QaError::Extraction(ExtractionError::InvalidOutput { .. })
    ));
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn state_keeps_the_stage_reached_on_failure() {
    let model = Scripted::new(
        r#"[{"subject": "Farrokh Bulsara", "property": "place of birth", "object": "?x"}]"#,
    );
    let p = pipeline(model, Arc::new(FirstCandidate));
    let mut state = QueryState::new();
    let err = p.run(FREDDIE_BORN, &mut state).unwrap_err();
    assert!(matches!(
        err,
        QaError::Linking(LinkingError::Unresolved { ref label }) if label == "Farrokh Bulsara"
    ));
    assert_eq!(state.stage(), Stage::TriplesExtracted);
    assert_eq!(state.question(), FREDDIE_BORN);

    state.reset();
    assert_eq!(state.stage(), Stage::Fresh);
}

#[test]
fn statement_lookups_are_retried() {
    let kb = kb();
    let flaky = Arc::new(Flaky {
        inner: kb.clone(),
        failures: 2,
        calls: AtomicUsize::new(0),
    });
    let model = Scripted::new(
        r#"[{"subject": "Freddie Mercury", "property": "place of birth", "object": "?x"}]"#,
    );
    let p = QaPipeline::builder()
        .model(model)
        .search(kb)
        .store(flaky.clone())
        .strategy(Arc::new(FirstCandidate))
        .retry(RetryPolicy::fixed(3, Duration::ZERO))
        .build()
        .unwrap();
    let outcome = p.query(FREDDIE_BORN).unwrap();
    let statements: Vec<_> = p.statements(&outcome).collect();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].is_ok());
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn exhausted_statement_retries_surface_as_items() {
    let kb = kb();
    let flaky = Arc::new(Flaky {
        inner: kb.clone(),
        failures: 5,
        calls: AtomicUsize::new(0),
    });
    let model = Scripted::new(
        r#"[{"subject": "Freddie Mercury", "property": "place of birth", "object": "?x"}]"#,
    );
    let p = QaPipeline::builder()
        .model(model)
        .search(kb)
        .store(flaky)
        .strategy(Arc::new(FirstCandidate))
        .retry(RetryPolicy::none())
        .build()
        .unwrap();
    let outcome = p.query(FREDDIE_BORN).unwrap();
    let first = p.statements(&outcome).next().unwrap();
    assert!(matches!(first, Err(QaError::Kb(KbError::Timeout { .. }))));
}

#[test]
fn statements_are_pulled_on_demand() {
    let kb = kb();
    let counting = Counting::new(kb.clone());
    let model = Scripted::new(
        r#"[{"subject": "Freddie Mercury", "property": "born", "object": "?x"}]"#,
    );
    let p = QaPipeline::builder()
        .model(model)
        .search(kb)
        .store(counting.clone())
        .strategy(Arc::new(TakeAll))
        .retry(RetryPolicy::none())
        .build()
        .unwrap();
    let outcome = p.query(FREDDIE_BORN).unwrap();
    assert_eq!(outcome.filters.len(), 2);
    assert_eq!(counting.opened.load(Ordering::SeqCst), 0);

    let first: Vec<_> = p.statements(&outcome).take(1).collect();
    assert_eq!(first.len(), 1);
    assert_eq!(counting.opened.load(Ordering::SeqCst), 1);
    assert_eq!(counting.pulled.load(Ordering::SeqCst), 1);

    assert_eq!(p.statements(&outcome).count(), 2);
    assert_eq!(counting.opened.load(Ordering::SeqCst), 3);
    assert_eq!(counting.pulled.load(Ordering::SeqCst), 3);
}

#[test]
fn generate_filters_rejects_empty_patterns() {
    let model = Scripted::new("[]");
    let p = pipeline(model.clone(), Arc::new(FirstCandidate));
    let err = p.generate_filters(&[], FREDDIE_BORN).unwrap_err();
    assert!(matches!(
        err,
        QaError::Extraction(ExtractionError::NoTriples { ref question }) if question == FREDDIE_BORN
    ));
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn generate_filters_rejects_several_patterns() {
    let p = pipeline(Scripted::new("[]"), Arc::new(FirstCandidate));
    let patterns = [
        TriplePattern::new("Freddie Mercury", "place of birth", "?x"),
        TriplePattern::new("Freddie Mercury", "date of birth", "?x"),
    ];
    let err = p.generate_filters(&patterns, FREDDIE_BORN).unwrap_err();
    assert!(matches!(
        err,
        QaError::Extraction(ExtractionError::MultipleTriples { count: 2, .. })
    ));
}

#[test]
fn generate_filters_resolves_a_given_pattern() {
    let model = Scripted::new("[]");
    let p = pipeline(model.clone(), Arc::new(FirstCandidate));
    let patterns = [TriplePattern::new("Freddie Mercury", "place of birth", "?x")];
    let outcome = p.generate_filters(&patterns, FREDDIE_BORN).unwrap();

    assert_eq!(outcome.question, FREDDIE_BORN);
    assert_eq!(outcome.stage, Stage::FiltersBuilt);
    assert_eq!(outcome.triple_patterns, patterns.to_vec());
    assert_eq!(outcome.filters.len(), 1);
    assert_eq!(
        outcome.label_triples[0].to_string(),
        "(Freddie Mercury, place of birth, ?x)"
    );
    assert_eq!(
        values(&p, &outcome),
        vec![Value::Entity(EntityRef::item("Q1867"))]
    );
    // no extraction call: the patterns were supplied
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn builds_from_config() {
    let config = QaConfig::default();
    let p = QaPipeline::from_config(&config, kb()).unwrap();
    assert_eq!(p.resolver().strategy().name(), "llm");
    assert!(p.resolver().options().fast_path);

    let mut config = QaConfig::default();
    config.disambiguation.strategy = "sim".into();
    let p = QaPipeline::from_config(&config, kb()).unwrap();
    assert_eq!(p.resolver().strategy().name(), "sim");

    config.disambiguation.strategy = "oracle".into();
    let err = QaPipeline::from_config(&config, kb()).unwrap_err();
    assert!(matches!(
        err,
        QaError::Disambiguation(DisambigError::UnknownStrategy { .. })
    ));
}

#[test]
fn few_shot_source_follows_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("examples.jsonl");
    std::fs::write(
        &path,
        "{\"input\": \"Who wrote Hamlet?\", \"output\": \"[]\"}\n\
         {\"input\": \"Where is Paris?\", \"output\": \"[]\"}\n",
    )
    .unwrap();

    let mut config = QaConfig::default();
    let embedder = config.build_embedder().unwrap();
    assert!(matches!(
        few_shot_from_config(&config, &embedder).unwrap(),
        FewShot::Fixed(_)
    ));

    config.extraction.examples = Some(path);
    config.extraction.few_shot_k = 1;
    match few_shot_from_config(&config, &embedder).unwrap() {
        FewShot::Nearest { index, k, .. } => {
            assert_eq!(index.len(), 2);
            assert_eq!(k, 1);
        }
        other => panic!("expected nearest examples, got {other:?}"),
    }

    config.extraction.few_shot_k = 0;
    assert!(matches!(
        few_shot_from_config(&config, &embedder).unwrap(),
        FewShot::None
    ));
}
