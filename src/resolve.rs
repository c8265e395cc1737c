//! Entity and property resolution for one triple pattern.
//!
//! Resolution runs in three steps:
//!
//! 1. **Item linking**: the known mention is disambiguated against item
//!    search with the question as context. Every linked candidate is kept,
//!    so ambiguity fans out into one triple per candidate.
//! 2. **Fast property path**: a property whose label equals the property
//!    mention exactly is paired with every linked item.
//! 3. **Full property disambiguation**: otherwise each linked item gets its
//!    own task on a bounded worker pool. The task collects the properties
//!    observed on the item and lets the strategy choose among them. Tasks
//!    fail independently; failures are logged and recorded, never fatal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::candidate::{Candidate, Disambiguated, EntityKind, EntityRef, dedup_by_id};
use crate::compile::{LabelTriple, ResolvedConstraint, ResolvedTriple};
use crate::disambig::{DisambigError, DisambiguationContext, Disambiguator, Resolution};
use crate::error::{LinkingError, QaResult, ResolveError};
use crate::extract::{TriplePattern, UnknownSlot};
use crate::kb::{Datatype, DatatypeMask, Filter, PropertyMask, Search, SnakMask, Store};

/// Wikidata's "instance of" property.
pub const INSTANCE_OF: &str = "http://www.wikidata.org/entity/P31";

/// Property mention that stands for the type relation.
pub const TYPE_RELATION: &str = "a";

/// Number of property hits inspected by the fast path.
const FAST_PATH_LIMIT: usize = 10;

fn default_candidates_limit() -> usize {
    10
}

fn default_language() -> String {
    "en".into()
}

fn default_fast_path() -> bool {
    true
}

fn default_type_property() -> String {
    INSTANCE_OF.into()
}

/// Tunables for [`Resolver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveOptions {
    /// Maximum candidates fetched per item search.
    #[serde(default = "default_candidates_limit")]
    pub candidates_limit: usize,
    /// Language of labels and descriptions.
    #[serde(default = "default_language")]
    pub language: String,
    /// Try an exact property-label match before full disambiguation.
    #[serde(default = "default_fast_path")]
    pub fast_path: bool,
    /// Property worker pool size; 0 means available parallelism.
    #[serde(default)]
    pub workers: usize,
    /// IRI the type relation [`TYPE_RELATION`] maps to.
    #[serde(default = "default_type_property")]
    pub type_property: String,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            candidates_limit: default_candidates_limit(),
            language: default_language(),
            fast_path: default_fast_path(),
            workers: 0,
            type_property: default_type_property(),
        }
    }
}

/// How the property of a triple was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyPath {
    /// Exact label match.
    Fast,
    /// Per-item disambiguation.
    Full,
}

/// A resolved property with its declared range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedProperty {
    pub property: Disambiguated,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Datatype>,
}

/// Resolved constraints of a pattern, with their display labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    pub resolved: Vec<ResolvedConstraint>,
    pub labels: Vec<LabelTriple>,
}

/// A linked item whose property could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub item: EntityRef,
    pub message: String,
}

/// Triples produced for one pattern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolved {
    pub triples: Vec<ResolvedTriple>,
    pub label_triples: Vec<LabelTriple>,
    /// Distinct properties used, in first-use order.
    pub properties: Vec<Disambiguated>,
    pub failures: Vec<CandidateFailure>,
}

impl Resolved {
    fn add(
        &mut self,
        slot: UnknownSlot,
        item: &Disambiguated,
        property: &ResolvedProperty,
        constraints: &Constraints,
    ) {
        if !self.properties.contains(&property.property) {
            self.properties.push(property.property.clone());
        }
        let (subject, value) = match slot {
            UnknownSlot::Object => (Some(item), None),
            UnknownSlot::Subject => (None, Some(item)),
        };
        self.triples.push(ResolvedTriple {
            subject: subject.map(|d| d.entity.clone()),
            property: Some(property.property.entity.clone()),
            property_range: property.range,
            value: value.map(|d| d.entity.clone()),
            constraints: constraints.resolved.clone(),
        });
        self.label_triples.push(LabelTriple {
            subject: subject.map(|d| d.label.clone()),
            property: Some(property.property.label.clone()),
            value: value.map(|d| d.label.clone()),
        });
    }
}

/// Links mentions and resolves properties against a knowledge base.
pub struct Resolver {
    search: Arc<dyn Search>,
    store: Arc<dyn Store>,
    strategy: Arc<dyn Disambiguator>,
    options: ResolveOptions,
    pool: rayon::ThreadPool,
}

impl Resolver {
    pub fn new(
        search: Arc<dyn Search>,
        store: Arc<dyn Store>,
        strategy: Arc<dyn Disambiguator>,
        options: ResolveOptions,
    ) -> Result<Self, ResolveError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers)
            .thread_name(|i| format!("kbqa-resolve-{i}"))
            .build()
            .map_err(|e| ResolveError::WorkerPool {
                message: e.to_string(),
            })?;
        Ok(Self {
            search,
            store,
            strategy,
            options,
            pool,
        })
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    pub fn strategy(&self) -> &Arc<dyn Disambiguator> {
        &self.strategy
    }

    /// Link `mention` to items, using `question` as context.
    pub fn link_items(
        &self,
        mention: &str,
        question: &str,
    ) -> Result<Vec<Disambiguated>, LinkingError> {
        let context = DisambiguationContext::sentence(question);
        let resolution = self.strategy.resolve(
            mention,
            self.search.as_ref(),
            EntityKind::Item,
            self.options.candidates_limit,
            &self.options.language,
            &context,
        );
        match resolution {
            Resolution::Resolved(items) => {
                tracing::info!(
                    mention,
                    items = ?items.iter().map(|i| i.entity.iri.as_str()).collect::<Vec<_>>(),
                    "linked mention"
                );
                Ok(items)
            }
            Resolution::NoCandidates | Resolution::Ambiguous => Err(LinkingError::Unresolved {
                label: mention.to_string(),
            }),
            Resolution::BackendError(source) => Err(LinkingError::Failed {
                label: mention.to_string(),
                source,
            }),
        }
    }

    /// Resolve every constraint of `pattern`.
    ///
    /// The constraint's known mention is linked (first hit wins) and its
    /// relation is either the type relation or disambiguated among the
    /// properties observed on the linked entity.
    pub fn resolve_constraints(
        &self,
        pattern: &TriplePattern,
        question: &str,
    ) -> QaResult<Constraints> {
        let mut out = Constraints::default();
        for constraint in &pattern.constraints {
            let slot = constraint.unknown_slot()?;
            let mention = constraint.main_mention()?;
            let relation = constraint.property_mention()?;

            let linked = self.link_items(mention, question)?;
            let Some(anchor) = linked.into_iter().next() else {
                return Err(LinkingError::Unresolved {
                    label: mention.to_string(),
                }
                .into());
            };

            let property = if relation == TYPE_RELATION {
                ResolvedProperty {
                    property: Disambiguated {
                        label: relation.to_string(),
                        description: None,
                        entity: EntityRef::property(self.options.type_property.clone()),
                    },
                    range: Some(Datatype::Item),
                }
            } else {
                self.disambiguate_property(relation, question, &anchor, slot)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| ResolveError::NoPropertyCandidates {
                        label: relation.to_string(),
                    })?
            };

            tracing::debug!(
                relation,
                property = %property.property.entity,
                value = %anchor.entity,
                "resolved constraint"
            );
            out.labels.push(LabelTriple {
                subject: None,
                property: Some(property.property.label.clone()),
                value: Some(anchor.label.clone()),
            });
            out.resolved.push(ResolvedConstraint {
                property: property.property.entity,
                value: anchor.entity,
            });
        }
        Ok(out)
    }

    /// Look for a property labelled exactly `mention`.
    ///
    /// Search failures are logged and reported as no match.
    pub fn fast_property(&self, mention: &str) -> Option<ResolvedProperty> {
        let language = &self.options.language;
        let hits = match self
            .search
            .property_descriptor(mention, language, FAST_PATH_LIMIT)
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(mention, error = %e, "direct property search failed");
                return None;
            }
        };
        for hit in hits {
            let (entity, descriptor) = match hit {
                Ok(hit) => hit,
                Err(e) => {
                    tracing::info!(mention, error = %e, "skipping property hit");
                    continue;
                }
            };
            if descriptor.label(language) == Some(mention) {
                tracing::info!(mention, property = %entity, "fast property path matched");
                return Some(ResolvedProperty {
                    property: Disambiguated {
                        label: mention.to_string(),
                        description: descriptor.description(language).map(str::to_string),
                        entity,
                    },
                    range: descriptor.range,
                });
            }
        }
        None
    }

    /// Candidate properties observed on `anchor`, deduplicated by id.
    ///
    /// With the object unknown the anchor is the subject, and value-less or
    /// external-id statements are excluded; with the subject unknown the
    /// anchor is the value.
    pub fn property_candidates(
        &self,
        label: &str,
        anchor: &EntityRef,
        slot: UnknownSlot,
    ) -> Result<(Vec<Candidate>, HashMap<String, Option<Datatype>>), ResolveError> {
        let filter = match slot {
            UnknownSlot::Object => Filter::default()
                .with_subject(Some(anchor.clone()))
                .with_snak_mask(SnakMask::VALUE_SNAK)
                .with_property_mask(PropertyMask::REAL)
                .with_value_mask(DatatypeMask::VALUE & !DatatypeMask::EXTERNAL_ID),
            UnknownSlot::Subject => Filter::default()
                .with_value(Some(anchor.clone()))
                .with_property_mask(PropertyMask::REAL),
        };
        let infos = self
            .store
            .filter_properties(&filter)
            .map_err(|source| ResolveError::Property {
                label: label.to_string(),
                source: DisambigError::Kb {
                    label: label.to_string(),
                    source,
                },
            })?;

        let language = &self.options.language;
        let mut ranges = HashMap::new();
        let mut candidates = Vec::new();
        for info in infos {
            let Some(property_label) = info.descriptor.label(language) else {
                continue;
            };
            let mut candidate = Candidate::new(info.property.iri.clone(), property_label);
            if let Some(description) = info.descriptor.description(language) {
                candidate = candidate.with_description(description);
            }
            ranges.insert(info.property.iri.clone(), info.descriptor.range);
            candidates.push(candidate);
        }
        let candidates = dedup_by_id(candidates);
        if candidates.is_empty() {
            return Err(ResolveError::NoPropertyCandidates {
                label: label.to_string(),
            });
        }
        Ok((candidates, ranges))
    }

    /// Choose the properties matching `label` among those observed on `anchor`.
    pub fn disambiguate_property(
        &self,
        label: &str,
        question: &str,
        anchor: &Disambiguated,
        slot: UnknownSlot,
    ) -> Result<Vec<ResolvedProperty>, ResolveError> {
        let (candidates, ranges) = self.property_candidates(label, &anchor.entity, slot)?;
        let context =
            DisambiguationContext::sentence(question).with_textual_context(anchor.description.clone());
        let picked = self
            .strategy
            .disambiguate_candidates(
                label,
                &candidates,
                EntityKind::Property,
                self.options.candidates_limit,
                &context,
            )
            .map_err(|source| ResolveError::Property {
                label: label.to_string(),
                source,
            })?;
        Ok(picked
            .into_iter()
            .map(|property| {
                let range = ranges.get(&property.entity.iri).copied().flatten();
                ResolvedProperty { property, range }
            })
            .collect())
    }

    /// Pair one property with every linked item.
    pub fn resolve_with_property(
        &self,
        slot: UnknownSlot,
        items: &[Disambiguated],
        property: &ResolvedProperty,
        constraints: &Constraints,
    ) -> Resolved {
        let mut out = Resolved::default();
        for item in items {
            out.add(slot, item, property, constraints);
        }
        out
    }

    /// Disambiguate the property separately for each linked item, in parallel.
    ///
    /// Results are appended in completion order.
    pub fn resolve_per_item(
        &self,
        pattern: &TriplePattern,
        slot: UnknownSlot,
        items: &[Disambiguated],
        question: &str,
        constraints: &Constraints,
    ) -> QaResult<Resolved> {
        let label = pattern.property_mention()?;
        let collected = Mutex::new(Resolved::default());

        self.pool.scope(|scope| {
            for item in items {
                let collected = &collected;
                scope.spawn(move |_| {
                    let result = self.disambiguate_property(label, question, item, slot);
                    let mut out = collected.lock().unwrap_or_else(PoisonError::into_inner);
                    match result {
                        Ok(properties) => {
                            for property in &properties {
                                out.add(slot, item, property, constraints);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                item = %item.entity,
                                property = label,
                                error = %e,
                                "property resolution failed for candidate"
                            );
                            out.failures.push(CandidateFailure {
                                item: item.entity.clone(),
                                message: e.to_string(),
                            });
                        }
                    }
                });
            }
        });

        Ok(collected.into_inner().unwrap_or_else(PoisonError::into_inner))
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("strategy", &self.strategy.name())
            .field("options", &self.options)
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}
