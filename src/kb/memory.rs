//! In-memory knowledge base implementing both [`Search`] and [`Store`].
//!
//! Loadable from a JSON document:
//!
//! ```json
//! {
//!   "entities": [
//!     {"iri": "http://www.wikidata.org/entity/Q15869", "kind": "item",
//!      "labels": {"en": "Freddie Mercury"}, "descriptions": {"en": "British singer"}},
//!     {"iri": "http://www.wikidata.org/entity/P19", "kind": "property",
//!      "labels": {"en": "place of birth"}, "range": "item"}
//!   ],
//!   "statements": [
//!     {"subject": "http://www.wikidata.org/entity/Q15869",
//!      "property": "http://www.wikidata.org/entity/P19",
//!      "value": "http://www.wikidata.org/entity/Q3787"}
//!   ]
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::candidate::{EntityKind, EntityRef};
use crate::error::{KbError, KbResult};

use super::{
    Datatype, Descriptor, DescriptorStream, Filter, PropertyInfo, Search, Statement,
    StatementStream, Store, Value,
};

/// Serialized form of one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub iri: String,
    pub kind: EntityKind,
    #[serde(flatten)]
    pub descriptor: Descriptor,
}

/// Serialized form of a literal value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiteralRecord {
    pub datatype: Datatype,
    pub content: String,
}

/// Serialized form of one statement: `value` names an entity, `literal` a literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementRecord {
    pub subject: String,
    pub property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<LiteralRecord>,
}

/// Serialized form of a whole knowledge base.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KbDocument {
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
    #[serde(default)]
    pub statements: Vec<StatementRecord>,
}

/// An in-memory knowledge base.
#[derive(Debug, Clone, Default)]
pub struct MemoryKb {
    entities: HashMap<String, (EntityKind, Descriptor)>,
    /// Insertion order of entity IRIs, for deterministic search results.
    order: Vec<String>,
    statements: Vec<Statement>,
}

impl MemoryKb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> KbResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| KbError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&content).map_err(|e| match e {
            KbError::Parse { message, .. } => KbError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> KbResult<Self> {
        let doc: KbDocument = serde_json::from_str(json).map_err(|e| KbError::Parse {
            path: "<string>".into(),
            message: e.to_string(),
        })?;
        Self::from_document(doc)
    }

    /// Build from a parsed document, checking every statement reference.
    pub fn from_document(doc: KbDocument) -> KbResult<Self> {
        let mut kb = Self::new();
        for record in doc.entities {
            kb.insert_entity(EntityRef::new(record.kind, record.iri), record.descriptor);
        }
        for record in doc.statements {
            let subject = kb.entity_ref(&record.subject)?;
            let property = kb.entity_ref(&record.property)?;
            let value = match (record.value, record.literal) {
                (Some(iri), _) => Value::Entity(kb.entity_ref(&iri)?),
                (None, Some(lit)) => Value::Literal {
                    datatype: lit.datatype,
                    content: lit.content,
                },
                (None, None) => {
                    return Err(KbError::Parse {
                        path: "<string>".into(),
                        message: format!(
                            "statement ({}, {}) has neither `value` nor `literal`",
                            record.subject, record.property
                        ),
                    });
                }
            };
            kb.statements.push(Statement {
                subject,
                property,
                value,
            });
        }
        tracing::debug!(
            entities = kb.order.len(),
            statements = kb.statements.len(),
            "loaded in-memory knowledge base"
        );
        Ok(kb)
    }

    fn entity_ref(&self, iri: &str) -> KbResult<EntityRef> {
        self.entities
            .get(iri)
            .map(|(kind, _)| EntityRef::new(*kind, iri))
            .ok_or_else(|| KbError::DanglingReference { iri: iri.into() })
    }

    /// Insert or replace an entity.
    pub fn insert_entity(&mut self, entity: EntityRef, descriptor: Descriptor) {
        if !self.entities.contains_key(&entity.iri) {
            self.order.push(entity.iri.clone());
        }
        self.entities.insert(entity.iri, (entity.kind, descriptor));
    }

    /// Add an item with an English label and description.
    pub fn add_item(&mut self, iri: &str, label: &str, description: &str) -> EntityRef {
        let entity = EntityRef::item(iri);
        self.insert_entity(entity.clone(), english(label, description, None));
        entity
    }

    /// Add a property with an English label, description and declared range.
    pub fn add_property(
        &mut self,
        iri: &str,
        label: &str,
        description: &str,
        range: Option<Datatype>,
    ) -> EntityRef {
        let entity = EntityRef::property(iri);
        self.insert_entity(entity.clone(), english(label, description, range));
        entity
    }

    /// Add an English alias to an existing entity.
    pub fn add_alias(&mut self, iri: &str, alias: &str) {
        if let Some((_, descriptor)) = self.entities.get_mut(iri) {
            descriptor
                .aliases
                .entry("en".into())
                .or_default()
                .push(alias.into());
        }
    }

    pub fn add_statement(&mut self, subject: &EntityRef, property: &EntityRef, value: Value) {
        self.statements.push(Statement {
            subject: subject.clone(),
            property: property.clone(),
            value,
        });
    }

    pub fn descriptor(&self, iri: &str) -> Option<&Descriptor> {
        self.entities.get(iri).map(|(_, d)| d)
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    fn has_snak(&self, entity: &EntityRef, property: &EntityRef, value: &EntityRef) -> bool {
        self.statements.iter().any(|s| {
            &s.subject == entity && &s.property == property && s.value.as_entity() == Some(value)
        })
    }

    fn search(
        &self,
        kind: EntityKind,
        query: &str,
        language: &str,
        limit: usize,
    ) -> Vec<(EntityRef, Descriptor)> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let mut exact = Vec::new();
        let mut partial = Vec::new();
        for iri in &self.order {
            let Some((k, descriptor)) = self.entities.get(iri) else {
                continue;
            };
            if *k != kind {
                continue;
            }
            let names = descriptor
                .label(language)
                .into_iter()
                .chain(descriptor.aliases(language).iter().map(String::as_str))
                .map(str::to_lowercase)
                .collect::<Vec<_>>();
            let hit = (EntityRef::new(kind, iri.clone()), descriptor.clone());
            if names.iter().any(|n| *n == needle) {
                exact.push(hit);
            } else if names.iter().any(|n| n.contains(&needle)) {
                partial.push(hit);
            }
        }
        exact.extend(partial);
        exact.truncate(limit);
        exact
    }
}

fn english(label: &str, description: &str, range: Option<Datatype>) -> Descriptor {
    let mut descriptor = Descriptor {
        range,
        ..Default::default()
    };
    descriptor.labels.insert("en".into(), label.into());
    if !description.is_empty() {
        descriptor
            .descriptions
            .insert("en".into(), description.into());
    }
    descriptor
}

impl Search for MemoryKb {
    fn item_descriptor(
        &self,
        query: &str,
        language: &str,
        limit: usize,
    ) -> KbResult<DescriptorStream<'_>> {
        let hits = self.search(EntityKind::Item, query, language, limit);
        Ok(Box::new(hits.into_iter().map(Ok)))
    }

    fn property_descriptor(
        &self,
        query: &str,
        language: &str,
        limit: usize,
    ) -> KbResult<DescriptorStream<'_>> {
        let hits = self.search(EntityKind::Property, query, language, limit);
        Ok(Box::new(hits.into_iter().map(Ok)))
    }
}

impl Store for MemoryKb {
    fn filter(&self, filter: &Filter) -> KbResult<StatementStream<'_>> {
        let filter = filter.clone();
        let has_snak = move |e: &EntityRef, p: &EntityRef, v: &EntityRef| self.has_snak(e, p, v);
        Ok(Box::new(
            self.statements
                .iter()
                .filter(move |s| filter.matches(s, &has_snak))
                .cloned()
                .map(Ok),
        ))
    }

    fn filter_properties(&self, filter: &Filter) -> KbResult<Vec<PropertyInfo>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for stmt in self.filter(filter)? {
            let stmt = stmt?;
            if seen.insert(stmt.property.iri.clone()) {
                let descriptor = self
                    .descriptor(&stmt.property.iri)
                    .cloned()
                    .unwrap_or_default();
                out.push(PropertyInfo {
                    property: stmt.property,
                    descriptor,
                });
            }
        }
        Ok(out)
    }
}
