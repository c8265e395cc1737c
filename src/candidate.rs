//! Candidate records and typed entity references.
//!
//! A [`Candidate`] is what a knowledge-base search hands to a disambiguation
//! strategy; a [`Disambiguated`] is what the strategy hands back.

use serde::{Deserialize, Serialize};

/// The kind of knowledge-base entity a mention is being resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A thing: person, place, work, concept.
    Item,
    /// A relation between things.
    Property,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Item => write!(f, "item"),
            Self::Property => write!(f, "property"),
        }
    }
}

/// A typed reference to a knowledge-base entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub iri: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, iri: impl Into<String>) -> Self {
        Self {
            kind,
            iri: iri.into(),
        }
    }

    pub fn item(iri: impl Into<String>) -> Self {
        Self::new(EntityKind::Item, iri)
    }

    pub fn property(iri: impl Into<String>) -> Self {
        Self::new(EntityKind::Property, iri)
    }

    pub fn is_item(&self) -> bool {
        self.kind == EntityKind::Item
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind, self.iri)
    }
}

/// A knowledge-base entity found by text search, not yet confirmed as the
/// referent of a mention.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Candidate {
    pub iri: String,
    pub label: String,
    /// Identifier shown to LLM judges; falls back to the IRI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

impl Candidate {
    /// Candidate whose identifier is its IRI, as produced by searches.
    pub fn new(iri: impl Into<String>, label: impl Into<String>) -> Self {
        let iri = iri.into();
        Self {
            id: Some(iri.clone()),
            iri,
            label: label.into(),
            description: None,
            aliases: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.description = (!description.is_empty()).then_some(description);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Text used for embedding-based ranking: `label + " " + description`.
    pub fn embedding_text(&self) -> String {
        format!(
            "{} {}",
            self.label,
            self.description.as_deref().unwrap_or_default()
        )
    }

    /// Identifier used for deduplication.
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.iri)
    }
}

/// A raw strategy pick: label, description and IRI of one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub label: String,
    pub description: Option<String>,
    pub iri: String,
}

impl From<&Candidate> for Selection {
    fn from(c: &Candidate) -> Self {
        Self {
            label: c.label.clone(),
            description: c.description.clone(),
            iri: c.iri.clone(),
        }
    }
}

/// A resolved candidate identity plus display text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Disambiguated {
    pub label: String,
    pub description: Option<String>,
    pub entity: EntityRef,
}

impl Disambiguated {
    pub fn from_selection(selection: Selection, kind: EntityKind) -> Self {
        Self {
            label: selection.label,
            description: selection.description,
            entity: EntityRef::new(kind, selection.iri),
        }
    }
}

/// Deduplicate candidates by identifier.
///
/// Each identifier is placed at the position of its last occurrence and
/// keeps the record of its first occurrence; relative order is otherwise
/// preserved.
pub fn dedup_by_id(candidates: Vec<Candidate>) -> Vec<Candidate> {
    use std::collections::HashMap;

    let mut last_index: HashMap<String, usize> = HashMap::new();
    for (i, c) in candidates.iter().enumerate() {
        last_index.insert(c.key().to_string(), i);
    }

    let mut first: HashMap<String, Candidate> = HashMap::new();
    let mut slots: Vec<(usize, String)> = Vec::new();
    for c in candidates {
        let key = c.key().to_string();
        if !first.contains_key(&key) {
            slots.push((last_index[&key], key.clone()));
            first.insert(key, c);
        }
    }
    slots.sort_by_key(|(pos, _)| *pos);
    slots
        .into_iter()
        .filter_map(|(_, key)| first.remove(&key))
        .collect()
}
