//! Knowledge-base collaborators: search, statement store, and filters.
//!
//! The pipeline only talks to a knowledge base through the [`Search`] and
//! [`Store`] traits. [`memory::MemoryKb`] implements both in memory and
//! [`retrying::Retrying`] wraps any implementation with a retry policy.

pub mod filter;
pub mod memory;
pub mod retrying;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::candidate::{Candidate, EntityRef};
use crate::error::KbResult;

pub use filter::{DatatypeMask, Filter, Fingerprint, PropertyMask, SnakMask};

/// Declared datatype of a property's values, or of a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datatype {
    Item,
    Property,
    Iri,
    Text,
    String,
    ExternalId,
    Quantity,
    Time,
}

impl Datatype {
    /// The single-bit mask matching values of this datatype.
    pub fn mask(self) -> DatatypeMask {
        match self {
            Self::Item => DatatypeMask::ITEM,
            Self::Property => DatatypeMask::PROPERTY,
            Self::Iri => DatatypeMask::IRI,
            Self::Text => DatatypeMask::TEXT,
            Self::String => DatatypeMask::STRING,
            Self::ExternalId => DatatypeMask::EXTERNAL_ID,
            Self::Quantity => DatatypeMask::QUANTITY,
            Self::Time => DatatypeMask::TIME,
        }
    }
}

/// Labels, descriptions and aliases of an entity, keyed by language code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub descriptions: HashMap<String, String>,
    #[serde(default)]
    pub aliases: HashMap<String, Vec<String>>,
    /// Declared value range, for properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Datatype>,
}

impl Descriptor {
    pub fn label(&self, language: &str) -> Option<&str> {
        self.labels.get(language).map(String::as_str)
    }

    pub fn description(&self, language: &str) -> Option<&str> {
        self.descriptions.get(language).map(String::as_str)
    }

    pub fn aliases(&self, language: &str) -> &[String] {
        self.aliases.get(language).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Convert to a candidate record in `language`; missing text becomes empty.
    pub fn to_candidate(&self, entity: &EntityRef, language: &str) -> Candidate {
        let mut candidate = Candidate::new(entity.iri.clone(), self.label(language).unwrap_or(""))
            .with_description(self.description(language).unwrap_or(""));
        candidate.aliases = self.aliases(language).to_vec();
        candidate
    }
}

/// A statement value: an entity or a literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Entity(EntityRef),
    Literal { datatype: Datatype, content: String },
}

impl Value {
    pub fn datatype(&self) -> Datatype {
        match self {
            Self::Entity(e) if e.is_item() => Datatype::Item,
            Self::Entity(_) => Datatype::Property,
            Self::Literal { datatype, .. } => *datatype,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Self::Entity(e) => Some(e),
            Self::Literal { .. } => None,
        }
    }
}

/// A subject–property–value statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Statement {
    pub subject: EntityRef,
    pub property: EntityRef,
    pub value: Value,
}

/// A property observed in statements, with its descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyInfo {
    pub property: EntityRef,
    pub descriptor: Descriptor,
}

/// A lazily produced sequence of search hits; individual hits may fail.
pub type DescriptorStream<'a> = Box<dyn Iterator<Item = KbResult<(EntityRef, Descriptor)>> + 'a>;

/// A lazily produced sequence of statements; reading may fail part-way.
pub type StatementStream<'a> = Box<dyn Iterator<Item = KbResult<Statement>> + 'a>;

/// Text search over entity labels.
pub trait Search: Send + Sync {
    /// Items whose labels match `query` in `language`, at most `limit`.
    fn item_descriptor(
        &self,
        query: &str,
        language: &str,
        limit: usize,
    ) -> KbResult<DescriptorStream<'_>>;

    /// Properties whose labels match `query` in `language`, at most `limit`.
    fn property_descriptor(
        &self,
        query: &str,
        language: &str,
        limit: usize,
    ) -> KbResult<DescriptorStream<'_>>;
}

/// Statement store evaluated through [`Filter`]s.
///
/// Opening a stream may fail as a whole; once open, statements are pulled
/// one at a time and nothing is buffered on the caller's side.
pub trait Store: Send + Sync {
    /// Statements matching `filter`.
    fn filter(&self, filter: &Filter) -> KbResult<StatementStream<'_>>;

    /// Distinct properties of the statements matching `filter`, in first-seen order.
    fn filter_properties(&self, filter: &Filter) -> KbResult<Vec<PropertyInfo>>;

    /// Number of statements matching `filter`.
    fn count(&self, filter: &Filter) -> KbResult<usize> {
        self.filter(filter)?
            .try_fold(0, |n, statement| statement.map(|_| n + 1))
    }

    /// Subjects of the statements matching `filter`.
    fn subjects(
        &self,
        filter: &Filter,
    ) -> KbResult<Box<dyn Iterator<Item = KbResult<EntityRef>> + '_>> {
        Ok(Box::new(self.filter(filter)?.map(|s| s.map(|s| s.subject))))
    }

    /// Values of the statements matching `filter`.
    fn values(&self, filter: &Filter) -> KbResult<Box<dyn Iterator<Item = KbResult<Value>> + '_>> {
        Ok(Box::new(self.filter(filter)?.map(|s| s.map(|s| s.value))))
    }
}

impl<T: Search + ?Sized> Search for &T {
    fn item_descriptor(&self, q: &str, lang: &str, limit: usize) -> KbResult<DescriptorStream<'_>> {
        (**self).item_descriptor(q, lang, limit)
    }

    fn property_descriptor(
        &self,
        q: &str,
        lang: &str,
        limit: usize,
    ) -> KbResult<DescriptorStream<'_>> {
        (**self).property_descriptor(q, lang, limit)
    }
}

impl<T: Search + ?Sized> Search for Arc<T> {
    fn item_descriptor(&self, q: &str, lang: &str, limit: usize) -> KbResult<DescriptorStream<'_>> {
        (**self).item_descriptor(q, lang, limit)
    }

    fn property_descriptor(
        &self,
        q: &str,
        lang: &str,
        limit: usize,
    ) -> KbResult<DescriptorStream<'_>> {
        (**self).property_descriptor(q, lang, limit)
    }
}

impl<T: Store + ?Sized> Store for &T {
    fn filter(&self, filter: &Filter) -> KbResult<StatementStream<'_>> {
        (**self).filter(filter)
    }

    fn filter_properties(&self, filter: &Filter) -> KbResult<Vec<PropertyInfo>> {
        (**self).filter_properties(filter)
    }

    fn count(&self, filter: &Filter) -> KbResult<usize> {
        (**self).count(filter)
    }
}

impl<T: Store + ?Sized> Store for Arc<T> {
    fn filter(&self, filter: &Filter) -> KbResult<StatementStream<'_>> {
        (**self).filter(filter)
    }

    fn filter_properties(&self, filter: &Filter) -> KbResult<Vec<PropertyInfo>> {
        (**self).filter_properties(filter)
    }

    fn count(&self, filter: &Filter) -> KbResult<usize> {
        (**self).count(filter)
    }
}
