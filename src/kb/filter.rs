//! Statement filters: one fingerprint per slot plus type masks.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::candidate::EntityRef;

use super::Statement;

bitflags! {
    /// Which kinds of snak a filter admits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SnakMask: u8 {
        const VALUE_SNAK = 0b001;
        const SOME_VALUE_SNAK = 0b010;
        const NO_VALUE_SNAK = 0b100;
    }
}

bitflags! {
    /// Which datatypes a subject or value slot admits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DatatypeMask: u16 {
        const ITEM = 1 << 0;
        const PROPERTY = 1 << 1;
        const IRI = 1 << 2;
        const TEXT = 1 << 3;
        const STRING = 1 << 4;
        const EXTERNAL_ID = 1 << 5;
        const QUANTITY = 1 << 6;
        const TIME = 1 << 7;

        const ENTITY = Self::ITEM.bits() | Self::PROPERTY.bits();
        const VALUE = Self::ENTITY.bits()
            | Self::IRI.bits()
            | Self::TEXT.bits()
            | Self::STRING.bits()
            | Self::EXTERNAL_ID.bits()
            | Self::QUANTITY.bits()
            | Self::TIME.bits();
    }
}

bitflags! {
    /// Which properties a filter admits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PropertyMask: u8 {
        /// Properties stored as such in the knowledge base.
        const REAL = 0b01;
        /// Derived inverse properties.
        const INVERSE = 0b10;
    }
}

/// Pattern used in place of a concrete value inside a filter slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fingerprint {
    /// Any value.
    Any,
    /// Exactly this entity.
    Entity(EntityRef),
    /// Any entity that has `property` with value `value`.
    Snak { property: EntityRef, value: EntityRef },
}

impl Fingerprint {
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl From<Option<EntityRef>> for Fingerprint {
    fn from(entity: Option<EntityRef>) -> Self {
        entity.map_or(Self::Any, Self::Entity)
    }
}

/// A query over knowledge-base statements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    pub subject: Fingerprint,
    pub property: Fingerprint,
    pub value: Fingerprint,
    pub snak_mask: SnakMask,
    pub subject_mask: DatatypeMask,
    pub value_mask: DatatypeMask,
    pub property_mask: PropertyMask,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            subject: Fingerprint::Any,
            property: Fingerprint::Any,
            value: Fingerprint::Any,
            snak_mask: SnakMask::all(),
            subject_mask: DatatypeMask::ENTITY,
            value_mask: DatatypeMask::VALUE,
            property_mask: PropertyMask::all(),
        }
    }
}

impl Filter {
    pub fn with_subject(mut self, subject: impl Into<Fingerprint>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_property(mut self, property: impl Into<Fingerprint>) -> Self {
        self.property = property.into();
        self
    }

    pub fn with_value(mut self, value: impl Into<Fingerprint>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_snak_mask(mut self, mask: SnakMask) -> Self {
        self.snak_mask = mask;
        self
    }

    pub fn with_subject_mask(mut self, mask: DatatypeMask) -> Self {
        self.subject_mask = mask;
        self
    }

    pub fn with_value_mask(mut self, mask: DatatypeMask) -> Self {
        self.value_mask = mask;
        self
    }

    pub fn with_property_mask(mut self, mask: PropertyMask) -> Self {
        self.property_mask = mask;
        self
    }

    /// Whether `stmt` satisfies this filter.
    ///
    /// `has_snak(entity, property, value)` answers snak fingerprints and is
    /// supplied by the store, which owns the statements.
    pub fn matches(
        &self,
        stmt: &Statement,
        has_snak: &dyn Fn(&EntityRef, &EntityRef, &EntityRef) -> bool,
    ) -> bool {
        if !self.snak_mask.contains(SnakMask::VALUE_SNAK) {
            return false;
        }
        if !self.property_mask.contains(PropertyMask::REAL) {
            return false;
        }
        let subject_type = if stmt.subject.is_item() {
            DatatypeMask::ITEM
        } else {
            DatatypeMask::PROPERTY
        };
        if !self.subject_mask.intersects(subject_type) {
            return false;
        }
        if !self.value_mask.intersects(stmt.value.datatype().mask()) {
            return false;
        }

        let slot = |fp: &Fingerprint, entity: Option<&EntityRef>| match fp {
            Fingerprint::Any => true,
            Fingerprint::Entity(want) => entity == Some(want),
            Fingerprint::Snak { property, value } => {
                entity.is_some_and(|e| has_snak(e, property, value))
            }
        };

        slot(&self.subject, Some(&stmt.subject))
            && slot(&self.property, Some(&stmt.property))
            && slot(&self.value, stmt.value.as_entity())
    }
}
