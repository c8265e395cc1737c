//! Compile resolved triples into knowledge-base filters.

use serde::{Deserialize, Serialize};

use crate::candidate::EntityRef;
use crate::kb::{Datatype, DatatypeMask, Filter, Fingerprint, PropertyMask, SnakMask};

/// A constraint on the unknown slot: it must have `property` with `value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedConstraint {
    pub property: EntityRef,
    pub value: EntityRef,
}

/// A triple whose mentions have been resolved to entities. The unknown
/// slot is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedTriple {
    pub subject: Option<EntityRef>,
    pub property: Option<EntityRef>,
    /// Declared range of `property`, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_range: Option<Datatype>,
    pub value: Option<EntityRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<ResolvedConstraint>,
}

/// Display labels of a resolved triple, for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelTriple {
    pub subject: Option<String>,
    pub property: Option<String>,
    pub value: Option<String>,
}

impl std::fmt::Display for LabelTriple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |s: &Option<String>| s.clone().unwrap_or_else(|| "?x".into());
        write!(
            f,
            "({}, {}, {})",
            show(&self.subject),
            show(&self.property),
            show(&self.value)
        )
    }
}

/// Build the filter for `triple`, or `None` when it cannot be queried.
///
/// The first constraint fills the empty subject or value slot with a snak
/// fingerprint. At least two of subject, property and value must then be
/// known. Properties with a declared non-item range yield no filter since
/// values are restricted to items.
pub fn compile_filter(triple: &ResolvedTriple) -> Option<Filter> {
    if triple
        .property_range
        .is_some_and(|range| range != Datatype::Item)
    {
        tracing::debug!(property = ?triple.property, range = ?triple.property_range, "literal-ranged property, no filter");
        return None;
    }

    let constraint = triple.constraints.first().map(|c| Fingerprint::Snak {
        property: c.property.clone(),
        value: c.value.clone(),
    });

    let mut subject = Fingerprint::from(triple.subject.clone());
    let mut value = Fingerprint::from(triple.value.clone());
    if let Some(snak) = constraint {
        if subject.is_any() {
            subject = snak;
        } else if value.is_any() {
            value = snak;
        }
    }
    let property = Fingerprint::from(triple.property.clone());

    let known = [&subject, &property, &value]
        .iter()
        .filter(|fp| !fp.is_any())
        .count();
    if known < 2 {
        return None;
    }

    Some(
        Filter::default()
            .with_subject(subject)
            .with_property(property)
            .with_value(value)
            .with_snak_mask(SnakMask::VALUE_SNAK)
            .with_subject_mask(DatatypeMask::ITEM)
            .with_value_mask(DatatypeMask::ITEM)
            .with_property_mask(PropertyMask::REAL),
    )
}
