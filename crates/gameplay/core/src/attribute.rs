//! Attribute identifiers and the numeric backing store an aggregator syncs into.

use std::collections::BTreeMap;
use std::fmt;

/// Name of a numeric gameplay attribute, e.g. `Health`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct AttributeId(String);

impl AttributeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AttributeId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for AttributeId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Raw base/current pair backing one attribute.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttributeData {
    pub base: f32,
    pub current: f32,
}

impl AttributeData {
    /// Fresh attribute whose current value equals its base.
    pub fn new(base: f32) -> Self {
        Self {
            base,
            current: base,
        }
    }
}

/// Read/write access to the raw numeric fields of a set of attributes.
///
/// Aggregators never own these values; the owning component syncs the
/// evaluated result back through this trait after every dirty broadcast.
pub trait AttributeSet {
    fn has_attribute(&self, attribute: &AttributeId) -> bool;

    fn base_value(&self, attribute: &AttributeId) -> Option<f32>;

    fn current_value(&self, attribute: &AttributeId) -> Option<f32>;

    /// Returns false if the attribute is not part of the set.
    fn set_base_value(&mut self, attribute: &AttributeId, value: f32) -> bool;

    /// Returns false if the attribute is not part of the set.
    fn set_current_value(&mut self, attribute: &AttributeId, value: f32) -> bool;
}

/// Ordered-map implementation of [`AttributeSet`].
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct AttributeTable {
    values: BTreeMap<AttributeId, AttributeData>,
}

impl AttributeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or resets) an attribute with `current == base`.
    pub fn define(&mut self, attribute: impl Into<AttributeId>, base: f32) {
        self.values.insert(attribute.into(), AttributeData::new(base));
    }

    /// Builder form of [`AttributeTable::define`].
    pub fn with(mut self, attribute: impl Into<AttributeId>, base: f32) -> Self {
        self.define(attribute, base);
        self
    }

    pub fn get(&self, attribute: &AttributeId) -> Option<&AttributeData> {
        self.values.get(attribute)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AttributeId, &AttributeData)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl AttributeSet for AttributeTable {
    fn has_attribute(&self, attribute: &AttributeId) -> bool {
        self.values.contains_key(attribute)
    }

    fn base_value(&self, attribute: &AttributeId) -> Option<f32> {
        self.values.get(attribute).map(|data| data.base)
    }

    fn current_value(&self, attribute: &AttributeId) -> Option<f32> {
        self.values.get(attribute).map(|data| data.current)
    }

    fn set_base_value(&mut self, attribute: &AttributeId, value: f32) -> bool {
        match self.values.get_mut(attribute) {
            Some(data) => {
                data.base = value;
                true
            }
            None => false,
        }
    }

    fn set_current_value(&mut self, attribute: &AttributeId, value: f32) -> bool {
        match self.values.get_mut(attribute) {
            Some(data) => {
                data.current = value;
                true
            }
            None => false,
        }
    }
}

impl<A: Into<AttributeId>> FromIterator<(A, f32)> for AttributeTable {
    fn from_iter<I: IntoIterator<Item = (A, f32)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (attribute, base) in iter {
            table.define(attribute, base);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_starts_current_at_base() {
        let table = AttributeTable::new().with("Health", 100.0);
        let health = AttributeId::new("Health");
        assert_eq!(table.base_value(&health), Some(100.0));
        assert_eq!(table.current_value(&health), Some(100.0));
    }

    #[test]
    fn writes_to_unknown_attributes_are_rejected() {
        let mut table = AttributeTable::new();
        let mana = AttributeId::new("Mana");
        assert!(!table.set_current_value(&mana, 5.0));
        assert!(!table.has_attribute(&mana));
        assert_eq!(table.current_value(&mana), None);
    }
}
