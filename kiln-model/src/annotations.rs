//! Name/value annotations attached to every metadata element.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::value::Value;

/// Well-known annotation names.
pub mod names {
    pub const PRODUCT_VERSION: &str = "ProductVersion";
    pub const MAX_LENGTH: &str = "MaxLength";
    pub const PRECISION: &str = "Precision";
    pub const SCALE: &str = "Scale";
    pub const UNICODE: &str = "Unicode";

    pub const COLUMN_NAME: &str = "Relational:ColumnName";
    pub const COLUMN_TYPE: &str = "Relational:ColumnType";
    pub const DEFAULT_VALUE: &str = "Relational:DefaultValue";
    pub const DEFAULT_VALUE_SQL: &str = "Relational:DefaultValueSql";
    pub const COMPUTED_COLUMN_SQL: &str = "Relational:ComputedColumnSql";
    pub const IS_STORED: &str = "Relational:IsStored";
    pub const IS_FIXED_LENGTH: &str = "Relational:IsFixedLength";
    pub const COMMENT: &str = "Relational:Comment";
    pub const COLLATION: &str = "Relational:Collation";
    pub const TABLE_NAME: &str = "Relational:TableName";
    pub const SCHEMA: &str = "Relational:Schema";
    pub const DEFAULT_SCHEMA: &str = "Relational:DefaultSchema";
    pub const NAME: &str = "Relational:Name";
    pub const FILTER: &str = "Relational:Filter";

    pub const VALUE_GENERATION_STRATEGY: &str = "Postgres:ValueGenerationStrategy";
    pub const IDENTITY_INCREMENT: &str = "Postgres:IdentityIncrement";
    pub const IDENTITY_SEED: &str = "Postgres:IdentitySeed";
    pub const HILO_SEQUENCE_NAME: &str = "Postgres:HiLoSequenceName";
    pub const HILO_SEQUENCE_SCHEMA: &str = "Postgres:HiLoSequenceSchema";

    // Runtime-only; never part of a persisted snapshot.
    pub const TYPE_MAPPING: &str = "TypeMapping";
    pub const VALUE_CONVERTER: &str = "ValueConverter";
    pub const VALUE_COMPARER: &str = "ValueComparer";
    pub const VALUE_GENERATOR_FACTORY: &str = "ValueGeneratorFactory";
    pub const PROPERTY_ACCESS_MODE: &str = "PropertyAccessMode";
    pub const PROVIDER_CLR_TYPE: &str = "ProviderClrType";
}

/// An ordered set of annotations.
///
/// Entries are kept sorted by name so iteration order never depends on the
/// order in which a model was configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Annotations(IndexMap<SmolStr, Value>);

impl Annotations {
    /// Create an empty annotation set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an annotation, replacing any previous value.
    pub fn set(&mut self, name: impl Into<SmolStr>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
        self.0.sort_keys();
    }

    /// Get an annotation value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Get a text annotation.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Remove an annotation.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.shift_remove(name)
    }

    /// Check whether an annotation is present.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Iterate annotations in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&SmolStr, &Value)> {
        self.0.iter()
    }

    /// Number of annotations.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if there are no annotations.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the annotations for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &Value) -> bool) {
        self.0.retain(|k, v| keep(k, v));
    }

    /// Annotations that are carried onto relational objects as-is.
    ///
    /// These are the provider-prefixed ones; `Relational:` annotations are
    /// consumed into first-class column and table facets.
    pub fn provider_specific(&self) -> Annotations {
        let mut out = Annotations::new();
        for (name, value) in self.iter() {
            if name.contains(':') && !name.starts_with("Relational:") {
                out.0.insert(name.clone(), value.clone());
            }
        }
        out
    }
}

impl<'a> IntoIterator for &'a Annotations {
    type Item = (&'a SmolStr, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, SmolStr, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<K: Into<SmolStr>, V: Into<Value>> FromIterator<(K, V)> for Annotations {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut out = Annotations::new();
        for (k, v) in iter {
            out.0.insert(k.into(), v.into());
        }
        out.0.sort_keys();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_is_name_ordered() {
        let mut a = Annotations::new();
        a.set("Zeta", 1);
        a.set("Alpha", 2);
        a.set("Mid", 3);
        let keys: Vec<&str> = a.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["Alpha", "Mid", "Zeta"]);
    }

    #[test]
    fn test_provider_specific_filters_relational() {
        let a: Annotations = [
            (names::COLUMN_TYPE, Value::from("text")),
            (names::IDENTITY_SEED, Value::from(10)),
            (names::MAX_LENGTH, Value::from(20)),
        ]
        .into_iter()
        .collect();

        let carried = a.provider_specific();
        assert_eq!(carried.len(), 1);
        assert!(carried.contains(names::IDENTITY_SEED));
    }

    #[test]
    fn test_set_replaces() {
        let mut a = Annotations::new();
        a.set(names::COMMENT, "first");
        a.set(names::COMMENT, "second");
        assert_eq!(a.len(), 1);
        assert_eq!(a.get_str(names::COMMENT), Some("second"));
    }
}
