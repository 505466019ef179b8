//! The entity metadata graph.
//!
//! A [`Model`] is what the application declares: entity types with their
//! properties, keys, indexes, relationships, ownership and seed data. It is
//! read-only once built; [`crate::ModelBuilder`] is the only writer.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::annotations::{Annotations, names};
use crate::value::{ClrType, ReferentialAction, Value};

/// One seed row: property name to value.
pub type SeedRow = IndexMap<SmolStr, Value>;

/// A complete entity model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Model-level annotations (product version, default schema, ...).
    pub annotations: Annotations,
    /// Entity types in declaration order.
    pub entity_types: Vec<EntityType>,
    /// Database sequences.
    pub sequences: Vec<Sequence>,
}

impl Model {
    /// Create an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entity type by name.
    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.entity_types.iter().find(|e| e.name == name)
    }

    /// Look up an entity type by name, mutably.
    pub fn entity_mut(&mut self, name: &str) -> Option<&mut EntityType> {
        self.entity_types.iter_mut().find(|e| e.name == name)
    }

    /// The version of the library that produced this model, if recorded.
    pub fn product_version(&self) -> Option<&str> {
        self.annotations.get_str(names::PRODUCT_VERSION)
    }

    /// The default schema, if configured.
    pub fn default_schema(&self) -> Option<&str> {
        self.annotations.get_str(names::DEFAULT_SCHEMA)
    }

    /// The root of an entity type's inheritance hierarchy.
    pub fn root_of<'a>(&'a self, entity: &'a EntityType) -> &'a EntityType {
        let mut current = entity;
        // Bounded by the number of types so a malformed cycle cannot hang.
        for _ in 0..self.entity_types.len() {
            match current.base_type.as_deref().and_then(|b| self.entity(b)) {
                Some(base) => current = base,
                None => break,
            }
        }
        current
    }

    /// Types that directly derive from `name`.
    pub fn derived_types<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a EntityType> {
        self.entity_types
            .iter()
            .filter(move |e| e.base_type.as_deref() == Some(name))
    }

    /// Entity types ordered by hierarchy depth, then by name.
    ///
    /// Root types come first, followed by the types that derive from them,
    /// level by level.
    pub fn entity_types_in_hierarchical_order(&self) -> Vec<&EntityType> {
        let mut ordered: Vec<&EntityType> = Vec::with_capacity(self.entity_types.len());
        let mut level: Vec<&EntityType> = self
            .entity_types
            .iter()
            .filter(|e| e.base_type.as_deref().is_none_or(|b| self.entity(b).is_none()))
            .collect();

        while !level.is_empty() {
            level.sort_by(|a, b| a.name.cmp(&b.name));
            let next: Vec<&EntityType> = level
                .iter()
                .flat_map(|e| self.derived_types(&e.name))
                .filter(|e| !ordered.iter().any(|o| o.name == e.name))
                .collect();
            ordered.extend(level.iter().copied());
            level = next
                .into_iter()
                .filter(|e| !ordered.iter().any(|o| o.name == e.name))
                .collect();
        }
        ordered
    }

    /// Owned entity types whose owner is `owner`.
    pub fn owned_types_of<'a>(&'a self, owner: &'a str) -> impl Iterator<Item = &'a EntityType> {
        self.entity_types
            .iter()
            .filter(move |e| e.ownership.as_ref().is_some_and(|o| o.owner == owner))
    }
}

/// An entity type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    /// Unique name. Owned types are named `Owner.Navigation#Type`.
    pub name: SmolStr,
    /// Base type for inheritance.
    pub base_type: Option<SmolStr>,
    /// Declared properties, in declaration order.
    pub properties: Vec<Property>,
    /// Primary key.
    pub primary_key: Option<Key>,
    /// Alternate (unique) keys.
    pub alternate_keys: Vec<Key>,
    /// Indexes.
    pub indexes: Vec<Index>,
    /// Foreign keys where this type is the dependent.
    pub foreign_keys: Vec<ForeignKey>,
    /// Navigations declared on this type.
    pub navigations: Vec<Navigation>,
    /// Set when this type is owned by another type.
    pub ownership: Option<Ownership>,
    /// Check constraints.
    pub check_constraints: Vec<CheckConstraint>,
    /// Seed rows.
    pub seed_data: Vec<SeedRow>,
    /// Annotations.
    pub annotations: Annotations,
}

impl EntityType {
    /// Create an entity type with the given name.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The type name without any owner prefix.
    pub fn short_name(&self) -> &str {
        match self.name.rsplit_once('#') {
            Some((_, short)) => short,
            None => &self.name,
        }
    }

    /// Look up a property by name.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Look up a property by name, mutably.
    pub fn property_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties.iter_mut().find(|p| p.name == name)
    }

    /// Look up a navigation by name.
    pub fn navigation(&self, name: &str) -> Option<&Navigation> {
        self.navigations.iter().find(|n| n.name == name)
    }

    /// Whether this type is owned.
    pub fn is_owned(&self) -> bool {
        self.ownership.is_some()
    }

    /// Explicitly configured table name.
    pub fn table_name(&self) -> Option<&str> {
        self.annotations.get_str(names::TABLE_NAME)
    }

    /// Explicitly configured schema.
    pub fn schema(&self) -> Option<&str> {
        self.annotations.get_str(names::SCHEMA)
    }
}

/// How a property's value is generated by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ValueGenerated {
    #[default]
    Never,
    OnAdd,
    OnAddOrUpdate,
}

/// A scalar property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: SmolStr,
    pub clr_type: ClrType,
    pub nullable: bool,
    #[serde(default)]
    pub value_generated: ValueGenerated,
    #[serde(default)]
    pub concurrency_token: bool,
    #[serde(default)]
    pub annotations: Annotations,
}

impl Property {
    /// Create a property.
    pub fn new(name: impl Into<SmolStr>, clr_type: ClrType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            clr_type,
            nullable,
            value_generated: ValueGenerated::Never,
            concurrency_token: false,
            annotations: Annotations::new(),
        }
    }

    /// Column name: configured or the property name.
    pub fn column_name(&self) -> &str {
        self.annotations
            .get_str(names::COLUMN_NAME)
            .unwrap_or(&self.name)
    }

    /// Explicit store type, if configured.
    pub fn column_type(&self) -> Option<&str> {
        self.annotations.get_str(names::COLUMN_TYPE)
    }

    /// Configured maximum length.
    pub fn max_length(&self) -> Option<i32> {
        self.int_annotation(names::MAX_LENGTH)
    }

    /// Configured precision.
    pub fn precision(&self) -> Option<i32> {
        self.int_annotation(names::PRECISION)
    }

    /// Configured scale.
    pub fn scale(&self) -> Option<i32> {
        self.int_annotation(names::SCALE)
    }

    /// Whether this property is a row version.
    pub fn is_row_version(&self) -> bool {
        self.concurrency_token && self.value_generated == ValueGenerated::OnAddOrUpdate
    }

    fn int_annotation(&self, name: &str) -> Option<i32> {
        self.annotations
            .get(name)
            .and_then(Value::as_i64)
            .and_then(|v| i32::try_from(v).ok())
    }
}

/// A primary or alternate key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    pub properties: Vec<SmolStr>,
    #[serde(default)]
    pub annotations: Annotations,
}

impl Key {
    /// Create a key over the given properties.
    pub fn new<S: Into<SmolStr> + Clone>(properties: &[S]) -> Self {
        Self {
            properties: properties.iter().cloned().map(Into::into).collect(),
            annotations: Annotations::new(),
        }
    }

    /// Configured constraint name.
    pub fn database_name(&self) -> Option<&str> {
        self.annotations.get_str(names::NAME)
    }
}

/// An index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub properties: Vec<SmolStr>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub annotations: Annotations,
}

impl Index {
    /// Configured index name.
    pub fn database_name(&self) -> Option<&str> {
        self.annotations.get_str(names::NAME)
    }

    /// Configured filter expression.
    pub fn filter(&self) -> Option<&str> {
        self.annotations.get_str(names::FILTER)
    }
}

/// A relationship seen from the dependent side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Dependent properties.
    pub properties: Vec<SmolStr>,
    /// Principal entity type.
    pub principal_entity: SmolStr,
    /// Principal key properties; empty means the principal's primary key.
    #[serde(default)]
    pub principal_key: Vec<SmolStr>,
    #[serde(default)]
    pub delete_behavior: ReferentialAction,
    /// Navigation on the dependent pointing at the principal.
    pub dependent_navigation: Option<SmolStr>,
    /// Navigation on the principal pointing back at dependents.
    pub principal_navigation: Option<SmolStr>,
    /// One-to-one when true.
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub annotations: Annotations,
}

impl ForeignKey {
    /// Create a foreign key to `principal_entity` with no properties yet.
    pub fn new(principal_entity: impl Into<SmolStr>) -> Self {
        Self {
            properties: Vec::new(),
            principal_entity: principal_entity.into(),
            principal_key: Vec::new(),
            delete_behavior: ReferentialAction::NoAction,
            dependent_navigation: None,
            principal_navigation: None,
            unique: false,
            required: false,
            annotations: Annotations::new(),
        }
    }

    /// Configured constraint name.
    pub fn constraint_name(&self) -> Option<&str> {
        self.annotations.get_str(names::NAME)
    }
}

/// A navigation property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Navigation {
    pub name: SmolStr,
    pub target: SmolStr,
    #[serde(default)]
    pub collection: bool,
    #[serde(default)]
    pub annotations: Annotations,
}

/// Ownership of an owned entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ownership {
    /// Owning entity type.
    pub owner: SmolStr,
    /// Navigation on the owner.
    pub navigation: SmolStr,
    /// `owns_many` when true.
    #[serde(default)]
    pub collection: bool,
    /// Properties of the owned type referencing the owner's key.
    #[serde(default)]
    pub foreign_key: Vec<SmolStr>,
}

/// A database sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: SmolStr,
    pub schema: Option<SmolStr>,
    pub clr_type: ClrType,
    pub start_value: i64,
    pub increment_by: i32,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    #[serde(default)]
    pub cyclic: bool,
    #[serde(default)]
    pub annotations: Annotations,
}

impl Sequence {
    /// Create a sequence with default settings.
    pub fn new(name: impl Into<SmolStr>, clr_type: ClrType) -> Self {
        Self {
            name: name.into(),
            schema: None,
            clr_type,
            start_value: 1,
            increment_by: 1,
            min_value: None,
            max_value: None,
            cyclic: false,
            annotations: Annotations::new(),
        }
    }
}

/// A table check constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConstraint {
    pub name: SmolStr,
    pub sql: String,
    #[serde(default)]
    pub annotations: Annotations,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, base: Option<&str>) -> EntityType {
        EntityType {
            base_type: base.map(SmolStr::new),
            ..EntityType::new(name)
        }
    }

    #[test]
    fn test_hierarchical_order_roots_first() {
        let model = Model {
            entity_types: vec![
                entity("SpecialPost", Some("Post")),
                entity("Post", None),
                entity("Blog", None),
                entity("Pinned", Some("SpecialPost")),
                entity("Archived", Some("Post")),
            ],
            ..Default::default()
        };

        let names: Vec<&str> = model
            .entity_types_in_hierarchical_order()
            .into_iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["Blog", "Post", "Archived", "SpecialPost", "Pinned"]
        );
    }

    #[test]
    fn test_root_of() {
        let model = Model {
            entity_types: vec![entity("Post", None), entity("SpecialPost", Some("Post"))],
            ..Default::default()
        };
        let special = model.entity("SpecialPost").unwrap();
        assert_eq!(model.root_of(special).name, "Post");
    }

    #[test]
    fn test_owned_short_name() {
        let owned = EntityType::new("Blog.Address#Address");
        assert_eq!(owned.short_name(), "Address");
        assert_eq!(EntityType::new("Blog").short_name(), "Blog");
    }

    #[test]
    fn test_property_facets() {
        let mut p = Property::new("Title", ClrType::String, false);
        assert_eq!(p.column_name(), "Title");
        p.annotations.set(names::COLUMN_NAME, "title");
        p.annotations.set(names::MAX_LENGTH, 200);
        assert_eq!(p.column_name(), "title");
        assert_eq!(p.max_length(), Some(200));
    }
}
