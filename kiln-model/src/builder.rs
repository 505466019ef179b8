//! Fluent construction of a [`Model`].
//!
//! ```rust
//! use kiln_model::{ModelBuilder, ReferentialAction};
//!
//! let mut model_builder = ModelBuilder::new();
//! model_builder.entity("Blog", |b| {
//!     b.property::<i32>("Id").value_generated_on_add();
//!     b.property::<Option<String>>("Note").column_type("text");
//!     b.has_key(&["Id"]);
//!     b.to_table("Blogs");
//! });
//! model_builder.entity("Post", |b| {
//!     b.property::<i32>("Id");
//!     b.property::<i32>("BlogId");
//!     b.has_key(&["Id"]);
//!     b.has_one("Blog", Some("Blog"))
//!         .with_many(Some("Posts"))
//!         .has_foreign_key(&["BlogId"])
//!         .on_delete(ReferentialAction::Cascade);
//! });
//! let model = model_builder.build();
//! assert_eq!(model.entity_types.len(), 2);
//! ```

use smol_str::SmolStr;

use crate::annotations::names;
use crate::model::{
    CheckConstraint, EntityType, ForeignKey, Index, Key, Model, Navigation, Ownership, Property,
    SeedRow, Sequence, ValueGenerated,
};
use crate::value::{ClrType, ClrTyped, ReferentialAction, Value};

fn to_names<S: AsRef<str>>(items: &[S]) -> Vec<SmolStr> {
    items.iter().map(|s| SmolStr::new(s.as_ref())).collect()
}

/// Builds a [`Model`].
#[derive(Debug, Default)]
pub struct ModelBuilder {
    model: Model,
}

impl ModelBuilder {
    /// Create a builder for an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue building an existing model.
    pub fn from_model(model: Model) -> Self {
        Self { model }
    }

    /// Set a model annotation.
    pub fn annotation(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.model.annotations.set(name, value);
        self
    }

    /// Set the default schema.
    pub fn default_schema(&mut self, schema: &str) -> &mut Self {
        self.annotation(names::DEFAULT_SCHEMA, schema)
    }

    /// Configure an entity type, creating it if needed.
    pub fn entity(&mut self, name: &str, configure: impl FnOnce(&mut EntityTypeBuilder<'_>)) -> &mut Self {
        let mut builder = self.entity_builder(name);
        configure(&mut builder);
        self
    }

    /// Get a builder for an entity type, creating it if needed.
    pub fn entity_builder(&mut self, name: &str) -> EntityTypeBuilder<'_> {
        let index = ensure_entity(&mut self.model, name);
        EntityTypeBuilder {
            model: &mut self.model,
            index,
        }
    }

    /// Configure a sequence of type `T`.
    pub fn has_sequence<T: ClrTyped>(&mut self, name: &str) -> SequenceBuilder<'_> {
        self.has_sequence_of(name, T::CLR_TYPE)
    }

    /// Configure a sequence with an explicit type.
    pub fn has_sequence_of(&mut self, name: &str, clr_type: ClrType) -> SequenceBuilder<'_> {
        let position = self.model.sequences.iter().position(|s| s.name == name);
        let index = match position {
            Some(i) => {
                self.model.sequences[i].clr_type = clr_type;
                i
            }
            None => {
                self.model.sequences.push(Sequence::new(name, clr_type));
                self.model.sequences.len() - 1
            }
        };
        SequenceBuilder {
            sequence: &mut self.model.sequences[index],
        }
    }

    /// The model built so far.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Finish building.
    pub fn build(self) -> Model {
        self.model
    }
}

fn ensure_entity(model: &mut Model, name: &str) -> usize {
    match model.entity_types.iter().position(|e| e.name == name) {
        Some(i) => i,
        None => {
            model.entity_types.push(EntityType::new(name));
            model.entity_types.len() - 1
        }
    }
}

fn ensure_navigation<'m>(entity: &'m mut EntityType, name: &str) -> &'m mut Navigation {
    let position = entity.navigations.iter().position(|n| n.name == name);
    let index = match position {
        Some(i) => i,
        None => {
            entity.navigations.push(Navigation {
                name: name.into(),
                target: SmolStr::default(),
                collection: false,
                annotations: Default::default(),
            });
            entity.navigations.len() - 1
        }
    };
    &mut entity.navigations[index]
}

/// Configures one entity type.
#[derive(Debug)]
pub struct EntityTypeBuilder<'a> {
    model: &'a mut Model,
    index: usize,
}

impl<'a> EntityTypeBuilder<'a> {
    fn entity(&mut self) -> &mut EntityType {
        &mut self.model.entity_types[self.index]
    }

    /// Name of the entity type being configured.
    pub fn name(&self) -> &str {
        &self.model.entity_types[self.index].name
    }

    /// Declare or reconfigure a property of type `T`.
    ///
    /// `Option<T>` declares a nullable property.
    pub fn property<T: ClrTyped>(&mut self, name: &str) -> PropertyBuilder<'_> {
        self.property_with_type(name, T::CLR_TYPE, T::NULLABLE)
    }

    /// Declare or reconfigure a property with an explicit type.
    pub fn property_with_type(&mut self, name: &str, clr_type: ClrType, nullable: bool) -> PropertyBuilder<'_> {
        let entity = self.entity();
        let position = entity.properties.iter().position(|p| p.name == name);
        let index = match position {
            Some(i) => {
                let existing = &mut entity.properties[i];
                existing.clr_type = clr_type;
                existing.nullable = nullable;
                i
            }
            None => {
                entity.properties.push(Property::new(name, clr_type, nullable));
                entity.properties.len() - 1
            }
        };
        PropertyBuilder {
            property: &mut entity.properties[index],
        }
    }

    /// Set the base type.
    pub fn has_base_type(&mut self, base: &str) -> &mut Self {
        self.entity().base_type = Some(base.into());
        self
    }

    /// Set the primary key.
    pub fn has_key<S: AsRef<str>>(&mut self, properties: &[S]) -> KeyBuilder<'_> {
        let entity = self.entity();
        let key = Key {
            properties: to_names(properties),
            annotations: Default::default(),
        };
        let slot = match entity.primary_key.take() {
            Some(existing) if existing.properties == key.properties => existing,
            _ => key,
        };
        KeyBuilder {
            key: entity.primary_key.insert(slot),
        }
    }

    /// Declare an alternate key.
    pub fn has_alternate_key<S: AsRef<str>>(&mut self, properties: &[S]) -> KeyBuilder<'_> {
        let properties = to_names(properties);
        let entity = self.entity();
        let position = entity
            .alternate_keys
            .iter()
            .position(|k| k.properties == properties);
        let index = match position {
            Some(i) => i,
            None => {
                entity.alternate_keys.push(Key {
                    properties,
                    annotations: Default::default(),
                });
                entity.alternate_keys.len() - 1
            }
        };
        KeyBuilder {
            key: &mut entity.alternate_keys[index],
        }
    }

    /// Declare an index.
    pub fn has_index<S: AsRef<str>>(&mut self, properties: &[S]) -> IndexBuilder<'_> {
        let properties = to_names(properties);
        let entity = self.entity();
        let position = entity.indexes.iter().position(|i| i.properties == properties);
        let index = match position {
            Some(i) => i,
            None => {
                entity.indexes.push(Index {
                    properties,
                    unique: false,
                    annotations: Default::default(),
                });
                entity.indexes.len() - 1
            }
        };
        IndexBuilder {
            index: &mut entity.indexes[index],
        }
    }

    /// Map to a table.
    pub fn to_table(&mut self, table: &str) -> &mut Self {
        self.annotation(names::TABLE_NAME, table)
    }

    /// Place the table in a schema.
    pub fn to_schema(&mut self, schema: &str) -> &mut Self {
        self.annotation(names::SCHEMA, schema)
    }

    /// Set the table comment.
    pub fn comment(&mut self, comment: &str) -> &mut Self {
        self.annotation(names::COMMENT, comment)
    }

    /// Set an entity annotation.
    pub fn annotation(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.entity().annotations.set(name, value);
        self
    }

    /// Declare a check constraint.
    pub fn has_check_constraint(&mut self, name: &str, sql: &str) -> &mut Self {
        let entity = self.entity();
        entity.check_constraints.retain(|c| c.name != name);
        entity.check_constraints.push(CheckConstraint {
            name: name.into(),
            sql: sql.to_string(),
            annotations: Default::default(),
        });
        self
    }

    /// Append seed rows.
    pub fn has_data<I: IntoIterator<Item = SeedRow>>(&mut self, rows: I) -> &mut Self {
        self.entity().seed_data.extend(rows);
        self
    }

    /// Start a relationship where this type is the dependent.
    pub fn has_one(&mut self, principal: &str, navigation: Option<&str>) -> RelationshipBuilder<'_> {
        let principal_index = ensure_entity(self.model, principal);
        let index = self.index;
        let entity = &mut self.model.entity_types[index];
        if let Some(nav) = navigation {
            let target = SmolStr::new(principal);
            let nav = ensure_navigation(entity, nav);
            nav.target = target;
            nav.collection = false;
        }
        let mut fk = ForeignKey::new(principal);
        fk.dependent_navigation = navigation.map(SmolStr::new);
        entity.foreign_keys.push(fk);
        let foreign_key = entity.foreign_keys.len() - 1;
        RelationshipBuilder {
            model: &mut *self.model,
            dependent: index,
            principal: principal_index,
            foreign_key,
        }
    }

    /// Configure an owned reference.
    pub fn owns_one(
        &mut self,
        type_name: &str,
        navigation: &str,
        configure: impl FnOnce(&mut EntityTypeBuilder<'_>),
    ) -> &mut Self {
        self.owns(type_name, navigation, false, configure)
    }

    /// Configure an owned collection.
    pub fn owns_many(
        &mut self,
        type_name: &str,
        navigation: &str,
        configure: impl FnOnce(&mut EntityTypeBuilder<'_>),
    ) -> &mut Self {
        self.owns(type_name, navigation, true, configure)
    }

    fn owns(
        &mut self,
        type_name: &str,
        navigation: &str,
        collection: bool,
        configure: impl FnOnce(&mut EntityTypeBuilder<'_>),
    ) -> &mut Self {
        let owner = SmolStr::new(self.name());
        let owned_name = format!("{}.{}#{}", owner, navigation, type_name);
        {
            let nav = ensure_navigation(self.entity(), navigation);
            nav.target = SmolStr::new(&owned_name);
            nav.collection = collection;
        }
        let owned_index = ensure_entity(self.model, &owned_name);
        let owned = &mut self.model.entity_types[owned_index];
        if owned.ownership.is_none() {
            owned.ownership = Some(Ownership {
                owner,
                navigation: navigation.into(),
                collection,
                foreign_key: Vec::new(),
            });
        }
        let mut builder = EntityTypeBuilder {
            model: &mut *self.model,
            index: owned_index,
        };
        configure(&mut builder);
        self
    }

    /// Set the properties of an owned type that reference its owner.
    pub fn with_owner<S: AsRef<str>>(&mut self, properties: &[S]) -> &mut Self {
        let properties = to_names(properties);
        if let Some(ownership) = self.entity().ownership.as_mut() {
            ownership.foreign_key = properties;
        } else {
            tracing::debug!(entity = %self.name(), "with_owner ignored on a non-owned type");
        }
        self
    }

    /// Configure a navigation.
    pub fn navigation(&mut self, name: &str) -> NavigationBuilder<'_> {
        NavigationBuilder {
            navigation: ensure_navigation(self.entity(), name),
        }
    }
}

/// Configures one property.
#[derive(Debug)]
pub struct PropertyBuilder<'a> {
    property: &'a mut Property,
}

impl<'a> PropertyBuilder<'a> {
    fn set(self, name: &str, value: impl Into<Value>) -> Self {
        self.property.annotations.set(name, value);
        self
    }

    /// Mark the property as non-nullable.
    pub fn is_required(self) -> Self {
        self.property.nullable = false;
        self
    }

    /// Map to a differently named column.
    pub fn column_name(self, name: &str) -> Self {
        self.set(names::COLUMN_NAME, name)
    }

    /// Set an explicit store type.
    pub fn column_type(self, store_type: &str) -> Self {
        self.set(names::COLUMN_TYPE, store_type)
    }

    /// Set the maximum length.
    pub fn max_length(self, max_length: i32) -> Self {
        self.set(names::MAX_LENGTH, max_length)
    }

    /// Set whether text is Unicode.
    pub fn unicode(self, unicode: bool) -> Self {
        self.set(names::UNICODE, unicode)
    }

    /// Set whether the column is fixed length.
    pub fn fixed_length(self, fixed: bool) -> Self {
        self.set(names::IS_FIXED_LENGTH, fixed)
    }

    /// Set the numeric precision.
    pub fn precision(self, precision: i32) -> Self {
        self.set(names::PRECISION, precision)
    }

    /// Set the numeric scale.
    pub fn scale(self, scale: i32) -> Self {
        self.set(names::SCALE, scale)
    }

    /// Set a literal default value.
    pub fn default_value(self, value: impl Into<Value>) -> Self {
        self.set(names::DEFAULT_VALUE, value)
    }

    /// Set a SQL default expression.
    pub fn default_value_sql(self, sql: &str) -> Self {
        self.set(names::DEFAULT_VALUE_SQL, sql)
    }

    /// Make the column computed.
    pub fn computed_column_sql(self, sql: &str) -> Self {
        self.set(names::COMPUTED_COLUMN_SQL, sql)
    }

    /// Set whether a computed column is stored.
    pub fn stored(self, stored: bool) -> Self {
        self.set(names::IS_STORED, stored)
    }

    /// Set the column comment.
    pub fn comment(self, comment: &str) -> Self {
        self.set(names::COMMENT, comment)
    }

    /// Set the column collation.
    pub fn collation(self, collation: &str) -> Self {
        self.set(names::COLLATION, collation)
    }

    /// Values are generated when rows are inserted.
    pub fn value_generated_on_add(self) -> Self {
        self.property.value_generated = ValueGenerated::OnAdd;
        self
    }

    /// Values are generated on insert and update.
    pub fn value_generated_on_add_or_update(self) -> Self {
        self.property.value_generated = ValueGenerated::OnAddOrUpdate;
        self
    }

    /// Use the property for optimistic concurrency.
    pub fn concurrency_token(self) -> Self {
        self.property.concurrency_token = true;
        self
    }

    /// Set an arbitrary annotation.
    pub fn annotation(self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value)
    }
}

/// Configures a key.
#[derive(Debug)]
pub struct KeyBuilder<'a> {
    key: &'a mut Key,
}

impl<'a> KeyBuilder<'a> {
    /// Set the constraint name.
    pub fn database_name(self, name: &str) -> Self {
        self.key.annotations.set(names::NAME, name);
        self
    }

    /// Set an annotation.
    pub fn annotation(self, name: &str, value: impl Into<Value>) -> Self {
        self.key.annotations.set(name, value);
        self
    }
}

/// Configures an index.
#[derive(Debug)]
pub struct IndexBuilder<'a> {
    index: &'a mut Index,
}

impl<'a> IndexBuilder<'a> {
    /// Make the index unique.
    pub fn is_unique(self) -> Self {
        self.index.unique = true;
        self
    }

    /// Set the index name.
    pub fn database_name(self, name: &str) -> Self {
        self.index.annotations.set(names::NAME, name);
        self
    }

    /// Set a partial-index filter.
    pub fn filter(self, sql: &str) -> Self {
        self.index.annotations.set(names::FILTER, sql);
        self
    }

    /// Set an annotation.
    pub fn annotation(self, name: &str, value: impl Into<Value>) -> Self {
        self.index.annotations.set(name, value);
        self
    }
}

/// Configures a relationship from the dependent side.
#[derive(Debug)]
pub struct RelationshipBuilder<'a> {
    model: &'a mut Model,
    dependent: usize,
    principal: usize,
    foreign_key: usize,
}

impl<'a> RelationshipBuilder<'a> {
    fn fk(&mut self) -> &mut ForeignKey {
        &mut self.model.entity_types[self.dependent].foreign_keys[self.foreign_key]
    }

    fn inverse(mut self, navigation: Option<&str>, collection: bool) -> Self {
        let dependent = self.model.entity_types[self.dependent].name.clone();
        {
            let fk = self.fk();
            fk.principal_navigation = navigation.map(SmolStr::new);
            fk.unique = !collection;
        }
        if let Some(nav) = navigation {
            let nav = ensure_navigation(&mut self.model.entity_types[self.principal], nav);
            nav.target = dependent;
            nav.collection = collection;
        }
        self
    }

    /// The principal has many dependents.
    pub fn with_many(self, navigation: Option<&str>) -> Self {
        self.inverse(navigation, true)
    }

    /// The principal has at most one dependent.
    pub fn with_one(self, navigation: Option<&str>) -> Self {
        self.inverse(navigation, false)
    }

    /// Set the dependent properties.
    pub fn has_foreign_key<S: AsRef<str>>(mut self, properties: &[S]) -> Self {
        self.fk().properties = to_names(properties);
        self
    }

    /// Target an alternate key on the principal.
    pub fn has_principal_key<S: AsRef<str>>(mut self, properties: &[S]) -> Self {
        self.fk().principal_key = to_names(properties);
        self
    }

    /// Set the delete behavior.
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.fk().delete_behavior = action;
        self
    }

    /// Require a principal.
    pub fn is_required(mut self) -> Self {
        self.fk().required = true;
        self
    }

    /// Set the constraint name.
    pub fn constraint_name(mut self, name: &str) -> Self {
        self.fk().annotations.set(names::NAME, name);
        self
    }

    /// Set an annotation.
    pub fn annotation(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fk().annotations.set(name, value);
        self
    }
}

/// Configures a navigation.
#[derive(Debug)]
pub struct NavigationBuilder<'a> {
    navigation: &'a mut Navigation,
}

impl<'a> NavigationBuilder<'a> {
    /// Set an annotation.
    pub fn annotation(self, name: &str, value: impl Into<Value>) -> Self {
        self.navigation.annotations.set(name, value);
        self
    }
}

/// Configures a sequence.
#[derive(Debug)]
pub struct SequenceBuilder<'a> {
    sequence: &'a mut Sequence,
}

impl<'a> SequenceBuilder<'a> {
    pub fn schema(self, schema: &str) -> Self {
        self.sequence.schema = Some(schema.into());
        self
    }

    pub fn start_value(self, start: i64) -> Self {
        self.sequence.start_value = start;
        self
    }

    pub fn increment_by(self, increment: i32) -> Self {
        self.sequence.increment_by = increment;
        self
    }

    pub fn min_value(self, min: i64) -> Self {
        self.sequence.min_value = Some(min);
        self
    }

    pub fn max_value(self, max: i64) -> Self {
        self.sequence.max_value = Some(max);
        self
    }

    pub fn cyclic(self) -> Self {
        self.sequence.cyclic = true;
        self
    }

    pub fn annotation(self, name: &str, value: impl Into<Value>) -> Self {
        self.sequence.annotations.set(name, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_property_nullability_from_option() {
        let mut mb = ModelBuilder::new();
        mb.entity("Blog", |b| {
            b.property::<i32>("Id");
            b.property::<Option<String>>("Note").column_type("text");
        });
        let model = mb.build();
        let blog = model.entity("Blog").unwrap();
        assert!(!blog.property("Id").unwrap().nullable);
        let note = blog.property("Note").unwrap();
        assert!(note.nullable);
        assert_eq!(note.clr_type, ClrType::String);
        assert_eq!(note.column_type(), Some("text"));
    }

    #[test]
    fn test_relationship_sets_navigations() {
        let mut mb = ModelBuilder::new();
        mb.entity("Blog", |b| {
            b.property::<i32>("Id");
            b.has_key(&["Id"]);
        });
        mb.entity("Post", |b| {
            b.property::<i32>("Id");
            b.property::<i32>("BlogId");
            b.has_one("Blog", Some("Blog"))
                .with_many(Some("Posts"))
                .has_foreign_key(&["BlogId"])
                .on_delete(ReferentialAction::Cascade)
                .is_required();
        });
        let model = mb.build();

        let post = model.entity("Post").unwrap();
        let fk = &post.foreign_keys[0];
        assert_eq!(fk.properties, vec![SmolStr::new("BlogId")]);
        assert_eq!(fk.delete_behavior, ReferentialAction::Cascade);
        assert!(fk.required);
        assert!(!fk.unique);
        assert_eq!(post.navigation("Blog").unwrap().target, "Blog");

        let posts = model.entity("Blog").unwrap().navigation("Posts").unwrap();
        assert!(posts.collection);
        assert_eq!(posts.target, "Post");
    }

    #[test]
    fn test_owns_one_creates_owned_type() {
        let mut mb = ModelBuilder::new();
        mb.entity("Customer", |b| {
            b.property::<i32>("Id");
            b.has_key(&["Id"]);
            b.owns_one("Address", "ShippingAddress", |b1| {
                b1.property::<i32>("CustomerId");
                b1.property::<String>("Street");
                b1.has_key(&["CustomerId"]);
                b1.with_owner(&["CustomerId"]);
            });
        });
        let model = mb.build();

        let owned = model.entity("Customer.ShippingAddress#Address").unwrap();
        let ownership = owned.ownership.as_ref().unwrap();
        assert_eq!(ownership.owner, "Customer");
        assert!(!ownership.collection);
        assert_eq!(ownership.foreign_key, vec![SmolStr::new("CustomerId")]);
        assert_eq!(owned.short_name(), "Address");
    }

    #[test]
    fn test_has_index_is_idempotent() {
        let mut mb = ModelBuilder::new();
        mb.entity("Blog", |b| {
            b.has_index(&["Name"]);
            b.has_index(&["Name"]).is_unique().database_name("IX_Name");
        });
        let model = mb.build();
        let blog = model.entity("Blog").unwrap();
        assert_eq!(blog.indexes.len(), 1);
        assert!(blog.indexes[0].unique);
        assert_eq!(blog.indexes[0].database_name(), Some("IX_Name"));
    }

    #[test]
    fn test_seed_rows() {
        let mut mb = ModelBuilder::new();
        mb.entity("Blog", |b| {
            b.has_data([seed! { "Id" => 1, "Name" => "First" }, seed! { "Id" => 2 }]);
        });
        let model = mb.build();
        let rows = &model.entity("Blog").unwrap().seed_data;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Name"), Some(&Value::from("First")));
        assert_eq!(rows[1].len(), 1);
    }

    #[test]
    fn test_sequence_defaults() {
        let mut mb = ModelBuilder::new();
        mb.has_sequence::<i64>("OrderNumbers").increment_by(5);
        let model = mb.build();
        let seq = &model.sequences[0];
        assert_eq!(seq.start_value, 1);
        assert_eq!(seq.increment_by, 5);
        assert_eq!(seq.clr_type, ClrType::I64);
    }
}
