//! The store-facing projection of a [`Model`].
//!
//! Migrations are computed between two relational models, never between
//! entity models directly. The projection applies the mapping conventions:
//!
//! - a hierarchy shares its root's table (derived columns become nullable
//!   and a `Discriminator` column is added)
//! - an owned reference is split into its owner's table as
//!   `{Navigation}_{Property}` columns
//! - an owned collection, or an owned type given its own table, gets a
//!   separate table with a cascading foreign key to the owner
//! - every foreign key not already covered by a key or index gets an index

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::{BTreeSet, HashMap};

use crate::annotations::{Annotations, names};
use crate::error::{ModelError, ModelResult};
use crate::model::{CheckConstraint, EntityType, Model, Property, Sequence, ValueGenerated};
use crate::value::{ClrType, ReferentialAction, Value};

/// Name of the column that distinguishes types sharing a table.
pub const DISCRIMINATOR_COLUMN: &str = "Discriminator";

/// A database-shaped model: tables, columns, constraints and sequences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationalModel {
    pub default_schema: Option<SmolStr>,
    /// Database-level annotations.
    pub annotations: Annotations,
    /// Tables, ordered by schema then name.
    pub tables: Vec<Table>,
    pub sequences: Vec<Sequence>,
}

/// A table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: SmolStr,
    pub schema: Option<SmolStr>,
    pub columns: Vec<Column>,
    pub primary_key: Option<PrimaryKeyConstraint>,
    pub unique_constraints: Vec<UniqueConstraint>,
    pub foreign_keys: Vec<ForeignKeyConstraint>,
    pub indexes: Vec<TableIndex>,
    pub check_constraints: Vec<CheckConstraint>,
    pub comment: Option<String>,
    /// Seed rows keyed by column name.
    pub seed_data: Vec<IndexMap<SmolStr, Value>>,
    pub annotations: Annotations,
}

/// A column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: SmolStr,
    pub clr_type: ClrType,
    pub store_type: String,
    pub nullable: bool,
    pub max_length: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
    pub unicode: Option<bool>,
    pub fixed_length: Option<bool>,
    pub row_version: bool,
    pub default_value: Option<Value>,
    pub default_value_sql: Option<String>,
    pub computed_column_sql: Option<String>,
    pub is_stored: Option<bool>,
    pub comment: Option<String>,
    pub collation: Option<String>,
    pub annotations: Annotations,
}

/// A primary key constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKeyConstraint {
    pub name: SmolStr,
    pub columns: Vec<SmolStr>,
    pub annotations: Annotations,
}

/// A unique constraint backing an alternate key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    pub name: SmolStr,
    pub columns: Vec<SmolStr>,
    pub annotations: Annotations,
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyConstraint {
    pub name: SmolStr,
    pub columns: Vec<SmolStr>,
    pub principal_table: SmolStr,
    pub principal_schema: Option<SmolStr>,
    pub principal_columns: Vec<SmolStr>,
    pub on_delete: ReferentialAction,
    pub annotations: Annotations,
}

/// An index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableIndex {
    pub name: SmolStr,
    pub columns: Vec<SmolStr>,
    pub unique: bool,
    pub filter: Option<String>,
    pub annotations: Annotations,
}

impl RelationalModel {
    /// Project an entity model onto tables.
    pub fn from_model(model: &Model) -> ModelResult<Self> {
        Projection::new(model).run()
    }

    /// Find a table.
    pub fn table(&self, schema: Option<&str>, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.name == name && t.schema.as_deref() == schema)
    }

    /// Non-default schemas referenced by tables and sequences.
    pub fn schemas(&self) -> BTreeSet<&str> {
        self.tables
            .iter()
            .filter_map(|t| t.schema.as_deref())
            .chain(self.sequences.iter().filter_map(|s| s.schema.as_deref()))
            .collect()
    }
}

impl Table {
    /// Find a column.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Whether `columns` is a prefix of the primary key, a unique
    /// constraint or an index.
    fn is_covered(&self, columns: &[SmolStr]) -> bool {
        let covers = |existing: &[SmolStr]| existing.starts_with(columns);
        self.primary_key.as_ref().is_some_and(|pk| covers(&pk.columns))
            || self.unique_constraints.iter().any(|u| covers(&u.columns))
            || self.indexes.iter().any(|i| covers(&i.columns))
    }
}

impl Column {
    /// A column with default facets.
    pub fn new(name: impl Into<SmolStr>, clr_type: ClrType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            clr_type,
            store_type: clr_type.default_store_type().to_string(),
            nullable,
            max_length: None,
            precision: None,
            scale: None,
            unicode: None,
            fixed_length: None,
            row_version: false,
            default_value: None,
            default_value_sql: None,
            computed_column_sql: None,
            is_stored: None,
            comment: None,
            collation: None,
            annotations: Annotations::new(),
        }
    }

    fn from_property(property: &Property, name: SmolStr, force_nullable: bool) -> Self {
        let a = &property.annotations;
        let mut column = Column::new(name, property.clr_type, property.nullable || force_nullable);
        column.max_length = property.max_length();
        column.precision = property.precision();
        column.scale = property.scale();
        column.store_type = match property.column_type() {
            Some(explicit) => explicit.to_string(),
            None => default_store_type(property.clr_type, column.max_length, column.precision, column.scale),
        };
        column.unicode = a.get(names::UNICODE).and_then(Value::as_bool);
        column.fixed_length = a.get(names::IS_FIXED_LENGTH).and_then(Value::as_bool);
        column.row_version = property.is_row_version();
        column.default_value = a.get(names::DEFAULT_VALUE).cloned();
        column.default_value_sql = a.get_str(names::DEFAULT_VALUE_SQL).map(str::to_string);
        column.computed_column_sql = a.get_str(names::COMPUTED_COLUMN_SQL).map(str::to_string);
        column.is_stored = a.get(names::IS_STORED).and_then(Value::as_bool);
        column.comment = a.get_str(names::COMMENT).map(str::to_string);
        column.collation = a.get_str(names::COLLATION).map(str::to_string);
        column.annotations = a.provider_specific();

        let generated_identity = property.value_generated == ValueGenerated::OnAdd
            && matches!(property.clr_type, ClrType::I16 | ClrType::I32 | ClrType::I64)
            && column.default_value_sql.is_none()
            && column.computed_column_sql.is_none()
            && !column.annotations.contains(names::VALUE_GENERATION_STRATEGY);
        if generated_identity {
            column
                .annotations
                .set(names::VALUE_GENERATION_STRATEGY, "IdentityByDefaultColumn");
        }
        column
    }
}

fn default_store_type(clr: ClrType, max_length: Option<i32>, precision: Option<i32>, scale: Option<i32>) -> String {
    match (clr, max_length, precision) {
        (ClrType::String, Some(len), _) => format!("character varying({})", len),
        (ClrType::Decimal, _, Some(p)) => format!("numeric({},{})", p, scale.unwrap_or(0)),
        _ => clr.default_store_type().to_string(),
    }
}

fn join(columns: &[SmolStr]) -> String {
    columns.iter().map(SmolStr::as_str).collect::<Vec<_>>().join("_")
}

/// Where an entity type's properties landed.
#[derive(Debug)]
struct Mapping {
    table: usize,
    /// Set for owned references split into their owner's table.
    embedded: bool,
    columns: HashMap<SmolStr, SmolStr>,
}

impl Mapping {
    fn column(&self, entity: &str, property: &str) -> ModelResult<SmolStr> {
        self.columns
            .get(property)
            .cloned()
            .ok_or_else(|| ModelError::unknown_property(entity, property))
    }

    fn columns(&self, entity: &str, properties: &[SmolStr]) -> ModelResult<Vec<SmolStr>> {
        properties.iter().map(|p| self.column(entity, p)).collect()
    }
}

struct Projection<'m> {
    model: &'m Model,
    tables: Vec<Table>,
    mappings: HashMap<SmolStr, Mapping>,
}

impl<'m> Projection<'m> {
    fn new(model: &'m Model) -> Self {
        Self {
            model,
            tables: Vec::new(),
            mappings: HashMap::new(),
        }
    }

    fn run(mut self) -> ModelResult<RelationalModel> {
        let model = self.model;
        let ordered = model.entity_types_in_hierarchical_order();

        for entity in &ordered {
            if entity.is_owned() {
                continue;
            }
            let root = model.root_of(entity);
            if root.name == entity.name {
                self.map_root(entity)?;
            } else {
                self.map_derived(entity, root)?;
            }
            self.map_owned(entity, "")?;
        }

        for entity in &ordered {
            self.constraints(entity)?;
            self.seed(entity)?;
        }
        self.foreign_key_indexes();
        for table in &mut self.tables {
            order_key_columns_first(table);
        }

        let default_schema = model.default_schema().map(SmolStr::new);
        let mut tables = self.tables;
        tables.sort_by(|a, b| (&a.schema, &a.name).cmp(&(&b.schema, &b.name)));

        let mut sequences = model.sequences.clone();
        for sequence in &mut sequences {
            if sequence.schema.is_none() {
                sequence.schema = default_schema.clone();
            }
        }
        sequences.sort_by(|a, b| (&a.schema, &a.name).cmp(&(&b.schema, &b.name)));

        Ok(RelationalModel {
            default_schema,
            annotations: model.annotations.provider_specific(),
            tables,
            sequences,
        })
    }

    fn schema_for(&self, entity: &EntityType) -> Option<SmolStr> {
        entity
            .schema()
            .or(self.model.default_schema())
            .map(SmolStr::new)
    }

    fn push_table(&mut self, name: &str, schema: Option<SmolStr>, entity: &EntityType) -> ModelResult<usize> {
        if self
            .tables
            .iter()
            .any(|t| t.name == name && t.schema == schema)
        {
            return Err(ModelError::invalid_model(format!(
                "table `{}` is mapped by more than one entity type",
                name
            )));
        }
        self.tables.push(Table {
            name: name.into(),
            schema,
            comment: entity.annotations.get_str(names::COMMENT).map(str::to_string),
            annotations: entity.annotations.provider_specific(),
            ..Default::default()
        });
        Ok(self.tables.len() - 1)
    }

    fn add_columns(&mut self, table: usize, entity: &EntityType, prefix: &str, skip: &[SmolStr], force_nullable: bool) -> HashMap<SmolStr, SmolStr> {
        let mut columns = HashMap::new();
        for property in &entity.properties {
            if skip.contains(&property.name) {
                continue;
            }
            let name = match property.annotations.get_str(names::COLUMN_NAME) {
                Some(explicit) => SmolStr::new(explicit),
                None => SmolStr::new(format!("{}{}", prefix, property.name)),
            };
            let table = &mut self.tables[table];
            if !table.has_column(&name) {
                table
                    .columns
                    .push(Column::from_property(property, name.clone(), force_nullable));
            }
            columns.insert(property.name.clone(), name);
        }
        columns
    }

    fn map_root(&mut self, entity: &EntityType) -> ModelResult<()> {
        let name = entity.table_name().unwrap_or(entity.short_name()).to_string();
        let schema = self.schema_for(entity);
        let table = self.push_table(&name, schema, entity)?;
        let columns = self.add_columns(table, entity, "", &[], false);

        if self.model.derived_types(&entity.name).next().is_some() {
            let discriminator = Column::new(DISCRIMINATOR_COLUMN, ClrType::String, false);
            if !self.tables[table].has_column(DISCRIMINATOR_COLUMN) {
                self.tables[table].columns.push(discriminator);
            }
        }

        self.mappings.insert(
            entity.name.clone(),
            Mapping {
                table,
                embedded: false,
                columns,
            },
        );
        Ok(())
    }

    fn map_derived(&mut self, entity: &EntityType, root: &EntityType) -> ModelResult<()> {
        let table = self
            .mappings
            .get(&root.name)
            .map(|m| m.table)
            .ok_or_else(|| ModelError::unknown_entity(root.name.as_str()))?;

        // Inherited properties resolve to the base type's columns.
        let mut columns = HashMap::new();
        if let Some(base) = entity.base_type.as_ref().and_then(|b| self.mappings.get(b)) {
            columns.extend(base.columns.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        columns.extend(self.add_columns(table, entity, "", &[], true));

        self.mappings.insert(
            entity.name.clone(),
            Mapping {
                table,
                embedded: false,
                columns,
            },
        );
        Ok(())
    }

    fn map_owned(&mut self, owner: &EntityType, prefix: &str) -> ModelResult<()> {
        let model = self.model;
        let mut owned: Vec<&EntityType> = model.owned_types_of(&owner.name).collect();
        owned.sort_by(|a, b| a.name.cmp(&b.name));

        let (owner_table, owner_key_columns) = {
            let mapping = self
                .mappings
                .get(&owner.name)
                .ok_or_else(|| ModelError::unknown_entity(owner.name.as_str()))?;
            let key = self.key_columns_of(owner, mapping)?;
            (mapping.table, key)
        };

        for entity in owned {
            let Some(ownership) = entity.ownership.as_ref() else {
                continue;
            };
            let separate = ownership.collection || entity.table_name().is_some();
            if separate {
                let name = entity
                    .table_name()
                    .unwrap_or(ownership.navigation.as_str())
                    .to_string();
                let schema = entity
                    .schema()
                    .map(SmolStr::new)
                    .or_else(|| self.tables[owner_table].schema.clone());
                let table = self.push_table(&name, schema, entity)?;
                let columns = self.add_columns(table, entity, "", &[], false);
                self.mappings.insert(
                    entity.name.clone(),
                    Mapping {
                        table,
                        embedded: false,
                        columns,
                    },
                );
                self.map_owned(entity, "")?;
            } else {
                let nested = format!("{}{}_", prefix, ownership.navigation);
                let mut columns =
                    self.add_columns(owner_table, entity, &nested, &ownership.foreign_key, false);
                for (property, column) in ownership.foreign_key.iter().zip(&owner_key_columns) {
                    columns.insert(property.clone(), column.clone());
                }
                self.mappings.insert(
                    entity.name.clone(),
                    Mapping {
                        table: owner_table,
                        embedded: true,
                        columns,
                    },
                );
                self.map_owned(entity, &nested)?;
            }
        }
        Ok(())
    }

    fn key_columns_of(&self, entity: &EntityType, mapping: &Mapping) -> ModelResult<Vec<SmolStr>> {
        let root = self.model.root_of(entity);
        match root.primary_key.as_ref() {
            Some(key) => mapping.columns(&root.name, &key.properties),
            None => Ok(Vec::new()),
        }
    }

    fn constraints(&mut self, entity: &EntityType) -> ModelResult<()> {
        let Some(mapping) = self.mappings.get(&entity.name) else {
            return Ok(());
        };
        let table_index = mapping.table;
        let embedded = mapping.embedded;
        let table_name = self.tables[table_index].name.clone();
        let is_root = entity.base_type.is_none() && !embedded;

        if is_root {
            let key = match (&entity.primary_key, &entity.ownership) {
                (Some(key), _) => Some((key.properties.clone(), key.annotations.clone(), key.database_name().map(SmolStr::new))),
                (None, Some(ownership)) if !ownership.foreign_key.is_empty() => {
                    Some((ownership.foreign_key.clone(), Annotations::new(), None))
                }
                _ => None,
            };
            if let Some((properties, annotations, name)) = key {
                let columns = mapping.columns(&entity.name, &properties)?;
                self.tables[table_index].primary_key = Some(PrimaryKeyConstraint {
                    name: name.unwrap_or_else(|| SmolStr::new(format!("PK_{}", table_name))),
                    columns,
                    annotations: annotations.provider_specific(),
                });
            }
        }

        let mut unique_constraints = Vec::new();
        for key in &entity.alternate_keys {
            let columns = mapping.columns(&entity.name, &key.properties)?;
            unique_constraints.push(UniqueConstraint {
                name: key
                    .database_name()
                    .map(SmolStr::new)
                    .unwrap_or_else(|| SmolStr::new(format!("AK_{}_{}", table_name, join(&columns)))),
                columns,
                annotations: key.annotations.provider_specific(),
            });
        }

        let mut indexes = Vec::new();
        for index in &entity.indexes {
            let columns = mapping.columns(&entity.name, &index.properties)?;
            indexes.push(TableIndex {
                name: index
                    .database_name()
                    .map(SmolStr::new)
                    .unwrap_or_else(|| SmolStr::new(format!("IX_{}_{}", table_name, join(&columns)))),
                columns,
                unique: index.unique,
                filter: index.filter().map(str::to_string),
                annotations: index.annotations.provider_specific(),
            });
        }

        let mut foreign_keys = Vec::new();
        for fk in &entity.foreign_keys {
            let principal = self
                .model
                .entity(&fk.principal_entity)
                .ok_or_else(|| ModelError::unknown_entity(fk.principal_entity.as_str()))?;
            let principal_mapping = self
                .mappings
                .get(&principal.name)
                .ok_or_else(|| ModelError::unknown_entity(principal.name.as_str()))?;
            let principal_properties = if fk.principal_key.is_empty() {
                self.model
                    .root_of(principal)
                    .primary_key
                    .as_ref()
                    .map(|k| k.properties.clone())
                    .ok_or_else(|| {
                        ModelError::invalid_model(format!(
                            "principal `{}` of a relationship on `{}` has no key",
                            principal.name, entity.name
                        ))
                    })?
            } else {
                fk.principal_key.clone()
            };
            let columns = mapping.columns(&entity.name, &fk.properties)?;
            let principal_columns = principal_mapping.columns(&principal.name, &principal_properties)?;
            let principal_table = &self.tables[principal_mapping.table];
            foreign_keys.push(ForeignKeyConstraint {
                name: fk.constraint_name().map(SmolStr::new).unwrap_or_else(|| {
                    SmolStr::new(format!(
                        "FK_{}_{}_{}",
                        table_name,
                        principal_table.name,
                        join(&columns)
                    ))
                }),
                columns,
                principal_table: principal_table.name.clone(),
                principal_schema: principal_table.schema.clone(),
                principal_columns,
                on_delete: fk.delete_behavior,
                annotations: fk.annotations.provider_specific(),
            });
        }

        if let Some(ownership) = entity.ownership.as_ref().filter(|_| !embedded) {
            if !ownership.foreign_key.is_empty() {
                let owner = self
                    .model
                    .entity(&ownership.owner)
                    .ok_or_else(|| ModelError::unknown_entity(ownership.owner.as_str()))?;
                let owner_mapping = self
                    .mappings
                    .get(&owner.name)
                    .ok_or_else(|| ModelError::unknown_entity(owner.name.as_str()))?;
                let principal_columns = self.key_columns_of(owner, owner_mapping)?;
                let columns = mapping.columns(&entity.name, &ownership.foreign_key)?;
                let principal_table = &self.tables[owner_mapping.table];
                foreign_keys.push(ForeignKeyConstraint {
                    name: SmolStr::new(format!(
                        "FK_{}_{}_{}",
                        table_name,
                        principal_table.name,
                        join(&columns)
                    )),
                    columns,
                    principal_table: principal_table.name.clone(),
                    principal_schema: principal_table.schema.clone(),
                    principal_columns,
                    on_delete: ReferentialAction::Cascade,
                    annotations: Annotations::new(),
                });
            }
        }

        let table = &mut self.tables[table_index];
        table.unique_constraints.extend(unique_constraints);
        table.indexes.extend(indexes);
        table.foreign_keys.extend(foreign_keys);
        for check in &entity.check_constraints {
            if !table.check_constraints.iter().any(|c| c.name == check.name) {
                table.check_constraints.push(check.clone());
            }
        }
        Ok(())
    }

    fn seed(&mut self, entity: &EntityType) -> ModelResult<()> {
        if entity.seed_data.is_empty() {
            return Ok(());
        }
        let Some(mapping) = self.mappings.get(&entity.name) else {
            return Ok(());
        };
        if mapping.embedded {
            tracing::debug!(entity = %entity.name, "seed data on a table-split owned type is merged by its owner");
            return Ok(());
        }
        let table = mapping.table;
        let discriminator = self.tables[table].has_column(DISCRIMINATOR_COLUMN);

        let mut rows = Vec::with_capacity(entity.seed_data.len());
        for row in &entity.seed_data {
            let mut mapped = IndexMap::new();
            for (property, value) in row {
                mapped.insert(mapping.column(&entity.name, property)?, value.clone());
            }
            if discriminator {
                mapped.insert(
                    SmolStr::new(DISCRIMINATOR_COLUMN),
                    Value::from(entity.short_name()),
                );
            }
            rows.push(mapped);
        }
        self.tables[table].seed_data.extend(rows);
        Ok(())
    }

    fn foreign_key_indexes(&mut self) {
        for table in &mut self.tables {
            let mut added = Vec::new();
            for fk in &table.foreign_keys {
                if table.is_covered(&fk.columns) || added.iter().any(|i: &TableIndex| i.columns == fk.columns) {
                    continue;
                }
                added.push(TableIndex {
                    name: SmolStr::new(format!("IX_{}_{}", table.name, join(&fk.columns))),
                    columns: fk.columns.clone(),
                    unique: false,
                    filter: None,
                    annotations: Annotations::new(),
                });
            }
            table.indexes.extend(added);
        }
    }
}

fn order_key_columns_first(table: &mut Table) {
    let Some(pk) = table.primary_key.as_ref() else {
        return;
    };
    let key: Vec<SmolStr> = pk.columns.clone();
    table.columns.sort_by_key(|c| {
        key.iter()
            .position(|k| *k == c.name)
            .unwrap_or(usize::MAX)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModelBuilder;
    use crate::seed;
    use pretty_assertions::assert_eq;

    fn blog_model(with_note: bool) -> Model {
        let mut mb = ModelBuilder::new();
        mb.entity("Blog", |b| {
            b.property::<i32>("Id").value_generated_on_add();
            b.property::<String>("Name").max_length(100);
            if with_note {
                b.property::<Option<String>>("Note").column_type("text");
            }
            b.has_key(&["Id"]);
            b.to_table("Blogs");
        });
        mb.entity("Post", |b| {
            b.property::<i32>("Id");
            b.property::<i32>("BlogId");
            b.has_key(&["Id"]);
            b.has_one("Blog", Some("Blog"))
                .with_many(Some("Posts"))
                .has_foreign_key(&["BlogId"])
                .on_delete(ReferentialAction::Cascade);
            b.to_table("Posts");
        });
        mb.build()
    }

    #[test]
    fn test_basic_tables() {
        let rel = RelationalModel::from_model(&blog_model(true)).unwrap();
        let names: Vec<&str> = rel.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Blogs", "Posts"]);

        let blogs = rel.table(None, "Blogs").unwrap();
        assert_eq!(blogs.primary_key.as_ref().unwrap().name, "PK_Blogs");
        let name = blogs.column("Name").unwrap();
        assert_eq!(name.store_type, "character varying(100)");
        assert_eq!(name.max_length, Some(100));
        let note = blogs.column("Note").unwrap();
        assert!(note.nullable);
        assert_eq!(note.store_type, "text");

        let id = blogs.column("Id").unwrap();
        assert_eq!(
            id.annotations.get_str(names::VALUE_GENERATION_STRATEGY),
            Some("IdentityByDefaultColumn")
        );
    }

    #[test]
    fn test_foreign_key_gets_index() {
        let rel = RelationalModel::from_model(&blog_model(false)).unwrap();
        let posts = rel.table(None, "Posts").unwrap();
        let fk = &posts.foreign_keys[0];
        assert_eq!(fk.name, "FK_Posts_Blogs_BlogId");
        assert_eq!(fk.principal_columns, vec![SmolStr::new("Id")]);
        assert_eq!(fk.on_delete, ReferentialAction::Cascade);
        assert_eq!(posts.indexes[0].name, "IX_Posts_BlogId");
    }

    #[test]
    fn test_hierarchy_shares_table() {
        let mut mb = ModelBuilder::new();
        mb.entity("Post", |b| {
            b.property::<i32>("Id");
            b.has_key(&["Id"]);
        });
        mb.entity("FeaturedPost", |b| {
            b.has_base_type("Post");
            b.property::<i32>("Rank");
            b.has_data([seed! { "Id" => 1, "Rank" => 3 }]);
        });
        let rel = RelationalModel::from_model(&mb.build()).unwrap();
        assert_eq!(rel.tables.len(), 1);
        let table = &rel.tables[0];
        assert!(table.column("Rank").unwrap().nullable);
        assert!(table.column(DISCRIMINATOR_COLUMN).is_some());
        assert_eq!(
            table.seed_data[0].get(DISCRIMINATOR_COLUMN),
            Some(&Value::from("FeaturedPost"))
        );
    }

    #[test]
    fn test_owned_reference_is_table_split() {
        let mut mb = ModelBuilder::new();
        mb.entity("Customer", |b| {
            b.property::<i32>("Id");
            b.has_key(&["Id"]);
            b.owns_one("Address", "ShippingAddress", |b1| {
                b1.property::<i32>("CustomerId");
                b1.property::<String>("Street");
                b1.with_owner(&["CustomerId"]);
            });
        });
        let rel = RelationalModel::from_model(&mb.build()).unwrap();
        assert_eq!(rel.tables.len(), 1);
        let columns: Vec<&str> = rel.tables[0].columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(columns, vec!["Id", "ShippingAddress_Street"]);
    }

    #[test]
    fn test_owned_collection_gets_table() {
        let mut mb = ModelBuilder::new();
        mb.entity("Customer", |b| {
            b.property::<i32>("Id");
            b.has_key(&["Id"]);
            b.owns_many("Address", "Addresses", |b1| {
                b1.property::<i32>("CustomerId");
                b1.property::<i32>("Id");
                b1.has_key(&["CustomerId", "Id"]);
                b1.with_owner(&["CustomerId"]);
            });
        });
        let rel = RelationalModel::from_model(&mb.build()).unwrap();
        let addresses = rel.table(None, "Addresses").unwrap();
        assert_eq!(addresses.primary_key.as_ref().unwrap().columns.len(), 2);
        let fk = &addresses.foreign_keys[0];
        assert_eq!(fk.principal_table, "Customer");
        assert_eq!(fk.on_delete, ReferentialAction::Cascade);
        assert!(addresses.indexes.is_empty());
    }

    #[test]
    fn test_unknown_principal_is_error() {
        let mut model = blog_model(false);
        model.entity_mut("Post").unwrap().foreign_keys[0].properties = vec!["Missing".into()];
        let err = RelationalModel::from_model(&model).unwrap_err();
        assert!(matches!(err, ModelError::UnknownProperty { .. }));
    }

    #[test]
    fn test_default_schema_applies() {
        let mut mb = ModelBuilder::new();
        mb.default_schema("blogging");
        mb.entity("Blog", |b| {
            b.property::<i32>("Id");
            b.has_key(&["Id"]);
        });
        mb.has_sequence::<i64>("Ids");
        let rel = RelationalModel::from_model(&mb.build()).unwrap();
        assert_eq!(rel.tables[0].schema.as_deref(), Some("blogging"));
        assert_eq!(rel.sequences[0].schema.as_deref(), Some("blogging"));
        assert_eq!(rel.schemas().into_iter().collect::<Vec<_>>(), vec!["blogging"]);
    }
}
