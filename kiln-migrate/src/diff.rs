//! Relational model diffing.
//!
//! [`RelationalModelDiffer`] compares two [`RelationalModel`]s and produces
//! the operations that turn the first into the second. Operations come out
//! in dependency order: everything that removes structure runs before
//! anything that adds it, and created tables are ordered so that a
//! principal table exists before the tables that reference it.
//!
//! Renames are never detected; a renamed table or column shows up as a
//! drop followed by a create.

use std::collections::HashSet;

use indexmap::IndexMap;
use kiln_model::{
    Column, ForeignKeyConstraint, PrimaryKeyConstraint, RelationalModel, SmolStr, Table,
    TableIndex, UniqueConstraint, Value,
};
use kiln_model::{CheckConstraint, Sequence};
use tracing::debug;

use crate::operations::*;

/// Computes the operations between two relational models.
pub trait ModelDiffer: Send + Sync {
    /// Operations that turn `source` into `target`. A missing model is
    /// treated as an empty database.
    fn get_differences(
        &self,
        source: Option<&RelationalModel>,
        target: Option<&RelationalModel>,
    ) -> Vec<Operation>;

    /// Check whether the two models differ at all.
    fn has_differences(&self, source: Option<&RelationalModel>, target: Option<&RelationalModel>) -> bool {
        !self.get_differences(source, target).is_empty()
    }
}

/// The default differ.
#[derive(Debug, Clone, Default)]
pub struct RelationalModelDiffer;

impl RelationalModelDiffer {
    pub fn new() -> Self {
        Self
    }
}

impl ModelDiffer for RelationalModelDiffer {
    fn get_differences(
        &self,
        source: Option<&RelationalModel>,
        target: Option<&RelationalModel>,
    ) -> Vec<Operation> {
        let empty = RelationalModel::default();
        let source = source.unwrap_or(&empty);
        let target = target.unwrap_or(&empty);

        let mut diff = Diff::default();
        diff.schemas(source, target);
        diff.database(source, target);
        diff.sequences(&source.sequences, &target.sequences);
        diff.tables(source, target);

        let operations = diff.into_operations();
        debug!(count = operations.len(), "computed model differences");
        operations
    }
}

/// Operations bucketed by the phase they run in.
#[derive(Debug, Default)]
struct Diff {
    drop_foreign_keys: Vec<Operation>,
    drop_tables: Vec<Operation>,
    drops: Vec<Operation>,
    delete_data: Vec<Operation>,
    drop_columns: Vec<Operation>,
    ensure_schemas: Vec<Operation>,
    alter_database: Vec<Operation>,
    create_sequences: Vec<Operation>,
    alter_tables: Vec<Operation>,
    columns: Vec<Operation>,
    alters: Vec<Operation>,
    restart_sequences: Vec<Operation>,
    create_tables: Vec<CreateTable>,
    data: Vec<Operation>,
    constraints: Vec<Operation>,
}

impl Diff {
    fn into_operations(mut self) -> Vec<Operation> {
        let create_tables = sort_create_tables(
            std::mem::take(&mut self.create_tables),
            &mut self.constraints,
        );

        let mut operations = Vec::new();
        operations.append(&mut self.drop_foreign_keys);
        operations.append(&mut self.drop_tables);
        operations.append(&mut self.drops);
        operations.append(&mut self.delete_data);
        operations.append(&mut self.drop_columns);
        operations.append(&mut self.ensure_schemas);
        operations.append(&mut self.alter_database);
        operations.append(&mut self.create_sequences);
        operations.append(&mut self.alter_tables);
        operations.append(&mut self.columns);
        operations.append(&mut self.alters);
        operations.append(&mut self.restart_sequences);
        operations.extend(create_tables);
        operations.append(&mut self.data);
        operations.append(&mut self.constraints);
        operations
    }

    fn schemas(&mut self, source: &RelationalModel, target: &RelationalModel) {
        let existing = source.schemas();
        for schema in target.schemas() {
            if !existing.contains(schema) {
                self.ensure_schemas.push(
                    EnsureSchema {
                        name: schema.to_string(),
                    }
                    .into(),
                );
            }
        }
    }

    fn database(&mut self, source: &RelationalModel, target: &RelationalModel) {
        if source.annotations != target.annotations {
            self.alter_database.push(
                AlterDatabase {
                    collation: None,
                    old_collation: None,
                    annotations: target.annotations.clone(),
                    old_annotations: source.annotations.clone(),
                }
                .into(),
            );
        }
    }

    fn sequences(&mut self, source: &[Sequence], target: &[Sequence]) {
        let find = |list: &[Sequence], s: &Sequence| {
            list.iter()
                .find(|o| o.name == s.name && o.schema == s.schema)
                .cloned()
        };

        for old in source {
            let kept = find(target, old).is_some_and(|new| new.clr_type == old.clr_type);
            if !kept {
                self.drops.push(
                    DropSequence {
                        name: old.name.to_string(),
                        schema: opt(&old.schema),
                    }
                    .into(),
                );
            }
        }

        for new in target {
            let Some(old) = find(source, new).filter(|old| old.clr_type == new.clr_type) else {
                self.create_sequences.push(create_sequence(new).into());
                continue;
            };

            let (old_facet, new_facet) = (sequence_facet(&old), sequence_facet(new));
            if old_facet != new_facet {
                self.alters.push(
                    AlterSequence {
                        name: new.name.to_string(),
                        schema: opt(&new.schema),
                        sequence: new_facet,
                        old_sequence: old_facet,
                    }
                    .into(),
                );
            }
            if old.start_value != new.start_value {
                self.restart_sequences.push(
                    RestartSequence {
                        name: new.name.to_string(),
                        schema: opt(&new.schema),
                        start_value: Some(new.start_value),
                    }
                    .into(),
                );
            }
        }
    }

    fn tables(&mut self, source: &RelationalModel, target: &RelationalModel) {
        for old in &source.tables {
            if target.table(old.schema.as_deref(), &old.name).is_none() {
                self.drop_table(old);
            }
        }

        for new in &target.tables {
            match source.table(new.schema.as_deref(), &new.name) {
                Some(old) => self.alter_table(old, new),
                None => self.create_table(new),
            }
        }
    }

    fn drop_table(&mut self, table: &Table) {
        for fk in &table.foreign_keys {
            self.drop_foreign_keys.push(drop_foreign_key(table, fk));
        }
        self.drop_tables.push(
            DropTable {
                name: table.name.to_string(),
                schema: opt(&table.schema),
                annotations: table.annotations.clone(),
            }
            .into(),
        );
    }

    fn create_table(&mut self, table: &Table) {
        self.create_tables.push(CreateTable {
            name: table.name.to_string(),
            schema: opt(&table.schema),
            columns: table.columns.iter().map(|c| add_column(table, c)).collect(),
            primary_key: table.primary_key.as_ref().map(|pk| add_primary_key(table, pk)),
            unique_constraints: table
                .unique_constraints
                .iter()
                .map(|u| add_unique_constraint(table, u))
                .collect(),
            check_constraints: table
                .check_constraints
                .iter()
                .map(|c| add_check_constraint(table, c))
                .collect(),
            foreign_keys: table
                .foreign_keys
                .iter()
                .map(|fk| add_foreign_key(table, fk))
                .collect(),
            comment: table.comment.clone(),
            annotations: table.annotations.clone(),
        });

        for index in &table.indexes {
            self.constraints.push(create_index(table, index).into());
        }
        if let Some(insert) = insert_data(table, &table.seed_data.iter().collect::<Vec<_>>()) {
            self.data.push(insert.into());
        }
    }

    fn alter_table(&mut self, old: &Table, new: &Table) {
        if old.comment != new.comment || old.annotations != new.annotations {
            self.alter_tables.push(
                AlterTable {
                    name: new.name.to_string(),
                    schema: opt(&new.schema),
                    comment: new.comment.clone(),
                    old_comment: old.comment.clone(),
                    annotations: new.annotations.clone(),
                    old_annotations: old.annotations.clone(),
                }
                .into(),
            );
        }

        // Foreign keys first: a changed column may be part of one.
        for fk in &old.foreign_keys {
            if !new.foreign_keys.contains(fk) {
                self.drop_foreign_keys.push(drop_foreign_key(old, fk));
            }
        }
        for fk in &new.foreign_keys {
            if !old.foreign_keys.contains(fk) {
                self.constraints.push(add_foreign_key(new, fk).into());
            }
        }

        self.keys(old, new);
        self.indexes(old, new);
        self.table_columns(old, new);
        self.seed_data(old, new);
    }

    fn keys(&mut self, old: &Table, new: &Table) {
        if old.primary_key != new.primary_key {
            if let Some(pk) = &old.primary_key {
                self.drops.push(
                    DropPrimaryKey {
                        name: pk.name.to_string(),
                        schema: opt(&old.schema),
                        table: old.name.to_string(),
                    }
                    .into(),
                );
            }
            if let Some(pk) = &new.primary_key {
                self.constraints.push(add_primary_key(new, pk).into());
            }
        }

        for unique in &old.unique_constraints {
            if !new.unique_constraints.contains(unique) {
                self.drops.push(
                    DropUniqueConstraint {
                        name: unique.name.to_string(),
                        schema: opt(&old.schema),
                        table: old.name.to_string(),
                    }
                    .into(),
                );
            }
        }
        for unique in &new.unique_constraints {
            if !old.unique_constraints.contains(unique) {
                self.constraints.push(add_unique_constraint(new, unique).into());
            }
        }

        for check in &old.check_constraints {
            if !new.check_constraints.contains(check) {
                self.drops.push(
                    DropCheckConstraint {
                        name: check.name.to_string(),
                        schema: opt(&old.schema),
                        table: old.name.to_string(),
                    }
                    .into(),
                );
            }
        }
        for check in &new.check_constraints {
            if !old.check_constraints.contains(check) {
                self.constraints.push(add_check_constraint(new, check).into());
            }
        }
    }

    fn indexes(&mut self, old: &Table, new: &Table) {
        for index in &old.indexes {
            if !new.indexes.contains(index) {
                self.drops.push(
                    DropIndex {
                        name: index.name.to_string(),
                        schema: opt(&old.schema),
                        table: old.name.to_string(),
                    }
                    .into(),
                );
            }
        }
        for index in &new.indexes {
            if !old.indexes.contains(index) {
                self.constraints.push(create_index(new, index).into());
            }
        }
    }

    fn table_columns(&mut self, old: &Table, new: &Table) {
        for column in &old.columns {
            if new.column(&column.name).is_none() {
                self.drop_columns.push(
                    DropColumn {
                        name: column.name.to_string(),
                        schema: opt(&old.schema),
                        table: old.name.to_string(),
                        annotations: column.annotations.clone(),
                    }
                    .into(),
                );
            }
        }

        for column in &new.columns {
            let Some(previous) = old.column(&column.name) else {
                self.columns.push(add_column(new, column).into());
                continue;
            };
            let (old_facet, new_facet) = (facet(previous), facet(column));
            if old_facet != new_facet {
                let is_destructive_change = previous.store_type != column.store_type
                    || (previous.nullable && !column.nullable)
                    || shrinks(previous.max_length, column.max_length);
                self.alters.push(
                    AlterColumn {
                        name: column.name.to_string(),
                        schema: opt(&new.schema),
                        table: new.name.to_string(),
                        column: new_facet,
                        old_column: old_facet,
                        is_destructive_change,
                    }
                    .into(),
                );
            }
        }
    }

    fn seed_data(&mut self, old: &Table, new: &Table) {
        let Some(pk) = new.primary_key.as_ref().filter(|_| old.primary_key == new.primary_key) else {
            // A changed key makes rows incomparable; rewrite them all.
            if !old.seed_data.is_empty() {
                if let Some(delete) = delete_data(old, &old.seed_data.iter().collect::<Vec<_>>()) {
                    self.delete_data.push(delete.into());
                }
            }
            if let Some(insert) = insert_data(new, &new.seed_data.iter().collect::<Vec<_>>()) {
                self.data.push(insert.into());
            }
            return;
        };

        let key_of = |row: &IndexMap<SmolStr, Value>| -> Vec<Value> {
            pk.columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                .collect()
        };
        let find = |rows: &[IndexMap<SmolStr, Value>], key: &[Value]| {
            rows.iter().position(|r| key_of(r) == key)
        };

        let removed: Vec<_> = old
            .seed_data
            .iter()
            .filter(|row| find(&new.seed_data, &key_of(row)).is_none())
            .collect();
        if let Some(delete) = delete_data(old, &removed) {
            self.delete_data.push(delete.into());
        }

        let null = Value::Null;
        let mut added = Vec::new();
        for row in &new.seed_data {
            let key = key_of(row);
            let Some(position) = find(&old.seed_data, &key) else {
                added.push(row);
                continue;
            };
            let previous = &old.seed_data[position];
            // An absent value and an explicit null are the same row state.
            let changed: Vec<(&SmolStr, &Value)> = row
                .keys()
                .chain(previous.keys().filter(|column| !row.contains_key(*column)))
                .filter(|column| !pk.columns.contains(*column))
                .map(|column| (column, row.get(column).unwrap_or(&null)))
                .filter(|(column, value)| previous.get(*column).unwrap_or(&null) != *value)
                .collect();
            if changed.is_empty() {
                continue;
            }
            self.data.push(
                UpdateData {
                    schema: opt(&new.schema),
                    table: new.name.to_string(),
                    key_columns: strings(&pk.columns),
                    key_values: vec![key],
                    columns: changed.iter().map(|(c, _)| c.to_string()).collect(),
                    values: vec![changed.iter().map(|(_, v)| (*v).clone()).collect()],
                }
                .into(),
            );
        }
        if let Some(insert) = insert_data(new, &added) {
            self.data.push(insert.into());
        }
    }
}

/// Order created tables so principals come first.
///
/// When the remaining tables reference each other in a cycle, the first
/// one is created without the offending foreign keys, which are added
/// afterwards.
fn sort_create_tables(mut pending: Vec<CreateTable>, constraints: &mut Vec<Operation>) -> Vec<Operation> {
    let mut sorted = Vec::with_capacity(pending.len());
    let key = |schema: &Option<String>, name: &str| (schema.clone(), name.to_string());

    while !pending.is_empty() {
        let waiting: HashSet<(Option<String>, String)> =
            pending.iter().map(|t| key(&t.schema, &t.name)).collect();
        let blocked = |table: &CreateTable| {
            table.foreign_keys.iter().any(|fk| {
                let principal = key(&fk.principal_schema, &fk.principal_table);
                principal != key(&table.schema, &table.name) && waiting.contains(&principal)
            })
        };

        let next = match pending.iter().position(|t| !blocked(t)) {
            Some(position) => pending.remove(position),
            None => {
                let mut table = pending.remove(0);
                let own = key(&table.schema, &table.name);
                let (deferred, kept): (Vec<_>, Vec<_>) =
                    table.foreign_keys.drain(..).partition(|fk| {
                        let principal = key(&fk.principal_schema, &fk.principal_table);
                        principal != own && waiting.contains(&principal)
                    });
                table.foreign_keys = kept;
                constraints.splice(0..0, deferred.into_iter().map(Operation::from));
                table
            }
        };
        sorted.push(Operation::CreateTable(next));
    }
    sorted
}

fn opt(schema: &Option<SmolStr>) -> Option<String> {
    schema.as_ref().map(SmolStr::to_string)
}

fn strings(columns: &[SmolStr]) -> Vec<String> {
    columns.iter().map(SmolStr::to_string).collect()
}

fn shrinks(old: Option<i32>, new: Option<i32>) -> bool {
    match (old, new) {
        (None, Some(_)) => true,
        (Some(old), Some(new)) => new < old,
        _ => false,
    }
}

fn facet(column: &Column) -> ColumnFacet {
    ColumnFacet {
        clr_type: column.clr_type,
        column_type: Some(column.store_type.clone()),
        nullable: column.nullable,
        unicode: column.unicode,
        fixed_length: column.fixed_length,
        max_length: column.max_length,
        precision: column.precision,
        scale: column.scale,
        row_version: column.row_version,
        default_value: column.default_value.clone(),
        default_value_sql: column.default_value_sql.clone(),
        computed_column_sql: column.computed_column_sql.clone(),
        is_stored: column.is_stored,
        comment: column.comment.clone(),
        collation: column.collation.clone(),
        annotations: column.annotations.clone(),
    }
}

fn add_column(table: &Table, column: &Column) -> AddColumn {
    AddColumn {
        name: column.name.to_string(),
        schema: opt(&table.schema),
        table: table.name.to_string(),
        column: facet(column),
    }
}

fn add_primary_key(table: &Table, pk: &PrimaryKeyConstraint) -> AddPrimaryKey {
    AddPrimaryKey {
        name: pk.name.to_string(),
        schema: opt(&table.schema),
        table: table.name.to_string(),
        columns: strings(&pk.columns),
        annotations: pk.annotations.clone(),
    }
}

fn add_unique_constraint(table: &Table, unique: &UniqueConstraint) -> AddUniqueConstraint {
    AddUniqueConstraint {
        name: unique.name.to_string(),
        schema: opt(&table.schema),
        table: table.name.to_string(),
        columns: strings(&unique.columns),
        annotations: unique.annotations.clone(),
    }
}

fn add_check_constraint(table: &Table, check: &CheckConstraint) -> AddCheckConstraint {
    AddCheckConstraint {
        name: check.name.to_string(),
        schema: opt(&table.schema),
        table: table.name.to_string(),
        sql: check.sql.clone(),
        annotations: check.annotations.clone(),
    }
}

fn add_foreign_key(table: &Table, fk: &ForeignKeyConstraint) -> AddForeignKey {
    AddForeignKey {
        name: fk.name.to_string(),
        schema: opt(&table.schema),
        table: table.name.to_string(),
        columns: strings(&fk.columns),
        principal_schema: opt(&fk.principal_schema),
        principal_table: fk.principal_table.to_string(),
        principal_columns: strings(&fk.principal_columns),
        on_update: Default::default(),
        on_delete: fk.on_delete,
        annotations: fk.annotations.clone(),
    }
}

fn drop_foreign_key(table: &Table, fk: &ForeignKeyConstraint) -> Operation {
    DropForeignKey {
        name: fk.name.to_string(),
        schema: opt(&table.schema),
        table: table.name.to_string(),
    }
    .into()
}

fn create_index(table: &Table, index: &TableIndex) -> CreateIndex {
    CreateIndex {
        name: index.name.to_string(),
        schema: opt(&table.schema),
        table: table.name.to_string(),
        columns: strings(&index.columns),
        unique: index.unique,
        filter: index.filter.clone(),
        annotations: index.annotations.clone(),
    }
}

fn create_sequence(sequence: &Sequence) -> CreateSequence {
    CreateSequence {
        name: sequence.name.to_string(),
        schema: opt(&sequence.schema),
        clr_type: sequence.clr_type,
        start_value: sequence.start_value,
        sequence: sequence_facet(sequence),
    }
}

fn sequence_facet(sequence: &Sequence) -> SequenceFacet {
    SequenceFacet {
        increment_by: sequence.increment_by,
        min_value: sequence.min_value,
        max_value: sequence.max_value,
        cyclic: sequence.cyclic,
        annotations: sequence.annotations.clone(),
    }
}

/// Rows to insert, with columns in table order. Columns no row sets are
/// left out.
fn insert_data(table: &Table, rows: &[&IndexMap<SmolStr, Value>]) -> Option<InsertData> {
    if rows.is_empty() {
        return None;
    }
    let columns: Vec<&SmolStr> = table
        .columns
        .iter()
        .map(|c| &c.name)
        .filter(|name| rows.iter().any(|row| row.contains_key(*name)))
        .collect();
    let values = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(*c).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    Some(InsertData {
        schema: opt(&table.schema),
        table: table.name.to_string(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        values,
    })
}

fn delete_data(table: &Table, rows: &[&IndexMap<SmolStr, Value>]) -> Option<DeleteData> {
    let pk = table.primary_key.as_ref()?;
    if rows.is_empty() {
        return None;
    }
    Some(DeleteData {
        schema: opt(&table.schema),
        table: table.name.to_string(),
        key_columns: strings(&pk.columns),
        key_values: rows
            .iter()
            .map(|row| {
                pk.columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect(),
    })
}
