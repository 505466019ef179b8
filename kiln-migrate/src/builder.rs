//! The fluent surface migrations are written against.
//!
//! Every method here has a one-to-one counterpart in generated migration
//! code, so hand-written and generated migrations read the same:
//!
//! ```rust
//! use kiln_migrate::MigrationBuilder;
//!
//! let mut migration_builder = MigrationBuilder::new("postgresql");
//! migration_builder
//!     .add_column::<String>("Note")
//!     .table("Blogs")
//!     .column_type("text")
//!     .nullable(true);
//! assert_eq!(migration_builder.operations().len(), 1);
//! ```
//!
//! Each `OperationBuilder` records its operation when it is dropped, which
//! is at the end of the statement for a chained call.

use kiln_model::{ClrType, ClrTyped, ReferentialAction, Value};

use crate::operations::*;

fn strings<C: AsRef<str>>(items: &[C]) -> Vec<String> {
    items.iter().map(|c| c.as_ref().to_string()).collect()
}

/// Spread a flat value list over the columns: one row per value for a
/// single column, otherwise a single row.
pub(crate) fn shape(columns: &[String], values: Vec<Value>) -> Vec<Vec<Value>> {
    if columns.len() == 1 {
        values.into_iter().map(|v| vec![v]).collect()
    } else {
        vec![values]
    }
}

/// Build a value list for data operations.
///
/// ```rust
/// use kiln_migrate::values;
/// use kiln_model::Value;
///
/// let row = values![1, "First", Value::Null];
/// assert_eq!(row.len(), 3);
/// ```
#[macro_export]
macro_rules! values {
    ($($value:expr),* $(,)?) => {
        ::std::vec![$(::kiln_model::Value::from($value)),*]
    };
}

/// Build a row grid for data operations.
///
/// ```rust
/// use kiln_migrate::rows;
///
/// let grid = rows![[1, "First"], [2, "Second"]];
/// assert_eq!(grid.len(), 2);
/// ```
#[macro_export]
macro_rules! rows {
    ($([$($value:expr),* $(,)?]),* $(,)?) => {
        ::std::vec![$($crate::values![$($value),*]),*]
    };
}

/// Collects the operations of one migration direction.
#[derive(Debug, Clone, Default)]
pub struct MigrationBuilder {
    active_provider: Option<String>,
    operations: Vec<Operation>,
}

/// A pending operation, recorded into its sink when dropped.
#[derive(Debug)]
pub struct OperationBuilder<'a, T, S = Operation>
where
    T: Into<S>,
{
    sink: &'a mut Vec<S>,
    op: Option<T>,
}

impl<'a, T, S> OperationBuilder<'a, T, S>
where
    T: Into<S>,
{
    fn new(sink: &'a mut Vec<S>, op: T) -> Self {
        Self { sink, op: Some(op) }
    }

    fn with(mut self, f: impl FnOnce(&mut T)) -> Self {
        if let Some(op) = self.op.as_mut() {
            f(op);
        }
        self
    }
}

impl<'a, T, S> Drop for OperationBuilder<'a, T, S>
where
    T: Into<S>,
{
    fn drop(&mut self) {
        if let Some(op) = self.op.take() {
            self.sink.push(op.into());
        }
    }
}

macro_rules! setters {
    ($t:ty { $($method:ident($arg:ident: $argty:ty) => $($field:ident).+ = $value:expr;)* }) => {
        impl<'a, S> OperationBuilder<'a, $t, S>
        where
            $t: Into<S>,
        {
            $(
                pub fn $method(self, $arg: $argty) -> Self {
                    self.with(|op| op.$($field).+ = $value)
                }
            )*
        }
    };
}

macro_rules! annotation_setter {
    ($t:ty => $($field:ident).+) => {
        impl<'a, S> OperationBuilder<'a, $t, S>
        where
            $t: Into<S>,
        {
            pub fn annotation(self, name: &str, value: impl Into<Value>) -> Self {
                self.with(|op| op.$($field).+.set(name, value))
            }
        }
    };
    ($t:ty => $($field:ident).+, old: $($old:ident).+) => {
        annotation_setter!($t => $($field).+);

        impl<'a, S> OperationBuilder<'a, $t, S>
        where
            $t: Into<S>,
        {
            pub fn old_annotation(self, name: &str, value: impl Into<Value>) -> Self {
                self.with(|op| op.$($old).+.set(name, value))
            }
        }
    };
}

macro_rules! column_setters {
    ($t:ty) => {
        impl<'a, S> OperationBuilder<'a, $t, S>
        where
            $t: Into<S>,
        {
            pub fn column(self, column: &str) -> Self {
                self.with(|op| op.columns = vec![column.to_string()])
            }

            pub fn columns<C: AsRef<str>>(self, columns: &[C]) -> Self {
                self.with(|op| op.columns = strings(columns))
            }
        }
    };
}

impl MigrationBuilder {
    /// Create a builder for the given active provider.
    pub fn new(active_provider: impl Into<String>) -> Self {
        Self {
            active_provider: Some(active_provider.into()),
            operations: Vec::new(),
        }
    }

    /// The active provider name, if any.
    pub fn active_provider(&self) -> Option<&str> {
        self.active_provider.as_deref()
    }

    /// Check whether the active provider matches `name`.
    pub fn is_provider(&self, name: &str) -> bool {
        self.active_provider
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case(name))
    }

    /// Operations recorded so far.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Take the recorded operations.
    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    /// The operation recorded last.
    pub(crate) fn last_operation_mut(&mut self) -> Option<&mut Operation> {
        self.operations.last_mut()
    }

    /// Record a pre-built operation.
    pub fn push(&mut self, operation: impl Into<Operation>) -> &mut Self {
        self.operations.push(operation.into());
        self
    }

    fn start<T: Into<Operation>>(&mut self, op: T) -> OperationBuilder<'_, T> {
        OperationBuilder::new(&mut self.operations, op)
    }

    pub fn add_column<T: ClrTyped>(&mut self, name: &str) -> OperationBuilder<'_, AddColumn> {
        let mut column = ColumnFacet::new(T::CLR_TYPE);
        column.nullable = T::NULLABLE;
        self.start(AddColumn {
            name: name.to_string(),
            schema: None,
            table: String::new(),
            column,
        })
    }

    /// `add_column` with the type given at runtime.
    pub fn add_column_of(&mut self, name: &str, clr_type: ClrType) -> OperationBuilder<'_, AddColumn> {
        self.start(AddColumn {
            name: name.to_string(),
            schema: None,
            table: String::new(),
            column: ColumnFacet::new(clr_type),
        })
    }

    pub fn alter_column<T: ClrTyped>(&mut self, name: &str) -> OperationBuilder<'_, AlterColumn> {
        self.alter_column_of(name, T::CLR_TYPE)
    }

    /// `alter_column` with the type given at runtime.
    pub fn alter_column_of(&mut self, name: &str, clr_type: ClrType) -> OperationBuilder<'_, AlterColumn> {
        self.start(AlterColumn {
            name: name.to_string(),
            schema: None,
            table: String::new(),
            column: ColumnFacet::new(clr_type),
            old_column: ColumnFacet::new(clr_type),
            is_destructive_change: false,
        })
    }

    pub fn drop_column(&mut self, name: &str) -> OperationBuilder<'_, DropColumn> {
        self.start(DropColumn {
            name: name.to_string(),
            schema: None,
            table: String::new(),
            annotations: Default::default(),
        })
    }

    pub fn rename_column(&mut self, name: &str) -> OperationBuilder<'_, RenameColumn> {
        self.start(RenameColumn {
            name: name.to_string(),
            schema: None,
            table: String::new(),
            new_name: String::new(),
        })
    }

    pub fn add_foreign_key(&mut self, name: &str) -> OperationBuilder<'_, AddForeignKey> {
        self.start(new_foreign_key(name))
    }

    pub fn add_primary_key(&mut self, name: &str) -> OperationBuilder<'_, AddPrimaryKey> {
        self.start(new_primary_key(name))
    }

    pub fn add_unique_constraint(&mut self, name: &str) -> OperationBuilder<'_, AddUniqueConstraint> {
        self.start(new_unique_constraint(name))
    }

    pub fn add_check_constraint(&mut self, name: &str) -> OperationBuilder<'_, AddCheckConstraint> {
        self.start(new_check_constraint(name))
    }

    pub fn alter_database(&mut self) -> OperationBuilder<'_, AlterDatabase> {
        self.start(AlterDatabase::default())
    }

    pub fn alter_sequence(&mut self, name: &str) -> OperationBuilder<'_, AlterSequence> {
        self.start(AlterSequence {
            name: name.to_string(),
            schema: None,
            sequence: SequenceFacet::default(),
            old_sequence: SequenceFacet::default(),
        })
    }

    pub fn alter_table(&mut self, name: &str) -> OperationBuilder<'_, AlterTable> {
        self.start(AlterTable {
            name: name.to_string(),
            schema: None,
            comment: None,
            old_comment: None,
            annotations: Default::default(),
            old_annotations: Default::default(),
        })
    }

    pub fn create_index(&mut self, name: &str) -> OperationBuilder<'_, CreateIndex> {
        self.start(CreateIndex {
            name: name.to_string(),
            schema: None,
            table: String::new(),
            columns: Vec::new(),
            unique: false,
            filter: None,
            annotations: Default::default(),
        })
    }

    pub fn create_sequence<T: ClrTyped>(&mut self, name: &str) -> OperationBuilder<'_, CreateSequence> {
        self.create_sequence_of(name, T::CLR_TYPE)
    }

    /// `create_sequence` with the type given at runtime.
    pub fn create_sequence_of(&mut self, name: &str, clr_type: ClrType) -> OperationBuilder<'_, CreateSequence> {
        self.start(CreateSequence {
            name: name.to_string(),
            schema: None,
            clr_type,
            start_value: 1,
            sequence: SequenceFacet::default(),
        })
    }

    pub fn create_table(&mut self, name: &str) -> OperationBuilder<'_, CreateTable> {
        self.start(CreateTable {
            name: name.to_string(),
            schema: None,
            columns: Vec::new(),
            primary_key: None,
            unique_constraints: Vec::new(),
            check_constraints: Vec::new(),
            foreign_keys: Vec::new(),
            comment: None,
            annotations: Default::default(),
        })
    }

    pub fn ensure_schema(&mut self, name: &str) -> OperationBuilder<'_, EnsureSchema> {
        self.start(EnsureSchema {
            name: name.to_string(),
        })
    }

    pub fn drop_foreign_key(&mut self, name: &str) -> OperationBuilder<'_, DropForeignKey> {
        self.start(DropForeignKey {
            name: name.to_string(),
            schema: None,
            table: String::new(),
        })
    }

    pub fn drop_index(&mut self, name: &str) -> OperationBuilder<'_, DropIndex> {
        self.start(DropIndex {
            name: name.to_string(),
            schema: None,
            table: String::new(),
        })
    }

    pub fn drop_primary_key(&mut self, name: &str) -> OperationBuilder<'_, DropPrimaryKey> {
        self.start(DropPrimaryKey {
            name: name.to_string(),
            schema: None,
            table: String::new(),
        })
    }

    pub fn drop_schema(&mut self, name: &str) -> OperationBuilder<'_, DropSchema> {
        self.start(DropSchema {
            name: name.to_string(),
        })
    }

    pub fn drop_sequence(&mut self, name: &str) -> OperationBuilder<'_, DropSequence> {
        self.start(DropSequence {
            name: name.to_string(),
            schema: None,
        })
    }

    pub fn drop_table(&mut self, name: &str) -> OperationBuilder<'_, DropTable> {
        self.start(DropTable {
            name: name.to_string(),
            schema: None,
            annotations: Default::default(),
        })
    }

    pub fn drop_unique_constraint(&mut self, name: &str) -> OperationBuilder<'_, DropUniqueConstraint> {
        self.start(DropUniqueConstraint {
            name: name.to_string(),
            schema: None,
            table: String::new(),
        })
    }

    pub fn drop_check_constraint(&mut self, name: &str) -> OperationBuilder<'_, DropCheckConstraint> {
        self.start(DropCheckConstraint {
            name: name.to_string(),
            schema: None,
            table: String::new(),
        })
    }

    pub fn rename_index(&mut self, name: &str) -> OperationBuilder<'_, RenameIndex> {
        self.start(RenameIndex {
            name: name.to_string(),
            schema: None,
            table: String::new(),
            new_name: String::new(),
        })
    }

    pub fn rename_sequence(&mut self, name: &str) -> OperationBuilder<'_, RenameSequence> {
        self.start(RenameSequence {
            name: name.to_string(),
            schema: None,
            new_name: None,
            new_schema: None,
        })
    }

    pub fn rename_table(&mut self, name: &str) -> OperationBuilder<'_, RenameTable> {
        self.start(RenameTable {
            name: name.to_string(),
            schema: None,
            new_name: None,
            new_schema: None,
        })
    }

    pub fn restart_sequence(&mut self, name: &str) -> OperationBuilder<'_, RestartSequence> {
        self.start(RestartSequence {
            name: name.to_string(),
            schema: None,
            start_value: None,
        })
    }

    /// Run raw SQL.
    pub fn sql(&mut self, sql: &str) -> OperationBuilder<'_, Sql> {
        self.start(Sql {
            sql: sql.to_string(),
            suppress_transaction: false,
        })
    }

    pub fn insert_data(&mut self, table: &str) -> OperationBuilder<'_, InsertData> {
        self.start(InsertData {
            schema: None,
            table: table.to_string(),
            columns: Vec::new(),
            values: Vec::new(),
        })
    }

    pub fn delete_data(&mut self, table: &str) -> OperationBuilder<'_, DeleteData> {
        self.start(DeleteData {
            schema: None,
            table: table.to_string(),
            key_columns: Vec::new(),
            key_values: Vec::new(),
        })
    }

    pub fn update_data(&mut self, table: &str) -> OperationBuilder<'_, UpdateData> {
        self.start(UpdateData {
            schema: None,
            table: table.to_string(),
            key_columns: Vec::new(),
            key_values: Vec::new(),
            columns: Vec::new(),
            values: Vec::new(),
        })
    }
}

pub(crate) fn new_foreign_key(name: &str) -> AddForeignKey {
    AddForeignKey {
        name: name.to_string(),
        schema: None,
        table: String::new(),
        columns: Vec::new(),
        principal_schema: None,
        principal_table: String::new(),
        principal_columns: Vec::new(),
        on_update: ReferentialAction::NoAction,
        on_delete: ReferentialAction::NoAction,
        annotations: Default::default(),
    }
}

pub(crate) fn new_primary_key(name: &str) -> AddPrimaryKey {
    AddPrimaryKey {
        name: name.to_string(),
        schema: None,
        table: String::new(),
        columns: Vec::new(),
        annotations: Default::default(),
    }
}

pub(crate) fn new_unique_constraint(name: &str) -> AddUniqueConstraint {
    AddUniqueConstraint {
        name: name.to_string(),
        schema: None,
        table: String::new(),
        columns: Vec::new(),
        annotations: Default::default(),
    }
}

pub(crate) fn new_check_constraint(name: &str) -> AddCheckConstraint {
    AddCheckConstraint {
        name: name.to_string(),
        schema: None,
        table: String::new(),
        sql: String::new(),
        annotations: Default::default(),
    }
}

setters!(AddColumn {
    schema(schema: &str) => schema = Some(schema.to_string());
    table(table: &str) => table = table.to_string();
    column_type(store_type: &str) => column.column_type = Some(store_type.to_string());
    nullable(nullable: bool) => column.nullable = nullable;
    unicode(unicode: bool) => column.unicode = Some(unicode);
    fixed_length(fixed: bool) => column.fixed_length = Some(fixed);
    max_length(max_length: i32) => column.max_length = Some(max_length);
    precision(precision: i32) => column.precision = Some(precision);
    scale(scale: i32) => column.scale = Some(scale);
    row_version(row_version: bool) => column.row_version = row_version;
    default_value(value: impl Into<Value>) => column.default_value = Some(value.into());
    default_value_sql(sql: &str) => column.default_value_sql = Some(sql.to_string());
    computed_column_sql(sql: &str) => column.computed_column_sql = Some(sql.to_string());
    stored(stored: bool) => column.is_stored = Some(stored);
    comment(comment: &str) => column.comment = Some(comment.to_string());
    collation(collation: &str) => column.collation = Some(collation.to_string());
});
annotation_setter!(AddColumn => column.annotations);

setters!(AlterColumn {
    schema(schema: &str) => schema = Some(schema.to_string());
    table(table: &str) => table = table.to_string();
    column_type(store_type: &str) => column.column_type = Some(store_type.to_string());
    nullable(nullable: bool) => column.nullable = nullable;
    unicode(unicode: bool) => column.unicode = Some(unicode);
    fixed_length(fixed: bool) => column.fixed_length = Some(fixed);
    max_length(max_length: i32) => column.max_length = Some(max_length);
    precision(precision: i32) => column.precision = Some(precision);
    scale(scale: i32) => column.scale = Some(scale);
    row_version(row_version: bool) => column.row_version = row_version;
    default_value(value: impl Into<Value>) => column.default_value = Some(value.into());
    default_value_sql(sql: &str) => column.default_value_sql = Some(sql.to_string());
    computed_column_sql(sql: &str) => column.computed_column_sql = Some(sql.to_string());
    stored(stored: bool) => column.is_stored = Some(stored);
    comment(comment: &str) => column.comment = Some(comment.to_string());
    collation(collation: &str) => column.collation = Some(collation.to_string());
    old_clr_type_of(clr_type: ClrType) => old_column.clr_type = clr_type;
    old_column_type(store_type: &str) => old_column.column_type = Some(store_type.to_string());
    old_nullable(nullable: bool) => old_column.nullable = nullable;
    old_unicode(unicode: bool) => old_column.unicode = Some(unicode);
    old_fixed_length(fixed: bool) => old_column.fixed_length = Some(fixed);
    old_max_length(max_length: i32) => old_column.max_length = Some(max_length);
    old_precision(precision: i32) => old_column.precision = Some(precision);
    old_scale(scale: i32) => old_column.scale = Some(scale);
    old_row_version(row_version: bool) => old_column.row_version = row_version;
    old_default_value(value: impl Into<Value>) => old_column.default_value = Some(value.into());
    old_default_value_sql(sql: &str) => old_column.default_value_sql = Some(sql.to_string());
    old_computed_column_sql(sql: &str) => old_column.computed_column_sql = Some(sql.to_string());
    old_stored(stored: bool) => old_column.is_stored = Some(stored);
    old_comment(comment: &str) => old_column.comment = Some(comment.to_string());
    old_collation(collation: &str) => old_column.collation = Some(collation.to_string());
});
annotation_setter!(AlterColumn => column.annotations, old: old_column.annotations);

impl<'a> OperationBuilder<'a, AlterColumn> {
    /// Set the previous column type.
    pub fn old_clr_type<T: ClrTyped>(self) -> Self {
        self.old_clr_type_of(T::CLR_TYPE)
    }
}

setters!(DropColumn {
    schema(schema: &str) => schema = Some(schema.to_string());
    table(table: &str) => table = table.to_string();
});
annotation_setter!(DropColumn => annotations);

setters!(RenameColumn {
    schema(schema: &str) => schema = Some(schema.to_string());
    table(table: &str) => table = table.to_string();
    new_name(new_name: &str) => new_name = new_name.to_string();
});

setters!(AddForeignKey {
    schema(schema: &str) => schema = Some(schema.to_string());
    table(table: &str) => table = table.to_string();
    principal_schema(schema: &str) => principal_schema = Some(schema.to_string());
    principal_table(table: &str) => principal_table = table.to_string();
    on_update(action: ReferentialAction) => on_update = action;
    on_delete(action: ReferentialAction) => on_delete = action;
});
column_setters!(AddForeignKey);
annotation_setter!(AddForeignKey => annotations);

impl<'a, S> OperationBuilder<'a, AddForeignKey, S>
where
    AddForeignKey: Into<S>,
{
    pub fn principal_column(self, column: &str) -> Self {
        self.with(|op| op.principal_columns = vec![column.to_string()])
    }

    pub fn principal_columns<C: AsRef<str>>(self, columns: &[C]) -> Self {
        self.with(|op| op.principal_columns = strings(columns))
    }
}

setters!(AddPrimaryKey {
    schema(schema: &str) => schema = Some(schema.to_string());
    table(table: &str) => table = table.to_string();
});
column_setters!(AddPrimaryKey);
annotation_setter!(AddPrimaryKey => annotations);

setters!(AddUniqueConstraint {
    schema(schema: &str) => schema = Some(schema.to_string());
    table(table: &str) => table = table.to_string();
});
column_setters!(AddUniqueConstraint);
annotation_setter!(AddUniqueConstraint => annotations);

setters!(AddCheckConstraint {
    schema(schema: &str) => schema = Some(schema.to_string());
    table(table: &str) => table = table.to_string();
    sql(sql: &str) => sql = sql.to_string();
});
annotation_setter!(AddCheckConstraint => annotations);

setters!(AlterDatabase {
    collation(collation: &str) => collation = Some(collation.to_string());
    old_collation(collation: &str) => old_collation = Some(collation.to_string());
});
annotation_setter!(AlterDatabase => annotations, old: old_annotations);

setters!(AlterSequence {
    schema(schema: &str) => schema = Some(schema.to_string());
    increment_by(increment: i32) => sequence.increment_by = increment;
    min_value(min: i64) => sequence.min_value = Some(min);
    max_value(max: i64) => sequence.max_value = Some(max);
    cyclic(cyclic: bool) => sequence.cyclic = cyclic;
    old_increment_by(increment: i32) => old_sequence.increment_by = increment;
    old_min_value(min: i64) => old_sequence.min_value = Some(min);
    old_max_value(max: i64) => old_sequence.max_value = Some(max);
    old_cyclic(cyclic: bool) => old_sequence.cyclic = cyclic;
});
annotation_setter!(AlterSequence => sequence.annotations, old: old_sequence.annotations);

setters!(AlterTable {
    schema(schema: &str) => schema = Some(schema.to_string());
    comment(comment: &str) => comment = Some(comment.to_string());
    old_comment(comment: &str) => old_comment = Some(comment.to_string());
});
annotation_setter!(AlterTable => annotations, old: old_annotations);

setters!(CreateIndex {
    schema(schema: &str) => schema = Some(schema.to_string());
    table(table: &str) => table = table.to_string();
    unique(unique: bool) => unique = unique;
    filter(sql: &str) => filter = Some(sql.to_string());
});
column_setters!(CreateIndex);
annotation_setter!(CreateIndex => annotations);

setters!(CreateSequence {
    schema(schema: &str) => schema = Some(schema.to_string());
    start_value(start: i64) => start_value = start;
    increment_by(increment: i32) => sequence.increment_by = increment;
    min_value(min: i64) => sequence.min_value = Some(min);
    max_value(max: i64) => sequence.max_value = Some(max);
    cyclic(cyclic: bool) => sequence.cyclic = cyclic;
});
annotation_setter!(CreateSequence => sequence.annotations);

setters!(DropForeignKey {
    schema(schema: &str) => schema = Some(schema.to_string());
    table(table: &str) => table = table.to_string();
});

setters!(DropIndex {
    schema(schema: &str) => schema = Some(schema.to_string());
    table(table: &str) => table = table.to_string();
});

setters!(DropPrimaryKey {
    schema(schema: &str) => schema = Some(schema.to_string());
    table(table: &str) => table = table.to_string();
});

setters!(DropSequence {
    schema(schema: &str) => schema = Some(schema.to_string());
});

setters!(DropTable {
    schema(schema: &str) => schema = Some(schema.to_string());
});
annotation_setter!(DropTable => annotations);

setters!(DropUniqueConstraint {
    schema(schema: &str) => schema = Some(schema.to_string());
    table(table: &str) => table = table.to_string();
});

setters!(DropCheckConstraint {
    schema(schema: &str) => schema = Some(schema.to_string());
    table(table: &str) => table = table.to_string();
});

setters!(RenameIndex {
    schema(schema: &str) => schema = Some(schema.to_string());
    table(table: &str) => table = table.to_string();
    new_name(new_name: &str) => new_name = new_name.to_string();
});

setters!(RenameSequence {
    schema(schema: &str) => schema = Some(schema.to_string());
    new_name(new_name: &str) => new_name = Some(new_name.to_string());
    new_schema(new_schema: &str) => new_schema = Some(new_schema.to_string());
});

setters!(RenameTable {
    schema(schema: &str) => schema = Some(schema.to_string());
    new_name(new_name: &str) => new_name = Some(new_name.to_string());
    new_schema(new_schema: &str) => new_schema = Some(new_schema.to_string());
});

setters!(RestartSequence {
    schema(schema: &str) => schema = Some(schema.to_string());
    start_value(start: i64) => start_value = Some(start);
});

setters!(Sql {
    suppress_transaction(suppress: bool) => suppress_transaction = suppress;
});

setters!(InsertData {
    schema(schema: &str) => schema = Some(schema.to_string());
    value(value: impl Into<Value>) => values = vec![vec![value.into()]];
    rows(rows: Vec<Vec<Value>>) => values = rows;
});
column_setters!(InsertData);

impl<'a> OperationBuilder<'a, InsertData> {
    pub fn values(self, values: Vec<Value>) -> Self {
        self.with(|op| op.values = shape(&op.columns, values))
    }
}

setters!(DeleteData {
    schema(schema: &str) => schema = Some(schema.to_string());
    key_value(value: impl Into<Value>) => key_values = vec![vec![value.into()]];
    key_rows(rows: Vec<Vec<Value>>) => key_values = rows;
});

impl<'a> OperationBuilder<'a, DeleteData> {
    pub fn key_column(self, column: &str) -> Self {
        self.with(|op| op.key_columns = vec![column.to_string()])
    }

    pub fn key_columns<C: AsRef<str>>(self, columns: &[C]) -> Self {
        self.with(|op| op.key_columns = strings(columns))
    }

    pub fn key_values(self, values: Vec<Value>) -> Self {
        self.with(|op| op.key_values = shape(&op.key_columns, values))
    }
}

setters!(UpdateData {
    schema(schema: &str) => schema = Some(schema.to_string());
    key_value(value: impl Into<Value>) => key_values = vec![vec![value.into()]];
    key_rows(rows: Vec<Vec<Value>>) => key_values = rows;
    value(value: impl Into<Value>) => values = vec![vec![value.into()]];
    rows(rows: Vec<Vec<Value>>) => values = rows;
});
column_setters!(UpdateData);

impl<'a> OperationBuilder<'a, UpdateData> {
    pub fn key_column(self, column: &str) -> Self {
        self.with(|op| op.key_columns = vec![column.to_string()])
    }

    pub fn key_columns<C: AsRef<str>>(self, columns: &[C]) -> Self {
        self.with(|op| op.key_columns = strings(columns))
    }

    pub fn key_values(self, values: Vec<Value>) -> Self {
        self.with(|op| op.key_values = shape(&op.key_columns, values))
    }

    pub fn values(self, values: Vec<Value>) -> Self {
        self.with(|op| op.values = shape(&op.columns, values))
    }
}

/// A constraint declared inside `create_table(..).constraints(..)`.
#[derive(Debug, Clone, PartialEq)]
pub enum TableConstraint {
    PrimaryKey(AddPrimaryKey),
    Unique(AddUniqueConstraint),
    Check(AddCheckConstraint),
    ForeignKey(AddForeignKey),
}

impl From<AddPrimaryKey> for TableConstraint {
    fn from(op: AddPrimaryKey) -> Self {
        Self::PrimaryKey(op)
    }
}

impl From<AddUniqueConstraint> for TableConstraint {
    fn from(op: AddUniqueConstraint) -> Self {
        Self::Unique(op)
    }
}

impl From<AddCheckConstraint> for TableConstraint {
    fn from(op: AddCheckConstraint) -> Self {
        Self::Check(op)
    }
}

impl From<AddForeignKey> for TableConstraint {
    fn from(op: AddForeignKey) -> Self {
        Self::ForeignKey(op)
    }
}

/// Column declarations of a table being created.
#[derive(Debug, Default)]
pub struct ColumnsBuilder {
    columns: Vec<AddColumn>,
}

impl ColumnsBuilder {
    pub fn column<T: ClrTyped>(&mut self, name: &str) -> OperationBuilder<'_, AddColumn, AddColumn> {
        let mut column = ColumnFacet::new(T::CLR_TYPE);
        column.nullable = T::NULLABLE;
        self.push(name, column)
    }

    /// `column` with the type given at runtime.
    pub fn column_of(&mut self, name: &str, clr_type: ClrType) -> OperationBuilder<'_, AddColumn, AddColumn> {
        self.push(name, ColumnFacet::new(clr_type))
    }

    fn push(&mut self, name: &str, column: ColumnFacet) -> OperationBuilder<'_, AddColumn, AddColumn> {
        OperationBuilder::new(
            &mut self.columns,
            AddColumn {
                name: name.to_string(),
                schema: None,
                table: String::new(),
                column,
            },
        )
    }
}

/// Constraint declarations of a table being created.
#[derive(Debug, Default)]
pub struct ConstraintsBuilder {
    constraints: Vec<TableConstraint>,
}

impl ConstraintsBuilder {
    pub fn primary_key(&mut self, name: &str) -> OperationBuilder<'_, AddPrimaryKey, TableConstraint> {
        OperationBuilder::new(&mut self.constraints, new_primary_key(name))
    }

    pub fn unique_constraint(&mut self, name: &str) -> OperationBuilder<'_, AddUniqueConstraint, TableConstraint> {
        OperationBuilder::new(&mut self.constraints, new_unique_constraint(name))
    }

    pub fn check_constraint(&mut self, name: &str, sql: &str) -> OperationBuilder<'_, AddCheckConstraint, TableConstraint> {
        let mut op = new_check_constraint(name);
        op.sql = sql.to_string();
        OperationBuilder::new(&mut self.constraints, op)
    }

    pub fn foreign_key(&mut self, name: &str) -> OperationBuilder<'_, AddForeignKey, TableConstraint> {
        OperationBuilder::new(&mut self.constraints, new_foreign_key(name))
    }
}

setters!(CreateTable {
    comment(comment: &str) => comment = Some(comment.to_string());
});
annotation_setter!(CreateTable => annotations);

impl<'a> OperationBuilder<'a, CreateTable> {
    /// Place the table in a schema.
    pub fn schema(self, schema: &str) -> Self {
        self.with(|op| {
            op.schema = Some(schema.to_string());
            stamp_table(op);
        })
    }

    /// Declare the columns.
    pub fn columns(self, declare: impl FnOnce(&mut ColumnsBuilder)) -> Self {
        let mut builder = ColumnsBuilder::default();
        declare(&mut builder);
        self.with(|op| {
            op.columns.extend(builder.columns);
            stamp_table(op);
        })
    }

    /// Declare the constraints.
    pub fn constraints(self, declare: impl FnOnce(&mut ConstraintsBuilder)) -> Self {
        let mut builder = ConstraintsBuilder::default();
        declare(&mut builder);
        self.with(|op| {
            for constraint in builder.constraints {
                match constraint {
                    TableConstraint::PrimaryKey(pk) => op.primary_key = Some(pk),
                    TableConstraint::Unique(u) => op.unique_constraints.push(u),
                    TableConstraint::Check(c) => op.check_constraints.push(c),
                    TableConstraint::ForeignKey(fk) => op.foreign_keys.push(fk),
                }
            }
            stamp_table(op);
        })
    }
}

/// Copy the table name and schema onto nested declarations.
pub(crate) fn stamp_table(op: &mut CreateTable) {
    for column in &mut op.columns {
        column.table = op.name.clone();
        column.schema = op.schema.clone();
    }
    if let Some(pk) = op.primary_key.as_mut() {
        pk.table = op.name.clone();
        pk.schema = op.schema.clone();
    }
    for u in &mut op.unique_constraints {
        u.table = op.name.clone();
        u.schema = op.schema.clone();
    }
    for c in &mut op.check_constraints {
        c.table = op.name.clone();
        c.schema = op.schema.clone();
    }
    for fk in &mut op.foreign_keys {
        fk.table = op.name.clone();
        fk.schema = op.schema.clone();
    }
}
