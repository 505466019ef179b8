//! Schema-change operations.
//!
//! An [`Operation`] is one step of a migration. The set of kinds is closed;
//! every consumer (code emitter, SQL generator, compiler lowering) matches
//! on it exhaustively.

use kiln_model::{Annotations, ClrType, ReferentialAction, Value};
use serde::{Deserialize, Serialize};

/// The state of a column as seen by an add or alter operation.
///
/// An [`AlterColumn`] carries two of these, so the same record yields the
/// reverse operation by swapping them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFacet {
    pub clr_type: ClrType,
    pub column_type: Option<String>,
    pub nullable: bool,
    pub unicode: Option<bool>,
    pub fixed_length: Option<bool>,
    pub max_length: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
    pub row_version: bool,
    pub default_value: Option<Value>,
    pub default_value_sql: Option<String>,
    pub computed_column_sql: Option<String>,
    pub is_stored: Option<bool>,
    pub comment: Option<String>,
    pub collation: Option<String>,
    pub annotations: Annotations,
}

impl ColumnFacet {
    /// A facet with every optional setting left at its default.
    pub fn new(clr_type: ClrType) -> Self {
        Self {
            clr_type,
            column_type: None,
            nullable: false,
            unicode: None,
            fixed_length: None,
            max_length: None,
            precision: None,
            scale: None,
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
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddColumn {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    pub column: ColumnFacet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterColumn {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    pub column: ColumnFacet,
    pub old_column: ColumnFacet,
    /// Set when the change can lose data.
    pub is_destructive_change: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropColumn {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameColumn {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddForeignKey {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    pub columns: Vec<String>,
    pub principal_schema: Option<String>,
    pub principal_table: String,
    pub principal_columns: Vec<String>,
    pub on_update: ReferentialAction,
    pub on_delete: ReferentialAction,
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddPrimaryKey {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    pub columns: Vec<String>,
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddUniqueConstraint {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    pub columns: Vec<String>,
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddCheckConstraint {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    pub sql: String,
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlterDatabase {
    pub collation: Option<String>,
    pub old_collation: Option<String>,
    pub annotations: Annotations,
    pub old_annotations: Annotations,
}

/// The mutable settings of a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceFacet {
    pub increment_by: i32,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub cyclic: bool,
    pub annotations: Annotations,
}

impl Default for SequenceFacet {
    fn default() -> Self {
        Self {
            increment_by: 1,
            min_value: None,
            max_value: None,
            cyclic: false,
            annotations: Annotations::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterSequence {
    pub name: String,
    pub schema: Option<String>,
    pub sequence: SequenceFacet,
    pub old_sequence: SequenceFacet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterTable {
    pub name: String,
    pub schema: Option<String>,
    pub comment: Option<String>,
    pub old_comment: Option<String>,
    pub annotations: Annotations,
    pub old_annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateIndex {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub filter: Option<String>,
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSequence {
    pub name: String,
    pub schema: Option<String>,
    pub clr_type: ClrType,
    pub start_value: i64,
    pub sequence: SequenceFacet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTable {
    pub name: String,
    pub schema: Option<String>,
    pub columns: Vec<AddColumn>,
    pub primary_key: Option<AddPrimaryKey>,
    pub unique_constraints: Vec<AddUniqueConstraint>,
    pub check_constraints: Vec<AddCheckConstraint>,
    pub foreign_keys: Vec<AddForeignKey>,
    pub comment: Option<String>,
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsureSchema {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropForeignKey {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropIndex {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropPrimaryKey {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropSchema {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropSequence {
    pub name: String,
    pub schema: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropTable {
    pub name: String,
    pub schema: Option<String>,
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropUniqueConstraint {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropCheckConstraint {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameIndex {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameSequence {
    pub name: String,
    pub schema: Option<String>,
    pub new_name: Option<String>,
    pub new_schema: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameTable {
    pub name: String,
    pub schema: Option<String>,
    pub new_name: Option<String>,
    pub new_schema: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartSequence {
    pub name: String,
    pub schema: Option<String>,
    pub start_value: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sql {
    pub sql: String,
    pub suppress_transaction: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertData {
    pub schema: Option<String>,
    pub table: String,
    pub columns: Vec<String>,
    /// One inner vector per row, aligned with `columns`.
    pub values: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteData {
    pub schema: Option<String>,
    pub table: String,
    pub key_columns: Vec<String>,
    pub key_values: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateData {
    pub schema: Option<String>,
    pub table: String,
    pub key_columns: Vec<String>,
    pub key_values: Vec<Vec<Value>>,
    pub columns: Vec<String>,
    pub values: Vec<Vec<Value>>,
}

/// One schema-change operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Operation {
    AddColumn(AddColumn),
    AddForeignKey(AddForeignKey),
    AddPrimaryKey(AddPrimaryKey),
    AddUniqueConstraint(AddUniqueConstraint),
    AddCheckConstraint(AddCheckConstraint),
    AlterColumn(AlterColumn),
    AlterDatabase(AlterDatabase),
    AlterSequence(AlterSequence),
    AlterTable(AlterTable),
    CreateIndex(CreateIndex),
    CreateTable(CreateTable),
    CreateSequence(CreateSequence),
    EnsureSchema(EnsureSchema),
    DropColumn(DropColumn),
    DropForeignKey(DropForeignKey),
    DropIndex(DropIndex),
    DropPrimaryKey(DropPrimaryKey),
    DropSchema(DropSchema),
    DropSequence(DropSequence),
    DropTable(DropTable),
    DropUniqueConstraint(DropUniqueConstraint),
    DropCheckConstraint(DropCheckConstraint),
    RenameColumn(RenameColumn),
    RenameIndex(RenameIndex),
    RenameSequence(RenameSequence),
    RenameTable(RenameTable),
    RestartSequence(RestartSequence),
    Sql(Sql),
    InsertData(InsertData),
    DeleteData(DeleteData),
    UpdateData(UpdateData),
}

impl Operation {
    /// The kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AddColumn(_) => "AddColumn",
            Self::AddForeignKey(_) => "AddForeignKey",
            Self::AddPrimaryKey(_) => "AddPrimaryKey",
            Self::AddUniqueConstraint(_) => "AddUniqueConstraint",
            Self::AddCheckConstraint(_) => "AddCheckConstraint",
            Self::AlterColumn(_) => "AlterColumn",
            Self::AlterDatabase(_) => "AlterDatabase",
            Self::AlterSequence(_) => "AlterSequence",
            Self::AlterTable(_) => "AlterTable",
            Self::CreateIndex(_) => "CreateIndex",
            Self::CreateTable(_) => "CreateTable",
            Self::CreateSequence(_) => "CreateSequence",
            Self::EnsureSchema(_) => "EnsureSchema",
            Self::DropColumn(_) => "DropColumn",
            Self::DropForeignKey(_) => "DropForeignKey",
            Self::DropIndex(_) => "DropIndex",
            Self::DropPrimaryKey(_) => "DropPrimaryKey",
            Self::DropSchema(_) => "DropSchema",
            Self::DropSequence(_) => "DropSequence",
            Self::DropTable(_) => "DropTable",
            Self::DropUniqueConstraint(_) => "DropUniqueConstraint",
            Self::DropCheckConstraint(_) => "DropCheckConstraint",
            Self::RenameColumn(_) => "RenameColumn",
            Self::RenameIndex(_) => "RenameIndex",
            Self::RenameSequence(_) => "RenameSequence",
            Self::RenameTable(_) => "RenameTable",
            Self::RestartSequence(_) => "RestartSequence",
            Self::Sql(_) => "Sql",
            Self::InsertData(_) => "InsertData",
            Self::DeleteData(_) => "DeleteData",
            Self::UpdateData(_) => "UpdateData",
        }
    }

    /// Whether applying this operation may lose data.
    pub fn is_destructive(&self) -> bool {
        match self {
            Self::DropTable(_) | Self::DropColumn(_) => true,
            Self::AlterColumn(op) => op.is_destructive_change,
            _ => false,
        }
    }

    /// The table this operation targets, if any.
    pub fn table(&self) -> Option<(&Option<String>, &str)> {
        match self {
            Self::AddColumn(op) => Some((&op.schema, &op.table)),
            Self::AddForeignKey(op) => Some((&op.schema, &op.table)),
            Self::AddPrimaryKey(op) => Some((&op.schema, &op.table)),
            Self::AddUniqueConstraint(op) => Some((&op.schema, &op.table)),
            Self::AddCheckConstraint(op) => Some((&op.schema, &op.table)),
            Self::AlterColumn(op) => Some((&op.schema, &op.table)),
            Self::AlterTable(op) => Some((&op.schema, &op.name)),
            Self::CreateIndex(op) => Some((&op.schema, &op.table)),
            Self::CreateTable(op) => Some((&op.schema, &op.name)),
            Self::DropColumn(op) => Some((&op.schema, &op.table)),
            Self::DropForeignKey(op) => Some((&op.schema, &op.table)),
            Self::DropIndex(op) => Some((&op.schema, &op.table)),
            Self::DropPrimaryKey(op) => Some((&op.schema, &op.table)),
            Self::DropTable(op) => Some((&op.schema, &op.name)),
            Self::DropUniqueConstraint(op) => Some((&op.schema, &op.table)),
            Self::DropCheckConstraint(op) => Some((&op.schema, &op.table)),
            Self::RenameColumn(op) => Some((&op.schema, &op.table)),
            Self::RenameIndex(op) => Some((&op.schema, &op.table)),
            Self::RenameTable(op) => Some((&op.schema, &op.name)),
            Self::InsertData(op) => Some((&op.schema, &op.table)),
            Self::DeleteData(op) => Some((&op.schema, &op.table)),
            Self::UpdateData(op) => Some((&op.schema, &op.table)),
            Self::AlterDatabase(_)
            | Self::AlterSequence(_)
            | Self::CreateSequence(_)
            | Self::EnsureSchema(_)
            | Self::DropSchema(_)
            | Self::DropSequence(_)
            | Self::RenameSequence(_)
            | Self::RestartSequence(_)
            | Self::Sql(_) => None,
        }
    }
}

macro_rules! impl_from_operation {
    ($($t:ident),* $(,)?) => {
        $(impl From<$t> for Operation {
            fn from(op: $t) -> Self {
                Operation::$t(op)
            }
        })*
    };
}

impl_from_operation!(
    AddColumn,
    AddForeignKey,
    AddPrimaryKey,
    AddUniqueConstraint,
    AddCheckConstraint,
    AlterColumn,
    AlterDatabase,
    AlterSequence,
    AlterTable,
    CreateIndex,
    CreateTable,
    CreateSequence,
    EnsureSchema,
    DropColumn,
    DropForeignKey,
    DropIndex,
    DropPrimaryKey,
    DropSchema,
    DropSequence,
    DropTable,
    DropUniqueConstraint,
    DropCheckConstraint,
    RenameColumn,
    RenameIndex,
    RenameSequence,
    RenameTable,
    RestartSequence,
    Sql,
    InsertData,
    DeleteData,
    UpdateData,
);

#[cfg(test)]
mod tests {
    use super::*;

    fn drop_column() -> Operation {
        DropColumn {
            name: "Note".into(),
            schema: None,
            table: "Blogs".into(),
            annotations: Annotations::new(),
        }
        .into()
    }

    #[test]
    fn test_kind_and_destructive() {
        let op = drop_column();
        assert_eq!(op.kind(), "DropColumn");
        assert!(op.is_destructive());

        let ensure: Operation = EnsureSchema { name: "blog".into() }.into();
        assert!(!ensure.is_destructive());
        assert!(ensure.table().is_none());
    }

    #[test]
    fn test_alter_column_destructive_flag() {
        let mut alter = AlterColumn {
            name: "Name".into(),
            schema: None,
            table: "Blogs".into(),
            column: ColumnFacet::new(ClrType::String),
            old_column: ColumnFacet::new(ClrType::String),
            is_destructive_change: false,
        };
        assert!(!Operation::AlterColumn(alter.clone()).is_destructive());
        alter.is_destructive_change = true;
        assert!(Operation::AlterColumn(alter).is_destructive());
    }

    #[test]
    fn test_operation_serializes_with_kind_tag() {
        let json = serde_json::to_value(drop_column()).unwrap();
        assert_eq!(json["kind"], "DropColumn");
        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, drop_column());
    }
}
