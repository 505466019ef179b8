//! SQL generation for migration operations.

use kiln_model::{Annotations, ClrType, Model, ReferentialAction, Value, annotation_names as names};

use crate::operations::*;

/// Annotation prefix of PostgreSQL extensions requested at database level.
pub const EXTENSION_ANNOTATION_PREFIX: &str = "Postgres:Extension:";

/// One SQL command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationCommand {
    /// The SQL text.
    pub command_text: String,
    /// Whether the command must run outside a transaction.
    pub transaction_suppressed: bool,
}

impl MigrationCommand {
    /// A command that runs inside the migration transaction.
    pub fn new(command_text: impl Into<String>) -> Self {
        Self {
            command_text: command_text.into(),
            transaction_suppressed: false,
        }
    }
}

/// Turns operations into SQL commands for one database.
pub trait MigrationsSqlGenerator: Send + Sync {
    /// Render `operations`. The target model, when known, describes the
    /// database after the operations run.
    fn generate(&self, operations: &[Operation], model: Option<&Model>) -> Vec<MigrationCommand>;
}

/// SQL generator for PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresSqlGenerator;

impl MigrationsSqlGenerator for PostgresSqlGenerator {
    fn generate(&self, operations: &[Operation], _model: Option<&Model>) -> Vec<MigrationCommand> {
        let mut commands = Vec::new();
        for operation in operations {
            if let Operation::Sql(sql) = operation {
                commands.push(MigrationCommand {
                    command_text: sql.sql.clone(),
                    transaction_suppressed: sql.suppress_transaction,
                });
                continue;
            }
            commands.extend(self.statements(operation).into_iter().map(MigrationCommand::new));
        }
        commands
    }
}

impl PostgresSqlGenerator {
    /// Statements for one operation.
    fn statements(&self, operation: &Operation) -> Vec<String> {
        match operation {
            Operation::AddColumn(op) => vec![format!(
                "ALTER TABLE {} ADD {};",
                table(&op.schema, &op.table),
                self.column_definition(&op.name, &op.column)
            )],
            Operation::AddForeignKey(op) => vec![format!(
                "ALTER TABLE {} ADD {};",
                table(&op.schema, &op.table),
                self.foreign_key(op)
            )],
            Operation::AddPrimaryKey(op) => vec![format!(
                "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({});",
                table(&op.schema, &op.table),
                quote(&op.name),
                column_list(&op.columns)
            )],
            Operation::AddUniqueConstraint(op) => vec![format!(
                "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({});",
                table(&op.schema, &op.table),
                quote(&op.name),
                column_list(&op.columns)
            )],
            Operation::AddCheckConstraint(op) => vec![format!(
                "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({});",
                table(&op.schema, &op.table),
                quote(&op.name),
                op.sql
            )],
            Operation::AlterColumn(op) => self.alter_column(op),
            Operation::AlterDatabase(op) => self.alter_database(op),
            Operation::AlterSequence(op) => vec![format!(
                "ALTER SEQUENCE {}{};",
                table(&op.schema, &op.name),
                sequence_options(&op.sequence)
            )],
            Operation::AlterTable(op) => {
                if op.comment == op.old_comment {
                    Vec::new()
                } else {
                    vec![comment_on("TABLE", &table(&op.schema, &op.name), op.comment.as_deref())]
                }
            }
            Operation::CreateIndex(op) => {
                let mut sql = format!(
                    "CREATE {}INDEX {} ON {} ({})",
                    if op.unique { "UNIQUE " } else { "" },
                    quote(&op.name),
                    table(&op.schema, &op.table),
                    column_list(&op.columns)
                );
                if let Some(filter) = &op.filter {
                    sql.push_str(&format!(" WHERE {}", filter));
                }
                sql.push(';');
                vec![sql]
            }
            Operation::CreateTable(op) => self.create_table(op),
            Operation::CreateSequence(op) => {
                let store_type = match op.clr_type {
                    ClrType::I16 | ClrType::I32 | ClrType::I64 => {
                        format!(" AS {}", op.clr_type.default_store_type())
                    }
                    _ => String::new(),
                };
                vec![format!(
                    "CREATE SEQUENCE {}{} START WITH {}{};",
                    table(&op.schema, &op.name),
                    store_type,
                    op.start_value,
                    sequence_options(&op.sequence)
                )]
            }
            Operation::EnsureSchema(op) => {
                if op.name == "public" {
                    Vec::new()
                } else {
                    vec![format!("CREATE SCHEMA IF NOT EXISTS {};", quote(&op.name))]
                }
            }
            Operation::DropColumn(op) => vec![format!(
                "ALTER TABLE {} DROP COLUMN {};",
                table(&op.schema, &op.table),
                quote(&op.name)
            )],
            Operation::DropForeignKey(op) => drop_constraint(&op.schema, &op.table, &op.name),
            Operation::DropIndex(op) => vec![format!("DROP INDEX {};", table(&op.schema, &op.name))],
            Operation::DropPrimaryKey(op) => drop_constraint(&op.schema, &op.table, &op.name),
            Operation::DropSchema(op) => vec![format!("DROP SCHEMA {};", quote(&op.name))],
            Operation::DropSequence(op) => {
                vec![format!("DROP SEQUENCE {};", table(&op.schema, &op.name))]
            }
            Operation::DropTable(op) => vec![format!("DROP TABLE {};", table(&op.schema, &op.name))],
            Operation::DropUniqueConstraint(op) => drop_constraint(&op.schema, &op.table, &op.name),
            Operation::DropCheckConstraint(op) => drop_constraint(&op.schema, &op.table, &op.name),
            Operation::RenameColumn(op) => vec![format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {};",
                table(&op.schema, &op.table),
                quote(&op.name),
                quote(&op.new_name)
            )],
            Operation::RenameIndex(op) => vec![format!(
                "ALTER INDEX {} RENAME TO {};",
                table(&op.schema, &op.name),
                quote(&op.new_name)
            )],
            Operation::RenameSequence(op) => {
                rename_object("SEQUENCE", &op.schema, &op.name, &op.new_name, &op.new_schema)
            }
            Operation::RenameTable(op) => {
                rename_object("TABLE", &op.schema, &op.name, &op.new_name, &op.new_schema)
            }
            Operation::RestartSequence(op) => {
                let mut sql = format!("ALTER SEQUENCE {} RESTART", table(&op.schema, &op.name));
                if let Some(start) = op.start_value {
                    sql.push_str(&format!(" WITH {}", start));
                }
                sql.push(';');
                vec![sql]
            }
            Operation::Sql(op) => vec![op.sql.clone()],
            Operation::InsertData(op) => {
                let rows: Vec<String> = op
                    .values
                    .iter()
                    .map(|row| format!("({})", row.iter().map(literal).collect::<Vec<_>>().join(", ")))
                    .collect();
                vec![format!(
                    "INSERT INTO {} ({})\nVALUES {};",
                    table(&op.schema, &op.table),
                    column_list(&op.columns),
                    rows.join(",\n")
                )]
            }
            Operation::DeleteData(op) => op
                .key_values
                .iter()
                .map(|key| {
                    format!(
                        "DELETE FROM {}\nWHERE {};",
                        table(&op.schema, &op.table),
                        predicate(&op.key_columns, key)
                    )
                })
                .collect(),
            Operation::UpdateData(op) => op
                .key_values
                .iter()
                .zip(&op.values)
                .map(|(key, values)| {
                    let assignments: Vec<String> = op
                        .columns
                        .iter()
                        .zip(values)
                        .map(|(c, v)| format!("{} = {}", quote(c), literal(v)))
                        .collect();
                    format!(
                        "UPDATE {} SET {}\nWHERE {};",
                        table(&op.schema, &op.table),
                        assignments.join(", "),
                        predicate(&op.key_columns, key)
                    )
                })
                .collect(),
        }
    }

    fn create_table(&self, op: &CreateTable) -> Vec<String> {
        let mut definitions: Vec<String> = op
            .columns
            .iter()
            .map(|c| self.column_definition(&c.name, &c.column))
            .collect();

        if let Some(pk) = &op.primary_key {
            definitions.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                quote(&pk.name),
                column_list(&pk.columns)
            ));
        }
        for unique in &op.unique_constraints {
            definitions.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                quote(&unique.name),
                column_list(&unique.columns)
            ));
        }
        for check in &op.check_constraints {
            definitions.push(format!("CONSTRAINT {} CHECK ({})", quote(&check.name), check.sql));
        }
        for fk in &op.foreign_keys {
            definitions.push(self.foreign_key(fk));
        }

        let name = table(&op.schema, &op.name);
        let mut statements = vec![format!(
            "CREATE TABLE {} (\n    {}\n);",
            name,
            definitions.join(",\n    ")
        )];
        if op.comment.is_some() {
            statements.push(comment_on("TABLE", &name, op.comment.as_deref()));
        }
        for column in &op.columns {
            if column.column.comment.is_some() {
                let target = format!("{}.{}", name, quote(&column.name));
                statements.push(comment_on("COLUMN", &target, column.column.comment.as_deref()));
            }
        }
        statements
    }

    fn column_definition(&self, name: &str, column: &ColumnFacet) -> String {
        let strategy = column.annotations.get_str(names::VALUE_GENERATION_STRATEGY);
        let store_type = match (strategy, column.clr_type) {
            (Some("SerialColumn"), ClrType::I16) => "smallserial".to_string(),
            (Some("SerialColumn"), ClrType::I32) => "serial".to_string(),
            (Some("SerialColumn"), ClrType::I64) => "bigserial".to_string(),
            _ => store_type(column),
        };

        let mut parts = vec![quote(name), store_type];
        if let Some(collation) = &column.collation {
            parts.push(format!("COLLATE {}", quote(collation)));
        }
        if let Some(sql) = &column.computed_column_sql {
            parts.push(format!("GENERATED ALWAYS AS ({}) STORED", sql));
        }
        if !column.nullable {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default) = default_clause(column) {
            parts.push(default);
        }
        match strategy {
            Some("IdentityByDefaultColumn") => {
                parts.push(format!("GENERATED BY DEFAULT AS IDENTITY{}", identity_options(&column.annotations)))
            }
            Some("IdentityAlwaysColumn") => {
                parts.push(format!("GENERATED ALWAYS AS IDENTITY{}", identity_options(&column.annotations)))
            }
            _ => {}
        }
        parts.join(" ")
    }

    fn foreign_key(&self, op: &AddForeignKey) -> String {
        let mut sql = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            quote(&op.name),
            column_list(&op.columns),
            table(&op.principal_schema, &op.principal_table),
            column_list(&op.principal_columns)
        );
        if op.on_update != ReferentialAction::NoAction {
            sql.push_str(&format!(" ON UPDATE {}", op.on_update.to_sql()));
        }
        if op.on_delete != ReferentialAction::NoAction {
            sql.push_str(&format!(" ON DELETE {}", op.on_delete.to_sql()));
        }
        sql
    }

    fn alter_column(&self, op: &AlterColumn) -> Vec<String> {
        let prefix = format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            table(&op.schema, &op.table),
            quote(&op.name)
        );
        let (new, old) = (&op.column, &op.old_column);
        let mut statements = Vec::new();

        let new_type = store_type(new);
        if new_type != store_type(old) {
            statements.push(format!("{} TYPE {};", prefix, new_type));
        }
        if new.nullable != old.nullable {
            let action = if new.nullable { "DROP" } else { "SET" };
            statements.push(format!("{} {} NOT NULL;", prefix, action));
        }
        let new_default = default_clause(new);
        if new_default != default_clause(old) {
            statements.push(match new_default {
                Some(default) => format!("{} SET {};", prefix, default),
                None => format!("{} DROP DEFAULT;", prefix),
            });
        }
        if new.comment != old.comment {
            let target = format!("{}.{}", table(&op.schema, &op.table), quote(&op.name));
            statements.push(comment_on("COLUMN", &target, new.comment.as_deref()));
        }
        statements
    }

    fn alter_database(&self, op: &AlterDatabase) -> Vec<String> {
        let extensions = |annotations: &Annotations| -> Vec<String> {
            annotations
                .iter()
                .filter_map(|(name, _)| name.strip_prefix(EXTENSION_ANNOTATION_PREFIX))
                .map(str::to_string)
                .collect()
        };
        let (current, previous) = (extensions(&op.annotations), extensions(&op.old_annotations));

        let mut statements: Vec<String> = current
            .iter()
            .filter(|e| !previous.contains(e))
            .map(|e| format!("CREATE EXTENSION IF NOT EXISTS {};", quote(e)))
            .collect();
        statements.extend(
            previous
                .iter()
                .filter(|e| !current.contains(e))
                .map(|e| format!("DROP EXTENSION IF EXISTS {};", quote(e))),
        );
        statements
    }
}

/// Quote an identifier.
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Quote an optionally schema-qualified object name.
fn table(schema: &Option<String>, name: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", quote(schema), quote(name)),
        None => quote(name),
    }
}

fn column_list(columns: &[String]) -> String {
    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
}

/// Render a value as a SQL literal.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_nan() => "'NaN'".to_string(),
        Value::Float(f) if f.is_infinite() && *f > 0.0 => "'Infinity'".to_string(),
        Value::Float(f) if f.is_infinite() => "'-Infinity'".to_string(),
        Value::Float(f) => format!("{:?}", f),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Bytes(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
            format!("BYTEA E'\\\\x{}'", hex)
        }
    }
}

fn predicate(columns: &[String], values: &[Value]) -> String {
    columns
        .iter()
        .zip(values)
        .map(|(c, v)| match v {
            Value::Null => format!("{} IS NULL", quote(c)),
            v => format!("{} = {}", quote(c), literal(v)),
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn store_type(column: &ColumnFacet) -> String {
    if let Some(explicit) = &column.column_type {
        return explicit.clone();
    }
    match (column.clr_type, column.max_length, column.precision) {
        (ClrType::String, Some(len), _) if column.fixed_length == Some(true) => {
            format!("character({})", len)
        }
        (ClrType::String, Some(len), _) => format!("character varying({})", len),
        (ClrType::Decimal, _, Some(p)) => format!("numeric({},{})", p, column.scale.unwrap_or(0)),
        (clr, _, _) => clr.default_store_type().to_string(),
    }
}

fn default_clause(column: &ColumnFacet) -> Option<String> {
    match (&column.default_value_sql, &column.default_value) {
        (Some(sql), _) => Some(format!("DEFAULT ({})", sql)),
        (None, Some(value)) => Some(format!("DEFAULT {}", literal(value))),
        (None, None) => None,
    }
}

fn identity_options(annotations: &Annotations) -> String {
    let mut options = Vec::new();
    if let Some(seed) = annotations.get(names::IDENTITY_SEED).and_then(Value::as_i64) {
        options.push(format!("START WITH {}", seed));
    }
    if let Some(increment) = annotations.get(names::IDENTITY_INCREMENT).and_then(Value::as_i64) {
        options.push(format!("INCREMENT BY {}", increment));
    }
    if options.is_empty() {
        String::new()
    } else {
        format!(" ({})", options.join(" "))
    }
}

fn sequence_options(sequence: &SequenceFacet) -> String {
    let mut sql = format!(" INCREMENT BY {}", sequence.increment_by);
    match sequence.min_value {
        Some(min) => sql.push_str(&format!(" MINVALUE {}", min)),
        None => sql.push_str(" NO MINVALUE"),
    }
    match sequence.max_value {
        Some(max) => sql.push_str(&format!(" MAXVALUE {}", max)),
        None => sql.push_str(" NO MAXVALUE"),
    }
    sql.push_str(if sequence.cyclic { " CYCLE" } else { " NO CYCLE" });
    sql
}

fn comment_on(kind: &str, target: &str, comment: Option<&str>) -> String {
    let text = match comment {
        Some(comment) => literal(&Value::Text(comment.to_string())),
        None => "NULL".to_string(),
    };
    format!("COMMENT ON {} {} IS {};", kind, target, text)
}

fn drop_constraint(schema: &Option<String>, table_name: &str, name: &str) -> Vec<String> {
    vec![format!(
        "ALTER TABLE {} DROP CONSTRAINT {};",
        table(schema, table_name),
        quote(name)
    )]
}

fn rename_object(
    kind: &str,
    schema: &Option<String>,
    name: &str,
    new_name: &Option<String>,
    new_schema: &Option<String>,
) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = name.to_string();
    if let Some(new_name) = new_name.as_deref().filter(|n| *n != name) {
        statements.push(format!(
            "ALTER {} {} RENAME TO {};",
            kind,
            table(schema, name),
            quote(new_name)
        ));
        current = new_name.to_string();
    }
    if new_schema != schema {
        let target = new_schema.as_deref().unwrap_or("public");
        statements.push(format!(
            "ALTER {} {} SET SCHEMA {};",
            kind,
            table(schema, &current),
            quote(target)
        ));
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MigrationBuilder;
    use pretty_assertions::assert_eq;

    fn sql(build: impl FnOnce(&mut MigrationBuilder)) -> Vec<String> {
        let mut migration_builder = MigrationBuilder::new("postgresql");
        build(&mut migration_builder);
        PostgresSqlGenerator
            .generate(&migration_builder.into_operations(), None)
            .into_iter()
            .map(|c| c.command_text)
            .collect()
    }

    #[test]
    fn test_add_and_drop_column() {
        let up = sql(|mb| {
            mb.add_column::<String>("Note").table("Blogs").nullable(true);
        });
        assert_eq!(up, vec![r#"ALTER TABLE "Blogs" ADD "Note" text;"#]);

        let down = sql(|mb| {
            mb.drop_column("Note").table("Blogs");
        });
        assert_eq!(down, vec![r#"ALTER TABLE "Blogs" DROP COLUMN "Note";"#]);
    }

    #[test]
    fn test_create_table() {
        let statements = sql(|mb| {
            mb.create_table("Posts")
                .schema("blog")
                .columns(|c| {
                    c.column::<i32>("Id")
                        .annotation(names::VALUE_GENERATION_STRATEGY, "IdentityByDefaultColumn");
                    c.column::<i32>("BlogId");
                    c.column::<String>("Title").max_length(200);
                })
                .constraints(|t| {
                    t.primary_key("PK_Posts").column("Id");
                    t.foreign_key("FK_Posts_Blogs_BlogId")
                        .column("BlogId")
                        .principal_table("Blogs")
                        .principal_column("Id")
                        .on_delete(ReferentialAction::Cascade);
                });
        });
        assert_eq!(statements.len(), 1);
        let create = &statements[0];
        assert!(create.starts_with(r#"CREATE TABLE "blog"."Posts" ("#));
        assert!(create.contains(r#""Id" integer NOT NULL GENERATED BY DEFAULT AS IDENTITY"#));
        assert!(create.contains(r#""Title" character varying(200) NOT NULL"#));
        assert!(create.contains(r#"CONSTRAINT "PK_Posts" PRIMARY KEY ("Id")"#));
        assert!(create.contains(r#"REFERENCES "Blogs" ("Id") ON DELETE CASCADE"#));
    }

    #[test]
    fn test_sequence_statements() {
        let statements = sql(|mb| {
            mb.create_sequence::<i64>("OrderNumbers").start_value(100).increment_by(5);
            mb.restart_sequence("OrderNumbers").start_value(1);
        });
        assert_eq!(
            statements,
            vec![
                r#"CREATE SEQUENCE "OrderNumbers" AS bigint START WITH 100 INCREMENT BY 5 NO MINVALUE NO MAXVALUE NO CYCLE;"#,
                r#"ALTER SEQUENCE "OrderNumbers" RESTART WITH 1;"#,
            ]
        );
    }

    #[test]
    fn test_data_statements() {
        let statements = sql(|mb| {
            mb.insert_data("Blogs")
                .columns(&["Id", "Name"])
                .rows(vec![vec![1.into(), "It's".into()], vec![2.into(), Value::Null]]);
            mb.delete_data("Blogs").key_column("Id").key_value(3);
        });
        assert_eq!(
            statements,
            vec![
                "INSERT INTO \"Blogs\" (\"Id\", \"Name\")\nVALUES (1, 'It''s'),\n(2, NULL);",
                "DELETE FROM \"Blogs\"\nWHERE \"Id\" = 3;",
            ]
        );
    }

    #[test]
    fn test_sql_operation_keeps_transaction_flag() {
        let mut migration_builder = MigrationBuilder::new("postgresql");
        migration_builder.sql("CREATE INDEX CONCURRENTLY ix ON t (c);").suppress_transaction(true);
        let commands = PostgresSqlGenerator.generate(&migration_builder.into_operations(), None);
        assert_eq!(commands.len(), 1);
        assert!(commands[0].transaction_suppressed);
    }

    #[test]
    fn test_extensions() {
        let mut annotations = Annotations::new();
        annotations.set(format!("{}citext", EXTENSION_ANNOTATION_PREFIX), true);
        let op = Operation::AlterDatabase(AlterDatabase {
            annotations,
            ..Default::default()
        });
        let commands = PostgresSqlGenerator.generate(&[op], None);
        assert_eq!(commands[0].command_text, r#"CREATE EXTENSION IF NOT EXISTS "citext";"#);
    }

    #[test]
    fn test_literal() {
        assert_eq!(literal(&Value::Bool(true)), "TRUE");
        assert_eq!(literal(&Value::Float(1.5)), "1.5");
        assert_eq!(literal(&Value::Text("a'b".into())), "'a''b'");
        assert_eq!(literal(&Value::Bytes(vec![0xde, 0xad])), "BYTEA E'\\\\xDEAD'");
    }
}
