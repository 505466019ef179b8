//! Rendering of operations as `migration_builder` call chains.
//!
//! Every kind has one render function. Calls follow a fixed order: the
//! positional name, `schema`, `table`, kind-specific settings, `old_*`
//! settings, then annotations. Settings equal to their default are left
//! out.

use kiln_model::{Annotations, ReferentialAction, Value};

use super::indented::IndentedStringBuilder;
use super::literal::{self, Imports};
use crate::operations::*;

/// A receiver followed by chained calls.
struct Chain {
    calls: Vec<String>,
}

impl Chain {
    fn new(first: String) -> Self {
        Self { calls: vec![first] }
    }

    fn push(&mut self, call: String) {
        self.calls.push(call);
    }

    fn opt_str(&mut self, method: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.push(format!("{}({})", method, literal::string(value)));
        }
    }

    fn str(&mut self, method: &str, value: &str) {
        self.push(format!("{}({})", method, literal::string(value)));
    }

    fn schema(&mut self, schema: &Option<String>) {
        self.opt_str("schema", schema.as_deref());
    }

    fn table(&mut self, table: &str) {
        if !table.is_empty() {
            self.str("table", table);
        }
    }

    fn columns(&mut self, singular: &str, plural: &str, columns: &[String]) {
        match columns {
            [] => {}
            [single] => self.str(singular, single),
            _ => self.push(format!("{}({})", plural, literal::string_slice(columns))),
        }
    }

    fn flag(&mut self, method: &str, value: bool) {
        self.push(format!("{}({})", method, value));
    }

    fn action(&mut self, method: &str, action: ReferentialAction, imports: &mut Imports) {
        if action != ReferentialAction::NoAction {
            self.push(format!(
                "{}({})",
                method,
                literal::referential_action(action, imports)
            ));
        }
    }

    fn annotations(&mut self, method: &str, annotations: &Annotations, imports: &mut Imports) {
        for (name, value) in annotations {
            self.push(format!(
                "{}({}, {})",
                method,
                literal::string(name),
                literal::value(value, imports)
            ));
        }
    }

    /// Write as a statement on `receiver`.
    fn write(self, receiver: &str, b: &mut IndentedStringBuilder) {
        if self.calls.len() == 1 && !self.calls[0].contains('\n') {
            b.append_line(&format!("{}.{};", receiver, self.calls[0]));
            return;
        }
        b.append_line(receiver);
        b.indent();
        let last = self.calls.len() - 1;
        for (i, call) in self.calls.iter().enumerate() {
            b.append(&format!(".{}", call));
            b.append_line(if i == last { ";" } else { "" });
        }
        b.dedent();
    }

    /// Render on one line as `receiver.a().b();`.
    fn inline(self, receiver: &str) -> String {
        format!("{}.{};", receiver, self.calls.join("."))
    }
}

fn facet(chain: &mut Chain, prefix: &str, facet: &ColumnFacet, imports: &mut Imports) {
    let m = |name: &str| format!("{}{}", prefix, name);
    chain.opt_str(&m("column_type"), facet.column_type.as_deref());
    if let Some(unicode) = facet.unicode {
        chain.flag(&m("unicode"), unicode);
    }
    if let Some(fixed_length) = facet.fixed_length {
        chain.flag(&m("fixed_length"), fixed_length);
    }
    if let Some(max_length) = facet.max_length {
        chain.push(format!("{}({})", m("max_length"), max_length));
    }
    if let Some(precision) = facet.precision {
        chain.push(format!("{}({})", m("precision"), precision));
    }
    if let Some(scale) = facet.scale {
        chain.push(format!("{}({})", m("scale"), scale));
    }
    if facet.row_version {
        chain.flag(&m("row_version"), true);
    }
    chain.flag(&m("nullable"), facet.nullable);
    if let Some(default) = &facet.default_value {
        chain.push(format!(
            "{}({})",
            m("default_value"),
            literal::value(default, imports)
        ));
    }
    chain.opt_str(&m("default_value_sql"), facet.default_value_sql.as_deref());
    chain.opt_str(&m("computed_column_sql"), facet.computed_column_sql.as_deref());
    if let Some(stored) = facet.is_stored {
        chain.flag(&m("stored"), stored);
    }
    chain.opt_str(&m("comment"), facet.comment.as_deref());
    chain.opt_str(&m("collation"), facet.collation.as_deref());
}

fn sequence_facet(chain: &mut Chain, prefix: &str, sequence: &SequenceFacet) {
    let m = |name: &str| format!("{}{}", prefix, name);
    if sequence.increment_by != 1 {
        chain.push(format!("{}({})", m("increment_by"), sequence.increment_by));
    }
    if let Some(min) = sequence.min_value {
        chain.push(format!("{}({})", m("min_value"), literal::int(min)));
    }
    if let Some(max) = sequence.max_value {
        chain.push(format!("{}({})", m("max_value"), literal::int(max)));
    }
    if sequence.cyclic {
        chain.flag(&m("cyclic"), true);
    }
}

/// The shapes a data grid is written in.
fn grid(
    chain: &mut Chain,
    methods: [&str; 3],
    columns: &[String],
    rows: &[Vec<Value>],
    imports: &mut Imports,
) {
    let [single, list, grid] = methods;
    match (columns.len(), rows) {
        (_, []) => {}
        (1, [row]) if row.len() == 1 => {
            chain.push(format!("{}({})", single, literal::value(&row[0], imports)));
        }
        (1, _) => {
            imports.add("kiln_migrate::values");
            let column: Vec<Value> = rows.iter().filter_map(|r| r.first().cloned()).collect();
            chain.push(format!(
                "{}(values![{}])",
                list,
                literal::value_list(&column, imports)
            ));
        }
        (_, [row]) => {
            imports.add("kiln_migrate::values");
            chain.push(format!("{}(values![{}])", list, literal::value_list(row, imports)));
        }
        _ => {
            imports.add("kiln_migrate::rows");
            let mut text = format!("{}(rows![\n", grid);
            for row in rows {
                text.push_str(&format!("    [{}],\n", literal::value_list(row, imports)));
            }
            text.push_str("])");
            chain.push(text);
        }
    }
}

fn is_grid(columns: usize, rows: &[Vec<Value>]) -> bool {
    columns > 1 && rows.len() > 1
}

/// Whether any data operation writes a multi-row, multi-column grid.
///
/// Such migrations carry `#[rustfmt::skip]` so each row stays on its own
/// line.
pub fn needs_grid_marker(operations: &[Operation]) -> bool {
    operations.iter().any(|op| match op {
        Operation::InsertData(op) => is_grid(op.columns.len(), &op.values),
        Operation::DeleteData(op) => is_grid(op.key_columns.len(), &op.key_values),
        Operation::UpdateData(op) => {
            is_grid(op.key_columns.len(), &op.key_values) || is_grid(op.columns.len(), &op.values)
        }
        _ => false,
    })
}

/// Write each operation as a statement on `receiver`, separated by blank
/// lines.
pub fn generate(receiver: &str, operations: &[Operation], b: &mut IndentedStringBuilder, imports: &mut Imports) {
    for (i, operation) in operations.iter().enumerate() {
        if i > 0 {
            b.blank_line();
        }
        render(operation, imports).write(receiver, b);
    }
}

fn render(operation: &Operation, imports: &mut Imports) -> Chain {
    match operation {
        Operation::AddColumn(op) => add_column(op, imports),
        Operation::AddForeignKey(op) => add_foreign_key(op, imports),
        Operation::AddPrimaryKey(op) => keyed("add_primary_key", &op.name, &op.schema, &op.table, &op.columns, &op.annotations, imports),
        Operation::AddUniqueConstraint(op) => keyed("add_unique_constraint", &op.name, &op.schema, &op.table, &op.columns, &op.annotations, imports),
        Operation::AddCheckConstraint(op) => {
            let mut chain = Chain::new(format!("add_check_constraint({})", literal::string(&op.name)));
            chain.schema(&op.schema);
            chain.table(&op.table);
            chain.str("sql", &op.sql);
            chain.annotations("annotation", &op.annotations, imports);
            chain
        }
        Operation::AlterColumn(op) => alter_column(op, imports),
        Operation::AlterDatabase(op) => {
            let mut chain = Chain::new("alter_database()".to_string());
            chain.opt_str("collation", op.collation.as_deref());
            chain.opt_str("old_collation", op.old_collation.as_deref());
            chain.annotations("annotation", &op.annotations, imports);
            chain.annotations("old_annotation", &op.old_annotations, imports);
            chain
        }
        Operation::AlterSequence(op) => {
            let mut chain = Chain::new(format!("alter_sequence({})", literal::string(&op.name)));
            chain.schema(&op.schema);
            sequence_facet(&mut chain, "", &op.sequence);
            sequence_facet(&mut chain, "old_", &op.old_sequence);
            chain.annotations("annotation", &op.sequence.annotations, imports);
            chain.annotations("old_annotation", &op.old_sequence.annotations, imports);
            chain
        }
        Operation::AlterTable(op) => {
            let mut chain = Chain::new(format!("alter_table({})", literal::string(&op.name)));
            chain.schema(&op.schema);
            chain.opt_str("comment", op.comment.as_deref());
            chain.opt_str("old_comment", op.old_comment.as_deref());
            chain.annotations("annotation", &op.annotations, imports);
            chain.annotations("old_annotation", &op.old_annotations, imports);
            chain
        }
        Operation::CreateIndex(op) => {
            let mut chain = Chain::new(format!("create_index({})", literal::string(&op.name)));
            chain.schema(&op.schema);
            chain.table(&op.table);
            chain.columns("column", "columns", &op.columns);
            if op.unique {
                chain.flag("unique", true);
            }
            chain.opt_str("filter", op.filter.as_deref());
            chain.annotations("annotation", &op.annotations, imports);
            chain
        }
        Operation::CreateTable(op) => create_table(op, imports),
        Operation::CreateSequence(op) => {
            let mut chain = Chain::new(format!(
                "create_sequence::<{}>({})",
                op.clr_type.rust_type(),
                literal::string(&op.name)
            ));
            chain.schema(&op.schema);
            if op.start_value != 1 {
                chain.push(format!("start_value({})", literal::int(op.start_value)));
            }
            sequence_facet(&mut chain, "", &op.sequence);
            chain.annotations("annotation", &op.sequence.annotations, imports);
            chain
        }
        Operation::EnsureSchema(op) => Chain::new(format!("ensure_schema({})", literal::string(&op.name))),
        Operation::DropColumn(op) => {
            let mut chain = Chain::new(format!("drop_column({})", literal::string(&op.name)));
            chain.schema(&op.schema);
            chain.table(&op.table);
            chain.annotations("annotation", &op.annotations, imports);
            chain
        }
        Operation::DropForeignKey(op) => drop_named("drop_foreign_key", &op.name, &op.schema, &op.table),
        Operation::DropIndex(op) => drop_named("drop_index", &op.name, &op.schema, &op.table),
        Operation::DropPrimaryKey(op) => drop_named("drop_primary_key", &op.name, &op.schema, &op.table),
        Operation::DropSchema(op) => Chain::new(format!("drop_schema({})", literal::string(&op.name))),
        Operation::DropSequence(op) => {
            let mut chain = Chain::new(format!("drop_sequence({})", literal::string(&op.name)));
            chain.schema(&op.schema);
            chain
        }
        Operation::DropTable(op) => {
            let mut chain = Chain::new(format!("drop_table({})", literal::string(&op.name)));
            chain.schema(&op.schema);
            chain.annotations("annotation", &op.annotations, imports);
            chain
        }
        Operation::DropUniqueConstraint(op) => drop_named("drop_unique_constraint", &op.name, &op.schema, &op.table),
        Operation::DropCheckConstraint(op) => drop_named("drop_check_constraint", &op.name, &op.schema, &op.table),
        Operation::RenameColumn(op) => {
            let mut chain = Chain::new(format!("rename_column({})", literal::string(&op.name)));
            chain.schema(&op.schema);
            chain.table(&op.table);
            chain.str("new_name", &op.new_name);
            chain
        }
        Operation::RenameIndex(op) => {
            let mut chain = Chain::new(format!("rename_index({})", literal::string(&op.name)));
            chain.schema(&op.schema);
            chain.table(&op.table);
            chain.str("new_name", &op.new_name);
            chain
        }
        Operation::RenameSequence(op) => {
            let mut chain = Chain::new(format!("rename_sequence({})", literal::string(&op.name)));
            chain.schema(&op.schema);
            chain.opt_str("new_name", op.new_name.as_deref());
            chain.opt_str("new_schema", op.new_schema.as_deref());
            chain
        }
        Operation::RenameTable(op) => {
            let mut chain = Chain::new(format!("rename_table({})", literal::string(&op.name)));
            chain.schema(&op.schema);
            chain.opt_str("new_name", op.new_name.as_deref());
            chain.opt_str("new_schema", op.new_schema.as_deref());
            chain
        }
        Operation::RestartSequence(op) => {
            let mut chain = Chain::new(format!("restart_sequence({})", literal::string(&op.name)));
            chain.schema(&op.schema);
            if let Some(start) = op.start_value {
                chain.push(format!("start_value({})", literal::int(start)));
            }
            chain
        }
        Operation::Sql(op) => {
            let mut chain = Chain::new(format!("sql({})", literal::string(&op.sql)));
            if op.suppress_transaction {
                chain.flag("suppress_transaction", true);
            }
            chain
        }
        Operation::InsertData(op) => {
            let mut chain = Chain::new(format!("insert_data({})", literal::string(&op.table)));
            chain.schema(&op.schema);
            chain.columns("column", "columns", &op.columns);
            grid(&mut chain, ["value", "values", "rows"], &op.columns, &op.values, imports);
            chain
        }
        Operation::DeleteData(op) => {
            let mut chain = Chain::new(format!("delete_data({})", literal::string(&op.table)));
            chain.schema(&op.schema);
            chain.columns("key_column", "key_columns", &op.key_columns);
            grid(&mut chain, ["key_value", "key_values", "key_rows"], &op.key_columns, &op.key_values, imports);
            chain
        }
        Operation::UpdateData(op) => {
            let mut chain = Chain::new(format!("update_data({})", literal::string(&op.table)));
            chain.schema(&op.schema);
            chain.columns("key_column", "key_columns", &op.key_columns);
            grid(&mut chain, ["key_value", "key_values", "key_rows"], &op.key_columns, &op.key_values, imports);
            chain.columns("column", "columns", &op.columns);
            grid(&mut chain, ["value", "values", "rows"], &op.columns, &op.values, imports);
            chain
        }
    }
}

fn add_column(op: &AddColumn, imports: &mut Imports) -> Chain {
    let mut chain = Chain::new(format!(
        "add_column::<{}>({})",
        op.column.clr_type.rust_type(),
        literal::string(&op.name)
    ));
    chain.schema(&op.schema);
    chain.table(&op.table);
    facet(&mut chain, "", &op.column, imports);
    chain.annotations("annotation", &op.column.annotations, imports);
    chain
}

fn alter_column(op: &AlterColumn, imports: &mut Imports) -> Chain {
    let mut chain = Chain::new(format!(
        "alter_column::<{}>({})",
        op.column.clr_type.rust_type(),
        literal::string(&op.name)
    ));
    chain.schema(&op.schema);
    chain.table(&op.table);
    facet(&mut chain, "", &op.column, imports);
    chain.push(format!("old_clr_type::<{}>()", op.old_column.clr_type.rust_type()));
    facet(&mut chain, "old_", &op.old_column, imports);
    chain.annotations("annotation", &op.column.annotations, imports);
    chain.annotations("old_annotation", &op.old_column.annotations, imports);
    chain
}

fn foreign_key_calls(chain: &mut Chain, op: &AddForeignKey, imports: &mut Imports) {
    chain.columns("column", "columns", &op.columns);
    chain.opt_str("principal_schema", op.principal_schema.as_deref());
    chain.str("principal_table", &op.principal_table);
    chain.columns("principal_column", "principal_columns", &op.principal_columns);
    chain.action("on_update", op.on_update, imports);
    chain.action("on_delete", op.on_delete, imports);
    chain.annotations("annotation", &op.annotations, imports);
}

fn add_foreign_key(op: &AddForeignKey, imports: &mut Imports) -> Chain {
    let mut chain = Chain::new(format!("add_foreign_key({})", literal::string(&op.name)));
    chain.schema(&op.schema);
    chain.table(&op.table);
    foreign_key_calls(&mut chain, op, imports);
    chain
}

fn keyed(
    method: &str,
    name: &str,
    schema: &Option<String>,
    table: &str,
    columns: &[String],
    annotations: &Annotations,
    imports: &mut Imports,
) -> Chain {
    let mut chain = Chain::new(format!("{}({})", method, literal::string(name)));
    chain.schema(schema);
    chain.table(table);
    chain.columns("column", "columns", columns);
    chain.annotations("annotation", annotations, imports);
    chain
}

fn drop_named(method: &str, name: &str, schema: &Option<String>, table: &str) -> Chain {
    let mut chain = Chain::new(format!("{}({})", method, literal::string(name)));
    chain.schema(schema);
    chain.table(table);
    chain
}

fn create_table(op: &CreateTable, imports: &mut Imports) -> Chain {
    let mut chain = Chain::new(format!("create_table({})", literal::string(&op.name)));
    chain.schema(&op.schema);

    let mut columns = IndentedStringBuilder::new();
    columns.block("columns(|table|", |b| {
        for column in &op.columns {
            let mut line = Chain::new(format!(
                "column::<{}>({})",
                column.column.clr_type.rust_type(),
                literal::string(&column.name)
            ));
            facet(&mut line, "", &column.column, imports);
            line.annotations("annotation", &column.column.annotations, imports);
            b.append_line(&line.inline("table"));
        }
    });
    chain.push(close_closure(columns));

    let has_constraints = op.primary_key.is_some()
        || !op.unique_constraints.is_empty()
        || !op.check_constraints.is_empty()
        || !op.foreign_keys.is_empty();
    if has_constraints {
        let mut constraints = IndentedStringBuilder::new();
        constraints.block("constraints(|table|", |b| {
            if let Some(pk) = &op.primary_key {
                let mut line = Chain::new(format!("primary_key({})", literal::string(&pk.name)));
                line.columns("column", "columns", &pk.columns);
                line.annotations("annotation", &pk.annotations, imports);
                b.append_line(&line.inline("table"));
            }
            for unique in &op.unique_constraints {
                let mut line = Chain::new(format!("unique_constraint({})", literal::string(&unique.name)));
                line.columns("column", "columns", &unique.columns);
                line.annotations("annotation", &unique.annotations, imports);
                b.append_line(&line.inline("table"));
            }
            for check in &op.check_constraints {
                let mut line = Chain::new(format!(
                    "check_constraint({}, {})",
                    literal::string(&check.name),
                    literal::string(&check.sql)
                ));
                line.annotations("annotation", &check.annotations, imports);
                b.append_line(&line.inline("table"));
            }
            for fk in &op.foreign_keys {
                let mut line = Chain::new(format!("foreign_key({})", literal::string(&fk.name)));
                foreign_key_calls(&mut line, fk, imports);
                b.append_line(&line.inline("table"));
            }
        });
        chain.push(close_closure(constraints));
    }

    chain.opt_str("comment", op.comment.as_deref());
    chain.annotations("annotation", &op.annotations, imports);
    chain
}

/// Turn a rendered `x(|table| { .. }` block into the call `x(|table| { .. })`.
fn close_closure(block: IndentedStringBuilder) -> String {
    let mut text = block.into_string();
    if text.ends_with('\n') {
        text.pop();
    }
    text.push(')');
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MigrationBuilder;
    use kiln_model::ClrType;
    use pretty_assertions::assert_eq;

    fn emit(operations: &[Operation]) -> (String, Imports) {
        let mut b = IndentedStringBuilder::new();
        let mut imports = Imports::new();
        generate("migration_builder", operations, &mut b, &mut imports);
        (b.into_string(), imports)
    }

    #[test]
    fn test_add_column() {
        let mut mb = MigrationBuilder::new("postgresql");
        mb.add_column_of("Note", ClrType::String)
            .table("Blogs")
            .column_type("text")
            .nullable(true);
        let (text, _) = emit(mb.operations());
        assert_eq!(
            text,
            "migration_builder\n    .add_column::<String>(\"Note\")\n    .table(\"Blogs\")\n    .column_type(\"text\")\n    .nullable(true);\n"
        );
    }

    #[test]
    fn test_explicit_facets_are_kept() {
        let mut mb = MigrationBuilder::new("postgresql");
        mb.add_column_of("Code", ClrType::String)
            .table("Blogs")
            .unicode(true)
            .fixed_length(false)
            .nullable(false);
        mb.add_column_of("Tag", ClrType::String)
            .table("Blogs")
            .unicode(false)
            .fixed_length(true)
            .nullable(false);
        mb.add_column_of("Name", ClrType::String).table("Blogs").nullable(false);
        let (text, _) = emit(mb.operations());
        assert!(text.contains("    .add_column::<String>(\"Code\")\n    .table(\"Blogs\")\n    .unicode(true)\n    .fixed_length(false)\n"));
        assert!(text.contains("    .add_column::<String>(\"Tag\")\n    .table(\"Blogs\")\n    .unicode(false)\n    .fixed_length(true)\n"));
        let name = &text[text.find("\"Name\"").unwrap()..];
        assert!(!name.contains("unicode") && !name.contains("fixed_length"));
    }

    #[test]
    fn test_single_call_stays_on_one_line() {
        let mut mb = MigrationBuilder::new("postgresql");
        mb.ensure_schema("blog");
        mb.drop_schema("old");
        let (text, _) = emit(mb.operations());
        assert_eq!(
            text,
            "migration_builder.ensure_schema(\"blog\");\n\nmigration_builder.drop_schema(\"old\");\n"
        );
    }

    #[test]
    fn test_sequence_increment_default_omitted() {
        let mut mb = MigrationBuilder::new("postgresql");
        mb.create_sequence_of("Numbers", ClrType::I64);
        let (one, _) = emit(mb.operations());
        assert!(!one.contains("increment_by"));

        let mut mb = MigrationBuilder::new("postgresql");
        mb.create_sequence_of("Numbers", ClrType::I64).increment_by(5);
        let (five, _) = emit(mb.operations());
        assert!(five.contains(".increment_by(5)"));
    }

    #[test]
    fn test_create_table_closures() {
        let mut mb = MigrationBuilder::new("postgresql");
        mb.create_table("Posts")
            .columns(|table| {
                table.column_of("Id", ClrType::I32).nullable(false);
                table.column_of("BlogId", ClrType::I32).nullable(false);
            })
            .constraints(|table| {
                table.primary_key("PK_Posts").column("Id");
                table
                    .foreign_key("FK_Posts_Blogs_BlogId")
                    .column("BlogId")
                    .principal_table("Blogs")
                    .principal_column("Id")
                    .on_delete(ReferentialAction::Cascade);
            });
        let (text, imports) = emit(mb.operations());
        let expected = "\
migration_builder
    .create_table(\"Posts\")
    .columns(|table| {
        table.column::<i32>(\"Id\").nullable(false);
        table.column::<i32>(\"BlogId\").nullable(false);
    })
    .constraints(|table| {
        table.primary_key(\"PK_Posts\").column(\"Id\");
        table.foreign_key(\"FK_Posts_Blogs_BlogId\").column(\"BlogId\").principal_table(\"Blogs\").principal_column(\"Id\").on_delete(ReferentialAction::Cascade);
    });
";
        assert_eq!(text, expected);
        assert_eq!(imports.render(), vec!["use kiln_model::ReferentialAction;"]);
    }

    #[test]
    fn test_data_shapes_and_marker() {
        let mut mb = MigrationBuilder::new("postgresql");
        mb.insert_data("Blogs").columns(&["Id", "Name"]).values(crate::values![1, "a"]);
        assert!(!needs_grid_marker(mb.operations()));
        let (text, _) = emit(mb.operations());
        assert!(text.contains(".values(values![1, \"a\"])"));

        let mut mb = MigrationBuilder::new("postgresql");
        mb.insert_data("Blogs")
            .columns(&["Id", "Name"])
            .rows(crate::rows![[1, "a"], [2, Value::Null]]);
        assert!(needs_grid_marker(mb.operations()));
        let (text, imports) = emit(mb.operations());
        assert!(text.contains("    .rows(rows![\n        [1, \"a\"],\n        [2, Value::Null],\n    ]);\n"));
        assert_eq!(
            imports.render(),
            vec!["use kiln_migrate::rows;", "use kiln_model::Value;"]
        );
    }

    #[test]
    fn test_single_column_values() {
        let mut mb = MigrationBuilder::new("postgresql");
        mb.delete_data("Blogs").key_column("Id").key_values(crate::values![1, 2]);
        mb.delete_data("Blogs").key_column("Id").key_value(3);
        let (text, _) = emit(mb.operations());
        assert!(text.contains(".key_values(values![1, 2]);"));
        assert!(text.contains(".key_value(3);"));
        assert!(!needs_grid_marker(mb.operations()));
    }

    #[test]
    fn test_emission_is_deterministic() {
        let mut mb = MigrationBuilder::new("postgresql");
        mb.alter_column_of("Title", ClrType::String)
            .table("Blogs")
            .max_length(200)
            .nullable(false)
            .old_clr_type_of(ClrType::String)
            .old_nullable(true)
            .annotation("Postgres:Collation", "C");
        let (a, _) = emit(mb.operations());
        let (b, _) = emit(mb.operations());
        assert_eq!(a, b);
        assert!(a.contains(".old_clr_type::<String>()\n    .old_nullable(true)\n    .annotation("));
    }
}
