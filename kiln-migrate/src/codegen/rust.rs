//! The Rust migrations code generator.

use std::sync::Arc;

use kiln_model::Model;
use tracing::debug;

use super::annotation::{AnnotationCodeGenerator, RelationalAnnotationCodeGenerator};
use super::indented::IndentedStringBuilder;
use super::literal::{self, Imports};
use super::snapshot::SnapshotWriter;
use super::{MigrationsCodeGenerator, operation};
use crate::error::MigrateResult;
use crate::operations::Operation;

/// First line of every generated file.
pub const AUTO_GENERATED_HEADER: &str = "// <auto-generated />";

/// Generates Rust builder-chain source for migrations and snapshots.
#[derive(Clone)]
pub struct RustMigrationsGenerator {
    annotations: Arc<dyn AnnotationCodeGenerator>,
}

impl Default for RustMigrationsGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RustMigrationsGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustMigrationsGenerator").finish_non_exhaustive()
    }
}

impl RustMigrationsGenerator {
    pub fn new() -> Self {
        Self {
            annotations: Arc::new(RelationalAnnotationCodeGenerator),
        }
    }

    /// Use a provider-specific annotation translator.
    pub fn with_annotation_generator(annotations: Arc<dyn AnnotationCodeGenerator>) -> Self {
        Self { annotations }
    }

    fn model_method(&self, b: &mut IndentedStringBuilder, name: &str, model: &Model, imports: &mut Imports) {
        let empty = model.annotations.is_empty() && model.entity_types.is_empty() && model.sequences.is_empty();
        if empty {
            b.append_line(&format!(
                "fn {}(&self, _model_builder: &mut ModelBuilder) {{}}",
                name
            ));
            return;
        }
        let writer = SnapshotWriter::new(self.annotations.as_ref());
        b.block(
            &format!("fn {}(&self, model_builder: &mut ModelBuilder)", name),
            |b| writer.write("model_builder", model, b, imports),
        );
    }
}

/// Wrap `body` in the `pub mod` blocks of `namespace`, with the imports
/// inside the innermost module.
fn assemble(namespace: &str, imports: &Imports, body: &str) -> String {
    let modules: Vec<&str> = namespace
        .split("::")
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .collect();

    let mut b = IndentedStringBuilder::new();
    b.append_line(AUTO_GENERATED_HEADER);
    if modules.is_empty() {
        for line in imports.render() {
            b.append_line(&line);
        }
        b.blank_line();
        b.append(body);
        return b.into_string();
    }

    b.blank_line();
    for module in &modules {
        b.append_line(&format!("pub mod {} {{", module));
        b.indent();
    }
    for line in imports.render() {
        b.append_line(&line);
    }
    b.blank_line();
    b.append(body);
    for _ in &modules {
        b.dedent();
        b.append_line("}");
    }
    b.into_string()
}

fn operations_method(b: &mut IndentedStringBuilder, name: &str, operations: &[Operation], imports: &mut Imports) {
    if operations.is_empty() {
        b.append_line(&format!(
            "fn {}(&self, _migration_builder: &mut MigrationBuilder) {{}}",
            name
        ));
        return;
    }
    b.block(
        &format!("fn {}(&self, migration_builder: &mut MigrationBuilder)", name),
        |b| operation::generate("migration_builder", operations, b, imports),
    );
}

fn owner_method(b: &mut IndentedStringBuilder, model_owner: &str) {
    b.block("fn model_owner(&self) -> Option<&str>", |b| {
        b.append_line(&format!("Some({})", literal::string(model_owner)));
    });
}

impl MigrationsCodeGenerator for RustMigrationsGenerator {
    fn language(&self) -> &str {
        "rust"
    }

    fn file_extension(&self) -> &str {
        ".rs"
    }

    fn generate_migration(
        &self,
        namespace: &str,
        name: &str,
        up: &[Operation],
        down: &[Operation],
    ) -> MigrateResult<String> {
        debug!(namespace, name, up = up.len(), down = down.len(), "Generating migration code");
        let mut imports = Imports::new();
        imports.add("kiln_migrate::Migration");
        imports.add("kiln_migrate::MigrationBuilder");

        let mut body = IndentedStringBuilder::new();
        body.append_line("#[derive(Debug, Default)]");
        body.append_line(&format!("pub struct {};", name));
        body.blank_line();
        if operation::needs_grid_marker(up) || operation::needs_grid_marker(down) {
            body.append_line("#[rustfmt::skip]");
        }
        body.block(&format!("impl Migration for {}", name), |b| {
            operations_method(b, "up", up, &mut imports);
            b.blank_line();
            operations_method(b, "down", down, &mut imports);
        });

        Ok(assemble(namespace, &imports, body.as_str()))
    }

    fn generate_metadata(
        &self,
        namespace: &str,
        model_owner: &str,
        name: &str,
        id: &str,
        target_model: &Model,
    ) -> MigrateResult<String> {
        debug!(namespace, id, "Generating migration metadata code");
        let mut imports = Imports::new();
        imports.add("kiln_migrate::MigrationMetadata");
        imports.add("kiln_model::ModelBuilder");

        let mut body = IndentedStringBuilder::new();
        body.block(&format!("impl MigrationMetadata for {}", name), |b| {
            b.block("fn id(&self) -> &str", |b| {
                b.append_line(&literal::string(id));
            });
            b.blank_line();
            owner_method(b, model_owner);
            b.blank_line();
            self.model_method(b, "build_target_model", target_model, &mut imports);
        });

        Ok(assemble(namespace, &imports, body.as_str()))
    }

    fn generate_snapshot(
        &self,
        namespace: &str,
        model_owner: &str,
        snapshot_name: &str,
        model: &Model,
    ) -> MigrateResult<String> {
        debug!(namespace, snapshot_name, "Generating model snapshot code");
        let mut imports = Imports::new();
        imports.add("kiln_migrate::ModelSnapshot");
        imports.add("kiln_model::ModelBuilder");

        let mut body = IndentedStringBuilder::new();
        body.append_line("#[derive(Debug, Default)]");
        body.append_line(&format!("pub struct {};", snapshot_name));
        body.blank_line();
        body.block(&format!("impl ModelSnapshot for {}", snapshot_name), |b| {
            owner_method(b, model_owner);
            b.blank_line();
            self.model_method(b, "build_model", model, &mut imports);
        });

        Ok(assemble(namespace, &imports, body.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MigrationBuilder;
    use kiln_model::{ClrType, ModelBuilder};
    use pretty_assertions::assert_eq;

    fn note_up() -> Vec<Operation> {
        let mut mb = MigrationBuilder::new("postgresql");
        mb.add_column_of("Note", ClrType::String).table("Blogs").nullable(true);
        mb.into_operations()
    }

    fn note_down() -> Vec<Operation> {
        let mut mb = MigrationBuilder::new("postgresql");
        mb.drop_column("Note").table("Blogs");
        mb.into_operations()
    }

    #[test]
    fn test_migration_file() {
        let generator = RustMigrationsGenerator::new();
        let text = generator
            .generate_migration("blog::migrations", "AddNote", &note_up(), &note_down())
            .unwrap();
        let expected = "\
// <auto-generated />

pub mod blog {
    pub mod migrations {
        use kiln_migrate::{Migration, MigrationBuilder};

        #[derive(Debug, Default)]
        pub struct AddNote;

        impl Migration for AddNote {
            fn up(&self, migration_builder: &mut MigrationBuilder) {
                migration_builder
                    .add_column::<String>(\"Note\")
                    .table(\"Blogs\")
                    .nullable(true);
            }

            fn down(&self, migration_builder: &mut MigrationBuilder) {
                migration_builder
                    .drop_column(\"Note\")
                    .table(\"Blogs\");
            }
        }
    }
}
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_empty_bodies_and_root_namespace() {
        let generator = RustMigrationsGenerator::new();
        let text = generator.generate_migration("", "Initial", &[], &[]).unwrap();
        assert!(text.starts_with("// <auto-generated />\nuse kiln_migrate::{Migration, MigrationBuilder};\n\n"));
        assert!(text.contains("fn up(&self, _migration_builder: &mut MigrationBuilder) {}"));
        assert!(!text.contains("rustfmt::skip"));
    }

    #[test]
    fn test_metadata_and_snapshot_files() {
        let mut mb = ModelBuilder::new();
        mb.entity("Blog", |b| {
            b.property::<i32>("Id");
            b.has_key(&["Id"]);
        });
        let model = mb.build();
        let generator = RustMigrationsGenerator::new();

        let metadata = generator
            .generate_metadata("blog::migrations", "blog::BlogContext", "AddNote", "20240101120000_AddNote", &model)
            .unwrap();
        assert!(metadata.contains("impl MigrationMetadata for AddNote {"));
        assert!(metadata.contains("\"20240101120000_AddNote\""));
        assert!(metadata.contains("Some(\"blog::BlogContext\")"));
        assert!(metadata.contains("model_builder.entity(\"Blog\", |b| {"));

        let snapshot = generator
            .generate_snapshot("blog::migrations", "blog::BlogContext", "BlogContextModelSnapshot", &model)
            .unwrap();
        assert!(snapshot.contains("pub struct BlogContextModelSnapshot;"));
        assert!(snapshot.contains("fn build_model(&self, model_builder: &mut ModelBuilder) {"));
        assert!(snapshot.contains("        use kiln_migrate::ModelSnapshot;\n        use kiln_model::ModelBuilder;\n"));
    }

    #[test]
    fn test_grid_data_adds_marker() {
        let mut mb = MigrationBuilder::new("postgresql");
        mb.insert_data("Blogs")
            .columns(&["Id", "Name"])
            .rows(crate::rows![[1, "a"], [2, "b"]]);
        let generator = RustMigrationsGenerator::new();
        let text = generator
            .generate_migration("blog", "Seed", mb.operations(), &[])
            .unwrap();
        assert!(text.contains("    #[rustfmt::skip]\n    impl Migration for Seed {"));
        assert!(text.contains("use kiln_migrate::{Migration, MigrationBuilder, rows};"));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let generator = RustMigrationsGenerator::new();
        let a = generator.generate_migration("blog", "AddNote", &note_up(), &note_down()).unwrap();
        let b = generator.generate_migration("blog", "AddNote", &note_up(), &note_down()).unwrap();
        assert_eq!(a, b);
    }
}
