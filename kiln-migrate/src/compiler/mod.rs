//! In-memory compilation of scaffolded migrations.
//!
//! [`MigrationCompiler`] turns the three generated source texts of a
//! [`ScaffoldedMigration`] into a loaded unit and resolves the migration
//! and snapshot types in it. The actual compile-and-load step is delegated
//! to a [`CompilationBackend`]; the default [`InterpreterBackend`] parses
//! the generated builder chains and replays them without writing anything
//! to disk.
//!
//! A compiler is meant to be shared process-wide. Its only state is the
//! base reference set, computed once on first use.

pub mod ast;
pub mod backend;
pub mod diagnostics;
pub mod grammar;
pub mod lower;
pub mod parser;

use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use kiln_model::KilnConfig;
use tracing::{debug, instrument};

use crate::error::{MigrateResult, MigrationError};
use crate::modules::{self, ModuleRef};
use crate::owner::ModelOwner;
use crate::scaffold::ScaffoldedMigration;
use crate::types::TypeHandle;

pub use backend::{
    CompilationBackend, CompilationOutput, CompilationRequest, ImageKind, InterpreterBackend,
    LoadedUnit, SourceText, TypeImage, UnitImage,
};
pub use diagnostics::{Diagnostic, Severity};

/// Compiler settings.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Module name prefixes admitted into the base reference set.
    pub reference_prefixes: Vec<String>,
    /// Diagnostic ids that never surface.
    pub suppressed_diagnostics: Vec<String>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self::from_config(&KilnConfig::default())
    }
}

impl CompilerOptions {
    /// Options from the `[compiler]` section of `kiln.toml`.
    pub fn from_config(config: &KilnConfig) -> Self {
        Self {
            reference_prefixes: config.compiler.reference_prefixes.clone(),
            suppressed_diagnostics: config.compiler.suppressed_diagnostics.clone(),
        }
    }

    fn admits(&self, module: &ModuleRef) -> bool {
        self.reference_prefixes
            .iter()
            .any(|prefix| module.name == *prefix || module.name.starts_with(prefix.as_str()))
    }
}

/// The result of compiling a scaffolded migration.
#[derive(Debug, Clone)]
pub struct CompiledMigration {
    /// The loaded unit.
    pub unit: Arc<LoadedUnit>,
    /// The migration type.
    pub migration_type: TypeHandle,
    /// The snapshot type, when the unit contains one.
    pub snapshot_type: Option<TypeHandle>,
    /// The migration id.
    pub migration_id: String,
    /// The sources this was compiled from.
    pub scaffolded: ScaffoldedMigration,
}

/// Compiles scaffolded migrations into loaded units.
pub struct MigrationCompiler {
    options: CompilerOptions,
    backend: Arc<dyn CompilationBackend>,
    base_references: OnceLock<Vec<ModuleRef>>,
}

impl Default for MigrationCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MigrationCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationCompiler")
            .field("options", &self.options)
            .field("base_references", &self.base_references.get().map(Vec::len))
            .finish()
    }
}

impl MigrationCompiler {
    /// A compiler with default options and the interpreter backend.
    pub fn new() -> Self {
        Self::with_options(CompilerOptions::default())
    }

    /// A compiler with the given options and the interpreter backend.
    pub fn with_options(options: CompilerOptions) -> Self {
        Self {
            options,
            backend: Arc::new(InterpreterBackend::new()),
            base_references: OnceLock::new(),
        }
    }

    /// Replace the compilation backend.
    pub fn with_backend(mut self, backend: Arc<dyn CompilationBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Options this compiler was built with.
    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Loaded modules whose names match the reference prefixes.
    ///
    /// Computed on first use and reused afterwards.
    pub fn base_references(&self) -> &[ModuleRef] {
        self.base_references.get_or_init(|| {
            let references: Vec<ModuleRef> = modules::loaded_modules()
                .into_iter()
                .filter(|module| self.options.admits(module))
                .collect();
            debug!(count = references.len(), "computed base references");
            references
        })
    }

    /// The reference set for compiling against `owner`, deduplicated by
    /// location.
    pub fn references_for(&self, owner: &dyn ModelOwner, additional: &[ModuleRef]) -> Vec<ModuleRef> {
        let mut references: IndexMap<String, ModuleRef> = IndexMap::new();
        let mut add = |module: ModuleRef| {
            references.entry(module.location.clone()).or_insert(module);
        };

        for module in self.base_references() {
            add(module.clone());
        }
        add(owner.module());
        for name in owner.referenced_modules() {
            match modules::find_module(&name) {
                Some(module) => add(module),
                None => debug!(module = %name, "skipping unresolved reference"),
            }
        }
        for module in additional {
            add(module.clone());
        }

        references.into_values().collect()
    }

    /// Compile a scaffolded migration and resolve its types.
    #[instrument(skip_all, fields(migration_id = %scaffolded.migration_id))]
    pub fn compile_migration(
        &self,
        scaffolded: &ScaffoldedMigration,
        owner: &dyn ModelOwner,
        additional_references: &[ModuleRef],
    ) -> MigrateResult<CompiledMigration> {
        let id = &scaffolded.migration_id;
        let unit_name = format!("{}_{}", id, uuid::Uuid::new_v4().simple());
        let ext = &scaffolded.file_extension;

        let request = CompilationRequest {
            unit_name,
            sources: vec![
                SourceText::new(format!("{}{}", id, ext), scaffolded.migration_code.clone()),
                SourceText::new(format!("{}.Designer{}", id, ext), scaffolded.metadata_code.clone()),
                SourceText::new(
                    format!("{}{}", scaffolded.snapshot_name, ext),
                    scaffolded.snapshot_code.clone(),
                ),
            ],
            references: self.references_for(owner, additional_references),
            suppressed_diagnostics: self.options.suppressed_diagnostics.clone(),
        };

        let output = self.backend.compile(&request);
        if output.has_errors() {
            return Err(MigrationError::compilation(
                id.clone(),
                output.errors().map(|d| d.to_string()),
            ));
        }
        for warning in &output.diagnostics {
            debug!(%warning, "compiler warning");
        }
        let image = output
            .image
            .ok_or_else(|| MigrationError::load(format!("compilation of '{}' produced no image", id)))?;

        let unit = self.backend.load(&image)?;
        drop(image);

        let migration_type = unit
            .find_migration(id)
            .cloned()
            .ok_or_else(|| MigrationError::MigrationTypeNotFound(id.clone()))?;
        let snapshot_type = unit.find_snapshot(&scaffolded.snapshot_name).cloned();

        debug!(unit = unit.name(), has_snapshot = snapshot_type.is_some(), "compiled migration");
        Ok(CompiledMigration {
            unit: Arc::new(unit),
            migration_type,
            snapshot_type,
            migration_id: id.clone(),
            scaffolded: scaffolded.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{MigrationsCodeGenerator, RustMigrationsGenerator};
    use crate::operations::Operation;
    use crate::owner::StaticModelOwner;
    use crate::builder::MigrationBuilder;
    use kiln_model::{Model, ModelBuilder};

    fn note_model() -> Model {
        let mut model_builder = ModelBuilder::new();
        model_builder.entity("Blog", |b| {
            b.property::<i32>("Id");
            b.property::<Option<String>>("Note");
            b.has_key(&["Id"]);
            b.to_table("Blogs");
        });
        model_builder.build()
    }

    fn scaffold(id: &str, up: &[Operation], down: &[Operation], migration_code: Option<String>) -> ScaffoldedMigration {
        let generator = RustMigrationsGenerator::new();
        let model = note_model();
        let namespace = "blog::migrations";
        let name = &id[15..];
        ScaffoldedMigration {
            file_extension: ".rs".into(),
            language: "rust".into(),
            previous_migration_id: None,
            migration_code: migration_code
                .unwrap_or_else(|| generator.generate_migration(namespace, name, up, down).unwrap()),
            migration_id: id.into(),
            metadata_code: generator
                .generate_metadata(namespace, "blog::BlogContext", name, id, &model)
                .unwrap(),
            migration_sub_namespace: "migrations".into(),
            snapshot_code: generator
                .generate_snapshot(namespace, "blog::BlogContext", "BlogContextModelSnapshot", &model)
                .unwrap(),
            snapshot_name: "BlogContextModelSnapshot".into(),
            snapshot_sub_namespace: "migrations".into(),
        }
    }

    fn add_note() -> (Vec<Operation>, Vec<Operation>) {
        let mut up = MigrationBuilder::default();
        up.add_column::<Option<String>>("Note").table("Blogs");
        let mut down = MigrationBuilder::default();
        down.drop_column("Note").table("Blogs");
        (up.into_operations(), down.into_operations())
    }

    fn owner() -> StaticModelOwner {
        StaticModelOwner::new("BlogContext", "blog", note_model())
    }

    #[test]
    fn test_compile_resolves_types() {
        let (up, down) = add_note();
        let scaffolded = scaffold("20240101120000_AddNote", &up, &down, None);
        let compiled = MigrationCompiler::new()
            .compile_migration(&scaffolded, &owner(), &[])
            .unwrap();

        assert_eq!(compiled.migration_id, "20240101120000_AddNote");
        assert_eq!(compiled.migration_type.migration_id.as_deref(), Some("20240101120000_AddNote"));
        assert_eq!(compiled.migration_type.model_owner.as_deref(), Some("blog::BlogContext"));
        assert!(compiled.snapshot_type.is_some());

        let migration = compiled.migration_type.create_migration().unwrap();
        let mut migration_builder = MigrationBuilder::default();
        migration.up(&mut migration_builder);
        assert_eq!(migration_builder.into_operations(), up);
    }

    #[test]
    fn test_same_id_compiles_twice() {
        let (up, down) = add_note();
        let scaffolded = scaffold("20240101120000_Twice", &up, &down, None);
        let compiler = MigrationCompiler::new();
        let first = compiler.compile_migration(&scaffolded, &owner(), &[]).unwrap();
        let second = compiler.compile_migration(&scaffolded, &owner(), &[]).unwrap();
        assert_ne!(first.unit.name(), second.unit.name());
        assert!(!first.migration_type.ptr_eq(&second.migration_type));
    }

    #[test]
    fn test_errors_are_aggregated() {
        let broken = r#"
            pub mod blog {
                pub mod migrations {
                    use kiln_migrate::{Migration, MigrationBuilder};

                    pub struct Broken;

                    impl Migration for Broken {
                        fn up(&self, migration_builder: &mut MigrationBuilder) {
                            migration_builder.frobnicate("Blogs");
                            migration_builder.drop_table("Blogs").explode(true);
                        }
                    }
                }
            }
        "#;
        let scaffolded = scaffold("20240101120000_Broken", &[], &[], Some(broken.to_string()));
        match MigrationCompiler::new().compile_migration(&scaffolded, &owner(), &[]) {
            Err(MigrationError::Compilation { id, diagnostics }) => {
                assert_eq!(id, "20240101120000_Broken");
                assert_eq!(diagnostics.lines().count(), 2);
                assert!(diagnostics.contains("frobnicate"));
                assert!(diagnostics.contains("explode"));
            }
            other => panic!("Expected Compilation error, got {:?}", other.map(|c| c.migration_id)),
        }
    }

    #[test]
    fn test_missing_migration_type() {
        let (up, down) = add_note();
        let mut scaffolded = scaffold("20240101120000_AddNote", &up, &down, None);
        scaffolded.migration_id = "20240101120000_Other".into();
        match MigrationCompiler::new().compile_migration(&scaffolded, &owner(), &[]) {
            Err(MigrationError::MigrationTypeNotFound(id)) => assert_eq!(id, "20240101120000_Other"),
            other => panic!("Expected MigrationTypeNotFound, got {:?}", other.map(|c| c.migration_id)),
        }
    }

    #[test]
    fn test_references_dedupe_by_location() {
        let compiler = MigrationCompiler::new();
        let owner = owner().with_reference("kiln_model").with_reference("no_such_crate");
        let extra = ModuleRef::new("kiln_model_again", "1.0.0", "crate:kiln_model");
        let references = compiler.references_for(&owner, &[extra]);

        let locations: Vec<&str> = references.iter().map(|r| r.location.as_str()).collect();
        let unique: std::collections::HashSet<&str> = locations.iter().copied().collect();
        assert_eq!(locations.len(), unique.len());
        assert!(references.iter().any(|r| r.name == "kiln_model"));
        assert!(references.iter().all(|r| r.name != "kiln_model_again"));
        assert!(locations.contains(&"crate:blog"));
        assert!(references.iter().all(|r| r.name != "no_such_crate"));
    }

    #[test]
    fn test_base_references_are_memoized() {
        let compiler = MigrationCompiler::new();
        let first = compiler.base_references().as_ptr();
        let second = compiler.base_references().as_ptr();
        assert_eq!(first, second);
        assert!(compiler.base_references().iter().any(|m| m.name == "kiln_migrate"));
    }
}
