//! The compile-and-load capability behind [`MigrationCompiler`].
//!
//! A backend turns source texts into an in-memory image and loads an image
//! into [`TypeHandle`]s. The default [`InterpreterBackend`] parses the
//! generated builder chains, lowers them to operations and models, and
//! replays them when the loaded types are instantiated.
//!
//! [`MigrationCompiler`]: super::MigrationCompiler

use std::collections::HashMap;
use std::sync::Arc;

use kiln_model::{Model, ModelBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ast::Span;
use super::diagnostics::{Diagnostic, ids};
use super::lower;
use super::parser::parse_source;
use crate::builder::MigrationBuilder;
use crate::error::{MigrateResult, MigrationError};
use crate::migration::{Migration, MigrationMetadata, ModelSnapshot};
use crate::modules::{self, ModuleRef};
use crate::operations::Operation;
use crate::types::{TypeHandle, TypeInfo, TypeKind};

/// One source file handed to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceText {
    /// File name reported in diagnostics.
    pub file_name: String,
    /// Full source text.
    pub text: String,
}

impl SourceText {
    pub fn new(file_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            text: text.into(),
        }
    }
}

/// Everything a backend needs to compile one unit.
#[derive(Debug, Clone)]
pub struct CompilationRequest {
    /// Unique name of the unit to produce.
    pub unit_name: String,
    pub sources: Vec<SourceText>,
    /// Modules the sources may refer to.
    pub references: Vec<ModuleRef>,
    /// Warning ids that are dropped from the output.
    pub suppressed_diagnostics: Vec<String>,
}

/// Result of a compilation.
#[derive(Debug, Clone, Default)]
pub struct CompilationOutput {
    pub diagnostics: Vec<Diagnostic>,
    /// The in-memory image; `None` when compilation failed.
    pub image: Option<Vec<u8>>,
}

impl CompilationOutput {
    /// Diagnostics of error severity.
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }
}

/// Compiles source texts and loads compiled images.
pub trait CompilationBackend: Send + Sync {
    /// Compile a unit. Never fails outright; problems are diagnostics.
    fn compile(&self, request: &CompilationRequest) -> CompilationOutput;

    /// Load an image produced by [`compile`](Self::compile).
    fn load(&self, image: &[u8]) -> MigrateResult<LoadedUnit>;
}

/// A loaded unit and the types it defines.
#[derive(Debug)]
pub struct LoadedUnit {
    name: String,
    types: Vec<TypeHandle>,
}

impl LoadedUnit {
    pub fn new(name: impl Into<String>, types: Vec<TypeHandle>) -> Self {
        Self {
            name: name.into(),
            types,
        }
    }

    /// Unit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every type in the unit.
    pub fn types(&self) -> &[TypeHandle] {
        &self.types
    }

    /// The migration type whose id marker equals `id` exactly.
    pub fn find_migration(&self, id: &str) -> Option<&TypeHandle> {
        self.types
            .iter()
            .find(|t| t.kind == TypeKind::Migration && t.migration_id.as_deref() == Some(id))
    }

    /// The snapshot type named `name`.
    pub fn find_snapshot(&self, name: &str) -> Option<&TypeHandle> {
        self.types
            .iter()
            .find(|t| t.kind == TypeKind::ModelSnapshot && t.name == name)
    }
}

/// Kind of a type in an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Migration,
    ModelSnapshot,
    Other,
}

/// A type as stored in an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeImage {
    pub name: String,
    pub namespace: String,
    pub kind: ImageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_owner: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub up: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub down: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_model: Option<Model>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<Model>,
}

/// The serialized form of a compiled unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitImage {
    pub name: String,
    pub types: Vec<TypeImage>,
}

/// Interprets generated sources instead of building native code.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterpreterBackend;

impl InterpreterBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Duplicate locations are errors; one name at two versions is a warning.
fn check_references(references: &[ModuleRef]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut by_location: HashMap<&str, &ModuleRef> = HashMap::new();
    let mut by_name: HashMap<&str, &ModuleRef> = HashMap::new();
    for reference in references {
        if by_location.insert(&reference.location, reference).is_some() {
            diagnostics.push(Diagnostic::error(
                ids::DUPLICATE_REFERENCE,
                "",
                Span::default(),
                format!("module `{}` is referenced more than once ({})", reference.name, reference.location),
            ));
            continue;
        }
        match by_name.get(reference.name.as_str()) {
            Some(existing) if existing.version != reference.version => {
                diagnostics.push(Diagnostic::warning(
                    ids::REFERENCE_VERSION_MISMATCH,
                    "",
                    Span::default(),
                    format!(
                        "module `{}` is referenced at versions {} and {}; using {}",
                        reference.name, existing.version, reference.version, existing.version
                    ),
                ));
            }
            Some(_) => {}
            None => {
                by_name.insert(&reference.name, reference);
            }
        }
    }
    diagnostics
}

impl CompilationBackend for InterpreterBackend {
    fn compile(&self, request: &CompilationRequest) -> CompilationOutput {
        let mut diagnostics = check_references(&request.references);

        let mut files = Vec::with_capacity(request.sources.len());
        for source in &request.sources {
            match parse_source(&source.file_name, &source.text) {
                Ok(file) => files.push(file),
                Err(diagnostic) => diagnostics.push(diagnostic),
            }
        }

        let mut image = None;
        if !diagnostics.iter().any(Diagnostic::is_error) {
            let (types, lowered) = lower::lower_unit(&files, &request.references);
            diagnostics.extend(lowered);
            if !diagnostics.iter().any(Diagnostic::is_error) {
                let unit = UnitImage {
                    name: request.unit_name.clone(),
                    types,
                };
                match serde_json::to_vec(&unit) {
                    Ok(bytes) => image = Some(bytes),
                    Err(e) => diagnostics.push(Diagnostic::error(
                        ids::INVALID_ARGUMENT,
                        "",
                        Span::default(),
                        format!("cannot serialize unit: {}", e),
                    )),
                }
            }
        }

        diagnostics.retain(|d| d.is_error() || !request.suppressed_diagnostics.contains(&d.id));
        debug!(
            unit = %request.unit_name,
            diagnostics = diagnostics.len(),
            ok = image.is_some(),
            "Compiled unit"
        );
        CompilationOutput { diagnostics, image }
    }

    fn load(&self, image: &[u8]) -> MigrateResult<LoadedUnit> {
        let unit: UnitImage =
            serde_json::from_slice(image).map_err(image_error)?;
        if !modules::claim_unit_name(&unit.name) {
            return Err(MigrationError::load(format!("a unit named '{}' is already loaded", unit.name)));
        }

        let types = unit
            .types
            .into_iter()
            .map(|ty| activate(&unit.name, ty))
            .collect();
        Ok(LoadedUnit::new(unit.name, types))
    }
}

fn activate(unit: &str, ty: TypeImage) -> TypeHandle {
    match ty.kind {
        ImageKind::Migration => {
            let (name, namespace) = (ty.name.clone(), ty.namespace.clone());
            let image = Arc::new(ty);
            TypeInfo::migration_with(name, namespace, unit, move || {
                Arc::new(InterpretedMigration(Arc::clone(&image))) as Arc<dyn Migration>
            })
            .into_handle()
        }
        ImageKind::ModelSnapshot => {
            let (name, namespace) = (ty.name.clone(), ty.namespace.clone());
            let image = Arc::new(ty);
            TypeInfo::snapshot_with(name, namespace, unit, move || {
                Arc::new(InterpretedSnapshot(Arc::clone(&image))) as Arc<dyn ModelSnapshot>
            })
            .into_handle()
        }
        ImageKind::Other => TypeInfo::other(ty.name, ty.namespace, unit).into_handle(),
    }
}

fn replay(model: Option<&Model>, model_builder: &mut ModelBuilder) {
    if let Some(model) = model {
        *model_builder = ModelBuilder::from_model(model.clone());
    }
}

/// A compiled migration, replaying its lowered operations.
struct InterpretedMigration(Arc<TypeImage>);

impl MigrationMetadata for InterpretedMigration {
    fn id(&self) -> &str {
        self.0.migration_id.as_deref().unwrap_or_default()
    }

    fn model_owner(&self) -> Option<&str> {
        self.0.model_owner.as_deref()
    }

    fn build_target_model(&self, model_builder: &mut ModelBuilder) {
        replay(self.0.target_model.as_ref(), model_builder);
    }
}

impl Migration for InterpretedMigration {
    fn up(&self, migration_builder: &mut MigrationBuilder) {
        for operation in &self.0.up {
            migration_builder.push(operation.clone());
        }
    }

    fn down(&self, migration_builder: &mut MigrationBuilder) {
        for operation in &self.0.down {
            migration_builder.push(operation.clone());
        }
    }
}

/// A compiled snapshot, replaying its lowered model.
struct InterpretedSnapshot(Arc<TypeImage>);

impl ModelSnapshot for InterpretedSnapshot {
    fn model_owner(&self) -> Option<&str> {
        self.0.model_owner.as_deref()
    }

    fn build_model(&self, model_builder: &mut ModelBuilder) {
        replay(self.0.model.as_ref(), model_builder);
    }
}

/// Map an image decoding failure, naming the operation kind when the image
/// holds one this build does not know.
fn image_error(err: serde_json::Error) -> MigrationError {
    let message = err.to_string();
    let unknown = message
        .strip_prefix("unknown variant `")
        .and_then(|rest| rest.split_once('`'));
    match unknown {
        // Only the operation enum lists `AddColumn` among its expected variants.
        Some((kind, expected)) if expected.contains("`AddColumn`") => {
            MigrationError::UnknownOperation(kind.to_string())
        }
        _ => MigrationError::load(format!("invalid image: {}", message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn references() -> Vec<ModuleRef> {
        modules::loaded_modules()
    }

    const MIGRATION: &str = r#"// <auto-generated />

pub mod blog {
    pub mod migrations {
        use kiln_migrate::{Migration, MigrationBuilder};

        #[derive(Debug, Default)]
        pub struct AddNote;

        impl Migration for AddNote {
            fn up(&self, migration_builder: &mut MigrationBuilder) {
                migration_builder
                    .add_column::<String>("Note")
                    .table("Blogs")
                    .nullable(true);
            }

            fn down(&self, migration_builder: &mut MigrationBuilder) {
                migration_builder
                    .drop_column("Note")
                    .table("Blogs");
            }
        }
    }
}
"#;

    const METADATA: &str = r#"// <auto-generated />

pub mod blog {
    pub mod migrations {
        use kiln_migrate::MigrationMetadata;
        use kiln_model::ModelBuilder;

        impl MigrationMetadata for AddNote {
            fn id(&self) -> &str {
                "20240101120000_AddNote"
            }

            fn model_owner(&self) -> Option<&str> {
                Some("blog::BlogContext")
            }

            fn build_target_model(&self, _model_builder: &mut ModelBuilder) {}
        }
    }
}
"#;

    fn request(unit_name: &str, sources: Vec<SourceText>) -> CompilationRequest {
        CompilationRequest {
            unit_name: unit_name.to_string(),
            sources,
            references: references(),
            suppressed_diagnostics: vec![ids::UNUSED_IMPORT.to_string()],
        }
    }

    #[test]
    fn test_compile_and_load() {
        let backend = InterpreterBackend::new();
        let output = backend.compile(&request(
            "backend_test_compile_and_load",
            vec![
                SourceText::new("AddNote.rs", MIGRATION),
                SourceText::new("AddNote.Designer.rs", METADATA),
            ],
        ));
        assert!(!output.has_errors(), "{:?}", output.diagnostics);

        let unit = backend.load(output.image.as_deref().unwrap()).unwrap();
        let ty = unit.find_migration("20240101120000_AddNote").unwrap();
        assert_eq!(ty.namespace, "blog::migrations");
        assert_eq!(ty.module, "backend_test_compile_and_load");
        assert_eq!(ty.model_owner.as_deref(), Some("blog::BlogContext"));

        let migration = ty.create_migration().unwrap();
        let mut mb = MigrationBuilder::new("postgresql");
        migration.up(&mut mb);
        assert_eq!(mb.operations().len(), 1);
        assert_eq!(mb.operations()[0].kind(), "AddColumn");
    }

    #[test]
    fn test_loading_twice_fails() {
        let backend = InterpreterBackend::new();
        let output = backend.compile(&request(
            "backend_test_loading_twice",
            vec![
                SourceText::new("AddNote.rs", MIGRATION),
                SourceText::new("AddNote.Designer.rs", METADATA),
            ],
        ));
        let image = output.image.unwrap();
        backend.load(&image).unwrap();
        assert!(matches!(backend.load(&image), Err(MigrationError::Load(_))));
    }

    #[test]
    fn test_syntax_error_produces_no_image() {
        let backend = InterpreterBackend::new();
        let output = backend.compile(&request(
            "backend_test_syntax_error",
            vec![SourceText::new("Broken.rs", "impl Migration for {")],
        ));
        assert!(output.has_errors());
        assert!(output.image.is_none());
        assert_eq!(output.diagnostics[0].id, ids::SYNTAX_ERROR);
    }

    #[test]
    fn test_reference_checks() {
        let a = ModuleRef::new("kiln_pg", "1.0.0", "crate:kiln_pg@1");
        let b = ModuleRef::new("kiln_pg", "2.0.0", "crate:kiln_pg@2");
        let diagnostics = check_references(&[a.clone(), b, a]);
        let found: Vec<&str> = diagnostics.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(found, vec![ids::REFERENCE_VERSION_MISMATCH, ids::DUPLICATE_REFERENCE]);
        assert!(!diagnostics[0].is_error());
        assert!(diagnostics[1].is_error());
    }

    #[test]
    fn test_unknown_operation_in_image() {
        let err = serde_json::from_str::<Operation>(r#"{"kind":"Frobnicate"}"#).unwrap_err();
        assert!(matches!(image_error(err), MigrationError::UnknownOperation(kind) if kind == "Frobnicate"));

        let err = serde_json::from_slice::<UnitImage>(b"not json").unwrap_err();
        assert!(matches!(image_error(err), MigrationError::Load(_)));
    }

    #[test]
    fn test_unknown_type_kind_is_a_load_error() {
        let err = serde_json::from_str::<ImageKind>(r#""Frobnicate""#).unwrap_err();
        let MigrationError::Load(message) = image_error(err) else {
            panic!("Expected a load error");
        };
        assert!(message.contains("Frobnicate"));
    }
}
