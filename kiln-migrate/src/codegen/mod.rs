//! Source code generation for migrations and model snapshots.
//!
//! A [`MigrationsCodeGenerator`] turns operations and models into source
//! text for one target language. The output is a compatibility surface:
//! the same inputs always give byte-identical text, and the compiler reads
//! it back.

pub mod annotation;
pub mod indented;
pub mod literal;
pub mod operation;
pub mod rust;
pub mod snapshot;

use std::sync::Arc;

use kiln_model::Model;

use crate::error::{MigrateResult, MigrationError};
use crate::operations::Operation;

pub use annotation::{AnnotationCodeGenerator, AnnotationTarget, RelationalAnnotationCodeGenerator};
pub use indented::IndentedStringBuilder;
pub use rust::RustMigrationsGenerator;

/// Language used when none is requested.
pub const DEFAULT_LANGUAGE: &str = "rust";

/// Generates the three source files of a migration.
pub trait MigrationsCodeGenerator: Send + Sync {
    /// Language name, e.g. `rust`.
    fn language(&self) -> &str;

    /// File extension including the dot.
    fn file_extension(&self) -> &str;

    /// The migration body with its `up` and `down` operations.
    fn generate_migration(
        &self,
        namespace: &str,
        name: &str,
        up: &[Operation],
        down: &[Operation],
    ) -> MigrateResult<String>;

    /// The migration metadata: id, owner and target model.
    fn generate_metadata(
        &self,
        namespace: &str,
        model_owner: &str,
        name: &str,
        id: &str,
        target_model: &Model,
    ) -> MigrateResult<String>;

    /// The full model snapshot.
    fn generate_snapshot(
        &self,
        namespace: &str,
        model_owner: &str,
        snapshot_name: &str,
        model: &Model,
    ) -> MigrateResult<String>;
}

/// Picks a code generator by language name.
#[derive(Clone)]
pub struct CodeGeneratorSelector {
    generators: Vec<Arc<dyn MigrationsCodeGenerator>>,
}

impl Default for CodeGeneratorSelector {
    fn default() -> Self {
        Self {
            generators: vec![Arc::new(RustMigrationsGenerator::new())],
        }
    }
}

impl std::fmt::Debug for CodeGeneratorSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let languages: Vec<&str> = self.generators.iter().map(|g| g.language()).collect();
        f.debug_struct("CodeGeneratorSelector")
            .field("languages", &languages)
            .finish()
    }
}

impl CodeGeneratorSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a generator. A later registration for the same language wins.
    pub fn register(&mut self, generator: Arc<dyn MigrationsCodeGenerator>) -> &mut Self {
        self.generators.insert(0, generator);
        self
    }

    /// The generator for `language`, or the default one.
    pub fn select(&self, language: Option<&str>) -> MigrateResult<Arc<dyn MigrationsCodeGenerator>> {
        let language = language.unwrap_or(DEFAULT_LANGUAGE);
        self.generators
            .iter()
            .find(|g| g.language().eq_ignore_ascii_case(language))
            .cloned()
            .ok_or_else(|| MigrationError::UnknownLanguage(language.to_string()))
    }
}
