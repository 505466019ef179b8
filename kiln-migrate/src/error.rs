//! Error types for the migration pipeline.

// These warnings are false positives - the fields are used by derive macros
#![allow(unused_assignments)]

use kiln_model::ModelError;
use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur while scaffolding, compiling, registering or
/// applying migrations.
#[derive(Debug, Error, Diagnostic)]
pub enum MigrationError {
    /// A migration with this name or id already exists.
    #[error("The name '{0}' is used by an existing migration")]
    #[diagnostic(code(kiln::migrate::duplicate_name))]
    DuplicateMigrationName(String),

    /// The name is reserved for the base migration type.
    #[error("The migration name '{0}' is not valid. Migration names cannot be '{0}'")]
    #[diagnostic(code(kiln::migrate::reserved_name))]
    ReservedMigrationName(String),

    /// The model has not changed since the last snapshot.
    #[error("No pending model changes were detected; there is nothing to migrate")]
    #[diagnostic(code(kiln::migrate::no_pending_changes))]
    NoPendingChanges,

    /// Removal was requested but no model snapshot exists.
    #[error("No model snapshot was found; there are no migrations to remove")]
    #[diagnostic(code(kiln::migrate::no_snapshot))]
    NoSnapshot,

    /// The migration to remove has been applied.
    #[error("The migration '{0}' has already been applied to the database. Revert it and try again, or pass `force` to revert it automatically")]
    #[diagnostic(code(kiln::migrate::revert_migration))]
    RevertMigration(String),

    /// Generated source failed to compile.
    #[error("Compilation of migration '{id}' failed:\n{diagnostics}")]
    #[diagnostic(code(kiln::migrate::compilation))]
    Compilation {
        /// Migration id.
        id: String,
        /// Error diagnostics, newline-joined.
        diagnostics: String,
    },

    /// Compiled output did not contain the migration type.
    #[error("The compiled unit does not contain a migration with id '{0}'")]
    #[diagnostic(code(kiln::migrate::migration_type_not_found))]
    MigrationTypeNotFound(String),

    /// No code generator is registered for the language.
    #[error("No migrations code generator is available for language '{0}'")]
    #[diagnostic(code(kiln::migrate::unknown_language))]
    UnknownLanguage(String),

    /// A compiled image holds an operation kind this build does not know.
    #[error("Unknown migration operation '{0}'")]
    #[diagnostic(code(kiln::migrate::unknown_operation))]
    UnknownOperation(String),

    /// Loading a compiled unit failed.
    #[error("Failed to load compiled unit: {0}")]
    #[diagnostic(code(kiln::migrate::load))]
    Load(String),

    /// A migration id or name that is not known.
    #[error("Migration '{0}' not found")]
    #[diagnostic(code(kiln::migrate::not_found))]
    NotFound(String),

    /// Database operation error.
    #[error("Database error: {0}")]
    #[diagnostic(code(kiln::migrate::database))]
    Database(String),

    /// The operation was cancelled.
    #[error("The operation was cancelled")]
    #[diagnostic(code(kiln::migrate::cancelled))]
    Cancelled,

    /// File system error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(kiln::migrate::io))]
    Io(#[from] std::io::Error),

    /// Model construction or projection error.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),
}

impl MigrationError {
    /// Create a compilation error from individual diagnostic lines.
    pub fn compilation<I, S>(id: impl Into<String>, diagnostics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let diagnostics = diagnostics
            .into_iter()
            .map(|d| d.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        Self::Compilation {
            id: id.into(),
            diagnostics,
        }
    }

    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a load error.
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    /// Check if this is a recoverable error.
    ///
    /// Recoverable errors leave no partial state behind; the same call can
    /// be retried once the condition is addressed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoPendingChanges
                | Self::DuplicateMigrationName(_)
                | Self::Database(_)
                | Self::Cancelled
        )
    }
}

#[cfg(test)]
#[allow(unused_assignments)]
mod tests {
    use super::*;

    #[test]
    fn test_compilation_joins_diagnostics() {
        let err = MigrationError::compilation(
            "20240101120000_AddNote",
            ["error[syntax_error]: a", "error[unknown_method]: b"],
        );
        match &err {
            MigrationError::Compilation { id, diagnostics } => {
                assert_eq!(id, "20240101120000_AddNote");
                assert_eq!(diagnostics, "error[syntax_error]: a\nerror[unknown_method]: b");
            }
            _ => panic!("Expected Compilation"),
        }
        assert!(err.to_string().contains("20240101120000_AddNote"));
    }

    #[test]
    fn test_reserved_name_display() {
        let err = MigrationError::ReservedMigrationName("Migration".to_string());
        assert!(err.to_string().contains("'Migration'"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(MigrationError::NoPendingChanges.is_recoverable());
        assert!(MigrationError::database("connection reset").is_recoverable());
        assert!(!MigrationError::MigrationTypeNotFound("x".into()).is_recoverable());
    }

    #[test]
    fn test_model_error_is_transparent() {
        let err: MigrationError = ModelError::unknown_entity("Blog").into();
        assert_eq!(err.to_string(), "unknown entity type `Blog`");
        let code = err.code().map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("kiln::model::unknown_entity"));
    }
}
