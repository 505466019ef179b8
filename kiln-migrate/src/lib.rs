//! # kiln-migrate
//!
//! Runtime migration pipeline for the Kiln ORM.
//!
//! This crate provides:
//! - Schema-change [`Operation`]s and the fluent [`MigrationBuilder`]
//! - Model diffing ([`RelationalModelDiffer`]) and snapshot normalization
//! - Source generation for migrations, metadata and model snapshots
//! - An in-memory compiler that turns generated sources back into
//!   migrations without restarting the process
//! - A registry that overlays runtime-compiled migrations on the ones the
//!   application shipped with
//! - History tracking, planning and application of migrations
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌─────────────┐
//! │ Live Model   │────▶│ Model Differ   │────▶│ Code Gen    │
//! └──────────────┘     └────────────────┘     └─────────────┘
//!        ▲                                           │
//!        │                                           ▼
//! ┌──────────────┐     ┌────────────────┐     ┌─────────────┐
//! │ Snapshot     │◀────│ Registry       │◀────│ Compiler    │
//! └──────────────┘     └────────────────┘     └─────────────┘
//!                              │
//!                              ▼
//!                      ┌────────────────┐     ┌─────────────┐
//!                      │ Migrator       │────▶│ History Tbl │
//!                      └────────────────┘     └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kiln_migrate::{
//!     DynamicMigrationsAssembly, InMemoryHistoryRepository, RuntimeMigrationOptions, RuntimeMigrationService,
//!     StaticMigrationsAssembly,
//! };
//!
//! let config = kiln_model::KilnConfig::from_file("kiln.toml")?;
//! let history = Arc::new(InMemoryHistoryRepository::from_config(&config));
//! let service = RuntimeMigrationService::from_config(&config, owner, history, executor)?;
//!
//! // One registry per session.
//! let mut assembly = DynamicMigrationsAssembly::new(Arc::new(StaticMigrationsAssembly::empty()));
//! let result = service.create_and_apply_migration(
//!     &mut assembly,
//!     "AddNote",
//!     &RuntimeMigrationOptions::from_config(&config),
//! )?;
//! println!("{} applied: {}", result.migration_id, result.applied);
//! ```
//!
//! ## Generated files
//!
//! A persisted migration consists of three files:
//!
//! ```text
//! migrations/
//! ├── 20240101120000_AddNote.rs            # up and down operations
//! ├── 20240101120000_AddNote.Designer.rs   # id, owner and target model
//! └── BlogContextModelSnapshot.rs          # the full current model
//! ```

pub mod builder;
pub mod codegen;
pub mod compiler;
pub mod diff;
pub mod error;
pub mod history;
pub mod id;
pub mod migration;
pub mod migrator;
pub mod modules;
pub mod operations;
pub mod owner;
pub mod pending;
pub mod registry;
pub mod reporter;
pub mod runtime;
pub mod scaffold;
pub mod snapshot_processor;
pub mod sql;
pub mod types;

pub use builder::{ColumnsBuilder, ConstraintsBuilder, MigrationBuilder, OperationBuilder};
pub use codegen::{CodeGeneratorSelector, MigrationsCodeGenerator, RustMigrationsGenerator};
pub use compiler::{
    CompilationBackend, CompiledMigration, CompilerOptions, InterpreterBackend, LoadedUnit,
    MigrationCompiler,
};
pub use diff::{ModelDiffer, RelationalModelDiffer};
pub use error::{MigrateResult, MigrationError};
pub use history::{DEFAULT_HISTORY_TABLE, HistoryRepository, InMemoryHistoryRepository, MigrationRecord};
pub use id::{IdGenerator, TimestampIdGenerator};
pub use migration::{
    INITIAL_DATABASE, Migration, MigrationInstance, MigrationMetadata, ModelSnapshot,
    RESERVED_MIGRATION_NAME,
};
pub use migrator::{
    CommandExecutor, Direction, HistoryMigrator, MigrationPlan, MigrationPlanner, MigrationResult,
    MigrationStep, Migrator, RecordingExecutor,
};
pub use modules::ModuleRef;
pub use operations::Operation;
pub use owner::{ModelOwner, StaticModelOwner};
pub use pending::SnapshotChangeDetector;
pub use registry::{
    DynamicMigrationsAssembly, MigrationMap, MigrationsAssembly, StaticMigrationsAssembly,
};
pub use reporter::{CollectingReporter, OperationReporter, ReportLevel, TracingReporter};
pub use runtime::{RuntimeMigrationOptions, RuntimeMigrationResult, RuntimeMigrationService};
pub use scaffold::{MigrationFiles, MigrationsScaffolder, RemovedMigration, ScaffoldedMigration};
pub use snapshot_processor::{DefaultSnapshotModelProcessor, SnapshotModelProcessor};
pub use sql::{MigrationCommand, MigrationsSqlGenerator, PostgresSqlGenerator};
pub use types::{TypeHandle, TypeInfo, TypeKind};
