//! # Kiln
//!
//! Runtime migrations for Rust applications.
//!
//! Kiln compares the live entity model with the last model snapshot,
//! generates a migration for the difference, compiles it in memory and
//! applies it to the database, all inside the running process.
//!
//! Kiln provides:
//! - A metadata model with a fluent builder ([`model`])
//! - Model diffing, code generation and an in-memory compiler ([`migrate`])
//! - A per-session registry that overlays new migrations on shipped ones
//! - History tracking and planning for applying and reverting migrations
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kiln::prelude::*;
//!
//! let mut model_builder = ModelBuilder::new();
//! model_builder.entity("Blog", |b| {
//!     b.property::<i32>("Id");
//!     b.property::<Option<String>>("Note");
//!     b.has_key(&["Id"]);
//! });
//!
//! let config = KilnConfig::from_file("kiln.toml")?;
//! let owner = Arc::new(StaticModelOwner::new("BlogContext", "blog", model_builder.build()));
//! let history = Arc::new(InMemoryHistoryRepository::from_config(&config));
//! let service = RuntimeMigrationService::from_config(&config, owner, history, executor)?;
//!
//! let mut assembly = DynamicMigrationsAssembly::new(Arc::new(StaticMigrationsAssembly::empty()));
//! let result = service.create_and_apply_migration(
//!     &mut assembly,
//!     "AddNote",
//!     &RuntimeMigrationOptions::from_config(&config),
//! )?;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Entity metadata, model builder and configuration.
pub mod model {
    pub use kiln_model::*;
}

/// The migration pipeline.
pub mod migrate {
    pub use kiln_migrate::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        DynamicMigrationsAssembly, HistoryMigrator, HistoryRepository, InMemoryHistoryRepository,
        Migration, MigrationBuilder, MigrationMetadata, MigrationsAssembly, MigrationsScaffolder, ModelOwner, ModelSnapshot,
        Migrator, RuntimeMigrationOptions, RuntimeMigrationService, StaticMigrationsAssembly,
        StaticModelOwner,
    };
    pub use crate::model::{KilnConfig, Model, ModelBuilder};
}

// Re-export key types at the crate root
pub use migrate::{MigrateResult, MigrationError};
pub use model::{KilnConfig, ModelError};
