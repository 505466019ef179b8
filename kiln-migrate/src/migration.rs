//! The migration and snapshot contracts that generated code implements.

use std::fmt;
use std::sync::Arc;

use kiln_model::{Model, ModelBuilder};

use crate::builder::MigrationBuilder;
use crate::operations::Operation;

/// Target id that reverts every migration.
pub const INITIAL_DATABASE: &str = "0";

/// Name of the base migration type; no migration may use it.
pub const RESERVED_MIGRATION_NAME: &str = "Migration";

/// Identity and target model of a migration.
///
/// Generated migrations implement this in their `.Designer.rs` file.
pub trait MigrationMetadata: Send + Sync {
    /// The migration id, `yyyyMMddHHmmss_Name`.
    fn id(&self) -> &str;

    /// Full path of the model owner this migration belongs to.
    fn model_owner(&self) -> Option<&str> {
        None
    }

    /// Build the model as it is after this migration.
    fn build_target_model(&self, _model_builder: &mut ModelBuilder) {}
}

/// A migration: operations that move the schema forward and back.
pub trait Migration: MigrationMetadata {
    /// Operations that apply the migration.
    fn up(&self, migration_builder: &mut MigrationBuilder);

    /// Operations that revert the migration.
    fn down(&self, _migration_builder: &mut MigrationBuilder) {}
}

/// The full model as of the latest migration.
pub trait ModelSnapshot: Send + Sync {
    /// Full path of the model owner this snapshot belongs to.
    fn model_owner(&self) -> Option<&str> {
        None
    }

    /// Replay the model into a builder.
    fn build_model(&self, model_builder: &mut ModelBuilder);

    /// Build the snapshot model.
    fn model(&self) -> Model {
        let mut model_builder = ModelBuilder::new();
        self.build_model(&mut model_builder);
        model_builder.build()
    }
}

/// A migration instantiated for an active provider.
#[derive(Clone)]
pub struct MigrationInstance {
    id: String,
    active_provider: String,
    migration: Arc<dyn Migration>,
}

impl MigrationInstance {
    /// Stamp a migration with the active provider.
    pub fn new(migration: Arc<dyn Migration>, active_provider: impl Into<String>) -> Self {
        Self {
            id: migration.id().to_string(),
            active_provider: active_provider.into(),
            migration,
        }
    }

    /// Migration id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Provider the instance was created for.
    pub fn active_provider(&self) -> &str {
        &self.active_provider
    }

    /// Owner path recorded in the migration metadata.
    pub fn model_owner(&self) -> Option<&str> {
        self.migration.model_owner()
    }

    /// Operations of the `up` direction.
    pub fn up_operations(&self) -> Vec<Operation> {
        let mut migration_builder = MigrationBuilder::new(&self.active_provider);
        self.migration.up(&mut migration_builder);
        migration_builder.into_operations()
    }

    /// Operations of the `down` direction.
    pub fn down_operations(&self) -> Vec<Operation> {
        let mut migration_builder = MigrationBuilder::new(&self.active_provider);
        self.migration.down(&mut migration_builder);
        migration_builder.into_operations()
    }

    /// The model after this migration, if the metadata records one.
    pub fn target_model(&self) -> Option<Model> {
        let mut model_builder = ModelBuilder::new();
        self.migration.build_target_model(&mut model_builder);
        let model = model_builder.build();
        (model != Model::default()).then_some(model)
    }
}

impl fmt::Debug for MigrationInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationInstance")
            .field("id", &self.id)
            .field("active_provider", &self.active_provider)
            .finish()
    }
}

/// Split a migration id into its timestamp and name parts.
pub fn split_id(id: &str) -> Option<(&str, &str)> {
    let (timestamp, name) = id.split_once('_')?;
    (timestamp.len() == 14 && timestamp.chars().all(|c| c.is_ascii_digit()))
        .then_some((timestamp, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct AddNote;

    impl MigrationMetadata for AddNote {
        fn id(&self) -> &str {
            "20240101120000_AddNote"
        }

        fn build_target_model(&self, model_builder: &mut ModelBuilder) {
            model_builder.entity("Blog", |b| {
                b.property::<i32>("Id");
                b.property::<Option<String>>("Note");
                b.has_key(&["Id"]);
            });
        }
    }

    impl Migration for AddNote {
        fn up(&self, migration_builder: &mut MigrationBuilder) {
            migration_builder
                .add_column::<String>("Note")
                .table("Blogs")
                .nullable(true);
        }

        fn down(&self, migration_builder: &mut MigrationBuilder) {
            migration_builder.drop_column("Note").table("Blogs");
        }
    }

    #[test]
    fn test_instance_operations() {
        let instance = MigrationInstance::new(Arc::new(AddNote), "postgresql");
        assert_eq!(instance.id(), "20240101120000_AddNote");
        assert_eq!(instance.active_provider(), "postgresql");
        assert_eq!(instance.up_operations()[0].kind(), "AddColumn");
        assert_eq!(instance.down_operations()[0].kind(), "DropColumn");
        assert!(instance.target_model().unwrap().entity("Blog").is_some());
    }

    #[test]
    fn test_split_id() {
        assert_eq!(
            split_id("20240101120000_AddNote"),
            Some(("20240101120000", "AddNote"))
        );
        assert_eq!(split_id("AddNote"), None);
        assert_eq!(split_id("2024_AddNote"), None);
    }
}
