//! Runtime type handles for migrations and snapshots.
//!
//! A [`TypeHandle`] describes one type found in a compiled unit or shipped
//! with the application, and knows how to instantiate it through its
//! parameterless constructor.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::migration::{Migration, ModelSnapshot};

/// What a type is, as far as the pipeline cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Migration,
    ModelSnapshot,
    Other,
}

type MigrationActivator = Arc<dyn Fn() -> Arc<dyn Migration> + Send + Sync>;
type SnapshotActivator = Arc<dyn Fn() -> Arc<dyn ModelSnapshot> + Send + Sync>;

#[derive(Clone)]
enum Activator {
    Migration(MigrationActivator),
    Snapshot(SnapshotActivator),
    None,
}

/// Description of a type.
#[derive(Clone)]
pub struct TypeInfo {
    /// Type name without its module path.
    pub name: String,
    /// `::`-separated module path.
    pub namespace: String,
    /// Name of the unit the type was loaded from.
    pub module: String,
    /// Kind of type.
    pub kind: TypeKind,
    /// Migration id marker, for migration types.
    pub migration_id: Option<String>,
    /// Model owner marker.
    pub model_owner: Option<String>,
    activator: Activator,
}

impl TypeInfo {
    /// Describe a migration type with a parameterless constructor.
    pub fn migration<T>() -> Self
    where
        T: Migration + Default + 'static,
    {
        let sample = T::default();
        let (namespace, name) = split_type_name(std::any::type_name::<T>());
        Self {
            name,
            namespace,
            module: module_of::<T>(),
            kind: TypeKind::Migration,
            migration_id: Some(sample.id().to_string()),
            model_owner: sample.model_owner().map(str::to_string),
            activator: Activator::Migration(Arc::new(|| Arc::new(T::default()))),
        }
    }

    /// Describe a snapshot type with a parameterless constructor.
    pub fn snapshot<T>() -> Self
    where
        T: ModelSnapshot + Default + 'static,
    {
        let sample = T::default();
        let (namespace, name) = split_type_name(std::any::type_name::<T>());
        Self {
            name,
            namespace,
            module: module_of::<T>(),
            kind: TypeKind::ModelSnapshot,
            migration_id: None,
            model_owner: sample.model_owner().map(str::to_string),
            activator: Activator::Snapshot(Arc::new(|| Arc::new(T::default()))),
        }
    }

    /// Describe a migration type from a constructor closure.
    pub fn migration_with(
        name: impl Into<String>,
        namespace: impl Into<String>,
        module: impl Into<String>,
        activate: impl Fn() -> Arc<dyn Migration> + Send + Sync + 'static,
    ) -> Self {
        let sample = activate();
        Self {
            name: name.into(),
            namespace: namespace.into(),
            module: module.into(),
            kind: TypeKind::Migration,
            migration_id: Some(sample.id().to_string()),
            model_owner: sample.model_owner().map(str::to_string),
            activator: Activator::Migration(Arc::new(activate)),
        }
    }

    /// Describe a snapshot type from a constructor closure.
    pub fn snapshot_with(
        name: impl Into<String>,
        namespace: impl Into<String>,
        module: impl Into<String>,
        activate: impl Fn() -> Arc<dyn ModelSnapshot> + Send + Sync + 'static,
    ) -> Self {
        let sample = activate();
        Self {
            name: name.into(),
            namespace: namespace.into(),
            module: module.into(),
            kind: TypeKind::ModelSnapshot,
            migration_id: None,
            model_owner: sample.model_owner().map(str::to_string),
            activator: Activator::Snapshot(Arc::new(activate)),
        }
    }

    /// Describe a type the pipeline does not instantiate.
    pub fn other(name: impl Into<String>, namespace: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            module: module.into(),
            kind: TypeKind::Other,
            migration_id: None,
            model_owner: None,
            activator: Activator::None,
        }
    }

    /// Override the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Override the model owner marker.
    pub fn with_model_owner(mut self, owner: impl Into<String>) -> Self {
        self.model_owner = Some(owner.into());
        self
    }

    /// Wrap into a shareable handle.
    pub fn into_handle(self) -> TypeHandle {
        TypeHandle(Arc::new(self))
    }

    /// `namespace::name`.
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.namespace, self.name)
        }
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("module", &self.module)
            .field("kind", &self.kind)
            .field("migration_id", &self.migration_id)
            .field("model_owner", &self.model_owner)
            .finish()
    }
}

/// A shared reference to a [`TypeInfo`].
#[derive(Debug, Clone)]
pub struct TypeHandle(Arc<TypeInfo>);

impl TypeHandle {
    /// Instantiate a migration type.
    pub fn create_migration(&self) -> Option<Arc<dyn Migration>> {
        match &self.0.activator {
            Activator::Migration(activate) => Some(activate()),
            _ => None,
        }
    }

    /// Instantiate a snapshot type.
    pub fn create_snapshot(&self) -> Option<Arc<dyn ModelSnapshot>> {
        match &self.0.activator {
            Activator::Snapshot(activate) => Some(activate()),
            _ => None,
        }
    }

    /// Check whether two handles point at the same type description.
    pub fn ptr_eq(&self, other: &TypeHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for TypeHandle {
    type Target = TypeInfo;

    fn deref(&self) -> &TypeInfo {
        &self.0
    }
}

fn split_type_name(full: &str) -> (String, String) {
    // Generic arguments may contain `::` themselves.
    let base_end = full.find('<').unwrap_or(full.len());
    match full[..base_end].rfind("::") {
        Some(pos) => (full[..pos].to_string(), full[pos + 2..].to_string()),
        None => (String::new(), full.to_string()),
    }
}

fn module_of<T>() -> String {
    let full = std::any::type_name::<T>();
    full.split("::").next().unwrap_or(full).to_string()
}
