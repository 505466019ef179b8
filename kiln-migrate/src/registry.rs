//! The migrations registry: static migrations plus runtime-compiled ones.
//!
//! [`DynamicMigrationsAssembly`] wraps the set of migrations the
//! application shipped with and overlays migrations compiled at runtime.
//! It belongs to one logical session; mutation takes `&mut self`, so a
//! registry is never shared mutably across sessions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::compiler::CompiledMigration;
use crate::error::{MigrateResult, MigrationError};
use crate::migration::{MigrationInstance, ModelSnapshot};
use crate::modules;
use crate::types::{TypeHandle, TypeKind};

/// Length of the `yyyyMMddHHmmss_` prefix of a migration id.
pub const ID_PREFIX_LEN: usize = 15;

/// Migration ids mapped to their types, ordered by id and keyed
/// case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct MigrationMap {
    entries: BTreeMap<String, (String, TypeHandle)>,
}

impl MigrationMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an entry.
    pub fn insert(&mut self, id: impl Into<String>, ty: TypeHandle) -> Option<TypeHandle> {
        let id = id.into();
        self.entries
            .insert(id.to_ascii_lowercase(), (id, ty))
            .map(|(_, previous)| previous)
    }

    /// Look up a type by id.
    pub fn get(&self, id: &str) -> Option<&TypeHandle> {
        self.entries.get(&id.to_ascii_lowercase()).map(|(_, ty)| ty)
    }

    /// Check whether an id is present.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(&id.to_ascii_lowercase())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypeHandle)> {
        self.entries.values().map(|(id, ty)| (id.as_str(), ty))
    }

    /// Ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|(id, _)| id.as_str())
    }

    /// The latest migration.
    pub fn last(&self) -> Option<(&str, &TypeHandle)> {
        self.entries
            .values()
            .next_back()
            .map(|(id, ty)| (id.as_str(), ty))
    }

    /// Resolve a full id or a bare name to the stored id.
    pub fn find_id(&self, name_or_id: &str) -> Option<&str> {
        self.ids().find(|id| {
            id.eq_ignore_ascii_case(name_or_id)
                || id
                    .get(ID_PREFIX_LEN..)
                    .is_some_and(|name| name.eq_ignore_ascii_case(name_or_id))
        })
    }
}

/// Read access to a set of migrations.
pub trait MigrationsAssembly: Send + Sync {
    /// Migrations keyed by id.
    fn migrations(&self) -> Arc<MigrationMap>;

    /// The current model snapshot, if any.
    fn model_snapshot(&self) -> Option<Arc<dyn ModelSnapshot>>;

    /// Resolve a migration name or id to its id.
    fn find_migration_id(&self, name_or_id: &str) -> Option<String>;

    /// Instantiate a migration type for the active provider.
    fn create_migration(&self, ty: &TypeHandle, active_provider: &str) -> MigrateResult<MigrationInstance>;

    /// Every type known to the assembly.
    fn types(&self) -> Vec<TypeHandle>;
}

fn instantiate(ty: &TypeHandle, active_provider: &str) -> MigrateResult<MigrationInstance> {
    let migration = ty
        .create_migration()
        .ok_or_else(|| MigrationError::MigrationTypeNotFound(ty.full_name()))?;
    Ok(MigrationInstance::new(migration, active_provider))
}

/// Migrations shipped with the application.
#[derive(Debug, Clone, Default)]
pub struct StaticMigrationsAssembly {
    migrations: Arc<MigrationMap>,
    snapshot: Option<TypeHandle>,
    types: Vec<TypeHandle>,
}

impl StaticMigrationsAssembly {
    /// An assembly with no migrations and no snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from a list of types, keeping those that belong to `owner`.
    ///
    /// Types without an owner marker are kept for any owner.
    pub fn from_types(types: impl IntoIterator<Item = TypeHandle>, owner: Option<&str>) -> Self {
        let types: Vec<TypeHandle> = types.into_iter().collect();
        let belongs = |ty: &TypeHandle| match (owner, ty.model_owner.as_deref()) {
            (Some(owner), Some(marker)) => owner == marker,
            _ => true,
        };

        let mut migrations = MigrationMap::new();
        let mut snapshot = None;
        for ty in types.iter().filter(|ty| belongs(ty)) {
            match ty.kind {
                TypeKind::Migration => {
                    if let Some(id) = &ty.migration_id {
                        migrations.insert(id.clone(), ty.clone());
                    }
                }
                TypeKind::ModelSnapshot => {
                    if snapshot.is_none() {
                        snapshot = Some(ty.clone());
                    }
                }
                TypeKind::Other => {}
            }
        }

        Self {
            migrations: Arc::new(migrations),
            snapshot,
            types,
        }
    }
}

impl MigrationsAssembly for StaticMigrationsAssembly {
    fn migrations(&self) -> Arc<MigrationMap> {
        Arc::clone(&self.migrations)
    }

    fn model_snapshot(&self) -> Option<Arc<dyn ModelSnapshot>> {
        self.snapshot.as_ref().and_then(TypeHandle::create_snapshot)
    }

    fn find_migration_id(&self, name_or_id: &str) -> Option<String> {
        self.migrations.find_id(name_or_id).map(str::to_string)
    }

    fn create_migration(&self, ty: &TypeHandle, active_provider: &str) -> MigrateResult<MigrationInstance> {
        instantiate(ty, active_provider)
    }

    fn types(&self) -> Vec<TypeHandle> {
        self.types.clone()
    }
}

/// A static assembly overlaid with migrations compiled at runtime.
pub struct DynamicMigrationsAssembly {
    inner: Arc<dyn MigrationsAssembly>,
    dynamic: MigrationMap,
    compiled: HashMap<String, CompiledMigration>,
    snapshot: Option<Arc<dyn ModelSnapshot>>,
    merged: Mutex<Option<Arc<MigrationMap>>>,
}

impl DynamicMigrationsAssembly {
    /// Wrap a static assembly.
    pub fn new(inner: Arc<dyn MigrationsAssembly>) -> Self {
        Self {
            inner,
            dynamic: MigrationMap::new(),
            compiled: HashMap::new(),
            snapshot: None,
            merged: Mutex::new(None),
        }
    }

    /// Register a compiled migration.
    ///
    /// The entry shadows a static migration with the same id. A snapshot
    /// carried by the compiled migration replaces the exposed snapshot.
    pub fn register_dynamic_migration(&mut self, compiled: CompiledMigration) -> MigrateResult<()> {
        let snapshot = match &compiled.snapshot_type {
            Some(ty) => Some(
                ty.create_snapshot()
                    .ok_or_else(|| MigrationError::MigrationTypeNotFound(ty.full_name()))?,
            ),
            None => None,
        };

        let id = compiled.migration_id.clone();
        self.dynamic.insert(id.clone(), compiled.migration_type.clone());
        if let Some(replaced) = self.compiled.insert(id.to_ascii_lowercase(), compiled) {
            modules::release_unit_name(replaced.unit.name());
        }
        if snapshot.is_some() {
            self.snapshot = snapshot;
        }
        *self.merged.get_mut() = None;

        debug!(migration_id = %id, "registered dynamic migration");
        Ok(())
    }

    /// Drop every dynamic migration and the dynamic snapshot.
    pub fn clear_dynamic_migrations(&mut self) {
        self.dynamic = MigrationMap::new();
        for (_, compiled) in self.compiled.drain() {
            modules::release_unit_name(compiled.unit.name());
        }
        self.snapshot = None;
        *self.merged.get_mut() = None;
    }

    /// Check whether any dynamic migration is registered.
    pub fn has_dynamic_migrations(&self) -> bool {
        !self.dynamic.is_empty()
    }

    /// The compiled record of a dynamic migration.
    pub fn compiled_migration(&self, id: &str) -> Option<&CompiledMigration> {
        self.compiled.get(&id.to_ascii_lowercase())
    }
}

impl MigrationsAssembly for DynamicMigrationsAssembly {
    fn migrations(&self) -> Arc<MigrationMap> {
        let mut merged = self.merged.lock();
        if let Some(map) = merged.as_ref() {
            return Arc::clone(map);
        }

        let mut map = (*self.inner.migrations()).clone();
        for (id, ty) in self.dynamic.iter() {
            map.insert(id, ty.clone());
        }
        let map = Arc::new(map);
        *merged = Some(Arc::clone(&map));
        map
    }

    fn model_snapshot(&self) -> Option<Arc<dyn ModelSnapshot>> {
        self.snapshot
            .clone()
            .or_else(|| self.inner.model_snapshot())
    }

    fn find_migration_id(&self, name_or_id: &str) -> Option<String> {
        self.dynamic
            .find_id(name_or_id)
            .map(str::to_string)
            .or_else(|| self.inner.find_migration_id(name_or_id))
    }

    fn create_migration(&self, ty: &TypeHandle, active_provider: &str) -> MigrateResult<MigrationInstance> {
        instantiate(ty, active_provider)
    }

    fn types(&self) -> Vec<TypeHandle> {
        let mut types = self.inner.types();
        for compiled in self.compiled.values() {
            types.extend(compiled.unit.types().iter().cloned());
        }
        types
    }
}
