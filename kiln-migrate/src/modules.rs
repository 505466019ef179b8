//! The process-wide module table.
//!
//! The in-memory compiler resolves `use` paths and qualified names against
//! modules registered here. The table starts with the standard library and
//! the Kiln crates; providers and applications add their own.

use std::collections::HashSet;
use std::sync::LazyLock;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// A module a compilation can reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleRef {
    /// Crate-style name (`kiln_model`).
    pub name: String,
    /// Version the module was built as.
    pub version: String,
    /// Where the module was loaded from; its resolved identity.
    pub location: String,
}

impl ModuleRef {
    /// Create a module reference.
    pub fn new(name: impl Into<String>, version: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            location: location.into(),
        }
    }
}

static MODULES: LazyLock<RwLock<Vec<ModuleRef>>> = LazyLock::new(|| {
    let version = env!("CARGO_PKG_VERSION");
    RwLock::new(vec![
        ModuleRef::new("std", "1", "builtin:std"),
        ModuleRef::new("core", "1", "builtin:core"),
        ModuleRef::new("alloc", "1", "builtin:alloc"),
        ModuleRef::new("kiln_model", version, "crate:kiln_model"),
        ModuleRef::new("kiln_migrate", version, "crate:kiln_migrate"),
    ])
});

static LOADED_UNITS: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(Default::default);

/// Snapshot of every module currently registered.
pub fn loaded_modules() -> Vec<ModuleRef> {
    MODULES.read().clone()
}

/// Register a module. A module with the same location is replaced.
pub fn register_module(module: ModuleRef) {
    let mut modules = MODULES.write();
    modules.retain(|m| m.location != module.location);
    tracing::debug!(name = %module.name, location = %module.location, "registered module");
    modules.push(module);
}

/// Find a registered module by name.
pub fn find_module(name: &str) -> Option<ModuleRef> {
    MODULES.read().iter().find(|m| m.name == name).cloned()
}

/// Record that a unit with this name was loaded.
///
/// Returns `false` if the name was already taken.
pub(crate) fn claim_unit_name(name: &str) -> bool {
    LOADED_UNITS.lock().insert(name.to_string())
}

/// Forget a unit name once its unit is no longer registered.
pub(crate) fn release_unit_name(name: &str) -> bool {
    LOADED_UNITS.lock().remove(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_modules() {
        let names: Vec<String> = loaded_modules().into_iter().map(|m| m.name).collect();
        for expected in ["std", "core", "alloc", "kiln_model", "kiln_migrate"] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_register_module_replaces_by_location() {
        register_module(ModuleRef::new("kiln_sqlite", "0.1.0", "crate:kiln_sqlite_test"));
        register_module(ModuleRef::new("kiln_sqlite", "0.2.0", "crate:kiln_sqlite_test"));
        let matching: Vec<ModuleRef> = loaded_modules()
            .into_iter()
            .filter(|m| m.location == "crate:kiln_sqlite_test")
            .collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].version, "0.2.0");
    }

    #[test]
    fn test_claim_unit_name_once() {
        assert!(claim_unit_name("unit_test_claim_once"));
        assert!(!claim_unit_name("unit_test_claim_once"));

        assert!(release_unit_name("unit_test_claim_once"));
        assert!(!release_unit_name("unit_test_claim_once"));
        assert!(claim_unit_name("unit_test_claim_once"));
    }
}
