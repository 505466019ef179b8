//! Detection of model changes that no migration covers yet.

use std::sync::Arc;

use kiln_model::{Model, RelationalModel};
use tracing::debug;

use crate::diff::{ModelDiffer, RelationalModelDiffer};
use crate::error::MigrateResult;
use crate::registry::MigrationsAssembly;
use crate::snapshot_processor::{DefaultSnapshotModelProcessor, SnapshotModelProcessor};

/// Compares the current snapshot of an assembly with a live model.
#[derive(Clone)]
pub struct SnapshotChangeDetector {
    differ: Arc<dyn ModelDiffer>,
    processor: Arc<dyn SnapshotModelProcessor>,
}

impl Default for SnapshotChangeDetector {
    fn default() -> Self {
        Self {
            differ: Arc::new(RelationalModelDiffer::new()),
            processor: Arc::new(DefaultSnapshotModelProcessor::new()),
        }
    }
}

impl std::fmt::Debug for SnapshotChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotChangeDetector").finish_non_exhaustive()
    }
}

impl SnapshotChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different differ.
    pub fn with_differ(mut self, differ: Arc<dyn ModelDiffer>) -> Self {
        self.differ = differ;
        self
    }

    /// Use a different snapshot processor.
    pub fn with_processor(mut self, processor: Arc<dyn SnapshotModelProcessor>) -> Self {
        self.processor = processor;
        self
    }

    /// Check whether `model` differs from the snapshot exposed by `assembly`.
    ///
    /// Without a snapshot, any model with tables or sequences counts as a
    /// change.
    pub fn has_pending_model_changes(
        &self,
        assembly: &dyn MigrationsAssembly,
        model: &Model,
    ) -> MigrateResult<bool> {
        let snapshot = assembly.model_snapshot().map(|snapshot| snapshot.model());
        let snapshot = self.processor.process(snapshot, false);
        let current = self.processor.process(Some(model.clone()), false);

        let source = snapshot.as_ref().map(RelationalModel::from_model).transpose()?;
        let target = current.as_ref().map(RelationalModel::from_model).transpose()?;

        let pending = self.differ.has_differences(source.as_ref(), target.as_ref());
        debug!(pending, has_snapshot = source.is_some(), "checked for pending model changes");
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::ModelSnapshot;
    use crate::registry::StaticMigrationsAssembly;
    use crate::types::TypeInfo;
    use kiln_model::ModelBuilder;

    fn blogs(model_builder: &mut ModelBuilder) {
        model_builder.entity("Blog", |b| {
            b.property::<i32>("Id");
            b.has_key(&["Id"]);
            b.to_table("Blogs");
        });
    }

    #[derive(Default)]
    struct BlogSnapshot;

    impl ModelSnapshot for BlogSnapshot {
        fn build_model(&self, model_builder: &mut ModelBuilder) {
            blogs(model_builder);
        }
    }

    fn live(with_note: bool) -> Model {
        let mut model_builder = ModelBuilder::new();
        model_builder.entity("Blog", |b| {
            b.property::<i32>("Id");
            if with_note {
                b.property::<Option<String>>("Note");
            }
            b.has_key(&["Id"]);
            b.to_table("Blogs");
        });
        model_builder.build()
    }

    #[test]
    fn test_no_snapshot_means_pending() {
        let assembly = StaticMigrationsAssembly::empty();
        let detector = SnapshotChangeDetector::new();
        assert!(detector.has_pending_model_changes(&assembly, &live(false)).unwrap());
    }

    #[test]
    fn test_snapshot_comparison() {
        let assembly =
            StaticMigrationsAssembly::from_types([TypeInfo::snapshot::<BlogSnapshot>().into_handle()], None);
        let detector = SnapshotChangeDetector::new();

        assert!(!detector.has_pending_model_changes(&assembly, &live(false)).unwrap());
        assert!(detector.has_pending_model_changes(&assembly, &live(true)).unwrap());
    }
}
