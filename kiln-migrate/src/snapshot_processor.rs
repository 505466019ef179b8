//! Normalization of snapshot models before diffing.

use kiln_model::{Annotations, Model, annotation_names as names};
use tracing::debug;

/// Annotations that only exist on a live model and are never persisted.
pub const RUNTIME_ONLY_ANNOTATIONS: &[&str] = &[
    names::TYPE_MAPPING,
    names::VALUE_CONVERTER,
    names::VALUE_COMPARER,
    names::VALUE_GENERATOR_FACTORY,
    names::PROPERTY_ACCESS_MODE,
    names::PROVIDER_CLR_TYPE,
];

/// Whether an annotation is runtime-only.
pub fn is_runtime_only(name: &str) -> bool {
    RUNTIME_ONLY_ANNOTATIONS.contains(&name)
}

/// Brings a stored snapshot model into the shape the differ expects.
pub trait SnapshotModelProcessor: Send + Sync {
    /// Normalize `model`. With `reset_version`, the product version is
    /// stamped to the running version.
    fn process(&self, model: Option<Model>, reset_version: bool) -> Option<Model>;
}

/// Strips runtime-only annotations and optionally resets the version.
#[derive(Debug, Clone, Default)]
pub struct DefaultSnapshotModelProcessor;

impl DefaultSnapshotModelProcessor {
    pub fn new() -> Self {
        Self
    }
}

fn strip(annotations: &mut Annotations) {
    annotations.retain(|name, _| !is_runtime_only(name));
}

impl SnapshotModelProcessor for DefaultSnapshotModelProcessor {
    fn process(&self, model: Option<Model>, reset_version: bool) -> Option<Model> {
        let mut model = model?;

        strip(&mut model.annotations);
        for entity in &mut model.entity_types {
            strip(&mut entity.annotations);
            for property in &mut entity.properties {
                strip(&mut property.annotations);
            }
            for key in entity.primary_key.iter_mut().chain(entity.alternate_keys.iter_mut()) {
                strip(&mut key.annotations);
            }
            for index in &mut entity.indexes {
                strip(&mut index.annotations);
            }
            for fk in &mut entity.foreign_keys {
                strip(&mut fk.annotations);
            }
            for navigation in &mut entity.navigations {
                strip(&mut navigation.annotations);
            }
            for check in &mut entity.check_constraints {
                strip(&mut check.annotations);
            }
        }
        for sequence in &mut model.sequences {
            strip(&mut sequence.annotations);
        }

        if reset_version {
            let version = env!("CARGO_PKG_VERSION");
            debug!(version, "resetting snapshot product version");
            model.annotations.set(names::PRODUCT_VERSION, version);
        }
        Some(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_model::ModelBuilder;

    #[test]
    fn test_strips_runtime_annotations() {
        let mut model_builder = ModelBuilder::new();
        model_builder.annotation(names::TYPE_MAPPING, "x");
        model_builder.entity("Blog", |b| {
            b.property::<i32>("Id")
                .annotation(names::VALUE_CONVERTER, "IntToString")
                .annotation("Custom:Keep", true);
            b.has_key(&["Id"]);
        });

        let model = DefaultSnapshotModelProcessor::new()
            .process(Some(model_builder.build()), false)
            .unwrap();
        assert!(!model.annotations.contains(names::TYPE_MAPPING));
        let id = model.entity("Blog").unwrap().property("Id").unwrap();
        assert!(!id.annotations.contains(names::VALUE_CONVERTER));
        assert!(id.annotations.contains("Custom:Keep"));
        assert_eq!(model.product_version(), None);
    }

    #[test]
    fn test_reset_version() {
        let model = DefaultSnapshotModelProcessor::new()
            .process(Some(Model::default()), true)
            .unwrap();
        assert_eq!(model.product_version(), Some(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_absent_model() {
        assert!(DefaultSnapshotModelProcessor::new().process(None, true).is_none());
    }
}
