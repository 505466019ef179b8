//! The application type that owns a model.

use kiln_model::Model;

use crate::modules::ModuleRef;

/// The type whose model migrations are generated for.
///
/// Its module anchors reference resolution when migrations are compiled,
/// and its name is recorded in generated metadata.
pub trait ModelOwner: Send + Sync {
    /// Type name, possibly with generic arguments (`BlogContext`).
    fn type_name(&self) -> &str;

    /// `::`-separated module path of the type.
    fn namespace(&self) -> &str;

    /// The current model.
    fn model(&self) -> Model;

    /// The module the type lives in.
    fn module(&self) -> ModuleRef;

    /// Names of the modules the owner's module references.
    fn referenced_modules(&self) -> Vec<String> {
        Vec::new()
    }

    /// `namespace::type_name`.
    fn full_name(&self) -> String {
        if self.namespace().is_empty() {
            self.type_name().to_string()
        } else {
            format!("{}::{}", self.namespace(), self.type_name())
        }
    }
}

/// A [`ModelOwner`] backed by plain values.
#[derive(Debug, Clone)]
pub struct StaticModelOwner {
    type_name: String,
    namespace: String,
    model: Model,
    module: ModuleRef,
    references: Vec<String>,
}

impl StaticModelOwner {
    /// Create an owner. The module defaults to the first path segment of
    /// the namespace.
    pub fn new(type_name: impl Into<String>, namespace: impl Into<String>, model: Model) -> Self {
        let namespace = namespace.into();
        let crate_name = namespace.split("::").next().unwrap_or_default().to_string();
        Self {
            type_name: type_name.into(),
            module: ModuleRef::new(crate_name.clone(), "0.0.0", format!("crate:{}", crate_name)),
            namespace,
            model,
            references: Vec::new(),
        }
    }

    /// Set the owner's module.
    pub fn with_module(mut self, module: ModuleRef) -> Self {
        self.module = module;
        self
    }

    /// Add a referenced module name.
    pub fn with_reference(mut self, name: impl Into<String>) -> Self {
        self.references.push(name.into());
        self
    }

    /// Replace the model.
    pub fn set_model(&mut self, model: Model) {
        self.model = model;
    }
}

impl ModelOwner for StaticModelOwner {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn model(&self) -> Model {
        self.model.clone()
    }

    fn module(&self) -> ModuleRef {
        self.module.clone()
    }

    fn referenced_modules(&self) -> Vec<String> {
        self.references.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_owner() {
        let owner = StaticModelOwner::new("BlogContext", "blog::data", Model::default())
            .with_reference("serde");
        assert_eq!(owner.full_name(), "blog::data::BlogContext");
        assert_eq!(owner.module().name, "blog");
        assert_eq!(owner.module().location, "crate:blog");
        assert_eq!(owner.referenced_modules(), vec!["serde"]);
    }
}
