//! Error types for model construction, projection and configuration.

// These warnings are false positives - the fields are used by derive macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while building, projecting or configuring a model.
#[derive(Error, Debug, Diagnostic)]
pub enum ModelError {
    /// Error reading a file.
    #[error("failed to read file: {path}")]
    #[diagnostic(code(kiln::model::io_error))]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The model graph is inconsistent.
    #[error("invalid model: {message}")]
    #[diagnostic(code(kiln::model::invalid_model))]
    InvalidModel { message: String },

    /// An entity type referenced by name does not exist.
    #[error("unknown entity type `{name}`")]
    #[diagnostic(code(kiln::model::unknown_entity))]
    UnknownEntity { name: String },

    /// A property referenced by name does not exist on its entity type.
    #[error("unknown property `{entity}.{property}`")]
    #[diagnostic(code(kiln::model::unknown_property))]
    UnknownProperty { entity: String, property: String },

    /// A type name that does not map to a store type.
    #[error("unknown type `{type_name}`")]
    #[diagnostic(
        code(kiln::model::unknown_type),
        help("supported types are bool, i16, i32, i64, f32, f64, String, Vec<u8> and kiln_model::types::*")
    )]
    UnknownType { type_name: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    #[diagnostic(code(kiln::model::config_error))]
    ConfigError { message: String },

    /// TOML parsing error.
    #[error("failed to parse TOML")]
    #[diagnostic(code(kiln::model::toml_error))]
    TomlError {
        #[source]
        source: toml::de::Error,
    },
}

impl ModelError {
    /// Create an invalid model error.
    pub fn invalid_model(message: impl Into<String>) -> Self {
        Self::InvalidModel {
            message: message.into(),
        }
    }

    /// Create an unknown entity error.
    pub fn unknown_entity(name: impl Into<String>) -> Self {
        Self::UnknownEntity { name: name.into() }
    }

    /// Create an unknown property error.
    pub fn unknown_property(entity: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            entity: entity.into(),
            property: property.into(),
        }
    }

    /// Create an unknown type error.
    pub fn unknown_type(type_name: impl Into<String>) -> Self {
        Self::UnknownType {
            type_name: type_name.into(),
        }
    }
}

#[cfg(test)]
#[allow(unused_assignments)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_property_error() {
        let err = ModelError::unknown_property("Blog", "Title");

        match &err {
            ModelError::UnknownProperty { entity, property } => {
                assert_eq!(entity, "Blog");
                assert_eq!(property, "Title");
            }
            _ => panic!("Expected UnknownProperty"),
        }
        assert_eq!(err.to_string(), "unknown property `Blog.Title`");
    }

    #[test]
    fn test_diagnostic_code() {
        let err = ModelError::unknown_type("Foo");
        let code = err.code().map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("kiln::model::unknown_type"));
    }

    #[test]
    fn test_invalid_model_display() {
        let err = ModelError::invalid_model("entity `Post` has no key");
        assert_eq!(err.to_string(), "invalid model: entity `Post` has no key");
    }
}
