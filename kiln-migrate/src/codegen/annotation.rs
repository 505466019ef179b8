//! Translation of annotations into declarative builder calls.

use kiln_model::{Value, annotation_names as names};

use super::literal::{self, Imports};

/// Annotation name suffixes that always round-trip as raw annotations.
///
/// Their meaning depends on the provider, so a declarative call for one
/// provider would generate code that does not build against another.
pub const RAW_ANNOTATION_SUFFIXES: [&str; 5] = [
    ":ValueGenerationStrategy",
    ":IdentityIncrement",
    ":IdentitySeed",
    ":HiLoSequenceName",
    ":HiLoSequenceSchema",
];

/// Check whether an annotation must be emitted raw.
pub fn is_raw_only(name: &str) -> bool {
    RAW_ANNOTATION_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

/// The kind of object an annotation sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationTarget {
    Model,
    Entity,
    Property,
    Key,
    Index,
    ForeignKey,
    Navigation,
    Sequence,
}

/// Turns annotations into builder calls.
pub trait AnnotationCodeGenerator: Send + Sync {
    /// The declarative call for an annotation, without the leading dot, or
    /// `None` to fall back to `annotation(name, value)`.
    fn fluent_call(
        &self,
        target: AnnotationTarget,
        name: &str,
        value: &Value,
        imports: &mut Imports,
    ) -> Option<String>;

    /// The call for an annotation, declarative when possible.
    fn call(&self, target: AnnotationTarget, name: &str, value: &Value, imports: &mut Imports) -> String {
        if !is_raw_only(name) {
            if let Some(call) = self.fluent_call(target, name, value, imports) {
                return call;
            }
        }
        raw_call("annotation", name, value, imports)
    }
}

/// `method("name", value)`.
pub fn raw_call(method: &str, name: &str, value: &Value, imports: &mut Imports) -> String {
    format!(
        "{}({}, {})",
        method,
        literal::string(name),
        literal::value(value, imports)
    )
}

/// Knows the `Relational:` annotations and the builder calls that set them.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelationalAnnotationCodeGenerator;

fn text_call(method: &str, value: &Value) -> Option<String> {
    value
        .as_str()
        .map(|s| format!("{}({})", method, literal::string(s)))
}

fn int_call(method: &str, value: &Value) -> Option<String> {
    let i = value.as_i64()?;
    i32::try_from(i).ok().map(|i| format!("{}({})", method, i))
}

fn bool_call(method: &str, value: &Value) -> Option<String> {
    value.as_bool().map(|b| format!("{}({})", method, b))
}

impl AnnotationCodeGenerator for RelationalAnnotationCodeGenerator {
    fn fluent_call(
        &self,
        target: AnnotationTarget,
        name: &str,
        value: &Value,
        imports: &mut Imports,
    ) -> Option<String> {
        match (target, name) {
            (AnnotationTarget::Model, names::DEFAULT_SCHEMA) => text_call("default_schema", value),

            (AnnotationTarget::Entity, names::TABLE_NAME) => text_call("to_table", value),
            (AnnotationTarget::Entity, names::SCHEMA) => text_call("to_schema", value),
            (AnnotationTarget::Entity, names::COMMENT) => text_call("comment", value),

            (AnnotationTarget::Property, names::COLUMN_NAME) => text_call("column_name", value),
            (AnnotationTarget::Property, names::COLUMN_TYPE) => text_call("column_type", value),
            (AnnotationTarget::Property, names::MAX_LENGTH) => int_call("max_length", value),
            (AnnotationTarget::Property, names::UNICODE) => bool_call("unicode", value),
            (AnnotationTarget::Property, names::IS_FIXED_LENGTH) => bool_call("fixed_length", value),
            (AnnotationTarget::Property, names::PRECISION) => int_call("precision", value),
            (AnnotationTarget::Property, names::SCALE) => int_call("scale", value),
            (AnnotationTarget::Property, names::DEFAULT_VALUE) => Some(format!(
                "default_value({})",
                literal::value(value, imports)
            )),
            (AnnotationTarget::Property, names::DEFAULT_VALUE_SQL) => {
                text_call("default_value_sql", value)
            }
            (AnnotationTarget::Property, names::COMPUTED_COLUMN_SQL) => {
                text_call("computed_column_sql", value)
            }
            (AnnotationTarget::Property, names::IS_STORED) => bool_call("stored", value),
            (AnnotationTarget::Property, names::COMMENT) => text_call("comment", value),
            (AnnotationTarget::Property, names::COLLATION) => text_call("collation", value),

            (AnnotationTarget::Key, names::NAME) => text_call("database_name", value),
            (AnnotationTarget::Index, names::NAME) => text_call("database_name", value),
            (AnnotationTarget::Index, names::FILTER) => text_call("filter", value),
            (AnnotationTarget::ForeignKey, names::NAME) => text_call("constraint_name", value),

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_relational_calls() {
        let generator = RelationalAnnotationCodeGenerator;
        let mut imports = Imports::new();
        assert_eq!(
            generator.call(
                AnnotationTarget::Property,
                names::COLUMN_TYPE,
                &Value::from("text"),
                &mut imports
            ),
            "column_type(\"text\")"
        );
        assert_eq!(
            generator.call(AnnotationTarget::Property, names::MAX_LENGTH, &Value::from(40), &mut imports),
            "max_length(40)"
        );
        assert_eq!(
            generator.call(AnnotationTarget::Entity, names::TABLE_NAME, &Value::from("Blogs"), &mut imports),
            "to_table(\"Blogs\")"
        );
    }

    #[test]
    fn test_type_mismatch_falls_back_to_raw() {
        let generator = RelationalAnnotationCodeGenerator;
        let mut imports = Imports::new();
        assert_eq!(
            generator.call(AnnotationTarget::Property, names::MAX_LENGTH, &Value::from("big"), &mut imports),
            "annotation(\"MaxLength\", \"big\")"
        );
    }

    #[test]
    fn test_provider_annotations_stay_raw() {
        let generator = RelationalAnnotationCodeGenerator;
        let mut imports = Imports::new();
        for name in [
            names::VALUE_GENERATION_STRATEGY,
            names::IDENTITY_INCREMENT,
            names::IDENTITY_SEED,
            names::HILO_SEQUENCE_NAME,
            names::HILO_SEQUENCE_SCHEMA,
        ] {
            assert!(is_raw_only(name));
            let call = generator.call(AnnotationTarget::Property, name, &Value::from(1), &mut imports);
            assert!(call.starts_with("annotation("), "{}", call);
        }
        assert!(!is_raw_only(names::COLUMN_TYPE));
    }
}
