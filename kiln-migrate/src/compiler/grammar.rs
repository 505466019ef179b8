//! Pest grammar for generated sources.

use pest_derive::Parser;

/// The generated-source parser.
#[derive(Parser)]
#[grammar = "compiler/kiln.pest"]
pub struct KilnParser;

#[cfg(test)]
mod tests {
    use super::*;
    use pest::Parser;

    #[test]
    fn test_parse_path() {
        let result = KilnParser::parse(Rule::path, "kiln_model::types::Uuid");
        assert_eq!(result.unwrap().as_str(), "kiln_model::types::Uuid");
    }

    #[test]
    fn test_parse_use_group() {
        let result = KilnParser::parse(Rule::use_decl, "use kiln_migrate::{Migration, MigrationBuilder};");
        assert!(result.is_ok());
    }

    #[test]
    fn test_parse_literals() {
        for input in ["1", "-5", "5000000000i64", "1.0", "1e20", "\"a\\\"b\\n\"", "b\"\\x01A\"", "true"] {
            let result = KilnParser::parse(Rule::expr, input);
            assert!(result.is_ok(), "Failed to parse {}: {:?}", input, result.err());
        }
    }

    #[test]
    fn test_parse_chain_with_turbofish() {
        let input = r#"migration_builder
            .add_column::<Option<String>>("Note")
            .table("Blogs")
            .nullable(true)"#;
        let result = KilnParser::parse(Rule::expr, input);
        assert!(result.is_ok(), "Failed to parse chain: {:?}", result.err());
    }

    #[test]
    fn test_parse_impl_with_marker() {
        let input = r#"#[rustfmt::skip]
            impl Migration for Seed {
                fn up(&self, migration_builder: &mut MigrationBuilder) {
                    migration_builder
                        .insert_data("Blogs")
                        .columns(&["Id", "Name"])
                        .rows(rows![
                            [1, "a"],
                            [2, Value::Null],
                        ]);
                }

                fn down(&self, _migration_builder: &mut MigrationBuilder) {}
            }"#;
        let result = KilnParser::parse(Rule::impl_block, input);
        assert!(result.is_ok(), "Failed to parse impl: {:?}", result.err());
    }

    #[test]
    fn test_parse_seed_and_closure() {
        let input = r#"model_builder.entity("Blog", |b| {
                b.property::<i32>("Id");
                b.has_data([
                    seed! { "Id" => 1 },
                    seed! {},
                ]);
            })"#;
        let result = KilnParser::parse(Rule::expr, input);
        assert!(result.is_ok(), "Failed to parse closure: {:?}", result.err());
    }

    #[test]
    fn test_keyword_is_not_ident() {
        assert!(KilnParser::parse(Rule::ident, "impl").is_err());
        assert!(KilnParser::parse(Rule::ident, "implement").is_ok());
    }
}
