//! Rust literal rendering and import tracking.

use std::collections::BTreeSet;
use std::fmt::Write;

use kiln_model::{ClrType, ReferentialAction, Value};

/// `use` items referenced by generated code, kept sorted.
#[derive(Debug, Default, Clone)]
pub struct Imports(BTreeSet<String>);

impl Imports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a path to import.
    pub fn add(&mut self, path: &str) {
        self.0.insert(path.to_string());
    }

    /// Render `use` lines, grouping items that share a parent path.
    pub fn render(&self) -> Vec<String> {
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for path in &self.0 {
            let (parent, item) = match path.rsplit_once("::") {
                Some((parent, item)) => (parent.to_string(), item.to_string()),
                None => (String::new(), path.clone()),
            };
            match groups.last_mut() {
                Some((p, items)) if *p == parent => items.push(item),
                _ => groups.push((parent, vec![item])),
            }
        }
        groups
            .into_iter()
            .map(|(parent, items)| match (parent.is_empty(), items.as_slice()) {
                (true, _) => format!("use {};", items.join(", ")),
                (false, [single]) => format!("use {}::{};", parent, single),
                (false, _) => format!("use {}::{{{}}};", parent, items.join(", ")),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A string literal.
pub fn string(s: &str) -> String {
    format!("{:?}", s)
}

/// A `&["A", "B"]` slice literal.
pub fn string_slice<S: AsRef<str>>(items: &[S]) -> String {
    let items: Vec<String> = items.iter().map(|s| string(s.as_ref())).collect();
    format!("&[{}]", items.join(", "))
}

/// A `Some("x")`/`None` literal.
pub fn optional_string(s: Option<&str>) -> String {
    match s {
        Some(s) => format!("Some({})", string(s)),
        None => "None".to_string(),
    }
}

/// An integer literal that infers to a type able to hold it.
pub fn int(i: i64) -> String {
    if i32::try_from(i).is_ok() {
        i.to_string()
    } else {
        format!("{}i64", i)
    }
}

/// A float literal.
pub fn float(v: f64) -> String {
    if v.is_nan() {
        "f64::NAN".to_string()
    } else if v == f64::INFINITY {
        "f64::INFINITY".to_string()
    } else if v == f64::NEG_INFINITY {
        "f64::NEG_INFINITY".to_string()
    } else {
        format!("{:?}", v)
    }
}

/// A byte string literal.
pub fn bytes(b: &[u8]) -> String {
    let mut out = String::from("b\"");
    for &byte in b {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(byte as char),
            _ => {
                let _ = write!(out, "\\x{:02x}", byte);
            }
        }
    }
    out.push('"');
    out
}

/// A [`Value`] literal, usable wherever `impl Into<Value>` is accepted.
pub fn value(v: &Value, imports: &mut Imports) -> String {
    match v {
        Value::Null => {
            imports.add("kiln_model::Value");
            "Value::Null".to_string()
        }
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => int(*i),
        Value::Float(f) => float(*f),
        Value::Text(s) => string(s),
        Value::Bytes(b) => bytes(b),
    }
}

/// A comma-separated list of value literals.
pub fn value_list(values: &[Value], imports: &mut Imports) -> String {
    values
        .iter()
        .map(|v| value(v, imports))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A `ReferentialAction::X` path.
pub fn referential_action(action: ReferentialAction, imports: &mut Imports) -> String {
    imports.add("kiln_model::ReferentialAction");
    format!("ReferentialAction::{}", action.as_str())
}

/// A type argument, `String` or `Option<String>`.
pub fn clr_type(clr: ClrType, nullable: bool) -> String {
    clr.rust_type_with_nullability(nullable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_value_literals() {
        let mut imports = Imports::new();
        assert_eq!(value(&Value::Int(1), &mut imports), "1");
        assert_eq!(value(&Value::Int(5_000_000_000), &mut imports), "5000000000i64");
        assert_eq!(value(&Value::Float(1.0), &mut imports), "1.0");
        assert_eq!(value(&Value::Float(f64::NEG_INFINITY), &mut imports), "f64::NEG_INFINITY");
        assert_eq!(value(&Value::Text("a\"b\n".into()), &mut imports), "\"a\\\"b\\n\"");
        assert_eq!(value(&Value::Bytes(vec![0x01, b'A', b'"']), &mut imports), "b\"\\x01A\\\"\"");
        assert!(imports.is_empty());
        assert_eq!(value(&Value::Null, &mut imports), "Value::Null");
        assert_eq!(imports.render(), vec!["use kiln_model::Value;"]);
    }

    #[test]
    fn test_imports_group_and_sort() {
        let mut imports = Imports::new();
        imports.add("kiln_model::Value");
        imports.add("kiln_migrate::MigrationBuilder");
        imports.add("kiln_migrate::Migration");
        imports.add("kiln_model::ReferentialAction");
        assert_eq!(
            imports.render(),
            vec![
                "use kiln_migrate::{Migration, MigrationBuilder};",
                "use kiln_model::{ReferentialAction, Value};",
            ]
        );
    }

    #[test]
    fn test_string_slice() {
        assert_eq!(string_slice(&["A", "B"]), "&[\"A\", \"B\"]");
    }
}
