//! Scalar values, store-facing type identities and referential actions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Concrete Rust types that model properties may be declared with.
///
/// These are plain re-exports so generated code can name them through a
/// stable `kiln_model::types::*` path.
pub mod types {
    pub use chrono::{NaiveDate as Date, NaiveDateTime as DateTime, NaiveTime as Time};
    pub use rust_decimal::Decimal;
    pub use uuid::Uuid;

    /// JSON document column type.
    pub type Json = serde_json::Value;
}

/// A literal value carried by seed data, column defaults and annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// SQL `NULL` / absent.
    Null,
    /// Boolean.
    Bool(bool),
    /// Any integral value.
    Int(i64),
    /// Any floating point value.
    Float(#[serde(with = "float_repr")] f64),
    /// Text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl Value {
    /// Check if this value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the value as text, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Read the value as an integer, if it is integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Read the value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "{}", s),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Self::Int(i64::from(v))
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Value {
    fn from(v: &[u8; N]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// JSON cannot carry non-finite floats, so they travel as strings.
mod float_repr {
    use serde::{Deserialize, Deserializer, Serializer, de};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_nan() {
            s.serialize_str("NaN")
        } else if v.is_infinite() && v.is_sign_positive() {
            s.serialize_str("inf")
        } else if v.is_infinite() {
            s.serialize_str("-inf")
        } else {
            s.serialize_f64(*v)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(t) => match t.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(de::Error::custom(format!("invalid float `{}`", other))),
            },
        }
    }
}

/// The application-side type of a property or column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClrType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    Decimal,
    String,
    Bytes,
    Uuid,
    DateTime,
    Date,
    Time,
    Json,
}

impl ClrType {
    /// All supported types.
    pub const ALL: [ClrType; 14] = [
        Self::Bool,
        Self::I16,
        Self::I32,
        Self::I64,
        Self::F32,
        Self::F64,
        Self::Decimal,
        Self::String,
        Self::Bytes,
        Self::Uuid,
        Self::DateTime,
        Self::Date,
        Self::Time,
        Self::Json,
    ];

    /// The Rust type as it is written in generated code.
    pub fn rust_type(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Decimal => "kiln_model::types::Decimal",
            Self::String => "String",
            Self::Bytes => "Vec<u8>",
            Self::Uuid => "kiln_model::types::Uuid",
            Self::DateTime => "kiln_model::types::DateTime",
            Self::Date => "kiln_model::types::Date",
            Self::Time => "kiln_model::types::Time",
            Self::Json => "kiln_model::types::Json",
        }
    }

    /// The Rust type, wrapped in `Option` when nullable.
    pub fn rust_type_with_nullability(&self, nullable: bool) -> String {
        if nullable {
            format!("Option<{}>", self.rust_type())
        } else {
            self.rust_type().to_string()
        }
    }

    /// Parse a written Rust type back into a type and its nullability.
    ///
    /// Path-qualified names are matched on their last segment, so both
    /// `Uuid` and `kiln_model::types::Uuid` resolve.
    pub fn parse_rust_type(text: &str) -> Option<(ClrType, bool)> {
        let text: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        if let Some(inner) = text
            .strip_prefix("Option<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return Self::parse_plain(inner).map(|ty| (ty, true));
        }
        Self::parse_plain(&text).map(|ty| (ty, false))
    }

    fn parse_plain(text: &str) -> Option<ClrType> {
        let ty = match text {
            "bool" => Self::Bool,
            "i16" => Self::I16,
            "i32" => Self::I32,
            "i64" => Self::I64,
            "f32" => Self::F32,
            "f64" => Self::F64,
            "String" | "std::string::String" => Self::String,
            "Vec<u8>" | "std::vec::Vec<u8>" => Self::Bytes,
            _ => match text.rsplit("::").next()? {
                "Decimal" => Self::Decimal,
                "Uuid" => Self::Uuid,
                "DateTime" | "NaiveDateTime" => Self::DateTime,
                "Date" | "NaiveDate" => Self::Date,
                "Time" | "NaiveTime" => Self::Time,
                "Json" => Self::Json,
                _ => return None,
            },
        };
        Some(ty)
    }

    /// Default PostgreSQL store type for this type.
    pub fn default_store_type(&self) -> &'static str {
        match self {
            Self::Bool => "boolean",
            Self::I16 => "smallint",
            Self::I32 => "integer",
            Self::I64 => "bigint",
            Self::F32 => "real",
            Self::F64 => "double precision",
            Self::Decimal => "numeric",
            Self::String => "text",
            Self::Bytes => "bytea",
            Self::Uuid => "uuid",
            Self::DateTime => "timestamp without time zone",
            Self::Date => "date",
            Self::Time => "time without time zone",
            Self::Json => "jsonb",
        }
    }

    /// Whether the type is a primitive that needs no import.
    pub fn is_primitive(&self) -> bool {
        !self.rust_type().contains("::")
    }
}

impl fmt::Display for ClrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rust_type())
    }
}

/// Types usable as `property::<T>()` / `add_column::<T>()` arguments.
pub trait ClrTyped {
    /// The store-facing type identity.
    const CLR_TYPE: ClrType;
    /// Whether `T` admits nulls.
    const NULLABLE: bool = false;
}

macro_rules! impl_clr_typed {
    ($($t:ty => $v:ident),* $(,)?) => {
        $(impl ClrTyped for $t {
            const CLR_TYPE: ClrType = ClrType::$v;
        })*
    };
}

impl_clr_typed! {
    bool => Bool,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    String => String,
    Vec<u8> => Bytes,
    types::Decimal => Decimal,
    types::Uuid => Uuid,
    types::DateTime => DateTime,
    types::Date => Date,
    types::Time => Time,
    types::Json => Json,
}

impl<T: ClrTyped> ClrTyped for Option<T> {
    const CLR_TYPE: ClrType = T::CLR_TYPE;
    const NULLABLE: bool = true;
}

/// What happens to dependent rows when a principal row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// Variant name as written in generated code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoAction => "NoAction",
            Self::Restrict => "Restrict",
            Self::Cascade => "Cascade",
            Self::SetNull => "SetNull",
            Self::SetDefault => "SetDefault",
        }
    }

    /// Parse a variant name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "NoAction" => Some(Self::NoAction),
            "Restrict" => Some(Self::Restrict),
            "Cascade" => Some(Self::Cascade),
            "SetNull" => Some(Self::SetNull),
            "SetDefault" => Some(Self::SetDefault),
            _ => None,
        }
    }

    /// SQL clause text.
    pub fn to_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_from_option() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::Text("a".into()));
        assert_eq!(Value::from(7i16), Value::Int(7));
    }

    #[test]
    fn test_non_finite_floats_survive_json() {
        let values = vec![
            Value::Float(f64::INFINITY),
            Value::Float(f64::NEG_INFINITY),
            Value::Float(1.5),
        ];
        let json = serde_json::to_string(&values).unwrap();
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);

        let nan = serde_json::to_string(&Value::Float(f64::NAN)).unwrap();
        match serde_json::from_str::<Value>(&nan).unwrap() {
            Value::Float(v) => assert!(v.is_nan()),
            other => panic!("Expected Float, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rust_type() {
        assert_eq!(ClrType::parse_rust_type("i32"), Some((ClrType::I32, false)));
        assert_eq!(
            ClrType::parse_rust_type("Option<String>"),
            Some((ClrType::String, true))
        );
        assert_eq!(
            ClrType::parse_rust_type("Option< kiln_model::types::Uuid >"),
            Some((ClrType::Uuid, true))
        );
        assert_eq!(ClrType::parse_rust_type("Vec<u8>"), Some((ClrType::Bytes, false)));
        assert_eq!(ClrType::parse_rust_type("HashMap<u8, u8>"), None);
    }

    #[test]
    fn test_rust_type_parses_back() {
        for ty in ClrType::ALL {
            let written = ty.rust_type_with_nullability(true);
            assert_eq!(ClrType::parse_rust_type(&written), Some((ty, true)));
        }
    }

    #[test]
    fn test_clr_typed_option() {
        assert_eq!(<Option<String> as ClrTyped>::CLR_TYPE, ClrType::String);
        assert!(<Option<String> as ClrTyped>::NULLABLE);
        assert!(!<i64 as ClrTyped>::NULLABLE);
    }

    #[test]
    fn test_referential_action_names() {
        assert_eq!(ReferentialAction::default(), ReferentialAction::NoAction);
        assert_eq!(
            ReferentialAction::from_name("SetNull"),
            Some(ReferentialAction::SetNull)
        );
        assert_eq!(ReferentialAction::Cascade.to_sql(), "CASCADE");
    }
}
