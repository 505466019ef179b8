//! Compiler diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ast::Span;

/// Diagnostic ids.
pub mod ids {
    pub const SYNTAX_ERROR: &str = "syntax_error";
    pub const UNRESOLVED_IMPORT: &str = "unresolved_import";
    pub const UNRESOLVED_PATH: &str = "unresolved_path";
    pub const UNKNOWN_METHOD: &str = "unknown_method";
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const DUPLICATE_TYPE: &str = "duplicate_type";
    pub const MISSING_TRAIT_ITEM: &str = "missing_trait_item";
    pub const DUPLICATE_REFERENCE: &str = "duplicate_reference";
    pub const REFERENCE_VERSION_MISMATCH: &str = "reference_version_mismatch";
    pub const UNUSED_IMPORT: &str = "unused_import";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// One compiler message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub id: String,
    pub severity: Severity,
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn error(id: &str, file: &str, span: Span, message: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            severity: Severity::Error,
            file: file.to_string(),
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }

    pub fn warning(id: &str, file: &str, span: Span, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(id, file, span, message)
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() {
            write!(f, "{}[{}]: {}", self.severity, self.id, self.message)
        } else {
            write!(
                f,
                "{}[{}]: {}:{}:{}: {}",
                self.severity, self.id, self.file, self.line, self.column, self.message
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let d = Diagnostic::error(ids::UNKNOWN_METHOD, "a.rs", Span::new(3, 9), "no method named `frob`");
        assert_eq!(d.to_string(), "error[unknown_method]: a.rs:3:9: no method named `frob`");
        assert!(d.is_error());

        let w = Diagnostic::warning(ids::UNUSED_IMPORT, "", Span::default(), "unused import");
        assert_eq!(w.to_string(), "warning[unused_import]: unused import");
        assert!(!w.is_error());
    }
}
