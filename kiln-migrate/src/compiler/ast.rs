//! Syntax tree of a generated source file.

/// A 1-based line and column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// A parsed file.
#[derive(Debug, Clone, Default)]
pub struct SourceFile {
    pub name: String,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone)]
pub enum Item {
    Use(UseDecl),
    Module(ModuleDecl),
    Struct(StructDecl),
    Impl(ImplBlock),
}

/// A `use` declaration, flattened to one path per imported item.
#[derive(Debug, Clone)]
pub struct UseDecl {
    pub paths: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ModuleDecl {
    pub name: String,
    pub items: Vec<Item>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: String,
    pub attributes: Vec<String>,
    pub span: Span,
}

/// `impl Trait for Type { .. }`.
#[derive(Debug, Clone)]
pub struct ImplBlock {
    pub trait_path: String,
    pub type_name: String,
    pub attributes: Vec<String>,
    pub methods: Vec<FnDecl>,
    pub span: Span,
}

/// A method taking `&self` and at most one builder parameter.
#[derive(Debug, Clone)]
pub struct FnDecl {
    pub name: String,
    pub param: Option<Param>,
    pub return_type: Option<String>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub type_path: String,
    pub span: Span,
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub stmts: Vec<Expr>,
    pub tail: Option<Expr>,
}

impl Block {
    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty() && self.tail.is_none()
    }
}

/// A primary expression followed by chained method calls.
#[derive(Debug, Clone)]
pub struct Expr {
    pub primary: Primary,
    pub calls: Vec<MethodCall>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Primary {
    Lit(Lit),
    Path(String),
    Call { path: String, args: Vec<Expr> },
    Closure { param: String, body: Box<Block> },
    Macro { path: String, body: MacroBody },
    Array(Vec<Expr>),
    SliceRef(Vec<Expr>),
}

#[derive(Debug, Clone)]
pub enum MacroBody {
    /// `name![a, b]`
    List(Vec<Expr>),
    /// `name! { "key" => value }`
    Pairs(Vec<(String, Expr)>),
}

#[derive(Debug, Clone)]
pub struct MethodCall {
    pub name: String,
    pub turbofish: Option<TypeExpr>,
    pub args: Vec<Expr>,
    pub span: Span,
}

/// A type argument such as `Option<String>`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub path: String,
    pub args: Vec<TypeExpr>,
}

impl TypeExpr {
    /// Every path mentioned, outermost first.
    pub fn paths(&self) -> Vec<&str> {
        let mut out = vec![self.path.as_str()];
        for arg in &self.args {
            out.extend(arg.paths());
        }
        out
    }
}

impl std::fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)?;
        if !self.args.is_empty() {
            let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
            write!(f, "<{}>", args.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_expr_display() {
        let ty = TypeExpr {
            path: "Option".into(),
            args: vec![TypeExpr {
                path: "kiln_model::types::Uuid".into(),
                args: vec![],
            }],
        };
        assert_eq!(ty.to_string(), "Option<kiln_model::types::Uuid>");
        assert_eq!(ty.paths(), vec!["Option", "kiln_model::types::Uuid"]);
    }
}
