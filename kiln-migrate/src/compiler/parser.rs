//! Builds the syntax tree from pest pairs.

use pest::Parser;
use pest::error::LineColLocation;
use pest::iterators::Pair;

use super::ast::*;
use super::diagnostics::{Diagnostic, ids};
use super::grammar::{KilnParser, Rule};

type ParseResult<T> = Result<T, Diagnostic>;

/// Parse one source file.
pub fn parse_source(name: &str, text: &str) -> ParseResult<SourceFile> {
    let pairs = KilnParser::parse(Rule::file, text).map_err(|e| {
        let (line, column) = match e.line_col {
            LineColLocation::Pos(pos) => pos,
            LineColLocation::Span(start, _) => start,
        };
        Diagnostic::error(
            ids::SYNTAX_ERROR,
            name,
            Span::new(line, column),
            e.variant.message().to_string(),
        )
    })?;

    let parser = FileParser { name };
    let mut file = SourceFile {
        name: name.to_string(),
        items: Vec::new(),
    };
    for pair in pairs.filter(|p| p.as_rule() == Rule::file) {
        for item in pair.into_inner() {
            if let Some(item) = parser.item(item)? {
                file.items.push(item);
            }
        }
    }
    Ok(file)
}

fn span_of(pair: &Pair<'_, Rule>) -> Span {
    let (line, column) = pair.as_span().start_pos().line_col();
    Span::new(line, column)
}

fn join(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        path.to_string()
    } else {
        format!("{}::{}", prefix, path)
    }
}

struct FileParser<'n> {
    name: &'n str,
}

impl FileParser<'_> {
    fn error(&self, span: Span, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(ids::SYNTAX_ERROR, self.name, span, message)
    }

    fn item(&self, pair: Pair<'_, Rule>) -> ParseResult<Option<Item>> {
        let span = span_of(&pair);
        let item = match pair.as_rule() {
            Rule::use_decl => {
                let mut paths = Vec::new();
                for tree in pair.into_inner() {
                    use_tree("", tree, &mut paths);
                }
                Item::Use(UseDecl { paths, span })
            }
            Rule::module => {
                let mut name = String::new();
                let mut items = Vec::new();
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::ident => name = inner.as_str().to_string(),
                        _ => {
                            if let Some(item) = self.item(inner)? {
                                items.push(item);
                            }
                        }
                    }
                }
                Item::Module(ModuleDecl { name, items, span })
            }
            Rule::struct_decl => {
                let mut decl = StructDecl {
                    name: String::new(),
                    attributes: Vec::new(),
                    span,
                };
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::attribute => decl.attributes.push(attribute_text(inner)),
                        Rule::ident => decl.name = inner.as_str().to_string(),
                        _ => {}
                    }
                }
                Item::Struct(decl)
            }
            Rule::impl_block => {
                let mut block = ImplBlock {
                    trait_path: String::new(),
                    type_name: String::new(),
                    attributes: Vec::new(),
                    methods: Vec::new(),
                    span,
                };
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::attribute => block.attributes.push(attribute_text(inner)),
                        Rule::path => block.trait_path = inner.as_str().to_string(),
                        Rule::ident => block.type_name = inner.as_str().to_string(),
                        Rule::fn_decl => block.methods.push(self.fn_decl(inner)?),
                        _ => {}
                    }
                }
                Item::Impl(block)
            }
            _ => return Ok(None),
        };
        Ok(Some(item))
    }

    fn fn_decl(&self, pair: Pair<'_, Rule>) -> ParseResult<FnDecl> {
        let mut decl = FnDecl {
            name: String::new(),
            param: None,
            return_type: None,
            body: Block::default(),
            span: span_of(&pair),
        };
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::ident => decl.name = inner.as_str().to_string(),
                Rule::param => {
                    let span = span_of(&inner);
                    let mut param = Param {
                        name: String::new(),
                        type_path: String::new(),
                        span,
                    };
                    for part in inner.into_inner() {
                        match part.as_rule() {
                            Rule::ident => param.name = part.as_str().to_string(),
                            Rule::path => param.type_path = part.as_str().to_string(),
                            _ => {}
                        }
                    }
                    decl.param = Some(param);
                }
                Rule::ret_type => decl.return_type = Some(inner.as_str().trim().to_string()),
                Rule::block => decl.body = self.block(inner)?,
                _ => {}
            }
        }
        Ok(decl)
    }

    fn block(&self, pair: Pair<'_, Rule>) -> ParseResult<Block> {
        let mut block = Block::default();
        for inner in pair.into_inner() {
            let rule = inner.as_rule();
            let Some(expr) = inner.into_inner().next() else {
                continue;
            };
            match rule {
                Rule::stmt => block.stmts.push(self.expr(expr)?),
                Rule::tail => block.tail = Some(self.expr(expr)?),
                _ => {}
            }
        }
        Ok(block)
    }

    fn expr(&self, pair: Pair<'_, Rule>) -> ParseResult<Expr> {
        let span = span_of(&pair);
        let mut primary = None;
        let mut calls = Vec::new();
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::method_call => calls.push(self.method_call(inner)?),
                _ => primary = Some(self.primary(inner)?),
            }
        }
        let primary = primary.ok_or_else(|| self.error(span, "expected an expression"))?;
        Ok(Expr {
            primary,
            calls,
            span,
        })
    }

    fn args(&self, pair: Option<Pair<'_, Rule>>) -> ParseResult<Vec<Expr>> {
        match pair {
            Some(args) => args.into_inner().map(|e| self.expr(e)).collect(),
            None => Ok(Vec::new()),
        }
    }

    fn primary(&self, pair: Pair<'_, Rule>) -> ParseResult<Primary> {
        let span = span_of(&pair);
        let text = pair.as_str();
        let primary = match pair.as_rule() {
            Rule::boolean => Primary::Lit(Lit::Bool(text == "true")),
            Rule::integer => {
                let digits = text
                    .trim_end_matches("i64")
                    .trim_end_matches("i32")
                    .trim_end_matches("i16");
                let value = digits
                    .parse::<i64>()
                    .map_err(|_| self.error(span, format!("integer literal `{}` is out of range", text)))?;
                Primary::Lit(Lit::Int(value))
            }
            Rule::float => {
                let digits = text.trim_end_matches("f64").trim_end_matches("f32");
                let value = digits
                    .parse::<f64>()
                    .map_err(|_| self.error(span, format!("invalid float literal `{}`", text)))?;
                Primary::Lit(Lit::Float(value))
            }
            Rule::string => Primary::Lit(Lit::Str(self.string(pair)?)),
            Rule::byte_string => {
                let inner = pair.into_inner().next().map(|p| p.as_str()).unwrap_or_default();
                let bytes = unescape_bytes(inner).map_err(|m| self.error(span, m))?;
                Primary::Lit(Lit::Bytes(bytes))
            }
            Rule::path_expr => Primary::Path(text.to_string()),
            Rule::call_expr => {
                let mut path = String::new();
                let mut args = None;
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::path => path = inner.as_str().to_string(),
                        Rule::args => args = Some(inner),
                        _ => {}
                    }
                }
                Primary::Call {
                    path,
                    args: self.args(args)?,
                }
            }
            Rule::array => Primary::Array(self.args(pair.into_inner().next())?),
            Rule::slice_ref => {
                let array = pair.into_inner().next();
                Primary::SliceRef(self.args(array.and_then(|a| a.into_inner().next()))?)
            }
            Rule::closure => {
                let mut param = String::new();
                let mut body = Block::default();
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::ident => param = inner.as_str().to_string(),
                        Rule::block => body = self.block(inner)?,
                        _ => {}
                    }
                }
                Primary::Closure { param, body: Box::new(body) }
            }
            Rule::macro_call => {
                let mut path = String::new();
                let mut body = MacroBody::List(Vec::new());
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::path => path = inner.as_str().to_string(),
                        Rule::macro_brackets => {
                            body = MacroBody::List(self.args(inner.into_inner().next())?);
                        }
                        Rule::macro_braces => {
                            let mut pairs = Vec::new();
                            for seed_pair in inner.into_inner() {
                                let mut key = String::new();
                                let mut value = None;
                                for part in seed_pair.into_inner() {
                                    match part.as_rule() {
                                        Rule::string => key = self.string(part)?,
                                        Rule::expr => value = Some(self.expr(part)?),
                                        _ => {}
                                    }
                                }
                                let value = value.ok_or_else(|| self.error(span, "expected a value after `=>`"))?;
                                pairs.push((key, value));
                            }
                            body = MacroBody::Pairs(pairs);
                        }
                        _ => {}
                    }
                }
                Primary::Macro { path, body }
            }
            other => return Err(self.error(span, format!("unexpected {:?}", other))),
        };
        Ok(primary)
    }

    fn string(&self, pair: Pair<'_, Rule>) -> ParseResult<String> {
        let span = span_of(&pair);
        let inner = pair.into_inner().next().map(|p| p.as_str()).unwrap_or_default();
        unescape(inner).map_err(|m| self.error(span, m))
    }

    fn method_call(&self, pair: Pair<'_, Rule>) -> ParseResult<MethodCall> {
        let span = span_of(&pair);
        let mut call = MethodCall {
            name: String::new(),
            turbofish: None,
            args: Vec::new(),
            span,
        };
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::ident => call.name = inner.as_str().to_string(),
                Rule::turbofish => {
                    call.turbofish = inner.into_inner().next().map(type_expr);
                }
                Rule::args => call.args = self.args(Some(inner))?,
                _ => {}
            }
        }
        Ok(call)
    }
}

fn use_tree(prefix: &str, pair: Pair<'_, Rule>, out: &mut Vec<String>) {
    let mut base = prefix.to_string();
    let mut group = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::path => base = join(prefix, inner.as_str()),
            Rule::use_group => group = Some(inner),
            _ => {}
        }
    }
    match group {
        Some(group) => {
            for tree in group.into_inner() {
                use_tree(&base, tree, out);
            }
        }
        None => out.push(base),
    }
}

fn attribute_text(pair: Pair<'_, Rule>) -> String {
    pair.into_inner()
        .next()
        .map(|body| body.as_str().trim().to_string())
        .unwrap_or_default()
}

fn type_expr(pair: Pair<'_, Rule>) -> TypeExpr {
    let mut ty = TypeExpr {
        path: String::new(),
        args: Vec::new(),
    };
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::path => ty.path = inner.as_str().to_string(),
            Rule::type_expr => ty.args.push(type_expr(inner)),
            _ => {}
        }
    }
    ty
}

fn escaped_char(chars: &mut std::str::Chars<'_>) -> Result<EscapedChar, String> {
    let c = chars.next().ok_or("unterminated escape sequence")?;
    let decoded = match c {
        'n' => EscapedChar::Char('\n'),
        'r' => EscapedChar::Char('\r'),
        't' => EscapedChar::Char('\t'),
        '0' => EscapedChar::Char('\0'),
        '\\' | '"' | '\'' => EscapedChar::Char(c),
        'x' => {
            let hex: String = chars.by_ref().take(2).collect();
            let byte = u8::from_str_radix(&hex, 16).map_err(|_| format!("invalid escape `\\x{}`", hex))?;
            EscapedChar::Byte(byte)
        }
        'u' => {
            let digits: String = chars
                .by_ref()
                .skip_while(|c| *c == '{')
                .take_while(|c| *c != '}')
                .collect();
            let code = u32::from_str_radix(&digits, 16)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| format!("invalid unicode escape `\\u{{{}}}`", digits))?;
            EscapedChar::Char(code)
        }
        other => return Err(format!("unknown character escape `\\{}`", other)),
    };
    Ok(decoded)
}

enum EscapedChar {
    Char(char),
    Byte(u8),
}

/// Decode the body of a string literal.
fn unescape(text: &str) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match escaped_char(&mut chars)? {
            EscapedChar::Char(c) => out.push(c),
            EscapedChar::Byte(b) if b.is_ascii() => out.push(b as char),
            EscapedChar::Byte(b) => return Err(format!("out of range hex escape `\\x{:02x}`", b)),
        }
    }
    Ok(out)
}

/// Decode the body of a byte string literal.
fn unescape_bytes(text: &str) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match escaped_char(&mut chars)? {
            EscapedChar::Byte(b) => out.push(b),
            EscapedChar::Char(c) if c.is_ascii() => out.push(c as u8),
            EscapedChar::Char(c) => return Err(format!("unicode escape `{}` in byte string", c.escape_unicode())),
        }
    }
    Ok(out)
}
