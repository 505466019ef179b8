//! Lowering of parsed sources into type images.
//!
//! Generated sources are builder call chains with literal arguments. This
//! pass resolves their paths against the unit's references, replays each
//! chain against [`MigrationBuilder`] or [`ModelBuilder`], and records the
//! operations and models that result.

use std::cell::Cell;
use std::collections::HashSet;

use indexmap::IndexMap;
use kiln_model::{
    Annotations, ClrType, EntityTypeBuilder, IndexBuilder, KeyBuilder, Model, ModelBuilder,
    NavigationBuilder, PropertyBuilder, ReferentialAction, RelationshipBuilder, SeedRow, SmolStr,
    Value,
};

use super::ast::*;
use super::backend::{ImageKind, TypeImage};
use super::diagnostics::{Diagnostic, ids};
use crate::builder::{self, MigrationBuilder};
use crate::modules::ModuleRef;
use crate::operations::*;

type Lowered<T> = Result<T, Diagnostic>;

const PRELUDE: &[&str] = &["Some", "None", "Option", "String", "Vec", "Ok", "Err", "Result", "Box"];
const PRIMITIVES: &[&str] = &[
    "bool", "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f32", "f64", "str", "usize", "isize",
];
const LOCAL_ROOTS: &[&str] = &["crate", "self", "super"];

const MIGRATE_ITEMS: &[&str] = &[
    "Migration",
    "MigrationMetadata",
    "ModelSnapshot",
    "MigrationBuilder",
    "ColumnsBuilder",
    "ConstraintsBuilder",
    "Operation",
    "operations",
    "values",
    "rows",
];
const MODEL_ITEMS: &[&str] = &[
    "ModelBuilder",
    "EntityTypeBuilder",
    "Model",
    "Value",
    "ReferentialAction",
    "ClrType",
    "Annotations",
    "SeedRow",
    "SmolStr",
    "seed",
    "types",
    "annotation_names",
];
const MODEL_TYPES: &[&str] = &["Decimal", "Uuid", "DateTime", "Date", "Time", "Json"];

const MIGRATION_TRAIT: &str = "kiln_migrate::Migration";
const METADATA_TRAIT: &str = "kiln_migrate::MigrationMetadata";
const SNAPSHOT_TRAIT: &str = "kiln_migrate::ModelSnapshot";
const MIGRATION_BUILDER: &str = "kiln_migrate::MigrationBuilder";
const MODEL_BUILDER: &str = "kiln_model::ModelBuilder";

const COLUMN: [&str; 2] = ["column", "columns"];
const PRINCIPAL_COLUMN: [&str; 2] = ["principal_column", "principal_columns"];
const KEY_COLUMN: [&str; 2] = ["key_column", "key_columns"];
const VALUES: [&str; 3] = ["value", "values", "rows"];
const KEY_VALUES: [&str; 3] = ["key_value", "key_values", "key_rows"];

/// Whether a path into the Kiln crates names an item they export.
fn known_item(path: &str) -> bool {
    let segments: Vec<&str> = path.split("::").collect();
    match segments.as_slice() {
        ["kiln_migrate", item, ..] => MIGRATE_ITEMS.contains(item),
        ["kiln_model", "types", ty] => MODEL_TYPES.contains(ty),
        ["kiln_model", "Value", variant] => *variant == "Null",
        ["kiln_model", "ReferentialAction", variant] => ReferentialAction::from_name(variant).is_some(),
        ["kiln_model", item, ..] => MODEL_ITEMS.contains(item),
        _ => true,
    }
}

/// Lower every file of a unit.
///
/// Returns the types found and every diagnostic raised. Types are only
/// meaningful when no diagnostic is an error.
pub fn lower_unit(files: &[SourceFile], references: &[ModuleRef]) -> (Vec<TypeImage>, Vec<Diagnostic>) {
    let crates: HashSet<String> = references.iter().map(|r| r.name.clone()).collect();
    let mut unit = UnitLowering {
        crates: &crates,
        types: IndexMap::new(),
        diagnostics: Vec::new(),
    };
    for file in files {
        unit.module(&file.name, "", &file.items);
    }
    unit.finish()
}

struct MetadataBody {
    id: Option<String>,
    model_owner: Option<String>,
    target_model: Option<Model>,
}

struct SnapshotBody {
    model_owner: Option<String>,
    model: Model,
}

enum ImplBody {
    Migration(Vec<Operation>, Vec<Operation>),
    Metadata(MetadataBody),
    Snapshot(SnapshotBody),
}

/// Everything known about one type across the unit's files.
struct TypeEntry {
    name: String,
    namespace: String,
    declared: bool,
    impl_sites: Vec<(String, Span)>,
    migration: Option<(Vec<Operation>, Vec<Operation>)>,
    metadata: Option<MetadataBody>,
    snapshot: Option<SnapshotBody>,
}

struct UnitLowering<'a> {
    crates: &'a HashSet<String>,
    types: IndexMap<String, TypeEntry>,
    diagnostics: Vec<Diagnostic>,
}

fn join(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}::{}", namespace, name)
    }
}

impl<'a> UnitLowering<'a> {
    fn module(&mut self, file: &str, namespace: &str, items: &[Item]) {
        let scope = Scope::new(file, self.crates, items, &mut self.diagnostics);
        for item in items {
            match item {
                Item::Use(_) => {}
                Item::Module(module) => self.module(file, &join(namespace, &module.name), &module.items),
                Item::Struct(decl) => self.declare(file, namespace, decl),
                Item::Impl(block) => self.implement(&scope, namespace, block),
            }
        }
        self.diagnostics.extend(scope.unused_imports());
    }

    fn entry(&mut self, namespace: &str, name: &str) -> &mut TypeEntry {
        self.types
            .entry(join(namespace, name))
            .or_insert_with(|| TypeEntry {
                name: name.to_string(),
                namespace: namespace.to_string(),
                declared: false,
                impl_sites: Vec::new(),
                migration: None,
                metadata: None,
                snapshot: None,
            })
    }

    fn declare(&mut self, file: &str, namespace: &str, decl: &StructDecl) {
        let entry = self.entry(namespace, &decl.name);
        let duplicate = std::mem::replace(&mut entry.declared, true);
        if duplicate {
            self.diagnostics.push(Diagnostic::error(
                ids::DUPLICATE_TYPE,
                file,
                decl.span,
                format!("the name `{}` is defined multiple times", decl.name),
            ));
        }
    }

    fn implement(&mut self, scope: &Scope<'_>, namespace: &str, block: &ImplBlock) {
        let trait_path = match scope.resolve(&block.trait_path, block.span) {
            Ok(path) => path,
            Err(diagnostic) => {
                self.diagnostics.push(diagnostic);
                return;
            }
        };
        let body = match trait_path.as_str() {
            MIGRATION_TRAIT => scope.migration_impl(block, &mut self.diagnostics),
            METADATA_TRAIT => scope.metadata_impl(block, &mut self.diagnostics),
            SNAPSHOT_TRAIT => scope.snapshot_impl(block, &mut self.diagnostics),
            _ => {
                self.diagnostics.push(scope.error(
                    ids::UNRESOLVED_PATH,
                    block.span,
                    format!(
                        "expected `Migration`, `MigrationMetadata` or `ModelSnapshot`, found `{}`",
                        block.trait_path
                    ),
                ));
                return;
            }
        };

        let entry = self.entry(namespace, &block.type_name);
        entry.impl_sites.push((scope.file.to_string(), block.span));
        let conflicting = match body {
            ImplBody::Migration(up, down) => entry.migration.replace((up, down)).is_some(),
            ImplBody::Metadata(metadata) => entry.metadata.replace(metadata).is_some(),
            ImplBody::Snapshot(snapshot) => entry.snapshot.replace(snapshot).is_some(),
        };
        if conflicting {
            self.diagnostics.push(scope.error(
                ids::DUPLICATE_TYPE,
                block.span,
                format!(
                    "conflicting implementations of trait `{}` for type `{}`",
                    block.trait_path, block.type_name
                ),
            ));
        }
    }

    fn finish(self) -> (Vec<TypeImage>, Vec<Diagnostic>) {
        let Self {
            types, mut diagnostics, ..
        } = self;
        let mut images = Vec::with_capacity(types.len());

        for entry in types.into_values() {
            let site = entry.impl_sites.first().cloned().unwrap_or_default();
            if !entry.declared {
                for (file, span) in &entry.impl_sites {
                    diagnostics.push(Diagnostic::error(
                        ids::UNRESOLVED_PATH,
                        file,
                        *span,
                        format!("cannot find type `{}` in this scope", entry.name),
                    ));
                }
                continue;
            }

            let mut image = TypeImage {
                name: entry.name,
                namespace: entry.namespace,
                kind: ImageKind::Other,
                migration_id: None,
                model_owner: None,
                up: Vec::new(),
                down: Vec::new(),
                target_model: None,
                model: None,
            };
            match (entry.migration, entry.metadata, entry.snapshot) {
                (Some(_), None, _) => {
                    diagnostics.push(Diagnostic::error(
                        ids::MISSING_TRAIT_ITEM,
                        &site.0,
                        site.1,
                        format!("the trait bound `{}: MigrationMetadata` is not satisfied", image.name),
                    ));
                    continue;
                }
                (Some((up, down)), Some(metadata), _) => {
                    image.kind = ImageKind::Migration;
                    image.migration_id = metadata.id;
                    image.model_owner = metadata.model_owner;
                    image.target_model = metadata.target_model;
                    image.up = up;
                    image.down = down;
                }
                (None, _, Some(snapshot)) => {
                    image.kind = ImageKind::ModelSnapshot;
                    image.model_owner = snapshot.model_owner;
                    image.model = Some(snapshot.model);
                }
                (None, metadata, None) => {
                    image.model_owner = metadata.and_then(|m| m.model_owner);
                }
            }
            images.push(image);
        }

        (images, diagnostics)
    }
}

struct Import {
    alias: String,
    path: String,
    span: Span,
    used: Cell<bool>,
}

/// The names visible in one module of one file.
struct Scope<'a> {
    file: &'a str,
    crates: &'a HashSet<String>,
    imports: Vec<Import>,
}

impl<'a> Scope<'a> {
    fn new(file: &'a str, crates: &'a HashSet<String>, items: &[Item], diagnostics: &mut Vec<Diagnostic>) -> Self {
        let mut imports: Vec<Import> = Vec::new();
        for item in items {
            let Item::Use(decl) = item else {
                continue;
            };
            for path in &decl.paths {
                let root = path.split("::").next().unwrap_or_default();
                if !crates.contains(root) && !LOCAL_ROOTS.contains(&root) {
                    diagnostics.push(Diagnostic::error(
                        ids::UNRESOLVED_IMPORT,
                        file,
                        decl.span,
                        format!("unresolved import `{}`: no module `{}` is referenced", path, root),
                    ));
                    continue;
                }
                if !known_item(path) {
                    diagnostics.push(Diagnostic::error(
                        ids::UNRESOLVED_IMPORT,
                        file,
                        decl.span,
                        format!("unresolved import `{}`", path),
                    ));
                    continue;
                }
                let alias = path.rsplit("::").next().unwrap_or(path).to_string();
                if imports.iter().any(|i| i.alias == alias) {
                    diagnostics.push(Diagnostic::error(
                        ids::DUPLICATE_TYPE,
                        file,
                        decl.span,
                        format!("the name `{}` is defined multiple times", alias),
                    ));
                    continue;
                }
                imports.push(Import {
                    alias,
                    path: path.clone(),
                    span: decl.span,
                    used: Cell::new(false),
                });
            }
        }
        Self { file, crates, imports }
    }

    fn unused_imports(&self) -> Vec<Diagnostic> {
        self.imports
            .iter()
            .filter(|i| !i.used.get())
            .map(|i| {
                Diagnostic::warning(
                    ids::UNUSED_IMPORT,
                    self.file,
                    i.span,
                    format!("unused import: `{}`", i.path),
                )
            })
            .collect()
    }

    fn error(&self, id: &str, span: Span, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(id, self.file, span, message)
    }

    fn invalid(&self, span: Span, message: impl Into<String>) -> Diagnostic {
        self.error(ids::INVALID_ARGUMENT, span, message)
    }

    fn unknown(&self, call: &MethodCall, on: &str) -> Diagnostic {
        self.error(
            ids::UNKNOWN_METHOD,
            call.span,
            format!("no method named `{}` found for `{}`", call.name, on),
        )
    }

    /// Resolve a path to its full form.
    fn resolve(&self, path: &str, span: Span) -> Lowered<String> {
        let (head, rest) = match path.split_once("::") {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let full = if let Some(import) = self.imports.iter().find(|i| i.alias == head) {
            import.used.set(true);
            match rest {
                Some(rest) => format!("{}::{}", import.path, rest),
                None => import.path.clone(),
            }
        } else if rest.is_none() && (PRELUDE.contains(&head) || PRIMITIVES.contains(&head)) {
            return Ok(path.to_string());
        } else if rest.is_some()
            && (self.crates.contains(head) || PRIMITIVES.contains(&head) || LOCAL_ROOTS.contains(&head))
        {
            path.to_string()
        } else {
            return Err(self.error(
                ids::UNRESOLVED_PATH,
                span,
                format!("failed to resolve: use of undeclared type or module `{}`", head),
            ));
        };
        if !known_item(&full) {
            return Err(self.error(ids::UNRESOLVED_PATH, span, format!("cannot find `{}`", full)));
        }
        Ok(full)
    }

    // ------------------------------------------------------------------
    // Arguments
    // ------------------------------------------------------------------

    fn exact(&self, call: &MethodCall, count: usize) -> Lowered<()> {
        if call.args.len() == count {
            Ok(())
        } else {
            Err(self.invalid(
                call.span,
                format!(
                    "method `{}` takes {} argument(s) but {} were supplied",
                    call.name,
                    count,
                    call.args.len()
                ),
            ))
        }
    }

    fn one<'e>(&self, call: &'e MethodCall) -> Lowered<&'e Expr> {
        self.exact(call, 1)?;
        Ok(&call.args[0])
    }

    fn check_generics(&self, call: &MethodCall, allowed: bool) -> Lowered<()> {
        if call.turbofish.is_some() && !allowed {
            return Err(self.invalid(
                call.span,
                format!("method `{}` takes 0 generic arguments", call.name),
            ));
        }
        Ok(())
    }

    fn plain<'e>(&self, expr: &'e Expr) -> Lowered<&'e Primary> {
        if expr.calls.is_empty() {
            Ok(&expr.primary)
        } else {
            Err(self.invalid(expr.span, "expected a literal, found a method call"))
        }
    }

    fn string(&self, expr: &Expr) -> Lowered<String> {
        match self.plain(expr)? {
            Primary::Lit(Lit::Str(s)) => Ok(s.clone()),
            _ => Err(self.invalid(expr.span, "expected a string literal")),
        }
    }

    fn boolean(&self, expr: &Expr) -> Lowered<bool> {
        match self.plain(expr)? {
            Primary::Lit(Lit::Bool(b)) => Ok(*b),
            _ => Err(self.invalid(expr.span, "expected `true` or `false`")),
        }
    }

    fn int(&self, expr: &Expr) -> Lowered<i64> {
        match self.plain(expr)? {
            Primary::Lit(Lit::Int(i)) => Ok(*i),
            _ => Err(self.invalid(expr.span, "expected an integer literal")),
        }
    }

    fn int32(&self, expr: &Expr) -> Lowered<i32> {
        let value = self.int(expr)?;
        i32::try_from(value)
            .map_err(|_| self.invalid(expr.span, format!("literal `{}` out of range for `i32`", value)))
    }

    fn s(&self, call: &MethodCall) -> Lowered<String> {
        self.string(self.one(call)?)
    }

    fn b(&self, call: &MethodCall) -> Lowered<bool> {
        self.boolean(self.one(call)?)
    }

    fn i32(&self, call: &MethodCall) -> Lowered<i32> {
        self.int32(self.one(call)?)
    }

    fn i64(&self, call: &MethodCall) -> Lowered<i64> {
        self.int(self.one(call)?)
    }

    fn v(&self, call: &MethodCall) -> Lowered<Value> {
        self.value(self.one(call)?)
    }

    /// `("name", value)` of an annotation call.
    fn pair(&self, call: &MethodCall) -> Lowered<(String, Value)> {
        self.exact(call, 2)?;
        Ok((self.string(&call.args[0])?, self.value(&call.args[1])?))
    }

    fn value(&self, expr: &Expr) -> Lowered<Value> {
        match self.plain(expr)? {
            Primary::Lit(lit) => Ok(match lit {
                Lit::Bool(b) => Value::Bool(*b),
                Lit::Int(i) => Value::Int(*i),
                Lit::Float(f) => Value::Float(*f),
                Lit::Str(s) => Value::Text(s.clone()),
                Lit::Bytes(b) => Value::Bytes(b.clone()),
            }),
            Primary::Path(path) => {
                let full = self.resolve(path, expr.span)?;
                let float = full
                    .strip_prefix("std::")
                    .or_else(|| full.strip_prefix("core::"))
                    .unwrap_or(&full);
                match float {
                    "kiln_model::Value::Null" | "None" => Ok(Value::Null),
                    "f64::NAN" => Ok(Value::Float(f64::NAN)),
                    "f64::INFINITY" => Ok(Value::Float(f64::INFINITY)),
                    "f64::NEG_INFINITY" => Ok(Value::Float(f64::NEG_INFINITY)),
                    _ => Err(self.invalid(expr.span, format!("expected a literal value, found `{}`", path))),
                }
            }
            Primary::Call { path, args } => {
                let full = self.resolve(path, expr.span)?;
                match (full.as_str(), args.as_slice()) {
                    ("Some", [inner]) => self.value(inner),
                    _ => Err(self.invalid(expr.span, format!("expected a literal value, found `{}(..)`", path))),
                }
            }
            _ => Err(self.invalid(expr.span, "expected a literal value")),
        }
    }

    fn opt_string(&self, expr: &Expr) -> Lowered<Option<String>> {
        match self.plain(expr)? {
            Primary::Path(path) if self.resolve(path, expr.span)? == "None" => Ok(None),
            Primary::Call { path, args } if self.resolve(path, expr.span)? == "Some" => match args.as_slice() {
                [inner] => self.string(inner).map(Some),
                _ => Err(self.invalid(expr.span, "`Some` takes 1 argument")),
            },
            _ => Err(self.invalid(expr.span, "expected `Some(\"..\")` or `None`")),
        }
    }

    fn strings(&self, expr: &Expr) -> Lowered<Vec<String>> {
        match self.plain(expr)? {
            Primary::SliceRef(items) => items.iter().map(|item| self.string(item)).collect(),
            _ => Err(self.invalid(expr.span, "expected a slice of string literals")),
        }
    }

    fn action(&self, expr: &Expr) -> Lowered<ReferentialAction> {
        if let Primary::Path(path) = self.plain(expr)? {
            let full = self.resolve(path, expr.span)?;
            if let Some(action) = full
                .strip_prefix("kiln_model::ReferentialAction::")
                .and_then(ReferentialAction::from_name)
            {
                return Ok(action);
            }
        }
        Err(self.invalid(expr.span, "expected a `ReferentialAction` variant"))
    }

    fn closure<'e>(&self, expr: &'e Expr) -> Lowered<(&'e str, &'e Block)> {
        match self.plain(expr)? {
            Primary::Closure { param, body } => {
                self.no_tail(body)?;
                Ok((param.as_str(), &**body))
            }
            _ => Err(self.invalid(expr.span, "expected a closure")),
        }
    }

    fn macro_body<'e>(&self, expr: &'e Expr, expected: &str) -> Lowered<&'e MacroBody> {
        if let Primary::Macro { path, body } = self.plain(expr)? {
            if self.resolve(path, expr.span)? == expected {
                return Ok(body);
            }
        }
        let name = expected.rsplit("::").next().unwrap_or(expected);
        Err(self.invalid(expr.span, format!("expected `{}!`", name)))
    }

    fn value_list(&self, expr: &Expr) -> Lowered<Vec<Value>> {
        match self.macro_body(expr, "kiln_migrate::values")? {
            MacroBody::List(items) => items.iter().map(|item| self.value(item)).collect(),
            MacroBody::Pairs(_) => Err(self.invalid(expr.span, "expected `values![..]`")),
        }
    }

    fn rows(&self, expr: &Expr) -> Lowered<Vec<Vec<Value>>> {
        let MacroBody::List(rows) = self.macro_body(expr, "kiln_migrate::rows")? else {
            return Err(self.invalid(expr.span, "expected `rows![..]`"));
        };
        rows.iter()
            .map(|row| match self.plain(row)? {
                Primary::Array(items) => items.iter().map(|item| self.value(item)).collect(),
                _ => Err(self.invalid(row.span, "expected a row `[..]`")),
            })
            .collect()
    }

    fn seed_rows(&self, expr: &Expr) -> Lowered<Vec<SeedRow>> {
        let Primary::Array(items) = self.plain(expr)? else {
            return Err(self.invalid(expr.span, "expected an array of `seed!` rows"));
        };
        items
            .iter()
            .map(|item| {
                let mut row = SeedRow::new();
                match self.macro_body(item, "kiln_model::seed")? {
                    MacroBody::Pairs(pairs) => {
                        for (name, value) in pairs {
                            row.insert(SmolStr::new(name), self.value(value)?);
                        }
                    }
                    MacroBody::List(list) if list.is_empty() => {}
                    MacroBody::List(_) => return Err(self.invalid(item.span, "expected `seed! { .. }`")),
                }
                Ok(row)
            })
            .collect()
    }

    /// The type argument of a generic call, with its nullability.
    fn type_arg(&self, call: &MethodCall) -> Lowered<(ClrType, bool)> {
        let Some(ty) = &call.turbofish else {
            return Err(self.invalid(
                call.span,
                format!("type annotations needed for `{}`", call.name),
            ));
        };
        for path in ty.paths() {
            self.resolve(path, call.span)?;
        }
        ClrType::parse_rust_type(&ty.to_string())
            .ok_or_else(|| self.invalid(call.span, format!("`{}` is not a supported column type", ty)))
    }

    fn no_tail(&self, body: &Block) -> Lowered<()> {
        match &body.tail {
            Some(tail) => Err(self.invalid(tail.span, "mismatched types: expected `()`")),
            None => Ok(()),
        }
    }

    /// The calls of a statement on `receiver`.
    fn chain<'e>(&self, stmt: &'e Expr, receiver: &str) -> Lowered<&'e [MethodCall]> {
        match &stmt.primary {
            Primary::Path(path) if path == receiver && !stmt.calls.is_empty() => Ok(&stmt.calls),
            Primary::Path(path) if path == receiver => {
                Err(self.invalid(stmt.span, format!("expected a method call on `{}`", receiver)))
            }
            Primary::Path(path) => Err(self.error(
                ids::UNRESOLVED_PATH,
                stmt.span,
                format!("cannot find value `{}` in this scope", path),
            )),
            _ => Err(self.invalid(stmt.span, format!("expected a call chain on `{}`", receiver))),
        }
    }

    // ------------------------------------------------------------------
    // Impl blocks
    // ------------------------------------------------------------------

    fn methods<'b>(
        &self,
        block: &'b ImplBlock,
        allowed: &[&str],
        diagnostics: &mut Vec<Diagnostic>,
    ) -> IndexMap<&'b str, &'b FnDecl> {
        let mut methods = IndexMap::new();
        for method in &block.methods {
            if !allowed.contains(&method.name.as_str()) {
                diagnostics.push(self.error(
                    ids::UNKNOWN_METHOD,
                    method.span,
                    format!("method `{}` is not a member of trait `{}`", method.name, block.trait_path),
                ));
                continue;
            }
            if methods.insert(method.name.as_str(), method).is_some() {
                diagnostics.push(self.error(
                    ids::DUPLICATE_TYPE,
                    method.span,
                    format!("duplicate definitions with name `{}`", method.name),
                ));
            }
        }
        methods
    }

    fn missing(&self, block: &ImplBlock, item: &str) -> Diagnostic {
        self.error(
            ids::MISSING_TRAIT_ITEM,
            block.span,
            format!("not all trait items implemented, missing: `{}`", item),
        )
    }

    /// The builder parameter of a method, checked against `expected`.
    fn builder_param<'f>(&self, method: &'f FnDecl, expected: &str) -> Lowered<&'f Param> {
        let Some(param) = &method.param else {
            return Err(self.invalid(
                method.span,
                format!("method `{}` must take a `&mut {}` parameter", method.name, expected),
            ));
        };
        let resolved = self.resolve(&param.type_path, param.span)?;
        if resolved != expected {
            return Err(self.invalid(
                param.span,
                format!("mismatched types: expected `&mut {}`, found `&mut {}`", expected, param.type_path),
            ));
        }
        Ok(param)
    }

    fn tail<'f>(&self, method: &'f FnDecl) -> Lowered<&'f Expr> {
        match (&method.body.tail, method.body.stmts.is_empty()) {
            (Some(tail), true) => Ok(tail),
            _ => Err(self.invalid(method.span, format!("method `{}` must return a literal", method.name))),
        }
    }

    fn migration_impl(&self, block: &ImplBlock, diagnostics: &mut Vec<Diagnostic>) -> ImplBody {
        let methods = self.methods(block, &["up", "down"], diagnostics);
        let up = match methods.get("up") {
            Some(method) => self.operations(method, diagnostics),
            None => {
                diagnostics.push(self.missing(block, "up"));
                Vec::new()
            }
        };
        let down = methods
            .get("down")
            .map(|method| self.operations(method, diagnostics))
            .unwrap_or_default();
        ImplBody::Migration(up, down)
    }

    fn metadata_impl(&self, block: &ImplBlock, diagnostics: &mut Vec<Diagnostic>) -> ImplBody {
        let methods = self.methods(block, &["id", "model_owner", "build_target_model"], diagnostics);
        let id = match methods.get("id") {
            Some(method) => match self.tail(method).and_then(|tail| self.string(tail)) {
                Ok(id) => Some(id),
                Err(diagnostic) => {
                    diagnostics.push(diagnostic);
                    None
                }
            },
            None => {
                diagnostics.push(self.missing(block, "id"));
                None
            }
        };
        let model_owner = self.model_owner(methods.get("model_owner").copied(), diagnostics);
        let target_model = methods
            .get("build_target_model")
            .and_then(|method| self.model(method, diagnostics));
        ImplBody::Metadata(MetadataBody {
            id,
            model_owner,
            target_model,
        })
    }

    fn snapshot_impl(&self, block: &ImplBlock, diagnostics: &mut Vec<Diagnostic>) -> ImplBody {
        let methods = self.methods(block, &["model_owner", "build_model"], diagnostics);
        let model_owner = self.model_owner(methods.get("model_owner").copied(), diagnostics);
        let model = match methods.get("build_model") {
            Some(method) => self.model(method, diagnostics).unwrap_or_default(),
            None => {
                diagnostics.push(self.missing(block, "build_model"));
                Model::default()
            }
        };
        ImplBody::Snapshot(SnapshotBody { model_owner, model })
    }

    fn model_owner(&self, method: Option<&FnDecl>, diagnostics: &mut Vec<Diagnostic>) -> Option<String> {
        let method = method?;
        match self.tail(method).and_then(|tail| self.opt_string(tail)) {
            Ok(owner) => owner,
            Err(diagnostic) => {
                diagnostics.push(diagnostic);
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    fn operations(&self, method: &FnDecl, diagnostics: &mut Vec<Diagnostic>) -> Vec<Operation> {
        let param = match self.builder_param(method, MIGRATION_BUILDER).and_then(|p| {
            self.no_tail(&method.body)?;
            Ok(p)
        }) {
            Ok(param) => param,
            Err(diagnostic) => {
                diagnostics.push(diagnostic);
                return Vec::new();
            }
        };

        let mut migration_builder = MigrationBuilder::default();
        for stmt in &method.body.stmts {
            if let Err(diagnostic) = self.operation(&mut migration_builder, &param.name, stmt) {
                diagnostics.push(diagnostic);
            }
        }
        migration_builder.into_operations()
    }

    fn operation(&self, migration_builder: &mut MigrationBuilder, receiver: &str, stmt: &Expr) -> Lowered<()> {
        let calls = self.chain(stmt, receiver)?;
        let Some((first, rest)) = calls.split_first() else {
            return Ok(());
        };
        self.start(migration_builder, first)?;
        let Some(operation) = migration_builder.last_operation_mut() else {
            return Ok(());
        };
        for call in rest {
            self.apply(operation, call)?;
        }
        if let Operation::CreateTable(op) = operation {
            builder::stamp_table(op);
        }
        Ok(())
    }

    /// Record the operation a chain starts with.
    fn start(&self, mb: &mut MigrationBuilder, call: &MethodCall) -> Lowered<()> {
        type Named = fn(&mut MigrationBuilder, &str);
        const NAMED: &[(&str, Named)] = &[
            ("drop_column", |mb, n| drop(mb.drop_column(n))),
            ("rename_column", |mb, n| drop(mb.rename_column(n))),
            ("add_foreign_key", |mb, n| drop(mb.add_foreign_key(n))),
            ("add_primary_key", |mb, n| drop(mb.add_primary_key(n))),
            ("add_unique_constraint", |mb, n| drop(mb.add_unique_constraint(n))),
            ("add_check_constraint", |mb, n| drop(mb.add_check_constraint(n))),
            ("alter_sequence", |mb, n| drop(mb.alter_sequence(n))),
            ("alter_table", |mb, n| drop(mb.alter_table(n))),
            ("create_index", |mb, n| drop(mb.create_index(n))),
            ("create_table", |mb, n| drop(mb.create_table(n))),
            ("ensure_schema", |mb, n| drop(mb.ensure_schema(n))),
            ("drop_foreign_key", |mb, n| drop(mb.drop_foreign_key(n))),
            ("drop_index", |mb, n| drop(mb.drop_index(n))),
            ("drop_primary_key", |mb, n| drop(mb.drop_primary_key(n))),
            ("drop_schema", |mb, n| drop(mb.drop_schema(n))),
            ("drop_sequence", |mb, n| drop(mb.drop_sequence(n))),
            ("drop_table", |mb, n| drop(mb.drop_table(n))),
            ("drop_unique_constraint", |mb, n| drop(mb.drop_unique_constraint(n))),
            ("drop_check_constraint", |mb, n| drop(mb.drop_check_constraint(n))),
            ("rename_index", |mb, n| drop(mb.rename_index(n))),
            ("rename_sequence", |mb, n| drop(mb.rename_sequence(n))),
            ("rename_table", |mb, n| drop(mb.rename_table(n))),
            ("restart_sequence", |mb, n| drop(mb.restart_sequence(n))),
            ("sql", |mb, n| drop(mb.sql(n))),
            ("insert_data", |mb, n| drop(mb.insert_data(n))),
            ("delete_data", |mb, n| drop(mb.delete_data(n))),
            ("update_data", |mb, n| drop(mb.update_data(n))),
        ];

        let generic = matches!(call.name.as_str(), "add_column" | "alter_column" | "create_sequence");
        self.check_generics(call, generic)?;
        match call.name.as_str() {
            "add_column" => {
                let (clr_type, nullable) = self.type_arg(call)?;
                mb.add_column_of(&self.s(call)?, clr_type).nullable(nullable);
            }
            "alter_column" => {
                let (clr_type, _) = self.type_arg(call)?;
                drop(mb.alter_column_of(&self.s(call)?, clr_type));
            }
            "create_sequence" => {
                let (clr_type, _) = self.type_arg(call)?;
                drop(mb.create_sequence_of(&self.s(call)?, clr_type));
            }
            "alter_database" => {
                self.exact(call, 0)?;
                drop(mb.alter_database());
            }
            name => match NAMED.iter().find(|(n, _)| *n == name) {
                Some((_, start)) => start(mb, &self.s(call)?),
                None => return Err(self.unknown(call, "MigrationBuilder")),
            },
        }
        Ok(())
    }

    /// Apply one chained setter to an operation.
    fn apply(&self, operation: &mut Operation, call: &MethodCall) -> Lowered<()> {
        let old_type = call.name == "old_clr_type" && matches!(operation, Operation::AlterColumn(_));
        self.check_generics(call, old_type)?;
        let name = call.name.as_str();

        let handled = match operation {
            Operation::AddColumn(op) => self.add_column(op, call)?,
            Operation::AlterColumn(op) => {
                self.located(&mut op.schema, Some(&mut op.table), call)?
                    || self.old_clr_type(&mut op.old_column, call)?
                    || self.facet(&mut op.column, name, call)?
                    || match name.strip_prefix("old_") {
                        Some(old) => self.facet(&mut op.old_column, old, call)?,
                        None => false,
                    }
                    || self.annotation("annotation", &mut op.column.annotations, call)?
                    || self.annotation("old_annotation", &mut op.old_column.annotations, call)?
            }
            Operation::DropColumn(op) => {
                self.located(&mut op.schema, Some(&mut op.table), call)?
                    || self.annotation("annotation", &mut op.annotations, call)?
            }
            Operation::RenameColumn(op) => match name {
                "new_name" => {
                    op.new_name = self.s(call)?;
                    true
                }
                _ => self.located(&mut op.schema, Some(&mut op.table), call)?,
            },
            Operation::AddForeignKey(op) => self.foreign_key(op, call)?,
            Operation::AddPrimaryKey(op) => self.primary_key(op, call)?,
            Operation::AddUniqueConstraint(op) => self.unique_constraint(op, call)?,
            Operation::AddCheckConstraint(op) => self.check_constraint(op, call)?,
            Operation::AlterDatabase(op) => match name {
                "collation" => {
                    op.collation = Some(self.s(call)?);
                    true
                }
                "old_collation" => {
                    op.old_collation = Some(self.s(call)?);
                    true
                }
                _ => {
                    self.annotation("annotation", &mut op.annotations, call)?
                        || self.annotation("old_annotation", &mut op.old_annotations, call)?
                }
            },
            Operation::AlterSequence(op) => {
                self.located(&mut op.schema, None, call)?
                    || self.sequence_facet(&mut op.sequence, name, call)?
                    || match name.strip_prefix("old_") {
                        Some(old) => self.sequence_facet(&mut op.old_sequence, old, call)?,
                        None => false,
                    }
                    || self.annotation("annotation", &mut op.sequence.annotations, call)?
                    || self.annotation("old_annotation", &mut op.old_sequence.annotations, call)?
            }
            Operation::AlterTable(op) => match name {
                "comment" => {
                    op.comment = Some(self.s(call)?);
                    true
                }
                "old_comment" => {
                    op.old_comment = Some(self.s(call)?);
                    true
                }
                _ => {
                    self.located(&mut op.schema, None, call)?
                        || self.annotation("annotation", &mut op.annotations, call)?
                        || self.annotation("old_annotation", &mut op.old_annotations, call)?
                }
            },
            Operation::CreateIndex(op) => match name {
                "unique" => {
                    op.unique = self.b(call)?;
                    true
                }
                "filter" => {
                    op.filter = Some(self.s(call)?);
                    true
                }
                _ => {
                    self.located(&mut op.schema, Some(&mut op.table), call)?
                        || self.columns(COLUMN, &mut op.columns, call)?
                        || self.annotation("annotation", &mut op.annotations, call)?
                }
            },
            Operation::CreateTable(op) => match name {
                "columns" => {
                    self.table_columns(op, call)?;
                    true
                }
                "constraints" => {
                    self.table_constraints(op, call)?;
                    true
                }
                "comment" => {
                    op.comment = Some(self.s(call)?);
                    true
                }
                _ => {
                    self.located(&mut op.schema, None, call)?
                        || self.annotation("annotation", &mut op.annotations, call)?
                }
            },
            Operation::CreateSequence(op) => match name {
                "start_value" => {
                    op.start_value = self.i64(call)?;
                    true
                }
                _ => {
                    self.located(&mut op.schema, None, call)?
                        || self.sequence_facet(&mut op.sequence, name, call)?
                        || self.annotation("annotation", &mut op.sequence.annotations, call)?
                }
            },
            Operation::EnsureSchema(_) | Operation::DropSchema(_) => false,
            Operation::DropForeignKey(op) => self.located(&mut op.schema, Some(&mut op.table), call)?,
            Operation::DropIndex(op) => self.located(&mut op.schema, Some(&mut op.table), call)?,
            Operation::DropPrimaryKey(op) => self.located(&mut op.schema, Some(&mut op.table), call)?,
            Operation::DropUniqueConstraint(op) => self.located(&mut op.schema, Some(&mut op.table), call)?,
            Operation::DropCheckConstraint(op) => self.located(&mut op.schema, Some(&mut op.table), call)?,
            Operation::DropSequence(op) => self.located(&mut op.schema, None, call)?,
            Operation::DropTable(op) => {
                self.located(&mut op.schema, None, call)?
                    || self.annotation("annotation", &mut op.annotations, call)?
            }
            Operation::RenameIndex(op) => match name {
                "new_name" => {
                    op.new_name = self.s(call)?;
                    true
                }
                _ => self.located(&mut op.schema, Some(&mut op.table), call)?,
            },
            Operation::RenameSequence(op) => {
                self.renamed(&mut op.new_name, &mut op.new_schema, call)?
                    || self.located(&mut op.schema, None, call)?
            }
            Operation::RenameTable(op) => {
                self.renamed(&mut op.new_name, &mut op.new_schema, call)?
                    || self.located(&mut op.schema, None, call)?
            }
            Operation::RestartSequence(op) => match name {
                "start_value" => {
                    op.start_value = Some(self.i64(call)?);
                    true
                }
                _ => self.located(&mut op.schema, None, call)?,
            },
            Operation::Sql(op) => match name {
                "suppress_transaction" => {
                    op.suppress_transaction = self.b(call)?;
                    true
                }
                _ => false,
            },
            Operation::InsertData(op) => {
                self.located(&mut op.schema, None, call)?
                    || self.columns(COLUMN, &mut op.columns, call)?
                    || self.grid(VALUES, &op.columns, &mut op.values, call)?
            }
            Operation::DeleteData(op) => {
                self.located(&mut op.schema, None, call)?
                    || self.columns(KEY_COLUMN, &mut op.key_columns, call)?
                    || self.grid(KEY_VALUES, &op.key_columns, &mut op.key_values, call)?
            }
            Operation::UpdateData(op) => {
                self.located(&mut op.schema, None, call)?
                    || self.columns(KEY_COLUMN, &mut op.key_columns, call)?
                    || self.grid(KEY_VALUES, &op.key_columns, &mut op.key_values, call)?
                    || self.columns(COLUMN, &mut op.columns, call)?
                    || self.grid(VALUES, &op.columns, &mut op.values, call)?
            }
        };

        if handled {
            Ok(())
        } else {
            Err(self.unknown(call, &format!("OperationBuilder<{}>", operation.kind())))
        }
    }

    fn located(&self, schema: &mut Option<String>, table: Option<&mut String>, call: &MethodCall) -> Lowered<bool> {
        match (call.name.as_str(), table) {
            ("schema", _) => *schema = Some(self.s(call)?),
            ("table", Some(table)) => *table = self.s(call)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn renamed(&self, new_name: &mut Option<String>, new_schema: &mut Option<String>, call: &MethodCall) -> Lowered<bool> {
        match call.name.as_str() {
            "new_name" => *new_name = Some(self.s(call)?),
            "new_schema" => *new_schema = Some(self.s(call)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn columns(&self, [single, plural]: [&str; 2], target: &mut Vec<String>, call: &MethodCall) -> Lowered<bool> {
        if call.name == single {
            *target = vec![self.s(call)?];
        } else if call.name == plural {
            *target = self.strings(self.one(call)?)?;
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    fn grid(
        &self,
        [single, list, rows]: [&str; 3],
        columns: &[String],
        target: &mut Vec<Vec<Value>>,
        call: &MethodCall,
    ) -> Lowered<bool> {
        if call.name == single {
            *target = vec![vec![self.v(call)?]];
        } else if call.name == list {
            *target = builder::shape(columns, self.value_list(self.one(call)?)?);
        } else if call.name == rows {
            *target = self.rows(self.one(call)?)?;
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    fn annotation(&self, method: &str, target: &mut Annotations, call: &MethodCall) -> Lowered<bool> {
        if call.name != method {
            return Ok(false);
        }
        let (name, value) = self.pair(call)?;
        target.set(name, value);
        Ok(true)
    }

    fn old_clr_type(&self, facet: &mut ColumnFacet, call: &MethodCall) -> Lowered<bool> {
        if call.name != "old_clr_type" {
            return Ok(false);
        }
        self.exact(call, 0)?;
        facet.clr_type = self.type_arg(call)?.0;
        Ok(true)
    }

    /// A column facet setter, `name` already stripped of any `old_` prefix.
    fn facet(&self, facet: &mut ColumnFacet, name: &str, call: &MethodCall) -> Lowered<bool> {
        match name {
            "column_type" => facet.column_type = Some(self.s(call)?),
            "nullable" => facet.nullable = self.b(call)?,
            "unicode" => facet.unicode = Some(self.b(call)?),
            "fixed_length" => facet.fixed_length = Some(self.b(call)?),
            "max_length" => facet.max_length = Some(self.i32(call)?),
            "precision" => facet.precision = Some(self.i32(call)?),
            "scale" => facet.scale = Some(self.i32(call)?),
            "row_version" => facet.row_version = self.b(call)?,
            "default_value" => facet.default_value = Some(self.v(call)?),
            "default_value_sql" => facet.default_value_sql = Some(self.s(call)?),
            "computed_column_sql" => facet.computed_column_sql = Some(self.s(call)?),
            "stored" => facet.is_stored = Some(self.b(call)?),
            "comment" => facet.comment = Some(self.s(call)?),
            "collation" => facet.collation = Some(self.s(call)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn sequence_facet(&self, sequence: &mut SequenceFacet, name: &str, call: &MethodCall) -> Lowered<bool> {
        match name {
            "increment_by" => sequence.increment_by = self.i32(call)?,
            "min_value" => sequence.min_value = Some(self.i64(call)?),
            "max_value" => sequence.max_value = Some(self.i64(call)?),
            "cyclic" => sequence.cyclic = self.b(call)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn add_column(&self, op: &mut AddColumn, call: &MethodCall) -> Lowered<bool> {
        Ok(self.located(&mut op.schema, Some(&mut op.table), call)?
            || self.facet(&mut op.column, &call.name, call)?
            || self.annotation("annotation", &mut op.column.annotations, call)?)
    }

    fn foreign_key(&self, op: &mut AddForeignKey, call: &MethodCall) -> Lowered<bool> {
        match call.name.as_str() {
            "principal_schema" => op.principal_schema = Some(self.s(call)?),
            "principal_table" => op.principal_table = self.s(call)?,
            "on_update" => op.on_update = self.action(self.one(call)?)?,
            "on_delete" => op.on_delete = self.action(self.one(call)?)?,
            _ => {
                return Ok(self.located(&mut op.schema, Some(&mut op.table), call)?
                    || self.columns(COLUMN, &mut op.columns, call)?
                    || self.columns(PRINCIPAL_COLUMN, &mut op.principal_columns, call)?
                    || self.annotation("annotation", &mut op.annotations, call)?);
            }
        }
        Ok(true)
    }

    fn primary_key(&self, op: &mut AddPrimaryKey, call: &MethodCall) -> Lowered<bool> {
        Ok(self.located(&mut op.schema, Some(&mut op.table), call)?
            || self.columns(COLUMN, &mut op.columns, call)?
            || self.annotation("annotation", &mut op.annotations, call)?)
    }

    fn unique_constraint(&self, op: &mut AddUniqueConstraint, call: &MethodCall) -> Lowered<bool> {
        Ok(self.located(&mut op.schema, Some(&mut op.table), call)?
            || self.columns(COLUMN, &mut op.columns, call)?
            || self.annotation("annotation", &mut op.annotations, call)?)
    }

    fn check_constraint(&self, op: &mut AddCheckConstraint, call: &MethodCall) -> Lowered<bool> {
        if call.name == "sql" {
            op.sql = self.s(call)?;
            return Ok(true);
        }
        Ok(self.located(&mut op.schema, Some(&mut op.table), call)?
            || self.annotation("annotation", &mut op.annotations, call)?)
    }

    /// Apply every call with `apply`, failing on the first it does not know.
    fn each(
        &self,
        calls: &[MethodCall],
        on: &str,
        mut apply: impl FnMut(&MethodCall) -> Lowered<bool>,
    ) -> Lowered<()> {
        for call in calls {
            self.check_generics(call, false)?;
            if !apply(call)? {
                return Err(self.unknown(call, on));
            }
        }
        Ok(())
    }

    fn table_columns(&self, op: &mut CreateTable, call: &MethodCall) -> Lowered<()> {
        let (param, body) = self.closure(self.one(call)?)?;
        for stmt in &body.stmts {
            let calls = self.chain(stmt, param)?;
            let Some((first, rest)) = calls.split_first() else {
                continue;
            };
            if first.name != "column" {
                return Err(self.unknown(first, "ColumnsBuilder"));
            }
            let (clr_type, nullable) = self.type_arg(first)?;
            let mut facet = ColumnFacet::new(clr_type);
            facet.nullable = nullable;
            let mut column = AddColumn {
                name: self.s(first)?,
                schema: None,
                table: String::new(),
                column: facet,
            };
            self.each(rest, "OperationBuilder<AddColumn>", |call| self.add_column(&mut column, call))?;
            op.columns.push(column);
        }
        Ok(())
    }

    fn table_constraints(&self, op: &mut CreateTable, call: &MethodCall) -> Lowered<()> {
        let (param, body) = self.closure(self.one(call)?)?;
        for stmt in &body.stmts {
            let calls = self.chain(stmt, param)?;
            let Some((first, rest)) = calls.split_first() else {
                continue;
            };
            self.check_generics(first, false)?;
            match first.name.as_str() {
                "primary_key" => {
                    let mut pk = builder::new_primary_key(&self.s(first)?);
                    self.each(rest, "OperationBuilder<AddPrimaryKey>", |call| self.primary_key(&mut pk, call))?;
                    op.primary_key = Some(pk);
                }
                "unique_constraint" => {
                    let mut unique = builder::new_unique_constraint(&self.s(first)?);
                    self.each(rest, "OperationBuilder<AddUniqueConstraint>", |call| {
                        self.unique_constraint(&mut unique, call)
                    })?;
                    op.unique_constraints.push(unique);
                }
                "check_constraint" => {
                    self.exact(first, 2)?;
                    let mut check = builder::new_check_constraint(&self.string(&first.args[0])?);
                    check.sql = self.string(&first.args[1])?;
                    self.each(rest, "OperationBuilder<AddCheckConstraint>", |call| {
                        self.check_constraint(&mut check, call)
                    })?;
                    op.check_constraints.push(check);
                }
                "foreign_key" => {
                    let mut fk = builder::new_foreign_key(&self.s(first)?);
                    self.each(rest, "OperationBuilder<AddForeignKey>", |call| self.foreign_key(&mut fk, call))?;
                    op.foreign_keys.push(fk);
                }
                _ => return Err(self.unknown(first, "ConstraintsBuilder")),
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Models
    // ------------------------------------------------------------------

    fn model(&self, method: &FnDecl, diagnostics: &mut Vec<Diagnostic>) -> Option<Model> {
        let param = match self.builder_param(method, MODEL_BUILDER).and_then(|p| {
            self.no_tail(&method.body)?;
            Ok(p)
        }) {
            Ok(param) => param,
            Err(diagnostic) => {
                diagnostics.push(diagnostic);
                return None;
            }
        };
        if method.body.is_empty() {
            return None;
        }

        let mut model_builder = ModelBuilder::new();
        for stmt in &method.body.stmts {
            if let Err(diagnostic) = self.model_statement(&mut model_builder, &param.name, stmt) {
                diagnostics.push(diagnostic);
            }
        }
        Some(model_builder.build())
    }

    fn model_statement(&self, mb: &mut ModelBuilder, receiver: &str, stmt: &Expr) -> Lowered<()> {
        let mut calls = self.chain(stmt, receiver)?.iter();
        while let Some(call) = calls.next() {
            self.check_generics(call, call.name == "has_sequence")?;
            match call.name.as_str() {
                "annotation" => {
                    let (name, value) = self.pair(call)?;
                    mb.annotation(&name, value);
                }
                "default_schema" => {
                    mb.default_schema(&self.s(call)?);
                }
                "entity" => {
                    self.exact(call, 2)?;
                    let name = self.string(&call.args[0])?;
                    let (param, body) = self.closure(&call.args[1])?;
                    let mut entity = mb.entity_builder(&name);
                    self.entity_body(&mut entity, param, body)?;
                }
                "has_sequence" => {
                    let (clr_type, _) = self.type_arg(call)?;
                    let mut sequence = mb.has_sequence_of(&self.s(call)?, clr_type);
                    for call in calls.by_ref() {
                        self.check_generics(call, false)?;
                        sequence = match call.name.as_str() {
                            "schema" => sequence.schema(&self.s(call)?),
                            "start_value" => sequence.start_value(self.i64(call)?),
                            "increment_by" => sequence.increment_by(self.i32(call)?),
                            "min_value" => sequence.min_value(self.i64(call)?),
                            "max_value" => sequence.max_value(self.i64(call)?),
                            "cyclic" => {
                                self.exact(call, 0)?;
                                sequence.cyclic()
                            }
                            "annotation" => {
                                let (name, value) = self.pair(call)?;
                                sequence.annotation(&name, value)
                            }
                            _ => return Err(self.unknown(call, "SequenceBuilder")),
                        };
                    }
                }
                _ => return Err(self.unknown(call, "ModelBuilder")),
            }
        }
        Ok(())
    }

    fn entity_body(&self, entity: &mut EntityTypeBuilder<'_>, param: &str, body: &Block) -> Lowered<()> {
        self.no_tail(body)?;
        for stmt in &body.stmts {
            let calls = self.chain(stmt, param)?;
            self.entity_statement(entity, calls)?;
        }
        Ok(())
    }

    fn entity_statement(&self, entity: &mut EntityTypeBuilder<'_>, calls: &[MethodCall]) -> Lowered<()> {
        for (i, call) in calls.iter().enumerate() {
            let rest = &calls[i + 1..];
            self.check_generics(call, call.name == "property")?;
            match call.name.as_str() {
                "property" => {
                    let (clr_type, nullable) = self.type_arg(call)?;
                    let name = self.s(call)?;
                    return self.property(entity.property_with_type(&name, clr_type, nullable), rest);
                }
                "has_key" => {
                    let properties = self.strings(self.one(call)?)?;
                    return self.key(entity.has_key(&properties), rest);
                }
                "has_alternate_key" => {
                    let properties = self.strings(self.one(call)?)?;
                    return self.key(entity.has_alternate_key(&properties), rest);
                }
                "has_index" => {
                    let properties = self.strings(self.one(call)?)?;
                    return self.index(entity.has_index(&properties), rest);
                }
                "has_one" => {
                    self.exact(call, 2)?;
                    let principal = self.string(&call.args[0])?;
                    let navigation = self.opt_string(&call.args[1])?;
                    return self.relationship(entity.has_one(&principal, navigation.as_deref()), rest);
                }
                "navigation" => {
                    let name = self.s(call)?;
                    return self.navigation(entity.navigation(&name), rest);
                }
                "has_base_type" => {
                    entity.has_base_type(&self.s(call)?);
                }
                "to_table" => {
                    entity.to_table(&self.s(call)?);
                }
                "to_schema" => {
                    entity.to_schema(&self.s(call)?);
                }
                "comment" => {
                    entity.comment(&self.s(call)?);
                }
                "annotation" => {
                    let (name, value) = self.pair(call)?;
                    entity.annotation(&name, value);
                }
                "has_check_constraint" => {
                    self.exact(call, 2)?;
                    let name = self.string(&call.args[0])?;
                    let sql = self.string(&call.args[1])?;
                    entity.has_check_constraint(&name, &sql);
                }
                "has_data" => {
                    let rows = self.seed_rows(self.one(call)?)?;
                    entity.has_data(rows);
                }
                "with_owner" => {
                    let properties = self.strings(self.one(call)?)?;
                    entity.with_owner(&properties);
                }
                "owns_one" | "owns_many" => {
                    self.exact(call, 3)?;
                    let type_name = self.string(&call.args[0])?;
                    let navigation = self.string(&call.args[1])?;
                    let (param, body) = self.closure(&call.args[2])?;
                    let mut result: Lowered<()> = Ok(());
                    if call.name == "owns_one" {
                        entity.owns_one(&type_name, &navigation, |owned| {
                            result = self.entity_body(owned, param, body)
                        });
                    } else {
                        entity.owns_many(&type_name, &navigation, |owned| {
                            result = self.entity_body(owned, param, body)
                        });
                    }
                    result?;
                }
                _ => return Err(self.unknown(call, "EntityTypeBuilder")),
            }
        }
        Ok(())
    }

    fn property(&self, mut property: PropertyBuilder<'_>, calls: &[MethodCall]) -> Lowered<()> {
        for call in calls {
            self.check_generics(call, false)?;
            property = match call.name.as_str() {
                "is_required" => {
                    self.exact(call, 0)?;
                    property.is_required()
                }
                "value_generated_on_add" => {
                    self.exact(call, 0)?;
                    property.value_generated_on_add()
                }
                "value_generated_on_add_or_update" => {
                    self.exact(call, 0)?;
                    property.value_generated_on_add_or_update()
                }
                "concurrency_token" => {
                    self.exact(call, 0)?;
                    property.concurrency_token()
                }
                "column_name" => property.column_name(&self.s(call)?),
                "column_type" => property.column_type(&self.s(call)?),
                "max_length" => property.max_length(self.i32(call)?),
                "unicode" => property.unicode(self.b(call)?),
                "fixed_length" => property.fixed_length(self.b(call)?),
                "precision" => property.precision(self.i32(call)?),
                "scale" => property.scale(self.i32(call)?),
                "default_value" => property.default_value(self.v(call)?),
                "default_value_sql" => property.default_value_sql(&self.s(call)?),
                "computed_column_sql" => property.computed_column_sql(&self.s(call)?),
                "stored" => property.stored(self.b(call)?),
                "comment" => property.comment(&self.s(call)?),
                "collation" => property.collation(&self.s(call)?),
                "annotation" => {
                    let (name, value) = self.pair(call)?;
                    property.annotation(&name, value)
                }
                _ => return Err(self.unknown(call, "PropertyBuilder")),
            };
        }
        Ok(())
    }

    fn key(&self, mut key: KeyBuilder<'_>, calls: &[MethodCall]) -> Lowered<()> {
        for call in calls {
            self.check_generics(call, false)?;
            key = match call.name.as_str() {
                "database_name" => key.database_name(&self.s(call)?),
                "annotation" => {
                    let (name, value) = self.pair(call)?;
                    key.annotation(&name, value)
                }
                _ => return Err(self.unknown(call, "KeyBuilder")),
            };
        }
        Ok(())
    }

    fn index(&self, mut index: IndexBuilder<'_>, calls: &[MethodCall]) -> Lowered<()> {
        for call in calls {
            self.check_generics(call, false)?;
            index = match call.name.as_str() {
                "is_unique" => {
                    self.exact(call, 0)?;
                    index.is_unique()
                }
                "database_name" => index.database_name(&self.s(call)?),
                "filter" => index.filter(&self.s(call)?),
                "annotation" => {
                    let (name, value) = self.pair(call)?;
                    index.annotation(&name, value)
                }
                _ => return Err(self.unknown(call, "IndexBuilder")),
            };
        }
        Ok(())
    }

    fn relationship(&self, mut relationship: RelationshipBuilder<'_>, calls: &[MethodCall]) -> Lowered<()> {
        for call in calls {
            self.check_generics(call, false)?;
            relationship = match call.name.as_str() {
                "with_many" => {
                    let navigation = self.opt_string(self.one(call)?)?;
                    relationship.with_many(navigation.as_deref())
                }
                "with_one" => {
                    let navigation = self.opt_string(self.one(call)?)?;
                    relationship.with_one(navigation.as_deref())
                }
                "has_foreign_key" => {
                    let properties = self.strings(self.one(call)?)?;
                    relationship.has_foreign_key(&properties)
                }
                "has_principal_key" => {
                    let properties = self.strings(self.one(call)?)?;
                    relationship.has_principal_key(&properties)
                }
                "on_delete" => {
                    let action = self.action(self.one(call)?)?;
                    relationship.on_delete(action)
                }
                "is_required" => {
                    self.exact(call, 0)?;
                    relationship.is_required()
                }
                "constraint_name" => relationship.constraint_name(&self.s(call)?),
                "annotation" => {
                    let (name, value) = self.pair(call)?;
                    relationship.annotation(&name, value)
                }
                _ => return Err(self.unknown(call, "RelationshipBuilder")),
            };
        }
        Ok(())
    }

    fn navigation(&self, mut navigation: NavigationBuilder<'_>, calls: &[MethodCall]) -> Lowered<()> {
        for call in calls {
            self.check_generics(call, false)?;
            navigation = match call.name.as_str() {
                "annotation" => {
                    let (name, value) = self.pair(call)?;
                    navigation.annotation(&name, value)
                }
                _ => return Err(self.unknown(call, "NavigationBuilder")),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse_source;
    use crate::modules;
    use pretty_assertions::assert_eq;

    fn lower(sources: &[(&str, &str)]) -> (Vec<TypeImage>, Vec<Diagnostic>) {
        let files: Vec<SourceFile> = sources
            .iter()
            .map(|(name, text)| parse_source(name, text).unwrap())
            .collect();
        lower_unit(&files, &modules::loaded_modules())
    }

    fn ids_of(diagnostics: &[Diagnostic]) -> Vec<&str> {
        diagnostics.iter().map(|d| d.id.as_str()).collect()
    }

    const METADATA: &str = r#"
        use kiln_migrate::MigrationMetadata;

        impl MigrationMetadata for Seed {
            fn id(&self) -> &str {
                "20240101120000_Seed"
            }
        }
    "#;

    #[test]
    fn test_create_table_and_data() {
        let migration = r#"
            use kiln_migrate::{Migration, MigrationBuilder, rows};
            use kiln_model::{ReferentialAction, Value};

            pub struct Seed;

            #[rustfmt::skip]
            impl Migration for Seed {
                fn up(&self, migration_builder: &mut MigrationBuilder) {
                    migration_builder
                        .create_table("Posts")
                        .schema("blog")
                        .columns(|table| {
                            table.column::<i32>("Id").nullable(false);
                            table.column::<Option<String>>("Title").max_length(200);
                        })
                        .constraints(|table| {
                            table.primary_key("PK_Posts").column("Id");
                            table.foreign_key("FK_Posts_Blogs").column("Id").principal_table("Blogs").principal_column("Id").on_delete(ReferentialAction::Cascade);
                        });

                    migration_builder
                        .insert_data("Posts")
                        .schema("blog")
                        .columns(&["Id", "Title"])
                        .rows(rows![
                            [1, "First"],
                            [2, Value::Null],
                        ]);
                }
            }
        "#;
        let (types, diagnostics) = lower(&[("Seed.rs", migration), ("Seed.Designer.rs", METADATA)]);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].kind, ImageKind::Migration);
        assert_eq!(types[0].migration_id.as_deref(), Some("20240101120000_Seed"));

        let Operation::CreateTable(table) = &types[0].up[0] else {
            panic!("Expected CreateTable");
        };
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.columns[1].schema.as_deref(), Some("blog"));
        assert!(table.columns[1].column.nullable);
        assert_eq!(table.columns[1].column.max_length, Some(200));
        assert_eq!(table.primary_key.as_ref().unwrap().table, "Posts");
        assert_eq!(table.foreign_keys[0].on_delete, ReferentialAction::Cascade);

        let Operation::InsertData(data) = &types[0].up[1] else {
            panic!("Expected InsertData");
        };
        assert_eq!(
            data.values,
            vec![
                vec![Value::Int(1), Value::Text("First".into())],
                vec![Value::Int(2), Value::Null],
            ]
        );
    }

    #[test]
    fn test_model_lowering() {
        let snapshot = r#"
            use kiln_migrate::ModelSnapshot;
            use kiln_model::{ModelBuilder, ReferentialAction, seed};

            pub struct BlogContextModelSnapshot;

            impl ModelSnapshot for BlogContextModelSnapshot {
                fn model_owner(&self) -> Option<&str> {
                    Some("blog::BlogContext")
                }

                fn build_model(&self, model_builder: &mut ModelBuilder) {
                    model_builder
                        .default_schema("blog");

                    model_builder.has_sequence::<i64>("OrderNumbers")
                        .start_value(1000);

                    model_builder.entity("Blog", |b| {
                        b.property::<i32>("Id")
                            .value_generated_on_add();
                        b.property::<Option<String>>("Name");

                        b.has_key(&["Id"]);

                        b.to_table("Blogs");

                        b.has_data([
                            seed! { "Id" => 1, "Name" => "First" },
                        ]);
                    });

                    model_builder.entity("Post", |b| {
                        b.property::<i32>("Id");
                        b.property::<i32>("BlogId");
                        b.has_key(&["Id"]);
                        b.owns_one("Address", "Address", |b1| {
                            b1.property::<String>("City");
                        });
                        b.has_one("Blog", Some("Blog"))
                            .with_many(Some("Posts"))
                            .has_foreign_key(&["BlogId"])
                            .on_delete(ReferentialAction::Cascade)
                            .is_required();
                    });
                }
            }
        "#;
        let (types, diagnostics) = lower(&[("BlogContextModelSnapshot.rs", snapshot)]);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        let image = &types[0];
        assert_eq!(image.kind, ImageKind::ModelSnapshot);
        assert_eq!(image.model_owner.as_deref(), Some("blog::BlogContext"));

        let model = image.model.as_ref().unwrap();
        assert_eq!(model.sequences[0].start_value, 1000);
        let blog = model.entity("Blog").unwrap();
        assert_eq!(blog.seed_data.len(), 1);
        let post = model.entity("Post").unwrap();
        assert_eq!(post.foreign_keys[0].delete_behavior, ReferentialAction::Cascade);
        assert!(post.foreign_keys[0].required);
        assert!(model.owned_types_of("Post").next().is_some());
    }

    #[test]
    fn test_unresolved_import_and_unused_import() {
        let source = r#"
            use kiln_migrate::{Migration, MigrationBuilder, rows};
            use serde_json::Value;

            pub struct Seed;

            impl Migration for Seed {
                fn up(&self, _migration_builder: &mut MigrationBuilder) {}
            }
        "#;
        let (_, diagnostics) = lower(&[("Seed.rs", source), ("Seed.Designer.rs", METADATA)]);
        assert_eq!(ids_of(&diagnostics), vec![ids::UNRESOLVED_IMPORT, ids::UNUSED_IMPORT]);
        assert!(diagnostics[0].is_error());
        assert!(diagnostics[1].message.contains("kiln_migrate::rows"));
    }

    #[test]
    fn test_unknown_method() {
        let source = r#"
            use kiln_migrate::{Migration, MigrationBuilder};

            pub struct Seed;

            impl Migration for Seed {
                fn up(&self, migration_builder: &mut MigrationBuilder) {
                    migration_builder.drop_table("Blogs").table("Blogs");
                    migration_builder.frobnicate("Blogs");
                }
            }
        "#;
        let (_, diagnostics) = lower(&[("Seed.rs", source), ("Seed.Designer.rs", METADATA)]);
        assert_eq!(ids_of(&diagnostics), vec![ids::UNKNOWN_METHOD, ids::UNKNOWN_METHOD]);
        assert!(diagnostics[0].message.contains("OperationBuilder<DropTable>"));
        assert_eq!(diagnostics[1].line, 9);
    }

    #[test]
    fn test_migration_requires_metadata() {
        let source = r#"
            use kiln_migrate::{Migration, MigrationBuilder};

            pub struct Seed;

            impl Migration for Seed {
                fn up(&self, _migration_builder: &mut MigrationBuilder) {}
            }
        "#;
        let (types, diagnostics) = lower(&[("Seed.rs", source)]);
        assert!(types.is_empty());
        assert_eq!(ids_of(&diagnostics), vec![ids::MISSING_TRAIT_ITEM]);
    }

    #[test]
    fn test_impl_for_undeclared_type() {
        let (types, diagnostics) = lower(&[("Seed.Designer.rs", METADATA)]);
        assert!(types.is_empty());
        assert_eq!(ids_of(&diagnostics), vec![ids::UNRESOLVED_PATH]);
        assert!(diagnostics[0].message.contains("`Seed`"));
    }

    #[test]
    fn test_argument_checks() {
        let source = r#"
            use kiln_migrate::{Migration, MigrationBuilder};

            pub struct Seed;

            impl Migration for Seed {
                fn up(&self, migration_builder: &mut MigrationBuilder) {
                    migration_builder.add_column::<String>("Note").table("Blogs").max_length(5000000000);
                    migration_builder.add_column("Note").table("Blogs");
                    migration_builder.add_column::<Widget>("Note").table("Blogs");
                }
            }
        "#;
        let (_, diagnostics) = lower(&[("Seed.rs", source), ("Seed.Designer.rs", METADATA)]);
        assert_eq!(
            ids_of(&diagnostics),
            vec![ids::INVALID_ARGUMENT, ids::INVALID_ARGUMENT, ids::UNRESOLVED_PATH]
        );
        assert!(diagnostics[0].message.contains("out of range"));
    }

    #[test]
    fn test_namespaces_follow_modules() {
        let source = r#"
            pub mod blog {
                pub mod migrations {
                    use kiln_migrate::{Migration, MigrationBuilder};

                    pub struct Seed;

                    impl Migration for Seed {
                        fn up(&self, migration_builder: &mut MigrationBuilder) {
                            migration_builder.ensure_schema("blog");
                        }
                    }
                }
            }
        "#;
        let metadata = r#"
            pub mod blog {
                pub mod migrations {
                    use kiln_migrate::MigrationMetadata;

                    impl MigrationMetadata for Seed {
                        fn id(&self) -> &str {
                            "20240101120000_Seed"
                        }
                    }
                }
            }
        "#;
        let (types, diagnostics) = lower(&[("Seed.rs", source), ("Seed.Designer.rs", metadata)]);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(types[0].namespace, "blog::migrations");
        assert_eq!(types[0].up.len(), 1);
    }
}
