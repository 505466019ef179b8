//! Rendering of a whole [`Model`] as `model_builder` calls.
//!
//! Output runs in three passes over the non-owned entity types in
//! hierarchical order:
//!
//! 1. entity declarations: properties, keys, indexes, annotations and data
//! 2. owned types and relationships, for types that have either
//! 3. navigations not already declared by a relationship or ownership

use kiln_model::{
    Annotations, EntityType, ForeignKey, Model, ReferentialAction, SeedRow, ValueGenerated,
};

use super::annotation::{AnnotationCodeGenerator, AnnotationTarget};
use super::indented::IndentedStringBuilder;
use super::literal::{self, Imports};
use crate::snapshot_processor::is_runtime_only;

/// Writes model-builder code for a model.
pub struct SnapshotWriter<'g> {
    annotations: &'g dyn AnnotationCodeGenerator,
}

/// One statement: a head followed by chained calls.
fn statement(b: &mut IndentedStringBuilder, head: &str, calls: &[String]) {
    match calls {
        [] => {
            b.append_line(&format!("{};", head));
        }
        _ => {
            b.append_line(head);
            b.indent();
            let last = calls.len() - 1;
            for (i, call) in calls.iter().enumerate() {
                b.append_line(&format!(".{}{}", call, if i == last { ";" } else { "" }));
            }
            b.dedent();
        }
    }
}

fn closure_var(depth: usize) -> String {
    if depth == 0 {
        "b".to_string()
    } else {
        format!("b{}", depth)
    }
}

/// Writes sections separated by blank lines, skipping empty ones.
struct Sections<'b> {
    b: &'b mut IndentedStringBuilder,
    started: bool,
    open: bool,
}

impl<'b> Sections<'b> {
    fn new(b: &'b mut IndentedStringBuilder) -> Self {
        Self {
            b,
            started: false,
            open: false,
        }
    }

    /// Start a new section.
    fn next(&mut self) {
        self.open = false;
    }

    fn out(&mut self) -> &mut IndentedStringBuilder {
        if !self.open {
            if self.started {
                self.b.blank_line();
            }
            self.started = true;
            self.open = true;
        }
        self.b
    }
}

impl<'g> SnapshotWriter<'g> {
    pub fn new(annotations: &'g dyn AnnotationCodeGenerator) -> Self {
        Self { annotations }
    }

    fn annotation_calls(
        &self,
        target: AnnotationTarget,
        annotations: &Annotations,
        imports: &mut Imports,
    ) -> Vec<String> {
        annotations
            .iter()
            .filter(|(name, _)| !is_runtime_only(name))
            .map(|(name, value)| self.annotations.call(target, name, value, imports))
            .collect()
    }

    /// Write the statements that rebuild `model` on `receiver`.
    pub fn write(&self, receiver: &str, model: &Model, b: &mut IndentedStringBuilder, imports: &mut Imports) {
        let mut sections = Sections::new(b);

        let model_calls = self.annotation_calls(AnnotationTarget::Model, &model.annotations, imports);
        if !model_calls.is_empty() {
            statement(sections.out(), receiver, &model_calls);
        }

        sections.next();
        for sequence in &model.sequences {
            let mut calls = Vec::new();
            if let Some(schema) = &sequence.schema {
                calls.push(format!("schema({})", literal::string(schema)));
            }
            if sequence.start_value != 1 {
                calls.push(format!("start_value({})", literal::int(sequence.start_value)));
            }
            if sequence.increment_by != 1 {
                calls.push(format!("increment_by({})", sequence.increment_by));
            }
            if let Some(min) = sequence.min_value {
                calls.push(format!("min_value({})", literal::int(min)));
            }
            if let Some(max) = sequence.max_value {
                calls.push(format!("max_value({})", literal::int(max)));
            }
            if sequence.cyclic {
                calls.push("cyclic()".to_string());
            }
            calls.extend(self.annotation_calls(AnnotationTarget::Sequence, &sequence.annotations, imports));
            let head = format!(
                "{}.has_sequence::<{}>({})",
                receiver,
                sequence.clr_type.rust_type(),
                literal::string(&sequence.name)
            );
            statement(sections.out(), &head, &calls);
        }

        let entities: Vec<&EntityType> = model
            .entity_types_in_hierarchical_order()
            .into_iter()
            .filter(|e| !e.is_owned())
            .collect();

        for entity in &entities {
            sections.next();
            let header = format!("{}.entity({}, |b|", receiver, literal::string(&entity.name));
            sections.out().block_closed(&header, "});", |b| {
                self.declaration(entity, "b", b, imports);
            });
        }

        for entity in &entities {
            let has_owned = model.owned_types_of(&entity.name).next().is_some();
            if entity.foreign_keys.is_empty() && !has_owned {
                continue;
            }
            sections.next();
            let header = format!("{}.entity({}, |b|", receiver, literal::string(&entity.name));
            sections.out().block_closed(&header, "});", |b| {
                self.relationships(model, entity, 0, b, imports);
            });
        }

        for entity in &entities {
            let navigations = self.navigation_statements(model, entity, "b", imports);
            if navigations.is_empty() {
                continue;
            }
            sections.next();
            let header = format!("{}.entity({}, |b|", receiver, literal::string(&entity.name));
            sections.out().block_closed(&header, "});", |b| {
                for (head, calls) in &navigations {
                    statement(b, head, calls);
                }
            });
        }
    }

    /// Properties, keys, indexes, annotations, check constraints and data.
    fn declaration(&self, entity: &EntityType, var: &str, b: &mut IndentedStringBuilder, imports: &mut Imports) {
        let mut sections = Sections::new(b);

        if let Some(base) = &entity.base_type {
            let line = format!("{}.has_base_type({});", var, literal::string(base));
            sections.out().append_line(&line);
        }

        sections.next();
        for property in &entity.properties {
            let mut calls = Vec::new();
            match property.value_generated {
                ValueGenerated::Never => {}
                ValueGenerated::OnAdd => calls.push("value_generated_on_add()".to_string()),
                ValueGenerated::OnAddOrUpdate => {
                    calls.push("value_generated_on_add_or_update()".to_string())
                }
            }
            if property.concurrency_token {
                calls.push("concurrency_token()".to_string());
            }
            calls.extend(self.annotation_calls(AnnotationTarget::Property, &property.annotations, imports));
            let head = format!(
                "{}.property::<{}>({})",
                var,
                literal::clr_type(property.clr_type, property.nullable),
                literal::string(&property.name)
            );
            statement(sections.out(), &head, &calls);
        }

        sections.next();
        if let Some(key) = &entity.primary_key {
            let calls = self.annotation_calls(AnnotationTarget::Key, &key.annotations, imports);
            let head = format!("{}.has_key({})", var, literal::string_slice(&key.properties));
            statement(sections.out(), &head, &calls);
        }
        for key in &entity.alternate_keys {
            let calls = self.annotation_calls(AnnotationTarget::Key, &key.annotations, imports);
            let head = format!("{}.has_alternate_key({})", var, literal::string_slice(&key.properties));
            statement(sections.out(), &head, &calls);
        }
        for index in &entity.indexes {
            let mut calls = Vec::new();
            if index.unique {
                calls.push("is_unique()".to_string());
            }
            calls.extend(self.annotation_calls(AnnotationTarget::Index, &index.annotations, imports));
            let head = format!("{}.has_index({})", var, literal::string_slice(&index.properties));
            statement(sections.out(), &head, &calls);
        }

        sections.next();
        for call in self.annotation_calls(AnnotationTarget::Entity, &entity.annotations, imports) {
            sections.out().append_line(&format!("{}.{};", var, call));
        }
        for check in &entity.check_constraints {
            let line = format!(
                "{}.has_check_constraint({}, {});",
                var,
                literal::string(&check.name),
                literal::string(&check.sql)
            );
            sections.out().append_line(&line);
        }

        sections.next();
        if !entity.seed_data.is_empty() {
            imports.add("kiln_model::seed");
            let out = sections.out();
            out.append_line(&format!("{}.has_data([", var));
            out.indent();
            for row in &entity.seed_data {
                out.append_line(&format!("{},", seed_row(row, imports)));
            }
            out.dedent();
            out.append_line("]);");
        }
    }

    /// Owned types and foreign keys of `entity`.
    fn relationships(
        &self,
        model: &Model,
        entity: &EntityType,
        depth: usize,
        b: &mut IndentedStringBuilder,
        imports: &mut Imports,
    ) {
        let var = closure_var(depth);
        let mut sections = Sections::new(b);

        for owned in model.owned_types_of(&entity.name) {
            let Some(ownership) = &owned.ownership else {
                continue;
            };
            sections.next();
            let inner = closure_var(depth + 1);
            let method = if ownership.collection { "owns_many" } else { "owns_one" };
            let header = format!(
                "{}.{}({}, {}, |{}|",
                var,
                method,
                literal::string(owned.short_name()),
                literal::string(&ownership.navigation),
                inner
            );
            let out = sections.out();
            out.block_closed(&header, "});", |b| {
                self.declaration(owned, &inner, b, imports);
                if !ownership.foreign_key.is_empty() {
                    b.blank_line();
                    b.append_line(&format!(
                        "{}.with_owner({});",
                        inner,
                        literal::string_slice(&ownership.foreign_key)
                    ));
                }
                let nested = model.owned_types_of(&owned.name).next().is_some();
                if nested || !owned.foreign_keys.is_empty() {
                    b.blank_line();
                    self.relationships(model, owned, depth + 1, b, imports);
                }
                let navigations = self.navigation_statements(model, owned, &inner, imports);
                if !navigations.is_empty() {
                    b.blank_line();
                    for (head, calls) in &navigations {
                        statement(b, head, calls);
                    }
                }
            });
        }

        for fk in &entity.foreign_keys {
            sections.next();
            let (head, calls) = self.foreign_key(fk, &var, imports);
            statement(sections.out(), &head, &calls);
        }
    }

    fn foreign_key(&self, fk: &ForeignKey, var: &str, imports: &mut Imports) -> (String, Vec<String>) {
        let head = format!(
            "{}.has_one({}, {})",
            var,
            literal::string(&fk.principal_entity),
            literal::optional_string(fk.dependent_navigation.as_deref())
        );
        let mut calls = Vec::new();
        let inverse = if fk.unique { "with_one" } else { "with_many" };
        calls.push(format!(
            "{}({})",
            inverse,
            literal::optional_string(fk.principal_navigation.as_deref())
        ));
        calls.push(format!("has_foreign_key({})", literal::string_slice(&fk.properties)));
        if !fk.principal_key.is_empty() {
            calls.push(format!("has_principal_key({})", literal::string_slice(&fk.principal_key)));
        }
        if fk.delete_behavior != ReferentialAction::NoAction {
            calls.push(format!(
                "on_delete({})",
                literal::referential_action(fk.delete_behavior, imports)
            ));
        }
        if fk.required {
            calls.push("is_required()".to_string());
        }
        calls.extend(self.annotation_calls(AnnotationTarget::ForeignKey, &fk.annotations, imports));
        (head, calls)
    }

    /// Navigations that carry annotations or that no relationship or
    /// ownership declares.
    fn navigation_statements(
        &self,
        model: &Model,
        entity: &EntityType,
        var: &str,
        imports: &mut Imports,
    ) -> Vec<(String, Vec<String>)> {
        entity
            .navigations
            .iter()
            .filter(|nav| !nav.annotations.is_empty() || !is_declared_navigation(model, entity, &nav.name))
            .map(|nav| {
                let head = format!("{}.navigation({})", var, literal::string(&nav.name));
                let calls = self.annotation_calls(AnnotationTarget::Navigation, &nav.annotations, imports);
                (head, calls)
            })
            .collect()
    }
}

/// Whether a relationship or ownership already declares the navigation.
fn is_declared_navigation(model: &Model, entity: &EntityType, name: &str) -> bool {
    let dependent_side = entity
        .foreign_keys
        .iter()
        .any(|fk| fk.dependent_navigation.as_deref() == Some(name));
    let principal_side = model.entity_types.iter().any(|other| {
        other.foreign_keys.iter().any(|fk| {
            fk.principal_entity == entity.name && fk.principal_navigation.as_deref() == Some(name)
        })
    });
    let ownership = model
        .owned_types_of(&entity.name)
        .any(|owned| owned.ownership.as_ref().is_some_and(|o| o.navigation == name));
    dependent_side || principal_side || ownership
}

/// `seed! { "A" => 1, "B" => "x" }` with nulls left out.
fn seed_row(row: &SeedRow, imports: &mut Imports) -> String {
    let pairs: Vec<String> = row
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| format!("{} => {}", literal::string(name), literal::value(value, imports)))
        .collect();
    if pairs.is_empty() {
        "seed! {}".to_string()
    } else {
        format!("seed! {{ {} }}", pairs.join(", "))
    }
}
