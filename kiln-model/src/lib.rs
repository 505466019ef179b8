//! # kiln-model
//!
//! The metadata graph consumed by the Kiln migration pipeline.
//!
//! This crate provides:
//! - [`Model`] and its parts: entity types, properties, keys, indexes,
//!   relationships, ownership, sequences and seed data
//! - [`ModelBuilder`], the fluent API used by applications and by generated
//!   snapshot code
//! - [`RelationalModel`], the table-shaped projection that migrations are
//!   diffed over
//! - [`KilnConfig`], the `kiln.toml` configuration layer
//!
//! ## Example
//!
//! ```rust
//! use kiln_model::{ModelBuilder, RelationalModel};
//!
//! let mut model_builder = ModelBuilder::new();
//! model_builder.entity("Blog", |b| {
//!     b.property::<i32>("Id");
//!     b.property::<Option<String>>("Note");
//!     b.has_key(&["Id"]);
//!     b.to_table("Blogs");
//! });
//!
//! let relational = RelationalModel::from_model(&model_builder.build()).unwrap();
//! assert!(relational.table(None, "Blogs").is_some());
//! ```

pub mod annotations;
pub mod builder;
pub mod config;
pub mod error;
pub mod model;
pub mod relational;
pub mod value;

pub use annotations::{Annotations, names as annotation_names};
pub use builder::{
    EntityTypeBuilder, IndexBuilder, KeyBuilder, ModelBuilder, NavigationBuilder, PropertyBuilder,
    RelationshipBuilder, SequenceBuilder,
};
pub use config::{DatabaseProvider, KilnConfig};
pub use error::{ModelError, ModelResult};
pub use model::{
    CheckConstraint, EntityType, ForeignKey, Index, Key, Model, Navigation, Ownership, Property,
    SeedRow, Sequence, ValueGenerated,
};
pub use relational::{
    Column, ForeignKeyConstraint, PrimaryKeyConstraint, RelationalModel, Table, TableIndex,
    UniqueConstraint,
};
pub use smol_str::SmolStr;
pub use value::{ClrType, ClrTyped, ReferentialAction, Value, types};

/// Build a [`SeedRow`] from `"Property" => value` pairs.
///
/// ```rust
/// let row = kiln_model::seed! { "Id" => 1, "Name" => "First" };
/// assert_eq!(row.len(), 2);
/// ```
#[macro_export]
macro_rules! seed {
    ($($key:literal => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut row = $crate::SeedRow::new();
        $(row.insert($crate::SmolStr::new($key), $crate::Value::from($value));)*
        row
    }};
}
