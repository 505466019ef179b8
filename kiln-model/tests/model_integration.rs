//! Integration tests for building, projecting and configuring models.

use kiln_model::{
    ClrType, KilnConfig, ModelBuilder, ReferentialAction, RelationalModel, annotation_names, seed,
};
use pretty_assertions::assert_eq;

fn store_model() -> kiln_model::Model {
    let mut mb = ModelBuilder::new();
    mb.annotation(annotation_names::PRODUCT_VERSION, "0.1.0");
    mb.entity("Customer", |b| {
        b.property::<i32>("Id").value_generated_on_add();
        b.property::<String>("Email").max_length(320);
        b.property::<kiln_model::types::Uuid>("ExternalId");
        b.has_key(&["Id"]);
        b.has_alternate_key(&["ExternalId"]);
        b.has_index(&["Email"]).is_unique();
        b.to_table("Customers");
        b.owns_one("Address", "Billing", |b1| {
            b1.property::<i32>("CustomerId");
            b1.property::<Option<String>>("City");
            b1.with_owner(&["CustomerId"]);
        });
        b.has_data([seed! { "Id" => 1, "Email" => "a@example.com" }]);
    });
    mb.entity("Order", |b| {
        b.property::<i64>("Id");
        b.property::<i32>("CustomerId");
        b.property::<kiln_model::types::Decimal>("Total").precision(12).scale(2);
        b.has_key(&["Id"]);
        b.has_one("Customer", Some("Customer"))
            .with_many(Some("Orders"))
            .has_foreign_key(&["CustomerId"])
            .on_delete(ReferentialAction::Restrict)
            .is_required();
        b.has_check_constraint("CK_Orders_Total", "\"Total\" >= 0");
        b.to_table("Orders");
    });
    mb.build()
}

#[test]
fn test_projection_of_store_model() {
    let rel = RelationalModel::from_model(&store_model()).unwrap();

    let customers = rel.table(None, "Customers").unwrap();
    let columns: Vec<&str> = customers.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(columns, vec!["Id", "Email", "ExternalId", "Billing_City"]);
    assert_eq!(customers.unique_constraints[0].name, "AK_Customers_ExternalId");
    assert_eq!(customers.indexes[0].name, "IX_Customers_Email");
    assert!(customers.indexes[0].unique);
    assert_eq!(customers.column("ExternalId").unwrap().store_type, "uuid");
    assert_eq!(customers.seed_data.len(), 1);

    let orders = rel.table(None, "Orders").unwrap();
    assert_eq!(orders.column("Total").unwrap().store_type, "numeric(12,2)");
    assert_eq!(orders.foreign_keys[0].on_delete, ReferentialAction::Restrict);
    assert_eq!(orders.check_constraints[0].name, "CK_Orders_Total");
    assert_eq!(orders.column("Id").unwrap().clr_type, ClrType::I64);
}

#[test]
fn test_projection_is_deterministic() {
    let a = RelationalModel::from_model(&store_model()).unwrap();
    let b = RelationalModel::from_model(&store_model()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_model_serializes() {
    let model = store_model();
    let json = serde_json::to_string(&model).unwrap();
    let back: kiln_model::Model = serde_json::from_str(&json).unwrap();
    assert_eq!(back, model);
}

#[test]
fn test_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kiln.toml");
    std::fs::write(
        &path,
        r#"
[database]
provider = "postgresql"
url = "postgres://localhost/store"

[migrations]
root_namespace = "store"
sub_namespace = "db::migrations"
persist = true

[compiler]
suppressed_diagnostics = ["unused_import"]
"#,
    )
    .unwrap();

    let config = KilnConfig::from_file(&path).unwrap();
    assert_eq!(config.migrations.sub_namespace.as_deref(), Some("db::migrations"));
    assert!(config.migrations.persist);
    assert_eq!(config.compiler.suppressed_diagnostics, vec!["unused_import"]);
    assert_eq!(config.database.provider.as_str(), "postgresql");
}

#[test]
fn test_config_missing_file() {
    let err = KilnConfig::from_file("/definitely/not/here/kiln.toml").unwrap_err();
    assert!(matches!(err, kiln_model::ModelError::IoError { .. }));
}
