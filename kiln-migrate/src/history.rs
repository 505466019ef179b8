//! Migration history tracking.

use chrono::{DateTime, Utc};
use kiln_model::KilnConfig;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{MigrateResult, MigrationError};
use crate::sql::{literal, quote};

/// Default name of the history table.
pub const DEFAULT_HISTORY_TABLE: &str = "__kiln_migrations_history";

/// A record of an applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Migration id.
    pub migration_id: String,
    /// Version of the pipeline that applied it.
    pub product_version: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
    /// Duration of the migration in milliseconds.
    pub duration_ms: i64,
}

impl MigrationRecord {
    /// A record stamped with the running version and the current time.
    pub fn new(migration_id: impl Into<String>, duration_ms: i64) -> Self {
        Self {
            migration_id: migration_id.into(),
            product_version: env!("CARGO_PKG_VERSION").to_string(),
            applied_at: Utc::now(),
            duration_ms,
        }
    }
}

/// Tracks which migrations have been applied to a database.
#[async_trait::async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Name of the history table.
    fn table_name(&self) -> &str;

    /// Check whether the history table exists.
    fn exists(&self) -> MigrateResult<bool>;

    /// Applied migrations, in id order.
    fn get_applied_migrations(&self) -> MigrateResult<Vec<MigrationRecord>>;

    /// Record a migration as applied.
    fn record_applied(&self, record: MigrationRecord) -> MigrateResult<()>;

    /// Remove the record of a reverted migration.
    fn record_reverted(&self, migration_id: &str) -> MigrateResult<()>;

    /// Applied migrations, honouring cancellation.
    async fn get_applied_migrations_async(
        &self,
        cancellation: &CancellationToken,
    ) -> MigrateResult<Vec<MigrationRecord>> {
        if cancellation.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }
        self.get_applied_migrations()
    }

    /// SQL that creates the history table (PostgreSQL).
    fn create_script(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \"MigrationId\" character varying(150) NOT NULL,\n    \"ProductVersion\" character varying(32) NOT NULL,\n    CONSTRAINT {} PRIMARY KEY (\"MigrationId\")\n);",
            quote(self.table_name()),
            quote(&format!("PK_{}", self.table_name()))
        )
    }

    /// SQL that records a migration.
    fn insert_script(&self, record: &MigrationRecord) -> String {
        format!(
            "INSERT INTO {} (\"MigrationId\", \"ProductVersion\")\nVALUES ({}, {});",
            quote(self.table_name()),
            literal(&record.migration_id.as_str().into()),
            literal(&record.product_version.as_str().into())
        )
    }

    /// SQL that forgets a migration.
    fn delete_script(&self, migration_id: &str) -> String {
        format!(
            "DELETE FROM {}\nWHERE \"MigrationId\" = {};",
            quote(self.table_name()),
            literal(&migration_id.into())
        )
    }
}

/// A history kept in process memory.
///
/// Used by tests and by hosts that track applied migrations themselves.
#[derive(Debug)]
pub struct InMemoryHistoryRepository {
    table_name: String,
    records: RwLock<Vec<MigrationRecord>>,
}

impl Default for InMemoryHistoryRepository {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_TABLE)
    }
}

impl InMemoryHistoryRepository {
    /// Create an empty history.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            records: RwLock::new(Vec::new()),
        }
    }

    /// Create an empty history over `migrations.history_table`.
    pub fn from_config(config: &KilnConfig) -> Self {
        Self::new(config.migrations.history_table.as_str())
    }

    /// Create a history with the given migrations already applied.
    pub fn with_applied<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let history = Self::default();
        for id in ids {
            history.records.write().push(MigrationRecord::new(id, 0));
        }
        history
    }
}

#[async_trait::async_trait]
impl HistoryRepository for InMemoryHistoryRepository {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn exists(&self) -> MigrateResult<bool> {
        Ok(true)
    }

    fn get_applied_migrations(&self) -> MigrateResult<Vec<MigrationRecord>> {
        let mut records = self.records.read().clone();
        records.sort_by(|a, b| a.migration_id.cmp(&b.migration_id));
        Ok(records)
    }

    fn record_applied(&self, record: MigrationRecord) -> MigrateResult<()> {
        let mut records = self.records.write();
        records.retain(|r| !r.migration_id.eq_ignore_ascii_case(&record.migration_id));
        records.push(record);
        Ok(())
    }

    fn record_reverted(&self, migration_id: &str) -> MigrateResult<()> {
        self.records
            .write()
            .retain(|r| !r.migration_id.eq_ignore_ascii_case(migration_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_revert() {
        let history = InMemoryHistoryRepository::default();
        history.record_applied(MigrationRecord::new("20240102000000_B", 5)).unwrap();
        history.record_applied(MigrationRecord::new("20240101000000_A", 3)).unwrap();

        let ids: Vec<_> = history
            .get_applied_migrations()
            .unwrap()
            .into_iter()
            .map(|r| r.migration_id)
            .collect();
        assert_eq!(ids, vec!["20240101000000_A", "20240102000000_B"]);

        history.record_reverted("20240102000000_b").unwrap();
        assert_eq!(history.get_applied_migrations().unwrap().len(), 1);
    }

    #[test]
    fn test_record_carries_version() {
        let record = MigrationRecord::new("20240101000000_A", 0);
        assert_eq!(record.product_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_scripts() {
        let history = InMemoryHistoryRepository::default();
        assert!(history.create_script().contains("\"__kiln_migrations_history\""));
        assert_eq!(
            history.delete_script("20240101000000_A"),
            "DELETE FROM \"__kiln_migrations_history\"\nWHERE \"MigrationId\" = '20240101000000_A';"
        );
    }

    #[test]
    fn test_table_from_config() {
        let config = KilnConfig::from_str(
            r#"
            [migrations]
            history_table = "schema_versions"
            "#,
        )
        .unwrap();
        let history = InMemoryHistoryRepository::from_config(&config);
        assert_eq!(history.table_name(), "schema_versions");
        assert!(history.create_script().starts_with("CREATE TABLE IF NOT EXISTS \"schema_versions\""));

        let default = InMemoryHistoryRepository::from_config(&KilnConfig::default());
        assert_eq!(default.table_name(), DEFAULT_HISTORY_TABLE);
    }

    #[tokio::test]
    async fn test_async_read_honours_cancellation() {
        let history = InMemoryHistoryRepository::with_applied(["20240101000000_A"]);
        let token = CancellationToken::new();
        assert_eq!(history.get_applied_migrations_async(&token).await.unwrap().len(), 1);

        token.cancel();
        assert!(matches!(
            history.get_applied_migrations_async(&token).await,
            Err(MigrationError::Cancelled)
        ));
    }
}
