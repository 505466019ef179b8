//! Applying and reverting migrations against a database.
//!
//! [`MigrationPlanner`] works out which migrations to run to reach a
//! target; [`HistoryMigrator`] runs them through a [`CommandExecutor`] and
//! keeps the history repository in step.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use kiln_model::Model;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::history::{HistoryRepository, MigrationRecord};
use crate::migration::INITIAL_DATABASE;
use crate::pending::SnapshotChangeDetector;
use crate::registry::{MigrationMap, MigrationsAssembly};
use crate::sql::{MigrationCommand, MigrationsSqlGenerator, PostgresSqlGenerator};
use crate::types::TypeHandle;

/// Brings a database to a target migration.
///
/// The assembly is passed per call so that each session keeps its own
/// registry.
#[async_trait::async_trait]
pub trait Migrator: Send + Sync {
    /// Migrate to `target`, a migration name or id. `None` means the
    /// latest migration and [`INITIAL_DATABASE`] reverts everything.
    fn migrate(&self, assembly: &dyn MigrationsAssembly, target: Option<&str>) -> MigrateResult<MigrationResult>;

    /// Asynchronous [`Migrator::migrate`].
    async fn migrate_async(
        &self,
        assembly: &dyn MigrationsAssembly,
        target: Option<&str>,
        cancellation: &CancellationToken,
    ) -> MigrateResult<MigrationResult>;

    /// Check whether `model` has changes no migration covers.
    fn has_pending_model_changes(&self, assembly: &dyn MigrationsAssembly, model: &Model) -> MigrateResult<bool>;

    /// Asynchronous [`Migrator::has_pending_model_changes`].
    async fn has_pending_model_changes_async(
        &self,
        assembly: &dyn MigrationsAssembly,
        model: &Model,
        cancellation: &CancellationToken,
    ) -> MigrateResult<bool> {
        if cancellation.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }
        self.has_pending_model_changes(assembly, model)
    }
}

/// Direction a migration runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// One migration to run.
#[derive(Debug, Clone)]
pub struct MigrationStep {
    pub migration_id: String,
    pub direction: Direction,
    pub migration_type: TypeHandle,
}

/// The ordered steps from the applied state to a target.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    /// Resolved target id, `None` when everything is reverted.
    pub target: Option<String>,
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    /// Check if there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Ids of migrations the plan applies.
    pub fn applying(&self) -> impl Iterator<Item = &str> {
        self.ids(Direction::Up)
    }

    /// Ids of migrations the plan reverts.
    pub fn reverting(&self) -> impl Iterator<Item = &str> {
        self.ids(Direction::Down)
    }

    fn ids(&self, direction: Direction) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .filter(move |step| step.direction == direction)
            .map(|step| step.migration_id.as_str())
    }

    /// Get a summary of the plan.
    pub fn summary(&self) -> String {
        let applying = self.applying().count();
        let reverting = self.reverting().count();
        match (applying, reverting) {
            (0, 0) => "No migrations to run".to_string(),
            (a, 0) => format!("{} to apply", a),
            (0, r) => format!("{} to revert", r),
            (a, r) => format!("{} to revert, {} to apply", r, a),
        }
    }
}

/// Computes migration plans.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationPlanner;

impl MigrationPlanner {
    /// Plan the steps from `applied` to `target`.
    ///
    /// Migrations past the target are reverted newest first, then missing
    /// migrations up to the target are applied oldest first. Applied ids
    /// the assembly does not know are left alone.
    pub fn plan(migrations: &MigrationMap, applied: &[String], target: Option<&str>) -> MigrateResult<MigrationPlan> {
        let target = match target {
            None => migrations.last().map(|(id, _)| id.to_string()),
            Some(INITIAL_DATABASE) => None,
            Some(name_or_id) => Some(
                migrations
                    .find_id(name_or_id)
                    .map(str::to_string)
                    .ok_or_else(|| MigrationError::NotFound(name_or_id.to_string()))?,
            ),
        };
        let target_key = target.as_deref().map(str::to_ascii_lowercase);
        let past_target = |id: &str| match &target_key {
            Some(key) => id.to_ascii_lowercase() > *key,
            None => true,
        };

        let applied_keys: HashSet<String> = applied.iter().map(|id| id.to_ascii_lowercase()).collect();
        let mut steps = Vec::new();

        let mut reverting: Vec<&String> = applied.iter().filter(|id| past_target(id.as_str())).collect();
        reverting.sort_by_key(|id| std::cmp::Reverse(id.to_ascii_lowercase()));
        for id in reverting {
            match migrations.get(id) {
                Some(ty) => steps.push(MigrationStep {
                    migration_id: id.clone(),
                    direction: Direction::Down,
                    migration_type: ty.clone(),
                }),
                None => warn!(migration_id = %id, "applied migration is not in the assembly, skipping revert"),
            }
        }

        for (id, ty) in migrations.iter() {
            if past_target(id) || applied_keys.contains(&id.to_ascii_lowercase()) {
                continue;
            }
            steps.push(MigrationStep {
                migration_id: id.to_string(),
                direction: Direction::Up,
                migration_type: ty.clone(),
            });
        }

        Ok(MigrationPlan { target, steps })
    }
}

/// Result of a migrate call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationResult {
    /// IDs of applied migrations.
    pub applied_migrations: Vec<String>,
    /// IDs of reverted migrations.
    pub reverted_migrations: Vec<String>,
    /// Total duration in milliseconds.
    pub duration_ms: i64,
}

impl MigrationResult {
    /// Check if anything ran.
    pub fn has_changes(&self) -> bool {
        !self.applied_migrations.is_empty() || !self.reverted_migrations.is_empty()
    }

    /// Get a summary of the result.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.reverted_migrations.is_empty() {
            parts.push(format!("{} reverted", self.reverted_migrations.len()));
        }
        if !self.applied_migrations.is_empty() {
            parts.push(format!("{} applied", self.applied_migrations.len()));
        }

        if parts.is_empty() {
            "No migrations applied".to_string()
        } else {
            format!("{} in {}ms", parts.join(", "), self.duration_ms)
        }
    }
}

/// Runs SQL commands against a database.
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, commands: &[MigrationCommand]) -> MigrateResult<()>;

    async fn execute_async(
        &self,
        commands: &[MigrationCommand],
        cancellation: &CancellationToken,
    ) -> MigrateResult<()> {
        if cancellation.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }
        self.execute(commands)
    }
}

/// An executor that only records what it was asked to run.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    commands: Mutex<Vec<MigrationCommand>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command executed so far.
    pub fn commands(&self) -> Vec<MigrationCommand> {
        self.commands.lock().clone()
    }
}

#[async_trait::async_trait]
impl CommandExecutor for RecordingExecutor {
    fn execute(&self, commands: &[MigrationCommand]) -> MigrateResult<()> {
        for command in commands {
            debug!(sql = %command.command_text, "executing");
        }
        self.commands.lock().extend_from_slice(commands);
        Ok(())
    }
}

/// A [`Migrator`] that records progress in a [`HistoryRepository`].
pub struct HistoryMigrator {
    history: Arc<dyn HistoryRepository>,
    executor: Arc<dyn CommandExecutor>,
    sql_generator: Arc<dyn MigrationsSqlGenerator>,
    detector: SnapshotChangeDetector,
    active_provider: String,
}

impl std::fmt::Debug for HistoryMigrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryMigrator")
            .field("history_table", &self.history.table_name())
            .field("active_provider", &self.active_provider)
            .finish_non_exhaustive()
    }
}

impl HistoryMigrator {
    /// Create a migrator for PostgreSQL.
    pub fn new(history: Arc<dyn HistoryRepository>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            history,
            executor,
            sql_generator: Arc::new(PostgresSqlGenerator),
            detector: SnapshotChangeDetector::new(),
            active_provider: "postgresql".to_string(),
        }
    }

    /// Use a different SQL generator.
    pub fn with_sql_generator(mut self, sql_generator: Arc<dyn MigrationsSqlGenerator>) -> Self {
        self.sql_generator = sql_generator;
        self
    }

    /// Set the active provider migrations are instantiated for.
    pub fn with_active_provider(mut self, active_provider: impl Into<String>) -> Self {
        self.active_provider = active_provider.into();
        self
    }

    /// Use a different change detector.
    pub fn with_detector(mut self, detector: SnapshotChangeDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn active_provider(&self) -> &str {
        &self.active_provider
    }

    /// Plan the steps to `target` from the recorded history.
    pub fn plan(&self, assembly: &dyn MigrationsAssembly, target: Option<&str>) -> MigrateResult<MigrationPlan> {
        let applied = applied_ids(self.history.get_applied_migrations()?);
        MigrationPlanner::plan(&assembly.migrations(), &applied, target)
    }

    /// The SQL a step runs.
    pub fn step_commands(
        &self,
        assembly: &dyn MigrationsAssembly,
        step: &MigrationStep,
    ) -> MigrateResult<Vec<MigrationCommand>> {
        let migration = assembly.create_migration(&step.migration_type, &self.active_provider)?;
        Ok(match step.direction {
            Direction::Up => {
                let target_model = migration.target_model();
                self.sql_generator
                    .generate(&migration.up_operations(), target_model.as_ref())
            }
            Direction::Down => self.sql_generator.generate(&migration.down_operations(), None),
        })
    }

    fn history_commands(&self) -> MigrateResult<Vec<MigrationCommand>> {
        if self.history.exists()? {
            return Ok(Vec::new());
        }
        Ok(vec![MigrationCommand::new(self.history.create_script())])
    }

    fn finish_step(&self, step: &MigrationStep, started: Instant, result: &mut MigrationResult) -> MigrateResult<()> {
        let elapsed = started.elapsed().as_millis() as i64;
        match step.direction {
            Direction::Up => {
                self.history
                    .record_applied(MigrationRecord::new(&step.migration_id, elapsed))?;
                info!(migration_id = %step.migration_id, duration_ms = elapsed, "applied migration");
                result.applied_migrations.push(step.migration_id.clone());
            }
            Direction::Down => {
                self.history.record_reverted(&step.migration_id)?;
                info!(migration_id = %step.migration_id, duration_ms = elapsed, "reverted migration");
                result.reverted_migrations.push(step.migration_id.clone());
            }
        }
        Ok(())
    }
}

fn applied_ids(records: Vec<MigrationRecord>) -> Vec<String> {
    records.into_iter().map(|record| record.migration_id).collect()
}

#[async_trait::async_trait]
impl Migrator for HistoryMigrator {
    #[instrument(skip(self, assembly))]
    fn migrate(&self, assembly: &dyn MigrationsAssembly, target: Option<&str>) -> MigrateResult<MigrationResult> {
        let started = Instant::now();
        let plan = self.plan(assembly, target)?;
        debug!(summary = %plan.summary(), "planned migrations");

        let mut result = MigrationResult::default();
        if plan.is_empty() {
            return Ok(result);
        }

        self.executor.execute(&self.history_commands()?)?;
        for step in &plan.steps {
            let step_started = Instant::now();
            let commands = self.step_commands(assembly, step)?;
            self.executor.execute(&commands)?;
            self.finish_step(step, step_started, &mut result)?;
        }

        result.duration_ms = started.elapsed().as_millis() as i64;
        info!(summary = %result.summary(), "migration complete");
        Ok(result)
    }

    async fn migrate_async(
        &self,
        assembly: &dyn MigrationsAssembly,
        target: Option<&str>,
        cancellation: &CancellationToken,
    ) -> MigrateResult<MigrationResult> {
        let started = Instant::now();
        let applied = applied_ids(self.history.get_applied_migrations_async(cancellation).await?);
        let plan = MigrationPlanner::plan(&assembly.migrations(), &applied, target)?;
        debug!(summary = %plan.summary(), "planned migrations");

        let mut result = MigrationResult::default();
        if plan.is_empty() {
            return Ok(result);
        }

        self.executor
            .execute_async(&self.history_commands()?, cancellation)
            .await?;
        for step in &plan.steps {
            if cancellation.is_cancelled() {
                return Err(MigrationError::Cancelled);
            }
            let step_started = Instant::now();
            let commands = self.step_commands(assembly, step)?;
            self.executor.execute_async(&commands, cancellation).await?;
            self.finish_step(step, step_started, &mut result)?;
        }

        result.duration_ms = started.elapsed().as_millis() as i64;
        info!(summary = %result.summary(), "migration complete");
        Ok(result)
    }

    fn has_pending_model_changes(&self, assembly: &dyn MigrationsAssembly, model: &Model) -> MigrateResult<bool> {
        self.detector.has_pending_model_changes(assembly, model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MigrationBuilder;
    use crate::history::InMemoryHistoryRepository;
    use crate::migration::{Migration, MigrationMetadata};
    use crate::registry::StaticMigrationsAssembly;
    use crate::types::TypeInfo;

    struct Named(&'static str);

    impl MigrationMetadata for Named {
        fn id(&self) -> &str {
            self.0
        }
    }

    impl Migration for Named {
        fn up(&self, migration_builder: &mut MigrationBuilder) {
            migration_builder.sql(&format!("-- up {}", self.0));
        }

        fn down(&self, migration_builder: &mut MigrationBuilder) {
            migration_builder.sql(&format!("-- down {}", self.0));
        }
    }

    fn assembly(ids: &[&'static str]) -> StaticMigrationsAssembly {
        StaticMigrationsAssembly::from_types(
            ids.iter().map(|&id| {
                TypeInfo::migration_with("Named", "app::migrations", "app", move || Arc::new(Named(id)))
                    .into_handle()
            }),
            None,
        )
    }

    const A: &str = "20240101000000_A";
    const B: &str = "20240102000000_B";
    const C: &str = "20240103000000_C";

    fn step_ids(plan: &MigrationPlan) -> Vec<(&str, Direction)> {
        plan.steps
            .iter()
            .map(|step| (step.migration_id.as_str(), step.direction))
            .collect()
    }

    #[test]
    fn test_plan_to_latest() {
        let migrations = assembly(&[A, B, C]).migrations();
        let plan = MigrationPlanner::plan(&migrations, &[A.to_string()], None).unwrap();
        assert_eq!(plan.target.as_deref(), Some(C));
        assert_eq!(step_ids(&plan), vec![(B, Direction::Up), (C, Direction::Up)]);
        assert_eq!(plan.summary(), "2 to apply");
    }

    #[test]
    fn test_plan_back_to_named_target() {
        let migrations = assembly(&[A, B, C]).migrations();
        let applied = vec![A.to_string(), B.to_string(), C.to_string()];
        let plan = MigrationPlanner::plan(&migrations, &applied, Some("a")).unwrap();
        assert_eq!(step_ids(&plan), vec![(C, Direction::Down), (B, Direction::Down)]);
    }

    #[test]
    fn test_plan_to_initial_database() {
        let migrations = assembly(&[A, B]).migrations();
        let applied = vec![A.to_string(), B.to_string(), "20231231000000_Gone".to_string()];
        let plan = MigrationPlanner::plan(&migrations, &applied, Some(INITIAL_DATABASE)).unwrap();
        assert_eq!(plan.target, None);
        assert_eq!(step_ids(&plan), vec![(B, Direction::Down), (A, Direction::Down)]);
    }

    #[test]
    fn test_plan_unknown_target() {
        let migrations = assembly(&[A]).migrations();
        assert!(matches!(
            MigrationPlanner::plan(&migrations, &[], Some("Nope")),
            Err(MigrationError::NotFound(name)) if name == "Nope"
        ));
    }

    #[test]
    fn test_migrate_records_history() {
        let history = Arc::new(InMemoryHistoryRepository::default());
        let executor = Arc::new(RecordingExecutor::new());
        let migrator = HistoryMigrator::new(history.clone(), executor.clone());
        let assembly = assembly(&[A, B]);

        let result = migrator.migrate(&assembly, None).unwrap();
        assert_eq!(result.applied_migrations, vec![A.to_string(), B.to_string()]);
        assert_eq!(history.get_applied_migrations().unwrap().len(), 2);

        let sql: Vec<String> = executor.commands().into_iter().map(|c| c.command_text).collect();
        assert_eq!(sql, vec![format!("-- up {}", A), format!("-- up {}", B)]);

        let result = migrator.migrate(&assembly, Some(INITIAL_DATABASE)).unwrap();
        assert_eq!(result.reverted_migrations, vec![B.to_string(), A.to_string()]);
        assert!(history.get_applied_migrations().unwrap().is_empty());
        assert!(!migrator.migrate(&assembly, Some(INITIAL_DATABASE)).unwrap().has_changes());
    }

    #[tokio::test]
    async fn test_migrate_async_honours_cancellation() {
        let history = Arc::new(InMemoryHistoryRepository::default());
        let executor = Arc::new(RecordingExecutor::new());
        let migrator = HistoryMigrator::new(history.clone(), executor.clone());
        let assembly = assembly(&[A]);

        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            migrator.migrate_async(&assembly, None, &token).await,
            Err(MigrationError::Cancelled)
        ));
        assert!(executor.commands().is_empty());

        let result = migrator
            .migrate_async(&assembly, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.applied_migrations, vec![A.to_string()]);
    }
}
