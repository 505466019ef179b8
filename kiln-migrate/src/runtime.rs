//! Creating and applying migrations while the application runs.
//!
//! [`RuntimeMigrationService`] chains the whole pipeline: detect model
//! changes, scaffold, optionally persist, compile in memory, register with
//! the session's [`DynamicMigrationsAssembly`], preview the SQL and apply.

use std::path::PathBuf;
use std::sync::Arc;

use kiln_model::{KilnConfig, ModelError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::compiler::{CompilerOptions, MigrationCompiler};
use crate::error::{MigrateResult, MigrationError};
use crate::history::HistoryRepository;
use crate::migrator::{CommandExecutor, HistoryMigrator};
use crate::modules::ModuleRef;
use crate::owner::ModelOwner;
use crate::registry::{DynamicMigrationsAssembly, MigrationsAssembly};
use crate::scaffold::{MigrationFiles, MigrationsScaffolder, ScaffoldedMigration};
use crate::sql::{MigrationsSqlGenerator, PostgresSqlGenerator};

/// Options for one runtime migration.
#[derive(Debug, Clone)]
pub struct RuntimeMigrationOptions {
    /// Write the generated sources to disk before compiling.
    pub persist: bool,
    /// Project directory persisted files are placed under.
    pub project_dir: PathBuf,
    /// Explicit directory for the migration files.
    pub output_dir: Option<PathBuf>,
    pub root_namespace: Option<String>,
    pub sub_namespace: Option<String>,
    pub language: Option<String>,
    /// Compile and register, but do not touch the database.
    pub dry_run: bool,
    /// Modules to reference on top of the owner's.
    pub additional_references: Vec<ModuleRef>,
}

impl Default for RuntimeMigrationOptions {
    fn default() -> Self {
        Self {
            persist: false,
            project_dir: PathBuf::from("."),
            output_dir: None,
            root_namespace: None,
            sub_namespace: None,
            language: None,
            dry_run: false,
            additional_references: Vec::new(),
        }
    }
}

impl RuntimeMigrationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options from the `[migrations]` section of `kiln.toml`.
    pub fn from_config(config: &KilnConfig) -> Self {
        let migrations = &config.migrations;
        let non_empty = |value: &str| (!value.is_empty()).then(|| value.to_string());
        Self {
            persist: migrations.persist,
            project_dir: PathBuf::from(&migrations.project_dir),
            output_dir: migrations
                .output_dir
                .as_ref()
                .map(|dir| PathBuf::from(&migrations.project_dir).join(dir)),
            root_namespace: non_empty(&migrations.root_namespace),
            sub_namespace: migrations.sub_namespace.clone(),
            language: non_empty(&migrations.language),
            dry_run: migrations.dry_run,
            additional_references: Vec::new(),
        }
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = dir.into();
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn reference(mut self, module: ModuleRef) -> Self {
        self.additional_references.push(module);
        self
    }
}

/// Outcome of [`RuntimeMigrationService::create_and_apply_migration`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeMigrationResult {
    pub migration_id: String,
    /// Whether the migration was applied to the database.
    pub applied: bool,
    /// SQL of the migration's `up` direction.
    pub sql_commands: Vec<String>,
    /// Files written, when persistence was requested.
    pub files: Option<MigrationFiles>,
}

/// Creates migrations at runtime and applies them.
pub struct RuntimeMigrationService {
    scaffolder: MigrationsScaffolder,
    compiler: Arc<MigrationCompiler>,
    sql_generator: Arc<dyn MigrationsSqlGenerator>,
    active_provider: String,
}

impl std::fmt::Debug for RuntimeMigrationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeMigrationService")
            .field("scaffolder", &self.scaffolder)
            .field("compiler", &self.compiler)
            .field("active_provider", &self.active_provider)
            .finish_non_exhaustive()
    }
}

impl RuntimeMigrationService {
    /// Create a service from a scaffolder and a shared compiler.
    pub fn new(scaffolder: MigrationsScaffolder, compiler: Arc<MigrationCompiler>) -> Self {
        Self {
            scaffolder,
            compiler,
            sql_generator: Arc::new(PostgresSqlGenerator),
            active_provider: "postgresql".to_string(),
        }
    }

    /// Wire a service from `kiln.toml`.
    ///
    /// `history` must track the table named by `migrations.history_table`;
    /// build it with [`InMemoryHistoryRepository::from_config`] or pass a
    /// repository over the same table.
    ///
    /// [`InMemoryHistoryRepository::from_config`]: crate::InMemoryHistoryRepository::from_config
    pub fn from_config(
        config: &KilnConfig,
        owner: Arc<dyn ModelOwner>,
        history: Arc<dyn HistoryRepository>,
        executor: Arc<dyn CommandExecutor>,
    ) -> MigrateResult<Self> {
        let configured = config.migrations.history_table.as_str();
        if history.table_name() != configured {
            return Err(ModelError::ConfigError {
                message: format!(
                    "migrations.history_table is '{}' but the history repository tracks '{}'",
                    configured,
                    history.table_name()
                ),
            }
            .into());
        }
        let provider = config.database.provider.as_str();
        let migrator = HistoryMigrator::new(history.clone(), executor).with_active_provider(provider);
        let scaffolder =
            MigrationsScaffolder::new(owner, history, Arc::new(migrator)).with_active_provider(provider);
        let compiler = MigrationCompiler::with_options(CompilerOptions::from_config(config));
        Ok(Self::new(scaffolder, Arc::new(compiler)).with_active_provider(provider))
    }

    pub fn with_sql_generator(mut self, sql_generator: Arc<dyn MigrationsSqlGenerator>) -> Self {
        self.sql_generator = sql_generator;
        self
    }

    pub fn with_active_provider(mut self, active_provider: impl Into<String>) -> Self {
        self.active_provider = active_provider.into();
        self
    }

    pub fn scaffolder(&self) -> &MigrationsScaffolder {
        &self.scaffolder
    }

    pub fn compiler(&self) -> &Arc<MigrationCompiler> {
        &self.compiler
    }

    /// Scaffold, compile, register and apply a migration named `name`.
    ///
    /// Fails with [`MigrationError::NoPendingChanges`] when the model has
    /// not changed. A failure while applying leaves the migration
    /// registered, so applying can be retried without recompiling.
    #[instrument(skip(self, assembly, options))]
    pub fn create_and_apply_migration(
        &self,
        assembly: &mut DynamicMigrationsAssembly,
        name: &str,
        options: &RuntimeMigrationOptions,
    ) -> MigrateResult<RuntimeMigrationResult> {
        let model = self.scaffolder.owner().model();
        if !self
            .scaffolder
            .migrator()
            .has_pending_model_changes(&*assembly, &model)?
        {
            return Err(MigrationError::NoPendingChanges);
        }

        let scaffolded = self.scaffold(&*assembly, name, options)?;
        let files = if options.persist {
            Some(self.scaffolder.save(
                &options.project_dir,
                &scaffolded,
                options.output_dir.as_deref(),
                false,
            )?)
        } else {
            None
        };

        let sql_commands = self.compile_and_register(assembly, &scaffolded, options)?;

        let migration_id = scaffolded.migration_id;
        let applied = if options.dry_run {
            false
        } else {
            self.scaffolder
                .migrator()
                .migrate(&*assembly, Some(&migration_id))?;
            true
        };

        info!(%migration_id, applied, "runtime migration complete");
        Ok(RuntimeMigrationResult {
            migration_id,
            applied,
            sql_commands,
            files,
        })
    }

    /// Asynchronous [`RuntimeMigrationService::create_and_apply_migration`].
    ///
    /// The change check and the apply step are asynchronous; scaffolding
    /// and compiling run on the calling task.
    pub async fn create_and_apply_migration_async(
        &self,
        assembly: &mut DynamicMigrationsAssembly,
        name: &str,
        options: &RuntimeMigrationOptions,
        cancellation: &CancellationToken,
    ) -> MigrateResult<RuntimeMigrationResult> {
        let model = self.scaffolder.owner().model();
        if !self
            .scaffolder
            .migrator()
            .has_pending_model_changes_async(&*assembly, &model, cancellation)
            .await?
        {
            return Err(MigrationError::NoPendingChanges);
        }

        let scaffolded = self.scaffold(&*assembly, name, options)?;
        let files = if options.persist {
            Some(
                self.scaffolder
                    .save_async(&options.project_dir, &scaffolded, options.output_dir.as_deref(), false)
                    .await?,
            )
        } else {
            None
        };

        let sql_commands = self.compile_and_register(assembly, &scaffolded, options)?;

        let migration_id = scaffolded.migration_id;
        let applied = if options.dry_run {
            false
        } else {
            self.scaffolder
                .migrator()
                .migrate_async(&*assembly, Some(&migration_id), cancellation)
                .await?;
            true
        };

        info!(%migration_id, applied, "runtime migration complete");
        Ok(RuntimeMigrationResult {
            migration_id,
            applied,
            sql_commands,
            files,
        })
    }

    fn scaffold(
        &self,
        assembly: &DynamicMigrationsAssembly,
        name: &str,
        options: &RuntimeMigrationOptions,
    ) -> MigrateResult<ScaffoldedMigration> {
        self.scaffolder.scaffold_migration(
            assembly,
            name,
            options.root_namespace.as_deref(),
            options.sub_namespace.as_deref(),
            options.language.as_deref(),
            true,
        )
    }

    /// Compile, register, and return the `up` SQL of the new migration.
    fn compile_and_register(
        &self,
        assembly: &mut DynamicMigrationsAssembly,
        scaffolded: &ScaffoldedMigration,
        options: &RuntimeMigrationOptions,
    ) -> MigrateResult<Vec<String>> {
        let compiled = self.compiler.compile_migration(
            scaffolded,
            self.scaffolder.owner().as_ref(),
            &options.additional_references,
        )?;
        let migration_type = compiled.migration_type.clone();
        assembly.register_dynamic_migration(compiled)?;

        let migration = assembly.create_migration(&migration_type, &self.active_provider)?;
        let target_model = migration.target_model();
        let sql_commands: Vec<String> = self
            .sql_generator
            .generate(&migration.up_operations(), target_model.as_ref())
            .into_iter()
            .map(|command| command.command_text)
            .collect();
        debug!(count = sql_commands.len(), "generated migration SQL");
        Ok(sql_commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompilationBackend, CompilationOutput, CompilationRequest, Diagnostic, LoadedUnit};
    use crate::compiler::ast::Span;
    use crate::history::InMemoryHistoryRepository;
    use crate::migrator::RecordingExecutor;
    use crate::owner::StaticModelOwner;
    use crate::registry::StaticMigrationsAssembly;
    use kiln_model::{Model, ModelBuilder};

    fn blog_model() -> Model {
        let mut model_builder = ModelBuilder::new();
        model_builder.entity("Blog", |b| {
            b.property::<i32>("Id");
            b.property::<String>("Name");
            b.has_key(&["Id"]);
            b.to_table("Blogs");
        });
        model_builder.build()
    }

    fn service(history: Arc<InMemoryHistoryRepository>) -> RuntimeMigrationService {
        let owner = Arc::new(StaticModelOwner::new("BlogContext", "blog", blog_model()));
        let migrator = Arc::new(HistoryMigrator::new(history.clone(), Arc::new(RecordingExecutor::new())));
        let scaffolder = MigrationsScaffolder::new(owner, history, migrator);
        RuntimeMigrationService::new(scaffolder, Arc::new(MigrationCompiler::new()))
    }

    fn session() -> DynamicMigrationsAssembly {
        DynamicMigrationsAssembly::new(Arc::new(StaticMigrationsAssembly::empty()))
    }

    #[test]
    fn test_create_and_apply() {
        let history = Arc::new(InMemoryHistoryRepository::default());
        let service = service(history.clone());
        let mut assembly = session();

        let result = service
            .create_and_apply_migration(&mut assembly, "InitialCreate", &RuntimeMigrationOptions::new())
            .unwrap();

        assert!(result.applied);
        assert!(result.files.is_none());
        assert!(result.migration_id.ends_with("_InitialCreate"));
        assert!(result.sql_commands.iter().any(|sql| sql.starts_with("CREATE TABLE \"Blogs\"")));
        assert!(assembly.has_dynamic_migrations());
        assert_eq!(
            history.get_applied_migrations().unwrap()[0].migration_id,
            result.migration_id
        );

        assert!(matches!(
            service.create_and_apply_migration(&mut assembly, "Again", &RuntimeMigrationOptions::new()),
            Err(MigrationError::NoPendingChanges)
        ));
    }

    #[test]
    fn test_dry_run_registers_without_applying() {
        let history = Arc::new(InMemoryHistoryRepository::default());
        let service = service(history.clone());
        let mut assembly = session();

        let options = RuntimeMigrationOptions::new().dry_run(true);
        let result = service
            .create_and_apply_migration(&mut assembly, "InitialCreate", &options)
            .unwrap();

        assert!(!result.applied);
        assert!(!result.sql_commands.is_empty());
        assert!(assembly.find_migration_id("InitialCreate").is_some());
        assert!(history.get_applied_migrations().unwrap().is_empty());
    }

    #[test]
    fn test_persist_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(Arc::new(InMemoryHistoryRepository::default()));
        let mut assembly = session();

        let options = RuntimeMigrationOptions::new()
            .persist(true)
            .project_dir(dir.path())
            .dry_run(true);
        let result = service
            .create_and_apply_migration(&mut assembly, "InitialCreate", &options)
            .unwrap();

        let files = result.files.unwrap();
        assert!(files.migration_file.exists());
        assert!(files.metadata_file.exists());
        assert!(files.snapshot_file.exists());
    }

    struct FailingBackend;

    impl CompilationBackend for FailingBackend {
        fn compile(&self, request: &CompilationRequest) -> CompilationOutput {
            CompilationOutput {
                diagnostics: vec![Diagnostic::error(
                    "syntax_error",
                    &request.sources[0].file_name,
                    Span::new(1, 1),
                    "expected item",
                )],
                image: None,
            }
        }

        fn load(&self, _image: &[u8]) -> MigrateResult<LoadedUnit> {
            unreachable!("nothing compiles")
        }
    }

    #[test]
    fn test_compile_failure_registers_nothing() {
        let history = Arc::new(InMemoryHistoryRepository::default());
        let owner = Arc::new(StaticModelOwner::new("BlogContext", "blog", blog_model()));
        let migrator = Arc::new(HistoryMigrator::new(history.clone(), Arc::new(RecordingExecutor::new())));
        let service = RuntimeMigrationService::new(
            MigrationsScaffolder::new(owner, history.clone(), migrator),
            Arc::new(MigrationCompiler::new().with_backend(Arc::new(FailingBackend))),
        );
        let mut assembly = session();

        let err = service
            .create_and_apply_migration(&mut assembly, "InitialCreate", &RuntimeMigrationOptions::new())
            .unwrap_err();
        assert!(matches!(err, MigrationError::Compilation { .. }));
        assert!(!assembly.has_dynamic_migrations());
        assert!(assembly.migrations().is_empty());
        assert!(history.get_applied_migrations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_and_apply_async() {
        let history = Arc::new(InMemoryHistoryRepository::default());
        let service = service(history.clone());
        let mut assembly = session();

        let result = service
            .create_and_apply_migration_async(
                &mut assembly,
                "InitialCreate",
                &RuntimeMigrationOptions::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.applied);
        assert_eq!(history.get_applied_migrations().unwrap().len(), 1);
    }

    #[test]
    fn test_options_from_config() {
        let config = KilnConfig::from_str(
            r#"
            [migrations]
            root_namespace = "shop"
            persist = true
            dry_run = true
            "#,
        )
        .unwrap();
        let options = RuntimeMigrationOptions::from_config(&config);
        assert!(options.persist);
        assert!(options.dry_run);
        assert_eq!(options.root_namespace.as_deref(), Some("shop"));
    }
}
