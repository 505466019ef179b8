//! Integration tests for runtime migrations.
//!
//! These tests evolve a model across several services that share one
//! history and one session registry, the way an application does when its
//! model changes while it is running.

use std::sync::Arc;

use kiln::migrate::{
    CommandExecutor, HistoryRepository, IdGenerator, InMemoryHistoryRepository, MigrationCompiler,
    MigrationError, RecordingExecutor, TimestampIdGenerator,
};
use kiln::prelude::*;
use kiln::ModelError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Route pipeline logs to the test output.
///
/// `RUST_LOG` wins over the `[debug]` level of the default configuration.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(&KilnConfig::default()))
        .with_test_writer()
        .try_init();
}

fn log_filter(config: &KilnConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.debug.log_level))
}

fn blog_model(with_note: bool) -> Model {
    let mut model_builder = ModelBuilder::new();
    model_builder.entity("Blog", |b| {
        b.property::<i32>("Id");
        b.property::<String>("Name");
        if with_note {
            b.property::<Option<String>>("Note");
        }
        b.has_key(&["Id"]);
        b.to_table("Blogs");
    });
    model_builder.build()
}

/// State shared by every service of one application run.
struct App {
    history: Arc<InMemoryHistoryRepository>,
    executor: Arc<RecordingExecutor>,
    ids: Arc<TimestampIdGenerator>,
    compiler: Arc<MigrationCompiler>,
    assembly: DynamicMigrationsAssembly,
}

impl App {
    fn new() -> Self {
        init_tracing();
        Self {
            history: Arc::new(InMemoryHistoryRepository::default()),
            executor: Arc::new(RecordingExecutor::new()),
            ids: Arc::new(TimestampIdGenerator::new()),
            compiler: Arc::new(MigrationCompiler::new()),
            assembly: DynamicMigrationsAssembly::new(Arc::new(StaticMigrationsAssembly::empty())),
        }
    }

    fn service(&self, model: Model) -> RuntimeMigrationService {
        let owner = Arc::new(StaticModelOwner::new("BlogContext", "blog", model));
        let executor: Arc<dyn CommandExecutor> = self.executor.clone();
        let migrator = Arc::new(HistoryMigrator::new(self.history.clone(), executor));
        let ids: Arc<dyn IdGenerator> = self.ids.clone();
        let scaffolder = MigrationsScaffolder::new(owner, self.history.clone(), migrator).with_id_generator(ids);
        RuntimeMigrationService::new(scaffolder, self.compiler.clone())
    }

    fn executed(&self) -> Vec<String> {
        self.executor
            .commands()
            .into_iter()
            .map(|command| command.command_text)
            .collect()
    }
}

#[test]
fn test_model_evolves_within_one_session() {
    let mut app = App::new();
    let options = RuntimeMigrationOptions::new();

    let initial = app
        .service(blog_model(false))
        .create_and_apply_migration(&mut app.assembly, "InitialCreate", &options)
        .unwrap();
    assert!(initial.applied);
    assert!(initial.migration_id.ends_with("_InitialCreate"));

    let add_note = app
        .service(blog_model(true))
        .create_and_apply_migration(&mut app.assembly, "AddNote", &options)
        .unwrap();
    assert!(add_note.applied);
    assert!(add_note.migration_id > initial.migration_id);
    assert_eq!(add_note.sql_commands.len(), 1);
    assert!(add_note.sql_commands[0].starts_with("ALTER TABLE \"Blogs\" ADD \"Note\""));

    let migrations = app.assembly.migrations();
    let ids: Vec<&str> = migrations.ids().collect();
    assert_eq!(ids, vec![initial.migration_id.as_str(), add_note.migration_id.as_str()]);

    let applied: Vec<String> = app
        .history
        .get_applied_migrations()
        .unwrap()
        .into_iter()
        .map(|record| record.migration_id)
        .collect();
    assert_eq!(applied, vec![initial.migration_id.clone(), add_note.migration_id.clone()]);

    let executed = app.executed();
    assert!(executed[0].starts_with("CREATE TABLE \"Blogs\""));
    assert_eq!(executed.last(), add_note.sql_commands.last());

    let snapshot = app.assembly.model_snapshot().unwrap().model();
    assert!(snapshot.entity("Blog").unwrap().property("Note").is_some());
}

#[test]
fn test_unchanged_model_is_refused() {
    let mut app = App::new();
    let service = app.service(blog_model(false));
    let options = RuntimeMigrationOptions::new();

    service
        .create_and_apply_migration(&mut app.assembly, "InitialCreate", &options)
        .unwrap();
    let executed = app.executed().len();

    let err = service
        .create_and_apply_migration(&mut app.assembly, "Again", &options)
        .unwrap_err();
    assert!(matches!(err, MigrationError::NoPendingChanges));
    assert_eq!(app.assembly.migrations().len(), 1);
    assert_eq!(app.executed().len(), executed);
}

#[test]
fn test_persisted_migrations_share_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = App::new();
    let options = RuntimeMigrationOptions::new()
        .persist(true)
        .project_dir(dir.path());

    let initial = app
        .service(blog_model(false))
        .create_and_apply_migration(&mut app.assembly, "InitialCreate", &options)
        .unwrap();
    let add_note = app
        .service(blog_model(true))
        .create_and_apply_migration(&mut app.assembly, "AddNote", &options)
        .unwrap();

    let first = initial.files.unwrap();
    let second = add_note.files.unwrap();
    assert_eq!(first.migration_file.parent(), second.migration_file.parent());
    assert_eq!(first.snapshot_file, second.snapshot_file);
    assert!(first.migration_file.exists());
    assert!(second.metadata_file.exists());

    let snapshot = std::fs::read_to_string(&second.snapshot_file).unwrap();
    assert!(snapshot.starts_with("// <auto-generated />"));
    assert!(snapshot.contains("BlogContextModelSnapshot"));
    assert!(snapshot.contains("\"Note\""));
}

#[test]
fn test_options_from_config() {
    let config = KilnConfig::from_str(
        r#"
[database]
provider = "postgresql"
url = "postgres://localhost/blog"

[migrations]
root_namespace = "blog"
dry_run = true
"#,
    )
    .unwrap();
    let options = RuntimeMigrationOptions::from_config(&config);
    assert!(options.dry_run);
    assert!(!options.persist);

    let mut app = App::new();
    let result = app
        .service(blog_model(false))
        .create_and_apply_migration(&mut app.assembly, "InitialCreate", &options)
        .unwrap();
    assert!(!result.applied);
    assert!(app.assembly.has_dynamic_migrations());
    assert!(app.history.get_applied_migrations().unwrap().is_empty());
    assert!(app.executed().is_empty());
}

const SERVICE_CONFIG: &str = r#"
[database]
provider = "postgresql"

[migrations]
root_namespace = "blog"
history_table = "schema_versions"

[debug]
log_level = "kiln_migrate=debug"
"#;

#[test]
fn test_service_from_config_uses_history_table() {
    init_tracing();
    let config = KilnConfig::from_str(SERVICE_CONFIG).unwrap();
    let history = Arc::new(InMemoryHistoryRepository::from_config(&config));
    let executor = Arc::new(RecordingExecutor::new());
    let owner = Arc::new(StaticModelOwner::new("BlogContext", "blog", blog_model(false)));
    let service = RuntimeMigrationService::from_config(&config, owner, history.clone(), executor.clone()).unwrap();

    let mut assembly = DynamicMigrationsAssembly::new(Arc::new(StaticMigrationsAssembly::empty()));
    service
        .create_and_apply_migration(&mut assembly, "InitialCreate", &RuntimeMigrationOptions::from_config(&config))
        .unwrap();
    assert_eq!(history.table_name(), "schema_versions");
    assert_eq!(history.get_applied_migrations().unwrap().len(), 1);
    assert!(!executor.commands().is_empty());
    assert!(history.create_script().contains("\"schema_versions\""));
}

#[test]
fn test_service_from_config_rejects_other_history_table() {
    let config = KilnConfig::from_str(SERVICE_CONFIG).unwrap();
    let owner = Arc::new(StaticModelOwner::new("BlogContext", "blog", blog_model(false)));
    let err = RuntimeMigrationService::from_config(
        &config,
        owner,
        Arc::new(InMemoryHistoryRepository::default()),
        Arc::new(RecordingExecutor::new()),
    )
    .unwrap_err();
    let MigrationError::Model(ModelError::ConfigError { message }) = err else {
        panic!("Expected a configuration error, got {:?}", err);
    };
    assert!(message.contains("schema_versions"));
}

#[test]
fn test_log_level_drives_filter() {
    let config = KilnConfig::from_str(SERVICE_CONFIG).unwrap();
    if std::env::var_os("RUST_LOG").is_none() {
        assert_eq!(log_filter(&config).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(log_filter(&KilnConfig::default()).max_level_hint(), Some(LevelFilter::INFO));
    }
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let mut app = App::new();
    let service = app.service(blog_model(false));
    let cancellation = CancellationToken::new();
    cancellation.cancel();

    let err = service
        .create_and_apply_migration_async(
            &mut app.assembly,
            "InitialCreate",
            &RuntimeMigrationOptions::new(),
            &cancellation,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::Cancelled));
    assert!(!app.assembly.has_dynamic_migrations());
}

#[tokio::test]
async fn test_async_session() {
    let mut app = App::new();
    let cancellation = CancellationToken::new();
    let options = RuntimeMigrationOptions::new();

    let initial = app
        .service(blog_model(false))
        .create_and_apply_migration_async(&mut app.assembly, "InitialCreate", &options, &cancellation)
        .await
        .unwrap();
    let add_note = app
        .service(blog_model(true))
        .create_and_apply_migration_async(&mut app.assembly, "AddNote", &options, &cancellation)
        .await
        .unwrap();

    assert!(initial.applied && add_note.applied);
    assert_eq!(app.history.get_applied_migrations().unwrap().len(), 2);
}
