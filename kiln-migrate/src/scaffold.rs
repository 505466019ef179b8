//! Scaffolding of new migrations from model changes.
//!
//! [`MigrationsScaffolder`] diffs the owner's current model against the
//! last snapshot, renders the migration body, its metadata and a new
//! snapshot, and can write them to disk or take the last migration back
//! out again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use convert_case::{Case, Casing};
use kiln_model::{Model, RelationalModel};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::codegen::CodeGeneratorSelector;
use crate::diff::{ModelDiffer, RelationalModelDiffer};
use crate::error::{MigrateResult, MigrationError};
use crate::history::HistoryRepository;
use crate::id::{IdGenerator, TimestampIdGenerator};
use crate::migration::{INITIAL_DATABASE, RESERVED_MIGRATION_NAME};
use crate::migrator::Migrator;
use crate::owner::ModelOwner;
use crate::registry::MigrationsAssembly;
use crate::reporter::{OperationReporter, TracingReporter};
use crate::snapshot_processor::{DefaultSnapshotModelProcessor, SnapshotModelProcessor};
use crate::types::{TypeHandle, TypeKind};

/// Sub-namespace migrations go to when none is given.
pub const DEFAULT_SUB_NAMESPACE: &str = "migrations";

const DESIGNER_SUFFIX: &str = ".Designer";

/// The generated sources of one migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScaffoldedMigration {
    /// Extension of the generated files, including the dot.
    pub file_extension: String,
    /// Language the sources are written in.
    pub language: String,
    /// Id of the migration this one follows.
    pub previous_migration_id: Option<String>,
    pub migration_code: String,
    pub migration_id: String,
    pub metadata_code: String,
    /// Namespace of the migration, relative to the root namespace.
    pub migration_sub_namespace: String,
    pub snapshot_code: String,
    pub snapshot_name: String,
    /// Namespace of the snapshot, relative to the root namespace.
    pub snapshot_sub_namespace: String,
}

/// Paths of the three files of a saved migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFiles {
    pub migration_file: PathBuf,
    pub metadata_file: PathBuf,
    pub snapshot_file: PathBuf,
}

/// What [`MigrationsScaffolder::remove_migration`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovedMigration {
    /// Id of the removed migration, if one was removed.
    pub migration_id: Option<String>,
    pub migration_file: Option<PathBuf>,
    pub metadata_file: Option<PathBuf>,
    /// Snapshot file that was rewritten or deleted.
    pub snapshot_file: Option<PathBuf>,
    /// The regenerated snapshot; `None` when the snapshot was deleted.
    pub snapshot_code: Option<String>,
}

/// Creates, saves and removes migrations for one model owner.
pub struct MigrationsScaffolder {
    owner: Arc<dyn ModelOwner>,
    history: Arc<dyn HistoryRepository>,
    migrator: Arc<dyn Migrator>,
    differ: Arc<dyn ModelDiffer>,
    processor: Arc<dyn SnapshotModelProcessor>,
    id_generator: Arc<dyn IdGenerator>,
    generators: CodeGeneratorSelector,
    reporter: Arc<dyn OperationReporter>,
    active_provider: String,
}

impl std::fmt::Debug for MigrationsScaffolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationsScaffolder")
            .field("owner", &self.owner.full_name())
            .field("generators", &self.generators)
            .field("active_provider", &self.active_provider)
            .finish_non_exhaustive()
    }
}

impl MigrationsScaffolder {
    /// Create a scaffolder with the default collaborators.
    pub fn new(
        owner: Arc<dyn ModelOwner>,
        history: Arc<dyn HistoryRepository>,
        migrator: Arc<dyn Migrator>,
    ) -> Self {
        Self {
            owner,
            history,
            migrator,
            differ: Arc::new(RelationalModelDiffer::new()),
            processor: Arc::new(DefaultSnapshotModelProcessor::new()),
            id_generator: Arc::new(TimestampIdGenerator::new()),
            generators: CodeGeneratorSelector::new(),
            reporter: Arc::new(TracingReporter),
            active_provider: "postgresql".to_string(),
        }
    }

    pub fn with_differ(mut self, differ: Arc<dyn ModelDiffer>) -> Self {
        self.differ = differ;
        self
    }

    pub fn with_processor(mut self, processor: Arc<dyn SnapshotModelProcessor>) -> Self {
        self.processor = processor;
        self
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn with_generators(mut self, generators: CodeGeneratorSelector) -> Self {
        self.generators = generators;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn OperationReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_active_provider(mut self, active_provider: impl Into<String>) -> Self {
        self.active_provider = active_provider.into();
        self
    }

    pub fn owner(&self) -> &Arc<dyn ModelOwner> {
        &self.owner
    }

    pub fn migrator(&self) -> &Arc<dyn Migrator> {
        &self.migrator
    }

    pub fn reporter(&self) -> &Arc<dyn OperationReporter> {
        &self.reporter
    }

    /// Scaffold a migration named `name` from the pending model changes.
    ///
    /// Nothing is written; use [`MigrationsScaffolder::save`] for that.
    #[instrument(skip(self, assembly), fields(owner = %self.owner.full_name()))]
    pub fn scaffold_migration(
        &self,
        assembly: &dyn MigrationsAssembly,
        name: &str,
        root_namespace: Option<&str>,
        sub_namespace: Option<&str>,
        language: Option<&str>,
        dry_run: bool,
    ) -> MigrateResult<ScaffoldedMigration> {
        if assembly.find_migration_id(name).is_some() {
            return Err(MigrationError::DuplicateMigrationName(name.to_string()));
        }
        if name == RESERVED_MIGRATION_NAME {
            return Err(MigrationError::ReservedMigrationName(name.to_string()));
        }

        let owner_name = self.owner.full_name();
        let root_namespace = root_namespace.unwrap_or_else(|| self.owner.namespace());
        let namespace = self.migration_namespace(assembly, root_namespace, sub_namespace);

        let snapshot = assembly.model_snapshot().map(|snapshot| snapshot.model());
        let source = self.processor.process(snapshot, false);
        let target = self
            .processor
            .process(Some(self.owner.model()), true)
            .unwrap_or_default();

        let source_tables = source.as_ref().map(RelationalModel::from_model).transpose()?;
        let target_tables = RelationalModel::from_model(&target)?;
        let up = self
            .differ
            .get_differences(source_tables.as_ref(), Some(&target_tables));
        let down = if up.is_empty() {
            Vec::new()
        } else {
            self.differ
                .get_differences(Some(&target_tables), source_tables.as_ref())
        };
        debug!(up = up.len(), down = down.len(), "computed model differences");

        if up.iter().any(|operation| operation.is_destructive()) {
            self.reporter.write_warning(
                "An operation was scaffolded that may result in the loss of data. Please review the migration for accuracy.",
            );
        }

        let generator = self.generators.select(language)?;
        let migration_id = self.id_generator.generate_id(name);
        let previous_migration_id = assembly.migrations().last().map(|(id, _)| id.to_string());

        let (snapshot_name, snapshot_namespace) = match self.snapshot_type(assembly) {
            Some(ty) => (ty.name.clone(), ty.namespace.clone()),
            None => (default_snapshot_name(self.owner.type_name()), namespace.clone()),
        };

        let migration_code = generator.generate_migration(&namespace, name, &up, &down)?;
        let metadata_code = generator.generate_metadata(&namespace, &owner_name, name, &migration_id, &target)?;
        let snapshot_code = generator.generate_snapshot(&snapshot_namespace, &owner_name, &snapshot_name, &target)?;

        if dry_run {
            self.reporter
                .write_verbose(&format!("Scaffolded migration '{}' without writing files.", migration_id));
        } else {
            self.reporter
                .write_information(&format!("Scaffolded migration '{}'.", migration_id));
        }

        Ok(ScaffoldedMigration {
            file_extension: generator.file_extension().to_string(),
            language: generator.language().to_string(),
            previous_migration_id,
            migration_code,
            migration_id,
            metadata_code,
            migration_sub_namespace: relative_namespace(root_namespace, &namespace),
            snapshot_code,
            snapshot_name,
            snapshot_sub_namespace: relative_namespace(root_namespace, &snapshot_namespace),
        })
    }

    /// Resolve the namespace for a new migration.
    ///
    /// When the default namespace already holds migrations of another
    /// owner, a namespace named after this owner is used instead. An
    /// explicit sub-namespace is kept and only warned about.
    fn migration_namespace(
        &self,
        assembly: &dyn MigrationsAssembly,
        root_namespace: &str,
        sub_namespace: Option<&str>,
    ) -> String {
        let namespace = join_namespace(root_namespace, sub_namespace.unwrap_or(DEFAULT_SUB_NAMESPACE));
        let owner_name = self.owner.full_name();

        let foreign = assembly.types().into_iter().any(|ty| {
            ty.kind == TypeKind::Migration
                && ty.namespace == namespace
                && ty.model_owner.as_deref().is_some_and(|owner| owner != owner_name)
        });
        if !foreign {
            return namespace;
        }

        if sub_namespace.is_some() {
            self.reporter.write_warning(&format!(
                "The namespace '{}' contains migrations for a different model owner. This can result in conflicting type names.",
                namespace
            ));
            return namespace;
        }

        let owner = generic_base(self.owner.type_name());
        let owner = owner.strip_suffix("Context").unwrap_or(owner);
        let renamed = join_namespace(root_namespace, &format!("{}Migrations", owner).to_case(Case::Snake));
        debug!(from = %namespace, to = %renamed, "migrations namespace is taken by another owner");
        renamed
    }

    fn snapshot_type(&self, assembly: &dyn MigrationsAssembly) -> Option<TypeHandle> {
        let owner_name = self.owner.full_name();
        assembly.types().into_iter().rev().find(|ty| {
            ty.kind == TypeKind::ModelSnapshot
                && ty.model_owner.as_deref().is_none_or(|owner| owner == owner_name)
        })
    }

    fn differs(&self, source: Option<&Model>, target: Option<&Model>) -> MigrateResult<bool> {
        let source = source.map(RelationalModel::from_model).transpose()?;
        let target = target.map(RelationalModel::from_model).transpose()?;
        Ok(self.differ.has_differences(source.as_ref(), target.as_ref()))
    }

    fn target_model(&self, assembly: &dyn MigrationsAssembly, ty: &TypeHandle) -> MigrateResult<Option<Model>> {
        let migration = assembly.create_migration(ty, &self.active_provider)?;
        Ok(self.processor.process(migration.target_model(), false))
    }

    /// Remove the last migration and roll the snapshot back.
    ///
    /// A migration that is already applied is only removed with `force`,
    /// after reverting it in the database.
    #[instrument(skip(self, assembly, project_dir), fields(owner = %self.owner.full_name()))]
    pub fn remove_migration(
        &self,
        assembly: &dyn MigrationsAssembly,
        project_dir: &Path,
        root_namespace: Option<&str>,
        force: bool,
        language: Option<&str>,
        dry_run: bool,
    ) -> MigrateResult<RemovedMigration> {
        let snapshot = assembly.model_snapshot().ok_or(MigrationError::NoSnapshot)?;
        let generator = self.generators.select(language)?;
        let ext = generator.file_extension();

        let migrations = assembly.migrations();
        let ordered: Vec<(&str, &TypeHandle)> = migrations.iter().collect();
        let mut removed = RemovedMigration::default();

        let model = match ordered.last() {
            None => {
                self.reporter
                    .write_verbose("No migrations were found; removing the model snapshot.");
                None
            }
            Some(&(id, ty)) => {
                let snapshot_model = self.processor.process(Some(snapshot.model()), false);
                let last_model = self.target_model(assembly, ty)?;

                if self.differs(last_model.as_ref(), snapshot_model.as_ref())? {
                    self.reporter.write_verbose(&format!(
                        "The model snapshot and the backing model of the last migration are different. Assuming migration '{}' was manually deleted.",
                        id
                    ));
                    last_model
                } else {
                    let applied = match self.history.get_applied_migrations() {
                        Ok(records) => records.iter().any(|r| r.migration_id.eq_ignore_ascii_case(id)),
                        Err(err) if force => {
                            self.reporter.write_verbose(&format!(
                                "Could not check whether '{}' has been applied, continuing: {}",
                                id, err
                            ));
                            false
                        }
                        Err(err) => return Err(err),
                    };

                    let previous = ordered.len().checked_sub(2).map(|i| ordered[i]);
                    if applied {
                        if !force {
                            return Err(MigrationError::RevertMigration(id.to_string()));
                        }
                        let target = previous.map_or(INITIAL_DATABASE, |(previous_id, _)| previous_id);
                        self.reporter
                            .write_warning(&format!("Reverting migration '{}' from the database.", id));
                        if !dry_run {
                            self.migrator.migrate(assembly, Some(target))?;
                        }
                    }

                    removed.migration_id = Some(id.to_string());
                    removed.migration_file = find_project_file(project_dir, &format!("{}{}", id, ext));
                    removed.metadata_file =
                        find_project_file(project_dir, &format!("{}{}{}", id, DESIGNER_SUFFIX, ext));
                    for path in [&removed.migration_file, &removed.metadata_file].into_iter().flatten() {
                        self.reporter
                            .write_verbose(&format!("Removing file '{}'.", path.display()));
                        if !dry_run {
                            std::fs::remove_file(path)?;
                        }
                    }

                    match previous {
                        Some((_, previous_ty)) => self.target_model(assembly, previous_ty)?,
                        None => None,
                    }
                }
            }
        };

        let (snapshot_name, snapshot_namespace) = match self.snapshot_type(assembly) {
            Some(ty) => (ty.name.clone(), ty.namespace.clone()),
            None => {
                let root = root_namespace.unwrap_or_else(|| self.owner.namespace());
                (
                    default_snapshot_name(self.owner.type_name()),
                    join_namespace(root, DEFAULT_SUB_NAMESPACE),
                )
            }
        };
        let snapshot_file_name = format!("{}{}", snapshot_name, ext);
        let existing = find_project_file(project_dir, &snapshot_file_name);

        match model {
            None => {
                if let Some(path) = &existing {
                    self.reporter
                        .write_verbose(&format!("Removing model snapshot '{}'.", path.display()));
                    if !dry_run {
                        std::fs::remove_file(path)?;
                    }
                }
                removed.snapshot_file = existing;
            }
            Some(model) => {
                let code = generator.generate_snapshot(
                    &snapshot_namespace,
                    &self.owner.full_name(),
                    &snapshot_name,
                    &model,
                )?;
                let path = existing.unwrap_or_else(|| {
                    let root = root_namespace.unwrap_or_else(|| self.owner.namespace());
                    namespace_dir(project_dir, &relative_namespace(root, &snapshot_namespace))
                        .join(&snapshot_file_name)
                });
                if !dry_run {
                    write_file(&path, &code)?;
                }
                self.reporter
                    .write_verbose(&format!("Reverted model snapshot '{}'.", path.display()));
                removed.snapshot_file = Some(path);
                removed.snapshot_code = Some(code);
            }
        }

        info!(migration_id = ?removed.migration_id, dry_run, "removed migration");
        Ok(removed)
    }

    /// Where the three files of `migration` go.
    ///
    /// Migration files are placed next to the previous migration when it
    /// lives outside the namespace directory, and the snapshot replaces
    /// an existing snapshot file wherever it is.
    pub fn files_for(
        &self,
        project_dir: &Path,
        migration: &ScaffoldedMigration,
        output_dir: Option<&Path>,
    ) -> MigrationFiles {
        let ext = &migration.file_extension;
        let previous = migration
            .previous_migration_id
            .as_ref()
            .map(|id| format!("{}{}", id, ext));

        let migration_dir = match output_dir {
            Some(dir) => dir.to_path_buf(),
            None => self.directory(project_dir, previous.as_deref(), &migration.migration_sub_namespace),
        };
        let snapshot_file_name = format!("{}{}", migration.snapshot_name, ext);
        let snapshot_dir = self.directory(
            project_dir,
            Some(&snapshot_file_name),
            &migration.snapshot_sub_namespace,
        );

        MigrationFiles {
            migration_file: migration_dir.join(format!("{}{}", migration.migration_id, ext)),
            metadata_file: migration_dir.join(format!("{}{}{}", migration.migration_id, DESIGNER_SUFFIX, ext)),
            snapshot_file: snapshot_dir.join(snapshot_file_name),
        }
    }

    fn directory(&self, project_dir: &Path, sibling: Option<&str>, sub_namespace: &str) -> PathBuf {
        let default = namespace_dir(project_dir, sub_namespace);
        let Some(sibling) = sibling.filter(|name| !name.starts_with('_')) else {
            return default;
        };
        match find_project_file(project_dir, sibling).and_then(|path| path.parent().map(Path::to_path_buf)) {
            Some(dir) if dir != default => {
                self.reporter.write_verbose(&format!(
                    "Reusing directory of file '{}'.",
                    sibling
                ));
                dir
            }
            _ => default,
        }
    }

    /// Write a scaffolded migration to disk.
    #[instrument(skip(self, migration), fields(migration_id = %migration.migration_id))]
    pub fn save(
        &self,
        project_dir: &Path,
        migration: &ScaffoldedMigration,
        output_dir: Option<&Path>,
        dry_run: bool,
    ) -> MigrateResult<MigrationFiles> {
        let files = self.files_for(project_dir, migration, output_dir);
        if !dry_run {
            write_file(&files.migration_file, &migration.migration_code)?;
            write_file(&files.metadata_file, &migration.metadata_code)?;
            write_file(&files.snapshot_file, &migration.snapshot_code)?;
            debug!(path = %files.migration_file.display(), "saved migration");
        }
        Ok(files)
    }

    /// Asynchronous [`MigrationsScaffolder::save`].
    pub async fn save_async(
        &self,
        project_dir: &Path,
        migration: &ScaffoldedMigration,
        output_dir: Option<&Path>,
        dry_run: bool,
    ) -> MigrateResult<MigrationFiles> {
        let files = self.files_for(project_dir, migration, output_dir);
        if !dry_run {
            for (path, code) in [
                (&files.migration_file, &migration.migration_code),
                (&files.metadata_file, &migration.metadata_code),
                (&files.snapshot_file, &migration.snapshot_code),
            ] {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(path, code).await?;
            }
            debug!(path = %files.migration_file.display(), "saved migration");
        }
        Ok(files)
    }
}

/// `{Owner}ModelSnapshot`, ignoring generic arguments.
pub fn default_snapshot_name(owner_type_name: &str) -> String {
    format!("{}ModelSnapshot", generic_base(owner_type_name))
}

fn generic_base(type_name: &str) -> &str {
    type_name.split('<').next().unwrap_or(type_name)
}

fn join_namespace(root: &str, sub: &str) -> String {
    match (root.is_empty(), sub.is_empty()) {
        (true, _) => sub.to_string(),
        (false, true) => root.to_string(),
        (false, false) => format!("{}::{}", root, sub),
    }
}

fn relative_namespace(root: &str, namespace: &str) -> String {
    if root.is_empty() {
        return namespace.to_string();
    }
    match namespace.strip_prefix(root) {
        Some("") => String::new(),
        Some(rest) => rest.strip_prefix("::").unwrap_or(namespace).to_string(),
        None => namespace.to_string(),
    }
}

fn namespace_dir(project_dir: &Path, sub_namespace: &str) -> PathBuf {
    sub_namespace
        .split("::")
        .filter(|segment| !segment.is_empty())
        .fold(project_dir.to_path_buf(), |dir, segment| dir.join(segment))
}

fn find_project_file(project_dir: &Path, file_name: &str) -> Option<PathBuf> {
    WalkDir::new(project_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| entry.file_type().is_file() && entry.file_name().to_str() == Some(file_name))
        .map(|entry| entry.into_path())
}

fn write_file(path: &Path, contents: &str) -> MigrateResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}
