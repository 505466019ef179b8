//! Configuration file parsing for `kiln.toml`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{ModelError, ModelResult};

/// Main configuration structure for `kiln.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KilnConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Migration scaffolding settings.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// In-memory compiler settings.
    #[serde(default)]
    pub compiler: CompilerConfig,

    /// Debug/logging settings.
    #[serde(default)]
    pub debug: DebugConfig,

    /// Environment-specific overrides.
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentOverride>,
}

impl KilnConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> ModelResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ModelError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ModelResult<Self> {
        let expanded = expand_env_vars(content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| ModelError::TomlError { source: e })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ModelResult<()> {
        if self.migrations.root_namespace.trim().is_empty() {
            return Err(ModelError::ConfigError {
                message: "migrations.root_namespace must not be empty".to_string(),
            });
        }
        if self.migrations.language.trim().is_empty() {
            return Err(ModelError::ConfigError {
                message: "migrations.language must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Get the database URL.
    pub fn database_url(&self) -> Option<&str> {
        self.database.url.as_deref()
    }

    /// Apply environment-specific overrides.
    pub fn with_environment(mut self, env: &str) -> Self {
        if let Some(overrides) = self.environments.remove(env) {
            if let Some(db) = overrides.database {
                if let Some(url) = db.url {
                    self.database.url = Some(url);
                }
                if let Some(provider) = db.provider {
                    self.database.provider = provider;
                }
            }
            if let Some(migrations) = overrides.migrations {
                if let Some(persist) = migrations.persist {
                    self.migrations.persist = persist;
                }
                if let Some(dry_run) = migrations.dry_run {
                    self.migrations.dry_run = dry_run;
                }
                if let Some(output_dir) = migrations.output_dir {
                    self.migrations.output_dir = Some(output_dir);
                }
            }
            if let Some(debug) = overrides.debug {
                if let Some(log_level) = debug.log_level {
                    self.debug.log_level = log_level;
                }
            }
        }
        self
    }
}

/// Database configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Database provider.
    #[serde(default)]
    pub provider: DatabaseProvider,

    /// Connection URL (supports `${ENV_VAR}` interpolation).
    pub url: Option<String>,
}

/// Supported database providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseProvider {
    /// PostgreSQL.
    #[default]
    #[serde(alias = "postgres")]
    PostgreSql,
    /// MySQL / MariaDB.
    MySql,
    /// SQLite.
    #[serde(alias = "sqlite3")]
    Sqlite,
}

impl DatabaseProvider {
    /// Active provider name as stamped onto migrations.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostgreSql => "postgresql",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }
}

/// Migration scaffolding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationsConfig {
    /// Root module path of the application.
    #[serde(default = "default_root_namespace")]
    pub root_namespace: String,

    /// Sub-module for migrations; `migrations` when unset.
    pub sub_namespace: Option<String>,

    /// Generated source language.
    #[serde(default = "default_language")]
    pub language: String,

    /// Project directory that generated files are placed under.
    #[serde(default = "default_project_dir")]
    pub project_dir: String,

    /// Explicit output directory, relative to `project_dir`.
    pub output_dir: Option<String>,

    /// Write generated files to disk.
    #[serde(default)]
    pub persist: bool,

    /// Generate and compile but do not apply.
    #[serde(default)]
    pub dry_run: bool,

    /// Migration history table name.
    #[serde(default = "default_history_table")]
    pub history_table: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            root_namespace: default_root_namespace(),
            sub_namespace: None,
            language: default_language(),
            project_dir: default_project_dir(),
            output_dir: None,
            persist: false,
            dry_run: false,
            history_table: default_history_table(),
        }
    }
}

fn default_root_namespace() -> String { "app".to_string() }
fn default_language() -> String { "rust".to_string() }
fn default_project_dir() -> String { ".".to_string() }
fn default_history_table() -> String { "__kiln_migrations_history".to_string() }

/// In-memory compiler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CompilerConfig {
    /// Module name prefixes admitted into the base reference set.
    #[serde(default = "default_reference_prefixes")]
    pub reference_prefixes: Vec<String>,

    /// Diagnostic ids that never surface.
    #[serde(default = "default_suppressed_diagnostics")]
    pub suppressed_diagnostics: Vec<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            reference_prefixes: default_reference_prefixes(),
            suppressed_diagnostics: default_suppressed_diagnostics(),
        }
    }
}

fn default_reference_prefixes() -> Vec<String> {
    ["std", "core", "alloc", "kiln", "kiln_"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_suppressed_diagnostics() -> Vec<String> {
    vec![
        "reference_version_mismatch".to_string(),
        "unused_import".to_string(),
    ]
}

/// Debug/logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DebugConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }

/// Environment-specific configuration overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentOverride {
    pub database: Option<DatabaseOverride>,
    pub migrations: Option<MigrationsOverride>,
    pub debug: Option<DebugOverride>,
}

/// Database configuration overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseOverride {
    pub url: Option<String>,
    pub provider: Option<DatabaseProvider>,
}

/// Migration configuration overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationsOverride {
    pub persist: Option<bool>,
    pub dry_run: Option<bool>,
    pub output_dir: Option<String>,
}

/// Debug configuration overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DebugOverride {
    pub log_level: Option<String>,
}

/// Expand environment variables in the format `${VAR_NAME}`.
///
/// Unset variables are left as written.
fn expand_env_vars(content: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return content.to_string();
    };

    re.replace_all(content, |caps: &regex_lite::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KilnConfig::default();
        assert_eq!(config.database.provider, DatabaseProvider::PostgreSql);
        assert_eq!(config.migrations.language, "rust");
        assert_eq!(config.migrations.root_namespace, "app");
        assert!(!config.migrations.persist);
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [database]
            provider = "postgres"
            url = "postgres://localhost/blog"

            [migrations]
            root_namespace = "blog"
        "#;

        let config = KilnConfig::from_str(toml).unwrap();
        assert_eq!(config.database_url(), Some("postgres://localhost/blog"));
        assert_eq!(config.migrations.root_namespace, "blog");
        assert_eq!(config.migrations.sub_namespace, None);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let toml = r#"
            [migrations]
            namespace = "blog"
        "#;
        assert!(matches!(
            KilnConfig::from_str(toml),
            Err(ModelError::TomlError { .. })
        ));
    }

    #[test]
    fn test_empty_namespace_rejected() {
        let toml = r#"
            [migrations]
            root_namespace = "  "
        "#;
        assert!(matches!(
            KilnConfig::from_str(toml),
            Err(ModelError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_environment_override() {
        let toml = r#"
            [migrations]
            persist = true

            [environments.ci]
            migrations = { persist = false, dry_run = true }
            debug = { log_level = "debug" }
        "#;
        let config = KilnConfig::from_str(toml).unwrap().with_environment("ci");
        assert!(!config.migrations.persist);
        assert!(config.migrations.dry_run);
        assert_eq!(config.debug.log_level, "debug");
    }

    #[test]
    fn test_env_var_expansion() {
        // SAFETY: This test runs single-threaded and we clean up after
        unsafe {
            std::env::set_var("KILN_TEST_DB_URL", "postgres://test");
        }
        let expanded = expand_env_vars("url = \"${KILN_TEST_DB_URL}\" other = \"${KILN_UNSET_VAR}\"");
        assert_eq!(
            expanded,
            "url = \"postgres://test\" other = \"${KILN_UNSET_VAR}\""
        );
        unsafe {
            std::env::remove_var("KILN_TEST_DB_URL");
        }
    }
}
