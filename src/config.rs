// ABOUTME: TOML configuration: named environments, defaults, strategy choice
// ABOUTME: Passwords may come from the file or from PGCLONE_*_PASSWORD vars

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::environment::{CloneOptions, Environment, EnvironmentCredentials};

/// Which clone algorithm the orchestrator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneStrategyKind {
    /// pg_dump / pg_restore of the whole database. Carries the schema, so it
    /// works across schema drift.
    Bulk,
    /// Table-by-table delete and copy. Requires compatible schemas.
    Granular,
}

impl Default for CloneStrategyKind {
    fn default() -> Self {
        CloneStrategyKind::Bulk
    }
}

/// Per-run switches applied when the command line does not override them.
#[derive(Debug, Clone, Deserialize)]
pub struct CloneDefaults {
    #[serde(default = "default_true")]
    pub create_backup: bool,
    #[serde(default)]
    pub include_storage: bool,
    #[serde(default)]
    pub anonymize_data: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for CloneDefaults {
    fn default() -> Self {
        Self {
            create_backup: true,
            include_storage: false,
            anonymize_data: false,
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloneConfig {
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentCredentials>,
    #[serde(default)]
    pub defaults: CloneDefaults,
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    #[serde(default)]
    pub strategy: CloneStrategyKind,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            environments: HashMap::new(),
            defaults: CloneDefaults::default(),
            backup_dir: default_backup_dir(),
            strategy: CloneStrategyKind::default(),
        }
    }
}

impl CloneConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Look up a configured environment by name. A password missing from the
    /// file is taken from `PGCLONE_<NAME>_PASSWORD` so secrets can stay out
    /// of version-controlled configs.
    pub fn environment(&self, name: &str) -> Result<Environment> {
        let Some(credentials) = self.environments.get(name) else {
            let mut known: Vec<&str> = self.environments.keys().map(String::as_str).collect();
            known.sort_unstable();
            bail!(
                "unknown environment '{}' (configured: {})",
                name,
                known.join(", ")
            );
        };

        let mut credentials = credentials.clone();
        if !credentials.has_password() {
            if let Ok(password) = std::env::var(password_env_var(name)) {
                if !password.is_empty() {
                    credentials = credentials.with_password(password);
                }
            }
        }
        Ok(Environment::new(name, credentials))
    }

    pub fn environment_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.environments.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn clone_options(&self) -> CloneOptions {
        CloneOptions {
            create_backup: self.defaults.create_backup,
            include_storage: self.defaults.include_storage,
            anonymize_data: self.defaults.anonymize_data,
        }
    }
}

/// `PGCLONE_STAGING_PASSWORD` for an environment named `staging`. Characters
/// that cannot appear in a variable name become underscores.
pub fn password_env_var(environment_name: &str) -> String {
    let upper: String = environment_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("PGCLONE_{}_PASSWORD", upper)
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    1000
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("./backups")
}
