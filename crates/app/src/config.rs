use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use kasa_import::CategorizerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("could not determine the platform config directory")]
    NoConfigDir,
    #[error("fio token missing: set [fio] token in the config file")]
    MissingToken,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FioConfig {
    pub token: Option<String>,
    pub base_url: Option<String>,
}

/// Application configuration, read from `config.toml` in the platform config
/// directory (or wherever `--config` points).
///
/// ```toml
/// database = "/home/me/.local/share/kasa/kasa.db"
///
/// [fio]
/// token = "..."
///
/// [categorizer]
/// default_confidence = 0.2
/// [categorizer.default_category]
/// id = "uncategorized"
/// name = "Uncategorized"
/// [[categorizer.rules]]
/// keyword = "UBER"
/// confidence = 0.9
/// [categorizer.rules.category]
/// id = "transport"
/// name = "Transportation"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    pub database: Option<String>,
    #[serde(default)]
    pub fio: FioConfig,
    #[serde(default)]
    pub categorizer: Option<CategorizerConfig>,
}

impl AppConfig {
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };

        // An explicit --config that does not exist is an error; the default
        // location is allowed to be absent.
        if !path.exists() {
            if explicit.is_some() {
                return Err(ConfigError::NotFound(path));
            }
            return Ok(AppConfig::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path,
            message: e.to_string(),
        })
    }

    /// Sqlite connection string, defaulting to the platform data directory.
    pub fn database_url(&self) -> Result<String, ConfigError> {
        if let Some(db) = &self.database {
            return Ok(format!("sqlite:{db}?mode=rwc"));
        }
        let dirs = project_dirs()?;
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).map_err(|source| ConfigError::Read {
            path: data_dir.to_path_buf(),
            source,
        })?;
        Ok(format!(
            "sqlite:{}?mode=rwc",
            data_dir.join("kasa.db").display()
        ))
    }

    pub fn fio_token(&self) -> Result<&str, ConfigError> {
        self.fio.token.as_deref().ok_or(ConfigError::MissingToken)
    }

    pub fn categorizer(&self) -> CategorizerConfig {
        self.categorizer.clone().unwrap_or_default()
    }
}

fn project_dirs() -> Result<directories::ProjectDirs, ConfigError> {
    directories::ProjectDirs::from("cz", "kasa", "Kasa").ok_or(ConfigError::NoConfigDir)
}

fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}
