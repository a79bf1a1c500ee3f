use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_PACE_MS: u64 = 500;
const MIN_PACE_MS: u64 = 400;
const MAX_PACE_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is required")]
    Missing(&'static str),
    #[error("cannot read sources file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid sources file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid .env file: {0}")]
    Dotenv(#[source] dotenvy::Error),
}

#[derive(Debug)]
pub struct Config {
    pub notion_token: String,
    pub database_id: String,
    pub debug: bool,
    pub pace: Duration,
    pub mark_latest: bool,
    pub sources: Sources,
    pub export: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sources {
    #[serde(default)]
    pub amazon: Vec<SourceConfig>,
    #[serde(default)]
    pub cmoa: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub category: String,
    pub url: String,
}

impl SourceConfig {
    fn new(category: &str, url: &str) -> Self {
        Self {
            category: category.to_string(),
            url: url.to_string(),
        }
    }
}

impl Default for Sources {
    fn default() -> Self {
        Self {
            amazon: vec![SourceConfig::new(
                "コミック売れ筋",
                "https://www.amazon.co.jp/gp/bestsellers/books/2278488051",
            )],
            cmoa: vec![
                SourceConfig::new("総合", "https://www.cmoa.jp/search/purpose/ranking/all/"),
                SourceConfig::new("少年マンガ", "https://www.cmoa.jp/search/purpose/ranking/boy/"),
                SourceConfig::new("青年マンガ", "https://www.cmoa.jp/search/purpose/ranking/gentle/"),
                SourceConfig::new("ライトアダルト", "https://www.cmoa.jp/search/purpose/ranking/sexy/"),
            ],
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Reads `.env` (if present) and the process environment.
pub fn from_env() -> Result<Config, ConfigError> {
    optional_dotenv(dotenvy::dotenv())?;
    from_lookup(|key| std::env::var(key).ok())
}

/// An absent `.env` is fine; one that exists but cannot be read or parsed is not.
fn optional_dotenv<T>(loaded: dotenvy::Result<T>) -> Result<(), ConfigError> {
    match loaded {
        Ok(_) => Ok(()),
        Err(dotenvy::Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ConfigError::Dotenv(e)),
    }
}

pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
    let required = |key: &'static str| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing(key))
    };
    let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let notion_token = required("NOTION_TOKEN")?;
    let database_id = required("NOTION_DB")?;

    let pace_ms = optional("RANKING_PACE_MS")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_PACE_MS)
        .clamp(MIN_PACE_MS, MAX_PACE_MS);

    let sources = match optional("RANKING_SOURCES") {
        Some(path) => load_sources(&path)?,
        None => Sources::default(),
    };

    Ok(Config {
        notion_token,
        database_id,
        debug: optional("NOTION_DEBUG").is_some_and(|v| is_truthy(&v)),
        pace: Duration::from_millis(pace_ms),
        mark_latest: optional("RANKING_MARK_LATEST").is_some_and(|v| is_truthy(&v)),
        sources,
        export: optional("RANKING_EXPORT").map(PathBuf::from),
    })
}

pub fn load_sources(path: &str) -> Result<Sources, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    let sources: Sources = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
        path: path.to_string(),
        source,
    })?;
    Ok(sources)
}
