//! Configuration for narrator.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (NARRATOR_HOME, NARRATOR_DB, NARRATOR_TTS_ENDPOINT,
//!    NARRATOR_TTS_API_KEY, NARRATOR_MIXER_ENDPOINT)
//! 2. Config file (.narrator/config.yaml)
//! 3. Defaults (~/.narrator)
//!
//! Config file discovery:
//! - Searches current directory and parents for .narrator/config.yaml
//! - `paths.home` is relative to the .narrator/ directory
//! - `paths.database` and `seeds` are relative to the project root

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::{MixerConfig, TtsConfig};
use crate::core::WorkerSettings;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".narrator";
const DATABASE_FILE: &str = "narrator.db";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub worker: Option<WorkerSettings>,
    #[serde(default)]
    pub tts: Option<TtsConfig>,
    #[serde(default)]
    pub mixer: Option<MixerConfig>,
    /// Seed list used by `reset`
    #[serde(default)]
    pub seeds: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .narrator/)
    pub home: Option<String>,
    /// SQLite database file (relative to project root)
    pub database: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to narrator home (state)
    pub home: PathBuf,
    /// Absolute path to the SQLite database holding meditations and jobs
    pub database: PathBuf,
    pub worker: WorkerSettings,
    pub tts: TtsConfig,
    pub mixer: MixerConfig,
    /// Seed file for `reset`, if configured
    pub seeds_file: Option<PathBuf>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Load configuration from all sources, discovering the config file from `start`
fn load_config_from(start: &Path) -> Result<ResolvedConfig> {
    // Default home directory
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let config_file = find_config_file(start);

    let (home, database, worker, mut tts, mut mixer, seeds_file) =
        if let Some(ref config_path) = config_file {
            let config = load_config_file(config_path)?;

            let narrator_dir = config_path.parent().unwrap_or(Path::new("."));
            // Project root is the parent of .narrator/
            let base_dir = narrator_dir.parent().unwrap_or(Path::new("."));

            let home = if let Some(env_home) = env_var("NARRATOR_HOME") {
                PathBuf::from(env_home)
            } else if let Some(ref home_path) = config.paths.home {
                resolve_path(narrator_dir, home_path)
            } else {
                default_home.clone()
            };

            let database = if let Some(env_db) = env_var("NARRATOR_DB") {
                PathBuf::from(env_db)
            } else if let Some(ref db_path) = config.paths.database {
                resolve_path(base_dir, db_path)
            } else {
                home.join(DATABASE_FILE)
            };

            let seeds_file = config.seeds.as_deref().map(|s| resolve_path(base_dir, s));

            (
                home,
                database,
                config.worker.unwrap_or_default(),
                config.tts.unwrap_or_default(),
                config.mixer.unwrap_or_default(),
                seeds_file,
            )
        } else {
            // No config file - use env vars or defaults
            let home = env_var("NARRATOR_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| default_home.clone());

            let database = env_var("NARRATOR_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(DATABASE_FILE));

            (
                home,
                database,
                WorkerSettings::default(),
                TtsConfig::default(),
                MixerConfig::default(),
                None,
            )
        };

    if let Some(endpoint) = env_var("NARRATOR_TTS_ENDPOINT") {
        tts.endpoint = Some(endpoint);
    }
    if let Some(key) = env_var("NARRATOR_TTS_API_KEY") {
        tts.api_key = Some(key);
    }
    if let Some(endpoint) = env_var("NARRATOR_MIXER_ENDPOINT") {
        mixer.endpoint = Some(endpoint);
    }

    worker.validate().with_context(|| match config_file {
        Some(ref path) => format!("Invalid worker settings in {}", path.display()),
        None => "Invalid worker settings".to_string(),
    })?;

    Ok(ResolvedConfig {
        home,
        database,
        worker,
        tts,
        mixer,
        seeds_file,
        config_file,
    })
}

fn load_config() -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    load_config_from(&cwd)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}
