use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scratchpad::Scratchpad;
use crate::storage;
use crate::task::TaskDefinition;

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_WORK_DIR: &str = "./output";
pub const DEFAULT_POOL: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum LogLevel {
    #[serde(rename = "trace", alias = "TRACE")]
    Trace,
    #[serde(rename = "debug", alias = "DEBUG")]
    Debug,
    #[serde(rename = "info", alias = "INFO")]
    Info,
    #[serde(rename = "success", alias = "SUCCESS")]
    Success,
    #[serde(rename = "warning", alias = "WARNING")]
    Warning,
    #[serde(rename = "error", alias = "ERROR")]
    Error,
    #[serde(rename = "critical", alias = "CRITICAL")]
    Critical,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    // tracing has no SUCCESS or CRITICAL; they collapse onto the nearest
    // level when building the filter.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info | LogLevel::Success => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "pis", version, about = "Data-acquisition pipeline runner")]
pub struct Cli {
    /// Step to execute (environment variable: PIS_STEP)
    #[arg(long, env = "PIS_STEP")]
    pub step: String,

    /// Recipe file, resolved against the work dir (environment variable: PIS_CONFIG_FILE) (default: config.yaml)
    #[arg(long, env = "PIS_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Directory produced files land in (environment variable: PIS_WORK_DIR) (default: ./output)
    #[arg(long, env = "PIS_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Remote prefix resources are published under, e.g. gs://bucket/path (environment variable: PIS_REMOTE_URI)
    #[arg(long, env = "PIS_REMOTE_URI")]
    pub remote_uri: Option<String>,

    /// Worker pool size (environment variable: PIS_POOL) (default: 5)
    #[arg(long, env = "PIS_POOL")]
    pub pool: Option<usize>,

    /// Log level (environment variable: PIS_LOG_LEVEL) (default: info)
    #[arg(long, env = "PIS_LOG_LEVEL", value_enum, ignore_case = true)]
    pub log_level: Option<LogLevel>,
}

/// Top-level recipe structure: task definitions per step, scratchpad seed
/// values, and optional settings overrides.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub steps: BTreeMap<String, Vec<TaskDefinition>>,
    #[serde(default)]
    pub scratchpad: BTreeMap<String, Value>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub remote_uri: Option<String>,
    #[serde(default)]
    pub pool: Option<usize>,
    #[serde(default)]
    pub log_level: Option<LogLevel>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let file: ConfigFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config YAML: {}", path.display()))?;
        Ok(file)
    }
}

/// Process-wide immutable configuration. CLI (and env, folded in by clap)
/// overrides YAML overrides defaults; unset fields fall through.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub step: String,
    pub config_file: PathBuf,
    pub work_dir: PathBuf,
    pub remote_uri: Option<String>,
    pub pool: usize,
    pub log_level: LogLevel,
}

impl Settings {
    pub fn resolve(cli: &Cli, config_file: PathBuf, file: &ConfigFile) -> Result<Self> {
        let step = cli.step.clone();
        if step.is_empty() {
            bail!("--step must be a non-empty step name");
        }
        if !file.steps.contains_key(&step) {
            bail!(
                "step '{}' not found in {}. Known steps: {}",
                step,
                config_file.display(),
                file.steps.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        }

        let remote_uri = cli.remote_uri.clone().or_else(|| file.remote_uri.clone());
        if let Some(uri) = &remote_uri
            && !storage::scheme_supported(uri)
        {
            bail!("remote uri '{uri}' must use a supported scheme such as gs://bucket/path");
        }

        let pool = cli.pool.or(file.pool).unwrap_or(DEFAULT_POOL);
        if pool == 0 {
            bail!("pool size must be a positive integer");
        }

        Ok(Self {
            step,
            config_file,
            work_dir: cli
                .work_dir
                .clone()
                .or_else(|| file.work_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR)),
            remote_uri,
            pool,
            log_level: cli.log_level.or(file.log_level).unwrap_or(LogLevel::Info),
        })
    }

    pub fn summary(&self) -> String {
        format!(
            "step={} work_dir={} remote_uri={} pool={} log_level={}",
            self.step,
            self.work_dir.display(),
            self.remote_uri.as_deref().unwrap_or("-"),
            self.pool,
            self.log_level.as_str()
        )
    }
}

static SETTINGS: OnceCell<Settings> = OnceCell::new();
static TASK_DEFINITIONS: OnceCell<Vec<TaskDefinition>> = OnceCell::new();
static SCRATCHPAD: OnceCell<Scratchpad> = OnceCell::new();

/// Called exactly once at startup: merges CLI/env/YAML, validates, freezes
/// the result, and seeds the scratchpad. Any error here is fatal.
pub fn init_config(cli: Cli) -> Result<&'static Settings> {
    // The config file is found via the work dir known before YAML overrides;
    // YAML may still relocate outputs but not the file it was loaded from.
    let pre_work_dir = cli
        .work_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR));
    let config_file = cli
        .config_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config_file = if config_file.is_absolute() {
        config_file
    } else {
        pre_work_dir.join(config_file)
    };

    let file = ConfigFile::load(&config_file)?;
    let settings = Settings::resolve(&cli, config_file, &file)?;

    let definitions = file
        .steps
        .get(&settings.step)
        .cloned()
        .unwrap_or_default();
    for definition in &definitions {
        if definition.name.trim().is_empty() {
            bail!("every task definition requires a non-empty name");
        }
    }

    let mut pad = Scratchpad::new();
    for (key, value) in &file.scratchpad {
        pad.store(key.clone(), value.clone());
    }

    let settings = SETTINGS.get_or_init(|| settings);
    TASK_DEFINITIONS.get_or_init(|| definitions);
    SCRATCHPAD.get_or_init(|| pad);
    Ok(settings)
}

/// Frozen settings; the same instance on every call after `init_config`.
pub fn settings() -> &'static Settings {
    SETTINGS.get().expect("init_config must run first")
}

pub fn task_definitions() -> &'static [TaskDefinition] {
    TASK_DEFINITIONS
        .get()
        .map(Vec::as_slice)
        .expect("init_config must run first")
}

pub fn scratchpad() -> &'static Scratchpad {
    SCRATCHPAD.get().expect("init_config must run first")
}
