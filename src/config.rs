#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    net::IpAddr,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_FETCHTUBE_PORT: u16 = 8000;
pub const DEFAULT_FETCHTUBE_HOST: &str = "127.0.0.1";
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";
pub const DEFAULT_FFMPEG_BIN: &str = "ffmpeg";
pub const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_TRANSCODE_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_SOCKET_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HEIGHT: u32 = 720;
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const TEMP_SUBDIR: &str = "fetchtube";

/// Deadlines for the three subprocess stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub extract: Duration,
    pub fetch: Duration,
    pub transcode: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            extract: Duration::from_secs(DEFAULT_EXTRACT_TIMEOUT_SECS),
            fetch: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            transcode: Duration::from_secs(DEFAULT_TRANSCODE_TIMEOUT_SECS),
        }
    }
}

/// Everything a pipeline stage needs to know about its environment. Built
/// once at startup and handed to every stage explicitly.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub ytdlp_bin: PathBuf,
    pub ffmpeg_bin: PathBuf,
    pub temp_root: PathBuf,
    pub user_agent: String,
    pub socket_timeout: Duration,
    pub timeouts: StageTimeouts,
    pub default_height: u32,
}

impl PipelineConfig {
    /// Defaults rooted at `temp_root`, mainly useful for tests and the CLI.
    pub fn with_temp_root(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            ytdlp_bin: PathBuf::from(DEFAULT_YTDLP_BIN),
            ffmpeg_bin: PathBuf::from(DEFAULT_FFMPEG_BIN),
            temp_root: temp_root.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            socket_timeout: Duration::from_secs(DEFAULT_SOCKET_TIMEOUT_SECS),
            timeouts: StageTimeouts::default(),
            default_height: DEFAULT_HEIGHT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub pipeline: PipelineConfig,
}

impl RuntimeConfig {
    pub fn listen_host(&self) -> Result<IpAddr> {
        self.host
            .parse::<IpAddr>()
            .with_context(|| format!("FETCHTUBE_HOST is not an IP address: {}", self.host))
    }
}

pub fn load_runtime_config() -> Result<RuntimeConfig> {
    resolve_runtime_config(RuntimeOverrides::default())
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub temp_root: Option<PathBuf>,
    pub ytdlp_bin: Option<PathBuf>,
    pub ffmpeg_bin: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_config_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimeConfig> {
    build_runtime_config_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);
    let lookup_secs = |key: &str, default: u64| {
        let secs = lookup(key)
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(default);
        Duration::from_secs(secs)
    };

    let host = overrides
        .host
        .and_then(non_blank)
        .or_else(|| lookup("FETCHTUBE_HOST"))
        .unwrap_or_else(|| DEFAULT_FETCHTUBE_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup("FETCHTUBE_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_FETCHTUBE_PORT);
    let temp_root = overrides
        .temp_root
        .or_else(|| lookup("FETCHTUBE_TEMP_DIR").map(PathBuf::from))
        .unwrap_or_else(|| env::temp_dir().join(TEMP_SUBDIR));
    if temp_root.as_os_str().is_empty() {
        return Err(anyhow!("FETCHTUBE_TEMP_DIR must not be empty"));
    }
    let ytdlp_bin = overrides
        .ytdlp_bin
        .or_else(|| lookup("YTDLP_BIN").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BIN));
    let ffmpeg_bin = overrides
        .ffmpeg_bin
        .or_else(|| lookup("FFMPEG_BIN").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG_BIN));
    let user_agent =
        lookup("FETCHTUBE_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
    let default_height = lookup("FETCHTUBE_DEFAULT_HEIGHT")
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|height| *height > 0)
        .unwrap_or(DEFAULT_HEIGHT);
    let cors_origins = lookup("FETCHTUBE_CORS_ORIGINS")
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(RuntimeConfig {
        host,
        port,
        cors_origins,
        pipeline: PipelineConfig {
            ytdlp_bin,
            ffmpeg_bin,
            temp_root,
            user_agent,
            socket_timeout: lookup_secs(
                "FETCHTUBE_SOCKET_TIMEOUT_SECS",
                DEFAULT_SOCKET_TIMEOUT_SECS,
            ),
            timeouts: StageTimeouts {
                extract: lookup_secs(
                    "FETCHTUBE_EXTRACT_TIMEOUT_SECS",
                    DEFAULT_EXTRACT_TIMEOUT_SECS,
                ),
                fetch: lookup_secs("FETCHTUBE_FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS),
                transcode: lookup_secs(
                    "FETCHTUBE_TRANSCODE_TIMEOUT_SECS",
                    DEFAULT_TRANSCODE_TIMEOUT_SECS,
                ),
            },
            default_height,
        },
    })
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .and_then(non_blank)
}

/// Reads `KEY=value` pairs, tolerating `export`, quotes and comments.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
