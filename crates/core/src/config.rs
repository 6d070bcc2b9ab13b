use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "riffusion.toml";
const ENV_CONFIG_PATH: &str = "RIFFUSION_CONFIG";

pub const DEFAULT_ENDPOINT: &str = "https://www.riffusion.com/api/baseten";
pub const DEFAULT_USER_AGENT: &str = concat!(
    "riffusion-interp/",
    env!("CARGO_PKG_VERSION"),
    " (personal interpolation script; one request at a time)"
);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub retry: RetryConfig,
    pub assembler: AssemblerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub delay_ms: u64,
    /// Absent means retry forever.
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Explicit ffmpeg binary; when absent it is located next to the executable or on PATH.
    pub program: Option<PathBuf>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout_secs: 15,
            request_timeout_secs: 300,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_ms: 5_000,
            max_attempts: None,
        }
    }
}

impl AppConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config TOML: {}", path.display()))
    }
}

/// Resolve the config file path with 3-tier priority:
/// 1. CLI override if provided
/// 2. RIFFUSION_CONFIG environment variable
/// 3. Default: ./riffusion.toml
pub fn config_path(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        return path.to_path_buf();
    }

    if let Some(env_path) = env::var_os(ENV_CONFIG_PATH) {
        return PathBuf::from(env_path);
    }

    PathBuf::from(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.remote.endpoint, "https://www.riffusion.com/api/baseten");
        assert!(cfg.remote.user_agent.starts_with("riffusion-interp/"));
        assert_eq!(cfg.remote.connect_timeout_secs, 15);
        assert_eq!(cfg.remote.request_timeout_secs, 300);
        assert_eq!(cfg.retry.delay_ms, 5_000);
        assert_eq!(cfg.retry.max_attempts, None);
        assert_eq!(cfg.assembler.program, None);
    }

    #[test]
    fn toml_roundtrip_preserves_values() {
        let original = AppConfig {
            retry: RetryConfig {
                delay_ms: 10,
                max_attempts: Some(3),
            },
            assembler: AssemblerConfig {
                program: Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg")),
            },
            ..Default::default()
        };
        let encoded = toml::to_string_pretty(&original).expect("serialize config");
        let decoded: AppConfig = toml::from_str(&encoded).expect("deserialize config");
        assert_eq!(decoded, original);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("riffusion.toml");
        fs::write(&path, "[retry]\nmax_attempts = 2\n").expect("write config");

        let loaded = AppConfig::load_from_path(&path).expect("load partial config");

        assert_eq!(loaded.retry.max_attempts, Some(2));
        assert_eq!(loaded.retry.delay_ms, 5_000);
        assert_eq!(loaded.remote, RemoteConfig::default());
    }

    #[test]
    fn load_from_nonexistent_or_empty_file_returns_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.toml");
        assert_eq!(
            AppConfig::load_from_path(&missing).expect("missing file"),
            AppConfig::default()
        );

        let empty = dir.path().join("empty.toml");
        fs::write(&empty, "  \n").expect("write empty config");
        assert_eq!(
            AppConfig::load_from_path(&empty).expect("empty file"),
            AppConfig::default()
        );
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[retry\ndelay_ms = ").expect("write broken config");

        let err = AppConfig::load_from_path(&path).expect_err("broken TOML");
        assert!(
            format!("{err:#}").contains("failed to parse config TOML"),
            "error: {err:#}"
        );
    }

    #[test]
    fn config_path_prefers_cli_then_env_then_default() {
        assert_eq!(
            config_path(Some(Path::new("/custom.toml"))),
            PathBuf::from("/custom.toml")
        );

        let previous = env::var_os(ENV_CONFIG_PATH);
        env::set_var(ENV_CONFIG_PATH, "/env/riffusion.toml");
        let from_env = config_path(None);
        env::remove_var(ENV_CONFIG_PATH);
        let fallback = config_path(None);
        if let Some(value) = previous {
            env::set_var(ENV_CONFIG_PATH, value);
        }

        assert_eq!(from_env, PathBuf::from("/env/riffusion.toml"));
        assert_eq!(fallback, PathBuf::from("riffusion.toml"));
    }
}
