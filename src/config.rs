use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that overrides `backend.base_url`.
pub const BACKEND_URL_ENV: &str = "PYTHON_SERVICE_URL";

/// Top-level configuration loaded from concierge.toml.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ConciergeConfig {
    pub serve: ServeConfig,
    pub backend: BackendConfig,
    pub script: ScriptConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
}

/// Where the external email-processing service lives.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

/// Companion script launch settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub interpreter: String,
    /// Packaged copy of the script, installed into `work_dir` on first run.
    pub source: PathBuf,
    pub work_dir: PathBuf,
    pub script_name: String,
    pub log_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

// --- Default implementations ---

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout_ms: 3000,
        }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        let interpreter = if cfg!(windows) { "python" } else { "python3" };
        Self {
            interpreter: interpreter.to_string(),
            source: PathBuf::from("python-service").join("email_parser.py"),
            work_dir: std::env::temp_dir().join("email-parser"),
            script_name: "email_parser.py".to_string(),
            log_name: "email_parser.log".to_string(),
        }
    }
}

impl ConciergeConfig {
    /// Load config from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Self::parse(path, &contents)
    }

    fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Apply `PYTHON_SERVICE_URL` if it is set and non-empty.
    pub fn apply_env(&mut self, backend_url: Option<String>) {
        if let Some(url) = backend_url.filter(|u| !u.trim().is_empty()) {
            self.backend.base_url = url;
        }
    }
}
