use std::path::{Path, PathBuf};

use crate::config::ScriptConfig;

/// Layout of the companion script work directory.
///
/// The installed script and its log both live under a single directory
/// (default `<tmp>/email-parser/`).
#[derive(Debug, Clone)]
pub struct ScriptDir {
    root: PathBuf,
    script_name: String,
    log_name: String,
}

impl ScriptDir {
    pub fn new(root: impl Into<PathBuf>, script_name: &str, log_name: &str) -> Self {
        Self {
            root: root.into(),
            script_name: script_name.to_string(),
            log_name: log_name.to_string(),
        }
    }

    pub fn from_config(config: &ScriptConfig) -> Self {
        Self::new(&config.work_dir, &config.script_name, &config.log_name)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    /// Path of the installed script the interpreter is pointed at.
    pub fn script(&self) -> PathBuf {
        self.root.join(&self.script_name)
    }

    /// Path of the append-only output log.
    pub fn log(&self) -> PathBuf {
        self.root.join(&self.log_name)
    }

    /// Create the directory and install the script from `source` if no copy exists yet.
    /// An existing installed script is never rewritten.
    /// Returns Ok(true) if the script was copied, Ok(false) if it was already present.
    pub fn ensure_script(&self, source: &Path) -> std::io::Result<bool> {
        std::fs::create_dir_all(&self.root)?;

        let script = self.script();
        if script.exists() {
            return Ok(false);
        }

        let contents = std::fs::read(source)?;
        std::fs::write(&script, contents)?;
        tracing::info!(
            source = %source.display(),
            script = %script.display(),
            "installed companion script"
        );
        Ok(true)
    }
}
