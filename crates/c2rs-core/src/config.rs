//! Control-directory layout and JSON config loading.
//!
//! Everything c2rs persists lives under `<project_root>/.c2rs/`:
//!
//! ```text
//! .c2rs/
//!   config.json      root_symbols, disabled_libraries, additional_notes
//!   run_state.json   upstream phase gate (read-only here)
//!   progress.json    resume and audit records
//!   repairs/<run_id>/repair.json + repair.digest
//! ```

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::domain::{C2rsError, Result, RunState};

pub const CONTROL_DIR: &str = ".c2rs";
pub const CONFIG_FILE: &str = "config.json";
pub const RUN_STATE_FILE: &str = "run_state.json";
pub const PROGRESS_FILE: &str = "progress.json";
pub const REPAIRS_DIR: &str = "repairs";

/// Resolved paths for one migration project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    pub root: PathBuf,
    pub crate_dir: PathBuf,
}

impl ProjectLayout {
    /// `crate_dir` defaults to the project root.
    pub fn new(root: impl Into<PathBuf>, crate_dir: Option<PathBuf>) -> Self {
        let root = root.into();
        let crate_dir = match crate_dir {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => root.join(dir),
            None => root.clone(),
        };
        Self { root, crate_dir }
    }

    pub fn control_dir(&self) -> PathBuf {
        self.root.join(CONTROL_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.control_dir().join(CONFIG_FILE)
    }

    pub fn run_state_path(&self) -> PathBuf {
        self.control_dir().join(RUN_STATE_FILE)
    }

    pub fn progress_path(&self) -> PathBuf {
        self.control_dir().join(PROGRESS_FILE)
    }

    pub fn repairs_dir(&self) -> PathBuf {
        self.control_dir().join(REPAIRS_DIR)
    }
}

/// `config.json`, read once at the start of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub root_symbols: Vec<String>,
    /// Denylist for library replacement, compared case-insensitively.
    pub disabled_libraries: Vec<String>,
    /// Appended to every oracle prompt.
    pub additional_notes: String,
}

impl ProjectConfig {
    /// Lenient load: a missing, unreadable or non-object file yields defaults.
    pub fn load(path: &Path) -> Self {
        match Self::load_strict(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable config");
                Self::default()
            }
        }
    }

    /// Missing file or non-object content still yields defaults; malformed
    /// JSON is [`C2rsError::InvalidConfig`].
    pub fn load_strict(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| C2rsError::InvalidConfig(format!("{}: {e}", path.display())))?;
        if !value.is_object() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
            .map_err(|e| C2rsError::InvalidConfig(format!("{}: {e}", path.display())))
    }
}

/// Read `run_state.json`. Missing or malformed files read as "nothing completed".
pub fn load_run_state(path: &Path) -> RunState {
    match read_json::<RunState>(path) {
        Ok(Some(state)) => state,
        Ok(None) => RunState::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable run state");
            RunState::default()
        }
    }
}

/// Deserialize a JSON file, `None` when it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write pretty JSON through a sibling temp file and rename it into place.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state.json".to_string());
    let tmp = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    let json = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp, &json)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
