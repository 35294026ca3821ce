//! Path helpers and the single direct file write the core performs.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::Result;

/// `path` relative to `crate_dir` with `/` separators.
///
/// Paths outside the crate are returned unchanged.
pub fn relative_path(crate_dir: &Path, path: &Path) -> String {
    let relative = if path.is_absolute() {
        path.strip_prefix(crate_dir)
            .ok()
            .map(Path::to_path_buf)
            .or_else(|| {
                let root = crate_dir.canonicalize().ok()?;
                let full = path.canonicalize().ok()?;
                full.strip_prefix(root).ok().map(Path::to_path_buf)
            })
            .unwrap_or_else(|| path.to_path_buf())
    } else {
        path.to_path_buf()
    };
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Make sure `module` exists so the agent has a file to fill in.
///
/// Never overwrites an existing file. Returns the absolute path.
pub fn ensure_placeholder(crate_dir: &Path, module: &Path) -> Result<PathBuf> {
    let full = if module.is_absolute() {
        module.to_path_buf()
    } else {
        crate_dir.join(module)
    };
    if !full.exists() {
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full, "")?;
        debug!(path = %full.display(), "created empty module placeholder");
    }
    Ok(full)
}
