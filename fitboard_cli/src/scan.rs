use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Activity files at or below this size hold no samples.
pub const EMPTY_FIT_BYTES: u64 = 584;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanParams {
    pub empty_fit_bytes: u64,
    /// Files still being written by the recorder.
    pub skip_prefix: String,
    pub include_empty: bool,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            empty_fit_bytes: EMPTY_FIT_BYTES,
            skip_prefix: "inProgress".to_string(),
            include_empty: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityFile {
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl ActivityFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// `~/Documents/Zwift/Activities`, when a home directory is known.
pub fn default_activity_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join("Documents")
            .join("Zwift")
            .join("Activities")
    })
}

/// `*.fit` files in `dir`, sorted by path.
pub fn scan_activity_dir(dir: &Path, params: &ScanParams) -> Result<Vec<ActivityFile>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("{} is not a valid folder", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        let path = entry.path();
        let is_fit = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("fit"));
        if !is_fit || !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&params.skip_prefix) {
            debug!("skipping in-progress file {}", name);
            continue;
        }
        let size_bytes = entry
            .metadata()
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len();
        if !params.include_empty && size_bytes <= params.empty_fit_bytes {
            continue;
        }
        files.push(ActivityFile { path, size_bytes });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
