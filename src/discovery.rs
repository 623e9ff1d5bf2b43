use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::LayoutConfig;
use crate::error::{DispatchError, Result};

/// One profile folder with its two input videos
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Folder name, also used to name the output file
    pub unit_id: String,

    /// Leading integer of the folder name, the sort key
    pub number: u64,

    /// Folder location
    pub unit_path: PathBuf,

    /// Screen recording the overlay is drawn on
    pub background: PathBuf,

    /// Avatar video drawn as picture-in-picture
    pub overlay: PathBuf,
}

impl WorkUnit {
    /// Where this unit's composited file goes
    pub fn output_path(&self, output_dir: &Path, extension: &str) -> PathBuf {
        output_dir.join(format!("{}.{}", self.unit_id, extension))
    }
}

/// Parse the leading integer of a folder name such as `12-Jane Doe`.
///
/// The prefix is everything before the first `-`, trimmed, and must be all
/// ASCII digits.
pub fn parse_unit_number(name: &str) -> Option<u64> {
    let prefix = name.split('-').next()?.trim();
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    prefix.parse().ok()
}

/// Scans a root directory for eligible work units
#[derive(Debug, Clone)]
pub struct UnitScanner {
    layout: LayoutConfig,
}

impl UnitScanner {
    pub fn new(layout: LayoutConfig) -> Self {
        Self { layout }
    }

    /// Discover eligible units under `root`, ordered by numeric prefix.
    ///
    /// Fails with [`DispatchError::NoEligibleUnits`] when nothing qualifies.
    pub async fn discover(&self, root: &Path) -> Result<Vec<WorkUnit>> {
        let mut candidates = Vec::new();
        let mut entries = fs::read_dir(root).await?;

        while let Some(entry) = entries.next_entry().await? {
            // follows symlinks so linked profile folders still count
            if !fs::metadata(entry.path()).await.map(|m| m.is_dir()).unwrap_or(false) {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            match parse_unit_number(&name) {
                Some(number) => candidates.push((number, name, entry.path())),
                None => debug!("Ignoring folder without numeric prefix: {}", name),
            }
        }

        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let mut units = Vec::with_capacity(candidates.len());
        for (number, unit_id, unit_path) in candidates {
            match self.resolve_inputs(&unit_path).await {
                Ok(Some((background, overlay))) => units.push(WorkUnit {
                    unit_id,
                    number,
                    unit_path,
                    background,
                    overlay,
                }),
                Ok(None) => warn!(
                    "⏭️ Skipping {}: needs a video in both '{}' and '{}'",
                    unit_id, self.layout.background_dir, self.layout.overlay_dir
                ),
                Err(e) => warn!("⏭️ Skipping {}: could not read its folders: {}", unit_id, e),
            }
        }

        if units.is_empty() {
            return Err(DispatchError::NoEligibleUnits(root.to_path_buf()));
        }

        info!("🔍 Discovered {} eligible units in {}", units.len(), root.display());
        Ok(units)
    }

    /// Errors here only disqualify the one unit, never the batch
    async fn resolve_inputs(&self, unit_path: &Path) -> Result<Option<(PathBuf, PathBuf)>> {
        let background = self.first_media_file(&unit_path.join(&self.layout.background_dir)).await?;
        let overlay = self.first_media_file(&unit_path.join(&self.layout.overlay_dir)).await?;
        Ok(background.zip(overlay))
    }

    /// First supported, non-hidden regular file in `dir` by name, if any
    async fn first_media_file(&self, dir: &Path) -> Result<Option<PathBuf>> {
        if !fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Ok(None);
        }

        let mut files = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            // follows symlinks so linked recordings still count
            let is_file = fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false);

            if is_file && !hidden && self.layout.is_supported_media(&path) {
                files.push(path);
            }
        }

        files.sort();
        Ok(files.into_iter().next())
    }
}
