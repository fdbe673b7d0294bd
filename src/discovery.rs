//! Locate snapshot files for a run in the metrics directory.

use std::path::{Path, PathBuf};

/// Find files whose name contains both `run_id` and one of `tags`.
///
/// Results are grouped by tag in the order given, sorted by name within a
/// tag, and a file matching several tags is listed once.
pub fn discover(dir: &Path, run_id: &str, tags: &[String]) -> Result<Vec<PathBuf>, DiscoveryError> {
    if !dir.is_dir() {
        return Err(DiscoveryError::MissingDir {
            path: dir.to_path_buf(),
        });
    }
    let pattern = format!("{}/*", glob::Pattern::escape(&dir.to_string_lossy()));
    let entries = glob::glob(&pattern).map_err(|e| DiscoveryError::Pattern {
        pattern: pattern.clone(),
        source: e,
    })?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable entry in metrics directory");
                None
            }
        })
        .filter(|path| path.is_file())
        .filter(|path| file_name(path).contains(run_id))
        .collect();
    candidates.sort();

    let mut found: Vec<PathBuf> = Vec::new();
    for tag in tags {
        let before = found.len();
        for path in candidates.iter().filter(|p| file_name(p).contains(tag.as_str())) {
            if !found.contains(path) {
                found.push(path.clone());
            }
        }
        if found.len() == before {
            tracing::info!(tag = %tag, run_id, "no snapshot file found");
        }
    }
    Ok(found)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Errors from file discovery.
#[derive(Debug)]
pub enum DiscoveryError {
    /// The metrics directory does not exist.
    MissingDir { path: PathBuf },
    /// The directory path could not be turned into a listing pattern.
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::MissingDir { path } => {
                write!(f, "metrics directory {} does not exist", path.display())
            }
            DiscoveryError::Pattern { pattern, source } => {
                write!(f, "invalid listing pattern '{pattern}': {source}")
            }
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiscoveryError::MissingDir { .. } => None,
            DiscoveryError::Pattern { source, .. } => Some(source),
        }
    }
}
