use chrono::NaiveDate;
use std::path::{Path, PathBuf};

/// Manages the output directory layout (default `gsheet/`).
///
/// Summary tables, breakdown tables and the run-state file all live under a
/// single root. This struct provides accessors for each well-known path and
/// handles initialization.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Create a new DataDir referencing the given root path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory (e.g. `gsheet/`).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the per-metric breakdown tables.
    pub fn breakdown_dir(&self) -> PathBuf {
        self.root.join("max-job-val")
    }

    /// Path to the run-state file.
    pub fn state(&self) -> PathBuf {
        self.root.join("state.json")
    }

    /// Path to the summary table for a day (e.g. `2026-October-17.csv`).
    pub fn summary_table(&self, day: &str) -> PathBuf {
        self.root.join(format!("{day}.csv"))
    }

    /// Initialize the directory structure.
    /// Returns Ok(true) if the root was created, Ok(false) if it already existed.
    pub fn init(&self) -> std::io::Result<bool> {
        let created = !self.root.exists();
        if created {
            tracing::info!(dir = %self.root.display(), "creating output directory");
        }
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.breakdown_dir())?;
        Ok(created)
    }
}

/// Calendar-day key used for table names and run state, e.g. `2026-October-17`.
pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%B-%-d").to_string()
}

/// Today's day key in local time.
pub fn today() -> String {
    day_key(chrono::Local::now().date_naive())
}
