/// Run-state file: iteration counter and spreadsheet id, keyed by calendar day.
///
/// Uses atomic write pattern: write to temp file then rename.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// State recorded for one calendar day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayState {
    /// Last iteration issued (0 = none yet).
    #[serde(default)]
    pub iteration: u64,
    /// Spreadsheet created for this day's summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_id: Option<String>,
}

/// The JSON document stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateData {
    #[serde(default)]
    pub days: BTreeMap<String, DayState>,
}

/// Render an iteration number as its summary-table label.
pub fn iteration_label(n: u64) -> String {
    format!("iteration_{n}")
}

/// Persistent store backed by a single JSON file.
pub struct RunState {
    path: PathBuf,
    data: StateData,
}

impl RunState {
    /// Load state from `path`; a missing file yields empty state.
    pub fn load(path: PathBuf) -> Result<Self, StateError> {
        let data = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| StateError::Parse {
                path: path.clone(),
                source: e,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateData::default(),
            Err(e) => {
                return Err(StateError::Read {
                    path: path.clone(),
                    source: e,
                })
            }
        };
        Ok(Self { path, data })
    }

    pub fn day(&self, day: &str) -> Option<&DayState> {
        self.data.days.get(day)
    }

    /// Increment and persist the day's iteration counter, returning its label.
    pub fn next_iteration(&mut self, day: &str) -> Result<String, StateError> {
        let entry = self.data.days.entry(day.to_string()).or_default();
        entry.iteration += 1;
        let n = entry.iteration;
        self.save()?;
        if n == 1 {
            tracing::info!(day, "no iteration recorded for today, starting at iteration_1");
        }
        Ok(iteration_label(n))
    }

    /// Spreadsheet id previously issued for `day`.
    pub fn sheet_id(&self, day: &str) -> Option<&str> {
        self.day(day).and_then(|d| d.sheet_id.as_deref())
    }

    /// Record and persist the spreadsheet id for `day`.
    pub fn set_sheet_id(&mut self, day: &str, id: &str) -> Result<(), StateError> {
        self.data.days.entry(day.to_string()).or_default().sheet_id = Some(id.to_string());
        self.save()
    }

    /// Atomically write the state file.
    ///
    /// Writes to a temporary file in the same directory, then renames
    /// to ensure readers never see a partial write.
    fn save(&self) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(&self.data)
            .map_err(|e| StateError::Serialize { source: e })?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let tmp_path = dir.join(format!(".state.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StateError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| StateError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }
}

/// Errors from run-state operations.
#[derive(Debug)]
pub enum StateError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::Read { path, source } => {
                write!(f, "failed to read state file {}: {source}", path.display())
            }
            StateError::Parse { path, source } => {
                write!(f, "failed to parse state file {}: {source}", path.display())
            }
            StateError::Serialize { source } => write!(f, "failed to serialize state: {source}"),
            StateError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp state file {}: {source}",
                    path.display()
                )
            }
            StateError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
        }
    }
}

impl std::error::Error for StateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StateError::Read { source, .. } => Some(source),
            StateError::Parse { source, .. } => Some(source),
            StateError::Serialize { source } => Some(source),
            StateError::Write { source, .. } => Some(source),
            StateError::Rename { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_iteration_starts_at_one_and_increments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = RunState::load(path.clone()).unwrap();
        assert_eq!(state.next_iteration("2026-October-17").unwrap(), "iteration_1");
        assert_eq!(state.next_iteration("2026-October-17").unwrap(), "iteration_2");

        // persisted across reloads
        let mut reloaded = RunState::load(path).unwrap();
        assert_eq!(
            reloaded.next_iteration("2026-October-17").unwrap(),
            "iteration_3"
        );
    }

    #[test]
    fn test_days_are_independent() {
        let dir = tempdir().unwrap();
        let mut state = RunState::load(dir.path().join("state.json")).unwrap();
        state.next_iteration("2026-October-16").unwrap();
        state.next_iteration("2026-October-16").unwrap();
        assert_eq!(state.next_iteration("2026-October-17").unwrap(), "iteration_1");
    }

    #[test]
    fn test_sheet_id_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = RunState::load(path.clone()).unwrap();
        assert_eq!(state.sheet_id("2026-October-17"), None);
        state.set_sheet_id("2026-October-17", "sheet-abc").unwrap();

        let reloaded = RunState::load(path).unwrap();
        assert_eq!(reloaded.sheet_id("2026-October-17"), Some("sheet-abc"));
        assert_eq!(reloaded.sheet_id("2026-October-18"), None);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let mut state = RunState::load(dir.path().join("state.json")).unwrap();
        state.next_iteration("d").unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("state.json")]);
    }

    #[test]
    fn test_corrupt_state_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "iteration_4").unwrap();
        assert!(matches!(
            RunState::load(path),
            Err(StateError::Parse { .. })
        ));
    }

    #[test]
    fn test_state_file_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = RunState::load(path.clone()).unwrap();
        state.next_iteration("2026-October-17").unwrap();
        let v: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v["days"]["2026-October-17"]["iteration"], 1);
        assert!(v["days"]["2026-October-17"].get("sheet_id").is_none());
    }
}
