use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from metricsheet.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub paths: PathsConfig,
    pub tags: TagsConfig,
    pub sheets: SheetsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub metrics_dir: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TagsConfig {
    /// Metric tags reduced into the summary row.
    pub summary: Vec<String>,
    /// Metric tags that get a per-node/per-job breakdown table.
    pub breakdown: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SheetsConfig {
    pub parent_id: Option<String>,
    pub token_env: String,
    pub summary_sheet: String,
    pub sheets_base: String,
    pub drive_base: String,
}

// --- Default implementations ---

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            metrics_dir: PathBuf::from("collected-metrics"),
            output_dir: PathBuf::from("gsheet"),
        }
    }
}

const SUMMARY_TAGS: &[&str] = &[
    "nodeCPU",
    "nodeMemoryActive",
    "nodeMemoryAvailable",
    "nodeMemoryCached",
    "kubeletMemory",
    "kubeletCPU",
    "crioCPU",
    "crioMemory",
    "API99thLatency",
    "podStatusCount",
    "serviceCount",
    "namespaceCount",
    "deploymentCount",
    "99thEtcdDiskWalFsyncDurationSeconds",
    "etcdLeaderChangesRate",
];

const BREAKDOWN_TAGS: &[&str] = &[
    "nodeCPU",
    "nodeMemoryActive",
    "nodeMemoryAvailable",
    "nodeMemoryCached",
    "kubeletMemory",
    "kubeletCPU",
    "crioCPU",
    "crioMemory",
    "API99thLatency",
    "job-podLatency",
];

impl Default for TagsConfig {
    fn default() -> Self {
        Self {
            summary: SUMMARY_TAGS.iter().map(|t| t.to_string()).collect(),
            breakdown: BREAKDOWN_TAGS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            parent_id: None,
            token_env: "GOOGLE_OAUTH_ACCESS_TOKEN".to_string(),
            summary_sheet: "Sheet1".to_string(),
            sheets_base: "https://sheets.googleapis.com/v4".to_string(),
            drive_base: "https://www.googleapis.com/drive/v3".to_string(),
        }
    }
}

/// Load a config file. A missing file at the default location yields defaults;
/// a missing file that was asked for explicitly is an error.
pub fn load(path: &Path, explicit: bool) -> Result<FileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
            tracing::debug!(config = %path.display(), "no config file, using defaults");
            Ok(FileConfig::default())
        }
        Err(e) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Values supplied on the command line; `None` leaves the file value in place.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub run_id: Option<String>,
    pub parent_id: Option<String>,
    pub upload: bool,
    pub metrics_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

/// Upload destination, present only when uploading was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettings {
    pub parent_id: String,
    pub access_token: String,
    pub summary_sheet: String,
    pub sheets_base: String,
    pub drive_base: String,
}

/// Immutable settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub run_id: String,
    pub metrics_dir: PathBuf,
    pub output_dir: PathBuf,
    pub summary_tags: Vec<String>,
    pub breakdown_tags: Vec<String>,
    pub upload: Option<UploadSettings>,
}

impl Settings {
    /// Merge file config and CLI overrides, validating flag combinations.
    /// `env` looks up environment variables (the access token).
    pub fn resolve(
        file: FileConfig,
        overrides: Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let run_id = overrides
            .run_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(ConfigError::MissingRunId)?;

        if !overrides.upload && overrides.parent_id.is_some() {
            return Err(ConfigError::ParentWithoutUpload);
        }

        let parent_id = overrides
            .parent_id
            .or(file.sheets.parent_id)
            .filter(|p| !p.is_empty());

        let upload = match (overrides.upload, parent_id) {
            (false, _) => None,
            (true, None) => return Err(ConfigError::MissingParent),
            (true, Some(parent_id)) => {
                let access_token = env(&file.sheets.token_env)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| ConfigError::MissingToken {
                        var: file.sheets.token_env.clone(),
                    })?;
                Some(UploadSettings {
                    parent_id,
                    access_token,
                    summary_sheet: file.sheets.summary_sheet,
                    sheets_base: file.sheets.sheets_base,
                    drive_base: file.sheets.drive_base,
                })
            }
        };

        Ok(Self {
            run_id,
            metrics_dir: overrides.metrics_dir.unwrap_or(file.paths.metrics_dir),
            output_dir: overrides.output_dir.unwrap_or(file.paths.output_dir),
            summary_tags: file.tags.summary,
            breakdown_tags: file.tags.breakdown,
            upload,
        })
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    MissingRunId,
    ParentWithoutUpload,
    MissingParent,
    MissingToken {
        var: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::MissingRunId => write!(f, "a run identifier is required (--uuid)"),
            ConfigError::ParentWithoutUpload => write!(
                f,
                "a parent folder was given with --parent, but --gdocs was not set"
            ),
            ConfigError::MissingParent => write!(
                f,
                "--gdocs was set, but no parent folder id was given with --parent"
            ),
            ConfigError::MissingToken { var } => write!(
                f,
                "--gdocs was set, but the access token variable {var} is not set"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}
