//! Metric extraction: resolve a snapshot file to its metric key and shape,
//! decode it, and reduce it to summary values.

use crate::record::{self, DecodeError, Records, ScalarRecord, Shape};
use std::path::{Path, PathBuf};

/// Canonical metric keys. Each key is bound to exactly one record shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKey {
    PodLatency,
    NodeCpu,
    NodeMemoryActive,
    NodeMemoryAvailable,
    NodeMemoryCached,
    KubeletCpu,
    KubeletMemory,
    CrioCpu,
    CrioMemory,
    Api99thLatency,
    PodStatusCount,
    ServiceCount,
    NamespaceCount,
    DeploymentCount,
    EtcdDiskWalFsync99th,
    EtcdLeaderChangesRate,
    Default,
}

/// How a key's records are reduced to a summary value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Greatest value across all records.
    Maximum,
    /// Number of records with a value above zero.
    PositiveCount,
    /// No reduction; rows are passed through.
    Passthrough,
}

/// Ordered file-name patterns. `job-podLatency` must stay first.
pub const RESOLUTION_TABLE: &[(&str, MetricKey, Shape)] = &[
    ("job-podLatency", MetricKey::PodLatency, Shape::PodLatency),
    ("nodeCPU", MetricKey::NodeCpu, Shape::FloatInstance),
    ("nodeMemoryActive", MetricKey::NodeMemoryActive, Shape::Int),
    ("nodeMemoryAvailable", MetricKey::NodeMemoryAvailable, Shape::Int),
    ("nodeMemoryCached", MetricKey::NodeMemoryCached, Shape::Int),
    ("kubeletCPU", MetricKey::KubeletCpu, Shape::FloatNode),
    ("kubeletMemory", MetricKey::KubeletMemory, Shape::FloatNode),
    ("crioCPU", MetricKey::CrioCpu, Shape::FloatNode),
    ("crioMemory", MetricKey::CrioMemory, Shape::Int),
    ("API99thLatency", MetricKey::Api99thLatency, Shape::FloatInstance),
    ("podStatusCount", MetricKey::PodStatusCount, Shape::Int),
    ("serviceCount", MetricKey::ServiceCount, Shape::Int),
    ("namespaceCount", MetricKey::NamespaceCount, Shape::Int),
    ("deploymentCount", MetricKey::DeploymentCount, Shape::Int),
    (
        "99thEtcdDiskWalFsyncDurationSeconds",
        MetricKey::EtcdDiskWalFsync99th,
        Shape::FloatInstance,
    ),
    (
        "etcdLeaderChangesRate",
        MetricKey::EtcdLeaderChangesRate,
        Shape::FloatInstance,
    ),
];

impl MetricKey {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKey::PodLatency => "podLatency",
            MetricKey::NodeCpu => "nodeCPU",
            MetricKey::NodeMemoryActive => "nodeMemoryActive",
            MetricKey::NodeMemoryAvailable => "nodeMemoryAvailable",
            MetricKey::NodeMemoryCached => "nodeMemoryCached",
            MetricKey::KubeletCpu => "kubeletCPU",
            MetricKey::KubeletMemory => "kubeletMemory",
            MetricKey::CrioCpu => "crioCPU",
            MetricKey::CrioMemory => "crioMemory",
            MetricKey::Api99thLatency => "API99thLatency",
            MetricKey::PodStatusCount => "podStatusCount",
            MetricKey::ServiceCount => "serviceCount",
            MetricKey::NamespaceCount => "namespaceCount",
            MetricKey::DeploymentCount => "deploymentCount",
            MetricKey::EtcdDiskWalFsync99th => "99thEtcdDiskWalFsyncDurationSeconds",
            MetricKey::EtcdLeaderChangesRate => "etcdLeaderChangesRate",
            MetricKey::Default => "default",
        }
    }

    pub fn aggregation(self) -> Aggregation {
        match self {
            MetricKey::PodLatency => Aggregation::Passthrough,
            MetricKey::PodStatusCount
            | MetricKey::ServiceCount
            | MetricKey::NamespaceCount
            | MetricKey::DeploymentCount
            | MetricKey::EtcdLeaderChangesRate => Aggregation::PositiveCount,
            _ => Aggregation::Maximum,
        }
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve a file to its metric key and shape by first-match substring test
/// on the file name. Unknown names fall through to the integer default.
pub fn resolve(path: &Path) -> (MetricKey, Shape) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_else(|| path.to_string_lossy());
    RESOLUTION_TABLE
        .iter()
        .find(|(pattern, _, _)| name.contains(pattern))
        .map(|&(_, key, shape)| (key, shape))
        .unwrap_or((MetricKey::Default, Shape::Int))
}

/// Observed time window: first and last record timestamps in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub start: String,
    pub end: String,
}

/// Result of reducing one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub key: MetricKey,
    pub value: String,
    pub window: Window,
}

/// Result of reducing one file partitioned by node class.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitExtraction {
    pub key: MetricKey,
    pub master: Option<String>,
    pub worker: Option<String>,
    pub window: Window,
}

/// Numeric record values that can be reduced and rendered as text.
pub trait MetricValue: Copy + PartialOrd {
    fn is_positive(self) -> bool;
    fn render(self) -> String;
}

impl MetricValue for i64 {
    fn is_positive(self) -> bool {
        self > 0
    }

    fn render(self) -> String {
        self.to_string()
    }
}

impl MetricValue for f64 {
    fn is_positive(self) -> bool {
        self > 0.0
    }

    fn render(self) -> String {
        format!("{self:.6}")
    }
}

/// Index of the first record holding the strictly greatest value.
pub fn max_index<'a, V, I>(records: I) -> Option<(usize, &'a ScalarRecord<V>)>
where
    V: MetricValue + 'a,
    I: IntoIterator<Item = (usize, &'a ScalarRecord<V>)>,
{
    let mut best: Option<(usize, &ScalarRecord<V>)> = None;
    for (i, r) in records {
        let greater = match best {
            Some((_, b)) => r.value > b.value,
            None => true,
        };
        if greater {
            best = Some((i, r));
        }
    }
    best
}

fn window_of<V>(records: &[ScalarRecord<V>]) -> Option<Window> {
    let first = records.first()?;
    let last = records.last()?;
    Some(Window {
        start: first.timestamp.clone(),
        end: last.timestamp.clone(),
    })
}

fn reduce<V: MetricValue>(records: &[ScalarRecord<V>], aggregation: Aggregation) -> String {
    match aggregation {
        Aggregation::PositiveCount => records
            .iter()
            .filter(|r| r.value.is_positive())
            .count()
            .to_string(),
        _ => max_index(records.iter().enumerate())
            .map(|(_, r)| r.value.render())
            .unwrap_or_default(),
    }
}

fn split_max<V: MetricValue>(records: &[ScalarRecord<V>]) -> (Option<String>, Option<String>) {
    let master = max_index(
        records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.node.contains("master")),
    );
    let worker = max_index(
        records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.node.contains("master") && r.node.contains("worker")),
    );
    (
        master.map(|(_, r)| r.value.render()),
        worker.map(|(_, r)| r.value.render()),
    )
}

/// Read and decode a file as its resolved shape, refusing empty input.
pub fn load(path: &Path) -> Result<(MetricKey, Records), ExtractError> {
    let (key, shape) = resolve(path);
    let bytes = std::fs::read(path).map_err(|e| ExtractError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let records = record::decode(path, &bytes, shape).map_err(ExtractError::Decode)?;
    if records.is_empty() {
        return Err(ExtractError::Empty {
            path: path.to_path_buf(),
        });
    }
    tracing::debug!(file = %path.display(), key = %key, records = records.len(), "decoded snapshot");
    Ok((key, records))
}

/// Reduce one file to a single summary value plus its time window.
pub fn extract(path: &Path) -> Result<Extraction, ExtractError> {
    let (key, records) = load(path)?;
    extract_records(path, key, &records)
}

pub fn extract_records(
    path: &Path,
    key: MetricKey,
    records: &Records,
) -> Result<Extraction, ExtractError> {
    let aggregation = key.aggregation();
    let (value, window) = match records {
        Records::Float(r) => (reduce(r, aggregation), window_of(r)),
        Records::Int(r) => (reduce(r, aggregation), window_of(r)),
        Records::PodLatency(_) => {
            return Err(ExtractError::Unsupported {
                path: path.to_path_buf(),
                key,
            })
        }
    };
    let window = window.ok_or_else(|| ExtractError::Empty {
        path: path.to_path_buf(),
    })?;
    Ok(Extraction { key, value, window })
}

/// Reduce one file to separate maxima for master and worker nodes.
///
/// A node counts as master when its label contains `master`, otherwise as
/// worker when it contains `worker`; any other node is ignored.
pub fn extract_split(path: &Path) -> Result<SplitExtraction, ExtractError> {
    let (key, records) = load(path)?;
    let ((master, worker), window) = match &records {
        Records::Float(r) => (split_max(r), window_of(r)),
        Records::Int(r) => (split_max(r), window_of(r)),
        Records::PodLatency(_) => {
            return Err(ExtractError::Unsupported {
                path: path.to_path_buf(),
                key,
            })
        }
    };
    let window = window.ok_or_else(|| ExtractError::Empty {
        path: path.to_path_buf(),
    })?;
    Ok(SplitExtraction {
        key,
        master,
        worker,
        window,
    })
}

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Round a decimal string to two places. Non-numeric text is returned as is.
pub fn round_two(text: &str) -> String {
    match text.trim().parse::<f64>() {
        Ok(v) => format!("{v:.2}"),
        Err(_) => {
            tracing::debug!(value = text, "value is not numeric, leaving unrounded");
            text.to_string()
        }
    }
}

/// Render a byte count as gigabytes with a `GB` suffix.
///
/// Values of 1000 or less are not scaled but still carry the suffix.
pub fn to_gigabytes(text: &str) -> String {
    match text.trim().parse::<f64>() {
        Ok(v) if v > 1000.0 => format!("{:.2}GB", v / BYTES_PER_GB),
        Ok(v) => format!("{v:.2}GB"),
        Err(_) => {
            tracing::debug!(value = text, "value is not numeric, leaving unconverted");
            text.to_string()
        }
    }
}

/// Errors from reducing a single snapshot file.
#[derive(Debug)]
pub enum ExtractError {
    /// The file could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file did not match its resolved shape.
    Decode(DecodeError),
    /// The file decoded to zero records.
    Empty { path: PathBuf },
    /// The key has no summary reduction (pod latency).
    Unsupported { path: PathBuf, key: MetricKey },
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            ExtractError::Decode(e) => write!(f, "{e}"),
            ExtractError::Empty { path } => {
                write!(f, "{} contains no records", path.display())
            }
            ExtractError::Unsupported { path, key } => write!(
                f,
                "{} resolves to {key}, which has no summary value",
                path.display()
            ),
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExtractError::Read { source, .. } => Some(source),
            ExtractError::Decode(e) => Some(e),
            ExtractError::Empty { .. } | ExtractError::Unsupported { .. } => None,
        }
    }
}
