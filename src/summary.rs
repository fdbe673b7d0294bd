//! Summary row: one line per iteration in the day's summary table.

use crate::csv;
use crate::extract::{self, Extraction, MetricKey, SplitExtraction, Window};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Column names of the summary table, in write order.
pub const HEADER: [&str; 23] = [
    "Iteration",
    "StartTime",
    "EndTime",
    "UUID",
    "MasterCPU",
    "WorkerCPU",
    "MasterMemoryActive",
    "WorkerMemoryActive",
    "MasterMemoryAvailable",
    "WorkerMemoryAvailable",
    "MasterMemoryCached",
    "WorkerMemoryCached",
    "KubeletCPU",
    "KubeletMemory",
    "CrioCPU",
    "CrioMemory",
    "API99thLatency",
    "PodCount",
    "ServiceCount",
    "NamespaceCount",
    "DeploymentCount",
    "99thEtcdDiskWalFsyncDurationSeconds",
    "EtcdLeaderChangeRate",
];

/// Keys reported separately for master and worker nodes.
pub fn is_split_key(key: MetricKey) -> bool {
    matches!(
        key,
        MetricKey::NodeCpu
            | MetricKey::NodeMemoryActive
            | MetricKey::NodeMemoryAvailable
            | MetricKey::NodeMemoryCached
    )
}

/// One summary line. Unset metrics are written as empty fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryRow {
    pub iteration: String,
    pub run_id: String,
    pub window: Option<Window>,
    pub master_cpu: Option<String>,
    pub worker_cpu: Option<String>,
    pub master_memory_active: Option<String>,
    pub worker_memory_active: Option<String>,
    pub master_memory_available: Option<String>,
    pub worker_memory_available: Option<String>,
    pub master_memory_cached: Option<String>,
    pub worker_memory_cached: Option<String>,
    pub kubelet_cpu: Option<String>,
    pub kubelet_memory: Option<String>,
    pub crio_cpu: Option<String>,
    pub crio_memory: Option<String>,
    pub api_99th_latency: Option<String>,
    pub pod_count: Option<String>,
    pub service_count: Option<String>,
    pub namespace_count: Option<String>,
    pub deployment_count: Option<String>,
    pub etcd_fsync_99th: Option<String>,
    pub etcd_leader_change_rate: Option<String>,
}

impl SummaryRow {
    pub fn new(iteration: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            iteration: iteration.into(),
            run_id: run_id.into(),
            ..Default::default()
        }
    }

    /// Place a single-valued extraction into its column. Returns false when
    /// the key has no column.
    pub fn set(&mut self, extraction: &Extraction) -> bool {
        let v = &extraction.value;
        let slot = match extraction.key {
            MetricKey::KubeletCpu => (&mut self.kubelet_cpu, extract::round_two(v)),
            MetricKey::KubeletMemory => (&mut self.kubelet_memory, extract::to_gigabytes(v)),
            MetricKey::CrioCpu => (&mut self.crio_cpu, extract::round_two(v)),
            MetricKey::CrioMemory => (&mut self.crio_memory, extract::to_gigabytes(v)),
            MetricKey::Api99thLatency => (&mut self.api_99th_latency, extract::round_two(v)),
            MetricKey::PodStatusCount => (&mut self.pod_count, v.clone()),
            MetricKey::ServiceCount => (&mut self.service_count, v.clone()),
            MetricKey::NamespaceCount => (&mut self.namespace_count, v.clone()),
            MetricKey::DeploymentCount => (&mut self.deployment_count, v.clone()),
            MetricKey::EtcdDiskWalFsync99th => (&mut self.etcd_fsync_99th, extract::round_two(v)),
            MetricKey::EtcdLeaderChangesRate => (&mut self.etcd_leader_change_rate, v.clone()),
            _ => return false,
        };
        *slot.0 = Some(slot.1);
        self.window = Some(extraction.window.clone());
        true
    }

    /// Place a master/worker extraction into its column pair. Returns false
    /// when the key has no split columns.
    pub fn set_split(&mut self, extraction: &SplitExtraction) -> bool {
        let (master, worker, cleanup): (_, _, fn(&str) -> String) = match extraction.key {
            MetricKey::NodeCpu => (
                &mut self.master_cpu,
                &mut self.worker_cpu,
                extract::round_two,
            ),
            MetricKey::NodeMemoryActive => (
                &mut self.master_memory_active,
                &mut self.worker_memory_active,
                extract::to_gigabytes,
            ),
            MetricKey::NodeMemoryAvailable => (
                &mut self.master_memory_available,
                &mut self.worker_memory_available,
                extract::to_gigabytes,
            ),
            MetricKey::NodeMemoryCached => (
                &mut self.master_memory_cached,
                &mut self.worker_memory_cached,
                extract::to_gigabytes,
            ),
            _ => return false,
        };
        *master = extraction.master.as_deref().map(cleanup);
        *worker = extraction.worker.as_deref().map(cleanup);
        self.window = Some(extraction.window.clone());
        true
    }

    /// Fields in `HEADER` order.
    pub fn fields(&self) -> Vec<String> {
        let (start, end) = match &self.window {
            Some(w) => (w.start.clone(), w.end.clone()),
            None => (String::new(), String::new()),
        };
        let metrics = [
            &self.master_cpu,
            &self.worker_cpu,
            &self.master_memory_active,
            &self.worker_memory_active,
            &self.master_memory_available,
            &self.worker_memory_available,
            &self.master_memory_cached,
            &self.worker_memory_cached,
            &self.kubelet_cpu,
            &self.kubelet_memory,
            &self.crio_cpu,
            &self.crio_memory,
            &self.api_99th_latency,
            &self.pod_count,
            &self.service_count,
            &self.namespace_count,
            &self.deployment_count,
            &self.etcd_fsync_99th,
            &self.etcd_leader_change_rate,
        ];
        let mut fields = vec![self.iteration.clone(), start, end, self.run_id.clone()];
        fields.extend(metrics.iter().map(|m| m.as_deref().unwrap_or_default().to_string()));
        fields
    }
}

/// Build the summary row for one run from its snapshot files.
///
/// Files are processed in order; a file that cannot be read, decoded, or
/// reduced is logged and contributes nothing. The time window is taken from
/// the last file that produced a value.
pub fn build_row(iteration: &str, run_id: &str, files: &[PathBuf]) -> SummaryRow {
    let mut row = SummaryRow::new(iteration, run_id);
    for path in files {
        let (key, _) = extract::resolve(path);
        let placed = if is_split_key(key) {
            extract::extract_split(path).map(|e| row.set_split(&e))
        } else {
            extract::extract(path).map(|e| row.set(&e))
        };
        match placed {
            Ok(true) => tracing::debug!(file = %path.display(), key = %key, "added to summary"),
            Ok(false) => {
                tracing::info!(file = %path.display(), key = %key, "no summary column for metric")
            }
            Err(e) => tracing::warn!(file = %path.display(), error = %e, "skipping file"),
        }
    }
    row
}

/// The append-only summary table on disk.
pub struct SummaryTable {
    path: PathBuf,
}

impl SummaryTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the table with its header if it does not exist yet.
    /// Returns true if the table was created.
    pub fn ensure(&self) -> Result<bool, TableError> {
        if self.path.exists() {
            return Ok(false);
        }
        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&self.path)?;
            csv::write_record(&mut file, &HEADER)?;
            file.flush()
        };
        write().map_err(|e| TableError {
            path: self.path.clone(),
            source: e,
        })?;
        tracing::info!(table = %self.path.display(), "created summary table");
        Ok(true)
    }

    /// Append one row and flush.
    pub fn append(&self, row: &SummaryRow) -> Result<(), TableError> {
        let write = || -> std::io::Result<()> {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&self.path)?;
            csv::write_record(&mut file, &row.fields())?;
            file.flush()
        };
        write().map_err(|e| TableError {
            path: self.path.clone(),
            source: e,
        })
    }
}

/// Failed to create or write a CSV table.
#[derive(Debug)]
pub struct TableError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to write table {}: {}", self.path.display(), self.source)
    }
}

impl std::error::Error for TableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
