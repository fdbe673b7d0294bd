//! Per-node, per-job maxima for a single snapshot file.
//!
//! Each input file becomes its own table. Pod-latency files are copied row
//! for row instead of being grouped.

use crate::csv;
use crate::extract::{self, max_index, MetricKey, MetricValue};
use crate::record::{PodLatencyRecord, Records, ScalarRecord};
use crate::summary::TableError;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const HEADER: [&str; 7] = [
    "JobName",
    "Node",
    "MaxValue",
    "MetricName",
    "Timestamp",
    "UUID",
    "Query",
];

pub const POD_LATENCY_HEADER: [&str; 10] = [
    "quantileName",
    "uuid",
    "p99",
    "p95",
    "p50",
    "max",
    "avg",
    "timestamp",
    "metricName",
    "jobName",
];

/// The record holding the maximum value for one (node, job) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakdownRow {
    pub job_name: String,
    pub node: String,
    pub max_value: String,
    pub metric_name: String,
    pub timestamp: String,
    pub uuid: String,
    pub query: String,
}

impl BreakdownRow {
    fn from_record<V: MetricValue>(r: &ScalarRecord<V>) -> Self {
        Self {
            job_name: r.job_name.clone(),
            node: r.node.clone(),
            max_value: r.value.render(),
            metric_name: r.metric_name.clone(),
            timestamp: r.timestamp.clone(),
            uuid: r.uuid.clone(),
            query: r.query.clone(),
        }
    }

    pub fn fields(&self) -> [&str; 7] {
        [
            &self.job_name,
            &self.node,
            &self.max_value,
            &self.metric_name,
            &self.timestamp,
            &self.uuid,
            &self.query,
        ]
    }
}

fn pod_latency_fields(r: &PodLatencyRecord) -> [String; 10] {
    [
        r.quantile_name.clone(),
        r.uuid.clone(),
        r.p99.to_string(),
        r.p95.to_string(),
        r.p50.to_string(),
        r.max.to_string(),
        r.avg.to_string(),
        r.timestamp.clone(),
        r.metric_name.clone(),
        r.job_name.clone(),
    ]
}

fn owned(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

fn push_unique<'a>(seen: &mut Vec<&'a str>, value: &'a str) {
    if !seen.contains(&value) {
        seen.push(value);
    }
}

/// Group records by node, then by job within each node, both in first-seen
/// order, and keep the record with the greatest value for every pair.
pub fn group_maxima<V: MetricValue>(records: &[ScalarRecord<V>]) -> Vec<BreakdownRow> {
    let mut nodes: Vec<&str> = Vec::new();
    for r in records {
        push_unique(&mut nodes, &r.node);
    }

    let mut rows = Vec::new();
    for node in nodes {
        let mut jobs: Vec<&str> = Vec::new();
        for r in records.iter().filter(|r| r.node == node) {
            push_unique(&mut jobs, &r.job_name);
        }
        for job in jobs {
            let pair = records
                .iter()
                .enumerate()
                .filter(|(_, r)| r.node == node && r.job_name == job);
            if let Some((_, best)) = max_index(pair) {
                rows.push(BreakdownRow::from_record(best));
            }
        }
    }
    rows
}

/// Render a decoded file as breakdown table records, header first.
pub fn table_records(records: &Records) -> Vec<Vec<String>> {
    match records {
        Records::PodLatency(r) => {
            let mut out = vec![owned(&POD_LATENCY_HEADER)];
            out.extend(r.iter().map(|p| Vec::from(pod_latency_fields(p))));
            out
        }
        Records::Float(r) => {
            let mut out = vec![owned(&HEADER)];
            out.extend(group_maxima(r).iter().map(|row| owned(&row.fields())));
            out
        }
        Records::Int(r) => {
            let mut out = vec![owned(&HEADER)];
            out.extend(group_maxima(r).iter().map(|row| owned(&row.fields())));
            out
        }
    }
}

/// Write records to `path`, replacing any existing file.
pub fn write_table(path: &Path, rows: &[Vec<String>]) -> Result<(), TableError> {
    let write = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        for row in rows {
            csv::write_record(&mut file, row)?;
        }
        file.flush()
    };
    write().map_err(|e| TableError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Name of the breakdown table (and spreadsheet tab) for a key and run.
pub fn table_name(key: MetricKey, run_id: &str) -> String {
    format!("{key}-{run_id}")
}

/// Pick a table name not yet used in this batch. A repeated `<key>-<runId>`
/// gets the source file stem appended.
fn unique_name(key: MetricKey, run_id: &str, source: &Path, used: &HashSet<String>) -> String {
    let base = table_name(key, run_id);
    if !used.contains(&base) {
        return base;
    }
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let named = format!("{base}-{stem}");
    let mut candidate = named.clone();
    let mut n = 2;
    while used.contains(&candidate) {
        candidate = format!("{named}-{n}");
        n += 1;
    }
    candidate
}

/// A breakdown table written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenTable {
    pub key: MetricKey,
    pub name: String,
    pub path: PathBuf,
    pub rows: usize,
}

/// Write one breakdown table per input file into `out_dir`.
///
/// Files that cannot be read or decoded, or hold no records, are logged and
/// skipped. A failure to write a table aborts the batch. Table names are
/// unique within the batch, so several files for one key never overwrite
/// each other.
pub fn build_tables(
    out_dir: &Path,
    run_id: &str,
    files: &[PathBuf],
) -> Result<Vec<WrittenTable>, TableError> {
    let mut written = Vec::new();
    let mut used = HashSet::new();
    for file in files {
        let (key, records) = match extract::load(file) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "skipping breakdown");
                continue;
            }
        };
        if key == MetricKey::PodLatency {
            tracing::info!(file = %file.display(), "pod latency is copied without grouping");
        }
        let name = unique_name(key, run_id, file, &used);
        used.insert(name.clone());
        let path = out_dir.join(format!("{name}.csv"));
        let rows = table_records(&records);
        write_table(&path, &rows)?;
        tracing::info!(table = %path.display(), rows = rows.len() - 1, "wrote breakdown table");
        written.push(WrittenTable {
            key,
            name,
            path,
            rows: rows.len() - 1,
        });
    }
    Ok(written)
}

/// Convert one snapshot file straight into a breakdown CSV at `destination`.
///
/// `.csv` is appended to the destination name when missing.
pub fn convert_file(source: &Path, destination: &Path) -> Result<PathBuf, ConvertError> {
    let destination = with_csv_extension(destination);
    let (_, records) = extract::load(source).map_err(ConvertError::Extract)?;
    if destination.exists() {
        tracing::info!(file = %destination.display(), "replacing existing csv file");
    }
    write_table(&destination, &table_records(&records)).map_err(ConvertError::Table)?;
    Ok(destination)
}

fn with_csv_extension(path: &Path) -> PathBuf {
    if path.to_string_lossy().ends_with(".csv") {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_os_string();
        name.push(".csv");
        PathBuf::from(name)
    }
}

/// Errors from single-file conversion.
#[derive(Debug)]
pub enum ConvertError {
    Extract(extract::ExtractError),
    Table(TableError),
}

impl std::fmt::Display for ConvertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvertError::Extract(e) => write!(f, "{e}"),
            ConvertError::Table(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConvertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConvertError::Extract(e) => Some(e),
            ConvertError::Table(e) => Some(e),
        }
    }
}
