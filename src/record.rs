//! Typed record shapes for metric snapshot files.
//!
//! Every snapshot file is a JSON array holding records of exactly one shape.
//! Which shape a file uses is decided by its name (see `extract::resolve`),
//! never by looking at the content.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// The four structural layouts a snapshot file may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Pod-latency quantile summaries.
    PodLatency,
    /// Float value, node name under `labels.instance`.
    FloatInstance,
    /// Float value, node name under `labels.node`.
    FloatNode,
    /// Integer value, node name under `labels.instance`.
    Int,
}

/// One pod-latency quantile row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodLatencyRecord {
    pub quantile_name: String,
    #[serde(default, alias = "uid")]
    pub uuid: String,
    pub p99: i64,
    pub p95: i64,
    pub p50: i64,
    pub max: i64,
    pub avg: i64,
    pub timestamp: String,
    #[serde(default)]
    pub metric_name: String,
    #[serde(default)]
    pub job_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct InstanceLabels {
    #[serde(default)]
    instance: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct NodeLabels {
    #[serde(default)]
    node: String,
}

/// A single sampled value for one node, as produced by a range query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarRecord<V> {
    pub timestamp: String,
    pub node: String,
    pub value: V,
    pub uuid: String,
    pub query: String,
    pub metric_name: String,
    pub job_name: String,
}

/// Wire layout of a scalar record; `L` selects which label key names the node.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScalar<V, L> {
    timestamp: String,
    #[serde(default)]
    labels: L,
    value: V,
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    query: String,
    #[serde(default)]
    metric_name: String,
    #[serde(default)]
    job_name: String,
}

/// Label sets that name the node a sample was taken on.
trait NodeLabel {
    fn into_node(self) -> String;
}

impl NodeLabel for InstanceLabels {
    fn into_node(self) -> String {
        self.instance
    }
}

impl NodeLabel for NodeLabels {
    fn into_node(self) -> String {
        self.node
    }
}

impl<V, L: NodeLabel> RawScalar<V, L> {
    fn into_record(self) -> ScalarRecord<V> {
        ScalarRecord {
            timestamp: self.timestamp,
            node: self.labels.into_node(),
            value: self.value,
            uuid: self.uuid,
            query: self.query,
            metric_name: self.metric_name,
            job_name: self.job_name,
        }
    }
}

/// A decoded file: a homogeneous sequence of one shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Records {
    PodLatency(Vec<PodLatencyRecord>),
    Float(Vec<ScalarRecord<f64>>),
    Int(Vec<ScalarRecord<i64>>),
}

impl Records {
    pub fn len(&self) -> usize {
        match self {
            Records::PodLatency(r) => r.len(),
            Records::Float(r) => r.len(),
            Records::Int(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode a JSON array into records of the given shape.
///
/// Decoding is strict: one malformed element fails the whole file.
/// An empty array is valid and yields empty records.
pub fn decode(path: &Path, bytes: &[u8], shape: Shape) -> Result<Records, DecodeError> {
    let wrap = |source| DecodeError {
        path: path.to_path_buf(),
        shape,
        source,
    };
    let records = match shape {
        Shape::PodLatency => Records::PodLatency(serde_json::from_slice(bytes).map_err(wrap)?),
        Shape::FloatInstance => {
            let raw: Vec<RawScalar<f64, InstanceLabels>> =
                serde_json::from_slice(bytes).map_err(wrap)?;
            Records::Float(raw.into_iter().map(RawScalar::into_record).collect())
        }
        Shape::FloatNode => {
            let raw: Vec<RawScalar<f64, NodeLabels>> =
                serde_json::from_slice(bytes).map_err(wrap)?;
            Records::Float(raw.into_iter().map(RawScalar::into_record).collect())
        }
        Shape::Int => {
            let raw: Vec<RawScalar<i64, InstanceLabels>> =
                serde_json::from_slice(bytes).map_err(wrap)?;
            Records::Int(raw.into_iter().map(RawScalar::into_record).collect())
        }
    };
    Ok(records)
}

/// A snapshot file did not match the shape it was resolved to.
#[derive(Debug)]
pub struct DecodeError {
    pub path: PathBuf,
    pub shape: Shape,
    pub source: serde_json::Error,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "failed to decode {} as {:?} records: {}",
            self.path.display(),
            self.shape,
            self.source
        )
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
