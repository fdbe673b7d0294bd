//! One invocation end to end: summary row, optional upload, breakdown tables.

use crate::breakdown::{self, WrittenTable};
use crate::config::{Settings, UploadSettings};
use crate::data_dir::DataDir;
use crate::discovery::{self, DiscoveryError};
use crate::run_state::{RunState, StateError};
use crate::sink::{SinkError, SpreadsheetSink};
use crate::summary::{self, SummaryRow, SummaryTable, TableError};
use std::path::{Path, PathBuf};

/// What a completed run produced.
#[derive(Debug)]
pub struct RunReport {
    pub iteration: String,
    pub summary_table: PathBuf,
    pub row: SummaryRow,
    pub breakdown_tables: Vec<WrittenTable>,
    pub spreadsheet_id: Option<String>,
}

/// Run the full pipeline for `day`.
///
/// `sink` is only consulted when `settings.upload` is set.
pub async fn run<S: SpreadsheetSink>(
    settings: &Settings,
    day: &str,
    sink: Option<&S>,
) -> Result<RunReport, PipelineError> {
    let upload = settings.upload.as_ref().zip(sink);

    let data_dir = DataDir::new(&settings.output_dir);
    data_dir.init().map_err(|e| PipelineError::Io {
        path: data_dir.root().to_path_buf(),
        source: e,
    })?;
    let mut state = RunState::load(data_dir.state()).map_err(PipelineError::State)?;
    let table = SummaryTable::new(data_dir.summary_table(day));

    let mut spreadsheet_id = state.sheet_id(day).map(str::to_string);
    if let (Some((target, sink)), Some(id)) = (upload, spreadsheet_id.as_deref()) {
        tracing::info!(spreadsheet_id = id, "reusing today's spreadsheet");
        if !table.path().exists() {
            restore_table(sink, target, id, table.path()).await?;
        }
    }

    table.ensure().map_err(PipelineError::Table)?;
    let iteration = state.next_iteration(day).map_err(PipelineError::State)?;
    tracing::info!(iteration = %iteration, run_id = %settings.run_id, "starting iteration");

    let files = discovery::discover(&settings.metrics_dir, &settings.run_id, &settings.summary_tags)
        .map_err(PipelineError::Discovery)?;
    tracing::info!(count = files.len(), run_id = %settings.run_id, "found snapshot files");
    let row = summary::build_row(&iteration, &settings.run_id, &files);
    table.append(&row).map_err(PipelineError::Table)?;
    tracing::info!(table = %table.path().display(), "wrote summary row");

    if let Some((target, sink)) = upload {
        let id = match spreadsheet_id.clone() {
            Some(id) => id,
            None => {
                let name = file_name(table.path());
                let id = sink.create_spreadsheet(&target.parent_id, &name).await?;
                state
                    .set_sheet_id(day, &id)
                    .map_err(PipelineError::State)?;
                id
            }
        };
        let bytes = read(table.path())?;
        let resp = sink.upload_csv(&id, &target.summary_sheet, &bytes).await?;
        tracing::info!(
            spreadsheet_id = %resp.spreadsheet_id,
            range = %resp.updated_range,
            rows = resp.updated_rows,
            cells = resp.updated_cells,
            "uploaded summary table"
        );
        spreadsheet_id = Some(id);
    }

    let files = discovery::discover(
        &settings.metrics_dir,
        &settings.run_id,
        &settings.breakdown_tags,
    )
    .map_err(PipelineError::Discovery)?;
    let tables = breakdown::build_tables(&data_dir.breakdown_dir(), &settings.run_id, &files)
        .map_err(PipelineError::Table)?;

    if let (Some((_, sink)), Some(id)) = (upload, spreadsheet_id.as_deref()) {
        for t in &tables {
            sink.create_sheet(id, &t.name).await?;
            let bytes = read(&t.path)?;
            sink.upload_csv(id, &t.name, &bytes).await?;
            tracing::info!(sheet = %t.name, key = %t.key, rows = t.rows, "uploaded breakdown table");
        }
    }

    Ok(RunReport {
        iteration,
        summary_table: table.path().to_path_buf(),
        row,
        breakdown_tables: tables,
        spreadsheet_id,
    })
}

/// Rebuild a missing local summary table from the spreadsheet.
async fn restore_table<S: SpreadsheetSink>(
    sink: &S,
    target: &UploadSettings,
    spreadsheet_id: &str,
    path: &Path,
) -> Result<(), PipelineError> {
    let bytes = sink.fetch_csv(spreadsheet_id, &target.summary_sheet).await?;
    if bytes.is_empty() {
        return Ok(());
    }
    std::fs::write(path, &bytes).map_err(|e| PipelineError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    tracing::info!(table = %path.display(), "restored summary table from spreadsheet");
    Ok(())
}

fn read(path: &Path) -> Result<Vec<u8>, PipelineError> {
    std::fs::read(path).map_err(|e| PipelineError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Errors that abort a run.
#[derive(Debug)]
pub enum PipelineError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    State(StateError),
    Table(TableError),
    Discovery(DiscoveryError),
    Sink(SinkError),
}

impl From<SinkError> for PipelineError {
    fn from(e: SinkError) -> Self {
        PipelineError::Sink(e)
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Io { path, source } => {
                write!(f, "I/O error on {}: {source}", path.display())
            }
            PipelineError::State(e) => write!(f, "{e}"),
            PipelineError::Table(e) => write!(f, "{e}"),
            PipelineError::Discovery(e) => write!(f, "{e}"),
            PipelineError::Sink(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Io { source, .. } => Some(source),
            PipelineError::State(e) => Some(e),
            PipelineError::Table(e) => Some(e),
            PipelineError::Discovery(e) => Some(e),
            PipelineError::Sink(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv;
    use crate::sink::UploadResponse;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        CreateSpreadsheet { parent: String, name: String },
        CreateSheet { id: String, name: String },
        Upload { id: String, name: String, rows: usize },
        Fetch { id: String },
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: RefCell<Vec<Call>>,
        stored: Vec<u8>,
        fail_uploads: bool,
    }

    impl SpreadsheetSink for RecordingSink {
        async fn create_spreadsheet(&self, parent: &str, name: &str) -> Result<String, SinkError> {
            self.calls.borrow_mut().push(Call::CreateSpreadsheet {
                parent: parent.into(),
                name: name.into(),
            });
            Ok("sheet-1".into())
        }

        async fn create_sheet(&self, id: &str, name: &str) -> Result<(), SinkError> {
            self.calls.borrow_mut().push(Call::CreateSheet {
                id: id.into(),
                name: name.into(),
            });
            Ok(())
        }

        async fn upload_csv(
            &self,
            id: &str,
            name: &str,
            csv_bytes: &[u8],
        ) -> Result<UploadResponse, SinkError> {
            if self.fail_uploads {
                return Err(SinkError::Status {
                    status: 403,
                    body: "forbidden".into(),
                });
            }
            let rows = csv::parse(&String::from_utf8_lossy(csv_bytes))
                .unwrap()
                .len();
            self.calls.borrow_mut().push(Call::Upload {
                id: id.into(),
                name: name.into(),
                rows,
            });
            Ok(UploadResponse {
                spreadsheet_id: id.into(),
                updated_rows: rows as u64,
                ..Default::default()
            })
        }

        async fn fetch_csv(&self, id: &str, _name: &str) -> Result<Vec<u8>, SinkError> {
            self.calls.borrow_mut().push(Call::Fetch { id: id.into() });
            Ok(self.stored.clone())
        }
    }

    const DAY: &str = "2026-October-17";

    fn scalar(node: &str, job: &str, ts: &str, value: &str) -> String {
        format!(
            r#"{{"timestamp":"{ts}","labels":{{"instance":"{node}","node":"{node}"}},"value":{value},"uuid":"run-1","query":"q","metricName":"m","jobName":"{job}"}}"#
        )
    }

    fn fixture() -> (TempDir, Settings) {
        let tmp = TempDir::new().unwrap();
        let metrics = tmp.path().join("collected-metrics");
        std::fs::create_dir(&metrics).unwrap();
        let write = |name: &str, items: &[String]| {
            std::fs::write(metrics.join(name), format!("[{}]", items.join(","))).unwrap();
        };
        write(
            "run-1-nodeCPU.json",
            &[
                scalar("master-0", "a", "t0", "1.5"),
                scalar("worker-0", "a", "t1", "3.25"),
            ],
        );
        write(
            "run-1-kubeletMemory.json",
            &[
                scalar("worker-0", "a", "k0", "2147483648"),
                scalar("worker-0", "b", "k1", "1073741824"),
            ],
        );
        write("run-1-serviceCount.json", &[scalar("x", "a", "s0", "0")]);
        write("run-1-crioCPU.json", &[]);
        write("run-2-nodeCPU.json", &[scalar("master-0", "a", "z", "99.0")]);
        std::fs::write(
            metrics.join("run-1-init-served-job-podLatency-summary.json"),
            r#"[{"quantileName":"Ready","uuid":"run-1","p99":3,"p95":2,"p50":1,"max":4,"avg":1,"timestamp":"p0","metricName":"podLatencyQuantilesMeasurement","jobName":"init"}]"#,
        )
        .unwrap();

        let mut settings =
            Settings::resolve(Default::default(), run_overrides(), |_| None).unwrap();
        settings.metrics_dir = metrics;
        settings.output_dir = tmp.path().join("gsheet");
        (tmp, settings)
    }

    fn run_overrides() -> crate::config::Overrides {
        crate::config::Overrides {
            run_id: Some("run-1".into()),
            ..Default::default()
        }
    }

    fn with_upload(settings: &mut Settings) {
        settings.upload = Some(UploadSettings {
            parent_id: "folder".into(),
            access_token: "tok".into(),
            summary_sheet: "Sheet1".into(),
            sheets_base: "http://unused".into(),
            drive_base: "http://unused".into(),
        });
    }

    #[tokio::test]
    async fn local_run_writes_summary_and_breakdowns() {
        let (_tmp, settings) = fixture();
        let report = run::<RecordingSink>(&settings, DAY, None).await.unwrap();

        assert_eq!(report.iteration, "iteration_1");
        assert_eq!(report.spreadsheet_id, None);
        let text = std::fs::read_to_string(&report.summary_table).unwrap();
        let records = csv::parse(&text).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], summary::HEADER.to_vec());
        assert_eq!(records[1], report.row.fields());
        assert_eq!(report.row.master_cpu.as_deref(), Some("1.50"));
        assert_eq!(report.row.worker_cpu.as_deref(), Some("3.25"));
        assert_eq!(report.row.kubelet_memory.as_deref(), Some("2.00GB"));
        assert_eq!(report.row.service_count.as_deref(), Some("0"));
        assert_eq!(report.row.crio_cpu, None);

        let names: Vec<&str> = report
            .breakdown_tables
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["nodeCPU-run-1", "kubeletMemory-run-1", "podLatency-run-1"]
        );
        for t in &report.breakdown_tables {
            assert!(t.path.starts_with(settings.output_dir.join("max-job-val")));
        }
    }

    #[tokio::test]
    async fn repeated_runs_append_and_increment() {
        let (_tmp, settings) = fixture();
        run::<RecordingSink>(&settings, DAY, None).await.unwrap();
        let report = run::<RecordingSink>(&settings, DAY, None).await.unwrap();
        assert_eq!(report.iteration, "iteration_2");

        let text = std::fs::read_to_string(&report.summary_table).unwrap();
        let records = csv::parse(&text).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0][0], "Iteration");
        assert_eq!(records[1][0], "iteration_1");
        assert_eq!(records[2][0], "iteration_2");
    }

    #[tokio::test]
    async fn upload_creates_spreadsheet_once_and_pushes_tables() {
        let (_tmp, mut settings) = fixture();
        with_upload(&mut settings);
        let sink = RecordingSink::default();

        let report = run(&settings, DAY, Some(&sink)).await.unwrap();
        assert_eq!(report.spreadsheet_id.as_deref(), Some("sheet-1"));

        let calls = sink.calls.borrow().clone();
        assert_eq!(
            calls[0],
            Call::CreateSpreadsheet {
                parent: "folder".into(),
                name: format!("{DAY}.csv"),
            }
        );
        assert_eq!(
            calls[1],
            Call::Upload {
                id: "sheet-1".into(),
                name: "Sheet1".into(),
                rows: 2,
            }
        );
        assert_eq!(
            calls[2],
            Call::CreateSheet {
                id: "sheet-1".into(),
                name: "nodeCPU-run-1".into(),
            }
        );
        assert_eq!(calls.len(), 2 + 2 * report.breakdown_tables.len());

        // second run reuses the persisted id
        let sink = RecordingSink::default();
        run(&settings, DAY, Some(&sink)).await.unwrap();
        let calls = sink.calls.borrow();
        assert!(!calls
            .iter()
            .any(|c| matches!(c, Call::CreateSpreadsheet { .. })));
        assert_eq!(
            calls[0],
            Call::Upload {
                id: "sheet-1".into(),
                name: "Sheet1".into(),
                rows: 3,
            }
        );
    }

    #[tokio::test]
    async fn missing_local_table_is_restored_from_spreadsheet() {
        let (_tmp, mut settings) = fixture();
        with_upload(&mut settings);
        let data_dir = DataDir::new(&settings.output_dir);
        data_dir.init().unwrap();
        let mut state = RunState::load(data_dir.state()).unwrap();
        state.set_sheet_id(DAY, "existing").unwrap();

        let mut stored = csv::format_record(&summary::HEADER);
        stored.push_str(&csv::format_record(&SummaryRow::new("iteration_1", "old").fields()));
        let sink = RecordingSink {
            stored: stored.into_bytes(),
            ..Default::default()
        };

        let report = run(&settings, DAY, Some(&sink)).await.unwrap();
        let calls = sink.calls.borrow();
        assert_eq!(
            calls[0],
            Call::Fetch {
                id: "existing".into()
            }
        );
        let records = csv::parse(&std::fs::read_to_string(&report.summary_table).unwrap()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1][3], "old");
        assert_eq!(records[2][3], "run-1");
    }

    #[tokio::test]
    async fn sink_failure_aborts_run() {
        let (_tmp, mut settings) = fixture();
        with_upload(&mut settings);
        let sink = RecordingSink {
            fail_uploads: true,
            ..Default::default()
        };
        let err = run(&settings, DAY, Some(&sink)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Sink(SinkError::Status { status: 403, .. })));
        // breakdown tables are not written after the failed upload
        let breakdown = DataDir::new(&settings.output_dir).breakdown_dir();
        assert_eq!(std::fs::read_dir(breakdown).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_metrics_dir_aborts_run() {
        let (tmp, mut settings) = fixture();
        settings.metrics_dir = tmp.path().join("nope");
        let err = run::<RecordingSink>(&settings, DAY, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Discovery(_)));
    }
}
