use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const OBS_TARGET: &str = "weave.obs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Engine,
    Orchestrator,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Engine => "engine",
            ProcessKind::Orchestrator => "orchestrator",
        }
    }

    /// Daily files are named `<prefix>.<YYYY-MM-DD>.jsonl`
    pub fn file_prefix(self) -> String {
        format!("weave.{}", self.as_str())
    }
}

/// Keeps the file writer alive. Dropping it flushes buffered records.
pub struct ProcessLogging {
    pub process: ProcessKind,
    pub logs_dir: PathBuf,
    /// Expired files removed while initialising
    pub removed: Vec<PathBuf>,
    _guard: WorkerGuard,
}

impl std::fmt::Debug for ProcessLogging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessLogging")
            .field("process", &self.process)
            .field("logs_dir", &self.logs_dir)
            .field("removed", &self.removed.len())
            .finish()
    }
}

/// One structured lifecycle record of a run. Unset fields are logged as empty strings.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub orchestrator_id: Option<&'a str>,
    pub run_id: Option<&'a str>,
    pub agent_id: Option<&'a str>,
    pub strategy: Option<&'a str>,
    pub status: Option<&'a str>,
    pub error_code: Option<&'a str>,
    pub detail: Option<&'a str>,
}

/// Replace free text such as prompt overrides with its length and digest
pub fn redact_text(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!(
        "[redacted chars={} sha256={}]",
        trimmed.chars().count(),
        short_hash(trimmed)
    )
}

/// First 12 hex digits of the SHA-256 digest; stable across builds and hosts
pub fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest
        .iter()
        .take(6)
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

macro_rules! obs_record {
    ($macro:ident, $process:expr, $event:expr) => {
        tracing::$macro!(
            target: OBS_TARGET,
            process = $process.as_str(),
            component = $event.component,
            event = $event.event,
            orchestrator_id = $event.orchestrator_id.unwrap_or(""),
            run_id = $event.run_id.unwrap_or(""),
            agent_id = $event.agent_id.unwrap_or(""),
            strategy = $event.strategy.unwrap_or(""),
            status = $event.status.unwrap_or(""),
            error_code = $event.error_code.unwrap_or(""),
            detail = $event.detail.unwrap_or(""),
            "observability_event"
        )
    };
}

pub fn emit_event(level: Level, process: ProcessKind, event: ObservabilityEvent<'_>) {
    if level == Level::ERROR {
        obs_record!(error, process, event);
    } else if level == Level::WARN {
        obs_record!(warn, process, event);
    } else if level == Level::DEBUG || level == Level::TRACE {
        obs_record!(debug, process, event);
    } else {
        obs_record!(info, process, event);
    }
}

/// Console layer on stderr plus a daily JSONL file under `logs_dir`.
/// `RUST_LOG` drives the filter, defaulting to `info`.
pub fn init_process_logging(
    process: ProcessKind,
    logs_dir: &Path,
    retention_days: u64,
) -> anyhow::Result<ProcessLogging> {
    fs::create_dir_all(logs_dir)?;
    let removed = remove_expired_logs(logs_dir, process, Utc::now().date_naive(), retention_days)?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(process.file_prefix())
        .filename_suffix("jsonl")
        .build(logs_dir)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false);

    // stdout carries the status stream
    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(true);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // a subscriber installed earlier (tests, embedding hosts) wins
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    Ok(ProcessLogging {
        process,
        logs_dir: logs_dir.to_path_buf(),
        removed,
        _guard: guard,
    })
}

/// Date stamp of one of `process`'s daily files, `None` for anything else
fn log_file_date(file_name: &str, process: ProcessKind) -> Option<NaiveDate> {
    let stamp = file_name
        .strip_prefix(&process.file_prefix())?
        .strip_prefix('.')?
        .strip_suffix(".jsonl")?;
    NaiveDate::parse_from_str(stamp, "%Y-%m-%d").ok()
}

fn remove_expired_logs(
    logs_dir: &Path,
    process: ProcessKind,
    today: NaiveDate,
    retention_days: u64,
) -> anyhow::Result<Vec<PathBuf>> {
    let Some(cutoff) = today.checked_sub_days(chrono::Days::new(retention_days)) else {
        return Ok(Vec::new());
    };

    let mut removed = Vec::new();
    for entry in fs::read_dir(logs_dir)?.flatten() {
        let path = entry.path();
        let expired = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| log_file_date(name, process))
            .is_some_and(|date| date < cutoff);
        if expired && path.is_file() && fs::remove_file(&path).is_ok() {
            removed.push(path);
        }
    }
    Ok(removed)
}

pub fn canonical_logs_dir_from_root(root: &Path) -> PathBuf {
    root.join("logs")
}
