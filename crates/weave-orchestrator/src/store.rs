// Orchestrator Run Store
// Persistence for active runs, finalized run history, and status event logs

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use weave_types::{OrchestrationRun, StatusUpdate};

use crate::error::{OrchestratorError, Result};

const ACTIVE_RUN_FILE: &str = "active_run.json";
const HISTORY_FILE: &str = "history.jsonl";
const EVENTS_FILE: &str = "events.log";

// ============================================================================
// Run Store
// ============================================================================

/// File-backed store, one directory per orchestrator
pub struct RunStore {
    base_dir: PathBuf,
    // active_run.json is rewritten from both the coordinator and executor tasks
    write_lock: Mutex<()>,
}

impl RunStore {
    /// Create a store under `<state_dir>/orchestrator`
    pub fn new(state_dir: &Path) -> Result<Self> {
        let base_dir = state_dir.join("orchestrator");

        fs::create_dir_all(&base_dir).map_err(|e| {
            OrchestratorError::IoError(format!("Failed to create orchestrator directory: {}", e))
        })?;

        Ok(Self {
            base_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn orchestrator_dir(&self, orchestrator_id: &str) -> PathBuf {
        self.base_dir.join(encode_id(orchestrator_id))
    }

    fn ensure_orchestrator_dir(&self, orchestrator_id: &str) -> Result<PathBuf> {
        let dir = self.orchestrator_dir(orchestrator_id);
        fs::create_dir_all(&dir).map_err(|e| {
            OrchestratorError::IoError(format!("Failed to create orchestrator directory: {}", e))
        })?;
        Ok(dir)
    }

    /// Save the in-flight run record
    pub fn save_active_run(&self, run: &OrchestrationRun) -> Result<()> {
        let dir = self.ensure_orchestrator_dir(&run.orchestrator_id)?;
        let content = serde_json::to_string_pretty(run)?;
        let _guard = self.lock_writes()?;
        atomic_write(&dir.join(ACTIVE_RUN_FILE), &content)
    }

    pub fn load_active_run(&self, orchestrator_id: &str) -> Result<Option<OrchestrationRun>> {
        let path = self.orchestrator_dir(orchestrator_id).join(ACTIVE_RUN_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| OrchestratorError::IoError(format!("Failed to read run file: {}", e)))?;

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| OrchestratorError::ParseError(format!("Failed to parse run file: {}", e)))
    }

    pub fn clear_active_run(&self, orchestrator_id: &str) -> Result<()> {
        let path = self.orchestrator_dir(orchestrator_id).join(ACTIVE_RUN_FILE);
        let _guard = self.lock_writes()?;
        if path.exists() {
            fs::remove_file(&path).map_err(|e| {
                OrchestratorError::IoError(format!("Failed to remove active run file: {}", e))
            })?;
        }
        Ok(())
    }

    fn lock_writes(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| OrchestratorError::IoError("Run store write lock poisoned".to_string()))
    }

    /// Append a finalized run to history. Agent copies are not kept.
    pub fn append_history(&self, run: &OrchestrationRun) -> Result<()> {
        let dir = self.ensure_orchestrator_dir(&run.orchestrator_id)?;
        append_json_line(&dir.join(HISTORY_FILE), &run.history_record())
    }

    pub fn load_history(&self, orchestrator_id: &str) -> Result<Vec<OrchestrationRun>> {
        read_json_lines(&self.orchestrator_dir(orchestrator_id).join(HISTORY_FILE))
    }

    pub fn append_event(&self, update: &StatusUpdate) -> Result<()> {
        let dir = self.ensure_orchestrator_dir(&update.orchestrator_id)?;
        append_json_line(&dir.join(EVENTS_FILE), update)
    }

    pub fn load_events(&self, orchestrator_id: &str) -> Result<Vec<StatusUpdate>> {
        read_json_lines(&self.orchestrator_dir(orchestrator_id).join(EVENTS_FILE))
    }

    /// Orchestrator ids that have a directory in the store
    pub fn list_orchestrators(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .orchestrator_dir_names()?
            .iter()
            .filter_map(|name| decode_id(name))
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn orchestrator_dir_names(&self) -> Result<Vec<String>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();

        for entry in fs::read_dir(&self.base_dir).map_err(|e| {
            OrchestratorError::IoError(format!("Failed to read orchestrator directory: {}", e))
        })? {
            let entry = entry.map_err(|e| {
                OrchestratorError::IoError(format!("Failed to read directory entry: {}", e))
            })?;

            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// Every active run record on disk, regardless of status
    pub fn load_all_active_runs(&self) -> Result<Vec<OrchestrationRun>> {
        let mut runs = Vec::new();
        for dir_name in self.orchestrator_dir_names()? {
            let path = self.base_dir.join(&dir_name).join(ACTIVE_RUN_FILE);
            if !path.exists() {
                continue;
            }
            let content = fs::read_to_string(&path).map_err(|e| {
                OrchestratorError::IoError(format!("Failed to read run file: {}", e))
            })?;
            match serde_json::from_str::<OrchestrationRun>(&content) {
                Ok(run) => runs.push(run),
                Err(e) => tracing::warn!(
                    "Skipping unreadable active run in {}: {}",
                    path.display(),
                    e
                ),
            }
        }
        Ok(runs)
    }
}

/// Orchestrator ids come from the canvas, so keep them filesystem-safe.
/// Every byte outside `[A-Za-z0-9_-]` becomes `%XX`, which keeps distinct ids
/// in distinct directories. The empty id maps to a lone `%`.
fn encode_id(id: &str) -> String {
    if id.is_empty() {
        return "%".to_string();
    }
    let mut encoded = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

/// Inverse of `encode_id`; `None` for names the store did not create
fn decode_id(name: &str) -> Option<String> {
    if name == "%" {
        return Some(String::new());
    }
    let bytes = name.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| OrchestratorError::IoError(format!("Failed to open {}: {}", path.display(), e)))?;

    let line = serde_json::to_string(value)?;

    writeln!(file, "{}", line)
        .map_err(|e| OrchestratorError::IoError(format!("Failed to append line: {}", e)))?;

    Ok(())
}

fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)
        .map_err(|e| OrchestratorError::IoError(format!("Failed to open {}: {}", path.display(), e)))?;

    let reader = BufReader::new(file);
    let mut items = Vec::new();

    for line in reader.lines() {
        let line = line
            .map_err(|e| OrchestratorError::IoError(format!("Failed to read line: {}", e)))?;

        if let Ok(item) = serde_json::from_str(&line) {
            items.push(item);
        }
    }

    Ok(items)
}

/// Atomic write using temp file and rename
fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    fs::write(&temp_path, content)
        .map_err(|e| OrchestratorError::IoError(format!("Failed to write temp file: {}", e)))?;

    fs::rename(&temp_path, path)
        .map_err(|e| OrchestratorError::IoError(format!("Failed to rename temp file: {}", e)))?;

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use weave_types::{
        ConnectedAgent, OrchestratorConfig, RunStatus, StatusEventKind,
    };

    fn sample_run(orchestrator_id: &str) -> OrchestrationRun {
        let config = OrchestratorConfig {
            agents: vec![ConnectedAgent::new("a1", 0), ConnectedAgent::new("a2", 1)],
            ..OrchestratorConfig::default()
        };
        OrchestrationRun::new(orchestrator_id, None, &config)
    }

    #[test]
    fn test_save_load_clear_active_run() {
        let temp = tempdir().unwrap();
        let store = RunStore::new(temp.path()).unwrap();
        let run = sample_run("orch-1");

        store.save_active_run(&run).unwrap();
        let loaded = store.load_active_run("orch-1").unwrap().unwrap();
        assert_eq!(loaded.run_id, run.run_id);
        assert_eq!(loaded.agents.len(), 2);

        store.clear_active_run("orch-1").unwrap();
        assert!(store.load_active_run("orch-1").unwrap().is_none());
    }

    #[test]
    fn test_history_appends_in_order() {
        let temp = tempdir().unwrap();
        let store = RunStore::new(temp.path()).unwrap();

        let mut first = sample_run("orch-1");
        first.transition(RunStatus::Running);
        first.transition(RunStatus::Completed);
        let mut second = sample_run("orch-1");
        second.transition(RunStatus::Running);
        second.transition(RunStatus::Failed);

        store.append_history(&first).unwrap();
        store.append_history(&second).unwrap();

        let history = store.load_history("orch-1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, RunStatus::Completed);
        assert_eq!(history[1].status, RunStatus::Failed);
    }

    #[test]
    fn test_events_skip_corrupt_lines() {
        let temp = tempdir().unwrap();
        let store = RunStore::new(temp.path()).unwrap();

        store
            .append_event(&StatusUpdate::new("orch-1", "run-1", StatusEventKind::RunStarted))
            .unwrap();
        let log = temp
            .path()
            .join("orchestrator")
            .join("orch-1")
            .join(EVENTS_FILE);
        let mut file = OpenOptions::new().append(true).open(&log).unwrap();
        writeln!(file, "{{not json").unwrap();
        store
            .append_event(&StatusUpdate::new("orch-1", "run-1", StatusEventKind::RunCompleted))
            .unwrap();

        let events = store.load_events("orch-1").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, StatusEventKind::RunCompleted);
    }

    #[test]
    fn test_list_orchestrators_ignores_files() {
        let temp = tempdir().unwrap();
        let store = RunStore::new(temp.path()).unwrap();

        store.save_active_run(&sample_run("orch-1")).unwrap();
        store.save_active_run(&sample_run("orch-2")).unwrap();
        std::fs::write(temp.path().join("orchestrator").join("some_file"), "content").unwrap();

        let ids = store.list_orchestrators().unwrap();
        assert_eq!(ids, vec!["orch-1".to_string(), "orch-2".to_string()]);
        assert_eq!(store.load_all_active_runs().unwrap().len(), 2);
    }

    #[test]
    fn test_ids_are_encoded_without_collisions() {
        assert_eq!(encode_id("../etc/passwd"), "%2E%2E%2Fetc%2Fpasswd");
        assert_eq!(encode_id(""), "%");
        assert_eq!(encode_id("node_42-b"), "node_42-b");
        assert_ne!(encode_id("orch.a"), encode_id("orch_a"));
        assert_ne!(encode_id("a%2E"), encode_id("a."));
        for id in ["orch.a", "orch_a", "", "ünïcode id", "a%2E"] {
            assert_eq!(decode_id(&encode_id(id)).as_deref(), Some(id));
        }
        assert!(decode_id("%zz").is_none());
    }

    #[test]
    fn test_similar_ids_keep_separate_active_runs() {
        let temp = tempdir().unwrap();
        let store = RunStore::new(temp.path()).unwrap();
        let dotted = sample_run("orch.a");
        let underscored = sample_run("orch_a");

        store.save_active_run(&dotted).unwrap();
        store.save_active_run(&underscored).unwrap();
        assert_eq!(store.load_all_active_runs().unwrap().len(), 2);

        store.clear_active_run("orch_a").unwrap();
        let remaining = store.load_all_active_runs().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].run_id, dotted.run_id);
        assert_eq!(
            store.list_orchestrators().unwrap(),
            vec!["orch.a".to_string(), "orch_a".to_string()]
        );
    }

    #[test]
    fn test_history_omits_agent_copies() {
        let temp = tempdir().unwrap();
        let store = RunStore::new(temp.path()).unwrap();
        let mut run = sample_run("orch-1");
        run.transition(RunStatus::Running);
        run.transition(RunStatus::Completed);

        store.append_history(&run).unwrap();

        let history = store.load_history("orch-1").unwrap();
        assert!(history[0].agents.is_empty());
        assert_eq!(run.agents.len(), 2);
    }
}
