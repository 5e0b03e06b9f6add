//! Run-record persistence.
//!
//! The engine only produces in-memory structures; this module is the
//! external collaborator that writes them out. Every run lands in
//! `{runs_dir}/last_run.json` (always the most recent run) and is archived
//! under `{runs_dir}/history/` with a timestamped filename.
//!
//! Layout:
//!   {runs_dir}/last_run.json                — most recent run
//!   {runs_dir}/history/{ts}-{run_id}.json   — one file per run

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::executor::{ExecutionResult, LogEntry};
use crate::plan::Plan;

/// Everything a run leaves behind, in replayable form.
#[derive(Debug, Serialize)]
pub struct RunRecord<'a> {
    pub id: String,
    pub created: String,
    pub plan: &'a Plan,
    pub logs: &'a [LogEntry],
    pub artifact: String,
}

/// Writes run records beneath a runs directory.
pub struct RunStore {
    runs_dir: PathBuf,
}

impl RunStore {
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;
        Ok(Self {
            runs_dir: path.to_path_buf(),
        })
    }

    /// Persists one run. Returns the path of `last_run.json`.
    pub fn record(&self, plan: &Plan, result: &ExecutionResult) -> Result<PathBuf> {
        let id = uuid::Uuid::new_v4().to_string();
        let created = Utc::now().to_rfc3339();
        let record = RunRecord {
            id: id.clone(),
            created: created.clone(),
            plan,
            logs: &result.entries,
            artifact: result.artifact.display().to_string(),
        };
        let json = serde_json::to_string_pretty(&record)?;

        let last_run = self.runs_dir.join("last_run.json");
        fs::write(&last_run, &json)?;

        let history = self.runs_dir.join("history");
        fs::create_dir_all(&history)?;
        // Colons are not portable in filenames
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        fs::write(history.join(format!("{stamp}-{id}.json")), &json)?;

        info!("Run {id} recorded at {}", last_run.display());
        Ok(last_run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::execute;
    use crate::plan::{OnFail, Skill, Step, StepParams};
    use crate::sandbox::Sandbox;

    fn run_once(dir: &Path) -> (Plan, ExecutionResult) {
        let sandbox = Sandbox::open(&dir.join("box")).unwrap();
        let plan = Plan {
            steps: vec![Step {
                skill: Skill::WriteText,
                params: StepParams {
                    path: Some("a.txt".to_string()),
                    text: Some("hello".to_string()),
                    ..Default::default()
                },
                on_fail: OnFail::Abort,
            }],
        };
        let result = execute(&plan, &sandbox).unwrap();
        (plan, result)
    }

    #[test]
    fn test_record_writes_last_run_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(&dir.path().join("runs")).unwrap();
        let (plan, result) = run_once(dir.path());

        let last_run = store.record(&plan, &result).unwrap();
        assert!(last_run.is_file());

        let history: Vec<_> = fs::read_dir(dir.path().join("runs/history"))
            .unwrap()
            .collect();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_record_content_is_replayable() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(&dir.path().join("runs")).unwrap();
        let (plan, result) = run_once(dir.path());

        let last_run = store.record(&plan, &result).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(last_run).unwrap()).unwrap();

        assert!(value["id"].is_string());
        assert!(value["created"].is_string());
        assert_eq!(value["plan"]["steps"][0]["skill"], "write_text");
        assert_eq!(value["logs"][0]["ok"], true);
        assert_eq!(value["logs"][0]["bytes"], 5);
        assert!(value["artifact"].as_str().unwrap().ends_with("a.txt"));
    }

    #[test]
    fn test_last_run_is_overwritten_history_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(&dir.path().join("runs")).unwrap();
        let (plan, result) = run_once(dir.path());

        store.record(&plan, &result).unwrap();
        store.record(&plan, &result).unwrap();

        let history: Vec<_> = fs::read_dir(dir.path().join("runs/history"))
            .unwrap()
            .collect();
        assert_eq!(history.len(), 2);
    }
}
