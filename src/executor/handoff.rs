//! Engine adapter that hands descriptions to the orchestrator as JSON files.
//!
//! Everything for a run lands under `<root>/<run_name>/`:
//!
//! - `resource.json` - the resource description, written on configure
//! - `shared.json` - files staged once for the whole run
//! - `workflow-<nnn>-<phase>.json` - one document per submitted batch
//! - `session.json` - written on teardown with `terminated: true`
//!
//! A submission returns once the orchestrator acknowledges its document by
//! creating `workflow-<nnn>-<phase>.done` next to it, or fails when it
//! creates `workflow-<nnn>-<phase>.failed` instead. The content of a
//! `.failed` marker is the reason reported back.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use crate::workflow::Workflow;
use crate::{ilog, ilog_debug, Error, Result};

use super::{Engine, ResourceConfig};

pub const RESOURCE_FILE: &str = "resource.json";
pub const SHARED_FILE: &str = "shared.json";
pub const SESSION_FILE: &str = "session.json";

pub const DONE_EXTENSION: &str = "done";
pub const FAILED_EXTENSION: &str = "failed";

/// How the engine waits for the orchestrator to acknowledge a document.
#[derive(Debug, Clone)]
pub struct AckPolling {
    /// How often to look for a marker.
    pub poll_interval: Duration,
    /// Give up after this long. `None` waits for as long as it takes.
    pub timeout: Option<Duration>,
}

impl Default for AckPolling {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: None,
        }
    }
}

impl AckPolling {
    pub fn new(poll_interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    /// Fast polling with a bounded wait (useful for tests).
    pub fn fast() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug)]
pub struct HandoffEngine {
    root: PathBuf,
    requires_broker: bool,
    polling: AckPolling,
    run_dir: Option<PathBuf>,
    run_name: String,
    submissions: usize,
}

impl HandoffEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            requires_broker: true,
            polling: AckPolling::default(),
            run_name: String::new(),
            run_dir: None,
            submissions: 0,
        }
    }

    pub fn with_polling(mut self, polling: AckPolling) -> Self {
        self.polling = polling;
        self
    }

    /// Accept runs without message broker settings.
    pub fn without_broker(mut self) -> Self {
        self.requires_broker = false;
        self
    }

    /// Directory of the configured run, if any.
    pub fn run_dir(&self) -> Option<&Path> {
        self.run_dir.as_deref()
    }

    pub fn submissions(&self) -> usize {
        self.submissions
    }

    pub fn workflow_file(index: usize, workflow: &Workflow) -> String {
        format!("workflow-{:03}-{}.json", index, workflow.phase)
    }

    fn dir(&self) -> Result<&Path> {
        self.run_dir
            .as_deref()
            .ok_or_else(|| Error::Engine("engine session is not configured".to_string()))
    }

    /// Block until `document` is marked done or failed.
    fn wait_for_ack(&self, document: &Path) -> Result<()> {
        let done = document.with_extension(DONE_EXTENSION);
        let failed = document.with_extension(FAILED_EXTENSION);
        let started = Instant::now();
        ilog_debug!("Waiting for {}", done.display());

        loop {
            if done.exists() {
                ilog_debug!(
                    "{} acknowledged after {:?}",
                    document.display(),
                    started.elapsed()
                );
                return Ok(());
            }
            if failed.exists() {
                let reason = fs::read_to_string(&failed)?;
                let reason = reason.trim();
                return Err(Error::Engine(format!(
                    "{} failed: {}",
                    document.display(),
                    if reason.is_empty() { "no reason given" } else { reason }
                )));
            }
            if let Some(timeout) = self.polling.timeout {
                if started.elapsed() >= timeout {
                    return Err(Error::Engine(format!(
                        "{} not acknowledged within {:?}",
                        document.display(),
                        timeout
                    )));
                }
            }
            thread::sleep(self.polling.poll_interval);
        }
    }
}

/// Write through a temporary file so readers never see a partial document.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value)?;
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, &contents)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

impl Engine for HandoffEngine {
    fn requires_broker(&self) -> bool {
        self.requires_broker
    }

    fn configure(&mut self, run_name: &str, resource: &ResourceConfig) -> Result<()> {
        let run_dir = self.root.join(run_name);
        fs::create_dir_all(&run_dir)?;

        let document = serde_json::json!({
            "name": run_name,
            "resource": resource.engine_description(),
            "broker": resource.broker,
            "created_at": Utc::now(),
        });
        write_json(&run_dir.join(RESOURCE_FILE), &document)?;

        ilog!("Session {} configured in {}", run_name, run_dir.display());
        self.run_name = run_name.to_string();
        self.run_dir = Some(run_dir);
        Ok(())
    }

    fn stage_shared(&mut self, paths: &[PathBuf]) -> Result<()> {
        let dir = self.dir()?;
        let document = serde_json::json!({ "shared": paths });
        write_json(&dir.join(SHARED_FILE), &document)?;
        ilog_debug!("Shared data staged: {} file(s)", paths.len());
        Ok(())
    }

    fn submit(&mut self, workflow: &Workflow) -> Result<()> {
        let path = self.dir()?.join(Self::workflow_file(self.submissions, workflow));
        // Markers from an earlier run under the same name
        for extension in [DONE_EXTENSION, FAILED_EXTENSION] {
            match fs::remove_file(path.with_extension(extension)) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        write_json(&path, workflow)?;
        self.submissions += 1;
        ilog!(
            "Handed off {} workflow: {} pipeline(s), {} task(s) -> {}",
            workflow.phase,
            workflow.pipelines.len(),
            workflow.task_count(),
            path.display()
        );
        self.wait_for_ack(&path)?;
        ilog!("{} workflow finished", workflow.phase);
        Ok(())
    }

    fn terminate(&mut self) -> Result<()> {
        let dir = self.dir()?;
        let document = serde_json::json!({
            "name": self.run_name,
            "submissions": self.submissions,
            "terminated": true,
            "terminated_at": Utc::now(),
        });
        write_json(&dir.join(SESSION_FILE), &document)?;
        ilog!("Session {} terminated", self.run_name);
        Ok(())
    }
}
