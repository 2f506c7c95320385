//! Run bookkeeping types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::UseCaseKind;
use crate::core::PipelineSpec;
use crate::Result;

/// Unique identifier for a run.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable run names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }

    /// Default run name when none was configured.
    pub fn default_name(&self) -> String {
        format!("iceberg.{}", self.short())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Phases of a run.
///
/// 1. Discovery - list the images behind every search path
/// 2. Analysis - one pipeline per discovered image
/// 3. Complete - every submission returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Discovery,
    Analysis,
    Complete,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Discovery => write!(f, "discovery"),
            RunPhase::Analysis => write!(f, "analysis"),
            RunPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Status of a run in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A batch of independent pipelines submitted to the engine together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub phase: RunPhase,
    pub pipelines: Vec<PipelineSpec>,
}

impl Workflow {
    pub fn new(phase: RunPhase, pipelines: Vec<PipelineSpec>) -> Self {
        Self { phase, pipelines }
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.pipelines.iter().map(PipelineSpec::task_count).sum()
    }

    /// Validate every pipeline of the batch.
    pub fn validate(&self) -> Result<()> {
        self.pipelines.iter().try_for_each(PipelineSpec::validate)
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub name: String,
    pub use_case: UseCaseKind,
    pub status: RunStatus,
    pub phase: RunPhase,
    pub images_discovered: usize,
    pub pipelines_submitted: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn new(id: RunId, name: &str, use_case: UseCaseKind) -> Self {
        Self {
            id,
            name: name.to_string(),
            use_case,
            status: RunStatus::Pending,
            phase: RunPhase::Discovery,
            images_discovered: 0,
            pipelines_submitted: 0,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn enter(&mut self, phase: RunPhase) {
        self.status = RunStatus::Running;
        self.phase = phase;
    }

    pub fn complete(&mut self) {
        self.phase = RunPhase::Complete;
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
    }
}
