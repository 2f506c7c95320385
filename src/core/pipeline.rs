//! Stages and pipelines.
//!
//! A stage groups independent tasks; the engine finishes every task of a
//! stage before it starts the next stage of the same pipeline. Pipelines
//! are independent of each other.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::task::TaskSpec;
use crate::error::{Error, Result};

/// A named barrier of independent tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub tasks: Vec<TaskSpec>,
}

impl StageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    pub fn add_task(&mut self, task: TaskSpec) {
        self.tasks.push(task);
    }

    pub fn with_task(mut self, task: TaskSpec) -> Self {
        self.add_task(task);
        self
    }

    /// Look up a task of this stage by name.
    pub fn task(&self, name: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// An ordered sequence of stages for one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub name: String,
    pub stages: Vec<StageSpec>,
}

impl PipelineSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn add_stage(&mut self, stage: StageSpec) {
        self.stages.push(stage);
    }

    pub fn with_stage(mut self, stage: StageSpec) -> Self {
        self.add_stage(stage);
        self
    }

    /// All tasks of the pipeline in stage order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskSpec> {
        self.stages.iter().flat_map(|s| s.tasks.iter())
    }

    pub fn task_count(&self) -> usize {
        self.stages.iter().map(|s| s.tasks.len()).sum()
    }

    /// Check the pipeline before submission.
    ///
    /// Every task must validate, task names must be unique within the
    /// pipeline, no stage may be empty, and a colocation tag must name a
    /// task from an earlier stage.
    ///
    /// # Errors
    /// Returns `Error::Validation` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("pipeline name is empty".to_string()));
        }

        let mut earlier: HashSet<&str> = HashSet::new();
        for stage in &self.stages {
            if stage.tasks.is_empty() {
                return Err(Error::Validation(format!(
                    "stage {} of pipeline {} has no tasks",
                    stage.name, self.name
                )));
            }

            let mut current: HashSet<&str> = HashSet::new();
            for task in &stage.tasks {
                task.validate()?;
                if earlier.contains(task.name.as_str()) || !current.insert(task.name.as_str()) {
                    return Err(Error::Validation(format!(
                        "duplicate task name {} in pipeline {}",
                        task.name, self.name
                    )));
                }
                if let Some(target) = &task.colocate {
                    if !earlier.contains(target.as_str()) {
                        return Err(Error::Validation(format!(
                            "task {} is colocated with {}, which is not in an earlier stage",
                            task.name, target
                        )));
                    }
                }
            }
            earlier.extend(current);
        }
        Ok(())
    }
}
