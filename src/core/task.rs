//! Task description handed to the orchestration engine.
//!
//! A task is one remote invocation of an executable: its command line,
//! the shell commands that prepare its environment, the files staged in
//! and out of its sandbox, and the CPU/GPU slots it needs.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::error::{Error, Result};

/// printf-style (`%s`, `%d`) or brace (`{name}`) placeholders left in a
/// command line. `$VAR` references are expanded by the engine and allowed.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%[sdif]|\{[A-Za-z0-9_]*\}").unwrap());

/// Threading model requested for a task's processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadType {
    OpenMP,
}

impl std::fmt::Display for ThreadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreadType::OpenMP => write!(f, "OpenMP"),
        }
    }
}

/// CPU or GPU slots requested by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReqs {
    pub processes: u32,
    pub threads_per_process: u32,
    pub thread_type: Option<ThreadType>,
}

impl ResourceReqs {
    pub fn new(processes: u32, threads_per_process: u32) -> Self {
        Self {
            processes,
            threads_per_process,
            thread_type: None,
        }
    }

    pub fn openmp(processes: u32, threads_per_process: u32) -> Self {
        Self {
            processes,
            threads_per_process,
            thread_type: Some(ThreadType::OpenMP),
        }
    }
}

impl Default for ResourceReqs {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// A single task of a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Name, unique within its pipeline.
    pub name: String,
    /// Executable resolved on the target resource.
    pub executable: String,
    pub arguments: Vec<String>,
    /// Shell commands run in order before the executable.
    pub pre_exec: Vec<String>,
    /// Files copied from the client into the task sandbox.
    pub upload_input_data: BTreeSet<String>,
    /// Files on the target resource linked into the task sandbox.
    pub link_input_data: BTreeSet<String>,
    /// Files copied from the task sandbox back to the client.
    pub download_output_data: BTreeSet<String>,
    pub cpu_reqs: ResourceReqs,
    pub gpu_reqs: Option<ResourceReqs>,
    /// Node-local scratch space per process, in megabytes.
    pub lfs_per_process: u64,
    /// Name of a task this one must share a node with.
    pub colocate: Option<String>,
}

impl TaskSpec {
    /// Create a task running `executable` with no arguments and a single
    /// CPU slot.
    pub fn new(name: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            arguments: Vec::new(),
            pre_exec: Vec::new(),
            upload_input_data: BTreeSet::new(),
            link_input_data: BTreeSet::new(),
            download_output_data: BTreeSet::new(),
            cpu_reqs: ResourceReqs::default(),
            gpu_reqs: None,
            lfs_per_process: 0,
            colocate: None,
        }
    }

    pub fn arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn pre_exec(mut self, commands: &[String]) -> Self {
        self.pre_exec = commands.to_vec();
        self
    }

    pub fn upload(mut self, path: impl Into<String>) -> Self {
        self.upload_input_data.insert(path.into());
        self
    }

    pub fn link(mut self, path: impl Into<String>) -> Self {
        self.link_input_data.insert(path.into());
        self
    }

    pub fn download(mut self, path: impl Into<String>) -> Self {
        self.download_output_data.insert(path.into());
        self
    }

    pub fn cpu(mut self, reqs: ResourceReqs) -> Self {
        self.cpu_reqs = reqs;
        self
    }

    pub fn gpu(mut self, reqs: ResourceReqs) -> Self {
        self.gpu_reqs = Some(reqs);
        self
    }

    pub fn lfs(mut self, megabytes: u64) -> Self {
        self.lfs_per_process = megabytes;
        self
    }

    /// Place this task on the same node as the task named `task`.
    pub fn colocate_with(mut self, task: impl Into<String>) -> Self {
        self.colocate = Some(task.into());
        self
    }

    /// Files the task consumes, uploaded or linked.
    pub fn input_data_refs(&self) -> BTreeSet<&str> {
        self.upload_input_data
            .iter()
            .chain(self.link_input_data.iter())
            .map(String::as_str)
            .collect()
    }

    /// Files the task produces for the client.
    pub fn output_data_refs(&self) -> BTreeSet<&str> {
        self.download_output_data.iter().map(String::as_str).collect()
    }

    /// Check the task is complete enough to hand to the engine.
    ///
    /// # Errors
    /// Returns `Error::Validation` if the name or executable is empty, or if
    /// an argument or pre-exec command still contains a placeholder.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("task name is empty".to_string()));
        }
        if self.executable.trim().is_empty() {
            return Err(Error::Validation(format!(
                "task {} has no executable",
                self.name
            )));
        }
        if self.cpu_reqs.processes == 0 {
            return Err(Error::Validation(format!(
                "task {} requests zero CPU processes",
                self.name
            )));
        }
        for value in self.arguments.iter().chain(self.pre_exec.iter()) {
            if let Some(found) = PLACEHOLDER_RE.find(value) {
                return Err(Error::Validation(format!(
                    "task {} has unresolved placeholder {:?} in {:?}",
                    self.name,
                    found.as_str(),
                    value
                )));
            }
        }
        Ok(())
    }
}

/// Final path component of `path`, used for files staged into a sandbox.
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// `base_name` without its extension.
pub fn file_stem(path: &str) -> &str {
    let base = base_name(path);
    match base.split_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    }
}
