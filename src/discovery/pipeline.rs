//! Discovery pipeline: one kernel task per search path.

use crate::core::{PipelineSpec, ResourceReqs, StageSpec, TaskSpec};
use crate::error::{Error, Result};
use crate::ilog_debug;

pub const DISCOVERY_PIPELINE: &str = "Disc";

/// Executable that runs the discovery kernel on the target resource.
pub const KERNEL_EXECUTABLE: &str = "iceberg";

/// Name of the table written for the search path at `index`.
pub fn table_name(index: usize, filetype: &str) -> String {
    format!("images{}.{}", index, filetype)
}

/// Render module names as `module load` commands.
pub fn module_loads(modules: &[String]) -> Vec<String> {
    modules.iter().map(|m| format!("module load {}", m)).collect()
}

/// Builder for the discovery pipeline of a run.
#[derive(Debug, Clone)]
pub struct Discovery {
    paths: Vec<String>,
    modules: Vec<String>,
    pre_execs: Vec<String>,
    image_ftype: String,
    kernel: String,
}

impl Discovery {
    pub fn new(paths: &[String]) -> Self {
        Self {
            paths: paths.to_vec(),
            modules: Vec::new(),
            pre_execs: Vec::new(),
            image_ftype: "tif".to_string(),
            kernel: KERNEL_EXECUTABLE.to_string(),
        }
    }

    pub fn modules(mut self, modules: &[String]) -> Self {
        self.modules = modules.to_vec();
        self
    }

    pub fn pre_execs(mut self, pre_execs: &[String]) -> Self {
        self.pre_execs = pre_execs.to_vec();
        self
    }

    /// Extension of the images to look for (`tif`, `png`, ...).
    pub fn image_ftype(mut self, image_ftype: &str) -> Self {
        self.image_ftype = image_ftype.to_string();
        self
    }

    /// Override the kernel executable, e.g. with an absolute path.
    pub fn kernel(mut self, executable: &str) -> Self {
        self.kernel = executable.to_string();
        self
    }

    /// Environment setup for every kernel task: module loads first, then the
    /// remaining pre-exec commands.
    pub fn environment(&self) -> Vec<String> {
        let mut commands = module_loads(&self.modules);
        commands.extend(self.pre_execs.iter().cloned());
        commands
    }

    /// Build the pipeline; the tables are written as `images<i>.<filetype>`.
    ///
    /// # Errors
    /// Returns `Error::Precondition` when no search path was given.
    pub fn build(&self, filetype: &str) -> Result<PipelineSpec> {
        if self.paths.is_empty() {
            return Err(Error::Precondition("Images paths are not set".to_string()));
        }

        let pre_exec = self.environment();
        let mut stage = StageSpec::new(format!("{}-S0", DISCOVERY_PIPELINE));

        for (i, path) in self.paths.iter().enumerate() {
            let task = TaskSpec::new(format!("{}-T{}", DISCOVERY_PIPELINE, i), &self.kernel)
                .arguments([
                    "discover".to_string(),
                    path.clone(),
                    format!("--filename=images{}", i),
                    format!("--filetype={}", filetype),
                    "--filesize".to_string(),
                    format!("--image_ftype={}", self.image_ftype),
                ])
                .pre_exec(&pre_exec)
                .download(table_name(i, filetype))
                .cpu(ResourceReqs::openmp(1, 1));
            ilog_debug!("Discovery task {} for path {}", task.name, path);
            stage.add_task(task);
        }

        let pipeline = PipelineSpec::new(DISCOVERY_PIPELINE).with_stage(stage);
        pipeline.validate()?;
        Ok(pipeline)
    }
}

/// Build the discovery pipeline for `search_paths` with default image type.
pub fn build_discovery_pipeline(
    search_paths: &[String],
    module_loads: &[String],
    pre_exec_commands: &[String],
    output_filetype: &str,
) -> Result<PipelineSpec> {
    Discovery::new(search_paths)
        .modules(module_loads)
        .pre_execs(pre_exec_commands)
        .build(output_filetype)
}
