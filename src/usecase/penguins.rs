//! Penguins: guano detection on PNG scenes, one GPU task per image.

use std::path::PathBuf;

use crate::config::PenguinsParams;
use crate::core::{base_name, PipelineSpec, ResourceReqs, StageSpec, TaskSpec};
use crate::discovery::ImageRecord;
use crate::executor::ResourceConfig;
use crate::{Error, Result};

use super::{required, stage_name, task_name, TaskEnvironment};

pub const IMAGE_FTYPE: &str = "png";

pub const HPC_RESOURCE: &str = "xsede.bridges";

const MODULES: [&str; 2] = ["cuda", "python3"];
const PYTHON_VERSION: &str = "3.5";

const DETECT_EXECUTABLE: &str = "iceberg_penguins.detect";

#[derive(Debug, Clone)]
pub struct Penguins {
    model: String,
    model_path: String,
    output_path: String,
    gpu_ids: String,
    epoch: u32,
    env: TaskEnvironment,
}

impl Penguins {
    pub fn new(
        params: &PenguinsParams,
        resource: &ResourceConfig,
        output_path: &str,
        venv: Option<String>,
    ) -> Result<Self> {
        if output_path.trim().is_empty() {
            return Err(Error::MissingField("output_path".to_string()));
        }
        Ok(Self {
            model: required(&params.model, "model")?,
            model_path: required(&params.model_path, "model_path")?,
            output_path: output_path.to_string(),
            gpu_ids: params.gpu_ids.clone(),
            epoch: params.epoch,
            env: TaskEnvironment::for_resource(&resource.resource, HPC_RESOURCE, &MODULES)
                .activate_virtualenv(venv.as_deref(), PYTHON_VERSION),
        })
    }

    pub fn environment(&self) -> &TaskEnvironment {
        &self.env
    }

    pub fn shared_model(&self) -> Result<PathBuf> {
        Ok(std::path::absolute(PathBuf::from(&self.model_path).join(&self.model))?)
    }

    pub fn generate_pipeline(
        &self,
        name: &str,
        pre_execs: &[String],
        image: &ImageRecord,
    ) -> Result<PipelineSpec> {
        let stage = stage_name(name, 0);
        let task = TaskSpec::new(task_name(&stage, 0), DETECT_EXECUTABLE)
            .arguments([
                "--gpu_ids".to_string(),
                self.gpu_ids.clone(),
                "--name".to_string(),
                self.model.clone(),
                "--epoch".to_string(),
                self.epoch.to_string(),
                "--checkpoints_dir".to_string(),
                self.model_path.clone(),
                "--output".to_string(),
                self.output_path.clone(),
                "--testset".to_string(),
                "GE".to_string(),
                "--input_im".to_string(),
                base_name(&image.path).to_string(),
            ])
            .pre_exec(pre_execs)
            .link(&image.path)
            .cpu(ResourceReqs::openmp(1, 1))
            .gpu(ResourceReqs::openmp(1, 1));

        Ok(PipelineSpec::new(name).with_stage(StageSpec::new(stage).with_task(task)))
    }
}
