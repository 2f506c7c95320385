//! Seals: tile each WorldView image, then run the CNN over the tiles.

use std::path::PathBuf;

use crate::config::SealsParams;
use crate::core::{base_name, file_stem, PipelineSpec, ResourceReqs, StageSpec, TaskSpec};
use crate::discovery::ImageRecord;
use crate::executor::ResourceConfig;
use crate::Result;

use super::{required, required_size, stage_name, task_name, TaskEnvironment};

pub const IMAGE_FTYPE: &str = "tif";

/// Resource on which the seals environment modules are available.
pub const HPC_RESOURCE: &str = "xsede.bridges";

const MODULES: [&str; 5] = ["psc_path/1.1", "slurm/default", "intel/17.4", "python3", "cuda"];
const PYTHON_VERSION: &str = "3.5";

const TILING_EXECUTABLE: &str = "iceberg_seals.tiling";
const PREDICTING_EXECUTABLE: &str = "iceberg_seals.predicting";

#[derive(Debug, Clone)]
pub struct Seals {
    scale_bands: String,
    model: String,
    model_path: String,
    model_arch: String,
    hyperparameters: String,
    env: TaskEnvironment,
}

impl Seals {
    pub fn new(params: &SealsParams, resource: &ResourceConfig, venv: Option<String>) -> Result<Self> {
        Ok(Self {
            scale_bands: required(&params.scale_bands, "scale_bands")?,
            model: required(&params.model, "model")?,
            model_path: required(&params.model_path, "model_path")?,
            model_arch: required(&params.model_arch, "model_arch")?,
            hyperparameters: required(&params.hyperparameters, "hyperparameters")?,
            env: TaskEnvironment::for_resource(&resource.resource, HPC_RESOURCE, &MODULES)
                .activate_virtualenv(venv.as_deref(), PYTHON_VERSION),
        })
    }

    pub fn environment(&self) -> &TaskEnvironment {
        &self.env
    }

    /// The model checkpoint, staged once and linked by every prediction task.
    pub fn shared_model(&self) -> Result<PathBuf> {
        Ok(std::path::absolute(PathBuf::from(&self.model_path).join(&self.model))?)
    }

    /// Two stages: tiling into node-local storage, then prediction on the
    /// same node.
    pub fn generate_pipeline(
        &self,
        name: &str,
        pre_execs: &[String],
        image: &ImageRecord,
    ) -> Result<PipelineSpec> {
        let size = required_size(image)?;
        let base = base_name(&image.path);

        let tiling_stage = stage_name(name, 0);
        let tiling_task = task_name(&tiling_stage, 0);
        let tiling = TaskSpec::new(&tiling_task, TILING_EXECUTABLE)
            .arguments([
                format!("--scale_bands={}", self.scale_bands),
                format!("--input_image={}", base),
                format!("--output_folder=$NODE_LFS_PATH/{}", tiling_task),
            ])
            .pre_exec(pre_execs)
            .link(&image.path)
            .cpu(ResourceReqs::new(1, 4))
            .lfs(size);

        let predict_stage = stage_name(name, 1);
        let predict = TaskSpec::new(task_name(&predict_stage, 0), PREDICTING_EXECUTABLE)
            .arguments([
                "--input_image".to_string(),
                base.to_string(),
                "--model_architecture".to_string(),
                self.model_arch.clone(),
                "--hyperparameter_set".to_string(),
                self.hyperparameters.clone(),
                "--training_set".to_string(),
                "test_vanilla".to_string(),
                "--test_folder".to_string(),
                format!("$NODE_LFS_PATH/{}", tiling_task),
                "--model_path".to_string(),
                "./".to_string(),
                "--output_folder".to_string(),
                format!("./{}", file_stem(&image.path)),
            ])
            .pre_exec(pre_execs)
            .link(format!("$SHARED/{}", base_name(&self.model)))
            .cpu(ResourceReqs::new(1, 1))
            .gpu(ResourceReqs::new(1, 1))
            .colocate_with(&tiling_task);

        Ok(PipelineSpec::new(name)
            .with_stage(StageSpec::new(tiling_stage).with_task(tiling))
            .with_stage(StageSpec::new(predict_stage).with_task(predict)))
    }
}
