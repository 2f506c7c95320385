//! Rivers: tile, predict water masks and mosaic them back into one scene.

use crate::config::RiversParams;
use crate::core::{base_name, PipelineSpec, ResourceReqs, StageSpec, TaskSpec};
use crate::discovery::ImageRecord;
use crate::executor::ResourceConfig;
use crate::{Error, Result};

use super::{required, required_size, stage_name, task_name, TaskEnvironment};

pub const IMAGE_FTYPE: &str = "tif";

pub const HPC_RESOURCE: &str = "xsede.bridges2";

const MODULES: [&str; 1] = ["AI/anaconda3-tf1.2020.11"];

const TILING_EXECUTABLE: &str = "iceberg_rivers.tiling";
const PREDICTING_EXECUTABLE: &str = "iceberg_rivers.predicting";
const MOSAIC_EXECUTABLE: &str = "iceberg_rivers.mosaic";

#[derive(Debug, Clone)]
pub struct Rivers {
    tile_size: u32,
    step: u32,
    weights_path: String,
    env: TaskEnvironment,
}

impl Rivers {
    /// `gdal_home` is the prefix of a GDAL build whose tools and data the
    /// tasks need on their paths.
    pub fn new(
        params: &RiversParams,
        resource: &ResourceConfig,
        venv: Option<String>,
        gdal_home: Option<String>,
    ) -> Result<Self> {
        let tile_size = params
            .tile_size
            .ok_or_else(|| Error::MissingField("tile_size".to_string()))?;
        let step = params
            .step
            .ok_or_else(|| Error::MissingField("step".to_string()))?;
        Ok(Self {
            tile_size,
            step,
            weights_path: required(&params.weights_path, "weights_path")?,
            env: environment(&resource.resource, venv.as_deref(), gdal_home.as_deref()),
        })
    }

    pub fn environment(&self) -> &TaskEnvironment {
        &self.env
    }

    /// Three stages on one node. Tiles and predictions stay in node-local
    /// storage; only the mosaic lands in the task sandbox.
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
                format!("--input={}", base),
                format!("--output=$NODE_LFS_PATH/{}/", tiling_task),
                format!("--tile_size={}", self.tile_size),
                format!("--step={}", self.step),
            ])
            .pre_exec(pre_execs)
            .link(&image.path)
            .cpu(ResourceReqs::new(1, 4))
            .lfs(size);

        let predict_stage = stage_name(name, 1);
        let predict_task = task_name(&predict_stage, 0);
        let predict = TaskSpec::new(&predict_task, PREDICTING_EXECUTABLE)
            .arguments([
                format!("--input=$NODE_LFS_PATH/{}/", tiling_task),
                format!("--weights_path={}", self.weights_path),
                format!("--output_folder=$NODE_LFS_PATH/{}/", predict_task),
            ])
            .pre_exec(pre_execs)
            .cpu(ResourceReqs::new(1, 1))
            .gpu(ResourceReqs::new(1, 1))
            .lfs(size)
            .colocate_with(&tiling_task);

        let mosaic_stage = stage_name(name, 2);
        let mosaic = TaskSpec::new(task_name(&mosaic_stage, 0), MOSAIC_EXECUTABLE)
            .arguments([
                format!("--input=$NODE_LFS_PATH/{}/", predict_task),
                format!("--input_WV={}", base),
                format!("--tile_size={}", self.tile_size),
                format!("--step={}", self.step),
                "--output_folder=./".to_string(),
            ])
            .pre_exec(pre_execs)
            .link(&image.path)
            .cpu(ResourceReqs::new(1, 1))
            .colocate_with(&tiling_task);

        Ok(PipelineSpec::new(name)
            .with_stage(StageSpec::new(tiling_stage).with_task(tiling))
            .with_stage(StageSpec::new(predict_stage).with_task(predict))
            .with_stage(StageSpec::new(mosaic_stage).with_task(mosaic)))
    }
}

fn environment(resource: &str, venv: Option<&str>, gdal_home: Option<&str>) -> TaskEnvironment {
    let mut env = TaskEnvironment::for_resource(resource, HPC_RESOURCE, &MODULES);
    if let Some(gdal) = gdal_home {
        env.pre_execs.push(format!("export PATH={}/bin:$PATH", gdal));
        env.pre_execs
            .push(format!("export LD_LIBRARY_PATH={}/lib:$LD_LIBRARY_PATH", gdal));
        env.pre_execs.push(format!("export GDAL_DATA={}/share/gdal", gdal));
    }
    // conda environment, not a plain virtualenv
    if let Some(ve) = venv {
        env.pre_execs.push(format!("source activate {}", ve));
        env.pre_execs
            .push(format!("export PYTHONPATH={}/lib/python3.7/site-packages/", ve));
    }
    env
}
