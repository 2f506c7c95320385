//! Use-case pipeline builders.
//!
//! Each use case turns one discovered image into one pipeline. The set of
//! use cases is closed: `UseCase` is an enum and every operation matches on
//! it, so adding a variant is a compile error until it is handled
//! everywhere.

pub mod penguins;
pub mod rivers;
pub mod seals;

use std::path::PathBuf;

use crate::config::{AnalysisConfig, Config, UseCaseKind};
use crate::core::PipelineSpec;
use crate::discovery::{module_loads, Discovery, ImageRecord};
use crate::executor::ResourceConfig;
use crate::{ilog_debug, ilog_warn, Error, Result};

pub use penguins::Penguins;
pub use rivers::Rivers;
pub use seals::Seals;

/// Environment setup shared by every task of a use case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskEnvironment {
    /// Environment modules to load.
    pub modules: Vec<String>,
    /// Commands run after the modules are loaded.
    pub pre_execs: Vec<String>,
}

impl TaskEnvironment {
    /// `modules` are only available on `hpc_resource`.
    pub(crate) fn for_resource(resource: &str, hpc_resource: &str, modules: &[&str]) -> Self {
        let mut env = Self::default();
        if resource == hpc_resource {
            env.modules = modules.iter().map(|m| m.to_string()).collect();
        }
        env
    }

    /// Activate a virtualenv and put its site-packages for `python` on the
    /// `PYTHONPATH`.
    pub(crate) fn activate_virtualenv(mut self, venv: Option<&str>, python: &str) -> Self {
        if let Some(ve) = venv {
            self.pre_execs.push(format!("source {}/bin/activate", ve));
            self.pre_execs.push(format!(
                "export PYTHONPATH={}/lib/python{}/site-packages",
                ve, python
            ));
        }
        self
    }

    /// `module load` commands followed by the other pre-exec commands.
    pub fn pre_exec_commands(&self) -> Vec<String> {
        let mut commands = module_loads(&self.modules);
        commands.extend(self.pre_execs.iter().cloned());
        for command in &commands {
            ilog_debug!("Preexec added: {}", command);
        }
        commands
    }
}

/// A configured use case, ready to build pipelines.
#[derive(Debug, Clone)]
pub enum UseCase {
    Seals(Seals),
    Penguins(Penguins),
    Rivers(Rivers),
}

impl UseCase {
    /// Configure the use case selected by `config` for `resource`.
    ///
    /// Virtual environment paths not given as parameters are read from the
    /// `VE_SEALS`, `VE_PENGUINS` and `VE_RIVERS` environment variables, and
    /// the Rivers GDAL prefix from `GDAL_HOME`.
    pub fn from_config(config: &Config, resource: &ResourceConfig) -> Result<Self> {
        Self::with_env(config, resource, |key| std::env::var(key).ok())
    }

    /// Like [`UseCase::from_config`] with an explicit environment lookup.
    ///
    /// # Errors
    /// Returns `Error::MissingField` for absent use-case parameters and
    /// `Error::UnsupportedUseCase` for use cases without a builder.
    pub fn with_env<F>(config: &Config, resource: &ResourceConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let output_path = config.general.output_path.clone().unwrap_or_default();
        let venv = |explicit: &Option<String>, key: &str| {
            let path = explicit
                .clone()
                .filter(|v| !v.trim().is_empty())
                .or_else(|| lookup(key).filter(|v| !v.trim().is_empty()));
            if path.is_none() {
                ilog_warn!("No virtual environment configured ({} is not set)", key);
            }
            path
        };

        let use_case = match &config.analysis {
            AnalysisConfig::Seals(params) => UseCase::Seals(Seals::new(
                params,
                resource,
                venv(&params.ve_seals, "VE_SEALS"),
            )?),
            AnalysisConfig::Penguins(params) => UseCase::Penguins(Penguins::new(
                params,
                resource,
                &output_path,
                venv(&params.ve_penguins, "VE_PENGUINS"),
            )?),
            AnalysisConfig::Rivers(params) => UseCase::Rivers(Rivers::new(
                params,
                resource,
                venv(&params.ve_rivers, "VE_RIVERS"),
                params
                    .gdal_home
                    .clone()
                    .filter(|v| !v.trim().is_empty())
                    .or_else(|| lookup("GDAL_HOME").filter(|v| !v.trim().is_empty())),
            )?),
            AnalysisConfig::Landcover(_) => {
                return Err(Error::UnsupportedUseCase(UseCaseKind::Landcover))
            }
        };
        ilog_debug!("{} initialized", use_case.kind());
        Ok(use_case)
    }

    pub fn kind(&self) -> UseCaseKind {
        match self {
            UseCase::Seals(_) => UseCaseKind::Seals,
            UseCase::Penguins(_) => UseCaseKind::Penguins,
            UseCase::Rivers(_) => UseCaseKind::Rivers,
        }
    }

    pub fn environment(&self) -> &TaskEnvironment {
        match self {
            UseCase::Seals(s) => s.environment(),
            UseCase::Penguins(p) => p.environment(),
            UseCase::Rivers(r) => r.environment(),
        }
    }

    /// Extension of the images this use case analyses.
    pub fn image_ftype(&self) -> &'static str {
        match self {
            UseCase::Seals(_) => seals::IMAGE_FTYPE,
            UseCase::Penguins(_) => penguins::IMAGE_FTYPE,
            UseCase::Rivers(_) => rivers::IMAGE_FTYPE,
        }
    }

    /// Files staged once per run and shared by all tasks.
    pub fn shared_data(&self) -> Result<Vec<PathBuf>> {
        match self {
            UseCase::Seals(s) => Ok(vec![s.shared_model()?]),
            UseCase::Penguins(p) => Ok(vec![p.shared_model()?]),
            UseCase::Rivers(_) => Ok(Vec::new()),
        }
    }

    /// Discovery pipeline builder using this use case's environment.
    pub fn discovery(&self, paths: &[String]) -> Discovery {
        let env = self.environment();
        Discovery::new(paths)
            .modules(&env.modules)
            .pre_execs(&env.pre_execs)
            .image_ftype(self.image_ftype())
    }

    /// Pipeline for one image.
    pub fn generate_pipeline(
        &self,
        name: &str,
        pre_execs: &[String],
        image: &ImageRecord,
    ) -> Result<PipelineSpec> {
        match self {
            UseCase::Seals(s) => s.generate_pipeline(name, pre_execs, image),
            UseCase::Penguins(p) => p.generate_pipeline(name, pre_execs, image),
            UseCase::Rivers(r) => r.generate_pipeline(name, pre_execs, image),
        }
    }

    /// One validated pipeline per image, named `P<ordinal>`.
    ///
    /// No images means no pipelines; that is not an error.
    pub fn build_analysis_pipelines(&self, images: &[ImageRecord]) -> Result<Vec<PipelineSpec>> {
        let pre_execs = self.environment().pre_exec_commands();
        images
            .iter()
            .enumerate()
            .map(|(idx, image)| {
                let pipeline = self.generate_pipeline(&pipeline_name(idx), &pre_execs, image)?;
                pipeline.validate()?;
                Ok(pipeline)
            })
            .collect()
    }
}

/// Build the analysis pipelines of the use case selected in `config`.
pub fn build_analysis_pipelines(
    images: &[ImageRecord],
    config: &Config,
    resource: &ResourceConfig,
) -> Result<Vec<PipelineSpec>> {
    UseCase::from_config(config, resource)?.build_analysis_pipelines(images)
}

pub fn pipeline_name(ordinal: usize) -> String {
    format!("P{}", ordinal)
}

pub(crate) fn stage_name(pipeline: &str, index: usize) -> String {
    format!("{}.S{}", pipeline, index)
}

pub(crate) fn task_name(stage: &str, index: usize) -> String {
    format!("{}.T{}", stage, index)
}

/// Value of a required parameter.
pub(crate) fn required(value: &Option<String>, field: &str) -> Result<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::MissingField(field.to_string()))
}

/// Size of an image that must have been discovered with `--filesize`.
pub(crate) fn required_size(image: &ImageRecord) -> Result<u64> {
    image.size_mb.ok_or_else(|| {
        Error::Validation(format!("image {} has no size; discover with --filesize", image.path))
    })
}
