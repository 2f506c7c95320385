//! Run configuration.
//!
//! A configuration has two parts: the "general" record describing the
//! resource and session, and the "analysis" record holding the parameters
//! of one use case. Both come either from command-line flags or from a
//! JSON/TOML file, never a mix of the two.

use clap::Args;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{ilog_debug, Error, Result};

/// Resource and session settings.
#[derive(Args, Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Where the execution will happen
    #[arg(short = 'r', long)]
    pub resource: Option<String>,

    /// The queue of the resource
    #[arg(short = 'q', long)]
    pub queue: Option<String>,

    /// How many CPUs will be required
    #[arg(short = 'c', long)]
    pub cpus: Option<u32>,

    /// How many GPUs will be required
    #[arg(short = 'g', long)]
    pub gpus: Option<u32>,

    /// Where the input images are (repeat for several directories)
    #[arg(long = "input_path")]
    #[serde(deserialize_with = "one_or_many")]
    pub input_path: Vec<String>,

    /// Where the results should be saved
    #[arg(long = "output_path")]
    pub output_path: Option<String>,

    /// The estimated execution time in minutes
    #[arg(short = 'w', long)]
    pub walltime: Option<u32>,

    /// The project that will be charged
    #[arg(long)]
    pub project: Option<String>,

    /// Message broker user name
    #[arg(long = "rmq_username", env = "RMQ_USERNAME")]
    pub rmq_username: Option<String>,

    /// Message broker password
    #[arg(long = "rmq_password", env = "RMQ_PASSWORD", hide_env_values = true)]
    pub rmq_password: Option<String>,

    /// Message broker host name
    #[arg(long = "rmq_endpoint", env = "RMQ_ENDPOINT")]
    pub rmq_endpoint: Option<String>,

    /// Message broker port
    #[arg(long = "rmq_port", env = "RMQ_PORT")]
    pub rmq_port: Option<u16>,

    /// Database URL used by the pilot system
    #[arg(long = "radical_pilot_dburl", env = "RADICAL_PILOT_DBURL", hide_env_values = true)]
    pub radical_pilot_dburl: Option<String>,

    /// Unique name of this run (generated when omitted)
    #[arg(long)]
    pub name: Option<String>,

    /// Directory receiving hand-off documents and discovery tables
    #[arg(long)]
    pub workdir: Option<PathBuf>,
}

impl GeneralConfig {
    /// Names of required fields that are absent.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if is_blank(&self.resource) {
            missing.push("resource");
        }
        if self.walltime.is_none() {
            missing.push("walltime");
        }
        if self.cpus.is_none() {
            missing.push("cpus");
        }
        if self.input_path.iter().all(|p| p.trim().is_empty()) {
            missing.push("input_path");
        }
        if is_blank(&self.output_path) {
            missing.push("output_path");
        }
        missing
    }

    pub fn workdir(&self) -> PathBuf {
        self.workdir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Use cases known to the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UseCaseKind {
    Seals,
    Penguins,
    Rivers,
    Landcover,
}

impl UseCaseKind {
    pub const ALL: [UseCaseKind; 4] = [
        UseCaseKind::Seals,
        UseCaseKind::Penguins,
        UseCaseKind::Rivers,
        UseCaseKind::Landcover,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UseCaseKind::Seals => "seals",
            UseCaseKind::Penguins => "penguins",
            UseCaseKind::Rivers => "rivers",
            UseCaseKind::Landcover => "landcover",
        }
    }
}

impl std::fmt::Display for UseCaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options for Seals type analysis.
#[derive(Args, Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealsParams {
    /// The size of the scale bands
    #[arg(short = 's', long = "scale_bands")]
    pub scale_bands: Option<String>,

    /// Name of the model file
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Directory of the model file
    #[arg(long = "model_path")]
    pub model_path: Option<String>,

    /// Model architecture
    #[arg(long = "model_arch")]
    pub model_arch: Option<String>,

    /// Hyperparameter set
    #[arg(long)]
    pub hyperparameters: Option<String>,

    /// Python virtualenv with the seals package installed (default: $VE_SEALS)
    #[arg(long = "ve_seals")]
    pub ve_seals: Option<String>,
}

/// Options for Penguins type analysis.
#[derive(Args, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenguinsParams {
    /// The size of the scale bands
    #[arg(short = 's', long = "scale_bands")]
    pub scale_bands: Option<String>,

    /// Name of the trained model
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Directory holding the model checkpoints
    #[arg(long = "model_path")]
    pub model_path: Option<String>,

    /// Hyperparameter set
    #[arg(long)]
    pub hyperparameters: Option<String>,

    /// Shadow mask
    #[arg(long = "shadow_mask")]
    pub shadow_mask: Option<String>,

    /// GPU ids passed to the detector
    #[arg(long = "gpu_ids", default_value = "0")]
    pub gpu_ids: String,

    /// Checkpoint epoch to load
    #[arg(long, default_value_t = 300)]
    pub epoch: u32,

    /// Python virtualenv with the penguins package installed (default: $VE_PENGUINS)
    #[arg(long = "ve_penguins")]
    pub ve_penguins: Option<String>,
}

impl Default for PenguinsParams {
    fn default() -> Self {
        Self {
            scale_bands: None,
            model: None,
            model_path: None,
            hyperparameters: None,
            shadow_mask: None,
            gpu_ids: "0".to_string(),
            epoch: 300,
            ve_penguins: None,
        }
    }
}

/// Options for Rivers type analysis.
#[derive(Args, Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiversParams {
    /// Minimum confidence to accept
    #[arg(long)]
    pub threshold: Option<String>,

    /// Hyperparameter set
    #[arg(long)]
    pub hyperparameters: Option<String>,

    /// Name of the model
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Path of a custom model
    #[arg(long = "model_path")]
    pub model_path: Option<String>,

    /// Path to the water mask
    #[arg(long = "ndwi_path")]
    pub ndwi_path: Option<String>,

    /// Side of a square tile, in pixels
    #[arg(long = "tile_size")]
    pub tile_size: Option<u32>,

    /// Distance between tiles, in pixels
    #[arg(long)]
    pub step: Option<u32>,

    /// Weights of the prediction network
    #[arg(long = "weights_path")]
    pub weights_path: Option<String>,

    /// Python environment with the rivers package installed (default: $VE_RIVERS)
    #[arg(long = "ve_rivers")]
    pub ve_rivers: Option<String>,

    /// Prefix of the GDAL build to put on the task paths (default: $GDAL_HOME)
    #[arg(long = "gdal_home")]
    pub gdal_home: Option<String>,
}

/// Options for Landcover type analysis.
#[derive(Args, Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LandcoverParams {
    /// Addition of new ground data to the spectral library
    #[arg(long = "spec_lib")]
    pub spec_lib: Option<String>,

    /// Selection of regions of interest for atmospheric correction
    #[arg(long = "roi_sel")]
    pub roi_sel: Option<String>,

    /// Selection of the atmospheric model
    #[arg(long = "atmcorr_model")]
    pub atmcorr_model: Option<String>,

    /// Access to landcover masks
    #[arg(long = "landcover_lib")]
    pub landcover_lib: Option<String>,

    /// Shadow mask
    #[arg(long = "shadow_mask")]
    pub shadow_mask: Option<String>,
}

/// Use-case specific parameters, tagged by `which` in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "which", rename_all = "lowercase")]
pub enum AnalysisConfig {
    Seals(SealsParams),
    Penguins(PenguinsParams),
    Rivers(RiversParams),
    Landcover(LandcoverParams),
}

impl AnalysisConfig {
    pub fn kind(&self) -> UseCaseKind {
        match self {
            AnalysisConfig::Seals(_) => UseCaseKind::Seals,
            AnalysisConfig::Penguins(_) => UseCaseKind::Penguins,
            AnalysisConfig::Rivers(_) => UseCaseKind::Rivers,
            AnalysisConfig::Landcover(_) => UseCaseKind::Landcover,
        }
    }

    /// Names of required use-case fields that are absent.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let mut require = |name: &'static str, present: bool| {
            if !present {
                missing.push(name);
            }
        };
        match self {
            AnalysisConfig::Seals(p) => {
                require("scale_bands", !is_blank(&p.scale_bands));
                require("model", !is_blank(&p.model));
                require("model_path", !is_blank(&p.model_path));
                require("model_arch", !is_blank(&p.model_arch));
                require("hyperparameters", !is_blank(&p.hyperparameters));
            }
            AnalysisConfig::Penguins(p) => {
                require("model", !is_blank(&p.model));
                require("model_path", !is_blank(&p.model_path));
            }
            AnalysisConfig::Rivers(p) => {
                require("tile_size", p.tile_size.is_some());
                require("step", p.step.is_some());
                require("weights_path", !is_blank(&p.weights_path));
            }
            AnalysisConfig::Landcover(p) => {
                require("spec_lib", !is_blank(&p.spec_lib));
                require("roi_sel", !is_blank(&p.roi_sel));
                require("atmcorr_model", !is_blank(&p.atmcorr_model));
                require("landcover_lib", !is_blank(&p.landcover_lib));
            }
        }
        missing
    }
}

/// The full configuration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub analysis: AnalysisConfig,
}

impl Config {
    pub fn new(general: GeneralConfig, analysis: AnalysisConfig) -> Self {
        Self { general, analysis }
    }

    /// Load a configuration file. Files ending in `.toml` are read as TOML,
    /// anything else as JSON.
    ///
    /// # Errors
    /// Returns `Error::Io` if the file can't be read, or a parse error.
    pub fn load(path: &Path) -> Result<Self> {
        ilog_debug!("Config::load path={}", path.display());
        let content = fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let config: Self = if is_toml {
            toml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        ilog_debug!(
            "Config loaded: resource={:?}, analysis={}",
            config.general.resource,
            config.analysis.kind()
        );
        Ok(config)
    }

    /// Check that every required general and use-case field is present.
    ///
    /// # Errors
    /// Returns `Error::MissingField` listing all absent fields.
    pub fn validate(&self) -> Result<()> {
        let mut missing = self.general.missing_fields();
        missing.extend(self.analysis.missing_fields());
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingField(missing.join(", ")))
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Accept `"path"` as well as `["path", ...]`.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(path) => vec![path],
        OneOrMany::Many(paths) => paths,
    })
}
