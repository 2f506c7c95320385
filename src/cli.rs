//! Command-line interface.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};

use crate::config::{
    AnalysisConfig, Config, GeneralConfig, LandcoverParams, PenguinsParams, RiversParams,
    SealsParams, UseCaseKind,
};
use crate::discovery::DiscoverArgs;
use crate::executor::{handoff_root, Executor, HandoffEngine, ResourceConfig};
use crate::usecase::UseCase;
use crate::workflow::{RunId, RunSummary};
use crate::{ilog, ilog_debug, Error, Result};

/// ICEBERG - imagery analysis workflows on HPC resources
#[derive(Parser, Debug)]
#[command(name = "iceberg")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    ICEBERG_DEBUG=1          Enable debug logging (alternative to --debug)\n    ICEBERG_DEBUG=trace      Also log every submitted workflow\n    VE_SEALS, VE_PENGUINS, VE_RIVERS\n                             Virtual environment of each use case\n    GDAL_HOME                GDAL build used by the rivers tasks\n    RMQ_ENDPOINT, RMQ_PORT, RMQ_USERNAME, RMQ_PASSWORD, RADICAL_PILOT_DBURL\n                             Broker and database, also for --config runs"
)]
pub struct Cli {
    /// Read the whole configuration from a JSON or TOML file; other flags
    /// are ignored
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub general: GeneralConfig,

    /// Enable debug logging (writes to ~/.iceberg/iceberg.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Count seals in WorldView imagery
    Seals(SealsParams),
    /// Detect penguin colonies
    Penguins(PenguinsParams),
    /// Extract river masks
    Rivers(RiversParams),
    /// Classify land cover
    Landcover(LandcoverParams),
    /// List the images of a directory into a table (runs on the resource)
    Discover(DiscoverArgs),
}

/// What the command line asks for, after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Discover(DiscoverArgs),
    Analysis(Config),
}

impl Cli {
    /// Resolve the parsed arguments into a validated invocation.
    ///
    /// # Errors
    /// Returns `Error::MissingField` when required fields are absent,
    /// `Error::Config` when no use case was selected, or the error of
    /// loading the configuration file.
    pub fn into_invocation(self) -> Result<Invocation> {
        if let Some(Command::Discover(args)) = self.command {
            return Ok(Invocation::Discover(args));
        }

        let config = match self.config {
            Some(path) => Config::load(&path)?,
            None => {
                let analysis = match self.command {
                    Some(Command::Seals(p)) => AnalysisConfig::Seals(p),
                    Some(Command::Penguins(p)) => AnalysisConfig::Penguins(p),
                    Some(Command::Rivers(p)) => AnalysisConfig::Rivers(p),
                    Some(Command::Landcover(p)) => AnalysisConfig::Landcover(p),
                    Some(Command::Discover(_)) | None => {
                        let names: Vec<_> = UseCaseKind::ALL.iter().map(|k| k.as_str()).collect();
                        return Err(Error::Config(format!(
                            "no analysis selected; expected one of {}",
                            names.join(", ")
                        )));
                    }
                };
                Config::new(self.general, analysis)
            }
        };
        config.validate()?;
        Ok(Invocation::Analysis(config))
    }
}

/// Usage line of the command.
pub fn usage() -> String {
    Cli::command().render_usage().to_string()
}

/// Whether an error is the user's to fix on the command line.
pub fn is_usage_error(error: &Error) -> bool {
    matches!(
        error,
        Error::MissingField(_)
            | Error::Config(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::UnsupportedUseCase(_)
    )
}

/// Execute an analysis run with the JSON hand-off engine.
///
/// Hand-off documents go to `<workdir>/handoff/<run name>/`. Each one blocks
/// until the orchestrator marks it done; the discovery tables it leaves in
/// the working directory are read after the discovery batch is done.
pub fn run_analysis(config: &Config) -> Result<RunSummary> {
    let resource = ResourceConfig::from_general(&config.general)?;
    let use_case = UseCase::from_config(config, &resource)?;

    let id = RunId::new();
    let name = config
        .general
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| id.default_name());
    let workdir = config.general.workdir();
    ilog_debug!("Run {} ({}) workdir={}", name, id, workdir.display());

    let engine = HandoffEngine::new(handoff_root(&workdir));
    let summary = Executor::new(&name, resource, use_case, engine)?
        .run_id(id)
        .input_paths(&config.general.input_path)
        .discovery_dir(workdir)
        .run()?;
    ilog!("Run {} finished with status {}", summary.name, summary.status);
    Ok(summary)
}
