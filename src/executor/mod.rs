//! Run driver: one engine session, discovery then analysis, then teardown.

mod engine;
pub mod handoff;
mod resource;

use std::path::{Path, PathBuf};

pub use engine::{Engine, SessionGuard};
pub use handoff::{AckPolling, HandoffEngine};
pub use resource::{AccessScheme, BrokerConfig, ResourceConfig, LOCAL_MARKER};

use crate::discovery::{read_image_table, table_name, ImageRecord};
use crate::usecase::UseCase;
use crate::workflow::{RunId, RunPhase, RunStatus, RunSummary, Workflow};
use crate::log::{self, LogLevel};
use crate::{ilog, ilog_debug, ilog_error, ilog_trace, ilog_warn, Error, Result};

/// Format of the tables written by the discovery kernel.
pub const TABLE_FILETYPE: &str = "csv";

/// Drives one run of a use case on one resource.
///
/// The engine session is acquired in [`Executor::new`] and released exactly
/// once, whether the run succeeds, fails or the executor is dropped unused.
pub struct Executor<E: Engine> {
    id: RunId,
    name: String,
    resource: ResourceConfig,
    use_case: UseCase,
    input_paths: Vec<String>,
    discovery_dir: PathBuf,
    session: SessionGuard<E>,
}

impl<E: Engine> Executor<E> {
    /// Configure `engine` for `resource` and take ownership of its session.
    ///
    /// # Errors
    /// Returns `Error::Precondition` when the run name is empty or the engine
    /// needs a message broker that `resource` does not describe.
    pub fn new(run_name: &str, resource: ResourceConfig, use_case: UseCase, mut engine: E) -> Result<Self> {
        if run_name.trim().is_empty() {
            return Err(Error::Precondition("run name is empty".to_string()));
        }
        if engine.requires_broker() && resource.broker.is_none() {
            return Err(Error::Precondition(
                "message broker endpoint and port are not set".to_string(),
            ));
        }
        if engine.requires_broker() && resource.database_url.is_none() {
            ilog_warn!("No database URL configured for {}", resource.resource);
        }

        engine.configure(run_name, &resource)?;
        ilog!(
            "Executor {} on {} ({} access, {} cpus, {} gpus, {} min)",
            run_name,
            resource.resource,
            resource.access_scheme,
            resource.cpus,
            resource.gpus,
            resource.walltime
        );

        Ok(Self {
            id: RunId::new(),
            name: run_name.to_string(),
            resource,
            use_case,
            input_paths: Vec::new(),
            discovery_dir: PathBuf::from("."),
            session: SessionGuard::new(engine),
        })
    }

    /// Use a pre-allocated run identity.
    pub fn run_id(mut self, id: RunId) -> Self {
        self.id = id;
        self
    }

    /// Directories to search for images.
    pub fn input_paths(mut self, paths: &[String]) -> Self {
        self.input_paths = paths.to_vec();
        self
    }

    /// Where the engine leaves the discovery tables.
    pub fn discovery_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.discovery_dir = dir.into();
        self
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource(&self) -> &ResourceConfig {
        &self.resource
    }

    pub fn use_case(&self) -> &UseCase {
        &self.use_case
    }

    /// Run discovery and analysis to completion, then tear the session down.
    ///
    /// Teardown errors are logged; the returned error is always the one that
    /// stopped the run.
    pub fn run(mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::new(self.id, &self.name, self.use_case.kind());
        let result = self.drive(&mut summary);
        self.session.close();

        match result {
            Ok(()) => {
                summary.complete();
                ilog!(
                    "Run {} complete: {} image(s), {} pipeline(s)",
                    self.name,
                    summary.images_discovered,
                    summary.pipelines_submitted
                );
                Ok(summary)
            }
            Err(e) => {
                summary.status = RunStatus::Failed;
                ilog_error!(
                    "Run {} {} during {}: {}",
                    self.name,
                    summary.status,
                    summary.phase,
                    e
                );
                Err(e)
            }
        }
    }

    fn drive(&mut self, summary: &mut RunSummary) -> Result<()> {
        summary.enter(RunPhase::Discovery);
        let shared = self.use_case.shared_data()?;
        if !shared.is_empty() {
            self.session.engine_mut().stage_shared(&shared)?;
        }

        let discovery = self
            .use_case
            .discovery(&self.input_paths)
            .build(TABLE_FILETYPE)?;
        self.clear_tables()?;
        self.submit(Workflow::new(RunPhase::Discovery, vec![discovery]))?;

        let images = self.collect_images()?;
        summary.images_discovered = images.len();

        summary.enter(RunPhase::Analysis);
        let pipelines = self.use_case.build_analysis_pipelines(&images)?;
        if pipelines.is_empty() {
            ilog_warn!("No images discovered, skipping analysis");
            return Ok(());
        }
        summary.pipelines_submitted = pipelines.len();
        self.submit(Workflow::new(RunPhase::Analysis, pipelines))
    }

    fn submit(&mut self, workflow: Workflow) -> Result<()> {
        workflow.validate()?;
        ilog_debug!(
            "Submitting {} workflow: {} pipeline(s), {} task(s)",
            workflow.phase,
            workflow.pipelines.len(),
            workflow.task_count()
        );
        if log::get_level() >= LogLevel::Trace {
            ilog_trace!("{}", serde_json::to_string(&workflow)?);
        }
        self.session.engine_mut().submit(&workflow)
    }

    /// Remove tables left by an earlier run so only this discovery is read.
    fn clear_tables(&self) -> Result<()> {
        for index in 0..self.input_paths.len() {
            let table = self.discovery_dir.join(table_name(index, TABLE_FILETYPE));
            match std::fs::remove_file(&table) {
                Ok(()) => ilog_debug!("Removed stale table {}", table.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Read every discovery table, in search path order.
    fn collect_images(&self) -> Result<Vec<ImageRecord>> {
        let mut images = Vec::new();
        for index in 0..self.input_paths.len() {
            let table = self.discovery_dir.join(table_name(index, TABLE_FILETYPE));
            let records = read_image_table(&table)?;
            ilog_debug!("{}: {} image(s)", table.display(), records.len());
            images.extend(records);
        }
        Ok(images)
    }
}

/// Default hand-off root for a working directory.
pub fn handoff_root(workdir: &Path) -> PathBuf {
    workdir.join("handoff")
}
