//! The orchestration engine seam and its teardown guard.

use std::path::PathBuf;

use crate::workflow::Workflow;
use crate::{ilog_debug, ilog_error, Result};

use super::ResourceConfig;

/// An external pipeline/task orchestration engine.
///
/// Scheduling, retries and placement all happen on the other side of this
/// trait. `submit` blocks until the engine has finished with the batch.
pub trait Engine {
    /// Whether the engine needs a message broker to reach its agents.
    fn requires_broker(&self) -> bool;

    /// Acquire a session on `resource`. Called once, before anything else.
    fn configure(&mut self, run_name: &str, resource: &ResourceConfig) -> Result<()>;

    /// Stage files once per run into the engine's shared space.
    fn stage_shared(&mut self, paths: &[PathBuf]) -> Result<()>;

    /// Run a batch of pipelines to completion.
    fn submit(&mut self, workflow: &Workflow) -> Result<()>;

    /// Release the session and its resources.
    fn terminate(&mut self) -> Result<()>;
}

impl<E: Engine + ?Sized> Engine for &mut E {
    fn requires_broker(&self) -> bool {
        (**self).requires_broker()
    }

    fn configure(&mut self, run_name: &str, resource: &ResourceConfig) -> Result<()> {
        (**self).configure(run_name, resource)
    }

    fn stage_shared(&mut self, paths: &[PathBuf]) -> Result<()> {
        (**self).stage_shared(paths)
    }

    fn submit(&mut self, workflow: &Workflow) -> Result<()> {
        (**self).submit(workflow)
    }

    fn terminate(&mut self) -> Result<()> {
        (**self).terminate()
    }
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn requires_broker(&self) -> bool {
        (**self).requires_broker()
    }

    fn configure(&mut self, run_name: &str, resource: &ResourceConfig) -> Result<()> {
        (**self).configure(run_name, resource)
    }

    fn stage_shared(&mut self, paths: &[PathBuf]) -> Result<()> {
        (**self).stage_shared(paths)
    }

    fn submit(&mut self, workflow: &Workflow) -> Result<()> {
        (**self).submit(workflow)
    }

    fn terminate(&mut self) -> Result<()> {
        (**self).terminate()
    }
}

/// Owns a configured engine and terminates it exactly once.
///
/// Termination happens on [`SessionGuard::close`] or, failing that, when the
/// guard is dropped, which also covers early returns and unwinding.
pub struct SessionGuard<E: Engine> {
    engine: E,
    closed: bool,
}

impl<E: Engine> SessionGuard<E> {
    /// Wrap an engine whose session is already configured.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            closed: false,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Terminate the session. Failures are logged, never returned.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        ilog_debug!("Terminating engine session");
        if let Err(e) = self.engine.terminate() {
            ilog_error!("Failed to terminate engine session: {}", e);
        }
    }
}

impl<E: Engine> Drop for SessionGuard<E> {
    fn drop(&mut self) {
        self.close();
    }
}
