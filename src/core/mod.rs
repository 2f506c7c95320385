//! Declarative workflow descriptions.
//!
//! Tasks, stages and pipelines as the orchestration engine consumes them.
//! Nothing here executes anything.

pub mod pipeline;
pub mod task;

pub use pipeline::{PipelineSpec, StageSpec};
pub use task::{base_name, file_stem, ResourceReqs, TaskSpec, ThreadType};
