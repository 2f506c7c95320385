pub mod cli;
pub mod config;
pub mod core;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod log;
pub mod usecase;
pub mod workflow;

pub use error::{Error, Result};
