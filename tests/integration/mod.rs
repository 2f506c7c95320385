//! Integration test suite for ICEBERG.
//!
//! These tests drive whole runs through the executor with an in-process
//! engine double, and exercise the command line and the discovery kernel
//! against real temporary directories.
//!
//! # Test Categories
//!
//! - `workflow_e2e`: Discovery, analysis and teardown through the executor
//! - `discovery_kernel`: The `discover` subcommand and its tables
//! - `config_files`: JSON and TOML run configurations


mod config_files;
mod workflow_e2e;
