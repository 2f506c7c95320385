use std::path::PathBuf;

use thiserror::Error;

use crate::config::UseCaseKind;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No pipeline builder for the {0} use case")]
    UnsupportedUseCase(UseCaseKind),

    #[error("Invalid image table {}:{line}: {reason}", path.display())]
    InvalidTable {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Engine error: {0}")]
    Engine(String),
}

pub type Result<T> = std::result::Result<T, Error>;
