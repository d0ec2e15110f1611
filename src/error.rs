// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("File identity changed: {0}")]
    IdentityChanged(PathBuf),

    #[error("Channel send error")]
    ChannelSend,

    #[error("Sink error: {0}")]
    Sink(String),
}

impl Error {
    /// Whether the error belongs to the startup configuration class. These are
    /// the only errors that stop the engine.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::InvalidGlob(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
