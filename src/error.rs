// src/error.rs

//! Error types for the build terminal engine

use crate::queue::JobId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the queue, the supervisor and their collaborators
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// A queue or process operation was requested in a state that forbids it.
    /// The queue is left untouched.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Job {0} is not in the queue")]
    JobNotFound(JobId),

    #[error("Failed to open log file {path}: {source}")]
    LogOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Output reader error: {0}")]
    Reader(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Invalid classifier pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl Error {
    /// Whether this error reports a rejected queue/state operation rather
    /// than a system failure
    pub fn is_state_violation(&self) -> bool {
        matches!(self, Self::InvalidState(_) | Self::JobNotFound(_))
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
