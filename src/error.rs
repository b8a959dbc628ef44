// SPDX-License-Identifier: Apache-2.0
//! Error types for each boundary of the campaign pipeline.
//!
//! None of these cross a boundary as a panic: the cleaner, the dispatcher and
//! the runner all hand them back as values and log them where they happen.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while loading or saving the persisted configuration record
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but is not usable (zero port, blank column name, ...)
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failures while cleaning a recipient CSV
#[derive(Debug, Error)]
pub enum CleanError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Input could not be decoded, not even with the legacy fallback
    #[error("input is not valid {encoding}")]
    Decode { encoding: &'static str },

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("column '{0}' not found in CSV header")]
    MissingColumn(String),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while sending a single campaign email
#[derive(Debug, Error)]
pub enum SendError {
    #[error("email credentials not configured")]
    MissingCredentials,

    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

/// Failures while starting a campaign run
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("a campaign is already running")]
    AlreadyRunning,

    #[error("failed to spawn campaign thread: {0}")]
    Spawn(#[source] std::io::Error),
}
