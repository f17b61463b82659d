use std::path::PathBuf;
use thiserror::Error;

use crate::http::HttpError;

#[derive(Error, Debug)]
pub enum ShiprError {
    // Network errors
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Download errors
    #[error("Download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Checksum mismatch for {path}")]
    ChecksumMismatch { path: PathBuf },

    // Trust store errors
    #[error("Keyring error: {0}")]
    Keyring(String),

    // Pre-flight errors
    #[error("No pinned checksum for {name}")]
    UnknownArtifact { name: String },

    #[error("Validator provisioning failed: {0}")]
    Provisioning(String),

    // Interactive prompt errors
    #[error("Prompt failed: {0}")]
    Prompt(String),

    // Installation data errors
    #[error("Installation data error: {0}")]
    InstallationData(String),

    #[error("Invalid values file: {0}")]
    InvalidValues(String),

    // Release check errors
    #[error("Invalid release version: {0}")]
    InvalidRelease(#[from] semver::Error),
}

pub type Result<T> = std::result::Result<T, ShiprError>;
