//! Error types for the daca coordinator and client.

use crate::context::UploadRejected;
use crate::server::protocol::ProtocolError;

/// Top-level error enum for the daca library.
#[derive(Debug, thiserror::Error)]
pub enum DacaError {
    #[error("package catalog is empty")]
    EmptyCatalog,

    #[error("package index {index} out of range (catalog has {len} entries)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("package at index {0} has been withdrawn (no analyzable source)")]
    PackageWithdrawn(usize),

    #[error("every package in the catalog has been withdrawn")]
    NoEligiblePackages,

    #[error("invalid package name: {0:?}")]
    InvalidPackageName(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("upload rejected: {0}")]
    Rejected(#[from] UploadRejected),

    #[error("subprocess `{command}` failed: {reason}")]
    Subprocess { command: String, reason: String },

    #[error("coordinator request failed: {0}")]
    Coordinator(String),

    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type DacaResult<T> = Result<T, DacaError>;
