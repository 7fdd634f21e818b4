//! Error types for telemetry parsing, model loading and configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while decoding a telemetry frame.
///
/// These never escape a streaming client: the frame is logged and dropped,
/// the connection stays open.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Text does not look like a complete JSON object.
    #[error("incomplete JSON frame")]
    Incomplete,

    /// Full JSON parse failed.
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary payload that is not UTF-8 text.
    #[error("binary frame is not valid UTF-8")]
    NotText,
}

/// Errors that fail a model load attempt.
///
/// Unlike telemetry faults these are surfaced to the caller: without a model
/// there is nothing to render.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The robot description could not be parsed.
    #[error("failed to parse robot description: {0}")]
    Description(#[from] urdf_rs::UrdfError),

    /// A file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A mesh referenced by the description has an unsupported extension.
    #[error("mesh format not supported: {file} (.{extension})")]
    UnsupportedMeshFormat { file: String, extension: String },

    /// No link in the description is free of a parent joint.
    #[error("robot description has no root link")]
    NoRootLink,

    /// A joint references a link that is not declared.
    #[error("joint '{joint}' references unknown link '{link}'")]
    UnknownLink { joint: String, link: String },

    /// The blocking load task panicked or was cancelled.
    #[error("model load task failed: {0}")]
    Task(String),
}

impl LoadError {
    /// Create an Io error for a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Endpoint URL does not parse.
    #[error("invalid endpoint url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Endpoint URL is not a WebSocket URL.
    #[error("endpoint url '{0}' must use ws:// or wss://")]
    UnsupportedScheme(String),

    /// Backoff parameters are inconsistent.
    #[error("invalid backoff: {0}")]
    InvalidBackoff(String),

    /// Up-axis selector is not one of the six canonical directions.
    #[error("unknown up axis '{0}' (expected one of +X, -X, +Y, -Y, +Z, -Z)")]
    UnknownUpAxis(String),

    /// Channel capacity or tick interval is zero.
    #[error("invalid session setting: {0}")]
    InvalidSession(String),
}
