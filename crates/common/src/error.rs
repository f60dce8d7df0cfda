//! Error types for the compute layer (thiserror-based).

use thiserror::Error;

use crate::status::ClStatus;

/// Errors raised while bringing up or driving the compute layer.
///
/// These stay inside the layer: public entry points turn them into
/// availability flags and dispatch outcomes after logging.
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("Compute layer disabled by configuration")]
    Disabled,

    #[error("No compute platform matched (vendor: {vendor:?}, name: {name:?})")]
    NoPlatform {
        vendor: Option<String>,
        name: Option<String>,
    },

    #[error("No {class} device on the selected platform")]
    NoDevice { class: &'static str },

    #[error("{op} failed: {status}")]
    Driver { op: &'static str, status: ClStatus },

    #[error("Program source '{path}' not found or empty")]
    ProgramSource { path: String },

    #[error("Program build failed: {status}")]
    Build { status: ClStatus, log: String },

    #[error("Invalid compute configuration: {0}")]
    Config(String),

    #[error("JSON config error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComputeError {
    /// Wrap a driver status with the name of the failed operation.
    pub fn driver(op: &'static str, status: ClStatus) -> Self {
        Self::Driver { op, status }
    }

    /// The driver status carried by this error, if any.
    pub fn status(&self) -> Option<ClStatus> {
        match self {
            Self::Driver { status, .. } | Self::Build { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for the conditions that simply mean "no compute path here"
    /// rather than a driver malfunction.
    pub fn is_unavailability(&self) -> bool {
        matches!(
            self,
            Self::Disabled | Self::NoPlatform { .. } | Self::NoDevice { .. }
        )
    }
}

/// Convenience Result type for compute operations.
pub type ComputeResult<T> = Result<T, ComputeError>;
