//! Error taxonomy for the engine binding
//!
//! Every failure is reported to the immediate caller as a value. The binding
//! never retries a foreign call.

use crate::ffi::loader::LoadError;
use crate::ffi::marshal::LayoutError;
use std::path::PathBuf;
use thiserror::Error;

/// Binding errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IwfmError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Procedure '{procedure}' not found in library '{library}'")]
    ProcedureNotFound { library: String, procedure: String },

    #[error("Argument layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Model instantiation failed with status {status}")]
    Instantiation { status: i32 },

    #[error("Cannot {operation}: handle is {state}")]
    InvalidHandle {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Cannot {operation}: model is poisoned by an earlier failure ({cause})")]
    PoisonedHandle { operation: &'static str, cause: String },

    #[error("Model was opened for inquiry and cannot be stepped")]
    InquiryOnly,

    #[error("Simulation has already reached its end date")]
    SimulationComplete,

    #[error("Engine already has an open {resource}")]
    EngineBusy { resource: &'static str },

    #[error("Cannot open {}: {reason}", path.display())]
    SourceOpen { path: PathBuf, reason: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("{procedure} reported status {status}")]
    NativeStatus { procedure: &'static str, status: i32 },

    #[error("Invalid engine timestamp '{value}': {reason}")]
    Timestamp { value: String, reason: String },

    #[error("Engine binding is not initialized")]
    NotInitialized,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for binding operations
pub type IwfmResult<T> = Result<T, IwfmError>;

impl IwfmError {
    /// True for errors raised before anything reached the engine
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            IwfmError::Layout(_)
                | IwfmError::InvalidHandle { .. }
                | IwfmError::PoisonedHandle { .. }
                | IwfmError::InquiryOnly
                | IwfmError::EngineBusy { .. }
                | IwfmError::InvalidQuery(_)
                | IwfmError::NotInitialized
                | IwfmError::Config(_)
        )
    }
}
