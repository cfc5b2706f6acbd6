//! Error types for the engine.
//!
//! Uses thiserror for structured errors. The taxonomy mirrors the phases of
//! a graph's life: configuration errors at filter initialization, structure
//! and format errors at graph setup, allocation and runtime errors while a
//! graph runs. Nothing is retried internally; every category propagates to
//! the run's outcome.

use crate::core::format::{FrameFormat, StorageTarget};
use crate::core::types::ValueKind;
use thiserror::Error;

/// Top-level error type for the engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("graph structure error: {0}")]
    GraphStructure(#[from] GraphStructureError),

    #[error("format negotiation error: {0}")]
    FormatNegotiation(#[from] FormatNegotiationError),

    #[error("allocation error: {0}")]
    Allocation(#[from] AllocationError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Errors raised while initializing or updating a filter's parameters.
///
/// Raised synchronously at initialization and never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("missing required parameter '{key}'")]
    MissingParameter { key: String },

    #[error("unknown parameter '{key}'")]
    UnknownParameter { key: String },

    #[error("parameter '{key}' expects {expected}, got {got}")]
    WrongParameterType {
        key: String,
        expected: ValueKind,
        got: ValueKind,
    },

    #[error("parameter '{key}' is not updatable")]
    NotUpdatable { key: String },

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Errors in the shape of the graph, fatal to that graph instance.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphStructureError {
    #[error("no filter named '{0}' in graph")]
    UnknownFilter(String),

    #[error("no registered filter class '{0}'")]
    UnknownFilterClass(String),

    #[error("a filter named '{0}' is already in the graph")]
    DuplicateFilter(String),

    #[error("unknown input port '{port}' on filter '{filter}'")]
    UnknownInputPort { filter: String, port: String },

    #[error("unknown output port '{port}' on filter '{filter}'")]
    UnknownOutputPort { filter: String, port: String },

    #[error("input port '{port}' of filter '{filter}' is already connected")]
    InputAlreadyConnected { filter: String, port: String },

    #[error("input port '{port}' of filter '{filter}' is not connected")]
    UnconnectedInput { filter: String, port: String },

    #[error("output port '{port}' of filter '{filter}' is not connected")]
    UnconnectedOutput { filter: String, port: String },

    #[error("filter '{0}' was added to a graph before initialization")]
    FilterNotInitialized(String),

    #[error(
        "output '{port}' of filter '{filter}' targets {targets} inputs; \
         enable auto-branching to allow fan-out"
    )]
    FanOutDisabled {
        filter: String,
        port: String,
        targets: usize,
    },

    #[error("graph contains a cycle")]
    CycleDetected,

    #[error("discarding unconnected filters removed every filter from the graph")]
    AllFiltersDiscarded,

    #[error("graph has not been set up")]
    GraphNotReady,
}

/// A filter rejected an offered input format or produced none, fatal at setup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatNegotiationError {
    #[error("filter '{filter}' does not accept {format} on input port '{port}'")]
    InputRejected {
        filter: String,
        port: String,
        format: FrameFormat,
    },

    #[error("filter '{filter}' produced no format for output port '{port}'")]
    NoOutputFormat { filter: String, port: String },

    #[error("input port '{port}' of filter '{filter}' has no upstream format")]
    MissingInputFormat { filter: String, port: String },
}

/// Backend storage allocation failures, fatal and never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocationError {
    #[error("cannot allocate frame storage for target {0}")]
    UnsupportedTarget(StorageTarget),

    #[error("bound frames are not supported for target {0}")]
    UnsupportedBinding(StorageTarget),

    #[error("backend failed to allocate {target} storage: {reason}")]
    Backend {
        target: StorageTarget,
        reason: String,
    },
}

/// Errors during a run, fatal to that run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("filter '{filter}' failed: {reason}")]
    FilterFailed { filter: String, reason: String },

    #[error("frame reference count dropped below zero")]
    RefCountUnderflow,

    #[error("frame storage was already deallocated")]
    FrameDeallocated,

    #[error("attempt to modify a read-only frame")]
    FrameReadOnly,

    #[error("frame storage mismatch: expected {expected} data")]
    WrongStorage { expected: &'static str },

    #[error("data size mismatch: expected {expected} bytes, got {got}")]
    DataSize { expected: usize, got: usize },

    #[error("no port at index {index}")]
    InvalidPort { index: usize },

    #[error("port {index} is not connected")]
    PortNotConnected { index: usize },

    #[error("pulling from empty connection on port {index}")]
    EmptyConnection { index: usize },

    #[error("pushing onto occupied connection on port {index}")]
    ConnectionOccupied { index: usize },

    #[error("pushing onto closed connection on port {index}")]
    PortClosed { index: usize },

    #[error("filter has no field '{name}'")]
    UnknownField { name: String },

    #[error("filter has no program variable '{name}'")]
    UnknownProgramVariable { name: String },

    #[error("graph is not open")]
    GraphNotOpen,

    #[error("a run is already active on this runner")]
    AlreadyRunning,

    #[error("failed to spawn runner thread: {0}")]
    WorkerSpawnFailed(String),

    #[error("no graph has been set on this runner")]
    NoGraphSet,
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        fn fails() -> EngineResult<()> {
            Err(ConfigurationError::MissingParameter {
                key: "object".to_string(),
            })?;
            Ok(())
        }
        match fails() {
            Err(EngineError::Configuration(ConfigurationError::MissingParameter { key })) => {
                assert_eq!(key, "object");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_error_display() {
        let err = RuntimeError::DataSize {
            expected: 16,
            got: 4,
        };
        assert_eq!(
            err.to_string(),
            "data size mismatch: expected 16 bytes, got 4"
        );
    }
}
