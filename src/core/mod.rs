//! Core types of the dataflow engine.
//!
//! This module contains the foundational pieces the rest of the engine is
//! built from:
//! - Value types and the key-value parameter map
//! - Frame formats and reference-counted frames
//! - Frame managers, including the pooling variant
//! - Ports and single-slot connections
//! - The filter trait and its runtime node wrapper
//! - Error types and the shared execution context

pub mod backend;
pub mod context;
pub mod error;
pub mod filter;
pub mod format;
pub mod frame;
pub mod manager;
pub mod port;
pub mod protocol;
pub mod types;

// Re-export commonly used types
pub use backend::{MemoryBackend, ResourceId, StorageBackend};
pub use context::FilterContext;
pub use error::{
    AllocationError, ConfigurationError, EngineError, EngineResult, FormatNegotiationError,
    GraphStructureError, RuntimeError,
};
pub use filter::{Filter, FilterIo, FilterNode, FilterSignature, LifecycleStage, ProcessStatus};
pub use format::{ElementType, FrameFormat, StorageTarget};
pub use frame::{Frame, FrameBinding};
pub use manager::{CachedFrameManager, FrameManager, SimpleFrameManager};
pub use port::{Connection, InputPort, OutputPort, PortId, PortKind, PortSpec};
pub use protocol::{ParameterSpec, Protocol};
pub use types::{KeyValueMap, Value, ValueKind};
