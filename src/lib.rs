//! # Pravaha - Dataflow Engine for Per-Frame Media Transforms
//!
//! Pravaha executes directed graphs of processing filters connected by
//! typed, single-slot channels. Filters negotiate frame formats before a
//! run, pull inputs and push outputs under explicit backpressure, and are
//! driven to completion by a pluggable scheduler, either on the calling
//! thread or on a background thread with cooperative cancellation.
//!
//! ## Features
//!
//! - **Typed frames**: reference-counted buffers described by a format
//!   (element type, shape, storage target, metadata)
//! - **Frame pooling**: a bounded free list recycles expensive storage on
//!   the per-frame hot path
//! - **Backpressure**: every connection holds at most one frame; producers
//!   retry on the next scheduling opportunity
//! - **Format negotiation**: concrete formats propagate topologically from
//!   the source filters before anything runs
//! - **Two runners**: synchronous stepping in the caller's thread, or a
//!   background thread with start/stop and a completion callback
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pravaha::prelude::*;
//! use std::sync::Arc;
//!
//! // Shared context: storage backend, frame manager with pooling
//! let backend = Arc::new(MemoryBackend::new());
//! let manager = Arc::new(CachedFrameManager::new(backend.clone()));
//! let context = Arc::new(FilterContext::new(manager, backend));
//!
//! // Assemble a graph against an explicit registry
//! let registry = FilterRegistry::with_base_filters();
//! let mut builder = GraphBuilder::new(&registry);
//! builder.add_filter("object_source", "source", KeyValueMap::from_pairs([
//!     ("object", Value::Int(42)),
//!     ("max_frames", Value::Int(5)),
//! ]))?;
//! builder.add_filter("pass_through", "pass", KeyValueMap::new())?;
//! builder.add_filter("null_sink", "sink", KeyValueMap::new())?;
//! builder.connect("source", "frame", "pass", "frame")?;
//! builder.connect("pass", "frame", "sink", "frame")?;
//!
//! // Run it on the calling thread
//! let mut runner = SyncRunner::with_default_scheduler(context, builder.build())?;
//! let status = runner.run()?;
//! assert_eq!(status, RunStatus::Finished);
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`core`]: frames, formats, managers, ports, the filter trait and its
//!   runtime state machine, errors and the shared context
//! - [`graph`]: graph assembly, policies and format negotiation
//! - [`execution`]: scheduling policies and the sync/async runners
//! - [`filters`]: the filter registry and the base filter library
//!
//! ## Implementing a Filter
//!
//! Implement the [`Filter`] trait, declaring ports and parameters in the
//! signature:
//!
//! ```rust,ignore
//! use pravaha::prelude::*;
//!
//! struct Invert {
//!     format: Option<FrameFormat>,
//! }
//!
//! impl Filter for Invert {
//!     fn signature(&self) -> FilterSignature {
//!         FilterSignature::builder("invert")
//!             .description("Inverts every byte of its input")
//!             .input(PortSpec::stream("frame"))
//!             .output(PortSpec::stream("frame"))
//!             .build()
//!     }
//!
//!     fn apply_parameter(&mut self, key: &str, _: &Value) -> Result<(), ConfigurationError> {
//!         Err(ConfigurationError::UnknownParameter { key: key.to_string() })
//!     }
//!
//!     fn accepts_input_format(&mut self, _index: usize, format: &FrameFormat) -> bool {
//!         self.format = Some(format.clone());
//!         format.element() == ElementType::Byte
//!     }
//!
//!     fn output_format(&mut self, _index: usize) -> Option<FrameFormat> {
//!         self.format.clone()
//!     }
//!
//!     fn process(&mut self, io: &mut FilterIo<'_>) -> EngineResult<ProcessStatus> {
//!         let input = io.pull_input(0)?;
//!         let output = io.new_frame(input.format())?;
//!         let bytes: Vec<u8> = input.bytes()?.iter().map(|b| !b).collect();
//!         output.set_bytes(&bytes)?;
//!         io.put_output(0, &output)?;
//!         Ok(ProcessStatus::wait_all())
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod core;
pub mod execution;
pub mod filters;
pub mod graph;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use pravaha::prelude::*;
/// ```
pub mod prelude {
    // Value types and parameter maps
    pub use crate::core::types::{KeyValueMap, Value, ValueKind};

    // Frames and formats
    pub use crate::core::format::{ElementType, FrameFormat, StorageTarget};
    pub use crate::core::frame::{Frame, FrameBinding};
    pub use crate::core::manager::{CachedFrameManager, FrameManager, SimpleFrameManager};
    pub use crate::core::backend::{MemoryBackend, StorageBackend};

    // Filters and ports
    pub use crate::core::filter::{
        Filter, FilterIo, FilterNode, FilterSignature, LifecycleStage, ProcessStatus,
    };
    pub use crate::core::port::{PortKind, PortSpec};
    pub use crate::core::protocol::{ParameterSpec, Protocol};

    // Context
    pub use crate::core::context::FilterContext;

    // Errors
    pub use crate::core::error::{
        AllocationError, ConfigurationError, EngineError, EngineResult, FormatNegotiationError,
        GraphStructureError, RuntimeError,
    };

    // Graph
    pub use crate::graph::builder::GraphBuilder;
    pub use crate::graph::structure::{AutoBranchMode, FilterGraph};

    // Execution
    pub use crate::execution::background::AsyncRunner;
    pub use crate::execution::scheduler::{OneShotScheduler, Scheduler, SimpleScheduler};
    pub use crate::execution::sync::{GraphState, RunOutcome, RunStatus, SyncRunner};

    // Filter registry and base filters
    pub use crate::filters::base::{
        CallbackSink, FrameBranch, FrameFetch, FrameListener, FrameStore, NullSink, ObjectSource,
        PassThrough,
    };
    pub use crate::filters::registry::{FilterFactory, FilterRegistry, RegistryEntry};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
