//! Ports and connections.
//!
//! A port is a typed attachment point on a filter; a connection is the
//! single-slot channel linking one output port to one input port. The slot
//! provides the engine's backpressure: pushing onto an occupied wire fails
//! and the producer retries on a later scheduling opportunity. Field and
//! program ports carry deferred parameter values instead of frames.

use crate::core::error::RuntimeError;
use crate::core::format::FrameFormat;
use crate::core::frame::Frame;
use crate::core::manager::FrameManager;
use crate::core::types::Value;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What travels over a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortKind {
    /// Carries frames opportunistically.
    Stream,
    /// Holds a deferred value assigned to the filter parameter of the same
    /// name before the next processing step.
    Field,
    /// Binds a value to a named variable of an attached sub-component
    /// (for example a program uniform).
    Program {
        /// Name of the variable on the attached component.
        variable: String,
    },
}

/// Declared description of a port, part of a filter's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    name: String,
    kind: PortKind,
    blocking: bool,
    optional: bool,
}

impl PortSpec {
    /// A blocking stream port.
    pub fn stream(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Stream,
            blocking: true,
            optional: false,
        }
    }

    /// A field port feeding the filter parameter of the same name.
    /// Field ports never block scheduling and may stay unconnected.
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Field,
            blocking: false,
            optional: true,
        }
    }

    /// A program port feeding the named variable of an attached component.
    pub fn program(name: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Program {
                variable: variable.into(),
            },
            blocking: false,
            optional: true,
        }
    }

    /// A non-blocking port never holds up scheduling.
    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    /// An optional port may stay unconnected after graph setup.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &PortKind {
        &self.kind
    }

    pub fn is_stream(&self) -> bool {
        self.kind == PortKind::Stream
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }
}

/// Identifies one port of one filter within a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortId {
    pub filter: String,
    pub port: usize,
}

impl PortId {
    pub fn new(filter: impl Into<String>, port: usize) -> Self {
        Self {
            filter: filter.into(),
            port,
        }
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.filter, self.port)
    }
}

/// The single-slot wire between an output port and an input port.
///
/// Holds at most one frame. The wire owns a logical reference on the frame
/// it carries; pulling transfers that reference to the consumer. Either
/// endpoint closing marks the wire closed, which is the end-of-stream
/// signal for the other side.
pub struct Connection {
    source: PortId,
    target: PortId,
    slot: Mutex<Option<Frame>>,
    format: RwLock<Option<FrameFormat>>,
    closed: AtomicBool,
}

impl Connection {
    pub(crate) fn new(source: PortId, target: PortId) -> Arc<Self> {
        Arc::new(Self {
            source,
            target,
            slot: Mutex::new(None),
            format: RwLock::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn source(&self) -> &PortId {
        &self.source
    }

    pub fn target(&self) -> &PortId {
        &self.target
    }

    pub fn has_frame(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// The format negotiated for frames on this wire.
    pub fn format(&self) -> Option<FrameFormat> {
        self.format.read().clone()
    }

    pub(crate) fn set_format(&self, format: FrameFormat) {
        *self.format.write() = Some(format);
    }

    /// Put a frame on the wire. The wire takes a reference of its own and
    /// the frame becomes read-only. Returns false if the slot is occupied.
    pub(crate) fn put(&self, frame: &Frame, manager: &dyn FrameManager) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        manager.retain_frame(frame);
        frame.mark_read_only();
        *slot = Some(frame.clone());
        true
    }

    /// Take the frame off the wire. The wire's reference transfers to the
    /// caller, who must release it when done.
    pub(crate) fn take(&self) -> Option<Frame> {
        self.slot.lock().take()
    }

    /// Release a frame left on the wire, if any.
    pub(crate) fn drain(&self, manager: &dyn FrameManager) -> Result<(), RuntimeError> {
        match self.slot.lock().take() {
            Some(frame) => manager.release_frame(frame),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("occupied", &self.has_frame())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Input side port state owned by a filter node.
#[derive(Debug)]
pub struct InputPort {
    spec: PortSpec,
    connection: Option<Arc<Connection>>,
    format: Option<FrameFormat>,
    /// Deferred value waiting to be transferred into filter state.
    pending: Option<Value>,
    /// Field ports: whether a value was ever set.
    has_value: bool,
    open: bool,
}

impl InputPort {
    pub(crate) fn new(spec: PortSpec) -> Self {
        Self {
            spec,
            connection: None,
            format: None,
            pending: None,
            has_value: false,
            open: false,
        }
    }

    pub fn spec(&self) -> &PortSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.connection.as_ref()
    }

    pub(crate) fn attach(&mut self, connection: Arc<Connection>) {
        self.connection = Some(connection);
    }

    pub fn format(&self) -> Option<&FrameFormat> {
        self.format.as_ref()
    }

    pub(crate) fn set_format(&mut self, format: FrameFormat) {
        self.format = Some(format);
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn open(&mut self) {
        self.open = true;
    }

    /// Close the port and release any frame still on its wire.
    pub(crate) fn close(&mut self, manager: &dyn FrameManager) -> Result<(), RuntimeError> {
        self.open = false;
        if let Some(connection) = &self.connection {
            connection.close();
            connection.drain(manager)?;
        }
        Ok(())
    }

    /// Whether a frame is waiting on the wire.
    pub fn has_frame(&self) -> bool {
        self.connection
            .as_ref()
            .map(|c| c.has_frame())
            .unwrap_or(false)
    }

    /// Whether a process step may run as far as this port is concerned:
    /// a frame is waiting, the port is non-blocking, or nothing is wired
    /// to it. Field and program ports are always ready.
    pub fn is_ready(&self) -> bool {
        if !self.spec.is_stream() {
            return true;
        }
        match &self.connection {
            Some(connection) => connection.has_frame() || !self.spec.is_blocking(),
            None => true,
        }
    }

    /// Whether this port forces its filter to close: the upstream end has
    /// finished, the wire is drained, and the port is blocking.
    pub fn must_close_filter(&self) -> bool {
        if !self.spec.is_stream() || !self.spec.is_blocking() {
            return false;
        }
        match &self.connection {
            Some(connection) => connection.is_closed() && !connection.has_frame(),
            None => false,
        }
    }

    /// Set a deferred value on a field or program port.
    pub(crate) fn set_value(&mut self, value: Value) {
        self.pending = Some(value);
        self.has_value = true;
    }

    /// Take the deferred value, if one is waiting.
    pub(crate) fn take_pending(&mut self) -> Option<Value> {
        self.pending.take()
    }

    /// Field ports: whether a value was ever assigned.
    pub fn has_value(&self) -> bool {
        self.has_value
    }
}

/// Output side port state owned by a filter node.
#[derive(Debug)]
pub struct OutputPort {
    spec: PortSpec,
    connection: Option<Arc<Connection>>,
    format: Option<FrameFormat>,
    open: bool,
}

impl OutputPort {
    pub(crate) fn new(spec: PortSpec) -> Self {
        Self {
            spec,
            connection: None,
            format: None,
            open: false,
        }
    }

    pub fn spec(&self) -> &PortSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.connection.as_ref()
    }

    pub(crate) fn attach(&mut self, connection: Arc<Connection>) {
        self.connection = Some(connection);
    }

    pub fn format(&self) -> Option<&FrameFormat> {
        self.format.as_ref()
    }

    pub(crate) fn set_format(&mut self, format: FrameFormat) {
        if let Some(connection) = &self.connection {
            connection.set_format(format.clone());
        }
        self.format = Some(format);
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn open(&mut self) {
        self.open = true;
    }

    /// Close the port. The wire is marked closed but keeps any frame it
    /// carries so the consumer can drain the stream.
    pub(crate) fn close(&mut self) {
        self.open = false;
        if let Some(connection) = &self.connection {
            connection.close();
        }
    }

    /// Whether the wire still holds an unconsumed frame.
    pub fn has_frame(&self) -> bool {
        self.connection
            .as_ref()
            .map(|c| c.has_frame())
            .unwrap_or(false)
    }

    /// Whether a process step may run as far as this port is concerned:
    /// the wire is free to accept a frame, the port is non-blocking, or
    /// nothing is wired to it.
    pub fn is_ready(&self) -> bool {
        match &self.connection {
            Some(connection) => !connection.has_frame() || !self.spec.is_blocking(),
            None => true,
        }
    }

    /// Whether this port forces its filter to close: the downstream end
    /// closed the wire and the port is blocking.
    pub fn must_close_filter(&self) -> bool {
        if !self.spec.is_blocking() || !self.open {
            return false;
        }
        match &self.connection {
            Some(connection) => connection.is_closed(),
            None => false,
        }
    }
}
