//! Filters and their runtime state machine.
//!
//! A filter implementation provides the processing logic; the engine wraps
//! it in a [`FilterNode`] that owns the ports, the status word and the
//! lifecycle stage. Ports and parameters are declared explicitly through
//! the filter's [`FilterSignature`], resolved once when the node is
//! initialized. During a step the filter talks to its ports and the
//! context through a [`FilterIo`] handle; every frame it pulls or
//! allocates through the handle is released when the step ends.

use crate::core::context::FilterContext;
use crate::core::error::{ConfigurationError, EngineResult, RuntimeError};
use crate::core::format::FrameFormat;
use crate::core::frame::Frame;
use crate::core::manager::FrameManager;
use crate::core::port::{InputPort, OutputPort, PortKind, PortSpec};
use crate::core::protocol::Protocol;
use crate::core::types::{KeyValueMap, Value};
use bitflags::bitflags;
use std::time::Duration;

bitflags! {
    /// Status word returned by a filter's process step.
    ///
    /// The wait flags gate when the scheduler will run the filter again;
    /// `SLEEP`, `FINISHED` and `ERROR` drive the lifecycle machine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProcessStatus: u16 {
        /// Run again once every input has new data.
        const WAIT_FOR_ALL_INPUTS   = 0x0001;
        /// Run again once any input has new data.
        const WAIT_FOR_ONE_INPUT    = 0x0002;
        /// Run again once every output wire is free.
        const WAIT_FOR_FREE_OUTPUTS = 0x0004;
        /// Run again once any output wire is free.
        const WAIT_FOR_FREE_OUTPUT  = 0x0008;
        /// Suspend for the filter's sleep delay, then run again.
        const SLEEP                 = 0x0010;
        /// Run again unconditionally.
        const READY                 = 0x0020;
        /// No more output; the filter's ports close.
        const FINISHED              = 0x0040;
        /// Fatal; the run aborts.
        const ERROR                 = 0x0080;
    }
}

impl ProcessStatus {
    /// The common case of a mid-pipeline filter: wait for fresh input and
    /// drained outputs.
    pub fn wait_all() -> Self {
        ProcessStatus::WAIT_FOR_ALL_INPUTS | ProcessStatus::WAIT_FOR_FREE_OUTPUTS
    }
}

/// Lifecycle stage of a filter node.
///
/// Nodes move `Uninitialized -> Unprepared -> Prepared -> Processing`,
/// oscillate between `Processing` and `Sleeping` while the graph runs, and
/// return to `Prepared` (with closed ports) when they close. `Error` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    Uninitialized,
    Unprepared,
    Prepared,
    Processing,
    Sleeping,
    Error,
}

/// Declared description of a filter: class name, ports and parameter
/// protocol.
///
/// The protocol must not depend on parameter values; the port lists may
/// (for example a branch filter whose output count is a parameter), which
/// is why the engine reads the signature again after parameters are
/// applied.
#[derive(Debug, Clone)]
pub struct FilterSignature {
    class: String,
    description: String,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
    protocol: Protocol,
}

impl FilterSignature {
    pub fn builder(class: impl Into<String>) -> SignatureBuilder {
        SignatureBuilder {
            signature: FilterSignature {
                class: class.into(),
                description: String::new(),
                inputs: Vec::new(),
                outputs: Vec::new(),
                protocol: Protocol::new(),
            },
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|p| p.name() == name)
    }

    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|p| p.name() == name)
    }
}

/// Builder for [`FilterSignature`].
pub struct SignatureBuilder {
    signature: FilterSignature,
}

impl SignatureBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.signature.description = description.into();
        self
    }

    pub fn input(mut self, spec: PortSpec) -> Self {
        self.signature.inputs.push(spec);
        self
    }

    pub fn output(mut self, spec: PortSpec) -> Self {
        self.signature.outputs.push(spec);
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.signature.protocol = protocol;
        self
    }

    pub fn build(self) -> FilterSignature {
        self.signature
    }
}

/// The processing logic of a graph node.
///
/// Implementations declare their ports and parameters in [`signature`],
/// receive configuration through [`apply_parameter`], and do their work in
/// [`process`], pulling inputs and pushing outputs through the given
/// [`FilterIo`].
///
/// [`signature`]: Filter::signature
/// [`apply_parameter`]: Filter::apply_parameter
/// [`process`]: Filter::process
pub trait Filter: Send {
    /// The declared ports and parameter protocol.
    fn signature(&self) -> FilterSignature;

    /// Store one configuration value. Called once per key at
    /// initialization and again for runtime updates of updatable keys.
    /// The protocol has already screened the key and the value kind.
    fn apply_parameter(&mut self, key: &str, value: &Value) -> Result<(), ConfigurationError>;

    /// Hook invoked after a batch of runtime parameter updates or a field
    /// port transfer.
    fn parameters_updated(&mut self, _keys: &[String]) {}

    /// Bind a value to a named variable of an attached sub-component.
    /// Filters without program state reject the call.
    fn set_program_variable(&mut self, name: &str, _value: Value) -> Result<(), RuntimeError> {
        Err(RuntimeError::UnknownProgramVariable {
            name: name.to_string(),
        })
    }

    /// One-time setup after all initial parameters are applied.
    fn init(&mut self) -> Result<(), ConfigurationError> {
        Ok(())
    }

    /// Whether the filter accepts the given format on the given input
    /// stream port. Called once per input during graph setup, in
    /// topological order; the filter may record the format to derive its
    /// output formats from it.
    fn accepts_input_format(&mut self, index: usize, format: &FrameFormat) -> bool;

    /// The format this filter emits on the given output port, or `None`
    /// if it cannot produce one (fatal during setup).
    fn output_format(&mut self, index: usize) -> Option<FrameFormat>;

    /// Allocate per-run resources. Formats are fixed by the time this is
    /// called.
    fn prepare(&mut self, _context: &FilterContext) -> EngineResult<()> {
        Ok(())
    }

    /// Status the filter starts with when the graph opens. `None` selects
    /// the default: wait for all inputs and all free outputs.
    fn open(&mut self, _context: &FilterContext) -> Option<ProcessStatus> {
        None
    }

    /// One processing step. Only called when every input and output port
    /// reports ready for the filter's current wait flags.
    fn process(&mut self, io: &mut FilterIo<'_>) -> EngineResult<ProcessStatus>;

    /// How long a `SLEEP` status suspends the filter.
    fn sleep_delay(&self) -> Duration {
        Duration::from_millis(250)
    }

    /// Inverse of `open`; the node's ports are closed around this call.
    fn close(&mut self, _context: &FilterContext) {}

    /// Release resources held across runs (for example retained frames).
    fn tear_down(&mut self, _context: &FilterContext) {}
}

/// Port and context access handed to a filter for the duration of one
/// process step.
///
/// Frames obtained through this handle (pulled, allocated or fetched from
/// the named store) are owned by the step and released when it ends;
/// pushing a frame onto an output gives the wire its own reference.
pub struct FilterIo<'a> {
    filter_name: &'a str,
    inputs: &'a mut [InputPort],
    outputs: &'a mut [OutputPort],
    pulled: &'a mut Vec<Frame>,
    context: &'a FilterContext,
}

impl<'a> FilterIo<'a> {
    pub fn context(&self) -> &FilterContext {
        self.context
    }

    pub fn frame_manager(&self) -> &dyn FrameManager {
        self.context.frame_manager()
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_connected(&self, index: usize) -> bool {
        self.inputs.get(index).map(|p| p.is_connected()).unwrap_or(false)
    }

    pub fn output_connected(&self, index: usize) -> bool {
        self.outputs.get(index).map(|p| p.is_connected()).unwrap_or(false)
    }

    pub fn input_has_frame(&self, index: usize) -> bool {
        self.inputs.get(index).map(|p| p.has_frame()).unwrap_or(false)
    }

    /// Whether the output wire at `index` can accept a frame right now.
    pub fn output_ready(&self, index: usize) -> bool {
        self.outputs.get(index).map(|p| p.is_ready()).unwrap_or(false)
    }

    pub fn input_format(&self, index: usize) -> Option<&FrameFormat> {
        self.inputs.get(index).and_then(|p| p.format())
    }

    pub fn output_format(&self, index: usize) -> Option<&FrameFormat> {
        self.outputs.get(index).and_then(|p| p.format())
    }

    /// Take the frame waiting on the given input. The frame is read-only
    /// and valid for the rest of the step.
    pub fn pull_input(&mut self, index: usize) -> Result<Frame, RuntimeError> {
        let port = self
            .inputs
            .get(index)
            .ok_or(RuntimeError::InvalidPort { index })?;
        let connection = port
            .connection()
            .ok_or(RuntimeError::PortNotConnected { index })?;
        let frame = connection
            .take()
            .ok_or(RuntimeError::EmptyConnection { index })?;
        self.pulled.push(frame.clone());
        Ok(frame)
    }

    /// Push a frame onto the given output wire. Fails if the wire is
    /// occupied or closed; the scheduler's readiness gates make occupied
    /// pushes a filter bug.
    pub fn put_output(&mut self, index: usize, frame: &Frame) -> Result<(), RuntimeError> {
        let port = self
            .outputs
            .get(index)
            .ok_or(RuntimeError::InvalidPort { index })?;
        let connection = port
            .connection()
            .ok_or(RuntimeError::PortNotConnected { index })?;
        if connection.is_closed() {
            return Err(RuntimeError::PortClosed { index });
        }
        if connection.put(frame, self.context.frame_manager()) {
            Ok(())
        } else {
            Err(RuntimeError::ConnectionOccupied { index })
        }
    }

    /// Push a frame onto the given output wire if it can take one right
    /// now. Returns false when the wire is occupied or the consumer is
    /// gone, which lets unsynchronized fan-out drop frames instead of
    /// waiting.
    pub fn try_put_output(&mut self, index: usize, frame: &Frame) -> Result<bool, RuntimeError> {
        let port = self
            .outputs
            .get(index)
            .ok_or(RuntimeError::InvalidPort { index })?;
        let connection = port
            .connection()
            .ok_or(RuntimeError::PortNotConnected { index })?;
        if connection.is_closed() {
            return Ok(false);
        }
        Ok(connection.put(frame, self.context.frame_manager()))
    }

    /// Allocate a frame for this step.
    pub fn new_frame(&mut self, format: FrameFormat) -> EngineResult<Frame> {
        let frame = self.context.frame_manager().new_frame(format)?;
        self.pulled.push(frame.clone());
        Ok(frame)
    }

    /// Allocate an object frame without content storage for this step.
    pub fn new_empty_frame(&mut self, format: FrameFormat) -> EngineResult<Frame> {
        let frame = self.context.frame_manager().new_empty_frame(format)?;
        self.pulled.push(frame.clone());
        Ok(frame)
    }

    /// Deep-copy a frame for this step.
    pub fn duplicate_frame(&mut self, frame: &Frame) -> EngineResult<Frame> {
        let copy = self.context.frame_manager().duplicate_frame(frame)?;
        self.pulled.push(copy.clone());
        Ok(copy)
    }

    /// Put a frame into the context's named store.
    pub fn store_frame(&mut self, key: &str, frame: &Frame) -> Result<(), RuntimeError> {
        self.context.store_frame(key, frame)
    }

    /// Fetch a frame from the context's named store, valid for this step.
    pub fn fetch_stored_frame(&mut self, key: &str) -> Option<Frame> {
        let frame = self.context.fetch_frame(key)?;
        self.pulled.push(frame.clone());
        Some(frame)
    }

    /// Name of the filter being processed, for diagnostics.
    pub fn filter_name(&self) -> &str {
        self.filter_name
    }
}

/// Runtime wrapper around a filter: owns the ports, the status word, the
/// lifecycle stage and the parameter state.
pub struct FilterNode {
    name: String,
    filter: Box<dyn Filter>,
    signature: FilterSignature,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
    parameters: KeyValueMap,
    pending_updates: Option<KeyValueMap>,
    pulled: Vec<Frame>,
    status: ProcessStatus,
    stage: LifecycleStage,
}

impl FilterNode {
    /// Wrap a filter. The node starts uninitialized; call [`init`] with a
    /// configuration map before adding it to a graph.
    ///
    /// [`init`]: FilterNode::init
    pub fn new(name: impl Into<String>, filter: Box<dyn Filter>) -> Self {
        let signature = filter.signature();
        Self {
            name: name.into(),
            filter,
            signature,
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: KeyValueMap::new(),
            pending_updates: None,
            pulled: Vec::new(),
            status: ProcessStatus::empty(),
            stage: LifecycleStage::Uninitialized,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_name(&self) -> &str {
        self.signature.class()
    }

    pub fn signature(&self) -> &FilterSignature {
        &self.signature
    }

    pub fn stage(&self) -> LifecycleStage {
        self.stage
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.stage,
            LifecycleStage::Processing | LifecycleStage::Sleeping
        )
    }

    pub fn parameters(&self) -> &KeyValueMap {
        &self.parameters
    }

    pub fn sleep_delay(&self) -> Duration {
        self.filter.sleep_delay()
    }

    /// Validate `parameters` against the filter's protocol, apply them,
    /// and establish the port set. Moves the node to the unprepared stage.
    pub fn init(&mut self, parameters: KeyValueMap) -> Result<(), ConfigurationError> {
        self.signature.protocol().assert_conforms(&parameters)?;
        for (key, value) in parameters.iter() {
            self.filter.apply_parameter(key, value)?;
        }
        self.filter.init()?;

        // Port counts may depend on the parameters just applied, so the
        // signature is read again here.
        self.signature = self.filter.signature();
        self.inputs = self
            .signature
            .inputs()
            .iter()
            .cloned()
            .map(InputPort::new)
            .collect();
        self.outputs = self
            .signature
            .outputs()
            .iter()
            .cloned()
            .map(OutputPort::new)
            .collect();

        self.parameters = parameters;
        self.stage = LifecycleStage::Unprepared;
        Ok(())
    }

    /// Queue a runtime parameter update. Checked against the protocol's
    /// updatable set now, applied at the start of the next process step.
    pub fn update_parameters(&mut self, update: KeyValueMap) -> Result<(), ConfigurationError> {
        self.parameters = self
            .signature
            .protocol()
            .checked_update(&self.parameters, &update)?;
        match &mut self.pending_updates {
            Some(pending) => pending.merge(&update),
            None => self.pending_updates = Some(update),
        }
        Ok(())
    }

    /// Assign a deferred value to a field or program port by name.
    pub fn set_input_value(&mut self, port_name: &str, value: Value) -> Result<(), RuntimeError> {
        let port = self
            .inputs
            .iter_mut()
            .find(|p| p.name() == port_name && !p.spec().is_stream())
            .ok_or_else(|| RuntimeError::UnknownField {
                name: port_name.to_string(),
            })?;
        port.set_value(value);
        Ok(())
    }

    // Port access ///////////////////////////////////////////////////////////

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_port(&self, index: usize) -> Option<&InputPort> {
        self.inputs.get(index)
    }

    pub fn output_port(&self, index: usize) -> Option<&OutputPort> {
        self.outputs.get(index)
    }

    pub fn input_ports(&self) -> &[InputPort] {
        &self.inputs
    }

    pub fn output_ports(&self) -> &[OutputPort] {
        &self.outputs
    }

    pub(crate) fn input_port_mut(&mut self, index: usize) -> Option<&mut InputPort> {
        self.inputs.get_mut(index)
    }

    pub(crate) fn output_port_mut(&mut self, index: usize) -> Option<&mut OutputPort> {
        self.outputs.get_mut(index)
    }

    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.signature.input_index(name)
    }

    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.signature.output_index(name)
    }

    // Format negotiation ////////////////////////////////////////////////////

    /// Offer a format to the given input during setup. Field and program
    /// ports accept any format; stream ports ask the filter.
    pub(crate) fn offer_input_format(&mut self, index: usize, format: &FrameFormat) -> bool {
        let accepted = match self.inputs[index].spec().kind() {
            PortKind::Stream => self.filter.accepts_input_format(index, format),
            _ => true,
        };
        if accepted {
            self.inputs[index].set_format(format.clone());
        }
        accepted
    }

    pub(crate) fn negotiated_output_format(&mut self, index: usize) -> Option<FrameFormat> {
        self.filter.output_format(index)
    }

    pub(crate) fn set_output_format(&mut self, index: usize, format: FrameFormat) {
        self.outputs[index].set_format(format);
    }

    // Scheduling state //////////////////////////////////////////////////////

    /// Whether every input port satisfies the current wait flags.
    pub fn inputs_satisfied(&self) -> bool {
        if self.status.contains(ProcessStatus::WAIT_FOR_ALL_INPUTS) {
            if !self.inputs.iter().all(|p| p.is_ready()) {
                return false;
            }
        }
        if self.status.contains(ProcessStatus::WAIT_FOR_ONE_INPUT)
            && !self.inputs.is_empty()
            && !self.inputs.iter().any(|p| p.has_frame())
        {
            return false;
        }
        true
    }

    /// Whether every output port satisfies the current wait flags.
    pub fn outputs_satisfied(&self) -> bool {
        if self.status.contains(ProcessStatus::WAIT_FOR_FREE_OUTPUTS) {
            if !self.outputs.iter().all(|p| p.is_ready()) {
                return false;
            }
        }
        if self.status.contains(ProcessStatus::WAIT_FOR_FREE_OUTPUT)
            && !self.outputs.is_empty()
            && !self.outputs.iter().any(|p| p.is_ready())
        {
            return false;
        }
        true
    }

    /// Whether the scheduler may run this node now: it is open, not
    /// sleeping, not forced to close, and both port sides are ready for
    /// its current wait flags.
    pub fn can_process(&self) -> bool {
        if self.stage != LifecycleStage::Processing {
            return false;
        }
        if self
            .status
            .intersects(ProcessStatus::FINISHED | ProcessStatus::ERROR | ProcessStatus::SLEEP)
        {
            return false;
        }
        if self.must_close() {
            return false;
        }
        if self.status.contains(ProcessStatus::READY) {
            return true;
        }
        self.inputs_satisfied() && self.outputs_satisfied()
    }

    /// Whether any port independently requires this filter to close.
    pub fn must_close(&self) -> bool {
        if !self.is_open() {
            return false;
        }
        self.inputs.iter().any(|p| p.must_close_filter())
            || self.outputs.iter().any(|p| p.must_close_filter())
    }

    pub(crate) fn clear_sleep(&mut self) {
        if self.stage == LifecycleStage::Sleeping {
            self.status.remove(ProcessStatus::SLEEP);
            self.stage = LifecycleStage::Processing;
        }
    }

    // Lifecycle /////////////////////////////////////////////////////////////

    /// Allocate per-run resources once formats are fixed.
    pub(crate) fn perform_prepare(&mut self, context: &FilterContext) -> EngineResult<()> {
        if self.stage != LifecycleStage::Unprepared {
            return Ok(());
        }
        self.filter.prepare(context)?;
        self.stage = LifecycleStage::Prepared;
        Ok(())
    }

    /// Open the node for processing: open all ports and set the starting
    /// status.
    pub(crate) fn perform_open(&mut self, context: &FilterContext) -> EngineResult<()> {
        if self.is_open() {
            return Ok(());
        }
        for port in &mut self.inputs {
            port.open();
        }
        for port in &mut self.outputs {
            port.open();
        }
        self.status = self
            .filter
            .open(context)
            .unwrap_or_else(|| self.default_open_status());
        self.stage = LifecycleStage::Processing;
        log::trace!("opened filter '{}'", self.name);
        Ok(())
    }

    fn default_open_status(&self) -> ProcessStatus {
        let mut status = ProcessStatus::empty();
        if self.inputs.iter().any(|p| p.spec().is_stream()) {
            status |= ProcessStatus::WAIT_FOR_ALL_INPUTS;
        }
        if !self.outputs.is_empty() {
            status |= ProcessStatus::WAIT_FOR_FREE_OUTPUTS;
        }
        if status.is_empty() {
            status = ProcessStatus::READY;
        }
        status
    }

    /// Run one process step: apply pending parameter updates, transfer
    /// deferred port values, invoke the filter, then release every frame
    /// the step held.
    pub(crate) fn perform_process(
        &mut self,
        context: &FilterContext,
    ) -> EngineResult<ProcessStatus> {
        self.apply_pending_updates()?;
        self.transfer_port_values(context)?;

        let mut io = FilterIo {
            filter_name: &self.name,
            inputs: &mut self.inputs,
            outputs: &mut self.outputs,
            pulled: &mut self.pulled,
            context,
        };
        let result = self.filter.process(&mut io);

        // Frames held by the step are released whether it succeeded or not.
        let mut release_error = None;
        for frame in self.pulled.drain(..) {
            if let Err(e) = context.frame_manager().release_frame(frame) {
                release_error.get_or_insert(e);
            }
        }

        let status = match result {
            Ok(status) => status,
            Err(e) => {
                self.stage = LifecycleStage::Error;
                return Err(e);
            }
        };
        if let Some(e) = release_error {
            self.stage = LifecycleStage::Error;
            return Err(e.into());
        }
        if status.contains(ProcessStatus::ERROR) {
            self.stage = LifecycleStage::Error;
            return Err(RuntimeError::FilterFailed {
                filter: self.name.clone(),
                reason: "process step reported an error".to_string(),
            }
            .into());
        }

        self.status = status;
        if status.contains(ProcessStatus::SLEEP) {
            self.stage = LifecycleStage::Sleeping;
        }
        if status.contains(ProcessStatus::FINISHED) {
            self.perform_close(context)?;
        }
        Ok(status)
    }

    fn apply_pending_updates(&mut self) -> EngineResult<()> {
        if let Some(updates) = self.pending_updates.take() {
            let keys: Vec<String> = updates.keys().map(|k| k.to_string()).collect();
            for (key, value) in updates.iter() {
                self.filter.apply_parameter(key, value)?;
            }
            self.filter.parameters_updated(&keys);
        }
        Ok(())
    }

    /// Move deferred field and program port values into filter state.
    /// Values can arrive as object frames over a wire or by direct
    /// assignment.
    fn transfer_port_values(&mut self, context: &FilterContext) -> EngineResult<()> {
        let filter = &mut self.filter;
        for port in &mut self.inputs {
            if port.spec().is_stream() {
                continue;
            }
            if let Some(connection) = port.connection() {
                if let Some(frame) = connection.take() {
                    let value = frame.value()?;
                    context.frame_manager().release_frame(frame)?;
                    if let Some(value) = value {
                        port.set_value(value);
                    }
                }
            }
            if let Some(value) = port.take_pending() {
                match port.spec().kind().clone() {
                    PortKind::Field => {
                        let key = port.name().to_string();
                        filter.apply_parameter(&key, &value)?;
                        filter.parameters_updated(&[key]);
                    }
                    PortKind::Program { variable } => {
                        filter.set_program_variable(&variable, value)?;
                    }
                    PortKind::Stream => {}
                }
            }
        }
        Ok(())
    }

    /// Close the node: ports close (draining input wires), the filter's
    /// close hook runs, and the node returns to the prepared stage.
    pub(crate) fn perform_close(&mut self, context: &FilterContext) -> EngineResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        for port in &mut self.inputs {
            port.close(context.frame_manager())?;
        }
        for port in &mut self.outputs {
            port.close();
        }
        self.filter.close(context);
        self.stage = LifecycleStage::Prepared;
        log::trace!("closed filter '{}'", self.name);
        Ok(())
    }

    /// Release resources held across runs.
    pub(crate) fn perform_tear_down(&mut self, context: &FilterContext) -> EngineResult<()> {
        self.perform_close(context)?;
        self.filter.tear_down(context);
        self.stage = LifecycleStage::Unprepared;
        Ok(())
    }
}

impl std::fmt::Debug for FilterNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterNode")
            .field("name", &self.name)
            .field("class", &self.signature.class())
            .field("stage", &self.stage)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::MemoryBackend;
    use crate::core::context::FilterContext;
    use crate::core::format::{ElementType, StorageTarget};
    use crate::core::manager::SimpleFrameManager;
    use crate::core::port::{Connection, PortId};
    use crate::core::types::ValueKind;
    use std::sync::Arc;

    fn context() -> FilterContext {
        let backend = Arc::new(MemoryBackend::new());
        FilterContext::new(Arc::new(SimpleFrameManager::new(backend.clone())), backend)
    }

    fn byte_format() -> FrameFormat {
        FrameFormat::builder()
            .element(ElementType::Byte)
            .target(StorageTarget::Native)
            .dimensions([4])
            .build()
    }

    /// Adds a configurable offset to every byte of its input.
    struct OffsetFilter {
        offset: i64,
        format: Option<FrameFormat>,
        processed: usize,
    }

    impl OffsetFilter {
        fn new() -> Self {
            Self {
                offset: 0,
                format: None,
                processed: 0,
            }
        }
    }

    impl Filter for OffsetFilter {
        fn signature(&self) -> FilterSignature {
            FilterSignature::builder("offset")
                .input(PortSpec::stream("frame"))
                .input(PortSpec::field("offset"))
                .output(PortSpec::stream("frame"))
                .protocol(Protocol::new().parameter(
                    "offset",
                    crate::core::protocol::ParameterSpec::new(ValueKind::Int)
                        .optional()
                        .updatable(),
                ))
                .build()
        }

        fn apply_parameter(&mut self, key: &str, value: &Value) -> Result<(), ConfigurationError> {
            match key {
                "offset" => {
                    self.offset = value.as_int().unwrap_or(0);
                    Ok(())
                }
                other => Err(ConfigurationError::UnknownParameter {
                    key: other.to_string(),
                }),
            }
        }

        fn accepts_input_format(&mut self, _index: usize, format: &FrameFormat) -> bool {
            self.format = Some(format.clone());
            format.element() == ElementType::Byte
        }

        fn output_format(&mut self, _index: usize) -> Option<FrameFormat> {
            self.format.clone()
        }

        fn process(&mut self, io: &mut FilterIo<'_>) -> EngineResult<ProcessStatus> {
            self.processed += 1;
            let input = io.pull_input(0)?;
            let output = io.new_frame(input.format())?;
            let bytes: Vec<u8> = input
                .bytes()?
                .iter()
                .map(|b| b.wrapping_add(self.offset as u8))
                .collect();
            output.set_bytes(&bytes)?;
            io.put_output(0, &output)?;
            Ok(ProcessStatus::wait_all())
        }
    }

    fn wired_node() -> (FilterNode, Arc<Connection>, Arc<Connection>) {
        let mut node = FilterNode::new("offset", Box::new(OffsetFilter::new()));
        node.init(KeyValueMap::from_pairs([("offset", Value::Int(1))]))
            .unwrap();

        let upstream = Connection::new(PortId::new("source", 0), PortId::new("offset", 0));
        let downstream = Connection::new(PortId::new("offset", 0), PortId::new("sink", 0));
        node.input_port_mut(0).unwrap().attach(Arc::clone(&upstream));
        node.output_port_mut(0)
            .unwrap()
            .attach(Arc::clone(&downstream));

        assert!(node.offer_input_format(0, &byte_format()));
        let format = node.negotiated_output_format(0).unwrap();
        node.set_output_format(0, format);
        (node, upstream, downstream)
    }

    #[test]
    fn test_lifecycle_stages() {
        let context = context();
        let (mut node, _up, _down) = wired_node();
        assert_eq!(node.stage(), LifecycleStage::Unprepared);

        node.perform_prepare(&context).unwrap();
        assert_eq!(node.stage(), LifecycleStage::Prepared);

        node.perform_open(&context).unwrap();
        assert_eq!(node.stage(), LifecycleStage::Processing);
        assert!(node.is_open());

        node.perform_close(&context).unwrap();
        assert_eq!(node.stage(), LifecycleStage::Prepared);
        assert!(!node.is_open());
    }

    #[test]
    fn test_process_step_and_frame_accounting() {
        let context = context();
        let (mut node, upstream, downstream) = wired_node();
        node.perform_prepare(&context).unwrap();
        node.perform_open(&context).unwrap();

        // Not runnable until input data arrives
        assert!(!node.can_process());

        let input = context.frame_manager().new_frame(byte_format()).unwrap();
        input.set_bytes(&[1, 2, 3, 4]).unwrap();
        upstream.put(&input, context.frame_manager());
        context.frame_manager().release_frame(input).unwrap();
        assert!(node.can_process());

        node.perform_process(&context).unwrap();
        let produced = downstream.take().unwrap();
        assert_eq!(produced.bytes().unwrap(), vec![2, 3, 4, 5]);
        // The wire holds the only remaining reference to the output
        assert_eq!(produced.ref_count(), 1);
        context.frame_manager().release_frame(produced).unwrap();

        // Output occupied blocks the next step until the consumer drains it
        let next = context.frame_manager().new_frame(byte_format()).unwrap();
        upstream.put(&next, context.frame_manager());
        context.frame_manager().release_frame(next).unwrap();
        assert!(node.can_process());
    }

    #[test]
    fn test_parameter_update_applied_before_step() {
        let context = context();
        let (mut node, upstream, downstream) = wired_node();
        node.perform_prepare(&context).unwrap();
        node.perform_open(&context).unwrap();

        node.update_parameters(KeyValueMap::from_pairs([("offset", Value::Int(10))]))
            .unwrap();

        let input = context.frame_manager().new_frame(byte_format()).unwrap();
        input.set_bytes(&[0, 0, 0, 0]).unwrap();
        upstream.put(&input, context.frame_manager());
        context.frame_manager().release_frame(input).unwrap();

        node.perform_process(&context).unwrap();
        let produced = downstream.take().unwrap();
        assert_eq!(produced.bytes().unwrap(), vec![10, 10, 10, 10]);
        context.frame_manager().release_frame(produced).unwrap();
    }

    #[test]
    fn test_field_port_transfer() {
        let context = context();
        let (mut node, upstream, downstream) = wired_node();
        node.perform_prepare(&context).unwrap();
        node.perform_open(&context).unwrap();

        node.set_input_value("offset", Value::Int(3)).unwrap();

        let input = context.frame_manager().new_frame(byte_format()).unwrap();
        input.set_bytes(&[5, 5, 5, 5]).unwrap();
        upstream.put(&input, context.frame_manager());
        context.frame_manager().release_frame(input).unwrap();

        node.perform_process(&context).unwrap();
        let produced = downstream.take().unwrap();
        assert_eq!(produced.bytes().unwrap(), vec![8, 8, 8, 8]);
        context.frame_manager().release_frame(produced).unwrap();
    }

    #[test]
    fn test_update_of_unknown_key_rejected() {
        let (mut node, _up, _down) = wired_node();
        let result = node.update_parameters(KeyValueMap::from_pairs([("bogus", Value::Int(1))]));
        assert!(matches!(
            result,
            Err(ConfigurationError::NotUpdatable { .. })
        ));
    }

    #[test]
    fn test_must_close_after_upstream_finishes() {
        let context = context();
        let (mut node, upstream, _downstream) = wired_node();
        node.perform_prepare(&context).unwrap();
        node.perform_open(&context).unwrap();

        upstream.close();
        assert!(node.must_close());
        assert!(!node.can_process());
    }

    #[test]
    fn test_program_port_binds_named_variable() {
        /// Holds uniforms of an attached program stand-in.
        struct Shader {
            uniforms: Arc<parking_lot::Mutex<Vec<(String, Value)>>>,
        }

        impl Filter for Shader {
            fn signature(&self) -> FilterSignature {
                FilterSignature::builder("shader")
                    .input(PortSpec::program("scale", "u_scale"))
                    .build()
            }

            fn apply_parameter(
                &mut self,
                key: &str,
                _value: &Value,
            ) -> Result<(), ConfigurationError> {
                Err(ConfigurationError::UnknownParameter {
                    key: key.to_string(),
                })
            }

            fn set_program_variable(
                &mut self,
                name: &str,
                value: Value,
            ) -> Result<(), RuntimeError> {
                if name == "u_scale" {
                    self.uniforms.lock().push((name.to_string(), value));
                    Ok(())
                } else {
                    Err(RuntimeError::UnknownProgramVariable {
                        name: name.to_string(),
                    })
                }
            }

            fn accepts_input_format(&mut self, _index: usize, _format: &FrameFormat) -> bool {
                true
            }

            fn output_format(&mut self, _index: usize) -> Option<FrameFormat> {
                None
            }

            fn process(&mut self, _io: &mut FilterIo<'_>) -> EngineResult<ProcessStatus> {
                Ok(ProcessStatus::FINISHED)
            }
        }

        let context = context();
        let uniforms = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut node = FilterNode::new(
            "shader",
            Box::new(Shader {
                uniforms: Arc::clone(&uniforms),
            }),
        );
        node.init(KeyValueMap::new()).unwrap();
        node.perform_prepare(&context).unwrap();
        node.perform_open(&context).unwrap();

        node.set_input_value("scale", Value::Float(2.0)).unwrap();
        node.perform_process(&context).unwrap();
        // The deferred value reached the program variable before the step
        assert_eq!(
            uniforms.lock().as_slice(),
            &[("u_scale".to_string(), Value::Float(2.0))]
        );
        assert!(matches!(
            node.set_input_value("missing", Value::Int(0)),
            Err(RuntimeError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_format_rejection() {
        let mut node = FilterNode::new("offset", Box::new(OffsetFilter::new()));
        node.init(KeyValueMap::new()).unwrap();
        let float_format = FrameFormat::builder()
            .element(ElementType::Float)
            .target(StorageTarget::Native)
            .dimensions([4])
            .build();
        assert!(!node.offer_input_format(0, &float_format));
    }
}
