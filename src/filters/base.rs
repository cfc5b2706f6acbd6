//! Base filters the engine itself relies on.
//!
//! These are the primitives graph assembly and tests build on: a source
//! emitting configured values, a pass-through, the discarding sink used to
//! terminate unconnected outputs, the fan-out branch inserted by
//! auto-branching, named frame store access, and a sink delivering frames
//! to a host closure.

use crate::core::error::{ConfigurationError, EngineResult, RuntimeError};
use crate::core::filter::{Filter, FilterIo, FilterSignature, ProcessStatus};
use crate::core::format::FrameFormat;
use crate::core::frame::Frame;
use crate::core::port::PortSpec;
use crate::core::protocol::{ParameterSpec, Protocol};
use crate::core::types::{Value, ValueKind};
use std::sync::Arc;

/// Emits a configured value as object frames.
///
/// With `repeat` set the source emits the value every time its output
/// drains; `max_frames` bounds the total number of emitted frames. Without
/// either, the source emits once and finishes.
pub struct ObjectSource {
    object: Option<Value>,
    repeat: bool,
    max_frames: Option<i64>,
    emitted: i64,
}

impl ObjectSource {
    pub fn new() -> Self {
        Self {
            object: None,
            repeat: false,
            max_frames: None,
            emitted: 0,
        }
    }
}

impl Default for ObjectSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for ObjectSource {
    fn signature(&self) -> FilterSignature {
        FilterSignature::builder("object_source")
            .description("Emits a configured value as object frames")
            .output(PortSpec::stream("frame"))
            .protocol(
                Protocol::new()
                    .parameter(
                        "object",
                        ParameterSpec::new(ValueKind::Any).optional().updatable(),
                    )
                    .optional("repeat", ValueKind::Bool)
                    .optional("max_frames", ValueKind::Int),
            )
            .build()
    }

    fn apply_parameter(&mut self, key: &str, value: &Value) -> Result<(), ConfigurationError> {
        match key {
            "object" => self.object = Some(value.clone()),
            "repeat" => self.repeat = value.as_bool().unwrap_or(false),
            "max_frames" => self.max_frames = value.as_int(),
            other => {
                return Err(ConfigurationError::UnknownParameter {
                    key: other.to_string(),
                })
            }
        }
        Ok(())
    }

    fn accepts_input_format(&mut self, _index: usize, _format: &FrameFormat) -> bool {
        false
    }

    fn output_format(&mut self, _index: usize) -> Option<FrameFormat> {
        Some(match &self.object {
            Some(value) => FrameFormat::object(value.kind()),
            None => FrameFormat::object(ValueKind::Any),
        })
    }

    fn process(&mut self, io: &mut FilterIo<'_>) -> EngineResult<ProcessStatus> {
        let value = match &self.object {
            Some(value) => value.clone(),
            None => {
                return Err(RuntimeError::FilterFailed {
                    filter: io.filter_name().to_string(),
                    reason: "producing a frame with no object set".to_string(),
                }
                .into())
            }
        };
        let frame = io.new_empty_frame(FrameFormat::object(value.kind()))?;
        frame.set_value(value)?;
        io.put_output(0, &frame)?;
        self.emitted += 1;

        let finished = match self.max_frames {
            Some(limit) => self.emitted >= limit,
            None => !self.repeat,
        };
        if finished {
            Ok(ProcessStatus::FINISHED)
        } else {
            Ok(ProcessStatus::WAIT_FOR_FREE_OUTPUTS)
        }
    }
}

/// Forwards every input frame unchanged.
pub struct PassThrough {
    format: Option<FrameFormat>,
}

impl PassThrough {
    pub fn new() -> Self {
        Self { format: None }
    }
}

impl Default for PassThrough {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for PassThrough {
    fn signature(&self) -> FilterSignature {
        FilterSignature::builder("pass_through")
            .description("Forwards frames unchanged")
            .input(PortSpec::stream("frame"))
            .output(PortSpec::stream("frame"))
            .build()
    }

    fn apply_parameter(&mut self, key: &str, _value: &Value) -> Result<(), ConfigurationError> {
        Err(ConfigurationError::UnknownParameter {
            key: key.to_string(),
        })
    }

    fn accepts_input_format(&mut self, _index: usize, format: &FrameFormat) -> bool {
        self.format = Some(format.clone());
        true
    }

    fn output_format(&mut self, _index: usize) -> Option<FrameFormat> {
        self.format.clone()
    }

    fn process(&mut self, io: &mut FilterIo<'_>) -> EngineResult<ProcessStatus> {
        let frame = io.pull_input(0)?;
        io.put_output(0, &frame)?;
        Ok(ProcessStatus::wait_all())
    }
}

/// Consumes and discards every input frame.
///
/// Graph setup wires unconnected outputs to instances of this filter when
/// the discard-unconnected-outputs policy is enabled.
pub struct NullSink;

impl Filter for NullSink {
    fn signature(&self) -> FilterSignature {
        FilterSignature::builder("null_sink")
            .description("Consumes and discards frames")
            .input(PortSpec::stream("frame"))
            .build()
    }

    fn apply_parameter(&mut self, key: &str, _value: &Value) -> Result<(), ConfigurationError> {
        Err(ConfigurationError::UnknownParameter {
            key: key.to_string(),
        })
    }

    fn accepts_input_format(&mut self, _index: usize, _format: &FrameFormat) -> bool {
        true
    }

    fn output_format(&mut self, _index: usize) -> Option<FrameFormat> {
        None
    }

    fn process(&mut self, io: &mut FilterIo<'_>) -> EngineResult<ProcessStatus> {
        io.pull_input(0)?;
        Ok(ProcessStatus::WAIT_FOR_ALL_INPUTS)
    }
}

/// Fans one input out to several outputs.
///
/// In synced mode every consumer receives every frame and the branch waits
/// until all outputs drain. In unsynced mode the branch delivers to
/// whichever outputs are free and drops the frame for busy ones.
pub struct FrameBranch {
    outputs: usize,
    synced: bool,
    format: Option<FrameFormat>,
}

impl FrameBranch {
    pub fn new() -> Self {
        Self {
            outputs: 2,
            synced: true,
            format: None,
        }
    }
}

impl Default for FrameBranch {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for FrameBranch {
    fn signature(&self) -> FilterSignature {
        let mut builder = FilterSignature::builder("frame_branch")
            .description("Fans one input out to several outputs")
            .input(PortSpec::stream("in"))
            .protocol(
                Protocol::new()
                    .optional("outputs", ValueKind::Int)
                    .optional("synced", ValueKind::Bool),
            );
        for i in 0..self.outputs {
            builder = builder.output(PortSpec::stream(format!("out{}", i)));
        }
        builder.build()
    }

    fn apply_parameter(&mut self, key: &str, value: &Value) -> Result<(), ConfigurationError> {
        match key {
            "outputs" => {
                let count = value.as_int().unwrap_or(2);
                if count < 1 {
                    return Err(ConfigurationError::InvalidValue {
                        key: key.to_string(),
                        reason: "a branch needs at least one output".to_string(),
                    });
                }
                self.outputs = count as usize;
            }
            "synced" => self.synced = value.as_bool().unwrap_or(true),
            other => {
                return Err(ConfigurationError::UnknownParameter {
                    key: other.to_string(),
                })
            }
        }
        Ok(())
    }

    fn accepts_input_format(&mut self, _index: usize, format: &FrameFormat) -> bool {
        self.format = Some(format.clone());
        true
    }

    fn output_format(&mut self, _index: usize) -> Option<FrameFormat> {
        self.format.clone()
    }

    fn process(&mut self, io: &mut FilterIo<'_>) -> EngineResult<ProcessStatus> {
        let frame = io.pull_input(0)?;
        if self.synced {
            for i in 0..self.outputs {
                io.put_output(i, &frame)?;
            }
            Ok(ProcessStatus::wait_all())
        } else {
            for i in 0..self.outputs {
                io.try_put_output(i, &frame)?;
            }
            Ok(ProcessStatus::WAIT_FOR_ALL_INPUTS | ProcessStatus::WAIT_FOR_FREE_OUTPUT)
        }
    }
}

/// Stores every input frame in the context's named store.
pub struct FrameStore {
    key: String,
}

impl FrameStore {
    pub fn new() -> Self {
        Self { key: String::new() }
    }
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for FrameStore {
    fn signature(&self) -> FilterSignature {
        FilterSignature::builder("frame_store")
            .description("Stores frames under a name in the context")
            .input(PortSpec::stream("frame"))
            .protocol(Protocol::new().required("key", ValueKind::String))
            .build()
    }

    fn apply_parameter(&mut self, key: &str, value: &Value) -> Result<(), ConfigurationError> {
        match key {
            "key" => {
                self.key = value.as_str().unwrap_or_default().to_string();
                Ok(())
            }
            other => Err(ConfigurationError::UnknownParameter {
                key: other.to_string(),
            }),
        }
    }

    fn accepts_input_format(&mut self, _index: usize, _format: &FrameFormat) -> bool {
        true
    }

    fn output_format(&mut self, _index: usize) -> Option<FrameFormat> {
        None
    }

    fn process(&mut self, io: &mut FilterIo<'_>) -> EngineResult<ProcessStatus> {
        let frame = io.pull_input(0)?;
        io.store_frame(&self.key, &frame)?;
        Ok(ProcessStatus::WAIT_FOR_ALL_INPUTS)
    }
}

/// Emits frames fetched from the context's named store.
///
/// While the key is absent the filter sleeps and polls again, which lets a
/// fetch graph wait for a store graph feeding the same context.
pub struct FrameFetch {
    key: String,
    repeat: bool,
}

impl FrameFetch {
    pub fn new() -> Self {
        Self {
            key: String::new(),
            repeat: false,
        }
    }
}

impl Default for FrameFetch {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for FrameFetch {
    fn signature(&self) -> FilterSignature {
        FilterSignature::builder("frame_fetch")
            .description("Emits frames fetched from the context by name")
            .output(PortSpec::stream("frame"))
            .protocol(
                Protocol::new()
                    .required("key", ValueKind::String)
                    .optional("repeat", ValueKind::Bool),
            )
            .build()
    }

    fn apply_parameter(&mut self, key: &str, value: &Value) -> Result<(), ConfigurationError> {
        match key {
            "key" => self.key = value.as_str().unwrap_or_default().to_string(),
            "repeat" => self.repeat = value.as_bool().unwrap_or(false),
            other => {
                return Err(ConfigurationError::UnknownParameter {
                    key: other.to_string(),
                })
            }
        }
        Ok(())
    }

    fn accepts_input_format(&mut self, _index: usize, _format: &FrameFormat) -> bool {
        false
    }

    fn output_format(&mut self, _index: usize) -> Option<FrameFormat> {
        Some(FrameFormat::unspecified())
    }

    fn process(&mut self, io: &mut FilterIo<'_>) -> EngineResult<ProcessStatus> {
        match io.fetch_stored_frame(&self.key) {
            Some(frame) => {
                io.put_output(0, &frame)?;
                if self.repeat {
                    Ok(ProcessStatus::WAIT_FOR_FREE_OUTPUTS)
                } else {
                    Ok(ProcessStatus::FINISHED)
                }
            }
            None => Ok(ProcessStatus::SLEEP | ProcessStatus::WAIT_FOR_FREE_OUTPUTS),
        }
    }
}

/// Host closure invoked by [`CallbackSink`] for every received frame.
pub struct FrameListener {
    callback: Box<dyn Fn(&Frame) + Send + Sync>,
}

impl FrameListener {
    pub fn new(callback: impl Fn(&Frame) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    pub fn call(&self, frame: &Frame) {
        (self.callback)(frame)
    }
}

/// Delivers every input frame to a host closure.
///
/// The listener arrives either through the `listener` parameter as an
/// external value wrapping a [`FrameListener`], or directly through
/// [`CallbackSink::with_listener`]. The closure runs on the thread
/// stepping the graph; hosts that need the frame beyond the call must
/// retain it.
pub struct CallbackSink {
    listener: Option<Arc<FrameListener>>,
}

impl CallbackSink {
    pub fn new() -> Self {
        Self { listener: None }
    }

    pub fn with_listener(callback: impl Fn(&Frame) + Send + Sync + 'static) -> Self {
        Self {
            listener: Some(Arc::new(FrameListener::new(callback))),
        }
    }
}

impl Default for CallbackSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for CallbackSink {
    fn signature(&self) -> FilterSignature {
        FilterSignature::builder("callback_sink")
            .description("Delivers frames to a host callback")
            .input(PortSpec::stream("frame"))
            .protocol(Protocol::new().parameter(
                "listener",
                ParameterSpec::new(ValueKind::External).optional().updatable(),
            ))
            .build()
    }

    fn apply_parameter(&mut self, key: &str, value: &Value) -> Result<(), ConfigurationError> {
        match key {
            "listener" => match value.external::<FrameListener>() {
                Some(listener) => {
                    self.listener = Some(listener);
                    Ok(())
                }
                None => Err(ConfigurationError::InvalidValue {
                    key: key.to_string(),
                    reason: "expected an external FrameListener".to_string(),
                }),
            },
            other => Err(ConfigurationError::UnknownParameter {
                key: other.to_string(),
            }),
        }
    }

    fn accepts_input_format(&mut self, _index: usize, _format: &FrameFormat) -> bool {
        true
    }

    fn output_format(&mut self, _index: usize) -> Option<FrameFormat> {
        None
    }

    fn process(&mut self, io: &mut FilterIo<'_>) -> EngineResult<ProcessStatus> {
        let frame = io.pull_input(0)?;
        match &self.listener {
            Some(listener) => listener.call(&frame),
            None => {
                return Err(RuntimeError::FilterFailed {
                    filter: io.filter_name().to_string(),
                    reason: "received a frame with no listener set".to_string(),
                }
                .into())
            }
        }
        Ok(ProcessStatus::WAIT_FOR_ALL_INPUTS)
    }
}
