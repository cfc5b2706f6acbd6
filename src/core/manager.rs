//! Frame allocation, reference counting and pooling.
//!
//! The manager is the only authority over frame lifecycles: filters and
//! connections never mutate reference counts directly. `SimpleFrameManager`
//! allocates and frees eagerly; `CachedFrameManager` adds a bounded free
//! list so expensive native and backend storage survives the per-frame hot
//! path.

use crate::core::backend::StorageBackend;
use crate::core::error::{AllocationError, EngineError, RuntimeError};
use crate::core::format::{FrameFormat, StorageTarget};
use crate::core::frame::{BackendResource, Frame, FrameBinding, FrameData};
use parking_lot::Mutex;
use std::sync::Arc;

/// Default pool capacity in tracked bytes.
pub const DEFAULT_POOL_CAPACITY: usize = 32 * 1024 * 1024;

/// Authority for frame allocation, retain/release and reuse policy.
pub trait FrameManager: Send + Sync {
    /// Allocate a frame with storage for its format.
    fn new_frame(&self, format: FrameFormat) -> Result<Frame, AllocationError>;

    /// Allocate a frame without requiring content storage. Only meaningful
    /// for object-backed frames; other targets allocate as `new_frame`.
    fn new_empty_frame(&self, format: FrameFormat) -> Result<Frame, AllocationError>;

    /// Wrap an externally supplied backend resource.
    fn new_bound_frame(
        &self,
        format: FrameFormat,
        binding: FrameBinding,
    ) -> Result<Frame, AllocationError>;

    /// Allocate a new frame with the same format and a copy of the data.
    fn duplicate_frame(&self, frame: &Frame) -> Result<Frame, EngineError>;

    /// Increment the logical reference count.
    fn retain_frame(&self, frame: &Frame);

    /// Decrement the logical reference count. At zero the frame is pooled
    /// or deallocated, exactly once. Dropping below zero is an invariant
    /// violation and aborts the run.
    fn release_frame(&self, frame: Frame) -> Result<(), RuntimeError>;
}

/// Allocates fresh storage for every request and frees at count zero.
pub struct SimpleFrameManager {
    backend: Arc<dyn StorageBackend>,
}

impl SimpleFrameManager {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn create(&self, format: FrameFormat) -> Result<Frame, AllocationError> {
        let target = format.target();
        let data = match target {
            StorageTarget::Host => FrameData::Object(None),
            StorageTarget::Native => FrameData::Buffer(vec![0; format.size()]),
            // An "empty" allocation only has meaning for object frames;
            // binary targets always get storage.
            StorageTarget::Texture | StorageTarget::Vertex => {
                let id = self.backend.allocate(target, format.size())?;
                FrameData::Backend(BackendResource {
                    id,
                    backend: Arc::clone(&self.backend),
                })
            }
            StorageTarget::Unspecified | StorageTarget::Compute => {
                return Err(AllocationError::UnsupportedTarget(target));
            }
        };
        // Host object frames are cheap; recycling only pays off for buffer
        // and backend storage.
        let reusable = !matches!(target, StorageTarget::Host);
        Ok(Frame::new(format, data, reusable, FrameBinding::None))
    }
}

impl FrameManager for SimpleFrameManager {
    fn new_frame(&self, format: FrameFormat) -> Result<Frame, AllocationError> {
        self.create(format)
    }

    fn new_empty_frame(&self, format: FrameFormat) -> Result<Frame, AllocationError> {
        self.create(format)
    }

    fn new_bound_frame(
        &self,
        format: FrameFormat,
        binding: FrameBinding,
    ) -> Result<Frame, AllocationError> {
        let target = format.target();
        if target != StorageTarget::Texture {
            return Err(AllocationError::UnsupportedBinding(target));
        }
        let id = self.backend.attach(target, binding)?;
        let data = FrameData::Backend(BackendResource {
            id,
            backend: Arc::clone(&self.backend),
        });
        Ok(Frame::new(format, data, true, binding))
    }

    fn duplicate_frame(&self, frame: &Frame) -> Result<Frame, EngineError> {
        let format = frame.format();
        let copy = self.new_frame(format.clone())?;
        match format.target() {
            StorageTarget::Host => {
                if let Some(value) = frame.value()? {
                    copy.set_value(value)?;
                }
            }
            _ => copy.set_bytes(&frame.bytes()?)?,
        }
        Ok(copy)
    }

    fn retain_frame(&self, frame: &Frame) {
        frame.retain_internal();
    }

    fn release_frame(&self, frame: Frame) -> Result<(), RuntimeError> {
        finish_release(&frame, frame.release_internal())
    }
}

fn finish_release(frame: &Frame, count: isize) -> Result<(), RuntimeError> {
    if count == 0 {
        frame.dealloc();
        Ok(())
    } else if count < 0 {
        Err(RuntimeError::RefCountUnderflow)
    } else {
        Ok(())
    }
}

struct FramePool {
    frames: Vec<Frame>,
    tracked_size: usize,
}

/// Pooling manager with a bounded free list.
///
/// Releasing a reusable frame at count zero parks it in the pool when there
/// is headroom. Allocation scans the pool for the first frame whose format
/// is replaceable by the request (same target, same size) and whose binding
/// matches, swaps the format and hands the storage back out.
pub struct CachedFrameManager {
    base: SimpleFrameManager,
    pool: Mutex<FramePool>,
    capacity: usize,
}

impl CachedFrameManager {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_capacity(backend, DEFAULT_POOL_CAPACITY)
    }

    pub fn with_capacity(backend: Arc<dyn StorageBackend>, capacity: usize) -> Self {
        Self {
            base: SimpleFrameManager::new(backend),
            pool: Mutex::new(FramePool {
                frames: Vec::new(),
                tracked_size: 0,
            }),
            capacity,
        }
    }

    /// Tracked byte size of the pooled frames.
    pub fn pool_size(&self) -> usize {
        self.pool.lock().tracked_size
    }

    /// Number of frames currently parked in the pool.
    pub fn pooled_frames(&self) -> usize {
        self.pool.lock().frames.len()
    }

    fn find_available(&self, format: &FrameFormat, binding: FrameBinding) -> Option<Frame> {
        let mut pool = self.pool.lock();
        let index = pool.frames.iter().position(|frame| {
            frame.format().is_replaceable_by(format) && frame.binding() == binding
        })?;
        let frame = pool.frames.swap_remove(index);
        pool.tracked_size = pool.tracked_size.saturating_sub(frame.format().size());
        drop(pool);

        log::trace!("frame pool hit for {}", format);
        frame.retain_internal();
        frame.reset(format.clone());
        Some(frame)
    }

    fn store(&self, frame: Frame) -> bool {
        let size = frame.format().size();
        let mut pool = self.pool.lock();
        if pool.tracked_size + size <= self.capacity {
            pool.tracked_size += size;
            pool.frames.push(frame);
            true
        } else {
            false
        }
    }
}

impl FrameManager for CachedFrameManager {
    fn new_frame(&self, format: FrameFormat) -> Result<Frame, AllocationError> {
        match self.find_available(&format, FrameBinding::None) {
            Some(frame) => Ok(frame),
            None => self.base.new_frame(format),
        }
    }

    fn new_empty_frame(&self, format: FrameFormat) -> Result<Frame, AllocationError> {
        self.base.new_empty_frame(format)
    }

    fn new_bound_frame(
        &self,
        format: FrameFormat,
        binding: FrameBinding,
    ) -> Result<Frame, AllocationError> {
        match self.find_available(&format, binding) {
            Some(frame) => Ok(frame),
            None => self.base.new_bound_frame(format, binding),
        }
    }

    fn duplicate_frame(&self, frame: &Frame) -> Result<Frame, EngineError> {
        let format = frame.format();
        let copy = self.new_frame(format.clone())?;
        match format.target() {
            StorageTarget::Host => {
                if let Some(value) = frame.value()? {
                    copy.set_value(value)?;
                }
            }
            _ => copy.set_bytes(&frame.bytes()?)?,
        }
        Ok(copy)
    }

    fn retain_frame(&self, frame: &Frame) {
        frame.retain_internal();
    }

    fn release_frame(&self, frame: Frame) -> Result<(), RuntimeError> {
        if !frame.is_reusable() {
            return self.base.release_frame(frame);
        }
        let count = frame.release_internal();
        if count == 0 {
            if !self.store(frame.clone()) {
                frame.dealloc();
            }
            Ok(())
        } else if count < 0 {
            Err(RuntimeError::RefCountUnderflow)
        } else {
            Ok(())
        }
    }
}
