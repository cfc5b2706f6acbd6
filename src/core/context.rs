//! Shared execution context.
//!
//! A `FilterContext` bundles the frame manager, the storage backend and a
//! context-wide named frame store. Runners sharing one context may touch
//! the store concurrently, so it sits behind a mutex; all other engine
//! state is confined to the thread stepping the graph.

use crate::core::backend::StorageBackend;
use crate::core::error::RuntimeError;
use crate::core::frame::Frame;
use crate::core::manager::FrameManager;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Frame manager, storage backend and named frame store shared by every
/// filter in a graph.
pub struct FilterContext {
    frame_manager: Arc<dyn FrameManager>,
    backend: Arc<dyn StorageBackend>,
    stored_frames: Mutex<IndexMap<String, Frame>>,
}

impl FilterContext {
    pub fn new(frame_manager: Arc<dyn FrameManager>, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            frame_manager,
            backend,
            stored_frames: Mutex::new(IndexMap::new()),
        }
    }

    pub fn frame_manager(&self) -> &dyn FrameManager {
        self.frame_manager.as_ref()
    }

    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    /// Keep a frame under a name. The store takes a reference of its own
    /// and releases any frame previously stored under the same key.
    pub fn store_frame(&self, key: &str, frame: &Frame) -> Result<(), RuntimeError> {
        self.frame_manager.retain_frame(frame);
        let previous = self
            .stored_frames
            .lock()
            .insert(key.to_string(), frame.clone());
        if let Some(previous) = previous {
            self.frame_manager.release_frame(previous)?;
        }
        Ok(())
    }

    /// Look up a stored frame. The caller receives a reference of its own
    /// and must release it.
    pub fn fetch_frame(&self, key: &str) -> Option<Frame> {
        let stored = self.stored_frames.lock();
        let frame = stored.get(key)?.clone();
        self.frame_manager.retain_frame(&frame);
        Some(frame)
    }

    /// Drop a stored frame, releasing the store's reference.
    pub fn remove_frame(&self, key: &str) -> Result<(), RuntimeError> {
        let frame = self.stored_frames.lock().shift_remove(key);
        match frame {
            Some(frame) => self.frame_manager.release_frame(frame),
            None => Ok(()),
        }
    }

    pub fn stored_frame_count(&self) -> usize {
        self.stored_frames.lock().len()
    }
}

impl Drop for FilterContext {
    fn drop(&mut self) {
        let frames: Vec<Frame> = self.stored_frames.get_mut().drain(..).map(|(_, f)| f).collect();
        for frame in frames {
            if let Err(e) = self.frame_manager.release_frame(frame) {
                log::warn!("stored frame release failed during context drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::MemoryBackend;
    use crate::core::format::{ElementType, FrameFormat, StorageTarget};
    use crate::core::manager::SimpleFrameManager;

    fn context() -> FilterContext {
        let backend = Arc::new(MemoryBackend::new());
        FilterContext::new(Arc::new(SimpleFrameManager::new(backend.clone())), backend)
    }

    fn frame(context: &FilterContext) -> Frame {
        let format = FrameFormat::builder()
            .element(ElementType::Byte)
            .target(StorageTarget::Native)
            .dimensions([2])
            .build();
        context.frame_manager().new_frame(format).unwrap()
    }

    #[test]
    fn test_store_and_fetch_retain() {
        let context = context();
        let frame = frame(&context);

        context.store_frame("key", &frame).unwrap();
        assert_eq!(frame.ref_count(), 2);

        let fetched = context.fetch_frame("key").unwrap();
        assert!(fetched.same_as(&frame));
        assert_eq!(frame.ref_count(), 3);

        context.frame_manager().release_frame(fetched).unwrap();
        assert_eq!(frame.ref_count(), 2);
    }

    #[test]
    fn test_store_replaces_previous() {
        let context = context();
        let first = frame(&context);
        let second = frame(&context);

        context.store_frame("key", &first).unwrap();
        context.store_frame("key", &second).unwrap();
        // The store dropped its reference on the first frame
        assert_eq!(first.ref_count(), 1);
        assert_eq!(second.ref_count(), 2);
        assert_eq!(context.stored_frame_count(), 1);
    }

    #[test]
    fn test_remove_releases() {
        let context = context();
        let frame = frame(&context);
        context.store_frame("key", &frame).unwrap();

        context.remove_frame("key").unwrap();
        assert_eq!(frame.ref_count(), 1);
        assert!(context.fetch_frame("key").is_none());

        // Removing a missing key is not an error
        context.remove_frame("key").unwrap();
    }

    #[test]
    fn test_fetch_missing_key() {
        let context = context();
        assert!(context.fetch_frame("missing").is_none());
    }
}
