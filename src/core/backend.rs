//! Storage backend contract for non-host frame data.
//!
//! Texture and vertex-buffer frames keep their bytes behind an opaque
//! backend (a GPU device in production). The engine only ever touches
//! backend storage through the `Frame` abstraction, so the contract is
//! small: allocate, attach to an externally owned resource, deallocate,
//! byte-level read/write/copy, and activation of the execution context on
//! whichever thread runs the graph.

use crate::core::error::{AllocationError, RuntimeError};
use crate::core::format::StorageTarget;
use crate::core::frame::FrameBinding;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Opaque identifier of a backend resource.
pub type ResourceId = u64;

/// Contract implemented by frame storage backends.
pub trait StorageBackend: Send + Sync {
    /// Allocate storage of `size` bytes for the given target.
    fn allocate(&self, target: StorageTarget, size: usize) -> Result<ResourceId, AllocationError>;

    /// Wrap an externally owned resource (for example a pre-existing
    /// texture id) without allocating.
    fn attach(
        &self,
        target: StorageTarget,
        binding: FrameBinding,
    ) -> Result<ResourceId, AllocationError>;

    /// Free a resource. Attached resources release the wrapper only; the
    /// external object stays alive.
    fn deallocate(&self, id: ResourceId);

    fn read_bytes(&self, id: ResourceId) -> Result<Vec<u8>, RuntimeError>;

    fn write_bytes(&self, id: ResourceId, data: &[u8]) -> Result<(), RuntimeError>;

    /// Copy the full contents of `src` into `dst`.
    fn copy(&self, src: ResourceId, dst: ResourceId) -> Result<(), RuntimeError>;

    /// Make the backend's execution context current on the calling thread.
    fn activate(&self) {}

    /// Release the execution context from the calling thread.
    fn deactivate(&self) {}
}

/// Counters exposed by [`MemoryBackend`] for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub allocations: usize,
    pub attachments: usize,
    pub deallocations: usize,
    pub bytes_in_use: usize,
}

struct MemoryBackendState {
    resources: HashMap<ResourceId, Vec<u8>>,
    next_id: ResourceId,
    stats: BackendStats,
}

/// Host-memory stand-in for a device backend.
///
/// Keeps texture and vertex storage in plain byte vectors and counts
/// allocations, which lets tests observe whether the frame pool actually
/// avoided a backend allocation.
pub struct MemoryBackend {
    state: Mutex<MemoryBackendState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryBackendState {
                resources: HashMap::new(),
                next_id: 1,
                stats: BackendStats::default(),
            }),
        }
    }

    pub fn stats(&self) -> BackendStats {
        self.state.lock().stats
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn allocate(&self, target: StorageTarget, size: usize) -> Result<ResourceId, AllocationError> {
        if !matches!(target, StorageTarget::Texture | StorageTarget::Vertex) {
            return Err(AllocationError::UnsupportedTarget(target));
        }
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.resources.insert(id, vec![0; size]);
        state.stats.allocations += 1;
        state.stats.bytes_in_use += size;
        Ok(id)
    }

    fn attach(
        &self,
        target: StorageTarget,
        _binding: FrameBinding,
    ) -> Result<ResourceId, AllocationError> {
        if target != StorageTarget::Texture {
            return Err(AllocationError::UnsupportedBinding(target));
        }
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.resources.insert(id, Vec::new());
        state.stats.attachments += 1;
        Ok(id)
    }

    fn deallocate(&self, id: ResourceId) {
        let mut state = self.state.lock();
        if let Some(data) = state.resources.remove(&id) {
            state.stats.deallocations += 1;
            state.stats.bytes_in_use = state.stats.bytes_in_use.saturating_sub(data.len());
        }
    }

    fn read_bytes(&self, id: ResourceId) -> Result<Vec<u8>, RuntimeError> {
        self.state
            .lock()
            .resources
            .get(&id)
            .cloned()
            .ok_or(RuntimeError::FrameDeallocated)
    }

    fn write_bytes(&self, id: ResourceId, data: &[u8]) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        let buffer = state
            .resources
            .get_mut(&id)
            .ok_or(RuntimeError::FrameDeallocated)?;
        // Attached resources take whatever size is written; allocated ones
        // must match their storage size.
        if !buffer.is_empty() && buffer.len() != data.len() {
            return Err(RuntimeError::DataSize {
                expected: buffer.len(),
                got: data.len(),
            });
        }
        buffer.clear();
        buffer.extend_from_slice(data);
        Ok(())
    }

    fn copy(&self, src: ResourceId, dst: ResourceId) -> Result<(), RuntimeError> {
        let data = self.read_bytes(src)?;
        let mut state = self.state.lock();
        let buffer = state
            .resources
            .get_mut(&dst)
            .ok_or(RuntimeError::FrameDeallocated)?;
        buffer.clear();
        buffer.extend_from_slice(&data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_free() {
        let backend = MemoryBackend::new();
        let id = backend.allocate(StorageTarget::Texture, 64).unwrap();
        assert_eq!(backend.stats().allocations, 1);
        assert_eq!(backend.stats().bytes_in_use, 64);

        backend.deallocate(id);
        assert_eq!(backend.stats().deallocations, 1);
        assert_eq!(backend.stats().bytes_in_use, 0);
    }

    #[test]
    fn test_host_target_rejected() {
        let backend = MemoryBackend::new();
        let result = backend.allocate(StorageTarget::Host, 64);
        assert!(matches!(result, Err(AllocationError::UnsupportedTarget(_))));
    }

    #[test]
    fn test_read_write_copy() {
        let backend = MemoryBackend::new();
        let a = backend.allocate(StorageTarget::Texture, 4).unwrap();
        let b = backend.allocate(StorageTarget::Texture, 4).unwrap();

        backend.write_bytes(a, &[1, 2, 3, 4]).unwrap();
        backend.copy(a, b).unwrap();
        assert_eq!(backend.read_bytes(b).unwrap(), vec![1, 2, 3, 4]);

        let wrong = backend.write_bytes(a, &[1, 2]);
        assert!(matches!(wrong, Err(RuntimeError::DataSize { .. })));
    }
}
