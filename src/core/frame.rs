//! Reference-counted frames.
//!
//! A `Frame` is a cheap cloneable handle to a buffer of a given format.
//! Cloning a handle never changes the logical reference count; counts are
//! only moved by the frame manager's retain/release pair, and backend
//! storage is freed exactly once, when the count reaches zero and the
//! manager declines to pool the frame.

use crate::core::backend::{ResourceId, StorageBackend};
use crate::core::error::RuntimeError;
use crate::core::format::{ElementType, FrameFormat, StorageTarget};
use crate::core::types::Value;
use image::DynamicImage;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::Arc;

/// How a frame relates to its backend resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBinding {
    /// The frame owns newly allocated storage.
    None,
    /// Attached to a pre-existing texture with the given id.
    Texture(i64),
    /// Attached to a pre-existing framebuffer with the given id.
    FrameBuffer(i64),
}

/// A backend resource together with the backend that owns it.
pub struct BackendResource {
    pub id: ResourceId,
    pub backend: Arc<dyn StorageBackend>,
}

impl fmt::Debug for BackendResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendResource")
            .field("id", &self.id)
            .finish()
    }
}

/// The storage variant behind a frame, implied by its format target.
#[derive(Debug)]
pub enum FrameData {
    /// Host object storage (object and struct frames)
    Object(Option<Value>),
    /// Raw native memory
    Buffer(Vec<u8>),
    /// Backend-owned storage (textures, vertex buffers)
    Backend(BackendResource),
    /// Storage has been freed
    Deallocated,
}

struct FrameInner {
    format: RwLock<FrameFormat>,
    data: Mutex<FrameData>,
    ref_count: AtomicIsize,
    read_only: AtomicBool,
    reusable: bool,
    binding: FrameBinding,
}

impl Drop for FrameInner {
    fn drop(&mut self) {
        // Safety net for handles that escape the manager. The regular path
        // deallocates at refcount zero.
        let data = self.data.get_mut();
        if let FrameData::Backend(resource) = data {
            resource.backend.deallocate(resource.id);
            *data = FrameData::Deallocated;
        }
    }
}

/// Handle to a reference-counted frame.
#[derive(Clone)]
pub struct Frame {
    inner: Arc<FrameInner>,
}

impl Frame {
    pub(crate) fn new(
        format: FrameFormat,
        data: FrameData,
        reusable: bool,
        binding: FrameBinding,
    ) -> Self {
        Self {
            inner: Arc::new(FrameInner {
                format: RwLock::new(format),
                data: Mutex::new(data),
                ref_count: AtomicIsize::new(1),
                read_only: AtomicBool::new(false),
                reusable,
                binding,
            }),
        }
    }

    pub fn format(&self) -> FrameFormat {
        self.inner.format.read().clone()
    }

    pub fn target(&self) -> StorageTarget {
        self.inner.format.read().target()
    }

    pub fn binding(&self) -> FrameBinding {
        self.inner.binding
    }

    /// Current logical reference count.
    pub fn ref_count(&self) -> isize {
        self.inner.ref_count.load(Ordering::SeqCst)
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only.load(Ordering::SeqCst)
    }

    /// Frames become read-only once pushed onto a connection.
    pub fn mark_read_only(&self) {
        self.inner.read_only.store(true, Ordering::SeqCst);
    }

    /// Whether the manager may recycle this frame's storage.
    pub fn is_reusable(&self) -> bool {
        self.inner.reusable
    }

    /// Whether two handles refer to the same frame.
    pub fn same_as(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // Data access ///////////////////////////////////////////////////////////

    /// Set the value of an object frame.
    pub fn set_value(&self, value: Value) -> Result<(), RuntimeError> {
        self.check_writable()?;
        match &mut *self.inner.data.lock() {
            FrameData::Object(slot) => {
                *slot = Some(value);
                Ok(())
            }
            FrameData::Deallocated => Err(RuntimeError::FrameDeallocated),
            _ => Err(RuntimeError::WrongStorage { expected: "object" }),
        }
    }

    /// The value of an object frame, if one has been set.
    pub fn value(&self) -> Result<Option<Value>, RuntimeError> {
        match &*self.inner.data.lock() {
            FrameData::Object(slot) => Ok(slot.clone()),
            FrameData::Deallocated => Err(RuntimeError::FrameDeallocated),
            _ => Err(RuntimeError::WrongStorage { expected: "object" }),
        }
    }

    /// Overwrite the full contents of a binary frame.
    pub fn set_bytes(&self, bytes: &[u8]) -> Result<(), RuntimeError> {
        self.check_writable()?;
        let expected = self.inner.format.read().size();
        match &mut *self.inner.data.lock() {
            FrameData::Buffer(buffer) => {
                if bytes.len() != expected {
                    return Err(RuntimeError::DataSize {
                        expected,
                        got: bytes.len(),
                    });
                }
                buffer.clear();
                buffer.extend_from_slice(bytes);
                Ok(())
            }
            FrameData::Backend(resource) => resource.backend.write_bytes(resource.id, bytes),
            FrameData::Deallocated => Err(RuntimeError::FrameDeallocated),
            FrameData::Object(_) => Err(RuntimeError::WrongStorage { expected: "binary" }),
        }
    }

    /// The full contents of a binary frame.
    pub fn bytes(&self) -> Result<Vec<u8>, RuntimeError> {
        match &*self.inner.data.lock() {
            FrameData::Buffer(buffer) => Ok(buffer.clone()),
            FrameData::Backend(resource) => resource.backend.read_bytes(resource.id),
            FrameData::Deallocated => Err(RuntimeError::FrameDeallocated),
            FrameData::Object(_) => Err(RuntimeError::WrongStorage { expected: "binary" }),
        }
    }

    pub fn set_ints(&self, values: &[i32]) -> Result<(), RuntimeError> {
        self.set_bytes(bytemuck::cast_slice(values))
    }

    pub fn ints(&self) -> Result<Vec<i32>, RuntimeError> {
        Ok(bytemuck::pod_collect_to_vec(&self.bytes()?))
    }

    pub fn set_floats(&self, values: &[f32]) -> Result<(), RuntimeError> {
        self.set_bytes(bytemuck::cast_slice(values))
    }

    pub fn floats(&self) -> Result<Vec<f32>, RuntimeError> {
        Ok(bytemuck::pod_collect_to_vec(&self.bytes()?))
    }

    /// Write an image into an image-shaped byte frame (4 bytes per sample,
    /// width x height dimensions).
    pub fn set_image(&self, image: &DynamicImage) -> Result<(), RuntimeError> {
        let format = self.format();
        self.check_image_shape(&format, image.width() as usize, image.height() as usize)?;
        self.set_bytes(&image.to_rgba8().into_raw())
    }

    /// Read an image-shaped byte frame back out as an RGBA image.
    pub fn image(&self) -> Result<image::RgbaImage, RuntimeError> {
        let format = self.format();
        let (width, height) = match (format.width(), format.height()) {
            (Some(w), Some(h)) => (w, h),
            _ => return Err(RuntimeError::WrongStorage { expected: "image" }),
        };
        self.check_image_shape(&format, width, height)?;
        let bytes = self.bytes()?;
        image::RgbaImage::from_raw(width as u32, height as u32, bytes)
            .ok_or(RuntimeError::WrongStorage { expected: "image" })
    }

    fn check_image_shape(
        &self,
        format: &FrameFormat,
        width: usize,
        height: usize,
    ) -> Result<(), RuntimeError> {
        let shaped = format.element() == ElementType::Byte
            && format.bytes_per_sample() == 4
            && format.width() == Some(width)
            && format.height() == Some(height);
        if shaped {
            Ok(())
        } else {
            Err(RuntimeError::WrongStorage { expected: "image" })
        }
    }

    fn check_writable(&self) -> Result<(), RuntimeError> {
        if self.is_read_only() {
            Err(RuntimeError::FrameReadOnly)
        } else {
            Ok(())
        }
    }

    // Manager internals /////////////////////////////////////////////////////

    pub(crate) fn retain_internal(&self) -> isize {
        self.inner.ref_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn release_internal(&self) -> isize {
        self.inner.ref_count.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Free the underlying storage. Called by the manager exactly once.
    pub(crate) fn dealloc(&self) {
        let mut data = self.inner.data.lock();
        if let FrameData::Backend(resource) = &*data {
            resource.backend.deallocate(resource.id);
        }
        *data = FrameData::Deallocated;
    }

    /// Reattach a pooled frame to a new format and clear its flags.
    pub(crate) fn reset(&self, format: FrameFormat) {
        *self.inner.format.write() = format;
        self.inner.read_only.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("format", &*self.inner.format.read())
            .field("ref_count", &self.ref_count())
            .field("read_only", &self.is_read_only())
            .field("binding", &self.inner.binding)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ValueKind;

    fn buffer_frame(size: usize) -> Frame {
        let format = FrameFormat::builder()
            .element(ElementType::Byte)
            .target(StorageTarget::Native)
            .dimensions([size])
            .build();
        Frame::new(format, FrameData::Buffer(vec![0; size]), true, FrameBinding::None)
    }

    #[test]
    fn test_object_frame_value() {
        let frame = Frame::new(
            FrameFormat::object(ValueKind::Int),
            FrameData::Object(None),
            false,
            FrameBinding::None,
        );
        assert_eq!(frame.value().unwrap(), None);
        frame.set_value(Value::Int(7)).unwrap();
        assert_eq!(frame.value().unwrap(), Some(Value::Int(7)));

        assert!(matches!(
            frame.bytes(),
            Err(RuntimeError::WrongStorage { .. })
        ));
    }

    #[test]
    fn test_byte_frame_data() {
        let frame = buffer_frame(4);
        frame.set_bytes(&[9, 8, 7, 6]).unwrap();
        assert_eq!(frame.bytes().unwrap(), vec![9, 8, 7, 6]);

        let wrong = frame.set_bytes(&[1]);
        assert!(matches!(wrong, Err(RuntimeError::DataSize { .. })));
    }

    #[test]
    fn test_typed_views() {
        let frame = buffer_frame(8);
        frame.set_floats(&[1.5, -2.0]).unwrap();
        assert_eq!(frame.floats().unwrap(), vec![1.5, -2.0]);

        frame.set_ints(&[3, 4]).unwrap();
        assert_eq!(frame.ints().unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_read_only_enforced() {
        let frame = buffer_frame(2);
        frame.mark_read_only();
        assert!(matches!(
            frame.set_bytes(&[1, 2]),
            Err(RuntimeError::FrameReadOnly)
        ));
    }

    #[test]
    fn test_image_round_trip() {
        let format = FrameFormat::image(2, 2, 4, StorageTarget::Native);
        let size = format.size();
        let frame = Frame::new(
            format,
            FrameData::Buffer(vec![0; size]),
            true,
            FrameBinding::None,
        );

        let mut source = image::RgbaImage::new(2, 2);
        source.put_pixel(0, 1, image::Rgba([1, 2, 3, 255]));
        frame.set_image(&DynamicImage::ImageRgba8(source)).unwrap();

        let out = frame.image().unwrap();
        assert_eq!(out.get_pixel(0, 1), &image::Rgba([1, 2, 3, 255]));
    }

    #[test]
    fn test_deallocated_access_fails() {
        let frame = buffer_frame(2);
        frame.dealloc();
        assert!(matches!(frame.bytes(), Err(RuntimeError::FrameDeallocated)));
    }

    #[test]
    fn test_handle_identity() {
        let a = buffer_frame(2);
        let b = a.clone();
        let c = buffer_frame(2);
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
        // Cloning a handle does not touch the logical count
        assert_eq!(a.ref_count(), 1);
    }
}
