//! Frame format descriptors.
//!
//! A `FrameFormat` describes the element type, shape, storage target and
//! metadata of a frame. Formats are compared in two ways: compatibility
//! (does a candidate satisfy a specification with wildcards) drives port
//! negotiation, and replaceability (same target and byte size) drives frame
//! pooling.

use crate::core::types::{KeyValueMap, Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Base element type of a frame's samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    /// Wildcard: matches any element type
    Unspecified,
    Bit,
    Byte,
    Int16,
    Int32,
    Float,
    Double,
    Pointer,
    Object,
    Struct,
}

impl ElementType {
    /// Default bytes per sample for this element type.
    pub fn default_sample_size(&self) -> usize {
        match self {
            ElementType::Bit | ElementType::Byte => 1,
            ElementType::Int16 => 2,
            ElementType::Int32 | ElementType::Float => 4,
            ElementType::Double => 8,
            _ => BYTES_PER_SAMPLE_UNSPECIFIED,
        }
    }

    /// Whether this element type describes binary sample data.
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            ElementType::Bit
                | ElementType::Byte
                | ElementType::Int16
                | ElementType::Int32
                | ElementType::Float
                | ElementType::Double
        )
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Unspecified => "unspecified",
            ElementType::Bit => "bit",
            ElementType::Byte => "byte",
            ElementType::Int16 => "int16",
            ElementType::Int32 => "int32",
            ElementType::Float => "float",
            ElementType::Double => "double",
            ElementType::Pointer => "pointer",
            ElementType::Object => "object",
            ElementType::Struct => "struct",
        };
        write!(f, "{}", name)
    }
}

/// Where a frame's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTarget {
    /// Wildcard: matches any target
    Unspecified,
    /// Host-language object storage
    Host,
    /// Raw native memory
    Native,
    /// GPU texture through the storage backend
    Texture,
    /// Vertex buffer through the storage backend
    Vertex,
    /// Compute backend storage
    Compute,
}

impl fmt::Display for StorageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageTarget::Unspecified => "unspecified",
            StorageTarget::Host => "host",
            StorageTarget::Native => "native",
            StorageTarget::Texture => "texture",
            StorageTarget::Vertex => "vertex",
            StorageTarget::Compute => "compute",
        };
        write!(f, "{}", name)
    }
}

/// Wildcard bytes-per-sample value.
pub const BYTES_PER_SAMPLE_UNSPECIFIED: usize = 1;

/// Wildcard for a single dimension value.
pub const DIMENSION_UNSPECIFIED: usize = 0;

/// Immutable descriptor of a frame's type, shape, target and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameFormat {
    element: ElementType,
    target: StorageTarget,
    bytes_per_sample: usize,
    dimensions: Vec<usize>,
    object_kind: Option<ValueKind>,
    metadata: KeyValueMap,
}

impl FrameFormat {
    /// Create a format with the given element type and target. Bytes per
    /// sample default from the element type; no dimensions are set.
    pub fn new(element: ElementType, target: StorageTarget) -> Self {
        Self {
            element,
            target,
            bytes_per_sample: element.default_sample_size(),
            dimensions: Vec::new(),
            object_kind: None,
            metadata: KeyValueMap::new(),
        }
    }

    /// A fully wildcarded format, compatible with anything.
    pub fn unspecified() -> Self {
        Self::new(ElementType::Unspecified, StorageTarget::Unspecified)
    }

    /// Host-object format carrying values of the given kind.
    pub fn object(kind: ValueKind) -> Self {
        let mut format = Self::new(ElementType::Object, StorageTarget::Host);
        format.object_kind = Some(kind);
        format
    }

    /// Image-shaped byte format: `channels` bytes per pixel, width x height.
    pub fn image(width: usize, height: usize, channels: usize, target: StorageTarget) -> Self {
        Self::builder()
            .element(ElementType::Byte)
            .target(target)
            .bytes_per_sample(channels)
            .dimensions([width, height])
            .build()
    }

    pub fn builder() -> FormatBuilder {
        FormatBuilder {
            format: Self::unspecified(),
        }
    }

    /// A builder seeded with this format's fields.
    pub fn to_builder(&self) -> FormatBuilder {
        FormatBuilder {
            format: self.clone(),
        }
    }

    pub fn element(&self) -> ElementType {
        self.element
    }

    pub fn target(&self) -> StorageTarget {
        self.target
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.bytes_per_sample
    }

    pub fn dimensions(&self) -> &[usize] {
        &self.dimensions
    }

    pub fn dimension_count(&self) -> usize {
        self.dimensions.len()
    }

    pub fn width(&self) -> Option<usize> {
        self.dimensions.first().copied()
    }

    pub fn height(&self) -> Option<usize> {
        self.dimensions.get(1).copied()
    }

    pub fn depth(&self) -> Option<usize> {
        self.dimensions.get(2).copied()
    }

    /// Total byte size: bytes per sample times the product of all
    /// dimensions, or 0 when no dimensions are set.
    pub fn size(&self) -> usize {
        if self.dimensions.is_empty() {
            0
        } else {
            self.dimensions
                .iter()
                .fold(self.bytes_per_sample, |acc, d| acc * d)
        }
    }

    pub fn object_kind(&self) -> Option<ValueKind> {
        self.object_kind
    }

    pub fn metadata(&self) -> &KeyValueMap {
        &self.metadata
    }

    pub fn meta_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Whether this format satisfies `specification`. Every non-wildcard
    /// field of the specification must match; wildcards always match.
    pub fn is_compatible_with(&self, specification: &FrameFormat) -> bool {
        if specification.element != ElementType::Unspecified && self.element != specification.element
        {
            return false;
        }

        if specification.target != StorageTarget::Unspecified && self.target != specification.target
        {
            return false;
        }

        if specification.bytes_per_sample != BYTES_PER_SAMPLE_UNSPECIFIED
            && self.bytes_per_sample != specification.bytes_per_sample
        {
            return false;
        }

        if specification.dimension_count() > 0 {
            if self.dimension_count() != specification.dimension_count() {
                return false;
            }
            for (have, want) in self.dimensions.iter().zip(&specification.dimensions) {
                if *want != DIMENSION_UNSPECIFIED && have != want {
                    return false;
                }
            }
        }

        if let Some(kind) = specification.object_kind {
            if kind != ValueKind::Any && self.object_kind != Some(kind) {
                return false;
            }
        }

        for (key, value) in specification.metadata.iter() {
            if self.metadata.get(key) != Some(value) {
                return false;
            }
        }

        true
    }

    /// Pooling equivalence: same target and same computed size. This is a
    /// weaker relation than compatibility; it only says the storage of one
    /// frame can be reused for the other.
    pub fn is_replaceable_by(&self, other: &FrameFormat) -> bool {
        self.target == other.target && self.size() == other.size()
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "format {{ {} on {}, {} B/sample, (",
            self.element, self.target, self.bytes_per_sample
        )?;
        for (i, d) in self.dimensions.iter().enumerate() {
            if i > 0 {
                write!(f, " x ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ") }}")
    }
}

/// Builder for `FrameFormat`.
pub struct FormatBuilder {
    format: FrameFormat,
}

impl FormatBuilder {
    pub fn element(mut self, element: ElementType) -> Self {
        self.format.element = element;
        self.format.bytes_per_sample = element.default_sample_size();
        self
    }

    pub fn target(mut self, target: StorageTarget) -> Self {
        self.format.target = target;
        self
    }

    pub fn bytes_per_sample(mut self, bytes: usize) -> Self {
        self.format.bytes_per_sample = bytes;
        self
    }

    pub fn dimensions(mut self, dims: impl Into<Vec<usize>>) -> Self {
        self.format.dimensions = dims.into();
        self
    }

    pub fn object_kind(mut self, kind: ValueKind) -> Self {
        self.format.object_kind = Some(kind);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.format.metadata.insert(key, value);
        self
    }

    pub fn build(self) -> FrameFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_size_calculation() {
        let format = FrameFormat::image(640, 480, 4, StorageTarget::Native);
        assert_eq!(format.size(), 640 * 480 * 4);

        let no_dims = FrameFormat::new(ElementType::Byte, StorageTarget::Native);
        assert_eq!(no_dims.size(), 0);
    }

    #[test]
    fn test_default_sample_sizes() {
        assert_eq!(ElementType::Byte.default_sample_size(), 1);
        assert_eq!(ElementType::Int16.default_sample_size(), 2);
        assert_eq!(ElementType::Float.default_sample_size(), 4);
        assert_eq!(ElementType::Double.default_sample_size(), 8);
    }

    #[test]
    fn test_wildcard_compatibility() {
        let candidate = FrameFormat::image(320, 240, 4, StorageTarget::Native);
        assert!(candidate.is_compatible_with(&FrameFormat::unspecified()));

        let spec = FrameFormat::builder()
            .element(ElementType::Byte)
            .target(StorageTarget::Native)
            .bytes_per_sample(4)
            .dimensions([DIMENSION_UNSPECIFIED, 240])
            .build();
        assert!(candidate.is_compatible_with(&spec));

        let wrong_height = FrameFormat::image(320, 100, 4, StorageTarget::Native);
        assert!(!wrong_height.is_compatible_with(&spec));
    }

    #[test]
    fn test_target_mismatch() {
        let spec = FrameFormat::new(ElementType::Byte, StorageTarget::Texture);
        let candidate = FrameFormat::new(ElementType::Byte, StorageTarget::Native);
        assert!(!candidate.is_compatible_with(&spec));
    }

    #[test]
    fn test_metadata_compatibility() {
        let spec = FrameFormat::builder()
            .element(ElementType::Byte)
            .meta("colorspace", "rgba")
            .build();

        let good = FrameFormat::builder()
            .element(ElementType::Byte)
            .target(StorageTarget::Native)
            .meta("colorspace", "rgba")
            .meta("extra", 1i64)
            .build();
        assert!(good.is_compatible_with(&spec));

        let bad = FrameFormat::builder()
            .element(ElementType::Byte)
            .meta("colorspace", "yuv")
            .build();
        assert!(!bad.is_compatible_with(&spec));
    }

    #[test]
    fn test_replaceability() {
        let a = FrameFormat::image(64, 64, 4, StorageTarget::Native);
        // Same byte size, different shape
        let b = FrameFormat::image(128, 32, 4, StorageTarget::Native);
        assert!(a.is_replaceable_by(&b));

        let gpu = FrameFormat::image(64, 64, 4, StorageTarget::Texture);
        assert!(!a.is_replaceable_by(&gpu));
    }

    proptest! {
        #[test]
        fn prop_size_is_product(w in 1usize..256, h in 1usize..256, bps in 1usize..8) {
            let format = FrameFormat::builder()
                .element(ElementType::Byte)
                .bytes_per_sample(bps)
                .dimensions([w, h])
                .build();
            prop_assert_eq!(format.size(), w * h * bps);
        }

        #[test]
        fn prop_compatibility_is_reflexive(w in 1usize..64, h in 1usize..64) {
            let format = FrameFormat::image(w, h, 4, StorageTarget::Native);
            prop_assert!(format.is_compatible_with(&format));
            prop_assert!(format.is_replaceable_by(&format));
        }
    }
}
