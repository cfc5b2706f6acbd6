//! Filter module.
//!
//! Contains the filter registry and the base filter implementations the
//! engine relies on.

pub mod base;
pub mod registry;

pub use base::{
    CallbackSink, FrameBranch, FrameFetch, FrameListener, FrameStore, NullSink, ObjectSource,
    PassThrough,
};
pub use registry::{FilterFactory, FilterRegistry, RegistryEntry};

/// Register every base filter class with the given registry.
pub fn register_base(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(ObjectSource::new()));
    registry.register(|| Box::new(PassThrough::new()));
    registry.register(|| Box::new(NullSink));
    registry.register(|| Box::new(FrameBranch::new()));
    registry.register(|| Box::new(FrameStore::new()));
    registry.register(|| Box::new(FrameFetch::new()));
    registry.register(|| Box::new(CallbackSink::new()));
}
