//! Graph module.
//!
//! A filter graph is a directed graph of filter nodes linked by
//! single-slot connections. This module contains the graph container with
//! its assembly and format-negotiation logic, and the builder driven by
//! graph descriptions.

pub mod builder;
pub mod structure;

pub use builder::GraphBuilder;
pub use structure::{AutoBranchMode, FilterGraph};
