//! Programmatic graph construction.
//!
//! `GraphBuilder` is the surface a graph-description reader drives: it
//! declares filters by registered class name, connects them, binds
//! host-supplied references, assigns named values and applies graph-level
//! settings. The registry is an explicit value owned by the caller, not a
//! process-wide lookup.

use crate::core::error::{ConfigurationError, EngineResult, GraphStructureError};
use crate::core::filter::FilterNode;
use crate::core::types::{KeyValueMap, Value};
use crate::filters::registry::FilterRegistry;
use crate::graph::structure::{AutoBranchMode, FilterGraph};

/// Builds a [`FilterGraph`] against an explicit filter registry.
pub struct GraphBuilder<'a> {
    registry: &'a FilterRegistry,
    graph: FilterGraph,
    variables: KeyValueMap,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(registry: &'a FilterRegistry) -> Self {
        Self {
            registry,
            graph: FilterGraph::new(),
            variables: KeyValueMap::new(),
        }
    }

    /// Declare a filter: instantiate the registered class, initialize it
    /// with the given parameters and add it to the graph under `name`.
    pub fn add_filter(
        &mut self,
        class: &str,
        name: &str,
        parameters: KeyValueMap,
    ) -> EngineResult<()> {
        let filter = self
            .registry
            .create(class)
            .ok_or_else(|| GraphStructureError::UnknownFilterClass(class.to_string()))?;
        let mut node = FilterNode::new(name, filter);
        node.init(parameters)?;
        self.graph.add_node(node)
    }

    /// Connect an output port to an input port by filter and port names.
    pub fn connect(
        &mut self,
        source: &str,
        output: &str,
        target: &str,
        input: &str,
    ) -> EngineResult<()> {
        self.graph.connect(source, output, target, input)
    }

    /// Bind a host-supplied reference under a name, making it available to
    /// later declarations through [`variable`].
    ///
    /// [`variable`]: GraphBuilder::variable
    pub fn bind_external(&mut self, name: &str, value: Value) {
        self.variables.insert(name, value);
    }

    /// Assign a literal value to a name.
    pub fn set_value(&mut self, name: &str, value: Value) {
        self.variables.insert(name, value);
    }

    /// Look up a bound reference or assigned value.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Apply a graph-level setting.
    ///
    /// Recognized keys: `auto_branch` (`off` | `synced` | `unsynced`),
    /// `discard_unconnected_filters` and `discard_unconnected_outputs`
    /// (booleans).
    pub fn apply_setting(&mut self, key: &str, value: &Value) -> EngineResult<()> {
        match key {
            "auto_branch" => {
                let text = value.as_str().ok_or_else(|| ConfigurationError::InvalidValue {
                    key: key.to_string(),
                    reason: "expected a string".to_string(),
                })?;
                let mode: AutoBranchMode =
                    text.parse()
                        .map_err(|reason| ConfigurationError::InvalidValue {
                            key: key.to_string(),
                            reason,
                        })?;
                self.graph.set_auto_branch_mode(mode);
            }
            "discard_unconnected_filters" => {
                self.graph
                    .set_discard_unconnected_filters(self.bool_setting(key, value)?);
            }
            "discard_unconnected_outputs" => {
                self.graph
                    .set_discard_unconnected_outputs(self.bool_setting(key, value)?);
            }
            other => {
                return Err(ConfigurationError::UnknownParameter {
                    key: other.to_string(),
                }
                .into())
            }
        }
        Ok(())
    }

    fn bool_setting(&self, key: &str, value: &Value) -> Result<bool, ConfigurationError> {
        value.as_bool().ok_or_else(|| ConfigurationError::InvalidValue {
            key: key.to_string(),
            reason: "expected a boolean".to_string(),
        })
    }

    pub fn graph(&self) -> &FilterGraph {
        &self.graph
    }

    /// Hand over the assembled graph.
    pub fn build(self) -> FilterGraph {
        self.graph
    }
}
