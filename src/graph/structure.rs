//! Graph assembly and port-format negotiation.
//!
//! A `FilterGraph` is built in two phases. First, filters and pending
//! connections are collected in any order. Then `setup_filters` applies
//! the graph policies (discarding unconnected filters, terminating
//! unconnected outputs, auto-branching fan-out), materializes the pending
//! connections into wired ports, propagates concrete formats through a
//! topological traversal from the source filters, and prepares every
//! filter for its run.

use crate::core::context::FilterContext;
use crate::core::error::{EngineResult, FormatNegotiationError, GraphStructureError};
use crate::core::filter::{FilterNode, LifecycleStage};
use crate::core::port::{Connection, PortId};
use crate::core::types::{KeyValueMap, Value};
use crate::filters::base::{FrameBranch, NullSink};
use indexmap::IndexMap;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How the graph reacts when one output feeds several inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoBranchMode {
    /// Fan-out is an error.
    Off,
    /// Insert a branch that waits for every consumer to drain.
    Synced,
    /// Insert a branch that drops frames for busy consumers.
    Unsynced,
}

impl FromStr for AutoBranchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(AutoBranchMode::Off),
            "synced" => Ok(AutoBranchMode::Synced),
            "unsynced" => Ok(AutoBranchMode::Unsynced),
            other => Err(format!("unknown auto-branch mode '{}'", other)),
        }
    }
}

type Endpoint = (String, usize);

/// A set of filters and the wiring between them.
pub struct FilterGraph {
    nodes: IndexMap<String, FilterNode>,
    /// Pending connections keyed by output endpoint, wired at setup.
    pending: IndexMap<Endpoint, Vec<Endpoint>>,
    auto_branch: AutoBranchMode,
    discard_unconnected_filters: bool,
    discard_unconnected_outputs: bool,
    branch_count: usize,
    ready: bool,
    open: bool,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
            pending: IndexMap::new(),
            auto_branch: AutoBranchMode::Off,
            discard_unconnected_filters: false,
            discard_unconnected_outputs: false,
            branch_count: 0,
            ready: false,
            open: false,
        }
    }

    // Policies //////////////////////////////////////////////////////////////

    pub fn set_auto_branch_mode(&mut self, mode: AutoBranchMode) {
        self.auto_branch = mode;
    }

    pub fn auto_branch_mode(&self) -> AutoBranchMode {
        self.auto_branch
    }

    pub fn set_discard_unconnected_filters(&mut self, discard: bool) {
        self.discard_unconnected_filters = discard;
    }

    pub fn set_discard_unconnected_outputs(&mut self, discard: bool) {
        self.discard_unconnected_outputs = discard;
    }

    // Assembly //////////////////////////////////////////////////////////////

    /// Add an initialized filter node.
    pub fn add_node(&mut self, node: FilterNode) -> EngineResult<()> {
        if node.stage() == LifecycleStage::Uninitialized {
            return Err(GraphStructureError::FilterNotInitialized(node.name().to_string()).into());
        }
        if self.nodes.contains_key(node.name()) {
            return Err(GraphStructureError::DuplicateFilter(node.name().to_string()).into());
        }
        self.nodes.insert(node.name().to_string(), node);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&FilterNode> {
        self.nodes.get(name)
    }

    pub fn node_by_name_mut(&mut self, name: &str) -> Option<&mut FilterNode> {
        self.nodes.get_mut(name)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_at(&self, index: usize) -> Option<&FilterNode> {
        self.nodes.get_index(index).map(|(_, node)| node)
    }

    pub fn node_at_mut(&mut self, index: usize) -> Option<&mut FilterNode> {
        self.nodes.get_index_mut(index).map(|(_, node)| node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FilterNode> {
        self.nodes.values()
    }

    /// Names of the source filters (no stream inputs).
    pub fn source_names(&self) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| !n.input_ports().iter().any(|p| p.spec().is_stream()))
            .map(|n| n.name())
            .collect()
    }

    /// Record a connection from an output port to an input port, by filter
    /// and port names. The ports are wired during setup.
    pub fn connect(
        &mut self,
        source: &str,
        output: &str,
        target: &str,
        input: &str,
    ) -> EngineResult<()> {
        let source_node = self
            .nodes
            .get(source)
            .ok_or_else(|| GraphStructureError::UnknownFilter(source.to_string()))?;
        let output_index = source_node.output_index(output).ok_or_else(|| {
            GraphStructureError::UnknownOutputPort {
                filter: source.to_string(),
                port: output.to_string(),
            }
        })?;
        let target_node = self
            .nodes
            .get(target)
            .ok_or_else(|| GraphStructureError::UnknownFilter(target.to_string()))?;
        let input_index = target_node.input_index(input).ok_or_else(|| {
            GraphStructureError::UnknownInputPort {
                filter: target.to_string(),
                port: input.to_string(),
            }
        })?;

        let input_endpoint = (target.to_string(), input_index);
        if self.input_is_connected(&input_endpoint) {
            return Err(GraphStructureError::InputAlreadyConnected {
                filter: target.to_string(),
                port: input.to_string(),
            }
            .into());
        }

        self.pending
            .entry((source.to_string(), output_index))
            .or_default()
            .push(input_endpoint);
        Ok(())
    }

    fn input_is_connected(&self, endpoint: &Endpoint) -> bool {
        if self
            .pending
            .values()
            .any(|targets| targets.contains(endpoint))
        {
            return true;
        }
        self.nodes
            .get(&endpoint.0)
            .and_then(|n| n.input_port(endpoint.1))
            .map(|p| p.is_connected())
            .unwrap_or(false)
    }

    fn output_is_connected(&self, endpoint: &Endpoint) -> bool {
        if self.pending.contains_key(endpoint) {
            return true;
        }
        self.nodes
            .get(&endpoint.0)
            .and_then(|n| n.output_port(endpoint.1))
            .map(|p| p.is_connected())
            .unwrap_or(false)
    }

    // Setup /////////////////////////////////////////////////////////////////

    /// Apply the graph policies, wire all pending connections, negotiate
    /// port formats topologically and prepare every filter. Idempotent on
    /// a graph that has not been mutated since the last call.
    pub fn setup_filters(&mut self, context: &FilterContext) -> EngineResult<()> {
        if self.discard_unconnected_filters {
            self.discard_unconnected()?;
        }
        if self.discard_unconnected_outputs {
            self.terminate_unconnected_outputs()?;
        }
        self.connect_ports()?;
        self.check_connections()?;
        self.negotiate_formats()?;
        for node in self.nodes.values_mut() {
            node.perform_prepare(context)?;
        }
        self.ready = true;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Remove filters with unconnected required ports, cascading: a
    /// removal drops the pending connections of the removed filter, which
    /// can leave its neighbors unconnected in turn.
    fn discard_unconnected(&mut self) -> EngineResult<()> {
        loop {
            let victim = self.nodes.values().find_map(|node| {
                let name = node.name().to_string();
                let unconnected_input = node.input_ports().iter().enumerate().any(|(i, p)| {
                    p.spec().is_stream()
                        && !p.spec().is_optional()
                        && !self.input_is_connected(&(name.clone(), i))
                });
                let unconnected_output = node.output_ports().iter().enumerate().any(|(i, p)| {
                    !p.spec().is_optional() && !self.output_is_connected(&(name.clone(), i))
                });
                (unconnected_input || unconnected_output).then_some(name)
            });
            match victim {
                Some(name) => {
                    log::debug!("discarding unconnected filter '{}'", name);
                    self.nodes.shift_remove(&name);
                    self.pending.retain(|source, _| source.0 != name);
                    for targets in self.pending.values_mut() {
                        targets.retain(|target| target.0 != name);
                    }
                    self.pending.retain(|_, targets| !targets.is_empty());
                }
                None => break,
            }
        }
        if self.nodes.is_empty() {
            return Err(GraphStructureError::AllFiltersDiscarded.into());
        }
        Ok(())
    }

    /// Wire every unconnected output to a discarding sink.
    fn terminate_unconnected_outputs(&mut self) -> EngineResult<()> {
        let mut dangling = Vec::new();
        for node in self.nodes.values() {
            for (i, _port) in node.output_ports().iter().enumerate() {
                let endpoint = (node.name().to_string(), i);
                if !self.output_is_connected(&endpoint) {
                    dangling.push(endpoint);
                }
            }
        }
        for (name, index) in dangling {
            let sink_name = format!("{}_to_null_{}", name, index);
            log::debug!(
                "terminating unconnected output {} of filter '{}' with '{}'",
                index,
                name,
                sink_name
            );
            let mut sink = FilterNode::new(&sink_name, Box::new(NullSink));
            sink.init(KeyValueMap::new())?;
            self.add_node(sink)?;
            self.pending
                .entry((name, index))
                .or_default()
                .push((sink_name, 0));
        }
        Ok(())
    }

    /// Materialize pending connections, inserting branch filters where an
    /// output feeds more than one input.
    fn connect_ports(&mut self) -> EngineResult<()> {
        let pending = std::mem::take(&mut self.pending);
        for ((source, output), targets) in pending {
            if let [target] = targets.as_slice() {
                self.wire((source, output), target.clone())?;
            } else if self.auto_branch == AutoBranchMode::Off {
                let port = self
                    .nodes
                    .get(&source)
                    .and_then(|n| n.output_port(output))
                    .map(|p| p.name().to_string())
                    .unwrap_or_else(|| output.to_string());
                return Err(GraphStructureError::FanOutDisabled {
                    filter: source,
                    port,
                    targets: targets.len(),
                }
                .into());
            } else {
                self.branch_count += 1;
                let branch_name = format!("branch{}", self.branch_count);
                log::debug!(
                    "inserting '{}' for fan-out of {}[{}] to {} inputs",
                    branch_name,
                    source,
                    output,
                    targets.len()
                );
                let mut branch = FilterNode::new(&branch_name, Box::new(FrameBranch::new()));
                branch.init(KeyValueMap::from_pairs([
                    ("outputs", Value::Int(targets.len() as i64)),
                    (
                        "synced",
                        Value::Bool(self.auto_branch == AutoBranchMode::Synced),
                    ),
                ]))?;
                self.add_node(branch)?;
                self.wire((source, output), (branch_name.clone(), 0))?;
                for (i, target) in targets.into_iter().enumerate() {
                    self.wire((branch_name.clone(), i), target)?;
                }
            }
        }
        Ok(())
    }

    fn wire(&mut self, source: Endpoint, target: Endpoint) -> EngineResult<()> {
        let target_port = self
            .nodes
            .get(&target.0)
            .ok_or_else(|| GraphStructureError::UnknownFilter(target.0.clone()))?
            .input_port(target.1)
            .ok_or_else(|| GraphStructureError::UnknownInputPort {
                filter: target.0.clone(),
                port: target.1.to_string(),
            })?;
        if target_port.is_connected() {
            return Err(GraphStructureError::InputAlreadyConnected {
                filter: target.0.clone(),
                port: target_port.name().to_string(),
            }
            .into());
        }

        let connection = Connection::new(
            PortId::new(source.0.clone(), source.1),
            PortId::new(target.0.clone(), target.1),
        );
        self.nodes
            .get_mut(&source.0)
            .ok_or_else(|| GraphStructureError::UnknownFilter(source.0.clone()))?
            .output_port_mut(source.1)
            .ok_or_else(|| GraphStructureError::UnknownOutputPort {
                filter: source.0.clone(),
                port: source.1.to_string(),
            })?
            .attach(connection.clone());
        if let Some(port) = self
            .nodes
            .get_mut(&target.0)
            .and_then(|node| node.input_port_mut(target.1))
        {
            port.attach(connection);
        }
        Ok(())
    }

    /// Verify the graph invariant: every required stream port is wired.
    fn check_connections(&self) -> EngineResult<()> {
        for node in self.nodes.values() {
            for port in node.input_ports() {
                if port.spec().is_stream()
                    && !port.spec().is_optional()
                    && !port.is_connected()
                {
                    return Err(GraphStructureError::UnconnectedInput {
                        filter: node.name().to_string(),
                        port: port.name().to_string(),
                    }
                    .into());
                }
            }
            for port in node.output_ports() {
                if !port.spec().is_optional() && !port.is_connected() {
                    return Err(GraphStructureError::UnconnectedOutput {
                        filter: node.name().to_string(),
                        port: port.name().to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Propagate concrete formats from the source filters through a
    /// topological traversal. Each filter validates the formats offered on
    /// its inputs and computes the formats of its outputs.
    fn negotiate_formats(&mut self) -> EngineResult<()> {
        let mut topo = DiGraph::<usize, ()>::new();
        let indices: Vec<_> = (0..self.nodes.len()).map(|i| topo.add_node(i)).collect();
        for (i, node) in self.nodes.values().enumerate() {
            for port in node.output_ports() {
                if let Some(connection) = port.connection() {
                    if let Some(target) = self.nodes.get_index_of(&connection.target().filter) {
                        topo.add_edge(indices[i], indices[target], ());
                    }
                }
            }
        }
        let order =
            toposort(&topo, None).map_err(|_| GraphStructureError::CycleDetected)?;

        for index in order {
            let node = match self.nodes.get_index_mut(topo[index]) {
                Some((_, node)) => node,
                None => continue,
            };

            for i in 0..node.input_count() {
                let port = match node.input_port(i) {
                    Some(port) => port,
                    None => continue,
                };
                let port_name = port.name().to_string();
                let format = match port.connection() {
                    Some(connection) => connection.format(),
                    None => continue,
                };
                let format = format.ok_or_else(|| {
                    FormatNegotiationError::MissingInputFormat {
                        filter: node.name().to_string(),
                        port: port_name.clone(),
                    }
                })?;
                if !node.offer_input_format(i, &format) {
                    return Err(FormatNegotiationError::InputRejected {
                        filter: node.name().to_string(),
                        port: port_name,
                        format,
                    }
                    .into());
                }
            }

            for o in 0..node.output_count() {
                let connected = node
                    .output_port(o)
                    .map(|p| p.is_connected())
                    .unwrap_or(false);
                match node.negotiated_output_format(o) {
                    Some(format) => node.set_output_format(o, format),
                    None if connected => {
                        let port = node
                            .output_port(o)
                            .map(|p| p.name().to_string())
                            .unwrap_or_else(|| o.to_string());
                        return Err(FormatNegotiationError::NoOutputFormat {
                            filter: node.name().to_string(),
                            port,
                        }
                        .into());
                    }
                    None => {}
                }
            }
        }
        Ok(())
    }

    // Run lifecycle /////////////////////////////////////////////////////////

    /// Open every filter for processing.
    pub fn open_filters(&mut self, context: &FilterContext) -> EngineResult<()> {
        if !self.ready {
            return Err(GraphStructureError::GraphNotReady.into());
        }
        for node in self.nodes.values_mut() {
            node.perform_open(context)?;
        }
        self.open = true;
        Ok(())
    }

    /// Close every filter, returning the graph to the prepared state.
    pub fn close_filters(&mut self, context: &FilterContext) -> EngineResult<()> {
        for node in self.nodes.values_mut() {
            node.perform_close(context)?;
        }
        self.open = false;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Close every open filter that one of its ports requires to close.
    /// Closing one filter can force the next, so the sweep runs to a fixed
    /// point.
    pub fn sweep_must_close(&mut self, context: &FilterContext) -> EngineResult<()> {
        loop {
            let victim = self
                .nodes
                .values()
                .find(|node| node.must_close())
                .map(|node| node.name().to_string());
            match victim {
                Some(name) => {
                    log::trace!("filter '{}' must close, closing", name);
                    if let Some(node) = self.nodes.get_mut(&name) {
                        node.perform_close(context)?;
                    }
                }
                None => return Ok(()),
            }
        }
    }

    /// Release all per-run and cross-run resources held by the filters.
    pub fn tear_down(&mut self, context: &FilterContext) -> EngineResult<()> {
        for node in self.nodes.values_mut() {
            node.perform_tear_down(context)?;
        }
        self.open = false;
        self.ready = false;
        Ok(())
    }
}

impl Default for FilterGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::MemoryBackend;
    use crate::core::error::EngineError;
    use crate::core::filter::FilterNode;
    use crate::core::format::ElementType;
    use crate::core::manager::SimpleFrameManager;
    use crate::core::types::ValueKind;
    use crate::filters::base::{ObjectSource, PassThrough};
    use std::sync::Arc;

    fn context() -> FilterContext {
        let backend = Arc::new(MemoryBackend::new());
        FilterContext::new(Arc::new(SimpleFrameManager::new(backend.clone())), backend)
    }

    fn source_node(name: &str) -> FilterNode {
        let mut node = FilterNode::new(name, Box::new(ObjectSource::new()));
        node.init(KeyValueMap::from_pairs([("object", Value::Int(7))]))
            .unwrap();
        node
    }

    fn pass_node(name: &str) -> FilterNode {
        let mut node = FilterNode::new(name, Box::new(PassThrough::new()));
        node.init(KeyValueMap::new()).unwrap();
        node
    }

    fn sink_node(name: &str) -> FilterNode {
        let mut node = FilterNode::new(name, Box::new(NullSink));
        node.init(KeyValueMap::new()).unwrap();
        node
    }

    fn linear_graph() -> FilterGraph {
        let mut graph = FilterGraph::new();
        graph.add_node(source_node("source")).unwrap();
        graph.add_node(pass_node("pass")).unwrap();
        graph.add_node(sink_node("sink")).unwrap();
        graph.connect("source", "frame", "pass", "frame").unwrap();
        graph.connect("pass", "frame", "sink", "frame").unwrap();
        graph
    }

    #[test]
    fn test_setup_wires_and_negotiates() {
        let context = context();
        let mut graph = linear_graph();
        graph.setup_filters(&context).unwrap();
        assert!(graph.is_ready());

        let pass = graph.node_by_name("pass").unwrap();
        assert!(pass.input_port(0).unwrap().is_connected());
        let format = pass.input_port(0).unwrap().format().unwrap();
        assert_eq!(format.element(), ElementType::Object);
        assert_eq!(format.object_kind(), Some(ValueKind::Int));
        assert_eq!(
            pass.output_port(0).unwrap().format().unwrap().object_kind(),
            Some(ValueKind::Int)
        );
        assert_eq!(graph.source_names(), vec!["source"]);
    }

    #[test]
    fn test_setup_is_idempotent() {
        let context = context();
        let mut graph = linear_graph();
        graph.setup_filters(&context).unwrap();

        let count = graph.node_count();
        let format = graph
            .node_by_name("pass")
            .unwrap()
            .output_port(0)
            .unwrap()
            .format()
            .cloned();

        graph.setup_filters(&context).unwrap();
        assert_eq!(graph.node_count(), count);
        let format_again = graph
            .node_by_name("pass")
            .unwrap()
            .output_port(0)
            .unwrap()
            .format()
            .cloned();
        assert_eq!(format, format_again);
    }

    #[test]
    fn test_fan_out_without_auto_branch_fails() {
        let context = context();
        let mut graph = FilterGraph::new();
        graph.add_node(source_node("source")).unwrap();
        graph.add_node(sink_node("a")).unwrap();
        graph.add_node(sink_node("b")).unwrap();
        graph.connect("source", "frame", "a", "frame").unwrap();
        graph.connect("source", "frame", "b", "frame").unwrap();

        let result = graph.setup_filters(&context);
        assert!(matches!(
            result,
            Err(EngineError::GraphStructure(
                GraphStructureError::FanOutDisabled { targets: 2, .. }
            ))
        ));
    }

    #[test]
    fn test_fan_out_with_synced_branch() {
        let context = context();
        let mut graph = FilterGraph::new();
        graph.set_auto_branch_mode(AutoBranchMode::Synced);
        graph.add_node(source_node("source")).unwrap();
        graph.add_node(sink_node("a")).unwrap();
        graph.add_node(sink_node("b")).unwrap();
        graph.add_node(sink_node("c")).unwrap();
        graph.connect("source", "frame", "a", "frame").unwrap();
        graph.connect("source", "frame", "b", "frame").unwrap();
        graph.connect("source", "frame", "c", "frame").unwrap();

        graph.setup_filters(&context).unwrap();
        let branch = graph.node_by_name("branch1").unwrap();
        assert_eq!(branch.output_count(), 3);
        assert!(branch.input_port(0).unwrap().is_connected());
        for i in 0..3 {
            assert!(branch.output_port(i).unwrap().is_connected());
        }
    }

    #[test]
    fn test_discard_unconnected_filters_cascades() {
        let context = context();
        let mut graph = linear_graph();
        graph.set_discard_unconnected_filters(true);
        // A dead branch: source feeding a pass-through with a dangling output
        graph.add_node(source_node("dead_source")).unwrap();
        graph.add_node(pass_node("dead_pass")).unwrap();
        graph
            .connect("dead_source", "frame", "dead_pass", "frame")
            .unwrap();

        graph.setup_filters(&context).unwrap();
        assert!(!graph.contains("dead_pass"));
        assert!(!graph.contains("dead_source"));
        assert!(graph.contains("source"));
        assert!(graph.contains("sink"));
    }

    #[test]
    fn test_discarding_everything_fails() {
        let context = context();
        let mut graph = FilterGraph::new();
        graph.set_discard_unconnected_filters(true);
        graph.add_node(pass_node("alone")).unwrap();

        let result = graph.setup_filters(&context);
        assert!(matches!(
            result,
            Err(EngineError::GraphStructure(
                GraphStructureError::AllFiltersDiscarded
            ))
        ));
    }

    #[test]
    fn test_terminate_unconnected_outputs() {
        let context = context();
        let mut graph = FilterGraph::new();
        graph.set_discard_unconnected_outputs(true);
        graph.add_node(source_node("source")).unwrap();
        graph.add_node(pass_node("pass")).unwrap();
        graph.connect("source", "frame", "pass", "frame").unwrap();

        graph.setup_filters(&context).unwrap();
        let sink = graph.node_by_name("pass_to_null_0").unwrap();
        assert_eq!(sink.class_name(), "null_sink");
        assert!(sink.input_port(0).unwrap().is_connected());
    }

    #[test]
    fn test_unconnected_input_is_an_error() {
        let context = context();
        let mut graph = FilterGraph::new();
        graph.add_node(pass_node("pass")).unwrap();

        let result = graph.setup_filters(&context);
        assert!(matches!(
            result,
            Err(EngineError::GraphStructure(
                GraphStructureError::UnconnectedInput { .. }
            ))
        ));
    }

    #[test]
    fn test_cycle_is_detected() {
        let context = context();
        let mut graph = FilterGraph::new();
        graph.add_node(pass_node("a")).unwrap();
        graph.add_node(pass_node("b")).unwrap();
        graph.connect("a", "frame", "b", "frame").unwrap();
        graph.connect("b", "frame", "a", "frame").unwrap();

        let result = graph.setup_filters(&context);
        assert!(matches!(
            result,
            Err(EngineError::GraphStructure(
                GraphStructureError::CycleDetected
            ))
        ));
    }

    #[test]
    fn test_duplicate_filter_name_rejected() {
        let mut graph = FilterGraph::new();
        graph.add_node(pass_node("pass")).unwrap();
        let result = graph.add_node(pass_node("pass"));
        assert!(matches!(
            result,
            Err(EngineError::GraphStructure(
                GraphStructureError::DuplicateFilter(_)
            ))
        ));
    }

    #[test]
    fn test_connect_validates_names() {
        let mut graph = FilterGraph::new();
        graph.add_node(source_node("source")).unwrap();
        graph.add_node(sink_node("sink")).unwrap();

        assert!(matches!(
            graph.connect("missing", "frame", "sink", "frame"),
            Err(EngineError::GraphStructure(
                GraphStructureError::UnknownFilter(_)
            ))
        ));
        assert!(matches!(
            graph.connect("source", "bogus", "sink", "frame"),
            Err(EngineError::GraphStructure(
                GraphStructureError::UnknownOutputPort { .. }
            ))
        ));
        assert!(matches!(
            graph.connect("source", "frame", "sink", "bogus"),
            Err(EngineError::GraphStructure(
                GraphStructureError::UnknownInputPort { .. }
            ))
        ));
    }

    #[test]
    fn test_input_can_only_be_targeted_once() {
        let mut graph = FilterGraph::new();
        graph.add_node(source_node("a")).unwrap();
        graph.add_node(source_node("b")).unwrap();
        graph.add_node(sink_node("sink")).unwrap();
        graph.connect("a", "frame", "sink", "frame").unwrap();

        let result = graph.connect("b", "frame", "sink", "frame");
        assert!(matches!(
            result,
            Err(EngineError::GraphStructure(
                GraphStructureError::InputAlreadyConnected { .. }
            ))
        ));
    }

    #[test]
    fn test_open_requires_setup() {
        let context = context();
        let mut graph = linear_graph();
        assert!(matches!(
            graph.open_filters(&context),
            Err(EngineError::GraphStructure(
                GraphStructureError::GraphNotReady
            ))
        ));

        graph.setup_filters(&context).unwrap();
        graph.open_filters(&context).unwrap();
        assert!(graph.is_open());
        graph.close_filters(&context).unwrap();
        assert!(!graph.is_open());
    }
}
