//! Synchronous graph runner.
//!
//! Drives the scheduler loop on the calling thread. When every runnable
//! filter has been stepped the runner derives the graph state: sleeping
//! (some filter suspended itself), blocked (some filter waits only on
//! free outputs) or finished. `run` waits out sleeps on a deadline gate
//! that a stop request can release early, closes all filters and reports
//! the outcome through an optional completion callback.

use crate::core::context::FilterContext;
use crate::core::error::{EngineError, EngineResult, RuntimeError};
use crate::core::filter::{LifecycleStage, ProcessStatus};
use crate::execution::scheduler::{Scheduler, SimpleScheduler};
use crate::graph::structure::FilterGraph;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// State of the graph when the scheduler has nothing to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    /// A filter was processed; more work may be pending.
    Running,
    /// At least one filter is suspended on its sleep delay.
    Sleeping,
    /// At least one filter waits only on free outputs.
    Blocked,
    /// No filter is open anymore.
    Finished,
}

/// Terminal status of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Finished,
    Blocked,
    Stopped,
}

/// Everything a completion callback can observe about a run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Finished,
    Blocked,
    Stopped,
    Error(EngineError),
}

impl From<RunStatus> for RunOutcome {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Finished => RunOutcome::Finished,
            RunStatus::Blocked => RunOutcome::Blocked,
            RunStatus::Stopped => RunOutcome::Stopped,
        }
    }
}

/// Completion callback invoked when a run ends, on the thread that drove
/// the run.
pub type DoneCallback = Box<dyn FnMut(&RunOutcome) + Send>;

/// Deadline gate sleeping filters park the run loop on. A stop request
/// releases it early.
pub(crate) struct WakeGate {
    lock: Mutex<()>,
    cond: Condvar,
}

impl WakeGate {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn notify(&self) {
        self.cond.notify_all();
    }

    /// Block until the deadline passes or `stop` is raised.
    fn wait_until(&self, deadline: Instant, stop: &AtomicBool) {
        let mut guard = self.lock.lock();
        while !stop.load(Ordering::SeqCst) && Instant::now() < deadline {
            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
    }
}

/// Handle for interrupting a runner from another thread.
#[derive(Clone)]
pub struct RunnerControl {
    stop: Arc<AtomicBool>,
    wake: Arc<WakeGate>,
}

impl RunnerControl {
    /// Request cooperative cancellation. Observed between process calls
    /// and by the sleep gate, never mid-call.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake.notify();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Runs a graph to completion on the calling thread.
pub struct SyncRunner {
    context: Arc<FilterContext>,
    graph: FilterGraph,
    scheduler: Box<dyn Scheduler>,
    done_callback: Option<DoneCallback>,
    stop: Arc<AtomicBool>,
    wake: Arc<WakeGate>,
    /// Sleeping filters and their wake deadlines.
    sleeping: Vec<(usize, Instant)>,
}

impl SyncRunner {
    /// Create a runner for the given graph, setting the graph up in the
    /// process.
    pub fn new(
        context: Arc<FilterContext>,
        mut graph: FilterGraph,
        scheduler: Box<dyn Scheduler>,
    ) -> EngineResult<Self> {
        graph.setup_filters(&context)?;
        Ok(Self {
            context,
            graph,
            scheduler,
            done_callback: None,
            stop: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(WakeGate::new()),
            sleeping: Vec::new(),
        })
    }

    /// Create a runner with the baseline scheduler.
    pub fn with_default_scheduler(
        context: Arc<FilterContext>,
        graph: FilterGraph,
    ) -> EngineResult<Self> {
        Self::new(context, graph, Box::new(SimpleScheduler::new()))
    }

    pub fn graph(&self) -> &FilterGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut FilterGraph {
        &mut self.graph
    }

    pub fn context(&self) -> &Arc<FilterContext> {
        &self.context
    }

    /// Set the callback invoked when `run` completes.
    pub fn set_done_callback(&mut self, callback: impl FnMut(&RunOutcome) + Send + 'static) {
        self.done_callback = Some(Box::new(callback));
    }

    /// Handle for stopping this runner from another thread.
    pub fn control(&self) -> RunnerControl {
        RunnerControl {
            stop: Arc::clone(&self.stop),
            wake: Arc::clone(&self.wake),
        }
    }

    /// Open every filter and reset per-run scheduling state.
    pub fn open(&mut self) -> EngineResult<()> {
        self.stop.store(false, Ordering::SeqCst);
        self.scheduler.reset();
        self.sleeping.clear();
        self.graph.open_filters(&self.context)
    }

    /// Run one scheduling opportunity: process the next runnable filter,
    /// or report the graph state when nothing can run.
    pub fn step(&mut self) -> EngineResult<GraphState> {
        if !self.graph.is_open() {
            return Err(RuntimeError::GraphNotOpen.into());
        }
        match self.scheduler.next_node(&self.graph) {
            Some(index) => {
                self.process_node(index)?;
                Ok(GraphState::Running)
            }
            None => Ok(self.determine_graph_state()),
        }
    }

    fn process_node(&mut self, index: usize) -> EngineResult<()> {
        let (status, wake_at) = match self.graph.node_at_mut(index) {
            Some(node) => {
                log::trace!("processing filter '{}'", node.name());
                let status = match node.perform_process(&self.context) {
                    Ok(status) => status,
                    Err(e) => {
                        log::error!("filter '{}' failed: {}", node.name(), e);
                        return Err(e);
                    }
                };
                (status, Instant::now() + node.sleep_delay())
            }
            None => return Ok(()),
        };
        if status.contains(ProcessStatus::SLEEP) {
            self.sleeping.push((index, wake_at));
        }
        self.graph.sweep_must_close(&self.context)?;
        Ok(())
    }

    /// Derive the terminal state once the scheduler has nothing to run.
    pub fn determine_graph_state(&self) -> GraphState {
        let mut blocked = false;
        for node in self.graph.nodes() {
            if !node.is_open() {
                continue;
            }
            if node.stage() == LifecycleStage::Sleeping {
                return GraphState::Sleeping;
            }
            if node.inputs_satisfied() && !node.outputs_satisfied() {
                blocked = true;
            }
        }
        if blocked {
            GraphState::Blocked
        } else {
            GraphState::Finished
        }
    }

    /// Run the graph until it finishes, blocks, errors or is stopped,
    /// then close all filters and invoke the completion callback.
    pub fn run(&mut self) -> EngineResult<RunStatus> {
        if !self.graph.is_open() {
            self.open()?;
        }
        self.context.backend().activate();
        let loop_result = self.run_loop();
        let close_result = self.graph.close_filters(&self.context);
        self.context.backend().deactivate();

        let result = match loop_result {
            Ok(status) => close_result.map(|_| status),
            Err(e) => Err(e),
        };
        let outcome = match &result {
            Ok(status) => RunOutcome::from(*status),
            Err(e) => RunOutcome::Error(e.clone()),
        };
        log::debug!("run ended: {:?}", outcome);
        if let Some(callback) = self.done_callback.as_mut() {
            callback(&outcome);
        }
        result
    }

    fn run_loop(&mut self) -> EngineResult<RunStatus> {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(RunStatus::Stopped);
            }
            match self.step()? {
                GraphState::Running => {}
                GraphState::Sleeping => {
                    if !self.wait_until_wake() {
                        return Ok(RunStatus::Stopped);
                    }
                }
                GraphState::Blocked => return Ok(RunStatus::Blocked),
                GraphState::Finished => return Ok(RunStatus::Finished),
            }
        }
    }

    /// Park on the wake gate until the earliest sleep deadline, then clear
    /// the sleep flag of every filter whose deadline passed. Returns false
    /// when the wait ended because of a stop request.
    fn wait_until_wake(&mut self) -> bool {
        let deadline = self.sleeping.iter().map(|(_, at)| *at).min();
        if let Some(deadline) = deadline {
            self.wake.wait_until(deadline, &self.stop);
        }
        if self.stop.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        for (index, wake_at) in std::mem::take(&mut self.sleeping) {
            if wake_at <= now {
                if let Some(node) = self.graph.node_at_mut(index) {
                    node.clear_sleep();
                }
            } else {
                self.sleeping.push((index, wake_at));
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::MemoryBackend;
    use crate::core::error::{ConfigurationError, EngineResult};
    use crate::core::filter::{Filter, FilterIo, FilterNode, FilterSignature};
    use crate::core::format::FrameFormat;
    use crate::core::manager::CachedFrameManager;
    use crate::core::port::PortSpec;
    use crate::core::types::{KeyValueMap, Value};
    use crate::execution::scheduler::OneShotScheduler;
    use crate::filters::base::{CallbackSink, ObjectSource};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn context() -> Arc<FilterContext> {
        let backend = Arc::new(MemoryBackend::new());
        Arc::new(FilterContext::new(
            Arc::new(CachedFrameManager::new(backend.clone())),
            backend,
        ))
    }

    /// Pass-through that counts its process calls.
    struct Probe {
        format: Option<FrameFormat>,
        count: Arc<AtomicUsize>,
    }

    impl Probe {
        fn new(count: Arc<AtomicUsize>) -> Self {
            Self {
                format: None,
                count,
            }
        }
    }

    impl Filter for Probe {
        fn signature(&self) -> FilterSignature {
            FilterSignature::builder("probe")
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
            self.count.fetch_add(1, Ordering::SeqCst);
            let frame = io.pull_input(0)?;
            io.put_output(0, &frame)?;
            Ok(ProcessStatus::wait_all())
        }
    }

    /// Sleeps once, then finishes.
    struct Napper {
        delay: Duration,
        naps: usize,
        processed: Arc<AtomicUsize>,
    }

    impl Filter for Napper {
        fn signature(&self) -> FilterSignature {
            FilterSignature::builder("napper").build()
        }

        fn apply_parameter(&mut self, key: &str, _value: &Value) -> Result<(), ConfigurationError> {
            Err(ConfigurationError::UnknownParameter {
                key: key.to_string(),
            })
        }

        fn accepts_input_format(&mut self, _index: usize, _format: &FrameFormat) -> bool {
            false
        }

        fn output_format(&mut self, _index: usize) -> Option<FrameFormat> {
            None
        }

        fn process(&mut self, _io: &mut FilterIo<'_>) -> EngineResult<ProcessStatus> {
            self.processed.fetch_add(1, Ordering::SeqCst);
            if self.naps == 0 {
                self.naps += 1;
                Ok(ProcessStatus::SLEEP)
            } else {
                Ok(ProcessStatus::FINISHED)
            }
        }

        fn sleep_delay(&self) -> Duration {
            self.delay
        }
    }

    fn node(name: &str, filter: Box<dyn Filter>, params: KeyValueMap) -> FilterNode {
        let mut node = FilterNode::new(name, filter);
        node.init(params).unwrap();
        node
    }

    fn counted_pipeline(
        frames: i64,
    ) -> (FilterGraph, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let pass_count = Arc::new(AtomicUsize::new(0));
        let sink_count = Arc::new(AtomicUsize::new(0));

        let mut graph = FilterGraph::new();
        graph
            .add_node(node(
                "source",
                Box::new(ObjectSource::new()),
                KeyValueMap::from_pairs([
                    ("object", Value::Int(42)),
                    ("max_frames", Value::Int(frames)),
                ]),
            ))
            .unwrap();
        graph
            .add_node(node(
                "pass",
                Box::new(Probe::new(Arc::clone(&pass_count))),
                KeyValueMap::new(),
            ))
            .unwrap();
        let sink_probe = Arc::clone(&sink_count);
        graph
            .add_node(node(
                "sink",
                Box::new(CallbackSink::with_listener(move |_frame| {
                    sink_probe.fetch_add(1, Ordering::SeqCst);
                })),
                KeyValueMap::new(),
            ))
            .unwrap();
        graph.connect("source", "frame", "pass", "frame").unwrap();
        graph.connect("pass", "frame", "sink", "frame").unwrap();
        (graph, pass_count, sink_count)
    }

    #[test]
    fn test_linear_run_processes_each_frame_once() {
        let context = context();
        let (graph, pass_count, sink_count) = counted_pipeline(5);
        let mut runner = SyncRunner::with_default_scheduler(context, graph).unwrap();

        let status = runner.run().unwrap();
        assert_eq!(status, RunStatus::Finished);
        assert_eq!(pass_count.load(Ordering::SeqCst), 5);
        assert_eq!(sink_count.load(Ordering::SeqCst), 5);
        // Every filter closed when the run ended
        assert!(runner.graph().nodes().all(|n| !n.is_open()));
    }

    #[test]
    fn test_done_callback_receives_outcome() {
        let context = context();
        let (graph, _pass, _sink) = counted_pipeline(1);
        let mut runner = SyncRunner::with_default_scheduler(context, graph).unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_probe = Arc::clone(&seen);
        runner.set_done_callback(move |outcome| {
            if matches!(outcome, RunOutcome::Finished) {
                seen_probe.fetch_add(1, Ordering::SeqCst);
            }
        });
        runner.run().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_one_shot_scheduler_runs_linear_graph() {
        let context = context();
        let (graph, pass_count, sink_count) = counted_pipeline(1);
        let mut runner =
            SyncRunner::new(context, graph, Box::new(OneShotScheduler::new())).unwrap();

        let status = runner.run().unwrap();
        assert_eq!(status, RunStatus::Finished);
        assert_eq!(pass_count.load(Ordering::SeqCst), 1);
        assert_eq!(sink_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sleeping_filter_waits_out_its_delay() {
        let context = context();
        let processed = Arc::new(AtomicUsize::new(0));
        let mut graph = FilterGraph::new();
        graph
            .add_node(node(
                "napper",
                Box::new(Napper {
                    delay: Duration::from_millis(60),
                    naps: 0,
                    processed: Arc::clone(&processed),
                }),
                KeyValueMap::new(),
            ))
            .unwrap();
        let mut runner = SyncRunner::with_default_scheduler(context, graph).unwrap();

        let started = Instant::now();
        let status = runner.run().unwrap();
        assert_eq!(status, RunStatus::Finished);
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert_eq!(processed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_blocked_graph_reports_blocked() {
        let context = context();
        // With the one-shot policy and the sink declared first, the cursor
        // has moved past the consumers by the time the repeating source
        // fills its wire. The source then waits only on a free output.
        let mut graph = FilterGraph::new();
        graph
            .add_node(node(
                "sink",
                Box::new(CallbackSink::with_listener(|_| {})),
                KeyValueMap::new(),
            ))
            .unwrap();
        graph
            .add_node(node(
                "source",
                Box::new(ObjectSource::new()),
                KeyValueMap::from_pairs([
                    ("object", Value::Int(1)),
                    ("repeat", Value::Bool(true)),
                ]),
            ))
            .unwrap();
        graph.connect("source", "frame", "sink", "frame").unwrap();

        let mut runner =
            SyncRunner::new(context, graph, Box::new(OneShotScheduler::new())).unwrap();
        let status = runner.run().unwrap();
        assert_eq!(status, RunStatus::Blocked);
    }

    #[test]
    fn test_error_status_aborts_run() {
        struct Exploder;
        impl Filter for Exploder {
            fn signature(&self) -> FilterSignature {
                FilterSignature::builder("exploder").build()
            }
            fn apply_parameter(
                &mut self,
                key: &str,
                _value: &Value,
            ) -> Result<(), ConfigurationError> {
                Err(ConfigurationError::UnknownParameter {
                    key: key.to_string(),
                })
            }
            fn accepts_input_format(&mut self, _index: usize, _format: &FrameFormat) -> bool {
                false
            }
            fn output_format(&mut self, _index: usize) -> Option<FrameFormat> {
                None
            }
            fn process(&mut self, _io: &mut FilterIo<'_>) -> EngineResult<ProcessStatus> {
                Ok(ProcessStatus::ERROR)
            }
        }

        let context = context();
        let mut graph = FilterGraph::new();
        graph
            .add_node(node("exploder", Box::new(Exploder), KeyValueMap::new()))
            .unwrap();
        let mut runner = SyncRunner::with_default_scheduler(context, graph).unwrap();

        let failed = Arc::new(AtomicUsize::new(0));
        let failed_probe = Arc::clone(&failed);
        runner.set_done_callback(move |outcome| {
            if matches!(outcome, RunOutcome::Error(_)) {
                failed_probe.fetch_add(1, Ordering::SeqCst);
            }
        });

        let result = runner.run();
        assert!(result.is_err());
        assert_eq!(failed.load(Ordering::SeqCst), 1);
        assert_eq!(
            runner.graph().node_by_name("exploder").unwrap().stage(),
            LifecycleStage::Error
        );
    }

    #[test]
    fn test_step_requires_open_graph() {
        let context = context();
        let (graph, _pass, _sink) = counted_pipeline(1);
        let mut runner = SyncRunner::with_default_scheduler(context, graph).unwrap();
        assert!(runner.step().is_err());
    }
}
