//! Background graph runner.
//!
//! Wraps a [`SyncRunner`] and executes its loop on a dedicated worker
//! thread. The calling thread only starts, stops and queries the run; the
//! completion callback fires on the worker, never on the caller. The
//! backend execution context is activated on the worker before processing
//! and deactivated when the loop ends, whether it finished, errored or
//! was cancelled.

use crate::core::context::FilterContext;
use crate::core::error::{EngineResult, RuntimeError};
use crate::execution::scheduler::Scheduler;
use crate::execution::sync::{DoneCallback, RunOutcome, RunnerControl, SyncRunner};
use crate::graph::structure::FilterGraph;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Runs a graph on a dedicated background thread with cooperative
/// cancellation.
///
/// Only one run may be active at a time; the graph travels into the
/// worker for the duration of the run and is available again through
/// [`graph`] once the run has been waited out.
///
/// [`graph`]: AsyncRunner::graph
pub struct AsyncRunner {
    context: Arc<FilterContext>,
    runner: Option<SyncRunner>,
    worker: Option<JoinHandle<(SyncRunner, RunOutcome)>>,
    control: Option<RunnerControl>,
    done_callback: Arc<Mutex<Option<DoneCallback>>>,
    last_outcome: Option<RunOutcome>,
}

impl AsyncRunner {
    pub fn new(context: Arc<FilterContext>) -> Self {
        Self {
            context,
            runner: None,
            worker: None,
            control: None,
            done_callback: Arc::new(Mutex::new(None)),
            last_outcome: None,
        }
    }

    /// Set the graph to run, with the baseline scheduler. The graph is set
    /// up here. Fails while a run is active.
    pub fn set_graph(&mut self, graph: FilterGraph) -> EngineResult<()> {
        if self.is_running() {
            return Err(RuntimeError::AlreadyRunning.into());
        }
        self.reap();
        self.runner = Some(SyncRunner::with_default_scheduler(
            Arc::clone(&self.context),
            graph,
        )?);
        Ok(())
    }

    /// Set the graph to run with a specific scheduling policy.
    pub fn set_graph_with_scheduler(
        &mut self,
        graph: FilterGraph,
        scheduler: Box<dyn Scheduler>,
    ) -> EngineResult<()> {
        if self.is_running() {
            return Err(RuntimeError::AlreadyRunning.into());
        }
        self.reap();
        self.runner = Some(SyncRunner::new(
            Arc::clone(&self.context),
            graph,
            scheduler,
        )?);
        Ok(())
    }

    /// Set the callback invoked on the worker thread when a run completes,
    /// whether it finished, blocked, errored or was stopped.
    pub fn set_done_callback(&mut self, callback: impl FnMut(&RunOutcome) + Send + 'static) {
        *self.done_callback.lock() = Some(Box::new(callback));
    }

    /// Start executing the graph on the background thread.
    pub fn run(&mut self) -> EngineResult<()> {
        if self.is_running() {
            return Err(RuntimeError::AlreadyRunning.into());
        }
        self.reap();
        let mut runner = self.runner.take().ok_or(RuntimeError::NoGraphSet)?;

        // Open on the caller: the stop flag resets before the control
        // handle is handed out.
        runner.open()?;
        self.control = Some(runner.control());
        let done = Arc::clone(&self.done_callback);

        log::debug!("starting background graph run");
        let handle = std::thread::Builder::new()
            .name("graph-runner".to_string())
            .spawn(move || {
                let result = runner.run();
                let outcome = match result {
                    Ok(status) => RunOutcome::from(status),
                    Err(e) => RunOutcome::Error(e),
                };
                if let Some(callback) = done.lock().as_mut() {
                    callback(&outcome);
                }
                (runner, outcome)
            })
            .map_err(|e| RuntimeError::WorkerSpawnFailed(e.to_string()))?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Request cooperative cancellation of the active run. The run ends
    /// with a `Stopped` outcome once the worker observes the request
    /// between process calls.
    pub fn stop(&self) {
        if let Some(control) = &self.control {
            log::debug!("stop requested");
            control.request_stop();
        }
    }

    /// Whether a background run is currently active.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Block until the active run ends and return its outcome. Returns
    /// `None` when no run was started.
    pub fn wait(&mut self) -> Option<RunOutcome> {
        let handle = self.worker.take()?;
        self.control = None;
        match handle.join() {
            Ok((runner, outcome)) => {
                self.runner = Some(runner);
                self.last_outcome = Some(outcome.clone());
                Some(outcome)
            }
            Err(_) => None,
        }
    }

    /// Outcome of the most recently completed run.
    pub fn last_outcome(&self) -> Option<&RunOutcome> {
        self.last_outcome.as_ref()
    }

    /// The graph, when no run is active.
    pub fn graph(&mut self) -> Option<&FilterGraph> {
        self.reap();
        self.runner.as_ref().map(|runner| runner.graph())
    }

    pub fn context(&self) -> &Arc<FilterContext> {
        &self.context
    }

    /// Collect a finished worker, restoring the runner for reuse.
    fn reap(&mut self) {
        let finished = self
            .worker
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(false);
        if finished {
            let _ = self.wait();
        }
    }
}
