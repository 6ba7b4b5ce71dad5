//! Collectors: units of diagnostic work composed into trees.
//!
//! Every collector owns a [`StateMachine`] and implements [`Collector`]. The
//! provided [`Collector::collect`] method is the single entry point; it moves
//! the collector through `Started`, runs the concrete logic and always lands
//! on a terminal state, whatever the logic did.

pub mod diag;
pub mod resource;
pub mod result;
pub mod spec;
pub mod state;
pub mod tool_collector;

pub use diag::Diag;
pub use resource::Resource;
pub use result::{AggregatedCollectorResult, CollectorResult, ResultStatus};
pub use spec::{CollectorSpec, TrackerSpec};
pub use state::{CollectorState, RunEvent, StateCallback, StateMachine, StateTransition};
pub use tool_collector::{ToolCollector, ToolKind};

use crate::core::process::ProcessDescription;
use crate::core::session::Session;
use crate::core::trigger::TriggerCore;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

/// Whether a collector runs briefly or for a bounded/unbounded window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectorType {
    Snapshot,
    Continuous,
}

impl fmt::Display for CollectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectorType::Snapshot => f.write_str("snapshot"),
            CollectorType::Continuous => f.write_str("continuous"),
        }
    }
}

/// Where and how a collector run writes its output
#[derive(Clone)]
pub struct RunContext {
    pub output_dir: PathBuf,
    pub suffix: String,
    pub session: Arc<Session>,
    pub callbacks: Vec<StateCallback>,
}

impl RunContext {
    pub fn new(output_dir: impl Into<PathBuf>, suffix: impl Into<String>, session: Arc<Session>) -> Self {
        Self {
            output_dir: output_dir.into(),
            suffix: suffix.into(),
            session,
            callbacks: Vec::new(),
        }
    }

    /// Same context with a different file suffix
    pub fn with_suffix(&self, suffix: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.suffix = suffix.into();
        ctx
    }

    pub fn with_callback(mut self, callback: StateCallback) -> Self {
        self.callbacks.push(callback);
        self
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("output_dir", &self.output_dir)
            .field("suffix", &self.suffix)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// A unit of diagnostic work.
///
/// Implementors provide the state machine, the descriptive queries and
/// `collect_impl`; everything else is provided.
pub trait Collector: Send + Sync {
    fn machine(&self) -> &StateMachine;

    /// Registered type name, as written to `__class__`
    fn class_name(&self) -> &'static str;

    fn collector_type(&self) -> CollectorType;

    /// Resources held while running. Pure query.
    fn required_resources(&self) -> Vec<Resource>;

    /// Concrete collection logic. Errors become a Failure result in `collect`.
    fn collect_impl(&self, ctx: &RunContext) -> Result<CollectorResult>;

    /// Serializable description of the current configuration and state
    fn to_spec(&self) -> CollectorSpec;

    fn as_trigger(&self) -> Option<&TriggerCore> {
        None
    }

    /// Deferred collectors run after every other top-level collector finished
    fn is_deferred(&self) -> bool {
        false
    }

    /// Target process, for collectors attached to one
    fn process(&self) -> Option<ProcessDescription> {
        None
    }

    /// Point a process-attached collector at a different process
    fn retarget_process(&self, _process: &ProcessDescription) {}

    fn label(&self) -> String {
        match self.process() {
            Some(process) => format!("{} {}", self.class_name(), process),
            None => self.class_name().to_string(),
        }
    }

    fn is_trigger(&self) -> bool {
        self.as_trigger().is_some()
    }

    fn state(&self) -> CollectorState {
        self.machine().get()
    }

    /// Advance the state; returns true only on a strict advance
    fn promote_state(&self, new: CollectorState) -> bool {
        self.machine()
            .promote(new, &self.label(), self.is_trigger())
            .is_some()
    }

    fn wait_for_state(&self, target: CollectorState, timeout: Option<Duration>) -> CollectorState {
        self.machine().wait_for(target, timeout)
    }

    fn register_observer(&self, observer: Sender<RunEvent>) {
        self.machine().register_observer(observer);
    }

    /// Reset this collector and its whole subtree to `Waiting`
    fn init_state(&self) {
        self.machine().reset();
        if let Some(trigger) = self.as_trigger() {
            for child in trigger.children() {
                child.init_state();
            }
        }
    }

    /// Run the collector and always finish in Success, Failure or Aborted
    fn collect(&self, ctx: &RunContext) -> CollectorResult {
        self.machine().attach_callbacks(ctx.callbacks.clone());
        self.promote_state(CollectorState::Started);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.collect_impl(ctx)));
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => CollectorResult::exception(
                e,
                format!("Error while collecting data from {}", self.class_name()),
            ),
            Err(payload) => {
                let text = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                CollectorResult::exception(
                    text,
                    format!("Error while collecting data from {}", self.class_name()),
                )
            }
        };

        let terminal = if result.is_success() {
            CollectorState::Success
        } else if self.state() == CollectorState::Aborting {
            CollectorState::Aborted
        } else {
            CollectorState::Failure
        };
        self.promote_state(terminal);
        result
    }
}

/// Preorder walk of a collector forest, pairing each node with its depth
pub fn flatten_collectors(roots: &[Arc<dyn Collector>]) -> Vec<(Arc<dyn Collector>, usize)> {
    let mut flat = Vec::new();
    let mut stack: Vec<(Arc<dyn Collector>, usize)> =
        roots.iter().rev().map(|c| (c.clone(), 0)).collect();

    while let Some((collector, depth)) = stack.pop() {
        if let Some(trigger) = collector.as_trigger() {
            for child in trigger.children().into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        flat.push((collector, depth));
    }
    flat
}

/// Request abort on every collector reachable from `roots`
pub fn abort_collectors(roots: &[Arc<dyn Collector>]) {
    for (collector, _) in flatten_collectors(roots) {
        collector.promote_state(CollectorState::Aborting);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::session::tests::test_session;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use tempfile::TempDir;

    /// Collector running a closure, for exercising the provided methods
    pub struct FnCollector {
        pub machine: StateMachine,
        pub resources: Vec<Resource>,
        pub calls: AtomicUsize,
        pub body: Box<dyn Fn(&FnCollector) -> Result<CollectorResult> + Send + Sync>,
    }

    impl FnCollector {
        pub fn new(body: impl Fn(&FnCollector) -> Result<CollectorResult> + Send + Sync + 'static) -> Self {
            Self {
                machine: StateMachine::default(),
                resources: Vec::new(),
                calls: AtomicUsize::new(0),
                body: Box::new(body),
            }
        }

        pub fn with_resources(mut self, resources: Vec<Resource>) -> Self {
            self.resources = resources;
            self
        }
    }

    impl Collector for FnCollector {
        fn machine(&self) -> &StateMachine {
            &self.machine
        }

        fn class_name(&self) -> &'static str {
            "PS"
        }

        fn collector_type(&self) -> CollectorType {
            CollectorType::Snapshot
        }

        fn required_resources(&self) -> Vec<Resource> {
            self.resources.clone()
        }

        fn collect_impl(&self, _ctx: &RunContext) -> Result<CollectorResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.body)(self)
        }

        fn to_spec(&self) -> CollectorSpec {
            CollectorSpec::PS(spec::StateSpec { state: self.state() })
        }
    }

    #[test]
    fn test_collect_success_reaches_success() {
        let dir = TempDir::new().unwrap();
        let ctx = RunContext::new(dir.path(), "", test_session(dir.path()));
        let collector = FnCollector::new(|_| Ok(CollectorResult::success("done")));
        let result = collector.collect(&ctx);
        assert!(result.is_success());
        assert_eq!(collector.state(), CollectorState::Success);
    }

    #[test]
    fn test_collect_error_and_panic_become_failure() {
        let dir = TempDir::new().unwrap();
        let ctx = RunContext::new(dir.path(), "", test_session(dir.path()));

        let failing = FnCollector::new(|_| Err(crate::DiagError::other("disk gone")));
        let result = failing.collect(&ctx);
        assert!(result.is_failure());
        assert!(result.message.contains("disk gone"));
        assert_eq!(failing.state(), CollectorState::Failure);

        let panicking = FnCollector::new(|_| panic!("unexpected"));
        let result = panicking.collect(&ctx);
        assert!(result.is_failure());
        assert!(result.message.contains("unexpected"));
        assert_eq!(panicking.state(), CollectorState::Failure);
    }

    #[test]
    fn test_collect_while_aborting_ends_aborted() {
        let dir = TempDir::new().unwrap();
        let ctx = RunContext::new(dir.path(), "", test_session(dir.path()));
        let collector = FnCollector::new(|c| {
            c.promote_state(CollectorState::Aborting);
            Ok(CollectorResult::failure("stopped"))
        });
        collector.collect(&ctx);
        assert_eq!(collector.state(), CollectorState::Aborted);
    }

    #[test]
    fn test_callbacks_and_observers_see_every_advance() {
        let dir = TempDir::new().unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = RunContext::new(dir.path(), "", test_session(dir.path()))
            .with_callback(Arc::new(move |t: &StateTransition| sink.lock().push(t.current)));

        let (tx, rx) = mpsc::channel();
        let collector = FnCollector::new(|_| Ok(CollectorResult::success("")));
        collector.register_observer(tx);
        collector.collect(&ctx);

        assert_eq!(*seen.lock(), vec![CollectorState::Started, CollectorState::Success]);
        let observed: Vec<CollectorState> = rx
            .try_iter()
            .filter_map(|event| match event {
                RunEvent::Transition(t) => Some(t.current),
                RunEvent::Shutdown => None,
            })
            .collect();
        assert_eq!(observed, vec![CollectorState::Started, CollectorState::Success]);
    }
}
