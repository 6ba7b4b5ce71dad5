//! Collector lifecycle states and the lock/condvar machine that advances them.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound used when a caller asks to wait "forever".
pub const MAX_WAIT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Ordered lifecycle of a collector. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CollectorState {
    Waiting = 0,
    Started = 1,
    Collecting = 2,
    Aborting = 3,
    Finished = 4,
    Success = 5,
    Failure = 6,
    Aborted = 7,
}

impl CollectorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectorState::Waiting => "Waiting",
            CollectorState::Started => "Started",
            CollectorState::Collecting => "Collecting",
            CollectorState::Aborting => "Aborting",
            CollectorState::Finished => "Finished",
            CollectorState::Success => "Success",
            CollectorState::Failure => "Failure",
            CollectorState::Aborted => "Aborted",
        }
    }

    /// Parse a state name, falling back to `Waiting` for unknown input
    pub fn from_name(name: &str) -> Self {
        match name {
            "Waiting" => CollectorState::Waiting,
            "Started" => CollectorState::Started,
            "Collecting" => CollectorState::Collecting,
            "Aborting" => CollectorState::Aborting,
            "Finished" => CollectorState::Finished,
            "Success" => CollectorState::Success,
            "Failure" => CollectorState::Failure,
            "Aborted" => CollectorState::Aborted,
            other => {
                log::warn!("Invalid collector state '{}', using Waiting", other);
                CollectorState::Waiting
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self >= CollectorState::Success
    }
}

impl Default for CollectorState {
    fn default() -> Self {
        CollectorState::Waiting
    }
}

impl From<String> for CollectorState {
    fn from(value: String) -> Self {
        CollectorState::from_name(&value)
    }
}

impl From<CollectorState> for String {
    fn from(value: CollectorState) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for CollectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One strict advance of a collector's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub collector: String,
    pub is_trigger: bool,
    pub previous: CollectorState,
    pub current: CollectorState,
}

/// Messages flowing from collectors to the run record writer
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Transition(StateTransition),
    Shutdown,
}

/// Caller supplied hook invoked on every strict advance
pub type StateCallback = Arc<dyn Fn(&StateTransition) + Send + Sync>;

/// Mutex/condvar pair holding a collector's state plus its observer list.
pub struct StateMachine {
    state: Mutex<CollectorState>,
    changed: Condvar,
    // also serializes notifications
    observers: Mutex<Vec<Sender<RunEvent>>>,
    callbacks: Mutex<Vec<StateCallback>>,
}

impl StateMachine {
    pub fn new(initial: CollectorState) -> Self {
        Self {
            state: Mutex::new(initial),
            changed: Condvar::new(),
            observers: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self) -> CollectorState {
        *self.state.lock()
    }

    /// Advance to `new` if it is strictly greater than the current state.
    ///
    /// Waiters are woken in every case; observers and callbacks only hear
    /// about strict advances.
    pub fn promote(
        &self,
        new: CollectorState,
        collector: &str,
        is_trigger: bool,
    ) -> Option<StateTransition> {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            if new > previous {
                *state = new;
            }
            self.changed.notify_all();
            previous
        };

        if new <= previous {
            return None;
        }

        let transition = StateTransition {
            collector: collector.to_string(),
            is_trigger,
            previous,
            current: new,
        };

        {
            let mut observers = self.observers.lock();
            observers.retain(|tx| tx.send(RunEvent::Transition(transition.clone())).is_ok());
        }

        let callbacks = self.callbacks.lock().clone();
        for callback in callbacks.iter() {
            callback(&transition);
        }

        Some(transition)
    }

    /// Block until the state reaches `target` or the timeout elapses
    pub fn wait_for(&self, target: CollectorState, timeout: Option<Duration>) -> CollectorState {
        let deadline = Instant::now() + timeout.unwrap_or(MAX_WAIT);
        let mut state = self.state.lock();
        while *state < target {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        *state
    }

    /// Put the machine back to `Waiting` without notifying anyone
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = CollectorState::Waiting;
        self.changed.notify_all();
    }

    pub fn register_observer(&self, observer: Sender<RunEvent>) {
        self.observers.lock().push(observer);
    }

    /// Registered observers, for handing on to collectors created later
    pub fn observers(&self) -> Vec<Sender<RunEvent>> {
        self.observers.lock().clone()
    }

    /// Install the callbacks of the run currently driving this collector
    pub fn attach_callbacks(&self, callbacks: Vec<StateCallback>) {
        *self.callbacks.lock() = callbacks;
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new(CollectorState::Waiting)
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine").field("state", &self.get()).finish()
    }
}
