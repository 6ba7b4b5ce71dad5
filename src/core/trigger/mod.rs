//! Triggers: collectors that wait for a condition, then run their children.
//!
//! Each concrete trigger embeds a [`TriggerCore`] holding the child list and
//! the conflict flag. Firing always goes through [`TriggerCore::fire`]:
//! admission filtering against the session's allocations, submission of the
//! survivors to the shared pool, then a blocking wait and aggregation.

pub mod log_monitor;
pub mod monitored_file;
pub mod periodic;
pub mod resource_monitor;
pub mod search_debug;

pub use log_monitor::LogMonitor;
pub use monitored_file::MonitoredFile;
pub use periodic::Periodic;
pub use resource_monitor::{MovingAverageTracker, ResourceMonitor};
pub use search_debug::SearchDebug;

use crate::core::collector::{
    AggregatedCollectorResult, Collector, CollectorResult, CollectorSpec, Resource, RunContext,
};
use crate::core::resource_manager::ResourceManager;
use crate::core::threadpool::Token;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result message when admission removed every child
pub const ALL_RESOURCES_OCCUPIED: &str =
    "All resources are occupied, could not start any of the collectors.";

/// Children and conflict bookkeeping shared by every trigger type
pub struct TriggerCore {
    children: Mutex<Vec<Arc<dyn Collector>>>,
    conflicts: AtomicBool,
}

impl TriggerCore {
    pub fn new(children: Vec<Arc<dyn Collector>>) -> Self {
        Self {
            children: Mutex::new(children),
            conflicts: AtomicBool::new(false),
        }
    }

    pub fn children(&self) -> Vec<Arc<dyn Collector>> {
        self.children.lock().clone()
    }

    pub fn replace_children(&self, children: Vec<Arc<dyn Collector>>) {
        *self.children.lock() = children;
    }

    pub fn child_specs(&self) -> Vec<CollectorSpec> {
        self.children.lock().iter().map(|c| c.to_spec()).collect()
    }

    pub fn has_conflicts(&self) -> bool {
        self.conflicts.load(Ordering::SeqCst)
    }

    pub fn reset_conflicts(&self) {
        self.conflicts.store(false, Ordering::SeqCst);
    }

    /// Union of the children's resources
    pub fn required_resources(&self) -> Vec<Resource> {
        let mut resources: Vec<Resource> = Vec::new();
        for child in self.children() {
            for resource in child.required_resources() {
                if !resources.contains(&resource) {
                    resources.push(resource);
                }
            }
        }
        resources
    }

    fn filter_helper(&self, manager: &ResourceManager) {
        let mut children = self.children.lock();
        for i in (0..children.len()).rev() {
            if let Some(trigger) = children[i].as_trigger() {
                trigger.filter_helper(manager);
            } else if manager.conflicts_with(children[i].as_ref()) {
                log::info!("Dropping {}: its resources are in use", children[i].label());
                self.conflicts.store(true, Ordering::SeqCst);
                children.remove(i);
            }
        }
    }

    /// Drop every leaf whose resources are already held elsewhere
    pub fn filter_collectors(&self, ctx: &RunContext) {
        let mut manager = ResourceManager::new(&self.children());
        if !manager.should_start_task(ctx.session.allocations()) {
            self.filter_helper(&manager);
        }
    }

    /// Submit every child to the shared pool
    pub fn submit(&self, ctx: &RunContext) -> Vec<Token<CollectorResult>> {
        let pool = ctx.session.pool();
        self.children()
            .into_iter()
            .map(|child| {
                let ctx = ctx.clone();
                pool.add_task(move || child.collect(&ctx))
            })
            .collect()
    }

    /// Wait for the tokens and fold their results
    pub fn wait_and_aggregate(&self, tokens: Vec<Token<CollectorResult>>) -> CollectorResult {
        let mut aggregate = AggregatedCollectorResult::new();
        for token in tokens {
            token.wait(None);
            let result = token
                .take_result()
                .unwrap_or_else(|| CollectorResult::failure("Collector finished without a result"));
            aggregate.add_result(&result);
        }
        self.finalize(aggregate)
    }

    fn finalize(&self, aggregate: AggregatedCollectorResult) -> CollectorResult {
        if self.children.lock().is_empty() && self.has_conflicts() {
            return CollectorResult::failure(ALL_RESOURCES_OCCUPIED);
        }
        aggregate.result()
    }

    /// Filter, submit, wait and aggregate
    pub fn fire(&self, ctx: &RunContext) -> CollectorResult {
        self.filter_collectors(ctx);
        let tokens = self.submit(ctx);
        self.wait_and_aggregate(tokens)
    }
}
