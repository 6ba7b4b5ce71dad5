//! Application context shared by every collector of a run.

use crate::core::config::Config;
use crate::core::process::{ProcessLister, ProcessSource, SysinfoSource};
use crate::core::resource_manager::AllocationSource;
use crate::core::task::TaskHandler;
use crate::core::threadpool::ThreadPool;
use crate::core::tools::ToolAvailabilityManager;
use crate::core::trigger::resource_monitor::{SysinfoSampler, UsageSampler};
use std::sync::Arc;

/// One per process: configuration plus the shared pool, caches and seams.
pub struct Session {
    config: Config,
    pool: ThreadPool,
    processes: Arc<ProcessLister>,
    tools: ToolAvailabilityManager,
    allocations: Arc<dyn AllocationSource>,
    sampler: Arc<dyn UsageSampler>,
}

impl Session {
    /// Session wired to the live OS and the on-disk running area
    pub fn new(config: Config) -> Arc<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> SessionBuilder {
        SessionBuilder {
            config,
            process_source: None,
            allocations: None,
            sampler: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    pub fn process_lister(&self) -> &Arc<ProcessLister> {
        &self.processes
    }

    pub fn tools(&self) -> &ToolAvailabilityManager {
        &self.tools
    }

    pub fn allocations(&self) -> &dyn AllocationSource {
        self.allocations.as_ref()
    }

    pub fn sampler(&self) -> &dyn UsageSampler {
        self.sampler.as_ref()
    }
}

/// Builder allowing tests to swap the OS-facing pieces
pub struct SessionBuilder {
    config: Config,
    process_source: Option<Box<dyn ProcessSource>>,
    allocations: Option<Arc<dyn AllocationSource>>,
    sampler: Option<Arc<dyn UsageSampler>>,
}

impl SessionBuilder {
    pub fn process_source(mut self, source: Box<dyn ProcessSource>) -> Self {
        self.process_source = Some(source);
        self
    }

    pub fn allocations(mut self, allocations: Arc<dyn AllocationSource>) -> Self {
        self.allocations = Some(allocations);
        self
    }

    pub fn sampler(mut self, sampler: Arc<dyn UsageSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn build(self) -> Arc<Session> {
        let config = self.config;
        let source = self.process_source.unwrap_or_else(|| Box::new(SysinfoSource));
        let processes = Arc::new(ProcessLister::new(
            source,
            config.dispatch_dir(),
            config.process_cache_ttl(),
        ));
        let allocations = self.allocations.unwrap_or_else(|| {
            Arc::new(TaskHandler::new(config.clone(), processes.clone())) as Arc<dyn AllocationSource>
        });
        let sampler = self
            .sampler
            .unwrap_or_else(|| Arc::new(SysinfoSampler::new()) as Arc<dyn UsageSampler>);
        let tools = ToolAvailabilityManager::new(
            config.tool_cache_path.clone(),
            vec![config.splunk_home.join("bin")],
        );
        let pool = ThreadPool::new(config.threadpool_soft_limit, config.threadpool_hard_limit);

        log::debug!(
            "Session created: output_root={} pool={}..{}",
            config.output_root.display(),
            config.threadpool_soft_limit,
            config.threadpool_hard_limit
        );

        Arc::new(Session {
            config,
            pool,
            processes,
            tools,
            allocations,
            sampler,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::process::lister::tests::StaticSource;
    use crate::core::resource_manager::NoAllocations;
    use std::path::Path;

    /// Session over an empty process table with nothing allocated
    pub fn test_session(root: &Path) -> Arc<Session> {
        Session::builder(Config::with_root(root))
            .process_source(Box::new(StaticSource::default()))
            .allocations(Arc::new(NoAllocations))
            .build()
    }

    #[test]
    fn test_builder_applies_pool_limits() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::with_root(dir.path());
        config.threadpool_soft_limit = 2;
        config.threadpool_hard_limit = 3;
        let session = Session::builder(config)
            .process_source(Box::new(StaticSource::default()))
            .allocations(Arc::new(NoAllocations))
            .build();
        assert_eq!(session.pool().get_total_workers_count(), 2);
        assert_eq!(session.pool().hard_limit(), 3);
        assert!(session.allocations().running_tasks().is_empty());
    }
}
