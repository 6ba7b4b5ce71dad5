//! Fires when a system resource's moving average crosses a threshold.

use super::TriggerCore;
use crate::core::collector::spec::{MovingAverageSpec, ResourceMonitorSpec};
use crate::core::collector::{
    Collector, CollectorResult, CollectorSpec, CollectorState, CollectorType, Resource, RunContext,
    StateMachine, TrackerSpec,
};
use crate::core::util::{build_timestamp, sleep_unless_aborted};
use crate::error::{DiagError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// System-wide quantity a tracker samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Global CPU usage, percent
    Cpu,
    /// Used RAM, MB
    PhysicalMemory,
    /// Used RAM plus used swap, MB
    VirtualMemory,
}

impl Metric {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "cpu" => Ok(Metric::Cpu),
            "physical_memory" => Ok(Metric::PhysicalMemory),
            "virtual_memory" => Ok(Metric::VirtualMemory),
            other => Err(DiagError::validation(format!("Unsupported tracker metric '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cpu => "cpu",
            Metric::PhysicalMemory => "physical_memory",
            Metric::VirtualMemory => "virtual_memory",
        }
    }
}

/// Source of resource usage samples
pub trait UsageSampler: Send + Sync {
    fn sample(&self, metric: Metric) -> f64;
}

/// Usage figures read through sysinfo
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::nothing().with_cpu_usage())
            .with_memory(MemoryRefreshKind::everything());
        Self {
            system: Mutex::new(System::new_with_specifics(refresh_kind)),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageSampler for SysinfoSampler {
    fn sample(&self, metric: Metric) -> f64 {
        let mut system = self.system.lock();
        match metric {
            Metric::Cpu => {
                system.refresh_cpu_usage();
                f64::from(system.global_cpu_usage())
            }
            Metric::PhysicalMemory => {
                system.refresh_memory();
                system.used_memory() as f64 / BYTES_PER_MB
            }
            Metric::VirtualMemory => {
                system.refresh_memory();
                (system.used_memory() + system.used_swap()) as f64 / BYTES_PER_MB
            }
        }
    }
}

/// Windowed average of one metric, compared against a threshold
pub struct MovingAverageTracker {
    spec: MovingAverageSpec,
    metric: Metric,
    window: Mutex<VecDeque<f64>>,
}

impl MovingAverageTracker {
    pub fn from_spec(spec: &MovingAverageSpec) -> Result<Self> {
        Ok(Self {
            metric: Metric::parse(&spec.metric)?,
            spec: spec.clone(),
            window: Mutex::new(VecDeque::with_capacity(spec.num_samples)),
        })
    }

    /// Take one sample, evicting the oldest once the window is full
    pub fn update(&self, sampler: &dyn UsageSampler) {
        let value = sampler.sample(self.metric);
        let mut window = self.window.lock();
        if window.len() == self.spec.num_samples {
            window.pop_front();
        }
        window.push_back(value);
    }

    pub fn average(&self) -> Option<f64> {
        let window = self.window.lock();
        if window.is_empty() {
            return None;
        }
        Some(window.iter().sum::<f64>() / window.len() as f64)
    }

    /// Full window whose average is past the threshold (below it when inverted)
    pub fn has_crossed_threshold(&self) -> bool {
        if self.window.lock().len() < self.spec.num_samples {
            return false;
        }
        match self.average() {
            Some(average) if self.spec.invert => average < self.spec.threshold,
            Some(average) => average > self.spec.threshold,
            None => false,
        }
    }

    pub fn to_spec(&self) -> TrackerSpec {
        TrackerSpec::MovingAverageResourceMonitorTracker(self.spec.clone())
    }
}

impl fmt::Display for MovingAverageTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.spec.target,
            self.metric.as_str(),
            if self.spec.invert { "<" } else { ">" },
            self.spec.threshold
        )
    }
}

pub struct ResourceMonitor {
    machine: StateMachine,
    core: TriggerCore,
    trackers: Vec<MovingAverageTracker>,
    sleep_time: f64,
}

impl ResourceMonitor {
    pub fn from_spec(spec: &ResourceMonitorSpec) -> Result<Self> {
        let trackers = spec
            .resource_monitor_trackers
            .iter()
            .map(|tracker| match tracker {
                TrackerSpec::MovingAverageResourceMonitorTracker(s) => MovingAverageTracker::from_spec(s),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            machine: StateMachine::new(spec.state),
            core: TriggerCore::new(CollectorSpec::build_all(&spec.collectors)?),
            trackers,
            sleep_time: spec.sleep_time,
        })
    }

    pub fn trackers(&self) -> &[MovingAverageTracker] {
        &self.trackers
    }
}

impl Collector for ResourceMonitor {
    fn machine(&self) -> &StateMachine {
        &self.machine
    }

    fn class_name(&self) -> &'static str {
        "ResourceMonitor"
    }

    fn collector_type(&self) -> CollectorType {
        CollectorType::Continuous
    }

    fn required_resources(&self) -> Vec<Resource> {
        self.core.required_resources()
    }

    fn as_trigger(&self) -> Option<&TriggerCore> {
        Some(&self.core)
    }

    fn label(&self) -> String {
        let trackers: Vec<String> = self.trackers.iter().map(ToString::to_string).collect();
        format!("ResourceMonitor(Tracker(s): {})", trackers.join(", "))
    }

    fn collect_impl(&self, ctx: &RunContext) -> Result<CollectorResult> {
        log::info!("Starting resource monitor with trackers: {}", self.label());
        let ctx = ctx.with_suffix(format!("_{}", build_timestamp()));
        let sampler = ctx.session.sampler();
        let pause = Duration::from_secs_f64(self.sleep_time);

        while self.state() != CollectorState::Aborting {
            for tracker in &self.trackers {
                tracker.update(sampler);
                if tracker.has_crossed_threshold() {
                    log::info!("Crossed the threshold: {}", tracker);
                    self.promote_state(CollectorState::Collecting);
                    let result = self.core.fire(&ctx);
                    if self.state() == CollectorState::Aborting {
                        break;
                    }
                    return Ok(result);
                }
            }
            if sleep_unless_aborted(self, pause) {
                break;
            }
        }
        Ok(CollectorResult::aborted("Resource Monitor trigger aborted by user"))
    }

    fn to_spec(&self) -> CollectorSpec {
        CollectorSpec::ResourceMonitor(ResourceMonitorSpec {
            resource_monitor_trackers: self.trackers.iter().map(MovingAverageTracker::to_spec).collect(),
            collectors: self.core.child_specs(),
            sleep_time: self.sleep_time,
            state: self.state(),
        })
    }
}
