//! Serializable descriptors for every collector and trigger type.
//!
//! Decoding is two-phase: serde maps `__class__` onto a variant (unknown
//! classes are schema errors), then [`CollectorSpec::validate`] checks ranges
//! and string safety before [`CollectorSpec::build`] constructs the live
//! collector.

use super::{Collector, CollectorState, Diag, ToolCollector, ToolKind};
use crate::core::process::ProcessDescription;
use crate::core::trigger::{LogMonitor, Periodic, ResourceMonitor, SearchDebug};
use crate::core::validation::{check_range, check_string_value, MAX_COUNT, MAX_TIME};
use crate::error::{DiagError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

/// Shortest window accepted for continuous tool collectors, in seconds
pub const MIN_COLLECTION_TIME: f64 = 10.0;

/// Default pause between resource monitor iterations, in seconds
pub const DEFAULT_SLEEP_TIME: f64 = 5.0;

/// Window size of the moving average tracker
pub const TRACKER_SAMPLES: usize = 10;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateSpec {
    #[serde(default)]
    pub state: CollectorState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub process: ProcessDescription,
    #[serde(default)]
    pub state: CollectorState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedSpec {
    pub collection_time: f64,
    #[serde(default)]
    pub state: CollectorState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedProcessSpec {
    pub collection_time: f64,
    pub process: ProcessDescription,
    #[serde(default)]
    pub state: CollectorState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkPacketSpec {
    pub collection_time: f64,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub port: Option<u32>,
    #[serde(default)]
    pub state: CollectorState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodicSpec {
    #[serde(rename = "sampleCount")]
    pub sample_count: u64,
    pub interval: f64,
    pub collectors: Vec<CollectorSpec>,
    #[serde(default)]
    pub state: CollectorState,
}

fn default_sleep_time() -> f64 {
    DEFAULT_SLEEP_TIME
}

fn is_default_sleep_time(value: &f64) -> bool {
    (*value - DEFAULT_SLEEP_TIME).abs() < f64::EPSILON
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMonitorSpec {
    pub resource_monitor_trackers: Vec<TrackerSpec>,
    pub collectors: Vec<CollectorSpec>,
    #[serde(default = "default_sleep_time", skip_serializing_if = "is_default_sleep_time")]
    pub sleep_time: f64,
    #[serde(default)]
    pub state: CollectorState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMonitorSpec {
    #[serde(rename = "selectedFile")]
    pub selected_file: String,
    pub regex: String,
    pub collectors: Vec<CollectorSpec>,
    #[serde(default)]
    pub state: CollectorState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDebugSpec {
    pub search_regex: String,
    pub collectors: Vec<CollectorSpec>,
    #[serde(default)]
    pub state: CollectorState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovingAverageSpec {
    pub target: String,
    pub metric: String,
    pub threshold: f64,
    pub num_samples: usize,
    #[serde(default)]
    pub invert: bool,
}

/// Resource usage tracker attached to a resource monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__class__")]
pub enum TrackerSpec {
    MovingAverageResourceMonitorTracker(MovingAverageSpec),
}

impl TrackerSpec {
    pub fn validate(&self) -> Result<()> {
        let TrackerSpec::MovingAverageResourceMonitorTracker(spec) = self;
        if spec.target != "system" {
            return Err(DiagError::validation(format!(
                "Unsupported tracker target '{}'; only 'system' is available",
                spec.target
            )));
        }
        let max_threshold = match spec.metric.as_str() {
            "cpu" => 100.0,
            "physical_memory" | "virtual_memory" => 1e9,
            other => {
                return Err(DiagError::validation(format!("Unsupported tracker metric '{}'", other)));
            }
        };
        if !(spec.threshold > 0.0 && spec.threshold <= max_threshold) {
            return Err(DiagError::validation(format!(
                "threshold must be in (0, {}], got {}",
                max_threshold, spec.threshold
            )));
        }
        if spec.num_samples != TRACKER_SAMPLES {
            return Err(DiagError::validation(format!(
                "num_samples must be {}, got {}",
                TRACKER_SAMPLES, spec.num_samples
            )));
        }
        Ok(())
    }
}

/// Descriptor of one collector or trigger, tagged by `__class__`
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__class__")]
pub enum CollectorSpec {
    PS(StateSpec),
    NetStat(StateSpec),
    LSOF(ProcessSpec),
    StackTrace(ProcessSpec),
    SystemCallTrace(TimedProcessSpec),
    NetworkPacket(NetworkPacketSpec),
    IOPS(TimedSpec),
    Diag(StateSpec),
    Periodic(PeriodicSpec),
    ResourceMonitor(ResourceMonitorSpec),
    LogMonitor(LogMonitorSpec),
    SearchDebug(SearchDebugSpec),
}

fn check_regex(pattern: &str, field: &str) -> Result<()> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| DiagError::validation(format!("{} is not a valid regex: {}", field, e)))
}

impl CollectorSpec {
    pub fn class_name(&self) -> &'static str {
        match self {
            CollectorSpec::PS(_) => "PS",
            CollectorSpec::NetStat(_) => "NetStat",
            CollectorSpec::LSOF(_) => "LSOF",
            CollectorSpec::StackTrace(_) => "StackTrace",
            CollectorSpec::SystemCallTrace(_) => "SystemCallTrace",
            CollectorSpec::NetworkPacket(_) => "NetworkPacket",
            CollectorSpec::IOPS(_) => "IOPS",
            CollectorSpec::Diag(_) => "Diag",
            CollectorSpec::Periodic(_) => "Periodic",
            CollectorSpec::ResourceMonitor(_) => "ResourceMonitor",
            CollectorSpec::LogMonitor(_) => "LogMonitor",
            CollectorSpec::SearchDebug(_) => "SearchDebug",
        }
    }

    pub fn state(&self) -> CollectorState {
        match self {
            CollectorSpec::PS(s) | CollectorSpec::NetStat(s) | CollectorSpec::Diag(s) => s.state,
            CollectorSpec::LSOF(s) | CollectorSpec::StackTrace(s) => s.state,
            CollectorSpec::SystemCallTrace(s) => s.state,
            CollectorSpec::NetworkPacket(s) => s.state,
            CollectorSpec::IOPS(s) => s.state,
            CollectorSpec::Periodic(s) => s.state,
            CollectorSpec::ResourceMonitor(s) => s.state,
            CollectorSpec::LogMonitor(s) => s.state,
            CollectorSpec::SearchDebug(s) => s.state,
        }
    }

    pub fn children(&self) -> &[CollectorSpec] {
        match self {
            CollectorSpec::Periodic(s) => &s.collectors,
            CollectorSpec::ResourceMonitor(s) => &s.collectors,
            CollectorSpec::LogMonitor(s) => &s.collectors,
            CollectorSpec::SearchDebug(s) => &s.collectors,
            _ => &[],
        }
    }

    pub fn is_trigger(&self) -> bool {
        matches!(
            self,
            CollectorSpec::Periodic(_)
                | CollectorSpec::ResourceMonitor(_)
                | CollectorSpec::LogMonitor(_)
                | CollectorSpec::SearchDebug(_)
        )
    }

    /// Preorder walk over a descriptor forest
    pub fn flatten(specs: &[CollectorSpec]) -> Vec<&CollectorSpec> {
        let mut flat = Vec::new();
        let mut stack: Vec<&CollectorSpec> = specs.iter().rev().collect();
        while let Some(spec) = stack.pop() {
            stack.extend(spec.children().iter().rev());
            flat.push(spec);
        }
        flat
    }

    /// Range, regex and string-safety checks, recursing into children
    pub fn validate(&self) -> Result<()> {
        match self {
            CollectorSpec::PS(_) | CollectorSpec::NetStat(_) | CollectorSpec::Diag(_) => {}
            CollectorSpec::LSOF(s) | CollectorSpec::StackTrace(s) => s.process.validate()?,
            CollectorSpec::SystemCallTrace(s) => {
                check_range(s.collection_time, MIN_COLLECTION_TIME, MAX_TIME, "collection_time")?;
                s.process.validate()?;
            }
            CollectorSpec::NetworkPacket(s) => {
                check_range(s.collection_time, MIN_COLLECTION_TIME, MAX_TIME, "collection_time")?;
                if let Some(port) = s.port {
                    check_range(port, 1, 65535, "port")?;
                }
                if let Some(ip) = &s.ip_address {
                    ip.parse::<IpAddr>().map_err(|_| {
                        DiagError::validation(format!("ip_address '{}' is not a valid IP address", ip))
                    })?;
                }
            }
            CollectorSpec::IOPS(s) => {
                check_range(s.collection_time, MIN_COLLECTION_TIME, MAX_TIME, "collection_time")?;
            }
            CollectorSpec::Periodic(s) => {
                check_range(s.sample_count, 1, MAX_COUNT, "sampleCount")?;
                check_range(s.interval, 0.01, MAX_TIME, "interval")?;
            }
            CollectorSpec::ResourceMonitor(s) => {
                if s.resource_monitor_trackers.is_empty() {
                    return Err(DiagError::validation("resource_monitor_trackers must not be empty"));
                }
                for tracker in &s.resource_monitor_trackers {
                    tracker.validate()?;
                }
                check_range(s.sleep_time, 0.01, MAX_TIME, "sleep_time")?;
            }
            CollectorSpec::LogMonitor(s) => {
                check_string_value(&s.selected_file, "selectedFile")?;
                check_regex(&s.regex, "regex")?;
            }
            CollectorSpec::SearchDebug(s) => check_regex(&s.search_regex, "search_regex")?,
        }
        for child in self.children() {
            child.validate()?;
        }
        Ok(())
    }

    /// Construct the live collector tree. Does not validate.
    pub fn build(&self) -> Result<Arc<dyn Collector>> {
        let collector: Arc<dyn Collector> = match self {
            CollectorSpec::PS(s) => Arc::new(ToolCollector::new(ToolKind::Ps, s.state)),
            CollectorSpec::NetStat(s) => Arc::new(ToolCollector::new(ToolKind::NetStat, s.state)),
            CollectorSpec::LSOF(s) => Arc::new(ToolCollector::new(
                ToolKind::Lsof { process: s.process.clone() },
                s.state,
            )),
            CollectorSpec::StackTrace(s) => Arc::new(ToolCollector::new(
                ToolKind::StackTrace { process: s.process.clone() },
                s.state,
            )),
            CollectorSpec::SystemCallTrace(s) => Arc::new(ToolCollector::new(
                ToolKind::SystemCallTrace {
                    process: s.process.clone(),
                    collection_time: s.collection_time,
                },
                s.state,
            )),
            CollectorSpec::NetworkPacket(s) => Arc::new(ToolCollector::new(
                ToolKind::NetworkPacket {
                    collection_time: s.collection_time,
                    ip_address: s.ip_address.clone(),
                    port: s.port,
                },
                s.state,
            )),
            CollectorSpec::IOPS(s) => Arc::new(ToolCollector::new(
                ToolKind::Iops { collection_time: s.collection_time },
                s.state,
            )),
            CollectorSpec::Diag(s) => Arc::new(Diag::new(s.state)),
            CollectorSpec::Periodic(s) => Arc::new(Periodic::from_spec(s)?),
            CollectorSpec::ResourceMonitor(s) => Arc::new(ResourceMonitor::from_spec(s)?),
            CollectorSpec::LogMonitor(s) => Arc::new(LogMonitor::from_spec(s)?),
            CollectorSpec::SearchDebug(s) => Arc::new(SearchDebug::from_spec(s)?),
        };
        Ok(collector)
    }

    pub fn build_all(specs: &[CollectorSpec]) -> Result<Vec<Arc<dyn Collector>>> {
        specs.iter().map(CollectorSpec::build).collect()
    }

    /// Typed decode, validate, then build
    pub fn decode(value: serde_json::Value) -> Result<Arc<dyn Collector>> {
        let spec: CollectorSpec =
            serde_json::from_value(value).map_err(|e| DiagError::schema(e.to_string()))?;
        spec.validate()?;
        spec.build()
    }
}
