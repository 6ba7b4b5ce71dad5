//! Small helpers shared by the run lifecycle and the triggers.

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::core::collector::{Collector, CollectorState};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%Hh%Mm%Ss%6fus";

/// Name of this host, as recorded in task ids and run records
pub static SERVER_NAME: Lazy<String> =
    Lazy::new(|| sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string()));

/// Filesystem-safe timestamp of `at`
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Filesystem-safe timestamp of the current instant
pub fn build_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Timestamp of an epoch-seconds value
pub fn timestamp_from_epoch(epoch: f64) -> String {
    let secs = epoch.floor() as i64;
    let nanos = ((epoch - epoch.floor()) * 1e9) as u32;
    let at = Utc.timestamp_opt(secs, nanos).single().unwrap_or_else(Utc::now);
    format_timestamp(at)
}

/// Seconds since the epoch, with sub-second precision
pub fn epoch_now() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6
}

/// Hex SHA-256 of `name`
pub fn hash_name(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Sleep up to `total`, waking early once `collector` is aborting.
///
/// Returns true when the sleep was cut short by an abort request.
pub fn sleep_unless_aborted(collector: &dyn Collector, total: Duration) -> bool {
    collector.wait_for_state(CollectorState::Aborting, Some(total)) >= CollectorState::Aborting
}
