//! Outcome taxonomy for collectors and the combinator used to merge them.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultStatus {
    Success,
    #[serde(rename = "Partial Success")]
    PartialSuccess,
    Failure,
    Aborted,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "Success",
            ResultStatus::PartialSuccess => "Partial Success",
            ResultStatus::Failure => "Failure",
            ResultStatus::Aborted => "Aborted",
        }
    }

    /// Merge two outcomes: equal stays equal, Aborted dominates, anything else is partial
    pub fn combine(self, other: ResultStatus) -> ResultStatus {
        if self == other {
            self
        } else if self == ResultStatus::Aborted || other == ResultStatus::Aborted {
            ResultStatus::Aborted
        } else {
            ResultStatus::PartialSuccess
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one collector run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorResult {
    pub status: ResultStatus,
    pub message: String,
}

impl CollectorResult {
    fn new(status: ResultStatus, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn success(message: impl Into<String>) -> Self {
        let result = Self::new(ResultStatus::Success, message);
        if !result.message.is_empty() {
            log::info!("{}", result.message);
        }
        result
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let result = Self::new(ResultStatus::Failure, message);
        if !result.message.is_empty() {
            log::error!("{}", result.message);
        }
        result
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        let result = Self::new(ResultStatus::Aborted, message);
        if !result.message.is_empty() {
            log::info!("{}", result.message);
        }
        result
    }

    /// Failure carrying the text of an unexpected error
    pub fn exception(error: impl fmt::Display, message: impl Into<String>) -> Self {
        let message = message.into();
        log::error!("{} exception: {}", message, error);
        Self::new(ResultStatus::Failure, format!("{}: {}", message, error))
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    pub fn is_failure(&self) -> bool {
        self.status == ResultStatus::Failure
    }

    pub fn is_aborted(&self) -> bool {
        self.status == ResultStatus::Aborted
    }

    pub fn status_string(&self) -> &'static str {
        self.status.as_str()
    }
}

/// Folds any number of results into one.
///
/// An empty aggregate reports Success.
#[derive(Debug, Clone, Default)]
pub struct AggregatedCollectorResult {
    status: Option<ResultStatus>,
    messages: Vec<String>,
}

impl AggregatedCollectorResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_result(&mut self, result: &CollectorResult) {
        self.status = Some(match self.status {
            None => result.status,
            Some(current) => current.combine(result.status),
        });
        if !result.message.is_empty() {
            self.messages.push(result.message.clone());
        }
    }

    pub fn status(&self) -> ResultStatus {
        self.status.unwrap_or(ResultStatus::Success)
    }

    pub fn result(&self) -> CollectorResult {
        CollectorResult {
            status: self.status(),
            message: self.messages.join("\n"),
        }
    }
}

impl<'a> FromIterator<&'a CollectorResult> for AggregatedCollectorResult {
    fn from_iter<I: IntoIterator<Item = &'a CollectorResult>>(iter: I) -> Self {
        let mut aggregate = AggregatedCollectorResult::new();
        for result in iter {
            aggregate.add_result(result);
        }
        aggregate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn of(statuses: &[ResultStatus]) -> ResultStatus {
        statuses
            .iter()
            .map(|s| CollectorResult { status: *s, message: String::new() })
            .collect::<Vec<_>>()
            .iter()
            .collect::<AggregatedCollectorResult>()
            .status()
    }

    #[test]
    fn test_empty_aggregate_is_success() {
        assert_eq!(of(&[]), ResultStatus::Success);
    }

    #[test]
    fn test_aggregation_law() {
        use ResultStatus::*;
        assert_eq!(of(&[Success, Success]), Success);
        assert_eq!(of(&[Success, Failure]), PartialSuccess);
        assert_eq!(of(&[Success, Aborted]), Aborted);
        assert_eq!(of(&[Failure, Failure]), Failure);
        assert_eq!(of(&[PartialSuccess, Failure, Aborted]), Aborted);
    }

    #[test]
    fn test_aggregation_is_order_independent() {
        use ResultStatus::*;
        let all = [Success, PartialSuccess, Failure, Aborted];
        for a in all {
            for b in all {
                for c in all {
                    let left = a.combine(b).combine(c);
                    let right = a.combine(b.combine(c));
                    assert_eq!(left, right, "{:?} {:?} {:?}", a, b, c);
                    assert_eq!(a.combine(b), b.combine(a));
                }
            }
        }
    }

    #[test]
    fn test_messages_are_joined() {
        let mut aggregate = AggregatedCollectorResult::new();
        aggregate.add_result(&CollectorResult::success("first"));
        aggregate.add_result(&CollectorResult::failure("second"));
        let result = aggregate.result();
        assert_eq!(result.status, ResultStatus::PartialSuccess);
        assert_eq!(result.message, "first\nsecond");
    }
}
