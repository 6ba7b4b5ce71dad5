use crate::core::process::ProcessDescription;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exclusive-use system resource held by a collector while it runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    pub tool: String,
    #[serde(default)]
    pub process: Option<ProcessDescription>,
}

impl Resource {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into(), process: None }
    }

    pub fn for_process(tool: impl Into<String>, process: ProcessDescription) -> Self {
        Self { tool: tool.into(), process: Some(process) }
    }

    /// Same tool, and either side unqualified or both on the same process
    pub fn conflicts_with(&self, other: &Resource) -> bool {
        if self.tool != other.tool {
            return false;
        }
        match (&self.process, &other.process) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.process {
            Some(process) => write!(f, "{}({})", self.tool, process),
            None => f.write_str(&self.tool),
        }
    }
}

/// Space separated textual form of a resource set, or `none`
pub fn describe(resources: &[Resource]) -> String {
    if resources.is_empty() {
        return "none".to_string();
    }
    resources
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::Process;

    fn proc(pid: u32) -> ProcessDescription {
        Process::new("splunkd", pid, 1, "splunkd search", "splunk search runner").into()
    }

    #[test]
    fn test_same_tool_same_process_conflicts() {
        let a = Resource::for_process("ptrace", proc(100));
        let b = Resource::for_process("ptrace", proc(100));
        assert!(a.conflicts_with(&b));
        assert!(b.conflicts_with(&a));
    }

    #[test]
    fn test_same_tool_other_process_does_not_conflict() {
        let a = Resource::for_process("ptrace", proc(100));
        let b = Resource::for_process("ptrace", proc(200));
        assert!(!a.conflicts_with(&b));
        assert!(!b.conflicts_with(&a));
    }

    #[test]
    fn test_unqualified_conflicts_with_any_process() {
        let bare = Resource::new("ptrace");
        let qualified = Resource::for_process("ptrace", proc(7));
        assert!(bare.conflicts_with(&qualified));
        assert!(qualified.conflicts_with(&bare));
        assert!(!bare.conflicts_with(&Resource::new("lsof")));
    }

    #[test]
    fn test_textual_form() {
        assert_eq!(Resource::new("netstat").to_string(), "netstat");
        assert!(Resource::for_process("lsof", proc(3)).to_string().starts_with("lsof(splunkd (3)"));
        assert_eq!(describe(&[]), "none");
    }
}
