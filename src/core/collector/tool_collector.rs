//! Leaf collectors wrapping one external diagnostic tool each.

use super::spec::{NetworkPacketSpec, ProcessSpec, StateSpec, TimedProcessSpec, TimedSpec};
use super::{
    AggregatedCollectorResult, Collector, CollectorResult, CollectorSpec, CollectorState,
    CollectorType, Resource, RunContext, StateMachine,
};
use crate::core::process::ProcessDescription;
use crate::core::tools::{ExitCode, ToolRunner, ToolStatus};
use crate::error::Result;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which tool a [`ToolCollector`] drives, with its per-tool settings
#[derive(Debug, Clone, PartialEq)]
pub enum ToolKind {
    Ps,
    NetStat,
    Lsof {
        process: ProcessDescription,
    },
    StackTrace {
        process: ProcessDescription,
    },
    SystemCallTrace {
        process: ProcessDescription,
        collection_time: f64,
    },
    NetworkPacket {
        collection_time: f64,
        ip_address: Option<String>,
        port: Option<u32>,
    },
    Iops {
        collection_time: f64,
    },
}

impl ToolKind {
    pub fn class_name(&self) -> &'static str {
        match self {
            ToolKind::Ps => "PS",
            ToolKind::NetStat => "NetStat",
            ToolKind::Lsof { .. } => "LSOF",
            ToolKind::StackTrace { .. } => "StackTrace",
            ToolKind::SystemCallTrace { .. } => "SystemCallTrace",
            ToolKind::NetworkPacket { .. } => "NetworkPacket",
            ToolKind::Iops { .. } => "IOPS",
        }
    }

    /// Executable looked up by the tool availability manager
    pub fn tool_name(&self) -> &'static str {
        match self {
            ToolKind::Ps => "ps",
            ToolKind::NetStat => "netstat",
            ToolKind::Lsof { .. } => "lsof",
            ToolKind::StackTrace { .. } => "eu-stack",
            ToolKind::SystemCallTrace { .. } => "strace",
            ToolKind::NetworkPacket { .. } => "tcpdump",
            ToolKind::Iops { .. } => "iostat",
        }
    }

    pub fn collector_type(&self) -> CollectorType {
        match self {
            ToolKind::SystemCallTrace { .. }
            | ToolKind::NetworkPacket { .. }
            | ToolKind::Iops { .. } => CollectorType::Continuous,
            _ => CollectorType::Snapshot,
        }
    }

    /// Exit codes counted as success; `None` means "still running at the deadline"
    pub fn valid_exit_codes(&self) -> &'static [ExitCode] {
        match self {
            ToolKind::NetStat => &[Some(0)],
            ToolKind::StackTrace { .. } => &[Some(0), Some(1)],
            _ => &[Some(0), None],
        }
    }

    pub fn process(&self) -> Option<&ProcessDescription> {
        match self {
            ToolKind::Lsof { process }
            | ToolKind::StackTrace { process }
            | ToolKind::SystemCallTrace { process, .. } => Some(process),
            _ => None,
        }
    }

    fn set_process(&mut self, target: ProcessDescription) {
        match self {
            ToolKind::Lsof { process }
            | ToolKind::StackTrace { process }
            | ToolKind::SystemCallTrace { process, .. } => *process = target,
            _ => {}
        }
    }

    fn collection_time(&self) -> Option<f64> {
        match self {
            ToolKind::SystemCallTrace { collection_time, .. }
            | ToolKind::NetworkPacket { collection_time, .. }
            | ToolKind::Iops { collection_time } => Some(*collection_time),
            _ => None,
        }
    }

    fn required_resources(&self) -> Vec<Resource> {
        match self {
            ToolKind::Ps => vec![Resource::new("ps")],
            ToolKind::NetStat => vec![Resource::new("netstat")],
            ToolKind::Lsof { process } => vec![Resource::for_process("lsof", process.clone())],
            ToolKind::StackTrace { process } | ToolKind::SystemCallTrace { process, .. } => {
                vec![Resource::for_process("ptrace", process.clone())]
            }
            ToolKind::NetworkPacket { .. } => vec![Resource::new("tcpdump")],
            ToolKind::Iops { .. } => vec![Resource::new("iostat")],
        }
    }
}

fn append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn with_ext(base: &Path, ext: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn code_text(code: ExitCode) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "None".to_string())
}

/// Collector running a single tool invocation (or a short fixed sequence)
pub struct ToolCollector {
    machine: StateMachine,
    kind: RwLock<ToolKind>,
}

impl ToolCollector {
    pub fn new(kind: ToolKind, state: CollectorState) -> Self {
        Self {
            machine: StateMachine::new(state),
            kind: RwLock::new(kind),
        }
    }

    pub fn kind(&self) -> ToolKind {
        self.kind.read().clone()
    }

    fn tool_name(&self) -> &'static str {
        self.kind.read().tool_name()
    }

    /// Re-resolve the stored process description against the live table
    fn preflight(&self, ctx: &RunContext) -> std::result::Result<ProcessDescription, String> {
        let wanted = match self.process() {
            Some(process) => process,
            None => return Err(format!("{} has no target process", self.class_name())),
        };
        match ctx.session.process_lister().get_best_running_match(&wanted) {
            Some(best) => {
                self.kind.write().set_process(best.clone());
                Ok(best)
            }
            None => Err(format!("Can't read data for process={}: process not running", wanted)),
        }
    }

    fn runner(&self, ctx: &RunContext) -> ToolRunner {
        let config = ctx.session.config();
        let window = self
            .kind
            .read()
            .collection_time()
            .map(Duration::from_secs_f64)
            .unwrap_or_else(|| config.startup_timeout());
        ToolRunner::new(window, config.poll_interval())
    }

    /// Run `program args`, sending stdout to `<base>.<out_ext>` and stderr to `<base>.err`
    fn run_tool(
        &self,
        ctx: &RunContext,
        program: &Path,
        args: &[String],
        base: &Path,
        out_ext: &str,
    ) -> Result<(ExitCode, CollectorResult)> {
        let stdout = append(&with_ext(base, out_ext))?;
        let stderr = append(&with_ext(base, "err"))?;
        let tool = self.tool_name();
        let code = self
            .runner(ctx)
            .run(program, args, stdout, stderr, &|| self.state() == CollectorState::Aborting)?;
        log::debug!("returnCode for {}: {}", tool, code_text(code));

        let result = if !self.kind.read().valid_exit_codes().contains(&code) {
            CollectorResult::failure(format!(
                "Error occured for collector {} while running `{} {}`\nProcess finished with code={}",
                tool,
                program.display(),
                args.join(" "),
                code_text(code)
            ))
        } else if self.state() == CollectorState::Aborting {
            CollectorResult::aborted(format!("{} aborted by user", tool))
        } else {
            CollectorResult::success(format!("{} execution completed successfully", tool))
        };
        Ok((code, result))
    }

    fn collect_ps(&self, ctx: &RunContext, program: &Path) -> Result<CollectorResult> {
        let base = ctx.output_dir.join(format!("ps{}", ctx.suffix));
        let args = vec!["aux".to_string(), "-ejL".to_string()];
        Ok(self.run_tool(ctx, program, &args, &base, "csv")?.1)
    }

    fn collect_netstat(&self, ctx: &RunContext, program: &Path) -> Result<CollectorResult> {
        let runs: [(&str, &[&str]); 2] = [
            ("statistics", &["-s"]),
            ("connections", &["-a", "-n", "-v", "-e", "-p"]),
        ];
        let mut aggregate = AggregatedCollectorResult::new();
        for (prefix, args) in runs {
            let base = ctx.output_dir.join(format!("netstat_{}{}", prefix, ctx.suffix));
            let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            let (_, result) = self.run_tool(ctx, program, &args, &base, "out")?;
            aggregate.add_result(&result);
        }
        Ok(aggregate.result())
    }

    fn collect_lsof(&self, ctx: &RunContext, program: &Path, pid: u32) -> Result<CollectorResult> {
        let base = ctx.output_dir.join(format!("lsof_{}{}", pid, ctx.suffix));
        let mut args: Vec<String> = ["-s", "-V", "-n", "-a", "-K", "-p"]
            .iter()
            .map(|a| a.to_string())
            .collect();
        args.push(pid.to_string());

        let (code, result) = self.run_tool(ctx, program, &args, &base, "out")?;
        // older lsof builds do not know -K
        let rejected_k = code != Some(0)
            && fs::read_to_string(with_ext(&base, "err"))
                .map(|err| err.contains("-K"))
                .unwrap_or(false);
        if result.is_failure() && rejected_k {
            log::info!("lsof rejected -K, retrying without it");
            args.retain(|a| a != "-K");
            return Ok(self.run_tool(ctx, program, &args, &base, "out")?.1);
        }
        Ok(result)
    }

    /// Kernel stacks and thread status from procfs; failures only warn
    fn collect_proc(&self, ctx: &RunContext, pid: u32) -> std::io::Result<()> {
        let base = PathBuf::from(format!("/proc/{}/task", pid));
        let mut kernel = File::create(ctx.output_dir.join(format!("kernelstack_{}{}.out", pid, ctx.suffix)))?;
        let mut status = File::create(ctx.output_dir.join(format!("status_{}{}.out", pid, ctx.suffix)))?;
        for entry in fs::read_dir(&base)? {
            let task = entry?.file_name().to_string_lossy().to_string();
            writeln!(kernel, "Thread LWP {}", task)?;
            kernel.write_all(fs::read_to_string(base.join(&task).join("stack"))?.as_bytes())?;
            writeln!(status, "Thread LWP {}", task)?;
            status.write_all(fs::read_to_string(base.join(&task).join("status"))?.as_bytes())?;
        }
        Ok(())
    }

    fn collect_stack(&self, ctx: &RunContext, program: &Path, pid: u32) -> Result<CollectorResult> {
        if let Err(e) = self.collect_proc(ctx, pid) {
            log::warn!("Error collecting data from procfs for pid={}: {}", pid, e);
        }
        let base = ctx.output_dir.join(format!("eustack_{}{}", pid, ctx.suffix));
        let args: Vec<String> = vec!["-i".into(), "-l".into(), "-p".into(), pid.to_string()];
        let (_, result) = self.run_tool(ctx, program, &args, &base, "out")?;
        if result.is_failure() {
            log::error!(
                "{} failed. This may be due to ptrace permissions.",
                self.tool_name()
            );
        }
        Ok(result)
    }

    fn collect_strace(&self, ctx: &RunContext, program: &Path, pid: u32) -> Result<CollectorResult> {
        let base = ctx.output_dir.join(format!("strace_{}{}", pid, ctx.suffix));
        let args: Vec<String> = vec![
            "-ttt".into(),
            "-T".into(),
            "-f".into(),
            "-x".into(),
            "-s0".into(),
            "-p".into(),
            pid.to_string(),
            "-o".into(),
            base.to_string_lossy().to_string(),
        ];
        Ok(self.run_tool(ctx, program, &args, &base, "out")?.1)
    }

    fn collect_tcpdump(
        &self,
        ctx: &RunContext,
        program: &Path,
        ip_address: Option<&str>,
        port: Option<u32>,
    ) -> Result<CollectorResult> {
        let port_text = port.map(|p| p.to_string());
        let base = ctx.output_dir.join(format!(
            "tcpdump_{}_{}{}",
            ip_address.unwrap_or("All"),
            port_text.as_deref().unwrap_or("All"),
            ctx.suffix
        ));

        let mut filters = Vec::new();
        if let Some(ip) = ip_address {
            filters.push(format!("dst host {}", ip));
        }
        if let Some(port) = port_text {
            filters.push(format!("dst port {}", port));
        }

        let mut args: Vec<String> = vec![
            "-i".into(),
            "any".into(),
            "-w".into(),
            with_ext(&base, "pcap").to_string_lossy().to_string(),
        ];
        if !filters.is_empty() {
            args.push(filters.join(" and "));
        }
        Ok(self.run_tool(ctx, program, &args, &base, "out")?.1)
    }

    /// Extended device statistics once per second for the whole window
    fn collect_iops(&self, ctx: &RunContext, program: &Path, collection_time: f64) -> Result<CollectorResult> {
        let base = ctx.output_dir.join(format!("iops{}", ctx.suffix));
        Ok(self.run_tool(ctx, program, &iostat_args(collection_time), &base, "out")?.1)
    }
}

fn iostat_args(collection_time: f64) -> Vec<String> {
    let count = collection_time.ceil().max(1.0) as u64;
    vec!["-x".into(), "1".into(), count.to_string()]
}

impl Collector for ToolCollector {
    fn machine(&self) -> &StateMachine {
        &self.machine
    }

    fn class_name(&self) -> &'static str {
        self.kind.read().class_name()
    }

    fn collector_type(&self) -> CollectorType {
        self.kind.read().collector_type()
    }

    fn required_resources(&self) -> Vec<Resource> {
        self.kind.read().required_resources()
    }

    fn process(&self) -> Option<ProcessDescription> {
        self.kind.read().process().cloned()
    }

    fn retarget_process(&self, process: &ProcessDescription) {
        self.kind.write().set_process(process.clone());
    }

    fn collect_impl(&self, ctx: &RunContext) -> Result<CollectorResult> {
        let tools = ctx.session.tools();
        let tool = self.tool_name();
        log::info!(
            "Starting {} collector: output_dir={} suffix='{}'",
            self.class_name(),
            ctx.output_dir.display(),
            ctx.suffix
        );

        let target = if self.process().is_some() {
            match self.preflight(ctx) {
                Ok(process) => Some(process),
                Err(message) => return Ok(CollectorResult::failure(message)),
            }
        } else {
            None
        };

        let program = match tools.find(tool) {
            Ok(path) => path,
            Err(message) => {
                tools.set_available(tool, ToolStatus::Message(message.clone()));
                return Ok(CollectorResult::failure(message));
            }
        };

        self.promote_state(CollectorState::Collecting);
        let pid = target.as_ref().map(|p| p.pid()).unwrap_or_default();
        let kind = self.kind();
        let result = match &kind {
            ToolKind::Ps => self.collect_ps(ctx, &program),
            ToolKind::NetStat => self.collect_netstat(ctx, &program),
            ToolKind::Lsof { .. } => self.collect_lsof(ctx, &program, pid),
            ToolKind::StackTrace { .. } => self.collect_stack(ctx, &program, pid),
            ToolKind::SystemCallTrace { .. } => self.collect_strace(ctx, &program, pid),
            ToolKind::NetworkPacket { ip_address, port, .. } => {
                self.collect_tcpdump(ctx, &program, ip_address.as_deref(), *port)
            }
            ToolKind::Iops { collection_time } => self.collect_iops(ctx, &program, *collection_time),
        };
        let result = match result {
            Ok(result) => result,
            Err(e) => CollectorResult::exception(
                e,
                format!(
                    "Error collecting {}, please confirm the {} command is installed and runnable",
                    tool, tool
                ),
            ),
        };

        let worked = result.is_success() || self.state() == CollectorState::Aborting;
        let status = if worked {
            ToolStatus::Flag(true)
        } else {
            ToolStatus::Message(result.message.clone())
        };
        tools.set_available(tool, status);
        Ok(result)
    }

    fn to_spec(&self) -> CollectorSpec {
        let state = self.state();
        match self.kind() {
            ToolKind::Ps => CollectorSpec::PS(StateSpec { state }),
            ToolKind::NetStat => CollectorSpec::NetStat(StateSpec { state }),
            ToolKind::Lsof { process } => CollectorSpec::LSOF(ProcessSpec { process, state }),
            ToolKind::StackTrace { process } => CollectorSpec::StackTrace(ProcessSpec { process, state }),
            ToolKind::SystemCallTrace { process, collection_time } => {
                CollectorSpec::SystemCallTrace(TimedProcessSpec { collection_time, process, state })
            }
            ToolKind::NetworkPacket { collection_time, ip_address, port } => {
                CollectorSpec::NetworkPacket(NetworkPacketSpec { collection_time, ip_address, port, state })
            }
            ToolKind::Iops { collection_time } => CollectorSpec::IOPS(TimedSpec { collection_time, state }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::{Process, TYPE_SERVER};
    use crate::core::session::tests::test_session;
    use tempfile::TempDir;

    fn server(pid: u32) -> ProcessDescription {
        Process::new("splunkd", pid, 1, "splunkd -p 8089 start", TYPE_SERVER).into()
    }

    #[test]
    fn test_resources_per_tool() {
        let strace = ToolCollector::new(
            ToolKind::SystemCallTrace { process: server(7), collection_time: 30.0 },
            CollectorState::Waiting,
        );
        let stack = ToolCollector::new(ToolKind::StackTrace { process: server(7) }, CollectorState::Waiting);
        assert_eq!(strace.required_resources(), stack.required_resources());
        assert_eq!(strace.collector_type(), CollectorType::Continuous);
        assert_eq!(stack.collector_type(), CollectorType::Snapshot);
        assert_eq!(
            ToolCollector::new(ToolKind::Ps, CollectorState::Waiting).required_resources(),
            vec![Resource::new("ps")]
        );
    }

    #[test]
    fn test_iops_runs_iostat_for_the_whole_window() {
        let iops = ToolCollector::new(ToolKind::Iops { collection_time: 12.5 }, CollectorState::Waiting);
        assert_eq!(iops.class_name(), "IOPS");
        assert_eq!(iops.collector_type(), CollectorType::Continuous);
        assert_eq!(iops.required_resources(), vec![Resource::new("iostat")]);
        assert!(iops.process().is_none());
        assert!(iops.kind().valid_exit_codes().contains(&None));
        assert_eq!(iostat_args(12.5), vec!["-x", "1", "13"]);
    }

    #[test]
    fn test_missing_process_fails_preflight_without_collecting() {
        let dir = TempDir::new().unwrap();
        let ctx = RunContext::new(dir.path(), "", test_session(dir.path()));
        let lsof = ToolCollector::new(ToolKind::Lsof { process: server(4242) }, CollectorState::Waiting);
        let result = lsof.collect(&ctx);
        assert!(result.is_failure());
        assert!(result.message.contains("process not running"));
        assert_eq!(lsof.state(), CollectorState::Failure);
        assert!(ctx.session.tools().status("lsof").is_none());
    }

    #[test]
    fn test_retarget_updates_spec() {
        let stack = ToolCollector::new(ToolKind::StackTrace { process: server(0) }, CollectorState::Waiting);
        stack.retarget_process(&server(99));
        match stack.to_spec() {
            CollectorSpec::StackTrace(spec) => assert_eq!(spec.process.pid(), 99),
            other => panic!("unexpected spec {:?}", other),
        }
    }
}
