//! Full-system `splunk diag` bundle. Expensive, so tasks run it last.

use super::spec::StateSpec;
use super::{Collector, CollectorResult, CollectorSpec, CollectorState, CollectorType, Resource, RunContext, StateMachine};
use crate::core::tools::ToolRunner;
use crate::error::Result;
use std::fs::{self, File};
use std::time::Duration;

/// Longest a diag run may take
pub const DIAG_TIMEOUT: Duration = Duration::from_secs(15 * 60);

const DIAG_POLL: Duration = Duration::from_secs(1);

pub struct Diag {
    machine: StateMachine,
}

impl Diag {
    pub fn new(state: CollectorState) -> Self {
        Self { machine: StateMachine::new(state) }
    }
}

impl Collector for Diag {
    fn machine(&self) -> &StateMachine {
        &self.machine
    }

    fn class_name(&self) -> &'static str {
        "Diag"
    }

    fn collector_type(&self) -> CollectorType {
        CollectorType::Snapshot
    }

    fn required_resources(&self) -> Vec<Resource> {
        Vec::new()
    }

    fn is_deferred(&self) -> bool {
        true
    }

    fn label(&self) -> String {
        "Splunk Diag".to_string()
    }

    fn collect_impl(&self, ctx: &RunContext) -> Result<CollectorResult> {
        self.promote_state(CollectorState::Collecting);
        let program = ctx.session.config().splunk_home.join("bin").join("splunk");
        let base = ctx.output_dir.join(format!("diag{}", ctx.suffix));
        let args: Vec<String> = vec![
            "diag".into(),
            "--log-age=0".into(),
            "--nologin".into(),
            format!("--diag-name={}", base.display()),
            "--disable=rest".into(),
        ];
        log::info!("Starting Diag collector, output_dir={} suffix='{}'", ctx.output_dir.display(), ctx.suffix);

        let out_path = base.with_extension("out");
        let err_path = base.with_extension("err");
        let code = ToolRunner::new(DIAG_TIMEOUT, DIAG_POLL).run(
            &program,
            &args,
            File::create(&out_path)?,
            File::create(&err_path)?,
            &|| self.state() == CollectorState::Aborting,
        )?;

        let command = format!("{} {}", program.display(), args.join(" "));
        let Some(code) = code else {
            if self.state() == CollectorState::Aborting {
                return Ok(CollectorResult::aborted("Splunk diag aborted by user"));
            }
            return Ok(CollectorResult::failure(format!(
                "Splunk diag took too long, aborted process={} output_dir={}",
                command,
                ctx.output_dir.display()
            )));
        };

        let stdout = fs::read_to_string(&out_path).unwrap_or_default();
        let stderr = fs::read_to_string(&err_path).unwrap_or_default();
        let message = format!(
            "Process finished with code={} stdout=\"{}\" stderr=\"{}\"",
            code,
            stdout.trim(),
            stderr.trim()
        );
        if code != 0 {
            return Ok(CollectorResult::failure(message));
        }
        Ok(CollectorResult::success(message))
    }

    fn to_spec(&self) -> CollectorSpec {
        CollectorSpec::Diag(StateSpec { state: self.state() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::tests::test_session;
    use tempfile::TempDir;

    #[test]
    fn test_missing_splunk_binary_fails() {
        let dir = TempDir::new().unwrap();
        let ctx = RunContext::new(dir.path(), "_x", test_session(dir.path()));
        let diag = Diag::new(CollectorState::Waiting);
        assert!(diag.is_deferred());
        let result = diag.collect(&ctx);
        assert!(result.is_failure());
        assert_eq!(diag.state(), CollectorState::Failure);
    }
}
