//! Subprocess execution with polling, graceful termination and kill escalation.

use std::fs::File;
use std::io;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Exit code of a tool run; `None` when the process was still running at the deadline
pub type ExitCode = Option<i32>;

/// Grace period between SIGTERM and SIGKILL
pub const TERMINATE_GRACE: Duration = Duration::from_secs(3);

const TERMINATE_POLL: Duration = Duration::from_millis(100);

fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    status.code().unwrap_or(-1)
}

/// Runs one external tool for at most `collection_time`
#[derive(Debug, Clone)]
pub struct ToolRunner {
    pub collection_time: Duration,
    pub poll_interval: Duration,
}

impl ToolRunner {
    pub fn new(collection_time: Duration, poll_interval: Duration) -> Self {
        Self {
            collection_time,
            poll_interval: poll_interval.max(Duration::from_millis(10)),
        }
    }

    /// Spawn `program`, poll it until it exits, the window closes or
    /// `should_stop` returns true. A process still alive at that point is
    /// terminated and its code reported as `None`.
    pub fn run(
        &self,
        program: &Path,
        args: &[String],
        stdout: File,
        stderr: File,
        should_stop: &dyn Fn() -> bool,
    ) -> io::Result<ExitCode> {
        log::debug!("Running `{} {}`", program.display(), args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()?;

        let code = Self::wait_for_completion(&mut child, self.collection_time, self.poll_interval, should_stop)?;
        if code.is_none() {
            Self::terminate(&mut child, program)?;
        }
        Ok(code)
    }

    fn wait_for_completion(
        child: &mut Child,
        limit: Duration,
        poll: Duration,
        should_stop: &dyn Fn() -> bool,
    ) -> io::Result<ExitCode> {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            thread::sleep(poll);
            if let Some(status) = child.try_wait()? {
                return Ok(Some(exit_code(status)));
            }
            if should_stop() {
                return Ok(None);
            }
        }
        Ok(None)
    }

    fn terminate(child: &mut Child, program: &Path) -> io::Result<()> {
        log::info!("Terminating collector {}", program.display());
        #[cfg(unix)]
        {
            let pid = child.id() as libc::pid_t;
            // SAFETY: pid belongs to a child we spawned and have not reaped
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            child.kill()?;
        }

        let exited = Self::wait_for_completion(child, TERMINATE_GRACE, TERMINATE_POLL, &|| false)?;
        if exited.is_none() {
            log::info!("Force terminating collector {}", program.display());
            child.kill()?;
            child.wait()?;
            log::info!("Force killed collector to avoid excessive collection");
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn files(dir: &TempDir) -> (File, File) {
        (
            File::create(dir.path().join("out")).unwrap(),
            File::create(dir.path().join("err")).unwrap(),
        )
    }

    #[test]
    fn test_quick_command_reports_exit_code() {
        let dir = TempDir::new().unwrap();
        let (out, err) = files(&dir);
        let runner = ToolRunner::new(Duration::from_secs(5), Duration::from_millis(20));
        let code = runner
            .run(Path::new("/bin/sh"), &["-c".into(), "echo hi; exit 3".into()], out, err, &|| false)
            .unwrap();
        assert_eq!(code, Some(3));
        assert_eq!(std::fs::read_to_string(dir.path().join("out")).unwrap(), "hi\n");
    }

    #[test]
    fn test_long_command_is_terminated_at_deadline() {
        let dir = TempDir::new().unwrap();
        let (out, err) = files(&dir);
        let runner = ToolRunner::new(Duration::from_millis(200), Duration::from_millis(20));
        let started = Instant::now();
        let code = runner
            .run(Path::new("/bin/sleep"), &["30".into()], out, err, &|| false)
            .unwrap();
        assert_eq!(code, None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_stop_request_ends_run_early() {
        let dir = TempDir::new().unwrap();
        let (out, err) = files(&dir);
        let runner = ToolRunner::new(Duration::from_secs(30), Duration::from_millis(20));
        let started = Instant::now();
        let code = runner
            .run(Path::new("/bin/sleep"), &["30".into()], out, err, &|| true)
            .unwrap();
        assert_eq!(code, None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
