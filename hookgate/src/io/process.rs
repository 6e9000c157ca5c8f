//! Bounded child-process runs for the test-suite finalizer.

use std::io::{self, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Wall-clock and memory limits for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub timeout: Duration,
    /// Bytes kept per stream; the rest is drained and counted.
    pub output_limit_bytes: usize,
}

/// One captured stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: u64,
}

impl Captured {
    fn write_section(&self, out: &mut String, heading: &str) {
        out.push_str(&format!("--- {heading} ---\n"));
        out.push_str(&String::from_utf8_lossy(&self.bytes));
        if self.dropped > 0 {
            out.push_str(&format!("\n[{} bytes dropped]\n", self.dropped));
        }
    }
}

/// Result of a bounded run.
#[derive(Debug)]
pub struct BoundedRun {
    pub status: ExitStatus,
    pub timed_out: bool,
    pub stdout: Captured,
    pub stderr: Captured,
}

impl BoundedRun {
    pub fn passed(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Plain-text report written to the test results directory.
    pub fn report(&self, command_line: &str) -> String {
        let exit = self
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |code| code.to_string());
        let mut out = format!(
            "command: {command_line}\nexit: {exit}\ntimed_out: {}\n\n",
            self.timed_out
        );
        self.stdout.write_section(&mut out, "stdout");
        out.push('\n');
        self.stderr.write_section(&mut out, "stderr");
        out
    }
}

/// Run `cmd` to completion or until the timeout, then kill it.
///
/// Both pipes are drained on their own threads so a chatty child never
/// blocks on a full pipe while we wait.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs()))]
pub fn run_bounded(mut cmd: Command, limits: RunLimits) -> Result<BoundedRun> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().context("spawn command")?;

    let limit = limits.output_limit_bytes as u64;
    let stdout = drain(child.stdout.take(), limit)?;
    let stderr = drain(child.stderr.take(), limit)?;

    let (status, timed_out) = match child.wait_timeout(limits.timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!("command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("reap command")?, true)
        }
    };

    let run = BoundedRun {
        status,
        timed_out,
        stdout: collect(stdout).context("stdout")?,
        stderr: collect(stderr).context("stderr")?,
    };
    debug!(exit_code = ?run.status.code(), timed_out, "command finished");
    Ok(run)
}

fn drain<R: Read + Send + 'static>(
    pipe: Option<R>,
    limit: u64,
) -> Result<JoinHandle<io::Result<Captured>>> {
    let mut pipe = pipe.ok_or_else(|| anyhow!("stream was not piped"))?;
    Ok(thread::spawn(move || {
        let mut bytes = Vec::new();
        (&mut pipe).take(limit).read_to_end(&mut bytes)?;
        let dropped = io::copy(&mut pipe, &mut io::sink())?;
        Ok(Captured { bytes, dropped })
    }))
}

fn collect(handle: JoinHandle<io::Result<Captured>>) -> Result<Captured> {
    handle
        .join()
        .map_err(|_| anyhow!("reader thread panicked"))?
        .context("read output")
}
