//! External command execution with a hard deadline.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{AbgError, Result};

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    fn from_output(output: &Output) -> Self {
        Self {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    /// stderr, or stdout when stderr is empty.
    #[must_use]
    pub fn diagnostic(&self) -> &str {
        if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }

    /// Case-insensitive search over both streams.
    #[must_use]
    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.stderr.to_lowercase().contains(&needle) || self.stdout.to_lowercase().contains(&needle)
    }
}

/// Run `program args...` in `cwd`, killing it after `timeout`.
///
/// A timeout is reported as [`AbgError::Timeout`] naming `operation`, never
/// as a generic failure. A non-zero exit is returned as output, not an error.
pub fn run(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
    operation: &str,
) -> Result<CommandOutput> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GH_PROMPT_DISABLED", "1");
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    debug!(program, ?args, operation, timeout_secs = ceil_secs(timeout), "running command");
    let output = execute_with_timeout(&mut command, timeout, operation)?;
    Ok(CommandOutput::from_output(&output))
}

/// How long output pipes may stay open after the process itself exited.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Whole seconds covering `timeout`, so a sub-second deadline never reads as 0s.
fn ceil_secs(timeout: Duration) -> u64 {
    timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0)
}

/// Pipe drained on its own thread into a shared buffer.
struct PipeReader {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl PipeReader {
    fn spawn<R: Read + Send + 'static>(mut reader: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let handle = std::thread::spawn(move || {
            let mut chunk = [0_u8; 8192];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
        });
        Self { buf, handle }
    }

    /// Output read so far, waiting for EOF until `deadline` at most.
    ///
    /// A grandchild that inherited the pipe can hold it open indefinitely;
    /// its reader thread is then left behind.
    fn collect(self, deadline: Instant) -> Vec<u8> {
        while !self.handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        std::mem::take(&mut *self.buf.lock())
    }
}

fn execute_with_timeout(command: &mut Command, timeout: Duration, operation: &str) -> Result<Output> {
    let program = command.get_program().to_string_lossy().into_owned();
    let mut child = command.spawn().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            AbgError::HostUnavailable(format!("'{program}' is not installed or not on PATH"))
        } else {
            AbgError::Io(err)
        }
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AbgError::Io(std::io::Error::other("failed to capture stdout")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AbgError::Io(std::io::Error::other("failed to capture stderr")))?;
    let stdout = PipeReader::spawn(stdout);
    let stderr = PipeReader::spawn(stderr);

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            let drain_until = (start + timeout).max(Instant::now() + DRAIN_GRACE);
            return Ok(Output {
                status,
                stdout: stdout.collect(drain_until),
                stderr: stderr.collect(drain_until),
            });
        }

        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AbgError::Timeout {
                operation: operation.to_string(),
                timeout_seconds: ceil_secs(timeout),
            });
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}
