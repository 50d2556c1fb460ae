//! Subprocess invocation.
//!
//! Every external program ctest launches (the compiler, the built artifact, the coverage tool) goes through
//! [`execute`]. It returns a structured [`ProcessOutput`] instead of leaving callers to interpret raw exit statuses,
//! and it owns the timeout policy: when the wall-clock limit is exceeded the child is killed and the output is
//! flagged as timed out.
//!
//! Children are spawned with `kill_on_drop`, so dropping an in-flight [`execute`] future (for example when the
//! pipeline is cancelled by Ctrl-C) terminates the child as well.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Errors launching or talking to a subprocess.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to collect output of '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// A fully described subprocess invocation.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
    stdin: Option<Vec<u8>>,
    current_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Bytes written to the child's stdin, which is closed afterwards. Without this stdin is `/dev/null`.
    pub fn stdin(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Wall-clock limit; `None` waits indefinitely.
    pub fn timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// What a finished (or killed) subprocess produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, absent when the process was killed
    pub exit_code: Option<i32>,
    /// Terminating signal on Unix, when the process did not exit normally
    pub signal: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
    /// The wall-clock limit was hit and the process was killed
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// stdout followed by stderr, the way a terminal would have shown them.
    pub fn combined_lossy(&self) -> String {
        let stdout = self.stdout_lossy();
        let stderr = self.stderr_lossy();
        match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
            (true, _) => stderr,
            (false, true) => stdout,
            (false, false) => format!("{}\n{}", stdout.trim_end(), stderr),
        }
    }
}

/// Run an invocation to completion, feeding stdin and capturing both output streams.
///
/// Launch failures are errors; a nonzero exit, a signal or a timeout are all reported through the returned
/// [`ProcessOutput`].
pub async fn execute(invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
    let program = invocation.program.to_string_lossy().into_owned();
    tracing::debug!(command = %invocation, "spawning process");

    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &invocation.current_dir {
        command.current_dir(dir);
    }

    let start = Instant::now();
    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    let stdin = child.stdin.take();
    let payload = invocation.stdin.as_deref().unwrap_or_default();
    let feed = async move {
        if let Some(mut pipe) = stdin {
            match pipe.write_all(payload).await {
                // The child may exit without reading all of its input.
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e),
                _ => {}
            }
            // dropping the pipe closes the child's stdin
            drop(pipe);
        }
        Ok(())
    };

    let run = async {
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        fed?;
        Ok::<_, io::Error>(output)
    };

    let finished = match invocation.timeout {
        Some(limit) => tokio::time::timeout(limit, run).await.ok(),
        None => Some(run.await),
    };

    match finished {
        Some(Ok(output)) => Ok(ProcessOutput {
            exit_code: output.status.code(),
            signal: terminating_signal(&output.status),
            stdout: output.stdout,
            stderr: output.stderr,
            elapsed: start.elapsed(),
            timed_out: false,
        }),
        Some(Err(source)) => Err(ProcessError::Io { program, source }),
        None => {
            // The timed-out future owned the child; dropping it killed the process.
            tracing::debug!(command = %invocation, "process timed out and was killed");
            Ok(ProcessOutput {
                exit_code: None,
                signal: None,
                stdout: Vec::new(),
                stderr: Vec::new(),
                elapsed: start.elapsed(),
                timed_out: true,
            })
        }
    }
}

#[cfg(unix)]
fn terminating_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminating_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
