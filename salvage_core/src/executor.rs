use std::ffi::OsString;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Cannot run an empty command")]
    EmptyCommand,
    #[error("Failed to spawn command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to open output file {path:?}: {source}")]
    Redirect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Error waiting for child: {0}")]
    Wait(#[source] std::io::Error),
    #[error("Failed to kill timed-out process: {0}")]
    Kill(#[source] std::io::Error),
    #[error("Failed to read child output: {0}")]
    Output(String),
}

/// Where a child's stdout and stderr go.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Both streams are captured into [`ProcessOutput`].
    #[default]
    Capture,
    /// Both streams are written, interleaved, into this file.
    CombinedTo(PathBuf),
    /// Both streams are dropped.
    Discard,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessCommand {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Replaces the inherited environment when set.
    pub env: Option<Vec<(OsString, OsString)>>,
    pub output: OutputMode,
    pub timeout: Option<Duration>,
}

impl ProcessCommand {
    pub fn new<S: Into<String>>(argv: impl IntoIterator<Item = S>) -> Self {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, env: Vec<(OsString, OsString)>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub pid: u32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Runs a command to completion and reports what happened.
pub trait ProcessRunner {
    fn run(&mut self, command: &ProcessCommand) -> Result<ProcessOutput, RunnerError>;
}

/// How a run of the program under test ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Ok,
    /// Exited normally with a non-zero code.
    Exited(i32),
    /// Killed by a signal or otherwise terminated abnormally.
    Crash(String),
    Timeout,
}

impl ExecutionStatus {
    pub fn from_output(output: &ProcessOutput) -> Self {
        if output.timed_out {
            return ExecutionStatus::Timeout;
        }
        match (output.exit_code, output.signal) {
            (_, Some(signal)) => ExecutionStatus::Crash(format!("Terminated by signal {signal}")),
            (Some(0), None) => ExecutionStatus::Ok,
            // Windows reports unhandled exceptions as NTSTATUS codes with the high bit set.
            (Some(code), None) if code < 0 => {
                ExecutionStatus::Crash(format!("Terminated by exception {:#010x}", code as u32))
            }
            (Some(code), None) => ExecutionStatus::Exited(code),
            (None, None) => ExecutionStatus::Crash("Exited abnormally".to_string()),
        }
    }

    pub fn is_crash(&self) -> bool {
        matches!(self, ExecutionStatus::Crash(_))
    }
}

/// [`ProcessRunner`] backed by `std::process`.
#[derive(Debug, Default, Clone)]
pub struct CommandRunner {
    default_timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout: Some(timeout),
        }
    }

    /// Waits for `child`, killing it once `timeout` has passed.
    ///
    /// Returns `None` when the child had to be killed.
    fn wait_with_timeout(
        child: &mut Child,
        timeout: Duration,
    ) -> Result<Option<ExitStatus>, RunnerError> {
        let start_time = Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(Some(status)),
                Ok(None) => {
                    if start_time.elapsed() > timeout {
                        log::warn!("Target timed out after {timeout:?}, killing...");
                        child.kill().map_err(RunnerError::Kill)?;
                        child.wait().map_err(RunnerError::Wait)?;
                        return Ok(None);
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(RunnerError::Wait(e)),
            }
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        source.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join_reader(
    handle: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
) -> Result<Vec<u8>, RunnerError> {
    match handle {
        None => Ok(Vec::new()),
        Some(h) => h
            .join()
            .map_err(|_| RunnerError::Output("reader thread panicked".to_string()))?
            .map_err(|e| RunnerError::Output(e.to_string())),
    }
}

impl ProcessRunner for CommandRunner {
    fn run(&mut self, command: &ProcessCommand) -> Result<ProcessOutput, RunnerError> {
        let (program, args) = command.argv.split_first().ok_or(RunnerError::EmptyCommand)?;
        let rendered = shellify(&command.argv);
        log::debug!("Running `{rendered}`");

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null());
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = &command.env {
            cmd.env_clear();
            cmd.envs(env.iter().map(|(k, v)| (k, v)));
        }

        match &command.output {
            OutputMode::Capture => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            OutputMode::CombinedTo(path) => {
                let redirect = |source| RunnerError::Redirect {
                    path: path.clone(),
                    source,
                };
                let file = File::create(path).map_err(redirect)?;
                let file_for_stderr = file.try_clone().map_err(redirect)?;
                cmd.stdout(file).stderr(file_for_stderr);
            }
            OutputMode::Discard => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                // Nothing ran, so the redirect file holds no output.
                if let OutputMode::CombinedTo(path) = &command.output {
                    if let Err(e) = std::fs::remove_file(path) {
                        log::warn!("Could not remove empty output file {path:?}: {e}");
                    }
                }
                return Err(RunnerError::Spawn {
                    command: rendered,
                    source,
                });
            }
        };
        // Dropping the builder closes the parent's copies of any redirect file.
        drop(cmd);

        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let mut output = ProcessOutput {
            pid: child.id(),
            ..Default::default()
        };

        let status = match command.timeout.or(self.default_timeout) {
            Some(timeout) => Self::wait_with_timeout(&mut child, timeout)?,
            None => Some(child.wait().map_err(RunnerError::Wait)?),
        };

        output.stdout = join_reader(stdout_reader)?;
        output.stderr = join_reader(stderr_reader)?;

        match status {
            Some(status) => {
                output.exit_code = status.code();
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    output.signal = status.signal();
                }
            }
            None => output.timed_out = true,
        }
        Ok(output)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Stderr output alone is not a failure.
    pub ignore_stderr: bool,
    /// Stderr is appended to the returned stdout.
    pub combine_stderr: bool,
    /// A non-zero exit code is not a failure.
    pub ignore_exit_code: bool,
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error("Nonzero exit code ({code:?}) from `{command}`: {stderr}")]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("Unexpected output on stderr from `{command}`: {stderr}")]
    UnexpectedStderr { command: String, stderr: String },
}

/// Runs `command` and returns its trimmed stdout together with its exit code.
pub fn capture_stdout(
    runner: &mut dyn ProcessRunner,
    command: &ProcessCommand,
    options: CaptureOptions,
) -> Result<(String, Option<i32>), CaptureError> {
    let command = command.clone().output(OutputMode::Capture);
    let rendered = shellify(&command.argv);

    let start_time = Instant::now();
    let output = runner.run(&command)?;
    log::info!(
        "`{rendered}` took {:.3} seconds.",
        start_time.elapsed().as_secs_f64()
    );

    let stdout = output.stdout_lossy();
    let stderr = output.stderr_lossy();
    let failed = output.exit_code != Some(0);

    if failed && !options.ignore_exit_code {
        return Err(CaptureError::NonZeroExit {
            command: rendered,
            code: output.exit_code,
            stderr,
        });
    }
    if !stderr.is_empty() && !options.combine_stderr && !options.ignore_stderr {
        return Err(CaptureError::UnexpectedStderr {
            command: rendered,
            stderr,
        });
    }
    if !stderr.is_empty() && options.ignore_stderr && failed {
        return Err(CaptureError::NonZeroExit {
            command: rendered,
            code: output.exit_code,
            stderr,
        });
    }

    log::debug!("stdout of `{rendered}`: {stdout}");
    let mut text = stdout;
    if options.combine_stderr {
        text.push_str(&stderr);
    }
    Ok((text.trim_end().to_string(), output.exit_code))
}

/// Renders `argv` as a string that can be pasted into a shell.
pub fn shellify(argv: &[String]) -> String {
    fn plain(c: char) -> bool {
        c.is_ascii_alphanumeric() || "-_.,/=~@".contains(c)
    }
    fn quotable(c: char) -> bool {
        plain(c) || "() ".contains(c)
    }

    let mut parts = Vec::with_capacity(argv.len());
    for item in argv {
        if item.chars().all(plain) {
            parts.push(item.clone());
        } else if item.chars().all(quotable) {
            parts.push(format!("\"{item}\""));
        } else {
            return format!("{argv:?}");
        }
    }
    parts.join(" ")
}
