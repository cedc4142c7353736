use crate::executor::{OutputMode, ProcessCommand, ProcessOutput, ProcessRunner, RunnerError};
use crate::poll::Sleeper;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Records commands instead of running them.
///
/// Commands with [`OutputMode::CombinedTo`] get the configured backtrace
/// written to their output file, the way a debugger in batch mode would.
#[derive(Default)]
pub struct RecordingRunner {
    pub calls: Vec<ProcessCommand>,
    shared: Rc<RefCell<Vec<ProcessCommand>>>,
    stdout: String,
    stderr: String,
    backtrace: String,
    exit_code: i32,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.to_string();
        self
    }

    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr = stderr.to_string();
        self
    }

    pub fn with_backtrace(mut self, backtrace: &str) -> Self {
        self.backtrace = backtrace.to_string();
        self
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// Call log that stays readable after the runner is boxed away.
    pub fn shared_calls(&self) -> Rc<RefCell<Vec<ProcessCommand>>> {
        Rc::clone(&self.shared)
    }
}

impl ProcessRunner for RecordingRunner {
    fn run(&mut self, command: &ProcessCommand) -> Result<ProcessOutput, RunnerError> {
        self.calls.push(command.clone());
        self.shared.borrow_mut().push(command.clone());

        let mut output = ProcessOutput {
            pid: 4242,
            exit_code: Some(self.exit_code),
            ..Default::default()
        };
        match &command.output {
            OutputMode::Capture => {
                output.stdout = self.stdout.clone().into_bytes();
                output.stderr = self.stderr.clone().into_bytes();
            }
            OutputMode::CombinedTo(path) => {
                std::fs::write(path, &self.backtrace).map_err(|source| RunnerError::Redirect {
                    path: path.clone(),
                    source,
                })?;
            }
            OutputMode::Discard => {}
        }
        Ok(output)
    }
}

type SleepHook = Rc<RefCell<Box<dyn FnMut(usize)>>>;

/// Records requested sleeps without sleeping. Clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    durations: Rc<RefCell<Vec<Duration>>>,
    hook: Option<SleepHook>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `hook` with the 1-based sleep number after each sleep.
    pub fn on_sleep(mut self, hook: impl FnMut(usize) + 'static) -> Self {
        self.hook = Some(Rc::new(RefCell::new(Box::new(hook))));
        self
    }

    pub fn count(&self) -> usize {
        self.durations.borrow().len()
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.durations.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&mut self, duration: Duration) {
        self.durations.borrow_mut().push(duration);
        let n = self.count();
        if let Some(hook) = &self.hook {
            (hook.borrow_mut().as_mut())(n);
        }
    }
}
