use crate::error::CrashError;
use crate::event::{Artifact, ArtifactKind, ArtifactPrefix, CrashEvent, move_file};
use crate::executor::ProcessRunner;
use crate::locator::EvidenceStrategy;
use crate::platform::DarwinRelease;
use crate::poll::{PollBudget, PollPolicy, Sleeper, ThreadSleeper};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

/// Polls the Mac OS X crash reporter folders for the log of one crashed process.
pub struct CrashReportScanner<S: Sleeper = ThreadSleeper> {
    report_dirs: Vec<PathBuf>,
    budget: PollBudget,
    sleeper: S,
}

impl CrashReportScanner<ThreadSleeper> {
    pub fn new(report_dirs: Vec<PathBuf>, budget: PollBudget) -> Self {
        Self::with_sleeper(report_dirs, budget, ThreadSleeper)
    }
}

impl<S: Sleeper> CrashReportScanner<S> {
    pub fn with_sleeper(report_dirs: Vec<PathBuf>, budget: PollBudget, sleeper: S) -> Self {
        Self {
            report_dirs,
            budget,
            sleeper,
        }
    }

    pub fn report_dirs(&self) -> &[PathBuf] {
        &self.report_dirs
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    /// Polls until a matching log shows up or `policy.max_attempts` listing passes are done.
    pub fn scan(
        &mut self,
        event: &CrashEvent,
        policy: PollPolicy,
    ) -> Result<Option<Artifact>, CrashError> {
        for attempt in 1..=policy.max_attempts {
            if let Some(artifact) = self.scan_once(event)? {
                log::info!(
                    "Found crash log for {} [{}] on poll {attempt}: {:?}",
                    event.process_name(),
                    event.pid(),
                    artifact.path
                );
                return Ok(Some(artifact));
            }
            if attempt < policy.max_attempts {
                self.sleeper.sleep(policy.interval);
            }
        }
        log::warn!(
            "Waited {} polls, but a crash log for {} [{}] never appeared!",
            policy.max_attempts,
            event.process_name(),
            event.pid()
        );
        Ok(None)
    }

    /// One listing pass over every report folder.
    pub fn scan_once(&self, event: &CrashEvent) -> Result<Option<Artifact>, CrashError> {
        for dir in &self.report_dirs {
            let mut names = candidate_names(dir, event.process_name());
            names.sort_unstable_by(|a, b| b.cmp(a));

            for name in names {
                let path = dir.join(&name);
                if !first_line_names_pid(&path, event.pid()) {
                    continue;
                }
                if let Some(artifact) = claim(&path, event.artifact_prefix())? {
                    return Ok(Some(artifact));
                }
            }
        }
        Ok(None)
    }
}

impl<S: Sleeper> EvidenceStrategy for CrashReportScanner<S> {
    fn name(&self) -> &'static str {
        "crash-reporter"
    }

    fn find(
        &mut self,
        event: &CrashEvent,
        _runner: &mut dyn ProcessRunner,
    ) -> Result<Option<Artifact>, CrashError> {
        let policy = self.budget.policy_for(event.process_name());
        self.scan(event, policy)
    }
}

/// Crash report folders under each root, in the order they are searched.
///
/// Reports usually land in the user's folder but sometimes in the root
/// one, depending on the crash reporter's dialog setting.
pub fn report_dirs_for(roots: &[PathBuf], release: DarwinRelease) -> Vec<PathBuf> {
    roots
        .iter()
        .map(|root| {
            root.join("Library")
                .join("Logs")
                .join(release.crash_report_folder())
        })
        .collect()
}

/// Log file names in `dir` that belong to `process_name`.
///
/// A folder that cannot be listed contributes nothing; it does not exist
/// until the first crash on the machine.
fn candidate_names(dir: &Path, process_name: &str) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("Skipping crash report folder {dir:?}: {e}");
            return Vec::new();
        }
    };
    // Firefox sometimes still runs as firefox-bin.
    let plain = format!("{process_name}_");
    let renamed = format!("{process_name}-bin_");
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(&plain) || name.starts_with(&renamed))
        .collect()
}

/// Whether the log's first line ends with `[<pid>]`.
fn first_line_names_pid(path: &Path, pid: u32) -> bool {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            // Rotated out since the listing: clearly not the one.
            log::debug!("Could not open {path:?}: {e}");
            return false;
        }
    };
    let mut first_line = String::new();
    if let Err(e) = BufReader::new(file).read_line(&mut first_line) {
        log::debug!("Could not read {path:?}: {e}");
        return false;
    }
    first_line.trim_end().ends_with(&format!("[{pid}]"))
}

/// Archives a matching log under the prefix, or reports it in place.
///
/// `Ok(None)` means the log was rotated away after its first line was read.
/// A rename that fails while the log is still there is an error.
fn claim(path: &Path, prefix: &ArtifactPrefix) -> Result<Option<Artifact>, CrashError> {
    let Some(crash_log) = prefix.crash_log_path() else {
        return Ok(Some(Artifact::new(ArtifactKind::ReporterLog, path)));
    };
    match move_file(path, &crash_log) {
        Ok(()) => Ok(Some(Artifact::new(ArtifactKind::ReporterLog, crash_log))),
        Err(CrashError::Io { source, .. })
            if source.kind() == ErrorKind::NotFound && fs::symlink_metadata(path).is_err() =>
        {
            log::debug!("{path:?} vanished before it could be archived");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
