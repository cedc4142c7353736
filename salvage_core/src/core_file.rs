use crate::error::CrashError;
use crate::event::{Artifact, ArtifactKind, CrashEvent, move_file};
use crate::executor::{OutputMode, ProcessCommand, ProcessRunner, shellify};
use crate::locator::EvidenceStrategy;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Where the kernel leaves core files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreLocation {
    /// Always `<dir>/core.<pid>`.
    FixedDirectory { dir: PathBuf },
    /// `<dir>/core.<pid>` when the flag file reads non-zero, `<dir>/core` otherwise.
    ///
    /// An untagged `core` is assumed to belong to whichever crash is being
    /// correlated. Nothing checks its owner or timestamp.
    KernelPidFlag { flag_path: PathBuf, dir: PathBuf },
}

/// Reads a `core_uses_pid` style flag. A missing or unreadable file means `false`.
pub fn core_uses_pid(flag_path: &Path) -> bool {
    match fs::read_to_string(flag_path) {
        Ok(content) => content
            .chars()
            .next()
            .and_then(|c| c.to_digit(10))
            .is_some_and(|d| d != 0),
        Err(e) => {
            log::debug!("Cannot read {flag_path:?} ({e}), assuming cores are not tagged with a pid");
            false
        }
    }
}

/// Finds the core file of a crashed process, extracts a backtrace from it
/// with the debugger and archives both.
#[derive(Debug, Clone)]
pub struct CoreFileResolver {
    location: CoreLocation,
    debugger: String,
    script: PathBuf,
}

impl CoreFileResolver {
    /// Fails when the debugger command script does not exist.
    pub fn new(
        location: CoreLocation,
        debugger: impl Into<String>,
        script: impl Into<PathBuf>,
    ) -> Result<Self, CrashError> {
        let script = script.into();
        if !script.is_file() {
            return Err(CrashError::MissingDebuggerScript(script));
        }
        Ok(Self {
            location,
            debugger: debugger.into(),
            script,
        })
    }

    pub fn expected_core_path(&self, pid: u32) -> PathBuf {
        match &self.location {
            CoreLocation::FixedDirectory { dir } => dir.join(format!("core.{pid}")),
            CoreLocation::KernelPidFlag { flag_path, dir } => {
                if core_uses_pid(flag_path) {
                    dir.join(format!("core.{pid}"))
                } else {
                    dir.join("core")
                }
            }
        }
    }

    fn debugger_argv(&self, binary: &Path, core: &Path) -> Vec<String> {
        vec![
            self.debugger.clone(),
            "-n".to_string(),
            "-batch".to_string(),
            "-x".to_string(),
            self.script.to_string_lossy().into_owned(),
            binary.to_string_lossy().into_owned(),
            core.to_string_lossy().into_owned(),
        ]
    }

    pub fn resolve(
        &self,
        event: &CrashEvent,
        runner: &mut dyn ProcessRunner,
    ) -> Result<Option<Artifact>, CrashError> {
        let core_path = self.expected_core_path(event.pid());
        // Core dumps are complete before the process finishes exiting, so there is no retry.
        if !core_path.is_file() {
            log::debug!("No core file at {core_path:?}");
            return Ok(None);
        }

        let prefix = event.artifact_prefix();
        let output = match prefix.crash_log_path() {
            Some(crash_log) => OutputMode::CombinedTo(crash_log),
            None => OutputMode::Discard,
        };
        let argv = self.debugger_argv(event.process_full_path(), &core_path);
        log::info!("{}", shellify(&argv));
        let result = runner.run(&ProcessCommand::new(argv).output(output))?;
        if !result.success() {
            log::warn!(
                "Debugger exited with code {:?} (signal {:?}); keeping whatever backtrace it produced",
                result.exit_code,
                result.signal
            );
        }

        let (Some(crash_log), Some(raw_core), Some(compressed_core)) = (
            prefix.crash_log_path(),
            prefix.raw_core_path(),
            prefix.compressed_core_path(),
        ) else {
            return Ok(Some(Artifact::new(ArtifactKind::Core, core_path)));
        };

        move_file(&core_path, &raw_core)?;
        compress_in_place(&raw_core, &compressed_core)?;
        log::info!("Archived core file of pid {} as {compressed_core:?}", event.pid());
        Ok(Some(Artifact::new(ArtifactKind::Core, crash_log)))
    }
}

impl EvidenceStrategy for CoreFileResolver {
    fn name(&self) -> &'static str {
        "core-file"
    }

    fn find(
        &mut self,
        event: &CrashEvent,
        runner: &mut dyn ProcessRunner,
    ) -> Result<Option<Artifact>, CrashError> {
        self.resolve(event, runner)
    }
}

/// Gzips `raw` into `compressed` and removes `raw`.
fn compress_in_place(raw: &Path, compressed: &Path) -> Result<(), CrashError> {
    let dir = match compressed.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut input = BufReader::new(File::open(raw).map_err(|e| CrashError::io(raw, e))?);
    let staging = tempfile::NamedTempFile::new_in(dir).map_err(|e| CrashError::io(dir, e))?;

    let mut encoder = GzEncoder::new(BufWriter::new(staging), Compression::default());
    io::copy(&mut input, &mut encoder).map_err(|e| CrashError::io(compressed, e))?;
    let staging = encoder
        .finish()
        .and_then(|w| w.into_inner().map_err(|e| e.into_error()))
        .map_err(|e| CrashError::io(compressed, e))?;
    staging
        .persist(compressed)
        .map_err(|e| CrashError::io(compressed, e.error))?;

    fs::remove_file(raw).map_err(|e| CrashError::io(raw, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ArtifactPrefix;
    use crate::test_support::RecordingRunner;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::{TempDir, tempdir};

    fn script_in(dir: &TempDir) -> PathBuf {
        let script = dir.path().join("gdb-quick.txt");
        fs::write(&script, "backtrace\n").unwrap();
        script
    }

    fn gunzip(path: &Path) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(File::open(path).unwrap())
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn missing_script_is_a_configuration_error() {
        let dir = tempdir().unwrap();
        let location = CoreLocation::FixedDirectory {
            dir: dir.path().to_path_buf(),
        };
        let result = CoreFileResolver::new(location, "gdb", dir.path().join("nope.txt"));
        assert!(matches!(result, Err(CrashError::MissingDebuggerScript(_))));
    }

    #[test]
    fn archives_backtrace_and_compressed_core() {
        let dir = tempdir().unwrap();
        let cores = dir.path().join("cores");
        fs::create_dir(&cores).unwrap();
        fs::write(cores.join("core.4242"), b"ELF core bytes").unwrap();
        let resolver = CoreFileResolver::new(
            CoreLocation::FixedDirectory { dir: cores.clone() },
            "gdb",
            script_in(&dir),
        )
        .unwrap();

        let prefix = dir.path().join("run1");
        let event = CrashEvent::new(
            "js",
            "/builds/js",
            4242,
            ArtifactPrefix::archive(&prefix),
        );
        let mut runner = RecordingRunner::new().with_backtrace("#0 0x0 in js::crash ()\n");

        let artifact = resolver.resolve(&event, &mut runner).unwrap().unwrap();
        assert_eq!(artifact.kind, ArtifactKind::Core);
        assert_eq!(artifact.path, dir.path().join("run1-crash"));

        assert_eq!(runner.calls.len(), 1);
        let call = &runner.calls[0];
        assert_eq!(
            call.argv,
            vec![
                "gdb".to_string(),
                "-n".to_string(),
                "-batch".to_string(),
                "-x".to_string(),
                dir.path().join("gdb-quick.txt").to_string_lossy().into_owned(),
                "/builds/js".to_string(),
                cores.join("core.4242").to_string_lossy().into_owned(),
            ]
        );
        assert_eq!(call.output, OutputMode::CombinedTo(dir.path().join("run1-crash")));

        assert_eq!(
            fs::read_to_string(dir.path().join("run1-crash")).unwrap(),
            "#0 0x0 in js::crash ()\n"
        );
        assert_eq!(gunzip(&dir.path().join("run1-core.gz")), b"ELF core bytes");
        assert!(!cores.join("core.4242").exists());
        assert!(!dir.path().join("run1-core").exists());
    }

    #[test]
    fn missing_core_file_yields_nothing_without_running_debugger() {
        let dir = tempdir().unwrap();
        let resolver = CoreFileResolver::new(
            CoreLocation::FixedDirectory {
                dir: dir.path().to_path_buf(),
            },
            "gdb",
            script_in(&dir),
        )
        .unwrap();
        let event = CrashEvent::new("js", "/builds/js", 7, ArtifactPrefix::archive(dir.path().join("r")));
        let mut runner = RecordingRunner::new();
        assert!(resolver.resolve(&event, &mut runner).unwrap().is_none());
        assert!(runner.calls.is_empty());
    }

    #[test]
    fn untagged_core_is_claimed_by_any_crash() {
        let dir = tempdir().unwrap();
        let flag = dir.path().join("core_uses_pid");
        fs::write(&flag, "0\n").unwrap();
        fs::write(dir.path().join("core"), b"someone's core").unwrap();
        let resolver = CoreFileResolver::new(
            CoreLocation::KernelPidFlag {
                flag_path: flag,
                dir: dir.path().to_path_buf(),
            },
            "gdb",
            script_in(&dir),
        )
        .unwrap();

        for pid in [1, 31337] {
            let event = CrashEvent::new("js", "/builds/js", pid, ArtifactPrefix::ReturnOnly);
            let mut runner = RecordingRunner::new();
            let artifact = resolver.resolve(&event, &mut runner).unwrap().unwrap();
            assert_eq!(artifact.path, dir.path().join("core"));
            assert_eq!(runner.calls[0].output, OutputMode::Discard);
        }
        assert!(dir.path().join("core").exists(), "return-only must not move the core");
    }

    #[test]
    fn pid_flag_selects_tagged_name() {
        let dir = tempdir().unwrap();
        let flag = dir.path().join("core_uses_pid");
        let location = CoreLocation::KernelPidFlag {
            flag_path: flag.clone(),
            dir: dir.path().to_path_buf(),
        };
        let resolver = CoreFileResolver::new(location, "gdb", script_in(&dir)).unwrap();

        assert_eq!(resolver.expected_core_path(99), dir.path().join("core"));
        fs::write(&flag, "1\n").unwrap();
        assert_eq!(resolver.expected_core_path(99), dir.path().join("core.99"));
        fs::write(&flag, "0").unwrap();
        assert_eq!(resolver.expected_core_path(99), dir.path().join("core"));
    }

    #[test]
    fn failing_debugger_still_yields_evidence() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("core.5"), b"core").unwrap();
        let resolver = CoreFileResolver::new(
            CoreLocation::FixedDirectory {
                dir: dir.path().to_path_buf(),
            },
            "gdb",
            script_in(&dir),
        )
        .unwrap();
        let event = CrashEvent::new("js", "/builds/js", 5, ArtifactPrefix::archive(dir.path().join("p")));
        let mut runner = RecordingRunner::new()
            .with_exit_code(1)
            .with_backtrace("warning: core file may not match specified executable file.\n");

        let artifact = resolver.resolve(&event, &mut runner).unwrap().unwrap();
        assert_eq!(artifact.path, dir.path().join("p-crash"));
        assert!(dir.path().join("p-core.gz").exists());
    }

    #[test]
    fn unlaunchable_debugger_leaves_no_backtrace_file() {
        use crate::executor::{CommandRunner, RunnerError};

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("core.4242"), b"core").unwrap();
        let resolver = CoreFileResolver::new(
            CoreLocation::FixedDirectory {
                dir: dir.path().to_path_buf(),
            },
            "gdb-does-not-exist-xyz",
            script_in(&dir),
        )
        .unwrap();
        let event = CrashEvent::new("js", "/builds/js", 4242, ArtifactPrefix::archive(dir.path().join("run1")));

        let result = resolver.resolve(&event, &mut CommandRunner::new());
        assert!(matches!(result, Err(CrashError::Runner(RunnerError::Spawn { .. }))));
        assert!(!dir.path().join("run1-crash").exists());
        assert!(dir.path().join("core.4242").exists(), "core stays put when nothing ran");
    }
}
