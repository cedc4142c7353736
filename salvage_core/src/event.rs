use crate::error::CrashError;
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Suffix of the archived backtrace or renamed crash-reporter log.
pub const CRASH_SUFFIX: &str = "-crash";
/// Suffix of the renamed raw core file, before compression.
pub const CORE_SUFFIX: &str = "-core";
/// Suffix of the compressed core file.
pub const COMPRESSED_CORE_SUFFIX: &str = "-core.gz";

/// Where the evidence of a crash should end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactPrefix {
    /// Archive evidence under canonical names derived from this base path.
    Archive(PathBuf),
    /// Only report where the evidence is. Nothing is renamed or written.
    ReturnOnly,
}

impl ArtifactPrefix {
    pub fn archive(base: impl Into<PathBuf>) -> Self {
        ArtifactPrefix::Archive(base.into())
    }

    pub fn base(&self) -> Option<&Path> {
        match self {
            ArtifactPrefix::Archive(base) => Some(base.as_path()),
            ArtifactPrefix::ReturnOnly => None,
        }
    }

    /// `P-crash`
    pub fn crash_log_path(&self) -> Option<PathBuf> {
        self.base().map(|base| with_suffix(base, CRASH_SUFFIX))
    }

    /// `P-core`
    pub fn raw_core_path(&self) -> Option<PathBuf> {
        self.base().map(|base| with_suffix(base, CORE_SUFFIX))
    }

    /// `P-core.gz`
    pub fn compressed_core_path(&self) -> Option<PathBuf> {
        self.base().map(|base| with_suffix(base, COMPRESSED_CORE_SUFFIX))
    }

    /// Deletes artifacts left at the canonical names by an earlier crash.
    ///
    /// Returns how many files were removed. Missing files are not an error.
    pub fn remove_stale(&self) -> Result<usize, CrashError> {
        let candidates = [
            self.crash_log_path(),
            self.raw_core_path(),
            self.compressed_core_path(),
        ];
        let mut removed = 0;
        for path in candidates.into_iter().flatten() {
            match fs::remove_file(&path) {
                Ok(()) => {
                    log::debug!("Removed stale artifact {path:?}");
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(CrashError::io(path, e)),
            }
        }
        Ok(removed)
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Identity of a process that has just crashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashEvent {
    process_name: String,
    process_full_path: PathBuf,
    pid: u32,
    artifact_prefix: ArtifactPrefix,
}

impl CrashEvent {
    pub fn new(
        process_name: impl Into<String>,
        process_full_path: impl Into<PathBuf>,
        pid: u32,
        artifact_prefix: ArtifactPrefix,
    ) -> Self {
        Self {
            process_name: process_name.into(),
            process_full_path: process_full_path.into(),
            pid,
            artifact_prefix,
        }
    }

    /// Builds an event from the binary path, using its file name as the process name.
    pub fn for_binary(
        process_full_path: impl Into<PathBuf>,
        pid: u32,
        artifact_prefix: ArtifactPrefix,
    ) -> Self {
        let process_full_path = process_full_path.into();
        let process_name = process_full_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(process_name, process_full_path, pid, artifact_prefix)
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn process_full_path(&self) -> &Path {
        &self.process_full_path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn artifact_prefix(&self) -> &ArtifactPrefix {
        &self.artifact_prefix
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Core,
    ReporterLog,
}

/// Crash evidence that exists on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Renames `from` to `to`, copying when they live on different filesystems.
pub(crate) fn move_file(from: &Path, to: &Path) -> Result<(), CrashError> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            fs::copy(from, to).map_err(|e| CrashError::io(to, e))?;
            fs::remove_file(from).map_err(|e| CrashError::io(from, e))
        }
        Err(e) => Err(CrashError::io(from, e)),
    }
}
