use crate::executor::RunnerError;
use crate::platform::PlatformError;
use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort a crash correlation call.
///
/// Only configuration and structural problems end up here. Evidence that is
/// simply not there (yet) is reported as `Ok(None)` by the strategies.
#[derive(Error, Debug)]
pub enum CrashError {
    /// The host is not one of the platforms the fuzzing pipeline supports.
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(#[from] PlatformError),

    /// The debugger command script is missing.
    #[error("Debugger command script not found at {0:?}")]
    MissingDebuggerScript(PathBuf),

    /// A filesystem operation on crash evidence failed.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The debugger could not be launched at all.
    #[error("Debugger invocation failed: {0}")]
    Runner(#[from] RunnerError),
}

impl CrashError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CrashError::Io {
            path: path.into(),
            source,
        }
    }
}
