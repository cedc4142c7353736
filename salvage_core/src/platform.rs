use crate::executor::{CaptureOptions, ProcessCommand, ProcessRunner, capture_stdout};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Unknown OS '{0}' - only Windows, Linux and Mac OS X are supported")]
    UnsupportedOs(String),
    #[error("Mac OS X {0} is not supported (10.5 to 10.7 only)")]
    UnsupportedMacVersion(String),
    #[error("Could not determine the Mac OS X version: {0}")]
    VersionProbe(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DarwinRelease {
    Leopard,
    SnowLeopard,
    Lion,
}

impl DarwinRelease {
    /// Parses a `sw_vers -productVersion` string such as `10.6.8`.
    pub fn from_product_version(version: &str) -> Result<Self, PlatformError> {
        let mut parts = version.trim().split('.');
        let major = parts.next().and_then(|p| p.parse::<u32>().ok());
        let minor = parts.next().and_then(|p| p.parse::<u32>().ok());
        match (major, minor) {
            (Some(10), Some(5)) => Ok(DarwinRelease::Leopard),
            (Some(10), Some(6)) => Ok(DarwinRelease::SnowLeopard),
            (Some(10), Some(7)) => Ok(DarwinRelease::Lion),
            _ => Err(PlatformError::UnsupportedMacVersion(version.trim().to_string())),
        }
    }

    /// Name of the folder under `Library/Logs` where crash reports are written.
    pub fn crash_report_folder(self) -> &'static str {
        match self {
            DarwinRelease::Leopard => "CrashReporter",
            DarwinRelease::SnowLeopard | DarwinRelease::Lion => "DiagnosticReports",
        }
    }
}

/// The host family the fuzzing pipeline runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Darwin(DarwinRelease),
    Linux,
    Windows,
}

impl Platform {
    /// Maps an OS name (as in `std::env::consts::OS`) to a platform.
    ///
    /// `mac_version` is only consulted for macOS.
    pub fn from_parts(os: &str, mac_version: Option<&str>) -> Result<Self, PlatformError> {
        match os {
            "linux" => Ok(Platform::Linux),
            "windows" => Ok(Platform::Windows),
            "macos" => {
                let version = mac_version.ok_or_else(|| {
                    PlatformError::VersionProbe("no product version available".to_string())
                })?;
                Ok(Platform::Darwin(DarwinRelease::from_product_version(version)?))
            }
            other => Err(PlatformError::UnsupportedOs(other.to_string())),
        }
    }

    /// Probes the host this process runs on.
    pub fn detect(runner: &mut dyn ProcessRunner) -> Result<Self, PlatformError> {
        let os = std::env::consts::OS;
        if os != "macos" {
            return Self::from_parts(os, None);
        }
        let (version, _) = capture_stdout(
            runner,
            &ProcessCommand::new(["sw_vers", "-productVersion"]),
            CaptureOptions::default(),
        )
        .map_err(|e| PlatformError::VersionProbe(e.to_string()))?;
        Self::from_parts(os, Some(&version))
    }

    pub fn capabilities(self) -> PlatformCapabilities {
        match self {
            Platform::Darwin(release) => PlatformCapabilities {
                core_files: Some(CoreConvention::FixedDirectory),
                crash_reporter: Some(release),
            },
            Platform::Linux => PlatformCapabilities {
                core_files: Some(CoreConvention::KernelPidFlag),
                crash_reporter: None,
            },
            Platform::Windows => PlatformCapabilities::default(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Darwin(release) => write!(f, "Darwin ({release:?})"),
            Platform::Linux => f.write_str("Linux"),
            Platform::Windows => f.write_str("Windows"),
        }
    }
}

/// How the kernel names core files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreConvention {
    /// `core.<pid>` in a fixed directory (`/cores` on Mac OS X).
    FixedDirectory,
    /// `core.<pid>` or plain `core`, depending on the kernel's `core_uses_pid` flag.
    KernelPidFlag,
}

/// Which kinds of crash evidence a platform produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlatformCapabilities {
    pub core_files: Option<CoreConvention>,
    /// Set when an OS crash reporter writes logs; carries the release for the folder layout.
    pub crash_reporter: Option<DarwinRelease>,
}

impl PlatformCapabilities {
    pub fn supports_core_files(&self) -> bool {
        self.core_files.is_some()
    }

    pub fn supports_crash_reporter(&self) -> bool {
        self.crash_reporter.is_some()
    }
}
