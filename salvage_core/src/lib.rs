pub mod config;
pub mod core_file;
pub mod crash_report;
pub mod error;
pub mod event;
pub mod executor;
pub mod locator;
pub mod platform;
pub mod poll;
pub mod workdir;

#[cfg(test)]
mod test_support;

pub use config::SalvageConfig;
pub use core_file::{CoreFileResolver, CoreLocation};
pub use crash_report::CrashReportScanner;
pub use error::CrashError;
pub use event::{Artifact, ArtifactKind, ArtifactPrefix, CrashEvent};
pub use executor::{CommandRunner, ExecutionStatus, ProcessCommand, ProcessOutput, ProcessRunner};
pub use locator::{CrashArtifactLocator, EvidenceStrategy};
pub use platform::{Platform, PlatformCapabilities, PlatformError};
pub use poll::{PollBudget, PollPolicy, Sleeper, ThreadSleeper};
pub use workdir::create_wtmp_dir;
