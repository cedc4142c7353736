use crate::config::SalvageConfig;
use crate::core_file::{CoreFileResolver, CoreLocation};
use crate::crash_report::{CrashReportScanner, report_dirs_for};
use crate::error::CrashError;
use crate::event::{Artifact, CrashEvent};
use crate::executor::ProcessRunner;
use crate::platform::{CoreConvention, PlatformCapabilities};

/// Valgrind writes its own report; its crashes are not correlated here.
const VALGRIND: &str = "valgrind";

/// One way of finding the evidence a crash left behind.
pub trait EvidenceStrategy {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Looks for evidence of `event`.
    ///
    /// `Ok(None)` means nothing was found. Errors are reserved for
    /// configuration and filesystem failures that should abort the search.
    fn find(
        &mut self,
        event: &CrashEvent,
        runner: &mut dyn ProcessRunner,
    ) -> Result<Option<Artifact>, CrashError>;
}

/// Finds the core dump or crash-reporter log that belongs to a crash.
///
/// Strategies run one after another in the order they were added. The first
/// one that produces an artifact wins, so two kinds of evidence never compete
/// for the same archived name.
pub struct CrashArtifactLocator {
    strategies: Vec<Box<dyn EvidenceStrategy>>,
    runner: Box<dyn ProcessRunner>,
}

impl CrashArtifactLocator {
    /// A locator with no strategies; it never finds anything.
    pub fn new(runner: Box<dyn ProcessRunner>) -> Self {
        Self {
            strategies: Vec::new(),
            runner,
        }
    }

    pub fn with_strategy(mut self, strategy: impl EvidenceStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Core files first where the kernel writes them, then the crash reporter.
    pub fn for_platform(
        capabilities: PlatformCapabilities,
        config: &SalvageConfig,
        runner: Box<dyn ProcessRunner>,
    ) -> Result<Self, CrashError> {
        let mut locator = Self::new(runner);

        if let Some(convention) = capabilities.core_files {
            let location = match convention {
                CoreConvention::FixedDirectory => CoreLocation::FixedDirectory {
                    dir: config.paths.cores_dir.clone(),
                },
                CoreConvention::KernelPidFlag => CoreLocation::KernelPidFlag {
                    flag_path: config.paths.core_uses_pid_flag.clone(),
                    dir: config.paths.linux_core_dir.clone(),
                },
            };
            locator = locator.with_strategy(CoreFileResolver::new(
                location,
                config.debugger.program.clone(),
                config.debugger.script.clone(),
            )?);
        }

        if let Some(release) = capabilities.crash_reporter {
            let dirs = report_dirs_for(&config.paths.report_roots(), release);
            locator = locator.with_strategy(CrashReportScanner::new(dirs, config.poll.budget()));
        }

        Ok(locator)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn locate(&mut self, event: &CrashEvent) -> Result<Option<Artifact>, CrashError> {
        if event.process_name() == VALGRIND {
            return Ok(None);
        }

        // Clear the canonical names first so a stale artifact can never be mistaken for this crash.
        let removed = event.artifact_prefix().remove_stale()?;
        if removed > 0 {
            log::debug!("Removed {removed} stale artifact(s) before correlating pid {}", event.pid());
        }

        for strategy in self.strategies.iter_mut() {
            log::debug!(
                "Trying {} for {} [{}]",
                strategy.name(),
                event.process_name(),
                event.pid()
            );
            if let Some(artifact) = strategy.find(event, self.runner.as_mut())? {
                log::info!(
                    "{} found {:?} evidence for {} [{}] at {:?}",
                    strategy.name(),
                    artifact.kind,
                    event.process_name(),
                    event.pid(),
                    artifact.path
                );
                return Ok(Some(artifact));
            }
        }

        log::info!(
            "No crash evidence found for {} [{}]",
            event.process_name(),
            event.pid()
        );
        Ok(None)
    }
}
