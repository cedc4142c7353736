use crate::poll::PollBudget;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the debugger command script shipped next to the binaries.
pub const DEBUGGER_SCRIPT_NAME: &str = "gdb-quick.txt";

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct DebuggerSettings {
    #[serde(default = "default_debugger_program")]
    pub program: String,
    #[serde(default = "default_debugger_script")]
    pub script: PathBuf,
}

fn default_debugger_program() -> String {
    "gdb".to_string()
}

pub fn default_debugger_script() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEBUGGER_SCRIPT_NAME)))
        .unwrap_or_else(|| PathBuf::from(DEBUGGER_SCRIPT_NAME))
}

impl Default for DebuggerSettings {
    fn default() -> Self {
        Self {
            program: default_debugger_program(),
            script: default_debugger_script(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct PollSettings {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_primary_max_attempts")]
    pub primary_max_attempts: u32,
    #[serde(default = "default_auxiliary_max_attempts")]
    pub auxiliary_max_attempts: u32,
    #[serde(default = "default_primary_programs")]
    pub primary_programs: Vec<String>,
}

fn default_interval_ms() -> u64 {
    200
}
fn default_primary_max_attempts() -> u32 {
    500
}
fn default_auxiliary_max_attempts() -> u32 {
    30
}
fn default_primary_programs() -> Vec<String> {
    vec!["firefox".to_string(), "js".to_string()]
}

impl PollSettings {
    pub fn budget(&self) -> PollBudget {
        PollBudget {
            interval: Duration::from_millis(self.interval_ms),
            primary_programs: self.primary_programs.clone(),
            primary_max_attempts: self.primary_max_attempts,
            auxiliary_max_attempts: self.auxiliary_max_attempts,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            primary_max_attempts: default_primary_max_attempts(),
            auxiliary_max_attempts: default_auxiliary_max_attempts(),
            primary_programs: default_primary_programs(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct PathSettings {
    #[serde(default = "default_cores_dir")]
    pub cores_dir: PathBuf,
    #[serde(default = "default_core_uses_pid_flag")]
    pub core_uses_pid_flag: PathBuf,
    #[serde(default = "default_linux_core_dir")]
    pub linux_core_dir: PathBuf,
    /// Roots searched for `Library/Logs/...`; the home directory then `/` when unset.
    #[serde(default)]
    pub report_roots: Option<Vec<PathBuf>>,
}

fn default_cores_dir() -> PathBuf {
    PathBuf::from("/cores")
}
fn default_core_uses_pid_flag() -> PathBuf {
    PathBuf::from("/proc/sys/kernel/core_uses_pid")
}
fn default_linux_core_dir() -> PathBuf {
    PathBuf::from(".")
}

impl PathSettings {
    pub fn report_roots(&self) -> Vec<PathBuf> {
        if let Some(roots) = &self.report_roots {
            return roots.clone();
        }
        let mut roots = Vec::with_capacity(2);
        if let Some(home) = std::env::var_os("HOME") {
            roots.push(PathBuf::from(home));
        }
        roots.push(PathBuf::from("/"));
        roots
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            cores_dir: default_cores_dir(),
            core_uses_pid_flag: default_core_uses_pid_flag(),
            linux_core_dir: default_linux_core_dir(),
            report_roots: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct RunnerSettings {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RunnerSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SalvageConfig {
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub debugger: DebuggerSettings,
    #[serde(default)]
    pub poll: PollSettings,
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub runner: RunnerSettings,
}

impl SalvageConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: SalvageConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        if self.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }
}
