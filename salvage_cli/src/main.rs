use salvage_core::config::SalvageConfig;
use salvage_core::event::{Artifact, ArtifactPrefix, CrashEvent};
use salvage_core::executor::{CommandRunner, ExecutionStatus, ProcessCommand, ProcessRunner};
use salvage_core::locator::CrashArtifactLocator;
use salvage_core::platform::Platform;
use salvage_core::workdir::create_wtmp_dir;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser, global = true)]
    config_file: Option<PathBuf>,
    /// Log debug output, including every command that is run.
    #[clap(short, long, global = true)]
    verbose: bool,
    /// Print results as JSON.
    #[clap(long, global = true)]
    json: bool,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the detected platform and which crash evidence it produces.
    Platform,
    /// Find the evidence of a crash that already happened.
    Locate {
        /// Process name as the OS reports it; defaults to the file name of --path.
        #[clap(long)]
        name: Option<String>,
        #[clap(long)]
        path: PathBuf,
        #[clap(long)]
        pid: u32,
        /// Archive evidence as <PREFIX>-crash and <PREFIX>-core.gz instead of only reporting it.
        #[clap(long)]
        prefix: Option<PathBuf>,
    },
    /// Run a program once and collect crash evidence if it crashes.
    Run {
        #[clap(long)]
        prefix: PathBuf,
        #[clap(long)]
        cwd: Option<PathBuf>,
        #[clap(long)]
        timeout_ms: Option<u64>,
        #[clap(last = true, required = true)]
        command: Vec<String>,
    },
    /// Create a fresh wtmp<N> directory under BASE.
    Wtmp { base: PathBuf },
}

fn load_config(config_file: Option<PathBuf>) -> Result<SalvageConfig, anyhow::Error> {
    match config_file {
        Some(config_path) => SalvageConfig::load_from_file(&config_path),
        None => {
            let default_config_path = PathBuf::from("config.toml");
            if default_config_path.exists() {
                SalvageConfig::load_from_file(&default_config_path)
            } else {
                Ok(SalvageConfig::default())
            }
        }
    }
}

fn print_artifact(json: bool, artifact: Option<&Artifact>) -> Result<(), anyhow::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(&artifact)?);
        return Ok(());
    }
    match artifact {
        Some(artifact) => println!("{:?}: {}", artifact.kind, artifact.path.display()),
        None => println!("No crash evidence found; continuing without it."),
    }
    Ok(())
}

fn build_locator(
    runner: &mut CommandRunner,
    config: &SalvageConfig,
) -> Result<CrashArtifactLocator, anyhow::Error> {
    let platform = Platform::detect(runner)?;
    log::debug!("Detected platform: {platform}");
    let locator =
        CrashArtifactLocator::for_platform(platform.capabilities(), config, Box::new(runner.clone()))?;
    Ok(locator)
}

fn binary_path(program: &str, cwd: Option<&Path>) -> PathBuf {
    let path = PathBuf::from(program);
    let path = match cwd {
        Some(cwd) if path.is_relative() && path.components().count() > 1 => cwd.join(path),
        _ => path,
    };
    std::fs::canonicalize(&path).unwrap_or(path)
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config_file)?;
    if cli.verbose {
        config.verbose = true;
    }

    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_default_env()
        .init();
    log::debug!("Effective configuration: {config:#?}");

    let mut runner = match config.runner.timeout() {
        Some(timeout) => CommandRunner::with_default_timeout(timeout),
        None => CommandRunner::new(),
    };

    match cli.command {
        Commands::Platform => {
            let platform = Platform::detect(&mut runner)?;
            let capabilities = platform.capabilities();
            if cli.json {
                let value = serde_json::json!({
                    "platform": platform.to_string(),
                    "core-files": capabilities.supports_core_files(),
                    "crash-reporter": capabilities.supports_crash_reporter(),
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("Platform: {platform}");
                println!("Core files: {}", capabilities.supports_core_files());
                println!("Crash reporter: {}", capabilities.supports_crash_reporter());
            }
        }
        Commands::Locate {
            name,
            path,
            pid,
            prefix,
        } => {
            let prefix = prefix.map_or(ArtifactPrefix::ReturnOnly, ArtifactPrefix::Archive);
            let event = match name {
                Some(name) => CrashEvent::new(name, path, pid, prefix),
                None => CrashEvent::for_binary(path, pid, prefix),
            };
            let mut locator = build_locator(&mut runner, &config)?;
            let artifact = locator.locate(&event)?;
            print_artifact(cli.json, artifact.as_ref())?;
        }
        Commands::Run {
            prefix,
            cwd,
            timeout_ms,
            command,
        } => {
            // Cores land in the crashed process's working directory.
            if let Some(cwd) = &cwd {
                if config.paths.linux_core_dir.is_relative() {
                    config.paths.linux_core_dir = cwd.join(&config.paths.linux_core_dir);
                }
            }

            let binary = binary_path(&command[0], cwd.as_deref());
            let mut target = ProcessCommand::new(command);
            if let Some(cwd) = &cwd {
                target = target.cwd(cwd);
            }
            if let Some(ms) = timeout_ms {
                target = target.timeout(Duration::from_millis(ms));
            }

            let output = runner.run(&target)?;
            let status = ExecutionStatus::from_output(&output);
            log::info!("Target pid {} finished: {status:?}", output.pid);

            if status.is_crash() {
                let event = CrashEvent::for_binary(binary, output.pid, ArtifactPrefix::Archive(prefix));
                let mut locator = build_locator(&mut runner, &config)?;
                let artifact = locator.locate(&event)?;
                print_artifact(cli.json, artifact.as_ref())?;
            } else if cli.json {
                println!("{}", serde_json::json!({ "status": format!("{status:?}") }));
            } else {
                println!("No crash: {status:?}");
            }
        }
        Commands::Wtmp { base } => {
            let name = create_wtmp_dir(&base)
                .map_err(|e| anyhow::anyhow!("Failed to create wtmp dir under {:?}: {}", base, e))?;
            println!("{name}");
        }
    }

    Ok(())
}
