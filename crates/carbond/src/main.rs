//! carbond: carbon-aware scheduling experiment driver.
//!
//! Runs a fixed number of scheduling cycles against a cluster. The first
//! share of cycles recommends the lowest-intensity node to the orchestrator
//! as a soft preference; the rest leave placement alone. Every decision and
//! every observed placement is appended to a per-phase log.
//!
//! # Usage
//!
//! ```text
//! carbond run --config carbond.toml
//! carbond run --dry-run --static-signal DE=412,ERCOT=380,NL=290 --period 1s --cycles 20
//! carbond report --log-dir /var/log/carbon-aware
//! carbond config > carbond.toml
//! ```

mod dry_run;
mod run;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use carbon_core::ExperimentConfig;

const DEFAULT_FILTER: &str = "info,carbond=debug,carbon=debug";

#[derive(Parser)]
#[command(name = "carbond", about = "Carbon-aware scheduling experiment driver")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the experiment.
    Run(run::RunArgs),

    /// Summarize the decision logs of a finished or running experiment.
    Report {
        /// Path to carbond.toml (for log file names).
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Directory holding the decision logs.
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML.
    Config {
        /// Path to carbond.toml.
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run(args) => {
            let config = load_config(args.config.as_deref())?;
            run::execute(args, config).await
        }
        Command::Report {
            config,
            log_dir,
            json,
        } => report(config.as_deref(), log_dir, json),
        Command::Config { config } => {
            print!("{}", load_config(config.as_deref())?.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// File (or built-in reference) settings, then environment overrides.
fn load_config(path: Option<&Path>) -> anyhow::Result<ExperimentConfig> {
    let mut config = match path {
        Some(path) => ExperimentConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ExperimentConfig::reference(),
    };
    config.apply_env();
    Ok(config)
}

fn report(config: Option<&Path>, log_dir: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let dir = log_dir.unwrap_or_else(|| config.log.dir.clone());
    let files = [
        dir.join(&config.log.carbon_aware_file),
        dir.join(&config.log.baseline_file),
    ];

    let report = carbon_scheduler::summarize_files(&files)
        .with_context(|| format!("reading decision logs in {}", dir.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from([
            "carbond",
            "--log-format",
            "json",
            "run",
            "--cycles",
            "12",
            "--dry-run",
            "--static-signal",
            "DE=1,NL=2",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.cycles, Some(12));
                assert!(args.dry_run);
                assert_eq!(args.drain, "60s");
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn loads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carbond.toml");
        std::fs::write(&path, "[scheduler]\ntotal_cycles = 40\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.scheduler.total_cycles, 40);
        assert_eq!(config.nodes.len(), 3);
        assert!(load_config(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn shipped_samples_are_valid() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
        let config = ExperimentConfig::from_file(&root.join("carbond.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.nodes.len(), 3);

        let template = carbon_kube::PodTemplate::from_file(
            &root.join(&config.workload.template),
            &config.workload.exec_time_env,
        );
        assert!(template.is_ok());
    }
}
