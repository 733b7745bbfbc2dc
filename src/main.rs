use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use depscan::{
    config::{Config, ConfigManager},
    filter::{FilterPipeline, ScanMode},
    matcher::{DepsDevLicenseLookup, LicenseMatcher, MatcherConfig},
    model::{ScanResults, VulnerabilityResults},
};
use serde::{de::DeserializeOwned, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Exit codes for CI integration
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const ERROR: u8 = 1;
    pub const FINDINGS: u8 = 2;
}

#[derive(Parser)]
#[command(name = "depscan")]
#[command(
    author,
    version,
    about = "Filter dependency scan results against ignore and license policy"
)]
struct Cli {
    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drop unscannable, irrelevant and ignored packages from scan results
    Filter {
        #[command(flatten)]
        io: IoArgs,

        #[command(flatten)]
        policy: PolicyArgs,

        /// The results come from a container image scan
        #[arg(long)]
        image: bool,
    },

    /// Drop ignored vulnerabilities from a vulnerability report
    Vulns {
        #[command(flatten)]
        io: IoArgs,

        #[command(flatten)]
        policy: PolicyArgs,

        /// Keep packages that have no vulnerabilities left
        #[arg(long)]
        all_packages: bool,
    },

    /// Look up package licenses and check them against the license policy
    Licenses {
        #[command(flatten)]
        io: IoArgs,

        #[command(flatten)]
        policy: PolicyArgs,

        /// Lookups in flight at any time
        #[arg(long)]
        max_concurrency: Option<usize>,
    },

    /// Show config file information
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

#[derive(Args)]
struct IoArgs {
    /// JSON input file, `-` for stdin
    #[arg(short, long, default_value = "-")]
    input: PathBuf,

    /// Write output to file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct PolicyArgs {
    /// Discover depscan.toml files below this directory
    #[arg(long, conflicts_with = "config")]
    config_root: Option<PathBuf>,

    /// Use this config for every path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fail on invalid config files instead of falling back to defaults
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    match run(cli.command).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

fn init_logging(quiet: bool) {
    let default_filter = if quiet {
        "depscan=warn,reqwest=warn"
    } else {
        "depscan=info,reqwest=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

async fn run(command: Commands) -> Result<u8> {
    match command {
        Commands::Filter { io, policy, image } => {
            let results: ScanResults = read_json(&io.input)?;
            let configs = load_configs(&policy)?;
            let mode = if image { ScanMode::Image } else { ScanMode::Source };

            let before = results.packages.len();
            let filtered = FilterPipeline::new().apply(results, &configs, mode);
            info!("{} of {} packages remain", filtered.packages.len(), before);

            write_json(&filtered, io.output.as_deref())?;
            Ok(exit_codes::SUCCESS)
        }
        Commands::Vulns {
            io,
            policy,
            all_packages,
        } => {
            let mut results: VulnerabilityResults = read_json(&io.input)?;
            let configs = load_configs(&policy)?;

            let removed = FilterPipeline::new().filter_vulnerabilities(&mut results, &configs, all_packages);
            if removed > 0 {
                info!("Filtered {} vulnerabilities from output", removed);
            }

            write_json(&results, io.output.as_deref())?;
            Ok(findings_code(&results))
        }
        Commands::Licenses {
            io,
            policy,
            max_concurrency,
        } => {
            let mut results: ScanResults = read_json(&io.input)?;
            let configs = load_configs(&policy)?;

            let mut config = MatcherConfig::default();
            if let Some(max) = max_concurrency {
                config.max_concurrent_batch_requests = max;
            }
            let cancel = CancellationToken::new();
            let matcher = LicenseMatcher::new(DepsDevLicenseLookup::new(&config)?, config)?
                .with_cancellation(cancel.clone());

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, returning partial license results");
                    cancel.cancel();
                }
            });

            matcher.annotate_licenses(&mut results, &configs).await;

            let violations = results
                .packages
                .iter()
                .filter(|r| !r.license_violations.is_empty())
                .count();
            write_json(&results, io.output.as_deref())?;

            if violations > 0 {
                info!("{} package/s violate the license policy", violations);
                return Ok(exit_codes::FINDINGS);
            }
            Ok(exit_codes::SUCCESS)
        }
        Commands::Config { path } => {
            handle_config(path)?;
            Ok(exit_codes::SUCCESS)
        }
    }
}

fn load_configs(policy: &PolicyArgs) -> Result<ConfigManager> {
    if let Some(path) = &policy.config {
        let config = Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?;
        return Ok(ConfigManager::with_override(config));
    }

    let default_config = match Config::load_default() {
        Ok(config) => config,
        Err(e) if policy.strict => return Err(e).context("Failed to load default config"),
        Err(e) => {
            warn!("Ignoring default config: {}", e);
            Config::default()
        }
    };

    match &policy.config_root {
        Some(root) => ConfigManager::discover(root, default_config, policy.strict)
            .with_context(|| format!("Failed to discover configs under {}", root.display())),
        None => Ok(ConfigManager::new(default_config)),
    }
}

fn read_json<T: DeserializeOwned>(input: &Path) -> Result<T> {
    let content = if input == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read {}", input.display()))?
    };

    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", input.display()))
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}

fn findings_code(results: &VulnerabilityResults) -> u8 {
    let has_findings = results
        .results
        .iter()
        .flat_map(|source| &source.packages)
        .any(|pkg| !pkg.vulnerabilities.is_empty() || !pkg.license_violations.is_empty());

    if has_findings {
        exit_codes::FINDINGS
    } else {
        exit_codes::SUCCESS
    }
}

fn handle_config(show_path: bool) -> Result<()> {
    let config_path = Config::default_path();

    if show_path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if config_path.exists() {
        let config = Config::load(&config_path)?;
        println!("Config file: {}", config_path.display());
        println!();
        println!("{}", toml::to_string_pretty(&config)?);
    } else {
        println!("No config file found.");
        println!("Create {} to ignore packages or vulnerabilities.", config_path.display());
    }

    Ok(())
}
