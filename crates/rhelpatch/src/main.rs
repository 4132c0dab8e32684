//! rhelpatch
//!
//! Patches RHEL hosts over SSH: pre-check, dnf upgrade, reboot when the
//! kernel changed, advisory reboot check and post-check, one kameo actor per host.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use eyre::{WrapErr, bail, eyre};
use kameo::actor::Spawn;
use rhelpatch_core::{
    FleetFilter, FleetRunConfig, OrchestratorActor, OrchestratorActorArgs, PhaseSelection,
    PhaseTag, RegisterHost, RunFleet,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod factory;
mod report;

use config::Config;
use factory::DefaultHostFactory;

/// RHEL patch orchestrator
#[derive(Parser, Debug)]
#[command(name = "rhelpatch", version, about)]
struct Cli {
    /// Config file (default: $RHELPATCH_CONFIG, ./rhelpatch.toml, /etc/rhelpatch/rhelpatch.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level; `RUST_LOG` takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run patch sessions
    Run(RunArgs),
    /// List configured hosts
    Hosts,
    /// Validate the config and print the effective patch settings
    CheckConfig,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Phase groups to run: pre_patch, patch, post_patch (default: all)
    #[arg(short, long, value_delimiter = ',')]
    tags: Vec<PhaseTag>,

    /// Only these hosts or host tags
    #[arg(short, long, value_delimiter = ',')]
    limit: Vec<String>,

    /// Skip these hosts even when --limit selects them
    #[arg(long, value_delimiter = ',', value_name = "HOSTS")]
    exclude: Vec<String>,

    /// Set perform_update = false
    #[arg(long)]
    skip_update: bool,

    /// Set default_reboot_required = true
    #[arg(long)]
    reboot: bool,

    /// Override reboot_timeout_minutes
    #[arg(long, value_name = "MINUTES")]
    reboot_timeout: Option<u64>,

    /// Hosts patched concurrently
    #[arg(short, long)]
    forks: Option<usize>,

    /// Print the final report as JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let (mut config, source) = Config::locate(cli.config.as_deref())?;

    init_tracing(
        cli.log_level.as_deref().unwrap_or(&config.run.log_level),
        cli.json_logs,
    );
    match &source {
        Some(path) => info!(path = %path.display(), "loaded configuration"),
        None => warn!("no config file found, using defaults"),
    }

    match cli.command {
        Commands::Run(args) => {
            args.apply(&mut config);
            config.validate()?;
            run(config, args).await
        }
        Commands::Hosts => {
            config.validate()?;
            print_hosts(&config);
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckConfig => {
            config.validate()?;
            let source = source.map_or_else(|| "defaults".to_string(), |p| p.display().to_string());
            println!("# source: {source}");
            println!("# hosts: {}, health checks: {}", config.host.len(), config.health_check.len());
            println!("[patch]");
            print!("{}", toml::to_string(&config.patch).wrap_err("failed to render config")?);
            println!("\n[run]");
            print!("{}", toml::to_string(&config.run).wrap_err("failed to render config")?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

impl RunArgs {
    /// CLI flags override the file
    fn apply(&self, config: &mut Config) {
        if self.skip_update {
            config.patch.perform_update = false;
        }
        if self.reboot {
            config.patch.default_reboot_required = true;
        }
        if let Some(minutes) = self.reboot_timeout {
            config.patch.reboot_timeout_minutes = minutes;
        }
        if let Some(forks) = self.forks {
            config.run.forks = forks;
        }
    }

    fn filter(&self) -> FleetFilter {
        FleetFilter {
            limit: self.limit.clone(),
            exclude_hosts: self.exclude.clone(),
        }
    }
}

async fn run(config: Config, args: RunArgs) -> Result<ExitCode> {
    if config.host.is_empty() {
        bail!("no hosts configured");
    }

    let filter = args.filter();
    let selected = config.host.iter().filter(|h| filter.matches(h)).count();
    if selected == 0 {
        bail!(
            "no configured host left after --limit {} --exclude {}",
            filter.limit.join(","),
            filter.exclude_hosts.join(",")
        );
    }

    let phases = PhaseSelection::from_tags(&args.tags);
    info!(
        hosts = selected,
        forks = config.run.forks,
        ?phases,
        perform_update = config.patch.perform_update,
        default_reboot_required = config.patch.default_reboot_required,
        "starting run"
    );

    let factory = Arc::new(DefaultHostFactory::new(config.patch.connect_timeout()));
    let orchestrator_args = OrchestratorActorArgs::new(factory, config.patch.clone())
        .with_health_checks(config.health_checks());
    let mut events = orchestrator_args.subscribe();
    let orchestrator = OrchestratorActor::spawn(orchestrator_args);

    for host in &config.host {
        orchestrator
            .ask(RegisterHost {
                config: host.clone(),
            })
            .await
            .map_err(|e| eyre!("failed to register {}: {e}", host.name))?;
    }

    let fleet = FleetRunConfig {
        batch_size: config.run.forks,
        phases,
        filter: Some(filter),
    };
    let runner = orchestrator.clone();
    let run = tokio::spawn(async move { runner.ask(RunFleet { config: fleet }).await });

    let report = report::follow_events(run, &mut events, report::print_event)
        .await
        .wrap_err("fleet run task failed")?
        .map_err(|e| eyre!("fleet run failed: {e}"))?;
    orchestrator.stop_gracefully().await.ok();

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).wrap_err("failed to serialize report")?
        );
    } else {
        report::print_summary(&report);
    }

    Ok(if report.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_hosts(config: &Config) {
    if config.host.is_empty() {
        println!("no hosts configured");
        return;
    }

    let width = config.host.iter().map(|h| h.name.len()).max().unwrap_or(4).max(4);
    println!("{:<width$}  TARGET  TAGS", "NAME");
    for host in &config.host {
        let target = if host.is_local() {
            "local".to_string()
        } else {
            format!("{}@{}:{}", host.user, host.addr, host.port)
        };
        println!("{:<width$}  {target}  {}", host.name, host.tags.join(","));
    }
}
