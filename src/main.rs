//! treeport CLI - Report test runs as a launch → suite → test → step tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use treeport::attachment::AttachmentCollector;
use treeport::client::JournalClient;
use treeport::config;
use treeport::listener::{RunnerEvent, dispatch};
use treeport::plugin::ReportPortalPlugin;
use treeport::report::PassSummary;

/// Set by the runner when tests are sharded across worker processes.
const WORKERS_ENV: &str = "RUNS_WITH_WORKERS";

#[derive(Parser)]
#[command(name = "treeport")]
#[command(about = "Report test runs to a hierarchical run report", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "treeport.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded runner events and report them
    Replay {
        /// JSON-lines file with one runner event per line
        events: PathBuf,

        /// Where backend calls are journaled
        #[arg(short, long, default_value = "treeport-journal.jsonl")]
        journal: PathBuf,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose || debug_requested(&cli.config) {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Replay { events, journal } => replay(&cli.config, &events, &journal).await,
        Commands::Validate => validate_config(&cli.config),
        Commands::Init => init_config(),
    }
}

/// Whether the config file asks for debug logging. Errors are reported later.
fn debug_requested(config_path: &Path) -> bool {
    config::load_config(config_path)
        .map(|config| config.reporter.debug)
        .unwrap_or(false)
}

async fn replay(config_path: &Path, events_path: &Path, journal_path: &Path) -> Result<()> {
    let mut config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if std::env::var_os(WORKERS_ENV).is_some() {
        config.reporter.runs_with_workers = true;
    }
    config.validate()?;

    info!("Loaded configuration from {}", config_path.display());

    if !config.reporter.enabled {
        warn!("Reporter is disabled; nothing will be reported");
        println!("Reporter is disabled in {}", config_path.display());
        return Ok(());
    }

    let content = tokio::fs::read_to_string(events_path)
        .await
        .with_context(|| format!("Failed to read events from {}", events_path.display()))?;
    let events = parse_events(&content)
        .with_context(|| format!("Invalid events file {}", events_path.display()))?;
    info!("Replaying {} events", events.len());

    let client = JournalClient::create(
        journal_path,
        config.reporter.endpoint.clone(),
        config.reporter.project.clone(),
    )
    .await
    .with_context(|| format!("Failed to open journal {}", journal_path.display()))?;
    let attachments = AttachmentCollector::new(
        config.artifacts.output_path(),
        config.artifacts.record_path(),
    );
    let plugin = ReportPortalPlugin::new(config, Arc::new(client), attachments);

    let mut completed = false;
    for event in &events {
        completed |= matches!(
            event,
            RunnerEvent::RunCompletedSingle | RunnerEvent::RunCompletedWorkers { .. }
        );
        dispatch(&plugin, event).await;
    }

    if !completed {
        info!("No completion event recorded; reporting collected tests");
        if let Err(e) = plugin.report(None).await {
            tracing::error!("Reporting failed: {}", e);
        }
    }

    match plugin.summary() {
        Some(summary) => {
            print_summary(&summary, journal_path);
            Ok(())
        }
        None => {
            eprintln!(
                "{}",
                console::style("No report was produced. See the log above.").red().bold()
            );
            std::process::exit(1);
        }
    }
}

fn parse_events(content: &str) -> Result<Vec<RunnerEvent>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}", index + 1))
        })
        .collect()
}

fn print_summary(summary: &PassSummary, journal_path: &Path) {
    println!();
    println!("{}", console::style("Report Summary").bold());
    println!("  Launch:     {}", summary.launch);
    println!("  Suites:     {}", summary.suites);
    println!("  Tests:      {}", summary.tests);
    println!("  Steps:      {}", summary.steps);
    println!("  Meta-steps: {}", summary.meta_steps);
    println!("  Logs:       {}", summary.logs);
    if summary.client_failures > 0 {
        println!(
            "  Failed calls: {}",
            console::style(summary.client_failures).red().bold()
        );
    }
    println!("  Journal:    {}", journal_path.display());
    if let Some(link) = &summary.link {
        println!("  Link:       {}", link);
    }
    println!();

    if summary.status.is_failed() {
        println!("{}", console::style("Launch failed.").red().bold());
    } else {
        println!("{}", console::style("Launch passed.").green().bold());
    }
}

fn validate_config(config_path: &Path) -> Result<()> {
    let result = config::load_config(config_path).and_then(|config| {
        config.validate()?;
        Ok(config)
    });

    match result {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Enabled: {}", config.reporter.enabled);
            if config.reporter.enabled {
                println!("  Endpoint: {}", config.reporter.endpoint);
                println!("  Project: {}", config.reporter.project);
            }
            println!(
                "  Launch: {}",
                config
                    .launch
                    .name
                    .as_deref()
                    .unwrap_or("(first suite title)")
            );
            println!("  Strict nesting: {}", config.reporter.strict_nesting);
            println!("  Runs with workers: {}", config.reporter.runs_with_workers);
            println!(
                "  Result link file: {}",
                config.artifacts.result_link_path().display()
            );

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_config() -> Result<()> {
    let config = r#"# treeport configuration file

[reporter]
enabled = true
endpoint = "https://reports.example.com/api/v1"
token = "replace-with-your-api-token"
project = "default_personal"
debug = false
# Report single-process tests with the status of their runner event
derive_test_status = false
# Keep suites and tests open until their steps are reported
strict_nesting = false
# Only report the merged worker result (also set by RUNS_WITH_WORKERS)
runs_with_workers = false

[launch]
# name = "nightly"  # defaults to the first suite title
description = ""
attributes = []

[artifacts]
output_dir = "./output"
record_dir = "./output"
result_link_file = "../test_result_env.sh"
"#;

    let path = PathBuf::from("treeport.toml");
    if path.exists() {
        eprintln!("treeport.toml already exists. Remove it first or edit manually.");
        std::process::exit(1);
    }

    std::fs::write(&path, config)?;
    println!("Created treeport.toml");
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  treeport replay events.jsonl");

    Ok(())
}
