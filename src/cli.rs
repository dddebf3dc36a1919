use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tabled::{Table, Tabled};

use logwarden::config::Config;
use logwarden::models::{BlockStatus, DecisionKind, SeverityClass};
use logwarden::{Daemon, Warden};

#[derive(Parser)]
#[command(name = "logwarden")]
#[command(author, version, about = "AI-assisted log triage and IP blocking daemon")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the analysis daemon (one cycle per interval)
    Run,

    /// Run a single analysis cycle and print the outcome
    Analyze {
        /// Override the oracle model for this cycle
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Show 24-hour statistics
    Stats,

    /// List blocked addresses
    List {
        /// Include expired and removed records
        #[arg(short, long)]
        all: bool,

        /// Output format (table, json, simple)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Unblock an address
    Unblock {
        /// IP address to unblock
        ip: String,
    },

    /// Show a past analysis with its threats and decision
    Details {
        /// Analysis id
        id: i64,
    },

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Table row for the block list
#[derive(Tabled)]
struct BlockRow {
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "Threat")]
    threat: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Method")]
    method: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Expires")]
    expires: String,
}

/// Table row for threats in the details view
#[derive(Tabled)]
struct ThreatRow {
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "Score")]
    score: u32,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Types")]
    types: String,
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    match cli.command {
        Commands::Run => cmd_run(config).await,
        Commands::Analyze { model } => cmd_analyze(config, model).await,
        Commands::Stats => cmd_stats(config),
        Commands::List { all, format } => cmd_list(config, all, format),
        Commands::Unblock { ip } => cmd_unblock(config, ip),
        Commands::Details { id } => cmd_details(config, id),
        Commands::GenConfig { output } => cmd_gen_config(output),
    }
}

async fn cmd_run(config: Config) -> Result<()> {
    println!("Starting logwarden daemon...");
    let warden = Warden::new(config)?;
    let daemon = Daemon::new(warden);
    daemon.run().await?;
    Ok(())
}

async fn cmd_analyze(config: Config, model: Option<String>) -> Result<()> {
    let warden = Warden::new(config)?;
    let outcome = warden.run_analysis(model.as_deref()).await?;

    let kind = match outcome.decision.kind {
        DecisionKind::Block => "BLOCK".red().bold(),
        DecisionKind::Monitor => "MONITOR".yellow().bold(),
        DecisionKind::Alert => "ALERT".yellow().bold(),
        DecisionKind::Ignore => "IGNORE".green().bold(),
    };

    println!("Analysis #{}", outcome.analysis_id);
    println!(
        "Decision:   {} (confidence {}%)",
        kind, outcome.decision.confidence
    );
    println!("Reason:     {}", outcome.decision.reason);
    println!("Threats:    {}", outcome.threat_count);
    println!("Blocked:    {}", outcome.blocked_count);
    println!("Parsed:     {} log lines", outcome.total_processed);
    if outcome.sources_missing > 0 {
        println!(
            "{}   {} log source(s) unavailable",
            "Warning:".yellow(),
            outcome.sources_missing
        );
    }

    if !outcome.decision.recommended_actions.is_empty() {
        println!("Recommended:");
        for action in &outcome.decision.recommended_actions {
            println!("  - {}", action);
        }
    }
    println!("Actions taken:");
    for action in &outcome.actions_taken {
        println!("  - {}", action);
    }

    Ok(())
}

fn cmd_stats(config: Config) -> Result<()> {
    let warden = Warden::new(config)?;
    let stats = warden.get_stats()?;

    println!("{}", "Last 24 hours".bold());
    println!("Analyses:         {}", stats.analyses);
    println!("Events processed: {}", stats.total_events);
    println!("Avg threat level: {:.1}/5", stats.avg_threat_level);
    println!("Active blocks:    {}", stats.active_blocks);

    if !stats.decision_mix.is_empty() {
        let mut kinds: Vec<_> = stats.decision_mix.iter().collect();
        kinds.sort();
        let mix: Vec<String> = kinds.iter().map(|(k, v)| format!("{} {}", k, v)).collect();
        println!("Decisions:        {}", mix.join(", "));
    }
    if !stats.blocks_by_method.is_empty() {
        let mut methods: Vec<_> = stats.blocks_by_method.iter().collect();
        methods.sort();
        let by: Vec<String> = methods.iter().map(|(k, v)| format!("{} {}", k, v)).collect();
        println!("Blocks by method: {}", by.join(", "));
    }

    if !stats.top_watchlist.is_empty() {
        println!("\n{}", "Watchlist".bold());
        for entry in &stats.top_watchlist {
            println!(
                "  {} score {} seen {} times ({})",
                entry.address,
                entry.score,
                entry.event_count,
                entry.threat_types.join(",")
            );
        }
    }

    Ok(())
}

fn cmd_list(config: Config, all: bool, format: String) -> Result<()> {
    let warden = Warden::new(config)?;
    let blocks = warden.list_blocks(all)?;

    if blocks.is_empty() {
        println!("No blocked addresses");
        return Ok(());
    }

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&blocks)?),
        "simple" => {
            for block in &blocks {
                println!("{}", block.address);
            }
        }
        _ => {
            let rows: Vec<BlockRow> = blocks
                .iter()
                .map(|b| BlockRow {
                    ip: b.address.to_string(),
                    threat: b.threat_type.clone(),
                    severity: colorize_severity(b.severity),
                    method: b.method.to_string(),
                    status: match b.status {
                        BlockStatus::Active => "active".red().to_string(),
                        BlockStatus::Expired => "expired".dimmed().to_string(),
                        BlockStatus::Removed => "removed".dimmed().to_string(),
                    },
                    expires: b
                        .expires_at
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "never".to_string()),
                })
                .collect();
            println!("{}", Table::new(rows));
        }
    }

    Ok(())
}

fn cmd_unblock(config: Config, ip: String) -> Result<()> {
    let warden = Warden::new(config)?;
    if warden.unblock(&ip)? {
        println!("{} {}", "Unblocked".green(), ip);
    } else {
        println!("{} was not blocked (backends cleaned anyway)", ip);
    }
    Ok(())
}

fn cmd_details(config: Config, id: i64) -> Result<()> {
    let warden = Warden::new(config)?;
    let record = warden.get_details(id)?;

    println!("{} #{}", "Analysis".bold(), record.id);
    println!("Timestamp:    {}", record.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Threat level: {}/5", record.threat_level);
    println!("Events:       {}", record.total_events);
    println!("Parsed lines: {}", record.total_processed);
    if let Some(ms) = record.processing_time_ms {
        println!("Duration:     {} ms", ms);
    }
    if let Some(model) = &record.model {
        println!("Model:        {}", model);
    }
    println!(
        "Decision:     {} (confidence {}%) - {}",
        record.decision.kind, record.decision.confidence, record.decision.reason
    );

    if !record.threats.is_empty() {
        let rows: Vec<ThreatRow> = record
            .threats
            .iter()
            .map(|t| ThreatRow {
                ip: t.address.to_string(),
                score: t.score,
                severity: colorize_severity(t.severity),
                types: t.threat_types.join(","),
            })
            .collect();
        println!("{}", Table::new(rows));
    }

    if !record.actions_taken.is_empty() {
        println!("Actions:");
        for action in &record.actions_taken {
            println!("  - {}", action);
        }
    }

    Ok(())
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let config = Config::default();
    let content = toml::to_string_pretty(&config)?;

    match output {
        Some(path) => {
            config.save(&path)?;
            println!("Wrote default config to {}", path.display());
        }
        None => print!("{}", content),
    }

    Ok(())
}

fn colorize_severity(severity: SeverityClass) -> String {
    match severity {
        SeverityClass::Critical => "critical".red().bold().to_string(),
        SeverityClass::High => "high".red().to_string(),
        SeverityClass::Medium => "medium".yellow().to_string(),
        SeverityClass::Low => "low".green().to_string(),
    }
}
