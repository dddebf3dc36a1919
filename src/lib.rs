pub mod aggregator;
pub mod config;
pub mod enforce;
pub mod error;
pub mod executor;
pub mod models;
pub mod oracle;
pub mod parser;
pub mod registry;
pub mod scorer;
pub mod tailer;

use chrono::{Duration, Utc};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use aggregator::WindowAggregator;
use config::Config;
use enforce::BackendChain;
use error::{Error, Result};
use executor::ResponseExecutor;
use models::{AnalysisOutcome, AnalysisRecord, BlockedAddress, LogFamily, StatsReport};
use oracle::{CycleContext, DecisionOracle};
use parser::EventParser;
use registry::Registry;
use scorer::ThreatScorer;

/// Core pipeline instance: tail, parse, aggregate, score, decide, respond.
pub struct Warden {
    config: Config,
    registry: Registry,
    parser: EventParser,
    scorer: ThreatScorer,
    oracle: DecisionOracle,
    executor: ResponseExecutor,
    /// Guards the whole cycle; a second start while one runs is rejected
    cycle_lock: Arc<Mutex<()>>,
}

impl Warden {
    /// Create a new instance backed by the configured database path.
    pub fn new(config: Config) -> Result<Self> {
        let registry = Registry::open(config.db_path())?;
        Ok(Self::with_registry(config, registry))
    }

    /// Create an instance over an existing registry (used by tests with an
    /// in-memory database).
    pub fn with_registry(config: Config, registry: Registry) -> Self {
        let mode = config.general.mode;
        let scorer = ThreatScorer::new(mode, &config.analysis);
        let oracle = DecisionOracle::new(mode, config.oracle.clone());
        let chain = BackendChain::from_config(&config.enforcement);
        let executor = ResponseExecutor::new(registry.clone(), chain, &config.enforcement);

        Self {
            config,
            registry,
            parser: EventParser::new(),
            scorer,
            oracle,
            executor,
            cycle_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Swap in a different oracle (used by tests).
    pub fn with_oracle(mut self, oracle: DecisionOracle) -> Self {
        self.oracle = oracle;
        self
    }

    /// Swap in a different enforcement chain (used by tests).
    pub fn with_chain(mut self, chain: BackendChain) -> Self {
        self.executor =
            ResponseExecutor::new(self.registry.clone(), chain, &self.config.enforcement);
        self
    }

    /// Run one full analysis cycle.
    ///
    /// Fails only when a cycle is already running or every configured log
    /// source is unreadable. Parse failures, oracle failures and
    /// enforcement failures degrade inside the pipeline.
    pub async fn run_analysis(&self, model: Option<&str>) -> Result<AnalysisOutcome> {
        let _guard = self
            .cycle_lock
            .try_lock()
            .map_err(|_| Error::CycleInProgress)?;

        let started = Instant::now();
        let window_secs = self.config.analysis.interval_secs;

        // Tail every source; the cycle needs at least one readable file
        let mut events = Vec::new();
        let mut sources_read = Vec::new();
        let mut sources_missing = 0usize;
        for path in &self.config.analysis.log_paths {
            let path = PathBuf::from(path);
            if !path.is_file() {
                debug!("Log source {} not present", path.display());
                sources_missing += 1;
                continue;
            }
            let family = LogFamily::from_path(&path);
            let lines = tailer::tail_lines(&path, self.config.analysis.max_lines);
            debug!("Read {} lines from {}", lines.len(), path.display());

            for line in &lines {
                if let Some(event) = self.parser.parse_line(line, family) {
                    events.push(event);
                }
            }
            sources_read.push(family);
        }

        if sources_read.is_empty() {
            return Err(Error::NoInputAvailable);
        }
        if sources_missing > 0 {
            warn!(
                "{} of {} configured log sources unavailable",
                sources_missing,
                self.config.analysis.log_paths.len()
            );
        }
        let total_processed = events.len() as u64;

        let aggregator = WindowAggregator::new(
            Utc::now() - Duration::seconds(window_secs as i64),
            self.config.analysis.suspicious_tokens.clone(),
        );
        let summary = aggregator.fold(&events);
        for activity in summary.suspicious.iter().take(20) {
            debug!(
                "Suspicious activity: {} matched '{}' in {}",
                activity
                    .address
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                activity.token,
                activity.detail
            );
        }
        let outcome = self.scorer.score_all(&summary.per_address);

        info!(
            "Cycle: {} lines parsed, {} events in window, {} addresses, {} threats, level {}",
            total_processed,
            summary.total_events,
            summary.per_address.len(),
            outcome.threats.len(),
            outcome.threat_level
        );

        let ctx = CycleContext {
            threats: &outcome.threats,
            total_events: summary.total_events,
            total_processed,
            threat_level: outcome.threat_level,
            window_secs,
            sources: &sources_read,
        };
        let decision = self.oracle.decide(&ctx, model).await;

        info!(
            "Decision: {} (confidence {}): {}",
            decision.kind, decision.confidence, decision.reason
        );

        let report = self.executor.execute(&decision, &outcome.threats)?;

        let processing_time_ms = started.elapsed().as_millis() as u64;
        let analysis_id = self.registry.record_analysis(
            &outcome.threats,
            &decision,
            outcome.threat_level,
            summary.total_events,
            total_processed,
            &report.actions_taken,
            Some(processing_time_ms),
            model.or(Some(self.config.oracle.model.as_str())),
        )?;

        Ok(AnalysisOutcome {
            analysis_id,
            decision,
            actions_taken: report.actions_taken,
            threat_count: outcome.threats.len(),
            blocked_count: report.blocked_count,
            total_processed,
            sources_missing,
            timestamp: Utc::now(),
        })
    }

    /// Trailing-24-hour aggregates.
    pub fn get_stats(&self) -> Result<StatsReport> {
        self.registry.stats()
    }

    /// Remove a block by address string. Returns whether a registry row
    /// existed; enforcement removal is best-effort either way.
    pub fn unblock(&self, address: &str) -> Result<bool> {
        let ip: IpAddr = address
            .trim()
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_string()))?;
        self.executor.unblock(ip)
    }

    /// One past cycle with its threats and decision.
    pub fn get_details(&self, analysis_id: i64) -> Result<AnalysisRecord> {
        self.registry.get_analysis(analysis_id)
    }

    /// Current block records.
    pub fn list_blocks(&self, include_inactive: bool) -> Result<Vec<BlockedAddress>> {
        self.registry.list_blocks(include_inactive)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Timer-driven runner: one analysis cycle per configured interval until
/// shutdown.
pub struct Daemon {
    warden: Arc<Warden>,
}

impl Daemon {
    pub fn new(warden: Warden) -> Self {
        Self {
            warden: Arc::new(warden),
        }
    }

    /// Run cycles on the interval timer until ctrl-c.
    pub async fn run(&self) -> Result<()> {
        let interval_secs = self.warden.config().analysis.interval_secs;
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(interval_secs.max(60)));
        // First tick fires immediately; use it as the startup cycle
        info!("Daemon started, analyzing every {}s", interval_secs);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.warden.run_analysis(None).await {
                        Ok(outcome) => {
                            info!(
                                "Analysis {} complete: {} ({} threats, {} blocked)",
                                outcome.analysis_id,
                                outcome.decision.kind,
                                outcome.threat_count,
                                outcome.blocked_count
                            );
                        }
                        Err(Error::NoInputAvailable) => {
                            // Fatal for the daemon: nothing will appear by itself
                            return Err(Error::NoInputAvailable);
                        }
                        Err(e) => {
                            warn!("Analysis cycle failed: {}", e);
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        Ok(())
    }
}
