use tracing::{debug, info, warn};

use crate::config::EnforcementConfig;
use crate::enforce::BackendChain;
use crate::error::Result;
use crate::models::{BlockedAddress, Decision, DecisionKind, SeverityClass, Threat};
use crate::registry::Registry;

/// What the executor did with one cycle's decision.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub actions_taken: Vec<String>,
    pub blocked_count: u32,
}

/// Turns a cycle decision into registry writes and backend invocations.
///
/// Per-kind thresholds narrow the decision to the threats that earn the
/// response: a block decision blocks only the threats scoring at least 60
/// or classed critical, and so on down the ladder.
pub struct ResponseExecutor {
    registry: Registry,
    chain: BackendChain,
    block_duration_secs: i64,
    whitelist: Vec<String>,
}

impl ResponseExecutor {
    pub fn new(registry: Registry, chain: BackendChain, config: &EnforcementConfig) -> Self {
        Self {
            registry,
            chain,
            block_duration_secs: config.block_duration_secs,
            whitelist: config.whitelist.clone(),
        }
    }

    /// Execute the decision against the kept threats. Enforcement failures
    /// degrade to the next backend inside the chain and never fail the
    /// cycle.
    pub fn execute(&self, decision: &Decision, threats: &[Threat]) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();

        match decision.kind {
            DecisionKind::Block => self.execute_block(decision, threats, &mut report)?,
            DecisionKind::Monitor => self.execute_monitor(threats, &mut report)?,
            DecisionKind::Alert => self.execute_alert(threats, &mut report)?,
            DecisionKind::Ignore => {
                report
                    .actions_taken
                    .push(format!("No action taken: {}", decision.reason));
            }
        }

        Ok(report)
    }

    fn execute_block(
        &self,
        decision: &Decision,
        threats: &[Threat],
        report: &mut ExecutionReport,
    ) -> Result<()> {
        for threat in threats {
            if threat.score < 60 && threat.severity != SeverityClass::Critical {
                continue;
            }

            let ip = threat.address.to_string();
            if self.whitelist.contains(&ip) {
                debug!("Skipping whitelisted address {}", ip);
                report
                    .actions_taken
                    .push(format!("Skipped whitelisted {}", ip));
                continue;
            }

            let method = self.chain.apply(threat.address);

            let duration = (self.block_duration_secs > 0).then_some(self.block_duration_secs);
            let block = BlockedAddress::new(
                threat.address,
                threat.threat_types.join(","),
                format!("{} (score {})", decision.reason, threat.score),
                duration,
                method,
                threat.severity,
            );
            self.registry.upsert_block(&block)?;
            self.registry
                .watch(threat.address, &threat.threat_types, threat.score)?;

            info!("Blocked {} via {} (score {})", ip, method, threat.score);
            report
                .actions_taken
                .push(format!("Blocked {} via {}", ip, method));
            report.blocked_count += 1;
        }

        if report.blocked_count == 0 {
            report
                .actions_taken
                .push("Block decision matched no threat above the block threshold".to_string());
        }
        Ok(())
    }

    fn execute_monitor(&self, threats: &[Threat], report: &mut ExecutionReport) -> Result<()> {
        let mut watched = 0;
        for threat in threats {
            if threat.score < 40 {
                continue;
            }
            self.registry
                .watch(threat.address, &threat.threat_types, threat.score)?;
            report
                .actions_taken
                .push(format!("Watching {} (score {})", threat.address, threat.score));
            watched += 1;
        }
        if watched == 0 {
            report
                .actions_taken
                .push("Monitor decision matched no threat above the watch threshold".to_string());
        }
        Ok(())
    }

    fn execute_alert(&self, threats: &[Threat], report: &mut ExecutionReport) -> Result<()> {
        let mut alerted = 0;
        for threat in threats {
            if threat.score < 30 {
                continue;
            }
            let reason = threat.reasons.join("; ");
            self.registry
                .record_alert(threat.address, threat.score, &reason)?;
            warn!(
                "Alert: {} scored {} ({})",
                threat.address, threat.score, reason
            );
            report
                .actions_taken
                .push(format!("Alerted on {} (score {})", threat.address, threat.score));
            alerted += 1;
        }
        if alerted == 0 {
            report
                .actions_taken
                .push("Alert decision matched no threat above the alert threshold".to_string());
        }
        Ok(())
    }

    /// Remove a block: mark the registry row removed, then best-effort
    /// removal from every backend. Idempotent.
    pub fn unblock(&self, address: std::net::IpAddr) -> Result<bool> {
        let existed = self.registry.mark_removed(address)?;
        self.chain.remove(address);
        if existed {
            info!("Unblocked {}", address);
        } else {
            debug!("Unblock of {} found no registry row", address);
        }
        Ok(existed)
    }
}
