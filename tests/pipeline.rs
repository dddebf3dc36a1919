//! End-to-end pipeline tests over real temp log files, with the oracle and
//! the enforcement chain substituted.

use async_trait::async_trait;
use chrono::Utc;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use logwarden::config::{AnalysisConfig, Config, EnforcementConfig, OracleConfig};
use logwarden::enforce::{BackendChain, DatabaseBackend};
use logwarden::error::Error;
use logwarden::models::{AnalysisMode, DecisionKind};
use logwarden::oracle::{Consultant, ConsultRequest, DecisionOracle, OracleError};
use logwarden::registry::Registry;
use logwarden::Warden;

struct CannedConsultant {
    reply: Option<String>,
    delay_ms: u64,
}

#[async_trait]
impl Consultant for CannedConsultant {
    async fn consult(&self, _request: ConsultRequest) -> Result<String, OracleError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }
        self.reply
            .clone()
            .ok_or_else(|| OracleError::Connection("refused".to_string()))
    }
}

fn write_log(dir: &Path, name: &str, lines: &[String]) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    path
}

fn test_config(mode: AnalysisMode, log_paths: Vec<String>) -> Config {
    let mut config = Config::default();
    config.general.mode = mode;
    config.analysis = AnalysisConfig::for_mode(mode);
    config.analysis.log_paths = log_paths;
    config.oracle = OracleConfig::for_mode(mode);
    config.enforcement = EnforcementConfig::for_mode(mode);
    config
}

fn warden(
    config: Config,
    reply: Option<String>,
    delay_ms: u64,
) -> (Warden, Registry) {
    let registry = Registry::open_memory().unwrap();
    let mode = config.general.mode;
    let oracle = DecisionOracle::with_consultant(
        mode,
        config.oracle.clone(),
        Box::new(CannedConsultant { reply, delay_ms }),
    );
    let warden = Warden::with_registry(config, registry.clone())
        .with_oracle(oracle)
        .with_chain(BackendChain::new(vec![Box::new(DatabaseBackend)]));
    (warden, registry)
}

fn clf_now() -> String {
    Utc::now().format("%d/%b/%Y:%H:%M:%S +0000").to_string()
}

fn syslog_now() -> String {
    Utc::now().format("%b %e %H:%M:%S").to_string()
}

#[tokio::test]
async fn web_attacker_gets_blocked() {
    let dir = TempDir::new().unwrap();
    let stamp = clf_now();

    // One address hammering admin paths with an offensive tool UA
    let mut lines: Vec<String> = (0..30)
        .map(|i| {
            format!(
                r#"203.0.113.66 - - [{}] "POST /wp-login.php?try={} HTTP/1.1" 403 564 "-" "sqlmap/1.7""#,
                stamp, i
            )
        })
        .collect();
    // Background noise from a legitimate client
    lines.push(format!(
        r#"198.51.100.10 - - [{}] "GET /index.html HTTP/1.1" 200 1043 "-" "Mozilla/5.0""#,
        stamp
    ));

    let path = write_log(dir.path(), "access.log", &lines);
    let config = test_config(AnalysisMode::AccessLog, vec![path.display().to_string()]);

    let reply = r#"{"decision": "block", "confidence": 92, "reason": "automated attack tooling", "recommended_actions": ["review exposed admin endpoints"]}"#;
    let (warden, registry) = warden(config, Some(reply.to_string()), 0);

    let outcome = warden.run_analysis(None).await.unwrap();
    assert_eq!(outcome.decision.kind, DecisionKind::Block);
    assert_eq!(outcome.decision.confidence, 92);
    assert_eq!(outcome.blocked_count, 1);
    assert!(outcome.threat_count >= 1);

    let blocks = registry.list_blocks(false).unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].address.to_string(), "203.0.113.66");
    assert!(blocks[0].expires_at.is_some());

    // The cycle is queryable afterwards
    let record = warden.get_details(outcome.analysis_id).unwrap();
    assert_eq!(record.decision.kind, DecisionKind::Block);
    assert!(record
        .threats
        .iter()
        .any(|t| t.address.to_string() == "203.0.113.66"));
    // The clean client never became a threat
    assert!(!record
        .threats
        .iter()
        .any(|t| t.address.to_string() == "198.51.100.10"));
}

#[tokio::test]
async fn ufw_port_scan_alerts_via_ladder() {
    let dir = TempDir::new().unwrap();
    let stamp = syslog_now();

    // Twelve distinct uncategorized ports from one source
    let lines: Vec<String> = (0..12)
        .map(|i| {
            format!(
                "{} host kernel: [UFW BLOCK] IN=eth0 OUT= SRC=203.0.113.77 DST=192.0.2.1 PROTO=TCP SPT=4444 DPT={}",
                stamp,
                9000 + i
            )
        })
        .collect();

    let path = write_log(dir.path(), "ufw.log", &lines);
    let config = test_config(AnalysisMode::Security, vec![path.display().to_string()]);

    // Oracle unreachable: the deterministic ladder decides
    let (warden, _registry) = warden(config, None, 0);

    let outcome = warden.run_analysis(None).await.unwrap();
    // Port scan alone scores 40: alert band in security mode
    assert_eq!(outcome.decision.kind, DecisionKind::Alert);
    assert_eq!(outcome.decision.confidence, 70);
    assert_eq!(outcome.blocked_count, 0);
    assert!(outcome
        .actions_taken
        .iter()
        .any(|a| a.contains("203.0.113.77")));
}

#[tokio::test]
async fn brute_force_blocks_via_ladder() {
    let dir = TempDir::new().unwrap();
    let stamp = syslog_now();

    let mut lines: Vec<String> = (0..8)
        .map(|i| {
            format!(
                "{} host sshd[1{}]: Failed password for root from 203.0.113.88 port 5{}314 ssh2",
                stamp, i, i
            )
        })
        .collect();
    lines.push(format!(
        "{} host sshd[99]: Invalid user admin from 203.0.113.88 port 60000",
        stamp
    ));

    let path = write_log(dir.path(), "auth.log", &lines);
    let config = test_config(AnalysisMode::Security, vec![path.display().to_string()]);
    let (warden, registry) = warden(config, None, 0);

    let outcome = warden.run_analysis(None).await.unwrap();
    // Brute force (+60) plus failure ratio (+30) lands in the block band
    assert_eq!(outcome.decision.kind, DecisionKind::Block);
    assert_eq!(outcome.blocked_count, 1);

    let blocks = registry.list_blocks(false).unwrap();
    assert_eq!(blocks[0].address.to_string(), "203.0.113.88");
}

#[tokio::test]
async fn quiet_logs_are_ignored_without_consult() {
    let dir = TempDir::new().unwrap();
    let stamp = syslog_now();
    let lines = vec![format!(
        "{} host sshd[5]: Accepted publickey for deploy from 192.0.2.9 port 50000 ssh2",
        stamp
    )];

    let path = write_log(dir.path(), "auth.log", &lines);
    let config = test_config(AnalysisMode::Security, vec![path.display().to_string()]);
    // A broken oracle proves no consult happens on an empty threat list
    let (warden, _registry) = warden(config, None, 0);

    let outcome = warden.run_analysis(None).await.unwrap();
    assert_eq!(outcome.decision.kind, DecisionKind::Ignore);
    assert_eq!(outcome.decision.confidence, 95);
    assert_eq!(outcome.threat_count, 0);
}

#[tokio::test]
async fn all_sources_missing_is_fatal() {
    let config = test_config(
        AnalysisMode::Security,
        vec![
            "/nonexistent/a.log".to_string(),
            "/nonexistent/b.log".to_string(),
        ],
    );
    let (warden, _registry) = warden(config, None, 0);

    let err = warden.run_analysis(None).await.unwrap_err();
    assert!(matches!(err, Error::NoInputAvailable));
}

#[tokio::test]
async fn concurrent_cycle_is_rejected() {
    let dir = TempDir::new().unwrap();
    let stamp = syslog_now();
    let lines: Vec<String> = (0..8)
        .map(|i| {
            format!(
                "{} host sshd[1{}]: Failed password for root from 203.0.113.99 port 50000 ssh2",
                stamp, i
            )
        })
        .collect();
    let path = write_log(dir.path(), "auth.log", &lines);

    let config = test_config(AnalysisMode::Security, vec![path.display().to_string()]);
    let reply = r#"{"decision": "monitor", "confidence": 70, "reason": "slow"}"#;
    let (warden, _registry) = warden(config, Some(reply.to_string()), 300);
    let warden = Arc::new(warden);

    let first = {
        let warden = warden.clone();
        tokio::spawn(async move { warden.run_analysis(None).await })
    };
    // Give the first cycle time to take the lock and park in the consult
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    let second = warden.run_analysis(None).await;
    assert!(matches!(second, Err(Error::CycleInProgress)));

    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.decision.kind, DecisionKind::Monitor);
}

#[tokio::test]
async fn parsed_and_missing_source_counts_surface() {
    let dir = TempDir::new().unwrap();
    let stamp = syslog_now();

    let mut lines: Vec<String> = (0..8)
        .map(|i| {
            format!(
                "{} host sshd[1{}]: Failed password for root from 203.0.113.44 port 50000 ssh2",
                stamp, i
            )
        })
        .collect();
    // Lines matching no pattern are read but yield no events
    lines.push("### scheduled maintenance notice ###".to_string());
    lines.push("### end of notice ###".to_string());

    let path = write_log(dir.path(), "auth.log", &lines);
    let config = test_config(
        AnalysisMode::Security,
        vec![
            path.display().to_string(),
            "/nonexistent/ufw.log".to_string(),
        ],
    );
    let (warden, _registry) = warden(config, None, 0);

    let outcome = warden.run_analysis(None).await.unwrap();
    assert_eq!(outcome.sources_missing, 1);
    assert_eq!(outcome.total_processed, 8);

    let record = warden.get_details(outcome.analysis_id).unwrap();
    assert_eq!(record.total_processed, 8);
    assert_eq!(record.total_events, 8);
}

#[tokio::test]
async fn unblock_surface_validates_addresses() {
    let config = test_config(AnalysisMode::Security, vec![]);
    let (warden, _registry) = warden(config, None, 0);

    let err = warden.unblock("not-an-ip").unwrap_err();
    assert!(matches!(err, Error::InvalidAddress(_)));

    // Valid but unknown address: succeeds, reports no row
    assert!(!warden.unblock("203.0.113.200").unwrap());
}

#[tokio::test]
async fn stats_cover_the_cycle() {
    let dir = TempDir::new().unwrap();
    let stamp = syslog_now();
    let lines: Vec<String> = (0..8)
        .map(|i| {
            format!(
                "{} host sshd[1{}]: Failed password for root from 203.0.113.55 port 50000 ssh2",
                stamp, i
            )
        })
        .collect();
    let path = write_log(dir.path(), "auth.log", &lines);
    let config = test_config(AnalysisMode::Security, vec![path.display().to_string()]);
    let (warden, _registry) = warden(config, None, 0);

    warden.run_analysis(None).await.unwrap();

    let stats = warden.get_stats().unwrap();
    assert_eq!(stats.analyses, 1);
    assert_eq!(stats.active_blocks, 1);
    assert_eq!(stats.decision_mix.get("block"), Some(&1));
    assert!(stats.total_events >= 8);
}
