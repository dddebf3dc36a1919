use std::net::IpAddr;
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::models::{AnalysisMode, SeverityClass, Statistics, Threat};

/// User agents of common offensive tools; first match short-circuits
const ATTACK_TOOL_UAS: &[&str] = &["sqlmap", "nikto", "nmap", "masscan", "zmap"];

/// Request extensions indicating script probing
const SCRIPT_EXTENSIONS: &[&str] = &[".php", ".asp", ".jsp", ".cgi", ".pl", ".py"];

/// Kept threats plus the cycle's 0-5 composite level
#[derive(Debug, Default)]
pub struct ScoreOutcome {
    pub threats: Vec<Threat>,
    pub threat_level: u8,
}

/// Scores per-address statistics against additive heuristic rules.
///
/// Pure: same statistics in, same threats out. All I/O stays in the
/// surrounding pipeline.
pub struct ThreatScorer {
    mode: AnalysisMode,
    requests_per_minute: u64,
    failed_ratio: f64,
    user_agent_threshold: usize,
    window_secs: u64,
}

impl ThreatScorer {
    pub fn new(mode: AnalysisMode, config: &AnalysisConfig) -> Self {
        Self {
            mode,
            requests_per_minute: config.requests_per_minute,
            failed_ratio: config.failed_ratio,
            user_agent_threshold: config.user_agent_threshold,
            window_secs: config.interval_secs.max(60),
        }
    }

    /// Score every address, keep those above the mode cutoff, sort stably by
    /// descending score and truncate to the mode's top-K. Takes addresses in
    /// first-seen order; equal scores keep that order through truncation.
    pub fn score_all(&self, per_address: &[(IpAddr, Statistics)]) -> ScoreOutcome {
        let mut threats: Vec<Threat> = per_address
            .iter()
            .filter_map(|(addr, stats)| {
                let threat = self.score_one(*addr, stats);
                (threat.score > self.mode.score_cutoff()).then_some(threat)
            })
            .collect();

        threats.sort_by(|a, b| b.score.cmp(&a.score));
        threats.truncate(self.mode.top_k());

        let threat_level = threats
            .iter()
            .map(|t| (t.score / 20).min(5) as u8)
            .max()
            .unwrap_or(0);

        debug!(
            "Scored {} addresses, kept {} threats, level {}",
            per_address.len(),
            threats.len(),
            threat_level
        );

        ScoreOutcome {
            threats,
            threat_level,
        }
    }

    /// Apply every rule to one address.
    pub fn score_one(&self, address: IpAddr, stats: &Statistics) -> Threat {
        let mut score = 0u32;
        let mut threat_types = Vec::new();
        let mut reasons = Vec::new();
        let mut risk_factors = Vec::new();

        let minutes = (self.window_secs as f64 / 60.0).max(1.0);
        let rate = stats.events as f64 / minutes;
        if rate > self.requests_per_minute as f64 {
            score += 50;
            threat_types.push("high_request_rate".to_string());
            reasons.push(format!("{:.0} requests/minute", rate));
        }

        if stats.events > 0 {
            let ratio = stats.failed_attempts as f64 / stats.events as f64;
            if ratio > self.failed_ratio {
                score += 30;
                threat_types.push("high_failure_rate".to_string());
                reasons.push(format!("{:.0}% of requests failed", ratio * 100.0));
            }
        }

        if stats.user_agents.len() > self.user_agent_threshold {
            score += 20;
            threat_types.push("rotating_user_agents".to_string());
            reasons.push(format!("{} distinct user agents", stats.user_agents.len()));
        }

        let script_hits = stats.urls.iter().filter(|u| is_script_url(u)).count();
        if script_hits > 5 {
            score += 25;
            threat_types.push("script_scanning".to_string());
            reasons.push(format!("{} script-file requests", script_hits));
        }

        let admin_hits = stats
            .urls
            .iter()
            .filter(|u| {
                let lower = u.to_lowercase();
                lower.contains("admin") || lower.contains("wp-")
            })
            .count();
        if admin_hits > 3 {
            score += 35;
            threat_types.push("admin_probing".to_string());
            reasons.push(format!("{} admin-path requests", admin_hits));
        }

        if stats.post_requests > 10
            && stats.failed_attempts as f64 > stats.post_requests as f64 * 0.5
        {
            score += 40;
            threat_types.push("post_flooding".to_string());
            reasons.push(format!(
                "{} POSTs with high failure count",
                stats.post_requests
            ));
        }

        for ua in &stats.user_agents {
            let lower = ua.to_lowercase();
            if let Some(tool) = ATTACK_TOOL_UAS.iter().find(|t| lower.contains(*t)) {
                score += 60;
                threat_types.push("attack_tool".to_string());
                reasons.push(format!("offensive tool user agent: {}", tool));
                risk_factors.push(format!("known tool: {}", tool));
                break;
            }
        }

        if stats.failed_attempts >= 5 && stats.event_types.contains("ssh_failed_login") {
            score += 60;
            threat_types.push("brute_force".to_string());
            reasons.push(format!("{} failed SSH logins", stats.failed_attempts));
        }

        if stats.ports_scanned.len() >= 10 {
            score += 40;
            threat_types.push("port_scan".to_string());
            reasons.push(format!("{} distinct ports probed", stats.ports_scanned.len()));
        }

        if stats.blocked_attempts >= 20 {
            score += 35;
            threat_types.push("persistent_attacker".to_string());
            reasons.push(format!(
                "{} attempts after firewall blocks",
                stats.blocked_attempts
            ));
        }

        if stats.events >= 100 {
            score += 50;
            threat_types.push("flood".to_string());
            reasons.push(format!("{} events in window", stats.events));
        }

        let avg = stats.avg_severity();
        if avg >= 3.5 {
            score += 30;
            threat_types.push("high_severity_pattern".to_string());
            reasons.push(format!("average event severity {:.1}", avg));
        }

        if stats.event_types.len() >= 3 {
            score += 25;
            threat_types.push("multi_vector".to_string());
            reasons.push(format!("{} distinct event types", stats.event_types.len()));
        }

        if stats.malware_observed {
            score += 80;
            threat_types.push("malware_activity".to_string());
            reasons.push("malware or intrusion indicators observed".to_string());
            risk_factors.push("malware indicators".to_string());
        }

        Threat {
            address,
            score,
            threat_types,
            reasons,
            risk_factors,
            severity: SeverityClass::from_score(score),
            statistics: stats.clone(),
        }
    }
}

/// Script extension at the end of the path, or immediately before the query
/// string. A mere substring hit (`/download.plot`) does not qualify.
fn is_script_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    let path = lower.split('?').next().unwrap_or("");
    SCRIPT_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisMode;
    use proptest::prelude::*;

    fn scorer(mode: AnalysisMode) -> ThreatScorer {
        ThreatScorer::new(mode, &AnalysisConfig::default())
    }

    fn addr(last: u8) -> IpAddr {
        format!("203.0.113.{}", last).parse().unwrap()
    }

    fn ssh_stats(failed: u64) -> Statistics {
        let mut stats = Statistics {
            events: failed,
            failed_attempts: failed,
            severity_sum: failed * 3,
            ..Default::default()
        };
        stats.event_types.insert("ssh_failed_login".to_string());
        stats
    }

    #[test]
    fn test_brute_force_scores() {
        let s = scorer(AnalysisMode::Security);
        let threat = s.score_one(addr(1), &ssh_stats(8));
        assert!(threat.threat_types.contains(&"brute_force".to_string()));
        assert!(threat.score >= 60);
    }

    #[test]
    fn test_below_threshold_not_kept() {
        let s = scorer(AnalysisMode::Security);
        let outcome = s.score_all(&[(addr(1), ssh_stats(2))]);
        assert!(outcome.threats.is_empty());
        assert_eq!(outcome.threat_level, 0);
    }

    #[test]
    fn test_attack_tool_short_circuits() {
        let s = scorer(AnalysisMode::AccessLog);
        let mut stats = Statistics {
            events: 3,
            ..Default::default()
        };
        stats.user_agents.insert("sqlmap/1.7".to_string());
        stats.user_agents.insert("nikto/2.5".to_string());
        let threat = s.score_one(addr(2), &stats);
        // One +60 hit even with two tool UAs present
        let tool_hits = threat
            .threat_types
            .iter()
            .filter(|t| *t == "attack_tool")
            .count();
        assert_eq!(tool_hits, 1);
        assert_eq!(threat.score, 60);
    }

    #[test]
    fn test_port_scan_and_multi_vector() {
        let s = scorer(AnalysisMode::Security);
        let mut stats = Statistics {
            events: 30,
            severity_sum: 90,
            ..Default::default()
        };
        for port in 1000..1012u16 {
            stats.ports_scanned.insert(port);
        }
        stats.event_types.insert("firewall_block".to_string());
        stats.event_types.insert("remote_access_attempt".to_string());
        stats.event_types.insert("service_scan".to_string());

        let threat = s.score_one(addr(3), &stats);
        assert!(threat.threat_types.contains(&"port_scan".to_string()));
        assert!(threat.threat_types.contains(&"multi_vector".to_string()));
        assert_eq!(threat.severity, SeverityClass::from_score(threat.score));
    }

    #[test]
    fn test_malware_is_critical() {
        let s = scorer(AnalysisMode::Security);
        let stats = Statistics {
            events: 1,
            severity_sum: 5,
            malware_observed: true,
            ..Default::default()
        };
        let threat = s.score_one(addr(4), &stats);
        assert!(threat.score >= 80);
        assert_eq!(threat.severity, SeverityClass::Critical);
    }

    #[test]
    fn test_ties_keep_first_seen_order() {
        let s = scorer(AnalysisMode::Security);
        let per_address: Vec<_> = [9, 3, 7, 1]
            .into_iter()
            .map(|last| (addr(last), ssh_stats(8)))
            .collect();
        let outcome = s.score_all(&per_address);
        let order: Vec<String> = outcome
            .threats
            .iter()
            .map(|t| t.address.to_string())
            .collect();
        // Equal scores rank in the order the addresses first appeared
        assert_eq!(
            order,
            vec!["203.0.113.9", "203.0.113.3", "203.0.113.7", "203.0.113.1"]
        );
    }

    #[test]
    fn test_top_k_truncation() {
        let s = scorer(AnalysisMode::AccessLog);
        let per_address: Vec<_> = (1..=40u8).map(|last| (addr(last), ssh_stats(8))).collect();
        let outcome = s.score_all(&per_address);
        assert_eq!(outcome.threats.len(), 20);
        // Truncation drops the latest-seen of the equal-scored tail
        assert_eq!(outcome.threats[0].address, addr(1));
        assert_eq!(outcome.threats[19].address, addr(20));
    }

    #[test]
    fn test_threat_level_capped() {
        let s = scorer(AnalysisMode::Security);
        let mut stats = ssh_stats(200);
        stats.malware_observed = true;
        for port in 1..30u16 {
            stats.ports_scanned.insert(port);
        }
        let outcome = s.score_all(&[(addr(1), stats)]);
        assert_eq!(outcome.threat_level, 5);
    }

    #[test]
    fn test_script_extension_anchored_to_path() {
        let s = scorer(AnalysisMode::AccessLog);

        let mut stats = Statistics {
            events: 6,
            ..Default::default()
        };
        for url in [
            "/download.plot",
            "/b.pyramid",
            "/docs.python-guide.html",
            "/a.phpx",
            "/c.aspen",
            "/d.cgi-archive",
        ] {
            stats.urls.push(url.to_string());
        }
        let benign = s.score_one(addr(5), &stats);
        assert!(!benign.threat_types.contains(&"script_scanning".to_string()));

        let mut stats = Statistics {
            events: 6,
            ..Default::default()
        };
        for i in 0..6 {
            stats.urls.push(format!("/index.php?id={}", i));
        }
        let probing = s.score_one(addr(5), &stats);
        assert!(probing
            .threat_types
            .contains(&"script_scanning".to_string()));
    }

    proptest! {
        #[test]
        fn prop_more_failures_never_lower_score(base in 0u64..50, extra in 0u64..50) {
            let s = scorer(AnalysisMode::Security);
            let low = s.score_one(addr(1), &ssh_stats(base));
            let high = s.score_one(addr(1), &ssh_stats(base + extra));
            prop_assert!(high.score >= low.score);
        }

        #[test]
        fn prop_score_matches_severity_band(failed in 0u64..300, ports in 0usize..40) {
            let s = scorer(AnalysisMode::Security);
            let mut stats = ssh_stats(failed);
            for p in 0..ports {
                stats.ports_scanned.insert(p as u16);
            }
            let threat = s.score_one(addr(1), &stats);
            prop_assert_eq!(threat.severity, SeverityClass::from_score(threat.score));
        }
    }
}
