//! Prompt assembly for the decision consult.
//!
//! The prompt is bounded: top 7 threats (security) or top 5 (access log),
//! a handful of reasons each, aggregate counts only. Raw log lines never
//! go to the wire.

use crate::models::{AnalysisMode, LogFamily, Threat};

pub const SYSTEM_PROMPT: &str = "You are a network security analyst. You receive summarized \
threat data from server logs and must decide on a response. Reply with a JSON object: \
{\"decision\": \"block\"|\"monitor\"|\"alert\"|\"ignore\", \"confidence\": 0-100, \
\"reason\": \"...\", \"recommended_actions\": [\"...\"]}. Be conservative: block only \
clear attacks.";

fn threats_in_prompt(mode: AnalysisMode) -> usize {
    match mode {
        AnalysisMode::AccessLog => 5,
        AnalysisMode::Security => 7,
    }
}

/// Build the user prompt for one cycle.
pub fn build_prompt(
    mode: AnalysisMode,
    threats: &[Threat],
    total_processed: u64,
    total_events: u64,
    threat_level: u8,
    window_secs: u64,
    sources: &[LogFamily],
) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "Analysis period: last {} minutes\n",
        window_secs / 60
    ));
    prompt.push_str(&format!("Log lines parsed: {}\n", total_processed));
    prompt.push_str(&format!("Events in period: {}\n", total_events));
    prompt.push_str(&format!("Composite threat level: {}/5\n", threat_level));

    let sources: Vec<String> = sources.iter().map(|s| s.to_string()).collect();
    prompt.push_str(&format!("Log sources: {}\n", sources.join(", ")));
    prompt.push_str(&format!("Detected threats: {}\n\n", threats.len()));

    for (i, threat) in threats.iter().take(threats_in_prompt(mode)).enumerate() {
        prompt.push_str(&format!(
            "Threat {}: {} (score {}, severity {})\n",
            i + 1,
            threat.address,
            threat.score,
            threat.severity
        ));
        prompt.push_str(&format!("  Types: {}\n", threat.threat_types.join(", ")));
        for reason in threat.reasons.iter().take(4) {
            prompt.push_str(&format!("  - {}\n", reason));
        }
        prompt.push_str(&format!(
            "  Events: {}, failed: {}, ports: {}\n",
            threat.statistics.events,
            threat.statistics.failed_attempts,
            threat.statistics.ports_scanned.len()
        ));
    }

    if mode.supports_alert() {
        prompt.push_str("\nDecide: block, monitor, alert, or ignore.\n");
    } else {
        prompt.push_str("\nDecide: block, monitor, or ignore.\n");
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SeverityClass, Statistics};

    fn threat(last: u8, score: u32) -> Threat {
        Threat {
            address: format!("203.0.113.{}", last).parse().unwrap(),
            score,
            threat_types: vec!["brute_force".to_string()],
            reasons: vec!["8 failed SSH logins".to_string()],
            risk_factors: vec![],
            severity: SeverityClass::from_score(score),
            statistics: Statistics::default(),
        }
    }

    #[test]
    fn test_prompt_bounded_to_top_threats() {
        let threats: Vec<Threat> = (1..=20).map(|i| threat(i, 90)).collect();
        let prompt = build_prompt(
            AnalysisMode::Security,
            &threats,
            640,
            500,
            4,
            600,
            &[LogFamily::Auth, LogFamily::Ufw],
        );
        assert!(prompt.contains("Threat 7:"));
        assert!(!prompt.contains("Threat 8:"));
        assert!(prompt.contains("Detected threats: 20"));
        assert!(prompt.contains("Log lines parsed: 640"));
        assert!(prompt.contains("Events in period: 500"));
        assert!(prompt.contains("alert"));
    }

    #[test]
    fn test_access_prompt_has_no_alert() {
        let threats = vec![threat(1, 90)];
        let prompt = build_prompt(
            AnalysisMode::AccessLog,
            &threats,
            120,
            100,
            4,
            300,
            &[LogFamily::AccessLog],
        );
        assert!(prompt.contains("block, monitor, or ignore"));
    }

    #[test]
    fn test_raw_messages_absent() {
        let mut t = threat(1, 90);
        t.statistics.urls.push("/secret-path-never-sent".to_string());
        let prompt = build_prompt(
            AnalysisMode::Security,
            &[t],
            12,
            10,
            4,
            600,
            &[LogFamily::Auth],
        );
        assert!(!prompt.contains("secret-path-never-sent"));
    }
}
