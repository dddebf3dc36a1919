//! Decision oracle: escalates scored threats to an external reasoning
//! endpoint and always produces a usable decision, falling back to a
//! deterministic ladder when the endpoint is unreachable or unparseable.

mod client;
mod prompt;

pub use client::{Consultant, ConsultRequest, OracleClient, OracleError};
pub use prompt::{build_prompt, SYSTEM_PROMPT};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::OracleConfig;
use crate::models::{AnalysisMode, Decision, DecisionKind, LogFamily, SeverityClass, Threat};

/// Everything the oracle needs to know about one cycle.
pub struct CycleContext<'a> {
    pub threats: &'a [Threat],
    pub total_events: u64,
    pub total_processed: u64,
    pub threat_level: u8,
    pub window_secs: u64,
    pub sources: &'a [LogFamily],
}

pub struct DecisionOracle {
    mode: AnalysisMode,
    config: OracleConfig,
    consultant: Option<Box<dyn Consultant>>,
}

impl DecisionOracle {
    /// Build from config; an unconfigured endpoint (empty key) means every
    /// decision comes from the deterministic ladder.
    pub fn new(mode: AnalysisMode, config: OracleConfig) -> Self {
        let consultant: Option<Box<dyn Consultant>> = match OracleClient::new(&config) {
            Ok(client) => Some(Box::new(client)),
            Err(e) => {
                info!("Oracle disabled: {}", e);
                None
            }
        };
        Self {
            mode,
            config,
            consultant,
        }
    }

    /// Substitute a consultant (used by tests).
    pub fn with_consultant(
        mode: AnalysisMode,
        config: OracleConfig,
        consultant: Box<dyn Consultant>,
    ) -> Self {
        Self {
            mode,
            config,
            consultant: Some(consultant),
        }
    }

    /// Decide what to do about this cycle's threats. Never fails: every
    /// path ends in a Decision.
    pub async fn decide(&self, ctx: &CycleContext<'_>, model: Option<&str>) -> Decision {
        if ctx.threats.is_empty() {
            return Decision::new(
                DecisionKind::Ignore,
                95,
                "No threats above scoring threshold",
            );
        }

        let Some(consultant) = &self.consultant else {
            debug!("No oracle configured, using fallback ladder");
            return self.fallback_ladder(ctx.threats);
        };

        let request = ConsultRequest {
            model: model.unwrap_or(&self.config.model).to_string(),
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(
                self.mode,
                ctx.threats,
                ctx.total_processed,
                ctx.total_events,
                ctx.threat_level,
                ctx.window_secs,
                ctx.sources,
            ),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        match consultant.consult(request).await {
            Ok(content) => self.interpret(&content),
            Err(e) => {
                warn!("Oracle consult failed ({}), using fallback ladder", e);
                self.fallback_ladder(ctx.threats)
            }
        }
    }

    /// Turn raw model text into a decision: first balanced JSON object wins,
    /// then keyword matching, then a low-confidence ignore.
    fn interpret(&self, content: &str) -> Decision {
        if let Some(json) = extract_json_object(content) {
            if let Ok(value) = serde_json::from_str::<Value>(json) {
                if let Some(decision) = self.decision_from_json(&value) {
                    return decision;
                }
            }
        }
        self.keyword_fallback(content)
    }

    fn decision_from_json(&self, value: &Value) -> Option<Decision> {
        let kind: DecisionKind = value.get("decision")?.as_str()?.parse().ok()?;

        // Access-log deployments have no alert response; treat it as monitor
        let kind = if kind == DecisionKind::Alert && !self.mode.supports_alert() {
            DecisionKind::Monitor
        } else {
            kind
        };

        let confidence = value
            .get("confidence")
            .and_then(|c| c.as_u64())
            .map(|c| c.min(100) as u8)
            .unwrap_or(80);

        let reason = value
            .get("reason")
            .and_then(|r| r.as_str())
            .unwrap_or("Oracle decision")
            .to_string();

        let actions = value
            .get("recommended_actions")
            .or_else(|| value.get("security_recommendations"))
            .and_then(|a| a.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        Some(Decision::new(kind, confidence, reason).with_actions(actions))
    }

    /// Substring matching against the raw reply when no JSON parsed.
    fn keyword_fallback(&self, content: &str) -> Decision {
        let lower = content.to_lowercase();
        let reason = "Oracle reply carried no parseable decision";

        if lower.contains("block") {
            let confidence = match self.mode {
                AnalysisMode::Security => 85,
                AnalysisMode::AccessLog => 80,
            };
            return Decision::new(DecisionKind::Block, confidence, reason);
        }
        if lower.contains("monitor") {
            let confidence = match self.mode {
                AnalysisMode::Security => 75,
                AnalysisMode::AccessLog => 70,
            };
            return Decision::new(DecisionKind::Monitor, confidence, reason);
        }
        if self.mode.supports_alert() && lower.contains("alert") {
            return Decision::new(DecisionKind::Alert, 70, reason);
        }

        Decision::new(DecisionKind::Ignore, 50, reason)
    }

    /// Deterministic decision from the highest score when the oracle is
    /// unreachable.
    fn fallback_ladder(&self, threats: &[Threat]) -> Decision {
        let max_score = threats.iter().map(|t| t.score).max().unwrap_or(0);
        let any_critical = threats.iter().any(|t| t.severity == SeverityClass::Critical);
        let reason = format!(
            "Fallback decision from heuristic scores (max {})",
            max_score
        );

        match self.mode {
            AnalysisMode::Security => {
                if max_score >= 80 || any_critical {
                    Decision::new(DecisionKind::Block, 90, reason)
                } else if max_score >= 60 {
                    Decision::new(DecisionKind::Monitor, 80, reason)
                } else if max_score >= 40 {
                    Decision::new(DecisionKind::Alert, 70, reason)
                } else {
                    Decision::new(DecisionKind::Ignore, 60, reason)
                }
            }
            AnalysisMode::AccessLog => {
                if max_score >= 80 {
                    Decision::new(DecisionKind::Block, 85, reason)
                } else if max_score >= 60 {
                    Decision::new(DecisionKind::Monitor, 75, reason)
                } else {
                    Decision::new(DecisionKind::Ignore, 60, reason)
                }
            }
        }
    }
}

/// Find the first balanced `{ ... }` in text, skipping braces inside JSON
/// strings. Models often wrap their JSON in prose or code fences.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
