use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::debug;

use crate::models::{Event, EventType, Statistics};

/// Paths and payload fragments that mark reconnaissance regardless of the
/// configured token list
const SCANNER_FRAGMENTS: &[&str] = &[
    "/admin",
    "/wp-",
    ".env",
    ".git",
    "phpmyadmin",
    "phpinfo",
    "eval(",
    "base64",
];

/// One suspicious-activity observation, kept beside the per-address
/// statistics for the oracle prompt
#[derive(Debug, Clone)]
pub struct SuspiciousActivity {
    pub address: Option<IpAddr>,
    pub token: String,
    pub detail: String,
}

/// Output of folding one cycle's events
#[derive(Debug, Default)]
pub struct WindowSummary {
    /// Per-address statistics, in the order each address was first seen.
    /// The scorer's stable sort relies on this for equal-score ranking.
    pub per_address: Vec<(IpAddr, Statistics)>,
    pub suspicious: Vec<SuspiciousActivity>,
    pub total_events: u64,
}

impl WindowSummary {
    pub fn stats_for(&self, addr: &IpAddr) -> Option<&Statistics> {
        self.per_address
            .iter()
            .find(|(a, _)| a == addr)
            .map(|(_, s)| s)
    }
}

/// Folds parsed events into per-address statistics for one analysis window.
pub struct WindowAggregator {
    window_start: DateTime<Utc>,
    suspicious_tokens: Vec<String>,
}

impl WindowAggregator {
    pub fn new(window_start: DateTime<Utc>, suspicious_tokens: Vec<String>) -> Self {
        Self {
            window_start,
            suspicious_tokens,
        }
    }

    /// Fold events into the summary. Events with a known timestamp before
    /// the window start are dropped; unknown timestamps are included.
    pub fn fold(&self, events: &[Event]) -> WindowSummary {
        let mut summary = WindowSummary::default();
        let mut index: HashMap<IpAddr, usize> = HashMap::new();

        for event in events {
            if let Some(ts) = event.timestamp {
                if ts < self.window_start {
                    continue;
                }
            }

            summary.total_events += 1;
            self.collect_suspicious(event, &mut summary.suspicious);

            let Some(addr) = event.source_ip else {
                continue;
            };

            let idx = match index.get(&addr) {
                Some(&i) => i,
                None => {
                    summary.per_address.push((addr, Statistics::default()));
                    let i = summary.per_address.len() - 1;
                    index.insert(addr, i);
                    i
                }
            };
            let stats = &mut summary.per_address[idx].1;
            stats.events += 1;
            stats.severity_sum += event.severity as u64;
            stats.event_types.insert(event.event_type.to_string());

            if event.event_type.is_failed_auth() {
                stats.failed_attempts += 1;
            }
            if event.event_type == EventType::FirewallBlock || event.action == "BLOCK" {
                stats.blocked_attempts += 1;
            }
            if event.event_type.is_malicious() {
                stats.malware_observed = true;
            }
            if let Some(port) = event.target_port {
                stats.ports_scanned.insert(port);
            }

            if let Some(http) = &event.http {
                if !http.user_agent.is_empty() {
                    stats.user_agents.insert(http.user_agent.clone());
                }
                stats.urls.push(http.url.clone());
                if http.method.eq_ignore_ascii_case("POST") {
                    stats.post_requests += 1;
                }
                if http.status >= 400 {
                    stats.failed_attempts += 1;
                }
            }

            if let Some(ts) = event.timestamp {
                stats.first_seen = Some(match stats.first_seen {
                    Some(first) if first <= ts => first,
                    _ => ts,
                });
                stats.last_seen = Some(match stats.last_seen {
                    Some(last) if last >= ts => last,
                    _ => ts,
                });
            }
        }

        debug!(
            "Window fold: {} events across {} addresses, {} suspicious hits",
            summary.total_events,
            summary.per_address.len(),
            summary.suspicious.len()
        );

        summary
    }

    fn collect_suspicious(&self, event: &Event, out: &mut Vec<SuspiciousActivity>) {
        let Some(http) = &event.http else {
            return;
        };

        let ua = http.user_agent.to_lowercase();
        let url = http.url.to_lowercase();

        for token in &self.suspicious_tokens {
            if ua.contains(token.as_str()) || url.contains(token.as_str()) {
                out.push(SuspiciousActivity {
                    address: event.source_ip,
                    token: token.clone(),
                    detail: format!("{} {}", http.method, http.url),
                });
                return;
            }
        }

        for fragment in SCANNER_FRAGMENTS {
            if url.contains(fragment) {
                out.push(SuspiciousActivity {
                    address: event.source_ip,
                    token: fragment.to_string(),
                    detail: format!("{} {}", http.method, http.url),
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HttpInfo, LogFamily};
    use chrono::Duration;

    fn event_at(ip: &str, minutes_ago: i64) -> Event {
        let mut e = Event::new("test line", LogFamily::Auth);
        e.source_ip = Some(ip.parse().unwrap());
        e.timestamp = Some(Utc::now() - Duration::minutes(minutes_ago));
        e.event_type = EventType::SshFailedLogin;
        e.severity = 3;
        e
    }

    fn aggregator() -> WindowAggregator {
        WindowAggregator::new(
            Utc::now() - Duration::minutes(10),
            vec!["sqlmap".to_string(), "scan".to_string()],
        )
    }

    #[test]
    fn test_old_events_dropped() {
        let events = vec![event_at("203.0.113.1", 1), event_at("203.0.113.1", 60)];
        let summary = aggregator().fold(&events);
        assert_eq!(summary.total_events, 1);
        assert_eq!(summary.per_address.len(), 1);
    }

    #[test]
    fn test_unknown_timestamp_included() {
        let mut e = event_at("203.0.113.1", 1);
        e.timestamp = None;
        let summary = aggregator().fold(&[e]);
        assert_eq!(summary.total_events, 1);
    }

    #[test]
    fn test_statistics_accumulate() {
        let mut e1 = event_at("203.0.113.1", 1);
        e1.target_port = Some(22);
        let mut e2 = event_at("203.0.113.1", 2);
        e2.target_port = Some(23);
        e2.event_type = EventType::FirewallBlock;
        e2.action = "BLOCK".to_string();

        let summary = aggregator().fold(&[e1, e2]);
        let stats = summary
            .stats_for(&"203.0.113.1".parse().unwrap())
            .unwrap();
        assert_eq!(stats.events, 2);
        assert_eq!(stats.failed_attempts, 1);
        assert_eq!(stats.blocked_attempts, 1);
        assert_eq!(stats.ports_scanned.len(), 2);
        assert_eq!(stats.event_types.len(), 2);
        assert!(stats.first_seen.unwrap() < stats.last_seen.unwrap());
    }

    #[test]
    fn test_http_statistics() {
        let mut e = event_at("203.0.113.5", 1);
        e.event_type = EventType::WebRequest;
        e.http = Some(HttpInfo {
            method: "POST".to_string(),
            url: "/wp-login.php".to_string(),
            status: 403,
            size: 100,
            user_agent: "sqlmap/1.7".to_string(),
        });

        let summary = aggregator().fold(&[e]);
        let stats = summary
            .stats_for(&"203.0.113.5".parse().unwrap())
            .unwrap();
        assert_eq!(stats.post_requests, 1);
        assert_eq!(stats.user_agents.len(), 1);
        assert_eq!(stats.urls.len(), 1);
        // SshFailedLogin tag swapped out, 403 counts as failed
        assert_eq!(stats.failed_attempts, 1);

        // sqlmap token hit
        assert_eq!(summary.suspicious.len(), 1);
        assert_eq!(summary.suspicious[0].token, "sqlmap");
    }

    #[test]
    fn test_scanner_fragment_hit() {
        let mut e = event_at("203.0.113.6", 1);
        e.event_type = EventType::WebRequest;
        e.http = Some(HttpInfo {
            method: "GET".to_string(),
            url: "/.env".to_string(),
            status: 404,
            size: 0,
            user_agent: "Mozilla/5.0".to_string(),
        });

        let summary = aggregator().fold(&[e]);
        assert_eq!(summary.suspicious.len(), 1);
        assert_eq!(summary.suspicious[0].token, ".env");
    }

    #[test]
    fn test_server_errors_count_as_failed() {
        let events: Vec<Event> = (0..20)
            .map(|_| {
                let mut e = event_at("203.0.113.8", 1);
                e.event_type = EventType::WebRequest;
                e.http = Some(HttpInfo {
                    method: "GET".to_string(),
                    url: "/api/orders".to_string(),
                    status: 500,
                    size: 0,
                    user_agent: "python-requests/2.31".to_string(),
                });
                e
            })
            .collect();

        let summary = aggregator().fold(&events);
        let stats = summary
            .stats_for(&"203.0.113.8".parse().unwrap())
            .unwrap();
        assert_eq!(stats.failed_attempts, 20);
    }

    #[test]
    fn test_addresses_keep_first_seen_order() {
        let events = vec![
            event_at("203.0.113.2", 1),
            event_at("203.0.113.1", 1),
            event_at("203.0.113.2", 2),
        ];
        let summary = aggregator().fold(&events);
        let order: Vec<String> = summary
            .per_address
            .iter()
            .map(|(a, _)| a.to_string())
            .collect();
        assert_eq!(order, vec!["203.0.113.2", "203.0.113.1"]);
    }

    #[test]
    fn test_eventless_ip_absent() {
        let mut e = event_at("203.0.113.1", 1);
        e.source_ip = None;
        let summary = aggregator().fold(&[e]);
        assert_eq!(summary.total_events, 1);
        assert!(summary.per_address.is_empty());
    }
}
