use chrono::{NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::net::IpAddr;

use crate::models::{Event, EventType, HttpInfo, LogFamily};

/// Parser for nginx/apache combined-format access logs.
pub struct AccessLogParser {
    combined: Regex,
    // Older apache configs log the request line unquoted
    unquoted: Regex,
}

impl AccessLogParser {
    pub fn new() -> Self {
        let combined = Regex::new(
            r#"^(\S+) - (\S+) \[(.*?)\] "(\S+) (.*?) (\S+)" (\d+) (\d+) "([^"]*)" "([^"]*)""#,
        )
        .expect("access log regex");
        let unquoted = Regex::new(
            r#"^(\S+) - (\S+) \[(.*?)\] (\S+) (\S+) (\S+) (\d+) (\d+)(?: "([^"]*)" "([^"]*)")?"#,
        )
        .expect("access log fallback regex");

        Self { combined, unquoted }
    }

    pub fn parse(&self, line: &str) -> Option<Event> {
        if let Some(caps) = self.combined.captures(line) {
            let mut event = Event::new(line, LogFamily::AccessLog);
            event.source_ip = caps[1].parse::<IpAddr>().ok();
            event.timestamp = parse_clf_timestamp(&caps[3]);
            event.event_type = EventType::WebRequest;
            event.action = "request".to_string();
            event.severity = severity_for_status(caps[7].parse().unwrap_or(0));
            event.http = Some(HttpInfo {
                method: caps[4].to_string(),
                url: truncate_url(&caps[5]),
                status: caps[7].parse().unwrap_or(0),
                size: caps[8].parse().unwrap_or(0),
                user_agent: caps[10].to_string(),
            });
            return Some(event);
        }

        if let Some(caps) = self.unquoted.captures(line) {
            let mut event = Event::new(line, LogFamily::AccessLog);
            event.source_ip = caps[1].parse::<IpAddr>().ok();
            event.timestamp = parse_clf_timestamp(&caps[3]);
            event.event_type = EventType::WebRequest;
            event.action = "request".to_string();
            event.severity = severity_for_status(caps[7].parse().unwrap_or(0));
            event.http = Some(HttpInfo {
                method: caps[4].to_string(),
                url: truncate_url(&caps[5]),
                status: caps[7].parse().unwrap_or(0),
                size: caps[8].parse().unwrap_or(0),
                user_agent: caps
                    .get(10)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            });
            return Some(event);
        }

        None
    }
}

impl Default for AccessLogParser {
    fn default() -> Self {
        Self::new()
    }
}

fn severity_for_status(status: u16) -> u8 {
    match status {
        401 | 403 => 3,
        400..=499 => 2,
        500..=599 => 2,
        _ => 1,
    }
}

fn truncate_url(url: &str) -> String {
    let mut s = url.to_string();
    if s.len() > 100 {
        let mut end = 100;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

/// `10/Oct/2024:13:55:36 +0000` — zone suffix tolerated and ignored
fn parse_clf_timestamp(stamp: &str) -> Option<chrono::DateTime<Utc>> {
    let base = stamp.split_whitespace().next()?;
    let naive = NaiveDateTime::parse_from_str(base, "%d/%b/%Y:%H:%M:%S").ok()?;
    Utc.from_local_datetime(&naive).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMBINED: &str = r#"203.0.113.7 - - [10/Oct/2024:13:55:36 +0000] "GET /wp-login.php HTTP/1.1" 403 564 "-" "sqlmap/1.7""#;

    #[test]
    fn test_combined_line() {
        let parser = AccessLogParser::new();
        let event = parser.parse(COMBINED).unwrap();
        assert_eq!(event.source_ip.unwrap().to_string(), "203.0.113.7");
        assert_eq!(event.event_type, EventType::WebRequest);

        let http = event.http.unwrap();
        assert_eq!(http.method, "GET");
        assert_eq!(http.url, "/wp-login.php");
        assert_eq!(http.status, 403);
        assert_eq!(http.size, 564);
        assert_eq!(http.user_agent, "sqlmap/1.7");
        assert_eq!(event.severity, 3);

        let ts = event.timestamp.unwrap();
        assert_eq!(ts.format("%d/%b/%Y").to_string(), "10/Oct/2024");
    }

    #[test]
    fn test_unquoted_fallback() {
        let parser = AccessLogParser::new();
        let line = "198.51.100.4 - - [10/Oct/2024:13:55:36 +0000] GET /index.html HTTP/1.0 200 1043";
        let event = parser.parse(line).unwrap();
        let http = event.http.unwrap();
        assert_eq!(http.method, "GET");
        assert_eq!(http.status, 200);
        assert!(http.user_agent.is_empty());
    }

    #[test]
    fn test_unquoted_fallback_keeps_user_agent() {
        let parser = AccessLogParser::new();
        let line = r#"198.51.100.4 - - [10/Oct/2024:13:55:36 +0000] GET /index.php HTTP/1.0 200 1043 "-" "sqlmap/1.7""#;
        let event = parser.parse(line).unwrap();
        let http = event.http.unwrap();
        assert_eq!(http.method, "GET");
        assert_eq!(http.user_agent, "sqlmap/1.7");
    }

    #[test]
    fn test_garbage_yields_none() {
        let parser = AccessLogParser::new();
        assert!(parser.parse("totally not an access log line").is_none());
    }

    #[test]
    fn test_url_truncated() {
        let parser = AccessLogParser::new();
        let long_url = format!("/{}", "a".repeat(300));
        let line = format!(
            r#"203.0.113.7 - - [10/Oct/2024:13:55:36 +0000] "GET {} HTTP/1.1" 200 10 "-" "curl/8""#,
            long_url
        );
        let event = parser.parse(&line).unwrap();
        assert_eq!(event.http.unwrap().url.len(), 100);
    }
}
