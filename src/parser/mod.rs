//! Per-family log line parsing.
//!
//! Each recognized [`LogFamily`](crate::models::LogFamily) has a dedicated
//! extractor; lines that match no pattern for their family yield `None` and
//! are counted as processed only.
//!
//! Syslog-style timestamps (`Mon DD HH:MM:SS`) carry no year; the current
//! year is assumed. Around a year boundary a December line read in January
//! parses about a year in the future and passes the window filter.

mod access;
mod security;

pub use access::AccessLogParser;
pub use security::SecurityLogParser;

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};

use crate::models::{Event, LogFamily};

/// Parses lines from every recognized log family.
pub struct EventParser {
    access: AccessLogParser,
    security: SecurityLogParser,
}

impl EventParser {
    pub fn new() -> Self {
        Self {
            access: AccessLogParser::new(),
            security: SecurityLogParser::new(),
        }
    }

    /// Extract a normalized event from one line, or None if the line does
    /// not match any pattern for its family.
    pub fn parse_line(&self, line: &str, family: LogFamily) -> Option<Event> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match family {
            LogFamily::AccessLog => self.access.parse(line),
            LogFamily::Ufw => self.security.parse_ufw(line),
            LogFamily::Kernel => self.security.parse_kernel(line),
            LogFamily::Auth => self.security.parse_auth(line),
            LogFamily::Fail2ban => self.security.parse_fail2ban(line),
            LogFamily::Syslog => self.security.parse_syslog(line),
        }
    }
}

impl Default for EventParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a `Mon DD HH:MM:SS` prefix, assuming the current year.
pub(crate) fn parse_syslog_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let stamp = line.get(..15)?;
    let with_year = format!("{} {}", Utc::now().year(), stamp);
    let naive = NaiveDateTime::parse_from_str(&with_year, "%Y %b %e %H:%M:%S").ok()?;
    Utc.from_local_datetime(&naive).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_syslog_timestamp_current_year() {
        let ts = parse_syslog_timestamp("Mar 15 14:23:01 host kernel: foo").unwrap();
        assert_eq!(ts.month(), 3);
        assert_eq!(ts.day(), 15);
        assert_eq!(ts.hour(), 14);
        assert_eq!(ts.year(), Utc::now().year());
    }

    #[test]
    fn test_syslog_timestamp_single_digit_day() {
        let ts = parse_syslog_timestamp("Mar  5 04:00:59 host sshd[1]: x").unwrap();
        assert_eq!(ts.day(), 5);
    }

    #[test]
    fn test_syslog_timestamp_garbage() {
        assert!(parse_syslog_timestamp("not a timestamp at all").is_none());
        assert!(parse_syslog_timestamp("short").is_none());
    }

    #[test]
    fn test_empty_line_yields_nothing() {
        let parser = EventParser::new();
        assert!(parser.parse_line("   ", LogFamily::Syslog).is_none());
    }
}
