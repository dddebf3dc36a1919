use regex::Regex;
use std::net::IpAddr;

use super::parse_syslog_timestamp;
use crate::models::{Event, EventType, LogFamily};

/// Parser for the syslog-family security logs (UFW, kernel, auth, fail2ban,
/// general syslog).
pub struct SecurityLogParser {
    ufw: Regex,
    ipv4: Regex,
    auth_failed: Regex,
    auth_accepted: Regex,
    auth_invalid: Regex,
    auth_sudo: Regex,
    fail2ban_ban: Regex,
    fail2ban_unban: Regex,
}

impl SecurityLogParser {
    pub fn new() -> Self {
        Self {
            ufw: Regex::new(
                r"(?i)\[UFW\s+(BLOCK|ALLOW)\].*?SRC=(\d+\.\d+\.\d+\.\d+).*?DPT=(\d+).*?PROTO=(\w+)",
            )
            .expect("ufw regex"),
            ipv4: Regex::new(r"(\d+\.\d+\.\d+\.\d+)").expect("ipv4 regex"),
            auth_failed: Regex::new(r"Failed password for .* from (\d+\.\d+\.\d+\.\d+)")
                .expect("auth failed regex"),
            auth_accepted: Regex::new(r"Accepted \w+ for .* from (\d+\.\d+\.\d+\.\d+)")
                .expect("auth accepted regex"),
            auth_invalid: Regex::new(r"Invalid user .* from (\d+\.\d+\.\d+\.\d+)")
                .expect("auth invalid regex"),
            auth_sudo: Regex::new(r"sudo:.*COMMAND=").expect("auth sudo regex"),
            fail2ban_ban: Regex::new(r"Ban (\d+\.\d+\.\d+\.\d+)").expect("fail2ban ban regex"),
            fail2ban_unban: Regex::new(r"Unban (\d+\.\d+\.\d+\.\d+)")
                .expect("fail2ban unban regex"),
        }
    }

    pub fn parse_ufw(&self, line: &str) -> Option<Event> {
        let caps = self.ufw.captures(line)?;

        let action = caps[1].to_uppercase();
        let port: u16 = caps[3].parse().ok()?;

        let mut event = Event::new(line, LogFamily::Ufw);
        event.timestamp = parse_syslog_timestamp(line);
        event.source_ip = caps[2].parse::<IpAddr>().ok();
        event.target_port = Some(port);
        event.protocol = Some(caps[4].to_lowercase());

        let (event_type, severity) = classify_port(port, &action);
        event.event_type = event_type;
        event.severity = severity;
        event.action = action;

        Some(event)
    }

    pub fn parse_kernel(&self, line: &str) -> Option<Event> {
        let lower = line.to_lowercase();

        let (event_type, severity) = if lower.contains("out of memory")
            || lower.contains("oom")
        {
            (EventType::ResourceExhaustion, 5)
        } else if ["suspicious", "malicious", "backdoor", "rootkit"]
            .iter()
            .any(|k| lower.contains(k))
        {
            (EventType::MalwareDetection, 5)
        } else if ["segfault", "killed", "protection", "violation", "denied", "blocked"]
            .iter()
            .any(|k| lower.contains(k))
        {
            (EventType::KernelSecurityEvent, 4)
        } else {
            return None;
        };

        let mut event = Event::new(line, LogFamily::Kernel);
        event.timestamp = parse_syslog_timestamp(line);
        event.source_ip = self.first_ipv4(line);
        event.event_type = event_type;
        event.severity = severity;
        event.action = "kernel".to_string();
        Some(event)
    }

    pub fn parse_auth(&self, line: &str) -> Option<Event> {
        let (event_type, severity, ip) = if let Some(caps) = self.auth_failed.captures(line) {
            (EventType::SshFailedLogin, 3, caps[1].parse::<IpAddr>().ok())
        } else if let Some(caps) = self.auth_invalid.captures(line) {
            (EventType::SshInvalidUser, 4, caps[1].parse::<IpAddr>().ok())
        } else if let Some(caps) = self.auth_accepted.captures(line) {
            (EventType::SshSuccessfulLogin, 1, caps[1].parse::<IpAddr>().ok())
        } else if self.auth_sudo.is_match(line) {
            (EventType::SudoCommand, 2, None)
        } else {
            return None;
        };

        let mut event = Event::new(line, LogFamily::Auth);
        event.timestamp = parse_syslog_timestamp(line);
        event.source_ip = ip;
        event.event_type = event_type;
        event.severity = severity;
        event.action = "auth".to_string();
        if event.event_type != EventType::SudoCommand {
            event.target_port = Some(22);
        }
        Some(event)
    }

    pub fn parse_fail2ban(&self, line: &str) -> Option<Event> {
        // Unban first: "Unban x.x.x.x" also contains "Ban "
        let (event_type, severity, action, ip) =
            if let Some(caps) = self.fail2ban_unban.captures(line) {
                (
                    EventType::Fail2banUnban,
                    1u8,
                    "UNBAN",
                    caps[1].parse::<IpAddr>().ok(),
                )
            } else if let Some(caps) = self.fail2ban_ban.captures(line) {
                (
                    EventType::Fail2banBan,
                    4u8,
                    "BAN",
                    caps[1].parse::<IpAddr>().ok(),
                )
            } else {
                return None;
            };

        let mut event = Event::new(line, LogFamily::Fail2ban);
        event.timestamp = parse_syslog_timestamp(line);
        event.source_ip = ip;
        event.event_type = event_type;
        event.severity = severity;
        event.action = action.to_string();
        Some(event)
    }

    pub fn parse_syslog(&self, line: &str) -> Option<Event> {
        let lower = line.to_lowercase();

        let (event_type, severity) = if ["attack", "intrusion", "breach", "compromise"]
            .iter()
            .any(|k| lower.contains(k))
        {
            (EventType::SecurityIncident, 5)
        } else if ["error", "critical", "emergency", "alert"]
            .iter()
            .any(|k| lower.contains(k))
        {
            (EventType::SystemError, 3)
        } else {
            return None;
        };

        let mut event = Event::new(line, LogFamily::Syslog);
        event.timestamp = parse_syslog_timestamp(line);
        event.source_ip = self.first_ipv4(line);
        event.event_type = event_type;
        event.severity = severity;
        event.action = "syslog".to_string();
        Some(event)
    }

    fn first_ipv4(&self, line: &str) -> Option<IpAddr> {
        self.ipv4
            .captures(line)
            .and_then(|caps| caps[1].parse::<IpAddr>().ok())
    }
}

impl Default for SecurityLogParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a destination port plus firewall action to an event class.
fn classify_port(port: u16, action: &str) -> (EventType, u8) {
    match port {
        22 | 23 | 3389 => (EventType::RemoteAccessAttempt, 4),
        80 | 443 | 8080 | 8443 => (EventType::WebServiceProbe, 2),
        21 | 25 | 53 | 110 | 143 | 993 | 995 => (EventType::ServiceScan, 3),
        _ => {
            if action == "BLOCK" {
                (EventType::FirewallBlock, 3)
            } else {
                (EventType::FirewallAllow, 1)
            }
        }
    }
}
