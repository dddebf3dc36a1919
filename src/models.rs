use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;

/// Which log family a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFamily {
    AccessLog,
    Ufw,
    Kernel,
    Auth,
    Fail2ban,
    Syslog,
}

impl LogFamily {
    /// Infer the family from a log file path (by basename)
    pub fn from_path(path: &std::path::Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if name.contains("access") {
            LogFamily::AccessLog
        } else if name.contains("ufw") {
            LogFamily::Ufw
        } else if name.contains("kern") {
            LogFamily::Kernel
        } else if name.contains("auth") {
            LogFamily::Auth
        } else if name.contains("fail2ban") {
            LogFamily::Fail2ban
        } else {
            LogFamily::Syslog
        }
    }
}

impl std::fmt::Display for LogFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFamily::AccessLog => write!(f, "access"),
            LogFamily::Ufw => write!(f, "ufw"),
            LogFamily::Kernel => write!(f, "kernel"),
            LogFamily::Auth => write!(f, "auth"),
            LogFamily::Fail2ban => write!(f, "fail2ban"),
            LogFamily::Syslog => write!(f, "syslog"),
        }
    }
}

/// Normalized category of a log occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FirewallBlock,
    FirewallAllow,
    RemoteAccessAttempt,
    WebServiceProbe,
    ServiceScan,
    SshFailedLogin,
    SshSuccessfulLogin,
    SshInvalidUser,
    SudoCommand,
    KernelSecurityEvent,
    ResourceExhaustion,
    MalwareDetection,
    SystemError,
    SecurityIncident,
    Fail2banBan,
    Fail2banUnban,
    WebRequest,
    Unknown,
}

impl EventType {
    /// Failed-auth events counted toward the brute-force statistic
    pub fn is_failed_auth(&self) -> bool {
        matches!(self, EventType::SshFailedLogin | EventType::SshInvalidUser)
    }

    /// Events that indicate malware or an active intrusion
    pub fn is_malicious(&self) -> bool {
        matches!(
            self,
            EventType::MalwareDetection | EventType::SecurityIncident
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::FirewallBlock => "firewall_block",
            EventType::FirewallAllow => "firewall_allow",
            EventType::RemoteAccessAttempt => "remote_access_attempt",
            EventType::WebServiceProbe => "web_service_probe",
            EventType::ServiceScan => "service_scan",
            EventType::SshFailedLogin => "ssh_failed_login",
            EventType::SshSuccessfulLogin => "ssh_successful_login",
            EventType::SshInvalidUser => "ssh_invalid_user",
            EventType::SudoCommand => "sudo_command",
            EventType::KernelSecurityEvent => "kernel_security_event",
            EventType::ResourceExhaustion => "resource_exhaustion",
            EventType::MalwareDetection => "malware_detection",
            EventType::SystemError => "system_error",
            EventType::SecurityIncident => "security_incident",
            EventType::Fail2banBan => "fail2ban_ban",
            EventType::Fail2banUnban => "fail2ban_unban",
            EventType::WebRequest => "web_request",
            EventType::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// HTTP request details carried by access-log events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpInfo {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub size: u64,
    pub user_agent: String,
}

/// One normalized log occurrence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Best-effort parsed; None when the line carried no usable timestamp
    pub timestamp: Option<DateTime<Utc>>,
    pub source_ip: Option<IpAddr>,
    pub event_type: EventType,
    pub target_port: Option<u16>,
    pub protocol: Option<String>,
    /// Free-form action from the line (BLOCK, ALLOW, BAN, request, ...)
    pub action: String,
    /// Raw line, truncated to 1000 chars
    pub message: String,
    pub source_log: LogFamily,
    /// 1 (informational) to 5 (critical)
    pub severity: u8,
    pub http: Option<HttpInfo>,
}

impl Event {
    pub fn new(line: &str, source_log: LogFamily) -> Self {
        let trimmed = line.trim();
        let message = if trimmed.len() > 1000 {
            let mut end = 1000;
            while !trimmed.is_char_boundary(end) {
                end -= 1;
            }
            trimmed[..end].to_string()
        } else {
            trimmed.to_string()
        };

        Self {
            timestamp: None,
            source_ip: None,
            event_type: EventType::Unknown,
            target_port: None,
            protocol: None,
            action: "unknown".to_string(),
            message,
            source_log,
            severity: 1,
            http: None,
        }
    }
}

/// Per-source-address accumulator for one analysis window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub events: u64,
    pub failed_attempts: u64,
    pub blocked_attempts: u64,
    pub post_requests: u64,
    pub severity_sum: u64,
    pub user_agents: HashSet<String>,
    pub ports_scanned: HashSet<u16>,
    pub event_types: HashSet<String>,
    /// URLs seen from this address, each truncated to 100 chars
    pub urls: Vec<String>,
    pub malware_observed: bool,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Statistics {
    /// Mean severity across all events, 0.0 when empty
    pub fn avg_severity(&self) -> f64 {
        if self.events == 0 {
            0.0
        } else {
            self.severity_sum as f64 / self.events as f64
        }
    }
}

/// Severity banding derived from the threat score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityClass {
    Low,
    Medium,
    High,
    Critical,
}

impl SeverityClass {
    pub fn from_score(score: u32) -> Self {
        if score >= 80 {
            SeverityClass::Critical
        } else if score >= 60 {
            SeverityClass::High
        } else if score >= 40 {
            SeverityClass::Medium
        } else {
            SeverityClass::Low
        }
    }
}

impl std::fmt::Display for SeverityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeverityClass::Low => write!(f, "low"),
            SeverityClass::Medium => write!(f, "medium"),
            SeverityClass::High => write!(f, "high"),
            SeverityClass::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for SeverityClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(SeverityClass::Low),
            "medium" => Ok(SeverityClass::Medium),
            "high" => Ok(SeverityClass::High),
            "critical" => Ok(SeverityClass::Critical),
            other => Err(format!("Unknown severity class: {}", other)),
        }
    }
}

/// A scored verdict for one source address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Threat {
    pub address: IpAddr,
    pub score: u32,
    pub threat_types: Vec<String>,
    /// Ordered, human-readable rule hits
    pub reasons: Vec<String>,
    pub risk_factors: Vec<String>,
    pub severity: SeverityClass,
    pub statistics: Statistics,
}

/// What the oracle (or the fallback ladder) decided for a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    Block,
    Monitor,
    Alert,
    Ignore,
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionKind::Block => write!(f, "block"),
            DecisionKind::Monitor => write!(f, "monitor"),
            DecisionKind::Alert => write!(f, "alert"),
            DecisionKind::Ignore => write!(f, "ignore"),
        }
    }
}

impl std::str::FromStr for DecisionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "block" => Ok(DecisionKind::Block),
            "monitor" => Ok(DecisionKind::Monitor),
            "alert" => Ok(DecisionKind::Alert),
            "ignore" => Ok(DecisionKind::Ignore),
            other => Err(format!("Unknown decision kind: {}", other)),
        }
    }
}

/// Oracle output for one analysis cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub kind: DecisionKind,
    /// 0-100
    pub confidence: u8,
    pub reason: String,
    pub recommended_actions: Vec<String>,
}

impl Decision {
    pub fn new(kind: DecisionKind, confidence: u8, reason: impl Into<String>) -> Self {
        Self {
            kind,
            confidence,
            reason: reason.into(),
            recommended_actions: Vec::new(),
        }
    }

    pub fn with_actions(mut self, actions: Vec<String>) -> Self {
        self.recommended_actions = actions;
        self
    }
}

/// Which backend actually holds the block rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementMethod {
    Ufw,
    Iptables,
    Htaccess,
    /// Bookkeeping-only record, always available
    Database,
}

impl std::fmt::Display for EnforcementMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnforcementMethod::Ufw => write!(f, "ufw"),
            EnforcementMethod::Iptables => write!(f, "iptables"),
            EnforcementMethod::Htaccess => write!(f, "htaccess"),
            EnforcementMethod::Database => write!(f, "database"),
        }
    }
}

impl std::str::FromStr for EnforcementMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ufw" => Ok(EnforcementMethod::Ufw),
            "iptables" => Ok(EnforcementMethod::Iptables),
            "htaccess" => Ok(EnforcementMethod::Htaccess),
            "database" => Ok(EnforcementMethod::Database),
            other => Err(format!("Unknown enforcement method: {}", other)),
        }
    }
}

/// Lifecycle state of a block record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    Active,
    Expired,
    /// Explicitly unblocked; terminal but retained for audit
    Removed,
}

impl std::fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockStatus::Active => write!(f, "active"),
            BlockStatus::Expired => write!(f, "expired"),
            BlockStatus::Removed => write!(f, "removed"),
        }
    }
}

impl std::str::FromStr for BlockStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(BlockStatus::Active),
            "expired" => Ok(BlockStatus::Expired),
            "removed" => Ok(BlockStatus::Removed),
            other => Err(format!("Unknown block status: {}", other)),
        }
    }
}

/// Persistent enforcement record, upserted by address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedAddress {
    pub id: Option<i64>,
    pub address: IpAddr,
    pub threat_type: String,
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
    /// None = permanent
    pub expires_at: Option<DateTime<Utc>>,
    pub status: BlockStatus,
    pub method: EnforcementMethod,
    pub severity: SeverityClass,
}

impl BlockedAddress {
    pub fn new(
        address: IpAddr,
        threat_type: String,
        reason: String,
        duration_secs: Option<i64>,
        method: EnforcementMethod,
        severity: SeverityClass,
    ) -> Self {
        let now = Utc::now();
        let expires_at = duration_secs.map(|d| now + chrono::Duration::seconds(d));

        Self {
            id: None,
            address,
            threat_type,
            reason,
            blocked_at: now,
            expires_at,
            status: BlockStatus::Active,
            method,
            severity,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => Utc::now() > expires,
            None => false, // Permanent block
        }
    }
}

/// Which rule set and decision vocabulary a deployment runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Web access logs; decisions are block/monitor/ignore
    AccessLog,
    /// Firewall/kernel/auth logs; decisions include alert
    Security,
}

impl AnalysisMode {
    /// Score a threat must exceed to be kept
    pub fn score_cutoff(&self) -> u32 {
        match self {
            AnalysisMode::AccessLog => 30,
            AnalysisMode::Security => 25,
        }
    }

    /// How many threats survive truncation
    pub fn top_k(&self) -> usize {
        match self {
            AnalysisMode::AccessLog => 20,
            AnalysisMode::Security => 30,
        }
    }

    pub fn supports_alert(&self) -> bool {
        matches!(self, AnalysisMode::Security)
    }
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisMode::AccessLog => write!(f, "access_log"),
            AnalysisMode::Security => write!(f, "security"),
        }
    }
}

/// What a finished cycle reports back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub analysis_id: i64,
    pub decision: Decision,
    pub actions_taken: Vec<String>,
    pub threat_count: usize,
    pub blocked_count: u32,
    /// Lines that parsed into events, including those outside the window
    pub total_processed: u64,
    /// Configured log sources that were missing or unreadable this cycle
    pub sources_missing: usize,
    pub timestamp: DateTime<Utc>,
}

/// One watchlist row: an address under monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEntry {
    pub address: IpAddr,
    pub threat_types: Vec<String>,
    /// Highest score ever observed for this address
    pub score: u32,
    /// How many cycles put this address on the watchlist
    pub event_count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Trailing-24-hour aggregates for the stats surface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsReport {
    pub analyses: u64,
    pub avg_threat_level: f64,
    pub total_events: u64,
    pub active_blocks: u64,
    pub blocks_by_method: std::collections::HashMap<String, u64>,
    pub blocks_by_severity: std::collections::HashMap<String, u64>,
    pub decision_mix: std::collections::HashMap<String, u64>,
    pub top_watchlist: Vec<WatchEntry>,
}

/// Persisted record of one past cycle, for detail lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub threats: Vec<Threat>,
    pub decision: Decision,
    /// 0-5, max over kept threats of min(5, score / 20)
    pub threat_level: u8,
    /// Events that fell inside the analysis window
    pub total_events: u64,
    /// Lines that parsed into events, including those outside the window
    pub total_processed: u64,
    pub actions_taken: Vec<String>,
    pub processing_time_ms: Option<u64>,
    pub model: Option<String>,
}
