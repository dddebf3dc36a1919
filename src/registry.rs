use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{
    AnalysisRecord, BlockStatus, BlockedAddress, Decision, DecisionKind, EnforcementMethod,
    SeverityClass, StatsReport, Threat, WatchEntry,
};

/// Thread-safe persistence for blocks, watchlist rows, alerts and analysis
/// history. One connection behind a mutex serializes every mutation, which
/// is what makes same-address upserts race-free.
#[derive(Clone)]
pub struct Registry {
    conn: Arc<Mutex<Connection>>,
}

impl Registry {
    /// Open or create the registry at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        let registry = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        registry.init_schema()?;
        Ok(registry)
    }

    /// Open an in-memory registry (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let registry = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        registry.init_schema()?;
        Ok(registry)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            -- One row per analysis cycle
            CREATE TABLE IF NOT EXISTS analyses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                threat_level INTEGER NOT NULL,
                total_events INTEGER NOT NULL,
                total_processed INTEGER NOT NULL DEFAULT 0,
                threats_json TEXT NOT NULL,
                actions_json TEXT NOT NULL,
                processing_time_ms INTEGER,
                model TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_analyses_timestamp ON analyses(timestamp);

            -- The oracle (or ladder) verdict for each cycle
            CREATE TABLE IF NOT EXISTS decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                analysis_id INTEGER NOT NULL REFERENCES analyses(id),
                kind TEXT NOT NULL,
                confidence INTEGER NOT NULL,
                reason TEXT NOT NULL,
                actions_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_decisions_analysis ON decisions(analysis_id);

            -- Enforcement records, one row per address, never hard-deleted
            CREATE TABLE IF NOT EXISTS blocked_ips (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ip TEXT NOT NULL UNIQUE,
                threat_type TEXT NOT NULL,
                reason TEXT NOT NULL,
                blocked_at TEXT NOT NULL,
                expires_at TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                method TEXT NOT NULL,
                severity TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_blocked_status ON blocked_ips(status);
            CREATE INDEX IF NOT EXISTS idx_blocked_expires ON blocked_ips(expires_at);

            -- Addresses under monitoring
            CREATE TABLE IF NOT EXISTS watchlist (
                ip TEXT PRIMARY KEY,
                threat_types TEXT NOT NULL,
                score INTEGER NOT NULL,
                event_count INTEGER NOT NULL DEFAULT 1,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ip TEXT NOT NULL,
                score INTEGER NOT NULL,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at);
            "#,
        )?;

        Ok(())
    }

    // ==================== Analysis history ====================

    /// Record a finished cycle, returning the analysis id.
    pub fn record_analysis(
        &self,
        threats: &[Threat],
        decision: &Decision,
        threat_level: u8,
        total_events: u64,
        total_processed: u64,
        actions_taken: &[String],
        processing_time_ms: Option<u64>,
        model: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        let threats_json = serde_json::to_string(threats)?;
        let actions_json = serde_json::to_string(actions_taken)?;

        conn.execute(
            "INSERT INTO analyses (timestamp, threat_level, total_events, total_processed, threats_json, actions_json, processing_time_ms, model)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                now.to_rfc3339(),
                threat_level,
                total_events,
                total_processed,
                threats_json,
                actions_json,
                processing_time_ms,
                model
            ],
        )?;
        let analysis_id = conn.last_insert_rowid();

        let decision_actions = serde_json::to_string(&decision.recommended_actions)?;
        conn.execute(
            "INSERT INTO decisions (analysis_id, kind, confidence, reason, actions_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                analysis_id,
                decision.kind.to_string(),
                decision.confidence,
                decision.reason,
                decision_actions,
                now.to_rfc3339()
            ],
        )?;

        Ok(analysis_id)
    }

    /// Fetch one past cycle with its threats and decision.
    pub fn get_analysis(&self, id: i64) -> Result<AnalysisRecord> {
        let conn = self.conn.lock().unwrap();

        let row = conn
            .query_row(
                "SELECT a.timestamp, a.threat_level, a.total_events, a.total_processed,
                        a.threats_json, a.actions_json, a.processing_time_ms, a.model,
                        d.kind, d.confidence, d.reason, d.actions_json
                 FROM analyses a JOIN decisions d ON d.analysis_id = a.id
                 WHERE a.id = ?",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u8>(1)?,
                        row.get::<_, u64>(2)?,
                        row.get::<_, u64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<u64>>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, u8>(9)?,
                        row.get::<_, String>(10)?,
                        row.get::<_, String>(11)?,
                    ))
                },
            )
            .optional()?
            .ok_or(Error::AnalysisNotFound(id))?;

        let (
            timestamp,
            threat_level,
            total_events,
            total_processed,
            threats_json,
            actions_json,
            processing_time_ms,
            model,
            kind,
            confidence,
            reason,
            decision_actions,
        ) = row;

        let decision = Decision {
            kind: kind
                .parse::<DecisionKind>()
                .unwrap_or(DecisionKind::Ignore),
            confidence,
            reason,
            recommended_actions: serde_json::from_str(&decision_actions).unwrap_or_default(),
        };

        Ok(AnalysisRecord {
            id,
            timestamp: parse_rfc3339(&timestamp),
            threats: serde_json::from_str(&threats_json).unwrap_or_default(),
            decision,
            threat_level,
            total_events,
            total_processed,
            actions_taken: serde_json::from_str(&actions_json).unwrap_or_default(),
            processing_time_ms,
            model,
        })
    }

    // ==================== Block lifecycle ====================

    /// Insert or refresh the block row for an address. Re-blocking an
    /// already-blocked address extends its expiry and reactivates it.
    pub fn upsert_block(&self, block: &BlockedAddress) -> Result<i64> {
        let conn = self.conn.lock().unwrap();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM blocked_ips WHERE ip = ?",
                [block.address.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            conn.execute(
                "UPDATE blocked_ips SET threat_type = ?, reason = ?, blocked_at = ?, expires_at = ?,
                        status = 'active', method = ?, severity = ? WHERE id = ?",
                params![
                    block.threat_type,
                    block.reason,
                    block.blocked_at.to_rfc3339(),
                    block.expires_at.map(|t| t.to_rfc3339()),
                    block.method.to_string(),
                    block.severity.to_string(),
                    id
                ],
            )?;
            Ok(id)
        } else {
            conn.execute(
                "INSERT INTO blocked_ips (ip, threat_type, reason, blocked_at, expires_at, status, method, severity)
                 VALUES (?, ?, ?, ?, ?, 'active', ?, ?)",
                params![
                    block.address.to_string(),
                    block.threat_type,
                    block.reason,
                    block.blocked_at.to_rfc3339(),
                    block.expires_at.map(|t| t.to_rfc3339()),
                    block.method.to_string(),
                    block.severity.to_string()
                ],
            )?;
            Ok(conn.last_insert_rowid())
        }
    }

    /// Mark an address removed. Returns false when no row existed.
    pub fn mark_removed(&self, address: IpAddr) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE blocked_ips SET status = 'removed' WHERE ip = ?",
            [address.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Flip active rows whose expiry passed. Runs before every read of the
    /// block list; there is no background sweeper.
    pub fn expire_stale(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE blocked_ips SET status = 'expired'
             WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at < ?",
            [Utc::now().to_rfc3339()],
        )?;
        if changed > 0 {
            debug!("Expired {} stale blocks", changed);
        }
        Ok(changed)
    }

    /// List block records, active only or all.
    pub fn list_blocks(&self, include_inactive: bool) -> Result<Vec<BlockedAddress>> {
        self.expire_stale()?;
        let conn = self.conn.lock().unwrap();

        let sql = if include_inactive {
            "SELECT id, ip, threat_type, reason, blocked_at, expires_at, status, method, severity
             FROM blocked_ips ORDER BY blocked_at DESC"
        } else {
            "SELECT id, ip, threat_type, reason, blocked_at, expires_at, status, method, severity
             FROM blocked_ips WHERE status = 'active' ORDER BY blocked_at DESC"
        };

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], row_to_block)?;

        let mut blocks = Vec::new();
        for row in rows {
            if let Some(block) = row? {
                blocks.push(block);
            }
        }
        Ok(blocks)
    }

    /// Look up the block record for one address.
    pub fn get_block(&self, address: IpAddr) -> Result<Option<BlockedAddress>> {
        self.expire_stale()?;
        let conn = self.conn.lock().unwrap();

        let block = conn
            .query_row(
                "SELECT id, ip, threat_type, reason, blocked_at, expires_at, status, method, severity
                 FROM blocked_ips WHERE ip = ?",
                [address.to_string()],
                row_to_block,
            )
            .optional()?
            .flatten();
        Ok(block)
    }

    // ==================== Watchlist & alerts ====================

    /// Put an address on the watchlist, keeping its highest score and
    /// bumping the observation count.
    pub fn watch(&self, address: IpAddr, threat_types: &[String], score: u32) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let types = threat_types.join(",");

        conn.execute(
            "INSERT INTO watchlist (ip, threat_types, score, event_count, first_seen, last_seen)
             VALUES (?, ?, ?, 1, ?, ?)
             ON CONFLICT(ip) DO UPDATE SET
                 score = MAX(score, excluded.score),
                 threat_types = excluded.threat_types,
                 event_count = event_count + 1,
                 last_seen = excluded.last_seen",
            params![address.to_string(), types, score, now, now],
        )?;
        Ok(())
    }

    pub fn record_alert(&self, address: IpAddr, score: u32, reason: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO alerts (ip, score, reason, created_at) VALUES (?, ?, ?, ?)",
            params![
                address.to_string(),
                score,
                reason,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    // ==================== Stats ====================

    /// Trailing-24-hour aggregates.
    pub fn stats(&self) -> Result<StatsReport> {
        self.expire_stale()?;
        let conn = self.conn.lock().unwrap();
        let cutoff = (Utc::now() - Duration::hours(24)).to_rfc3339();

        let (analyses, avg_threat_level, total_events): (u64, f64, u64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(AVG(threat_level), 0.0), COALESCE(SUM(total_events), 0)
             FROM analyses WHERE timestamp >= ?",
            [&cutoff],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let active_blocks: u64 = conn.query_row(
            "SELECT COUNT(*) FROM blocked_ips WHERE status = 'active'",
            [],
            |row| row.get(0),
        )?;

        let mut blocks_by_method = std::collections::HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT method, COUNT(*) FROM blocked_ips WHERE status = 'active' GROUP BY method",
        )?;
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })? {
            let (method, count) = row?;
            blocks_by_method.insert(method, count);
        }

        let mut blocks_by_severity = std::collections::HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT severity, COUNT(*) FROM blocked_ips WHERE status = 'active' GROUP BY severity",
        )?;
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })? {
            let (severity, count) = row?;
            blocks_by_severity.insert(severity, count);
        }

        let mut decision_mix = std::collections::HashMap::new();
        let mut stmt =
            conn.prepare("SELECT kind, COUNT(*) FROM decisions WHERE created_at >= ? GROUP BY kind")?;
        for row in stmt.query_map([&cutoff], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })? {
            let (kind, count) = row?;
            decision_mix.insert(kind, count);
        }

        let mut top_watchlist = Vec::new();
        let mut stmt = conn.prepare(
            "SELECT ip, threat_types, score, event_count, first_seen, last_seen
             FROM watchlist ORDER BY score DESC LIMIT 10",
        )?;
        for row in stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })? {
            let (ip, types, score, event_count, first_seen, last_seen) = row?;
            if let Ok(address) = ip.parse::<IpAddr>() {
                top_watchlist.push(WatchEntry {
                    address,
                    threat_types: types.split(',').map(|s| s.to_string()).collect(),
                    score,
                    event_count,
                    first_seen: parse_rfc3339(&first_seen),
                    last_seen: parse_rfc3339(&last_seen),
                });
            }
        }

        Ok(StatsReport {
            analyses,
            avg_threat_level,
            total_events,
            active_blocks,
            blocks_by_method,
            blocks_by_severity,
            decision_mix,
            top_watchlist,
        })
    }
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Map one blocked_ips row; rows with an unparseable address are skipped.
fn row_to_block(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<BlockedAddress>> {
    let ip: String = row.get(1)?;
    let Ok(address) = ip.parse::<IpAddr>() else {
        return Ok(None);
    };

    let blocked_at: String = row.get(4)?;
    let expires_at: Option<String> = row.get(5)?;
    let status: String = row.get(6)?;
    let method: String = row.get(7)?;
    let severity: String = row.get(8)?;

    Ok(Some(BlockedAddress {
        id: Some(row.get(0)?),
        address,
        threat_type: row.get(2)?,
        reason: row.get(3)?,
        blocked_at: parse_rfc3339(&blocked_at),
        expires_at: expires_at.map(|s| parse_rfc3339(&s)),
        status: status.parse::<BlockStatus>().unwrap_or(BlockStatus::Active),
        method: method
            .parse::<EnforcementMethod>()
            .unwrap_or(EnforcementMethod::Database),
        severity: severity
            .parse::<SeverityClass>()
            .unwrap_or(SeverityClass::Low),
    }))
}
