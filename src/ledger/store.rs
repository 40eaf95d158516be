//! Durable ledger storage for agent transactions.
//!
//! Key choices:
//! - WAL mode for concurrent reads during writes
//! - Prepared statement caching on hot query paths
//! - Append-only transactions: rows are inserted under their own primary key
//!   and never mutated, so two concurrent writes for the same agent are both
//!   durably recorded without application-level locking
//! - RFC 3339 TEXT timestamps; day bucketing uses the UTC date prefix

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::StorageError;
use crate::models::{
    Agent, AgentPerformance, DailyObservation, DailyTrend, RegionPerformance, Transaction,
    TransactionKind, TransactionStatus,
};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS agents (
    agent_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    region_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_agents_region ON agents(region_id);

CREATE TABLE IF NOT EXISTS transactions (
    transaction_id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL,
    amount REAL NOT NULL,
    transaction_type TEXT NOT NULL,
    status TEXT NOT NULL,
    standard_commission REAL NOT NULL,
    agent_markup REAL NOT NULL,
    customer_phone TEXT,
    notes TEXT,
    created_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_transactions_agent
    ON transactions(agent_id, created_at DESC);
"#;

/// SQLite-backed ledger. One connection guarded by a mutex; WAL mode keeps
/// readers on other connections unblocked during writes.
pub struct LedgerStore {
    conn: Arc<Mutex<Connection>>,
}

impl LedgerStore {
    pub fn new(db_path: &str) -> Result<Self, StorageError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)?;
        conn.execute_batch(SCHEMA_SQL)?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if db_path != ":memory:" && journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!("📒 Ledger store initialized at: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::new(":memory:")
    }

    /// Seed or refresh an agent roster row. Roster management is the admin
    /// layer's job; the core needs the row only for region scoping.
    pub fn upsert_agent(&self, agent: &Agent) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO agents (agent_id, name, region_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(agent_id) DO UPDATE SET
                name=excluded.name,
                region_id=excluded.region_id,
                status=excluded.status",
            params![
                agent.agent_id,
                agent.name,
                agent.region_id,
                agent.status,
                agent.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Region the agent belongs to, if the roster knows the agent.
    pub fn agent_region(&self, agent_id: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT region_id FROM agents WHERE agent_id = ?1")?;
        let mut rows = stmt.query([agent_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Append a transaction row. Rows are immutable once inserted; a failed
    /// insert leaves no partial state behind.
    pub async fn insert_transaction(&self, txn: &Transaction) -> Result<(), StorageError> {
        // Pre-format outside the lock
        let created_at = txn.created_at.to_rfc3339();

        let conn = self.conn.lock();
        let changes = conn.execute(
            "INSERT INTO transactions
             (transaction_id, agent_id, amount, transaction_type, status,
              standard_commission, agent_markup, customer_phone, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                txn.transaction_id,
                txn.agent_id,
                txn.amount,
                txn.transaction_type.as_str(),
                txn.status.as_str(),
                txn.standard_commission,
                txn.agent_markup,
                txn.customer_phone,
                txn.notes,
                created_at,
            ],
        )?;

        if changes != 1 {
            return Err(StorageError::WriteRejected(changes));
        }
        Ok(())
    }

    /// Fetch a transaction scoped to its owning agent.
    pub fn transaction_by_id(
        &self,
        transaction_id: &str,
        agent_id: &str,
    ) -> Result<Option<Transaction>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT transaction_id, agent_id, amount, transaction_type, status,
                    standard_commission, agent_markup, customer_phone, notes, created_at
             FROM transactions
             WHERE transaction_id = ?1 AND agent_id = ?2",
        )?;

        let mut rows = stmt.query(params![transaction_id, agent_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_transaction(row)?)),
            None => Ok(None),
        }
    }

    /// All transactions for an agent, newest first, optionally bounded to a
    /// created_at window (inclusive).
    pub fn agent_transactions(
        &self,
        agent_id: &str,
        window: Option<(&str, &str)>,
    ) -> Result<Vec<Transaction>, StorageError> {
        let conn = self.conn.lock();

        let transactions = if let Some((start, end)) = window {
            let mut stmt = conn.prepare_cached(
                "SELECT transaction_id, agent_id, amount, transaction_type, status,
                        standard_commission, agent_markup, customer_phone, notes, created_at
                 FROM transactions
                 WHERE agent_id = ?1 AND created_at BETWEEN ?2 AND ?3
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(params![agent_id, start, end], Self::row_to_transaction)?;
            rows.collect::<Result<Vec<_>, _>>()?
        } else {
            let mut stmt = conn.prepare_cached(
                "SELECT transaction_id, agent_id, amount, transaction_type, status,
                        standard_commission, agent_markup, customer_phone, notes, created_at
                 FROM transactions
                 WHERE agent_id = ?1
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map([agent_id], Self::row_to_transaction)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        Ok(transactions)
    }

    /// Full aggregation over an agent's ledger: lifetime totals plus per-day
    /// trend rows.
    pub fn agent_performance(&self, agent_id: &str) -> Result<AgentPerformance, StorageError> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'failure' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(amount), 0),
                    COALESCE(SUM(standard_commission), 0),
                    COALESCE(SUM(agent_markup), 0),
                    COALESCE(AVG(amount), 0)
             FROM transactions
             WHERE agent_id = ?1",
        )?;

        let (total, successful, failed, total_amount, total_commission, total_markup, avg_amount) =
            stmt.query_row([agent_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, f64>(6)?,
                ))
            })?;

        let mut trend_stmt = conn.prepare_cached(
            "SELECT substr(created_at, 1, 10) AS day,
                    COUNT(*),
                    COALESCE(SUM(amount), 0),
                    COALESCE(SUM(standard_commission), 0),
                    COALESCE(SUM(agent_markup), 0)
             FROM transactions
             WHERE agent_id = ?1
             GROUP BY day
             ORDER BY day",
        )?;

        let daily_trends = trend_stmt
            .query_map([agent_id], |row| {
                Ok(DailyTrend {
                    date: row.get(0)?,
                    transactions: row.get(1)?,
                    amount: row.get(2)?,
                    commission: row.get(3)?,
                    markup: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let success_rate = if total > 0 {
            successful as f64 * 100.0 / total as f64
        } else {
            0.0
        };

        Ok(AgentPerformance {
            total_transactions: total,
            successful_transactions: successful,
            failed_transactions: failed,
            total_amount,
            total_commission,
            total_markup,
            success_rate,
            average_transaction_amount: avg_amount,
            daily_trends,
        })
    }

    /// Aggregation across every agent of a region. A region with no agents
    /// or no transactions yields a zeroed report rather than an error.
    pub fn region_performance(&self, region_id: &str) -> Result<RegionPerformance, StorageError> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(t.transaction_id),
                    COALESCE(SUM(CASE WHEN t.status = 'success' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN t.status = 'failure' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(t.amount), 0),
                    COALESCE(SUM(t.standard_commission + t.agent_markup), 0)
             FROM agents a
             LEFT JOIN transactions t ON t.agent_id = a.agent_id
             WHERE a.region_id = ?1",
        )?;

        let (total, successful, failed, total_amount, commission_earned) =
            stmt.query_row([region_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                ))
            })?;

        let agent_count: i64 = conn
            .prepare_cached("SELECT COUNT(*) FROM agents WHERE region_id = ?1")?
            .query_row([region_id], |row| row.get(0))?;

        let success_rate = if total > 0 {
            successful as f64 * 100.0 / total as f64
        } else {
            0.0
        };
        let average_transaction_value = if total > 0 {
            total_amount / total as f64
        } else {
            0.0
        };

        Ok(RegionPerformance {
            region_id: region_id.to_string(),
            agent_count,
            total_transactions: total,
            successful_transactions: successful,
            failed_transactions: failed,
            total_amount,
            commission_earned,
            success_rate,
            average_transaction_value,
        })
    }

    /// Day-bucketed counts and volumes over the agent's trailing window,
    /// oldest day first. Input to the anomaly detector.
    pub fn daily_observations(
        &self,
        agent_id: &str,
        days: i64,
    ) -> Result<Vec<DailyObservation>, StorageError> {
        let cutoff = (Utc::now() - ChronoDuration::days(days)).to_rfc3339();

        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT substr(created_at, 1, 10) AS day,
                    COUNT(*),
                    COALESCE(SUM(amount), 0)
             FROM transactions
             WHERE agent_id = ?1 AND created_at >= ?2
             GROUP BY day
             ORDER BY day",
        )?;

        let observations = stmt
            .query_map(params![agent_id, cutoff], |row| {
                Ok(DailyObservation {
                    agent_id: agent_id.to_string(),
                    date: row.get(0)?,
                    transaction_count: row.get(1)?,
                    total_amount: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(observations)
    }

    fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
        let kind_raw: String = row.get(3)?;
        let status_raw: String = row.get(4)?;
        let created_raw: String = row.get(9)?;

        let transaction_type = TransactionKind::parse(&kind_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown transaction_type: {kind_raw}").into(),
            )
        })?;
        let status = TransactionStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown status: {status_raw}").into(),
            )
        })?;
        let created_at = DateTime::parse_from_rfc3339(&created_raw)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    9,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?
            .with_timezone(&Utc);

        Ok(Transaction {
            transaction_id: row.get(0)?,
            agent_id: row.get(1)?,
            amount: row.get(2)?,
            transaction_type,
            status,
            standard_commission: row.get(5)?,
            agent_markup: row.get(6)?,
            customer_phone: row.get(7)?,
            notes: row.get(8)?,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_agent(agent_id: &str, region_id: &str) -> Agent {
        Agent {
            agent_id: agent_id.to_string(),
            name: format!("Agent {agent_id}"),
            region_id: region_id.to_string(),
            status: "active".to_string(),
            created_at: Utc::now(),
        }
    }

    fn test_transaction(agent_id: &str, amount: f64, created_at: DateTime<Utc>) -> Transaction {
        Transaction {
            transaction_id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            amount,
            transaction_type: TransactionKind::Cashout,
            status: TransactionStatus::Success,
            standard_commission: amount * 0.005,
            agent_markup: 0.0,
            customer_phone: None,
            notes: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch_by_id() {
        let store = LedgerStore::in_memory().expect("store");
        let txn = test_transaction("agent-1", 1000.0, Utc::now());
        store.insert_transaction(&txn).await.expect("insert");

        let fetched = store
            .transaction_by_id(&txn.transaction_id, "agent-1")
            .expect("query")
            .expect("present");
        assert_eq!(fetched.amount, 1000.0);
        assert_eq!(fetched.transaction_type, TransactionKind::Cashout);

        // Ownership scoping: another agent cannot see it
        let other = store
            .transaction_by_id(&txn.transaction_id, "agent-2")
            .expect("query");
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = LedgerStore::in_memory().expect("store");
        let txn = test_transaction("agent-1", 100.0, Utc::now());
        store.insert_transaction(&txn).await.expect("insert");
        assert!(store.insert_transaction(&txn).await.is_err());
    }

    #[tokio::test]
    async fn test_agent_performance_aggregates() {
        let store = LedgerStore::in_memory().expect("store");
        let now = Utc::now();

        store
            .insert_transaction(&test_transaction("agent-1", 1000.0, now))
            .await
            .expect("insert");
        let mut failed = test_transaction("agent-1", 500.0, now);
        failed.status = TransactionStatus::Failure;
        store.insert_transaction(&failed).await.expect("insert");

        let perf = store.agent_performance("agent-1").expect("perf");
        assert_eq!(perf.total_transactions, 2);
        assert_eq!(perf.successful_transactions, 1);
        assert_eq!(perf.failed_transactions, 1);
        assert_eq!(perf.total_amount, 1500.0);
        assert_eq!(perf.success_rate, 50.0);
        assert_eq!(perf.average_transaction_amount, 750.0);
        assert_eq!(perf.daily_trends.len(), 1);
        assert_eq!(perf.daily_trends[0].transactions, 2);
    }

    #[tokio::test]
    async fn test_agent_performance_empty() {
        let store = LedgerStore::in_memory().expect("store");
        let perf = store.agent_performance("ghost").expect("perf");
        assert_eq!(perf.total_transactions, 0);
        assert_eq!(perf.success_rate, 0.0);
        assert!(perf.daily_trends.is_empty());
    }

    #[tokio::test]
    async fn test_region_performance_spans_agents() {
        let store = LedgerStore::in_memory().expect("store");
        store.upsert_agent(&test_agent("a1", "lagos")).expect("agent");
        store.upsert_agent(&test_agent("a2", "lagos")).expect("agent");
        store.upsert_agent(&test_agent("b1", "abuja")).expect("agent");

        let now = Utc::now();
        store
            .insert_transaction(&test_transaction("a1", 1000.0, now))
            .await
            .expect("insert");
        store
            .insert_transaction(&test_transaction("a2", 2000.0, now))
            .await
            .expect("insert");
        store
            .insert_transaction(&test_transaction("b1", 9000.0, now))
            .await
            .expect("insert");

        let region = store.region_performance("lagos").expect("region");
        assert_eq!(region.agent_count, 2);
        assert_eq!(region.total_transactions, 2);
        assert_eq!(region.total_amount, 3000.0);
        assert_eq!(region.success_rate, 100.0);
        assert_eq!(region.average_transaction_value, 1500.0);
    }

    #[tokio::test]
    async fn test_region_performance_empty_region() {
        let store = LedgerStore::in_memory().expect("store");
        let region = store.region_performance("nowhere").expect("region");
        assert_eq!(region.agent_count, 0);
        assert_eq!(region.total_transactions, 0);
        assert_eq!(region.average_transaction_value, 0.0);
    }

    #[tokio::test]
    async fn test_daily_observations_buckets_by_day() {
        let store = LedgerStore::in_memory().expect("store");
        let now = Utc::now();
        let yesterday = now - ChronoDuration::days(1);

        store
            .insert_transaction(&test_transaction("agent-1", 100.0, yesterday))
            .await
            .expect("insert");
        store
            .insert_transaction(&test_transaction("agent-1", 200.0, yesterday))
            .await
            .expect("insert");
        store
            .insert_transaction(&test_transaction("agent-1", 900.0, now))
            .await
            .expect("insert");

        let observations = store.daily_observations("agent-1", 7).expect("obs");
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].transaction_count, 2);
        assert_eq!(observations[0].total_amount, 300.0);
        assert_eq!(observations[1].transaction_count, 1);
        assert!(observations[0].date < observations[1].date);
    }

    #[tokio::test]
    async fn test_daily_observations_respects_window() {
        let store = LedgerStore::in_memory().expect("store");
        let now = Utc::now();
        let ancient = now - ChronoDuration::days(30);

        store
            .insert_transaction(&test_transaction("agent-1", 100.0, ancient))
            .await
            .expect("insert");
        store
            .insert_transaction(&test_transaction("agent-1", 200.0, now))
            .await
            .expect("insert");

        let observations = store.daily_observations("agent-1", 7).expect("obs");
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].total_amount, 200.0);
    }

    #[tokio::test]
    async fn test_windowed_transactions() {
        let store = LedgerStore::in_memory().expect("store");
        let now = Utc::now();
        let old = now - ChronoDuration::days(10);

        store
            .insert_transaction(&test_transaction("agent-1", 100.0, old))
            .await
            .expect("insert");
        store
            .insert_transaction(&test_transaction("agent-1", 200.0, now))
            .await
            .expect("insert");

        let all = store.agent_transactions("agent-1", None).expect("all");
        assert_eq!(all.len(), 2);
        // Newest first
        assert_eq!(all[0].amount, 200.0);

        let start = (now - ChronoDuration::days(1)).to_rfc3339();
        let end = (now + ChronoDuration::days(1)).to_rfc3339();
        let windowed = store
            .agent_transactions("agent-1", Some((&start, &end)))
            .expect("windowed");
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].amount, 200.0);
    }

    #[test]
    fn test_agent_region_lookup() {
        let store = LedgerStore::in_memory().expect("store");
        store.upsert_agent(&test_agent("a1", "lagos")).expect("agent");

        assert_eq!(store.agent_region("a1").expect("lookup"), Some("lagos".to_string()));
        assert_eq!(store.agent_region("ghost").expect("lookup"), None);
    }
}
