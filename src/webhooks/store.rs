//! Webhook subscription persistence.
//!
//! Owns the `webhook_subscriptions` table on its own connection (same
//! database file as the ledger; WAL mode keeps cross-connection access
//! safe). Status only ever moves active -> inactive, either through the
//! delivery failure counter or an explicit request; rows are hard-deleted
//! only on explicit unsubscribe.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::sync::Arc;
use tracing::info;

use crate::error::StorageError;
use crate::models::{SubscriptionStatus, WebhookSubscription};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS webhook_subscriptions (
    webhook_id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL,
    url TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    secret TEXT NOT NULL,
    failure_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_webhooks_agent_status
    ON webhook_subscriptions(agent_id, status);
"#;

pub struct WebhookStore {
    conn: Arc<Mutex<Connection>>,
}

impl WebhookStore {
    pub fn new(db_path: &str) -> Result<Self, StorageError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)?;
        conn.execute_batch(SCHEMA_SQL)?;

        info!("🔔 Webhook subscription store initialized at: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::new(":memory:")
    }

    pub fn insert(&self, sub: &WebhookSubscription) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO webhook_subscriptions
             (webhook_id, agent_id, url, status, secret, failure_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                sub.webhook_id,
                sub.agent_id,
                sub.url,
                sub.status.as_str(),
                sub.secret,
                sub.failure_count,
                sub.created_at.to_rfc3339(),
                sub.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Active subscriptions for an agent. This is the fan-out snapshot:
    /// rows created after the query are not part of the delivery round.
    pub fn active_for_agent(
        &self,
        agent_id: &str,
    ) -> Result<Vec<WebhookSubscription>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT webhook_id, agent_id, url, status, secret, failure_count,
                    created_at, updated_at
             FROM webhook_subscriptions
             WHERE agent_id = ?1 AND status = 'active'",
        )?;

        let subs = stmt
            .query_map([agent_id], Self::row_to_subscription)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subs)
    }

    pub fn all_for_agent(&self, agent_id: &str) -> Result<Vec<WebhookSubscription>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT webhook_id, agent_id, url, status, secret, failure_count,
                    created_at, updated_at
             FROM webhook_subscriptions
             WHERE agent_id = ?1
             ORDER BY created_at",
        )?;

        let subs = stmt
            .query_map([agent_id], Self::row_to_subscription)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subs)
    }

    pub fn by_id(&self, webhook_id: &str) -> Result<Option<WebhookSubscription>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT webhook_id, agent_id, url, status, secret, failure_count,
                    created_at, updated_at
             FROM webhook_subscriptions
             WHERE webhook_id = ?1",
        )?;

        let mut rows = stmt.query([webhook_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_subscription(row)?)),
            None => Ok(None),
        }
    }

    /// Hard delete on explicit agent request. Returns whether a row existed.
    pub fn delete(&self, webhook_id: &str, agent_id: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let changes = conn.execute(
            "DELETE FROM webhook_subscriptions WHERE webhook_id = ?1 AND agent_id = ?2",
            params![webhook_id, agent_id],
        )?;
        Ok(changes > 0)
    }

    /// Count a delivery failure; once the count reaches `failure_limit` the
    /// subscription flips inactive in the same statement, so future fan-out
    /// snapshots skip it.
    pub fn record_failure(&self, webhook_id: &str, failure_limit: i64) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE webhook_subscriptions
             SET failure_count = failure_count + 1,
                 status = CASE WHEN failure_count + 1 >= ?2 THEN 'inactive' ELSE status END,
                 updated_at = ?3
             WHERE webhook_id = ?1",
            params![webhook_id, failure_limit, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// A successful delivery ends the failure streak.
    pub fn record_success(&self, webhook_id: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE webhook_subscriptions
             SET failure_count = 0, updated_at = ?2
             WHERE webhook_id = ?1 AND failure_count != 0",
            params![webhook_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn row_to_subscription(row: &rusqlite::Row) -> rusqlite::Result<WebhookSubscription> {
        let status_raw: String = row.get(3)?;
        let created_raw: String = row.get(6)?;
        let updated_raw: String = row.get(7)?;

        let status = SubscriptionStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown subscription status: {status_raw}").into(),
            )
        })?;

        let parse_ts = |raw: &str, idx: usize| -> rusqlite::Result<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        idx,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
        };

        Ok(WebhookSubscription {
            webhook_id: row.get(0)?,
            agent_id: row.get(1)?,
            url: row.get(2)?,
            status,
            secret: row.get(4)?,
            failure_count: row.get(5)?,
            created_at: parse_ts(&created_raw, 6)?,
            updated_at: parse_ts(&updated_raw, 7)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_subscription(webhook_id: &str, agent_id: &str) -> WebhookSubscription {
        WebhookSubscription {
            webhook_id: webhook_id.to_string(),
            agent_id: agent_id.to_string(),
            url: "https://example.com/hook".to_string(),
            status: SubscriptionStatus::Active,
            secret: "a".repeat(64),
            failure_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_and_fetch() {
        let store = WebhookStore::in_memory().expect("store");
        store.insert(&test_subscription("wh-1", "agent-1")).expect("insert");

        let sub = store.by_id("wh-1").expect("query").expect("present");
        assert_eq!(sub.agent_id, "agent-1");
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.failure_count, 0);
    }

    #[test]
    fn test_failure_below_limit_stays_active() {
        let store = WebhookStore::in_memory().expect("store");
        store.insert(&test_subscription("wh-1", "agent-1")).expect("insert");

        store.record_failure("wh-1", 3).expect("failure");
        store.record_failure("wh-1", 3).expect("failure");

        let sub = store.by_id("wh-1").expect("query").expect("present");
        assert_eq!(sub.failure_count, 2);
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(store.active_for_agent("agent-1").expect("active").len(), 1);
    }

    #[test]
    fn test_third_failure_deactivates() {
        let store = WebhookStore::in_memory().expect("store");
        store.insert(&test_subscription("wh-1", "agent-1")).expect("insert");

        for _ in 0..3 {
            store.record_failure("wh-1", 3).expect("failure");
        }

        let sub = store.by_id("wh-1").expect("query").expect("present");
        assert_eq!(sub.failure_count, 3);
        assert_eq!(sub.status, SubscriptionStatus::Inactive);
        assert!(store.active_for_agent("agent-1").expect("active").is_empty());
    }

    #[test]
    fn test_success_resets_streak() {
        let store = WebhookStore::in_memory().expect("store");
        store.insert(&test_subscription("wh-1", "agent-1")).expect("insert");

        store.record_failure("wh-1", 3).expect("failure");
        store.record_failure("wh-1", 3).expect("failure");
        store.record_success("wh-1").expect("success");

        let sub = store.by_id("wh-1").expect("query").expect("present");
        assert_eq!(sub.failure_count, 0);
        assert_eq!(sub.status, SubscriptionStatus::Active);

        // Two more failures still don't reach the limit
        store.record_failure("wh-1", 3).expect("failure");
        store.record_failure("wh-1", 3).expect("failure");
        assert_eq!(
            store.by_id("wh-1").expect("query").expect("present").status,
            SubscriptionStatus::Active
        );
    }

    #[test]
    fn test_delete_scoped_to_owner() {
        let store = WebhookStore::in_memory().expect("store");
        store.insert(&test_subscription("wh-1", "agent-1")).expect("insert");

        assert!(!store.delete("wh-1", "agent-2").expect("delete"));
        assert!(store.delete("wh-1", "agent-1").expect("delete"));
        assert!(store.by_id("wh-1").expect("query").is_none());
    }

    #[test]
    fn test_active_filter_excludes_inactive() {
        let store = WebhookStore::in_memory().expect("store");
        store.insert(&test_subscription("wh-1", "agent-1")).expect("insert");
        let mut inactive = test_subscription("wh-2", "agent-1");
        inactive.status = SubscriptionStatus::Inactive;
        store.insert(&inactive).expect("insert");

        assert_eq!(store.active_for_agent("agent-1").expect("active").len(), 1);
        assert_eq!(store.all_for_agent("agent-1").expect("all").len(), 2);
    }
}
