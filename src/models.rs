use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transaction kinds performed by field agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Cashout,
    Deposit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &str {
        match self {
            TransactionKind::Cashout => "cashout",
            TransactionKind::Deposit => "deposit",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "cashout" => Some(TransactionKind::Cashout),
            "deposit" => Some(TransactionKind::Deposit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Success,
    Failure,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TransactionStatus::Success => "success",
            TransactionStatus::Failure => "failure",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "success" => Some(TransactionStatus::Success),
            "failure" => Some(TransactionStatus::Failure),
            _ => None,
        }
    }
}

/// A monetary transaction recorded by a field agent. Immutable once created:
/// financial fields are never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub agent_id: String,
    pub amount: f64,
    pub transaction_type: TransactionKind,
    pub status: TransactionStatus,
    pub standard_commission: f64,
    pub agent_markup: f64,
    pub customer_phone: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Field agent roster row. The core only reads `region_id` for aggregation
/// scoping; roster management belongs to the admin layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub name: String,
    pub region_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// One calendar day of agent activity, derived by day-bucketing the ledger.
/// Input to the anomaly detector only; never persisted as its own row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyObservation {
    pub agent_id: String,
    pub date: String,
    pub transaction_count: i64,
    pub total_amount: f64,
}

/// Per-day aggregation row inside an agent performance report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTrend {
    pub date: String,
    pub transactions: i64,
    pub amount: f64,
    pub commission: f64,
    pub markup: f64,
}

/// Aggregated performance statistics for a single agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub total_transactions: i64,
    pub successful_transactions: i64,
    pub failed_transactions: i64,
    pub total_amount: f64,
    pub total_commission: f64,
    pub total_markup: f64,
    /// Percentage of successful transactions; 0 when the agent has none.
    pub success_rate: f64,
    pub average_transaction_amount: f64,
    pub daily_trends: Vec<DailyTrend>,
}

/// Aggregated performance statistics across all agents of a region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionPerformance {
    pub region_id: String,
    pub agent_count: i64,
    pub total_transactions: i64,
    pub successful_transactions: i64,
    pub failed_transactions: i64,
    pub total_amount: f64,
    /// Standard commission plus agent markup, summed region-wide.
    pub commission_earned: f64,
    pub success_rate: f64,
    pub average_transaction_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Inactive => "inactive",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(SubscriptionStatus::Active),
            "inactive" => Some(SubscriptionStatus::Inactive),
            _ => None,
        }
    }
}

/// An agent-registered webhook endpoint. `active -> inactive` happens only
/// through the delivery failure policy or an explicit agent request;
/// re-subscription creates a fresh row rather than reviving an old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub webhook_id: String,
    pub agent_id: String,
    pub url: String,
    pub status: SubscriptionStatus,
    pub secret: String,
    pub failure_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub cache_ttl_secs: u64,
    pub anomaly_threshold: f64,
    pub webhook_timeout_secs: u64,
    pub webhook_failure_limit: i64,
    pub dispatch_queue_depth: usize,
    pub dispatch_workers: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./fieldpay.db".to_string());

        let cache_ttl_secs = std::env::var("CACHE_TTL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);

        let anomaly_threshold = std::env::var("ANOMALY_THRESHOLD")
            .unwrap_or_else(|_| "2.0".to_string())
            .parse()
            .unwrap_or(2.0);

        let webhook_timeout_secs = std::env::var("WEBHOOK_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let webhook_failure_limit = std::env::var("WEBHOOK_FAILURE_LIMIT")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .unwrap_or(3);

        let dispatch_queue_depth = std::env::var("DISPATCH_QUEUE_DEPTH")
            .unwrap_or_else(|_| "1024".to_string())
            .parse()
            .unwrap_or(1024);

        let dispatch_workers = std::env::var("DISPATCH_WORKERS")
            .unwrap_or_else(|_| "4".to_string())
            .parse()
            .unwrap_or(4);

        Ok(Self {
            database_path,
            cache_ttl_secs,
            anomaly_threshold,
            webhook_timeout_secs,
            webhook_failure_limit,
            dispatch_queue_depth,
            dispatch_workers,
        })
    }
}
