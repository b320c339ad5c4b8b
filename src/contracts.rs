// Core Contracts - data shapes and trait seams for the analytics core
// Providers and stores are exercised through these traits only; every
// implementation must satisfy the documented pre/postconditions.

use crate::types::{
    AttributionModel, MonthKey, SegmentFilter, ValidatedDateRange, ValidatedLimit,
    ValidatedTableName,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One metric record per (date, segment). All numeric fields are plain sums
/// for that slice; the aggregation layer treats non-finite values as 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub date: NaiveDate,
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub sessions: f64,
    #[serde(default)]
    pub cart_adds: f64,
    #[serde(default)]
    pub orders: f64,
    #[serde(default)]
    pub revenue: f64,
    #[serde(default)]
    pub paid_orders: f64,
    #[serde(default)]
    pub paid_revenue: f64,
    #[serde(default)]
    pub new_customers: f64,
    #[serde(default)]
    pub new_customer_revenue: f64,
    #[serde(default)]
    pub investment: f64,
    #[serde(default)]
    pub clicks: f64,
}

impl MetricRow {
    /// A zeroed row for the given date; useful as a base for sparse records.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            segment: None,
            sessions: 0.0,
            cart_adds: 0.0,
            orders: 0.0,
            revenue: 0.0,
            paid_orders: 0.0,
            paid_revenue: 0.0,
            new_customers: 0.0,
            new_customer_revenue: 0.0,
            investment: 0.0,
            clicks: 0.0,
        }
    }
}

/// One downloaded order row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub transaction_id: String,
    #[serde(default)]
    pub placed_on: Option<NaiveDate>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub revenue: f64,
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub medium: Option<String>,
    #[serde(default)]
    pub campaign: Option<String>,
}

/// Revenue target for one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonthGoal {
    pub paid_revenue_target: f64,
}

/// Monthly goals keyed by `YYYY-MM`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthlyGoals {
    by_month: HashMap<MonthKey, MonthGoal>,
}

impl MonthlyGoals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, month: MonthKey, goal: MonthGoal) {
        self.by_month.insert(month, goal);
    }

    pub fn goal_for(&self, month: &MonthKey) -> Option<&MonthGoal> {
        self.by_month.get(month)
    }

    pub fn is_empty(&self) -> bool {
        self.by_month.is_empty()
    }
}

/// Parameters for one metrics pull.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsQuery {
    pub table: ValidatedTableName,
    pub range: ValidatedDateRange,
    pub attribution: AttributionModel,
}

/// Parameters shaping one order download. Every field except `limit` takes
/// part in the cache key; the limit caps the page join, it does not change
/// which dataset the request names.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub table: ValidatedTableName,
    pub segment: SegmentFilter,
    pub range: ValidatedDateRange,
    pub attribution: AttributionModel,
    pub limit: ValidatedLimit,
}

impl OrderRequest {
    /// The composite cache key for this request. Two requests name the same
    /// dataset iff their keys are equal.
    pub fn cache_key(&self) -> OrderCacheKey {
        OrderCacheKey::compose(&self.table, &self.segment, &self.range, self.attribution)
    }

    /// The provider filter parameter for the segment, as (name, value).
    /// `None` when the request spans all segments. The parameter name depends
    /// on the attribution model.
    pub fn segment_param(&self) -> Option<(&'static str, &str)> {
        self.segment
            .label()
            .map(|label| (self.attribution.filter_param(), label))
    }
}

/// Deterministic composite key over all request-shaping parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderCacheKey(String);

impl OrderCacheKey {
    pub fn compose(
        table: &ValidatedTableName,
        segment: &SegmentFilter,
        range: &ValidatedDateRange,
        attribution: AttributionModel,
    ) -> Self {
        Self(format!(
            "{}-{}-{}-{}-{}",
            table.as_str(),
            segment.key_fragment(),
            range.start(),
            range.end(),
            attribution.as_str()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored cache row. Failed and cancelled fetches delete their row, so an
/// error state never rests in the store.
#[derive(Debug, Clone)]
pub enum CacheEntry {
    Loading {
        since: Instant,
    },
    Ready {
        orders: Arc<Vec<OrderRecord>>,
        fetched_at: Instant,
    },
}

impl CacheEntry {
    pub fn is_loading(&self) -> bool {
        matches!(self, CacheEntry::Loading { .. })
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, CacheEntry::Ready { .. })
    }

    /// Age of the entry relative to `now`.
    pub fn age(&self, now: Instant) -> Duration {
        let born = match self {
            CacheEntry::Loading { since } => *since,
            CacheEntry::Ready { fetched_at, .. } => *fetched_at,
        };
        now.saturating_duration_since(born)
    }
}

/// Cache state as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Absent,
    Loading,
    Ready,
}

/// Read-only view of one key: its state, the payload when ready, and the
/// advisory progress message while loading.
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub state: FetchState,
    pub orders: Option<Arc<Vec<OrderRecord>>>,
    pub progress_message: Option<&'static str>,
}

impl OrderSnapshot {
    pub fn absent() -> Self {
        Self {
            state: FetchState::Absent,
            orders: None,
            progress_message: None,
        }
    }
}

/// Why a fetch did not produce a payload. Cloneable so every caller joined to
/// one in-flight operation receives the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The request never reached a provider; the selection itself is invalid.
    #[error("invalid request: {0}")]
    Validation(String),
    /// The provider or the store failed. Retrying under the same key is safe.
    #[error("provider failure: {0}")]
    Transport(String),
    /// The fetch was cancelled cooperatively. Not a failure; nothing to report.
    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transport(_))
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

/// Keyed store for expensive order downloads. The process-wide cache behind
/// the controller; consumers never call this directly.
///
/// # Preconditions
/// - Keys are fully composed (`OrderRequest::cache_key`); the store never
///   interprets them.
///
/// # Postconditions
/// - `get` returns the entry as last written, or `None`.
/// - `set_loading` / `set_ready` replace any existing entry for the key.
/// - `delete` removes the entry; deleting a missing key is a no-op.
///
/// # Invariants
/// - Every operation is atomic with respect to a single key; a reader never
///   observes a half-written entry.
/// - Operations on distinct keys never contend with each other's outcomes.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get(&self, key: &OrderCacheKey) -> Result<Option<CacheEntry>>;
    async fn set_loading(&self, key: &OrderCacheKey) -> Result<()>;
    async fn set_ready(&self, key: &OrderCacheKey, orders: Arc<Vec<OrderRecord>>) -> Result<()>;
    async fn delete(&self, key: &OrderCacheKey) -> Result<()>;
}

/// Source of order listings.
///
/// # Preconditions
/// - `request` passed construction-time validation.
///
/// # Postconditions
/// - Returns at most `request.limit` records.
/// - Returns `FetchError::Cancelled` once the token is cancelled; the
///   implementation must stop issuing work promptly after the signal.
///
/// # Invariants
/// - No side effects the caller can observe besides the returned rows.
#[async_trait]
pub trait OrderProvider: Send + Sync {
    async fn fetch_orders(
        &self,
        request: &OrderRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<OrderRecord>, FetchError>;
}

/// Page-level order source. `PagedOrderProvider` joins pages from one of
/// these into a whole dataset.
///
/// # Postconditions
/// - Returns at most `page_size` records for the given `offset`.
/// - A page shorter than `page_size` means the dataset is exhausted.
#[async_trait]
pub trait OrderPageFetcher: Send + Sync {
    async fn fetch_page(
        &self,
        request: &OrderRequest,
        offset: usize,
        page_size: usize,
        cancel: CancellationToken,
    ) -> Result<Vec<OrderRecord>, FetchError>;
}

/// Source of metric rows for the aggregation engine.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn fetch_rows(&self, query: &MetricsQuery) -> Result<Vec<MetricRow>, FetchError>;
}

/// Source of monthly goals. `None` when no goals are configured for the table.
#[async_trait]
pub trait GoalProvider: Send + Sync {
    async fn fetch_goals(
        &self,
        table: &ValidatedTableName,
    ) -> Result<Option<MonthlyGoals>, FetchError>;
}
