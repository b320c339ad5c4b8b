// Builder Patterns - fluent construction for request objects
// Builders validate eagerly: every setter that takes raw input returns
// Result, so an invalid selection never reaches a provider.

use crate::contracts::{MetricsQuery, OrderRequest};
use crate::controller::ControllerConfig;
use crate::types::*;
use anyhow::{ensure, Result};
use std::time::Duration;

/// Fluent builder for order download requests
pub struct OrderRequestBuilder {
    table: Option<ValidatedTableName>,
    segment: SegmentFilter,
    range: Option<ValidatedDateRange>,
    attribution: AttributionModel,
    limit: ValidatedLimit,
}

impl OrderRequestBuilder {
    pub fn new() -> Self {
        Self {
            table: None,
            segment: SegmentFilter::All,
            range: None,
            attribution: AttributionModel::default(),
            limit: ValidatedLimit::default(),
        }
    }

    /// Set the table the orders belong to
    pub fn table(mut self, name: impl Into<String>) -> Result<Self> {
        self.table = Some(ValidatedTableName::new(name)?);
        Ok(self)
    }

    /// Restrict the download to one segment
    pub fn segment(mut self, label: impl Into<String>) -> Result<Self> {
        self.segment = SegmentFilter::segment(label)?;
        Ok(self)
    }

    /// Span all segments (the default)
    pub fn all_segments(mut self) -> Self {
        self.segment = SegmentFilter::All;
        self
    }

    /// Set the date range from `YYYY-MM-DD` strings
    pub fn dates(mut self, start: &str, end: &str) -> Result<Self> {
        self.range = Some(ValidatedDateRange::parse(start, end)?);
        Ok(self)
    }

    /// Set the date range from an already validated range
    pub fn range(mut self, range: ValidatedDateRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Select the attribution model
    pub fn attribution(mut self, model: AttributionModel) -> Self {
        self.attribution = model;
        self
    }

    /// Cap the number of downloaded orders
    pub fn limit(mut self, limit: usize) -> Result<Self> {
        self.limit = ValidatedLimit::new(limit)?;
        Ok(self)
    }

    /// Build the request
    pub fn build(self) -> Result<OrderRequest> {
        let table = self
            .table
            .ok_or_else(|| anyhow::anyhow!("Order request table is required"))?;
        let range = self
            .range
            .ok_or_else(|| anyhow::anyhow!("Order request date range is required"))?;

        Ok(OrderRequest {
            table,
            segment: self.segment,
            range,
            attribution: self.attribution,
            limit: self.limit,
        })
    }
}

impl Default for OrderRequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent builder for metric row queries
pub struct MetricsQueryBuilder {
    table: Option<ValidatedTableName>,
    range: Option<ValidatedDateRange>,
    attribution: AttributionModel,
}

impl MetricsQueryBuilder {
    pub fn new() -> Self {
        Self {
            table: None,
            range: None,
            attribution: AttributionModel::default(),
        }
    }

    /// Set the table the rows belong to
    pub fn table(mut self, name: impl Into<String>) -> Result<Self> {
        self.table = Some(ValidatedTableName::new(name)?);
        Ok(self)
    }

    /// Set the date range from `YYYY-MM-DD` strings
    pub fn dates(mut self, start: &str, end: &str) -> Result<Self> {
        self.range = Some(ValidatedDateRange::parse(start, end)?);
        Ok(self)
    }

    /// Set the date range from an already validated range
    pub fn range(mut self, range: ValidatedDateRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Select the attribution model
    pub fn attribution(mut self, model: AttributionModel) -> Self {
        self.attribution = model;
        self
    }

    /// Build the query
    pub fn build(self) -> Result<MetricsQuery> {
        let table = self
            .table
            .ok_or_else(|| anyhow::anyhow!("Metrics query table is required"))?;
        let range = self
            .range
            .ok_or_else(|| anyhow::anyhow!("Metrics query date range is required"))?;

        Ok(MetricsQuery {
            table,
            range,
            attribution: self.attribution,
        })
    }
}

impl Default for MetricsQueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent builder for controller tuning
pub struct ControllerConfigBuilder {
    ttl: Duration,
    countdown_start: u64,
}

impl ControllerConfigBuilder {
    pub fn new() -> Self {
        let defaults = ControllerConfig::default();
        Self {
            ttl: defaults.ttl,
            countdown_start: defaults.countdown_start,
        }
    }

    /// Maximum age a cached payload is served without a refetch
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Seconds the advisory countdown starts from
    pub fn countdown_start(mut self, seconds: u64) -> Self {
        self.countdown_start = seconds;
        self
    }

    /// Build the config
    pub fn build(self) -> Result<ControllerConfig> {
        ensure!(!self.ttl.is_zero(), "Cache TTL must be nonzero");
        ensure!(
            self.countdown_start > 0,
            "Countdown must start above zero seconds"
        );

        Ok(ControllerConfig {
            ttl: self.ttl,
            countdown_start: self.countdown_start,
        })
    }
}

impl Default for ControllerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
