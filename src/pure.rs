// Pure Functions - the deterministic aggregation core
// No I/O, no shared state. Everything here operates on already-fetched rows
// and can be tested in isolation.

use std::collections::HashMap;

/// Row reduction into totals and grouped totals.
pub mod aggregate {
    use super::*;
    use crate::contracts::MetricRow;
    use serde::Serialize;

    /// Sentinel group label for rows whose dimension value is missing or
    /// blank. Keeping it a defined label keeps sorts total-order safe.
    pub const UNLABELED: &str = "Unlabeled";

    /// The named numeric fields of a row, for field-driven sorting.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MetricField {
        Sessions,
        CartAdds,
        Orders,
        Revenue,
        PaidOrders,
        PaidRevenue,
        NewCustomers,
        NewCustomerRevenue,
        Investment,
        Clicks,
    }

    /// Exact sums of every metric across one group of rows.
    #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
    pub struct MetricTotals {
        pub sessions: f64,
        pub cart_adds: f64,
        pub orders: f64,
        pub revenue: f64,
        pub paid_orders: f64,
        pub paid_revenue: f64,
        pub new_customers: f64,
        pub new_customer_revenue: f64,
        pub investment: f64,
        pub clicks: f64,
    }

    impl MetricTotals {
        /// Add one row's fields into the running sums. Non-finite values
        /// contribute 0.
        pub fn add_row(&mut self, row: &MetricRow) {
            self.sessions += sanitize(row.sessions);
            self.cart_adds += sanitize(row.cart_adds);
            self.orders += sanitize(row.orders);
            self.revenue += sanitize(row.revenue);
            self.paid_orders += sanitize(row.paid_orders);
            self.paid_revenue += sanitize(row.paid_revenue);
            self.new_customers += sanitize(row.new_customers);
            self.new_customer_revenue += sanitize(row.new_customer_revenue);
            self.investment += sanitize(row.investment);
            self.clicks += sanitize(row.clicks);
        }

        /// Field-wise sum of two totals.
        pub fn merge(&mut self, other: &MetricTotals) {
            self.sessions += other.sessions;
            self.cart_adds += other.cart_adds;
            self.orders += other.orders;
            self.revenue += other.revenue;
            self.paid_orders += other.paid_orders;
            self.paid_revenue += other.paid_revenue;
            self.new_customers += other.new_customers;
            self.new_customer_revenue += other.new_customer_revenue;
            self.investment += other.investment;
            self.clicks += other.clicks;
        }

        /// Read one metric by field name.
        pub fn metric(&self, field: MetricField) -> f64 {
            match field {
                MetricField::Sessions => self.sessions,
                MetricField::CartAdds => self.cart_adds,
                MetricField::Orders => self.orders,
                MetricField::Revenue => self.revenue,
                MetricField::PaidOrders => self.paid_orders,
                MetricField::PaidRevenue => self.paid_revenue,
                MetricField::NewCustomers => self.new_customers,
                MetricField::NewCustomerRevenue => self.new_customer_revenue,
                MetricField::Investment => self.investment,
                MetricField::Clicks => self.clicks,
            }
        }
    }

    /// Non-finite values fold to zero so sums never turn NaN.
    pub fn sanitize(value: f64) -> f64 {
        if value.is_finite() {
            value
        } else {
            0.0
        }
    }

    /// Sum every metric across all rows in one pass.
    pub fn reduce_totals(rows: &[MetricRow]) -> MetricTotals {
        let mut totals = MetricTotals::default();
        for row in rows {
            totals.add_row(row);
        }
        totals
    }

    /// Fold a possibly-missing dimension value into a group label.
    pub fn group_key(label: Option<&str>) -> String {
        match label {
            Some(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => UNLABELED.to_string(),
        }
    }

    /// Partition rows by `key_fn` and reduce each partition independently.
    /// Map iteration order is unspecified; ordering comes from `sorting`.
    pub fn group_by<F>(rows: &[MetricRow], key_fn: F) -> HashMap<String, MetricTotals>
    where
        F: Fn(&MetricRow) -> Option<String>,
    {
        let mut groups: HashMap<String, MetricTotals> = HashMap::new();
        for row in rows {
            let key = group_key(key_fn(row).as_deref());
            groups.entry(key).or_default().add_row(row);
        }
        groups
    }

    /// `group_by`, then guarantee every expected key is present, zero-filled
    /// when no row matched it.
    pub fn group_by_with_keys<F>(
        rows: &[MetricRow],
        key_fn: F,
        expected_keys: &[String],
    ) -> HashMap<String, MetricTotals>
    where
        F: Fn(&MetricRow) -> Option<String>,
    {
        let mut groups = group_by(rows, key_fn);
        for key in expected_keys {
            groups.entry(key.clone()).or_default();
        }
        groups
    }

    /// Group rows by their segment label.
    pub fn group_by_segment(rows: &[MetricRow]) -> HashMap<String, MetricTotals> {
        group_by(rows, |row| row.segment.clone())
    }
}

/// Ratios derived from totals.
pub mod ratios {
    use super::aggregate::MetricTotals;
    use serde::Serialize;

    /// Display ratios for one group of totals.
    #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
    pub struct DerivedRatios {
        /// Orders per session, as a percentage.
        pub conversion_rate: f64,
        /// Revenue per order.
        pub average_order_value: f64,
        /// Revenue per session.
        pub revenue_per_session: f64,
        /// New customers per order, as a percentage.
        pub new_customer_rate: f64,
        /// Cart adds per session, as a percentage, capped at 100. A session
        /// may record several cart-add events; the cap keeps the figure a
        /// display affordance rather than a literal probability.
        pub cart_add_rate: f64,
    }

    /// Division that defines `x / 0` as 0, so empty groups never surface
    /// NaN or infinity.
    pub fn safe_div(numerator: f64, denominator: f64) -> f64 {
        if denominator == 0.0 {
            0.0
        } else {
            numerator / denominator
        }
    }

    pub fn derive_ratios(totals: &MetricTotals) -> DerivedRatios {
        DerivedRatios {
            conversion_rate: safe_div(totals.orders, totals.sessions) * 100.0,
            average_order_value: safe_div(totals.revenue, totals.orders),
            revenue_per_session: safe_div(totals.revenue, totals.sessions),
            new_customer_rate: safe_div(totals.new_customers, totals.orders) * 100.0,
            cart_add_rate: (safe_div(totals.cart_adds, totals.sessions) * 100.0)
                .clamp(0.0, 100.0),
        }
    }
}

/// Period-over-period growth.
pub mod growth {
    use super::aggregate::MetricTotals;
    use serde::Serialize;

    /// Percentage change from `previous` to `current`.
    ///
    /// Both periods empty reads as no movement; growth from nothing reads as
    /// +100; collapse to nothing reads as -100. Otherwise the usual
    /// `(current - previous) / previous * 100`.
    pub fn growth_delta(current: f64, previous: f64) -> f64 {
        if previous == 0.0 {
            if current > 0.0 {
                100.0
            } else {
                0.0
            }
        } else if current == 0.0 {
            -100.0
        } else {
            (current - previous) / previous * 100.0
        }
    }

    /// Growth of every metric between two periods.
    #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
    pub struct GrowthSummary {
        pub sessions: f64,
        pub cart_adds: f64,
        pub orders: f64,
        pub revenue: f64,
        pub paid_orders: f64,
        pub paid_revenue: f64,
        pub new_customers: f64,
        pub new_customer_revenue: f64,
        pub investment: f64,
        pub clicks: f64,
    }

    pub fn growth_between(current: &MetricTotals, previous: &MetricTotals) -> GrowthSummary {
        GrowthSummary {
            sessions: growth_delta(current.sessions, previous.sessions),
            cart_adds: growth_delta(current.cart_adds, previous.cart_adds),
            orders: growth_delta(current.orders, previous.orders),
            revenue: growth_delta(current.revenue, previous.revenue),
            paid_orders: growth_delta(current.paid_orders, previous.paid_orders),
            paid_revenue: growth_delta(current.paid_revenue, previous.paid_revenue),
            new_customers: growth_delta(current.new_customers, previous.new_customers),
            new_customer_revenue: growth_delta(
                current.new_customer_revenue,
                previous.new_customer_revenue,
            ),
            investment: growth_delta(current.investment, previous.investment),
            clicks: growth_delta(current.clicks, previous.clicks),
        }
    }
}

/// Daily buckets in calendar order.
pub mod timeline {
    use super::aggregate::MetricTotals;
    use super::*;
    use crate::contracts::MetricRow;
    use chrono::NaiveDate;
    use serde::Serialize;

    /// All metrics summed across segments for one date.
    #[derive(Debug, Clone, Copy, PartialEq, Serialize)]
    pub struct TimelineBucket {
        pub date: NaiveDate,
        pub totals: MetricTotals,
    }

    /// Group rows by calendar date, sum per date, and sort ascending by the
    /// parsed date value. Cross-month and cross-year ranges order correctly
    /// because the comparison is on dates, never on their string form.
    pub fn build_timeline(rows: &[MetricRow]) -> Vec<TimelineBucket> {
        let mut by_date: HashMap<NaiveDate, MetricTotals> = HashMap::new();
        for row in rows {
            by_date.entry(row.date).or_default().add_row(row);
        }

        let mut buckets: Vec<TimelineBucket> = by_date
            .into_iter()
            .map(|(date, totals)| TimelineBucket { date, totals })
            .collect();
        buckets.sort_by_key(|bucket| bucket.date);
        buckets
    }
}

/// Ordering of grouped totals for display.
pub mod sorting {
    use super::aggregate::{MetricField, MetricTotals};
    use serde::Serialize;
    use std::cmp::Ordering;
    use std::collections::HashMap;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SortDirection {
        Ascending,
        Descending,
    }

    /// What to sort grouped totals by.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SortField {
        /// The group label, compared case-insensitively.
        Key,
        /// A numeric metric, compared numerically.
        Metric(MetricField),
    }

    /// One group with its totals, in display order.
    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct GroupTotals {
        pub key: String,
        pub totals: MetricTotals,
    }

    /// Stable sort: ties preserve the incoming relative order. Totals are
    /// finite by construction, so the numeric comparison treats any
    /// incomparable pair as equal without disturbing stability.
    pub fn sort_groups(
        mut groups: Vec<GroupTotals>,
        field: SortField,
        direction: SortDirection,
    ) -> Vec<GroupTotals> {
        let compare = |a: &GroupTotals, b: &GroupTotals| -> Ordering {
            match field {
                SortField::Key => a.key.to_lowercase().cmp(&b.key.to_lowercase()),
                SortField::Metric(metric) => a
                    .totals
                    .metric(metric)
                    .partial_cmp(&b.totals.metric(metric))
                    .unwrap_or(Ordering::Equal),
            }
        };
        match direction {
            SortDirection::Ascending => groups.sort_by(compare),
            SortDirection::Descending => groups.sort_by(|a, b| compare(b, a)),
        }
        groups
    }

    /// Collect a grouping into a deterministic baseline order (key,
    /// ascending, case-insensitive) ready for further sorting.
    pub fn collect_groups(groups: HashMap<String, MetricTotals>) -> Vec<GroupTotals> {
        let collected = groups
            .into_iter()
            .map(|(key, totals)| GroupTotals { key, totals })
            .collect();
        sort_groups(collected, SortField::Key, SortDirection::Ascending)
    }
}

/// Conversion funnel step rates.
pub mod funnel {
    use super::aggregate::sanitize;
    use super::ratios::safe_div;
    use serde::{Deserialize, Serialize};

    /// One labeled stage count, in funnel order.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct FunnelStage {
        pub label: String,
        pub count: f64,
    }

    impl FunnelStage {
        pub fn new(label: impl Into<String>, count: f64) -> Self {
            Self {
                label: label.into(),
                count,
            }
        }
    }

    /// Conversion percentage from one stage to the next.
    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct FunnelStepRate {
        pub from: String,
        pub to: String,
        pub rate: f64,
    }

    /// Per-adjacent-step conversion rates. An empty upstream stage yields a
    /// 0 rate rather than a division error.
    pub fn step_rates(stages: &[FunnelStage]) -> Vec<FunnelStepRate> {
        stages
            .windows(2)
            .map(|pair| FunnelStepRate {
                from: pair[0].label.clone(),
                to: pair[1].label.clone(),
                rate: safe_div(sanitize(pair[1].count), sanitize(pair[0].count)) * 100.0,
            })
            .collect()
    }

    /// End-to-end funnel conversion: last stage over first, as a percentage.
    pub fn overall_rate(stages: &[FunnelStage]) -> f64 {
        match (stages.first(), stages.last()) {
            (Some(first), Some(last)) if stages.len() >= 2 => {
                safe_div(sanitize(last.count), sanitize(first.count)) * 100.0
            }
            _ => 0.0,
        }
    }
}

/// Per-series statistics and outlier bands.
pub mod series {
    use super::aggregate::sanitize;
    use serde::Serialize;

    /// Mean and population standard deviation of one series.
    #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
    pub struct SeriesStats {
        pub mean: f64,
        pub std_dev: f64,
    }

    /// How one point sits against its series' band.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PointClass {
        Normal,
        HighOutlier,
        LowOutlier,
    }

    /// Population statistics over the visible values. An empty series reads
    /// as mean 0, deviation 0.
    pub fn series_stats(values: &[f64]) -> SeriesStats {
        let count = values.len().max(1) as f64;
        let mean = values.iter().map(|v| sanitize(*v)).sum::<f64>() / count;
        let variance = values
            .iter()
            .map(|v| {
                let delta = sanitize(*v) - mean;
                delta * delta
            })
            .sum::<f64>()
            / count;
        SeriesStats {
            mean,
            std_dev: variance.sqrt(),
        }
    }

    /// Classify a point against the 2-sigma band. The inequalities are
    /// strict: with zero variance both thresholds collapse onto the mean and
    /// nothing is ever flagged.
    pub fn classify(value: f64, stats: &SeriesStats) -> PointClass {
        let value = sanitize(value);
        if value > stats.mean + 2.0 * stats.std_dev {
            PointClass::HighOutlier
        } else if value < stats.mean - 2.0 * stats.std_dev {
            PointClass::LowOutlier
        } else {
            PointClass::Normal
        }
    }

    /// Compute the band once and classify every point of the series.
    pub fn annotate(values: &[f64]) -> Vec<PointClass> {
        let stats = series_stats(values);
        values.iter().map(|v| classify(*v, &stats)).collect()
    }
}

/// Full-period projection from a partial-period actual.
pub mod runrate {
    use super::aggregate::sanitize;
    use crate::contracts::MonthlyGoals;
    use crate::types::MonthKey;
    use chrono::{Datelike, NaiveDate};
    use serde::Serialize;

    #[derive(Debug, Clone, Copy, PartialEq, Serialize)]
    pub struct RunRateProjection {
        /// Linear extrapolation of the actual to the full period.
        pub run_rate: f64,
        /// Run rate as a percentage of the period goal.
        pub percentage_of_goal: f64,
    }

    /// Project a partial-period actual to the full period against a goal.
    /// No projection when the goal is absent or nonpositive, or when no days
    /// have elapsed; those cases have no meaningful extrapolation.
    pub fn project_run_rate(
        actual: f64,
        elapsed_days: u32,
        total_days: u32,
        goal: Option<f64>,
    ) -> Option<RunRateProjection> {
        let goal = goal?;
        if elapsed_days == 0 || total_days == 0 || goal <= 0.0 {
            return None;
        }
        let run_rate = sanitize(actual) * f64::from(total_days) / f64::from(elapsed_days);
        Some(RunRateProjection {
            run_rate,
            percentage_of_goal: run_rate / goal * 100.0,
        })
    }

    /// Days in the month the date falls in, leap-aware. 0 only at the
    /// calendar boundary, which the projection guard treats as no projection.
    pub fn days_in_month(date: NaiveDate) -> u32 {
        let year = date.year();
        let month = date.month();
        let first_of_month = NaiveDate::from_ymd_opt(year, month, 1);
        let first_of_next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        };
        match (first_of_month, first_of_next) {
            (Some(this), Some(next)) => next.signed_duration_since(this).num_days() as u32,
            _ => 0,
        }
    }

    /// Month-to-date projection for the given date: elapsed days is the day
    /// of month, the goal is looked up under the date's `YYYY-MM` key.
    pub fn project_for_date(
        date: NaiveDate,
        month_actual: f64,
        goals: &MonthlyGoals,
    ) -> Option<RunRateProjection> {
        let month = MonthKey::for_date(date);
        let goal = goals
            .goal_for(&month)
            .map(|goal| goal.paid_revenue_target);
        project_run_rate(month_actual, date.day(), days_in_month(date), goal)
    }
}

/// Advisory countdown for long downloads.
pub mod countdown {
    /// Seconds the synthetic countdown starts from. Matches the observed
    /// ceiling of a heavy order download.
    pub const COUNTDOWN_START: u64 = 60;

    /// Map remaining countdown seconds to a stage label. Purely advisory;
    /// the real completion signal comes from the fetch itself.
    pub fn stage_for_remaining(remaining: u64) -> &'static str {
        match remaining {
            50.. => "Starting download...",
            40..=49 => "Processing data...",
            20..=39 => "Analyzing attributions...",
            10..=19 => "Finalizing download...",
            5..=9 => "Almost ready...",
            1..=4 => "Finishing up...",
            0 => "Still working, hang tight...",
        }
    }

    /// Remaining countdown seconds after the given elapsed time, saturating
    /// at 0 once the expected ceiling has passed.
    pub fn remaining_after(elapsed_secs: u64) -> u64 {
        COUNTDOWN_START.saturating_sub(elapsed_secs)
    }
}

/// Summary line for a downloaded order listing.
pub mod summary {
    use super::aggregate::sanitize;
    use super::ratios::safe_div;
    use crate::contracts::OrderRecord;
    use serde::Serialize;

    #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
    pub struct OrderSummary {
        pub order_count: usize,
        pub total_revenue: f64,
        pub average_order_value: f64,
    }

    pub fn order_summary(orders: &[OrderRecord]) -> OrderSummary {
        let total_revenue: f64 = orders.iter().map(|order| sanitize(order.revenue)).sum();
        OrderSummary {
            order_count: orders.len(),
            total_revenue,
            average_order_value: safe_div(total_revenue, orders.len() as f64),
        }
    }
}
