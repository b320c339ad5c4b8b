// Aggregation Pipeline Tests - full passes over realistic dashboard data
// Exercises the pure layer end to end: totals, grouping, ratios, growth,
// timeline, outliers, and run-rate projection over one coherent dataset.

use anyhow::Result;
use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use shopmetrics::contracts::{MetricRow, MonthGoal, MonthlyGoals};
use shopmetrics::pure::aggregate::{
    group_by_segment, group_by_with_keys, reduce_totals, MetricField, MetricTotals, UNLABELED,
};
use shopmetrics::pure::funnel::{step_rates, FunnelStage};
use shopmetrics::pure::growth::growth_between;
use shopmetrics::pure::ratios::derive_ratios;
use shopmetrics::pure::runrate::project_for_date;
use shopmetrics::pure::series::{annotate, PointClass};
use shopmetrics::pure::sorting::{collect_groups, sort_groups, SortDirection, SortField};
use shopmetrics::pure::timeline::build_timeline;
use shopmetrics::types::{MonthKey, ValidatedDateRange};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn row(d: NaiveDate, segment: &str, sessions: f64, cart_adds: f64, orders: f64, revenue: f64) -> MetricRow {
    let mut row = MetricRow::new(d);
    row.segment = if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    };
    row.sessions = sessions;
    row.cart_adds = cart_adds;
    row.orders = orders;
    row.revenue = revenue;
    // Dyadic factors keep every derived value exact, so grouped sums can be
    // compared to ungrouped sums with plain equality.
    row.paid_orders = orders * 0.75;
    row.paid_revenue = revenue * 0.75;
    row.new_customers = orders * 0.5;
    row.new_customer_revenue = revenue * 0.25;
    row
}

/// One week of January traffic across two segments plus unlabeled spillover.
fn january_rows() -> Vec<MetricRow> {
    let mut rows = Vec::new();
    for day in 1..=7 {
        let d = date(2024, 1, day);
        rows.push(row(d, "organic", 1000.0, 260.0, 40.0, 4000.0));
        rows.push(row(d, "paid", 500.0, 150.0, 30.0, 3600.0));
        rows.push(row(d, "", 50.0, 5.0, 0.0, 0.0));
    }
    rows
}

#[test]
fn test_totals_grouping_and_ratios_agree() -> Result<()> {
    let rows = january_rows();
    let totals = reduce_totals(&rows);

    assert_eq!(totals.sessions, 7.0 * 1550.0);
    assert_eq!(totals.orders, 7.0 * 70.0);
    assert_eq!(totals.revenue, 7.0 * 7600.0);

    let groups = group_by_segment(&rows);
    assert_eq!(groups.len(), 3);
    assert!(groups.contains_key(UNLABELED));

    let mut merged = MetricTotals::default();
    for group in groups.values() {
        merged.merge(group);
    }
    assert_eq!(merged, totals);

    let organic = derive_ratios(&groups["organic"]);
    assert!((organic.conversion_rate - 4.0).abs() < 1e-9);
    assert!((organic.average_order_value - 100.0).abs() < 1e-9);
    assert!((organic.cart_add_rate - 26.0).abs() < 1e-9);

    let paid = derive_ratios(&groups["paid"]);
    assert!((paid.conversion_rate - 6.0).abs() < 1e-9);
    assert!((paid.average_order_value - 120.0).abs() < 1e-9);

    // The empty segment produces defined zero ratios, never NaN.
    let unlabeled = derive_ratios(&groups[UNLABELED]);
    assert_eq!(unlabeled.conversion_rate, 0.0);
    assert_eq!(unlabeled.average_order_value, 0.0);
    Ok(())
}

#[test]
fn test_growth_against_previous_period() -> Result<()> {
    let current = reduce_totals(&january_rows());

    // December was half the traffic and had no paid spend at all.
    let mut previous_rows = Vec::new();
    for day in 25..=31 {
        previous_rows.push(row(date(2023, 12, day), "organic", 500.0, 130.0, 20.0, 2000.0));
    }
    let previous = reduce_totals(&previous_rows);

    // Sessions: 10850 vs 3500 -> +210%. Orders: 490 vs 140 -> +250%.
    let growth = growth_between(&current, &previous);
    assert!((growth.sessions - 210.0).abs() < 1e-9);
    assert!((growth.orders - 250.0).abs() < 1e-9);
    // clicks: nothing in either period reads as no movement.
    assert_eq!(growth.clicks, 0.0);

    // The range helper produces an adjacent window of equal length.
    let range = ValidatedDateRange::parse("2024-01-01", "2024-01-07")?;
    let previous_range = range.previous_period()?;
    assert_eq!(previous_range.start(), date(2023, 12, 25));
    assert_eq!(previous_range.end(), date(2023, 12, 31));
    assert_eq!(previous_range.day_count(), range.day_count());
    Ok(())
}

#[test]
fn test_timeline_feeds_outlier_annotation() -> Result<()> {
    let mut rows = january_rows();
    // One Black-Friday-sized spike buried mid-week.
    rows.push(row(date(2024, 1, 4), "organic", 9000.0, 2300.0, 700.0, 90000.0));

    let timeline = build_timeline(&rows);
    assert_eq!(timeline.len(), 7);
    for pair in timeline.windows(2) {
        assert!(pair[0].date < pair[1].date, "buckets must ascend by date");
    }

    let revenue_series: Vec<f64> = timeline.iter().map(|b| b.totals.revenue).collect();
    let classes = annotate(&revenue_series);
    let spike_index = timeline
        .iter()
        .position(|b| b.date == date(2024, 1, 4))
        .unwrap();

    assert_eq!(classes[spike_index], PointClass::HighOutlier);
    assert_eq!(
        classes
            .iter()
            .filter(|c| **c == PointClass::HighOutlier)
            .count(),
        1
    );
    Ok(())
}

#[test]
fn test_group_sorting_for_display() -> Result<()> {
    let rows = january_rows();
    let expected = vec![
        "organic".to_string(),
        "paid".to_string(),
        "referral".to_string(),
    ];
    let groups = group_by_with_keys(&rows, |r| r.segment.clone(), &expected);

    // The requested-but-empty segment appears zero-filled.
    assert_eq!(groups["referral"], MetricTotals::default());

    let by_revenue = sort_groups(
        collect_groups(groups),
        SortField::Metric(MetricField::Revenue),
        SortDirection::Descending,
    );
    let keys: Vec<&str> = by_revenue.iter().map(|g| g.key.as_str()).collect();
    // The zero-revenue tie keeps the alphabetical baseline: referral before
    // Unlabeled.
    assert_eq!(keys, vec!["organic", "paid", "referral", "Unlabeled"]);
    Ok(())
}

#[test]
fn test_funnel_rates_from_totals() -> Result<()> {
    let totals = reduce_totals(&january_rows());
    let stages = vec![
        FunnelStage::new("sessions", totals.sessions),
        FunnelStage::new("cart_adds", totals.cart_adds),
        FunnelStage::new("orders", totals.orders),
    ];

    let rates = step_rates(&stages);
    assert_eq!(rates.len(), 2);
    assert!((rates[0].rate - totals.cart_adds / totals.sessions * 100.0).abs() < 1e-9);
    assert!((rates[1].rate - totals.orders / totals.cart_adds * 100.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn test_run_rate_projection_mid_month() -> Result<()> {
    let mut goals = MonthlyGoals::new();
    goals.insert(
        MonthKey::new(2024, 1).unwrap(),
        MonthGoal {
            paid_revenue_target: 120_000.0,
        },
    );

    // 7 days of paid revenue, projected across 31 days.
    let actual = reduce_totals(&january_rows()).paid_revenue;
    let projection = project_for_date(date(2024, 1, 7), actual, &goals)
        .expect("goal present, days elapsed: projection must exist");

    let expected_run_rate = actual * 31.0 / 7.0;
    assert!((projection.run_rate - expected_run_rate).abs() < 1e-6);
    assert!(
        (projection.percentage_of_goal - expected_run_rate / 120_000.0 * 100.0).abs() < 1e-6
    );

    // No goal for February: no projection.
    assert!(project_for_date(date(2024, 2, 7), actual, &goals).is_none());
    Ok(())
}

fn arbitrary_rows() -> impl Strategy<Value = Vec<MetricRow>> {
    // Integer-valued fields keep the sums exact under any grouping order.
    let field = 0u32..1_000_000;
    let row = (
        0u64..60,
        prop::option::of(prop::sample::select(vec![
            "organic".to_string(),
            "paid".to_string(),
            "referral".to_string(),
            "  ".to_string(),
        ])),
        field.clone(),
        field.clone(),
        field.clone(),
        field,
    )
        .prop_map(|(offset, segment, sessions, cart_adds, orders, revenue)| {
            let mut row = MetricRow::new(
                date(2024, 1, 1) + chrono::Days::new(offset),
            );
            row.segment = segment;
            row.sessions = f64::from(sessions);
            row.cart_adds = f64::from(cart_adds);
            row.orders = f64::from(orders);
            row.revenue = f64::from(revenue);
            row
        });
    prop::collection::vec(row, 0..50)
}

proptest! {
    #[test]
    fn prop_grouping_is_sum_preserving(rows in arbitrary_rows()) {
        let ungrouped = reduce_totals(&rows);

        let mut regrouped = MetricTotals::default();
        for totals in group_by_segment(&rows).values() {
            regrouped.merge(totals);
        }

        prop_assert_eq!(regrouped, ungrouped);
    }

    #[test]
    fn prop_timeline_is_sorted_and_lossless(rows in arbitrary_rows()) {
        let timeline = build_timeline(&rows);

        for pair in timeline.windows(2) {
            prop_assert!(pair[0].date < pair[1].date);
        }

        let total: f64 = timeline.iter().map(|b| b.totals.sessions).sum();
        prop_assert_eq!(total, reduce_totals(&rows).sessions);
    }

    #[test]
    fn prop_cart_add_rate_is_bounded(sessions in 0u32..10_000, cart_adds in 0u32..1_000_000) {
        let mut totals = MetricTotals::default();
        totals.sessions = f64::from(sessions);
        totals.cart_adds = f64::from(cart_adds);

        let rate = derive_ratios(&totals).cart_add_rate;
        prop_assert!((0.0..=100.0).contains(&rate));
    }

    #[test]
    fn prop_ratios_are_always_finite(sessions in 0u32..100, orders in 0u32..100, revenue in 0u32..10_000) {
        let mut totals = MetricTotals::default();
        totals.sessions = f64::from(sessions);
        totals.orders = f64::from(orders);
        totals.revenue = f64::from(revenue);

        let ratios = derive_ratios(&totals);
        prop_assert!(ratios.conversion_rate.is_finite());
        prop_assert!(ratios.average_order_value.is_finite());
        prop_assert!(ratios.revenue_per_session.is_finite());
        prop_assert!(ratios.new_customer_rate.is_finite());
        prop_assert!(ratios.cart_add_rate.is_finite());
    }
}
