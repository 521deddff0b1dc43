// Headline metrics for a country-year slice: the last day against the day
// before it.
use crate::error::{DashboardError, Result};
use crate::types::{MetricDelta, MetricDisplayRow, MetricsSnapshot, Observation};
use crate::util::{format_int, format_signed};

/// Missing cells count as zero so the arithmetic stays total. Values are
/// truncated to whole numbers, which is how they are displayed; the cast
/// saturates and every difference below saturates with it.
fn count(v: Option<f64>) -> i64 {
    v.map_or(0, |x| x as i64)
}

fn active(o: &Observation) -> i64 {
    // Recovered is absent from most exports and then counts as zero, so
    // active cases include recoveries in that case.
    count(o.total_cases)
        .saturating_sub(count(o.total_deaths))
        .saturating_sub(count(o.total_recovered))
}

/// Compare the last row of `slice` to the second-to-last.
///
/// `slice` must be ordered by date. Fewer than two rows is
/// `InsufficientData`.
pub fn summarize(slice: &[Observation]) -> Result<MetricsSnapshot> {
    let [.., previous, latest] = slice else {
        return Err(DashboardError::insufficient(
            "compute summary metrics",
            2,
            slice.len(),
        ));
    };

    Ok(MetricsSnapshot {
        location: latest.location.clone(),
        date: latest.date,
        total_cases: MetricDelta::between(count(latest.total_cases), count(previous.total_cases)),
        active_cases: MetricDelta::between(active(latest), active(previous)),
        recovered: MetricDelta::between(
            count(latest.total_recovered),
            count(previous.total_recovered),
        ),
        total_deaths: MetricDelta::between(
            count(latest.total_deaths),
            count(previous.total_deaths),
        ),
        vaccinations: MetricDelta::between(
            count(latest.total_vaccinations),
            count(previous.total_vaccinations),
        ),
        tests: MetricDelta::between(count(latest.total_tests), count(previous.total_tests)),
    })
}

pub fn display_rows(s: &MetricsSnapshot) -> Vec<MetricDisplayRow> {
    [
        ("Total Cases", s.total_cases),
        ("Active Cases", s.active_cases),
        ("Recovered", s.recovered),
        ("Total Deaths", s.total_deaths),
        ("Vaccinations", s.vaccinations),
        ("Tests Conducted", s.tests),
    ]
    .into_iter()
    .map(|(name, m)| MetricDisplayRow {
        metric: name.to_string(),
        value: format_int(m.current),
        change: format_signed(m.delta),
    })
    .collect()
}
