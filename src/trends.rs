// Trend and geographic derivations: per-day trend with a lagged Rt
// estimate, the latest known state of every location with per-capita
// rates, and the top-N ranking over it.
use crate::error::{DashboardError, Result};
use crate::loader::Dataset;
use crate::types::{Observation, RankingDisplayRow, TrendDisplayRow, TrendRow, WorldLatestRow};
use crate::util::{back_fill, forward_fill, format_number, format_opt};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::ops::RangeInclusive;

pub const RT_LAG_DAYS: usize = 7;
pub const TOP_N_RANGE: RangeInclusive<usize> = 5..=50;

fn cumulative(slice: &[Observation], field: impl Fn(&Observation) -> Option<f64>) -> Vec<f64> {
    let mut v: Vec<Option<f64>> = slice.iter().map(field).collect();
    forward_fill(&mut v);
    v.into_iter().map(|x| x.unwrap_or(0.0)).collect()
}

/// `new_cases[t] / new_cases[t - 7]`, with zero or missing denominators and
/// non-finite ratios left empty, then back-filled from the next valid value.
///
/// This is a lagged-ratio heuristic, not a serial-interval estimate.
pub fn lagged_rt(new_cases: &[f64]) -> Vec<Option<f64>> {
    let mut rt: Vec<Option<f64>> = new_cases
        .iter()
        .enumerate()
        .map(|(t, &today)| {
            let earlier = *new_cases.get(t.checked_sub(RT_LAG_DAYS)?)?;
            if earlier == 0.0 {
                return None;
            }
            Some(today / earlier).filter(|r| r.is_finite())
        })
        .collect();
    back_fill(&mut rt);
    rt
}

/// Daily trend for a date-ordered slice.
pub fn daily_trend(slice: &[Observation]) -> Vec<TrendRow> {
    let new_cases: Vec<f64> = slice.iter().map(|o| o.new_cases.unwrap_or(0.0)).collect();
    let total_cases = cumulative(slice, |o| o.total_cases);
    let total_deaths = cumulative(slice, |o| o.total_deaths);
    let total_recovered = cumulative(slice, |o| o.total_recovered);
    let rt = lagged_rt(&new_cases);

    slice
        .iter()
        .enumerate()
        .map(|(i, o)| TrendRow {
            date: o.date,
            new_cases: new_cases[i],
            new_deaths: o.new_deaths.unwrap_or(0.0),
            new_recovered: o.new_recovered.unwrap_or(0.0),
            total_cases: total_cases[i],
            total_deaths: total_deaths[i],
            total_recovered: total_recovered[i],
            active_cases: total_cases[i] - total_deaths[i] - total_recovered[i],
            rt: rt[i],
        })
        .collect()
}

/// Most recent non-missing value of `field` in a date-ordered series.
fn last_known(series: &[Observation], field: impl Fn(&Observation) -> Option<f64>) -> Option<f64> {
    series.iter().rev().find_map(field)
}

/// Each column forward-filled up to the location's last date, so a final
/// row that lags on one column (usually vaccinations) still counts.
fn latest_row(series: &[Observation]) -> Option<WorldLatestRow> {
    let last = series.last()?;
    let iso_code = series
        .iter()
        .rev()
        .find_map(|o| o.iso_code.clone().filter(|c| !c.trim().is_empty()))?;
    let total_cases = last_known(series, |o| o.total_cases)?;
    let total_deaths = last_known(series, |o| o.total_deaths)?;
    let total_vaccinations = last_known(series, |o| o.total_vaccinations)?;
    let population = last_known(series, |o| o.population)?;
    let total_recovered = last_known(series, |o| o.total_recovered).unwrap_or(0.0);

    let active_cases = total_cases - total_deaths - total_recovered;
    let cases_per_100k = active_cases / population * 100_000.0;
    let vaccination_pct = total_vaccinations / population * 100.0;
    let usable = |v: f64| v.is_finite() && v >= 0.0;
    if !usable(cases_per_100k) || !usable(vaccination_pct) {
        return None;
    }
    Some(WorldLatestRow {
        location: last.location.clone(),
        iso_code,
        date: last.date,
        total_cases,
        total_deaths,
        total_vaccinations,
        population,
        active_cases,
        cases_per_100k,
        vaccination_pct,
    })
}

/// Latest state of every location with per-capita rates, dated at its
/// last observation. Locations without an ISO code, without any value for
/// a required column, or with an unusable rate are left out.
pub fn world_latest(dataset: &Dataset) -> Vec<WorldLatestRow> {
    let mut out = Vec::new();
    let mut excluded = 0usize;
    for location in dataset.locations() {
        match latest_row(dataset.country_series(location)) {
            Some(row) => out.push(row),
            None => excluded += 1,
        }
    }
    log::debug!(
        "World snapshot: {} locations kept, {} excluded",
        out.len(),
        excluded
    );
    out
}

/// The `n` rows with the most active cases per 100k, `n` in 5..=50.
pub fn top_n(rows: &[WorldLatestRow], n: usize) -> Result<Vec<WorldLatestRow>> {
    if !TOP_N_RANGE.contains(&n) {
        return Err(DashboardError::InvalidParameter {
            name: "top N",
            value: n.to_string(),
            expected: "between 5 and 50",
        });
    }
    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| {
        b.cases_per_100k
            .partial_cmp(&a.cases_per_100k)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.location.cmp(&b.location))
    });
    let mut seen = HashSet::new();
    sorted.retain(|r| seen.insert(r.location.clone()));
    sorted.truncate(n);
    Ok(sorted)
}

pub fn trend_display_rows(rows: &[TrendRow]) -> Vec<TrendDisplayRow> {
    rows.iter()
        .map(|r| TrendDisplayRow {
            date: r.date.to_string(),
            new_cases: format_number(r.new_cases, 0),
            total_cases: format_number(r.total_cases, 0),
            total_deaths: format_number(r.total_deaths, 0),
            active_cases: format_number(r.active_cases, 0),
            rt: format_opt(r.rt, 2),
        })
        .collect()
}

pub fn ranking_display_rows(rows: &[WorldLatestRow]) -> Vec<RankingDisplayRow> {
    rows.iter()
        .enumerate()
        .map(|(i, r)| RankingDisplayRow {
            rank: i + 1,
            location: r.location.clone(),
            iso_code: r.iso_code.clone(),
            cases_per_100k: format_number(r.cases_per_100k, 2),
            vaccination_pct: format_number(r.vaccination_pct, 2),
        })
        .collect()
}
