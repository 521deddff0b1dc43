// Forecast preprocessing: turns one location's raw observations into a
// model-ready series, builds the prediction frame and scores the fit.
//
// Smoothing is a min-periods-1 trailing mean: missing days are skipped and
// the first six days average the shorter window they have. A strict 7-day
// rolling mean would instead leave a gap for any window holding a missing
// day, and drop the first six days of every series.
use crate::error::{DashboardError, Result};
use crate::types::{
    Comparison, ForecastExportRow, ForecastInput, ForecastPoint, ForecastRow, FrameRow,
    Observation,
};
use crate::util::{average, back_fill, forward_fill};
use chrono::Duration;
use std::collections::HashMap;

pub const SMOOTHING_WINDOW: usize = 7;
pub const MAX_HORIZON: u32 = 365;

/// Tuning inputs of a forecast run, validated on construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastParams {
    changepoint_prior_scale: f64,
    horizon: u32,
}

impl ForecastParams {
    pub fn new(changepoint_prior_scale: f64, horizon: u32) -> Result<Self> {
        if !(changepoint_prior_scale > 0.0 && changepoint_prior_scale <= 1.0) {
            return Err(DashboardError::InvalidParameter {
                name: "changepoint prior scale",
                value: changepoint_prior_scale.to_string(),
                expected: "a value in (0, 1]",
            });
        }
        if !(1..=MAX_HORIZON).contains(&horizon) {
            return Err(DashboardError::InvalidParameter {
                name: "forecast horizon",
                value: horizon.to_string(),
                expected: "between 1 and 365 days",
            });
        }
        Ok(Self {
            changepoint_prior_scale,
            horizon,
        })
    }

    pub fn changepoint_prior_scale(&self) -> f64 {
        self.changepoint_prior_scale
    }

    pub fn horizon(&self) -> u32 {
        self.horizon
    }
}

/// Trailing mean over the non-null values of each window. The first days
/// use the partial window they have; a window with no values at all is
/// `None`.
fn trailing_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            let lo = (i + 1).saturating_sub(window);
            let present: Vec<f64> = values[lo..=i].iter().flatten().copied().collect();
            if present.is_empty() {
                None
            } else {
                Some(average(&present))
            }
        })
        .collect()
}

fn filled(series: &[Observation], field: impl Fn(&Observation) -> Option<f64>) -> Vec<Option<f64>> {
    let mut v: Vec<Option<f64>> = series.iter().map(field).collect();
    forward_fill(&mut v);
    back_fill(&mut v);
    v
}

/// Smooth, fill, drop and clamp a single location's date-ordered series.
///
/// Fewer than two usable rows is refused with `InsufficientData` rather
/// than handed to the model.
pub fn preprocess(series: &[Observation]) -> Result<ForecastInput> {
    let location = series.first().map(|o| o.location.clone()).unwrap_or_default();

    let new_cases: Vec<Option<f64>> = series.iter().map(|o| o.new_cases).collect();
    let smoothed = trailing_mean(&new_cases, SMOOTHING_WINDOW);
    let vaccinations = filled(series, |o| o.total_vaccinations);
    let gdp = filled(series, |o| o.gdp_per_capita);
    let health = filled(series, |o| o.human_development_index);

    let rows: Vec<ForecastRow> = series
        .iter()
        .enumerate()
        .filter_map(|(i, o)| {
            Some(ForecastRow {
                ds: o.date,
                y: smoothed[i]?.max(0.0),
                vaccinations: vaccinations[i]?,
                gdp: gdp[i]?,
                health_index: health[i]?,
            })
        })
        .collect();

    log::debug!(
        "Preprocessed {}: {} of {} rows usable",
        location,
        rows.len(),
        series.len()
    );
    if rows.len() < 2 {
        return Err(DashboardError::insufficient(
            "train the model",
            2,
            rows.len(),
        ));
    }
    Ok(ForecastInput { location, rows })
}

/// The historical index extended by `horizon` daily steps, with known
/// regressors joined on and the future carried forward from the last known
/// values. Extrapolated regressors are placeholders, not forecasts.
pub fn future_frame(input: &ForecastInput, horizon: u32) -> Vec<FrameRow> {
    let Some(last) = input.last_date() else {
        return Vec::new();
    };
    let known: HashMap<_, _> = input.rows.iter().map(|r| (r.ds, r)).collect();

    let mut dates: Vec<_> = input.rows.iter().map(|r| r.ds).collect();
    dates.extend((1..=i64::from(horizon)).map(|d| last + Duration::days(d)));

    let mut vacc: Vec<Option<f64>> = dates.iter().map(|d| known.get(d).map(|r| r.vaccinations)).collect();
    let mut gdp: Vec<Option<f64>> = dates.iter().map(|d| known.get(d).map(|r| r.gdp)).collect();
    let mut health: Vec<Option<f64>> = dates.iter().map(|d| known.get(d).map(|r| r.health_index)).collect();
    for col in [&mut vacc, &mut gdp, &mut health] {
        forward_fill(col);
        back_fill(col);
    }

    dates
        .into_iter()
        .enumerate()
        .map(|(i, ds)| FrameRow {
            ds,
            // Every column has at least one known value, so fills are total.
            vaccinations: vacc[i].unwrap_or_default(),
            gdp: gdp[i].unwrap_or_default(),
            health_index: health[i].unwrap_or_default(),
        })
        .collect()
}

/// Inner-join actual targets with predictions on date and score the
/// overlap. `None` when nothing overlaps.
pub fn compare(input: &ForecastInput, forecast: &[ForecastPoint]) -> Option<Comparison> {
    let predicted: HashMap<_, _> = forecast.iter().map(|p| (p.ds, p.yhat)).collect();
    let pairs: Vec<_> = input
        .rows
        .iter()
        .filter_map(|r| {
            let yhat = predicted.get(&r.ds)?;
            yhat.is_finite().then_some((r.ds, r.y, *yhat))
        })
        .collect();
    if pairs.is_empty() {
        return None;
    }
    let errors: Vec<f64> = pairs.iter().map(|(_, a, p)| (a - p).abs()).collect();
    Some(Comparison {
        mean_absolute_error: average(&errors),
        pairs,
    })
}

pub fn export_rows(forecast: &[ForecastPoint]) -> Vec<ForecastExportRow> {
    forecast
        .iter()
        .map(|p| ForecastExportRow {
            date: p.ds,
            predicted_value: p.yhat,
        })
        .collect()
}
