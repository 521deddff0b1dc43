//! Additive time-series model with trend changepoints, Fourier
//! seasonality and three exogenous regressors.
//!
//! `y(t) = k + m·t + Σ δⱼ·(t − sⱼ)₊ + weekly(t) + yearly(t) + Σ βᵣ·xᵣ(t)`
//!
//! Parameters are the MAP estimate under zero-mean Gaussian priors, found
//! in closed form from the regularized normal equations. The same inputs
//! always give the same fit.

use crate::error::{DashboardError, Result};
use crate::forecast::{future_frame, preprocess};
use crate::loader::Dataset;
use crate::types::{ForecastInput, ForecastPoint, FrameRow};
use crate::util::{average, std_dev};
use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};
use std::f64::consts::PI;

const MAX_CHANGEPOINTS: usize = 25;
const CHANGEPOINT_RANGE: f64 = 0.8;
const WEEKLY_ORDER: usize = 3;
const YEARLY_ORDER: usize = 10;
const WEEKLY_MIN_SPAN_DAYS: i64 = 14;
const YEARLY_MIN_SPAN_DAYS: i64 = 730;
const SEASONALITY_PRIOR_SCALE: f64 = 10.0;
const REGRESSOR_PRIOR_SCALE: f64 = 10.0;
const TREND_PRIOR_SCALE: f64 = 5.0;
/// Two-sided normal quantile for an 80% interval.
const INTERVAL_Z: f64 = 1.281_551_565_5;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Standardizer {
    mean: f64,
    std: f64,
}

impl Standardizer {
    fn fit(values: &[f64]) -> Self {
        let std = std_dev(values);
        Self {
            mean: average(values),
            std: if std > 0.0 { std } else { 1.0 },
        }
    }

    fn apply(&self, v: f64) -> f64 {
        (v - self.mean) / self.std
    }
}

/// A fitted model. Opaque apart from what `predict` needs.
#[derive(Debug, Clone)]
pub struct ForecastModel {
    location: String,
    changepoint_prior_scale: f64,
    start: NaiveDate,
    span_days: f64,
    y_scale: f64,
    changepoints: Vec<f64>,
    weekly: bool,
    yearly: bool,
    regressors: [Standardizer; 3],
    beta: DVector<f64>,
    residual_sd: f64,
}

fn days_since_epoch(d: NaiveDate) -> f64 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    (d - epoch).num_days() as f64
}

fn fourier(day: f64, period: f64, order: usize, out: &mut Vec<f64>) {
    for k in 1..=order {
        let x = 2.0 * PI * k as f64 * day / period;
        out.push(x.sin());
        out.push(x.cos());
    }
}

/// Evenly spaced over the first 80% of history, as scaled times.
fn place_changepoints(t: &[f64]) -> Vec<f64> {
    let hist = (t.len() as f64 * CHANGEPOINT_RANGE).floor() as usize;
    let n = MAX_CHANGEPOINTS.min(hist.saturating_sub(1));
    if n == 0 {
        return Vec::new();
    }
    (1..=n)
        .map(|i| {
            let idx = (i as f64 * (hist - 1) as f64 / n as f64).round() as usize;
            t[idx]
        })
        .collect()
}

impl ForecastModel {
    /// Fit on a preprocessed series. Fails with `ModelFit` on non-finite
    /// data or a degenerate system; there is no retry.
    pub fn fit(input: &ForecastInput, changepoint_prior_scale: f64) -> Result<Self> {
        let rows = &input.rows;
        if rows.len() < 2 {
            return Err(DashboardError::insufficient("train the model", 2, rows.len()));
        }
        let finite = rows.iter().all(|r| {
            r.y.is_finite()
                && r.vaccinations.is_finite()
                && r.gdp.is_finite()
                && r.health_index.is_finite()
        });
        if !finite || !(changepoint_prior_scale > 0.0) {
            return Err(DashboardError::ModelFit {
                message: format!("non-finite input for {}", input.location),
            });
        }

        let start = rows[0].ds;
        let span = (rows[rows.len() - 1].ds - start).num_days();
        let y_scale = rows.iter().map(|r| r.y.abs()).fold(0.0, f64::max);

        let mut model = Self {
            location: input.location.clone(),
            changepoint_prior_scale,
            start,
            span_days: span.max(1) as f64,
            y_scale: if y_scale > 0.0 { y_scale } else { 1.0 },
            changepoints: Vec::new(),
            weekly: span >= WEEKLY_MIN_SPAN_DAYS,
            yearly: span >= YEARLY_MIN_SPAN_DAYS,
            regressors: [
                Standardizer::fit(&rows.iter().map(|r| r.vaccinations).collect::<Vec<_>>()),
                Standardizer::fit(&rows.iter().map(|r| r.gdp).collect::<Vec<_>>()),
                Standardizer::fit(&rows.iter().map(|r| r.health_index).collect::<Vec<_>>()),
            ],
            beta: DVector::zeros(0),
            residual_sd: 0.0,
        };
        let t: Vec<f64> = rows.iter().map(|r| model.scaled_time(r.ds)).collect();
        model.changepoints = place_changepoints(&t);

        let frame: Vec<FrameRow> = rows
            .iter()
            .map(|r| FrameRow {
                ds: r.ds,
                vaccinations: r.vaccinations,
                gdp: r.gdp,
                health_index: r.health_index,
            })
            .collect();
        let x = model.design(&frame);
        let y = DVector::from_iterator(rows.len(), rows.iter().map(|r| r.y / model.y_scale));

        let xt = x.transpose();
        let mut a = &xt * &x;
        for (i, precision) in model.prior_precisions().into_iter().enumerate() {
            a[(i, i)] += precision;
        }
        let b = &xt * &y;
        let chol = a.cholesky().ok_or_else(|| DashboardError::ModelFit {
            message: format!("normal equations are not positive definite for {}", input.location),
        })?;
        model.beta = chol.solve(&b);
        if model.beta.iter().any(|v| !v.is_finite()) {
            return Err(DashboardError::ModelFit {
                message: format!("solution diverged for {}", input.location),
            });
        }

        let fitted = &x * &model.beta;
        let sse: f64 = fitted
            .iter()
            .zip(y.iter())
            .map(|(f, y)| (f - y).powi(2))
            .sum();
        model.residual_sd = (sse / (rows.len() - 1) as f64).sqrt() * model.y_scale;

        log::info!(
            "Fitted model for {} on {} rows ({} changepoints, weekly={}, yearly={}, scale={})",
            model.location,
            rows.len(),
            model.changepoints.len(),
            model.weekly,
            model.yearly,
            changepoint_prior_scale
        );
        Ok(model)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn changepoint_prior_scale(&self) -> f64 {
        self.changepoint_prior_scale
    }

    fn scaled_time(&self, d: NaiveDate) -> f64 {
        (d - self.start).num_days() as f64 / self.span_days
    }

    fn n_trend(&self) -> usize {
        2 + self.changepoints.len()
    }

    fn n_seasonal(&self) -> usize {
        2 * (usize::from(self.weekly) * WEEKLY_ORDER + usize::from(self.yearly) * YEARLY_ORDER)
    }

    fn prior_precisions(&self) -> Vec<f64> {
        let mut p = vec![1.0 / TREND_PRIOR_SCALE.powi(2); 2];
        p.extend(
            std::iter::repeat(1.0 / self.changepoint_prior_scale.powi(2))
                .take(self.changepoints.len()),
        );
        p.extend(std::iter::repeat(1.0 / SEASONALITY_PRIOR_SCALE.powi(2)).take(self.n_seasonal()));
        p.extend(std::iter::repeat(1.0 / REGRESSOR_PRIOR_SCALE.powi(2)).take(3));
        p
    }

    fn features(&self, row: &FrameRow) -> Vec<f64> {
        let t = self.scaled_time(row.ds);
        let mut f = Vec::with_capacity(self.n_trend() + self.n_seasonal() + 3);
        f.push(1.0);
        f.push(t);
        f.extend(self.changepoints.iter().map(|s| (t - s).max(0.0)));
        let day = days_since_epoch(row.ds);
        if self.weekly {
            fourier(day, 7.0, WEEKLY_ORDER, &mut f);
        }
        if self.yearly {
            fourier(day, 365.25, YEARLY_ORDER, &mut f);
        }
        f.push(self.regressors[0].apply(row.vaccinations));
        f.push(self.regressors[1].apply(row.gdp));
        f.push(self.regressors[2].apply(row.health_index));
        f
    }

    fn design(&self, frame: &[FrameRow]) -> DMatrix<f64> {
        let p = self.n_trend() + self.n_seasonal() + 3;
        let data: Vec<f64> = frame.iter().flat_map(|r| self.features(r)).collect();
        DMatrix::from_row_slice(frame.len(), p, &data)
    }

    /// Predict every row of `frame`.
    pub fn predict(&self, frame: &[FrameRow]) -> Vec<ForecastPoint> {
        let n_trend = self.n_trend();
        let band = INTERVAL_Z * self.residual_sd;
        frame
            .iter()
            .map(|row| {
                let f = self.features(row);
                let yhat: f64 = f.iter().zip(self.beta.iter()).map(|(a, b)| a * b).sum();
                let trend: f64 = f[..n_trend]
                    .iter()
                    .zip(self.beta.iter())
                    .map(|(a, b)| a * b)
                    .sum();
                let yhat = yhat * self.y_scale;
                ForecastPoint {
                    ds: row.ds,
                    yhat,
                    yhat_lower: yhat - band,
                    yhat_upper: yhat + band,
                    trend: trend * self.y_scale,
                }
            })
            .collect()
    }

    /// History plus `horizon` future days.
    pub fn forecast(&self, input: &ForecastInput, horizon: u32) -> Vec<ForecastPoint> {
        self.predict(&future_frame(input, horizon))
    }
}

/// A fitted model together with the series it was fitted on.
#[derive(Debug, Clone)]
pub struct TrainedForecast {
    pub input: ForecastInput,
    pub model: ForecastModel,
}

impl TrainedForecast {
    pub fn forecast(&self, horizon: u32) -> Vec<ForecastPoint> {
        self.model.forecast(&self.input, horizon)
    }
}

/// Preprocess one location of `dataset` and fit on it.
pub fn train_for_location(
    dataset: &Dataset,
    location: &str,
    changepoint_prior_scale: f64,
) -> Result<TrainedForecast> {
    if !dataset.has_location(location) {
        return Err(DashboardError::UnknownLocation(location.to_string()));
    }
    let input = preprocess(dataset.country_series(location))?;
    let model = ForecastModel::fit(&input, changepoint_prior_scale)?;
    Ok(TrainedForecast { input, model })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ForecastRow;
    use chrono::Duration;

    fn linear_input(n: i64) -> ForecastInput {
        let start = NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();
        ForecastInput {
            location: "Kenya".to_string(),
            rows: (0..n)
                .map(|i| ForecastRow {
                    ds: start + Duration::days(i),
                    y: 10.0 + 2.0 * i as f64,
                    vaccinations: 1000.0,
                    gdp: 1800.0,
                    health_index: 0.6,
                })
                .collect(),
        }
    }

    #[test]
    fn recovers_a_linear_trend() {
        let input = linear_input(60);
        let model = ForecastModel::fit(&input, 0.5).unwrap();
        let out = model.forecast(&input, 7);
        assert_eq!(out.len(), 67);

        for (p, r) in out.iter().zip(&input.rows) {
            assert!((p.yhat - r.y).abs() < 2.0, "{} vs {}", p.yhat, r.y);
        }
        let last = out.last().unwrap();
        let expected = 10.0 + 2.0 * 66.0;
        assert!((last.yhat - expected).abs() / expected < 0.05);
        assert!(last.yhat_lower <= last.yhat && last.yhat <= last.yhat_upper);
    }

    #[test]
    fn fit_is_deterministic() {
        let input = linear_input(40);
        let a = ForecastModel::fit(&input, 0.05).unwrap().forecast(&input, 10);
        let b = ForecastModel::fit(&input, 0.05).unwrap().forecast(&input, 10);
        assert_eq!(a, b);
    }

    #[test]
    fn two_rows_are_enough() {
        let input = linear_input(2);
        let model = ForecastModel::fit(&input, 0.05).unwrap();
        assert!(model.changepoints.is_empty());
        let out = model.forecast(&input, 3);
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|p| p.yhat.is_finite()));
    }

    #[test]
    fn changepoints_stay_in_first_80_percent() {
        let input = linear_input(100);
        let model = ForecastModel::fit(&input, 0.05).unwrap();
        assert_eq!(model.changepoints.len(), 25);
        assert!(model.changepoints.iter().all(|&s| s > 0.0 && s <= 0.8));
        assert!(model.weekly);
        assert!(!model.yearly);
    }

    #[test]
    fn non_finite_data_is_a_fit_error() {
        let mut input = linear_input(10);
        input.rows[3].gdp = f64::INFINITY;
        let err = ForecastModel::fit(&input, 0.05).unwrap_err();
        assert!(matches!(err, DashboardError::ModelFit { .. }));

        let single = linear_input(1);
        assert!(ForecastModel::fit(&single, 0.05).unwrap_err().is_insufficient_data());
    }

    #[test]
    fn all_zero_target_predicts_zero() {
        let mut input = linear_input(20);
        input.rows.iter_mut().for_each(|r| r.y = 0.0);
        let model = ForecastModel::fit(&input, 0.05).unwrap();
        assert!(model
            .forecast(&input, 5)
            .iter()
            .all(|p| p.yhat.abs() < 1e-9));
    }
}
