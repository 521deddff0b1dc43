use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

/// One CSV record exactly as read. Every field is optional text so a bad
/// cell only loses that cell, not the row.
#[derive(Debug, Deserialize)]
pub struct RawRow {
    pub location: Option<String>,
    pub date: Option<String>,
    pub iso_code: Option<String>,
    pub new_cases: Option<String>,
    pub total_cases: Option<String>,
    pub total_deaths: Option<String>,
    pub new_deaths: Option<String>,
    pub total_vaccinations: Option<String>,
    pub total_tests: Option<String>,
    pub population: Option<String>,
    pub gdp_per_capita: Option<String>,
    pub human_development_index: Option<String>,
    // Not part of the OWID export; honoured when a file carries them.
    #[serde(default)]
    pub new_recovered: Option<String>,
    #[serde(default)]
    pub total_recovered: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub location: String,
    pub date: NaiveDate,
    pub year: i32,
    pub iso_code: Option<String>,
    pub new_cases: Option<f64>,
    pub total_cases: Option<f64>,
    pub total_deaths: Option<f64>,
    pub new_deaths: Option<f64>,
    pub total_vaccinations: Option<f64>,
    pub total_tests: Option<f64>,
    pub population: Option<f64>,
    pub gdp_per_capita: Option<f64>,
    pub human_development_index: Option<f64>,
    pub new_recovered: Option<f64>,
    pub total_recovered: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricDelta {
    pub current: i64,
    pub delta: i64,
}

impl MetricDelta {
    pub fn between(current: i64, previous: i64) -> Self {
        Self {
            current,
            delta: current.saturating_sub(previous),
        }
    }
}

/// Headline metrics of the latest day with their change from the day before.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub location: String,
    pub date: NaiveDate,
    pub total_cases: MetricDelta,
    pub active_cases: MetricDelta,
    pub recovered: MetricDelta,
    pub total_deaths: MetricDelta,
    pub vaccinations: MetricDelta,
    pub tests: MetricDelta,
}

/// A model-ready row: `ds`, target `y` and the three regressors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastRow {
    pub ds: NaiveDate,
    pub y: f64,
    pub vaccinations: f64,
    pub gdp: f64,
    pub health_index: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastInput {
    pub location: String,
    pub rows: Vec<ForecastRow>,
}

impl ForecastInput {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.last().map(|r| r.ds)
    }
}

/// A regressor row of the prediction frame; history and future alike.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRow {
    pub ds: NaiveDate,
    pub vaccinations: f64,
    pub gdp: f64,
    pub health_index: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub ds: NaiveDate,
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
    pub trend: f64,
}

/// Actual against predicted, inner-joined on date.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub pairs: Vec<(NaiveDate, f64, f64)>,
    pub mean_absolute_error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendRow {
    pub date: NaiveDate,
    pub new_cases: f64,
    pub new_deaths: f64,
    pub new_recovered: f64,
    pub total_cases: f64,
    pub total_deaths: f64,
    pub total_recovered: f64,
    pub active_cases: f64,
    /// Lagged-ratio reproduction estimate; `None` where no later value
    /// could back-fill it.
    pub rt: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldLatestRow {
    pub location: String,
    pub iso_code: String,
    pub date: NaiveDate,
    pub total_cases: f64,
    pub total_deaths: f64,
    pub total_vaccinations: f64,
    pub population: f64,
    pub active_cases: f64,
    pub cases_per_100k: f64,
    pub vaccination_pct: f64,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct MetricDisplayRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Change")]
    pub change: String,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct TrendDisplayRow {
    #[tabled(rename = "Date")]
    pub date: String,
    #[tabled(rename = "NewCases")]
    pub new_cases: String,
    #[tabled(rename = "TotalCases")]
    pub total_cases: String,
    #[tabled(rename = "Deaths")]
    pub total_deaths: String,
    #[tabled(rename = "ActiveCases")]
    pub active_cases: String,
    #[tabled(rename = "Rt")]
    pub rt: String,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct RankingDisplayRow {
    #[tabled(rename = "Rank")]
    pub rank: usize,
    #[tabled(rename = "Location")]
    pub location: String,
    #[tabled(rename = "ISO")]
    pub iso_code: String,
    #[tabled(rename = "CasesPer100k")]
    pub cases_per_100k: String,
    #[tabled(rename = "VaccinationPct")]
    pub vaccination_pct: String,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct ForecastDisplayRow {
    #[tabled(rename = "Date")]
    pub date: String,
    #[tabled(rename = "Predicted")]
    pub yhat: String,
    #[tabled(rename = "Lower")]
    pub yhat_lower: String,
    #[tabled(rename = "Upper")]
    pub yhat_upper: String,
}

/// Row layout of the downloadable forecast artifact.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ForecastExportRow {
    pub date: NaiveDate,
    pub predicted_value: f64,
}
