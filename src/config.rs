use crate::error::{DashboardError, Result};
use std::path::PathBuf;

pub const API_KEY_VAR: &str = "GEMINI_API_KEY";
pub const DEFAULT_DATA_PATH: &str = "owid-covid-data.csv";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;

// Dashboard selector defaults and ranges.
pub const DEFAULT_COUNTRY: &str = "India";
pub const DEFAULT_TOP_N: usize = 10;
pub const DEFAULT_HORIZON: u32 = 30;
pub const HORIZON_CHOICES: std::ops::RangeInclusive<u32> = 7..=90;
pub const DEFAULT_CHANGEPOINT_PRIOR_SCALE: f64 = 0.05;
pub const CHANGEPOINT_PRIOR_SCALE_CHOICES: (f64, f64) = (0.001, 1.0);

/// Runtime configuration read from the environment (after `.env`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_path: PathBuf,
    /// Optional: the chat feature is disabled without it.
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub bind_addr: String,
    pub port: u16,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    ///
    /// Variables:
    /// - `GEMINI_API_KEY`: language-model API key (missing is a warning)
    /// - `GEMINI_MODEL`: model name (default `gemini-2.0-flash`)
    /// - `GEMINI_BASE_URL`: API root (default Google endpoint)
    /// - `COVID_DATA_PATH`: CSV path (default `owid-covid-data.csv`)
    /// - `BIND_ADDR` / `PORT`: HTTP listener (default `127.0.0.1:8000`)
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let gemini_api_key = non_empty(API_KEY_VAR);
        if gemini_api_key.is_none() {
            log::warn!(
                "{} is not set; chat questions will be refused until it is configured",
                API_KEY_VAR
            );
        }

        Self {
            data_path: non_empty("COVID_DATA_PATH")
                .map_or_else(|| PathBuf::from(DEFAULT_DATA_PATH), PathBuf::from),
            gemini_api_key,
            gemini_model: non_empty("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            gemini_base_url: non_empty("GEMINI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            bind_addr: non_empty("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            port: non_empty("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
        }
    }

    pub fn api_key(&self) -> Result<&str> {
        self.gemini_api_key
            .as_deref()
            .ok_or(DashboardError::MissingConfiguration { key: API_KEY_VAR })
    }

    /// Warning text for front-ends when the chat key is absent.
    pub fn missing_key_warning(&self) -> Option<String> {
        self.api_key().err().map(|e| e.to_string())
    }
}
