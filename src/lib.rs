//! COVID-19 data dashboard core.
//!
//! Loads an Our-World-in-Data style CSV, derives headline metrics, daily
//! trends and per-capita world rankings, fits a per-country additive
//! forecasting model with three regressors, and answers questions about
//! the data through a hosted language model.

pub mod cache;
pub mod chat;
pub mod config;
pub mod error;
pub mod forecast;
pub mod loader;
pub mod metrics;
pub mod model;
pub mod output;
pub mod server;
pub mod trends;
pub mod types;
pub mod util;

pub use error::{DashboardError, Result};
