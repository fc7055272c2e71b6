//! Core library for the `climate` CLI.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Provider clients for OpenWeather (primary) and INMET (secondary)
//! - The source manager that retries and falls back between them
//! - Daily and monthly aggregation, ML tables and file export
//!
//! It is used by `climate-cli`, but the pipeline can also be driven directly.

pub mod config;
pub mod error;
pub mod export;
pub mod ml;
pub mod model;
pub mod pipeline;
pub mod processing;
pub mod provider;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Config, ConfigOverrides, ProviderConfig};
pub use error::{ClimateError, Result};
pub use export::{ExportPolicy, OutputFormat, OutputLayout};
pub use model::{
    DailyRecord, Frequency, Location, MonthlyRecord, RawSample, Source, SourceMode,
    TemperatureUnit, Variable, VariableSet, YearMonth,
};
pub use pipeline::{BatchReport, CollectRequest, collect};
pub use provider::ClimateProvider;
pub use source::{Fetched, SourceManager};
