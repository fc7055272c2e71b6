use crate::{
    Config,
    error::{ClimateError, Result},
    model::{Location, RawSample, Source, VariableSet},
    provider::{inmet::InmetProvider, openweather::OpenWeatherProvider},
};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt::Debug;

pub(crate) mod http;
pub mod inmet;
pub mod openweather;

/// Capability set shared by every weather data provider.
///
/// Implementations normalise units and tag each sample with their [`Source`];
/// they never retry, that is the source manager's job.
#[async_trait]
pub trait ClimateProvider: Send + Sync + Debug {
    fn source(&self) -> Source;

    /// Samples for "now" / today.
    async fn fetch_current(
        &self,
        location: &Location,
        variables: &VariableSet,
    ) -> Result<Vec<RawSample>>;

    /// Samples covering `start..=end`.
    async fn fetch_historical(
        &self,
        location: &Location,
        variables: &VariableSet,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawSample>>;
}

/// Input checks every client runs before touching the network.
pub fn validate_request(location: &Location, variables: &VariableSet) -> Result<()> {
    location.validate()?;
    variables.validate()
}

/// Construct a provider client from config.
pub fn provider_from_config(source: Source, config: &Config) -> Result<Box<dyn ClimateProvider>> {
    let settings = config.provider_settings(source).ok_or_else(|| {
        ClimateError::configuration(format!(
            "Provider '{}' is not configured.\n\
             Hint: run `climate configure {}` and enter your API key.",
            source.provider_key(),
            source.provider_key()
        ))
    })?;

    let boxed: Box<dyn ClimateProvider> = match source {
        Source::Primary => Box::new(OpenWeatherProvider::new(settings)?),
        Source::Secondary => Box::new(InmetProvider::new(settings)?),
    };

    Ok(boxed)
}
