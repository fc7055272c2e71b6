use async_trait::async_trait;
use chrono::{DateTime, Days, FixedOffset, NaiveDate, Utc};
use serde::Deserialize;

use crate::{
    config::ProviderSettings,
    error::{ClimateError, Result},
    model::{Location, RawSample, Source, TemperatureUnit, VariableSet},
    provider::{ClimateProvider, http::ProviderHttp, validate_request},
};

/// Primary provider: OpenWeather `data/2.5` endpoints.
///
/// Temperatures are requested in the default (Kelvin) unit and converted here.
#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    http: ProviderHttp,
}

impl OpenWeatherProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        Ok(Self { http: ProviderHttp::new(Source::Primary, "appid", settings)? })
    }

    fn coords(location: &Location) -> Vec<(&'static str, String)> {
        vec![("lat", location.latitude.to_string()), ("lon", location.longitude.to_string())]
    }

    async fn fetch_forecast(
        &self,
        location: &Location,
        unit: TemperatureUnit,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawSample>> {
        let parsed: OwForecastResponse =
            self.http.get_json("forecast", &Self::coords(location)).await?;
        let samples = forecast_samples(parsed, unit, start, end);
        if samples.is_empty() {
            return Err(ClimateError::NoData {
                provider: Source::Primary,
                message: format!("forecast has no entries between {start} and {end}"),
            });
        }
        Ok(samples)
    }

    async fn fetch_history(
        &self,
        location: &Location,
        unit: TemperatureUnit,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawSample>> {
        let from = start
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();
        let until = end
            .checked_add_days(Days::new(1))
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(from)
            .min(Utc::now().timestamp());

        let mut query = Self::coords(location);
        query.push(("type", "hour".into()));
        query.push(("start", from.to_string()));
        query.push(("end", until.to_string()));

        let parsed: OwHistoryResponse = self.http.get_json("history/city", &query).await?;
        let samples = history_samples(parsed, unit);
        if samples.is_empty() {
            return Err(ClimateError::NoData {
                provider: Source::Primary,
                message: format!("no history between {start} and {end}"),
            });
        }
        Ok(samples)
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    #[serde(default)]
    temp_min: Option<f64>,
    #[serde(default)]
    temp_max: Option<f64>,
    #[serde(default)]
    humidity: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct OwRain {
    #[serde(rename = "1h", default)]
    one_hour: Option<f64>,
    #[serde(rename = "3h", default)]
    three_hours: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    dt: i64,
    /// Shift in seconds from UTC.
    #[serde(default)]
    timezone: i32,
    main: OwMain,
    #[serde(default)]
    rain: OwRain,
}

#[derive(Debug, Default, Deserialize)]
struct OwCity {
    #[serde(default)]
    timezone: i32,
}

#[derive(Debug, Deserialize)]
struct OwForecastEntry {
    dt: i64,
    main: OwMain,
    /// Probability of precipitation, 0..1.
    #[serde(default)]
    pop: Option<f64>,
    #[serde(default)]
    rain: OwRain,
}

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    #[serde(default)]
    city: OwCity,
    #[serde(default)]
    list: Vec<OwForecastEntry>,
}

#[derive(Debug, Deserialize)]
struct OwHistoryEntry {
    dt: i64,
    main: OwMain,
    #[serde(default)]
    rain: OwRain,
}

#[derive(Debug, Deserialize)]
struct OwHistoryResponse {
    #[serde(default)]
    list: Vec<OwHistoryEntry>,
}

fn local_time(ts: i64, offset_secs: i32) -> Option<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(offset_secs)?;
    DateTime::<Utc>::from_timestamp(ts, 0).map(|utc| utc.with_timezone(&offset))
}

fn current_sample(parsed: OwCurrentResponse, unit: TemperatureUnit) -> Result<RawSample> {
    let timestamp = local_time(parsed.dt, parsed.timezone).ok_or_else(|| {
        ClimateError::ProviderFormat {
            provider: Source::Primary,
            message: format!("invalid timestamp {} / offset {}", parsed.dt, parsed.timezone),
        }
    })?;

    // main.temp_min/temp_max on the current endpoint describe spatial spread, not a daily range.
    Ok(RawSample {
        timestamp,
        temperature: Some(unit.from_kelvin(parsed.main.temp)),
        temperature_min: None,
        temperature_max: None,
        precipitation_mm: Some(parsed.rain.one_hour.unwrap_or(0.0)),
        precipitation_probability: None,
        humidity: parsed.main.humidity,
        source: Source::Primary,
    })
}

fn forecast_samples(
    parsed: OwForecastResponse,
    unit: TemperatureUnit,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<RawSample> {
    let offset = parsed.city.timezone;
    parsed
        .list
        .into_iter()
        .filter_map(|entry| {
            let timestamp = local_time(entry.dt, offset)?;
            let day = timestamp.date_naive();
            (start <= day && day <= end).then(|| RawSample {
                timestamp,
                temperature: Some(unit.from_kelvin(entry.main.temp)),
                temperature_min: entry.main.temp_min.map(|t| unit.from_kelvin(t)),
                temperature_max: entry.main.temp_max.map(|t| unit.from_kelvin(t)),
                precipitation_mm: Some(entry.rain.three_hours.unwrap_or(0.0)),
                precipitation_probability: entry.pop.map(|p| p * 100.0),
                humidity: entry.main.humidity,
                source: Source::Primary,
            })
        })
        .collect()
}

fn history_samples(parsed: OwHistoryResponse, unit: TemperatureUnit) -> Vec<RawSample> {
    parsed
        .list
        .into_iter()
        .filter_map(|entry| {
            Some(RawSample {
                timestamp: local_time(entry.dt, 0)?,
                temperature: Some(unit.from_kelvin(entry.main.temp)),
                temperature_min: None,
                temperature_max: None,
                precipitation_mm: Some(entry.rain.one_hour.unwrap_or(0.0)),
                precipitation_probability: None,
                humidity: entry.main.humidity,
                source: Source::Primary,
            })
        })
        .collect()
}

#[async_trait]
impl ClimateProvider for OpenWeatherProvider {
    fn source(&self) -> Source {
        self.http.source()
    }

    async fn fetch_current(
        &self,
        location: &Location,
        variables: &VariableSet,
    ) -> Result<Vec<RawSample>> {
        validate_request(location, variables)?;

        let parsed: OwCurrentResponse =
            self.http.get_json("weather", &Self::coords(location)).await?;
        let sample = current_sample(parsed, variables.temperature_unit)?;

        Ok(vec![variables.retain(sample)])
    }

    async fn fetch_historical(
        &self,
        location: &Location,
        variables: &VariableSet,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawSample>> {
        validate_request(location, variables)?;
        if start > end {
            return Err(ClimateError::configuration(format!(
                "Start date {start} is after end date {end}"
            )));
        }

        let unit = variables.temperature_unit;
        let today = Utc::now().date_naive();
        let mut samples = Vec::new();

        // Past days come from the hourly history API, days after today from the 3-hourly forecast.
        if start <= today {
            samples.extend(self.fetch_history(location, unit, start, end.min(today)).await?);
        }
        if end > today {
            let from = start.max(today + Days::new(1));
            samples.extend(self.fetch_forecast(location, unit, from, end).await?);
        }

        Ok(samples.into_iter().map(|s| variables.retain(s)).collect())
    }
}
