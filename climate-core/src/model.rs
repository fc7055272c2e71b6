use std::{collections::BTreeSet, convert::TryFrom, fmt};

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{ClimateError, Result};

/// A configured place to collect observations for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self { name: name.into(), latitude, longitude }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ClimateError::configuration(format!(
                "Location '{}' has latitude {} outside [-90, 90]",
                self.name, self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ClimateError::configuration(format!(
                "Location '{}' has longitude {} outside [-180, 180]",
                self.name, self.longitude
            )));
        }
        Ok(())
    }
}

/// The provider a sample or record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Primary,
    Secondary,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Primary => "primary",
            Source::Secondary => "secondary",
        }
    }

    /// Key of the provider section in the configuration file.
    pub fn provider_key(&self) -> &'static str {
        match self {
            Source::Primary => "openweather",
            Source::Secondary => "inmet",
        }
    }

    pub const fn all() -> &'static [Source] {
        &[Source::Primary, Source::Secondary]
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Source {
    type Error = ClimateError;

    fn try_from(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "primary" | "openweather" => Ok(Source::Primary),
            "secondary" | "inmet" => Ok(Source::Secondary),
            _ => Err(ClimateError::configuration(format!(
                "Unknown provider '{value}'. Supported providers: openweather, inmet."
            ))),
        }
    }
}

/// Which provider(s) the source manager consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SourceMode {
    #[default]
    #[serde(rename = "primary")]
    PrimaryOnly,
    #[serde(rename = "secondary")]
    SecondaryOnly,
    #[serde(rename = "combined")]
    Combined,
}

impl SourceMode {
    /// Providers that must be configured for this mode.
    pub fn required_sources(&self) -> &'static [Source] {
        match self {
            SourceMode::PrimaryOnly => &[Source::Primary],
            SourceMode::SecondaryOnly => &[Source::Secondary],
            SourceMode::Combined => &[Source::Primary, Source::Secondary],
        }
    }
}

impl TryFrom<&str> for SourceMode {
    type Error = ClimateError;

    fn try_from(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "primary" => Ok(SourceMode::PrimaryOnly),
            "secondary" => Ok(SourceMode::SecondaryOnly),
            "combined" | "both" => Ok(SourceMode::Combined),
            _ => Err(ClimateError::configuration(format!(
                "Unknown source mode '{value}'. Expected primary, secondary or combined."
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Monthly => "monthly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn from_celsius(&self, celsius: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
        }
    }

    pub fn from_kelvin(&self, kelvin: f64) -> f64 {
        self.from_celsius(kelvin - 273.15)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variable {
    Temperature,
    Precipitation,
    Humidity,
}

/// Active climate variables plus the unit temperatures are reported in.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSet {
    variables: BTreeSet<Variable>,
    pub temperature_unit: TemperatureUnit,
}

impl VariableSet {
    pub fn new(
        variables: impl IntoIterator<Item = Variable>,
        temperature_unit: TemperatureUnit,
    ) -> Self {
        Self { variables: variables.into_iter().collect(), temperature_unit }
    }

    pub fn all(temperature_unit: TemperatureUnit) -> Self {
        Self::new(
            [Variable::Temperature, Variable::Precipitation, Variable::Humidity],
            temperature_unit,
        )
    }

    pub fn contains(&self, variable: Variable) -> bool {
        self.variables.contains(&variable)
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(ClimateError::configuration(
                "At least one climate variable must be active",
            ));
        }
        Ok(())
    }

    /// Drops the measurements of inactive variables from a sample.
    pub fn retain(&self, mut sample: RawSample) -> RawSample {
        if !self.contains(Variable::Temperature) {
            sample.temperature = None;
            sample.temperature_min = None;
            sample.temperature_max = None;
        }
        if !self.contains(Variable::Precipitation) {
            sample.precipitation_mm = None;
            sample.precipitation_probability = None;
        }
        if !self.contains(Variable::Humidity) {
            sample.humidity = None;
        }
        sample
    }
}

/// One provider observation, already converted to the configured units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Local time at the location when the provider reports an offset, UTC otherwise.
    pub timestamp: DateTime<FixedOffset>,
    pub temperature: Option<f64>,
    /// Present when the provider reports a range for the sample, as daily
    /// summaries and forecast windows do.
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub precipitation_mm: Option<f64>,
    /// Percent, 0-100.
    pub precipitation_probability: Option<f64>,
    /// Relative humidity in percent.
    pub humidity: Option<f64>,
    pub source: Source,
}

impl RawSample {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    pub fn is_summary(&self) -> bool {
        self.temperature_min.is_some() || self.temperature_max.is_some()
    }

    /// The instant reading together with any reported range bounds.
    pub fn reported_temperatures(&self) -> impl Iterator<Item = f64> {
        [self.temperature_min, self.temperature, self.temperature_max].into_iter().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub location_name: String,
    pub temperature_avg: Option<f64>,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub thermal_amplitude: Option<f64>,
    pub precipitation_total: Option<f64>,
    pub precipitation_probability: Option<f64>,
    pub humidity_avg: Option<f64>,
    pub source: Source,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    /// Monday = 0.
    pub weekday: u32,
}

/// Calendar month key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(ClimateError::configuration(format!("Invalid month {month}")));
        }
        Ok(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self { year: date.year(), month: date.month() }
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    pub fn days_in_month(&self) -> u32 {
        let (next_year, next_month) =
            if self.month == 12 { (self.year + 1, 1) } else { (self.year, self.month + 1) };
        NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .map(|next| (next - self.first_day()).num_days() as u32)
            .unwrap_or(31)
    }

    /// 1 = Jan-Mar ... 4 = Oct-Dec.
    pub fn quarter(&self) -> u32 {
        (self.month - 1) / 3 + 1
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let (year, month) = raw
            .split_once('-')
            .ok_or_else(|| serde::de::Error::custom(format!("expected YYYY-MM, got '{raw}'")))?;
        let year = year.parse().map_err(serde::de::Error::custom)?;
        let month = month.parse().map_err(serde::de::Error::custom)?;
        YearMonth::new(year, month).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyRecord {
    pub year_month: YearMonth,
    pub location_name: String,
    pub temperature_avg: Option<f64>,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub precipitation_total: Option<f64>,
    pub days_with_precipitation: u32,
    pub humidity_avg: Option<f64>,
    pub source: Source,
    pub days_counted: u32,
}

/// Southern-hemisphere season index:
/// 1 = summer (Dec-Feb), 2 = autumn, 3 = winter, 4 = spring.
pub fn season_of_month(month: u32) -> u32 {
    match month {
        12 | 1 | 2 => 1,
        3..=5 => 2,
        6..=8 => 3,
        _ => 4,
    }
}
