use std::{
    collections::BTreeMap,
    fmt,
    fs::{self, File},
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ClimateError, Result},
    model::{DailyRecord, MonthlyRecord},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::Parquet => "parquet",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = ClimateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            "parquet" => Ok(OutputFormat::Parquet),
            _ => Err(ClimateError::configuration(format!(
                "Unknown output format '{s}'. Expected csv, json or parquet."
            ))),
        }
    }
}

/// One file per location, or a single file holding every location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputLayout {
    #[default]
    #[serde(rename = "per_location")]
    PerLocation,
    #[serde(rename = "concatenated")]
    Concatenated,
}

impl FromStr for OutputLayout {
    type Err = ClimateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "per_location" | "separate" => Ok(OutputLayout::PerLocation),
            "concatenated" | "single" => Ok(OutputLayout::Concatenated),
            _ => Err(ClimateError::configuration(format!(
                "Unknown output layout '{s}'. Expected per_location or concatenated."
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportPolicy {
    pub format: OutputFormat,
    pub layout: OutputLayout,
    pub directory: PathBuf,
}

impl ExportPolicy {
    pub fn new(format: OutputFormat, layout: OutputLayout, directory: impl Into<PathBuf>) -> Self {
        Self { format, layout, directory: directory.into() }
    }

    fn path_for(&self, stem: &str, kind: &str) -> PathBuf {
        self.directory.join(format!("climate_{stem}_{kind}.{}", self.format.extension()))
    }
}

/// File-name friendly form of a location name: `"São Paulo"` becomes `"são_paulo"`.
pub fn location_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().to_lowercase().chars() {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

fn date_column(dates: impl Iterator<Item = NaiveDate>) -> Result<Column> {
    let epoch = NaiveDate::default();
    let days: Vec<i32> = dates.map(|d| (d - epoch).num_days() as i32).collect();
    Ok(Series::new("date".into(), days).cast(&DataType::Date)?.into_column())
}

/// Tabular view of daily records, one row per record.
pub fn daily_frame(records: &[DailyRecord]) -> Result<DataFrame> {
    let mut frame = df!(
        "location_name" => records.iter().map(|r| r.location_name.as_str()).collect::<Vec<_>>(),
        "temperature_avg" => records.iter().map(|r| r.temperature_avg).collect::<Vec<_>>(),
        "temperature_min" => records.iter().map(|r| r.temperature_min).collect::<Vec<_>>(),
        "temperature_max" => records.iter().map(|r| r.temperature_max).collect::<Vec<_>>(),
        "thermal_amplitude" => records.iter().map(|r| r.thermal_amplitude).collect::<Vec<_>>(),
        "precipitation_total" => records.iter().map(|r| r.precipitation_total).collect::<Vec<_>>(),
        "precipitation_probability" =>
            records.iter().map(|r| r.precipitation_probability).collect::<Vec<_>>(),
        "humidity_avg" => records.iter().map(|r| r.humidity_avg).collect::<Vec<_>>(),
        "source" => records.iter().map(|r| r.source.as_str()).collect::<Vec<_>>(),
        "year" => records.iter().map(|r| r.year).collect::<Vec<_>>(),
        "month" => records.iter().map(|r| r.month).collect::<Vec<_>>(),
        "day" => records.iter().map(|r| r.day).collect::<Vec<_>>(),
        "weekday" => records.iter().map(|r| r.weekday).collect::<Vec<_>>()
    )?;
    frame.insert_column(0, date_column(records.iter().map(|r| r.date))?)?;
    Ok(frame)
}

/// Tabular view of monthly records; `year_month` is written as `YYYY-MM`.
pub fn monthly_frame(records: &[MonthlyRecord]) -> Result<DataFrame> {
    Ok(df!(
        "year_month" => records.iter().map(|r| r.year_month.to_string()).collect::<Vec<_>>(),
        "location_name" => records.iter().map(|r| r.location_name.as_str()).collect::<Vec<_>>(),
        "temperature_avg" => records.iter().map(|r| r.temperature_avg).collect::<Vec<_>>(),
        "temperature_min" => records.iter().map(|r| r.temperature_min).collect::<Vec<_>>(),
        "temperature_max" => records.iter().map(|r| r.temperature_max).collect::<Vec<_>>(),
        "precipitation_total" => records.iter().map(|r| r.precipitation_total).collect::<Vec<_>>(),
        "days_with_precipitation" =>
            records.iter().map(|r| r.days_with_precipitation).collect::<Vec<_>>(),
        "humidity_avg" => records.iter().map(|r| r.humidity_avg).collect::<Vec<_>>(),
        "source" => records.iter().map(|r| r.source.as_str()).collect::<Vec<_>>(),
        "days_counted" => records.iter().map(|r| r.days_counted).collect::<Vec<_>>()
    )?)
}

fn write_frame(frame: &mut DataFrame, format: OutputFormat, path: &Path) -> Result<()> {
    let export_error = |message: String| ClimateError::Export { path: path.to_path_buf(), message };

    let file = File::create(path).map_err(|e| export_error(e.to_string()))?;
    let written = match format {
        OutputFormat::Csv => CsvWriter::new(file).include_header(true).finish(frame),
        OutputFormat::Json => {
            JsonWriter::new(file).with_json_format(JsonFormat::Json).finish(frame)
        }
        OutputFormat::Parquet => ParquetWriter::new(file).finish(frame).map(|_| ()),
    };
    written.map_err(|e| export_error(e.to_string()))?;

    tracing::info!(path = %path.display(), rows = frame.height(), "exported records");
    Ok(())
}

fn export_with<R>(
    policy: &ExportPolicy,
    kind: &str,
    by_location: &BTreeMap<String, Vec<R>>,
    to_frame: impl Fn(&[R]) -> Result<DataFrame>,
) -> Result<Vec<PathBuf>>
where
    R: Clone,
{
    if by_location.values().all(Vec::is_empty) {
        tracing::warn!(kind, "nothing to export");
        return Ok(Vec::new());
    }

    fs::create_dir_all(&policy.directory).map_err(|e| ClimateError::Export {
        path: policy.directory.clone(),
        message: e.to_string(),
    })?;

    let mut written = Vec::new();
    match policy.layout {
        OutputLayout::PerLocation => {
            for (location, records) in by_location.iter().filter(|(_, r)| !r.is_empty()) {
                let path = policy.path_for(&location_slug(location), kind);
                write_frame(&mut to_frame(records)?, policy.format, &path)?;
                written.push(path);
            }
        }
        OutputLayout::Concatenated => {
            let all: Vec<R> = by_location.values().flatten().cloned().collect();
            let path = policy.path_for("all_locations", kind);
            write_frame(&mut to_frame(&all)?, policy.format, &path)?;
            written.push(path);
        }
    }
    Ok(written)
}

/// Writes daily records keyed by location name; returns the files written.
pub fn export_daily(
    policy: &ExportPolicy,
    kind: &str,
    by_location: &BTreeMap<String, Vec<DailyRecord>>,
) -> Result<Vec<PathBuf>> {
    export_with(policy, kind, by_location, daily_frame)
}

pub fn export_monthly(
    policy: &ExportPolicy,
    kind: &str,
    by_location: &BTreeMap<String, Vec<MonthlyRecord>>,
) -> Result<Vec<PathBuf>> {
    export_with(policy, kind, by_location, monthly_frame)
}

/// Writes an arbitrary frame (for example an ML table) next to the record exports.
pub fn export_frame(
    policy: &ExportPolicy,
    stem: &str,
    kind: &str,
    frame: &mut DataFrame,
) -> Result<PathBuf> {
    fs::create_dir_all(&policy.directory)?;
    let path = policy.path_for(stem, kind);
    write_frame(frame, policy.format, &path)?;
    Ok(path)
}
