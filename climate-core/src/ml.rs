//! Feature tables for downstream model training.
//!
//! This is column selection and reshaping only: records become a
//! [`DataFrame`] with a fixed feature set and `precipitation_total` as the
//! candidate target. Rows are sorted by location and period, and feature gaps
//! are forward-filled, then back-filled, within each location. The target is
//! never filled.

use chrono::Datelike;
use polars::prelude::*;

use crate::{
    error::Result,
    export::{daily_frame, monthly_frame},
    model::{DailyRecord, MonthlyRecord, season_of_month},
};

pub const TARGET: &str = "precipitation_total";

pub const DAILY_FEATURES: &[&str] = &[
    "temperature_avg",
    "temperature_min",
    "temperature_max",
    "thermal_amplitude",
    "humidity_avg",
    "year",
    "month",
    "day",
    "weekday",
    "season",
    "quarter",
];

pub const MONTHLY_FEATURES: &[&str] = &[
    "temperature_avg",
    "temperature_min",
    "temperature_max",
    "humidity_avg",
    "days_counted",
    "year",
    "month",
    "season",
    "quarter",
];

#[derive(Debug, Clone)]
pub struct MlTable {
    /// Key columns, then `features`, then `target`.
    pub frame: DataFrame,
    pub features: Vec<String>,
    pub target: String,
}

impl MlTable {
    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// `runs` are the lengths of the consecutive per-location row groups.
    fn build(frame: DataFrame, keys: &[&str], features: &[&str], runs: &[usize]) -> Result<Self> {
        let filled_columns: Vec<&str> = keys.iter().chain(features).copied().collect();

        let mut filled: Option<DataFrame> = None;
        let mut offset = 0;
        for &len in runs {
            let group = frame
                .slice(offset as i64, len)
                .select(filled_columns.iter().copied())?
                .fill_null(FillNullStrategy::Forward(None))?
                .fill_null(FillNullStrategy::Backward(None))?;
            match filled.as_mut() {
                Some(table) => {
                    table.vstack_mut(&group)?;
                }
                None => filled = Some(group),
            }
            offset += len;
        }

        let mut table = match filled {
            Some(table) => table,
            None => frame.select(filled_columns.iter().copied())?,
        };
        table.with_column(frame.column(TARGET)?.clone())?;

        Ok(Self {
            frame: table,
            features: features.iter().map(|f| f.to_string()).collect(),
            target: TARGET.to_string(),
        })
    }
}

fn location_runs<R>(sorted: &[R], location: impl Fn(&R) -> &str) -> Vec<usize> {
    sorted.chunk_by(|a, b| location(a) == location(b)).map(<[R]>::len).collect()
}

pub fn prepare_daily_for_ml(records: &[DailyRecord]) -> Result<MlTable> {
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| (&a.location_name, a.date).cmp(&(&b.location_name, b.date)));

    let mut frame = daily_frame(&sorted)?;
    frame.with_column(Series::new(
        "season".into(),
        sorted.iter().map(|r| season_of_month(r.date.month())).collect::<Vec<_>>(),
    ))?;
    frame.with_column(Series::new(
        "quarter".into(),
        sorted.iter().map(|r| (r.date.month() - 1) / 3 + 1).collect::<Vec<_>>(),
    ))?;

    let runs = location_runs(&sorted, |r| r.location_name.as_str());
    MlTable::build(frame, &["location_name", "date"], DAILY_FEATURES, &runs)
}

pub fn prepare_monthly_for_ml(records: &[MonthlyRecord]) -> Result<MlTable> {
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| (&a.location_name, a.year_month).cmp(&(&b.location_name, b.year_month)));

    let mut frame = monthly_frame(&sorted)?;
    frame.with_column(Series::new(
        "year".into(),
        sorted.iter().map(|r| r.year_month.year).collect::<Vec<_>>(),
    ))?;
    frame.with_column(Series::new(
        "month".into(),
        sorted.iter().map(|r| r.year_month.month).collect::<Vec<_>>(),
    ))?;
    frame.with_column(Series::new(
        "season".into(),
        sorted.iter().map(|r| season_of_month(r.year_month.month)).collect::<Vec<_>>(),
    ))?;
    frame.with_column(Series::new(
        "quarter".into(),
        sorted.iter().map(|r| r.year_month.quarter()).collect::<Vec<_>>(),
    ))?;

    let runs = location_runs(&sorted, |r| r.location_name.as_str());
    MlTable::build(frame, &["location_name", "year_month"], MONTHLY_FEATURES, &runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::Source,
        processing::{process_days, process_months},
        testing::sample,
    };

    fn records() -> Vec<DailyRecord> {
        let mut samples = vec![
            sample(Source::Primary, "2024-12-31T12:00:00+00:00", 30.0, 2.0),
            sample(Source::Primary, "2025-01-01T12:00:00+00:00", 28.0, 0.0),
            sample(Source::Primary, "2025-01-02T12:00:00+00:00", 26.0, 4.0),
        ];
        samples[1].humidity = Some(80.0);
        process_days("Recife", &samples).unwrap()
    }

    #[test]
    fn daily_table_selects_features_and_target() {
        let table = prepare_daily_for_ml(&records()).unwrap();

        assert_eq!(table.height(), 3);
        assert_eq!(table.target, "precipitation_total");
        assert_eq!(table.features.len(), DAILY_FEATURES.len());

        let names: Vec<String> =
            table.frame.get_column_names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names.first().map(String::as_str), Some("location_name"));
        assert_eq!(names.last().map(String::as_str), Some("precipitation_total"));
        assert!(!names.contains(&"source".to_string()));
        assert!(!names.contains(&"precipitation_probability".to_string()));
    }

    #[test]
    fn calendar_columns_are_derived() {
        let table = prepare_daily_for_ml(&records()).unwrap();

        let season = table.frame.column("season").unwrap().u32().unwrap();
        assert_eq!(season.get(0), Some(1));
        let quarter = table.frame.column("quarter").unwrap().u32().unwrap();
        assert_eq!(quarter.get(0), Some(4));
        assert_eq!(quarter.get(1), Some(1));
    }

    #[test]
    fn gaps_are_forward_then_backward_filled() {
        let table = prepare_daily_for_ml(&records()).unwrap();

        let humidity = table.frame.column("humidity_avg").unwrap().f64().unwrap();
        assert_eq!(humidity.null_count(), 0);
        // Row 0 has no earlier value, so it takes the next one.
        assert_eq!(humidity.get(0), Some(80.0));
        assert_eq!(humidity.get(2), Some(80.0));
    }

    #[test]
    fn gaps_never_cross_locations_and_target_is_left_alone() {
        let mut aracaju = vec![
            sample(Source::Primary, "2024-05-01T12:00:00+00:00", 27.0, 1.0),
            sample(Source::Primary, "2024-05-02T12:00:00+00:00", 28.0, 0.0),
        ];
        for s in &mut aracaju {
            s.humidity = Some(99.0);
        }
        let mut belem = vec![
            sample(Source::Primary, "2024-05-01T12:00:00+00:00", 31.0, 12.0),
            sample(Source::Primary, "2024-05-02T12:00:00+00:00", 30.0, 0.0),
        ];
        belem[1].precipitation_mm = None;

        let mut daily = process_days("Belem", &belem).unwrap();
        daily.extend(process_days("Aracaju", &aracaju).unwrap());
        let table = prepare_daily_for_ml(&daily).unwrap();

        let names = table.frame.column("location_name").unwrap().str().unwrap();
        assert_eq!(names.get(0), Some("Aracaju"));
        assert_eq!(names.get(2), Some("Belem"));

        let humidity = table.frame.column("humidity_avg").unwrap().f64().unwrap();
        assert_eq!(humidity.get(1), Some(99.0));
        assert_eq!(humidity.get(2), None);
        assert_eq!(humidity.get(3), None);

        let target = table.frame.column(TARGET).unwrap().f64().unwrap();
        assert_eq!(target.get(2), Some(12.0));
        assert_eq!(target.get(3), None);
    }

    #[test]
    fn monthly_table() {
        let monthly = process_months("Recife", &records()).unwrap();
        let table = prepare_monthly_for_ml(&monthly).unwrap();

        assert_eq!(table.height(), 2);
        assert_eq!(
            table.features,
            MONTHLY_FEATURES.iter().map(|f| f.to_string()).collect::<Vec<_>>()
        );
        let year = table.frame.column("year").unwrap().i32().unwrap();
        assert_eq!(year.get(0), Some(2024));
        assert_eq!(year.get(1), Some(2025));
        let target = table.frame.column("precipitation_total").unwrap().f64().unwrap();
        assert_eq!(target.get(1), Some(4.0));
    }

    #[test]
    fn empty_input_gives_empty_table() {
        let table = prepare_daily_for_ml(&[]).unwrap();
        assert!(table.is_empty());
        assert!(prepare_monthly_for_ml(&[]).unwrap().is_empty());
    }
}
