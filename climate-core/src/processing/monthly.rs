use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::{
    error::{ClimateError, Result},
    model::{DailyRecord, MonthlyRecord, RawSample, YearMonth},
    processing::{daily::process_days, max, mean, min, round1, sum},
};

/// Aggregates the daily records of one calendar month.
///
/// Every day weighs the same regardless of how many samples produced it. When
/// the same date appears twice the first record wins.
pub fn process_month(location_name: &str, daily: &[DailyRecord]) -> Result<MonthlyRecord> {
    let first = daily.first().ok_or_else(|| {
        ClimateError::empty_input(format!("no daily records for '{location_name}'"))
    })?;
    let year_month = YearMonth::of(first.date);

    let mut days: BTreeMap<NaiveDate, &DailyRecord> = BTreeMap::new();
    for record in daily {
        let found = YearMonth::of(record.date);
        if found != year_month {
            return Err(ClimateError::MixedPeriod {
                expected: year_month.to_string(),
                found: found.to_string(),
            });
        }
        days.entry(record.date).or_insert(record);
    }

    let days: Vec<&DailyRecord> = days.into_values().collect();

    Ok(MonthlyRecord {
        year_month,
        location_name: location_name.to_string(),
        temperature_avg: mean(days.iter().filter_map(|d| d.temperature_avg)).map(round1),
        temperature_min: min(days.iter().filter_map(|d| d.temperature_min.or(d.temperature_avg))),
        temperature_max: max(days.iter().filter_map(|d| d.temperature_max.or(d.temperature_avg))),
        precipitation_total: sum(days.iter().filter_map(|d| d.precipitation_total)).map(round1),
        days_with_precipitation: days
            .iter()
            .filter(|d| d.precipitation_total.is_some_and(|p| p > 0.0))
            .count() as u32,
        humidity_avg: mean(days.iter().filter_map(|d| d.humidity_avg)).map(round1),
        source: first.source,
        days_counted: days.len() as u32,
    })
}

/// One record per month present in `daily`, ordered chronologically.
pub fn process_months(location_name: &str, daily: &[DailyRecord]) -> Result<Vec<MonthlyRecord>> {
    if daily.is_empty() {
        return Err(ClimateError::empty_input(format!("no daily records for '{location_name}'")));
    }

    let mut months: BTreeMap<YearMonth, Vec<DailyRecord>> = BTreeMap::new();
    for record in daily {
        months.entry(YearMonth::of(record.date)).or_default().push(record.clone());
    }

    months.values().map(|month| process_month(location_name, month)).collect()
}

/// Raw samples are reduced to days first, then to months.
pub fn process_month_from_raw(
    location_name: &str,
    raw: &[RawSample],
) -> Result<Vec<MonthlyRecord>> {
    let daily = process_days(location_name, raw)?;
    process_months(location_name, &daily)
}
