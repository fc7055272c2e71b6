use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};

use crate::{
    error::{ClimateError, Result},
    model::{DailyRecord, RawSample},
    processing::{max, mean, min, round1, sum},
};

/// Aggregates the samples of one location and one day into a [`DailyRecord`].
///
/// The day is taken from the first sample; samples from any other day are
/// rejected with [`ClimateError::MixedPeriod`]. Extrema span every reported
/// temperature, so a lone summary sample keeps its own min/max, and a reading
/// outside its reported range widens it.
pub fn process_day(location_name: &str, samples: &[RawSample]) -> Result<DailyRecord> {
    let first = samples
        .first()
        .ok_or_else(|| ClimateError::empty_input(format!("no samples for '{location_name}'")))?;
    let date = first.date();

    if let Some(stray) = samples.iter().find(|s| s.date() != date) {
        return Err(ClimateError::MixedPeriod {
            expected: date.to_string(),
            found: stray.date().to_string(),
        });
    }

    let temperature_min = min(samples.iter().flat_map(RawSample::reported_temperatures));
    let temperature_max = max(samples.iter().flat_map(RawSample::reported_temperatures));
    let thermal_amplitude = match (temperature_min, temperature_max) {
        (Some(lo), Some(hi)) => Some(hi - lo),
        _ => None,
    };

    Ok(DailyRecord {
        date,
        location_name: location_name.to_string(),
        temperature_avg: mean(samples.iter().filter_map(|s| s.temperature)).map(round1),
        temperature_min,
        temperature_max,
        thermal_amplitude,
        precipitation_total: sum(samples.iter().filter_map(|s| s.precipitation_mm)).map(round1),
        precipitation_probability: max(samples.iter().filter_map(|s| s.precipitation_probability)),
        humidity_avg: mean(samples.iter().filter_map(|s| s.humidity)).map(round1),
        source: first.source,
        year: date.year(),
        month: date.month(),
        day: date.day(),
        weekday: date.weekday().num_days_from_monday(),
    })
}

/// Buckets samples by calendar day, preserving their order within each day.
pub fn group_by_day(samples: &[RawSample]) -> BTreeMap<NaiveDate, Vec<RawSample>> {
    let mut days: BTreeMap<NaiveDate, Vec<RawSample>> = BTreeMap::new();
    for sample in samples {
        days.entry(sample.date()).or_default().push(sample.clone());
    }
    days
}

/// One record per day present in `samples`, ordered by date.
pub fn process_days(location_name: &str, samples: &[RawSample]) -> Result<Vec<DailyRecord>> {
    if samples.is_empty() {
        return Err(ClimateError::empty_input(format!("no samples for '{location_name}'")));
    }

    let records = group_by_day(samples)
        .values()
        .map(|day| process_day(location_name, day))
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(
        location = location_name,
        samples = samples.len(),
        days = records.len(),
        "aggregated daily records"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::Source,
        testing::{date, sample},
    };

    fn scenario() -> Vec<RawSample> {
        vec![
            sample(Source::Primary, "2024-01-15T06:00:00-03:00", 20.0, 0.0),
            sample(Source::Primary, "2024-01-15T12:00:00-03:00", 25.0, 0.0),
            sample(Source::Primary, "2024-01-15T18:00:00-03:00", 22.0, 5.0),
        ]
    }

    #[test]
    fn intraday_samples_are_aggregated() {
        let record = process_day("Recife", &scenario()).unwrap();

        assert_eq!(record.date, date(2024, 1, 15));
        assert_eq!(record.location_name, "Recife");
        assert_eq!(record.temperature_avg, Some(22.3));
        assert_eq!(record.temperature_min, Some(20.0));
        assert_eq!(record.temperature_max, Some(25.0));
        assert_eq!(record.thermal_amplitude, Some(5.0));
        assert_eq!(record.precipitation_total, Some(5.0));
        assert_eq!(record.source, Source::Primary);
        assert_eq!((record.year, record.month, record.day), (2024, 1, 15));
        // 2024-01-15 is a Monday.
        assert_eq!(record.weekday, 0);
    }

    #[test]
    fn reprocessing_is_identical() {
        let samples = scenario();
        assert_eq!(
            process_day("Recife", &samples).unwrap(),
            process_day("Recife", &samples).unwrap()
        );
    }

    #[test]
    fn empty_input_never_yields_a_record() {
        assert!(matches!(process_day("Recife", &[]), Err(ClimateError::EmptyInput { .. })));
        assert!(matches!(process_days("Recife", &[]), Err(ClimateError::EmptyInput { .. })));
    }

    #[test]
    fn single_summary_sample_passes_through() {
        let mut summary = sample(Source::Secondary, "2024-01-16T00:00:00+00:00", 24.0, 3.5);
        summary.temperature_min = Some(19.0);
        summary.temperature_max = Some(29.0);
        summary.humidity = Some(71.0);

        let record = process_day("São Paulo", &[summary]).unwrap();
        assert_eq!(record.temperature_avg, Some(24.0));
        assert_eq!(record.temperature_min, Some(19.0));
        assert_eq!(record.temperature_max, Some(29.0));
        assert_eq!(record.thermal_amplitude, Some(10.0));
        assert_eq!(record.humidity_avg, Some(71.0));
        assert_eq!(record.source, Source::Secondary);
    }

    #[test]
    fn forecast_windows_widen_extrema_and_keep_worst_probability() {
        let mut a = sample(Source::Primary, "2024-02-01T09:00:00+00:00", 21.0, 0.0);
        a.temperature_min = Some(18.5);
        a.precipitation_probability = Some(20.0);
        let mut b = sample(Source::Primary, "2024-02-01T15:00:00+00:00", 27.0, 1.2);
        b.temperature_max = Some(28.4);
        b.precipitation_probability = Some(80.0);
        b.humidity = Some(60.0);

        let record = process_day("Natal", &[a, b]).unwrap();
        assert_eq!(record.temperature_avg, Some(24.0));
        assert_eq!(record.temperature_min, Some(18.5));
        assert_eq!(record.temperature_max, Some(28.4));
        assert_eq!(record.precipitation_probability, Some(80.0));
        assert_eq!(record.humidity_avg, Some(60.0));
    }

    #[test]
    fn amplitude_is_never_negative() {
        let days = [
            scenario(),
            vec![sample(Source::Primary, "2024-01-20T10:00:00+00:00", -3.0, 0.0)],
        ];
        for day in days {
            let record = process_day("x", &day).unwrap();
            let amplitude = record.thermal_amplitude.unwrap();
            assert!(amplitude >= 0.0);
            assert_eq!(
                amplitude,
                record.temperature_max.unwrap() - record.temperature_min.unwrap()
            );
        }
    }

    #[test]
    fn reading_outside_reported_range_widens_extrema() {
        // INMET row with TEM_MAX missing and TEM_INST below TEM_MIN.
        let mut row = sample(Source::Secondary, "2024-01-17T00:00:00+00:00", 18.0, 0.0);
        row.temperature_min = Some(19.0);

        let record = process_day("Aracaju", &[row.clone()]).unwrap();
        assert_eq!(record.temperature_min, Some(18.0));
        assert_eq!(record.temperature_max, Some(19.0));
        assert_eq!(record.thermal_amplitude, Some(1.0));

        // Provider range reported upside down.
        row.temperature = None;
        row.temperature_min = Some(25.0);
        row.temperature_max = Some(21.0);
        let record = process_day("Aracaju", &[row]).unwrap();
        assert_eq!(record.temperature_min, Some(21.0));
        assert_eq!(record.temperature_max, Some(25.0));
        assert_eq!(record.thermal_amplitude, Some(4.0));
        assert_eq!(record.temperature_avg, None);
    }

    #[test]
    fn inactive_variables_stay_empty() {
        let mut only_temp = sample(Source::Primary, "2024-01-15T10:00:00+00:00", 20.0, 0.0);
        only_temp.precipitation_mm = None;

        let record = process_day("x", &[only_temp]).unwrap();
        assert_eq!(record.precipitation_total, None);
        assert_eq!(record.precipitation_probability, None);
        assert_eq!(record.humidity_avg, None);
    }

    #[test]
    fn samples_from_another_day_are_rejected() {
        let mut samples = scenario();
        samples.push(sample(Source::Primary, "2024-01-16T00:30:00-03:00", 21.0, 0.0));

        let err = process_day("Recife", &samples).unwrap_err();
        assert!(matches!(err, ClimateError::MixedPeriod { .. }));
    }

    #[test]
    fn local_offset_decides_the_day() {
        // 01:00 UTC on the 16th is still the 15th in Recife.
        let late = sample(Source::Primary, "2024-01-15T22:00:00-03:00", 23.0, 0.0);
        let mut samples = scenario();
        samples.push(late);

        let records = process_days("Recife", &samples).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date, date(2024, 1, 15));
    }

    #[test]
    fn process_days_orders_by_date() {
        let samples = vec![
            sample(Source::Primary, "2024-03-02T12:00:00+00:00", 26.0, 0.0),
            sample(Source::Primary, "2024-03-01T12:00:00+00:00", 24.0, 2.0),
            sample(Source::Primary, "2024-03-02T15:00:00+00:00", 28.0, 1.0),
        ];

        let grouped = group_by_day(&samples);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&date(2024, 3, 2)].len(), 2);

        let records = process_days("Maceió", &samples).unwrap();
        assert_eq!(
            records.iter().map(|r| r.date).collect::<Vec<_>>(),
            vec![date(2024, 3, 1), date(2024, 3, 2)]
        );
        assert_eq!(records[1].temperature_avg, Some(27.0));
        assert_eq!(records[1].precipitation_total, Some(1.0));
    }
}
