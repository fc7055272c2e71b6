use std::collections::BTreeMap;

use chrono::{Days, Months, NaiveDate, Utc};
use futures::future::join_all;

use crate::{
    config::FrequencyConfig,
    error::{ClimateError, Result},
    model::{DailyRecord, Frequency, Location, MonthlyRecord, RawSample, Source, YearMonth},
    processing::{process_days, process_month_from_raw},
    source::{Query, SourceManager},
};

/// What a batch run asks every location for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectRequest {
    Current,
    Range { start: NaiveDate, end: NaiveDate },
    /// The last `years` years up to yesterday.
    History { years: u32 },
}

impl CollectRequest {
    /// The regular run for a frequency: the last `lookback_days` days for
    /// daily collection, month to date for monthly.
    pub fn scheduled(frequency: &FrequencyConfig, today: NaiveDate) -> Self {
        match frequency.kind {
            Frequency::Daily if frequency.lookback_days == 0 => CollectRequest::Current,
            Frequency::Daily => CollectRequest::Range {
                start: today
                    .checked_sub_days(Days::new(frequency.lookback_days.into()))
                    .unwrap_or(today),
                end: today,
            },
            Frequency::Monthly => {
                CollectRequest::Range { start: YearMonth::of(today).first_day(), end: today }
            }
        }
    }

    /// Resolves the request against `today`.
    pub fn query(&self, today: NaiveDate) -> Result<Query> {
        match *self {
            CollectRequest::Current => Ok(Query::Current),
            CollectRequest::Range { start, end } if start > end => Err(ClimateError::configuration(
                format!("Start date {start} is after end date {end}"),
            )),
            CollectRequest::Range { start, end } => Ok(Query::Range { start, end }),
            CollectRequest::History { years } => {
                if years == 0 {
                    return Err(ClimateError::configuration("History must span at least one year"));
                }
                let end = today.checked_sub_days(Days::new(1)).unwrap_or(today);
                let start = today
                    .checked_sub_months(Months::new(years.saturating_mul(12)))
                    .ok_or_else(|| {
                        ClimateError::configuration(format!(
                            "{years} years of history is out of range"
                        ))
                    })?;
                Ok(Query::Range { start, end })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationSamples {
    pub location: Location,
    pub source: Source,
    pub samples: Vec<RawSample>,
}

#[derive(Debug)]
pub struct LocationFailure {
    pub location: String,
    pub error: ClimateError,
}

/// Per-location outcome of one batch; a failed location never hides the others.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub successes: Vec<LocationSamples>,
    pub failures: Vec<LocationFailure>,
}

/// Records keyed by location name, plus the locations that could not be processed.
#[derive(Debug)]
pub struct Processed<R> {
    pub records: BTreeMap<String, Vec<R>>,
    pub failures: Vec<LocationFailure>,
}

impl<R> Processed<R> {
    pub fn record_count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }
}

impl BatchReport {
    pub fn all_failed(&self) -> bool {
        self.successes.is_empty() && !self.failures.is_empty()
    }

    pub fn into_daily(self) -> Processed<DailyRecord> {
        self.process(process_days)
    }

    pub fn into_monthly(self) -> Processed<MonthlyRecord> {
        self.process(process_month_from_raw)
    }

    fn process<R>(self, f: impl Fn(&str, &[RawSample]) -> Result<Vec<R>>) -> Processed<R> {
        let mut records = BTreeMap::new();
        let mut failures = self.failures;

        for success in self.successes {
            let name = success.location.name;
            match f(&name, &success.samples) {
                Ok(processed) => {
                    records.insert(name, processed);
                }
                Err(error) => {
                    tracing::error!(location = %name, %error, "failed to aggregate samples");
                    failures.push(LocationFailure { location: name, error });
                }
            }
        }

        Processed { records, failures }
    }
}

/// Fetches every location concurrently, each with its own retry state.
pub async fn collect(
    manager: &SourceManager,
    locations: &[Location],
    request: CollectRequest,
) -> Result<BatchReport> {
    let query = request.query(Utc::now().date_naive())?;
    tracing::info!(locations = locations.len(), ?query, mode = ?manager.mode(), "collecting");

    let outcomes = join_all(locations.iter().map(|location| async move {
        (location, manager.fetch(location, query).await)
    }))
    .await;

    let mut report = BatchReport::default();
    for (location, outcome) in outcomes {
        match outcome {
            Ok(fetched) => report.successes.push(LocationSamples {
                location: location.clone(),
                source: fetched.source,
                samples: fetched.samples,
            }),
            Err(error) => {
                tracing::error!(location = %location.name, %error, "location failed");
                report.failures.push(LocationFailure { location: location.name.clone(), error });
            }
        }
    }

    tracing::info!(
        succeeded = report.successes.len(),
        failed = report.failures.len(),
        "collection finished"
    );
    Ok(report)
}
