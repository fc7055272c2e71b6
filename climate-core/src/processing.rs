//! Pure aggregation from provider samples to daily and monthly records.

pub mod daily;
pub mod monthly;

pub use daily::{group_by_day, process_day, process_days};
pub use monthly::{process_month, process_month_from_raw, process_months};

/// Rounds means and sums to one decimal place.
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.into_iter().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

pub(crate) fn sum(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    values.into_iter().fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

pub(crate) fn min(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    values.into_iter().reduce(f64::min)
}

pub(crate) fn max(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    values.into_iter().reduce(f64::max)
}
