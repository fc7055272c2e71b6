use std::time::Duration;

use chrono::NaiveDate;

use crate::{
    Config,
    config::ProviderSettings,
    error::{ClimateError, Result},
    model::{Location, RawSample, Source, SourceMode, VariableSet},
    provider::{ClimateProvider, provider_from_config},
};

/// Upper bound for the wait between two attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait before the second attempt; doubles on each further attempt. Zero disables waiting.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts, backoff: Duration::ZERO }
    }

    fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl From<&ProviderSettings> for RetryPolicy {
    fn from(settings: &ProviderSettings) -> Self {
        Self { max_attempts: settings.max_attempts, backoff: settings.retry_backoff }
    }
}

/// What to ask the providers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Current,
    Range { start: NaiveDate, end: NaiveDate },
}

/// Per-request states of the source manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Querying(Source),
    Succeeded(Source),
    FailedOver,
    Exhausted,
}

/// Samples returned for one location, all from `source`.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub source: Source,
    pub samples: Vec<RawSample>,
}

#[derive(Debug)]
struct Slot {
    client: Box<dyn ClimateProvider>,
    policy: RetryPolicy,
}

/// How one provider's budget ended.
#[derive(Debug)]
struct SourceFailure {
    source: Source,
    attempts: u32,
    error: ClimateError,
}

impl SourceFailure {
    fn into_location_error(self, location: &Location) -> ClimateError {
        let location = location.name.clone();
        match self.error {
            ClimateError::Authentication { .. } | ClimateError::ProviderFormat { .. } => {
                ClimateError::SourceFailed {
                    location,
                    provider: self.source,
                    source: Box::new(self.error),
                }
            }
            error => ClimateError::SourceUnavailable {
                location,
                provider: self.source,
                attempts: self.attempts,
                source: Box::new(error),
            },
        }
    }
}

/// Chooses which provider answers a request and owns the retry policy.
///
/// `Combined` is fallback, not union: the secondary is only consulted after
/// the primary has failed, and never in parallel with it.
#[derive(Debug)]
pub struct SourceManager {
    mode: SourceMode,
    primary: Option<Slot>,
    secondary: Option<Slot>,
    variables: VariableSet,
}

impl SourceManager {
    pub fn new(
        mode: SourceMode,
        primary: Option<(Box<dyn ClimateProvider>, RetryPolicy)>,
        secondary: Option<(Box<dyn ClimateProvider>, RetryPolicy)>,
        variables: VariableSet,
    ) -> Result<Self> {
        variables.validate()?;
        let manager = Self {
            mode,
            primary: primary.map(|(client, policy)| Slot { client, policy }),
            secondary: secondary.map(|(client, policy)| Slot { client, policy }),
            variables,
        };

        for source in mode.required_sources() {
            if manager.slot(*source).is_none() {
                return Err(ClimateError::configuration(format!(
                    "Source mode {mode:?} needs the {source} provider"
                )));
            }
        }
        Ok(manager)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let variables = config.active_variables()?;
        let build = |source: Source| -> Result<Option<(Box<dyn ClimateProvider>, RetryPolicy)>> {
            if !config.general.source_mode.required_sources().contains(&source) {
                return Ok(None);
            }
            let client = provider_from_config(source, config)?;
            let policy = config
                .provider_settings(source)
                .map(|s| RetryPolicy::from(&s))
                .unwrap_or_else(|| RetryPolicy::immediate(1));
            Ok(Some((client, policy)))
        };

        Self::new(
            config.general.source_mode,
            build(Source::Primary)?,
            build(Source::Secondary)?,
            variables,
        )
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    pub fn variables(&self) -> &VariableSet {
        &self.variables
    }

    pub async fn fetch_current(&self, location: &Location) -> Result<Fetched> {
        self.fetch(location, Query::Current).await
    }

    pub async fn fetch_historical(
        &self,
        location: &Location,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Fetched> {
        self.fetch(location, Query::Range { start, end }).await
    }

    /// Runs one request for one location through the configured mode.
    pub async fn fetch(&self, location: &Location, query: Query) -> Result<Fetched> {
        let first = match self.mode {
            SourceMode::SecondaryOnly => Source::Secondary,
            SourceMode::PrimaryOnly | SourceMode::Combined => Source::Primary,
        };

        let mut state = QueryState::Querying(first);
        let mut samples = Vec::new();
        let mut failures: Vec<SourceFailure> = Vec::new();

        loop {
            tracing::debug!(location = %location.name, ?state, "source manager state");
            state = match state {
                QueryState::Querying(source) => match self
                    .query_source(source, location, query)
                    .await
                {
                    Ok(found) => {
                        samples = found;
                        QueryState::Succeeded(source)
                    }
                    Err(failure) if matches!(failure.error, ClimateError::Configuration { .. }) => {
                        return Err(failure.error);
                    }
                    Err(failure) => {
                        let can_fail_over =
                            self.mode == SourceMode::Combined && source == Source::Primary;
                        if can_fail_over {
                            tracing::warn!(
                                location = %location.name,
                                error = %failure.error,
                                "primary failed, falling back to secondary"
                            );
                        }
                        failures.push(failure);
                        if can_fail_over { QueryState::FailedOver } else { QueryState::Exhausted }
                    }
                },
                QueryState::FailedOver => QueryState::Querying(Source::Secondary),
                QueryState::Succeeded(source) => {
                    tracing::info!(
                        location = %location.name,
                        %source,
                        samples = samples.len(),
                        "fetched samples"
                    );
                    return Ok(Fetched { source, samples });
                }
                QueryState::Exhausted => return Err(Self::exhausted(location, failures)),
            };
        }
    }

    fn exhausted(location: &Location, mut failures: Vec<SourceFailure>) -> ClimateError {
        match (failures.pop(), failures.pop()) {
            (Some(secondary), Some(primary)) => ClimateError::AllSourcesFailed {
                location: location.name.clone(),
                primary: Box::new(primary.error),
                secondary: Box::new(secondary.error),
            },
            (Some(only), None) => only.into_location_error(location),
            _ => ClimateError::configuration(format!(
                "No source was queried for '{}'",
                location.name
            )),
        }
    }

    fn slot(&self, source: Source) -> Option<&Slot> {
        match source {
            Source::Primary => self.primary.as_ref(),
            Source::Secondary => self.secondary.as_ref(),
        }
    }

    /// Bounded retry loop against a single provider.
    async fn query_source(
        &self,
        source: Source,
        location: &Location,
        query: Query,
    ) -> Result<Vec<RawSample>, SourceFailure> {
        let Some(slot) = self.slot(source) else {
            return Err(SourceFailure {
                source,
                attempts: 0,
                error: ClimateError::configuration(format!("{source} provider is not configured")),
            });
        };

        let max_attempts = slot.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            tracing::debug!(
                location = %location.name,
                %source,
                attempt,
                max_attempts,
                "querying provider"
            );

            let result = match query {
                Query::Current => slot.client.fetch_current(location, &self.variables).await,
                Query::Range { start, end } => {
                    slot.client.fetch_historical(location, &self.variables, start, end).await
                }
            };

            let error = match result {
                Ok(samples) if !samples.is_empty() => return Ok(samples),
                Ok(_) => ClimateError::NoData {
                    provider: source,
                    message: format!("empty result set for '{}'", location.name),
                },
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= max_attempts {
                return Err(SourceFailure { source, attempts: attempt, error });
            }

            let delay = slot.policy.delay(attempt);
            tracing::warn!(
                location = %location.name,
                %source,
                attempt,
                max_attempts,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "transient provider failure, retrying"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::TemperatureUnit,
        testing::{ScriptedProvider, Step, date},
    };
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn recife() -> Location {
        Location::new("Recife", -8.05, -34.9)
    }

    fn vars() -> VariableSet {
        VariableSet::all(TemperatureUnit::Celsius)
    }

    type Scripted = (Box<dyn ClimateProvider>, RetryPolicy);

    fn primary_only(primary: Scripted) -> SourceManager {
        SourceManager::new(SourceMode::PrimaryOnly, Some(primary), None, vars()).unwrap()
    }

    fn combined(primary: Scripted, secondary: Scripted) -> SourceManager {
        SourceManager::new(SourceMode::Combined, Some(primary), Some(secondary), vars()).unwrap()
    }

    fn scripted(
        source: Source,
        steps: &[Step],
        attempts: u32,
    ) -> (Scripted, Arc<AtomicUsize>) {
        let (provider, calls) = ScriptedProvider::new(source, steps);
        ((Box::new(provider), RetryPolicy::immediate(attempts)), calls)
    }

    #[tokio::test]
    async fn primary_only_success_on_first_attempt() {
        let (primary, calls) = scripted(Source::Primary, &[Step::Samples(3)], 3);
        let manager = primary_only(primary);

        let fetched = manager.fetch_current(&recife()).await.unwrap();
        assert_eq!(fetched.source, Source::Primary);
        assert_eq!(fetched.samples.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_within_budget() {
        let (primary, calls) = scripted(
            Source::Primary,
            &[Step::Transport, Step::RateLimit, Step::Samples(1)],
            3,
        );
        let manager = primary_only(primary);

        let fetched = manager.fetch_current(&recife()).await.unwrap();
        assert_eq!(fetched.samples.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn primary_only_exhaustion_never_touches_secondary() {
        for n in 1..=4 {
            let (primary, primary_calls) = scripted(Source::Primary, &[Step::Transport], n);
            let (secondary, secondary_calls) = scripted(Source::Secondary, &[Step::Samples(1)], n);
            let manager = SourceManager::new(
                SourceMode::PrimaryOnly,
                Some(primary),
                Some(secondary),
                vars(),
            )
            .unwrap();

            let err = manager.fetch_current(&recife()).await.unwrap_err();
            match err {
                ClimateError::SourceUnavailable { location, provider, attempts, source } => {
                    assert_eq!(location, "Recife");
                    assert_eq!(provider, Source::Primary);
                    assert_eq!(attempts, n);
                    assert!(matches!(*source, ClimateError::Transport { .. }));
                }
                other => panic!("unexpected error: {other:?}"),
            }
            assert_eq!(primary_calls.load(Ordering::SeqCst), n as usize);
            assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        for step in [Step::Auth, Step::Format] {
            let (primary, calls) = scripted(Source::Primary, &[step, Step::Samples(1)], 5);
            let manager = primary_only(primary);

            let err = manager.fetch_current(&recife()).await.unwrap_err();
            assert!(matches!(err, ClimateError::SourceFailed { provider: Source::Primary, .. }));
            assert_eq!(err.location(), Some("Recife"));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn no_data_in_single_mode_is_source_unavailable() {
        let (secondary, calls) = scripted(Source::Secondary, &[Step::NoData], 3);
        let manager =
            SourceManager::new(SourceMode::SecondaryOnly, None, Some(secondary), vars()).unwrap();

        let err = manager.fetch_current(&recife()).await.unwrap_err();
        assert!(matches!(
            err,
            ClimateError::SourceUnavailable { provider: Source::Secondary, attempts: 1, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_result_counts_as_no_data() {
        let (primary, _) = scripted(Source::Primary, &[Step::Empty], 2);
        let manager = primary_only(primary);

        let err = manager.fetch_current(&recife()).await.unwrap_err();
        match err {
            ClimateError::SourceUnavailable { source, .. } => {
                assert!(matches!(*source, ClimateError::NoData { .. }))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn combined_fails_over_when_primary_exhausts() {
        let (primary, primary_calls) = scripted(Source::Primary, &[Step::Transport], 2);
        let (secondary, secondary_calls) = scripted(Source::Secondary, &[Step::Samples(2)], 2);
        let manager = combined(primary, secondary);

        let fetched = manager
            .fetch_historical(&recife(), date(2024, 1, 1), date(2024, 1, 31))
            .await
            .unwrap();
        assert_eq!(fetched.source, Source::Secondary);
        assert!(fetched.samples.iter().all(|s| s.source == Source::Secondary));
        assert_eq!(primary_calls.load(Ordering::SeqCst), 2);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn combined_authentication_failure_falls_back_immediately() {
        let (primary, primary_calls) = scripted(Source::Primary, &[Step::Auth], 3);
        let (secondary, _) = scripted(Source::Secondary, &[Step::Samples(1)], 3);
        let manager = combined(primary, secondary);

        let fetched = manager.fetch_current(&recife()).await.unwrap();
        assert_eq!(fetched.source, Source::Secondary);
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn combined_no_data_triggers_fallback() {
        let (primary, _) = scripted(Source::Primary, &[Step::NoData], 3);
        let (secondary, _) = scripted(Source::Secondary, &[Step::Samples(1)], 3);
        let manager = combined(primary, secondary);

        assert_eq!(manager.fetch_current(&recife()).await.unwrap().source, Source::Secondary);
    }

    #[tokio::test]
    async fn combined_primary_success_skips_secondary() {
        let (primary, _) = scripted(Source::Primary, &[Step::Samples(2)], 3);
        let (secondary, secondary_calls) = scripted(Source::Secondary, &[Step::Samples(1)], 3);
        let manager = combined(primary, secondary);

        let fetched = manager.fetch_current(&recife()).await.unwrap();
        assert_eq!(fetched.source, Source::Primary);
        assert_eq!(fetched.samples.len(), 2);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn combined_both_failing_carries_both_errors() {
        let (primary, _) = scripted(Source::Primary, &[Step::RateLimit], 2);
        let (secondary, secondary_calls) = scripted(Source::Secondary, &[Step::Transport], 3);
        let manager = combined(primary, secondary);

        let err = manager.fetch_current(&recife()).await.unwrap_err();
        match err {
            ClimateError::AllSourcesFailed { location, primary, secondary } => {
                assert_eq!(location, "Recife");
                assert!(matches!(*primary, ClimateError::RateLimit { .. }));
                assert!(matches!(*secondary, ClimateError::Transport { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalid_location_is_not_failed_over() {
        let (primary, _) = scripted(Source::Primary, &[Step::Samples(1)], 3);
        let (secondary, secondary_calls) = scripted(Source::Secondary, &[Step::Samples(1)], 3);
        let manager = combined(primary, secondary);

        let err = manager.fetch_current(&Location::new("bad", 95.0, 0.0)).await.unwrap_err();
        assert!(matches!(err, ClimateError::Configuration { .. }));
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn construction_checks_mode_requirements() {
        let (primary, _) = scripted(Source::Primary, &[Step::Samples(1)], 1);
        let err =
            SourceManager::new(SourceMode::Combined, Some(primary), None, vars()).unwrap_err();
        assert!(err.to_string().contains("secondary"));

        let (primary, _) = scripted(Source::Primary, &[Step::Samples(1)], 1);
        let empty = VariableSet::new([], TemperatureUnit::Celsius);
        assert!(SourceManager::new(SourceMode::PrimaryOnly, Some(primary), None, empty).is_err());
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let policy = RetryPolicy { max_attempts: 10, backoff: Duration::from_millis(500) };
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
        assert_eq!(policy.delay(3), Duration::from_millis(2000));
        assert_eq!(policy.delay(10), MAX_BACKOFF);
        assert_eq!(RetryPolicy::immediate(3).delay(5), Duration::ZERO);
    }

    #[test]
    fn from_config_builds_only_required_clients() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(Source::Secondary, "KEY".into());
        cfg.general.source_mode = SourceMode::SecondaryOnly;

        let manager = SourceManager::from_config(&cfg).unwrap();
        assert_eq!(manager.mode(), SourceMode::SecondaryOnly);
        assert!(manager.primary.is_none());
        assert!(manager.secondary.is_some());

        cfg.general.source_mode = SourceMode::Combined;
        assert!(SourceManager::from_config(&cfg).is_err());
    }
}
