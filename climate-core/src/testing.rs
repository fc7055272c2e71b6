//! Scripted in-memory providers and sample builders shared by unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::{
    error::{ClimateError, Result},
    model::{Location, RawSample, Source, VariableSet},
    provider::{ClimateProvider, validate_request},
};

/// What a scripted provider does on one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Samples(usize),
    Empty,
    Transport,
    RateLimit,
    Auth,
    Format,
    NoData,
}

/// Replays `steps` in order; the last step repeats once the script runs out.
#[derive(Debug)]
pub struct ScriptedProvider {
    source: Source,
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(source: Source, steps: &[Step]) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Self {
            source,
            steps: Mutex::new(steps.iter().copied().collect()),
            last: Mutex::new(steps.last().copied().unwrap_or(Step::Empty)),
            calls: Arc::clone(&calls),
        };
        (provider, calls)
    }

    fn next(&self) -> Step {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.steps.lock().unwrap().pop_front();
        match next {
            Some(step) => {
                *self.last.lock().unwrap() = step;
                step
            }
            None => *self.last.lock().unwrap(),
        }
    }

    fn play(&self, location: &Location, variables: &VariableSet) -> Result<Vec<RawSample>> {
        validate_request(location, variables)?;
        let provider = self.source;
        match self.next() {
            Step::Samples(n) => Ok((0..n)
                .map(|i| sample(self.source, "2024-01-15T00:00:00+00:00", 20.0 + i as f64, 0.0))
                .collect()),
            Step::Empty => Ok(Vec::new()),
            Step::Transport => {
                Err(ClimateError::Transport { provider, message: "timed out".into() })
            }
            Step::RateLimit => Err(ClimateError::RateLimit { provider }),
            Step::Auth => Err(ClimateError::Authentication { provider, message: "401".into() }),
            Step::Format => {
                Err(ClimateError::ProviderFormat { provider, message: "bad json".into() })
            }
            Step::NoData => {
                Err(ClimateError::NoData { provider, message: "unsupported region".into() })
            }
        }
    }
}

#[async_trait]
impl ClimateProvider for ScriptedProvider {
    fn source(&self) -> Source {
        self.source
    }

    async fn fetch_current(
        &self,
        location: &Location,
        variables: &VariableSet,
    ) -> Result<Vec<RawSample>> {
        self.play(location, variables)
    }

    async fn fetch_historical(
        &self,
        location: &Location,
        variables: &VariableSet,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<RawSample>> {
        self.play(location, variables)
    }
}

pub fn sample(source: Source, timestamp: &str, temperature: f64, precipitation: f64) -> RawSample {
    RawSample {
        timestamp: DateTime::<FixedOffset>::parse_from_rfc3339(timestamp).unwrap(),
        temperature: Some(temperature),
        temperature_min: None,
        temperature_max: None,
        precipitation_mm: Some(precipitation),
        precipitation_probability: None,
        humidity: None,
        source,
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}
