use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use haversine::{Location as GeoPoint, Units, distance};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::{
    config::ProviderSettings,
    error::{ClimateError, Result},
    model::{Location, RawSample, Source, TemperatureUnit, VariableSet},
    provider::{ClimateProvider, http::ProviderHttp, validate_request},
};

/// Largest date window requested from the station data endpoint at once.
const MAX_CHUNK_DAYS: u64 = 180;

/// Secondary provider: INMET automatic stations.
///
/// Observations come from the automatic station nearest to the requested
/// coordinates, one daily summary row per day.
#[derive(Debug, Clone)]
pub struct InmetProvider {
    http: ProviderHttp,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Station {
    pub code: String,
    pub name: String,
    pub distance_km: f64,
}

impl InmetProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        Ok(Self { http: ProviderHttp::new(Source::Secondary, "key", settings)? })
    }

    async fn nearest_station(&self, location: &Location) -> Result<Station> {
        let stations: Vec<InmetStation> = self.http.get_json("estacoes/T", &[]).await?;
        let station = nearest(location, &stations).ok_or_else(|| ClimateError::NoData {
            provider: Source::Secondary,
            message: format!("no station near '{}'", location.name),
        })?;

        tracing::debug!(
            station = %station.name,
            code = %station.code,
            distance_km = station.distance_km,
            "resolved nearest INMET station"
        );
        Ok(station)
    }

    async fn fetch_range(
        &self,
        station: &Station,
        unit: TemperatureUnit,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawSample>> {
        let path = format!(
            "estacao/dados/{}/{}/{}",
            station.code,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );

        let rows: Vec<InmetDailyRow> = match self.http.get_json(&path, &[]).await {
            Ok(rows) => rows,
            // A chunk without observations is not fatal when others have some.
            Err(ClimateError::NoData { .. }) => Vec::new(),
            Err(e) => return Err(e),
        };

        Ok(rows.into_iter().filter_map(|row| row_sample(row, unit)).collect())
    }
}

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct InmetStation {
    #[serde(default)]
    CD_ESTACAO: Option<String>,
    #[serde(default)]
    DC_NOME: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    VL_LATITUDE: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    VL_LONGITUDE: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct InmetDailyRow {
    #[serde(default)]
    DT_MEDICAO: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    TEM_INST: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    TEM_MAX: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    TEM_MIN: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    UMD_INST: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    CHUVA: Option<f64>,
}

/// INMET encodes numbers as JSON numbers, strings, empty strings or null.
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() || s.eq_ignore_ascii_case("null") {
                None
            } else {
                s.replace(',', ".").parse().ok()
            }
        }
        _ => None,
    })
}

fn nearest(location: &Location, stations: &[InmetStation]) -> Option<Station> {
    stations
        .iter()
        .filter_map(|s| {
            let code = s.CD_ESTACAO.clone()?;
            let origin = GeoPoint { latitude: location.latitude, longitude: location.longitude };
            let point = GeoPoint { latitude: s.VL_LATITUDE?, longitude: s.VL_LONGITUDE? };
            Some(Station {
                code,
                name: s.DC_NOME.clone().unwrap_or_default(),
                distance_km: distance(origin, point, Units::Kilometers),
            })
        })
        .min_by(|a, b| a.distance_km.total_cmp(&b.distance_km))
}

fn row_sample(row: InmetDailyRow, unit: TemperatureUnit) -> Option<RawSample> {
    let raw_date = row.DT_MEDICAO?;
    let date = match NaiveDate::parse_from_str(raw_date.trim(), "%Y-%m-%d") {
        Ok(date) => date,
        Err(e) => {
            tracing::warn!(date = %raw_date, error = %e, "skipping INMET row with invalid date");
            return None;
        }
    };

    let average = match (row.TEM_MAX, row.TEM_MIN) {
        (Some(max), Some(min)) => Some((max + min) / 2.0),
        _ => row.TEM_INST,
    };

    Some(RawSample {
        timestamp: date.and_hms_opt(0, 0, 0)?.and_utc().fixed_offset(),
        temperature: average.map(|t| unit.from_celsius(t)),
        temperature_min: row.TEM_MIN.map(|t| unit.from_celsius(t)),
        temperature_max: row.TEM_MAX.map(|t| unit.from_celsius(t)),
        precipitation_mm: Some(row.CHUVA.unwrap_or(0.0)),
        precipitation_probability: None,
        humidity: row.UMD_INST,
        source: Source::Secondary,
    })
}

/// Splits `[start, end]` into consecutive windows of at most `MAX_CHUNK_DAYS` days.
fn chunks(start: NaiveDate, end: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let mut out = Vec::new();
    let mut from = start;
    while from <= end {
        let to = from
            .checked_add_days(Days::new(MAX_CHUNK_DAYS - 1))
            .map_or(end, |d| d.min(end));
        out.push((from, to));
        match to.checked_add_days(Days::new(1)) {
            Some(next) => from = next,
            None => break,
        }
    }
    out
}

#[async_trait]
impl ClimateProvider for InmetProvider {
    fn source(&self) -> Source {
        self.http.source()
    }

    async fn fetch_current(
        &self,
        location: &Location,
        variables: &VariableSet,
    ) -> Result<Vec<RawSample>> {
        let today = Utc::now().date_naive();
        self.fetch_historical(location, variables, today, today).await
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

        let station = self.nearest_station(location).await?;

        let mut samples = Vec::new();
        for (from, to) in chunks(start, end) {
            let chunk = self.fetch_range(&station, variables.temperature_unit, from, to).await?;
            tracing::debug!(%from, %to, rows = chunk.len(), "fetched INMET window");
            samples.extend(chunk);
        }

        if samples.is_empty() {
            return Err(ClimateError::NoData {
                provider: Source::Secondary,
                message: format!(
                    "station {} has no observations between {start} and {end}",
                    station.code
                ),
            });
        }

        Ok(samples.into_iter().map(|s| variables.retain(s)).collect())
    }
}
