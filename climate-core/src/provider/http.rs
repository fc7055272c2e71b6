use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::{
    config::ProviderSettings,
    error::{ClimateError, Result},
    model::Source,
};

/// Thin reqwest wrapper shared by both clients: one GET, classified failures, no retries.
#[derive(Debug, Clone)]
pub(crate) struct ProviderHttp {
    source: Source,
    key_param: &'static str,
    settings: ProviderSettings,
    http: Client,
}

impl ProviderHttp {
    pub(crate) fn new(
        source: Source,
        key_param: &'static str,
        settings: ProviderSettings,
    ) -> Result<Self> {
        let http = Client::builder().timeout(settings.timeout).build().map_err(|e| {
            ClimateError::configuration(format!("Failed to build HTTP client for {source}: {e}"))
        })?;

        Ok(Self { source, key_param, settings, http })
    }

    pub(crate) fn source(&self) -> Source {
        self.source
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url, path.trim_start_matches('/'))
    }

    /// GET `{base_url}/{path}` with the API key appended and decode the JSON body.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        if self.settings.api_key.is_empty() {
            return Err(ClimateError::Authentication {
                provider: self.source,
                message: "no API key configured".into(),
            });
        }

        let url = self.url(path);
        tracing::debug!(provider = %self.source, %url, "sending request");

        let res = self
            .http
            .get(&url)
            .query(query)
            .query(&[(self.key_param, self.settings.api_key.as_str())])
            .send()
            .await
            .map_err(|e| transport_error(self.source, &e))?;

        let status = res.status();
        let body = res.text().await.map_err(|e| transport_error(self.source, &e))?;

        if !status.is_success() {
            return Err(status_error(self.source, status, &body));
        }

        decode_body(self.source, &body)
    }
}

pub(crate) fn decode_body<T: DeserializeOwned>(source: Source, body: &str) -> Result<T> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Err(ClimateError::NoData {
            provider: source,
            message: "empty response body".into(),
        });
    }

    serde_json::from_str(trimmed).map_err(|e| ClimateError::ProviderFormat {
        provider: source,
        message: format!("{e}: {}", truncate_body(trimmed)),
    })
}

pub(crate) fn status_error(source: Source, status: StatusCode, body: &str) -> ClimateError {
    let message = format!("status {}: {}", status, truncate_body(body));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ClimateError::Authentication { provider: source, message }
        }
        StatusCode::TOO_MANY_REQUESTS => ClimateError::RateLimit { provider: source },
        StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => {
            ClimateError::NoData { provider: source, message }
        }
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
            ClimateError::Transport { provider: source, message }
        }
        _ => ClimateError::ProviderFormat { provider: source, message },
    }
}

fn transport_error(source: Source, err: &reqwest::Error) -> ClimateError {
    let message = if err.is_timeout() {
        format!("request timed out: {err}")
    } else {
        err.to_string()
    };
    ClimateError::Transport { provider: source, message }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
