//! IBGE SIDRA client: fetches raw per-year crop metric tables.
//!
//! Table 5457 ("Área plantada ou destinada à colheita, área colhida e
//! produção") at municipal level (`n6/all`) for soy (`c782/40124`), one
//! variable per request. The client performs a single attempt per call and
//! leaves any retry decision to the caller.

use async_trait::async_trait;
use lavoura_core::{Metric, RawMetricRow};
use thiserror::Error;
use tracing::info_span;

pub const CRATE_NAME: &str = "lavoura-sidra";

pub const DEFAULT_BASE_URL: &str = "https://apisidra.ibge.gov.br";

/// SIDRA table and classification constants for the soy production dataset.
const TABLE: u32 = 5457;
const PRODUCT_CLASSIFICATION: &str = "c782/40124";

#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport failure, non-success status, or a body that is not the
    /// expected JSON array. Not retried here.
    #[error("source unavailable fetching {metric} for {year}: {reason}")]
    Unavailable {
        metric: Metric,
        year: i32,
        reason: String,
    },
}

impl SourceError {
    pub fn unavailable(metric: Metric, year: i32, reason: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            metric,
            year,
            reason: reason.to_string(),
        }
    }
}

/// Seam between the ingestion pipeline and the remote statistics service;
/// lets tests substitute canned payloads for the live API.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn fetch(&self, metric: Metric, year: i32) -> Result<Vec<RawMetricRow>, SourceError>;
}

#[derive(Debug, Clone)]
pub struct SidraConfig {
    pub base_url: String,
    pub timeout: std::time::Duration,
    pub user_agent: Option<String>,
}

impl Default for SidraConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: std::time::Duration::from_secs(60),
            user_agent: None,
        }
    }
}

impl SidraConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("SIDRA_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            timeout: std::env::var("SIDRA_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| std::time::Duration::from_secs(60)),
            user_agent: std::env::var("SIDRA_USER_AGENT").ok(),
        }
    }
}

#[derive(Debug)]
pub struct SidraClient {
    client: reqwest::Client,
    base_url: String,
}

impl SidraClient {
    pub fn new(config: SidraConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Full request URL for one metric and year.
    pub fn metric_url(&self, metric: Metric, year: i32) -> String {
        format!(
            "{}/values/t/{}/n6/all/v/{}/p/{}/{}?formato=json",
            self.base_url,
            TABLE,
            metric.variable_code(),
            year,
            PRODUCT_CLASSIFICATION
        )
    }
}

#[async_trait]
impl MetricSource for SidraClient {
    async fn fetch(&self, metric: Metric, year: i32) -> Result<Vec<RawMetricRow>, SourceError> {
        let url = self.metric_url(metric, year);
        let span = info_span!("sidra_fetch", %metric, year, url);
        let _guard = span.enter();

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| SourceError::unavailable(metric, year, err))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::unavailable(
                metric,
                year,
                format!("http status {status}"),
            ));
        }

        resp.json::<Vec<RawMetricRow>>()
            .await
            .map_err(|err| SourceError::unavailable(metric, year, err))
    }
}
