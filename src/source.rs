use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use log::{debug, info, warn};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

use crate::configuration::{AuthSettings, EarthdataSettings, ProviderSettings};
use crate::error::SourceError;
use crate::models::{Coordinates, MetricType};

/// A live reading as returned by the provider, before it becomes a
/// `Measurement`.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceReading {
    pub value: f64,
    pub components: BTreeMap<String, f64>,
    pub dataset: String,
}

#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Whether usable credentials were established at construction.
    fn authenticated(&self) -> bool;

    async fn fetch(
        &self,
        metric: MetricType,
        at: Coordinates,
        date: Option<NaiveDate>,
    ) -> Result<SourceReading, SourceError>;
}

pub struct EarthdataClient {
    http: reqwest::Client,
    samples_url: String,
    auth: Option<AuthSettings>,
    api_key: Option<Secret<String>>,
    limiter: Option<RateLimiter>,
}

impl EarthdataClient {
    pub fn new(
        earthdata: &EarthdataSettings,
        provider: &ProviderSettings,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(provider.timeout())
            .build()?;
        let auth = earthdata.credentials();
        match &auth {
            Some(creds) => info!("Earthdata credentials loaded for {}", mask(&creds.username)),
            None => warn!("Earthdata credentials not found, all metrics will be simulated"),
        }
        Ok(Self {
            http,
            samples_url: format!("{}/samples", earthdata.base_url.trim_end_matches('/')),
            auth,
            api_key: earthdata.api_key().cloned(),
            limiter: provider
                .rate_limit
                .map(|per_minute| RateLimiter::new(per_minute, Duration::from_secs(60))),
        })
    }
}

#[async_trait]
impl SourceClient for EarthdataClient {
    fn authenticated(&self) -> bool {
        self.auth.is_some()
    }

    async fn fetch(
        &self,
        metric: MetricType,
        at: Coordinates,
        date: Option<NaiveDate>,
    ) -> Result<SourceReading, SourceError> {
        let auth = self.auth.as_ref().ok_or(SourceError::Unauthenticated)?;
        if let Some(limiter) = &self.limiter {
            limiter.acquire()?;
        }

        let (collection, radius) = metric.collection();
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        let mut query = vec![
            ("collection", collection.to_string()),
            ("lat", at.latitude.to_string()),
            ("lon", at.longitude.to_string()),
            ("date", date.format("%Y-%m-%d").to_string()),
            ("radius", radius.to_string()),
        ];
        if let Some(key) = &self.api_key {
            query.push(("api_key", key.expose_secret().clone()));
        }

        debug!("Requesting {} for ({}, {}) on {}", collection, at.latitude, at.longitude, date);
        let response = self
            .http
            .get(&self.samples_url)
            .basic_auth(&auth.username, Some(auth.password.expose_secret()))
            .query(&query)
            .send()
            .await
            .map_err(|e| SourceError::ProviderUnavailable(e.to_string()))?;

        classify(response.status())?;
        let body: Option<SampleResponse> = response
            .json()
            .await
            .map_err(|e| SourceError::ProviderUnavailable(e.to_string()))?;
        body.ok_or(SourceError::NoDataForRegion)?.into_reading(metric)
    }
}

#[derive(Deserialize, Debug)]
struct SampleResponse {
    granule_id: Option<String>,
    value: Option<f64>,
    #[serde(default)]
    components: BTreeMap<String, f64>,
}

impl SampleResponse {
    fn into_reading(self, metric: MetricType) -> Result<SourceReading, SourceError> {
        let (dataset, value) = match (self.granule_id, self.value) {
            (Some(dataset), Some(value)) if !dataset.is_empty() => (dataset, value),
            _ => return Err(SourceError::NoDataForRegion),
        };
        let (low, high) = metric.bounds();
        if !value.is_finite() || value < low || value > high {
            return Err(SourceError::ProviderUnavailable(format!(
                "{} value {} outside [{}, {}]",
                metric, value, low, high
            )));
        }
        Ok(SourceReading {
            value,
            components: self
                .components
                .into_iter()
                .filter(|(_, v)| v.is_finite())
                .collect(),
            dataset,
        })
    }
}

fn classify(status: StatusCode) -> Result<(), SourceError> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SourceError::Unauthenticated),
        StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Err(SourceError::NoDataForRegion),
        StatusCode::TOO_MANY_REQUESTS => Err(SourceError::RateLimited),
        s if s.is_success() => Ok(()),
        s => Err(SourceError::ProviderUnavailable(format!("status {}", s))),
    }
}

pub fn mask(username: &str) -> String {
    let visible: String = username.chars().take(3).collect();
    format!("{}***", visible)
}

/// Rolling-window request budget.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    sent: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit as usize,
            window,
            sent: Mutex::new(VecDeque::new()),
        }
    }

    pub fn acquire(&self) -> Result<(), SourceError> {
        self.acquire_at(Instant::now())
    }

    fn acquire_at(&self, now: Instant) -> Result<(), SourceError> {
        let mut sent = self.sent.lock().unwrap_or_else(|p| p.into_inner());
        while let Some(oldest) = sent.front() {
            if now.duration_since(*oldest) >= self.window {
                sent.pop_front();
            } else {
                break;
            }
        }
        if sent.len() >= self.limit {
            return Err(SourceError::RateLimited);
        }
        sent.push_back(now);
        Ok(())
    }
}
