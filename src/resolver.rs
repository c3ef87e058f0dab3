use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use futures::future::join_all;
use log::{info, warn};
use lru::LruCache;
use uuid::Uuid;

use crate::configuration::ProviderSettings;
use crate::error::{InvalidRequest, SourceError};
use crate::models::{Coordinates, Location, Measurement, MetricType, Provenance, Quantity, Unit};
use crate::simulator::Simulator;
use crate::source::{SourceClient, SourceReading};

const CACHE_CAPACITY: usize = 512;

type CacheKey = (MetricType, u64, u64, NaiveDate);

/// Picks live data when the provider answers in time and simulated data
/// otherwise. Only invalid input is reported as an error.
pub struct MetricResolver {
    source: Arc<dyn SourceClient>,
    simulator: Simulator,
    timeout: Duration,
    cache: Option<ReadingCache>,
}

impl MetricResolver {
    pub fn new(source: Arc<dyn SourceClient>, simulator: Simulator, provider: &ProviderSettings) -> Self {
        let ttl = provider.cache_ttl();
        Self {
            source,
            simulator,
            timeout: provider.timeout(),
            cache: (!ttl.is_zero()).then(|| ReadingCache::new(ttl)),
        }
    }

    pub fn authenticated(&self) -> bool {
        self.source.authenticated()
    }

    pub async fn resolve(
        &self,
        location: &Location,
        metric: MetricType,
        date: Option<NaiveDate>,
    ) -> Result<Measurement, InvalidRequest> {
        let at = location.coordinates()?;
        Ok(self.resolve_at(metric, at, date).await)
    }

    /// Like `resolve`, for a metric named by the caller.
    pub async fn resolve_named(
        &self,
        location: &Location,
        metric: &str,
        date: Option<NaiveDate>,
    ) -> Result<Measurement, InvalidRequest> {
        let metric = metric.parse()?;
        self.resolve(location, metric, date).await
    }

    /// Resolves each metric concurrently. One metric falling back never
    /// affects the others.
    pub async fn resolve_all(
        &self,
        location: &Location,
        metrics: &[MetricType],
        date: Option<NaiveDate>,
    ) -> Result<Vec<Measurement>, InvalidRequest> {
        let at = location.coordinates()?;
        Ok(join_all(metrics.iter().map(|m| self.resolve_at(*m, at, date))).await)
    }

    async fn resolve_at(
        &self,
        metric: MetricType,
        at: Coordinates,
        date: Option<NaiveDate>,
    ) -> Measurement {
        let timestamp = match date {
            Some(day) => Utc.from_utc_datetime(&day.and_time(NaiveTime::default())),
            None => Utc::now(),
        };
        match self.live(metric, at, date).await {
            Ok(reading) => {
                info!("Live {} data for ({}, {}) from {}", metric, at.latitude, at.longitude, reading.dataset);
                measurement(
                    metric,
                    reading.value,
                    reading.components,
                    timestamp,
                    Some(reading.dataset),
                )
            }
            Err(e) => {
                match e {
                    SourceError::Unauthenticated | SourceError::NoDataForRegion => info!(
                        "Simulating {} for ({}, {}): {}",
                        metric, at.latitude, at.longitude, e
                    ),
                    _ => warn!(
                        "Simulating {} for ({}, {}): {}",
                        metric, at.latitude, at.longitude, e
                    ),
                }
                let simulated = self.simulator.simulate(metric, at, date);
                measurement(metric, simulated.value, simulated.components, timestamp, None)
            }
        }
    }

    async fn live(
        &self,
        metric: MetricType,
        at: Coordinates,
        date: Option<NaiveDate>,
    ) -> Result<SourceReading, SourceError> {
        let key = (
            metric,
            at.latitude.to_bits(),
            at.longitude.to_bits(),
            date.unwrap_or_else(|| Utc::now().date_naive()),
        );
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            return Ok(hit);
        }

        let reading = tokio::time::timeout(self.timeout, self.source.fetch(metric, at, date))
            .await
            .map_err(|_| {
                SourceError::ProviderUnavailable(format!("no answer within {:?}", self.timeout))
            })??;

        if let Some(cache) = &self.cache {
            cache.put(key, reading.clone());
        }
        Ok(reading)
    }
}

fn measurement(
    metric: MetricType,
    value: f64,
    components: BTreeMap<String, f64>,
    timestamp: DateTime<Utc>,
    dataset: Option<String>,
) -> Measurement {
    let provenance = match dataset {
        Some(_) => Provenance::Real,
        None => Provenance::Simulated,
    };
    Measurement {
        id: Uuid::new_v4(),
        metric,
        value,
        unit: metric.unit(),
        components: components
            .into_iter()
            .map(|(name, value)| {
                let unit = component_unit(&name);
                (name, Quantity { value, unit })
            })
            .collect(),
        timestamp,
        provenance,
        dataset,
    }
}

fn component_unit(name: &str) -> Unit {
    match name {
        "aqi" => Unit::Aqi,
        "no2" | "o3" | "pm25" | "so2" => Unit::MicrogramsPerCubicMeter,
        "groundwater_level" => Unit::Centimeters,
        "precipitation" => Unit::MillimetersPerDay,
        "green_coverage" => Unit::Percent,
        "surface_temperature" | "temperature" => Unit::Celsius,
        _ => Unit::Index,
    }
}

struct ReadingCache {
    ttl: Duration,
    entries: Mutex<LruCache<CacheKey, (Instant, SourceReading)>>,
}

impl ReadingCache {
    fn new(ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn get(&self, key: &CacheKey) -> Option<SourceReading> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let cached = entries
            .get(key)
            .map(|(stored, reading)| (stored.elapsed() < self.ttl, reading.clone()));
        match cached {
            Some((true, reading)) => Some(reading),
            Some((false, _)) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: CacheKey, reading: SourceReading) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.put(key, (Instant::now(), reading));
    }
}
