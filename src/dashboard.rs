use chrono::{DateTime, NaiveDate, Utc};
use log::info;
use serde::Serialize;

use crate::error::{InvalidRequest, StoreError};
use crate::models::{Location, Measurement, MetricType, Provenance};
use crate::resolver::MetricResolver;
use crate::store::LocationStore;

#[derive(Serialize, Debug)]
pub struct Dashboard {
    pub location: Location,
    pub measurements: Vec<Measurement>,
    pub wellbeing_index: f64,
    pub provider_authenticated: bool,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error(transparent)]
    Invalid(#[from] InvalidRequest),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolves the requested metrics for a location, records them in its
/// history and summarises them.
pub async fn snapshot(
    resolver: &MetricResolver,
    store: &dyn LocationStore,
    location: Location,
    metrics: &[MetricType],
    date: Option<NaiveDate>,
) -> Result<Dashboard, DashboardError> {
    info!(
        "Fetching {} metric(s) for {} ({}, {})",
        metrics.len(),
        location.name,
        location.latitude,
        location.longitude
    );
    let measurements = resolver.resolve_all(&location, metrics, date).await?;
    for m in &measurements {
        store.append_measurement(location.id, m.clone()).await?;
    }
    let live = measurements
        .iter()
        .filter(|m| m.provenance == Provenance::Real)
        .count();
    info!(
        target: "urbanwell::usage",
        "dashboard location={} lat={} lon={} live={}/{}",
        location.id,
        location.latitude,
        location.longitude,
        live,
        measurements.len()
    );
    Ok(Dashboard {
        wellbeing_index: wellbeing_index(&measurements),
        provider_authenticated: resolver.authenticated(),
        last_updated: Utc::now(),
        location,
        measurements,
    })
}

/// Weighted 0-100 score: air 40%, water 30%, greenery 30%. A missing metric
/// counts as a neutral 50.
pub fn wellbeing_index(measurements: &[Measurement]) -> f64 {
    let find = |metric| measurements.iter().find(|m| m.metric == metric);
    let air = find(MetricType::AirQuality).map_or(50.0, |m| (100.0 - m.value).max(0.0));
    let water = find(MetricType::Groundwater).map_or(50.0, |m| 50.0 + m.value * 2.0);
    let green = find(MetricType::Vegetation)
        .and_then(|m| m.component("green_coverage"))
        .unwrap_or(50.0);
    (air * 0.4 + water * 0.3 + green * 0.3).clamp(0.0, 100.0)
}
