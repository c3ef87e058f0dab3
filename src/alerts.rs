use std::cmp::Reverse;

use crate::configuration::AlertSettings;
use crate::error::StoreError;
use crate::models::{Alert, AlertKind, Location, Measurement, MetricType, Severity};
use crate::store::LocationStore;

/// Alerts raised by a single measurement.
pub fn evaluate(location: &Location, m: &Measurement, thresholds: &AlertSettings) -> Vec<Alert> {
    let alert = |kind, severity, message: String| Alert {
        kind,
        severity,
        message,
        location_id: location.id,
        timestamp: m.timestamp,
        measurements: vec![m.id],
    };
    let source = m.dataset.as_deref().unwrap_or("simulated");

    let mut alerts = Vec::new();
    match m.metric {
        MetricType::AirQuality => {
            if m.value > thresholds.aqi_warning {
                let severity = if m.value >= thresholds.aqi_danger {
                    Severity::Danger
                } else {
                    Severity::Warning
                };
                alerts.push(alert(
                    AlertKind::AirQuality,
                    severity,
                    format!("Poor air quality in {}. AQI: {:.0} ({})", location.name, m.value, source),
                ));
            }
        }
        MetricType::Groundwater => {
            if let Some(risk) = m.component("flood_risk") {
                if risk >= thresholds.flood_risk_danger {
                    alerts.push(alert(
                        AlertKind::FloodRisk,
                        Severity::Danger,
                        format!("High flood risk in {} ({})", location.name, source),
                    ));
                }
            }
            if m.value < thresholds.groundwater_stress_cm {
                alerts.push(alert(
                    AlertKind::WaterStress,
                    Severity::Warning,
                    format!("Severe groundwater depletion in {}: {:.1}cm", location.name, m.value),
                ));
            }
        }
        MetricType::Vegetation => {
            if m.value < thresholds.ndvi_sparse {
                alerts.push(alert(
                    AlertKind::SparseVegetation,
                    Severity::Warning,
                    format!("Sparse vegetation in {}: NDVI {:.2}", location.name, m.value),
                ));
            }
        }
    }
    alerts
}

/// Danger before warning, newest first within a severity.
pub fn sort(alerts: &mut [Alert]) {
    alerts.sort_by_key(|a| (Reverse(a.severity), Reverse(a.timestamp)));
}

/// Evaluates the latest measurement of every metric for one location.
pub async fn for_location(
    store: &dyn LocationStore,
    location: &Location,
    thresholds: &AlertSettings,
) -> Result<Vec<Alert>, StoreError> {
    let mut alerts = Vec::new();
    for metric in MetricType::ALL {
        if let Some(latest) = store.latest(location.id, metric).await? {
            alerts.extend(evaluate(location, &latest, thresholds));
        }
    }
    sort(&mut alerts);
    Ok(alerts)
}

pub async fn for_all(
    store: &dyn LocationStore,
    thresholds: &AlertSettings,
) -> Result<Vec<Alert>, StoreError> {
    let mut alerts = Vec::new();
    for location in store.list().await? {
        match for_location(store, &location, thresholds).await {
            Ok(found) => alerts.extend(found),
            // Removed while we were iterating.
            Err(StoreError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    sort(&mut alerts);
    Ok(alerts)
}
