use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::InvalidRequest;

pub type LocationId = Uuid;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    AirQuality,
    Groundwater,
    Vegetation,
}

impl MetricType {
    pub const ALL: [MetricType; 3] = [
        MetricType::AirQuality,
        MetricType::Groundwater,
        MetricType::Vegetation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::AirQuality => "air_quality",
            MetricType::Groundwater => "groundwater",
            MetricType::Vegetation => "vegetation",
        }
    }

    /// Name of the primary value reported for this metric.
    pub fn primary(&self) -> &'static str {
        match self {
            MetricType::AirQuality => "aqi",
            MetricType::Groundwater => "groundwater_level",
            MetricType::Vegetation => "ndvi",
        }
    }

    pub fn unit(&self) -> Unit {
        match self {
            MetricType::AirQuality => Unit::Aqi,
            MetricType::Groundwater => Unit::Centimeters,
            MetricType::Vegetation => Unit::Index,
        }
    }

    /// Inclusive bounds of the primary value.
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            MetricType::AirQuality => (0.0, 500.0),
            MetricType::Groundwater => (-100.0, 100.0),
            MetricType::Vegetation => (-1.0, 1.0),
        }
    }

    /// Satellite collection queried for this metric, with its search radius
    /// in degrees.
    pub fn collection(&self) -> (&'static str, f64) {
        match self {
            MetricType::AirQuality => ("OMNO2d", 0.1),
            MetricType::Groundwater => ("TELLUS_GRAC_L3_GWS_RL06_LND_v04", 0.5),
            MetricType::Vegetation => ("MOD13Q1", 0.1),
        }
    }

    /// Parse a comma separated list such as `air_quality,vegetation`.
    pub fn parse_list(list: &str) -> Result<Vec<MetricType>, InvalidRequest> {
        let mut metrics = Vec::new();
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let metric = name.parse()?;
            if !metrics.contains(&metric) {
                metrics.push(metric);
            }
        }
        Ok(metrics)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = InvalidRequest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "air_quality" => Ok(MetricType::AirQuality),
            "groundwater" => Ok(MetricType::Groundwater),
            "vegetation" => Ok(MetricType::Vegetation),
            other => Err(InvalidRequest::UnknownMetric(other.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unit {
    #[serde(rename = "AQI")]
    Aqi,
    #[serde(rename = "ug/m3")]
    MicrogramsPerCubicMeter,
    #[serde(rename = "cm")]
    Centimeters,
    #[serde(rename = "mm/day")]
    MillimetersPerDay,
    #[serde(rename = "percent")]
    Percent,
    #[serde(rename = "celsius")]
    Celsius,
    #[serde(rename = "index")]
    Index,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Real,
    Simulated,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

/// A validated point on the globe.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, InvalidRequest> {
        let lat_ok = latitude.is_finite() && (-90.0..=90.0).contains(&latitude);
        let lon_ok = longitude.is_finite() && (-180.0..=180.0).contains(&longitude);
        if !(lat_ok && lon_ok) {
            return Err(InvalidRequest::Coordinates {
                latitude,
                longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Location {
    pub fn coordinates(&self) -> Result<Coordinates, InvalidRequest> {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// Registration payload; `register` validates it into a `Location`.
#[derive(Deserialize, Clone, Debug)]
pub struct NewLocation {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub population: Option<u64>,
    #[serde(default)]
    pub area: Option<f64>,
}

impl NewLocation {
    pub fn register(self) -> Result<Location, InvalidRequest> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(InvalidRequest::EmptyName);
        }
        let coordinates = Coordinates::new(self.latitude, self.longitude)?;
        Ok(Location {
            id: Uuid::new_v4(),
            name: name.to_string(),
            latitude: coordinates.latitude,
            longitude: coordinates.longitude,
            population: self.population,
            area: self.area,
            created_at: Utc::now(),
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Measurement {
    pub id: Uuid,
    pub metric: MetricType,
    pub value: f64,
    pub unit: Unit,
    #[serde(default)]
    pub components: BTreeMap<String, Quantity>,
    pub timestamp: DateTime<Utc>,
    pub provenance: Provenance,
    pub dataset: Option<String>,
}

impl Measurement {
    pub fn component(&self, name: &str) -> Option<f64> {
        if name == self.metric.primary() {
            return Some(self.value);
        }
        self.components.get(name).map(|q| q.value)
    }
}

/// Half-open `[from, to)` window over measurement timestamps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub const ALL: TimeRange = TimeRange {
        from: None,
        to: None,
    };

    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| *t >= from) && self.to.map_or(true, |to| *t < to)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    AirQuality,
    FloodRisk,
    WaterStress,
    SparseVegetation,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Danger,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub location_id: LocationId,
    pub timestamp: DateTime<Utc>,
    pub measurements: Vec<Uuid>,
}
