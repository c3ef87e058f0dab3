use async_trait::async_trait;
use log::info;

use crate::error::{InvalidRequest, StoreError};
use crate::models::{Location, LocationId, Measurement, MetricType, NewLocation, TimeRange};

mod memory;
mod rest;

pub use self::memory::MemoryStore;
pub use self::rest::PostgrestStore;

/// Durable home of locations and their measurement history.
///
/// History is append-only and always returned ordered by timestamp,
/// oldest first.
#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn create(&self, location: Location) -> Result<LocationId, StoreError>;

    async fn get(&self, id: LocationId) -> Result<Location, StoreError>;

    /// All locations, ordered by name.
    async fn list(&self) -> Result<Vec<Location>, StoreError>;

    async fn rename(&self, id: LocationId, name: String) -> Result<Location, StoreError>;

    /// Removes the location together with its history.
    async fn delete(&self, id: LocationId) -> Result<(), StoreError>;

    async fn append_measurement(
        &self,
        id: LocationId,
        measurement: Measurement,
    ) -> Result<(), StoreError>;

    async fn history(
        &self,
        id: LocationId,
        metric: MetricType,
        range: TimeRange,
    ) -> Result<Vec<Measurement>, StoreError>;

    async fn latest(
        &self,
        id: LocationId,
        metric: MetricType,
    ) -> Result<Option<Measurement>, StoreError> {
        Ok(self.history(id, metric, TimeRange::ALL).await?.pop())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.list().await?.len())
    }
}

pub fn sample_locations() -> Vec<NewLocation> {
    [
        ("New Delhi", 28.6139, 77.2090, 32_000_000, 1484.0),
        ("Mumbai", 19.0760, 72.8777, 21_000_000, 603.0),
        ("Bangalore", 12.9716, 77.5946, 13_000_000, 741.0),
        ("Chennai", 13.0827, 80.2707, 11_000_000, 426.0),
        ("Kolkata", 22.5726, 88.3639, 15_000_000, 1886.0),
        ("Hyderabad", 17.3850, 78.4867, 10_500_000, 650.0),
    ]
    .into_iter()
    .map(|(name, latitude, longitude, population, area)| NewLocation {
        name: name.to_string(),
        latitude,
        longitude,
        population: Some(population),
        area: Some(area),
    })
    .collect()
}

/// Registers the sample cities when the store holds no locations yet.
/// Returns how many were added.
pub async fn seed_samples(store: &dyn LocationStore) -> Result<usize, StoreError> {
    if store.count().await? > 0 {
        return Ok(0);
    }
    let mut added = 0;
    for sample in sample_locations() {
        let location = sample
            .register()
            .map_err(|e: InvalidRequest| StoreError::Backend(e.to_string()))?;
        store.create(location).await?;
        added += 1;
    }
    info!("Seeded {} sample locations", added);
    Ok(added)
}
