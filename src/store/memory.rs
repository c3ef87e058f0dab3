use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::LocationStore;
use crate::error::StoreError;
use crate::models::{Location, LocationId, Measurement, MetricType, TimeRange};

type History = Arc<Mutex<Vec<Measurement>>>;

/// Process-local store. Each location's history sits behind its own lock so
/// appends to one location never wait on another.
#[derive(Default)]
pub struct MemoryStore {
    locations: RwLock<HashMap<LocationId, Location>>,
    histories: RwLock<HashMap<LocationId, History>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn history_of(&self, id: LocationId) -> Result<History, StoreError> {
        self.histories
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }
}

#[async_trait]
impl LocationStore for MemoryStore {
    async fn create(&self, location: Location) -> Result<LocationId, StoreError> {
        let id = location.id;
        let mut locations = self.locations.write().await;
        if locations.contains_key(&id) {
            return Err(StoreError::Backend(format!("location {} already exists", id)));
        }
        locations.insert(id, location);
        self.histories.write().await.insert(id, History::default());
        Ok(id)
    }

    async fn get(&self, id: LocationId) -> Result<Location, StoreError> {
        self.locations
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<Location>, StoreError> {
        let mut all: Vec<Location> = self.locations.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.created_at.cmp(&b.created_at)));
        Ok(all)
    }

    async fn rename(&self, id: LocationId, name: String) -> Result<Location, StoreError> {
        let mut locations = self.locations.write().await;
        let location = locations.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        location.name = name;
        Ok(location.clone())
    }

    async fn delete(&self, id: LocationId) -> Result<(), StoreError> {
        let mut locations = self.locations.write().await;
        locations.remove(&id).ok_or(StoreError::NotFound(id))?;
        self.histories.write().await.remove(&id);
        Ok(())
    }

    async fn append_measurement(
        &self,
        id: LocationId,
        measurement: Measurement,
    ) -> Result<(), StoreError> {
        // The map stays read-locked so a concurrent delete waits for us.
        let histories = self.histories.read().await;
        let history = histories.get(&id).ok_or(StoreError::NotFound(id))?;
        let mut history = history.lock().await;
        // Equal timestamps keep arrival order.
        let at = history.partition_point(|m| m.timestamp <= measurement.timestamp);
        history.insert(at, measurement);
        Ok(())
    }

    async fn history(
        &self,
        id: LocationId,
        metric: MetricType,
        range: TimeRange,
    ) -> Result<Vec<Measurement>, StoreError> {
        let history = self.history_of(id).await?;
        let history = history.lock().await;
        Ok(history
            .iter()
            .filter(|m| m.metric == metric && range.contains(&m.timestamp))
            .cloned()
            .collect())
    }

    async fn latest(
        &self,
        id: LocationId,
        metric: MetricType,
    ) -> Result<Option<Measurement>, StoreError> {
        let history = self.history_of(id).await?;
        let history = history.lock().await;
        Ok(history.iter().rev().find(|m| m.metric == metric).cloned())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.locations.read().await.len())
    }
}
