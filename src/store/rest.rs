use async_trait::async_trait;
use chrono::SecondsFormat;
use log::error;
use postgrest::Postgrest;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::LocationStore;
use crate::configuration::PostgrestSettings;
use crate::error::StoreError;
use crate::models::{Location, LocationId, Measurement, MetricType, TimeRange};

const LOCATIONS: &str = "locations";
const MEASUREMENTS: &str = "measurements";

/// Store backed by a PostgREST endpoint exposing `locations` and
/// `measurements` tables. Ordering is delegated to the database.
pub struct PostgrestStore {
    client: Postgrest,
}

#[derive(Serialize, Deserialize)]
struct MeasurementRow {
    location_id: LocationId,
    #[serde(flatten)]
    measurement: Measurement,
}

impl PostgrestStore {
    pub fn new(settings: &PostgrestSettings) -> Self {
        let client = Postgrest::new(settings.uri.clone())
            .insert_header("apikey", settings.key.expose_secret());
        Self { client }
    }

    async fn ensure_exists(&self, id: LocationId) -> Result<(), StoreError> {
        self.get(id).await.map(|_| ())
    }
}

async fn rows<T: DeserializeOwned>(response: reqwest::Response) -> Result<Vec<T>, StoreError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        error!("Error in query status: {} -> {}", status, body);
        return Err(StoreError::Backend(format!("status {}", status)));
    }
    Ok(serde_json::from_str(&body)?)
}

fn timestamp_filter(t: &chrono::DateTime<chrono::Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl LocationStore for PostgrestStore {
    async fn create(&self, location: Location) -> Result<LocationId, StoreError> {
        let body = serde_json::to_string(&location)?;
        let response = self.client.from(LOCATIONS).insert(body).execute().await?;
        let created: Vec<Location> = rows(response).await?;
        created
            .first()
            .map(|l| l.id)
            .ok_or_else(|| StoreError::Backend("insert returned no row".into()))
    }

    async fn get(&self, id: LocationId) -> Result<Location, StoreError> {
        let response = self
            .client
            .from(LOCATIONS)
            .select("*")
            .eq("id", id.to_string())
            .execute()
            .await?;
        rows::<Location>(response)
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<Location>, StoreError> {
        let response = self
            .client
            .from(LOCATIONS)
            .select("*")
            .order("name.asc")
            .execute()
            .await?;
        rows(response).await
    }

    async fn rename(&self, id: LocationId, name: String) -> Result<Location, StoreError> {
        let body = serde_json::json!({ "name": name }).to_string();
        let response = self
            .client
            .from(LOCATIONS)
            .eq("id", id.to_string())
            .update(body)
            .execute()
            .await?;
        rows::<Location>(response)
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound(id))
    }

    async fn delete(&self, id: LocationId) -> Result<(), StoreError> {
        let response = self
            .client
            .from(MEASUREMENTS)
            .eq("location_id", id.to_string())
            .delete()
            .execute()
            .await?;
        rows::<serde_json::Value>(response).await?;

        let response = self
            .client
            .from(LOCATIONS)
            .eq("id", id.to_string())
            .delete()
            .execute()
            .await?;
        let deleted: Vec<serde_json::Value> = rows(response).await?;
        if deleted.is_empty() {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn append_measurement(
        &self,
        id: LocationId,
        measurement: Measurement,
    ) -> Result<(), StoreError> {
        self.ensure_exists(id).await?;
        let body = serde_json::to_string(&MeasurementRow {
            location_id: id,
            measurement,
        })?;
        let response = self.client.from(MEASUREMENTS).insert(body).execute().await?;
        rows::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn history(
        &self,
        id: LocationId,
        metric: MetricType,
        range: TimeRange,
    ) -> Result<Vec<Measurement>, StoreError> {
        self.ensure_exists(id).await?;
        let mut query = self
            .client
            .from(MEASUREMENTS)
            .select("*")
            .eq("location_id", id.to_string())
            .eq("metric", metric.as_str())
            .order("timestamp.asc");
        if let Some(from) = &range.from {
            query = query.gte("timestamp", timestamp_filter(from));
        }
        if let Some(to) = &range.to {
            query = query.lt("timestamp", timestamp_filter(to));
        }
        let found: Vec<MeasurementRow> = rows(query.execute().await?).await?;
        Ok(found.into_iter().map(|row| row.measurement).collect())
    }

    async fn latest(
        &self,
        id: LocationId,
        metric: MetricType,
    ) -> Result<Option<Measurement>, StoreError> {
        self.ensure_exists(id).await?;
        let response = self
            .client
            .from(MEASUREMENTS)
            .select("*")
            .eq("location_id", id.to_string())
            .eq("metric", metric.as_str())
            .order("timestamp.desc")
            .limit(1)
            .execute()
            .await?;
        let found: Vec<MeasurementRow> = rows(response).await?;
        Ok(found.into_iter().next().map(|row| row.measurement))
    }
}
