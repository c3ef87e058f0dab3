use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::alerts;
use crate::dashboard::{self, Dashboard, DashboardError};
use crate::error::{InvalidRequest, StoreError};
use crate::models::{Alert, Location, LocationId, Measurement, MetricType, NewLocation, TimeRange};
use crate::server::AppState;
use crate::source::mask;

type AppStateArc = Arc<AppState>;

const DEFAULT_HISTORY_DAYS: i64 = 7;
const MAX_HISTORY_DAYS: i64 = 36_500;

pub fn routes() -> Router<AppStateArc> {
    Router::new()
        .route("/", get(home))
        .route("/api/status", get(status))
        .route("/api/locations", get(list_locations).post(add_location))
        .route(
            "/api/locations/:id",
            get(get_location).patch(rename_location).delete(delete_location),
        )
        .route("/api/dashboard/:id", get(get_dashboard))
        .route("/api/historical/:id", get(get_historical))
        .route("/api/alerts", get(all_alerts))
        .route("/api/alerts/:id", get(location_alerts))
}

#[derive(Debug)]
pub enum ApiError {
    Invalid(InvalidRequest),
    Store(StoreError),
}

impl From<InvalidRequest> for ApiError {
    fn from(e: InvalidRequest) -> Self {
        ApiError::Invalid(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl From<DashboardError> for ApiError {
    fn from(e: DashboardError) -> Self {
        match e {
            DashboardError::Invalid(e) => ApiError::Invalid(e),
            DashboardError::Store(e) => ApiError::Store(e),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Invalid(InvalidRequest::Malformed(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Invalid(InvalidRequest::Malformed(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Invalid(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Store(e @ StoreError::NotFound(_)) => (StatusCode::NOT_FOUND, e.to_string()),
            ApiError::Store(e) => {
                error!("{}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn home(State(state): State<AppStateArc>) -> Json<serde_json::Value> {
    let earthdata = &state.earthdata;
    Json(json!({
        "message": "UrbanWell API - Urban Wellbeing Intelligence Platform",
        "version": env!("CARGO_PKG_VERSION"),
        "provider_authenticated": state.resolver.authenticated(),
        "credentials": {
            "earthdata_username": earthdata.username.as_deref().is_some_and(|u| !u.trim().is_empty()),
            "earthdata_password": earthdata.password.is_some(),
            "api_key": earthdata.api_key().is_some(),
        },
        "endpoints": {
            "locations": "/api/locations",
            "dashboard": "/api/dashboard/{id}",
            "historical": "/api/historical/{id}",
            "alerts": "/api/alerts/{id}",
            "status": "/api/status",
        }
    }))
}

#[derive(Serialize)]
struct StatusResponse {
    authenticated: bool,
    earthdata_username: String,
    api_key: &'static str,
    collections: BTreeMap<MetricType, &'static str>,
    total_locations: usize,
}

async fn status(State(state): State<AppStateArc>) -> Result<Json<StatusResponse>, ApiError> {
    let earthdata = &state.earthdata;
    Ok(Json(StatusResponse {
        authenticated: state.resolver.authenticated(),
        earthdata_username: earthdata
            .credentials()
            .map(|c| mask(&c.username))
            .unwrap_or_else(|| "Not Set".into()),
        api_key: if earthdata.api_key().is_some() { "Set" } else { "Not Set" },
        collections: MetricType::ALL
            .iter()
            .map(|m| (*m, m.collection().0))
            .collect(),
        total_locations: state.store.count().await?,
    }))
}

async fn list_locations(State(state): State<AppStateArc>) -> Result<Json<Vec<Location>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

async fn add_location(
    State(state): State<AppStateArc>,
    payload: Result<Json<NewLocation>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| {
        InvalidRequest::Malformed(format!(
            "Missing required fields: name, latitude, longitude ({})",
            rejection.body_text()
        ))
    })?;
    let location = payload.register()?;
    info!(
        "Added new location: {} ({}, {})",
        location.name, location.latitude, location.longitude
    );
    let id = state.store.create(location).await?;
    Ok(Json(json!({ "message": "Location added successfully", "id": id })))
}

async fn get_location(
    State(state): State<AppStateArc>,
    path: Result<Path<LocationId>, PathRejection>,
) -> Result<Json<Location>, ApiError> {
    let Path(id) = path?;
    Ok(Json(state.store.get(id).await?))
}

#[derive(Deserialize)]
struct Rename {
    name: String,
}

async fn rename_location(
    State(state): State<AppStateArc>,
    path: Result<Path<LocationId>, PathRejection>,
    payload: Result<Json<Rename>, JsonRejection>,
) -> Result<Json<Location>, ApiError> {
    let Path(id) = path?;
    let Json(Rename { name }) =
        payload.map_err(|rejection| InvalidRequest::Malformed(rejection.body_text()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(InvalidRequest::EmptyName.into());
    }
    Ok(Json(state.store.rename(id, name.to_string()).await?))
}

async fn delete_location(
    State(state): State<AppStateArc>,
    path: Result<Path<LocationId>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = path?;
    state.store.delete(id).await?;
    info!("Removed location {}", id);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct DashboardQuery {
    metrics: Option<String>,
    date: Option<NaiveDate>,
}

async fn get_dashboard(
    State(state): State<AppStateArc>,
    path: Result<Path<LocationId>, PathRejection>,
    query: Result<Query<DashboardQuery>, QueryRejection>,
) -> Result<Json<Dashboard>, ApiError> {
    let Path(id) = path?;
    let Query(query) = query?;
    let metrics = match query.metrics.as_deref() {
        Some(list) => MetricType::parse_list(list)?,
        None => MetricType::ALL.to_vec(),
    };
    let location = state.store.get(id).await?;
    let snapshot = dashboard::snapshot(
        &state.resolver,
        state.store.as_ref(),
        location,
        &metrics,
        query.date,
    )
    .await?;
    Ok(Json(snapshot))
}

#[derive(Deserialize)]
struct HistoryQuery {
    metric: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    days: Option<i64>,
}

impl HistoryQuery {
    fn range(&self, now: DateTime<Utc>) -> Result<TimeRange, InvalidRequest> {
        let days = self.days.unwrap_or(DEFAULT_HISTORY_DAYS);
        if !(1..=MAX_HISTORY_DAYS).contains(&days) {
            return Err(InvalidRequest::Malformed(format!(
                "days must be between 1 and {}",
                MAX_HISTORY_DAYS
            )));
        }
        let from = match self.from {
            Some(from) => from,
            None => self
                .to
                .unwrap_or(now)
                .checked_sub_signed(Duration::days(days))
                .ok_or_else(|| InvalidRequest::Malformed("history window out of range".into()))?,
        };
        if let Some(to) = self.to {
            if from > to {
                return Err(InvalidRequest::Malformed("from must not be after to".into()));
            }
        }
        Ok(TimeRange {
            from: Some(from),
            to: self.to,
        })
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum History {
    Series(Vec<Measurement>),
    ByMetric(BTreeMap<MetricType, Vec<Measurement>>),
}

async fn get_historical(
    State(state): State<AppStateArc>,
    path: Result<Path<LocationId>, PathRejection>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<History>, ApiError> {
    let Path(id) = path?;
    let Query(query) = query?;
    let range = query.range(Utc::now())?;
    let history = match query.metric.as_deref() {
        Some(name) => {
            let metric: MetricType = name.parse()?;
            History::Series(state.store.history(id, metric, range).await?)
        }
        None => {
            let mut all = BTreeMap::new();
            for metric in MetricType::ALL {
                all.insert(metric, state.store.history(id, metric, range).await?);
            }
            History::ByMetric(all)
        }
    };
    Ok(Json(history))
}

async fn location_alerts(
    State(state): State<AppStateArc>,
    path: Result<Path<LocationId>, PathRejection>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    let Path(id) = path?;
    let location = state.store.get(id).await?;
    let found = alerts::for_location(state.store.as_ref(), &location, &state.alerts).await?;
    Ok(Json(found))
}

async fn all_alerts(State(state): State<AppStateArc>) -> Result<Json<Vec<Alert>>, ApiError> {
    Ok(Json(alerts::for_all(state.store.as_ref(), &state.alerts).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::tests::test_settings;
    use crate::configuration::ProviderSettings;
    use crate::error::SourceError;
    use crate::models::Provenance;
    use crate::resolver::tests::{resolver_with, Scripted};
    use crate::store::{LocationStore, MemoryStore};
    use axum::body::{self, Body};
    use axum::http::Request;
    use tower::ServiceExt; // for `oneshot`
    use uuid::Uuid;

    fn app_with(source: Scripted) -> (Router, Arc<AppState>) {
        let settings = test_settings();
        let state = Arc::new(AppState {
            resolver: resolver_with(Arc::new(source), ProviderSettings::default()),
            store: Arc::new(MemoryStore::new()),
            earthdata: settings.earthdata,
            alerts: settings.alerts,
        });
        (routes().with_state(state.clone()), state)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn register(app: &Router, name: &str, lat: f64, lon: f64) -> String {
        let (status, body) = send(
            app,
            post_json("/api/locations", json!({ "name": name, "latitude": lat, "longitude": lon })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn registers_and_lists_locations() {
        let (app, _) = app_with(Scripted::succeeding());
        let id = register(&app, "Delhi", 28.6139, 77.2090).await;
        register(&app, "Agra", 27.1767, 78.0081).await;

        let (status, body) = send(&app, get(&format!("/api/locations/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Delhi");
        assert_eq!(body["latitude"], 28.6139);

        let (_, list) = send(&app, get("/api/locations")).await;
        let names: Vec<_> = list.as_array().unwrap().iter().map(|l| l["name"].clone()).collect();
        assert_eq!(names, vec![json!("Agra"), json!("Delhi")]);
    }

    #[tokio::test]
    async fn rejects_bad_registrations() {
        let (app, _) = app_with(Scripted::succeeding());
        let (status, body) = send(
            &app,
            post_json("/api/locations", json!({ "name": "Pole", "latitude": 95.0, "longitude": 0.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid coordinates"));

        let (status, body) = send(&app, post_json("/api/locations", json!({ "name": "Nowhere" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Missing required fields"));
    }

    #[tokio::test]
    async fn dashboard_falls_back_and_records_history() {
        let (app, state) = app_with(Scripted::failing(SourceError::ProviderUnavailable("down".into())));
        let id = register(&app, "Mumbai", 19.0760, 72.8777).await;

        let (status, body) = send(&app, get(&format!("/api/dashboard/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        let measurements = body["measurements"].as_array().unwrap();
        assert_eq!(measurements.len(), 3);
        for m in measurements {
            assert_eq!(m["provenance"], "simulated");
            assert!(m["dataset"].is_null());
        }
        let index = body["wellbeing_index"].as_f64().unwrap();
        assert!((0.0..=100.0).contains(&index));

        let id: Uuid = id.parse().unwrap();
        let stored = state
            .store
            .history(id, MetricType::Vegetation, TimeRange::ALL)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].provenance, Provenance::Simulated);
    }

    #[tokio::test]
    async fn dashboard_selects_metrics_and_reports_real_data() {
        let (app, _) = app_with(Scripted::succeeding());
        let id = register(&app, "Chennai", 13.0827, 80.2707).await;

        let (status, body) = send(
            &app,
            get(&format!("/api/dashboard/{}?metrics=vegetation&date=2024-05-05", id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let measurements = body["measurements"].as_array().unwrap();
        assert_eq!(measurements.len(), 1);
        assert_eq!(measurements[0]["metric"], "vegetation");
        assert_eq!(measurements[0]["provenance"], "real");
        assert_eq!(measurements[0]["dataset"], "MOD13Q1-granule");
        assert_eq!(measurements[0]["timestamp"], "2024-05-05T00:00:00Z");

        let (status, _) = send(&app, get(&format!("/api/dashboard/{}?metrics=ozone", id))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_locations_are_404() {
        let (app, _) = app_with(Scripted::succeeding());
        let ghost = Uuid::new_v4();
        for uri in [
            format!("/api/locations/{}", ghost),
            format!("/api/dashboard/{}", ghost),
            format!("/api/historical/{}?metric=groundwater", ghost),
            format!("/api/alerts/{}", ghost),
        ] {
            let (status, body) = send(&app, get(&uri)).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
            assert!(body["error"].as_str().unwrap().contains("not found"));
        }
    }

    #[tokio::test]
    async fn oversized_history_window_is_rejected() {
        let (app, _) = app_with(Scripted::succeeding());
        let id = register(&app, "Pune", 18.5204, 73.8567).await;
        for days in ["36501", "1000000000", "9223372036854775807"] {
            let (status, body) =
                send(&app, get(&format!("/api/historical/{}?days={}", id, days))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "days={}", days);
            assert!(body["error"].as_str().unwrap().contains("days must be between"));
        }

        let (status, _) = send(&app, get(&format!("/api/historical/{}?days=36500", id))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn history_window_never_overflows() {
        let query = HistoryQuery {
            metric: None,
            from: None,
            to: Some(DateTime::<Utc>::MIN_UTC),
            days: Some(1),
        };
        assert!(query.range(Utc::now()).is_err());
    }

    #[tokio::test]
    async fn malformed_path_and_query_give_json_errors() {
        let (app, _) = app_with(Scripted::succeeding());
        let id = register(&app, "Jaipur", 26.9124, 75.7873).await;
        for uri in [
            "/api/locations/not-a-uuid".to_string(),
            "/api/alerts/42".to_string(),
            format!("/api/dashboard/{}?date=yesterday", id),
            format!("/api/historical/{}?days=many", id),
            format!("/api/historical/{}?from=last-week", id),
        ] {
            let (status, body) = send(&app, get(&uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert!(body["error"].is_string(), "{}", uri);
        }
    }

    #[tokio::test]
    async fn history_series_and_grouped() {
        let (app, _) = app_with(Scripted::succeeding());
        let id = register(&app, "Kolkata", 22.5726, 88.3639).await;

        let (_, empty) = send(&app, get(&format!("/api/historical/{}?metric=air_quality", id))).await;
        assert_eq!(empty, json!([]));

        send(&app, get(&format!("/api/dashboard/{}", id))).await;
        send(&app, get(&format!("/api/dashboard/{}?metrics=air_quality", id))).await;

        let (status, series) = send(&app, get(&format!("/api/historical/{}?metric=air_quality", id))).await;
        assert_eq!(status, StatusCode::OK);
        let series = series.as_array().unwrap();
        assert_eq!(series.len(), 2);
        let stamps: Vec<DateTime<Utc>> = series
            .iter()
            .map(|m| m["timestamp"].as_str().unwrap().parse().unwrap())
            .collect();
        assert!(stamps[0] <= stamps[1]);

        let (_, grouped) = send(&app, get(&format!("/api/historical/{}", id))).await;
        assert_eq!(grouped["air_quality"].as_array().unwrap().len(), 2);
        assert_eq!(grouped["vegetation"].as_array().unwrap().len(), 1);

        let (status, _) = send(&app, get(&format!("/api/historical/{}?days=0", id))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn alerts_follow_latest_measurements() {
        let source = Scripted::new(|metric| {
            let mut reading = crate::resolver::tests::sample_reading(metric);
            if metric == MetricType::AirQuality {
                reading.value = 175.0;
            }
            Ok(reading)
        });
        let (app, _) = app_with(source);
        let id = register(&app, "Bangalore", 12.9716, 77.5946).await;

        let (_, none) = send(&app, get(&format!("/api/alerts/{}", id))).await;
        assert_eq!(none, json!([]));

        send(&app, get(&format!("/api/dashboard/{}?metrics=air_quality", id))).await;
        let (status, alerts) = send(&app, get(&format!("/api/alerts/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(alerts[0]["kind"], "air_quality");
        assert_eq!(alerts[0]["severity"], "danger");

        let (_, everywhere) = send(&app, get("/api/alerts")).await;
        assert_eq!(everywhere.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rename_delete_and_status() {
        let (app, _) = app_with(Scripted::succeeding());
        let id = register(&app, "Hyderbad", 17.3850, 78.4867).await;

        let rename = Request::builder()
            .method("PATCH")
            .uri(format!("/api/locations/{}", id))
            .header("content-type", "application/json")
            .body(Body::from(json!({ "name": "Hyderabad" }).to_string()))
            .unwrap();
        let (status, body) = send(&app, rename).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Hyderabad");

        let (_, status_body) = send(&app, get("/api/status")).await;
        assert_eq!(status_body["total_locations"], 1);
        assert_eq!(status_body["earthdata_username"], "tes***");
        assert_eq!(status_body["collections"]["groundwater"], "TELLUS_GRAC_L3_GWS_RL06_LND_v04");

        let delete = Request::builder()
            .method("DELETE")
            .uri(format!("/api/locations/{}", id))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, delete).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, get(&format!("/api/locations/{}", id))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
