use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use tower_http::cors::CorsLayer;

use crate::configuration::{AlertSettings, EarthdataSettings, Settings, StorageBackend};
use crate::resolver::MetricResolver;
use crate::routes;
use crate::simulator::Simulator;
use crate::source::EarthdataClient;
use crate::store::{self, LocationStore, MemoryStore, PostgrestStore};

/// Application state shared across handlers
pub struct AppState {
    pub resolver: MetricResolver,
    pub store: Arc<dyn LocationStore>,
    pub earthdata: EarthdataSettings,
    pub alerts: AlertSettings,
}

impl AppState {
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let source = EarthdataClient::new(&settings.earthdata, &settings.provider)
            .context("Failed to build the Earthdata client")?;
        let resolver = MetricResolver::new(
            Arc::new(source),
            Simulator::new(settings.simulator.seed),
            &settings.provider,
        );

        let store: Arc<dyn LocationStore> = match settings.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            StorageBackend::Postgrest => {
                let postgrest = settings
                    .storage
                    .postgrest
                    .as_ref()
                    .context("storage.postgrest must be set for the postgrest backend")?;
                info!("Using PostgREST store at {}", postgrest.uri);
                Arc::new(PostgrestStore::new(postgrest))
            }
        };

        if settings.application.seed_sample_locations {
            store::seed_samples(store.as_ref())
                .await
                .context("Failed to seed sample locations")?;
        }

        Ok(Self {
            resolver,
            store,
            earthdata: settings.earthdata.clone(),
            alerts: settings.alerts.clone(),
        })
    }
}

/// Run the HTTP server until ctrl-c.
pub async fn run(state: AppState, addr: &str) -> Result<()> {
    let app = routes::routes()
        .with_state(Arc::new(state))
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}
