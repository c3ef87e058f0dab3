use std::time::Instant;

use anyhow::Result;
use log::info;
use urbanwell::configuration::get_configuration;
use urbanwell::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let started = Instant::now();
    let configuration = get_configuration()?;

    let state = AppState::from_settings(&configuration).await?;
    info!(
        "Provider {} in {:?}",
        if state.resolver.authenticated() {
            "authenticated"
        } else {
            "not configured, serving simulated data"
        },
        started.elapsed()
    );

    server::run(state, &configuration.application.address()).await
}
