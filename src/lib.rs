pub mod alerts;
pub mod configuration;
pub mod dashboard;
pub mod error;
pub mod models;
pub mod resolver;
pub mod routes;
pub mod server;
pub mod simulator;
pub mod source;
pub mod store;
