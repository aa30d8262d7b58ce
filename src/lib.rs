pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use error::{ApiError, ErrorClass};
pub use logic::service::{Created, SensorThingsService, ServiceSettings};
pub use logic::{Cancellation, Payload};

// Export all model types
pub use model::*;

// Export store types
pub use store::{EntityStore, MemoryStore, PostgresStore};

use axum::Router;
use std::sync::Arc;

use crate::api::handlers::ApiState;
use crate::config::AppConfig;

/// Wraps `service` in the HTTP surface configured by `config`.
pub fn build_app<S: EntityStore + 'static>(service: SensorThingsService<S>, config: &AppConfig) -> Router {
    let state = Arc::new(ApiState {
        service,
        indent_json: config.api.indent_json,
        query_timeout: config.query_timeout(),
    });
    routes::create_router().with_state(state)
}

/// Serves `app` on the configured address until the listener fails.
pub async fn run_server(app: Router, config: &AppConfig) -> anyhow::Result<()> {
    use axum::serve;
    use tokio::net::TcpListener;

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("SensorThings server listening on http://{}", bind_address);
    log::info!("service root: {}", config.service_root());

    serve(listener, app).await?;

    Ok(())
}
