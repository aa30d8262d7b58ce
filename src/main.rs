use sensorthings_db_rust::config::{AppConfig, StoreBackend};
use sensorthings_db_rust::model::NavigationGraph;
use sensorthings_db_rust::store::{EntityStore, MemoryStore, PostgresStore};
use sensorthings_db_rust::{build_app, run_server, seed, SensorThingsService};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with explicit filter to suppress sqlx debug logs
    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .parse_default_env()
        .init();

    let config = AppConfig::load()?;
    log::info!(
        "configuration loaded: server={}:{} store={:?}",
        config.server.host,
        config.server.port,
        config.store.backend
    );

    let graph = Arc::new(NavigationGraph::sensorthings()?);

    match config.store.backend {
        StoreBackend::Memory => {
            log::info!("using in-memory store");
            let store = Arc::new(MemoryStore::new(graph.clone()));
            launch(store, graph, &config).await
        }
        StoreBackend::Postgres => {
            log::info!("connecting to PostgreSQL");
            let database_url = config.database_url()?;
            let max_connections = config.database.max_connections.unwrap_or(20);
            let store = PostgresStore::new(&database_url, max_connections, graph.clone()).await?;

            log::info!("running database migrations");
            store.migrate().await?;
            launch(Arc::new(store), graph, &config).await
        }
    }
}

async fn launch<S: EntityStore + 'static>(
    store: Arc<S>,
    graph: Arc<NavigationGraph>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let service = SensorThingsService::new(store, graph, config.service_settings());

    // Load seed data for demonstration (optional)
    if std::env::var("LOAD_SEED_DATA").unwrap_or_default() == "true" {
        log::info!("loading seed data");
        seed::load_seed_data(&service).await?;
    }

    run_server(build_app(service, config), config).await
}
