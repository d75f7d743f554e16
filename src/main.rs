// src/main.rs
use std::sync::Arc;

use env_logger::Builder;
use log::{error, info, LevelFilter};

use tradesim::advisory::HttpAdvisory;
use tradesim::api::{self, AppContext};
use tradesim::auth::JwtResolver;
use tradesim::config::Config;
use tradesim::store::{LedgerStore, MemoryStore, ScyllaStore};

#[tokio::main]
async fn main() {
    Builder::new()
        .filter_level(LevelFilter::Debug)
        .format_timestamp_secs()
        .init();

    let config = Config::from_env();
    info!("Starting the trading simulator...");

    let store: Arc<dyn LedgerStore> = if config.memory_store {
        info!("Using in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        match ScyllaStore::connect(&config.store_node, config.store_deadline).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                return;
            }
        }
    };
    info!("Connected to store...");

    let ctx = AppContext {
        store,
        identity: Arc::new(JwtResolver::new(&config.jwt_secret)),
        advisory: Arc::new(HttpAdvisory::new(&config.advisory_endpoint)),
    };

    let routes = api::routes(ctx);

    info!("Server running on http://{}", config.bind_addr);
    warp::serve(routes).run(config.bind_addr).await;
}
