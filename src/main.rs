use actix_web::middleware::{from_fn, Logger};
use actix_web::{web, App, HttpServer};
use env_logger::Builder;
use log::{error, info};

use twittor::auth::JwtKeys;
use twittor::config::Config;
use twittor::db;
use twittor::handlers::{self, ApiConfig};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    Builder::new()
        .filter_level(config.log_level)
        .parse_env("RUST_LOG")
        .format_timestamp_secs()
        .init();

    info!("Starting twittor on the {} backend...", config.storage.backend);
    let store = db::connect(&config.storage)
        .await
        .expect("Failed to connect to the storage backend");
    if !store.is_connected().await {
        error!("storage backend did not answer the initial ping");
        std::process::exit(1);
    }

    let keys = web::Data::new(JwtKeys::new(&config.auth));
    let store = web::Data::new(store);
    let api = web::Data::new(ApiConfig {
        records_limit: config.records_limit,
    });
    let workers = config.optimal_workers();
    info!("Listening on {} with {} workers", config.server.bind_addr, workers);

    HttpServer::new(move || {
        App::new()
            .wrap(from_fn(handlers::require_store))
            .wrap(Logger::default())
            .app_data(store.clone())
            .app_data(keys.clone())
            .app_data(api.clone())
            .configure(handlers::configure)
    })
    .workers(workers)
    .bind(config.server.bind_addr)?
    .run()
    .await
}
