//! Pigeon keyserver binary

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use pigeon_keyserver::{
    config::Args,
    db::MongoClient,
    did::DidResolver,
    keys::{KeypairStore, MemoryKeypairStore},
    logging, server, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init_tracing(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }
    let service_did = args.service_did().map_err(anyhow::Error::msg)?;

    info!("======================================");
    info!("  Pigeon Keyserver v{}", env!("CARGO_PKG_VERSION"));
    info!("======================================");
    info!("Service DID: {}", service_did);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("PLC directory: {}", args.plc_url);
    info!("======================================");

    // Connect to MongoDB (in-memory fallback in dev mode)
    let store: Arc<dyn KeypairStore> = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            Arc::new(client.keypair_store())
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, keypairs will not survive a restart): {}", e);
                Arc::new(MemoryKeypairStore::new())
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let resolver = Arc::new(DidResolver::with_config(args.resolver_config()));
    let state = Arc::new(AppState::new(service_did, store, resolver));

    server::run(state, args.listen).await?;

    Ok(())
}
