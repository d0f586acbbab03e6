use std::sync::Arc;

use slotswap::transport::{ServerConfig, serve};
use slotswap::{MemoryRegistry, SlotRegistry, SwapCoordinator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig {
        host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        port: std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5000),
    };

    let registry = Arc::new(MemoryRegistry::new()) as Arc<dyn SlotRegistry>;
    let coordinator = Arc::new(SwapCoordinator::new(registry));

    serve(config, coordinator).await
}
