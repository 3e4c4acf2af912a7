use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blob_router::{
    api,
    blob_store::{BlobStore, LocalStore},
    config::Config,
    group::{location_cache::CacheManager, placement::StrategyRegistry, GroupStore},
    lifecycle::Lifecycle,
    registry::{StoreManager, StoreRegistry},
    state_guard::GuardedStore,
    AppState,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "blob-router starting");

    // Load configuration
    let config = Config::load()?;
    info!("Loaded configuration for group: {}", config.group.name);

    // Open and start every backing store
    let registry = Arc::new(StoreManager::new());
    let mut stores = Vec::with_capacity(config.stores.len());
    for spec in &config.stores {
        let local = if spec.read_only {
            LocalStore::read_only(&spec.name, &spec.path)?
        } else {
            LocalStore::new(&spec.name, &spec.path)?
        };
        info!(
            store = %spec.name,
            path = %local.base_path().display(),
            read_only = spec.read_only,
            "Opened local blob store"
        );
        let store = Arc::new(GuardedStore::new(Arc::new(local)));
        store.start().await?;
        registry.register(Arc::clone(&store) as Arc<dyn BlobStore>);
        stores.push(store);
    }

    // Build the group over the registered stores
    let group = GroupStore::init(
        config.group_configuration(),
        Arc::clone(&registry) as Arc<dyn StoreRegistry>,
        &StrategyRegistry::with_builtins(),
        Arc::new(CacheManager::new()),
    )?;
    group.start().await?;
    let group = Arc::new(group);

    // Create shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        group: Arc::clone(&group),
    });

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    info!("Listening on: {}", config.node.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Stopping group and member stores");
    if let Err(e) = group.stop().await {
        tracing::error!(error = %e, "Failed to stop group store during shutdown");
    }
    for store in &stores {
        if let Err(e) = store.stop().await {
            tracing::error!(store = %store.name(), error = %e, "Failed to stop store during shutdown");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
