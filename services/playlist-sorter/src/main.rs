//!
//! src/main.rs  Andrew Belles  Oct 2025
//!
//! Boots the sorter: config, logger, cache backend, model provider,
//! then serves the http surface until ctrl-c
//!

use std::{path::Path, sync::Arc};

use tokio::net::TcpListener;
use tracing::info;

use playlist_sorter::{
    api::{self, AppState},
    catalog::SpotifyCatalog,
    config::{self, PersistenceConfig, StoreBackend},
    errors::SorterError,
    fetch::SpotifyClient,
    llm::{CompletionOptions, LlmProvider, OpenAiProvider},
    logging,
    model::PromptedModel,
    persistent::{KeyedStore, SqliteStore},
    pipeline::Sorter,
    sink::SnapshotStore,
};

async fn open_store(cfg: &PersistenceConfig) -> Result<Arc<dyn KeyedStore>, SorterError> {
    match cfg.backend {
        StoreBackend::Sqlite => {
            let file = cfg.db_url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(file).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Ok( Arc::new(SqliteStore::init(&cfg.db_url).await?) )
        }
        StoreBackend::Snapshot => {
            std::fs::create_dir_all(&cfg.snapshot_root)?;
            Ok( Arc::new(SnapshotStore::new(&cfg.snapshot_root, cfg.snapshot_level)) )
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "shutdown.signal");
    }
    info!("shutdown");
}

#[tokio::main]
async fn main() -> Result<(), SorterError> {
    let cfgs = config::load_config()?;
    let _logger = logging::init_logging(&cfgs.logging)?;
    info!(addr = %cfgs.server.bind_addr, backend = ?cfgs.persistence.backend, "starting");

    let store = open_store(&cfgs.persistence).await?;

    let client = SpotifyClient::new(&cfgs.http, &cfgs.spotify)?;
    let spotify = Arc::new(client.clone());
    let catalog = Arc::new(SpotifyCatalog::new(client));

    let provider = OpenAiProvider::new(&cfgs.llm)?;
    info!(provider = provider.name(), model = provider.model(), "model.ready");
    let model = PromptedModel::new(
        provider,
        CompletionOptions::from(&cfgs.llm),
        cfgs.pipeline.model_max_attempts
    ).with_backoff(cfgs.http.retry.base_backoff, cfgs.http.retry.jitter);

    let sorter = Arc::new(Sorter::new(catalog, store, Arc::new(model), cfgs.pipeline.clone()));
    let app = api::router(AppState { sorter, spotify });

    let listener = TcpListener::bind(cfgs.server.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
