pub use storyfork_api::api;
pub use storyfork_config::{config, persistence, types};
pub use storyfork_core::{agent, engine, error, preview, EngineError, StoryEngine};

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use storyfork_api::api::{ApiConfig, ApiServer, AppState};
use storyfork_config::config::AppConfig;
use storyfork_config::persistence::Persistence;
use storyfork_core::agent::{create_provider, generation_config};
use storyfork_core::preview::PreviewCache;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over the configured level.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Wire storage, the model provider and the preview cache into an engine.
///
/// Must run inside a tokio runtime; the returned handles are the preview
/// sweeper and summary worker.
pub fn build_engine(config: &AppConfig) -> Result<(Arc<StoryEngine>, Vec<JoinHandle<()>>)> {
    let persistence = Persistence::new(&config.database.path).with_context(|| {
        format!("Failed to open database at {}", config.database.path.display())
    })?;
    let provider = create_provider(&config.model)?;
    let generation = generation_config(&config.model);
    let (previews, handles) =
        PreviewCache::spawn_in_memory(&config.preview, provider.clone(), generation.clone());
    let engine = StoryEngine::new(persistence, provider, previews).with_generation_config(generation);
    Ok((Arc::new(engine), handles))
}

pub async fn serve(config: AppConfig) -> Result<()> {
    let (engine, handles) = build_engine(&config)?;
    tracing::info!(
        database = %config.database.path.display(),
        provider = %config.model.provider,
        "Story engine ready"
    );

    let api_config = ApiConfig::from_app_config(&config);
    let state = AppState::new(engine, config)?;
    let result = ApiServer::new(api_config, state)
        .run_with_shutdown(shutdown_signal())
        .await;

    for handle in handles {
        handle.abort();
    }
    result
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    tracing::info!("Shutdown signal received");
}

/// Write the default configuration to `path`. Refuses to overwrite unless
/// `force` is set.
pub fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = AppConfig::default().to_toml_string()?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("storyfork.toml");
        init_config(&path, false).unwrap();

        let loaded = AppConfig::from_file(&path).unwrap();
        assert_eq!(loaded.server.port, AppConfig::default().server.port);
        assert!(init_config(&path, false).is_err());
        init_config(&path, true).unwrap();
    }

    #[tokio::test]
    async fn test_build_engine_with_mock_provider() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.database.path = dir.path().join("engine.duckdb");
        config.model.provider = "mock".to_string();

        let (engine, handles) = build_engine(&config).unwrap();
        assert_eq!(handles.len(), 2);
        let seed = engine.create_seed("author", "Tale", None, None).unwrap();
        assert_eq!(seed.slug, "tale");
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let mut config = AppConfig::default();
        config.model.provider = "telepathy".to_string();
        assert!(create_provider(&config.model).is_err());
    }
}
