use anyhow::{Context, Result};
use personalization_service::config::StoreBackend;
use personalization_service::services::{
    DirectoryRemoteSettings, HttpRemoteSettings, InterestVectorStore, JsonHistoryProvider,
    PersistentCache, RedisInterestVectorStore, RemoteSettings, INTEREST_VECTOR_STORE,
};
use personalization_service::{
    BuildError, Collaborators, Config, Item, PersonalityProvider, UNRANKABLE,
};
use redis::aio::ConnectionManager;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    // Load config
    let config = Config::from_env().context("Failed to load config")?;
    config.validate()?;
    let settings = config.load_settings().await?;

    info!(
        parameter_set = %settings.parameter_set,
        store = ?config.store_backend,
        "Starting personalization job"
    );

    let remote_settings: Arc<dyn RemoteSettings> = match &config.remote_settings_url {
        Some(url) => Arc::new(HttpRemoteSettings::new(
            url,
            config.remote_settings_timeout(),
        )?),
        None => Arc::new(DirectoryRemoteSettings::new(&config.remote_settings_dir)),
    };

    let store: Arc<dyn InterestVectorStore> = match config.store_backend {
        StoreBackend::File => Arc::new(
            PersistentCache::open(&config.store_dir, INTEREST_VECTOR_STORE, true).await?,
        ),
        StoreBackend::Redis => {
            let client = redis::Client::open(config.redis_url.as_str())
                .context("Failed to create Redis client")?;
            let manager = ConnectionManager::new(client)
                .await
                .context("Failed to connect to Redis")?;
            Arc::new(RedisInterestVectorStore::new(
                manager,
                INTEREST_VECTOR_STORE,
                config.redis_ttl_secs,
            ))
        }
    };

    let provider = PersonalityProvider::new(
        &settings,
        Collaborators {
            remote_settings,
            history: Arc::new(JsonHistoryProvider::new(&config.history_path)),
            store,
        },
    )?;

    match provider.init().await {
        Ok(vector) => info!(score = ?vector.score(), "Interest vector ready"),
        Err(BuildError::EmptyHistory) => {
            warn!("No usable history; items will be reported as unrankable")
        }
        Err(e) => return Err(e).context("Failed to build interest vector"),
    }

    let Some(items_path) = &config.items_path else {
        return Ok(());
    };

    let bytes = tokio::fs::read(items_path)
        .await
        .with_context(|| format!("Failed to read {}", items_path.display()))?;
    let items: Vec<Item> = serde_json::from_slice(&bytes).context("Malformed items file")?;

    let mut unrankable = 0usize;
    for item in &items {
        let score = provider.calculate_item_relevance_score(item).await;
        if score == UNRANKABLE {
            unrankable += 1;
        }
        println!("{}", json!({"item": item, "score": score}));
    }

    info!(items = items.len(), unrankable = unrankable, "Scored items");
    Ok(())
}
