use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::Recipe;
use crate::error::Result;
use crate::services::remote_settings::RemoteSettings;

/// Remote settings record holding the active recipe.
pub const RECIPE_KEY: &str = "personality-provider-recipe";

/// Fetch-once cache of the active recipe.
pub struct RecipeSource {
    remote: Arc<dyn RemoteSettings>,
    cached: RwLock<Option<Arc<Recipe>>>,
}

impl RecipeSource {
    pub fn new(remote: Arc<dyn RemoteSettings>) -> Self {
        Self {
            remote,
            cached: RwLock::new(None),
        }
    }

    pub async fn get_recipe(&self) -> Result<Arc<Recipe>> {
        if let Some(recipe) = self.cached.read().await.as_ref() {
            return Ok(recipe.clone());
        }

        let mut cached = self.cached.write().await;
        // Another caller may have fetched while we waited for the write lock
        if let Some(recipe) = cached.as_ref() {
            return Ok(recipe.clone());
        }

        debug!(key = RECIPE_KEY, "Fetching recipe from remote settings");
        let recipe = Arc::new(Recipe::from_value(self.remote.get(RECIPE_KEY).await?)?);
        info!(
            models = recipe.models.len(),
            parameter_set = ?recipe.parameter_set,
            "Loaded personalization recipe"
        );

        *cached = Some(recipe.clone());
        Ok(recipe)
    }

    /// Drop the cached recipe; the next `get_recipe` fetches again.
    pub async fn clear(&self) {
        *self.cached.write().await = None;
    }
}
