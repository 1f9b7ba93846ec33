// ============================================
// Personality Provider (個性化評分引擎)
// ============================================
//
// Owns every cache of the engine:
// 1. Recipe (fetched once from remote settings)
// 2. Models and taggers per (family, topic)
// 3. The pipeline built from the recipe
// 4. The current interest vector, swapped atomically after each build
//
// Builds fold the user's history into one interest vector; scoring ranks a
// candidate item against the cached vector without ever mutating it.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{PersonalizationError, Result};
use crate::models::{
    InterestVector, Item, ParameterSets, PersonalizationSettings, ScoringContext, TimeSegmentTable,
};
use crate::services::history::{HistoryProvider, HistoryQuery};
use crate::services::interest_store::{InterestVectorStore, INTEREST_VECTOR_STORE};
use crate::services::recipe::{
    Pipeline, Recipe, RecipeExecutor, RecipeSource, RecipeStrategy, Step, StepError,
};
use crate::services::remote_settings::RemoteSettings;
use crate::services::tagging::{ModelFamily, ModelHandle, ModelStore, Tagger};

/// Score returned for items that cannot be ranked.
pub const UNRANKABLE: f64 = -1.0;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("history produced no interest items")]
    EmptyHistory,

    #[error("interest combiner failed: {0}")]
    Combiner(StepError),

    #[error("interest finalizer failed: {0}")]
    Finalizer(StepError),

    #[error(transparent)]
    Provider(#[from] PersonalizationError),
}

/// External services the provider depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub remote_settings: Arc<dyn RemoteSettings>,
    pub history: Arc<dyn HistoryProvider>,
    pub store: Arc<dyn InterestVectorStore>,
}

pub struct PersonalityProvider {
    context: ScoringContext,
    parameter_sets: ParameterSets,
    recipes: RecipeSource,
    models: ModelStore,
    history: Arc<dyn HistoryProvider>,
    store: Arc<dyn InterestVectorStore>,
    pipeline: Mutex<Option<Arc<Pipeline>>>,
    interest_vector: RwLock<Option<Arc<InterestVector>>>,
}

impl PersonalityProvider {
    /// # Errors
    /// `InvalidTimeSegments` or `UnknownParameterSet` when the settings are
    /// inconsistent.
    pub fn new(settings: &PersonalizationSettings, collaborators: Collaborators) -> Result<Self> {
        let time_segments = TimeSegmentTable::new(settings.time_segments.clone())?;
        let context = ScoringContext::new(
            time_segments,
            &settings.parameter_sets,
            &settings.parameter_set,
        )?;

        Ok(Self {
            context,
            parameter_sets: settings.parameter_sets.clone(),
            recipes: RecipeSource::new(collaborators.remote_settings.clone()),
            models: ModelStore::new(collaborators.remote_settings),
            history: collaborators.history,
            store: collaborators.store,
            pipeline: Mutex::new(None),
            interest_vector: RwLock::new(None),
        })
    }

    /// Run `recipe` through `strategy` instead of the remote recipe executor.
    pub fn with_strategy(mut self, recipe: Recipe, strategy: Arc<dyn RecipeStrategy>) -> Self {
        self.pipeline = Mutex::new(Some(Arc::new(Pipeline::new(Arc::new(recipe), strategy))));
        self
    }

    /// Build the pipeline, then restore the persisted interest vector or
    /// build a fresh one.
    pub async fn init(&self) -> std::result::Result<Arc<InterestVector>, BuildError> {
        self.pipeline().await?;

        match self.restore_interest_vector().await {
            Ok(Some(vector)) => return Ok(vector),
            Ok(None) => debug!("No persisted interest vector"),
            Err(e) => warn!(error = %e, "Ignoring unreadable persisted interest vector"),
        }

        self.create_interest_vector().await
    }

    pub fn context(&self) -> &ScoringContext {
        &self.context
    }

    pub async fn get_recipe(&self) -> Result<Arc<Recipe>> {
        self.recipes.get_recipe().await
    }

    pub async fn get_model(&self, family: &str, topic: &str) -> Result<Arc<ModelHandle>> {
        self.models.get_model(family, topic).await
    }

    pub async fn generate_tagger(&self, family: &str, topic: &str) -> Result<Tagger> {
        self.models.generate_tagger(family, topic).await
    }

    /// Executor over the active recipe with the nb and nmf taggers of `topic`.
    pub async fn generate_recipe_executor(&self, topic: &str) -> Result<RecipeExecutor> {
        let recipe = self.get_recipe().await?;
        let context = self.context_for(&recipe)?;
        let nb = self.generate_tagger(ModelFamily::Nb.as_str(), topic).await?;
        let nmf = self.generate_tagger(ModelFamily::Nmf.as_str(), topic).await?;

        Ok(RecipeExecutor::new(recipe, context).with_taggers(topic, nb, nmf))
    }

    /// Currently cached interest vector.
    pub async fn interest_vector(&self) -> Option<Arc<InterestVector>> {
        self.interest_vector.read().await.clone()
    }

    /// Fold the user's history into a new interest vector.
    ///
    /// The cached vector is replaced only on success.
    pub async fn create_interest_vector(
        &self,
    ) -> std::result::Result<Arc<InterestVector>, BuildError> {
        let pipeline = self.pipeline().await?;
        let recipe = pipeline.recipe();

        let query = HistoryQuery::new(
            recipe.history_required_fields.clone(),
            recipe.history_limit_secs,
            Utc::now(),
        );
        let history = self.history.fetch_history(&query).await?;
        let total = history.len();

        let mut items = Vec::with_capacity(total);
        for entry in &history {
            match pipeline.execute_step(entry.to_item(), Step::HistoryItemBuilder) {
                Ok(item) => items.push(item),
                Err(e) => debug!(url = %entry.url, error = %e, "Dropping history entry"),
            }
        }
        let kept = items.len();

        let mut items = items.into_iter();
        let seed = items.next().ok_or(BuildError::EmptyHistory)?;
        let combined = items
            .try_fold(seed, |acc, next| {
                pipeline.execute_combiner_step(acc, next, Step::InterestCombiner)
            })
            .map_err(BuildError::Combiner)?;
        let finalized = pipeline
            .execute_step(combined, Step::InterestFinalizer)
            .map_err(BuildError::Finalizer)?;

        let vector = Arc::new(InterestVector::from_item(finalized));
        let persisted = serde_json::to_value(vector.as_ref()).map_err(PersonalizationError::from)?;
        self.store.set(INTEREST_VECTOR_STORE, persisted).await?;

        *self.interest_vector.write().await = Some(vector.clone());

        info!(
            entries = total,
            dropped = total - kept,
            score = ?vector.score(),
            "Interest vector built"
        );
        Ok(vector)
    }

    /// Relevance of `item` against the cached interest vector, or
    /// `UNRANKABLE` when it cannot be ranked.
    pub async fn calculate_item_relevance_score(&self, item: &Item) -> f64 {
        let Some(vector) = self.interest_vector().await else {
            debug!("No interest vector yet");
            return UNRANKABLE;
        };

        let pipeline = match self.pipeline().await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                warn!(error = %e, "Pipeline unavailable for scoring");
                return UNRANKABLE;
            }
        };

        let scorable = match pipeline.execute_step(item.clone(), Step::ItemToRankBuilder) {
            Ok(scorable) => scorable,
            Err(e) => {
                debug!(error = %e, "Item is not rankable");
                return UNRANKABLE;
            }
        };

        let mut ranked = vector.as_item().clone();
        ranked.overlay(&scorable);

        match pipeline.execute_step(ranked, Step::ItemRanker) {
            Ok(ranked) => ranked.score().unwrap_or(UNRANKABLE),
            Err(e) => {
                debug!(error = %e, "Item ranker failed");
                UNRANKABLE
            }
        }
    }

    async fn restore_interest_vector(&self) -> Result<Option<Arc<InterestVector>>> {
        let Some(value) = self.store.get(INTEREST_VECTOR_STORE).await? else {
            return Ok(None);
        };

        let vector = Arc::new(InterestVector::from_item(Item::try_from(value)?));
        *self.interest_vector.write().await = Some(vector.clone());

        info!(score = ?vector.score(), "Restored persisted interest vector");
        Ok(Some(vector))
    }

    async fn pipeline(&self) -> Result<Arc<Pipeline>> {
        let mut pipeline = self.pipeline.lock().await;
        if let Some(pipeline) = pipeline.as_ref() {
            return Ok(pipeline.clone());
        }

        let recipe = self.get_recipe().await?;
        let mut executor = RecipeExecutor::new(recipe.clone(), self.context_for(&recipe)?);
        for topic in &recipe.models {
            let nb = self.generate_tagger(ModelFamily::Nb.as_str(), topic).await?;
            let nmf = self.generate_tagger(ModelFamily::Nmf.as_str(), topic).await?;
            executor = executor.with_taggers(topic, nb, nmf);
        }

        info!(
            topics = recipe.models.len(),
            parameter_set = %executor.context().parameter_set,
            "Recipe pipeline ready"
        );
        let built = Arc::new(Pipeline::new(recipe, Arc::new(executor)));
        *pipeline = Some(built.clone());
        Ok(built)
    }

    /// Scoring context with the recipe's parameter set override applied.
    fn context_for(&self, recipe: &Recipe) -> Result<ScoringContext> {
        match recipe.parameter_set.as_deref() {
            Some(name) if name != self.context.parameter_set => ScoringContext::new(
                self.context.time_segments.clone(),
                &self.parameter_sets,
                name,
            ),
            _ => Ok(self.context.clone()),
        }
    }
}
