use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{ModelError, ModelFamily, NaiveBayesTagger, NmfTagger, Tagger};
use crate::error::{PersonalizationError, Result};
use crate::services::remote_settings::RemoteSettings;

/// Cache key for models and taggers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelKey {
    pub family: ModelFamily,
    pub topic: String,
}

impl ModelKey {
    pub fn new(family: ModelFamily, topic: &str) -> Self {
        Self {
            family,
            topic: topic.to_string(),
        }
    }

    /// Remote settings record holding the model blob.
    pub fn settings_key(&self) -> String {
        format!("{}-model-{}", self.family, self.topic)
    }
}

/// Opaque model blob as fetched from remote settings.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    key: ModelKey,
    blob: Value,
}

impl ModelHandle {
    pub fn key(&self) -> &ModelKey {
        &self.key
    }

    pub fn blob(&self) -> &Value {
        &self.blob
    }

    fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.blob.clone()).map_err(|e| self.invalid(e.to_string()))
    }

    fn invalid(&self, reason: String) -> PersonalizationError {
        PersonalizationError::InvalidModel {
            family: self.key.family.to_string(),
            topic: self.key.topic.clone(),
            reason,
        }
    }
}

/// Memoizes one model blob and one tagger per (family, topic).
///
/// Entries are never evicted; a fresh store is the only way to pick up
/// updated models.
pub struct ModelStore {
    remote: Arc<dyn RemoteSettings>,
    models: Mutex<HashMap<ModelKey, Arc<ModelHandle>>>,
    taggers: Mutex<HashMap<ModelKey, Tagger>>,
}

impl ModelStore {
    pub fn new(remote: Arc<dyn RemoteSettings>) -> Self {
        Self {
            remote,
            models: Mutex::new(HashMap::new()),
            taggers: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch (once) the model blob for `family`/`topic`.
    ///
    /// # Errors
    /// `InvalidModelFamily` for anything but "nb"/"nmf"; remote settings
    /// failures are propagated.
    pub async fn get_model(&self, family: &str, topic: &str) -> Result<Arc<ModelHandle>> {
        let key = ModelKey::new(family.parse()?, topic);
        self.model(&key).await
    }

    /// Build (once) the tagger for `family`/`topic`.
    pub async fn generate_tagger(&self, family: &str, topic: &str) -> Result<Tagger> {
        let key = ModelKey::new(family.parse()?, topic);

        let mut taggers = self.taggers.lock().await;
        if let Some(tagger) = taggers.get(&key) {
            return Ok(tagger.clone());
        }

        let handle = self.model(&key).await?;
        let tagger = match key.family {
            ModelFamily::Nb => Tagger::NaiveBayes(Arc::new(
                NaiveBayesTagger::new(handle.parse()?).map_err(|ModelError(r)| handle.invalid(r))?,
            )),
            ModelFamily::Nmf => Tagger::Nmf(Arc::new(
                NmfTagger::new(handle.parse()?).map_err(|ModelError(r)| handle.invalid(r))?,
            )),
        };

        info!(family = %key.family, topic = %key.topic, "Built text tagger");
        taggers.insert(key, tagger.clone());
        Ok(tagger)
    }

    pub async fn is_model_cached(&self, family: ModelFamily, topic: &str) -> bool {
        self.models
            .lock()
            .await
            .contains_key(&ModelKey::new(family, topic))
    }

    async fn model(&self, key: &ModelKey) -> Result<Arc<ModelHandle>> {
        let mut models = self.models.lock().await;
        if let Some(handle) = models.get(key) {
            return Ok(handle.clone());
        }

        let settings_key = key.settings_key();
        debug!(key = %settings_key, "Fetching model from remote settings");
        let blob = self.remote.get(&settings_key).await?;

        let handle = Arc::new(ModelHandle {
            key: key.clone(),
            blob,
        });
        models.insert(key.clone(), handle.clone());
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::remote_settings::MockRemoteSettings;
    use crate::services::tagging::{test_models, TextTagger};
    use mockall::predicate::eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_model_rejects_unknown_family() {
        let store = ModelStore::new(Arc::new(MockRemoteSettings::new()));

        let err = store.get_model("nothing", "sports").await.unwrap_err();
        assert!(matches!(err, PersonalizationError::InvalidModelFamily(ref f) if f == "nothing"));

        let err = store.generate_tagger("nothing", "sports").await.unwrap_err();
        assert!(matches!(err, PersonalizationError::InvalidModelFamily(_)));
    }

    #[tokio::test]
    async fn test_get_model_fetches_once_per_key() {
        let mut remote = MockRemoteSettings::new();
        remote
            .expect_get()
            .with(eq("nmf-model-sports"))
            .times(1)
            .returning(|_| Ok(json!({"id": "nmf"})));
        remote
            .expect_get()
            .with(eq("nb-model-sports"))
            .times(1)
            .returning(|_| Ok(json!({"id": "nb"})));

        let store = ModelStore::new(Arc::new(remote));
        assert!(!store.is_model_cached(ModelFamily::Nmf, "sports").await);
        assert!(!store.is_model_cached(ModelFamily::Nb, "sports").await);

        let first = store.get_model("nmf", "sports").await.unwrap();
        let second = store.get_model("nmf", "sports").await.unwrap();
        store.get_model("nb", "sports").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.blob(), &json!({"id": "nmf"}));
        assert!(store.is_model_cached(ModelFamily::Nmf, "sports").await);
        assert!(store.is_model_cached(ModelFamily::Nb, "sports").await);
    }

    #[tokio::test]
    async fn test_distinct_topics_fetch_independently() {
        let mut remote = MockRemoteSettings::new();
        remote
            .expect_get()
            .times(2)
            .returning(|_| Ok(test_models::naive_bayes_sports()));

        let store = ModelStore::new(Arc::new(remote));
        store.generate_tagger("nb", "sports").await.unwrap();
        store.generate_tagger("nb", "news").await.unwrap();
        store.generate_tagger("nb", "sports").await.unwrap();
    }

    #[tokio::test]
    async fn test_generate_tagger_builds_matching_family() {
        let mut remote = MockRemoteSettings::new();
        remote
            .expect_get()
            .with(eq("nb-model-sports"))
            .times(1)
            .returning(|_| Ok(test_models::naive_bayes_sports()));
        remote
            .expect_get()
            .with(eq("nmf-model-sports"))
            .times(1)
            .returning(|_| Ok(test_models::nmf_sports()));

        let store = ModelStore::new(Arc::new(remote));

        let nb = store.generate_tagger("nb", "sports").await.unwrap();
        assert_eq!(nb.family(), ModelFamily::Nb);
        assert!(nb.as_naive_bayes().is_some());

        let nmf = store.generate_tagger("nmf", "sports").await.unwrap();
        assert_eq!(nmf.family(), ModelFamily::Nmf);
        assert!(nmf.as_nmf().is_some());

        // Second request is served from the tagger cache
        let again = store.generate_tagger("nmf", "sports").await.unwrap();
        assert!(Arc::ptr_eq(again.as_nmf().unwrap(), nmf.as_nmf().unwrap()));
    }

    #[tokio::test]
    async fn test_empty_record_is_invalid_model() {
        let mut remote = MockRemoteSettings::new();
        remote.expect_get().returning(|_| Ok(json!({})));

        let store = ModelStore::new(Arc::new(remote));
        let err = store.generate_tagger("nmf", "sports").await.unwrap_err();

        assert!(matches!(
            err,
            PersonalizationError::InvalidModel { ref family, ref topic, .. }
                if family == "nmf" && topic == "sports"
        ));
        assert!(err.is_configuration());
    }
}
