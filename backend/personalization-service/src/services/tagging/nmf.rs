use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::vectorizer::{TfIdfVectorizer, Vectorizer, Vocabulary};
use super::{ModelError, ModelFamily, TagMap, TextTagger};

/// Non-negative matrix factorization model.
///
/// `topic_word` maps terms into the latent space (one row per latent
/// component), `document_topic` maps latent components back onto labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmfModel {
    pub vocab_idfs: Vocabulary,
    pub topic_word: Vec<Vec<f64>>,
    pub document_topic: HashMap<String, Vec<f64>>,
}

#[derive(Debug, Clone)]
pub struct NmfTagger {
    vectorizer: TfIdfVectorizer,
    topic_word: Vec<Vec<f64>>,
    document_topic: HashMap<String, Vec<f64>>,
}

impl NmfTagger {
    pub fn new(model: NmfModel) -> Result<Self, ModelError> {
        let vectorizer = TfIdfVectorizer::new(model.vocab_idfs);
        let components = model.topic_word.len();

        if let Some(max_term) = vectorizer.max_term_id() {
            if model.topic_word.iter().any(|row| row.len() <= max_term) {
                return Err(ModelError(format!(
                    "topic_word rows must cover term {}",
                    max_term
                )));
            }
        }

        if let Some((topic, _)) = model
            .document_topic
            .iter()
            .find(|(_, weights)| weights.len() != components)
        {
            return Err(ModelError(format!(
                "document_topic '{}' does not have {} components",
                topic, components
            )));
        }

        Ok(Self {
            vectorizer,
            topic_word: model.topic_word,
            document_topic: model.document_topic,
        })
    }

    /// Project a sum-normalized tf-idf vector into latent space.
    fn to_latent(&self, tokens: &[String]) -> Option<Vec<f64>> {
        let features = self.vectorizer.vectorize(tokens);
        let total: f64 = features.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return None;
        }

        Some(
            self.topic_word
                .iter()
                .map(|row| {
                    features
                        .iter()
                        .map(|(term_id, weight)| weight / total * row[*term_id])
                        .sum::<f64>()
                })
                .collect(),
        )
    }
}

impl TextTagger for NmfTagger {
    fn family(&self) -> ModelFamily {
        ModelFamily::Nmf
    }

    fn tag_tokens(&self, tokens: &[String]) -> TagMap {
        let Some(latent) = self.to_latent(tokens) else {
            return TagMap::new();
        };

        self.document_topic
            .iter()
            .map(|(topic, weights)| {
                let score = latent.iter().zip(weights).map(|(l, w)| l * w).sum::<f64>();
                (topic.clone(), score)
            })
            .collect()
    }
}
