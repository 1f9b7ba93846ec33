// ============================================
// Text Taggers (文本標籤器)
// ============================================
//
// Two classifier families map free text onto (topic, weight) tags:
// - nb:  naive Bayes over tf-idf, one confident label per document
// - nmf: matrix factorization, weights for every subtopic
//
// Both share the tf-idf vectorizer and are built from model blobs the
// ModelStore fetches from remote settings.

pub mod model_store;
pub mod naive_bayes;
pub mod nmf;
pub mod vectorizer;

pub use model_store::{ModelHandle, ModelKey, ModelStore};
pub use naive_bayes::{NaiveBayesModel, NaiveBayesPrediction, NaiveBayesTagger};
pub use nmf::{NmfModel, NmfTagger};
pub use vectorizer::{tokenize, TfIdfVectorizer, Vectorizer, Vocabulary};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::error::PersonalizationError;
use crate::models::Document;

/// Topic -> weight
pub type TagMap = BTreeMap<String, f64>;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ModelError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Nb,
    Nmf,
}

impl ModelFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Nb => "nb",
            ModelFamily::Nmf => "nmf",
        }
    }
}

impl FromStr for ModelFamily {
    type Err = PersonalizationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nb" => Ok(ModelFamily::Nb),
            "nmf" => Ok(ModelFamily::Nmf),
            other => Err(PersonalizationError::InvalidModelFamily(other.to_string())),
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait TextTagger: Send + Sync {
    fn family(&self) -> ModelFamily;

    fn tag_tokens(&self, tokens: &[String]) -> TagMap;

    fn tag(&self, document: &Document) -> TagMap {
        self.tag_tokens(&tokenize(&document.text()))
    }
}

/// A built tagger of either family; cheap to clone.
#[derive(Debug, Clone)]
pub enum Tagger {
    NaiveBayes(Arc<NaiveBayesTagger>),
    Nmf(Arc<NmfTagger>),
}

impl Tagger {
    pub fn as_naive_bayes(&self) -> Option<&Arc<NaiveBayesTagger>> {
        match self {
            Tagger::NaiveBayes(tagger) => Some(tagger),
            Tagger::Nmf(_) => None,
        }
    }

    pub fn as_nmf(&self) -> Option<&Arc<NmfTagger>> {
        match self {
            Tagger::Nmf(tagger) => Some(tagger),
            Tagger::NaiveBayes(_) => None,
        }
    }
}

impl TextTagger for Tagger {
    fn family(&self) -> ModelFamily {
        match self {
            Tagger::NaiveBayes(tagger) => tagger.family(),
            Tagger::Nmf(tagger) => tagger.family(),
        }
    }

    fn tag_tokens(&self, tokens: &[String]) -> TagMap {
        match self {
            Tagger::NaiveBayes(tagger) => tagger.tag_tokens(tokens),
            Tagger::Nmf(tagger) => tagger.tag_tokens(tokens),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_models {
    use serde_json::{json, Value};

    pub fn naive_bayes_sports() -> Value {
        let log_half = 0.5f64.ln();
        json!({
            "vocab_idfs": {
                "football": [0, 1.5],
                "goal": [1, 1.2],
                "recipe": [2, 1.5],
                "oven": [3, 1.2]
            },
            "classes": [
                {
                    "label": "sports",
                    "log_prior": log_half,
                    "feature_log_probs": [-0.5, -0.7, -6.0, -6.0]
                },
                {
                    "label": "food",
                    "log_prior": log_half,
                    "feature_log_probs": [-6.0, -6.0, -0.5, -0.7]
                }
            ],
            "confidence_threshold": 0.6
        })
    }

    pub fn nmf_sports() -> Value {
        json!({
            "vocab_idfs": {
                "football": [0, 1.0],
                "racket": [1, 1.0]
            },
            "topic_word": [[1.0, 0.0], [0.0, 1.0]],
            "document_topic": {
                "soccer": [0.9, 0.1],
                "tennis": [0.1, 0.9]
            }
        })
    }
}
