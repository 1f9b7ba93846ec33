use serde::{Deserialize, Serialize};

use super::vectorizer::{TfIdfVectorizer, Vectorizer, Vocabulary};
use super::{ModelError, ModelFamily, TagMap, TextTagger};
use crate::utils::log_sum_exp;

fn default_confidence_threshold() -> f64 {
    0.5
}

/// Multinomial naive Bayes over tf-idf features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaiveBayesModel {
    pub vocab_idfs: Vocabulary,
    pub classes: Vec<NaiveBayesClass>,
    /// Minimum posterior probability for a confident label
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaiveBayesClass {
    pub label: String,
    pub log_prior: f64,
    pub feature_log_probs: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NaiveBayesPrediction {
    pub label: Option<String>,
    /// Log posterior of the best class
    pub log_prob: f64,
    pub confident: bool,
}

impl NaiveBayesPrediction {
    pub fn probability(&self) -> f64 {
        self.log_prob.exp()
    }
}

#[derive(Debug, Clone)]
pub struct NaiveBayesTagger {
    vectorizer: TfIdfVectorizer,
    classes: Vec<NaiveBayesClass>,
    confidence_threshold: f64,
}

impl NaiveBayesTagger {
    pub fn new(model: NaiveBayesModel) -> Result<Self, ModelError> {
        if model.classes.is_empty() {
            return Err(ModelError("naive Bayes model has no classes".to_string()));
        }

        let vectorizer = TfIdfVectorizer::new(model.vocab_idfs);
        if let Some(max_term) = vectorizer.max_term_id() {
            if let Some(class) = model
                .classes
                .iter()
                .find(|c| c.feature_log_probs.len() <= max_term)
            {
                return Err(ModelError(format!(
                    "class '{}' has {} feature probabilities but the vocabulary reaches term {}",
                    class.label,
                    class.feature_log_probs.len(),
                    max_term
                )));
            }
        }

        Ok(Self {
            vectorizer,
            classes: model.classes,
            confidence_threshold: model.confidence_threshold,
        })
    }

    pub fn classify(&self, tokens: &[String]) -> NaiveBayesPrediction {
        let features = self.vectorizer.vectorize(tokens);

        let class_log_probs: Vec<f64> = self
            .classes
            .iter()
            .map(|class| {
                class.log_prior
                    + features
                        .iter()
                        .map(|(term_id, tfidf)| tfidf * class.feature_log_probs[*term_id])
                        .sum::<f64>()
            })
            .collect();

        let best = class_log_probs
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (index, &log_prob)| match best {
                Some((_, best_log_prob)) if best_log_prob >= log_prob => best,
                _ => Some((index, log_prob)),
            });

        match best {
            Some((index, log_prob)) => {
                let log_prob = log_prob - log_sum_exp(&class_log_probs);
                NaiveBayesPrediction {
                    label: Some(self.classes[index].label.clone()),
                    log_prob,
                    confident: log_prob.exp() >= self.confidence_threshold,
                }
            }
            None => NaiveBayesPrediction {
                label: None,
                log_prob: f64::NEG_INFINITY,
                confident: false,
            },
        }
    }
}

impl TextTagger for NaiveBayesTagger {
    fn family(&self) -> ModelFamily {
        ModelFamily::Nb
    }

    fn tag_tokens(&self, tokens: &[String]) -> TagMap {
        let prediction = self.classify(tokens);
        let mut tags = TagMap::new();
        if let (true, Some(label)) = (prediction.confident, prediction.label.as_ref()) {
            tags.insert(label.clone(), prediction.probability());
        }
        tags
    }
}
