use std::collections::{BTreeMap, HashMap};

use crate::models::Document;
use crate::utils::l2_norm;

/// Token -> (term id, inverse document frequency), as shipped inside model blobs.
pub type Vocabulary = HashMap<String, (usize, f64)>;

/// Sparse document vector: (term id, weight), ordered by term id.
pub type SparseVector = Vec<(usize, f64)>;

/// Lowercase the text and split it on anything that is not a letter or digit.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Turns token streams into weighted term vectors.
pub trait Vectorizer: Send + Sync {
    fn vectorize(&self, tokens: &[String]) -> SparseVector;

    fn vectorize_document(&self, document: &Document) -> SparseVector {
        self.vectorize(&tokenize(&document.text()))
    }
}

/// L2-normalized tf-idf over a fixed vocabulary.
#[derive(Debug, Clone, Default)]
pub struct TfIdfVectorizer {
    vocabulary: Vocabulary,
}

impl TfIdfVectorizer {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self { vocabulary }
    }

    /// Highest term id in the vocabulary, if any.
    pub fn max_term_id(&self) -> Option<usize> {
        self.vocabulary.values().map(|(id, _)| *id).max()
    }
}

impl Vectorizer for TfIdfVectorizer {
    fn vectorize(&self, tokens: &[String]) -> SparseVector {
        let mut term_counts: BTreeMap<usize, (f64, f64)> = BTreeMap::new();
        for token in tokens {
            if let Some(&(term_id, idf)) = self.vocabulary.get(token) {
                term_counts.entry(term_id).or_insert((0.0, idf)).0 += 1.0;
            }
        }

        let mut vector: SparseVector = term_counts
            .into_iter()
            .map(|(term_id, (tf, idf))| (term_id, tf * idf))
            .collect();

        let norm = l2_norm(vector.iter().map(|(_, w)| *w));
        if norm > 0.0 {
            for (_, weight) in vector.iter_mut() {
                *weight /= norm;
            }
        }

        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocabulary() -> Vocabulary {
        let mut vocab = HashMap::new();
        vocab.insert("car".to_string(), (0, 2.0));
        vocab.insert("engine".to_string(), (1, 1.0));
        vocab
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Fast CARS, new-engine!  2024"),
            vec!["fast", "cars", "new", "engine", "2024"]
        );
        assert!(tokenize("  ,,; ").is_empty());
    }

    #[test]
    fn test_tfidf_is_normalized() {
        let vectorizer = TfIdfVectorizer::new(vocabulary());
        let tokens = tokenize("car car engine unknown");

        let vector = vectorizer.vectorize(&tokens);

        // tf-idf: car = 2 * 2.0 = 4, engine = 1 * 1.0 = 1, norm = sqrt(17)
        assert_eq!(vector.len(), 2);
        assert_eq!(vector[0].0, 0);
        assert!((vector[0].1 - 4.0 / 17f64.sqrt()).abs() < 1e-12);
        assert!((vector[1].1 - 1.0 / 17f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_vocabulary_document() {
        let vectorizer = TfIdfVectorizer::new(vocabulary());
        let document = Document::new("fashion", "something about fashion");

        assert!(vectorizer.vectorize_document(&document).is_empty());
        assert_eq!(vectorizer.max_term_id(), Some(1));
    }
}
