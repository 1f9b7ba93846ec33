use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PersonalizationError;

pub mod settings;

pub use settings::{
    Parameter, ParameterSet, ParameterSets, PersonalizationSettings, ScoringContext, TimeSegment,
    TimeSegmentTable,
};

/// Record flowing through recipe steps.
///
/// Items are opaque to the engine: a step may add, rewrite or drop any field.
/// The only fields the engine itself reads are `type` and `score`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(Map<String, Value>);

impl Item {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.0.get_mut(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn score(&self) -> Option<f64> {
        self.get("score").and_then(Value::as_f64)
    }

    pub fn item_type(&self) -> Option<&str> {
        self.get("type").and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    /// Copy every field of `other` onto this item, replacing existing values.
    pub fn overlay(&mut self, other: &Item) {
        for (key, value) in other.fields() {
            self.0.insert(key.clone(), value.clone());
        }
    }
}

impl From<Map<String, Value>> for Item {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl TryFrom<Value> for Item {
    type Error = PersonalizationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(PersonalizationError::Serialization(format!(
                "item must be a JSON object, got {}",
                other
            ))),
        }
    }
}

/// One visited page as reported by the history collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub frecency: f64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub visit_timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Pipeline representation; the visit time becomes unix seconds.
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert("title", self.title.clone());
        item.insert("description", self.description.clone());
        item.insert("url", self.url.clone());
        item.insert("frecency", self.frecency);
        item.insert("visit_timestamp", self.visit_timestamp.timestamp());
        item
    }

    /// Whether a field named in a recipe's `history_required_fields` carries data.
    pub fn has_field(&self, field: &str) -> bool {
        match field {
            "title" => !self.title.trim().is_empty(),
            "description" => !self.description.trim().is_empty(),
            "url" => !self.url.trim().is_empty(),
            "frecency" => self.frecency.is_finite(),
            "visit_timestamp" => true,
            _ => false,
        }
    }
}

/// Free text handed to a tagger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub description: String,
}

impl Document {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// Finalized aggregate of a user's history.
///
/// Never mutated after construction; a rebuild produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterestVector(Item);

impl InterestVector {
    pub const TYPE: &'static str = "interest_vector";

    pub fn from_item(item: Item) -> Self {
        Self(item)
    }

    pub fn score(&self) -> Option<f64> {
        self.0.score()
    }

    pub fn as_item(&self) -> &Item {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_history_entry_to_item() {
        let entry = HistoryEntry {
            title: "automotive".to_string(),
            description: "something about automotive".to_string(),
            url: "http://example.com/automotive".to_string(),
            frecency: 10.0,
            visit_timestamp: Utc.timestamp_opt(1_600_000_000, 0).unwrap(),
        };

        let item = entry.to_item();
        assert_eq!(item.get("title"), Some(&json!("automotive")));
        assert_eq!(item.get("frecency").and_then(Value::as_f64), Some(10.0));
        assert_eq!(item.get("visit_timestamp"), Some(&json!(1_600_000_000)));
    }

    #[test]
    fn test_item_rejects_non_objects() {
        assert!(Item::try_from(json!([1, 2, 3])).is_err());
        let item = Item::try_from(json!({"score": 2, "type": "item_to_rank"})).unwrap();
        assert_eq!(item.score(), Some(2.0));
        assert_eq!(item.item_type(), Some("item_to_rank"));
    }

    #[test]
    fn test_overlay_replaces_fields() {
        let mut base = Item::try_from(json!({"score": 10, "tags": {"a": 1}})).unwrap();
        let top = Item::try_from(json!({"item_score": 2, "tags": {"b": 1}})).unwrap();

        base.overlay(&top);

        assert_eq!(base.score(), Some(10.0));
        assert_eq!(base.get("item_score"), Some(&json!(2)));
        assert_eq!(base.get("tags"), Some(&json!({"b": 1})));
    }

    #[test]
    fn test_required_fields() {
        let entry = HistoryEntry {
            title: "  ".to_string(),
            description: "body".to_string(),
            url: String::new(),
            frecency: 1.0,
            visit_timestamp: Utc::now(),
        };

        assert!(!entry.has_field("title"));
        assert!(entry.has_field("description"));
        assert!(!entry.has_field("url"));
        assert!(!entry.has_field("favicon"));
    }
}
