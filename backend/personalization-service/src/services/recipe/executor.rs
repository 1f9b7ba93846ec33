// ============================================
// Recipe Executor (配方執行器)
// ============================================
//
// Default RecipeStrategy. Interprets the operation lists of a Recipe
// against JSON items, with access to the per-topic taggers and the active
// ScoringContext. An operation that cannot apply returns None and the
// whole step fails with that operation's name.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

use super::{
    CollectOperation, CombinerOperation, Comparison, Operation, Recipe, RecipeStrategy, Step,
    StepError,
};
use crate::models::{Item, ScoringContext};
use crate::services::tagging::{tokenize, TagMap, Tagger, TextTagger};
use crate::utils::{l2_norm, softmax};

pub struct RecipeExecutor {
    recipe: Arc<Recipe>,
    context: ScoringContext,
    nb_taggers: BTreeMap<String, Tagger>,
    nmf_taggers: BTreeMap<String, Tagger>,
    /// Fixed clock for time segment lookups; wall clock when unset
    now: Option<DateTime<Utc>>,
}

impl RecipeExecutor {
    pub fn new(recipe: Arc<Recipe>, context: ScoringContext) -> Self {
        Self {
            recipe,
            context,
            nb_taggers: BTreeMap::new(),
            nmf_taggers: BTreeMap::new(),
            now: None,
        }
    }

    /// Register the nb and nmf taggers of one topic.
    pub fn with_taggers(mut self, topic: &str, nb: Tagger, nmf: Tagger) -> Self {
        self.nb_taggers.insert(topic.to_string(), nb);
        self.nmf_taggers.insert(topic.to_string(), nmf);
        self
    }

    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn context(&self) -> &ScoringContext {
        &self.context
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.nb_taggers.keys().map(String::as_str)
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    fn run(&self, operation: &Operation, mut item: Item) -> Option<Item> {
        match operation {
            Operation::NbTag { fields } => {
                let text = fields
                    .iter()
                    .filter_map(|field| item.get(field).and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join(" ");
                let tokens = tokenize(&text);

                let mut tags = TagMap::new();
                for tagger in self.nb_taggers.values() {
                    tags.extend(tagger.tag_tokens(&tokens));
                }
                item.insert("nb_tags", tags_to_value(tags));
                item.insert("nb_tokens", tokens);
            }
            Operation::ConditionallyNmfTag => {
                let tokens: Vec<String> = item
                    .get("nb_tokens")?
                    .as_array()?
                    .iter()
                    .filter_map(|token| token.as_str().map(str::to_string))
                    .collect();
                let parents: Vec<String> = item.get("nb_tags")?.as_object()?.keys().cloned().collect();

                let mut nmf_tags = Map::new();
                let mut nmf_parents = Map::new();
                for parent in parents {
                    if let Some(tagger) = self.nmf_taggers.get(&parent) {
                        let tags = tagger.tag_tokens(&tokens);
                        for subtopic in tags.keys() {
                            nmf_parents.insert(subtopic.clone(), json!(parent));
                        }
                        nmf_tags.insert(parent, tags_to_value(tags));
                    }
                }
                item.insert("nmf_tags", nmf_tags);
                item.insert("nmf_tags_parent", nmf_parents);
            }
            Operation::AcceptItemByFieldValue { field, op, rhs } => {
                let lhs = item.get(field).unwrap_or(&Value::Null);
                if !compare(lhs, *op, rhs) {
                    return None;
                }
            }
            Operation::TokenizeUrl { field, dest } => {
                let url = item.get(field).and_then(Value::as_str)?;
                let (host, segments) = split_url(url)?;
                let tokens = tokenize(&format!("{} {}", host, segments.join(" ")));
                item.insert(dest.as_str(), tokens);
            }
            Operation::GetUrlDomain {
                field,
                dest,
                path_length,
            } => {
                let url = item.get(field).and_then(Value::as_str)?;
                let (mut domain, segments) = split_url(url)?;
                for segment in segments.iter().take(*path_length) {
                    domain.push('/');
                    domain.push_str(segment);
                }
                item.insert(dest.as_str(), domain);
            }
            Operation::TokenizeField { field, dest } => {
                let tokens = tokenize(item.get(field).and_then(Value::as_str)?);
                item.insert(dest.as_str(), tokens);
            }
            Operation::CopyValue { src, dest } => {
                let value = item.get(src)?.clone();
                item.insert(dest.as_str(), value);
            }
            Operation::KeepTopK {
                field,
                k,
                threshold,
            } => {
                let mut entries = number_entries(item.get(field)?)?;
                entries.retain(|(_, value)| threshold.map_or(true, |t| *value >= t));
                entries.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| a.0.cmp(&b.0))
                });
                entries.truncate(*k);
                item.insert(field.as_str(), entries_to_value(entries));
            }
            Operation::ScalarMultiply { field, k } => {
                let k = k.resolve(&item, &self.context)?;
                map_numbers(item.get_mut(field)?, |x| x * k)?;
            }
            Operation::ElementwiseMultiply { left, right } => {
                let factors = item.get(right)?.as_object()?.clone();
                let target = item.get_mut(left)?.as_object_mut()?;
                for (key, value) in target.iter_mut() {
                    let factor = match factors.get(key) {
                        Some(factor) => factor.as_f64()?,
                        None => 0.0,
                    };
                    *value = finite(value.as_f64()? * factor)?;
                }
            }
            Operation::VectorMultiply { left, right, dest } => {
                let l = item.get(left)?.as_object()?;
                let r = item.get(right)?.as_object()?;
                let mut product = 0.0;
                for (key, value) in l {
                    if let Some(other) = r.get(key) {
                        product += value.as_f64()? * other.as_f64()?;
                    }
                }
                item.insert(dest.as_str(), finite(product)?);
            }
            Operation::ScalarAdd { field, k } => {
                let k = k.resolve(&item, &self.context)?;
                map_numbers(item.get_mut(field)?, |x| x + k)?;
            }
            Operation::VectorAdd { left, right } => {
                let addend = number_entries(item.get(right)?)?;
                let target = map_field(&mut item, left)?;
                for (key, value) in addend {
                    let current = match target.get(&key) {
                        Some(current) => current.as_f64()?,
                        None => 0.0,
                    };
                    target.insert(key, finite(current + value)?);
                }
            }
            Operation::MakeBoolean { field, threshold } => {
                let threshold = *threshold;
                map_numbers(item.get_mut(field)?, |x| if x > threshold { 1.0 } else { 0.0 })?;
            }
            Operation::AllowFields { fields } => {
                let dropped: Vec<String> = item
                    .fields()
                    .keys()
                    .filter(|key| !fields.contains(key))
                    .cloned()
                    .collect();
                for key in dropped {
                    item.remove(&key);
                }
            }
            Operation::FilterByValue { field, threshold } => {
                let map = item.get_mut(field)?.as_object_mut()?;
                let dropped: Vec<String> = map
                    .iter()
                    .filter(|(_, value)| value.as_f64().map_or(true, |x| x < *threshold))
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in dropped {
                    map.remove(&key);
                }
            }
            Operation::L2Normalize { field } => {
                let entries = number_entries(item.get(field)?)?;
                let norm = l2_norm(entries.iter().map(|(_, value)| *value));
                if norm > 0.0 {
                    map_numbers(item.get_mut(field)?, |x| x / norm)?;
                }
            }
            Operation::ProbNormalize { field } => {
                let entries = number_entries(item.get(field)?)?;
                let total: f64 = entries.iter().map(|(_, value)| value).sum();
                if total > 0.0 {
                    map_numbers(item.get_mut(field)?, |x| x / total)?;
                }
            }
            Operation::SetDefault { field, value } => {
                if !item.contains(field) {
                    item.insert(field.as_str(), value.clone());
                }
            }
            Operation::LookupValue {
                haystack,
                needle,
                dest,
            } => {
                let key = key_string(item.get(needle)?);
                let found = item
                    .get(haystack)?
                    .as_object()?
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| json!(0));
                item.insert(dest.as_str(), found);
            }
            Operation::CopyToMap { src, dest_map, key } => {
                let value = item.get(src)?.clone();
                map_field(&mut item, dest_map)?.insert(key.clone(), value);
            }
            Operation::ScalarMultiplyTag { field, tag, k } => {
                let k = k.resolve(&item, &self.context)?;
                let tags = item.get_mut(field)?.as_object_mut()?;
                if let Some(value) = tags.get_mut(tag) {
                    *value = finite(value.as_f64()? * k)?;
                }
            }
            Operation::ApplySoftmaxTags { field } => {
                let map = item.get_mut(field)?.as_object_mut()?;
                if map.values().all(Value::is_number) {
                    softmax_map(map)?;
                } else {
                    for inner in map.values_mut() {
                        softmax_map(inner.as_object_mut()?)?;
                    }
                }
            }
            Operation::TimeSegmentWeight { field, dest } => {
                let visited = item.get(field).and_then(Value::as_f64)? as i64;
                let age = self.now().timestamp() - visited;
                let weight = self.context.time_segments.segment_for(age)?.weight;
                item.insert(dest.as_str(), weight);
            }
            Operation::CopyParameter { parameter, dest } => {
                item.insert(dest.as_str(), self.context.parameters.value(*parameter));
            }
        }

        Some(item)
    }

    fn combine(&self, operation: &CombinerOperation, mut left: Item, right: &Item) -> Option<Item> {
        match operation {
            CombinerOperation::CombinerAdd { field } => {
                merge_field(&mut left, right, field, &|a, b| a + b)?;
            }
            CombinerOperation::CombinerMax { field } => {
                merge_field(&mut left, right, field, &f64::max)?;
            }
            CombinerOperation::CombinerCollectValues {
                left_field,
                right_key_field,
                right_value_field,
                operation,
            } => {
                let key = key_string(right.get(right_key_field)?);
                let value = right.get(right_value_field).and_then(Value::as_f64)?;

                let target = map_field(&mut left, left_field)?;
                let current = match target.get(&key) {
                    Some(current) => Some(current.as_f64()?),
                    None => None,
                };
                let updated = match operation {
                    CollectOperation::Sum => current.unwrap_or(0.0) + value,
                    CollectOperation::Max => current.map_or(value, |c| c.max(value)),
                    CollectOperation::Overwrite => value,
                    CollectOperation::Count => current.unwrap_or(0.0) + 1.0,
                };
                target.insert(key, finite(updated)?);
            }
        }

        Some(left)
    }
}

impl RecipeStrategy for RecipeExecutor {
    fn apply(&self, step: Step, item: Item) -> Result<Item, StepError> {
        let operations = self
            .recipe
            .operations(step)
            .ok_or_else(|| StepError::undefined(step))?;

        operations.iter().try_fold(item, |item, operation| {
            self.run(operation, item)
                .ok_or_else(|| StepError::rejected(step, operation.name()))
        })
    }

    fn apply_pair(&self, step: Step, left: Item, right: Item) -> Result<Item, StepError> {
        let operations = self
            .recipe
            .combiner_operations()
            .ok_or_else(|| StepError::undefined(step))?;

        operations.iter().try_fold(left, |acc, operation| {
            self.combine(operation, acc, &right)
                .ok_or_else(|| StepError::rejected(step, operation.name()))
        })
    }
}

fn tags_to_value(tags: TagMap) -> Value {
    Value::Object(tags.into_iter().map(|(tag, weight)| (tag, json!(weight))).collect())
}

fn entries_to_value(entries: Vec<(String, f64)>) -> Value {
    Value::Object(entries.into_iter().map(|(key, value)| (key, json!(value))).collect())
}

/// Entries of a map whose values are all numbers.
fn number_entries(value: &Value) -> Option<Vec<(String, f64)>> {
    value
        .as_object()?
        .iter()
        .map(|(key, value)| value.as_f64().map(|x| (key.clone(), x)))
        .collect()
}

/// JSON number for `x`; `None` for NaN and infinities, which JSON cannot hold.
fn finite(x: f64) -> Option<Value> {
    x.is_finite().then(|| json!(x))
}

/// Apply `f` to a number, or to every value of a map of numbers.
fn map_numbers(value: &mut Value, f: impl Fn(f64) -> f64) -> Option<()> {
    if let Some(x) = value.as_f64() {
        *value = finite(f(x))?;
        return Some(());
    }
    for entry in value.as_object_mut()?.values_mut() {
        let x = entry.as_f64()?;
        *entry = finite(f(x))?;
    }
    Some(())
}

/// Map stored under `field`, created empty when absent.
fn map_field<'a>(item: &'a mut Item, field: &str) -> Option<&'a mut Map<String, Value>> {
    item.fields_mut()
        .entry(field)
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
}

fn softmax_map(map: &mut Map<String, Value>) -> Option<()> {
    let values = map
        .values()
        .map(Value::as_f64)
        .collect::<Option<Vec<f64>>>()?;
    for (entry, probability) in map.values_mut().zip(softmax(&values)) {
        *entry = json!(probability);
    }
    Some(())
}

fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn merge_field(
    left: &mut Item,
    right: &Item,
    field: &str,
    f: &dyn Fn(f64, f64) -> f64,
) -> Option<()> {
    let merged = match (left.get(field), right.get(field)) {
        (None, None) => return None,
        (Some(value), None) | (None, Some(value)) => value.clone(),
        (Some(l), Some(r)) => merge_values(l, r, f)?,
    };
    left.insert(field, merged);
    Some(())
}

/// Combine two numbers, or two maps key by key (recursively).
fn merge_values(left: &Value, right: &Value, f: &dyn Fn(f64, f64) -> f64) -> Option<Value> {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return finite(f(l, r));
    }

    let (l, r) = (left.as_object()?, right.as_object()?);
    let mut merged = l.clone();
    for (key, value) in r {
        let combined = match l.get(key) {
            Some(existing) => merge_values(existing, value, f)?,
            None => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    Some(Value::Object(merged))
}

fn compare(lhs: &Value, op: Comparison, rhs: &Value) -> bool {
    let ordering = match (lhs.as_f64(), rhs.as_f64()) {
        (Some(l), Some(r)) => l.partial_cmp(&r),
        _ => match (lhs.as_str(), rhs.as_str()) {
            (Some(l), Some(r)) => Some(l.cmp(r)),
            _ => None,
        },
    };

    match (op, ordering) {
        (Comparison::Eq, Some(o)) => o == Ordering::Equal,
        (Comparison::Eq, None) => lhs == rhs,
        (Comparison::Ne, Some(o)) => o != Ordering::Equal,
        (Comparison::Ne, None) => lhs != rhs,
        (Comparison::Lt, Some(o)) => o == Ordering::Less,
        (Comparison::Le, Some(o)) => o != Ordering::Greater,
        (Comparison::Gt, Some(o)) => o == Ordering::Greater,
        (Comparison::Ge, Some(o)) => o != Ordering::Less,
        (_, None) => false,
    }
}

/// Host (without `www.`) and non-empty path segments of an absolute URL.
/// URLs without a host, such as `mailto:`, are rejected.
fn split_url(raw: &str) -> Option<(String, Vec<String>)> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    if host.is_empty() {
        return None;
    }

    let segments = url
        .path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some((host.to_string(), segments))
}
