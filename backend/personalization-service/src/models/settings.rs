// ============================================
// Scoring settings (時間分段 + 參數集)
// ============================================
//
// Time segments bucket "seconds since visit" into recency weights.
// Parameter sets bundle the coefficients recipes reach through
// `{"parameter": "<name>"}` operands.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{PersonalizationError, Result};

/// Recency bucket covering ages `start <= age < end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSegment {
    pub id: String,
    /// `None` means "now"
    #[serde(default)]
    pub start_offset_seconds: Option<u64>,
    /// `None` means the unbounded past
    #[serde(default)]
    pub end_offset_seconds: Option<u64>,
    pub weight: f64,
}

impl TimeSegment {
    pub fn new(id: &str, start: Option<u64>, end: Option<u64>, weight: f64) -> Self {
        Self {
            id: id.to_string(),
            start_offset_seconds: start,
            end_offset_seconds: end,
            weight,
        }
    }

    fn start(&self) -> u64 {
        self.start_offset_seconds.unwrap_or(0)
    }

    pub fn contains(&self, age_secs: i64) -> bool {
        if age_secs < 0 {
            return false;
        }
        let age = age_secs as u64;
        age >= self.start() && self.end_offset_seconds.map_or(true, |end| age < end)
    }
}

/// Validated, gap-free partition of the time axis, most recent first.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSegmentTable {
    segments: Vec<TimeSegment>,
}

impl TimeSegmentTable {
    pub fn new(segments: Vec<TimeSegment>) -> Result<Self> {
        let invalid = |reason: String| Err(PersonalizationError::InvalidTimeSegments(reason));

        let Some(first) = segments.first() else {
            return invalid("at least one segment is required".to_string());
        };
        if first.start() != 0 {
            return invalid(format!("first segment '{}' must start now", first.id));
        }

        for (index, segment) in segments.iter().enumerate() {
            if !segment.weight.is_finite() {
                return invalid(format!("segment '{}' has a non-finite weight", segment.id));
            }

            let is_last = index + 1 == segments.len();
            match segment.end_offset_seconds {
                None if !is_last => {
                    return invalid(format!(
                        "segment '{}' is unbounded but is not the oldest",
                        segment.id
                    ));
                }
                Some(_) if is_last => {
                    return invalid(format!(
                        "oldest segment '{}' must be unbounded",
                        segment.id
                    ));
                }
                Some(end) if end <= segment.start() => {
                    return invalid(format!("segment '{}' ends before it starts", segment.id));
                }
                _ => {}
            }

            if let Some(previous) = index.checked_sub(1).map(|i| &segments[i]) {
                if previous.end_offset_seconds != Some(segment.start()) {
                    return invalid(format!(
                        "segment '{}' does not start where '{}' ends",
                        segment.id, previous.id
                    ));
                }
                if segment.weight > previous.weight {
                    return invalid(format!(
                        "segment '{}' weighs more than the more recent '{}'",
                        segment.id, previous.id
                    ));
                }
            }
        }

        Ok(Self { segments })
    }

    pub fn segment_for(&self, age_secs: i64) -> Option<&TimeSegment> {
        self.segments.iter().find(|s| s.contains(age_secs))
    }

    pub fn segments(&self) -> &[TimeSegment] {
        &self.segments
    }
}

impl Default for TimeSegmentTable {
    fn default() -> Self {
        Self {
            segments: default_time_segments(),
        }
    }
}

pub fn default_time_segments() -> Vec<TimeSegment> {
    vec![
        TimeSegment::new("hour", None, Some(3_600), 1.0),
        TimeSegment::new("day", Some(3_600), Some(86_400), 0.75),
        TimeSegment::new("week", Some(86_400), Some(604_800), 0.5),
        TimeSegment::new("weekPlus", Some(604_800), None, 0.25),
    ]
}

/// Coefficient names addressable from recipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Parameter {
    RecencyFactor,
    FrequencyFactor,
    CombinedDomainFactor,
    PerfectFrequencyVisits,
    PerfectCombinedDomainScore,
    MultiDomainBoost,
    ItemScoreFactor,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSet {
    pub recency_factor: f64,
    pub frequency_factor: f64,
    pub combined_domain_factor: f64,
    pub perfect_frequency_visits: f64,
    pub perfect_combined_domain_score: f64,
    pub multi_domain_boost: f64,
    pub item_score_factor: f64,
}

impl ParameterSet {
    pub fn value(&self, parameter: Parameter) -> f64 {
        match parameter {
            Parameter::RecencyFactor => self.recency_factor,
            Parameter::FrequencyFactor => self.frequency_factor,
            Parameter::CombinedDomainFactor => self.combined_domain_factor,
            Parameter::PerfectFrequencyVisits => self.perfect_frequency_visits,
            Parameter::PerfectCombinedDomainScore => self.perfect_combined_domain_score,
            Parameter::MultiDomainBoost => self.multi_domain_boost,
            Parameter::ItemScoreFactor => self.item_score_factor,
        }
    }
}

/// Named parameter sets; one of them is active per provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSets(HashMap<String, ParameterSet>);

impl ParameterSets {
    pub fn new(sets: HashMap<String, ParameterSet>) -> Self {
        Self(sets)
    }

    pub fn select(&self, name: &str) -> Result<ParameterSet> {
        self.0
            .get(name)
            .copied()
            .ok_or_else(|| PersonalizationError::UnknownParameterSet(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.0.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ParameterSets {
    fn default() -> Self {
        let mut sets = HashMap::new();
        sets.insert(
            "paramSet1".to_string(),
            ParameterSet {
                recency_factor: 0.5,
                frequency_factor: 0.5,
                combined_domain_factor: 0.5,
                perfect_frequency_visits: 10.0,
                perfect_combined_domain_score: 2.0,
                multi_domain_boost: 0.1,
                item_score_factor: 0.0,
            },
        );
        sets.insert(
            "paramSet2".to_string(),
            ParameterSet {
                recency_factor: 1.0,
                frequency_factor: 0.7,
                combined_domain_factor: 0.8,
                perfect_frequency_visits: 10.0,
                perfect_combined_domain_score: 2.0,
                multi_domain_boost: 0.1,
                item_score_factor: 0.0,
            },
        );
        Self(sets)
    }
}

/// Time segments, parameter sets and the name of the active set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizationSettings {
    #[serde(default = "default_time_segments")]
    pub time_segments: Vec<TimeSegment>,
    #[serde(default)]
    pub parameter_sets: ParameterSets,
    #[serde(default = "default_parameter_set")]
    pub parameter_set: String,
}

fn default_parameter_set() -> String {
    "paramSet1".to_string()
}

impl Default for PersonalizationSettings {
    fn default() -> Self {
        Self {
            time_segments: default_time_segments(),
            parameter_sets: ParameterSets::default(),
            parameter_set: default_parameter_set(),
        }
    }
}

/// Everything a recipe step may read besides the item itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringContext {
    pub time_segments: TimeSegmentTable,
    pub parameter_set: String,
    pub parameters: ParameterSet,
}

impl ScoringContext {
    pub fn new(
        time_segments: TimeSegmentTable,
        parameter_sets: &ParameterSets,
        parameter_set: &str,
    ) -> Result<Self> {
        Ok(Self {
            time_segments,
            parameter_set: parameter_set.to_string(),
            parameters: parameter_sets.select(parameter_set)?,
        })
    }
}
