// ============================================
// Recipe Pipeline (配方管線)
// ============================================
//
// A recipe names five steps. Each step is a list of operations applied to
// an Item in order; the arithmetic lives entirely in the recipe data and in
// the RecipeStrategy that interprets it. The pipeline only dispatches and
// propagates failure.

pub mod executor;
pub mod source;

pub use executor::RecipeExecutor;
pub use source::{RecipeSource, RECIPE_KEY};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::error::{PersonalizationError, Result};
use crate::models::{Item, Parameter, ScoringContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    HistoryItemBuilder,
    InterestFinalizer,
    ItemToRankBuilder,
    ItemRanker,
    InterestCombiner,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::HistoryItemBuilder => "history_item_builder",
            Step::InterestFinalizer => "interest_finalizer",
            Step::ItemToRankBuilder => "item_to_rank_builder",
            Step::ItemRanker => "item_ranker",
            Step::InterestCombiner => "interest_combiner",
        }
    }

    /// Combiner steps merge two items; all others transform one.
    pub fn is_combiner(&self) -> bool {
        matches!(self, Step::InterestCombiner)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The recipe has no definition for the step
    Undefined,
    /// An operation produced no result
    Rejected { operation: String },
    /// Single-item execution of a combiner step, or the reverse
    WrongArity,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Undefined => f.write_str("step is not defined"),
            FailureReason::Rejected { operation } => write!(f, "{} rejected the item", operation),
            FailureReason::WrongArity => f.write_str("wrong number of items"),
        }
    }
}

/// A step could not process its input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{step}: {reason}")]
pub struct StepError {
    pub step: Step,
    pub reason: FailureReason,
}

impl StepError {
    pub fn new(step: Step, reason: FailureReason) -> Self {
        Self { step, reason }
    }

    pub fn undefined(step: Step) -> Self {
        Self::new(step, FailureReason::Undefined)
    }

    pub fn rejected(step: Step, operation: &str) -> Self {
        Self::new(
            step,
            FailureReason::Rejected {
                operation: operation.to_string(),
            },
        )
    }
}

/// Numeric argument of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Number(f64),
    Parameter { parameter: Parameter },
    /// Numeric field of the item being processed
    Field(String),
}

impl Operand {
    pub fn resolve(&self, item: &Item, context: &ScoringContext) -> Option<f64> {
        match self {
            Operand::Number(value) => Some(*value),
            Operand::Parameter { parameter } => Some(context.parameters.value(*parameter)),
            Operand::Field(field) => item.get(field).and_then(Value::as_f64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectOperation {
    Sum,
    Max,
    Overwrite,
    Count,
}

fn default_text_fields() -> Vec<String> {
    vec!["title".to_string(), "description".to_string()]
}

fn default_timestamp_field() -> String {
    "visit_timestamp".to_string()
}

/// Single-item operation, identified by its `function` name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum Operation {
    NbTag {
        #[serde(default = "default_text_fields")]
        fields: Vec<String>,
    },
    ConditionallyNmfTag,
    AcceptItemByFieldValue {
        field: String,
        op: Comparison,
        rhs: Value,
    },
    TokenizeUrl {
        field: String,
        dest: String,
    },
    GetUrlDomain {
        field: String,
        dest: String,
        #[serde(default)]
        path_length: usize,
    },
    TokenizeField {
        field: String,
        dest: String,
    },
    CopyValue {
        src: String,
        dest: String,
    },
    KeepTopK {
        field: String,
        k: usize,
        #[serde(default)]
        threshold: Option<f64>,
    },
    ScalarMultiply {
        field: String,
        k: Operand,
    },
    ElementwiseMultiply {
        left: String,
        right: String,
    },
    VectorMultiply {
        left: String,
        right: String,
        dest: String,
    },
    ScalarAdd {
        field: String,
        k: Operand,
    },
    VectorAdd {
        left: String,
        right: String,
    },
    MakeBoolean {
        field: String,
        #[serde(default)]
        threshold: f64,
    },
    AllowFields {
        fields: Vec<String>,
    },
    FilterByValue {
        field: String,
        threshold: f64,
    },
    L2Normalize {
        field: String,
    },
    ProbNormalize {
        field: String,
    },
    SetDefault {
        field: String,
        value: Value,
    },
    LookupValue {
        haystack: String,
        needle: String,
        dest: String,
    },
    CopyToMap {
        src: String,
        dest_map: String,
        key: String,
    },
    ScalarMultiplyTag {
        field: String,
        tag: String,
        k: Operand,
    },
    ApplySoftmaxTags {
        field: String,
    },
    TimeSegmentWeight {
        #[serde(default = "default_timestamp_field")]
        field: String,
        dest: String,
    },
    CopyParameter {
        parameter: Parameter,
        dest: String,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::NbTag { .. } => "nb_tag",
            Operation::ConditionallyNmfTag => "conditionally_nmf_tag",
            Operation::AcceptItemByFieldValue { .. } => "accept_item_by_field_value",
            Operation::TokenizeUrl { .. } => "tokenize_url",
            Operation::GetUrlDomain { .. } => "get_url_domain",
            Operation::TokenizeField { .. } => "tokenize_field",
            Operation::CopyValue { .. } => "copy_value",
            Operation::KeepTopK { .. } => "keep_top_k",
            Operation::ScalarMultiply { .. } => "scalar_multiply",
            Operation::ElementwiseMultiply { .. } => "elementwise_multiply",
            Operation::VectorMultiply { .. } => "vector_multiply",
            Operation::ScalarAdd { .. } => "scalar_add",
            Operation::VectorAdd { .. } => "vector_add",
            Operation::MakeBoolean { .. } => "make_boolean",
            Operation::AllowFields { .. } => "allow_fields",
            Operation::FilterByValue { .. } => "filter_by_value",
            Operation::L2Normalize { .. } => "l2_normalize",
            Operation::ProbNormalize { .. } => "prob_normalize",
            Operation::SetDefault { .. } => "set_default",
            Operation::LookupValue { .. } => "lookup_value",
            Operation::CopyToMap { .. } => "copy_to_map",
            Operation::ScalarMultiplyTag { .. } => "scalar_multiply_tag",
            Operation::ApplySoftmaxTags { .. } => "apply_softmax_tags",
            Operation::TimeSegmentWeight { .. } => "time_segment_weight",
            Operation::CopyParameter { .. } => "copy_parameter",
        }
    }
}

/// Two-item operation used by the interest combiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum CombinerOperation {
    CombinerAdd {
        field: String,
    },
    CombinerMax {
        field: String,
    },
    CombinerCollectValues {
        left_field: String,
        right_key_field: String,
        right_value_field: String,
        operation: CollectOperation,
    },
}

impl CombinerOperation {
    pub fn name(&self) -> &'static str {
        match self {
            CombinerOperation::CombinerAdd { .. } => "combiner_add",
            CombinerOperation::CombinerMax { .. } => "combiner_max",
            CombinerOperation::CombinerCollectValues { .. } => "combiner_collect_values",
        }
    }
}

/// Active recipe as stored in remote settings.
///
/// Every field is optional: an empty record parses into a recipe whose
/// steps are all undefined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    pub history_item_builder: Option<Vec<Operation>>,
    #[serde(default)]
    pub interest_finalizer: Option<Vec<Operation>>,
    #[serde(default)]
    pub item_to_rank_builder: Option<Vec<Operation>>,
    #[serde(default)]
    pub item_ranker: Option<Vec<Operation>>,
    #[serde(default)]
    pub interest_combiner: Option<Vec<CombinerOperation>>,
    /// Overrides the configured parameter set
    #[serde(default)]
    pub parameter_set: Option<String>,
    /// Topics whose nb/nmf taggers the executor loads
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub history_limit_secs: Option<u64>,
    #[serde(default)]
    pub history_required_fields: Vec<String>,
}

impl Recipe {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| PersonalizationError::InvalidRecipe(e.to_string()))
    }

    /// Operations of a single-item step; `None` for the combiner.
    pub fn operations(&self, step: Step) -> Option<&[Operation]> {
        match step {
            Step::HistoryItemBuilder => self.history_item_builder.as_deref(),
            Step::InterestFinalizer => self.interest_finalizer.as_deref(),
            Step::ItemToRankBuilder => self.item_to_rank_builder.as_deref(),
            Step::ItemRanker => self.item_ranker.as_deref(),
            Step::InterestCombiner => None,
        }
    }

    pub fn combiner_operations(&self) -> Option<&[CombinerOperation]> {
        self.interest_combiner.as_deref()
    }
}

/// Interprets recipe steps.
///
/// Implementations must be pure: the same inputs give the same output and
/// nothing shared is touched.
pub trait RecipeStrategy: Send + Sync {
    fn apply(&self, step: Step, item: Item) -> std::result::Result<Item, StepError>;

    fn apply_pair(
        &self,
        step: Step,
        left: Item,
        right: Item,
    ) -> std::result::Result<Item, StepError>;
}

/// A recipe bound to the strategy that runs it.
#[derive(Clone)]
pub struct Pipeline {
    recipe: Arc<Recipe>,
    strategy: Arc<dyn RecipeStrategy>,
}

impl Pipeline {
    pub fn new(recipe: Arc<Recipe>, strategy: Arc<dyn RecipeStrategy>) -> Self {
        Self { recipe, strategy }
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    pub fn execute_step(&self, item: Item, step: Step) -> std::result::Result<Item, StepError> {
        if step.is_combiner() {
            return Err(StepError::new(step, FailureReason::WrongArity));
        }
        self.strategy.apply(step, item)
    }

    pub fn execute_combiner_step(
        &self,
        left: Item,
        right: Item,
        step: Step,
    ) -> std::result::Result<Item, StepError> {
        if !step.is_combiner() {
            return Err(StepError::new(step, FailureReason::WrongArity));
        }
        self.strategy.apply_pair(step, left, right)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("recipe", &self.recipe)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl RecipeStrategy for Echo {
        fn apply(&self, _step: Step, item: Item) -> std::result::Result<Item, StepError> {
            Ok(item)
        }

        fn apply_pair(
            &self,
            _step: Step,
            left: Item,
            _right: Item,
        ) -> std::result::Result<Item, StepError> {
            Ok(left)
        }
    }

    #[test]
    fn test_empty_record_is_a_valid_recipe() {
        let recipe = Recipe::from_value(json!({})).unwrap();
        assert_eq!(recipe, Recipe::default());
        assert!(recipe.operations(Step::HistoryItemBuilder).is_none());
        assert!(recipe.combiner_operations().is_none());
    }

    #[test]
    fn test_parse_operations() {
        let recipe = Recipe::from_value(json!({
            "history_item_builder": [
                {"function": "accept_item_by_field_value", "field": "title", "op": "!=", "rhs": "fail"},
                {"function": "nb_tag"},
                {"function": "conditionally_nmf_tag"},
                {"function": "scalar_multiply", "field": "score", "k": {"parameter": "recencyFactor"}},
                {"function": "scalar_add", "field": "score", "k": "frecency"},
                {"function": "scalar_multiply", "field": "score", "k": 2}
            ],
            "interest_combiner": [{"function": "combiner_add", "field": "score"}],
            "parameter_set": "paramSet2",
            "models": ["sports"]
        }))
        .unwrap();

        let builder = recipe.operations(Step::HistoryItemBuilder).unwrap();
        assert_eq!(builder.len(), 6);
        assert_eq!(
            builder[1],
            Operation::NbTag {
                fields: vec!["title".to_string(), "description".to_string()]
            }
        );
        assert_eq!(
            builder[3],
            Operation::ScalarMultiply {
                field: "score".to_string(),
                k: Operand::Parameter {
                    parameter: Parameter::RecencyFactor
                }
            }
        );
        assert_eq!(
            builder[4],
            Operation::ScalarAdd {
                field: "score".to_string(),
                k: Operand::Field("frecency".to_string())
            }
        );
        assert_eq!(
            builder[5],
            Operation::ScalarMultiply {
                field: "score".to_string(),
                k: Operand::Number(2.0)
            }
        );
        assert_eq!(recipe.parameter_set.as_deref(), Some("paramSet2"));
        assert_eq!(recipe.combiner_operations().unwrap()[0].name(), "combiner_add");
    }

    #[test]
    fn test_unknown_function_is_invalid_recipe() {
        let err = Recipe::from_value(json!({
            "item_ranker": [{"function": "launch_rockets"}]
        }))
        .unwrap_err();
        assert!(matches!(err, PersonalizationError::InvalidRecipe(_)));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_pipeline_checks_arity() {
        let pipeline = Pipeline::new(Arc::new(Recipe::default()), Arc::new(Echo));
        let item = Item::try_from(json!({"score": 1})).unwrap();

        let err = pipeline
            .execute_step(item.clone(), Step::InterestCombiner)
            .unwrap_err();
        assert_eq!(err.reason, FailureReason::WrongArity);

        let err = pipeline
            .execute_combiner_step(item.clone(), item.clone(), Step::ItemRanker)
            .unwrap_err();
        assert_eq!(err.reason, FailureReason::WrongArity);

        assert_eq!(pipeline.execute_step(item.clone(), Step::ItemRanker).unwrap(), item);
    }

    #[test]
    fn test_step_error_display() {
        let err = StepError::rejected(Step::HistoryItemBuilder, "nb_tag");
        assert_eq!(err.to_string(), "history_item_builder: nb_tag rejected the item");
        assert_eq!(
            StepError::undefined(Step::ItemRanker).to_string(),
            "item_ranker: step is not defined"
        );
    }
}
