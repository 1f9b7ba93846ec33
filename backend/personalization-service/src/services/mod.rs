pub mod history;
pub mod interest_store;
pub mod provider;
pub mod recipe;
pub mod remote_settings;
pub mod tagging;

pub use history::{HistoryProvider, HistoryQuery, JsonHistoryProvider};
pub use interest_store::{
    InterestVectorStore, PersistentCache, RedisInterestVectorStore, INTEREST_VECTOR_STORE,
};
pub use provider::{BuildError, Collaborators, PersonalityProvider, UNRANKABLE};
pub use recipe::{Pipeline, Recipe, RecipeExecutor, RecipeSource, RecipeStrategy, Step, StepError};
pub use remote_settings::{DirectoryRemoteSettings, HttpRemoteSettings, RemoteSettings};
pub use tagging::{ModelFamily, ModelStore, Tagger, TextTagger};
