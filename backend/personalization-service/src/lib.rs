pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{PersonalizationError, Result};
pub use models::{HistoryEntry, InterestVector, Item, PersonalizationSettings};
pub use services::{BuildError, Collaborators, PersonalityProvider, UNRANKABLE};
