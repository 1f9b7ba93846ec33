use thiserror::Error;

pub type Result<T> = std::result::Result<T, PersonalizationError>;

#[derive(Debug, Error)]
pub enum PersonalizationError {
    #[error("Personality provider received unexpected model family: {0}")]
    InvalidModelFamily(String),

    #[error("Unknown parameter set: {0}")]
    UnknownParameterSet(String),

    #[error("Invalid time segments: {0}")]
    InvalidTimeSegments(String),

    #[error("Invalid recipe: {0}")]
    InvalidRecipe(String),

    #[error("Invalid {family} model for topic {topic}: {reason}")]
    InvalidModel {
        family: String,
        topic: String,
        reason: String,
    },

    #[error("History error: {0}")]
    History(String),

    #[error("Remote settings error: {0}")]
    RemoteSettings(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PersonalizationError {
    /// Configuration errors are fatal and must not be retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PersonalizationError::InvalidModelFamily(_)
                | PersonalizationError::UnknownParameterSet(_)
                | PersonalizationError::InvalidTimeSegments(_)
                | PersonalizationError::InvalidRecipe(_)
                | PersonalizationError::InvalidModel { .. }
                | PersonalizationError::Configuration(_)
        )
    }
}

impl From<serde_json::Error> for PersonalizationError {
    fn from(err: serde_json::Error) -> Self {
        PersonalizationError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for PersonalizationError {
    fn from(err: redis::RedisError) -> Self {
        PersonalizationError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for PersonalizationError {
    fn from(err: reqwest::Error) -> Self {
        PersonalizationError::RemoteSettings(err.to_string())
    }
}
