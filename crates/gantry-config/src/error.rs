//! Errors from reading recipe and worker files.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed KDL: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("missing {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    /// Recipe names are unique across a recipe set.
    #[error("{0} is defined twice")]
    DuplicateRecipe(String),

    /// A `depends-on` that names a missing recipe or one in another repository.
    #[error("bad dependency: {0}")]
    BadDependency(String),

    #[error("recipes depend on each other: {0}")]
    DependencyCycle(String),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
