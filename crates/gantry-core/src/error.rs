//! Errors raised by the domain types themselves.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A string that names no variant of a domain enum, e.g. an outcome
    /// read back from storage or a cause in a recipe file.
    #[error("unknown {kind}: {value}")]
    UnknownName { kind: &'static str, value: String },
}

impl Error {
    pub(crate) fn unknown(kind: &'static str, value: &str) -> Self {
        Error::UnknownName {
            kind,
            value: value.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
