use std::path::PathBuf;

/// Reasons a camera configuration can be rejected at startup.
///
/// Every variant is fatal: the pipeline must not be built with a configuration
/// that failed to load.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not a well-formed document.
    #[error("invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// A required key is absent.
    #[error("missing required key `{key}`")]
    MissingField { key: &'static str },

    /// An array-valued key has the wrong number of entries.
    #[error("`{key}` must have exactly {expected} entries, found {found}")]
    InvalidArity {
        key: &'static str,
        expected: usize,
        found: usize,
    },

    /// A value has the wrong type.
    #[error("`{key}`{} must be {expected}", index_suffix(.index))]
    TypeMismatch {
        key: &'static str,
        index: Option<usize>,
        expected: &'static str,
    },

    /// A value has the right type but is outside the accepted range.
    #[error("`{key}`{} {reason}", index_suffix(.index))]
    OutOfRange {
        key: &'static str,
        index: Option<usize>,
        reason: String,
    },

    /// An optional settings table is malformed.
    #[error("invalid `[{key}]` table: {message}")]
    InvalidTable { key: &'static str, message: String },
}

impl ConfigError {
    /// The configuration key the error refers to, when there is one.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::Read { .. } | Self::Parse { .. } => None,
            Self::MissingField { key }
            | Self::InvalidArity { key, .. }
            | Self::TypeMismatch { key, .. }
            | Self::OutOfRange { key, .. }
            | Self::InvalidTable { key, .. } => Some(*key),
        }
    }
}

fn index_suffix(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!("[{i}]"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
