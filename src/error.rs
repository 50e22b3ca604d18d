//! Error types for the API test engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, AteError>;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum AteError {
    /// Malformed call syntax, arity mismatch, unsupported comparator or a
    /// missing required request field.
    #[error("Params error: {0}")]
    Params(String),

    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("API not found: {0}")]
    ApiNotFound(String),

    #[error("Suite not found: {0}")]
    SuiteNotFound(String),

    /// Structural query failure against response-shaped data
    #[error("Bad query '{path}': {message}")]
    ParseResponse { path: String, message: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Failed to load {path}: {message}")]
    Load { path: String, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Step '{step}': {source}")]
    Step {
        step: String,
        #[source]
        source: Box<AteError>,
    },
}

impl AteError {
    pub fn params(message: impl Into<String>) -> Self {
        AteError::Params(message.into())
    }

    pub fn load(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        AteError::Load {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn bad_query(path: impl Into<String>, message: impl Into<String>) -> Self {
        AteError::ParseResponse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Attach the failing step name, unless it is already attached.
    pub fn in_step(self, step: impl Into<String>) -> Self {
        match self {
            AteError::Step { .. } => self,
            other => AteError::Step {
                step: step.into(),
                source: Box::new(other),
            },
        }
    }

    /// The error with any step context removed.
    pub fn root(&self) -> &AteError {
        match self {
            AteError::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Unresolved names are reported to callers as parameter errors.
    pub fn is_params_error(&self) -> bool {
        matches!(
            self.root(),
            AteError::Params(_) | AteError::VariableNotFound(_) | AteError::FunctionNotFound(_)
        )
    }

    /// Errors raised while resolving a step, before any request is issued.
    pub fn is_resolution_error(&self) -> bool {
        self.is_params_error()
            || matches!(
                self.root(),
                AteError::ApiNotFound(_) | AteError::SuiteNotFound(_)
            )
    }
}
