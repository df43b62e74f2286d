// Error Types
// Configuration and service errors shared across the workflow engine

use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Malformed or contradictory declarative input.
///
/// Fatal to the scope it is detected at: a whole matrix expansion, or a single step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("matrix axis '{0}' has no values")]
    EmptyAxis(String),

    #[error("unresolved reference '{0}'")]
    UnresolvedReference(String),

    #[error("invalid expression '{expression}': {message}")]
    InvalidExpression { expression: String, message: String },

    #[error("invalid step '{step}': {message}")]
    InvalidStep { step: String, message: String },
}

impl ConfigurationError {
    pub fn invalid_expression(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expression: expression.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
