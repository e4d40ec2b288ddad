use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing secret: set {env} (or {key} in the config file)")]
    MissingSecret { env: &'static str, key: &'static str },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl RelayError {
    /// Short error code string, used as a structured log field.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "CONFIG_ERROR",
            RelayError::MissingSecret { .. } => "MISSING_SECRET",
            RelayError::InvalidValue { .. } => "INVALID_VALUE",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
