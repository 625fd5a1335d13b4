use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl ConfigurationError {
    /// Offending fields for `Invalid`, empty otherwise
    pub fn problems(&self) -> &[String] {
        match self {
            Self::Invalid(problems) => problems,
            Self::Load(_) => &[],
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
