use thiserror::Error;

/// Session-level failures. Any of these abandons the remaining windows of a session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetabolicsError {
    #[error("Subject profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Invalid subject profile: {0}")]
    InvalidProfile(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{model} model error: {detail} (input shape: {input_shape:?})")]
    Model {
        model: &'static str,
        detail: String,
        input_shape: (usize, usize),
    },

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Sample source error: {0}")]
    Source(String),
}

/// Problems confined to a single window; the window degrades to the basal rate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Empty window")]
    Empty,

    #[error("Window of {len} samples is too short for zero-phase filtering (needs more than {min})")]
    Undersized { len: usize, min: usize },

    #[error("Non-finite value in sample {index}")]
    NonFiniteSample { index: usize },
}

pub type Result<T> = std::result::Result<T, MetabolicsError>;

impl MetabolicsError {
    pub fn model(model: &'static str, detail: impl Into<String>, input_len: usize) -> Self {
        MetabolicsError::Model {
            model,
            detail: detail.into(),
            input_shape: (1, input_len),
        }
    }

    /// Configuration problems originate with the caller, not the data.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MetabolicsError::ProfileNotFound(_)
                | MetabolicsError::InvalidProfile(_)
                | MetabolicsError::InvalidConfig(_)
        )
    }
}
