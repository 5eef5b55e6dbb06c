use thiserror::Error;

use crate::state_machine::ItemId;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Item not found: {0}")]
    NotFound(ItemId),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No uploads accepted ({skipped} skipped)")]
    EmptyBatch { skipped: usize },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl FlowError {
    /// True for the lookup failures a caller should map to "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(self, FlowError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
