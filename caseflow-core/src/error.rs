use thiserror::Error;

/// Storage-layer errors. Services wrap these in `anyhow::Result`;
/// delivery failures are a separate taxonomy carried in row state,
/// never through this type.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,
    #[error("invalid {field} value: {value}")]
    InvalidField { field: &'static str, value: String },
}

impl StoreError {
    pub fn invalid(field: &'static str, value: &str) -> Self {
        StoreError::InvalidField {
            field,
            value: value.to_string(),
        }
    }
}
