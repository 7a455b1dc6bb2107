use thiserror::Error;

/// Errors raised while decoding sequence or manifest catalogs
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("malformed catalog JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("sequence at index {index} has an empty id")]
    EmptySequenceId { index: usize },

    #[error("catalog source unavailable for plugin {plugin_id}: {reason}")]
    Unavailable { plugin_id: String, reason: String },
}
