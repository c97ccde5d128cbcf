#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("listing error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("corrupt artifact: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
