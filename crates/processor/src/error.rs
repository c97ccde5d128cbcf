use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("store error: {0}")]
    Store(#[from] billing_store::StoreError),
    #[error("ingest error: {0}")]
    Ingest(#[from] ingest::IngestError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unknown reservation utilization: {0}")]
    UnknownUtilization(String),
    #[error("failed to write artifact {name}: {source}")]
    ArtifactWrite {
        name: String,
        #[source]
        source: billing_store::StoreError,
    },
    #[error("alert dispatch failed: {0}")]
    AlertDispatch(String),
    #[error("processing cancelled")]
    Cancelled,
    #[error("{0}")]
    InvalidConfig(String),
    #[error("{0}")]
    Message(String),
}

impl ProcessorError {
    pub fn artifact_write(name: impl Into<String>, source: billing_store::StoreError) -> Self {
        Self::ArtifactWrite {
            name: name.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProcessorError>;
