pub mod artifacts;
pub mod error;
pub mod object_store;
pub mod watermark;

pub use artifacts::{ArtifactStore, Metric, TagIndex, WorkBucket};
pub use error::{Result, StoreError};
pub use object_store::{LocalObjectStore, ObjectStore, ObjectSummary};
pub use watermark::Watermarks;
