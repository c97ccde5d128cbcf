#![allow(dead_code)]

use std::sync::Arc;

use billing_core::{Account, Operation, Product, Region, TagGroup, TagGroupFields, UsageType};
use billing_store::{ArtifactStore, LocalObjectStore, ObjectStore, Watermarks, WorkBucket};
use tempfile::TempDir;

pub struct TestStore {
    pub _dir: TempDir,
    pub store: Arc<LocalObjectStore>,
    pub work: WorkBucket,
}

pub fn setup_store() -> TestStore {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = Arc::new(LocalObjectStore::new(dir.path()));
    let shared: Arc<dyn ObjectStore> = store.clone();
    let work = WorkBucket::new(shared, "work", "stats/");
    TestStore { _dir: dir, store, work }
}

impl TestStore {
    pub fn artifacts(&self) -> ArtifactStore {
        ArtifactStore::new(self.work.clone())
    }

    pub fn watermarks(&self) -> Watermarks {
        Watermarks::new(self.work.clone())
    }
}

pub fn tag_group(account: &str, usage_type: &str) -> TagGroup {
    TagGroup::get(TagGroupFields {
        account: Account::get(account),
        region: Region::get("us-east-1"),
        zone: None,
        product: Product::ec2_instance(),
        operation: Operation::OnDemand,
        usage_type: UsageType::get(usage_type),
        resource_group: None,
    })
}
