#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use billing_processor::{BillingProcessor, ProcessorConfig, ProcessorServices};
use billing_store::{ArtifactStore, LocalObjectStore, ObjectStore, WorkBucket};
use tempfile::{TempDir, tempdir};
use zip::write::SimpleFileOptions;

pub const BILLING_BUCKET: &str = "billing";
pub const BILLING_PREFIX: &str = "dbr/";
pub const WORK_BUCKET: &str = "work";
pub const WORK_PREFIX: &str = "stats/";

pub const PLAIN_HEADER: &str = "InvoiceID,PayerAccountId,LinkedAccountId,RecordType,RecordId,ProductName,RateId,SubscriptionId,PricingPlanId,UsageType,Operation,AvailabilityZone,ReservedInstance,ItemDescription,UsageStartDate,UsageEndDate,UsageQuantity,BlendedRate,BlendedCost,UnBlendedRate,UnBlendedCost";

pub struct Harness {
    pub dir: TempDir,
    pub config: ProcessorConfig,
}

/// Config rooted in a fresh temp dir. `extra` is appended to the top-level
/// keys before the `[store]` table.
pub fn harness(extra: &str) -> Harness {
    let dir = tempdir().expect("temp dir");
    let root = dir.path().join("buckets");
    let local = dir.path().join("local");
    let toml = format!(
        r#"
start_date = "2024-01-01"
local_dir = "{local}"
billing_buckets = ["{BILLING_BUCKET}"]
billing_prefixes = ["{BILLING_PREFIX}"]
work_bucket = "{WORK_BUCKET}"
work_prefix = "{WORK_PREFIX}"
{extra}

[store]
root = "{root}"
"#,
        local = local.display(),
        root = root.display(),
    );
    let config = ProcessorConfig::from_toml_str(&toml).expect("config");
    Harness { dir, config }
}

impl Harness {
    pub fn store_root(&self) -> PathBuf {
        self.config.store.root.clone()
    }

    pub fn store(&self) -> Arc<LocalObjectStore> {
        Arc::new(LocalObjectStore::new(self.store_root()))
    }

    pub fn services(&self) -> ProcessorServices {
        ProcessorServices::from_config(&self.config).expect("services")
    }

    pub fn processor_with(&self, services: ProcessorServices) -> BillingProcessor {
        billing_processor::ensure_local_dir(&self.config).expect("local dir");
        BillingProcessor::new(self.config.clone(), services).expect("processor")
    }

    pub fn processor(&self) -> BillingProcessor {
        self.processor_with(self.services())
    }

    pub fn artifacts(&self) -> ArtifactStore {
        ArtifactStore::new(WorkBucket::new(self.store(), WORK_BUCKET, WORK_PREFIX))
    }

    /// Raw bytes of a work-bucket object.
    pub fn work_object(&self, name: &str) -> Option<Vec<u8>> {
        self.store()
            .get(WORK_BUCKET, &format!("{WORK_PREFIX}{name}"))
            .expect("read work object")
    }

    /// Every work-bucket object as `(key, bytes)`, sorted by key.
    pub fn work_snapshot(&self) -> Vec<(String, Vec<u8>)> {
        let store = self.store();
        store
            .list(WORK_BUCKET, WORK_PREFIX)
            .expect("list work bucket")
            .into_iter()
            .map(|object| {
                let bytes = store
                    .get(WORK_BUCKET, &object.key)
                    .expect("get")
                    .expect("object");
                (object.key, bytes)
            })
            .collect()
    }

    /// Writes a zipped billing CSV into the billing bucket.
    pub fn put_billing_zip(&self, name: &str, lines: &[&str]) -> PathBuf {
        let path = self.store_root().join(BILLING_BUCKET).join(BILLING_PREFIX).join(name);
        fs::create_dir_all(path.parent().expect("parent")).expect("bucket dir");
        let file = File::create(&path).expect("create zip");
        let mut zip = zip::ZipWriter::new(file);
        let entry = name.strip_suffix(".zip").unwrap_or(name);
        zip.start_file(entry, SimpleFileOptions::default()).expect("start entry");
        for line in lines {
            writeln!(zip, "{}", line).expect("write line");
        }
        zip.finish().expect("finish zip");
        path
    }

    /// Moves a billing object's modification time `secs` into the future so
    /// the next poll sees it as changed.
    pub fn touch_billing(&self, name: &str, secs: u64) {
        let path = self.store_root().join(BILLING_BUCKET).join(BILLING_PREFIX).join(name);
        let file = File::options().write(true).open(path).expect("open object");
        file.set_modified(SystemTime::now() + Duration::from_secs(secs))
            .expect("set mtime");
    }

    pub fn put_billing_raw(&self, name: &str, bytes: &[u8]) {
        let path = self.store_root().join(BILLING_BUCKET).join(BILLING_PREFIX).join(name);
        fs::create_dir_all(path.parent().expect("parent")).expect("bucket dir");
        fs::write(path, bytes).expect("write object");
    }
}

/// One EC2 line item for account A1.
pub fn ec2_row(
    usage_type: &str,
    operation_desc: &str,
    start: &str,
    end: &str,
    usage: f64,
    cost: f64,
) -> String {
    format!(
        "Estimated,P1,A1,LineItem,1,Amazon Elastic Compute Cloud,1,1,1,{usage_type},RunInstances,,N,{operation_desc},{start},{end},{usage},{cost},{cost},{cost},{cost}"
    )
}
