use crate::error::{Result, StoreError};
use crate::object_store::ObjectStore;
use billing_core::time::month_label;
use billing_core::{HourData, InstanceRecord, Instances, ReadWriteData, TagGroup};
use chrono::{Datelike, NaiveDate};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    Usage,
    Cost,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::Usage, Metric::Cost];

    pub fn label(self) -> &'static str {
        match self {
            Metric::Usage => "usage",
            Metric::Cost => "cost",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn hourly_name(metric: Metric, product: &str, month: NaiveDate) -> String {
    format!("{metric}_hourly_{product}_{}", month_label(month))
}

pub fn daily_name(metric: Metric, product: &str, month: NaiveDate) -> String {
    format!("{metric}_daily_{product}_{}", month.year())
}

pub fn weekly_name(metric: Metric, product: &str) -> String {
    format!("{metric}_weekly_{product}")
}

pub fn monthly_name(metric: Metric, product: &str) -> String {
    format!("{metric}_monthly_{product}")
}

pub fn tagdb_name(product: &str) -> String {
    format!("tagdb_{product}")
}

pub fn instances_name(month: NaiveDate) -> String {
    format!("instances_{}", month_label(month))
}

/// A bucket and key prefix in an object store where processor output lives.
#[derive(Clone)]
pub struct WorkBucket {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
}

impl WorkBucket {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    pub fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(&self.bucket, &self.key(name))
    }

    pub fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        self.store.put(&self.bucket, &self.key(name), data)
    }
}

impl fmt::Debug for WorkBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkBucket")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish()
    }
}

// Tag groups are listed once, sorted; hours refer to them by index.
#[derive(Debug, Serialize, Deserialize)]
struct CubeArtifact {
    tag_groups: Vec<TagGroup>,
    hours: Vec<Vec<(usize, f64)>>,
}

fn gzip<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    serde_json::to_writer(&mut encoder, value)?;
    Ok(encoder.finish()?)
}

fn gunzip<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_reader(GzDecoder::new(bytes))?)
}

pub fn encode_cube(cube: &ReadWriteData) -> Result<Vec<u8>> {
    let tag_groups: Vec<TagGroup> = cube.tag_groups().into_iter().collect();
    let index: HashMap<&TagGroup, usize> = tag_groups
        .iter()
        .enumerate()
        .map(|(i, tg)| (tg, i))
        .collect();
    let hours = cube
        .hours()
        .iter()
        .map(|map| {
            let mut values: Vec<(usize, f64)> = map
                .iter()
                .filter_map(|(tg, value)| index.get(tg).map(|i| (*i, *value)))
                .collect();
            values.sort_by_key(|(i, _)| *i);
            values
        })
        .collect();
    gzip(&CubeArtifact { tag_groups, hours })
}

pub fn decode_cube(bytes: &[u8]) -> Result<ReadWriteData> {
    let artifact: CubeArtifact = gunzip(bytes)?;
    let mut hours = Vec::with_capacity(artifact.hours.len());
    for values in artifact.hours {
        let mut map = HourData::with_capacity(values.len());
        for (i, value) in values {
            let tg = artifact
                .tag_groups
                .get(i)
                .ok_or_else(|| StoreError::Corrupt(format!("tag group index {i} out of range")))?;
            map.insert(tg.clone(), value);
        }
        hours.push(map);
    }
    Ok(ReadWriteData::from_hours(hours))
}

/// Tag groups seen per month, keyed `YYYY-MM`.
pub type TagIndex = BTreeMap<String, Vec<TagGroup>>;

/// Reads and writes processor artifacts in the work bucket.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    bucket: WorkBucket,
}

impl ArtifactStore {
    pub fn new(bucket: WorkBucket) -> Self {
        Self { bucket }
    }

    pub fn read_cube(&self, name: &str) -> Result<Option<ReadWriteData>> {
        match self.bucket.get(name)? {
            Some(bytes) => decode_cube(&bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn write_cube(&self, name: &str, cube: &ReadWriteData) -> Result<()> {
        let bytes = encode_cube(cube)?;
        self.bucket.put(name, &bytes)?;
        debug!(name, hours = cube.num(), "wrote cube artifact");
        Ok(())
    }

    pub fn read_tag_index(&self, product: &str) -> Result<TagIndex> {
        match self.bucket.get(&tagdb_name(product))? {
            Some(bytes) => gunzip(&bytes),
            None => Ok(TagIndex::new()),
        }
    }

    /// Replaces one month's entry of the product's tag index.
    pub fn update_tag_index(
        &self,
        product: &str,
        month: NaiveDate,
        tag_groups: BTreeSet<TagGroup>,
    ) -> Result<()> {
        let mut index = self.read_tag_index(product)?;
        index.insert(month_label(month), tag_groups.into_iter().collect());
        self.bucket.put(&tagdb_name(product), &gzip(&index)?)
    }

    pub fn write_instances(&self, month: NaiveDate, instances: &Instances) -> Result<()> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut writer = csv::Writer::from_writer(encoder);
        for record in instances.iter() {
            writer.serialize(record)?;
        }
        let mut encoder = writer.into_inner().map_err(|err| StoreError::Io(err.into_error()))?;
        encoder.flush()?;
        self.bucket.put(&instances_name(month), &encoder.finish()?)
    }

    pub fn read_instances(&self, month: NaiveDate) -> Result<Vec<InstanceRecord>> {
        let Some(bytes) = self.bucket.get(&instances_name(month))? else {
            return Ok(Vec::new());
        };
        let mut reader = csv::Reader::from_reader(GzDecoder::new(bytes.as_slice()));
        let mut records = Vec::new();
        for record in reader.deserialize() {
            records.push(record?);
        }
        Ok(records)
    }
}
