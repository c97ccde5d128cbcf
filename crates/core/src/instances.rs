use crate::tag::{Account, Product, Region, ResourceGroup, UsageType, Zone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A compute instance seen in the billing rows of a month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub account: Account,
    pub region: Region,
    pub zone: Option<Zone>,
    pub product: Product,
    pub usage_type: UsageType,
    pub resource_group: Option<ResourceGroup>,
    pub first_seen_millis: i64,
}

#[derive(Debug, Clone, Default)]
pub struct Instances {
    by_id: BTreeMap<String, InstanceRecord>,
}

impl Instances {
    /// Registers an instance. A later row only fills in what earlier rows
    /// left empty and can move `first_seen_millis` earlier.
    pub fn add(&mut self, record: InstanceRecord) {
        match self.by_id.get_mut(&record.instance_id) {
            Some(existing) => {
                existing.first_seen_millis =
                    existing.first_seen_millis.min(record.first_seen_millis);
                if existing.zone.is_none() {
                    existing.zone = record.zone;
                }
                if existing.resource_group.is_none() {
                    existing.resource_group = record.resource_group;
                }
            }
            None => {
                self.by_id.insert(record.instance_id.clone(), record);
            }
        }
    }

    pub fn get(&self, instance_id: &str) -> Option<&InstanceRecord> {
        self.by_id.get(instance_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Records in instance id order.
    pub fn iter(&self) -> impl Iterator<Item = &InstanceRecord> {
        self.by_id.values()
    }
}
