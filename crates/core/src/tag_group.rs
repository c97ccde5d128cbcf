use crate::operation::Operation;
use crate::tag::{Account, Product, Region, ResourceGroup, UsageType, Zone};
use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, LazyLock};

/// Field values of a tag group. Derived ordering compares fields in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagGroupFields {
    pub account: Account,
    pub region: Region,
    pub zone: Option<Zone>,
    pub product: Product,
    pub operation: Operation,
    pub usage_type: UsageType,
    pub resource_group: Option<ResourceGroup>,
}

/// Interned cube key. Two tag groups with equal fields are the same instance.
#[derive(Clone)]
pub struct TagGroup(Arc<TagGroupFields>);

static REGISTRY: LazyLock<DashMap<TagGroupFields, TagGroup>> = LazyLock::new(DashMap::new);

impl TagGroup {
    pub fn get(fields: TagGroupFields) -> Self {
        if let Some(existing) = REGISTRY.get(&fields) {
            return existing.value().clone();
        }
        REGISTRY
            .entry(fields.clone())
            .or_insert_with(|| TagGroup(Arc::new(fields)))
            .value()
            .clone()
    }

    pub fn fields(&self) -> &TagGroupFields {
        &self.0
    }

    pub fn with_operation(&self, operation: Operation) -> Self {
        if self.operation == operation {
            return self.clone();
        }
        TagGroup::get(TagGroupFields { operation, ..self.fields().clone() })
    }

    pub fn without_resource_group(&self) -> Self {
        if self.resource_group.is_none() {
            return self.clone();
        }
        TagGroup::get(TagGroupFields { resource_group: None, ..self.fields().clone() })
    }
}

impl Deref for TagGroup {
    type Target = TagGroupFields;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq for TagGroup {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TagGroup {}

impl Hash for TagGroup {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl PartialOrd for TagGroup {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TagGroup {
    fn cmp(&self, other: &Self) -> Ordering {
        if Arc::ptr_eq(&self.0, &other.0) {
            return Ordering::Equal;
        }
        self.0.cmp(&other.0)
    }
}

impl fmt::Debug for TagGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TagGroup({}, {}, {}, {}, {}, {}, {})",
            self.account,
            self.region,
            self.zone.as_ref().map(Zone::name).unwrap_or("-"),
            self.product,
            self.operation,
            self.usage_type,
            self.resource_group.as_ref().map(ResourceGroup::name).unwrap_or("-"),
        )
    }
}

impl Serialize for TagGroup {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TagGroup {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        TagGroupFields::deserialize(deserializer).map(TagGroup::get)
    }
}
