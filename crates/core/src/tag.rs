use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock};

/// Declares a process-wide interned name token.
///
/// Every kind keeps its own registry; `intern` returns the unique instance
/// for a name, so equality and hashing are by identity while ordering is by
/// name.
macro_rules! interned_tag {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name(Arc<str>);

        impl $name {
            fn registry() -> &'static DashMap<Box<str>, $name> {
                static REGISTRY: LazyLock<DashMap<Box<str>, $name>> = LazyLock::new(DashMap::new);
                &REGISTRY
            }

            pub(crate) fn intern(name: &str) -> Self {
                if let Some(existing) = Self::registry().get(name) {
                    return existing.value().clone();
                }
                Self::registry()
                    .entry(name.into())
                    .or_insert_with(|| $name(Arc::from(name)))
                    .value()
                    .clone()
            }

            pub fn name(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                Arc::ptr_eq(&self.0, &other.0)
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                (Arc::as_ptr(&self.0) as *const u8 as usize).hash(state);
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                if Arc::ptr_eq(&self.0, &other.0) {
                    return Ordering::Equal;
                }
                self.0.cmp(&other.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let name = String::deserialize(deserializer)?;
                Ok(Self::intern(&name))
            }
        }
    };
}

pub(crate) use interned_tag;

interned_tag!(
    /// Billing account, named by the account directory.
    Account
);
interned_tag!(Region);
interned_tag!(
    /// Availability zone such as `us-east-1a`.
    Zone
);
interned_tag!(Product);
interned_tag!(UsageType);
interned_tag!(
    /// Application grouping assigned by the resource-tag classifier.
    ResourceGroup
);

impl Account {
    pub fn get(name: &str) -> Self {
        Self::intern(name)
    }
}

impl Region {
    pub const DEFAULT: &'static str = "us-east-1";

    pub fn get(name: &str) -> Self {
        Self::intern(name)
    }

    pub fn default_region() -> Self {
        Self::intern(Self::DEFAULT)
    }
}

impl Zone {
    pub fn get(name: &str) -> Self {
        Self::intern(name)
    }

    /// Region of the zone: the zone name without its trailing letter suffix.
    pub fn region(&self) -> Region {
        let trimmed = self.name().trim_end_matches(|c: char| c.is_ascii_lowercase());
        if trimmed.is_empty() || trimmed.len() == self.name().len() {
            return Region::get(self.name());
        }
        Region::get(trimmed)
    }
}

impl Product {
    pub const EC2_INSTANCE: &'static str = "ec2_instance";
    pub const EC2: &'static str = "ec2";
    pub const EBS: &'static str = "ebs";
    pub const EIP: &'static str = "eip";
    pub const DATA_TRANSFER: &'static str = "data_transfer";

    pub fn get(name: &str) -> Self {
        Self::intern(name)
    }

    pub fn ec2_instance() -> Self {
        Self::intern(Self::EC2_INSTANCE)
    }

    pub fn is_ec2_instance(&self) -> bool {
        self.name() == Self::EC2_INSTANCE
    }
}

impl UsageType {
    pub fn get(name: &str) -> Self {
        Self::intern(name)
    }
}

impl ResourceGroup {
    pub fn get(name: &str) -> Self {
        Self::intern(name)
    }
}
