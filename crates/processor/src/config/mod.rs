use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use billing_core::Utilization;
use chrono::{DateTime, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{ProcessorError, Result};

const DEFAULT_POLL_INTERVAL_SECS: u64 = 3600;

/// Processor settings, read from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Inclusive lower bound of processed months: `YYYY-MM-DD` or an RFC 3339
    /// UTC midnight.
    pub start_date: String,
    pub local_dir: PathBuf,
    pub billing_buckets: Vec<String>,
    #[serde(default)]
    pub billing_prefixes: Vec<String>,
    #[serde(default)]
    pub billing_account_ids: Vec<String>,
    #[serde(default)]
    pub billing_roles: Vec<String>,
    #[serde(default)]
    pub billing_external_ids: Vec<String>,
    pub work_bucket: String,
    #[serde(default)]
    pub work_prefix: String,
    #[serde(default)]
    pub process_once: bool,
    #[serde(default)]
    pub processor_instance_id: Option<String>,
    #[serde(default)]
    pub processor_region: Option<String>,
    #[serde(default)]
    pub ondemand_threshold: Option<f64>,
    #[serde(default)]
    pub from_email: Option<String>,
    /// Comma-separated recipients.
    #[serde(default)]
    pub alert_emails: Option<String>,
    #[serde(default)]
    pub url_prefix: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    pub store: StoreConfig,
    #[serde(default)]
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub resources: Option<ResourcesConfig>,
    #[serde(default)]
    pub reservations: ReservationsConfig,
    #[serde(default)]
    pub line_items: LineItemsConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory whose subdirectories act as buckets.
    pub root: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// Account id to display name.
    #[serde(default)]
    pub names: BTreeMap<String, String>,
    #[serde(default)]
    pub reservation_owners: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    /// User-tag keys checked in order.
    pub tag_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationsConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_utilization")]
    pub default_utilization: Utilization,
}

fn default_utilization() -> Utilization {
    Utilization::Heavy
}

impl Default for ReservationsConfig {
    fn default() -> Self {
        Self {
            path: None,
            default_utilization: default_utilization(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemProcessorKind {
    #[default]
    Basic,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineItemsConfig {
    #[serde(default)]
    pub kind: LineItemProcessorKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default)]
    pub outbox_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Program and arguments; `{instance_id}` and `{region}` are substituted.
    #[serde(default)]
    pub stop_command: Option<Vec<String>>,
}

/// One configured billing location with its access parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingSource {
    pub bucket: String,
    pub prefix: String,
    pub account_id: String,
    pub role: String,
    pub external_id: String,
}

impl ProcessorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|err| {
                ProcessorError::InvalidConfig(format!("read config {}: {}", path.display(), err))
            })?;
        let config = Self::from_toml_str(&contents)?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.start_date()?;
        if self.billing_buckets.iter().all(|bucket| bucket.trim().is_empty()) {
            return Err(ProcessorError::InvalidConfig(
                "billing_buckets must not be empty".to_string(),
            ));
        }
        if self.work_bucket.trim().is_empty() {
            return Err(ProcessorError::InvalidConfig("work_bucket must not be empty".to_string()));
        }
        let buckets = self.billing_buckets.len();
        for (name, values) in [
            ("billing_prefixes", &self.billing_prefixes),
            ("billing_account_ids", &self.billing_account_ids),
            ("billing_roles", &self.billing_roles),
            ("billing_external_ids", &self.billing_external_ids),
        ] {
            if values.len() > buckets {
                return Err(ProcessorError::InvalidConfig(format!(
                    "{name} has {} entries but billing_buckets has {buckets}",
                    values.len()
                )));
            }
        }
        if let Some(threshold) = self.ondemand_threshold {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(ProcessorError::InvalidConfig(format!(
                    "invalid ondemand_threshold {threshold}"
                )));
            }
        }
        if self.poll_interval_secs == 0 {
            return Err(ProcessorError::InvalidConfig(
                "poll_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn start_date(&self) -> Result<NaiveDate> {
        let value = self.start_date.trim();
        if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            return Ok(date);
        }
        let parsed = DateTime::parse_from_rfc3339(value)
            .map_err(|err| {
                ProcessorError::InvalidConfig(format!("invalid start_date {value:?}: {err}"))
            })?;
        let is_utc_midnight = parsed.offset().local_minus_utc() == 0
            && parsed.hour() == 0
            && parsed.minute() == 0
            && parsed.second() == 0
            && parsed.nanosecond() == 0;
        if !is_utc_midnight {
            return Err(ProcessorError::InvalidConfig(format!(
                "start_date {value:?} must be a UTC midnight"
            )));
        }
        Ok(parsed.date_naive())
    }

    /// Buckets zipped with their parallel settings; missing entries are
    /// empty.
    pub fn billing_sources(&self) -> Vec<BillingSource> {
        let nth = |values: &[String], i: usize| values.get(i).cloned().unwrap_or_default();
        self.billing_buckets
            .iter()
            .enumerate()
            .filter(|(_, bucket)| !bucket.trim().is_empty())
            .map(|(i, bucket)| BillingSource {
                bucket: bucket.trim().to_string(),
                prefix: nth(&self.billing_prefixes, i),
                account_id: nth(&self.billing_account_ids, i),
                role: nth(&self.billing_roles, i),
                external_id: nth(&self.billing_external_ids, i),
            })
            .collect()
    }

    pub fn alert_recipients(&self) -> Vec<String> {
        self.alert_emails
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn resources_enabled(&self) -> bool {
        self.resources.is_some()
    }
}
