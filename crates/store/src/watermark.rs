use crate::artifacts::WorkBucket;
use crate::error::Result;
use billing_core::time::month_label;
use chrono::NaiveDate;
use tracing::warn;

const ALERT_WATERMARK: &str = "ondemandAlertMillis";

pub fn process_watermark_name(month: NaiveDate) -> String {
    format!("lastProcessMillis_{}", month_label(month))
}

/// Epoch-millisecond markers persisted as decimal text in the work bucket.
#[derive(Debug, Clone)]
pub struct Watermarks {
    bucket: WorkBucket,
}

impl Watermarks {
    pub fn new(bucket: WorkBucket) -> Self {
        Self { bucket }
    }

    /// Last time the month was processed; 0 when unknown or unreadable.
    pub fn last_process_millis(&self, month: NaiveDate) -> i64 {
        self.read(&process_watermark_name(month))
    }

    pub fn set_last_process_millis(&self, month: NaiveDate, millis: i64) -> Result<()> {
        self.bucket.put(&process_watermark_name(month), millis.to_string().as_bytes())
    }

    pub fn last_alert_millis(&self) -> i64 {
        self.read(ALERT_WATERMARK)
    }

    pub fn set_last_alert_millis(&self, millis: i64) -> Result<()> {
        self.bucket.put(ALERT_WATERMARK, millis.to_string().as_bytes())
    }

    fn read(&self, name: &str) -> i64 {
        match self.bucket.get(name) {
            Ok(Some(bytes)) => match String::from_utf8_lossy(&bytes).trim().parse::<i64>() {
                Ok(millis) => millis,
                Err(err) => {
                    warn!(name, error = %err, "unparseable watermark, treating as 0");
                    0
                }
            },
            Ok(None) => 0,
            Err(err) => {
                warn!(name, error = %err, "failed to read watermark, treating as 0");
                0
            }
        }
    }
}
