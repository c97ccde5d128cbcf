use billing_core::time::parse_month_label;
use chrono::NaiveDate;

const WITH_TAGS_SUFFIX: &str = "-with-resources-and-tags-";
const ZIP_SUFFIX: &str = ".csv.zip";

/// Which export a billing object is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BillingFileVariant {
    Plain,
    WithTags,
    Monitor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingKey {
    pub month: NaiveDate,
    pub variant: BillingFileVariant,
}

/// Recognizes a billing object key. With-tags is tried first, then monitor,
/// then plain; other keys are not billing files.
pub fn parse_billing_key(key: &str) -> Option<BillingKey> {
    let name = key.rsplit('/').next().unwrap_or(key);
    with_tags_month(name)
        .map(|month| BillingKey {
            month,
            variant: BillingFileVariant::WithTags,
        })
        .or_else(|| {
            monitor_month(name).map(|month| BillingKey {
                month,
                variant: BillingFileVariant::Monitor,
            })
        })
        .or_else(|| {
            plain_month(name).map(|month| BillingKey {
                month,
                variant: BillingFileVariant::Plain,
            })
        })
}

fn trailing_month(stem: &str) -> Option<NaiveDate> {
    let start = stem.len().checked_sub(7)?;
    parse_month_label(stem.get(start..)?)
}

fn with_tags_month(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_suffix(ZIP_SUFFIX)?;
    let month = trailing_month(stem)?;
    stem[..stem.len() - 7].ends_with(WITH_TAGS_SUFFIX).then_some(month)
}

fn monitor_month(name: &str) -> Option<NaiveDate> {
    let csv_at = name.rfind(".csv")?;
    let stem = &name[..csv_at];
    let month = trailing_month(stem)?;
    stem[..stem.len() - 7].contains("monitor").then_some(month)
}

fn plain_month(name: &str) -> Option<NaiveDate> {
    trailing_month(name.strip_suffix(ZIP_SUFFIX)?)
}
