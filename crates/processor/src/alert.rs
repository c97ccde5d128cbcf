use std::collections::HashMap;

use billing_core::time::{HOUR_MILLIS, millis_to_datetime};
use billing_core::{Operation, Product, ReadWriteData, Region, UsageType};
use billing_store::Watermarks;
use tracing::{error, info};

use crate::config::ProcessorConfig;
use crate::services::{AlertMessage, AlertSender};

const COOL_DOWN_MILLIS: i64 = 24 * HOUR_MILLIS;

/// Alerting is active only with a threshold, a sender address and at least
/// one recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertSettings {
    pub threshold: f64,
    pub from: String,
    pub recipients: Vec<String>,
    pub url_prefix: String,
}

impl AlertSettings {
    pub fn from_config(config: &ProcessorConfig) -> Option<Self> {
        let threshold = config.ondemand_threshold?;
        let from = config.from_email.as_deref().map(str::trim).filter(|from| !from.is_empty())?;
        let recipients = config.alert_recipients();
        if recipients.is_empty() {
            return None;
        }
        Some(Self {
            threshold,
            from: from.to_string(),
            recipients,
            url_prefix: config.url_prefix.clone(),
        })
    }
}

/// The costliest on-demand hour above the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct OnDemandPeak {
    pub hour_millis: i64,
    pub total: f64,
    /// `(region, usage type, cost)` with positive cost, most expensive first.
    pub lines: Vec<(Region, UsageType, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    Disabled,
    CoolingDown,
    BelowThreshold,
    Sent(OnDemandPeak),
    DispatchFailed(String),
}

/// Scans hours starting at `from_millis` for the first hour whose on-demand
/// instance cost is strictly above `threshold` and larger than every earlier
/// one.
pub fn find_peak(
    cost: &ReadWriteData,
    start_millis: i64,
    from_millis: i64,
    threshold: f64,
) -> Option<OnDemandPeak> {
    let instance_product = Product::ec2_instance();
    let mut peak: Option<(i64, f64, HashMap<(Region, UsageType), f64>)> = None;
    let mut max_total = threshold;
    for (hour, map) in cost.hours().iter().enumerate() {
        let hour_millis = start_millis + hour as i64 * HOUR_MILLIS;
        if hour_millis < from_millis {
            continue;
        }
        let mut by_pair: HashMap<(Region, UsageType), f64> = HashMap::new();
        for (tag_group, value) in map {
            if tag_group.product == instance_product && tag_group.operation == Operation::OnDemand {
                *by_pair
                    .entry((tag_group.region.clone(), tag_group.usage_type.clone()))
                    .or_insert(0.0) += value;
            }
        }
        let total: f64 = by_pair.values().sum();
        if total > max_total {
            max_total = total;
            peak = Some((hour_millis, total, by_pair));
        }
    }

    peak.map(|(hour_millis, total, by_pair)| {
        let mut lines: Vec<(Region, UsageType, f64)> = by_pair
            .into_iter()
            .filter(|(_, value)| *value > 0.0)
            .map(|((region, usage_type), value)| (region, usage_type, value))
            .collect();
        lines.sort_by(|a, b| {
            b.2.total_cmp(&a.2)
                .then_with(|| a.0.cmp(&b.0))
                .then_with(|| a.1.cmp(&b.1))
        });
        OnDemandPeak {
            hour_millis,
            total,
            lines,
        }
    })
}

fn format_hour(millis: i64) -> String {
    millis_to_datetime(millis)
        .map(|at| at.format("%Y-%m-%d %H:00 UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

pub fn render_alert(settings: &AlertSettings, peak: &OnDemandPeak) -> AlertMessage {
    let at = format_hour(peak.hour_millis);
    let subject = format!("Alert: Ondemand cost per hour reached ${:.2} at {}", peak.total, at);
    let mut body = format!("Total ondemand cost ${:.2} at {}:<br><br>", peak.total, at);
    for (region, usage_type, value) in &peak.lines {
        body.push_str(&format!("{region} {usage_type}: ${value:.2}<br>"));
    }
    body.push_str(&format!(
        "<br>Please go to <a href=\"{}dashboard/reservation#usage_cost=cost&groupBy=UsageType&product=ec2_instance&operation=OndemandInstances\">the billing dashboard</a> for details.",
        settings.url_prefix
    ));
    AlertMessage {
        from: settings.from.clone(),
        to: settings.recipients.clone(),
        subject,
        html_body: body,
    }
}

/// Sends at most one on-demand alert per cool-down window. The alert
/// watermark only moves after a successful dispatch.
pub fn check_ondemand_alert(
    settings: Option<&AlertSettings>,
    cost: &ReadWriteData,
    start_millis: i64,
    end_millis: i64,
    watermarks: &Watermarks,
    sender: &dyn AlertSender,
) -> AlertOutcome {
    let Some(settings) = settings else {
        return AlertOutcome::Disabled;
    };
    let last_alert = watermarks.last_alert_millis();
    if end_millis < last_alert + COOL_DOWN_MILLIS {
        info!(end_millis, last_alert, "on-demand alert cooling down");
        return AlertOutcome::CoolingDown;
    }
    let from_millis = last_alert + HOUR_MILLIS;
    let Some(peak) = find_peak(cost, start_millis, from_millis, settings.threshold) else {
        return AlertOutcome::BelowThreshold;
    };

    let message = render_alert(settings, &peak);
    if let Err(err) = sender.send(&message) {
        error!(error = %err, "failed to send on-demand alert");
        return AlertOutcome::DispatchFailed(err.to_string());
    }
    match watermarks.set_last_alert_millis(end_millis) {
        Ok(()) => info!(end_millis, total = peak.total, "sent on-demand alert"),
        Err(err) => error!(error = %err, "alert sent but watermark not saved"),
    }
    AlertOutcome::Sent(peak)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use billing_core::{Account, TagGroup, TagGroupFields};
    use billing_store::{LocalObjectStore, WorkBucket};
    use tempfile::tempdir;

    use crate::error::{ProcessorError, Result};

    const START: i64 = 1_709_251_200_000; // 2024-03-01

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<AlertMessage>>,
    }

    impl AlertSender for Recorder {
        fn send(&self, message: &AlertMessage) -> Result<()> {
            self.sent.lock().expect("lock").push(message.clone());
            Ok(())
        }
    }

    struct Failing;

    impl AlertSender for Failing {
        fn send(&self, _message: &AlertMessage) -> Result<()> {
            Err(ProcessorError::AlertDispatch("relay down".to_string()))
        }
    }

    fn settings() -> AlertSettings {
        AlertSettings {
            threshold: 1.0,
            from: "billing@example.com".to_string(),
            recipients: vec!["ops@example.com".to_string()],
            url_prefix: "https://billing.example.com/".to_string(),
        }
    }

    fn on_demand(usage_type: &str) -> TagGroup {
        TagGroup::get(TagGroupFields {
            account: Account::get("A1"),
            region: Region::get("us-east-1"),
            zone: None,
            product: Product::ec2_instance(),
            operation: Operation::OnDemand,
            usage_type: UsageType::get(usage_type),
            resource_group: None,
        })
    }

    fn cost_cube() -> ReadWriteData {
        let mut cost = ReadWriteData::new();
        for hour in 0..48 {
            cost.add_value(hour, &on_demand("m5.large"), 0.5);
        }
        cost.add_value(30, &on_demand("m5.large"), 0.5);
        cost.add_value(30, &on_demand("c5.xlarge"), 1.5);
        cost
    }

    fn watermarks() -> (tempfile::TempDir, Watermarks) {
        let dir = tempdir().expect("temp dir");
        let store = Arc::new(LocalObjectStore::new(dir.path()));
        (dir, Watermarks::new(WorkBucket::new(store, "work", "stats/")))
    }

    #[test]
    fn alerts_once_per_cool_down() {
        let (_dir, watermarks) = watermarks();
        let recorder = Recorder::default();
        let cost = cost_cube();
        let end = START + 48 * HOUR_MILLIS;

        let settings = settings();
        let outcome =
            check_ondemand_alert(Some(&settings), &cost, START, end, &watermarks, &recorder);
        let AlertOutcome::Sent(peak) = outcome else {
            panic!("expected an alert, got {outcome:?}");
        };
        assert_eq!(peak.hour_millis, START + 30 * HOUR_MILLIS);
        assert!((peak.total - 2.5).abs() < 1e-12);
        assert_eq!(peak.lines[0].1, UsageType::get("c5.xlarge"));
        assert_eq!(peak.lines[1].1, UsageType::get("m5.large"));
        assert_eq!(watermarks.last_alert_millis(), end);

        let sent = recorder.sent.lock().expect("lock").clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("$2.50"));
        let c5 = sent[0].html_body.find("c5.xlarge").expect("c5 line");
        let m5 = sent[0].html_body.find("m5.large").expect("m5 line");
        assert!(c5 < m5);

        let later = end + HOUR_MILLIS;
        let again =
            check_ondemand_alert(Some(&settings), &cost, START, later, &watermarks, &recorder);
        assert_eq!(again, AlertOutcome::CoolingDown);
        assert_eq!(recorder.sent.lock().expect("lock").len(), 1);
    }

    #[test]
    fn dispatch_failure_keeps_watermark() {
        let (_dir, watermarks) = watermarks();
        let cost = cost_cube();
        let outcome = check_ondemand_alert(
            Some(&settings()),
            &cost,
            START,
            START + 48 * HOUR_MILLIS,
            &watermarks,
            &Failing,
        );
        assert!(matches!(outcome, AlertOutcome::DispatchFailed(_)));
        assert_eq!(watermarks.last_alert_millis(), 0);
    }

    #[test]
    fn threshold_is_strict() {
        let mut cost = ReadWriteData::new();
        cost.add_value(0, &on_demand("m5.large"), 1.0);
        assert_eq!(find_peak(&cost, START, 0, 1.0), None);
        cost.add_value(1, &on_demand("m5.large"), 1.25);
        cost.add_value(2, &on_demand("m5.large"), 1.25);
        let peak = find_peak(&cost, START, 0, 1.0).expect("peak");
        assert_eq!(peak.hour_millis, START + HOUR_MILLIS);
        // Hours before the scan start are ignored.
        assert_eq!(find_peak(&cost, START, START + 3 * HOUR_MILLIS, 1.0), None);
    }

    #[test]
    fn disabled_without_settings() {
        let (_dir, watermarks) = watermarks();
        let recorder = Recorder::default();
        let outcome =
            check_ondemand_alert(None, &cost_cube(), START, START, &watermarks, &recorder);
        assert_eq!(outcome, AlertOutcome::Disabled);
    }
}
