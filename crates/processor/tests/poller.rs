mod support;

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use billing_core::{Account, Operation, Product, Region, TagGroup, TagGroupFields, UsageType};
use billing_processor::services::{AlertMessage, AlertSender};
use billing_processor::{AlertOutcome, ProcessorError};
use billing_store::Metric;
use billing_store::artifacts::{daily_name, hourly_name, monthly_name, weekly_name};
use chrono::NaiveDate;
use support::{PLAIN_HEADER, ec2_row, harness};

fn month(y: i32, m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, 1).expect("date")
}

fn on_demand_group() -> TagGroup {
    TagGroup::get(TagGroupFields {
        account: Account::get("A1"),
        region: Region::get("us-east-1"),
        zone: None,
        product: Product::ec2_instance(),
        operation: Operation::OnDemand,
        usage_type: UsageType::get("m5.large"),
        resource_group: None,
    })
}

fn alert_config(threshold: f64) -> String {
    format!(
        "ondemand_threshold = {threshold:?}\nfrom_email = \"billing@example.com\"\nalert_emails = \"ops@example.com\""
    )
}

fn write_single_hour_march(h: &support::Harness) {
    let row = ec2_row(
        "BoxUsage:m5.large",
        "$0.05 per On Demand Linux m5.large Instance Hour",
        "2024-03-01 00:00:00",
        "2024-03-01 00:59:59",
        2.0,
        0.10,
    );
    h.put_billing_zip("123-aws-billing-detailed-line-items-2024-03.csv.zip", &[PLAIN_HEADER, &row]);
}

#[test]
fn single_on_demand_hour_is_rolled_up() {
    let h = harness(&alert_config(5.0));
    write_single_hour_march(&h);
    let cancel = AtomicBool::new(false);

    let report = h.processor().poll(&cancel).expect("poll");
    assert_eq!(report.months_processed, vec![month(2024, 3)]);
    assert_eq!(report.files_processed, 1);
    assert_eq!(report.alert, Some(AlertOutcome::BelowThreshold));

    let artifacts = h.artifacts();
    let tg = on_demand_group();
    let read = |name: String| artifacts.read_cube(&name).expect("read").expect("artifact exists");

    let hourly_cost = read(hourly_name(Metric::Cost, "all", month(2024, 3)));
    assert_eq!(hourly_cost.num(), 1);
    assert!((hourly_cost.value(0, &tg) - 0.10).abs() < 1e-12);
    let hourly_usage = read(hourly_name(Metric::Usage, "all", month(2024, 3)));
    assert!((hourly_usage.value(0, &tg) - 2.0).abs() < 1e-12);

    // Day 60 of 2024 is March 1st.
    let daily = read(daily_name(Metric::Cost, "all", month(2024, 3)));
    assert!((daily.value(60, &tg) - 0.10).abs() < 1e-12);
    // Two months after the January start.
    let monthly = read(monthly_name(Metric::Cost, "all"));
    assert!((monthly.value(2, &tg) - 0.10).abs() < 1e-12);
    // The week of Monday Feb 26 is the ninth week from Jan 1.
    let weekly = read(weekly_name(Metric::Cost, "all"));
    assert!((weekly.value(8, &tg) - 0.10).abs() < 1e-12);

    let index = artifacts.read_tag_index("all").expect("tag index");
    assert_eq!(index.get("2024-03"), Some(&vec![tg]));
    assert!(h.work_object("lastProcessMillis_2024-03").is_some());
}

#[test]
fn rerun_without_new_files_writes_nothing() {
    let h = harness("");
    write_single_hour_march(&h);
    let cancel = AtomicBool::new(false);
    let processor = h.processor();

    let first = processor.poll(&cancel).expect("first poll");
    assert!(first.has_new_files());
    let before = h.work_snapshot();
    assert!(!before.is_empty());

    let second = processor.poll(&cancel).expect("second poll");
    assert!(!second.has_new_files());
    assert_eq!(second.months_skipped, vec![month(2024, 3)]);
    assert_eq!(second.files_processed, 0);
    assert_eq!(h.work_snapshot(), before);
}

#[test]
fn months_before_start_date_are_ignored() {
    let h = harness("");
    let row = ec2_row(
        "BoxUsage:m5.large",
        "x",
        "2023-12-01 00:00:00",
        "2023-12-01 00:59:59",
        1.0,
        0.1,
    );
    h.put_billing_zip("123-aws-billing-detailed-line-items-2023-12.csv.zip", &[PLAIN_HEADER, &row]);
    write_single_hour_march(&h);

    let months = h.processor().discover();
    assert_eq!(months.keys().copied().collect::<Vec<_>>(), vec![month(2024, 3)]);
}

#[test]
fn resource_classifier_prefers_tagged_exports() {
    let h = harness("\n[resources]\ntag_keys = [\"Application\"]");
    write_single_hour_march(&h);
    h.put_billing_zip(
        "123-aws-billing-detailed-line-items-with-resources-and-tags-2024-03.csv.zip",
        &[PLAIN_HEADER],
    );
    h.put_billing_raw("ec2-monitor-2024-03.csv", PLAIN_HEADER.as_bytes());

    let months = h.processor().discover();
    let march = months.get(&month(2024, 3)).expect("march");
    assert_eq!(march.billing.len(), 1);
    assert!(march.billing[0].object.key.contains("with-resources-and-tags"));
    assert_eq!(march.monitor.len(), 1);
}

#[test]
fn broken_month_is_retried_and_others_continue() {
    let h = harness("");
    h.put_billing_raw("123-aws-billing-detailed-line-items-2024-02.csv.zip", b"not a zip archive");
    write_single_hour_march(&h);
    let cancel = AtomicBool::new(false);

    let report = h.processor().poll(&cancel).expect("poll");
    assert_eq!(report.months_failed, vec![month(2024, 2)]);
    assert_eq!(report.months_processed, vec![month(2024, 3)]);
    assert!(h.work_object("lastProcessMillis_2024-02").is_none());
    assert!(h.work_object("lastProcessMillis_2024-03").is_some());
}

#[test]
fn cancelled_poll_publishes_nothing() {
    let h = harness("");
    write_single_hour_march(&h);
    let cancel = AtomicBool::new(true);
    let result = h.processor().poll(&cancel);
    assert!(matches!(result, Err(ProcessorError::Cancelled)));
    assert!(h.work_snapshot().is_empty());
}

#[test]
fn process_once_requests_instance_stop() {
    let h = harness(
        "process_once = true\nprocessor_instance_id = \"i-processor\"\nprocessor_region = \"us-east-1\"",
    );
    write_single_hour_march(&h);

    struct Recorder(Mutex<Vec<(String, String)>>);
    impl billing_processor::services::InstanceController for Recorder {
        fn stop(&self, instance_id: &str, region: &str) -> billing_processor::Result<()> {
            self.0
                .lock()
                .expect("lock")
                .push((instance_id.to_string(), region.to_string()));
            Ok(())
        }
    }
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let processor = h.processor_with(h.services().with_lifecycle(recorder.clone()));

    let report = processor.poll(&AtomicBool::new(false)).expect("poll");
    assert!(report.instance_stop_requested);
    assert_eq!(
        recorder.0.lock().expect("lock").as_slice(),
        &[("i-processor".to_string(), "us-east-1".to_string())]
    );
}

const FEBRUARY_FILE: &str = "123-aws-billing-detailed-line-items-2024-02.csv.zip";
const MARCH_FILE: &str = "123-aws-billing-detailed-line-items-2024-03.csv.zip";

fn write_february_tail(h: &support::Harness) {
    // Thursday Feb 29 shares the week of Monday Feb 26 with March 1st to 3rd.
    let row = ec2_row(
        "BoxUsage:m5.large",
        "x",
        "2024-02-29 10:00:00",
        "2024-02-29 10:59:59",
        1.0,
        0.30,
    );
    h.put_billing_zip(FEBRUARY_FILE, &[PLAIN_HEADER, &row]);
}

fn weekly_cost(h: &support::Harness, week: usize) -> f64 {
    h.artifacts()
        .read_cube(&weekly_name(Metric::Cost, "all"))
        .expect("read")
        .expect("weekly artifact")
        .value(week, &on_demand_group())
}

#[test]
fn week_spanning_two_months_sums_both_sides() {
    let h = harness("");
    write_february_tail(&h);
    write_single_hour_march(&h);
    let cancel = AtomicBool::new(false);

    let report = h.processor().poll(&cancel).expect("poll");
    assert_eq!(report.months_processed, vec![month(2024, 2), month(2024, 3)]);
    assert!((weekly_cost(&h, 8) - 0.40).abs() < 1e-12);

    let artifacts = h.artifacts();
    let daily = artifacts
        .read_cube(&daily_name(Metric::Cost, "all", month(2024, 3)))
        .expect("read")
        .expect("daily");
    // Feb 29 is day 59, March 1st day 60; days never borrow from neighbours.
    assert!((daily.value(59, &on_demand_group()) - 0.30).abs() < 1e-12);
    assert!((daily.value(60, &on_demand_group()) - 0.10).abs() < 1e-12);
    let monthly = artifacts
        .read_cube(&monthly_name(Metric::Cost, "all"))
        .expect("read")
        .expect("monthly");
    assert!((monthly.value(1, &on_demand_group()) - 0.30).abs() < 1e-12);
    assert!((monthly.value(2, &on_demand_group()) - 0.10).abs() < 1e-12);
}

#[test]
fn earlier_month_arriving_late_completes_shared_week() {
    let h = harness("");
    write_single_hour_march(&h);
    let cancel = AtomicBool::new(false);
    let processor = h.processor();

    // No February cube yet: the shared week holds only March.
    processor.poll(&cancel).expect("first poll");
    assert!((weekly_cost(&h, 8) - 0.10).abs() < 1e-12);

    write_february_tail(&h);
    let report = processor.poll(&cancel).expect("second poll");
    assert_eq!(report.months_processed, vec![month(2024, 2)]);
    assert_eq!(report.months_skipped, vec![month(2024, 3)]);
    assert!((weekly_cost(&h, 8) - 0.40).abs() < 1e-12);
}

#[test]
fn rerun_of_earlier_month_keeps_shared_week() {
    let h = harness("");
    write_february_tail(&h);
    write_single_hour_march(&h);
    let cancel = AtomicBool::new(false);
    let processor = h.processor();
    processor.poll(&cancel).expect("first poll");

    h.touch_billing(FEBRUARY_FILE, 60);
    let report = processor.poll(&cancel).expect("second poll");
    assert_eq!(report.months_processed, vec![month(2024, 2)]);
    assert!((weekly_cost(&h, 8) - 0.40).abs() < 1e-12);
    // Weeks entirely inside February are untouched by March.
    assert_eq!(weekly_cost(&h, 7), 0.0);
}

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<AlertMessage>>,
}

impl AlertSender for RecordingSender {
    fn send(&self, message: &AlertMessage) -> billing_processor::Result<()> {
        self.sent.lock().expect("lock").push(message.clone());
        Ok(())
    }
}

fn sent_total(alert: &Option<AlertOutcome>) -> Option<f64> {
    match alert {
        Some(AlertOutcome::Sent(peak)) => Some(peak.total),
        _ => None,
    }
}

#[test]
fn alert_cools_down_across_polls() {
    let h = harness(&alert_config(1.0));
    let sender = Arc::new(RecordingSender::default());
    let processor = h.processor_with(h.services().with_alerts(sender.clone()));
    let cancel = AtomicBool::new(false);
    let hour = |start: &str, end: &str, cost: f64| {
        let desc = "$0.05 per On Demand Linux m5.large Instance Hour";
        ec2_row("BoxUsage:m5.large", desc, start, end, 1.0, cost)
    };
    let first = hour("2024-03-01 00:00:00", "2024-03-01 00:59:59", 5.0);
    let second = hour("2024-03-01 05:00:00", "2024-03-01 05:59:59", 9.0);
    let third = hour("2024-03-02 02:00:00", "2024-03-02 02:59:59", 7.0);

    h.put_billing_zip(MARCH_FILE, &[PLAIN_HEADER, &first]);
    let report = processor.poll(&cancel).expect("first poll");
    assert!(sent_total(&report.alert).is_some_and(|total| (total - 5.0).abs() < 1e-12));
    let watermark = h.work_object("ondemandAlertMillis").expect("alert watermark");

    // Five hours later is still inside the 24 hour window.
    h.put_billing_zip(MARCH_FILE, &[PLAIN_HEADER, &first, &second]);
    h.touch_billing(MARCH_FILE, 60);
    let report = processor.poll(&cancel).expect("second poll");
    assert_eq!(report.months_processed, vec![month(2024, 3)]);
    assert_eq!(report.alert, Some(AlertOutcome::CoolingDown));
    assert_eq!(h.work_object("ondemandAlertMillis"), Some(watermark.clone()));
    assert_eq!(sender.sent.lock().expect("lock").len(), 1);

    // Data now reaches past the window; the costliest hour after the last
    // alert is reported.
    h.put_billing_zip(MARCH_FILE, &[PLAIN_HEADER, &first, &second, &third]);
    h.touch_billing(MARCH_FILE, 120);
    let report = processor.poll(&cancel).expect("third poll");
    assert!(sent_total(&report.alert).is_some_and(|total| (total - 9.0).abs() < 1e-12));
    assert_ne!(h.work_object("ondemandAlertMillis"), Some(watermark));
    let sent = sender.sent.lock().expect("lock");
    assert_eq!(sent.len(), 2);
    assert!(sent[1].subject.contains("$9.00"));
}
