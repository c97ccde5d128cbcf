use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use billing_core::{
    Account, Operation, PassthroughAccounts, Product, Region, ResourceContext, ResourceGroup,
    ResourceService, RunData, TagGroup, TagGroupFields, UsageType, Utilization,
};
use chrono::NaiveDate;
use flate2::Compression;
use flate2::write::GzEncoder;
use ingest::{BasicLineItemProcessor, IngestError, PipelineOptions, process_billing_file};
use tempfile::tempdir;
use zip::write::SimpleFileOptions;

const PLAIN_HEADER: &str = "InvoiceID,PayerAccountId,LinkedAccountId,RecordType,RecordId,ProductName,RateId,SubscriptionId,PricingPlanId,UsageType,Operation,AvailabilityZone,ReservedInstance,ItemDescription,UsageStartDate,UsageEndDate,UsageQuantity,BlendedRate,BlendedCost,UnBlendedRate,UnBlendedCost";
const TAGS_HEADER: &str = "InvoiceID,PayerAccountId,LinkedAccountId,RecordType,RecordId,ProductName,RateId,SubscriptionId,PricingPlanId,UsageType,Operation,AvailabilityZone,ReservedInstance,ItemDescription,UsageStartDate,UsageEndDate,UsageQuantity,BlendedRate,BlendedCost,UnBlendedRate,UnBlendedCost,ResourceId,user:Application";

fn march() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).expect("date")
}

fn write_zip(path: &Path, entry: &str, lines: &[&str]) {
    let file = File::create(path).expect("create zip");
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file(entry, SimpleFileOptions::default()).expect("start entry");
    for line in lines {
        writeln!(zip, "{}", line).expect("write line");
    }
    zip.finish().expect("finish zip");
}

fn plain_processor() -> BasicLineItemProcessor {
    BasicLineItemProcessor::new(Arc::new(PassthroughAccounts), None, Utilization::Heavy)
}

fn ec2_group(operation: Operation, usage_type: &str, resource_group: Option<&str>) -> TagGroup {
    TagGroup::get(TagGroupFields {
        account: Account::get("A1"),
        region: Region::get("us-east-1"),
        zone: None,
        product: Product::ec2_instance(),
        operation,
        usage_type: UsageType::get(usage_type),
        resource_group: resource_group.map(ResourceGroup::get),
    })
}

struct ApplicationTag;

impl ResourceService for ApplicationTag {
    fn resource_group(&self, context: &ResourceContext<'_>) -> Option<ResourceGroup> {
        context
            .user_tags
            .iter()
            .find(|(key, _)| key == "Application")
            .map(|(_, value)| ResourceGroup::get(value))
    }
}

#[test]
fn single_on_demand_hour_from_zip() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("123-aws-billing-detailed-line-items-2024-03.csv.zip");
    write_zip(
        &path,
        "123-aws-billing-detailed-line-items-2024-03.csv",
        &[
            PLAIN_HEADER,
            "\"Estimated\",\"P1\",\"A1\",\"LineItem\",\"1\",\"Amazon Elastic Compute Cloud\",\"1\",\"1\",\"1\",\"BoxUsage:m5.large\",\"RunInstances\",\"\",\"N\",\"$0.05 per On Demand Linux m5.large Instance Hour\",\"2024-03-01 00:00:00\",\"2024-03-01 00:59:59\",\"2\",\"0.05\",\"0.10\",\"0.05\",\"0.10\"",
            "\"Estimated\",\"P1\",\"\",\"InvoiceTotal\",\"\",\"\",\"\",\"\",\"\",\"\",\"\",\"\",\"\",\"Total\",\"\",\"\",\"\",\"\",\"0.10\",\"\",\"0.10\"",
        ],
    );

    let mut processor = plain_processor();
    let mut run = RunData::new(march());
    let stats = process_billing_file(&path, PipelineOptions::default(), &mut processor, &mut run)
        .expect("process");

    assert_eq!(stats.lines, 2);
    assert_eq!(stats.hourly, 1);
    assert_eq!(stats.ignored, 1);
    assert_eq!(stats.end_millis, Some(1_709_254_800_000));
    let tg = ec2_group(Operation::OnDemand, "m5.large", None);
    assert!((run.usage.all().value(0, &tg) - 2.0).abs() < 1e-12);
    assert!((run.cost.all().value(0, &tg) - 0.10).abs() < 1e-12);
}

#[test]
fn delayed_row_is_classified_on_replay() {
    let dir = tempdir().expect("temp dir");
    let path = dir
        .path()
        .join("123-aws-billing-detailed-line-items-with-resources-and-tags-2024-03.csv.zip");
    write_zip(
        &path,
        "123-aws-billing-detailed-line-items-with-resources-and-tags-2024-03.csv",
        &[
            TAGS_HEADER,
            // Refers to i-0abc before the instance row appears.
            "Estimated,P1,A1,LineItem,1,Amazon Elastic Compute Cloud,1,1,1,EBSOptimized:m5.large,RunInstances,,N,EBS optimized surcharge,2024-03-01 00:00:00,2024-03-01 00:59:59,1,0.01,0.01,0.01,0.01,i-0abc,",
            "Estimated,P1,A1,LineItem,2,Amazon Elastic Compute Cloud,1,1,1,BoxUsage:m5.large,RunInstances,us-east-1a,N,On Demand,2024-03-01 00:00:00,2024-03-01 00:59:59,1,0.096,0.096,0.096,0.096,i-0abc,web",
            // Never registered anywhere in the file.
            "Estimated,P1,A1,LineItem,3,Amazon Elastic Compute Cloud,1,1,1,EBSOptimized:m5.large,RunInstances,,N,EBS optimized surcharge,2024-03-01 00:00:00,2024-03-01 00:59:59,1,0.01,0.02,0.01,0.02,i-0missing,",
        ],
    );

    let resources: Arc<dyn ResourceService> = Arc::new(ApplicationTag);
    let mut processor = BasicLineItemProcessor::new(
        Arc::new(PassthroughAccounts),
        Some(resources),
        Utilization::Heavy,
    );
    let mut run = RunData::new(march());
    let options = PipelineOptions {
        with_tags: true,
        ..PipelineOptions::default()
    };
    let stats = process_billing_file(&path, options, &mut processor, &mut run).expect("process");

    assert_eq!(stats.delayed, 2);
    assert_eq!(stats.replayed, 2);
    assert_eq!(stats.dropped, 1);
    assert!(run.instances.get("i-0abc").is_some());

    // The aggregate cube holds the classified rows without resource groups.
    assert!((run.cost.all().total(0) - 0.106).abs() < 1e-9);

    // The replayed surcharge inherits the instance's group and zone.
    let ec2 = run.cost.product(&Product::get("ec2")).expect("ec2 cube");
    let surcharge = TagGroup::get(TagGroupFields {
        account: Account::get("A1"),
        region: Region::get("us-east-1"),
        zone: Some(billing_core::Zone::get("us-east-1a")),
        product: Product::get("ec2"),
        operation: Operation::get("RunInstances"),
        usage_type: UsageType::get("EBSOptimized:m5.large"),
        resource_group: Some(ResourceGroup::get("web")),
    });
    assert!((ec2.value(0, &surcharge) - 0.01).abs() < 1e-12);

    let instance_cube = run.cost.product(&Product::ec2_instance()).expect("instance cube");
    let instance_group = TagGroup::get(TagGroupFields {
        zone: Some(billing_core::Zone::get("us-east-1a")),
        ..ec2_group(Operation::OnDemand, "m5.large", Some("web")).fields().clone()
    });
    assert!((instance_cube.value(0, &instance_group) - 0.096).abs() < 1e-12);
}

#[test]
fn malformed_rows_do_not_abort_the_file() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("bad-2024-03.csv.zip");
    write_zip(
        &path,
        "bad-2024-03.csv",
        &[
            PLAIN_HEADER,
            "Estimated,P1,A1,LineItem,1,Amazon Elastic Compute Cloud,1,1,1,BoxUsage:m5.large,RunInstances,,N,x,not-a-date,2024-03-01 00:59:59,1,0.1,0.1,0.1,0.1",
            "Estimated,P1,A1",
            "Estimated,P1,A1,LineItem,1,Amazon Elastic Compute Cloud,1,1,1,BoxUsage:m5.large,RunInstances,,N,x,2024-03-01 01:00:00,2024-03-01 01:59:59,1,0.1,0.1,0.1,0.1",
        ],
    );
    let mut processor = plain_processor();
    let mut run = RunData::new(march());
    let stats = process_billing_file(&path, PipelineOptions::default(), &mut processor, &mut run)
        .expect("process");
    assert_eq!(stats.malformed, 2);
    assert_eq!(stats.hourly, 1);
    assert!((run.cost.all().total(1) - 0.1).abs() < 1e-12);
}

#[test]
fn non_utf8_row_is_skipped_and_reading_continues() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("latin1-2024-03.csv.zip");
    let row = |hour: u32, description: &[u8]| {
        let mut bytes = b"Estimated,P1,A1,LineItem,1,Amazon Elastic Compute Cloud,1,1,1,".to_vec();
        bytes.extend_from_slice(b"BoxUsage:m5.large,RunInstances,,N,");
        bytes.extend_from_slice(description);
        let span = format!(",2024-03-01 {hour:02}:00:00,2024-03-01 {hour:02}:59:59");
        bytes.extend_from_slice(span.as_bytes());
        bytes.extend_from_slice(b",1,0.1,0.1,0.1,0.1\n");
        bytes
    };
    let mut contents = format!("{PLAIN_HEADER}\n").into_bytes();
    contents.extend(row(0, b"x"));
    contents.extend(row(1, b"caf\xff\xfe"));
    for hour in 2..5 {
        contents.extend(row(hour, b"x"));
    }

    let file = File::create(&path).expect("create zip");
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file("latin1-2024-03.csv", SimpleFileOptions::default())
        .expect("start entry");
    zip.write_all(&contents).expect("write entry");
    zip.finish().expect("finish zip");

    let mut processor = plain_processor();
    let mut run = RunData::new(march());
    let stats = process_billing_file(&path, PipelineOptions::default(), &mut processor, &mut run)
        .expect("process");
    assert_eq!(stats.lines, 5);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.hourly, 4);
    assert_eq!(stats.issues.len(), 1);
    assert!((run.cost.all().total(0) - 0.1).abs() < 1e-12);
    assert_eq!(run.cost.all().total(1), 0.0);
    assert!((run.cost.all().total(4) - 0.1).abs() < 1e-12);
}

#[test]
fn gzip_monitor_file_does_not_move_end_time() {
    let dir = tempdir().expect("temp dir");
    let path: PathBuf = dir.path().join("ec2-monitor-2024-03.csv.gz");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    writeln!(encoder, "{}", TAGS_HEADER).expect("write");
    writeln!(
        encoder,
        "Estimated,P1,A1,LineItem,1,Amazon Simple Storage Service,1,1,1,TimedStorage-ByteHrs,StandardStorage,,N,x,2024-03-02 00:00:00,2024-03-02 00:59:59,5,0.01,0.05,0.01,0.05,my-bucket,"
    )
    .expect("write");
    fs::write(&path, encoder.finish().expect("finish")).expect("write gz");

    let mut processor = plain_processor();
    let mut run = RunData::new(march());
    let options = PipelineOptions {
        with_tags: true,
        monitor: true,
        cancel: None,
    };
    let stats = process_billing_file(&path, options, &mut processor, &mut run).expect("process");
    assert_eq!(stats.hourly, 1);
    assert_eq!(stats.end_millis, None);
    assert!((run.cost.all().total(24) - 0.05).abs() < 1e-12);
}

#[test]
fn cancellation_stops_between_records() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("plain-2024-03.csv");
    fs::write(
        &path,
        format!(
            "{}\nEstimated,P1,A1,LineItem,1,Amazon Elastic Compute Cloud,1,1,1,BoxUsage:m5.large,RunInstances,,N,x,2024-03-01 00:00:00,2024-03-01 00:59:59,1,0.1,0.1,0.1,0.1\n",
            PLAIN_HEADER
        ),
    )
    .expect("write csv");
    let cancel = AtomicBool::new(true);
    let mut processor = plain_processor();
    let mut run = RunData::new(march());
    let options = PipelineOptions {
        cancel: Some(&cancel),
        ..PipelineOptions::default()
    };
    let result = process_billing_file(&path, options, &mut processor, &mut run);
    assert!(matches!(result, Err(IngestError::Cancelled)));
    assert_eq!(run.cost.all().num(), 0);
}
