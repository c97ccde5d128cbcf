use billing_core::{Product, Region};
use chrono::{DateTime, NaiveDateTime};

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"];

pub(crate) fn parse_timestamp(value: &str) -> Option<i64> {
    let value = value.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc().timestamp_millis());
        }
    }
    DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.timestamp_millis())
}

/// Exclusive end of a row's span. Inclusive ends such as `00:59:59` are
/// moved forward one second; exclusive ends are kept as given.
pub(crate) fn parse_end_timestamp(value: &str) -> Option<i64> {
    parse_timestamp(value).map(|end| {
        if end.rem_euclid(60_000) == 59_000 {
            end + 1000
        } else {
            end
        }
    })
}

/// Empty amounts read as zero.
pub(crate) fn parse_amount(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return Some(0.0);
    }
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

const REGION_PREFIXES: [(&str, &str); 20] = [
    ("USE1", "us-east-1"),
    ("USE2", "us-east-2"),
    ("USW1", "us-west-1"),
    ("USW2", "us-west-2"),
    ("UGW1", "us-gov-west-1"),
    ("CAN1", "ca-central-1"),
    ("EU", "eu-west-1"),
    ("EUW1", "eu-west-1"),
    ("EUW2", "eu-west-2"),
    ("EUW3", "eu-west-3"),
    ("EUC1", "eu-central-1"),
    ("EUN1", "eu-north-1"),
    ("APN1", "ap-northeast-1"),
    ("APN2", "ap-northeast-2"),
    ("APN3", "ap-northeast-3"),
    ("APS1", "ap-southeast-1"),
    ("APS2", "ap-southeast-2"),
    ("APS3", "ap-south-1"),
    ("SAE1", "sa-east-1"),
    ("MES1", "me-south-1"),
];

/// Splits a region prefix (`USW2-BoxUsage:m5.large`) off a usage type.
/// Usage types without a known prefix belong to us-east-1.
pub(crate) fn split_region_prefix(usage_type: &str) -> (Region, &str) {
    if let Some((prefix, rest)) = usage_type.split_once('-') {
        if let Some((_, region)) = REGION_PREFIXES.iter().find(|(code, _)| *code == prefix) {
            return (Region::get(region), rest);
        }
    }
    (Region::default_region(), usage_type)
}

pub(crate) fn is_zone(value: &str) -> bool {
    let value = value.trim();
    value.len() > 2
        && value.ends_with(|c: char| c.is_ascii_lowercase())
        && value.chars().rev().nth(1).is_some_and(|c| c.is_ascii_digit())
}

const INSTANCE_USAGE_PREFIXES: [&str; 4] =
    ["BoxUsage", "SpotUsage", "HeavyUsage", "DedicatedUsage"];

pub(crate) fn is_instance_usage(usage_type: &str) -> bool {
    INSTANCE_USAGE_PREFIXES.iter().any(|prefix| usage_type.starts_with(prefix))
}

pub(crate) fn is_spot_usage(usage_type: &str) -> bool {
    usage_type.starts_with("SpotUsage")
}

/// Instance type of an instance usage line, with a platform suffix taken
/// from the operation code (`RunInstances:0002` is Windows).
pub(crate) fn instance_usage_type(usage_type: &str, operation: &str) -> String {
    let instance_type = match usage_type.split_once(':') {
        Some((_, instance_type)) if !instance_type.is_empty() => instance_type,
        _ => "m1.small",
    };
    let platform = operation.split_once(':').and_then(|(_, code)| match code {
        "0002" => Some("windows"),
        "0006" => Some("windows_sqlstd"),
        "0102" => Some("windows_sqlent"),
        "0202" => Some("windows_sqlweb"),
        "0010" => Some("rhel"),
        "000g" => Some("suse"),
        _ => None,
    });
    match platform {
        Some(platform) => format!("{instance_type}.{platform}"),
        None => instance_type.to_string(),
    }
}

const KNOWN_PRODUCTS: [(&str, &str); 12] = [
    ("Amazon Simple Storage Service", "s3"),
    ("Amazon RDS Service", "rds"),
    ("Amazon Relational Database Service", "rds"),
    ("Amazon CloudFront", "cloudfront"),
    ("Amazon DynamoDB", "dynamodb"),
    ("Amazon ElastiCache", "elasticache"),
    ("Amazon Simple Queue Service", "sqs"),
    ("Amazon Simple Notification Service", "sns"),
    ("Amazon Route 53", "route53"),
    ("AWS Lambda", "lambda"),
    ("Amazon Redshift", "redshift"),
    ("Amazon Simple Email Service", "ses"),
];

const EC2_PRODUCT_NAME: &str = "Amazon Elastic Compute Cloud";

/// Product of a line, refining EC2 by usage type.
pub(crate) fn product_for(product_name: &str, usage_type: &str) -> Product {
    let product_name = product_name.trim();
    if product_name == EC2_PRODUCT_NAME {
        let name = if is_instance_usage(usage_type) {
            Product::EC2_INSTANCE
        } else if usage_type.starts_with("EBS:") {
            Product::EBS
        } else if usage_type.contains("DataTransfer") || usage_type.ends_with("-Bytes") {
            Product::DATA_TRANSFER
        } else if usage_type.contains("ElasticIP") {
            Product::EIP
        } else {
            Product::EC2
        };
        return Product::get(name);
    }
    if let Some((_, short)) = KNOWN_PRODUCTS.iter().find(|(full, _)| *full == product_name) {
        return Product::get(short);
    }
    Product::get(&normalize_product_name(product_name))
}

fn normalize_product_name(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    let trimmed = lower
        .strip_prefix("amazon ")
        .or_else(|| lower.strip_prefix("aws "))
        .unwrap_or(&lower);
    let mut out = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() { "unknown".to_string() } else { out }
}
