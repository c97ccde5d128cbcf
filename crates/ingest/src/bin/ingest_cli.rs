use std::env;
use std::path::Path;
use std::sync::Arc;

use billing_core::time::parse_month_label;
use billing_core::{PassthroughAccounts, RunData, Utilization};
use ingest::{
    BasicLineItemProcessor, BillingFileVariant, PipelineOptions, parse_billing_key,
    process_billing_file,
};
use tracing_subscriber::EnvFilter;

fn usage() -> ! {
    eprintln!("usage: ingest_cli <billing-file> [--with-tags] [--month YYYY-MM]");
    std::process::exit(2);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let mut path = None;
    let mut with_tags = None;
    let mut month = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--with-tags" => with_tags = Some(true),
            "--month" => {
                month = args
                    .next()
                    .as_deref()
                    .and_then(parse_month_label)
                    .or_else(|| usage())
            }
            "-h" | "--help" => usage(),
            _ if path.is_none() => path = Some(arg),
            _ => usage(),
        }
    }
    let Some(path) = path else { usage() };

    let key = parse_billing_key(&path);
    let Some(month) = month.or(key.map(|key| key.month)) else {
        eprintln!("cannot tell the billing month of {}; pass --month", path);
        std::process::exit(2);
    };
    let variant = key.map(|key| key.variant).unwrap_or(BillingFileVariant::Plain);
    let options = PipelineOptions {
        with_tags: with_tags.unwrap_or(variant != BillingFileVariant::Plain),
        monitor: variant == BillingFileVariant::Monitor,
        cancel: None,
    };

    let mut processor =
        BasicLineItemProcessor::new(Arc::new(PassthroughAccounts), None, Utilization::Heavy);
    let mut run = RunData::new(month);
    let stats = process_billing_file(Path::new(&path), options, &mut processor, &mut run)
        .unwrap_or_else(|err| {
            eprintln!("failed to process {}: {}", path, err);
            std::process::exit(1);
        });

    println!("lines {}", stats.lines);
    println!("hourly {}", stats.hourly);
    println!("monthly {}", stats.monthly);
    println!("delayed {}", stats.delayed);
    println!("dropped {}", stats.dropped);
    println!("malformed {}", stats.malformed);
    let hours = run.usage.all().num().max(run.cost.all().num());
    for hour in 0..hours {
        let usage = run.usage.all().total(hour);
        let cost = run.cost.all().total(hour);
        if usage != 0.0 || cost != 0.0 {
            println!("hour {} usage {:.6} cost {:.6}", hour, usage, cost);
        }
    }
}
