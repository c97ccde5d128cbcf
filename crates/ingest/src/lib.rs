mod keys;
mod line_item;
mod parser;
mod pipeline;
mod types;

pub use keys::{BillingFileVariant, BillingKey, parse_billing_key};
pub use line_item::{BasicLineItemProcessor, LineItemProcessor};
pub use pipeline::{
    DelayedRows, PipelineOptions, first_pass, process_billing_file, process_csv_stream, replay,
};
pub use types::{FileStats, IngestError, IngestIssue, LineItemError, LineItemOutcome, Result};
