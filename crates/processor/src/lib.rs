pub mod alert;
pub mod config;
pub mod error;
pub mod poller;
pub mod reservation;
pub mod rollup;
pub mod services;
pub mod startup;
pub mod util;

pub use alert::{AlertOutcome, AlertSettings, OnDemandPeak, check_ondemand_alert, find_peak};
pub use config::{BillingSource, ProcessorConfig};
pub use error::{ProcessorError, Result};
pub use poller::{BillingFile, BillingProcessor, MonthFiles, PollReport};
pub use reservation::{AmortizationSummary, ReservationProcessor, amortize_run};
pub use rollup::{ArchiveSummary, Archiver, Summaries, summarize};
pub use services::ProcessorServices;
pub use startup::{build_processor, ensure_local_dir};
