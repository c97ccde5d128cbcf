use std::fs;

use tracing::info;

use crate::config::ProcessorConfig;
use crate::error::Result;
use crate::poller::BillingProcessor;
use crate::services::ProcessorServices;

pub fn ensure_local_dir(config: &ProcessorConfig) -> Result<()> {
    fs::create_dir_all(&config.local_dir)?;
    Ok(())
}

/// Builds the services and the processor for a validated configuration.
pub fn build_processor(config: ProcessorConfig) -> Result<BillingProcessor> {
    config.validate()?;
    ensure_local_dir(&config)?;
    let services = ProcessorServices::from_config(&config)?;
    info!(
        store = %config.store.root.display(),
        local_dir = %config.local_dir.display(),
        work_bucket = %config.work_bucket,
        sources = config.billing_sources().len(),
        resources = config.resources_enabled(),
        "billing processor configured"
    );
    BillingProcessor::new(config, services)
}
