use std::env;
use std::path::PathBuf;

use billing_processor::ProcessorConfig;

use crate::args::CliArgs;

const CONFIG_ENV: &str = "BILLING_PROCESSOR_CONFIG";
const CONFIG_FILE_NAME: &str = "billing-processor.toml";

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: ProcessorConfig,
    pub file: PathBuf,
}

pub fn config_path(args: &CliArgs) -> PathBuf {
    if let Some(path) = &args.config {
        return path.clone();
    }
    match env::var(CONFIG_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from(CONFIG_FILE_NAME),
    }
}

/// Loads the file and applies command-line overrides.
pub fn load(args: &CliArgs) -> Result<ConfigLoad, String> {
    let file = config_path(args);
    let mut config = ProcessorConfig::load(&file).map_err(|err| err.to_string())?;
    if args.once {
        config.process_once = true;
    }
    if let Some(secs) = args.interval_secs {
        config.poll_interval_secs = secs;
    }
    Ok(ConfigLoad { config, file })
}
