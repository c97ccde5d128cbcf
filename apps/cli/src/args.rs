use std::env;
use std::path::PathBuf;

#[derive(Debug, Default, PartialEq)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub once: bool,
    pub interval_secs: Option<u64>,
}

pub fn parse_args() -> Result<CliArgs, String> {
    parse_from(env::args().skip(1))
}

fn parse_from(args: impl IntoIterator<Item = String>) -> Result<CliArgs, String> {
    let mut args = args.into_iter();
    let mut parsed = CliArgs::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --config".to_string())?;
                parsed.config = Some(PathBuf::from(value));
            }
            "--once" => {
                parsed.once = true;
            }
            "--interval" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --interval".to_string())?;
                let secs = value
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .ok_or_else(|| format!("invalid interval value: {value}"))?;
                parsed.interval_secs = Some(secs);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                return Err(format!("unknown argument: {arg}"));
            }
        }
    }

    Ok(parsed)
}

pub fn print_help() {
    println!(
        "Billing processor\n\n\
Usage:\n  billing-processor [--config <path>] [--once] [--interval <secs>]\n\n\
Options:\n  \
-c, --config <path>  Configuration file \
(default: $BILLING_PROCESSOR_CONFIG or ./billing-processor.toml)\n  \
--once               Run a single poll and exit\n  \
--interval <secs>    Override the configured poll interval\n  \
-h, --help           Show this help message\n"
    );
}
