use std::process::Command;

use tracing::{info, warn};

use crate::error::{ProcessorError, Result};

/// Stops the compute instance hosting the processor.
pub trait InstanceController: Send + Sync {
    fn stop(&self, instance_id: &str, region: &str) -> Result<()>;
}

/// Runs a configured program. `{instance_id}` and `{region}` in any argument
/// are replaced before spawning.
#[derive(Debug, Clone)]
pub struct CommandInstanceController {
    command: Vec<String>,
}

impl CommandInstanceController {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(ProcessorError::InvalidConfig(
                "lifecycle.stop_command is empty".to_string(),
            ));
        }
        Ok(Self { command })
    }

    fn expand(&self, instance_id: &str, region: &str) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| arg.replace("{instance_id}", instance_id).replace("{region}", region))
            .collect()
    }
}

impl InstanceController for CommandInstanceController {
    fn stop(&self, instance_id: &str, region: &str) -> Result<()> {
        let args = self.expand(instance_id, region);
        let Some((program, rest)) = args.split_first() else {
            return Err(ProcessorError::InvalidConfig(
                "lifecycle.stop_command is empty".to_string(),
            ));
        };
        info!(program = %program, instance_id, region, "stopping processor instance");
        let status = Command::new(program).args(rest).status()?;
        if !status.success() {
            return Err(ProcessorError::Message(format!("stop command exited with {status}")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInstanceController;

impl InstanceController for LoggingInstanceController {
    fn stop(&self, instance_id: &str, region: &str) -> Result<()> {
        warn!(instance_id, region, "no stop command configured, leaving instance running");
        Ok(())
    }
}
