//! Executor that drives systemd units through `systemctl`.

use tracing::{debug, info};

use crate::command;
use crate::error::ExecutorResult;
use crate::executor::{validate_resource_id, ExecFuture, LifecycleExecutor};

#[derive(Debug, Clone)]
pub struct SystemctlExecutor {
    /// Unit name with `{resource}` as the placeholder, e.g. `model@{resource}`.
    unit_template: String,
    use_sudo: bool,
    shutdown_command: Vec<String>,
}

impl SystemctlExecutor {
    pub fn new(unit_template: impl Into<String>, use_sudo: bool, shutdown_command: Vec<String>) -> Self {
        Self {
            unit_template: unit_template.into(),
            use_sudo,
            shutdown_command,
        }
    }

    /// Unit name for a resource. Fails on ids that could escape the name.
    pub fn unit_for(&self, resource_id: &str) -> ExecutorResult<String> {
        validate_resource_id(resource_id)?;
        Ok(self.unit_template.replace("{resource}", resource_id))
    }

    fn control_argv(&self, verb: &str, unit: &str) -> Vec<String> {
        let mut argv = Vec::with_capacity(4);
        if self.use_sudo {
            argv.push("sudo".to_string());
        }
        argv.extend(["systemctl".to_string(), verb.to_string(), unit.to_string()]);
        argv
    }

    async fn control(&self, verb: &'static str, resource_id: &str) -> ExecutorResult<()> {
        let unit = self.unit_for(resource_id)?;
        command::run_checked(&self.control_argv(verb, &unit)).await?;
        info!(resource = %resource_id, %unit, verb, "systemctl succeeded");
        Ok(())
    }

    async fn active(&self, resource_id: &str) -> ExecutorResult<bool> {
        let unit = self.unit_for(resource_id)?;
        let argv = ["systemctl", "is-active", unit.as_str()].map(String::from);
        let output = command::run(&argv).await?;
        let running = output.success && output.stdout.trim() == "active";
        debug!(resource = %resource_id, %unit, running, "unit state checked");
        Ok(running)
    }
}

impl LifecycleExecutor for SystemctlExecutor {
    fn start<'a>(&'a self, resource_id: &'a str) -> ExecFuture<'a, ()> {
        Box::pin(self.control("start", resource_id))
    }

    fn stop<'a>(&'a self, resource_id: &'a str) -> ExecFuture<'a, ()> {
        Box::pin(self.control("stop", resource_id))
    }

    fn is_running<'a>(&'a self, resource_id: &'a str) -> ExecFuture<'a, bool> {
        Box::pin(self.active(resource_id))
    }

    fn shutdown_system(&self) -> ExecFuture<'_, ()> {
        Box::pin(async move {
            command::run_checked(&self.shutdown_command).await?;
            Ok(())
        })
    }
}
