//! Service and per-container lifecycle operations

use std::time::Duration;

use crate::integrations::runtime::{PollOutcome, RuntimeCli};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
}

impl ServiceAction {
    fn args(self) -> &'static [&'static str] {
        match self {
            Self::Start => &["system", "start"],
            Self::Stop => &["system", "stop"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
    Remove,
}

impl ContainerAction {
    /// Subcommands tried in order until one succeeds
    fn attempts(self) -> &'static [&'static [&'static str]] {
        match self {
            Self::Start => &[&["start"]],
            Self::Stop => &[&["stop"]],
            Self::Restart => &[&["restart"]],
            Self::Remove => &[&["delete"], &["rm"], &["rm", "-f"]],
        }
    }

    /// Whether a UI should confirm before issuing this action
    pub fn is_destructive(self) -> bool {
        matches!(self, Self::Stop | Self::Remove)
    }
}

impl std::fmt::Display for ContainerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::Restart => write!(f, "restart"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

/// An exclusive operation; holds the gate for its whole duration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Service(ServiceAction),
    Container { action: ContainerAction, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReport {
    pub success: bool,
    /// Listing taken after the settle delay
    pub refreshed: PollOutcome,
}

pub struct OperationRunner {
    cli: RuntimeCli,
    container_settle: Duration,
    service_settle: Duration,
}

impl OperationRunner {
    pub fn new(cli: RuntimeCli, container_settle: Duration, service_settle: Duration) -> Self {
        Self {
            cli,
            container_settle,
            service_settle,
        }
    }

    /// Issue the command(s), wait for the runtime to settle, then re-list.
    /// The re-list happens whether or not the command succeeded.
    pub async fn run(&self, operation: &Operation) -> OperationReport {
        let (success, settle) = match operation {
            Operation::Service(action) => {
                (self.cli.invoke(action.args()).await, self.service_settle)
            }
            Operation::Container { action, name } => (
                self.run_container(*action, name).await,
                self.container_settle,
            ),
        };

        tokio::time::sleep(settle).await;

        OperationReport {
            success,
            refreshed: self.cli.list().await,
        }
    }

    async fn run_container(&self, action: ContainerAction, name: &str) -> bool {
        for subcommand in action.attempts() {
            let args: Vec<&str> = subcommand.iter().copied().chain([name]).collect();
            if self.cli.invoke(&args).await {
                return true;
            }
        }
        tracing::info!(%action, container = name, "all attempts failed");
        false
    }
}
