//! Container runtime integration - CLI invocation, listing and record types

pub mod executor;
pub mod parser;
pub mod resolver;

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use self::executor::CommandExecutor;
use self::parser::OutputParser;

/// One container as reported by the runtime
///
/// `identity` is assigned locally to tell list entries apart and follows a
/// container by name across listings (see [`carry_identities`]). It never
/// takes part in equality, so two records describing the same container
/// compare equal even when parsed from different listings.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerRecord {
    #[serde(skip)]
    pub identity: Uuid,
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

impl ContainerRecord {
    pub fn new(name: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            identity: Uuid::new_v4(),
            name: name.into(),
            status: status.into(),
            image: None,
            ports: None,
            created: None,
        }
    }

    pub fn with_image(mut self, image: Option<String>) -> Self {
        self.image = image;
        self
    }

    pub fn with_ports(mut self, ports: Option<String>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_created(mut self, created: Option<String>) -> Self {
        self.created = created;
        self
    }

    fn content(&self) -> (&str, &str, Option<&str>, Option<&str>, Option<&str>) {
        (
            &self.name,
            &self.status,
            self.image.as_deref(),
            self.ports.as_deref(),
            self.created.as_deref(),
        )
    }
}

impl PartialEq for ContainerRecord {
    fn eq(&self, other: &Self) -> bool {
        self.content() == other.content()
    }
}

impl Eq for ContainerRecord {}

/// Whether two listings describe the same containers, ignoring order and identity
pub fn same_containers(previous: &[ContainerRecord], next: &[ContainerRecord]) -> bool {
    if previous.len() != next.len() {
        return false;
    }

    let mut lhs: Vec<_> = previous.iter().map(ContainerRecord::content).collect();
    let mut rhs: Vec<_> = next.iter().map(ContainerRecord::content).collect();
    lhs.sort_unstable();
    rhs.sort_unstable();
    lhs == rhs
}

/// Keep the identity of every record whose name was already listed.
///
/// Each previous record is claimed at most once, so duplicate names pair up
/// in listing order and any extra records keep their fresh identity.
pub fn carry_identities(previous: &[ContainerRecord], next: &mut [ContainerRecord]) {
    let mut unclaimed: Vec<&ContainerRecord> = previous.iter().collect();
    for record in next.iter_mut() {
        if let Some(pos) = unclaimed.iter().position(|old| old.name == record.name) {
            record.identity = unclaimed.remove(pos).identity;
        }
    }
}

/// Which listing subcommand the installed tool understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListCommand {
    /// `ls -a`
    #[default]
    Ls,
    /// `list`, used by older tool versions
    List,
}

impl ListCommand {
    pub fn args(self) -> &'static [&'static str] {
        match self {
            Self::Ls => &["ls", "-a"],
            Self::List => &["list"],
        }
    }
}

/// Result of one listing attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No executable was resolved
    Unavailable,
    /// The listing exited non-zero or printed undecodable output
    Inactive,
    /// The listing process could not be run at all
    Faulted(String),
    Listed(Vec<ContainerRecord>),
}

/// Thin wrapper over the resolved runtime executable
#[derive(Clone)]
pub struct RuntimeCli {
    tool: Option<PathBuf>,
    executor: Arc<dyn CommandExecutor>,
    parser: Arc<OutputParser>,
    list_command: ListCommand,
}

impl RuntimeCli {
    pub fn new(
        tool: Option<PathBuf>,
        executor: Arc<dyn CommandExecutor>,
        parser: OutputParser,
        list_command: ListCommand,
    ) -> Self {
        Self {
            tool,
            executor,
            parser: Arc::new(parser),
            list_command,
        }
    }

    pub fn tool(&self) -> Option<&Path> {
        self.tool.as_deref()
    }

    /// Run the listing subcommand and classify the result
    pub async fn list(&self) -> PollOutcome {
        let Some(tool) = self.tool() else {
            return PollOutcome::Unavailable;
        };

        let command_line = command_line(tool, self.list_command.args());
        match self.executor.run(&command_line).await {
            Ok(output) if output.success() => match output.stdout_text() {
                Some(text) => PollOutcome::Listed(self.parser.parse(text)),
                None => {
                    tracing::debug!("listing output is not valid UTF-8");
                    PollOutcome::Inactive
                }
            },
            Ok(output) => {
                tracing::debug!(
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr_lossy(),
                    "listing exited unsuccessfully"
                );
                PollOutcome::Inactive
            }
            Err(e) => {
                tracing::warn!("listing could not run: {}", e);
                PollOutcome::Faulted(e.to_string())
            }
        }
    }

    /// Run a subcommand; `true` only when it ran and exited 0
    pub async fn invoke(&self, args: &[&str]) -> bool {
        let Some(tool) = self.tool() else {
            return false;
        };

        let command_line = command_line(tool, args);
        match self.executor.run(&command_line).await {
            Ok(output) if output.success() => {
                tracing::info!(command = %command_line, "command succeeded");
                true
            }
            Ok(output) => {
                tracing::info!(
                    command = %command_line,
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr_lossy(),
                    "command failed"
                );
                false
            }
            Err(e) => {
                tracing::warn!("{}", e);
                false
            }
        }
    }
}

/// Join the tool path and arguments into a `sh -c` command line
pub fn command_line(tool: &Path, args: &[&str]) -> String {
    let tool = tool.to_string_lossy();
    std::iter::once(shell_quote(&tool))
        .chain(args.iter().map(|arg| shell_quote(arg)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> Cow<'_, str> {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@%+=,".contains(c));
    if plain {
        Cow::Borrowed(arg)
    } else {
        Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
    }
}
