//! Runtime monitor - owner loop, operation gate and public handle
//!
//! All writes to [`MonitorState`] happen on a single owner task. Process I/O
//! runs on spawned worker tasks whose results come back to the owner as
//! events. The `is_operating` gate is a plain flag read and written only by
//! the owner; it is not a lock and would need replacing with real mutual
//! exclusion if a second writer were ever introduced.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::core::events::{Event, EventHandler, Reply};
use crate::core::operations::{
    ContainerAction, Operation, OperationReport, OperationRunner, ServiceAction,
};
use crate::core::state::{MonitorState, RuntimeStatus, StateChange, StateStore};
use crate::integrations::runtime::executor::{CommandExecutor, ShellExecutor};
use crate::integrations::runtime::parser::OutputParser;
use crate::integrations::runtime::resolver::PathResolver;
use crate::integrations::runtime::{
    carry_identities, same_containers, ContainerRecord, PollOutcome, RuntimeCli,
};

/// Owns the background tasks; dropping it stops polling
pub struct Monitor {
    handle: MonitorHandle,
    owner_task: JoinHandle<()>,
    ticker_task: JoinHandle<()>,
}

impl Monitor {
    /// Resolve the runtime executable and start monitoring with the shell executor
    pub fn spawn(config: &Config) -> Self {
        let resolved = PathResolver::default()
            .with_override(config.runtime.tool.clone())
            .resolve();
        Self::with_executor(config, resolved, Arc::new(ShellExecutor::default()))
    }

    /// Start monitoring with an already resolved path and a custom executor
    pub fn with_executor(
        config: &Config,
        resolved: Option<PathBuf>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        let cli = RuntimeCli::new(
            resolved.clone(),
            executor,
            OutputParser::new(config.parser.missing_status),
            config.runtime.list_command,
        );
        let runner = Arc::new(OperationRunner::new(
            cli.clone(),
            config.operations.container_settle(),
            config.operations.service_settle(),
        ));
        let store = StateStore::new(MonitorState::new(resolved));

        let (events, tx) = EventHandler::new();
        let ticker_task = EventHandler::spawn_ticker(tx.clone(), config.polling.interval());

        let owner = Owner {
            store: store.clone(),
            cli,
            runner,
            tx: tx.downgrade(),
            poll_in_flight: false,
            generation: 0,
        };
        let owner_task = tokio::spawn(owner.run(events));

        let handle = MonitorHandle { store, tx };
        handle.check_status();

        Self {
            handle,
            owner_task,
            ticker_task,
        }
    }

    #[allow(dead_code)]
    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    /// Stop the timer and the owner task
    pub fn shutdown(self) {
        drop(self);
    }
}

impl std::ops::Deref for Monitor {
    type Target = MonitorHandle;

    fn deref(&self) -> &MonitorHandle {
        &self.handle
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.ticker_task.abort();
        self.owner_task.abort();
        tracing::debug!("monitor stopped");
    }
}

/// Cloneable read access and request entry point.
///
/// Requests made after the [`Monitor`] is gone are answered with `false`.
#[derive(Clone)]
pub struct MonitorHandle {
    store: StateStore,
    tx: mpsc::UnboundedSender<Event>,
}

impl MonitorHandle {
    pub fn snapshot(&self) -> MonitorState {
        self.store.snapshot()
    }

    pub fn status(&self) -> RuntimeStatus {
        self.store.read().status
    }

    #[allow(dead_code)]
    pub fn containers(&self) -> Vec<ContainerRecord> {
        self.store.read().containers.clone()
    }

    #[allow(dead_code)]
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.store.read().last_updated
    }

    #[allow(dead_code)]
    pub fn is_operating(&self) -> bool {
        self.store.read().is_operating
    }

    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.store.read().resolved_path.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.store.subscribe()
    }

    /// Request a status check without waiting for it
    pub fn check_status(&self) {
        let _ = self.tx.send(Event::CheckStatus { done: None });
    }

    /// Request a status check and wait for it; `false` if it was skipped
    pub async fn refresh(&self) -> bool {
        self.request(|reply| Event::CheckStatus { done: Some(reply) })
            .await
    }

    pub async fn start_service(&self) -> bool {
        self.operate(Operation::Service(ServiceAction::Start)).await
    }

    pub async fn stop_service(&self) -> bool {
        self.operate(Operation::Service(ServiceAction::Stop)).await
    }

    /// Stop a running service, start anything else.
    /// Refused while an operation is in progress or the status is `Error`.
    pub async fn toggle_service(&self) -> bool {
        let (status, busy) = {
            let state = self.store.read();
            (state.status, state.is_operating)
        };
        match status {
            _ if busy => false,
            RuntimeStatus::Error => false,
            RuntimeStatus::Running => self.stop_service().await,
            RuntimeStatus::Stopped => self.start_service().await,
        }
    }

    pub async fn start_container(&self, name: &str) -> bool {
        self.container(ContainerAction::Start, name).await
    }

    pub async fn stop_container(&self, name: &str) -> bool {
        self.container(ContainerAction::Stop, name).await
    }

    pub async fn restart_container(&self, name: &str) -> bool {
        self.container(ContainerAction::Restart, name).await
    }

    pub async fn remove_container(&self, name: &str) -> bool {
        self.container(ContainerAction::Remove, name).await
    }

    async fn container(&self, action: ContainerAction, name: &str) -> bool {
        self.operate(Operation::Container {
            action,
            name: name.to_string(),
        })
        .await
    }

    async fn operate(&self, operation: Operation) -> bool {
        self.request(|reply| Event::Operate { operation, reply })
            .await
    }

    async fn request(&self, build: impl FnOnce(Reply) -> Event) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(build(reply)).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

struct Owner {
    store: StateStore,
    cli: RuntimeCli,
    runner: Arc<OperationRunner>,
    /// Weak so workers never keep the event channel alive on their own
    tx: mpsc::WeakUnboundedSender<Event>,
    poll_in_flight: bool,
    /// Bumped when an operation starts; polls from an older generation are stale
    generation: u64,
}

impl Owner {
    async fn run(mut self, mut events: EventHandler) {
        while let Some(event) = events.next().await {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Tick => {
                if self.gate_open() {
                    self.start_poll(None);
                } else {
                    tracing::debug!("skipping scheduled poll");
                }
            }
            Event::CheckStatus { done } => {
                if self.gate_open() {
                    self.start_poll(done);
                } else {
                    tracing::debug!("status check dropped");
                    reply(done, false);
                }
            }
            Event::Operate { operation, reply } => self.start_operation(operation, reply),
            Event::PollCompleted {
                outcome,
                generation,
                done,
            } => {
                self.poll_in_flight = false;
                if generation != self.generation {
                    tracing::debug!("discarding poll started before an operation");
                    reply(done, false);
                    return;
                }
                self.apply(outcome, None);
                reply(done, true);
            }
            Event::OperationCompleted { report, reply } => {
                self.apply(report.refreshed, Some(false));
                let _ = reply.send(report.success);
            }
        }
    }

    fn gate_open(&self) -> bool {
        !self.poll_in_flight && !self.store.read().is_operating
    }

    fn start_poll(&mut self, done: Option<Reply>) {
        self.poll_in_flight = true;
        let cli = self.cli.clone();
        let tx = self.tx.clone();
        let generation = self.generation;

        tokio::spawn(async move {
            let outcome = cli.list().await;
            send(
                &tx,
                Event::PollCompleted {
                    outcome,
                    generation,
                    done,
                },
            );
        });
    }

    fn start_operation(&mut self, operation: Operation, reply: Reply) {
        if self.cli.tool().is_none() {
            tracing::debug!(?operation, "no runtime executable, operation refused");
            let _ = reply.send(false);
            return;
        }
        if self.store.read().is_operating {
            tracing::debug!(?operation, "operation in progress, request dropped");
            let _ = reply.send(false);
            return;
        }

        tracing::info!(?operation, "starting operation");
        self.generation += 1;
        self.store.update(|s| {
            s.is_operating = true;
            ((), vec![StateChange::OperatingChanged(true)])
        });

        let runner = Arc::clone(&self.runner);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let report: OperationReport = runner.run(&operation).await;
            send(&tx, Event::OperationCompleted { report, reply });
        });
    }

    /// Publish a listing outcome; optionally set the gate in the same update
    fn apply(&mut self, outcome: PollOutcome, operating: Option<bool>) {
        self.store.update(|s| {
            let mut changes = Vec::new();

            let status = match outcome {
                PollOutcome::Listed(mut containers) => {
                    if !same_containers(&s.containers, &containers) {
                        carry_identities(&s.containers, &mut containers);
                        s.containers = containers;
                        changes.push(StateChange::ContainersUpdated);
                    }
                    RuntimeStatus::Running
                }
                PollOutcome::Unavailable | PollOutcome::Inactive => {
                    clear_containers(s, &mut changes);
                    RuntimeStatus::Stopped
                }
                PollOutcome::Faulted(_) => {
                    clear_containers(s, &mut changes);
                    RuntimeStatus::Error
                }
            };

            if s.status != status {
                tracing::info!(from = %s.status, to = %status, "runtime status changed");
                s.status = status;
                changes.push(StateChange::StatusChanged(status));
            }
            s.touch();

            if let Some(operating) = operating {
                if s.is_operating != operating {
                    s.is_operating = operating;
                    changes.push(StateChange::OperatingChanged(operating));
                }
            }

            ((), changes)
        });
    }
}

fn clear_containers(state: &mut MonitorState, changes: &mut Vec<StateChange>) {
    if !state.containers.is_empty() {
        state.containers.clear();
        changes.push(StateChange::ContainersUpdated);
    }
}

fn reply(done: Option<Reply>, accepted: bool) {
    if let Some(done) = done {
        let _ = done.send(accepted);
    }
}

/// Deliver a worker result; the owner may already be gone
fn send(tx: &mpsc::WeakUnboundedSender<Event>, event: Event) {
    match tx.upgrade() {
        Some(tx) => {
            let _ = tx.send(event);
        }
        None => tracing::debug!("monitor gone, discarding result"),
    }
}

/// Waits until one full status check has completed after startup
pub async fn wait_for_check(handle: &MonitorHandle, retry: Duration) {
    while !handle.refresh().await {
        if handle.tx.is_closed() {
            return;
        }
        tokio::time::sleep(retry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::runtime::executor::{CommandOutput, ExecError, MockCommandExecutor};
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TOOL: &str = "/usr/local/bin/container";

    fn test_config() -> Config {
        let mut config = Config::default();
        config.polling.interval_secs = 3600;
        config.operations.container_settle_ms = 150;
        config.operations.service_settle_ms = 150;
        config
    }

    fn listing_mock(output: &'static str) -> MockCommandExecutor {
        let mut mock = MockCommandExecutor::new();
        mock.expect_run()
            .withf(|cmd| cmd.ends_with("ls -a"))
            .returning(move |_| Ok(CommandOutput::ok(output)));
        mock
    }

    fn spawn(mock: MockCommandExecutor) -> Monitor {
        Monitor::with_executor(&test_config(), Some(PathBuf::from(TOOL)), Arc::new(mock))
    }

    async fn ready(monitor: &Monitor) {
        wait_for_check(monitor, Duration::from_millis(5)).await;
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn starts_idle() {
        let monitor = spawn(listing_mock("[]"));
        assert!(!monitor.is_operating());
        assert_eq!(monitor.resolved_path(), Some(PathBuf::from(TOOL)));
    }

    #[tokio::test]
    async fn successful_listing_publishes_running() {
        let monitor = spawn(listing_mock(r#"[{"name":"web","state":"running"}]"#));
        ready(&monitor).await;

        assert_eq!(monitor.status(), RuntimeStatus::Running);
        assert_eq!(
            monitor.containers(),
            vec![ContainerRecord::new("web", "running")]
        );
    }

    #[tokio::test]
    async fn missing_executable_is_stopped_and_empty() {
        let monitor =
            Monitor::with_executor(&test_config(), None, Arc::new(MockCommandExecutor::new()));
        ready(&monitor).await;

        assert_eq!(monitor.status(), RuntimeStatus::Stopped);
        assert!(monitor.containers().is_empty());
        assert_eq!(monitor.resolved_path(), None);

        let mut rx = monitor.subscribe();
        assert!(!monitor.start_container("web").await);
        assert!(!monitor.remove_container("web").await);
        assert!(!monitor.start_service().await);
        assert!(!monitor.is_operating());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn nonzero_listing_is_stopped() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_run()
            .returning(|_| Ok(CommandOutput::exited(1)));
        let monitor = spawn(mock);
        ready(&monitor).await;

        assert_eq!(monitor.status(), RuntimeStatus::Stopped);
        assert!(monitor.containers().is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_is_error_and_clears_containers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut mock = MockCommandExecutor::new();
        mock.expect_run().returning(move |cmd| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(CommandOutput::ok("web nginx\n"))
            } else {
                Err(ExecError::Spawn {
                    command: cmd.to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                })
            }
        });
        let monitor = spawn(mock);
        wait_until(|| monitor.containers().len() == 1).await;
        assert_eq!(monitor.status(), RuntimeStatus::Running);

        assert!(monitor.refresh().await);

        assert_eq!(monitor.status(), RuntimeStatus::Error);
        assert!(monitor.containers().is_empty());
    }

    #[tokio::test]
    async fn unchanged_listing_is_not_republished() {
        let monitor = spawn(listing_mock("NAME IMAGE STATE\nweb nginx running\n"));
        ready(&monitor).await;
        let first = monitor.containers();

        let mut rx = monitor.subscribe();
        assert!(monitor.refresh().await);
        assert!(monitor.refresh().await);

        assert!(rx.try_recv().is_err());
        // Identities are kept because the list was not replaced
        assert_eq!(first[0].identity, monitor.containers()[0].identity);
    }

    #[tokio::test]
    async fn last_updated_never_decreases() {
        let monitor = spawn(listing_mock("[]"));
        ready(&monitor).await;

        let mut previous = monitor.last_updated();
        for _ in 0..5 {
            assert!(monitor.refresh().await);
            let current = monitor.last_updated();
            assert!(current >= previous);
            previous = current;
        }
    }

    #[tokio::test]
    async fn concurrent_checks_settle_cleanly() {
        let monitor = spawn(listing_mock(r#"[{"name":"web","state":"running"}]"#));
        let handle = monitor.handle();

        let results = join_all((0..5).map(|_| {
            let handle = handle.clone();
            async move { handle.refresh().await }
        }))
        .await;
        ready(&monitor).await;

        assert!(results.len() == 5);
        assert!(matches!(
            monitor.status(),
            RuntimeStatus::Running | RuntimeStatus::Stopped | RuntimeStatus::Error
        ));
        assert!(!monitor.is_operating());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn operation_holds_the_gate() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_run()
            .withf(|cmd| cmd.ends_with("container stop web"))
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("")));
        mock.expect_run()
            .withf(|cmd| cmd.ends_with("ls -a"))
            .returning(|_| Ok(CommandOutput::ok(r#"[{"name":"web","state":"stopped"}]"#)));
        let monitor = spawn(mock);
        ready(&monitor).await;

        let mut rx = monitor.subscribe();
        let handle = monitor.handle();
        let operation = tokio::spawn(async move { handle.stop_container("web").await });

        assert_eq!(rx.recv().await.unwrap(), StateChange::OperatingChanged(true));
        assert!(monitor.is_operating());
        assert!(!monitor.refresh().await, "poll must be a no-op while gated");
        assert!(
            !monitor.restart_container("web").await,
            "overlapping operation must be dropped"
        );

        assert!(operation.await.unwrap());
        assert!(!monitor.is_operating());
        assert_eq!(monitor.containers()[0].status, "stopped");
    }

    #[tokio::test]
    async fn failed_operation_still_refreshes_and_releases_gate() {
        let listings = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&listings);
        let mut mock = MockCommandExecutor::new();
        mock.expect_run()
            .withf(|cmd| cmd.ends_with("system stop"))
            .times(1)
            .returning(|_| Ok(CommandOutput::exited(1)));
        mock.expect_run()
            .withf(|cmd| cmd.ends_with("ls -a"))
            .returning(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(CommandOutput::ok("[]"))
            });
        let monitor = spawn(mock);
        ready(&monitor).await;
        let before = listings.load(Ordering::SeqCst);

        assert!(!monitor.stop_service().await);

        assert_eq!(listings.load(Ordering::SeqCst), before + 1);
        assert!(!monitor.is_operating());
        assert_eq!(monitor.status(), RuntimeStatus::Running);
    }

    /// First listing is slow and reports `running`; every later one reports `stopped`
    struct SlowFirstListing {
        listings: AtomicUsize,
    }

    #[async_trait]
    impl CommandExecutor for SlowFirstListing {
        async fn run(&self, command_line: &str) -> Result<CommandOutput, ExecError> {
            if !command_line.ends_with("ls -a") {
                return Ok(CommandOutput::ok(""));
            }
            if self.listings.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(500)).await;
                return Ok(CommandOutput::ok(r#"[{"name":"web","state":"running"}]"#));
            }
            Ok(CommandOutput::ok(r#"[{"name":"web","state":"stopped"}]"#))
        }
    }

    #[tokio::test]
    async fn poll_started_before_an_operation_is_discarded() {
        let executor = Arc::new(SlowFirstListing {
            listings: AtomicUsize::new(0),
        });
        let monitor =
            Monitor::with_executor(&test_config(), Some(PathBuf::from(TOOL)), executor);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(monitor.stop_container("web").await);
        assert_eq!(monitor.containers()[0].status, "stopped");

        // Let the initial listing finish well after the operation
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(monitor.containers()[0].status, "stopped");
        assert!(!monitor.is_operating());
        assert!(monitor.refresh().await, "gate should be open again");
    }

    #[tokio::test]
    async fn scheduled_polls_skip_while_an_operation_runs() {
        let listings = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&listings);
        let mut mock = MockCommandExecutor::new();
        mock.expect_run()
            .withf(|cmd| cmd.ends_with("container restart web"))
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("")));
        mock.expect_run()
            .withf(|cmd| cmd.ends_with("ls -a"))
            .returning(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(CommandOutput::ok("[]"))
            });

        let mut config = test_config();
        config.polling.interval_secs = 1;
        // Long enough for two ticks to land inside the gated window
        config.operations.container_settle_ms = 2_500;
        let monitor =
            Monitor::with_executor(&config, Some(PathBuf::from(TOOL)), Arc::new(mock));
        ready(&monitor).await;
        let before = listings.load(Ordering::SeqCst);

        assert!(monitor.restart_container("web").await);
        assert_eq!(listings.load(Ordering::SeqCst), before + 1);

        // Once the gate is open the timer polls again
        wait_until(|| listings.load(Ordering::SeqCst) > before + 1).await;
    }

    #[tokio::test]
    async fn container_identity_survives_status_changes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut mock = MockCommandExecutor::new();
        mock.expect_run().returning(move |_| {
            let state = match counter.fetch_add(1, Ordering::SeqCst) {
                0 => "running",
                _ => "exited",
            };
            Ok(CommandOutput::ok(&format!(
                r#"[{{"name":"web","state":"{}"}}]"#,
                state
            )))
        });
        let monitor = spawn(mock);
        wait_until(|| monitor.containers().len() == 1).await;
        let before = monitor.containers()[0].identity;

        assert!(monitor.refresh().await);

        let after = &monitor.containers()[0];
        assert_eq!(after.status, "exited");
        assert_eq!(after.identity, before);
    }

    #[tokio::test]
    async fn toggle_service_follows_status() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_run()
            .withf(|cmd| cmd.ends_with("system stop"))
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("")));
        mock.expect_run()
            .withf(|cmd| cmd.ends_with("ls -a"))
            .returning(|_| Ok(CommandOutput::ok("[]")));
        let monitor = spawn(mock);
        ready(&monitor).await;
        assert_eq!(monitor.status(), RuntimeStatus::Running);

        assert!(monitor.toggle_service().await);
    }

    #[tokio::test]
    async fn requests_after_shutdown_report_failure() {
        let monitor = spawn(listing_mock("[]"));
        let handle = monitor.handle();
        monitor.shutdown();
        tokio::task::yield_now().await;

        assert!(!handle.refresh().await);
        assert!(!handle.start_container("web").await);
    }
}
