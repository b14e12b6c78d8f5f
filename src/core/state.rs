//! Published monitor state with change notification

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::integrations::runtime::ContainerRecord;

/// Overall state of the runtime service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    Running,
    #[default]
    Stopped,
    Error,
}

/// How a renderer should present a status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTone {
    Success,
    Neutral,
    Failure,
}

impl RuntimeStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Error => "Error",
        }
    }

    pub fn tone(self) -> StatusTone {
        match self {
            Self::Running => StatusTone::Success,
            Self::Stopped => StatusTone::Neutral,
            Self::Error => StatusTone::Failure,
        }
    }
}

impl std::fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Everything the monitor publishes
#[derive(Debug, Clone)]
pub struct MonitorState {
    pub status: RuntimeStatus,
    pub containers: Vec<ContainerRecord>,
    pub last_updated: DateTime<Utc>,
    pub is_operating: bool,
    /// Resolved once at startup and never changed afterwards
    pub resolved_path: Option<PathBuf>,
}

impl MonitorState {
    pub fn new(resolved_path: Option<PathBuf>) -> Self {
        Self {
            status: RuntimeStatus::Stopped,
            containers: Vec::new(),
            last_updated: Utc::now(),
            is_operating: false,
            resolved_path,
        }
    }

    /// Advance `last_updated` to now; never moves it backwards
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.last_updated {
            self.last_updated = now;
        }
    }
}

/// Content changes, sent only when something observable actually changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    StatusChanged(RuntimeStatus),
    ContainersUpdated,
    OperatingChanged(bool),
}

/// Shared state store.
///
/// Any number of readers may hold a clone, but only the monitor's owner task
/// calls [`StateStore::update`]. The lock guards against torn reads, not
/// against competing writers.
pub struct StateStore {
    state: Arc<RwLock<MonitorState>>,
    change_tx: broadcast::Sender<StateChange>,
}

impl StateStore {
    pub fn new(initial: MonitorState) -> Self {
        let (change_tx, _) = broadcast::channel(256);
        Self {
            state: Arc::new(RwLock::new(initial)),
            change_tx,
        }
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.change_tx.subscribe()
    }

    /// Mutate the state, then broadcast the changes the mutator reports
    pub fn update<F, R>(&self, mutator: F) -> R
    where
        F: FnOnce(&mut MonitorState) -> (R, Vec<StateChange>),
    {
        let (result, changes) = {
            let mut state = self.state.write();
            mutator(&mut state)
        };
        for change in changes {
            let _ = self.change_tx.send(change);
        }
        result
    }

    /// Read current state
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, MonitorState> {
        self.state.read()
    }

    /// Get a clone of the current state
    pub fn snapshot(&self) -> MonitorState {
        self.state.read().clone()
    }
}

impl Clone for StateStore {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            change_tx: self.change_tx.clone(),
        }
    }
}
