//! Events consumed by the monitor's owner task

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::core::operations::{Operation, OperationReport};
use crate::integrations::runtime::PollOutcome;

/// Completion signal for callers waiting on a request
pub type Reply = oneshot::Sender<bool>;

/// All inputs to the owner loop
#[derive(Debug)]
pub enum Event {
    /// Scheduled poll
    Tick,

    /// Requests from monitor handles
    CheckStatus { done: Option<Reply> },
    Operate { operation: Operation, reply: Reply },

    /// Worker completions, marshalled back to the owner
    PollCompleted {
        outcome: PollOutcome,
        /// Operation generation the poll was started in
        generation: u64,
        done: Option<Reply>,
    },
    OperationCompleted {
        report: OperationReport,
        reply: Reply,
    },
}

pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
    pub fn new() -> (Self, mpsc::UnboundedSender<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, tx)
    }

    /// Start the poll timer; the first tick fires one interval from now
    pub fn spawn_ticker(tx: mpsc::UnboundedSender<Event>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(Self::tick_events(tx, interval))
    }

    async fn tick_events(tx: mpsc::UnboundedSender<Event>, interval: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if tx.send(Event::Tick).is_err() {
                break;
            }
        }
    }

    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ticker_sends_ticks_after_interval() {
        let (mut handler, tx) = EventHandler::new();
        let ticker = EventHandler::spawn_ticker(tx, Duration::from_millis(20));

        let event = tokio::time::timeout(Duration::from_secs(2), handler.next())
            .await
            .expect("tick should arrive");

        assert!(matches!(event, Some(Event::Tick)));
        ticker.abort();
    }

    #[tokio::test]
    async fn ticker_stops_when_receiver_is_gone() {
        let (handler, tx) = EventHandler::new();
        let ticker = EventHandler::spawn_ticker(tx, Duration::from_millis(5));
        drop(handler);

        tokio::time::timeout(Duration::from_secs(2), ticker)
            .await
            .expect("ticker should exit")
            .unwrap();
    }
}
