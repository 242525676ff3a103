//! Keep-alive token relay between a generation stream and a slow client.
//!
//! A producer task drains the upstream [`TokenStream`] into a bounded queue.
//! The consumer side waits on that queue with a keep-alive timeout: every
//! delta is forwarded as soon as it arrives, and a [`RelayEvent::KeepAlive`]
//! is emitted whenever the upstream stays silent for a full interval. Once the
//! producer has finished and the queue is drained, the relay reports the
//! outcome and ends.
//!
//! Dropping the [`Relay`] (for example when the HTTP client disconnects)
//! cancels the producer, which in turn drops the upstream request.

use futures_util::stream::{self, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::StreamConfig;
use crate::llm::TokenStream;

#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    pub keepalive: Duration,
    pub capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

impl From<&StreamConfig> for RelayConfig {
    fn from(config: &StreamConfig) -> Self {
        Self {
            keepalive: Duration::from_secs(config.keepalive_secs),
            capacity: config.queue_capacity.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Token(String),
    KeepAlive,
    /// The upstream failed; always followed by `Completed`.
    Failed(String),
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Started,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

pub struct Relay {
    rx: mpsc::Receiver<String>,
    outcome: Option<oneshot::Receiver<Option<String>>>,
    cancel: CancellationToken,
    _guard: DropGuard,
    keepalive: Duration,
    state: RelayState,
    pending: Option<RelayEvent>,
    finished: bool,
}

impl Relay {
    /// Start relaying `upstream`. Must be called inside a tokio runtime.
    pub fn spawn(upstream: TokenStream, config: RelayConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        tokio::spawn(produce(upstream, tx, cancel.clone(), outcome_tx));

        Self {
            rx,
            outcome: Some(outcome_rx),
            _guard: cancel.clone().drop_guard(),
            cancel,
            keepalive: config.keepalive,
            state: RelayState::Started,
            pending: None,
            finished: false,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Stop the producer. No further events are emitted.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.rx.close();
        self.state = RelayState::Cancelled;
        self.finished = true;
    }

    /// Next event, or `None` once the relay has ended.
    pub async fn next_event(&mut self) -> Option<RelayEvent> {
        if let Some(event) = self.pending.take() {
            self.finished = event == RelayEvent::Completed;
            return Some(event);
        }
        if self.finished {
            return None;
        }

        match timeout(self.keepalive, self.rx.recv()).await {
            Ok(Some(delta)) => {
                self.state = RelayState::Streaming;
                Some(RelayEvent::Token(delta))
            }
            Ok(None) => Some(self.finish().await),
            Err(_) => Some(RelayEvent::KeepAlive),
        }
    }

    /// The queue is closed and drained: report how the producer ended.
    async fn finish(&mut self) -> RelayEvent {
        let failure = match self.outcome.take() {
            Some(outcome) => outcome
                .await
                .unwrap_or_else(|_| Some("generation task ended unexpectedly".to_string())),
            None => None,
        };

        match failure {
            Some(message) => {
                self.state = RelayState::Failed;
                self.pending = Some(RelayEvent::Completed);
                RelayEvent::Failed(message)
            }
            None => {
                self.state = RelayState::Completed;
                self.finished = true;
                RelayEvent::Completed
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = RelayEvent> + Send {
        stream::unfold(self, |mut relay| async move {
            let event = relay.next_event().await?;
            Some((event, relay))
        })
    }
}

/// Forward non-empty deltas until the upstream ends, fails or is cancelled.
/// Sends `Some(message)` on `outcome` when the upstream failed.
async fn produce(
    mut upstream: TokenStream,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    outcome: oneshot::Sender<Option<String>>,
) {
    let failure = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break None,
            next = upstream.next() => next,
        };

        match next {
            Some(Ok(delta)) => {
                if delta.is_empty() {
                    continue;
                }
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break None,
                    sent = tx.send(delta) => sent,
                };
                // Receiver gone
                if sent.is_err() {
                    break None;
                }
            }
            Some(Err(e)) => {
                tracing::warn!("Generation stream failed: {e}");
                break Some(e.to_string());
            }
            None => break None,
        }
    };

    if cancel.is_cancelled() {
        tracing::debug!("Relay producer cancelled");
    }
    let _ = outcome.send(failure);
    // `tx` drops here, closing the queue after the outcome is recorded.
}
