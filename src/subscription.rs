//! Reconnecting subscription to one scope's event stream
//!
//! ```text
//! Idle → Connecting → Streaming → (BackoffWait → Connecting)* → Terminated
//! ```
//!
//! A clean end of stream reconnects at once and costs nothing. Transient
//! failures wait with backoff and count against the attempt budget; the
//! count resets once a connection delivers its first document. Opening a
//! stream is bounded by the idle timeout like every read. Cancellation at
//! any suspension point ends the loop quietly. Every other error ends it
//! with that error.

use crate::dispatch::DispatchRegistry;
use crate::error::{FeedError, Result};
use crate::framer::{frames, DEFAULT_IDLE_TIMEOUT};
use crate::retry::RetryConfig;
use crate::types::{Inbound, Scope};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Raw body of a streaming response
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Opens the streaming request for a scope
///
/// Implementations report connectivity problems as transient errors
/// (`FeedError::Connection`) and rejected requests as `FeedError::Api`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, scope: Scope) -> Result<ByteStream>;
}

/// Observable lifecycle of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Connecting,
    Streaming,
    /// Waiting before retry number `attempt`
    BackoffWait { attempt: u32 },
    Terminated,
}

/// How one connection ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The server closed the stream normally; connect again
    Ended,
    /// Cancellation was requested; stop
    Cancelled,
}

/// Long-running consumer of one scope
pub struct ReconnectingSubscription {
    scope: Scope,
    connector: Arc<dyn Connector>,
    registry: Arc<DispatchRegistry>,
    retry: RetryConfig,
    idle_timeout: Duration,
    state: watch::Sender<SubscriptionState>,
}

impl ReconnectingSubscription {
    pub fn new(scope: Scope, connector: Arc<dyn Connector>, registry: Arc<DispatchRegistry>) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Idle);
        Self {
            scope,
            connector,
            registry,
            retry: RetryConfig::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            state,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Watch the lifecycle state
    pub fn state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.subscribe()
    }

    /// Drive the state machine until cancelled or a fatal error
    ///
    /// Returns `Ok(())` only on cancellation.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let attempts = self.retry.attempts();
        let mut failures = 0u32;

        let result = loop {
            self.state.send_replace(SubscriptionState::Connecting);
            tracing::debug!(scope = %self.scope, "Connecting");

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                opened = tokio::time::timeout(self.idle_timeout, self.connector.open(self.scope)) => {
                    opened.unwrap_or_else(|_| Err(FeedError::Stalled(self.idle_timeout)))
                }
            };

            let outcome = match opened {
                Ok(stream) => {
                    self.state.send_replace(SubscriptionState::Streaming);
                    tracing::info!(scope = %self.scope, "Getting messages from scope");
                    self.consume(stream, &cancel, &mut failures).await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(StreamOutcome::Ended) => {
                    tracing::info!(scope = %self.scope, "End of stream, reconnecting");
                }
                Ok(StreamOutcome::Cancelled) => break Ok(()),
                Err(e) if e.is_transient() => {
                    failures += 1;
                    if failures >= attempts {
                        tracing::error!(
                            scope = %self.scope,
                            attempts = failures,
                            error = %e,
                            "Giving up on subscription"
                        );
                        break Err(FeedError::RetriesExhausted {
                            scope: self.scope,
                            attempts: failures,
                            last: Box::new(e),
                        });
                    }

                    let delay = self.retry.delay_for_attempt(failures - 1);
                    tracing::warn!(
                        scope = %self.scope,
                        attempt = failures,
                        max_attempts = attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Connection lost, retrying after backoff"
                    );
                    self.state
                        .send_replace(SubscriptionState::BackoffWait { attempt: failures });

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(scope = %self.scope, error = ?e, "Subscription failed");
                    break Err(e);
                }
            }
        };

        if result.is_ok() {
            tracing::trace!(scope = %self.scope, "Subscription cancelled");
        }
        self.state.send_replace(SubscriptionState::Terminated);
        result
    }

    /// Read one connection to its end, dispatching as messages arrive
    ///
    /// Clears `failures` on the first complete document.
    async fn consume(
        &self,
        stream: ByteStream,
        cancel: &CancellationToken,
        failures: &mut u32,
    ) -> Result<StreamOutcome> {
        let documents = frames(stream, self.idle_timeout);
        futures::pin_mut!(documents);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StreamOutcome::Cancelled),
                next = documents.next() => next,
            };

            let Some(document) = next else {
                return Ok(StreamOutcome::Ended);
            };
            let document = document?;
            *failures = 0;

            match Inbound::classify(document)? {
                Inbound::Heartbeat => tracing::trace!(scope = %self.scope, "Heartbeat"),
                Inbound::Event(event) => {
                    self.registry.resolve_and_dispatch(self.scope, event);
                }
            }
        }
    }
}
