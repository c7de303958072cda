//! The task that owns one conversation's stream and registry.

use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::policy::ReconnectPolicy;
use super::state::{SubscriptionStatus, TraceState};
use crate::trace::SessionFilter;
use crate::trace::event::decode;
use crate::trace::registry::SessionRegistry;
use crate::transport::{EventSource, EventStream, TransportError};

/// Most records folded into one published snapshot.
const MAX_BATCH: usize = 256;

#[derive(Debug)]
enum PumpOutcome {
    Cancelled,
    Ended {
        received: bool,
        error: TransportError,
    },
}

/// Single writer for one conversation scope.
///
/// Events are decoded and applied in arrival order on this task only; the
/// registry is never shared, readers get published snapshots.
pub(super) struct SubscriptionTask {
    source: Arc<dyn EventSource>,
    conversation_id: String,
    generation: u64,
    policy: ReconnectPolicy,
    idle_timeout: Option<Duration>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<TraceState>>,
    registry: SessionRegistry,
}

impl SubscriptionTask {
    pub(super) fn new(
        source: Arc<dyn EventSource>,
        conversation_id: String,
        generation: u64,
        policy: ReconnectPolicy,
        idle_timeout: Option<Duration>,
        cancel: CancellationToken,
        state: Arc<watch::Sender<TraceState>>,
    ) -> Self {
        Self {
            source,
            conversation_id,
            generation,
            policy,
            idle_timeout,
            cancel,
            state,
            registry: SessionRegistry::new(),
        }
    }

    #[tracing::instrument(
        name = "trace.subscription",
        skip(self),
        fields(conversation_id = %self.conversation_id, generation = self.generation)
    )]
    pub(super) async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            self.set_status(SubscriptionStatus::Connecting);

            let connected = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                result = self.source.connect(&self.conversation_id) => result,
            };

            let error = match connected {
                Ok(stream) => {
                    tracing::info!("Trace stream connected");
                    self.set_status(SubscriptionStatus::Live);
                    match self.pump(stream).await {
                        PumpOutcome::Cancelled => return,
                        PumpOutcome::Ended { received, error } => {
                            if received {
                                attempt = 0;
                            }
                            error
                        }
                    }
                }
                Err(error) => error,
            };

            attempt += 1;
            let Some(delay) = self.policy.delay(attempt) else {
                tracing::warn!(error = %error, sessions = self.registry.len(), "Trace stream closed");
                self.set_status(SubscriptionStatus::Closed {
                    reason: error.to_string(),
                });
                return;
            };

            tracing::warn!(
                error = %error,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Trace stream lost, reconnecting"
            );
            self.set_status(SubscriptionStatus::Reconnecting { attempt });

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn pump(&mut self, mut stream: EventStream) -> PumpOutcome {
        let mut received = false;

        loop {
            let item = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return PumpOutcome::Cancelled,
                item = next_record(&mut stream, self.idle_timeout) => item,
            };

            // A record that raced with teardown must not be applied.
            if self.cancel.is_cancelled() {
                tracing::debug!("Discarding record received during teardown");
                return PumpOutcome::Cancelled;
            }

            match item {
                Some(Ok(record)) => {
                    received = true;
                    let mut batch = vec![record];
                    let ended = drain_ready(&mut stream, &mut batch);
                    self.dispatch(&batch);
                    if let Some(error) = ended {
                        return PumpOutcome::Ended { received, error };
                    }
                }
                Some(Err(error)) => return PumpOutcome::Ended { received, error },
                None => {
                    return PumpOutcome::Ended {
                        received,
                        error: TransportError::Closed,
                    };
                }
            }
        }
    }

    /// Apply records in order and publish once if anything changed.
    fn dispatch(&mut self, records: &[String]) {
        let mut changed = false;
        for record in records {
            let event = decode(record);
            if !event.is_ignored() {
                changed |= self.registry.apply(event);
            }
        }

        if changed {
            let registry = &self.registry;
            self.publish(|state| {
                state.sessions = registry.snapshot(&SessionFilter::default());
                state.auto_expanded = registry.auto_expanded();
            });
        }
    }

    fn set_status(&self, status: SubscriptionStatus) {
        self.publish(|state| state.status = status);
    }

    /// Publish under this task's generation; rejected once the scope moved on.
    fn publish(&self, update: impl FnOnce(&mut TraceState)) {
        self.state.send_if_modified(|state| {
            if state.generation != self.generation || self.cancel.is_cancelled() {
                return false;
            }
            update(state);
            true
        });
    }
}

/// Move records that are already buffered into `batch` without waiting.
///
/// Returns the error that ended the stream, if it ended while draining.
fn drain_ready(stream: &mut EventStream, batch: &mut Vec<String>) -> Option<TransportError> {
    while batch.len() < MAX_BATCH {
        match stream.next().now_or_never() {
            None => return None,
            Some(Some(Ok(record))) => batch.push(record),
            Some(Some(Err(error))) => return Some(error),
            Some(None) => return Some(TransportError::Closed),
        }
    }
    None
}

async fn next_record(
    stream: &mut EventStream,
    idle_timeout: Option<Duration>,
) -> Option<Result<String, TransportError>> {
    match idle_timeout {
        None => stream.next().await,
        Some(limit) => tokio::time::timeout(limit, stream.next())
            .await
            .unwrap_or(Some(Err(TransportError::Idle(limit)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Unreachable;

    #[async_trait::async_trait]
    impl EventSource for Unreachable {
        async fn connect(&self, _conversation_id: &str) -> Result<EventStream, TransportError> {
            Err(TransportError::Closed)
        }
    }

    fn fragment(id: &str, thought: &str) -> String {
        serde_json::json!({
            "type": "thinking",
            "process": { "id": id, "conversation_id": "c1" },
            "stage": "analyzing",
            "thought": thought,
            "timestamp": "2024-01-01T00:00:00Z",
        })
        .to_string()
    }

    fn scoped_state(generation: u64) -> Arc<watch::Sender<TraceState>> {
        let (tx, _) = watch::channel(TraceState::scoped(generation, Some("c1".to_string())));
        Arc::new(tx)
    }

    fn task(generation: u64, state: &Arc<watch::Sender<TraceState>>) -> SubscriptionTask {
        SubscriptionTask::new(
            Arc::new(Unreachable),
            "c1".to_string(),
            generation,
            ReconnectPolicy::Never,
            None,
            CancellationToken::new(),
            Arc::clone(state),
        )
    }

    #[test]
    fn test_dispatch_publishes_current_generation() {
        let state = scoped_state(1);
        let rx = state.subscribe();
        let mut task = task(1, &state);

        task.dispatch(&[fragment("p1", "a"), fragment("p1", "b")]);

        assert!(rx.has_changed().unwrap());
        let published = state.borrow();
        assert_eq!(published.sessions.len(), 1);
        assert_eq!(published.sessions[0].full_thought(), "ab");
        assert_eq!(published.auto_expanded, ["p1"]);
    }

    #[test]
    fn test_stale_generation_cannot_publish() {
        // The subscriber already moved on to generation 2.
        let state = scoped_state(2);
        let rx = state.subscribe();
        let mut task = task(1, &state);

        task.dispatch(&[fragment("p1", "late")]);
        task.set_status(SubscriptionStatus::Live);

        assert_eq!(task.registry.len(), 1);
        assert!(!rx.has_changed().unwrap());
        let published = state.borrow();
        assert!(published.sessions.is_empty());
        assert_eq!(published.status, SubscriptionStatus::Connecting);
    }

    #[test]
    fn test_cancelled_task_cannot_publish() {
        let state = scoped_state(1);
        let rx = state.subscribe();
        let mut task = task(1, &state);
        task.cancel.cancel();

        task.dispatch(&[fragment("p1", "late")]);
        task.set_status(SubscriptionStatus::Live);

        assert!(!rx.has_changed().unwrap());
        let published = state.borrow();
        assert!(published.sessions.is_empty());
        assert_eq!(published.status, SubscriptionStatus::Connecting);
    }

    #[tokio::test]
    async fn test_pump_discards_records_after_cancel() {
        let state = scoped_state(1);
        let mut task = task(1, &state);
        task.cancel.cancel();

        let records: Vec<Result<String, TransportError>> = vec![Ok(fragment("p1", "x"))];
        let outcome = task.pump(Box::pin(futures::stream::iter(records))).await;

        assert!(matches!(outcome, PumpOutcome::Cancelled));
        assert!(task.registry.is_empty());
        assert!(state.borrow().sessions.is_empty());
    }

    #[tokio::test]
    async fn test_pump_applies_buffered_records_in_order() {
        let state = scoped_state(1);
        let mut task = task(1, &state);

        let records: Vec<Result<String, TransportError>> = vec![
            Ok(fragment("p1", "a")),
            Ok("not json".to_string()),
            Ok(fragment("p1", "b")),
            Ok(fragment("p2", "c")),
        ];
        let outcome = task.pump(Box::pin(futures::stream::iter(records))).await;

        assert!(matches!(
            outcome,
            PumpOutcome::Ended {
                received: true,
                error: TransportError::Closed
            }
        ));
        let published = state.borrow();
        let ids: Vec<&str> = published.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["p2", "p1"]);
        assert_eq!(published.sessions[1].full_thought(), "ab");
    }

    #[tokio::test]
    async fn test_pump_reports_error_after_buffered_records() {
        let state = scoped_state(1);
        let mut task = task(1, &state);

        let records: Vec<Result<String, TransportError>> = vec![
            Ok(fragment("p1", "a")),
            Err(TransportError::Io(std::io::Error::other("reset"))),
            Ok(fragment("p1", "never")),
        ];
        let outcome = task.pump(Box::pin(futures::stream::iter(records))).await;

        assert!(matches!(
            outcome,
            PumpOutcome::Ended {
                received: true,
                error: TransportError::Io(_)
            }
        ));
        assert_eq!(state.borrow().sessions[0].full_thought(), "a");
    }
}
