//! Conversation-scoped subscription to the reasoning event stream.
//!
//! Exactly one subscription is open at a time. Changing the conversation
//! closes the previous one (waiting for its task to stop) before the next is
//! opened, and nothing listens while no conversation is selected, so events
//! of one conversation never leak into another.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use thinking_trace::subscriber::StreamSubscriber;
//! use thinking_trace::trace::SessionFilter;
//! use thinking_trace::transport::sse::HttpEventSource;
//!
//! # async fn example() -> thinking_trace::Result<()> {
//! let source = HttpEventSource::new("http://localhost:3000", "/api/thinking/stream")?;
//! let mut subscriber = StreamSubscriber::new(Arc::new(source));
//! let mut view = subscriber.view();
//!
//! subscriber.set_conversation(Some("conv-1")).await;
//! while view.changed().await {
//!     for session in view.snapshot(&SessionFilter::default()) {
//!         println!("{}: {} steps", session.id, session.steps.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod policy;
mod state;
mod task;

pub use policy::{Backoff, ReconnectPolicy};
pub use state::{SubscriptionStatus, TraceState};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::trace::direct::DirectChannel;
use crate::trace::projection::TraceView;
use crate::trace::{ReasoningSession, SessionFilter};
use crate::transport::EventSource;
use task::SubscriptionTask;

#[derive(Debug)]
struct ActiveSubscription {
    conversation_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the stream subscription for the currently selected conversation.
#[derive(Debug)]
pub struct StreamSubscriber {
    source: Arc<dyn EventSource>,
    policy: ReconnectPolicy,
    idle_timeout: Option<Duration>,
    state: Arc<watch::Sender<TraceState>>,
    direct: DirectChannel,
    active: Option<ActiveSubscription>,
    generation: u64,
}

impl StreamSubscriber {
    /// Create an idle subscriber over the given event source.
    #[must_use]
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        let (tx, _) = watch::channel(TraceState::default());
        Self {
            source,
            policy: ReconnectPolicy::default(),
            idle_timeout: None,
            state: Arc::new(tx),
            direct: DirectChannel::new(),
            active: None,
            generation: 0,
        }
    }

    /// Set the reconnect policy for subscriptions opened after this call.
    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Treat a stream that is silent for `timeout` as broken.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Conversation the current subscription is scoped to.
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.conversation_id.as_str())
    }

    /// Whether a subscription task is still running.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.handle.is_finished())
    }

    /// Switch the subscription to another conversation, or to none.
    ///
    /// Selecting the conversation that is already live is a no-op. Selecting
    /// it again after its stream closed opens a fresh subscription.
    pub async fn set_conversation(&mut self, conversation_id: Option<&str>) {
        let next = conversation_id.map(str::trim).filter(|id| !id.is_empty());

        if let (Some(active), Some(next)) = (&self.active, next) {
            let closed = matches!(self.status(), SubscriptionStatus::Closed { .. });
            if active.conversation_id == next && !closed && !active.handle.is_finished() {
                return;
            }
        }
        if self.active.is_none() && next.is_none() {
            return;
        }

        self.close().await;
        self.reset(next);

        if let Some(id) = next {
            self.open(id);
        }
    }

    /// Close the current subscription and return to idle.
    pub async fn shutdown(&mut self) {
        self.close().await;
        self.reset(None);
    }

    /// Read-side projection; drop it to unsubscribe.
    #[must_use]
    pub fn view(&self) -> TraceView {
        TraceView::new(self.state.subscribe(), self.direct.subscribe())
    }

    /// Direct-channel adapter for the active generation.
    #[must_use]
    pub fn direct(&self) -> &DirectChannel {
        &self.direct
    }

    /// Current sessions of the subscribed conversation, newest first.
    #[must_use]
    pub fn snapshot(&self, filter: &SessionFilter) -> Vec<Arc<ReasoningSession>> {
        self.state
            .borrow()
            .sessions
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn status(&self) -> SubscriptionStatus {
        self.state.borrow().status.clone()
    }

    fn open(&mut self, conversation_id: &str) {
        let cancel = CancellationToken::new();
        let task = SubscriptionTask::new(
            Arc::clone(&self.source),
            conversation_id.to_string(),
            self.generation,
            self.policy.clone(),
            self.idle_timeout,
            cancel.clone(),
            Arc::clone(&self.state),
        );

        tracing::info!(conversation_id = %conversation_id, "Opening trace subscription");
        self.active = Some(ActiveSubscription {
            conversation_id: conversation_id.to_string(),
            cancel,
            handle: tokio::spawn(task.run()),
        });
    }

    async fn close(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        active.cancel.cancel();
        if let Err(e) = active.handle.await {
            if e.is_panic() {
                tracing::error!(
                    conversation_id = %active.conversation_id,
                    error = %e,
                    "Trace subscription task panicked"
                );
            }
        }
        tracing::info!(conversation_id = %active.conversation_id, "Trace subscription closed");
    }

    /// Start a new, empty scope. Sessions of the previous scope are discarded.
    fn reset(&mut self, conversation_id: Option<&str>) {
        self.generation += 1;
        self.state.send_replace(TraceState::scoped(
            self.generation,
            conversation_id.map(ToString::to_string),
        ));
    }
}

impl Drop for StreamSubscriber {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }
}
