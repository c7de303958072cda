//! State published by the subscription to readers.

use std::sync::Arc;

use serde::Serialize;

use crate::trace::ReasoningSession;

/// Connection state of the current subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// No conversation selected; nothing is listening.
    #[default]
    Idle,
    Connecting,
    Live,
    Reconnecting {
        attempt: u32,
    },
    /// The stream ended and will not be retried. Sessions are kept as they were.
    Closed {
        reason: String,
    },
}

/// Immutable snapshot of one conversation scope.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TraceState {
    /// Bumped on every conversation switch; stale publishers are rejected.
    #[serde(skip)]
    pub generation: u64,
    pub conversation_id: Option<String>,
    pub status: SubscriptionStatus,
    /// All sessions of the scope, newest first.
    pub sessions: Vec<Arc<ReasoningSession>>,
    pub auto_expanded: Vec<String>,
}

impl TraceState {
    pub(crate) fn scoped(generation: u64, conversation_id: Option<String>) -> Self {
        let status = if conversation_id.is_some() {
            SubscriptionStatus::Connecting
        } else {
            SubscriptionStatus::Idle
        };
        Self {
            generation,
            conversation_id,
            status,
            sessions: Vec::new(),
            auto_expanded: Vec::new(),
        }
    }
}
