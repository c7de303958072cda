//! Read-only projection over both trace read models.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use super::direct::DirectChannelBuffer;
use super::{ReasoningSession, SessionFilter};
use crate::subscriber::{SubscriptionStatus, TraceState};

/// One renderable item of the trace panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEntry {
    /// Live buffer of the generation currently streaming.
    Direct(DirectChannelBuffer),
    Session(Arc<ReasoningSession>),
}

/// Handle the presentation layer polls or awaits.
///
/// Each view is an independent subscriber; dropping it unsubscribes.
#[derive(Debug, Clone)]
pub struct TraceView {
    state: watch::Receiver<TraceState>,
    direct: watch::Receiver<Option<DirectChannelBuffer>>,
}

impl TraceView {
    pub(crate) fn new(
        state: watch::Receiver<TraceState>,
        direct: watch::Receiver<Option<DirectChannelBuffer>>,
    ) -> Self {
        Self { state, direct }
    }

    /// Sessions matching `filter`, newest first.
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

    /// Active direct buffer first, then matching sessions.
    #[must_use]
    pub fn entries(&self, filter: &SessionFilter) -> Vec<TraceEntry> {
        let mut entries: Vec<TraceEntry> = self
            .active_direct()
            .into_iter()
            .map(TraceEntry::Direct)
            .collect();
        entries.extend(self.snapshot(filter).into_iter().map(TraceEntry::Session));
        entries
    }

    /// The direct buffer, only while its generation is active.
    #[must_use]
    pub fn active_direct(&self) -> Option<DirectChannelBuffer> {
        self.direct.borrow().as_ref().filter(|b| b.active).cloned()
    }

    #[must_use]
    pub fn status(&self) -> SubscriptionStatus {
        self.state.borrow().status.clone()
    }

    #[must_use]
    pub fn conversation_id(&self) -> Option<String> {
        self.state.borrow().conversation_id.clone()
    }

    /// Whether the session was newly created and should open expanded.
    #[must_use]
    pub fn is_auto_expanded(&self, id: &str) -> bool {
        self.state.borrow().auto_expanded.iter().any(|x| x == id)
    }

    /// Wait for the next change of either read model.
    ///
    /// Returns `false` once the engine behind this view has been dropped.
    pub async fn changed(&mut self) -> bool {
        tokio::select! {
            result = self.state.changed() => result.is_ok(),
            result = self.direct.changed() => result.is_ok(),
        }
    }
}
