//! Process-id → session registry.
//!
//! The registry is owned by exactly one subscription task and mutated only
//! from there, one event at a time. Sessions are held behind [`Arc`] and
//! updated with [`Arc::make_mut`], so published snapshots are cheap to take
//! and never observe a later mutation.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;

use super::accumulator::{accumulate, begin, close_step};
use super::event::{DecodedEvent, ProcessCompleted, ReasoningFragment, THINKING_PROCESS};
use super::{ReasoningSession, SessionFilter, SessionStatus};

#[derive(Debug)]
struct Entry {
    /// Creation order, used for newest-first snapshots.
    seq: u64,
    session: Arc<ReasoningSession>,
}

/// In-memory map of live reasoning sessions for one conversation scope.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Entry>,
    next_seq: u64,
    auto_expand: BTreeSet<String>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one decoded event. Returns whether any session changed.
    pub fn apply(&mut self, event: DecodedEvent) -> bool {
        match event {
            DecodedEvent::Fragment(fragment) => self.on_fragment(&fragment),
            DecodedEvent::Completed(completed) => self.on_completed(&completed),
            DecodedEvent::Ignored(_) => false,
        }
    }

    /// Create or extend the session the fragment belongs to.
    pub fn on_fragment(&mut self, fragment: &ReasoningFragment) -> bool {
        let id = &fragment.process.id;

        if let Some(entry) = self.sessions.get_mut(id) {
            if entry.session.status.is_terminal() {
                tracing::debug!(
                    process_id = %id,
                    status = ?entry.session.status,
                    "Dropping fragment for finished session"
                );
                return false;
            }
            let session = Arc::make_mut(&mut entry.session);
            *session = accumulate(std::mem::take(session), fragment);
            return true;
        }

        let session = begin(fragment);
        tracing::info!(
            process_id = %id,
            conversation_id = %session.conversation_id,
            model = %session.model,
            "Reasoning session started"
        );

        self.auto_expand.insert(id.clone());
        self.sessions.insert(
            id.clone(),
            Entry {
                seq: self.next_seq,
                session: Arc::new(session),
            },
        );
        self.next_seq += 1;
        true
    }

    /// Mark a thinking session completed. Unknown ids and repeats are no-ops.
    pub fn on_completed(&mut self, event: &ProcessCompleted) -> bool {
        if event.process.kind != THINKING_PROCESS {
            return false;
        }

        let Some(entry) = self.sessions.get_mut(&event.process.id) else {
            // Reconnects can deliver a completion before (or without) its fragments.
            tracing::debug!(process_id = %event.process.id, "Dropping completion for unknown session");
            return false;
        };
        if entry.session.status.is_terminal() {
            return false;
        }

        let completed_at = if event.timestamp.is_empty() {
            Utc::now().to_rfc3339()
        } else {
            event.timestamp.clone()
        };

        let session = Arc::make_mut(&mut entry.session);
        if let Some(last) = session.steps.last_mut() {
            close_step(Arc::make_mut(last), &completed_at);
        }
        session.status = SessionStatus::Completed;
        session.completed_at = Some(completed_at);
        if let Some(tokens) = event.thinking_tokens() {
            session.total_tokens = Some(tokens);
        }

        tracing::info!(
            process_id = %session.id,
            steps = session.steps.len(),
            total_tokens = ?session.total_tokens,
            "Reasoning session completed"
        );
        true
    }

    /// Mark a thinking session failed, recording the reason as its summary.
    pub fn fail(&mut self, id: &str, reason: impl Into<String>) -> bool {
        let Some(entry) = self.sessions.get_mut(id) else {
            return false;
        };
        if entry.session.status.is_terminal() {
            return false;
        }

        let session = Arc::make_mut(&mut entry.session);
        let failed_at = Utc::now().to_rfc3339();
        if let Some(last) = session.steps.last_mut() {
            close_step(Arc::make_mut(last), &failed_at);
        }
        session.status = SessionStatus::Failed;
        session.completed_at = Some(failed_at);
        session.summary = Some(reason.into());

        tracing::warn!(process_id = %id, reason = ?session.summary, "Reasoning session failed");
        true
    }

    /// Matching sessions, most recently created first.
    #[must_use]
    pub fn snapshot(&self, filter: &SessionFilter) -> Vec<Arc<ReasoningSession>> {
        let mut entries: Vec<&Entry> = self
            .sessions
            .values()
            .filter(|entry| filter.matches(&entry.session))
            .collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        entries
            .into_iter()
            .map(|entry| Arc::clone(&entry.session))
            .collect()
    }

    /// Get a session by process id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<ReasoningSession>> {
        self.sessions.get(id).map(|entry| Arc::clone(&entry.session))
    }

    /// Whether the session was marked for auto-expansion on creation.
    #[must_use]
    pub fn is_auto_expanded(&self, id: &str) -> bool {
        self.auto_expand.contains(id)
    }

    /// Ids marked for auto-expansion, sorted.
    #[must_use]
    pub fn auto_expanded(&self) -> Vec<String> {
        self.auto_expand.iter().cloned().collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session.
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.auto_expand.clear();
    }
}
