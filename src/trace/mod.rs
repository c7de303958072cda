//! Reasoning-trace data model and reconstruction.
//!
//! A backend "thinking" process streams small text fragments tagged with a
//! stage name. This module rebuilds those fragments into a structured
//! [`ReasoningSession`] per process: an ordered list of [`ReasoningStep`]s,
//! one per consecutive run of fragments sharing a stage.
//!
//! # Architecture
//!
//! - [`event`]: decodes raw stream records into a closed set of events
//! - [`accumulator`]: pure reducer deciding continuation vs. new step
//! - [`registry`]: process-id → session map owned by one subscription
//! - [`direct`]: session-less whole-buffer channel for the active generation
//! - [`projection`]: read-only merge of both read models
//!
//! # Example
//!
//! ```rust
//! use thinking_trace::trace::event::decode;
//! use thinking_trace::trace::registry::SessionRegistry;
//! use thinking_trace::trace::SessionFilter;
//!
//! let mut registry = SessionRegistry::new();
//! let record = r#"{"type":"thinking","process":{"id":"p1","conversation_id":"c1"},"thought":"Hmm","timestamp":"2024-01-01T00:00:00Z"}"#;
//! registry.apply(decode(record));
//!
//! let sessions = registry.snapshot(&SessionFilter::default());
//! assert_eq!(sessions[0].steps[0].thought, "Hmm");
//! ```

pub mod accumulator;
pub mod direct;
pub mod event;
pub mod projection;
pub mod registry;

use std::sync::Arc;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stage assigned to fragments that do not name one.
pub const DEFAULT_STAGE: &str = "reasoning";

/// Placeholder for model/provider when the backend omits them.
pub const UNKNOWN: &str = "unknown";

/// One stage of a reasoning trace.
///
/// Only the last step of a session may still grow; earlier steps are frozen.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReasoningStep {
    /// Locally generated step identifier.
    pub id: String,
    /// Timestamp of the fragment that opened this step.
    pub timestamp: String,
    /// Stage name, e.g. `analyzing` or `planning`.
    pub stage: String,
    /// Concatenated thought text of every fragment in this stage.
    pub thought: String,
    /// Time until the next step (or completion) began.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ReasoningStep {
    /// Open a new step with a fresh id.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        thought: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: timestamp.into(),
            stage: stage.into(),
            thought: thought.into(),
            duration_ms: None,
        }
    }
}

/// Lifecycle of a reasoning session.
///
/// `Thinking` transitions at most once, to either terminal state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Thinking,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Whether no further transition is allowed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Thinking)
    }
}

/// Reconstructed trace of one backend process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReasoningSession {
    /// Backend process id.
    pub id: String,
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub model: String,
    pub provider: String,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub status: SessionStatus,
    /// Ordered steps; never empty once the session is registered.
    ///
    /// Steps are shared with published snapshots, so extending the last step
    /// copies only that step.
    pub steps: Vec<Arc<ReasoningStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ReasoningSession {
    /// The step that is still allowed to grow.
    #[must_use]
    pub fn current_step(&self) -> Option<&ReasoningStep> {
        self.steps.last().map(Arc::as_ref)
    }

    /// All thought text across steps, in order.
    #[must_use]
    pub fn full_thought(&self) -> String {
        self.steps.iter().map(|s| s.thought.as_str()).collect()
    }
}

/// Read-side filter for session snapshots. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
}

impl SessionFilter {
    /// Only sessions of the given conversation.
    #[must_use]
    pub fn conversation(id: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(id.into()),
            message_id: None,
        }
    }

    /// Only sessions attached to the given message.
    #[must_use]
    pub fn message(id: impl Into<String>) -> Self {
        Self {
            conversation_id: None,
            message_id: Some(id.into()),
        }
    }

    /// Narrow an existing filter to one message.
    #[must_use]
    pub fn with_message(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Exact-match test against a session.
    #[must_use]
    pub fn matches(&self, session: &ReasoningSession) -> bool {
        if let Some(conversation_id) = &self.conversation_id {
            if &session.conversation_id != conversation_id {
                return false;
            }
        }
        match &self.message_id {
            Some(message_id) => session.message_id.as_ref() == Some(message_id),
            None => true,
        }
    }
}

/// Milliseconds between two RFC 3339 timestamps, if both parse and `to >= from`.
pub(crate) fn elapsed_ms(from: &str, to: &str) -> Option<u64> {
    let from = DateTime::parse_from_rfc3339(from).ok()?;
    let to = DateTime::parse_from_rfc3339(to).ok()?;
    u64::try_from((to - from).num_milliseconds()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(conversation: &str, message: Option<&str>) -> ReasoningSession {
        ReasoningSession {
            id: "p".to_string(),
            conversation_id: conversation.to_string(),
            message_id: message.map(ToString::to_string),
            ..ReasoningSession::default()
        }
    }

    #[test]
    fn test_filter_matching() {
        let s = session("c1", Some("m1"));

        assert!(SessionFilter::default().matches(&s));
        assert!(SessionFilter::conversation("c1").matches(&s));
        assert!(!SessionFilter::conversation("c2").matches(&s));
        assert!(SessionFilter::message("m1").matches(&s));
        assert!(!SessionFilter::message("m2").matches(&s));
        assert!(!SessionFilter::message("m1").matches(&session("c1", None)));
        assert!(SessionFilter::conversation("c1").with_message("m1").matches(&s));
    }

    #[test]
    fn test_elapsed_ms() {
        assert_eq!(
            elapsed_ms("2024-01-01T00:00:00Z", "2024-01-01T00:00:01.500Z"),
            Some(1500)
        );
        assert_eq!(elapsed_ms("2024-01-01T00:00:01Z", "2024-01-01T00:00:00Z"), None);
        assert_eq!(elapsed_ms("yesterday", "2024-01-01T00:00:00Z"), None);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&SessionStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        assert!(SessionStatus::Failed.is_terminal());
        assert!(!SessionStatus::Thinking.is_terminal());
    }
}
