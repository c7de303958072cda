//! Stage accumulation: the continuation vs. new-step decision.
//!
//! Backends stream one stage's reasoning as many small deltas. A fragment
//! whose stage equals the last step's stage is appended to that step;
//! anything else opens a new step. History before the last step is never
//! rewritten.

use std::sync::Arc;

use super::event::ReasoningFragment;
use super::{ReasoningSession, ReasoningStep, SessionStatus, UNKNOWN, elapsed_ms};

/// Fold one fragment into a session.
#[must_use]
pub fn accumulate(mut session: ReasoningSession, fragment: &ReasoningFragment) -> ReasoningSession {
    let stage = fragment.stage_or_default();

    let continues = session.steps.last().is_some_and(|last| last.stage == stage);

    if continues {
        if let Some(last) = session.steps.last_mut() {
            Arc::make_mut(last).thought.push_str(&fragment.thought);
        }
        return session;
    }

    if let Some(previous) = session.steps.last_mut() {
        close_step(Arc::make_mut(previous), &fragment.timestamp);
    }
    session.steps.push(Arc::new(ReasoningStep::new(
        stage,
        fragment.thought.clone(),
        fragment.timestamp.clone(),
    )));
    session
}

/// Build a session from the first fragment of an unseen process.
#[must_use]
pub fn begin(fragment: &ReasoningFragment) -> ReasoningSession {
    let process = &fragment.process;
    let seed = ReasoningSession {
        id: process.id.clone(),
        conversation_id: process.conversation_id.clone(),
        message_id: process.message_id.clone(),
        model: process
            .metadata
            .model
            .clone()
            .unwrap_or_else(|| UNKNOWN.to_string()),
        provider: process
            .metadata
            .provider
            .clone()
            .unwrap_or_else(|| UNKNOWN.to_string()),
        started_at: process
            .started_at
            .clone()
            .unwrap_or_else(|| fragment.timestamp.clone()),
        completed_at: None,
        status: SessionStatus::Thinking,
        steps: Vec::new(),
        total_tokens: None,
        summary: None,
    };
    accumulate(seed, fragment)
}

/// Stamp the duration of a step that is being superseded or finished.
pub(crate) fn close_step(step: &mut ReasoningStep, until: &str) {
    if step.duration_ms.is_none() {
        step.duration_ms = elapsed_ms(&step.timestamp, until);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::event::{FragmentProcess, ProcessMetadata};

    fn fragment(stage: Option<&str>, thought: &str, timestamp: &str) -> ReasoningFragment {
        ReasoningFragment {
            process: FragmentProcess {
                id: "p1".to_string(),
                conversation_id: "c1".to_string(),
                message_id: None,
                started_at: None,
                metadata: ProcessMetadata::default(),
            },
            thought: thought.to_string(),
            stage: stage.map(ToString::to_string),
            timestamp: timestamp.to_string(),
        }
    }

    #[test]
    fn test_same_stage_concatenates() {
        let parts = ["The ", "quick ", "brown ", "fox"];
        let mut session = begin(&fragment(Some("analyzing"), parts[0], "t0"));
        for part in &parts[1..] {
            session = accumulate(session, &fragment(Some("analyzing"), part, "t1"));
        }

        assert_eq!(session.steps.len(), 1);
        assert_eq!(session.steps[0].thought, parts.concat());
        assert_eq!(session.steps[0].timestamp, "t0");
    }

    #[test]
    fn test_stage_change_opens_step() {
        let session = begin(&fragment(Some("analyzing"), "a", "2024-01-01T00:00:00Z"));
        let first_id = session.steps[0].id.clone();

        let session = accumulate(session, &fragment(Some("planning"), "b", "2024-01-01T00:00:02Z"));
        assert_eq!(session.steps.len(), 2);
        assert_eq!(session.steps[0].id, first_id);
        assert_eq!(session.steps[0].thought, "a");
        assert_eq!(session.steps[0].duration_ms, Some(2000));
        assert_eq!(session.steps[1].stage, "planning");
        assert_ne!(session.steps[1].id, first_id);

        // Returning to an earlier stage is a new step, not a rewrite.
        let session = accumulate(session, &fragment(Some("analyzing"), "c", "2024-01-01T00:00:03Z"));
        assert_eq!(session.steps.len(), 3);
        assert_eq!(session.steps[0].thought, "a");
        assert_eq!(session.steps[2].thought, "c");
    }

    #[test]
    fn test_missing_stage_defaults() {
        let session = begin(&fragment(None, "x", "t0"));
        let session = accumulate(session, &fragment(Some("reasoning"), "y", "t1"));

        assert_eq!(session.steps.len(), 1);
        assert_eq!(session.steps[0].stage, "reasoning");
        assert_eq!(session.steps[0].thought, "xy");
    }

    #[test]
    fn test_begin_fills_defaults() {
        let session = begin(&fragment(None, "x", "t0"));

        assert_eq!(session.id, "p1");
        assert_eq!(session.status, SessionStatus::Thinking);
        assert_eq!(session.model, UNKNOWN);
        assert_eq!(session.provider, UNKNOWN);
        assert_eq!(session.started_at, "t0");
        assert_eq!(session.steps.len(), 1);
    }
}
