//! Decoding of raw stream records into typed events.
//!
//! The stream carries loosely-typed JSON records. Everything is decoded into
//! the closed [`DecodedEvent`] set at this boundary; anything that does not
//! fit becomes [`DecodedEvent::Ignored`] so a bad record can never take the
//! subscription down.
//!
//! # Wire format
//!
//! ```json
//! { "type": "thinking",
//!   "process": { "id": "p1", "conversation_id": "c1", "message_id": "m1",
//!                "metadata": { "model": "gpt-4o", "provider": "openai" } },
//!   "stage": "analyzing", "thought": "Look", "timestamp": "2024-01-01T00:00:00Z" }
//!
//! { "type": "process_completed",
//!   "process": { "id": "p1", "type": "thinking" },
//!   "timestamp": "2024-01-01T00:00:05Z", "metadata": { "thinking_tokens": 42 } }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::DEFAULT_STAGE;

/// Record `type` of a reasoning fragment.
pub const FRAGMENT_TYPE: &str = "thinking";

/// Record `type` of a process completion.
pub const COMPLETED_TYPE: &str = "process_completed";

/// The only process kind whose completion this engine tracks.
pub const THINKING_PROCESS: &str = "thinking";

/// Model/provider hints attached to a process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessMetadata {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// Process descriptor carried by every fragment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FragmentProcess {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub conversation_id: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: ProcessMetadata,
}

/// An incremental piece of thought text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReasoningFragment {
    pub process: FragmentProcess,
    pub thought: String,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: String,
}

impl ReasoningFragment {
    /// Stage name, falling back to [`DEFAULT_STAGE`].
    #[must_use]
    pub fn stage_or_default(&self) -> &str {
        self.stage.as_deref().unwrap_or(DEFAULT_STAGE)
    }
}

/// Process descriptor carried by a completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletedProcess {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionMetadata {
    #[serde(default)]
    pub thinking_tokens: Option<u64>,
}

/// Signal that a backend process finished.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessCompleted {
    pub process: CompletedProcess,
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: String,
    #[serde(default)]
    pub metadata: Option<CompletionMetadata>,
}

impl ProcessCompleted {
    /// Token count reported by the backend, if any.
    #[must_use]
    pub fn thinking_tokens(&self) -> Option<u64> {
        self.metadata.as_ref().and_then(|m| m.thinking_tokens)
    }
}

/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Why a record was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Payload is not JSON.
    NotJson,
    /// JSON without a string `type` field.
    MissingType,
    /// A `type` this engine does not handle.
    UnknownType(String),
    /// Known `type` but required fields are missing or mistyped.
    Malformed(String),
    /// Completion of a process that is not a thinking process.
    NotThinking(String),
}

/// Result of decoding one stream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    Fragment(ReasoningFragment),
    Completed(ProcessCompleted),
    Ignored(IgnoreReason),
}

impl DecodedEvent {
    /// Process id the event refers to, if it was decoded.
    #[must_use]
    pub fn process_id(&self) -> Option<&str> {
        match self {
            Self::Fragment(f) => Some(&f.process.id),
            Self::Completed(c) => Some(&c.process.id),
            Self::Ignored(_) => None,
        }
    }

    #[must_use]
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }
}

/// Decode one raw record. Never fails; undecodable input is `Ignored`.
pub fn decode(record: &str) -> DecodedEvent {
    let value: Value = match serde_json::from_str(record) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, len = record.len(), "Dropping non-JSON stream record");
            return DecodedEvent::Ignored(IgnoreReason::NotJson);
        }
    };

    let Some(kind) = value.get("type").and_then(Value::as_str).map(ToString::to_string) else {
        tracing::debug!("Dropping stream record without type");
        return DecodedEvent::Ignored(IgnoreReason::MissingType);
    };

    match kind.as_str() {
        FRAGMENT_TYPE => match serde_json::from_value::<ReasoningFragment>(value) {
            Ok(fragment) if fragment.process.id.trim().is_empty() => {
                malformed(&kind, &"empty process id")
            }
            Ok(fragment) => DecodedEvent::Fragment(fragment),
            Err(e) => malformed(&kind, &e),
        },
        COMPLETED_TYPE => match serde_json::from_value::<ProcessCompleted>(value) {
            Ok(completed) if completed.process.id.trim().is_empty() => {
                malformed(&kind, &"empty process id")
            }
            Ok(completed) if completed.process.kind == THINKING_PROCESS => {
                DecodedEvent::Completed(completed)
            }
            Ok(completed) => {
                tracing::debug!(
                    process_id = %completed.process.id,
                    process_type = %completed.process.kind,
                    "Ignoring completion of non-thinking process"
                );
                DecodedEvent::Ignored(IgnoreReason::NotThinking(completed.process.kind))
            }
            Err(e) => malformed(&kind, &e),
        },
        _ => {
            tracing::debug!(event_type = %kind, "Ignoring unknown stream event type");
            DecodedEvent::Ignored(IgnoreReason::UnknownType(kind))
        }
    }
}

fn malformed(kind: &str, err: &dyn std::fmt::Display) -> DecodedEvent {
    tracing::warn!(event_type = %kind, error = %err, "Dropping malformed stream record");
    DecodedEvent::Ignored(IgnoreReason::Malformed(err.to_string()))
}
