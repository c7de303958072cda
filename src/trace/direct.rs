//! Direct channel: whole-buffer streaming of the active generation.
//!
//! Not every generation is wrapped in a reasoning process, yet the UI still
//! wants a trace-like view while tokens arrive. The generation pipeline pushes
//! the full accumulated text on every update; this adapter only holds the
//! latest value. There is no accumulation and no process id.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Latest state of the active generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectChannelBuffer {
    pub text: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Holder for the current [`DirectChannelBuffer`].
///
/// Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct DirectChannel {
    tx: Arc<watch::Sender<Option<DirectChannelBuffer>>>,
}

impl Default for DirectChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectChannel {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the buffer with the latest generation state.
    pub fn push(
        &self,
        text: impl Into<String>,
        active: bool,
        model: Option<String>,
        provider: Option<String>,
    ) {
        let buffer = DirectChannelBuffer {
            text: text.into(),
            active,
            model,
            provider,
        };
        let previous = self.tx.send_replace(Some(buffer));
        if !previous.is_some_and(|b| b.active) && active {
            tracing::debug!("Direct channel generation started");
        }
    }

    /// Current buffer, if a generation has pushed one.
    #[must_use]
    pub fn read(&self) -> Option<DirectChannelBuffer> {
        self.tx.borrow().clone()
    }

    /// Discard the buffer once the generation has ended.
    pub fn finish(&self) {
        if self.tx.send_replace(None).is_some() {
            tracing::debug!("Direct channel generation finished");
        }
    }

    /// Receiver notified on every push or finish.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<DirectChannelBuffer>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_replaces_wholesale() {
        let channel = DirectChannel::new();
        assert!(channel.read().is_none());

        channel.push("Hel", true, Some("gpt-4o".to_string()), Some("openai".to_string()));
        channel.push("Hello", true, None, None);

        let buffer = channel.read().unwrap();
        assert_eq!(buffer.text, "Hello");
        assert!(buffer.active);
        assert!(buffer.model.is_none());
    }

    #[test]
    fn test_finish_discards() {
        let channel = DirectChannel::new();
        channel.push("done", false, None, None);
        channel.finish();
        assert!(channel.read().is_none());
    }

    #[tokio::test]
    async fn test_subscribers_are_notified() {
        let channel = DirectChannel::new();
        let mut rx = channel.subscribe();

        channel.clone().push("a", true, None, None);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().text, "a");
    }
}
