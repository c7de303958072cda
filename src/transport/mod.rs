//! Event transport: where raw reasoning records come from.
//!
//! The subscriber only needs an [`EventSource`] that, given a conversation
//! id, yields raw text records in arrival order. [`sse::HttpEventSource`] is
//! the production implementation; tests plug in scripted sources.

pub mod frame;
pub mod sse;

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use thiserror::Error;

/// Stream of raw records from one connection.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Low-level transport failure. Always ends the current connection.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("stream endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no record received for {0:?}")]
    Idle(Duration),

    #[error("stream closed by server")]
    Closed,
}

/// A server-push source of reasoning records scoped to one conversation.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync + std::fmt::Debug {
    /// Open a stream for `conversation_id`.
    async fn connect(&self, conversation_id: &str) -> Result<EventStream, TransportError>;
}
