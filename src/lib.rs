//! Thinking Trace
//!
//! Live reconstruction of backend reasoning traces for an AI-chat client.
//! A backend process streams incremental "thinking" fragments for many
//! concurrent processes over one server-push stream; this crate demultiplexes
//! them per process, groups consecutive fragments into stages, tracks
//! completion, and exposes the result as a read-only projection.
//!
//! # Architecture
//!
//! - **Transport**: [`transport::EventSource`] seam with an HTTP SSE implementation
//! - **Decoding**: closed set of tagged events, malformed records degrade to `Ignored`
//! - **Reconstruction**: pure stage accumulator plus a per-conversation session registry
//! - **Subscription**: one owning task per conversation, injectable reconnect policy
//! - **Projection**: merged read model of structured sessions and the direct channel
//!
//! # Modules
//!
//! - [`trace`]: data model, decoder, accumulator, registry, direct channel, projection
//! - [`subscriber`]: conversation-scoped stream lifecycle
//! - [`transport`]: event sources and frame codec
//! - [`config`]: layered configuration
//! - [`telemetry`]: logging setup

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::match_same_arms)]

pub mod config;
pub mod error;
pub mod subscriber;
pub mod telemetry;
pub mod trace;
pub mod transport;

pub use error::{Error, Result};
pub use subscriber::{ReconnectPolicy, StreamSubscriber, SubscriptionStatus};
pub use trace::direct::DirectChannel;
pub use trace::projection::{TraceEntry, TraceView};
pub use trace::{ReasoningSession, ReasoningStep, SessionFilter, SessionStatus};
