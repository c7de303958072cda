//! trace-tail
//!
//! Follows the live reasoning trace of one conversation and prints it on
//! every change.

// Allow pedantic clippy warnings that don't add value for this binary
#![allow(clippy::print_stdout)]

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::info;

use thinking_trace::config::AppConfig;
use thinking_trace::telemetry;
use thinking_trace::trace::SessionFilter;
use thinking_trace::transport::sse::HttpEventSource;
use thinking_trace::{StreamSubscriber, SubscriptionStatus, TraceEntry, TraceView};

/// Longest thought tail shown per session in text mode.
const THOUGHT_PREVIEW_CHARS: usize = 120;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let config = AppConfig::load().context("Failed to load configuration")?;
    telemetry::init(&config.log);

    let Some(conversation_id) = config.tail.conversation_id.clone() else {
        anyhow::bail!("No conversation selected: pass one as argument or set tail.conversation_id");
    };

    let source = HttpEventSource::new(&config.stream.base_url, &config.stream.stream_path)?
        .with_auth_token(config.stream.auth_token.clone());

    info!(
        name: "trace.config.loaded",
        endpoint = %source.endpoint(),
        reconnect = ?config.reconnect_policy(),
        idle_timeout = ?config.idle_timeout(),
        "Trace configuration loaded"
    );

    let mut subscriber = StreamSubscriber::new(Arc::new(source))
        .with_policy(config.reconnect_policy())
        .with_idle_timeout(config.idle_timeout());
    let mut view = subscriber.view();

    subscriber.set_conversation(Some(&conversation_id)).await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            changed = view.changed() => {
                if !changed {
                    break;
                }
                render(&view, config.tail.json)?;
                if matches!(view.status(), SubscriptionStatus::Closed { .. }) {
                    break;
                }
            }
        }
    }

    subscriber.shutdown().await;
    Ok(())
}

fn render(view: &TraceView, json: bool) -> anyhow::Result<()> {
    let entries = view.entries(&SessionFilter::default());
    let mut out = std::io::stdout().lock();

    if json {
        serde_json::to_writer(&mut out, &entries)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(
        out,
        "── {} [{:?}] {} entr{}",
        view.conversation_id().unwrap_or_default(),
        view.status(),
        entries.len(),
        if entries.len() == 1 { "y" } else { "ies" }
    )?;

    for entry in &entries {
        match entry {
            TraceEntry::Direct(buffer) => {
                writeln!(
                    out,
                    "  ▸ live {}: {}",
                    buffer.model.as_deref().unwrap_or("?"),
                    tail(&buffer.text)
                )?;
            }
            TraceEntry::Session(session) => {
                let marker = if view.is_auto_expanded(&session.id) { "▾" } else { "▸" };
                writeln!(
                    out,
                    "  {marker} {} {:?} {}/{} steps={} tokens={}",
                    session.id,
                    session.status,
                    session.provider,
                    session.model,
                    session.steps.len(),
                    session
                        .total_tokens
                        .map_or_else(|| "-".to_string(), |t| t.to_string()),
                )?;
                if let Some(step) = session.current_step() {
                    writeln!(out, "      {}: {}", step.stage, tail(&step.thought))?;
                }
            }
        }
    }
    Ok(())
}

/// Last [`THOUGHT_PREVIEW_CHARS`] characters, on one line.
fn tail(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let count = flat.chars().count();
    if count <= THOUGHT_PREVIEW_CHARS {
        return flat;
    }
    let tail: String = flat.chars().skip(count - THOUGHT_PREVIEW_CHARS).collect();
    format!("…{tail}")
}
