use crate::subscriber::{Backoff, ReconnectPolicy};
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Follow the reasoning trace of one conversation", long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Conversation to follow
    pub conversation: Option<String>,

    /// Base URL of the backend
    #[arg(long, env = "STREAM_BASE_URL")]
    pub base_url: Option<String>,

    /// Bearer token for the stream endpoint
    #[arg(long, env = "STREAM_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Reconnect with backoff when the stream drops
    #[arg(long, env = "RECONNECT_ENABLED")]
    pub reconnect: Option<bool>,

    /// Treat the stream as stalled after this many silent milliseconds
    #[arg(long, env = "IDLE_TIMEOUT_MS")]
    pub idle_timeout_ms: Option<u64>,

    /// Print snapshots as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub reconnect: ReconnectConfig,
    pub log: LogConfig,
    pub tail: TailConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    pub base_url: String,
    pub stream_path: String,
    pub auth_token: Option<String>,
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub max_attempts: u32,
    pub jitter: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub filter: String,
    /// `compact` or `json`.
    pub format: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TailConfig {
    pub conversation_id: Option<String>,
    pub json: bool,
}

impl AppConfig {
    pub fn load() -> crate::Result<Self> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> crate::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("stream.base_url", "http://127.0.0.1:3000")?
            .set_default("stream.stream_path", "/api/thinking/stream")?
            .set_default("reconnect.enabled", false)?
            .set_default("reconnect.initial_delay_ms", 500)?
            .set_default("reconnect.max_delay_ms", 30_000)?
            .set_default("reconnect.multiplier", 2.0)?
            .set_default("reconnect.max_attempts", 5)?
            .set_default("reconnect.jitter", true)?
            .set_default("log.filter", "info,thinking_trace=debug")?
            .set_default("log.format", "compact")?
            .set_default("tail.json", false)?;

        // Explicit file must exist; ./trace.{yaml,toml,json} is optional.
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("trace").required(false)),
        };

        // TRACE_STREAM__BASE_URL=http://... style overrides
        builder = builder.add_source(
            Environment::with_prefix("TRACE")
                .separator("__")
                .try_parsing(true),
        );

        // CLI flags win over everything else.
        if let Some(url) = cli.base_url {
            builder = builder.set_override("stream.base_url", url)?;
        }
        if let Some(token) = cli.auth_token {
            builder = builder.set_override("stream.auth_token", token)?;
        }
        if let Some(idle) = cli.idle_timeout_ms {
            builder = builder.set_override("stream.idle_timeout_ms", idle)?;
        }
        if let Some(enabled) = cli.reconnect {
            builder = builder.set_override("reconnect.enabled", enabled)?;
        }
        if let Some(conversation) = cli.conversation {
            builder = builder.set_override("tail.conversation_id", conversation)?;
        }
        if cli.json {
            builder = builder.set_override("tail.json", true)?;
        }

        let cfg = builder.build()?;
        let app: Self = cfg.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.stream.base_url.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "stream.base_url cannot be empty".to_string(),
            ));
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(config::ConfigError::Message(
                "reconnect.multiplier must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Reconnect policy described by the `reconnect` section.
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let r = &self.reconnect;
        if !r.enabled {
            return ReconnectPolicy::Never;
        }
        ReconnectPolicy::Backoff(Backoff {
            initial: Duration::from_millis(r.initial_delay_ms),
            max: Duration::from_millis(r.max_delay_ms),
            multiplier: r.multiplier,
            max_attempts: r.max_attempts,
            jitter: r.jitter,
        })
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.stream
            .idle_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
