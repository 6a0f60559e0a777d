//! Process configuration: `clap::Parser` CLI with env-var fallback, matching
//! the teacher CLIs' config surface. Unlike those CLIs, the two API keys
//! have no default — an absent key is a fatal [`ConfigError`] the caller
//! must check explicitly before the `tokio` runtime starts accepting
//! connections.

use clap::Parser;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "interview-server")]
#[command(about = "Real-time voice interview orchestrator core")]
#[command(version)]
pub struct ServerConfig {
    /// Address the HTTP/WS listener binds to.
    #[arg(long, env = "INTERVIEW_BIND", default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Base URL of the streaming ASR provider (scheme `ws://`/`wss://`).
    #[arg(long, env = "ASR_WS_URL", default_value = "wss://asr.example.com")]
    pub asr_ws_url: String,

    /// ASR provider API key. No default: missing is a fatal `ConfigError`.
    #[arg(long, env = "ASR_API_KEY")]
    pub asr_api_key: Option<String>,

    /// TTS provider API key. The synthesizer itself is out of scope for
    /// this core, but the key it would be handed is still required at
    /// startup so misconfiguration fails fast rather than at first use.
    #[arg(long, env = "TTS_API_KEY")]
    pub tts_api_key: Option<String>,

    #[arg(long, value_enum, default_value = "pretty")]
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// Validates the fatal-if-missing fields. Called once at startup,
    /// before `main` builds anything that would need them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.asr_api_key.as_deref().unwrap_or_default().is_empty() {
            return Err(ConfigError::Missing("--asr-api-key / ASR_API_KEY"));
        }
        if self.tts_api_key.as_deref().unwrap_or_default().is_empty() {
            return Err(ConfigError::Missing("--tts-api-key / TTS_API_KEY"));
        }
        Ok(())
    }
}
