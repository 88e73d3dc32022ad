//! Per-layer error types. Every one of these is caught at its component
//! boundary (see spec §7) — none are allowed to propagate into the
//! Orchestrator's synchronous reply path.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoterError {
    #[error("network error calling voter: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upstream returned HTTP {0}")]
    HttpStatus(u16),
    #[error("response body was not parseable JSON even after recovery: {0}")]
    Unparseable(String),
}

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("network error calling judge: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upstream returned HTTP {0}")]
    HttpStatus(u16),
    #[error("judge response was not parseable JSON: {0}")]
    Unparseable(String),
}

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("network error dispatching callback: {0}")]
    Network(#[from] reqwest::Error),
    #[error("callback endpoint returned non-retryable HTTP {0}")]
    ClientError(u16),
    #[error("callback endpoint returned HTTP {0} after {1} attempts")]
    ExhaustedRetries(u16, u32),
}

#[derive(Debug, Error)]
pub enum ForceCallbackError {
    #[error("unknown session id")]
    UnknownSession,
    #[error("callback dispatch failed: {0}")]
    Dispatch(#[from] CallbackError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {source}")]
    Parse {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}
