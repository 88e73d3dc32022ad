//! Dispatches the final [`CallbackPayload`] to the configured evaluation
//! endpoint. Retries transport failures and timeouts with exponential
//! backoff; never retries a 4xx.
//!
//! Grounded on `services/callback_service.py`'s `send_callback`, whose
//! `tenacity`-backed retry policy (stop after 3, exponential wait) is
//! reimplemented here as an explicit loop — no retry crate is attested
//! anywhere in the example pack, so this stays dependency-free rather
//! than importing one for three lines of backoff.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::CallbackError;
use crate::types::CallbackPayload;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_SCHEDULE_SECS: [u64; 2] = [1, 2];

pub struct CallbackDispatcher {
    client: reqwest::Client,
    url: String,
}

impl CallbackDispatcher {
    pub fn new(config: &Config) -> Self {
        CallbackDispatcher {
            client: reqwest::Client::new(),
            url: config.callback_url.clone(),
        }
    }

    /// POST the payload, retrying transport errors/timeouts up to
    /// [`MAX_ATTEMPTS`] times with 1s then 2s backoff between attempts.
    /// A 4xx response is terminal and returned immediately without retry.
    pub async fn dispatch(&self, payload: &CallbackPayload) -> Result<String, CallbackError> {
        let mut last_err: Option<CallbackError> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.send_once(payload).await {
                Ok(body) => {
                    info!(session_id = %payload.session_id, attempt, "callback dispatched");
                    return Ok(body);
                }
                Err(CallbackError::ClientError(status)) => {
                    warn!(session_id = %payload.session_id, status, "callback rejected, not retrying");
                    return Err(CallbackError::ClientError(status));
                }
                Err(e) => {
                    warn!(session_id = %payload.session_id, attempt, error = %e, "callback attempt failed");
                    last_err = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        let backoff = BACKOFF_SCHEDULE_SECS[(attempt - 1) as usize];
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or(CallbackError::ExhaustedRetries(0, MAX_ATTEMPTS)))
    }

    async fn send_once(&self, payload: &CallbackPayload) -> Result<String, CallbackError> {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(payload)
            .timeout(CALLBACK_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            Ok(body)
        } else if status.is_client_error() {
            Err(CallbackError::ClientError(status.as_u16()))
        } else {
            Err(CallbackError::ExhaustedRetries(status.as_u16(), 1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_matches_spec() {
        assert_eq!(BACKOFF_SCHEDULE_SECS, [1, 2]);
        assert_eq!(MAX_ATTEMPTS, 3);
    }
}
