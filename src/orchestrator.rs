//! Single entry point: `process_message(request) -> response`. Per
//! spec §4.9/§4.10, the synchronous reply is built and returned before
//! any background network I/O is scheduled, and every checkpoint in the
//! background pipeline tests cancellation before doing anything the
//! Session Store or Callback Dispatcher would need to undo.
//!
//! Grounded on `core/orchestrator.py`'s `process_message` /
//! `_run_background_tasks` split, reshaped around the Worker Pool's
//! cancel/supersede contract instead of a bare `asyncio.create_task`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::callback::CallbackDispatcher;
use crate::config::Config;
use crate::council::{self, Council};
use crate::extractor::{self, Extractor};
use crate::judge::Judge;
use crate::reply_generator::ReplyGenerator;
use crate::sanitizer;
use crate::session_store::SessionStore;
use crate::types::{LoggedMessage, Sender, VoteOutcome};
use crate::worker_pool::WorkerPool;

/// One entry in the caller-supplied conversation history.
pub struct HistoryEntry {
    pub sender: Sender,
    pub text: String,
}

pub struct IncomingRequest {
    pub session_id: String,
    pub text: String,
    pub history: Vec<HistoryEntry>,
    pub persona_id: String,
}

pub struct OrchestratorResponse {
    pub session_id: String,
    pub status: &'static str,
    pub reply: Option<String>,
    pub scam_detected: bool,
    pub confidence: f64,
}

pub struct Orchestrator {
    config: Config,
    sessions: Arc<SessionStore>,
    pool: Arc<WorkerPool>,
    council: Arc<Council>,
    extractor: Arc<Extractor>,
    judge: Arc<Judge>,
    callback: Arc<CallbackDispatcher>,
    reply_generator: Arc<dyn ReplyGenerator>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        council: Council,
        extractor: Extractor,
        judge: Judge,
        callback: CallbackDispatcher,
        reply_generator: Arc<dyn ReplyGenerator>,
    ) -> Self {
        let pool = WorkerPool::new(config.worker_pool_size);
        Orchestrator {
            config,
            sessions: Arc::new(SessionStore::new()),
            pool: Arc::new(pool),
            council: Arc::new(council),
            extractor: Arc::new(extractor),
            judge: Arc::new(judge),
            callback: Arc::new(callback),
            reply_generator,
        }
    }

    /// Read-only snapshot for the `GET /api/v1/session/:id` endpoint.
    pub fn session_snapshot(&self, session_id: &str) -> Option<crate::session_store::SessionRecord> {
        self.sessions.get(session_id)
    }

    /// Manually dispatch the callback for `POST /api/v1/callback/:id`,
    /// reusing the session's current cumulative intelligence and verdict
    /// rather than waiting for the background pipeline to reach step (g).
    pub async fn force_callback(
        &self,
        session_id: &str,
    ) -> Result<String, crate::error::ForceCallbackError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or(crate::error::ForceCallbackError::UnknownSession)?;

        let extracted_intelligence =
            sanitizer::sanitize(&session.cumulative_intelligence, session.is_scam);
        let agent_notes = session
            .last_verdict
            .as_ref()
            .map(|v| v.reasoning.clone())
            .unwrap_or_default();

        let payload = crate::types::CallbackPayload {
            session_id: session.session_id.clone(),
            scam_detected: session.is_scam,
            total_messages_exchanged: session.messages.len() as u32,
            extracted_intelligence,
            agent_notes,
        };

        let response_body = self.callback.dispatch(&payload).await?;
        self.sessions
            .mark_callback_sent(session_id, response_body.clone());
        Ok(response_body)
    }

    pub async fn process_message(&self, request: IncomingRequest) -> OrchestratorResponse {
        let session_id = request.session_id.clone();

        // 1. Fetch or create, append inbound message (timestamp already
        // stripped by the HTTP layer before this type was built), bump turn.
        self.sessions.get_or_create(&session_id);
        self.sessions.set_persona(&session_id, &request.persona_id);
        self.sessions
            .append_message(&session_id, Sender::Scammer, &request.text, true);

        // 2. Supersede any in-flight background pipeline for this session.
        if self.pool.get_worker_for_session(&session_id).is_some() {
            self.pool.abort_session(&session_id);
            self.sessions.reset_for_supersede(&session_id);
        }

        // 3. Synchronous Reply Generator call.
        let session = self.sessions.get_or_create(&session_id);
        let history: Vec<LoggedMessage> = request
            .history
            .iter()
            .map(|h| LoggedMessage { sender: h.sender, text: h.text.clone() })
            .collect();
        let scam_type = session
            .last_verdict
            .as_ref()
            .map(|v| v.scam_type.clone())
            .unwrap_or_else(|| "unknown".to_string());

        let reply_result = self
            .reply_generator
            .generate(&request.text, &history, &scam_type, &request.persona_id, session.turn)
            .await;

        if let Some(reply) = &reply_result.reply {
            self.sessions
                .append_message(&session_id, Sender::Agent, reply, false);
        }

        // 4. Build the response before any background work is scheduled.
        let session = self.sessions.get_or_create(&session_id);
        let response = OrchestratorResponse {
            session_id: session_id.clone(),
            status: "success",
            reply: reply_result.reply,
            scam_detected: session.is_scam,
            confidence: session.confidence,
        };

        // 5. Fire-and-forget background pipeline with a fresh token.
        let first_contact = request.history.is_empty();
        let message_text = request.text.clone();
        let cancel_token = CancellationToken::new();

        let sessions = self.sessions.clone();
        let council = self.council.clone();
        let extractor = self.extractor.clone();
        let judge = self.judge.clone();
        let callback = self.callback.clone();
        let council_delay = Duration::from_secs_f64(self.config.council_delay_seconds);
        let scam_threshold = self.config.scam_confidence_threshold;
        let pool = self.pool.clone();
        let session_id_for_task = session_id.clone();

        pool.assign(&session_id, cancel_token, move |token| {
            let sessions = sessions.clone();
            let council = council.clone();
            let extractor = extractor.clone();
            let judge = judge.clone();
            let callback = callback.clone();
            async move {
                run_background_pipeline(
                    BackgroundPipelineArgs {
                        session_id: session_id_for_task,
                        message_text,
                        first_contact,
                        council_delay,
                        scam_threshold,
                        sessions,
                        council,
                        extractor,
                        judge,
                        callback,
                    },
                    token,
                )
                .await;
            }
        })
        .await;

        response
    }
}

struct BackgroundPipelineArgs {
    session_id: String,
    message_text: String,
    first_contact: bool,
    council_delay: Duration,
    scam_threshold: f64,
    sessions: Arc<SessionStore>,
    council: Arc<Council>,
    extractor: Arc<Extractor>,
    judge: Arc<Judge>,
    callback: Arc<CallbackDispatcher>,
}

/// The background coroutine scheduled in step 5. Every checkpoint
/// (a-g) tests `token` and exits silently with no side effects if set.
async fn run_background_pipeline(args: BackgroundPipelineArgs, token: CancellationToken) {
    let BackgroundPipelineArgs {
        session_id,
        message_text,
        first_contact,
        council_delay,
        scam_threshold,
        sessions,
        council,
        extractor,
        judge,
        callback,
    } = args;

    // (a) before the optional delay
    if token.is_cancelled() {
        return;
    }

    if first_contact {
        tokio::select! {
            _ = tokio::time::sleep(council_delay) => {}
            _ = token.cancelled() => return,
        }
    }

    // (b) after the optional delay
    if token.is_cancelled() {
        return;
    }

    let context = session_context_summary(&sessions, &session_id);

    // (c) before Council fan-out
    if token.is_cancelled() {
        return;
    }

    let turn = sessions.get(&session_id).map(|s| s.turn).unwrap_or(0);
    let (outcomes, _turn_verdict) = council.analyze(&message_text, &context, &session_id, turn).await;

    // (d) after Council fan-out, votes not yet committed
    if token.is_cancelled() {
        return;
    }

    // Votes are append-only across turns; aggregation re-runs over the
    // whole accumulated history, not just what this turn cast (spec §3).
    let cast_votes: Vec<crate::types::Vote> = outcomes
        .iter()
        .filter_map(|o| match o {
            VoteOutcome::Cast(v) => Some(v.clone()),
            VoteOutcome::Failed { .. } => None,
        })
        .collect();
    sessions.append_votes(&session_id, &cast_votes);
    let cumulative_votes = sessions
        .get(&session_id)
        .map(|s| s.cumulative_votes)
        .unwrap_or_default();
    let verdict = council::aggregate_votes(&cumulative_votes);
    sessions.update_verdict(&session_id, verdict, scam_threshold);

    // (e) before Extractor
    if token.is_cancelled() {
        return;
    }

    let messages = sessions.get(&session_id).map(|s| s.messages).unwrap_or_default();
    let turn_intel = extractor.extract(&messages).await;
    let cumulative = sessions
        .get(&session_id)
        .map(|s| extractor::merge(&s.cumulative_intelligence, &turn_intel))
        .unwrap_or(turn_intel);
    sessions.update_intelligence(&session_id, cumulative.clone());

    // (f) before Judge
    if token.is_cancelled() {
        return;
    }

    let total_messages = sessions.get(&session_id).map(|s| s.messages.len() as u32).unwrap_or(0);
    let mut payload = judge
        .adjudicate(&message_text, &cumulative_votes, &session_id, total_messages)
        .await;

    let judge_intel = extractor::merge(&cumulative, &payload.extracted_intelligence);
    payload.extracted_intelligence = sanitizer::sanitize(&judge_intel, payload.scam_detected);

    // (g) immediately before Callback dispatch
    if token.is_cancelled() {
        return;
    }

    let already_sent = sessions.get(&session_id).map(|s| s.callback_sent).unwrap_or(false);
    if already_sent {
        return;
    }

    match callback.dispatch(&payload).await {
        Ok(response_body) => {
            sessions.mark_callback_sent(&session_id, response_body);
            info!(session_id = %session_id, "background pipeline completed, callback sent");
        }
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "callback dispatch failed after retries, callback_sent remains false");
        }
    }
}

/// Rolling context string handed to each Voter: the prior turns'
/// transcript, newest last.
fn session_context_summary(sessions: &SessionStore, session_id: &str) -> String {
    sessions
        .get(session_id)
        .map(|s| {
            s.messages
                .iter()
                .map(|m| format!("[{:?}]: {}", m.sender, m.text))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}
