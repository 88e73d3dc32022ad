//! In-memory session storage. No TTL, no persistence, no cross-process
//! visibility — this crate's only mutable shared state besides the
//! Worker Pool's slot table and the Key Rotator's cycles.
//!
//! Grounded on `services/session_manager.py`'s `SessionManager`, reduced
//! to the fields the Orchestrator and background pipeline actually read
//! and write.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::types::{ExtractedIntelligence, LoggedMessage, Sender, Verdict, Vote};

/// Everything the Orchestrator and its background pipeline track for one
/// conversation. `created_at` is process-local wall-clock-free timing
/// (diagnostics only, never serialized into the callback payload).
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: String,
    pub persona_id: String,
    pub created_at: Instant,
    pub messages: Vec<LoggedMessage>,
    pub turn: u32,
    pub is_scam: bool,
    pub confidence: f64,
    pub cumulative_intelligence: ExtractedIntelligence,
    /// Every successful vote cast across every turn of this session,
    /// oldest first. Append-only — aggregation re-runs over the whole
    /// list each turn, never just the votes cast this turn (spec §3).
    pub cumulative_votes: Vec<Vote>,
    pub last_verdict: Option<Verdict>,
    pub callback_sent: bool,
    pub final_callback_response: Option<String>,
}

impl SessionRecord {
    fn new(session_id: &str) -> Self {
        SessionRecord {
            session_id: session_id.to_string(),
            persona_id: "default".to_string(),
            created_at: Instant::now(),
            messages: Vec::new(),
            turn: 0,
            is_scam: false,
            confidence: 0.0,
            cumulative_intelligence: ExtractedIntelligence::default(),
            cumulative_votes: Vec::new(),
            last_verdict: None,
            callback_sent: false,
            final_callback_response: None,
        }
    }
}

/// Thread-safe map of session id to [`SessionRecord`]. One writer at a
/// time per session is enforced by the caller's discipline (Orchestrator
/// entry vs. the session's owning background task), not by this type —
/// the mutex only guards the map structure and individual field updates.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a session, creating it if unknown.
    pub fn get_or_create(&self, session_id: &str) -> SessionRecord {
        let mut sessions = self.sessions.lock().expect("session store mutex poisoned");
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionRecord::new(session_id))
            .clone()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions
            .lock()
            .expect("session store mutex poisoned")
            .get(session_id)
            .cloned()
    }

    /// Append an inbound or outbound message and bump the turn counter.
    /// Timestamps are never accepted here — callers must strip them
    /// before constructing the [`LoggedMessage`].
    pub fn append_message(&self, session_id: &str, sender: Sender, text: &str, bump_turn: bool) {
        self.with_session(session_id, |session| {
            session.messages.push(LoggedMessage { sender, text: text.to_string() });
            if bump_turn {
                session.turn += 1;
            }
        });
    }

    /// Record which persona is voicing replies for this session. A no-op
    /// past the first call in practice — the Orchestrator passes the same
    /// `persona_id` on every turn of a conversation.
    pub fn set_persona(&self, session_id: &str, persona_id: &str) {
        self.with_session(session_id, |session| {
            session.persona_id = persona_id.to_string();
        });
    }

    /// Reset scam-state and callback bookkeeping — used when the
    /// Orchestrator supersedes an in-flight background pipeline.
    pub fn reset_for_supersede(&self, session_id: &str) {
        self.with_session(session_id, |session| {
            session.callback_sent = false;
            session.final_callback_response = None;
        });
    }

    /// Commit a Council verdict, updating cached scam-state per the
    /// threshold gate in spec §4.10.
    pub fn update_verdict(&self, session_id: &str, verdict: Verdict, confidence_threshold: f64) {
        self.with_session(session_id, |session| {
            let promote = verdict.is_scam
                && verdict.confidence >= confidence_threshold
                && verdict.scam_votes >= 2;
            if promote {
                session.is_scam = true;
                session.confidence = verdict.confidence;
            } else {
                session.is_scam = false;
                session.confidence = 0.0;
            }
            session.last_verdict = Some(verdict);
        });
    }

    /// Append this turn's successful votes to the session's history.
    /// Never overwrites — the vote list is append-only across turns.
    pub fn append_votes(&self, session_id: &str, votes: &[Vote]) {
        self.with_session(session_id, |session| {
            session.cumulative_votes.extend_from_slice(votes);
        });
    }

    pub fn update_intelligence(&self, session_id: &str, intelligence: ExtractedIntelligence) {
        self.with_session(session_id, |session| {
            session.cumulative_intelligence = intelligence;
        });
    }

    /// Mark the callback as dispatched successfully. Monotonic: never
    /// transitions true → false.
    pub fn mark_callback_sent(&self, session_id: &str, response_body: String) {
        self.with_session(session_id, |session| {
            session.callback_sent = true;
            session.final_callback_response = Some(response_body);
        });
    }

    fn with_session(&self, session_id: &str, f: impl FnOnce(&mut SessionRecord)) {
        let mut sessions = self.sessions.lock().expect("session store mutex poisoned");
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionRecord::new(session_id));
        f(session);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
