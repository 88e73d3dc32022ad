//! The Reply Generator is a collaborator, not part of the core detection
//! pipeline (spec §6): `generate(message, history, scam_type, persona_id,
//! turn) -> (reply_or_null, persona_id, status)`. This crate owns the
//! trait boundary and ships one concrete stub implementation; a real
//! deployment swaps in a persona-driven LLM generator without touching
//! the Orchestrator.
//!
//! Grounded on `engagement/response_generator.py`'s turn-adaptive,
//! persona-voiced reply contract, reduced to a fixed-template stand-in.

use async_trait::async_trait;

use crate::types::LoggedMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Success,
    Failure,
}

pub struct ReplyResult {
    pub reply: Option<String>,
    pub persona_id: String,
    pub status: ReplyStatus,
}

/// Contract the Orchestrator calls synchronously on every inbound
/// message (spec §4.9 step 3). Implementations must complete within the
/// caller's budget; the Orchestrator imposes no hard timeout here.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(
        &self,
        message: &str,
        history: &[LoggedMessage],
        scam_type: &str,
        persona_id: &str,
        turn: u32,
    ) -> ReplyResult;
}

/// Fixed-template stand-in: cycles through a small bank of generic
/// stalling replies keyed by turn, never a "skip". Good enough to
/// exercise the Orchestrator's synchronous path without a live LLM.
pub struct TemplateReplyGenerator {
    templates_by_turn: Vec<&'static str>,
    late_turn_template: &'static str,
}

impl TemplateReplyGenerator {
    pub fn new() -> Self {
        TemplateReplyGenerator {
            templates_by_turn: vec![
                "Sorry, who is this? I wasn't expecting a message.",
                "I don't understand, can you explain what happened?",
                "Okay... is there someone I can call to confirm this?",
                "Alright, where do I need to send this?",
                "Wait, let me just check with someone before I continue.",
            ],
            late_turn_template: "Sorry for the delay, please go ahead, I'm listening.",
        }
    }

    fn pick(&self, turn: u32) -> &'static str {
        let idx = turn as usize;
        self.templates_by_turn
            .get(idx)
            .copied()
            .unwrap_or(self.late_turn_template)
    }
}

impl Default for TemplateReplyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplyGenerator for TemplateReplyGenerator {
    async fn generate(
        &self,
        _message: &str,
        _history: &[LoggedMessage],
        _scam_type: &str,
        persona_id: &str,
        turn: u32,
    ) -> ReplyResult {
        ReplyResult {
            reply: Some(self.pick(turn).to_string()),
            persona_id: persona_id.to_string(),
            status: ReplyStatus::Success,
        }
    }
}
