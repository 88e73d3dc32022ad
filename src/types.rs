//! Shared data model: votes, verdicts, callback payloads, and the
//! conversation log entries that make up a session.

use serde::{Deserialize, Serialize};

/// One voter's structured judgement for one turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vote {
    pub voter_name: String,
    pub is_scam: bool,
    pub confidence: f64,
    pub scam_type: String,
    pub reasoning: String,
    pub intelligence: ExtractedIntelligence,
}

/// Result of one voter call: either a structured vote or an explicit
/// failure sentinel. Never conflate the two — a failed voter must not be
/// countable as a "safe" vote.
#[derive(Debug, Clone)]
pub enum VoteOutcome {
    Cast(Vote),
    Failed { voter_name: String },
}

impl VoteOutcome {
    pub fn voter_name(&self) -> &str {
        match self {
            VoteOutcome::Cast(v) => &v.voter_name,
            VoteOutcome::Failed { voter_name } => voter_name,
        }
    }
}

/// Five list fields tracking scam indicators pulled out of a conversation.
/// Conceptually sets: order is irrelevant and duplicates cannot occur after
/// passing through [`crate::sanitizer`] or [`crate::extractor::merge`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedIntelligence {
    #[serde(default)]
    pub bank_accounts: Vec<String>,
    #[serde(default)]
    pub upi_ids: Vec<String>,
    #[serde(default)]
    pub phishing_links: Vec<String>,
    #[serde(default)]
    pub phone_numbers: Vec<String>,
    #[serde(default)]
    pub suspicious_keywords: Vec<String>,
}

impl ExtractedIntelligence {
    pub fn is_empty(&self) -> bool {
        self.bank_accounts.is_empty()
            && self.upi_ids.is_empty()
            && self.phishing_links.is_empty()
            && self.phone_numbers.is_empty()
            && self.suspicious_keywords.is_empty()
    }

    /// Union two intelligence records field-by-field, deduplicating and
    /// sorting each field for stable downstream comparison.
    pub fn union(&self, other: &ExtractedIntelligence) -> ExtractedIntelligence {
        ExtractedIntelligence {
            bank_accounts: dedup_sorted(self.bank_accounts.iter().chain(other.bank_accounts.iter())),
            upi_ids: dedup_sorted(self.upi_ids.iter().chain(other.upi_ids.iter())),
            phishing_links: dedup_sorted(self.phishing_links.iter().chain(other.phishing_links.iter())),
            phone_numbers: dedup_sorted(self.phone_numbers.iter().chain(other.phone_numbers.iter())),
            suspicious_keywords: dedup_sorted(
                self.suspicious_keywords.iter().chain(other.suspicious_keywords.iter()),
            ),
        }
    }
}

/// Dedupe + sort a field, used for stable set semantics across merges.
pub fn dedup_sorted<'a, I: Iterator<Item = &'a String>>(items: I) -> Vec<String> {
    let mut set: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    for item in items {
        set.insert(item.clone());
    }
    set.into_iter().collect()
}

/// Council's lightweight aggregation of votes, attached to the session
/// immediately after fan-out. Superseded later by the Judge's payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub is_scam: bool,
    pub confidence: f64,
    pub scam_type: String,
    pub scam_votes: usize,
    pub voter_count: usize,
    pub reasoning: String,
    pub votes: Vec<Vote>,
}

impl Verdict {
    /// The empty/safe verdict used when there are zero voters or all fail.
    pub fn empty() -> Self {
        Verdict {
            is_scam: false,
            confidence: 0.0,
            scam_type: "unknown".to_string(),
            scam_votes: 0,
            voter_count: 0,
            reasoning: "No council votes available.".to_string(),
            votes: Vec::new(),
        }
    }
}

/// Judge's authoritative output, posted to the evaluation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub session_id: String,
    pub scam_detected: bool,
    pub total_messages_exchanged: u32,
    pub extracted_intelligence: ExtractedIntelligence,
    pub agent_notes: String,
}

/// Who sent a logged message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Scammer,
    Agent,
}

/// One entry in a session's append-only message log. Timestamps are
/// intentionally discarded on ingest (spec invariant) — this type has no
/// timestamp field by design.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggedMessage {
    pub sender: Sender,
    pub text: String,
}
