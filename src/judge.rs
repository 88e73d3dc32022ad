//! Produces the authoritative [`CallbackPayload`]. Attempts an LLM call
//! that applies the same aggregation the Council already did and returns
//! the five-field callback JSON; on any failure falls back to a
//! deterministic, always-well-formed aggregation.
//!
//! Grounded on `agents/meta_moderator.py`'s `adjudication` /
//! `_fallback_aggregation` pair, with the fallback's normalisation rules
//! tightened to match spec §4.4 exactly (the original's fallback was a
//! much simpler any-vote-means-scam merge).

use serde::Deserialize;
use tracing::warn;

use crate::config::Config;
use crate::error::JudgeError;
use crate::sanitizer;
use crate::types::{CallbackPayload, ExtractedIntelligence, Vote};

const JUDGE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
const NOTES_MAX_CHARS: usize = 300;
const FORBIDDEN_TERMS: &[&str] = &["council", "vote", "agent", "honeypot", "ai", "bot"];

pub struct Judge {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl Judge {
    pub fn new(config: &Config) -> Self {
        Judge {
            client: reqwest::Client::new(),
            endpoint: config.judge_endpoint.clone(),
            model: config.judge_model.clone(),
            api_key: config.judge_api_key.clone(),
        }
    }

    /// Adjudicate on the last message plus every vote cast this turn,
    /// always returning a payload — the deterministic fallback guarantees
    /// this function cannot fail outwardly.
    pub async fn adjudicate(
        &self,
        last_message: &str,
        votes: &[Vote],
        session_id: &str,
        total_messages_exchanged: u32,
    ) -> CallbackPayload {
        match self
            .call_llm(last_message, votes, session_id, total_messages_exchanged)
            .await
        {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "judge LLM call failed, using deterministic fallback");
                deterministic_fallback(votes, session_id, total_messages_exchanged)
            }
        }
    }

    async fn call_llm(
        &self,
        last_message: &str,
        votes: &[Vote],
        session_id: &str,
        total_messages_exchanged: u32,
    ) -> Result<CallbackPayload, JudgeError> {
        let votes_json = serde_json::to_string_pretty(votes).unwrap_or_default();
        let prompt = format!(
            "## AGENT REPORTS\n{votes_json}\n\n## CONTEXT\nSession ID: {session_id}\n\
             Total Messages: {total_messages_exchanged}\nUser Message: \"{last_message}\"\n\n\
             Aggregate the reports into the final callback JSON with fields sessionId, \
             scamDetected, totalMessagesExchanged, extractedIntelligence (bankAccounts, upiIds, \
             phishingLinks, phoneNumbers, suspiciousKeywords), and agentNotes."
        );

        let payload = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.2,
            "max_tokens": 1024,
            "top_p": 1.0,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .timeout(JUDGE_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(JudgeError::HttpStatus(status.as_u16()));
        }

        let body: serde_json::Value = response.json().await?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");

        let cleaned = strip_code_fences(content);
        let object = largest_object(&cleaned).unwrap_or(cleaned);

        let raw: RawPayload = serde_json::from_str(&object)
            .map_err(|_| JudgeError::Unparseable(object.chars().take(200).collect()))?;

        Ok(raw.into_payload(session_id, total_messages_exchanged))
    }
}

#[derive(Deserialize)]
struct RawPayload {
    #[serde(default, rename = "scamDetected")]
    scam_detected: bool,
    #[serde(default, rename = "extractedIntelligence")]
    extracted_intelligence: RawIntel,
    #[serde(default, rename = "agentNotes")]
    agent_notes: String,
}

#[derive(Deserialize, Default)]
struct RawIntel {
    #[serde(default, rename = "bankAccounts")]
    bank_accounts: Vec<String>,
    #[serde(default, rename = "upiIds")]
    upi_ids: Vec<String>,
    #[serde(default, rename = "phishingLinks")]
    phishing_links: Vec<String>,
    #[serde(default, rename = "phoneNumbers")]
    phone_numbers: Vec<String>,
    #[serde(default, rename = "suspiciousKeywords")]
    suspicious_keywords: Vec<String>,
}

impl RawPayload {
    fn into_payload(self, session_id: &str, total_messages_exchanged: u32) -> CallbackPayload {
        let intel = ExtractedIntelligence {
            bank_accounts: self.extracted_intelligence.bank_accounts,
            upi_ids: self.extracted_intelligence.upi_ids,
            phishing_links: self.extracted_intelligence.phishing_links,
            phone_numbers: self.extracted_intelligence.phone_numbers,
            suspicious_keywords: self.extracted_intelligence.suspicious_keywords,
        };
        let sanitised = sanitizer::sanitize(&intel, self.scam_detected);
        CallbackPayload {
            session_id: session_id.to_string(),
            scam_detected: self.scam_detected,
            total_messages_exchanged,
            extracted_intelligence: sanitised,
            agent_notes: clamp_notes(&self.agent_notes),
        }
    }
}

fn strip_code_fences(raw: &str) -> String {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
        .to_string()
}

fn largest_object(s: &str) -> Option<String> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end < start {
        return None;
    }
    Some(s[start..=end].to_string())
}

fn clamp_notes(notes: &str) -> String {
    let truncated: String = notes.chars().take(NOTES_MAX_CHARS).collect();
    truncated
}

/// Same majority rules as the Council, plus the intelligence
/// normalisation and notes-construction rules from spec §4.4.
/// Deterministic: the same vote list and identifiers always produce the
/// same bytes.
fn deterministic_fallback(
    votes: &[Vote],
    session_id: &str,
    total_messages_exchanged: u32,
) -> CallbackPayload {
    let voter_count = votes.len();
    let scam_votes: Vec<&Vote> = votes.iter().filter(|v| v.is_scam).collect();
    let scam_count = scam_votes.len();
    let safe_count = voter_count - scam_count;

    let mut is_scam = voter_count > 0 && scam_count > voter_count / 2 && scam_count >= 2;
    if scam_count == safe_count {
        is_scam = false;
    }

    let mut merged = ExtractedIntelligence::default();
    for v in votes {
        merged = crate::extractor::merge(&merged, &v.intelligence);
    }
    let sanitised = sanitizer::sanitize(&merged, is_scam);

    let scam_type = modal_scam_type(&scam_votes);
    let top_entity = top_weighted_entity(&sanitised);

    let agent_notes = build_notes(is_scam, &scam_type, top_entity.as_deref(), scam_count, voter_count);

    CallbackPayload {
        session_id: session_id.to_string(),
        scam_detected: is_scam,
        total_messages_exchanged,
        extracted_intelligence: sanitised,
        agent_notes,
    }
}

fn modal_scam_type(scam_votes: &[&Vote]) -> String {
    if scam_votes.is_empty() {
        return "unknown".to_string();
    }
    use std::collections::HashMap;
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for v in scam_votes {
        let t = v.scam_type.as_str();
        if !counts.contains_key(t) {
            order.push(t);
        }
        *counts.entry(t).or_insert(0) += 1;
    }
    // `max_by_key` keeps the *last* maximum on ties; first-seen tiebreak
    // needs the first, so fold with a strict `>` instead.
    let mut best: Option<(&str, usize)> = None;
    for t in order {
        let count = counts[t];
        if best.map(|(_, best_count)| count > best_count).unwrap_or(true) {
            best = Some((t, count));
        }
    }
    best.map(|(t, _)| t).unwrap_or("unknown").to_string()
}

/// The single highest-priority extracted entity to mention in the
/// analyst sentence: bank accounts and UPI ids (direct payment rails)
/// outrank links and phone numbers.
fn top_weighted_entity(intel: &ExtractedIntelligence) -> Option<String> {
    intel
        .bank_accounts
        .first()
        .or_else(|| intel.upi_ids.first())
        .or_else(|| intel.phishing_links.first())
        .or_else(|| intel.phone_numbers.first())
        .cloned()
}

fn build_notes(
    is_scam: bool,
    scam_type: &str,
    top_entity: Option<&str>,
    scam_count: usize,
    voter_count: usize,
) -> String {
    let sentence = if !is_scam {
        "Conversation appears benign with no corroborated fraud indicators.".to_string()
    } else {
        match top_entity {
            Some(entity) => format!(
                "Conversation shows {scam_type} indicators with {scam_count} of {voter_count} \
                 independent signals corroborating, including entity {entity}."
            ),
            None => format!(
                "Conversation shows {scam_type} indicators with {scam_count} of {voter_count} \
                 independent signals corroborating."
            ),
        }
    };

    let clamped = clamp_notes(&sentence);
    scrub_forbidden_terms(&clamped)
}

/// Never mention internal mechanics in a note surfaced to the evaluation
/// endpoint.
fn scrub_forbidden_terms(notes: &str) -> String {
    let mut result = notes.to_string();
    for term in FORBIDDEN_TERMS {
        let pattern = regex::Regex::new(&format!(r"(?i)\b{}\b", regex::escape(term))).unwrap();
        result = pattern.replace_all(&result, "").to_string();
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
