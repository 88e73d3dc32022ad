//! One LLM provider call, turned into a parsed, sanitised [`Vote`] or an
//! explicit failure sentinel. Mirrors `nvidia_agents.py` / `groq_agents.py`'s
//! call-then-recover pattern, generalised across providers.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::VoterConfig;
use crate::error::VoterError;
use crate::types::{ExtractedIntelligence, Vote};

const VOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// A single LLM council member: fixed endpoint, model, and prompt
/// template, with its own (rotated) API key supplied per call.
pub struct Voter {
    pub name: String,
    endpoint: String,
    model: String,
    template: String,
    client: reqwest::Client,
}

impl Voter {
    /// Load the prompt template from disk at construction time.
    pub fn new(cfg: &VoterConfig) -> anyhow::Result<Self> {
        let template = std::fs::read_to_string(&cfg.prompt_template_path).map_err(|e| {
            anyhow::anyhow!(
                "failed to load prompt template {} for voter {}: {e}",
                cfg.prompt_template_path,
                cfg.name
            )
        })?;
        Ok(Voter {
            name: cfg.name.clone(),
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            template,
            client: reqwest::Client::new(),
        })
    }

    /// Cast a vote on `message` given `context` (the rolling conversation
    /// summary), the session id, and the current turn number. Network and
    /// parse failures never panic or propagate through fan-out — callers
    /// convert an `Err` into a `VoteOutcome::Failed`.
    pub async fn vote(
        &self,
        api_key: &str,
        message: &str,
        context: &str,
        session_id: &str,
        turn: u32,
    ) -> Result<Vote, VoterError> {
        let prompt = self
            .template
            .replace("{context}", context)
            .replace("{message}", message)
            .replace("{session_id}", session_id)
            .replace("{turn}", &turn.to_string());

        let payload = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.1,
            "max_tokens": 1024,
            "top_p": 1.0,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .timeout(VOTE_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(VoterError::HttpStatus(status.as_u16()));
        }

        let body: Value = response.json().await?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        info!(voter = %self.name, "raw voter response received");
        let parsed = parse_vote_body(&content);
        Ok(self.to_vote(parsed))
    }

    fn to_vote(&self, parsed: ParsedVoteBody) -> Vote {
        let is_scam = parsed.scam_detected;
        let scam_type = parsed
            .scam_type
            .unwrap_or_else(|| if is_scam { "scam".to_string() } else { "safe".to_string() });
        Vote {
            voter_name: self.name.clone(),
            is_scam,
            confidence: parsed.confidence,
            scam_type,
            reasoning: parsed.notes,
            intelligence: parsed.intelligence,
        }
    }
}

struct ParsedVoteBody {
    scam_detected: bool,
    confidence: f64,
    scam_type: Option<String>,
    notes: String,
    intelligence: ExtractedIntelligence,
}

#[derive(Deserialize, Default)]
struct RawIntelligence {
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

impl From<RawIntelligence> for ExtractedIntelligence {
    fn from(r: RawIntelligence) -> Self {
        ExtractedIntelligence {
            bank_accounts: r.bank_accounts,
            upi_ids: r.upi_ids,
            phishing_links: r.phishing_links,
            phone_numbers: r.phone_numbers,
            suspicious_keywords: r.suspicious_keywords,
        }
    }
}

/// Recovery ladder over a raw LLM response body (spec §4.2.3):
/// strip code fences, extract the largest balanced `{ … }` substring,
/// strip low control bytes, and finally synthesise a minimal vote if all
/// of that still fails to parse.
fn parse_vote_body(raw: &str) -> ParsedVoteBody {
    let stripped_fences = strip_code_fences(raw);
    let candidate = largest_balanced_object(&stripped_fences).unwrap_or(stripped_fences.clone());
    let cleaned = strip_control_bytes(&candidate);

    match serde_json::from_str::<Value>(&cleaned) {
        Ok(value) => from_json_value(&value),
        Err(_) => synthesize_parse_error_vote(raw),
    }
}

fn strip_code_fences(raw: &str) -> String {
    let mut s = raw.trim().to_string();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest.to_string();
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest.to_string();
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest.to_string();
    }
    s.trim().to_string()
}

/// Balanced scan for the largest top-level `{ ... }` substring, tolerant
/// of braces inside string literals.
fn largest_balanced_object(s: &str) -> Option<String> {
    let bytes: Vec<char> = s.chars().collect();
    let mut best: Option<(usize, usize)> = None;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == '{' {
            if let Some(end) = find_matching_brace(&bytes, i) {
                let len = end - i;
                if best.map(|(s, e)| e - s < len).unwrap_or(true) {
                    best = Some((i, end));
                }
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    best.map(|(start, end)| bytes[start..=end].iter().collect())
}

fn find_matching_brace(bytes: &[char], open_idx: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = open_idx;
    while i < bytes.len() {
        let c = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else {
            match c {
                '"' => in_string = true,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn strip_control_bytes(s: &str) -> String {
    s.chars()
        .filter(|&c| {
            let b = c as u32;
            b >= 0x20 || c == '\t' || c == '\n' || c == '\r'
        })
        .collect()
}

fn from_json_value(value: &Value) -> ParsedVoteBody {
    let scam_detected = value
        .get("scamDetected")
        .or_else(|| value.get("is_scam"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let confidence = value
        .get("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or(if scam_detected { 0.9 } else { 0.0 });

    let scam_type = value
        .get("scamType")
        .or_else(|| value.get("scam_type"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let notes = value
        .get("notes")
        .or_else(|| value.get("agentNotes"))
        .and_then(|v| v.as_str())
        .unwrap_or("No notes")
        .to_string();

    let intelligence = value
        .get("extractedIntelligence")
        .cloned()
        .and_then(|v| serde_json::from_value::<RawIntelligence>(v).ok())
        .map(ExtractedIntelligence::from)
        .unwrap_or_default();

    ParsedVoteBody {
        scam_detected,
        confidence,
        scam_type,
        notes,
        intelligence,
    }
}

fn synthesize_parse_error_vote(raw: &str) -> ParsedVoteBody {
    warn!("voter response unparseable even after recovery ladder, synthesising minimal vote");
    let quoted: String = raw.chars().take(1000).collect();
    ParsedVoteBody {
        scam_detected: false,
        confidence: 0.0,
        scam_type: None,
        notes: quoted,
        intelligence: ExtractedIntelligence {
            suspicious_keywords: vec!["json_parse_error".to_string()],
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json() {
        let body = r#"{"scamDetected": true, "confidence": 0.8, "scamType": "bank_fraud", "extractedIntelligence": {"bankAccounts": [], "upiIds": [], "phishingLinks": [], "phoneNumbers": [], "suspiciousKeywords": []}, "agentNotes": "looks like fraud"}"#;
        let parsed = parse_vote_body(body);
        assert!(parsed.scam_detected);
        assert_eq!(parsed.confidence, 0.8);
        assert_eq!(parsed.scam_type.as_deref(), Some("bank_fraud"));
        assert_eq!(parsed.notes, "looks like fraud");
    }

    #[test]
    fn strips_code_fences() {
        let body = "```json\n{\"scamDetected\": false}\n```";
        let parsed = parse_vote_body(body);
        assert!(!parsed.scam_detected);
    }

    #[test]
    fn extracts_largest_object_from_chatter() {
        let body = "Sure, here's my analysis: {\"scamDetected\": true, \"confidence\": 0.5}. Hope that helps!";
        let parsed = parse_vote_body(body);
        assert!(parsed.scam_detected);
        assert_eq!(parsed.confidence, 0.5);
    }

    #[test]
    fn balanced_scan_handles_braces_in_strings() {
        let body = r#"{"agentNotes": "uses { and } inside text", "scamDetected": true, "confidence": 0.7}"#;
        let parsed = parse_vote_body(body);
        assert!(parsed.scam_detected);
        assert_eq!(parsed.notes, "uses { and } inside text");
    }

    #[test]
    fn strips_control_bytes_before_parse() {
        let body = "{\"scamDetected\": true, \x01\x02\"confidence\": 0.9}";
        let parsed = parse_vote_body(body);
        assert!(parsed.scam_detected);
        assert_eq!(parsed.confidence, 0.9);
    }

    #[test]
    fn accepts_agent_notes_alias() {
        let body = r#"{"scamDetected": false, "agentNotes": "safe message"}"#;
        let parsed = parse_vote_body(body);
        assert_eq!(parsed.notes, "safe message");
    }

    #[test]
    fn default_scam_type_depends_on_is_scam() {
        let scam = parse_vote_body(r#"{"scamDetected": true}"#);
        assert_eq!(scam.scam_type, None);

        let voter = test_voter();
        let vote = voter.to_vote(scam);
        assert_eq!(vote.scam_type, "scam");

        let safe = parse_vote_body(r#"{"scamDetected": false}"#);
        let vote = voter.to_vote(safe);
        assert_eq!(vote.scam_type, "safe");
    }

    #[test]
    fn unparseable_body_synthesizes_minimal_vote() {
        let body = "this is not json at all, the model rambled instead";
        let parsed = parse_vote_body(body);
        assert!(!parsed.scam_detected);
        assert_eq!(parsed.confidence, 0.0);
        assert_eq!(parsed.intelligence.suspicious_keywords, vec!["json_parse_error"]);
        assert_eq!(parsed.notes, body);
    }

    #[test]
    fn synthesized_vote_caps_quoted_body_at_1000_chars() {
        let body = "x".repeat(5000);
        let parsed = parse_vote_body(&body);
        assert_eq!(parsed.notes.chars().count(), 1000);
    }

    fn test_voter() -> Voter {
        Voter {
            name: "test".to_string(),
            endpoint: "http://localhost".to_string(),
            model: "test-model".to_string(),
            template: "{context} {message}".to_string(),
            client: reqwest::Client::new(),
        }
    }
}
