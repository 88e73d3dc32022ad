//! Fan-out to every configured voter concurrently, collect with per-voter
//! fault isolation, and produce the lightweight majority verdict.
//!
//! Mirrors `detection_council.py`'s `asyncio.gather(..., return_exceptions=True)`
//! fan-out, except a failed voter here is recorded as *skipped* rather than
//! folded in as a negative vote — the distilled spec is explicit that the
//! two must never be conflated.

use std::collections::HashMap;

use tracing::{error, info};

use crate::config::Config;
use crate::key_rotator::KeyRotator;
use crate::types::{Vote, VoteOutcome, Verdict};
use crate::voter::Voter;

pub struct Council {
    voters: Vec<Voter>,
    key_rotator: std::sync::Arc<KeyRotator>,
    voter_configs: Vec<crate::config::VoterConfig>,
}

impl Council {
    pub fn new(config: &Config, key_rotator: std::sync::Arc<KeyRotator>) -> anyhow::Result<Self> {
        let mut voters = Vec::with_capacity(config.voters.len());
        for vc in &config.voters {
            voters.push(Voter::new(vc)?);
        }
        Ok(Council {
            voters,
            key_rotator,
            voter_configs: config.voters.clone(),
        })
    }

    /// Run every voter concurrently and wait for all of them to settle
    /// (success, failure, or timeout) before aggregating — a faster
    /// subset is never a valid verdict.
    pub async fn analyze(
        &self,
        message: &str,
        context: &str,
        session_id: &str,
        turn: u32,
    ) -> (Vec<VoteOutcome>, Verdict) {
        let futures = self.voters.iter().zip(self.voter_configs.iter()).map(|(voter, vc)| {
            let key = self.key_rotator.next(vc.provider, &vc.default_key);
            async move {
                match voter.vote(&key, message, context, session_id, turn).await {
                    Ok(vote) => VoteOutcome::Cast(vote),
                    Err(e) => {
                        error!(voter = %voter.name, error = %e, "voter failed, skipping for this turn");
                        VoteOutcome::Failed { voter_name: voter.name.clone() }
                    }
                }
            }
        });

        let outcomes: Vec<VoteOutcome> = futures::future::join_all(futures).await;
        let verdict = aggregate(&outcomes);

        info!(
            is_scam = verdict.is_scam,
            confidence = verdict.confidence,
            scam_type = %verdict.scam_type,
            scam_votes = verdict.scam_votes,
            voter_count = verdict.voter_count,
            "council aggregation complete"
        );

        (outcomes, verdict)
    }
}

/// Deterministic aggregation over one turn's successful votes only (spec
/// §4.3). Given the same votes (not the same network conditions), this
/// always yields the same verdict.
pub fn aggregate(outcomes: &[VoteOutcome]) -> Verdict {
    let votes: Vec<Vote> = outcomes
        .iter()
        .filter_map(|o| match o {
            VoteOutcome::Cast(v) => Some(v.clone()),
            VoteOutcome::Failed { .. } => None,
        })
        .collect();
    aggregate_votes(&votes)
}

/// The same aggregation rules as [`aggregate`], but over an explicit vote
/// list — used to re-aggregate the session's *cumulative* votes (spec
/// §3's "aggregation uses all accumulated votes up to the current turn"),
/// not just the votes cast this turn.
pub fn aggregate_votes(votes: &[Vote]) -> Verdict {
    let votes = votes.to_vec();
    let voter_count = votes.len();
    if voter_count == 0 {
        return Verdict::empty();
    }

    let scam_votes_list: Vec<&Vote> = votes.iter().filter(|v| v.is_scam).collect();
    let scam_count = scam_votes_list.len();
    let safe_count = voter_count - scam_count;

    let mut is_scam = scam_count > voter_count / 2 && scam_count >= 2;
    if scam_count == safe_count {
        is_scam = false;
    }

    let mut confidence = if scam_votes_list.is_empty() {
        0.0
    } else {
        let sum: f64 = scam_votes_list.iter().map(|v| v.confidence).sum();
        let avg = sum / scam_votes_list.len() as f64;
        let max = scam_votes_list
            .iter()
            .map(|v| v.confidence)
            .fold(f64::MIN, f64::max);
        avg.min(max)
    };

    if is_scam && confidence < 0.5 {
        is_scam = false;
        confidence = 0.0;
    }

    let scam_type = modal_scam_type(&scam_votes_list);

    let reasoning = format!(
        "{}/{} council members flagged this as scam.",
        scam_count, voter_count
    );

    Verdict {
        is_scam,
        confidence,
        scam_type,
        scam_votes: scam_count,
        voter_count,
        reasoning,
        votes,
    }
}

/// Most frequent scam_type among scam voters, ties broken by first-seen
/// order; "unknown" if there are no scam voters.
fn modal_scam_type(scam_votes: &[&Vote]) -> String {
    if scam_votes.is_empty() {
        return "unknown".to_string();
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut first_seen_order: Vec<&str> = Vec::new();
    for v in scam_votes {
        let t = v.scam_type.as_str();
        if !counts.contains_key(t) {
            first_seen_order.push(t);
        }
        *counts.entry(t).or_insert(0) += 1;
    }
    // `Iterator::max_by_key` keeps the *last* maximum on ties; first-seen
    // tiebreak needs the first, so fold with a strict `>` instead.
    let mut best: Option<(&str, usize)> = None;
    for t in first_seen_order {
        let count = counts[t];
        if best.map(|(_, best_count)| count > best_count).unwrap_or(true) {
            best = Some((t, count));
        }
    }
    best.map(|(t, _)| t).unwrap_or("unknown").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExtractedIntelligence;

    fn vote(name: &str, is_scam: bool, confidence: f64, scam_type: &str) -> VoteOutcome {
        VoteOutcome::Cast(Vote {
            voter_name: name.to_string(),
            is_scam,
            confidence,
            scam_type: scam_type.to_string(),
            reasoning: "test".to_string(),
            intelligence: ExtractedIntelligence::default(),
        })
    }

    #[test]
    fn zero_voters_yields_safe_empty_verdict() {
        let verdict = aggregate(&[]);
        assert!(!verdict.is_scam);
        assert_eq!(verdict.voter_count, 0);
        assert_eq!(verdict.scam_votes, 0);
        assert_eq!(verdict.scam_type, "unknown");
    }

    #[test]
    fn all_voters_failed_behaves_like_zero_voters() {
        let outcomes = vec![
            VoteOutcome::Failed { voter_name: "a".into() },
            VoteOutcome::Failed { voter_name: "b".into() },
        ];
        let verdict = aggregate(&outcomes);
        assert!(!verdict.is_scam);
        assert_eq!(verdict.voter_count, 0);
    }

    #[test]
    fn majority_scam_with_high_confidence_is_scam() {
        let outcomes = vec![
            vote("a", true, 0.9, "bank_fraud"),
            vote("b", true, 0.8, "bank_fraud"),
            vote("c", false, 0.1, "safe"),
        ];
        let verdict = aggregate(&outcomes);
        assert!(verdict.is_scam);
        assert_eq!(verdict.scam_votes, 2);
        assert_eq!(verdict.voter_count, 3);
        assert_eq!(verdict.scam_type, "bank_fraud");
        // confidence = min(avg(0.9,0.8)=0.85, max=0.9) = 0.85
        assert!((verdict.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn single_scam_vote_never_wins_even_if_majority_of_total() {
        // 1 scam vote out of 1 voter is "majority" but fails the >=2 rule.
        let outcomes = vec![vote("a", true, 0.95, "bank_fraud")];
        let verdict = aggregate(&outcomes);
        assert!(!verdict.is_scam);
    }

    #[test]
    fn exact_tie_is_never_scam() {
        let outcomes = vec![
            vote("a", true, 0.9, "bank_fraud"),
            vote("b", true, 0.9, "bank_fraud"),
            vote("c", false, 0.1, "safe"),
            vote("d", false, 0.1, "safe"),
        ];
        let verdict = aggregate(&outcomes);
        assert!(!verdict.is_scam);
    }

    #[test]
    fn low_confidence_majority_is_demoted_to_safe() {
        let outcomes = vec![
            vote("a", true, 0.3, "bank_fraud"),
            vote("b", true, 0.4, "bank_fraud"),
            vote("c", false, 0.0, "safe"),
        ];
        let verdict = aggregate(&outcomes);
        assert!(!verdict.is_scam);
        assert_eq!(verdict.confidence, 0.0);
    }

    #[test]
    fn modal_scam_type_ties_break_by_first_seen() {
        let outcomes = vec![
            vote("a", true, 0.9, "phishing"),
            vote("b", true, 0.9, "bank_fraud"),
            vote("c", true, 0.9, "phishing"),
            vote("d", true, 0.9, "bank_fraud"),
            vote("e", false, 0.0, "safe"),
        ];
        let verdict = aggregate(&outcomes);
        // "phishing" and "bank_fraud" tie at 2 each; phishing seen first.
        assert_eq!(verdict.scam_type, "phishing");
    }

    #[test]
    fn invariant_is_scam_implies_bounds() {
        let outcomes = vec![
            vote("a", true, 0.9, "bank_fraud"),
            vote("b", true, 0.95, "bank_fraud"),
            vote("c", true, 0.8, "bank_fraud"),
            vote("d", false, 0.0, "safe"),
            vote("e", false, 0.0, "safe"),
        ];
        let verdict = aggregate(&outcomes);
        if verdict.is_scam {
            assert!(verdict.scam_votes >= 2);
            assert!(verdict.scam_votes as f64 > verdict.voter_count as f64 / 2.0);
            assert!(verdict.confidence >= 0.5);
        }
    }

    #[test]
    fn aggregation_is_deterministic_given_same_votes() {
        let outcomes = vec![
            vote("a", true, 0.9, "bank_fraud"),
            vote("b", true, 0.8, "bank_fraud"),
            vote("c", false, 0.1, "safe"),
        ];
        let v1 = aggregate(&outcomes);
        let v2 = aggregate(&outcomes);
        assert_eq!(v1, v2);
    }
}
