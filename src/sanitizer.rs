//! Final gatekeeper applied to [`ExtractedIntelligence`] immediately before
//! callback dispatch. Idempotent: running it twice yields the same result.

use crate::types::ExtractedIntelligence;

const MAX_KEYWORDS: usize = 7;

/// Apply the per-field rules from spec §4.6. `is_scam` gates the
/// suspicious-keywords field: it is emptied whenever the verdict is safe.
pub fn sanitize(intel: &ExtractedIntelligence, is_scam: bool) -> ExtractedIntelligence {
    ExtractedIntelligence {
        bank_accounts: sanitize_bank_accounts(&intel.bank_accounts),
        upi_ids: sanitize_upi_ids(&intel.upi_ids),
        phishing_links: sanitize_phishing_links(&intel.phishing_links),
        phone_numbers: sanitize_phone_numbers(&intel.phone_numbers),
        suspicious_keywords: if is_scam {
            sanitize_keywords(&intel.suspicious_keywords)
        } else {
            Vec::new()
        },
    }
}

fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn dedup_preserve_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

/// Bank account candidates are 12-18 digit numbers (matching the
/// Extractor's own `BANK_ACCOUNT_PATTERN`) — a bare 4-digit fragment like
/// a masked card's last digits is noise, not an account number.
const MIN_BANK_ACCOUNT_DIGITS: usize = 12;

fn sanitize_bank_accounts(items: &[String]) -> Vec<String> {
    let cleaned: Vec<String> = items
        .iter()
        .map(|s| digits_only(s))
        .filter(|d| d.len() >= MIN_BANK_ACCOUNT_DIGITS)
        .collect();
    dedup_preserve_order(cleaned)
}

fn sanitize_upi_ids(items: &[String]) -> Vec<String> {
    let cleaned: Vec<String> = items.iter().filter(|s| s.contains('@')).cloned().collect();
    dedup_preserve_order(cleaned)
}

fn sanitize_phishing_links(items: &[String]) -> Vec<String> {
    let cleaned: Vec<String> = items
        .iter()
        .filter(|s| {
            if !s.starts_with("http") {
                return false;
            }
            let prefix = match s.find('?') {
                Some(idx) => &s[..idx],
                None => s.as_str(),
            };
            !prefix.chars().any(|c| c.is_whitespace())
        })
        .cloned()
        .collect();
    dedup_preserve_order(cleaned)
}

fn sanitize_phone_numbers(items: &[String]) -> Vec<String> {
    let cleaned: Vec<String> = items
        .iter()
        .filter(|s| digits_only(s).len() >= 10)
        .cloned()
        .collect();
    dedup_preserve_order(cleaned)
}

/// Lowercase, drop near-duplicates (a keyword is a duplicate if any
/// retained keyword is a substring of it — keep the shortest form), cap
/// at seven. Shortest-first ordering ensures a short retained keyword
/// correctly absorbs longer variants seen later.
fn sanitize_keywords(items: &[String]) -> Vec<String> {
    let mut lowered: Vec<String> = items.iter().map(|s| s.to_lowercase()).collect();
    lowered.sort_by_key(|s| s.len());
    lowered.dedup();

    let mut retained: Vec<String> = Vec::new();
    for candidate in lowered {
        if retained.iter().any(|kept: &String| candidate.contains(kept.as_str())) {
            continue;
        }
        retained.push(candidate);
        if retained.len() == MAX_KEYWORDS {
            break;
        }
    }
    retained
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intel(
        bank: &[&str],
        upi: &[&str],
        links: &[&str],
        phones: &[&str],
        keywords: &[&str],
    ) -> ExtractedIntelligence {
        ExtractedIntelligence {
            bank_accounts: bank.iter().map(|s| s.to_string()).collect(),
            upi_ids: upi.iter().map(|s| s.to_string()).collect(),
            phishing_links: links.iter().map(|s| s.to_string()).collect(),
            phone_numbers: phones.iter().map(|s| s.to_string()).collect(),
            suspicious_keywords: keywords.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn bank_accounts_require_twelve_digits() {
        let i = intel(&["ab12", "1", "12345", "123456789012"], &[], &[], &[], &[]);
        let s = sanitize(&i, true);
        assert_eq!(s.bank_accounts, vec!["123456789012".to_string()]);
    }

    #[test]
    fn bank_accounts_extracts_digits_and_dedupes() {
        let i = intel(&["acct: 123456789012", "123456789012", "xx"], &[], &[], &[], &[]);
        let s = sanitize(&i, true);
        assert_eq!(s.bank_accounts, vec!["123456789012".to_string()]);
    }

    #[test]
    fn upi_ids_require_at_sign() {
        let i = intel(&[], &["scammer@upi", "notanupi", "scammer@upi"], &[], &[], &[]);
        let s = sanitize(&i, true);
        assert_eq!(s.upi_ids, vec!["scammer@upi".to_string()]);
    }

    #[test]
    fn phishing_links_must_start_http_and_have_no_whitespace_before_query() {
        let i = intel(
            &[],
            &[],
            &["http://evil.xyz", "ftp://evil.xyz", "http://evil .xyz?x=1", "http://ok.xyz?x=1"],
            &[],
            &[],
        );
        let s = sanitize(&i, true);
        assert_eq!(s.phishing_links, vec!["http://evil.xyz".to_string(), "http://ok.xyz?x=1".to_string()]);
    }

    #[test]
    fn phone_numbers_require_ten_digits() {
        let i = intel(&[], &[], &[], &["9876543210", "12345", "+91 98765 43210"], &[]);
        let s = sanitize(&i, true);
        assert!(s.phone_numbers.contains(&"9876543210".to_string()));
        assert!(!s.phone_numbers.iter().any(|p| p == "12345"));
    }

    #[test]
    fn keywords_empty_when_not_scam() {
        let i = intel(&[], &[], &[], &[], &["urgent", "otp"]);
        let s = sanitize(&i, false);
        assert!(s.suspicious_keywords.is_empty());
    }

    #[test]
    fn keywords_substring_dedup_keeps_shortest() {
        let i = intel(&[], &[], &[], &[], &["OTP", "otp", "verify otp now", "urgent"]);
        let s = sanitize(&i, true);
        assert_eq!(s.suspicious_keywords, vec!["otp".to_string(), "urgent".to_string()]);
    }

    #[test]
    fn keywords_cap_at_seven() {
        let words: Vec<&str> = vec!["a1", "b2", "c3", "d4", "e5", "f6", "g7", "h8"];
        let i = intel(&[], &[], &[], &[], &words);
        let s = sanitize(&i, true);
        assert_eq!(s.suspicious_keywords.len(), 7);
    }

    #[test]
    fn no_retained_keyword_is_a_substring_of_another() {
        let i = intel(&[], &[], &[], &[], &["pay", "payment", "paypal", "urgent", "bank"]);
        let s = sanitize(&i, true);
        for a in &s.suspicious_keywords {
            for b in &s.suspicious_keywords {
                if a != b {
                    assert!(!b.contains(a.as_str()), "{b} contains {a}");
                }
            }
        }
    }

    #[test]
    fn sanitizer_is_idempotent() {
        let i = intel(
            &["acct 123456789012", "789012"],
            &["a@b", "bad"],
            &["http://x.xyz?y=1", "notalink"],
            &["9876543210"],
            &["OTP", "urgent urgent", "bank transfer"],
        );
        let once = sanitize(&i, true);
        let twice = sanitize(&once, true);
        assert_eq!(once, twice);
    }

    /// spec.md Scenario 6 (sanitiser stress), verified literally.
    #[test]
    fn scenario_six_sanitiser_stress() {
        let i = intel(
            &["XXXX1234", "98 7654 3210 12"],
            &["user@ybl", "click here"],
            &["http://a.xyz?x=1", "Click here", "http://a.xyz?x=1"],
            &[],
            &["urgent", "very urgent", "urgent now", "OTP", "otp"],
        );
        let s = sanitize(&i, true);
        assert_eq!(s.bank_accounts, vec!["987654321012".to_string()]);
        assert_eq!(s.upi_ids, vec!["user@ybl".to_string()]);
        assert_eq!(s.phishing_links, vec!["http://a.xyz?x=1".to_string()]);
        assert_eq!(s.suspicious_keywords, vec!["otp".to_string(), "urgent".to_string()]);
    }
}
