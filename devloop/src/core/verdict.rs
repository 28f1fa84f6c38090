//! Fail-closed parsing of verification verdicts.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::core::types::Verdict;

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(alias = "pass_qa")]
    passed: bool,
    #[serde(default, alias = "response")]
    rationale: Option<String>,
}

/// Parse the verification gate's reply.
///
/// Accepts a bare JSON object, a fenced ```` ```json ```` block, or the
/// outermost `{...}` span embedded in prose. Anything that does not yield a
/// boolean `passed` (or `pass_qa`) is a failing verdict whose rationale is the
/// raw reply.
pub fn parse_verdict(raw: &str) -> Verdict {
    for candidate in candidates(raw) {
        let Ok(value) = serde_json::from_str::<Value>(candidate) else {
            continue;
        };
        if let Ok(parsed) = serde_json::from_value::<RawVerdict>(value) {
            let rationale = parsed
                .rationale
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| raw.trim().to_string());
            return Verdict {
                passed: parsed.passed,
                rationale,
            };
        }
    }
    Verdict::fail(unparsable_rationale(raw))
}

fn unparsable_rationale(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        "verification reply was empty".to_string()
    } else {
        trimmed.to_string()
    }
}

fn candidates(raw: &str) -> Vec<&str> {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").expect("static fence pattern")
    });

    let trimmed = raw.trim();
    let mut out = vec![trimmed];
    out.extend(
        FENCE_RE
            .captures_iter(raw)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim()),
    );
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && start < end
    {
        out.push(&trimmed[start..=end]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_json_is_accepted() {
        let verdict = parse_verdict(r#"{"passed": true, "rationale": "all criteria met"}"#);
        assert_eq!(verdict, Verdict::pass("all criteria met"));
    }

    #[test]
    fn fenced_legacy_keys_are_accepted() {
        let raw = "Here is my review:\n```json\n{\"pass_qa\": false, \"response\": \"README missing\"}\n```\n";
        let verdict = parse_verdict(raw);
        assert_eq!(verdict, Verdict::fail("README missing"));
    }

    #[test]
    fn embedded_object_in_prose_is_accepted() {
        let verdict = parse_verdict("Verdict: {\"passed\": true, \"rationale\": \"ok\"} done");
        assert!(verdict.passed);
        assert_eq!(verdict.rationale, "ok");
    }

    #[test]
    fn unparsable_reply_fails_closed_with_raw_text() {
        let verdict = parse_verdict("looks good to me!");
        assert!(!verdict.passed);
        assert_eq!(verdict.rationale, "looks good to me!");
    }

    #[test]
    fn non_boolean_passed_fails_closed() {
        let raw = r#"{"passed": "yes", "rationale": "fine"}"#;
        let verdict = parse_verdict(raw);
        assert!(!verdict.passed);
        assert_eq!(verdict.rationale, raw);
    }

    #[test]
    fn empty_reply_fails_closed() {
        let verdict = parse_verdict("   ");
        assert!(!verdict.passed);
        assert!(verdict.rationale.contains("empty"));
    }
}
