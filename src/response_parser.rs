//! Response parser: parses the model's textual output into a summary,
//! inline comments, and a verdict, per the strict wire format.
//!
//! Uses regex-driven block splitting and keyword-based classification
//! against the `[File: <path>, Line: <n>] ... [Confidence: X.X]` grammar.

use lazy_static::lazy_static;
use regex::Regex;

use crate::vcs::types::{Severity, Verdict};

lazy_static! {
    static ref FILE_MARKER: Regex =
        Regex::new(r"\[File:\s*(?P<path>[^,\]]+?)\s*,\s*Line:\s*(?P<line>[^\]]+?)\s*\]").unwrap();
    static ref VERDICT_RE: Regex =
        Regex::new(r"(?i)VERDICT:\s*(approve|request_changes|comment)").unwrap();
    static ref CONFIDENCE_RE: Regex =
        Regex::new(r"\[Confidence:\s*([0-9]*\.?[0-9]+)\]").unwrap();
}

const DEFAULT_CONFIDENCE: f32 = 0.5;
const FALLBACK_SUMMARY_CHARS: usize = 500;

/// A single parsed `[File: ..., Line: ...]` block, before precision
/// filtering or deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedComment {
    pub path: String,
    pub line: i64,
    pub body: String,
    pub confidence: f32,
    pub severity: Severity,
}

/// Full result of parsing one model response.
#[derive(Debug, Clone)]
pub struct ParsedReview {
    pub summary: String,
    pub comments: Vec<ParsedComment>,
    pub verdict: Verdict,
    pub warnings: Vec<String>,
}

/// Parses raw model output text in a single pass.
pub fn parse_model_output(text: &str) -> ParsedReview {
    let mut warnings = Vec::new();

    let file_matches: Vec<_> = FILE_MARKER.captures_iter(text).collect();
    let verdict_match = VERDICT_RE.find(text);

    let summary = extract_summary(text, &file_matches, verdict_match.map(|m| m.start()));

    let mut comments = Vec::new();
    for (i, cap) in file_matches.iter().enumerate() {
        let whole = cap.get(0).unwrap();
        let body_start = whole.end();
        let next_start = file_matches
            .get(i + 1)
            .map(|c| c.get(0).unwrap().start())
            .unwrap_or(text.len());
        let boundary = match verdict_match {
            Some(v) if v.start() > body_start && v.start() < next_start => v.start(),
            _ => next_start,
        };
        let raw_body = text[body_start..boundary].trim();
        if raw_body.is_empty() {
            continue;
        }

        let path = cap.name("path").unwrap().as_str().trim().to_string();
        let line: Option<i64> = cap
            .name("line")
            .and_then(|m| m.as_str().trim().parse::<i64>().ok());
        let Some(line) = line else { continue };
        if line < 1 {
            continue;
        }

        let (confidence, body_wo_confidence) = extract_confidence(raw_body);
        if body_wo_confidence.is_empty() {
            continue;
        }

        comments.push(ParsedComment {
            path,
            line,
            severity: classify_severity(&body_wo_confidence),
            body: body_wo_confidence,
            confidence,
        });
    }

    let verdict = match verdict_match.and_then(|_| VERDICT_RE.captures(text)) {
        Some(cap) => match cap.get(1).unwrap().as_str().to_ascii_lowercase().as_str() {
            "approve" => Verdict::Approve,
            "request_changes" => Verdict::RequestChanges,
            _ => Verdict::Comment,
        },
        None => {
            warnings.push("no VERDICT line found; defaulting to comment".to_string());
            Verdict::Comment
        }
    };

    if !file_matches.is_empty() && verdict_match.is_none() {
        warnings.push("model output appears truncated: [File:] markers present but no VERDICT".to_string());
    }

    ParsedReview {
        summary,
        comments,
        verdict,
        warnings,
    }
}

fn extract_summary(text: &str, file_matches: &[regex::Captures], verdict_start: Option<usize>) -> String {
    let Some(sum_pos) = text.find("SUMMARY:") else {
        return text.chars().take(FALLBACK_SUMMARY_CHARS).collect();
    };
    let start = sum_pos + "SUMMARY:".len();
    let rest = &text[start..];

    let file_pos = file_matches
        .first()
        .map(|c| c.get(0).unwrap().start())
        .filter(|&p| p >= start)
        .map(|p| p - start);
    let verdict_pos = verdict_start.filter(|&p| p >= start).map(|p| p - start);

    let boundary = match (file_pos, verdict_pos) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    };

    match boundary {
        Some(b) => rest[..b].trim().to_string(),
        None => rest.trim().to_string(),
    }
}

/// Extracts the `[Confidence: X.X]` token (if any), clamps it to `[0,1]`,
/// and returns the body with the token removed.
fn extract_confidence(body: &str) -> (f32, String) {
    match CONFIDENCE_RE.captures(body) {
        Some(cap) => {
            let raw: f32 = cap.get(1).unwrap().as_str().parse().unwrap_or(DEFAULT_CONFIDENCE);
            let clamped = raw.clamp(0.0, 1.0);
            let whole = cap.get(0).unwrap();
            let mut cleaned = String::with_capacity(body.len());
            cleaned.push_str(&body[..whole.start()]);
            cleaned.push_str(&body[whole.end()..]);
            (clamped, cleaned.trim().to_string())
        }
        None => (DEFAULT_CONFIDENCE, body.to_string()),
    }
}

fn classify_severity(body: &str) -> Severity {
    if body.contains("Critical") {
        Severity::Error
    } else if body.contains("Major") {
        Severity::Warning
    } else {
        Severity::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_summary_comments_and_verdict() {
        let text = "\
SUMMARY:
This change adds validation.

[File: src/a.rs, Line: 10]
Critical: missing null check here.
[Confidence: 0.9]

[File: src/b.rs, Line: 20]
Major: consider extracting helper.
[Confidence: 0.6]

VERDICT: request_changes
";
        let parsed = parse_model_output(text);
        assert_eq!(parsed.summary, "This change adds validation.");
        assert_eq!(parsed.comments.len(), 2);
        assert_eq!(parsed.comments[0].path, "src/a.rs");
        assert_eq!(parsed.comments[0].line, 10);
        assert_eq!(parsed.comments[0].severity, Severity::Error);
        assert!((parsed.comments[0].confidence - 0.9).abs() < f32::EPSILON);
        assert_eq!(parsed.comments[1].severity, Severity::Warning);
        assert_eq!(parsed.verdict, Verdict::RequestChanges);
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn defaults_confidence_when_absent() {
        let text = "SUMMARY:\nok\n\n[File: a.rs, Line: 1]\nLooks fine.\n\nVERDICT: approve\n";
        let parsed = parse_model_output(text);
        assert_eq!(parsed.comments.len(), 1);
        assert!((parsed.comments[0].confidence - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn truncated_output_without_verdict_still_parses_and_warns() {
        let text = "\
SUMMARY:
Partial output.

[File: a.rs, Line: 1]
First issue.
[Confidence: 0.8]

[File: b.rs, Line: 2]
Second issue.
[Confidence: 0.7]

[File: c.rs, Line: 3]
Third issue.
[Confidence: 0.6]
";
        let parsed = parse_model_output(text);
        assert_eq!(parsed.comments.len(), 3);
        assert_eq!(parsed.verdict, Verdict::Comment);
        assert!(parsed.warnings.iter().any(|w| w.contains("truncated")));
    }

    #[test]
    fn rejects_non_positive_or_non_integer_line_numbers() {
        let text = "SUMMARY:\nx\n\n[File: a.rs, Line: 0]\nbad.\n\n[File: a.rs, Line: abc]\nbad2.\n\nVERDICT: comment\n";
        let parsed = parse_model_output(text);
        assert!(parsed.comments.is_empty());
    }

    #[test]
    fn falls_back_to_first_500_chars_without_summary_marker() {
        let long = "x".repeat(600);
        let parsed = parse_model_output(&long);
        assert_eq!(parsed.summary.len(), FALLBACK_SUMMARY_CHARS);
    }

    #[test]
    fn missing_verdict_entirely_defaults_to_comment_with_warning() {
        let text = "SUMMARY:\nno verdict here\n";
        let parsed = parse_model_output(text);
        assert_eq!(parsed.verdict, Verdict::Comment);
        assert!(parsed.warnings.iter().any(|w| w.contains("VERDICT")));
    }
}
