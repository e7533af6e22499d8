//! Precision filter: drops comments whose self-reported confidence is
//! below a threshold. Runs after parsing and before deduplication, so
//! dropped comments never consume the per-file cap.

use crate::response_parser::ParsedComment;

pub const DEFAULT_PRECISION_THRESHOLD: f32 = 0.7;

/// Retains only comments with `confidence >= threshold`.
pub fn apply_precision_filter(comments: Vec<ParsedComment>, threshold: f32) -> Vec<ParsedComment> {
    comments.into_iter().filter(|c| c.confidence >= threshold).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::types::Severity;

    fn comment(confidence: f32) -> ParsedComment {
        ParsedComment {
            path: "a.rs".to_string(),
            line: 1,
            body: "note".to_string(),
            confidence,
            severity: Severity::Info,
        }
    }

    #[test]
    fn drops_below_threshold_keeps_at_or_above() {
        let comments = vec![comment(0.9), comment(0.7), comment(0.69), comment(0.5)];
        let kept = apply_precision_filter(comments, DEFAULT_PRECISION_THRESHOLD);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|c| c.confidence >= 0.7));
    }
}
