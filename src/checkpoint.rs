//! Checkpoint codec: serialize/parse the review-state record embedded
//! in a PR-level comment body.
//!
//! Uses a JSON-(de)serialize-into-a-sentinel idiom (embed-in-string rather
//! than write-to-disk) plus regex-driven extraction to locate the sentinel
//! inside free text.

use tracing::warn;

use crate::vcs::types::{PrComment, ReviewCheckpoint};

/// Prefix that opens a checkpoint sentinel inside a comment body.
pub const CHECKPOINT_PREFIX: &str = "<!-- AGNUSAI_CHECKPOINT: ";
/// Suffix that closes any sentinel block.
pub const SENTINEL_SUFFIX: &str = " -->";

const MAX_STALE_DAYS: i64 = 30;

/// Renders a checkpoint as the full sentinel line to append to a comment body.
pub fn serialize_checkpoint(cp: &ReviewCheckpoint) -> String {
    let json = serde_json::to_string(cp).unwrap_or_else(|_| "{}".to_string());
    format!("{CHECKPOINT_PREFIX}{json}{SENTINEL_SUFFIX}")
}

/// Finds the first checkpoint sentinel in `body` and parses its JSON payload.
///
/// Returns `None` (and logs) on missing sentinel or malformed JSON — callers
/// MUST fall back to a full review in that case.
pub fn parse_checkpoint(body: &str) -> Option<ReviewCheckpoint> {
    let start = body.find(CHECKPOINT_PREFIX)?;
    let json_start = start + CHECKPOINT_PREFIX.len();
    let rest = &body[json_start..];
    let end = rest.find(SENTINEL_SUFFIX)?;
    let json = &rest[..end];
    match serde_json::from_str::<ReviewCheckpoint>(json) {
        Ok(cp) => Some(cp),
        Err(e) => {
            warn!("malformed checkpoint JSON, falling back to full review: {e}");
            None
        }
    }
}

/// Scans all PR-level comments, parses every body, and returns the
/// `(comment_id, checkpoint)` pair with the greatest `timestamp`.
///
/// The marker is authoritative; no bot-identity heuristic is required.
pub fn find_newest_checkpoint(comments: &[PrComment]) -> Option<(String, ReviewCheckpoint)> {
    comments
        .iter()
        .filter_map(|c| parse_checkpoint(&c.body).map(|cp| (c.id.clone(), cp)))
        .max_by_key(|(_, cp)| cp.timestamp)
}

/// True iff the checkpoint is older than `max_days` days relative to `now`
/// (both in epoch-millisecond terms internally).
pub fn is_checkpoint_stale(cp: &ReviewCheckpoint, now_epoch_secs: i64, max_days: i64) -> bool {
    let now_ms = now_epoch_secs.saturating_mul(1000);
    let cp_ms = cp.timestamp.saturating_mul(1000);
    now_ms - cp_ms > max_days.saturating_mul(86_400_000)
}

/// Convenience wrapper using the default staleness window (30 days).
pub fn is_checkpoint_stale_default(cp: &ReviewCheckpoint, now_epoch_secs: i64) -> bool {
    is_checkpoint_stale(cp, now_epoch_secs, MAX_STALE_DAYS)
}

/// True iff the checkpoint's SHA is still valid to diff from: either it is
/// exactly HEAD, or there is at least one commit ahead of it.
pub fn validate_checkpoint_sha(cp: &ReviewCheckpoint, head: &str, commits_ahead: u32) -> bool {
    cp.sha == head || commits_ahead > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::types::{CommentUser, UserType, Verdict};
    use chrono::Utc;

    fn sample_checkpoint(sha: &str, ts: i64) -> ReviewCheckpoint {
        ReviewCheckpoint {
            sha: sha.to_string(),
            timestamp: ts,
            files_reviewed: vec!["a.rs".to_string(), "b/c.rs".to_string()],
            comment_count: 3,
            verdict: Verdict::Comment,
        }
    }

    #[test]
    fn round_trips_through_serialize_and_parse() {
        let cp = sample_checkpoint("deadbeef", 1_700_000_000);
        let body = format!("some preamble\n{}\ntrailer", serialize_checkpoint(&cp));
        let parsed = parse_checkpoint(&body).expect("should parse");
        assert_eq!(parsed, cp);
    }

    #[test]
    fn round_trips_with_empty_files_reviewed_and_special_paths() {
        let cp = ReviewCheckpoint {
            sha: "abc123".to_string(),
            timestamp: 42,
            files_reviewed: vec![],
            comment_count: 0,
            verdict: Verdict::Approve,
        };
        let body = serialize_checkpoint(&cp);
        assert_eq!(parse_checkpoint(&body), Some(cp));

        let cp2 = ReviewCheckpoint {
            sha: "x".to_string(),
            timestamp: 1,
            files_reviewed: vec!["weird path/with spaces/".to_string(), "trailing/".to_string()],
            comment_count: 0,
            verdict: Verdict::Comment,
        };
        let body2 = serialize_checkpoint(&cp2);
        assert_eq!(parse_checkpoint(&body2), Some(cp2));
    }

    #[test]
    fn malformed_json_returns_none() {
        let body = format!("{CHECKPOINT_PREFIX}{{not json{SENTINEL_SUFFIX}");
        assert_eq!(parse_checkpoint(&body), None);
    }

    #[test]
    fn missing_sentinel_returns_none() {
        assert_eq!(parse_checkpoint("just a regular comment"), None);
    }

    #[test]
    fn defaults_fill_missing_optional_fields() {
        let body = format!("{CHECKPOINT_PREFIX}{{\"sha\":\"abc\",\"timestamp\":5}}{SENTINEL_SUFFIX}");
        let cp = parse_checkpoint(&body).expect("should parse with defaults");
        assert_eq!(cp.files_reviewed, Vec::<String>::new());
        assert_eq!(cp.comment_count, 0);
        assert_eq!(cp.verdict, Verdict::Comment);
    }

    fn pr_comment(id: &str, body: &str) -> PrComment {
        PrComment {
            id: id.to_string(),
            body: body.to_string(),
            user: CommentUser {
                login: "agnusai-bot".to_string(),
                user_type: UserType::Bot,
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn find_newest_checkpoint_picks_max_timestamp() {
        let older = sample_checkpoint("sha-old", 100);
        let newer = sample_checkpoint("sha-new", 200);
        let comments = vec![
            pr_comment("c1", &serialize_checkpoint(&older)),
            pr_comment("c2", "unrelated human comment"),
            pr_comment("c3", &serialize_checkpoint(&newer)),
        ];
        let (id, cp) = find_newest_checkpoint(&comments).expect("one should parse");
        assert_eq!(id, "c3");
        assert_eq!(cp, newer);
    }

    #[test]
    fn stale_detection_matches_threshold() {
        let cp = sample_checkpoint("sha", 0);
        // Exactly 30 days later: not yet strictly greater, so not stale.
        let exactly_30d = 30 * 86_400;
        assert!(!is_checkpoint_stale_default(&cp, exactly_30d));
        assert!(is_checkpoint_stale_default(&cp, exactly_30d + 1));
    }

    #[test]
    fn sha_validation_allows_exact_match_or_commits_ahead() {
        let cp = sample_checkpoint("headsha", 0);
        assert!(validate_checkpoint_sha(&cp, "headsha", 0));
        assert!(validate_checkpoint_sha(&cp, "othersha", 3));
        assert!(!validate_checkpoint_sha(&cp, "othersha", 0));
    }
}
