//! Comment manager: idempotent inline posting, metadata sentinel,
//! checkpoint maintenance.
//!
//! Uses a marker-and-key idiom for idempotent posting (an authoring marker
//! plus an `AGNUSAI_META` JSON sentinel block), backed by a process-local
//! idempotency map rather than a pre-fetch existing-marker set.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::OrchestratorConfig;
use crate::errors::OrchResult;
use crate::vcs::{CheckpointSupport, VcsCore};
use crate::vcs::types::{PullRequestId, ReviewCheckpoint, ReviewComment, SubmitReview, Verdict};

/// Trailing line that identifies a comment as produced by this system.
pub const AUTHORING_MARKER: &str = "<!-- agnusai-review -->";
/// Prefix that opens the metadata sentinel inside a posted comment body.
pub const META_PREFIX: &str = "<!-- AGNUSAI_META: ";
/// Suffix that closes the metadata sentinel.
pub const META_SUFFIX: &str = " -->";

/// Platform-safe upper bound on a single comment body.
pub const MAX_BODY_CHARS: usize = 65_000;
const TRUNCATION_NOTE: &str = "*[truncated]*";

/// Metadata embedded in every posted inline comment body.
pub type CommentMetadata = crate::vcs::types::CommentMetadata;

/// Computes the stable issue identifier used both for metadata and for the
/// idempotency key: `sha256("path:line:body")[:16]` (hex).
pub fn issue_id(path: &str, line: i64, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{path}:{line}:{body}").as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], hex_chars: usize) -> String {
    let mut out = String::with_capacity(hex_chars);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
        if out.len() >= hex_chars {
            break;
        }
    }
    out.truncate(hex_chars);
    out
}

/// Parses the `AGNUSAI_META` sentinel out of a posted comment body, if present.
pub fn parse_metadata(body: &str) -> Option<CommentMetadata> {
    let start = body.find(META_PREFIX)?;
    let json_start = start + META_PREFIX.len();
    let rest = &body[json_start..];
    let end = rest.find(META_SUFFIX)?;
    match serde_json::from_str::<CommentMetadata>(&rest[..end]) {
        Ok(meta) => Some(meta),
        Err(e) => {
            warn!("malformed comment metadata, treating as absent: {e}");
            None
        }
    }
}

/// Appends the authoring marker and metadata sentinel to a comment body,
/// enforcing the platform-safe length bound.
pub fn render_body(text: &str, meta: &CommentMetadata) -> String {
    let meta_json = serde_json::to_string(meta).unwrap_or_else(|_| "{}".to_string());
    let sentinel = format!("\n\n{AUTHORING_MARKER}\n{META_PREFIX}{meta_json}{META_SUFFIX}");

    if text.len() + sentinel.len() <= MAX_BODY_CHARS {
        return format!("{text}{sentinel}");
    }

    let budget = MAX_BODY_CHARS
        .saturating_sub(sentinel.len())
        .saturating_sub(TRUNCATION_NOTE.len() + 1);
    let truncated = truncate_at_char_boundary(text, budget);
    format!("{truncated}\n{TRUNCATION_NOTE}{sentinel}")
}

fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PostState {
    Pending,
    Completed,
    Failed,
}

struct IdempotencyEntry {
    state: PostState,
    at: Instant,
}

/// Process-local idempotency map keyed by `review-<sha7>-<path>-<line>-<issueId>`.
///
/// An explicit value rather than a module-level singleton, so callers
/// control its lifetime (see `OrchestratorRuntime`).
#[derive(Default)]
pub struct IdempotencyMap {
    entries: Mutex<HashMap<String, IdempotencyEntry>>,
}

impl IdempotencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this key should be skipped (an entry is `Pending`
    /// and fresher than `ttl`), otherwise marks it `Pending` and proceeds.
    fn try_claim(&self, key: &str, ttl: Duration) -> bool {
        let mut entries = self.entries.lock().expect("idempotency map poisoned");
        if let Some(e) = entries.get(key) {
            if e.state == PostState::Pending && e.at.elapsed() < ttl {
                return true;
            }
        }
        entries.insert(
            key.to_string(),
            IdempotencyEntry {
                state: PostState::Pending,
                at: Instant::now(),
            },
        );
        false
    }

    fn mark(&self, key: &str, state: PostState) {
        let mut entries = self.entries.lock().expect("idempotency map poisoned");
        entries.insert(
            key.to_string(),
            IdempotencyEntry {
                state,
                at: Instant::now(),
            },
        );
    }
}

fn idempotency_key(sha: &str, path: &str, line: i64, issue_id: &str) -> String {
    let sha7: String = sha.chars().take(7).collect();
    let sanitized_path: String = path
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("review-{sha7}-{sanitized_path}-{line}-{issue_id}")
}

/// Outcome of posting one review to a pull request.
#[derive(Debug, Clone, Default)]
pub struct PostOutcome {
    pub posted: usize,
    pub failed: usize,
    pub verdict: Option<Verdict>,
}

/// Posts every kept comment, submits the review verdict, and — unless
/// `skip_checkpoint` is set (incremental review's `skipCheckpoint` option) —
/// maintains the checkpoint comment. Never propagates a
/// per-comment failure past this function; on total inline failure it falls
/// back to a single PR-level summary comment.
pub async fn post_review<C>(
    client: &C,
    id: &PullRequestId,
    diff: &crate::vcs::types::Diff,
    commit_sha: &str,
    comments: Vec<ReviewComment>,
    summary: String,
    verdict: Verdict,
    files_reviewed: Vec<String>,
    idempotency: &IdempotencyMap,
    cfg: &OrchestratorConfig,
    skip_checkpoint: bool,
) -> OrchResult<PostOutcome>
where
    C: VcsCore + CheckpointSupport,
{
    let mut posted = 0usize;
    let mut failed = 0usize;
    let now = chrono::Utc::now().timestamp();

    for (i, c) in comments.iter().enumerate() {
        let iid = issue_id(&c.path, c.line, &c.body);
        let key = idempotency_key(commit_sha, &c.path, c.line, &iid);

        if idempotency.try_claim(&key, cfg.idempotency_ttl) {
            debug!("skipping {key}: pending and still fresh");
            continue;
        }

        let meta = CommentMetadata {
            commit_sha: commit_sha.to_string(),
            issue_id: iid,
            original_code: crate::diff::line_content(diff, &c.path, c.line),
            timestamp: now,
        };
        let body = render_body(&c.body, &meta);

        match client
            .add_inline_comment(id, &c.path, c.line.max(0) as u32, commit_sha, &body)
            .await
        {
            Ok(_) => {
                idempotency.mark(&key, PostState::Completed);
                posted += 1;
            }
            Err(e) => {
                warn!("failed to post comment on {}:{}: {e}", c.path, c.line);
                idempotency.mark(&key, PostState::Failed);
                failed += 1;
            }
        }

        if i + 1 < comments.len() {
            tokio::time::sleep(cfg.inter_comment_delay).await;
        }
    }

    if posted == 0 && failed > 0 {
        let fallback = format!(
            "**Verdict: {}**\n\n{summary}\n\n_Inline comments could not be posted ({failed} failed)._",
            verdict_label(verdict)
        );
        if let Err(e) = client.add_comment(id, &fallback).await {
            warn!("fallback summary comment also failed: {e}");
        }
    }

    let submit = SubmitReview {
        summary,
        comments,
        verdict,
    };
    let final_verdict = match client.submit_review(id, diff, submit).await {
        Ok(v) => v,
        Err(e) => {
            warn!("submit_review failed (non-fatal): {e}");
            verdict
        }
    };

    if !skip_checkpoint {
        let new_checkpoint = ReviewCheckpoint {
            sha: commit_sha.to_string(),
            timestamp: now,
            files_reviewed,
            comment_count: posted as u32,
            verdict: final_verdict,
        };
        maintain_checkpoint(client, id, &new_checkpoint).await?;
    }

    Ok(PostOutcome {
        posted,
        failed,
        verdict: Some(final_verdict),
    })
}

/// Find-then-update, or create if absent.
async fn maintain_checkpoint<C>(client: &C, id: &PullRequestId, cp: &ReviewCheckpoint) -> OrchResult<()>
where
    C: CheckpointSupport,
{
    match client.find_checkpoint_comment(id).await? {
        Some((comment_id, _old)) => {
            client.update_checkpoint_comment(id, &comment_id, cp).await?;
        }
        None => {
            client.create_checkpoint_comment(id, cp).await?;
        }
    }
    Ok(())
}

fn verdict_label(v: Verdict) -> &'static str {
    match v {
        Verdict::Approve => "Approve",
        Verdict::RequestChanges => "Request changes",
        Verdict::Comment => "Comment",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_id_is_stable_and_16_hex_chars() {
        let a = issue_id("src/a.rs", 10, "missing null check");
        let b = issue_id("src/a.rs", 10, "missing null check");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn issue_id_changes_with_line_or_body() {
        let a = issue_id("src/a.rs", 10, "x");
        let b = issue_id("src/a.rs", 11, "x");
        let c = issue_id("src/a.rs", 10, "y");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn metadata_round_trips_through_render_and_parse() {
        let meta = CommentMetadata {
            commit_sha: "abc123".to_string(),
            issue_id: "deadbeefcafef00d".to_string(),
            original_code: Some("let x = 1;".to_string()),
            timestamp: 1_700_000_000,
        };
        let body = render_body("This looks wrong.", &meta);
        assert!(body.contains(AUTHORING_MARKER));
        let parsed = parse_metadata(&body).expect("should parse");
        assert_eq!(parsed.commit_sha, meta.commit_sha);
        assert_eq!(parsed.issue_id, meta.issue_id);
        assert_eq!(parsed.original_code, meta.original_code);
    }

    #[test]
    fn oversized_body_is_truncated_with_note_and_markers_kept() {
        let long_text = "x".repeat(MAX_BODY_CHARS + 1000);
        let meta = CommentMetadata {
            commit_sha: "abc".to_string(),
            issue_id: "0123456789abcdef".to_string(),
            original_code: None,
            timestamp: 1,
        };
        let body = render_body(&long_text, &meta);
        assert!(body.len() <= MAX_BODY_CHARS);
        assert!(body.contains(TRUNCATION_NOTE));
        assert!(body.contains(AUTHORING_MARKER));
        assert!(body.contains(META_PREFIX));
    }

    #[test]
    fn idempotency_map_blocks_fresh_pending_and_allows_after_completion() {
        let map = IdempotencyMap::new();
        let key = "review-abc1234-src_a.rs-10-deadbeefcafef00d";
        assert!(!map.try_claim(key, Duration::from_secs(60)));
        assert!(map.try_claim(key, Duration::from_secs(60)));
        map.mark(key, PostState::Completed);
        assert!(!map.try_claim(key, Duration::from_secs(60)));
    }

    #[test]
    fn idempotency_key_sanitizes_path() {
        let key = idempotency_key("abcdef1234567", "src/weird path!.rs", 3, "0123456789abcdef");
        assert!(key.starts_with("review-abcdef1"));
        assert!(!key.contains('/'));
        assert!(!key.contains(' '));
        assert!(!key.contains('!'));
    }
}
