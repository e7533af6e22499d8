//! Deduplication engine: the hardest single component. Runs every new
//! comment through twelve ordered per-comment filters, applies whole-PR
//! guards ahead of them, then sorts, caps, and optionally consolidates the
//! survivors.
//!
//! The cross-file consolidation pass uses a clustering/theme-bucketing/
//! heuristic-score shape
//! (anchor proximity, coarse theme buckets), adapted from LLM-assisted
//! survivor selection to pure deterministic grouping, since this pass is
//! defined as grouping only, with no model call.

use std::collections::{HashMap, HashSet};

use globset::{Glob, GlobSet, GlobSetBuilder};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

use crate::comment_manager::{issue_id, parse_metadata, AUTHORING_MARKER};
use crate::config::{OrchestratorConfig, BUILTIN_BINARY_PATTERNS, BUILTIN_SKIP_PATTERNS, TEST_PATH_PATTERNS};
use crate::diff::track_line_movement;
use crate::response_parser::ParsedComment;
use crate::vcs::types::{CommentMetadata, DetailedReviewComment, Diff, PrState, PullRequest, Severity};

lazy_static! {
    /// Heuristic patterns for unreliable version claims (Open Question ii):
    /// the model's knowledge cutoff makes "since vX.Y" style statements
    /// unreliable, so they are dropped rather than surfaced as findings.
    static ref VERSION_CLAIM_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)\bsince\s+v?\d+(\.\d+)*\b").unwrap(),
        Regex::new(r"(?i)\b(as of|starting (in|with|from))\s+v?\d+(\.\d+)*\b").unwrap(),
        Regex::new(r"(?i)\b(introduced|added|deprecated|removed)\s+in\s+v?\d+(\.\d+)*\b").unwrap(),
        Regex::new(r"(?i)\bavailable\s+(since|from)\s+v?\d+(\.\d+)*\b").unwrap(),
        Regex::new(r"(?i)\brequires?\s+v?\d+(\.\d+)*\s+or\s+(later|above|newer)\b").unwrap(),
    ];
}

const DISMISSED_KEYWORDS: &[&str] = &[
    "wontfix", "won't fix", "will not fix", "as designed", "by design", "intended",
    "false positive", "resolved", "fixed", "done", "nit", "nitpick", "ignore",
];

/// The twelve per-comment reasons, plus the whole-PR abort reasons
/// and the post-sort global cap reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupReason {
    InvalidLineNumber,
    EmptyComment,
    VersionClaim,
    BinaryFile,
    SkipPattern,
    FileDeleted,
    FileRenamed,
    LineNotInDiff,
    LineDeleted,
    DuplicateLine,
    CodeChanged,
    Dismissed,
    MaxCommentsPerFile,
    TestFileLenient,
    MaxCommentsReached,
    DraftPr,
    MergedPr,
    ClosedPr,
    Locked,
    RateLimited,
}

impl DedupReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidLineNumber => "invalid_line_number",
            Self::EmptyComment => "empty_comment",
            Self::VersionClaim => "version_claim",
            Self::BinaryFile => "binary_file",
            Self::SkipPattern => "skip_pattern",
            Self::FileDeleted => "file_deleted",
            Self::FileRenamed => "file_renamed",
            Self::LineNotInDiff => "line_not_in_diff",
            Self::LineDeleted => "line_deleted",
            Self::DuplicateLine => "duplicate_line",
            Self::CodeChanged => "code_changed",
            Self::Dismissed => "dismissed",
            Self::MaxCommentsPerFile => "max_comments_per_file",
            Self::TestFileLenient => "test_file_lenient",
            Self::MaxCommentsReached => "max_comments_reached",
            Self::DraftPr => "draft_pr",
            Self::MergedPr => "merged_pr",
            Self::ClosedPr => "closed_pr",
            Self::Locked => "locked",
            Self::RateLimited => "rate_limited",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilteredComment {
    pub comment: ParsedComment,
    pub reason: DedupReason,
}

#[derive(Debug, Clone)]
pub struct ConsolidatedGroup {
    pub prefix: String,
    pub comments: Vec<ParsedComment>,
}

#[derive(Debug, Clone, Default)]
pub struct DedupOutput {
    pub kept: Vec<ParsedComment>,
    pub filtered: Vec<FilteredComment>,
    pub skipped_files: Vec<String>,
    pub warnings: Vec<String>,
    pub consolidated: Vec<ConsolidatedGroup>,
}

/// Input bundle for [`run_dedup`].
pub struct DedupInput<'a> {
    pub pr: &'a PullRequest,
    pub rate_limit_remaining: Option<u32>,
    pub requests_in_window: u32,
    pub comments: Vec<ParsedComment>,
    pub existing: &'a [DetailedReviewComment],
    pub diff: &'a Diff,
    pub config: &'a OrchestratorConfig,
}

/// Runs the full dedup pipeline: whole-PR guards, twelve ordered per-comment
/// filters, sort, global cap, cross-file consolidation.
pub fn run_dedup(input: DedupInput) -> DedupOutput {
    if let Some(reason) = whole_pr_guard(&input) {
        return DedupOutput {
            warnings: vec![format!("review aborted: {}", reason.as_str())],
            ..Default::default()
        };
    }

    let binary_set = build_binary_set();
    let skip_set = build_skip_set(&input.config.skip_patterns);
    let dismissed_ids: HashSet<String> = input
        .existing
        .iter()
        .filter(|e| is_dismissed(e))
        .map(|e| e.id.clone())
        .collect();

    let mut kept = Vec::new();
    let mut filtered = Vec::new();
    let mut skipped_files = Vec::new();
    let warnings: Vec<String> = Vec::new();
    let mut per_file_counts: HashMap<String, usize> = HashMap::new();

    for comment in input.comments {
        match classify(
            &comment,
            input.diff,
            input.existing,
            &dismissed_ids,
            &binary_set,
            &skip_set,
            input.config,
            &mut per_file_counts,
        ) {
            FileOutcome::Keep => {
                *per_file_counts.entry(comment.path.clone()).or_insert(0) += 1;
                kept.push(comment);
            }
            FileOutcome::Drop(reason) => {
                if matches!(reason, DedupReason::FileDeleted | DedupReason::FileRenamed)
                    && !skipped_files.contains(&comment.path)
                {
                    skipped_files.push(comment.path.clone());
                }
                filtered.push(FilteredComment { comment, reason });
            }
        }
    }

    kept.sort_by(|a, b| {
        sev_rank(a.severity)
            .cmp(&sev_rank(b.severity))
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.line.cmp(&b.line))
    });

    if kept.len() > input.config.max_comments {
        let overflow = kept.split_off(input.config.max_comments);
        filtered.extend(overflow.into_iter().map(|comment| FilteredComment {
            comment,
            reason: DedupReason::MaxCommentsReached,
        }));
    }

    let consolidated = consolidate(&mut kept);

    DedupOutput {
        kept,
        filtered,
        skipped_files,
        warnings,
        consolidated,
    }
}

fn sev_rank(s: Severity) -> u8 {
    match s {
        Severity::Error => 0,
        Severity::Warning => 1,
        Severity::Info => 2,
    }
}

fn whole_pr_guard(input: &DedupInput) -> Option<DedupReason> {
    if input.pr.is_draft && input.config.skip_drafts {
        return Some(DedupReason::DraftPr);
    }
    if input.pr.state == PrState::Merged {
        return Some(DedupReason::MergedPr);
    }
    if input.pr.state == PrState::Closed {
        return Some(DedupReason::ClosedPr);
    }
    if input.pr.is_locked {
        return Some(DedupReason::Locked);
    }
    if let Some(remaining) = input.rate_limit_remaining {
        if remaining < input.config.rate_limit_floor as u32 {
            return Some(DedupReason::RateLimited);
        }
    }
    if input.requests_in_window >= input.config.rate_limit_window.max_requests {
        return Some(DedupReason::RateLimited);
    }
    None
}

fn build_skip_set(extra: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pat in BUILTIN_SKIP_PATTERNS.iter().chain(extra.iter().map(String::as_str)) {
        if let Ok(g) = Glob::new(pat) {
            builder.add(g);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap())
}

fn build_binary_set() -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pat in BUILTIN_BINARY_PATTERNS {
        if let Ok(g) = Glob::new(pat) {
            builder.add(g);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap())
}

fn is_dismissed(e: &DetailedReviewComment) -> bool {
    e.replies.iter().any(|r| {
        let lower = r.body.to_lowercase();
        DISMISSED_KEYWORDS.iter().any(|k| lower.contains(k))
    })
}

fn is_test_path(path: &str) -> bool {
    TEST_PATH_PATTERNS.iter().any(|p| path.contains(p))
}

/// Finds an existing AgnusAI comment on `path` whose recomputed issue id
/// (using *its own* stored line and the *new* comment's body) matches its
/// stored metadata issue id — i.e. the same logical finding, whether or not
/// it has since moved lines.
fn find_matching_existing<'a>(
    path: &str,
    new_body: &str,
    existing: &'a [DetailedReviewComment],
) -> Option<(&'a DetailedReviewComment, CommentMetadata)> {
    existing.iter().find_map(|e| {
        if e.path != path || !e.body.contains(AUTHORING_MARKER) {
            return None;
        }
        let meta = parse_metadata(&e.body)?;
        let existing_line = e.line.or(e.original_line)? as i64;
        let recomputed = issue_id(path, existing_line, new_body);
        (recomputed == meta.issue_id).then_some((e, meta))
    })
}

fn original_code_still_present(diff: &Diff, path: &str, original_code: &str) -> bool {
    let needle = original_code.trim();
    if needle.is_empty() {
        return false;
    }
    diff.files
        .iter()
        .find(|f| f.path == path)
        .is_some_and(|f| {
            f.hunks.iter().any(|h| {
                h.content.iter().any(|raw| {
                    let content = raw.strip_prefix(['+', '-', ' ']).unwrap_or(raw);
                    content.contains(needle)
                })
            })
        })
}

enum FileOutcome {
    Keep,
    Drop(DedupReason),
}

#[allow(clippy::too_many_arguments)]
fn classify(
    comment: &ParsedComment,
    diff: &Diff,
    existing: &[DetailedReviewComment],
    dismissed_ids: &HashSet<String>,
    binary_set: &GlobSet,
    skip_set: &GlobSet,
    cfg: &OrchestratorConfig,
    per_file_counts: &mut HashMap<String, usize>,
) -> FileOutcome {
    // 1. invalid_line_number
    if comment.line < 1 {
        return FileOutcome::Drop(DedupReason::InvalidLineNumber);
    }
    // 2. empty_comment
    if comment.body.trim().is_empty() {
        return FileOutcome::Drop(DedupReason::EmptyComment);
    }
    // 3. version_claim
    if VERSION_CLAIM_PATTERNS.iter().any(|re| re.is_match(&comment.body)) {
        return FileOutcome::Drop(DedupReason::VersionClaim);
    }
    // 4. binary_file takes priority over the generic skip_pattern check.
    if binary_set.is_match(&comment.path) {
        return FileOutcome::Drop(DedupReason::BinaryFile);
    }
    if skip_set.is_match(&comment.path) {
        return FileOutcome::Drop(DedupReason::SkipPattern);
    }

    let file = diff.files.iter().find(|f| f.path == comment.path);
    // 5. file_deleted / file_renamed
    let Some(file) = file else {
        let renamed = diff
            .files
            .iter()
            .any(|f| f.old_path.as_deref() == Some(comment.path.as_str()));
        return FileOutcome::Drop(if renamed {
            DedupReason::FileRenamed
        } else {
            DedupReason::FileDeleted
        });
    };
    if file.is_binary {
        return FileOutcome::Drop(DedupReason::BinaryFile);
    }

    // 6. line_not_in_diff
    let changed = crate::diff::changed_lines(&file.hunks);
    if !changed.contains(&(comment.line as u32)) {
        return FileOutcome::Drop(DedupReason::LineNotInDiff);
    }
    // 7. line_deleted
    let movement = track_line_movement(&file.hunks);
    if movement.get(&(comment.line as u32)) == Some(&-1) {
        return FileOutcome::Drop(DedupReason::LineDeleted);
    }

    // 8/9/10: duplicate_line, code_changed, dismissed share one lookup.
    if let Some((existing_comment, meta)) = find_matching_existing(&comment.path, &comment.body, existing) {
        if dismissed_ids.contains(&existing_comment.id) {
            return FileOutcome::Drop(DedupReason::Dismissed);
        }
        let existing_line = existing_comment.line.or(existing_comment.original_line);
        if existing_line == Some(comment.line as u32) {
            return FileOutcome::Drop(DedupReason::DuplicateLine);
        }
        match &meta.original_code {
            None => {
                warn!(
                    "comment on {}:{} matches a pre-metadata-era comment with no originalCode; \
                     treating as code_changed unconditionally (may suppress a still-valid finding)",
                    comment.path, comment.line
                );
                return FileOutcome::Drop(DedupReason::CodeChanged);
            }
            Some(original_code) => {
                if original_code_still_present(diff, &comment.path, original_code) {
                    return FileOutcome::Drop(DedupReason::CodeChanged);
                }
                // originalCode no longer found anywhere: surrounding code
                // genuinely changed, let the new comment proceed.
            }
        }
    }

    // 11. max_comments_per_file
    let accepted_so_far = per_file_counts.get(&comment.path).copied().unwrap_or(0);
    if accepted_so_far >= cfg.max_comments_per_file {
        return FileOutcome::Drop(DedupReason::MaxCommentsPerFile);
    }

    // 12. test_file_lenient
    if cfg.lenient_on_tests && is_test_path(&comment.path) && comment.severity != Severity::Error {
        return FileOutcome::Drop(DedupReason::TestFileLenient);
    }

    FileOutcome::Keep
}

/// Groups kept comments by a 30-char lowercased body prefix; groups of size
/// ≥3 are pulled out as consolidated suggestions.
fn consolidate(kept: &mut Vec<ParsedComment>) -> Vec<ConsolidatedGroup> {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, c) in kept.iter().enumerate() {
        let prefix: String = c.body.to_lowercase().chars().take(30).collect();
        groups.entry(prefix).or_default().push(i);
    }

    let mut consolidated_indices: HashSet<usize> = HashSet::new();
    let mut consolidated = Vec::new();
    for (prefix, indices) in groups {
        if indices.len() >= 3 {
            consolidated_indices.extend(indices.iter().copied());
            consolidated.push((prefix, indices));
        }
    }

    let mut groups_out = Vec::new();
    for (prefix, indices) in consolidated {
        let comments = indices.iter().map(|&i| kept[i].clone()).collect();
        groups_out.push(ConsolidatedGroup { prefix, comments });
    }

    let mut i = 0;
    kept.retain(|_| {
        let keep = !consolidated_indices.contains(&i);
        i += 1;
        keep
    });

    groups_out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::types::{AuthorInfo, CommentUser, FileDiff, FileStatus, Hunk, PlatformKind, PullRequestId, UserType};
    use chrono::Utc;

    fn pr() -> PullRequest {
        PullRequest {
            platform: PlatformKind::GitHub,
            id: PullRequestId { project: "o/r".to_string(), number: 1 },
            title: "t".to_string(),
            description: None,
            author: AuthorInfo { id: "1".to_string(), login: "a".to_string(), name: None },
            source_branch: "feat".to_string(),
            target_branch: "main".to_string(),
            head_sha: "deadbeef".to_string(),
            state: PrState::Open,
            is_draft: false,
            is_locked: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn cfg() -> OrchestratorConfig {
        OrchestratorConfig::default()
    }

    fn diff_with_file(path: &str, hunk_lines: &[&str]) -> Diff {
        diff_with_lines(path, hunk_lines.iter().map(|s| s.to_string()).collect())
    }

    fn diff_with_lines(path: &str, content: Vec<String>) -> Diff {
        Diff {
            files: vec![FileDiff {
                path: path.to_string(),
                old_path: None,
                status: FileStatus::Modified,
                additions: 1,
                deletions: 0,
                hunks: vec![Hunk {
                    old_start: 40,
                    old_lines: 1,
                    new_start: 40,
                    new_lines: content.len() as u32,
                    content,
                }],
                is_binary: false,
            }],
        }
    }

    fn parsed(path: &str, line: i64, body: &str, severity: Severity) -> ParsedComment {
        ParsedComment {
            path: path.to_string(),
            line,
            body: body.to_string(),
            confidence: 0.9,
            severity,
        }
    }

    fn existing_comment(path: &str, line: Option<u32>, body: &str, replies: Vec<crate::vcs::types::CommentReply>) -> DetailedReviewComment {
        DetailedReviewComment {
            id: format!("{path}:{line:?}"),
            path: path.to_string(),
            line,
            original_line: line,
            body: body.to_string(),
            user: CommentUser { login: "bot".to_string(), user_type: UserType::Bot },
            in_reply_to_id: None,
            commit_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            replies,
        }
    }

    #[test]
    fn per_file_cap_keeps_five_of_seven_sorted_by_line() {
        let diff = diff_with_lines("src/a.ts", (0..8).map(|_| "+x".to_string()).collect());
        let comments: Vec<_> = (40..47)
            .map(|line| parsed("src/a.ts", line, "minor nit about naming", Severity::Info))
            .collect();
        let out = run_dedup(DedupInput {
            pr: &pr(),
            rate_limit_remaining: Some(100),
            requests_in_window: 0,
            comments,
            existing: &[],
            diff: &diff,
            config: &cfg(),
        });
        let per_file_kept: Vec<_> = out.kept.iter().filter(|c| c.path == "src/a.ts").collect();
        assert_eq!(per_file_kept.len(), 5);
        assert!(out
            .filtered
            .iter()
            .filter(|f| matches!(f.reason, DedupReason::MaxCommentsPerFile))
            .count()
            >= 2);
    }

    #[test]
    fn binary_file_filtered_before_line_checks() {
        let diff = Diff { files: vec![] };
        let out = run_dedup(DedupInput {
            pr: &pr(),
            rate_limit_remaining: Some(100),
            requests_in_window: 0,
            comments: vec![parsed("assets/logo.png", 1, "looks off", Severity::Info)],
            existing: &[],
            diff: &diff,
            config: &cfg(),
        });
        assert_eq!(out.filtered.len(), 1);
        assert_eq!(out.filtered[0].reason.as_str(), "binary_file");
    }

    #[test]
    fn dismissed_finding_wins_over_duplicate_line() {
        let diff = diff_with_file("src/race.rs", &["+let x = 1;"]);
        let existing = vec![existing_comment(
            "src/race.rs",
            Some(40),
            &format!("potential race\n\n{AUTHORING_MARKER}\n<!-- AGNUSAI_META: {{\"commitSha\":\"a\",\"issueId\":\"{}\",\"timestamp\":1}} -->", issue_id("src/race.rs", 40, "potential race")),
            vec![crate::vcs::types::CommentReply {
                body: "as designed".to_string(),
                user: CommentUser { login: "human".to_string(), user_type: UserType::Human },
            }],
        )];
        let out = run_dedup(DedupInput {
            pr: &pr(),
            rate_limit_remaining: Some(100),
            requests_in_window: 0,
            comments: vec![parsed("src/race.rs", 40, "potential race", Severity::Warning)],
            existing: &existing,
            diff: &diff,
            config: &cfg(),
        });
        assert_eq!(out.filtered.len(), 1);
        assert_eq!(out.filtered[0].reason.as_str(), "dismissed");
    }

    #[test]
    fn line_movement_code_changed_both_paths() {
        let body = "foo issue";
        let old_issue_id = issue_id("file.ts", 42, body);
        let meta_present = format!(
            "{AUTHORING_MARKER}\n<!-- AGNUSAI_META: {{\"commitSha\":\"a\",\"issueId\":\"{old_issue_id}\",\"originalCode\":\"foo\",\"timestamp\":1}} -->"
        );
        let existing = vec![existing_comment("file.ts", Some(42), &meta_present, vec![])];

        // Path A: originalCode ("foo") still present somewhere in the new diff -> skip.
        let diff_unchanged = diff_with_file("file.ts", &[" context", "+foo still here"]);
        let out = run_dedup(DedupInput {
            pr: &pr(),
            rate_limit_remaining: Some(100),
            requests_in_window: 0,
            comments: vec![parsed("file.ts", 45, body, Severity::Info)],
            existing: &existing,
            diff: &diff_unchanged,
            config: &cfg(),
        });
        assert_eq!(out.kept.len(), 0);
        assert_eq!(out.filtered[0].reason.as_str(), "code_changed");

        // Path B: originalCode no longer found anywhere -> the new comment is posted.
        let diff_changed = diff_with_file("file.ts", &[" context", "+completely different code"]);
        let out2 = run_dedup(DedupInput {
            pr: &pr(),
            rate_limit_remaining: Some(100),
            requests_in_window: 0,
            comments: vec![parsed("file.ts", 45, body, Severity::Info)],
            existing: &existing,
            diff: &diff_changed,
            config: &cfg(),
        });
        assert_eq!(out2.kept.len(), 1);
    }

    #[test]
    fn whole_pr_guard_aborts_on_draft() {
        let mut p = pr();
        p.is_draft = true;
        let diff = diff_with_file("a.rs", &["+x"]);
        let out = run_dedup(DedupInput {
            pr: &p,
            rate_limit_remaining: Some(100),
            requests_in_window: 0,
            comments: vec![parsed("a.rs", 40, "x", Severity::Info)],
            existing: &[],
            diff: &diff,
            config: &cfg(),
        });
        assert!(out.kept.is_empty());
        assert!(out.warnings.iter().any(|w| w.contains("draft_pr")));
    }

    #[test]
    fn consolidates_three_or_more_similar_bodies() {
        let diff = diff_with_lines("a.rs", (0..4).map(|_| "+x".to_string()).collect());
        let comments = vec![
            parsed("a.rs", 40, "Consider extracting this logic into a helper function please", Severity::Info),
            parsed("a.rs", 41, "Consider extracting this logic into a helper for clarity", Severity::Info),
            parsed("a.rs", 42, "Consider extracting this logic into something reusable", Severity::Info),
        ];
        let out = run_dedup(DedupInput {
            pr: &pr(),
            rate_limit_remaining: Some(100),
            requests_in_window: 0,
            comments,
            existing: &[],
            diff: &diff,
            config: &cfg(),
        });
        assert_eq!(out.kept.len(), 0);
        assert_eq!(out.consolidated.len(), 1);
        assert_eq!(out.consolidated[0].comments.len(), 3);
    }
}
