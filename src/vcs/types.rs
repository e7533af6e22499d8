//! Provider-agnostic data model for pull requests and diffs.
//!
//! These types are the normalized output of the VCS adapter layer and
//! are consumed by every later stage: the diff model, the prompt builder,
//! the dedup engine, and the comment manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported hosting platforms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PlatformKind {
    GitLab,
    GitHub,
}

/// A unique reference to a pull request inside a platform.
///
/// * `project` – GitLab: numeric ID or "group/project"; GitHub: "owner/repo".
/// * `number`  – GitLab MR IID or GitHub PR number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PullRequestId {
    pub project: String,
    pub number: u64,
}

/// Lifecycle state of a pull request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

/// Minimal author info about the human who opened the PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorInfo {
    pub id: String,
    pub login: String,
    pub name: Option<String>,
}

/// High-level metadata for a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub platform: PlatformKind,
    pub id: PullRequestId,
    pub title: String,
    pub description: Option<String>,
    pub author: AuthorInfo,
    pub source_branch: String,
    pub target_branch: String,
    pub head_sha: String,
    pub state: PrState,
    pub is_draft: bool,
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Change kind of a file within a diff.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// A diff hunk (continuous block of changes). Line numbers are 1-indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    /// Raw unified-diff payload lines for this hunk, including the leading
    /// `+`/`-`/` ` marker but excluding the `@@ ... @@` header itself.
    pub content: Vec<String>,
}

/// File-level change and its hunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub old_path: Option<String>,
    pub status: FileStatus,
    pub additions: u32,
    pub deletions: u32,
    pub hunks: Vec<Hunk>,
    pub is_binary: bool,
}

/// The full ordered set of file changes for a pull request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Diff {
    pub files: Vec<FileDiff>,
}

/// Author type for a detailed (platform) comment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Human,
    Bot,
}

/// Minimal user reference attached to a platform comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentUser {
    pub login: String,
    pub user_type: UserType,
}

/// An existing inline comment already present on the PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedReviewComment {
    pub id: String,
    pub path: String,
    pub line: Option<u32>,
    pub original_line: Option<u32>,
    pub body: String,
    pub user: CommentUser,
    pub in_reply_to_id: Option<String>,
    pub commit_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Thread replies, used by the `dismissed` dedup rule.
    #[serde(default)]
    pub replies: Vec<CommentReply>,
}

/// A reply attached to a comment thread (used by the `dismissed` dedup rule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentReply {
    pub body: String,
    pub user: CommentUser,
}

/// A PR-level (non-inline) comment — where checkpoints live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrComment {
    pub id: String,
    pub body: String,
    pub user: CommentUser,
    pub created_at: DateTime<Utc>,
}

/// Severity of a proposed review comment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    // Order matters: derived `Ord` sorts error < warning < info, the
    // required sort key (severity_rank with error first).
    Error,
    Warning,
    Info,
}

/// Verdict attached to a finished review.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    RequestChanges,
    Comment,
}

/// A comment produced by the pipeline, ready to be filtered/posted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub path: String,
    pub line: i64,
    pub body: String,
    pub severity: Severity,
    pub suggestion: Option<String>,
    pub confidence: f32,
}

/// Final result of a model-backed review pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub summary: String,
    pub comments: Vec<ReviewComment>,
    pub verdict: Verdict,
}

/// Submission payload accepted by `VcsCore::submit_review`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReview {
    pub summary: String,
    pub comments: Vec<ReviewComment>,
    pub verdict: Verdict,
}

/// A review-state checkpoint, embedded in a PR-level comment body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewCheckpoint {
    pub sha: String,
    /// Epoch seconds.
    pub timestamp: i64,
    #[serde(default)]
    pub files_reviewed: Vec<String>,
    #[serde(default)]
    pub comment_count: u32,
    #[serde(default = "default_checkpoint_verdict")]
    pub verdict: Verdict,
}

fn default_checkpoint_verdict() -> Verdict {
    Verdict::Comment
}

/// Metadata embedded in every posted inline comment body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentMetadata {
    pub commit_sha: String,
    pub issue_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_code: Option<String>,
    /// Epoch seconds.
    pub timestamp: i64,
}

/// Relative position of HEAD vs. a checkpoint/base SHA.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompareStatus {
    Identical,
    Ahead,
    Behind,
    Diverged,
}

/// Result of comparing two commits on the same PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitComparison {
    pub base_sha: String,
    pub head_sha: String,
    pub status: CompareStatus,
    pub ahead_by: u32,
    pub behind_by: u32,
    pub files: Vec<FileDiff>,
}

/// Outcome of computing an incremental diff against a checkpoint SHA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalDiffResult {
    pub is_incremental: bool,
    pub reason: Option<String>,
    pub diff: Diff,
}

impl IncrementalDiffResult {
    pub fn not_incremental(reason: impl Into<String>) -> Self {
        Self {
            is_incremental: false,
            reason: Some(reason.into()),
            diff: Diff::default(),
        }
    }

    pub fn empty() -> Self {
        Self {
            is_incremental: true,
            reason: None,
            diff: Diff::default(),
        }
    }
}
