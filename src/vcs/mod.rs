//! VCS adapter contract: platform-agnostic operations against a hosting
//! service, exposed as capability traits plus an enum-dispatch concrete
//! client, per the capability-based polymorphism design.
//!
//! No `async-trait`, no `Box<dyn Trait>` — an enum-dispatch facade with
//! capability flags instead of scattered `Unsupported` errors.

pub mod github;
pub mod gitlab;
pub mod types;

pub use types::*;

use crate::errors::{ConfigError, OrchResult};

/// Runtime configuration for any VCS client.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: PlatformKind,
    /// API base, e.g. "https://gitlab.com/api/v4" or "https://api.github.com".
    pub base_api: String,
    /// Access token (GitLab private token or GitHub PAT).
    pub token: String,
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if !self.base_api.starts_with("http://") && !self.base_api.starts_with("https://") {
            return Err(ConfigError::InvalidBaseUrl(self.base_api.clone()));
        }
        Ok(())
    }
}

/// Which optional capability groups an adapter instance supports, probed once
/// at construction; there is no hot-swap path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VcsCapabilities {
    pub dedup: bool,
    pub checkpoint: bool,
    pub incremental: bool,
}

impl VcsCapabilities {
    pub const fn full() -> Self {
        Self {
            dedup: true,
            checkpoint: true,
            incremental: true,
        }
    }
}

/// Always-present operations every adapter MUST provide.
pub trait VcsCore {
    async fn get_pr(&self, id: &PullRequestId) -> OrchResult<PullRequest>;
    async fn get_diff(&self, id: &PullRequestId) -> OrchResult<Diff>;
    async fn get_files(&self, id: &PullRequestId) -> OrchResult<Vec<String>>;
    async fn get_author(&self, id: &PullRequestId) -> OrchResult<AuthorInfo>;
    async fn get_linked_tickets(&self, id: &PullRequestId) -> OrchResult<Vec<String>>;
    async fn submit_review(
        &self,
        id: &PullRequestId,
        diff: &Diff,
        review: SubmitReview,
    ) -> OrchResult<Verdict>;
    async fn get_file_content(
        &self,
        id: &PullRequestId,
        path: &str,
        git_ref: &str,
    ) -> OrchResult<Option<String>>;
    async fn add_comment(&self, id: &PullRequestId, body: &str) -> OrchResult<String>;
    async fn add_inline_comment(
        &self,
        id: &PullRequestId,
        path: &str,
        line: u32,
        commit_sha: &str,
        body: &str,
    ) -> OrchResult<String>;

    /// Remaining requests on the platform's rate-limit window, if known.
    fn rate_limit_remaining(&self) -> Option<u32>;
}

/// Deduplication support: reading/mutating the PR's existing comment stream.
pub trait DedupSupport {
    async fn get_review_comments(
        &self,
        id: &PullRequestId,
    ) -> OrchResult<Vec<DetailedReviewComment>>;
    async fn get_pr_comments(&self, id: &PullRequestId) -> OrchResult<Vec<PrComment>>;
    async fn update_review_comment(
        &self,
        id: &PullRequestId,
        comment_id: &str,
        body: &str,
    ) -> OrchResult<()>;
    async fn delete_review_comment(&self, id: &PullRequestId, comment_id: &str) -> OrchResult<()>;
}

/// Checkpoint support: reading/writing the PR-level checkpoint comment.
pub trait CheckpointSupport {
    async fn find_checkpoint_comment(
        &self,
        id: &PullRequestId,
    ) -> OrchResult<Option<(String, ReviewCheckpoint)>>;
    async fn create_checkpoint_comment(
        &self,
        id: &PullRequestId,
        cp: &ReviewCheckpoint,
    ) -> OrchResult<String>;
    async fn update_checkpoint_comment(
        &self,
        id: &PullRequestId,
        comment_id: &str,
        cp: &ReviewCheckpoint,
    ) -> OrchResult<()>;
}

/// Incremental-review support: commit comparison and incremental diffs.
pub trait IncrementalSupport {
    async fn compare_commits(
        &self,
        id: &PullRequestId,
        base_sha: &str,
        head_sha: &str,
    ) -> OrchResult<CommitComparison>;
    async fn get_head_sha(&self, id: &PullRequestId) -> OrchResult<String>;
    async fn get_incremental_diff(
        &self,
        id: &PullRequestId,
        base_sha: &str,
    ) -> OrchResult<IncrementalDiffResult>;
}

/// Concrete VCS client (enum-dispatch over platform adapters).
#[derive(Debug, Clone)]
pub enum VcsClient {
    GitLab(gitlab::GitLabAdapter),
    GitHub(github::GitHubAdapter),
}

impl VcsClient {
    /// Constructs a concrete client from generic provider config.
    pub fn from_config(cfg: ProviderConfig) -> OrchResult<Self> {
        cfg.validate()?;
        let http = reqwest::Client::builder()
            .user_agent("review-orchestrator/0.1")
            .build()
            .map_err(crate::errors::Error::from)?;
        Ok(match cfg.kind {
            PlatformKind::GitLab => {
                Self::GitLab(gitlab::GitLabAdapter::new(http, cfg.base_api, cfg.token))
            }
            PlatformKind::GitHub => {
                Self::GitHub(github::GitHubAdapter::new(http, cfg.base_api, cfg.token))
            }
        })
    }

    /// Capability flags for this adapter instance, computed once.
    pub fn capabilities(&self) -> VcsCapabilities {
        match self {
            Self::GitLab(_) => VcsCapabilities::full(),
            Self::GitHub(_) => VcsCapabilities::full(),
        }
    }
}

impl VcsCore for VcsClient {
    async fn get_pr(&self, id: &PullRequestId) -> OrchResult<PullRequest> {
        match self {
            Self::GitLab(c) => c.get_pr(id).await,
            Self::GitHub(c) => c.get_pr(id).await,
        }
    }

    async fn get_diff(&self, id: &PullRequestId) -> OrchResult<Diff> {
        match self {
            Self::GitLab(c) => c.get_diff(id).await,
            Self::GitHub(c) => c.get_diff(id).await,
        }
    }

    async fn get_files(&self, id: &PullRequestId) -> OrchResult<Vec<String>> {
        match self {
            Self::GitLab(c) => c.get_files(id).await,
            Self::GitHub(c) => c.get_files(id).await,
        }
    }

    async fn get_author(&self, id: &PullRequestId) -> OrchResult<AuthorInfo> {
        match self {
            Self::GitLab(c) => c.get_author(id).await,
            Self::GitHub(c) => c.get_author(id).await,
        }
    }

    async fn get_linked_tickets(&self, id: &PullRequestId) -> OrchResult<Vec<String>> {
        match self {
            Self::GitLab(c) => c.get_linked_tickets(id).await,
            Self::GitHub(c) => c.get_linked_tickets(id).await,
        }
    }

    async fn submit_review(
        &self,
        id: &PullRequestId,
        diff: &Diff,
        review: SubmitReview,
    ) -> OrchResult<Verdict> {
        match self {
            Self::GitLab(c) => c.submit_review(id, diff, review).await,
            Self::GitHub(c) => c.submit_review(id, diff, review).await,
        }
    }

    async fn get_file_content(
        &self,
        id: &PullRequestId,
        path: &str,
        git_ref: &str,
    ) -> OrchResult<Option<String>> {
        match self {
            Self::GitLab(c) => c.get_file_content(id, path, git_ref).await,
            Self::GitHub(c) => c.get_file_content(id, path, git_ref).await,
        }
    }

    async fn add_comment(&self, id: &PullRequestId, body: &str) -> OrchResult<String> {
        match self {
            Self::GitLab(c) => c.add_comment(id, body).await,
            Self::GitHub(c) => c.add_comment(id, body).await,
        }
    }

    async fn add_inline_comment(
        &self,
        id: &PullRequestId,
        path: &str,
        line: u32,
        commit_sha: &str,
        body: &str,
    ) -> OrchResult<String> {
        match self {
            Self::GitLab(c) => c.add_inline_comment(id, path, line, commit_sha, body).await,
            Self::GitHub(c) => c.add_inline_comment(id, path, line, commit_sha, body).await,
        }
    }

    fn rate_limit_remaining(&self) -> Option<u32> {
        match self {
            Self::GitLab(c) => c.rate_limit_remaining(),
            Self::GitHub(c) => c.rate_limit_remaining(),
        }
    }
}

impl DedupSupport for VcsClient {
    async fn get_review_comments(
        &self,
        id: &PullRequestId,
    ) -> OrchResult<Vec<DetailedReviewComment>> {
        match self {
            Self::GitLab(c) => c.get_review_comments(id).await,
            Self::GitHub(c) => c.get_review_comments(id).await,
        }
    }

    async fn get_pr_comments(&self, id: &PullRequestId) -> OrchResult<Vec<PrComment>> {
        match self {
            Self::GitLab(c) => c.get_pr_comments(id).await,
            Self::GitHub(c) => c.get_pr_comments(id).await,
        }
    }

    async fn update_review_comment(
        &self,
        id: &PullRequestId,
        comment_id: &str,
        body: &str,
    ) -> OrchResult<()> {
        match self {
            Self::GitLab(c) => c.update_review_comment(id, comment_id, body).await,
            Self::GitHub(c) => c.update_review_comment(id, comment_id, body).await,
        }
    }

    async fn delete_review_comment(&self, id: &PullRequestId, comment_id: &str) -> OrchResult<()> {
        match self {
            Self::GitLab(c) => c.delete_review_comment(id, comment_id).await,
            Self::GitHub(c) => c.delete_review_comment(id, comment_id).await,
        }
    }
}

impl CheckpointSupport for VcsClient {
    async fn find_checkpoint_comment(
        &self,
        id: &PullRequestId,
    ) -> OrchResult<Option<(String, ReviewCheckpoint)>> {
        match self {
            Self::GitLab(c) => c.find_checkpoint_comment(id).await,
            Self::GitHub(c) => c.find_checkpoint_comment(id).await,
        }
    }

    async fn create_checkpoint_comment(
        &self,
        id: &PullRequestId,
        cp: &ReviewCheckpoint,
    ) -> OrchResult<String> {
        match self {
            Self::GitLab(c) => c.create_checkpoint_comment(id, cp).await,
            Self::GitHub(c) => c.create_checkpoint_comment(id, cp).await,
        }
    }

    async fn update_checkpoint_comment(
        &self,
        id: &PullRequestId,
        comment_id: &str,
        cp: &ReviewCheckpoint,
    ) -> OrchResult<()> {
        match self {
            Self::GitLab(c) => c.update_checkpoint_comment(id, comment_id, cp).await,
            Self::GitHub(c) => c.update_checkpoint_comment(id, comment_id, cp).await,
        }
    }
}

impl IncrementalSupport for VcsClient {
    async fn compare_commits(
        &self,
        id: &PullRequestId,
        base_sha: &str,
        head_sha: &str,
    ) -> OrchResult<CommitComparison> {
        match self {
            Self::GitLab(c) => c.compare_commits(id, base_sha, head_sha).await,
            Self::GitHub(c) => c.compare_commits(id, base_sha, head_sha).await,
        }
    }

    async fn get_head_sha(&self, id: &PullRequestId) -> OrchResult<String> {
        match self {
            Self::GitLab(c) => c.get_head_sha(id).await,
            Self::GitHub(c) => c.get_head_sha(id).await,
        }
    }

    async fn get_incremental_diff(
        &self,
        id: &PullRequestId,
        base_sha: &str,
    ) -> OrchResult<IncrementalDiffResult> {
        match self {
            Self::GitLab(c) => c.get_incremental_diff(id, base_sha).await,
            Self::GitHub(c) => c.get_incremental_diff(id, base_sha).await,
        }
    }
}
