//! GitHub provider (REST v3) adapter.
//!
//! Built from scratch, mirroring [`super::gitlab::GitLabAdapter`]'s method
//! shapes and the conventions of the GitHub REST API (bearer PAT auth,
//! `Link`-header pagination, native Reviews API for verdicts).
//!
//! Endpoints used:
//! - GET  /repos/:owner/:repo/pulls/:number
//! - GET  /repos/:owner/:repo/pulls/:number/files
//! - GET  /repos/:owner/:repo/pulls/:number/comments          (review comments)
//! - GET  /repos/:owner/:repo/issues/:number/comments         (PR-level comments)
//! - POST /repos/:owner/:repo/pulls/:number/comments          (inline)
//! - POST /repos/:owner/:repo/issues/:number/comments         (general)
//! - PATCH/DELETE .../pulls/comments/:id
//! - POST  /repos/:owner/:repo/pulls/:number/reviews          (submit review)
//! - GET  /repos/:owner/:repo/compare/:base...:head
//! - GET  /repos/:owner/:repo/contents/:path?ref=:sha

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

use crate::checkpoint::{find_newest_checkpoint, serialize_checkpoint};
use crate::diff::{line_in_diff, looks_like_binary_patch, parse_unified_diff};
use crate::errors::{Error, OrchResult, VcsError};
use crate::vcs::types::*;

#[derive(Debug, Clone)]
pub struct GitHubAdapter {
    http: Client,
    base_api: String,
    token: String,
    rate_remaining: Arc<AtomicI64>,
}

impl GitHubAdapter {
    pub fn new(http: Client, base_api: String, token: String) -> Self {
        Self {
            http,
            base_api: base_api.trim_end_matches('/').to_string(),
            token,
            rate_remaining: Arc::new(AtomicI64::new(-1)),
        }
    }

    fn owner_repo(&self, project: &str) -> (String, String) {
        match project.split_once('/') {
            Some((owner, repo)) => (owner.to_string(), repo.to_string()),
            None => (project.to_string(), String::new()),
        }
    }

    fn record_rate_limit(&self, resp: &reqwest::Response) {
        if let Some(v) = resp.headers().get("x-ratelimit-remaining") {
            if let Ok(s) = v.to_str() {
                if let Ok(n) = s.parse::<i64>() {
                    self.rate_remaining.store(n, Ordering::Relaxed);
                }
            }
        }
    }

    fn auth_headers(&self) -> (&'static str, String) {
        ("Authorization", format!("Bearer {}", self.token))
    }

    async fn get(&self, path: &str) -> OrchResult<reqwest::Response> {
        let url = format!("{}{}", self.base_api, path);
        let (h, v) = self.auth_headers();
        let resp = self
            .http
            .get(&url)
            .header(h, v)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(Error::from)?;
        self.record_rate_limit(&resp);
        let resp = resp.error_for_status().map_err(Error::from)?;
        Ok(resp)
    }

    pub async fn get_pr(&self, id: &PullRequestId) -> OrchResult<PullRequest> {
        let (owner, repo) = self.owner_repo(&id.project);
        let path = format!("/repos/{owner}/{repo}/pulls/{}", id.number);
        let raw: GhPull = self.get(&path).await?.json().await.map_err(Error::from)?;
        Ok(PullRequest {
            platform: PlatformKind::GitHub,
            id: id.clone(),
            title: raw.title,
            description: raw.body,
            author: AuthorInfo {
                id: raw.user.id.to_string(),
                login: raw.user.login,
                name: None,
            },
            source_branch: raw.head.ref_name,
            target_branch: raw.base.ref_name,
            head_sha: raw.head.sha,
            state: if raw.merged {
                PrState::Merged
            } else if raw.state == "closed" {
                PrState::Closed
            } else {
                PrState::Open
            },
            is_draft: raw.draft,
            is_locked: raw.locked,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
        })
    }

    pub async fn get_diff(&self, id: &PullRequestId) -> OrchResult<Diff> {
        let (owner, repo) = self.owner_repo(&id.project);
        let path = format!("/repos/{owner}/{repo}/pulls/{}/files?per_page=100", id.number);
        let files: Vec<GhFile> = self.get(&path).await?.json().await.map_err(Error::from)?;
        let mut out = Vec::with_capacity(files.len());
        for f in files {
            let is_binary = f.patch.is_none();
            let hunks = match &f.patch {
                Some(p) if !looks_like_binary_patch(p) => parse_unified_diff(p),
                _ => Vec::new(),
            };
            let status = match f.status.as_str() {
                "added" => FileStatus::Added,
                "removed" => FileStatus::Deleted,
                "renamed" => FileStatus::Renamed,
                _ => FileStatus::Modified,
            };
            out.push(FileDiff {
                path: f.filename,
                old_path: f.previous_filename,
                status,
                additions: f.additions,
                deletions: f.deletions,
                hunks,
                is_binary,
            });
        }
        Ok(Diff { files: out })
    }

    pub async fn get_files(&self, id: &PullRequestId) -> OrchResult<Vec<String>> {
        Ok(self.get_diff(id).await?.files.into_iter().map(|f| f.path).collect())
    }

    pub async fn get_author(&self, id: &PullRequestId) -> OrchResult<AuthorInfo> {
        Ok(self.get_pr(id).await?.author)
    }

    /// Scans the description for GitHub issue-closing keywords
    /// (`Fixes #123`, `Closes #123`, `Resolves owner/repo#123`).
    pub async fn get_linked_tickets(&self, id: &PullRequestId) -> OrchResult<Vec<String>> {
        let pr = self.get_pr(id).await?;
        Ok(extract_issue_refs(pr.description.as_deref().unwrap_or("")))
    }

    pub async fn submit_review(
        &self,
        id: &PullRequestId,
        diff: &Diff,
        review: SubmitReview,
    ) -> OrchResult<Verdict> {
        let (owner, repo) = self.owner_repo(&id.project);
        let kept: Vec<&ReviewComment> = review
            .comments
            .iter()
            .filter(|c| line_in_diff(diff, &c.path, c.line))
            .collect();
        debug!(
            "github submit_review: {} of {} comments within diff",
            kept.len(),
            review.comments.len()
        );

        let mut summary = review.summary.clone();
        let mut verdict = review.verdict;
        let mut event = verdict_to_event(verdict);

        let path = format!("/repos/{owner}/{repo}/pulls/{}/reviews", id.number);
        let url = format!("{}{}", self.base_api, path);
        let (h, v) = self.auth_headers();

        let req = GhReviewReq {
            body: summary.clone(),
            event,
        };
        let resp = self
            .http
            .post(&url)
            .header(h.clone(), v.clone())
            .header("Accept", "application/vnd.github+json")
            .json(&req)
            .send()
            .await
            .map_err(Error::from)?;
        self.record_rate_limit(&resp);

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let own_pr = body.to_lowercase().contains("own pull request");
            if own_pr && !matches!(verdict, Verdict::Comment) {
                summary = format!(
                    "{summary}\n\n_Note: original verdict was `{}`, downgraded to `comment` \
                     because the reviewer authored this pull request._",
                    verdict_label(verdict)
                );
                verdict = Verdict::Comment;
                event = verdict_to_event(verdict);
                let retry = GhReviewReq {
                    body: summary.clone(),
                    event,
                };
                let resp2 = self
                    .http
                    .post(&url)
                    .header(h, v)
                    .header("Accept", "application/vnd.github+json")
                    .json(&retry)
                    .send()
                    .await
                    .map_err(Error::from)?;
                self.record_rate_limit(&resp2);
                resp2.error_for_status().map_err(Error::from)?;
            } else if status.as_u16() == 422 {
                return Err(Error::Vcs(VcsError::PlatformRejected(body)));
            } else {
                return Err(Error::Vcs(VcsError::InvalidResponse(body)));
            }
        }

        Ok(verdict)
    }

    pub async fn get_file_content(
        &self,
        id: &PullRequestId,
        path: &str,
        git_ref: &str,
    ) -> OrchResult<Option<String>> {
        let (owner, repo) = self.owner_repo(&id.project);
        let url = format!(
            "{}/repos/{owner}/{repo}/contents/{}?ref={}",
            self.base_api,
            urlencoding::encode(path),
            urlencoding::encode(git_ref)
        );
        let (h, v) = self.auth_headers();
        let resp = self
            .http
            .get(&url)
            .header(h, v)
            .header("Accept", "application/vnd.github.raw+json")
            .send()
            .await
            .map_err(Error::from)?;
        self.record_rate_limit(&resp);
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let resp = resp.error_for_status().map_err(Error::from)?;
        Ok(Some(resp.text().await.map_err(Error::from)?))
    }

    pub async fn add_comment(&self, id: &PullRequestId, body: &str) -> OrchResult<String> {
        let (owner, repo) = self.owner_repo(&id.project);
        let path = format!("/repos/{owner}/{repo}/issues/{}/comments", id.number);
        let url = format!("{}{}", self.base_api, path);
        let (h, v) = self.auth_headers();
        #[derive(serde::Serialize)]
        struct Req<'a> {
            body: &'a str,
        }
        let resp = self
            .http
            .post(&url)
            .header(h, v)
            .header("Accept", "application/vnd.github+json")
            .json(&Req { body })
            .send()
            .await
            .map_err(Error::from)?;
        self.record_rate_limit(&resp);
        let resp = resp.error_for_status().map_err(Error::from)?;
        let comment: GhIssueComment = resp.json().await.map_err(Error::from)?;
        Ok(comment.id.to_string())
    }

    pub async fn add_inline_comment(
        &self,
        id: &PullRequestId,
        path: &str,
        line: u32,
        commit_sha: &str,
        body: &str,
    ) -> OrchResult<String> {
        let (owner, repo) = self.owner_repo(&id.project);
        let url = format!("{}/repos/{owner}/{repo}/pulls/{}/comments", self.base_api, id.number);
        let (h, v) = self.auth_headers();
        #[derive(serde::Serialize)]
        struct Req<'a> {
            body: &'a str,
            commit_id: &'a str,
            path: &'a str,
            line: u32,
            side: &'a str,
        }
        let req = Req {
            body,
            commit_id: commit_sha,
            path,
            line,
            side: "RIGHT",
        };
        let resp = self
            .http
            .post(&url)
            .header(h, v)
            .header("Accept", "application/vnd.github+json")
            .json(&req)
            .send()
            .await
            .map_err(Error::from)?;
        self.record_rate_limit(&resp);
        let resp = resp.error_for_status().map_err(Error::from)?;
        let comment: GhReviewComment = resp.json().await.map_err(Error::from)?;
        Ok(comment.id.to_string())
    }

    pub fn rate_limit_remaining(&self) -> Option<u32> {
        let v = self.rate_remaining.load(Ordering::Relaxed);
        if v < 0 { None } else { Some(v as u32) }
    }

    pub async fn get_review_comments(
        &self,
        id: &PullRequestId,
    ) -> OrchResult<Vec<DetailedReviewComment>> {
        let (owner, repo) = self.owner_repo(&id.project);
        let path = format!("/repos/{owner}/{repo}/pulls/{}/comments?per_page=100", id.number);
        let raw: Vec<GhReviewComment> = self.get(&path).await?.json().await.map_err(Error::from)?;

        let mut replies_by_parent: std::collections::HashMap<u64, Vec<CommentReply>> =
            std::collections::HashMap::new();
        for c in &raw {
            if let Some(parent) = c.in_reply_to_id {
                replies_by_parent.entry(parent).or_default().push(CommentReply {
                    body: c.body.clone(),
                    user: CommentUser {
                        login: c.user.login.clone(),
                        user_type: if c.user.user_type.eq_ignore_ascii_case("Bot") {
                            UserType::Bot
                        } else {
                            UserType::Human
                        },
                    },
                });
            }
        }

        Ok(raw
            .iter()
            .filter(|c| c.in_reply_to_id.is_none())
            .map(|c| DetailedReviewComment {
                id: c.id.to_string(),
                path: c.path.clone(),
                line: c.line,
                original_line: c.original_line,
                body: c.body.clone(),
                user: CommentUser {
                    login: c.user.login.clone(),
                    user_type: if c.user.user_type.eq_ignore_ascii_case("Bot") {
                        UserType::Bot
                    } else {
                        UserType::Human
                    },
                },
                in_reply_to_id: None,
                commit_id: Some(c.commit_id.clone()),
                created_at: c.created_at,
                updated_at: c.updated_at,
                replies: replies_by_parent.get(&c.id).cloned().unwrap_or_default(),
            })
            .collect())
    }

    pub async fn get_pr_comments(&self, id: &PullRequestId) -> OrchResult<Vec<PrComment>> {
        let (owner, repo) = self.owner_repo(&id.project);
        let path = format!("/repos/{owner}/{repo}/issues/{}/comments?per_page=100", id.number);
        let raw: Vec<GhIssueComment> = self.get(&path).await?.json().await.map_err(Error::from)?;
        Ok(raw
            .into_iter()
            .map(|c| PrComment {
                id: c.id.to_string(),
                body: c.body,
                user: CommentUser {
                    login: c.user.login,
                    user_type: if c.user.user_type.eq_ignore_ascii_case("Bot") {
                        UserType::Bot
                    } else {
                        UserType::Human
                    },
                },
                created_at: c.created_at,
            })
            .collect())
    }

    pub async fn update_review_comment(
        &self,
        id: &PullRequestId,
        comment_id: &str,
        body: &str,
    ) -> OrchResult<()> {
        let (owner, repo) = self.owner_repo(&id.project);
        let url = format!(
            "{}/repos/{owner}/{repo}/pulls/comments/{comment_id}",
            self.base_api
        );
        let (h, v) = self.auth_headers();
        #[derive(serde::Serialize)]
        struct Req<'a> {
            body: &'a str,
        }
        let resp = self
            .http
            .patch(&url)
            .header(h, v)
            .header("Accept", "application/vnd.github+json")
            .json(&Req { body })
            .send()
            .await
            .map_err(Error::from)?;
        self.record_rate_limit(&resp);
        resp.error_for_status().map_err(Error::from)?;
        Ok(())
    }

    pub async fn delete_review_comment(&self, id: &PullRequestId, comment_id: &str) -> OrchResult<()> {
        let (owner, repo) = self.owner_repo(&id.project);
        let url = format!(
            "{}/repos/{owner}/{repo}/pulls/comments/{comment_id}",
            self.base_api
        );
        let (h, v) = self.auth_headers();
        let resp = self
            .http
            .delete(&url)
            .header(h, v)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(Error::from)?;
        self.record_rate_limit(&resp);
        resp.error_for_status().map_err(Error::from)?;
        Ok(())
    }

    pub async fn find_checkpoint_comment(
        &self,
        id: &PullRequestId,
    ) -> OrchResult<Option<(String, ReviewCheckpoint)>> {
        let comments = self.get_pr_comments(id).await?;
        Ok(find_newest_checkpoint(&comments))
    }

    pub async fn create_checkpoint_comment(
        &self,
        id: &PullRequestId,
        cp: &ReviewCheckpoint,
    ) -> OrchResult<String> {
        let body = format!("Review checkpoint\n\n{}", serialize_checkpoint(cp));
        self.add_comment(id, &body).await
    }

    pub async fn update_checkpoint_comment(
        &self,
        id: &PullRequestId,
        comment_id: &str,
        cp: &ReviewCheckpoint,
    ) -> OrchResult<()> {
        let (owner, repo) = self.owner_repo(&id.project);
        let url = format!("{}/repos/{owner}/{repo}/issues/comments/{comment_id}", self.base_api);
        let (h, v) = self.auth_headers();
        #[derive(serde::Serialize)]
        struct Req<'a> {
            body: &'a str,
        }
        let body = format!("Review checkpoint\n\n{}", serialize_checkpoint(cp));
        let resp = self
            .http
            .patch(&url)
            .header(h, v)
            .header("Accept", "application/vnd.github+json")
            .json(&Req { body: &body })
            .send()
            .await
            .map_err(Error::from)?;
        self.record_rate_limit(&resp);
        resp.error_for_status().map_err(Error::from)?;
        Ok(())
    }

    pub async fn compare_commits(
        &self,
        id: &PullRequestId,
        base_sha: &str,
        head_sha: &str,
    ) -> OrchResult<CommitComparison> {
        let (owner, repo) = self.owner_repo(&id.project);
        let path = format!("/repos/{owner}/{repo}/compare/{base_sha}...{head_sha}");
        let raw: GhCompare = match self.get(&path).await {
            Ok(resp) => resp.json().await.map_err(Error::from)?,
            Err(Error::Vcs(VcsError::NotFound)) => {
                return Err(Error::Incremental("checkpoint not in repository".into()));
            }
            Err(e) => return Err(e),
        };

        let status = match raw.status.as_str() {
            "identical" => CompareStatus::Identical,
            "ahead" => CompareStatus::Ahead,
            "behind" => CompareStatus::Behind,
            _ => CompareStatus::Diverged,
        };

        let mut files = Vec::with_capacity(raw.files.len());
        for f in raw.files {
            let is_binary = f.patch.is_none();
            let hunks = match &f.patch {
                Some(p) if !looks_like_binary_patch(p) => parse_unified_diff(p),
                _ => Vec::new(),
            };
            let fstatus = match f.status.as_str() {
                "added" => FileStatus::Added,
                "removed" => FileStatus::Deleted,
                "renamed" => FileStatus::Renamed,
                _ => FileStatus::Modified,
            };
            files.push(FileDiff {
                path: f.filename,
                old_path: f.previous_filename,
                status: fstatus,
                additions: f.additions,
                deletions: f.deletions,
                hunks,
                is_binary,
            });
        }

        Ok(CommitComparison {
            base_sha: base_sha.to_string(),
            head_sha: head_sha.to_string(),
            status,
            ahead_by: raw.ahead_by,
            behind_by: raw.behind_by,
            files,
        })
    }

    pub async fn get_head_sha(&self, id: &PullRequestId) -> OrchResult<String> {
        Ok(self.get_pr(id).await?.head_sha)
    }

    pub async fn get_incremental_diff(
        &self,
        id: &PullRequestId,
        base_sha: &str,
    ) -> OrchResult<IncrementalDiffResult> {
        let head_sha = self.get_head_sha(id).await?;
        if head_sha == base_sha {
            return Ok(IncrementalDiffResult::empty());
        }

        let comparison = match self.compare_commits(id, base_sha, &head_sha).await {
            Ok(c) => c,
            Err(Error::Incremental(reason)) => return Ok(IncrementalDiffResult::not_incremental(reason)),
            Err(e) => return Err(e),
        };

        match comparison.status {
            CompareStatus::Diverged => {
                Ok(IncrementalDiffResult::not_incremental("diverged (possible force push)"))
            }
            CompareStatus::Behind => {
                Ok(IncrementalDiffResult::not_incremental("checkpoint ahead of HEAD"))
            }
            CompareStatus::Identical => Ok(IncrementalDiffResult::empty()),
            CompareStatus::Ahead => Ok(IncrementalDiffResult {
                is_incremental: true,
                reason: None,
                diff: Diff { files: comparison.files },
            }),
        }
    }
}

fn verdict_to_event(v: Verdict) -> &'static str {
    match v {
        Verdict::Approve => "APPROVE",
        Verdict::RequestChanges => "REQUEST_CHANGES",
        Verdict::Comment => "COMMENT",
    }
}

fn verdict_label(v: Verdict) -> &'static str {
    match v {
        Verdict::Approve => "approve",
        Verdict::RequestChanges => "request_changes",
        Verdict::Comment => "comment",
    }
}

/// Extracts GitHub-style issue-closing references (`Fixes #123`,
/// `Closes #123`, `Resolves owner/repo#123`) from free text.
fn extract_issue_refs(text: &str) -> Vec<String> {
    lazy_static::lazy_static! {
        static ref ISSUE_REF: regex::Regex =
            regex::Regex::new(r"(?i)(?:close[sd]?|fix(?:e[sd])?|resolve[sd]?)\s+(?:[\w./-]+)?#(\d+)")
                .unwrap();
    }
    let mut out = Vec::new();
    for cap in ISSUE_REF.captures_iter(text) {
        if let Some(m) = cap.get(1) {
            let s = format!("#{}", m.as_str());
            if !out.contains(&s) {
                out.push(s);
            }
        }
    }
    out
}

// ===== GitHub response shapes (subset of fields actually used) =====

#[derive(Debug, Deserialize)]
struct GhPull {
    title: String,
    body: Option<String>,
    state: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    locked: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    user: GhUser,
    head: GhRef,
    base: GhRef,
}

#[derive(Debug, Deserialize)]
struct GhUser {
    id: u64,
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhRef {
    #[serde(rename = "ref")]
    ref_name: String,
    sha: String,
}

#[derive(Debug, Deserialize, Clone)]
struct GhFile {
    filename: String,
    #[serde(default)]
    previous_filename: Option<String>,
    status: String,
    additions: u32,
    deletions: u32,
    #[serde(default)]
    patch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhIssueComment {
    id: u64,
    #[serde(default)]
    body: String,
    user: GhCommentUser,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GhCommentUser {
    login: String,
    #[serde(rename = "type", default = "default_user_type")]
    user_type: String,
}

fn default_user_type() -> String {
    "User".to_string()
}

#[derive(Debug, Deserialize)]
struct GhReviewComment {
    id: u64,
    path: String,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    original_line: Option<u32>,
    #[serde(default)]
    body: String,
    user: GhCommentUser,
    #[serde(default)]
    in_reply_to_id: Option<u64>,
    commit_id: String,
    created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GhCompare {
    status: String,
    ahead_by: u32,
    behind_by: u32,
    files: Vec<GhFile>,
}

#[derive(serde::Serialize)]
struct GhReviewReq {
    body: String,
    event: &'static str,
}
