//! GitLab provider (REST v4) adapter.
//!
//! Endpoints used:
//! - GET  /projects/:id/merge_requests/:iid
//! - GET  /projects/:id/merge_requests/:iid/diffs
//! - GET  /projects/:id/merge_requests/:iid/commits
//! - GET  /projects/:id/repository/compare
//! - GET  /projects/:id/merge_requests/:iid/discussions
//! - POST /projects/:id/merge_requests/:iid/discussions   (inline)
//! - GET/POST/PUT/DELETE /projects/:id/merge_requests/:iid/notes  (general)
//! - POST /projects/:id/merge_requests/:iid/approve
//!
//! Grounded on `git_providers/gitlab.rs` (metadata/diff/commit fetch shape)
//! and `publish/gitlab.rs` (discussions/notes posting, position payload).

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::checkpoint::{find_newest_checkpoint, serialize_checkpoint};
use crate::diff::{line_in_diff, looks_like_binary_patch, parse_unified_diff};
use crate::errors::{Error, OrchResult, VcsError};
use crate::vcs::types::*;

#[derive(Debug, Clone)]
pub struct GitLabAdapter {
    http: Client,
    base_api: String,
    token: String,
    rate_remaining: Arc<AtomicI64>,
}

impl GitLabAdapter {
    pub fn new(http: Client, base_api: String, token: String) -> Self {
        Self {
            http,
            base_api: base_api.trim_end_matches('/').to_string(),
            token,
            rate_remaining: Arc::new(AtomicI64::new(-1)),
        }
    }

    fn project_segment(&self, project: &str) -> String {
        urlencoding::encode(project).into_owned()
    }

    fn record_rate_limit(&self, resp: &reqwest::Response) {
        if let Some(v) = resp.headers().get("ratelimit-remaining") {
            if let Ok(s) = v.to_str() {
                if let Ok(n) = s.parse::<i64>() {
                    self.rate_remaining.store(n, Ordering::Relaxed);
                }
            }
        }
    }

    async fn get(&self, path: &str) -> OrchResult<reqwest::Response> {
        let url = format!("{}{}", self.base_api, path);
        let resp = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(Error::from)?;
        self.record_rate_limit(&resp);
        let resp = resp.error_for_status().map_err(Error::from)?;
        Ok(resp)
    }

    pub async fn get_pr(&self, id: &PullRequestId) -> OrchResult<PullRequest> {
        let path = format!(
            "/projects/{}/merge_requests/{}",
            self.project_segment(&id.project),
            id.number
        );
        let raw: GlMergeRequest = self.get(&path).await?.json().await.map_err(Error::from)?;
        Ok(PullRequest {
            platform: PlatformKind::GitLab,
            id: id.clone(),
            title: raw.title,
            description: raw.description,
            author: AuthorInfo {
                id: raw.author.id.to_string(),
                login: raw.author.username,
                name: Some(raw.author.name),
            },
            source_branch: raw.source_branch,
            target_branch: raw.target_branch,
            head_sha: raw.diff_refs.head_sha,
            state: match raw.state.as_str() {
                "merged" => PrState::Merged,
                "closed" => PrState::Closed,
                _ => PrState::Open,
            },
            is_draft: raw.draft || raw.work_in_progress,
            is_locked: raw.discussion_locked.unwrap_or(false),
            created_at: raw.created_at,
            updated_at: raw.updated_at,
        })
    }

    pub async fn get_diff(&self, id: &PullRequestId) -> OrchResult<Diff> {
        let path = format!(
            "/projects/{}/merge_requests/{}/diffs",
            self.project_segment(&id.project),
            id.number
        );
        let files: Vec<GlDiffFile> = self.get(&path).await?.json().await.map_err(Error::from)?;
        let mut out = Vec::with_capacity(files.len());
        for f in files {
            let is_binary = f.diff.as_deref().map(looks_like_binary_patch).unwrap_or(true);
            let hunks = match &f.diff {
                Some(d) if !is_binary => parse_unified_diff(d),
                _ => Vec::new(),
            };
            let additions = hunks
                .iter()
                .flat_map(|h| h.content.iter())
                .filter(|l| l.starts_with('+') && !l.starts_with("+++"))
                .count() as u32;
            let deletions = hunks
                .iter()
                .flat_map(|h| h.content.iter())
                .filter(|l| l.starts_with('-') && !l.starts_with("---"))
                .count() as u32;
            let status = if f.new_file {
                FileStatus::Added
            } else if f.deleted_file {
                FileStatus::Deleted
            } else if f.renamed_file {
                FileStatus::Renamed
            } else {
                FileStatus::Modified
            };
            out.push(FileDiff {
                path: f.new_path,
                old_path: if f.renamed_file { Some(f.old_path) } else { None },
                status,
                additions,
                deletions,
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

    /// Scans the description for GitLab issue-closing patterns
    /// (`#123`, `Closes #123`, `group/project#123`).
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
        let kept: Vec<&ReviewComment> = review
            .comments
            .iter()
            .filter(|c| line_in_diff(diff, &c.path, c.line))
            .collect();
        debug!(
            "gitlab submit_review: {} of {} comments within diff",
            kept.len(),
            review.comments.len()
        );

        let mut summary = review.summary.clone();
        let mut verdict = review.verdict;

        if matches!(verdict, Verdict::Approve) {
            let path = format!(
                "/projects/{}/merge_requests/{}/approve",
                self.project_segment(&id.project),
                id.number
            );
            let url = format!("{}{}", self.base_api, path);
            let resp = self
                .http
                .post(&url)
                .header("PRIVATE-TOKEN", &self.token)
                .send()
                .await
                .map_err(Error::from)?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                if (status.as_u16() == 401 || status.as_u16() == 403)
                    && body.to_lowercase().contains("own merge request")
                {
                    summary = format!(
                        "{summary}\n\n_Note: original verdict was `approve`, downgraded to `comment` \
                         because the reviewer authored this merge request._"
                    );
                    verdict = Verdict::Comment;
                } else {
                    return Err(Error::Vcs(VcsError::PlatformRejected(body)));
                }
            }
        }

        self.add_comment(id, &summary).await?;
        Ok(verdict)
    }

    pub async fn get_file_content(
        &self,
        id: &PullRequestId,
        path: &str,
        git_ref: &str,
    ) -> OrchResult<Option<String>> {
        let url = format!(
            "{}/projects/{}/repository/files/{}/raw?ref={}",
            self.base_api,
            self.project_segment(&id.project),
            urlencoding::encode(path),
            urlencoding::encode(git_ref)
        );
        let resp = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
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
        let path = format!(
            "/projects/{}/merge_requests/{}/notes",
            self.project_segment(&id.project),
            id.number
        );
        let url = format!("{}{}", self.base_api, path);
        #[derive(serde::Serialize)]
        struct Req<'a> {
            body: &'a str,
        }
        let resp = self
            .http
            .post(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .json(&Req { body })
            .send()
            .await
            .map_err(Error::from)?;
        self.record_rate_limit(&resp);
        let resp = resp.error_for_status().map_err(Error::from)?;
        let note: GlNote = resp.json().await.map_err(Error::from)?;
        Ok(note.id.to_string())
    }

    pub async fn add_inline_comment(
        &self,
        id: &PullRequestId,
        path: &str,
        line: u32,
        commit_sha: &str,
        body: &str,
    ) -> OrchResult<String> {
        let refs_path = format!(
            "/projects/{}/merge_requests/{}",
            self.project_segment(&id.project),
            id.number
        );
        let raw: GlMergeRequest = self.get(&refs_path).await?.json().await.map_err(Error::from)?;

        let disc_path = format!(
            "/projects/{}/merge_requests/{}/discussions",
            self.project_segment(&id.project),
            id.number
        );
        let url = format!("{}{}", self.base_api, disc_path);

        #[derive(serde::Serialize)]
        struct Position<'a> {
            position_type: &'a str,
            new_path: &'a str,
            new_line: u32,
            head_sha: &'a str,
            base_sha: &'a str,
            start_sha: &'a str,
        }
        #[derive(serde::Serialize)]
        struct Req<'a> {
            body: &'a str,
            position: Position<'a>,
        }

        let req = Req {
            body,
            position: Position {
                position_type: "text",
                new_path: path,
                new_line: line,
                head_sha: commit_sha,
                base_sha: &raw.diff_refs.base_sha,
                start_sha: raw.diff_refs.start_sha.as_deref().unwrap_or(commit_sha),
            },
        };

        let resp = self
            .http
            .post(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .json(&req)
            .send()
            .await
            .map_err(Error::from)?;
        self.record_rate_limit(&resp);
        let resp = resp.error_for_status().map_err(Error::from)?;
        let disc: GlDiscussion = resp.json().await.map_err(Error::from)?;
        Ok(disc.id)
    }

    pub fn rate_limit_remaining(&self) -> Option<u32> {
        let v = self.rate_remaining.load(Ordering::Relaxed);
        if v < 0 { None } else { Some(v as u32) }
    }

    pub async fn get_review_comments(
        &self,
        id: &PullRequestId,
    ) -> OrchResult<Vec<DetailedReviewComment>> {
        let path = format!(
            "/projects/{}/merge_requests/{}/discussions",
            self.project_segment(&id.project),
            id.number
        );
        let discussions: Vec<GlDiscussionFull> =
            self.get(&path).await?.json().await.map_err(Error::from)?;
        let mut out = Vec::new();
        for d in discussions {
            let mut notes = d.notes.into_iter();
            let Some(head) = notes.next() else { continue };
            let Some(pos) = head.position else { continue };
            let replies: Vec<CommentReply> = notes
                .map(|n| CommentReply {
                    body: n.body,
                    user: CommentUser {
                        login: n.author.username,
                        user_type: if n.author.bot.unwrap_or(false) {
                            UserType::Bot
                        } else {
                            UserType::Human
                        },
                    },
                })
                .collect();
            out.push(DetailedReviewComment {
                id: head.id.to_string(),
                path: pos.new_path,
                line: pos.new_line,
                original_line: pos.old_line,
                body: head.body,
                user: CommentUser {
                    login: head.author.username,
                    user_type: if head.author.bot.unwrap_or(false) {
                        UserType::Bot
                    } else {
                        UserType::Human
                    },
                },
                in_reply_to_id: None,
                commit_id: Some(pos.head_sha),
                created_at: head.created_at,
                updated_at: head.updated_at,
                replies,
            });
        }
        Ok(out)
    }

    pub async fn get_pr_comments(&self, id: &PullRequestId) -> OrchResult<Vec<PrComment>> {
        let path = format!(
            "/projects/{}/merge_requests/{}/notes",
            self.project_segment(&id.project),
            id.number
        );
        let notes: Vec<GlNote> = self.get(&path).await?.json().await.map_err(Error::from)?;
        Ok(notes
            .into_iter()
            .map(|n| PrComment {
                id: n.id.to_string(),
                body: n.body,
                user: CommentUser {
                    login: n.author.username,
                    user_type: if n.author.bot.unwrap_or(false) {
                        UserType::Bot
                    } else {
                        UserType::Human
                    },
                },
                created_at: n.created_at,
            })
            .collect())
    }

    pub async fn update_review_comment(
        &self,
        id: &PullRequestId,
        comment_id: &str,
        body: &str,
    ) -> OrchResult<()> {
        let path = format!(
            "/projects/{}/merge_requests/{}/notes/{}",
            self.project_segment(&id.project),
            id.number,
            comment_id
        );
        let url = format!("{}{}", self.base_api, path);
        #[derive(serde::Serialize)]
        struct Req<'a> {
            body: &'a str,
        }
        let resp = self
            .http
            .put(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .json(&Req { body })
            .send()
            .await
            .map_err(Error::from)?;
        self.record_rate_limit(&resp);
        resp.error_for_status().map_err(Error::from)?;
        Ok(())
    }

    pub async fn delete_review_comment(&self, id: &PullRequestId, comment_id: &str) -> OrchResult<()> {
        let path = format!(
            "/projects/{}/merge_requests/{}/notes/{}",
            self.project_segment(&id.project),
            id.number,
            comment_id
        );
        let url = format!("{}{}", self.base_api, path);
        let resp = self
            .http
            .delete(&url)
            .header("PRIVATE-TOKEN", &self.token)
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
        let body = format!("Review checkpoint\n\n{}", serialize_checkpoint(cp));
        self.update_review_comment(id, comment_id, &body).await
    }

    pub async fn compare_commits(
        &self,
        id: &PullRequestId,
        base_sha: &str,
        head_sha: &str,
    ) -> OrchResult<CommitComparison> {
        let path = format!(
            "/projects/{}/repository/compare?from={}&to={}",
            self.project_segment(&id.project),
            urlencoding::encode(base_sha),
            urlencoding::encode(head_sha)
        );
        let fwd: GlCompare = match self.get(&path).await {
            Ok(resp) => resp.json().await.map_err(Error::from)?,
            Err(Error::Vcs(VcsError::NotFound)) => {
                return Err(Error::Incremental("checkpoint not in repository".into()));
            }
            Err(e) => return Err(e),
        };
        let ahead_by = fwd.commits.len() as u32;

        let back_path = format!(
            "/projects/{}/repository/compare?from={}&to={}",
            self.project_segment(&id.project),
            urlencoding::encode(head_sha),
            urlencoding::encode(base_sha)
        );
        let back: GlCompare = self.get(&back_path).await?.json().await.map_err(Error::from)?;
        let behind_by = back.commits.len() as u32;

        let status = match (ahead_by, behind_by) {
            (0, 0) => CompareStatus::Identical,
            (a, 0) if a > 0 => CompareStatus::Ahead,
            (0, b) if b > 0 => CompareStatus::Behind,
            _ => CompareStatus::Diverged,
        };

        let mut files = Vec::with_capacity(fwd.diffs.len());
        for d in fwd.diffs {
            let is_binary = d.diff.as_deref().map(looks_like_binary_patch).unwrap_or(true);
            let hunks = match &d.diff {
                Some(raw) if !is_binary => parse_unified_diff(raw),
                _ => Vec::new(),
            };
            let status = if d.new_file {
                FileStatus::Added
            } else if d.deleted_file {
                FileStatus::Deleted
            } else if d.renamed_file {
                FileStatus::Renamed
            } else {
                FileStatus::Modified
            };
            files.push(FileDiff {
                path: d.new_path,
                old_path: if d.renamed_file { Some(d.old_path) } else { None },
                status,
                additions: 0,
                deletions: 0,
                hunks,
                is_binary,
            });
        }

        Ok(CommitComparison {
            base_sha: base_sha.to_string(),
            head_sha: head_sha.to_string(),
            status,
            ahead_by,
            behind_by,
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

/// Extracts GitLab-style issue references (`#123`, `Closes #123`,
/// `group/project#123`) from free text.
fn extract_issue_refs(text: &str) -> Vec<String> {
    lazy_static::lazy_static! {
        static ref ISSUE_REF: regex::Regex =
            regex::Regex::new(r"(?i)(?:[\w./-]+)?#(\d+)").unwrap();
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

// ===== GitLab response shapes (subset of fields actually used) =====

#[derive(Debug, Deserialize)]
struct GlMergeRequest {
    title: String,
    description: Option<String>,
    state: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    work_in_progress: bool,
    #[serde(default)]
    discussion_locked: Option<bool>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    source_branch: String,
    target_branch: String,
    diff_refs: GlDiffRefs,
    author: GlUser,
}

#[derive(Debug, Deserialize)]
struct GlDiffRefs {
    base_sha: String,
    head_sha: String,
    #[serde(default)]
    start_sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlUser {
    id: u64,
    username: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct GlDiffFile {
    old_path: String,
    new_path: String,
    new_file: bool,
    renamed_file: bool,
    deleted_file: bool,
    #[serde(default)]
    diff: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlNote {
    id: u64,
    body: String,
    author: GlNoteAuthor,
    created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GlNoteAuthor {
    username: String,
    #[serde(default)]
    bot: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct GlDiscussion {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GlDiscussionFull {
    notes: Vec<GlDiscussionNote>,
}

#[derive(Debug, Deserialize)]
struct GlDiscussionNote {
    id: u64,
    body: String,
    author: GlNoteAuthor,
    created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
    #[serde(default)]
    position: Option<GlPosition>,
}

#[derive(Debug, Deserialize)]
struct GlPosition {
    new_path: String,
    #[serde(default)]
    new_line: Option<u32>,
    #[serde(default)]
    old_line: Option<u32>,
    head_sha: String,
}

#[derive(Debug, Deserialize)]
struct GlCompare {
    commits: Vec<serde_json::Value>,
    diffs: Vec<GlDiffFile>,
}
