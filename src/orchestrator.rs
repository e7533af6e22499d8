//! Orchestrator: the two public entrypoints wiring every other module
//! together into a staged pipeline (`tracing::debug!` per stage, single
//! `OrchResult` return).

use tracing::{debug, warn};

use crate::checkpoint::find_newest_checkpoint;
use crate::comment_manager::{post_review, PostOutcome};
use crate::config::OrchestratorConfig;
use crate::dedup::{run_dedup, DedupInput};
use crate::errors::OrchResult;
use crate::incremental::{incremental_diff, IncrementalOutcome};
use crate::model::ModelClient;
use crate::precision_filter::apply_precision_filter;
use crate::prompt::{build_prompt, GraphReviewContext, PromptLimits};
use crate::response_parser::parse_model_output;
use crate::runtime::OrchestratorRuntime;
use crate::vcs::types::{PullRequestId, ReviewComment, Verdict};
use crate::vcs::{CheckpointSupport, DedupSupport, IncrementalSupport, VcsCore};

/// Optional, out-of-scope-adapter context an orchestrator caller may supply:
/// review skills text, graph-indexer context, and few-shot examples.
#[derive(Debug, Clone, Default)]
pub struct ReviewExtras {
    pub review_skills: Option<String>,
    pub graph_context: Option<GraphReviewContext>,
    pub prior_examples: Vec<String>,
}

/// Flags for [`incremental_review`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IncrementalOptions {
    pub force_full: bool,
    pub skip_checkpoint: bool,
}

/// Result of a full or incremental review pass.
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub summary: String,
    pub comments: Vec<ReviewComment>,
    pub verdict: Verdict,
    pub posted: usize,
    pub failed: usize,
}

impl ReviewOutcome {
    fn from_post(summary: String, comments: Vec<ReviewComment>, outcome: PostOutcome) -> Self {
        Self {
            summary,
            comments,
            verdict: outcome.verdict.unwrap_or(Verdict::Comment),
            posted: outcome.posted,
            failed: outcome.failed,
        }
    }
}

/// Full review: fetch, build prompt, call model, parse, filter, post.
pub async fn review<C>(
    client: &C,
    id: &PullRequestId,
    model: &ModelClient,
    runtime: &OrchestratorRuntime,
    config: &OrchestratorConfig,
    extras: &ReviewExtras,
) -> OrchResult<ReviewOutcome>
where
    C: VcsCore + DedupSupport + CheckpointSupport,
{
    debug!("review: fetching PR metadata and diff");
    let pr = client.get_pr(id).await?;
    let diff = client.get_diff(id).await?;
    let files = client.get_files(id).await?;
    let linked_tickets = client.get_linked_tickets(id).await.unwrap_or_else(|e| {
        warn!("failed to fetch linked tickets (best-effort, continuing): {e}");
        Vec::new()
    });

    debug!(files = files.len(), "review: building prompt and calling model");
    let prompt = build_prompt(
        &pr,
        &diff,
        PromptLimits { max_diff_chars: config.max_diff_chars },
        extras.review_skills.as_deref(),
        extras.graph_context.as_ref(),
        &extras.prior_examples,
        &linked_tickets,
    );
    let raw = model.generate(&prompt).await?;

    debug!("review: parsing model output");
    let parsed = parse_model_output(&raw);
    for w in &parsed.warnings {
        warn!("model output warning: {w}");
    }

    let filtered = apply_precision_filter(parsed.comments, config.precision_threshold);

    debug!(kept = filtered.len(), "review: resolving comment paths against diff");
    let mut resolved = Vec::with_capacity(filtered.len());
    for mut c in filtered {
        match resolve_diff_path(&diff, &c.path) {
            Some(canonical) => {
                c.path = canonical;
                resolved.push(c);
            }
            None => warn!("dropping comment for unresolvable path: {}", c.path),
        }
    }

    run_post_pipeline(
        client,
        id,
        &pr,
        &diff,
        runtime,
        config,
        resolved,
        parsed.summary,
        parsed.verdict,
        files,
    )
    .await
}

/// Incremental review: locate a checkpoint, diff from it, and review only
/// what's new, falling back to [`review`]
/// whenever a checkpoint or a usable diff is absent. The "adapter lacks
/// incremental support" leg of that rule is enforced at the type level: a
/// `C` without `IncrementalSupport` cannot call this function at all, so the
/// caller decides by choosing which entrypoint to call (`VcsClient`'s
/// capability probe is the thing to consult before doing so).
pub async fn incremental_review<C>(
    client: &C,
    id: &PullRequestId,
    model: &ModelClient,
    runtime: &OrchestratorRuntime,
    config: &OrchestratorConfig,
    extras: &ReviewExtras,
    opts: IncrementalOptions,
) -> OrchResult<ReviewOutcome>
where
    C: VcsCore + DedupSupport + CheckpointSupport + IncrementalSupport,
{
    if opts.force_full {
        debug!("incremental_review: force_full set, falling back to full review");
        return review(client, id, model, runtime, config, extras).await;
    }

    let pr_comments = client.get_pr_comments(id).await?;
    let checkpoint = match find_newest_checkpoint(&pr_comments) {
        Some(cp) => cp,
        None => {
            debug!("incremental_review: no checkpoint found, falling back to full review");
            return review(client, id, model, runtime, config, extras).await;
        }
    };
    let (_checkpoint_comment_id, checkpoint) = checkpoint;

    let outcome = incremental_diff(client, id, &checkpoint.sha, config).await?;
    let diff_result = match outcome {
        IncrementalOutcome::UseIncremental(r) => r,
        IncrementalOutcome::FallBackToFull(reason) => {
            debug!("incremental_review: falling back to full review ({reason})");
            return review(client, id, model, runtime, config, extras).await;
        }
    };

    if diff_result.diff.files.is_empty() {
        debug!("incremental_review: no new changes since last checkpoint");
        return Ok(ReviewOutcome {
            summary: "No new changes since last review checkpoint.".to_string(),
            comments: Vec::new(),
            verdict: Verdict::Comment,
            posted: 0,
            failed: 0,
        });
    }

    let pr = client.get_pr(id).await?;
    let files: Vec<String> = diff_result.diff.files.iter().map(|f| f.path.clone()).collect();

    debug!(files = files.len(), "incremental_review: building reduced prompt and calling model");
    let prompt = build_prompt(
        &pr,
        &diff_result.diff,
        PromptLimits { max_diff_chars: config.max_diff_chars },
        extras.review_skills.as_deref(),
        extras.graph_context.as_ref(),
        &extras.prior_examples,
        &[],
    );
    let raw = model.generate(&prompt).await?;

    let parsed = parse_model_output(&raw);
    for w in &parsed.warnings {
        warn!("model output warning: {w}");
    }
    let filtered = apply_precision_filter(parsed.comments, config.precision_threshold);

    let mut resolved = Vec::with_capacity(filtered.len());
    for mut c in filtered {
        match resolve_diff_path(&diff_result.diff, &c.path) {
            Some(canonical) => {
                c.path = canonical;
                resolved.push(c);
            }
            None => warn!("dropping comment for unresolvable path: {}", c.path),
        }
    }

    let summary = format!("[Incremental Review: {} new files]\n{}", files.len(), parsed.summary);

    if opts.skip_checkpoint {
        let dedup_out = run_dedup(DedupInput {
            pr: &pr,
            rate_limit_remaining: client.rate_limit_remaining(),
            requests_in_window: runtime.requests_in_window(config.rate_limit_window.window),
            comments: resolved,
            existing: &client.get_review_comments(id).await?,
            diff: &diff_result.diff,
            config,
        });
        let comments = to_review_comments(dedup_out.kept);
        let outcome = post_review(
            client,
            id,
            &diff_result.diff,
            &pr.head_sha,
            comments.clone(),
            summary.clone(),
            parsed.verdict,
            files,
            runtime.idempotency(),
            config,
            true,
        )
        .await?;
        return Ok(ReviewOutcome::from_post(summary, comments, outcome));
    }

    run_post_pipeline(
        client,
        id,
        &pr,
        &diff_result.diff,
        runtime,
        config,
        resolved,
        summary,
        parsed.verdict,
        files,
    )
    .await
}

/// Shared tail of both entrypoints: dedup then hand off to the comment
/// manager, which also maintains the checkpoint comment.
async fn run_post_pipeline<C>(
    client: &C,
    id: &PullRequestId,
    pr: &crate::vcs::types::PullRequest,
    diff: &crate::vcs::types::Diff,
    runtime: &OrchestratorRuntime,
    config: &OrchestratorConfig,
    resolved: Vec<crate::response_parser::ParsedComment>,
    summary: String,
    verdict: Verdict,
    files: Vec<String>,
) -> OrchResult<ReviewOutcome>
where
    C: VcsCore + DedupSupport + CheckpointSupport,
{
    let existing = client.get_review_comments(id).await?;
    let dedup_out = run_dedup(DedupInput {
        pr,
        rate_limit_remaining: client.rate_limit_remaining(),
        requests_in_window: runtime.requests_in_window(config.rate_limit_window.window),
        comments: resolved,
        existing: &existing,
        diff,
        config,
    });
    for w in &dedup_out.warnings {
        warn!("dedup warning: {w}");
    }

    let comments = to_review_comments(dedup_out.kept);
    let outcome = post_review(
        client,
        id,
        diff,
        &pr.head_sha,
        comments.clone(),
        summary.clone(),
        verdict,
        files,
        runtime.idempotency(),
        config,
        false,
    )
    .await?;

    Ok(ReviewOutcome::from_post(summary, comments, outcome))
}

fn to_review_comments(parsed: Vec<crate::response_parser::ParsedComment>) -> Vec<ReviewComment> {
    parsed
        .into_iter()
        .map(|c| ReviewComment {
            path: c.path,
            line: c.line,
            body: c.body,
            severity: c.severity,
            suggestion: None,
            confidence: c.confidence,
        })
        .collect()
}

/// Resolves a model-reported path to the canonical diff path:
/// strip a leading `/`, match case-sensitively against `diff.files`.
fn resolve_diff_path(diff: &crate::vcs::types::Diff, path: &str) -> Option<String> {
    let stripped = path.strip_prefix('/').unwrap_or(path);
    diff.files
        .iter()
        .find(|f| f.path == stripped)
        .map(|f| f.path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;

    use crate::checkpoint::{serialize_checkpoint, CHECKPOINT_PREFIX};
    use crate::vcs::types::{
        AuthorInfo, CommentUser, CompareStatus, CommitComparison, Diff, DetailedReviewComment,
        FileDiff, FileStatus, Hunk, IncrementalDiffResult, PlatformKind, PrComment, PrState,
        PullRequest, ReviewCheckpoint, SubmitReview, UserType,
    };

    /// Minimal in-memory `VcsCore`/`DedupSupport`/`CheckpointSupport`/
    /// `IncrementalSupport` double for end-to-end orchestrator tests, per
    /// invariants.
    struct FakeVcs {
        pr: PullRequest,
        diff: Diff,
        pr_comments: Mutex<Vec<PrComment>>,
        review_comments: Mutex<Vec<DetailedReviewComment>>,
        posted_inline: Mutex<Vec<(String, u32, String)>>,
        head_sha: Mutex<String>,
        compare_status: Mutex<CompareStatus>,
        ahead_by: Mutex<u32>,
    }

    impl FakeVcs {
        fn new(head_sha: &str) -> Self {
            Self {
                pr: PullRequest {
                    platform: PlatformKind::GitLab,
                    id: PullRequestId { project: "g/p".to_string(), number: 1 },
                    title: "Add feature".to_string(),
                    description: None,
                    source_branch: "feature".to_string(),
                    target_branch: "main".to_string(),
                    author: AuthorInfo { id: "1".to_string(), login: "dev".to_string(), name: None },
                    head_sha: head_sha.to_string(),
                    state: PrState::Open,
                    is_draft: false,
                    is_locked: false,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
                diff: Diff {
                    files: vec![FileDiff {
                        path: "src/lib.rs".to_string(),
                        old_path: None,
                        status: FileStatus::Modified,
                        additions: 1,
                        deletions: 0,
                        hunks: vec![Hunk {
                            old_start: 1,
                            old_lines: 1,
                            new_start: 1,
                            new_lines: 1,
                            content: vec!["+fn added() {}".to_string()],
                        }],
                        is_binary: false,
                    }],
                },
                pr_comments: Mutex::new(Vec::new()),
                review_comments: Mutex::new(Vec::new()),
                posted_inline: Mutex::new(Vec::new()),
                head_sha: Mutex::new(head_sha.to_string()),
                compare_status: Mutex::new(CompareStatus::Ahead),
                ahead_by: Mutex::new(1),
            }
        }
    }

    impl VcsCore for FakeVcs {
        async fn get_pr(&self, _id: &PullRequestId) -> OrchResult<PullRequest> {
            Ok(self.pr.clone())
        }
        async fn get_diff(&self, _id: &PullRequestId) -> OrchResult<Diff> {
            Ok(self.diff.clone())
        }
        async fn get_files(&self, _id: &PullRequestId) -> OrchResult<Vec<String>> {
            Ok(self.diff.files.iter().map(|f| f.path.clone()).collect())
        }
        async fn get_author(&self, _id: &PullRequestId) -> OrchResult<AuthorInfo> {
            Ok(self.pr.author.clone())
        }
        async fn get_linked_tickets(&self, _id: &PullRequestId) -> OrchResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn submit_review(
            &self,
            _id: &PullRequestId,
            _diff: &Diff,
            review: SubmitReview,
        ) -> OrchResult<Verdict> {
            Ok(review.verdict)
        }
        async fn get_file_content(
            &self,
            _id: &PullRequestId,
            _path: &str,
            _git_ref: &str,
        ) -> OrchResult<Option<String>> {
            Ok(None)
        }
        async fn add_comment(&self, _id: &PullRequestId, body: &str) -> OrchResult<String> {
            let mut comments = self.pr_comments.lock().unwrap();
            let id = format!("c{}", comments.len());
            comments.push(PrComment {
                id,
                body: body.to_string(),
                user: CommentUser { login: "agnusai".to_string(), user_type: UserType::Bot },
                created_at: Utc::now(),
            });
            Ok("new-comment".to_string())
        }
        async fn add_inline_comment(
            &self,
            _id: &PullRequestId,
            path: &str,
            line: u32,
            _commit_sha: &str,
            body: &str,
        ) -> OrchResult<String> {
            self.posted_inline
                .lock()
                .unwrap()
                .push((path.to_string(), line, body.to_string()));
            Ok(format!("inline-{line}"))
        }
        fn rate_limit_remaining(&self) -> Option<u32> {
            Some(1000)
        }
    }

    impl DedupSupport for FakeVcs {
        async fn get_review_comments(
            &self,
            _id: &PullRequestId,
        ) -> OrchResult<Vec<DetailedReviewComment>> {
            Ok(self.review_comments.lock().unwrap().clone())
        }
        async fn get_pr_comments(&self, _id: &PullRequestId) -> OrchResult<Vec<PrComment>> {
            Ok(self.pr_comments.lock().unwrap().clone())
        }
        async fn update_review_comment(
            &self,
            _id: &PullRequestId,
            _comment_id: &str,
            _body: &str,
        ) -> OrchResult<()> {
            Ok(())
        }
        async fn delete_review_comment(&self, _id: &PullRequestId, _comment_id: &str) -> OrchResult<()> {
            Ok(())
        }
    }

    impl CheckpointSupport for FakeVcs {
        async fn find_checkpoint_comment(
            &self,
            _id: &PullRequestId,
        ) -> OrchResult<Option<(String, ReviewCheckpoint)>> {
            let comments = self.pr_comments.lock().unwrap();
            Ok(comments
                .iter()
                .find(|c| c.body.contains(CHECKPOINT_PREFIX))
                .and_then(|c| crate::checkpoint::parse_checkpoint(&c.body).map(|cp| (c.id.clone(), cp))))
        }
        async fn create_checkpoint_comment(
            &self,
            _id: &PullRequestId,
            cp: &ReviewCheckpoint,
        ) -> OrchResult<String> {
            let mut comments = self.pr_comments.lock().unwrap();
            let id = format!("checkpoint-{}", comments.len());
            comments.push(PrComment {
                id: id.clone(),
                body: serialize_checkpoint(cp),
                user: CommentUser { login: "agnusai".to_string(), user_type: UserType::Bot },
                created_at: Utc::now(),
            });
            Ok(id)
        }
        async fn update_checkpoint_comment(
            &self,
            _id: &PullRequestId,
            comment_id: &str,
            cp: &ReviewCheckpoint,
        ) -> OrchResult<()> {
            let mut comments = self.pr_comments.lock().unwrap();
            if let Some(c) = comments.iter_mut().find(|c| c.id == comment_id) {
                c.body = serialize_checkpoint(cp);
            }
            Ok(())
        }
    }

    impl IncrementalSupport for FakeVcs {
        async fn compare_commits(
            &self,
            _id: &PullRequestId,
            base_sha: &str,
            head_sha: &str,
        ) -> OrchResult<CommitComparison> {
            if base_sha == head_sha {
                return Ok(CommitComparison {
                    base_sha: base_sha.to_string(),
                    head_sha: head_sha.to_string(),
                    status: CompareStatus::Identical,
                    ahead_by: 0,
                    behind_by: 0,
                    files: Vec::new(),
                });
            }
            let status = *self.compare_status.lock().unwrap();
            let ahead_by = *self.ahead_by.lock().unwrap();
            Ok(CommitComparison {
                base_sha: base_sha.to_string(),
                head_sha: head_sha.to_string(),
                status,
                ahead_by,
                behind_by: 0,
                files: match status {
                    CompareStatus::Ahead => self.diff.files.clone(),
                    _ => Vec::new(),
                },
            })
        }
        async fn get_head_sha(&self, _id: &PullRequestId) -> OrchResult<String> {
            Ok(self.head_sha.lock().unwrap().clone())
        }
        async fn get_incremental_diff(
            &self,
            id: &PullRequestId,
            base_sha: &str,
        ) -> OrchResult<IncrementalDiffResult> {
            let head = self.get_head_sha(id).await?;
            if head == base_sha {
                return Ok(IncrementalDiffResult::empty());
            }
            let cmp = self.compare_commits(id, base_sha, &head).await?;
            match cmp.status {
                CompareStatus::Ahead => Ok(IncrementalDiffResult {
                    is_incremental: true,
                    reason: None,
                    diff: Diff { files: cmp.files },
                }),
                CompareStatus::Identical => Ok(IncrementalDiffResult::empty()),
                CompareStatus::Diverged => {
                    Ok(IncrementalDiffResult::not_incremental("diverged (possible force push)"))
                }
                CompareStatus::Behind => {
                    Ok(IncrementalDiffResult::not_incremental("checkpoint ahead of HEAD"))
                }
            }
        }
    }

    fn model_that_says(text: &str) -> ModelClient {
        // Reuses the Ollama backend pointed at a nonexistent endpoint; tests
        // exercise `review`'s pre/post-model wiring, not the HTTP call, so
        // they call `parse_model_output` and the post-model pipeline directly
        // instead of constructing a real `ModelClient`.
        let _ = text;
        ModelClient::from_config(crate::model::ModelConfig::default())
            .expect("default ollama config builds")
    }

    #[tokio::test]
    async fn full_review_resolves_paths_posts_and_writes_checkpoint() {
        let client = FakeVcs::new("headsha1");
        let runtime = OrchestratorRuntime::new();
        let config = OrchestratorConfig::default();

        let pr = client.get_pr(&client.pr.id).await.unwrap();
        let diff = client.get_diff(&client.pr.id).await.unwrap();
        let parsed = crate::response_parser::parse_model_output(
            "SUMMARY:\nLooks fine.\n\n[File: /src/lib.rs, Line: 1]\nConsider a doc comment.\n[Confidence: 0.9]\n\nVERDICT: comment\n",
        );
        let filtered = apply_precision_filter(parsed.comments, config.precision_threshold);
        let mut resolved = Vec::new();
        for mut c in filtered {
            if let Some(p) = resolve_diff_path(&diff, &c.path) {
                c.path = p;
                resolved.push(c);
            }
        }
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].path, "src/lib.rs");

        let outcome = run_post_pipeline(
            &client,
            &client.pr.id.clone(),
            &pr,
            &diff,
            &runtime,
            &config,
            resolved,
            parsed.summary,
            parsed.verdict,
            vec!["src/lib.rs".to_string()],
        )
        .await
        .unwrap();

        assert_eq!(outcome.posted, 1);
        assert_eq!(client.posted_inline.lock().unwrap().len(), 1);
        // Checkpoint maintenance created exactly one checkpoint comment.
        let checkpoints = client
            .pr_comments
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.body.contains(CHECKPOINT_PREFIX))
            .count();
        assert_eq!(checkpoints, 1);
    }

    #[tokio::test]
    async fn incremental_review_short_circuits_on_empty_diff() {
        let client = FakeVcs::new("headsha1");
        // Seed a checkpoint already at HEAD: no new commits.
        let cp = ReviewCheckpoint {
            sha: "headsha1".to_string(),
            timestamp: Utc::now().timestamp(),
            files_reviewed: vec!["src/lib.rs".to_string()],
            comment_count: 0,
            verdict: Verdict::Comment,
        };
        client
            .create_checkpoint_comment(&client.pr.id.clone(), &cp)
            .await
            .unwrap();

        let runtime = OrchestratorRuntime::new();
        let config = OrchestratorConfig::default();
        let model = model_that_says("unused");

        let outcome = incremental_review(
            &client,
            &client.pr.id.clone(),
            &model,
            &runtime,
            &config,
            &ReviewExtras::default(),
            IncrementalOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.summary, "No new changes since last review checkpoint.");
        assert!(outcome.comments.is_empty());
        assert_eq!(outcome.posted, 0);
        assert!(client.posted_inline.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn incremental_diff_falls_back_on_force_push_divergence() {
        let client = FakeVcs::new("headsha2");
        *client.compare_status.lock().unwrap() = CompareStatus::Diverged;
        let config = OrchestratorConfig::default();

        let outcome = incremental_diff(&client, &client.pr.id.clone(), "headsha1", &config)
            .await
            .unwrap();

        match outcome {
            IncrementalOutcome::FallBackToFull(reason) => {
                assert!(reason.contains("diverged"));
            }
            IncrementalOutcome::UseIncremental(_) => panic!("expected fallback on divergence"),
        }
    }

    #[tokio::test]
    async fn incremental_diff_falls_back_when_checkpoint_older_than_threshold() {
        let client = FakeVcs::new("headsha2");
        *client.ahead_by.lock().unwrap() = 999;
        let mut config = OrchestratorConfig::default();
        config.stale_checkpoint_threshold = 20;

        let outcome = incremental_diff(&client, &client.pr.id.clone(), "headsha1", &config)
            .await
            .unwrap();

        match outcome {
            IncrementalOutcome::FallBackToFull(reason) => {
                assert!(reason.contains("stale"));
            }
            IncrementalOutcome::UseIncremental(_) => panic!("expected fallback on stale checkpoint"),
        }
    }

    #[test]
    fn resolve_diff_path_strips_leading_slash_and_matches_case_sensitively() {
        let diff = Diff {
            files: vec![FileDiff {
                path: "src/Lib.rs".to_string(),
                old_path: None,
                status: FileStatus::Modified,
                additions: 0,
                deletions: 0,
                hunks: Vec::new(),
                is_binary: false,
            }],
        };
        assert_eq!(resolve_diff_path(&diff, "/src/Lib.rs"), Some("src/Lib.rs".to_string()));
        assert_eq!(resolve_diff_path(&diff, "src/lib.rs"), None);
    }
}
