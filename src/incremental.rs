//! Incremental diff engine, orchestrator-facing wrapper.
//!
//! The core classification algorithm (`headSha == baseSha` short-circuit,
//! `compareCommits` status → `diverged`/`behind`/`identical`/`ahead`) lives
//! inside each adapter's `get_incremental_diff` (`vcs/gitlab.rs`,
//! `vcs/github.rs`), since it is provider-specific about how a missing base
//! SHA is detected. This module adds the one piece that is provider-agnostic
//! and orchestrator-level: the `staleCheckpointThreshold` gate that
//! makes an incremental engine ignore a checkpoint that is too far behind
//! HEAD, falling back to a full review instead of diffing a huge range.

use tracing::debug;

use crate::config::OrchestratorConfig;
use crate::errors::OrchResult;
use crate::vcs::types::{CompareStatus, IncrementalDiffResult, PullRequestId};
use crate::vcs::IncrementalSupport;

/// Outcome of the staleness-gated incremental lookup.
pub enum IncrementalOutcome {
    /// Use this diff for an incremental review.
    UseIncremental(IncrementalDiffResult),
    /// Ignore the checkpoint and fall back to a full review, with the reason.
    FallBackToFull(String),
}

/// Computes the incremental diff against `checkpoint_sha`, first checking
/// that it is not older than `config.stale_checkpoint_threshold` commits
/// behind HEAD. Returns [`IncrementalOutcome::FallBackToFull`] both when
/// the checkpoint is stale and when the adapter itself reports a
/// non-incremental result (diverged/behind/missing base).
pub async fn incremental_diff<C>(
    client: &C,
    id: &PullRequestId,
    checkpoint_sha: &str,
    config: &OrchestratorConfig,
) -> OrchResult<IncrementalOutcome>
where
    C: IncrementalSupport,
{
    let head_sha = client.get_head_sha(id).await?;
    if head_sha != checkpoint_sha {
        let comparison = client.compare_commits(id, checkpoint_sha, &head_sha).await?;
        if comparison.status == CompareStatus::Ahead
            && comparison.ahead_by > config.stale_checkpoint_threshold
        {
            debug!(
                "checkpoint is {} commits behind HEAD (threshold {}); falling back to full review",
                comparison.ahead_by, config.stale_checkpoint_threshold
            );
            return Ok(IncrementalOutcome::FallBackToFull(format!(
                "checkpoint stale: {} commits behind HEAD (threshold {})",
                comparison.ahead_by, config.stale_checkpoint_threshold
            )));
        }
    }

    let result = client.get_incremental_diff(id, checkpoint_sha).await?;
    if !result.is_incremental {
        let reason = result
            .reason
            .clone()
            .unwrap_or_else(|| "incremental diff unavailable".to_string());
        return Ok(IncrementalOutcome::FallBackToFull(reason));
    }
    Ok(IncrementalOutcome::UseIncremental(result))
}
