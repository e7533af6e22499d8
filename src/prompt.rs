//! Prompt builder: produces the model input from PR + diff + optional
//! graph context, with a strict wire-format contract and diff truncation.
//!
//! Built as a `writeln!`-chain strict-contract style renderer.

use std::fmt::Write;

use crate::vcs::types::{Diff, PullRequest};

/// Default truncation threshold for the diff text included in the prompt.
pub const DEFAULT_MAX_DIFF_CHARS: usize = 30_000;

#[derive(Debug, Clone, Copy)]
pub struct PromptLimits {
    pub max_diff_chars: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            max_diff_chars: DEFAULT_MAX_DIFF_CHARS,
        }
    }
}

/// A two-message prompt ready to send to a [`crate::model::ModelClient`].
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    /// True if the diff section was truncated to fit `max_diff_chars`.
    pub truncated: bool,
}

/// Optional graph context rendered as a distinct prompt section when present
/// (the indexer itself is out of scope).
#[derive(Debug, Clone, Default)]
pub struct GraphReviewContext {
    pub text: String,
}

/// Builds the full review prompt.
pub fn build_prompt(
    pr: &PullRequest,
    diff: &Diff,
    limits: PromptLimits,
    review_skills: Option<&str>,
    graph_context: Option<&GraphReviewContext>,
    prior_examples: &[String],
    linked_tickets: &[String],
) -> Prompt {
    let system = build_system_message();
    let (diff_text, truncated) = render_diff(diff, limits.max_diff_chars);

    let mut user = String::with_capacity(diff_text.len() + 2048);

    writeln!(user, "# Pull Request").ok();
    writeln!(user, "Title: {}", pr.title).ok();
    if let Some(desc) = &pr.description {
        writeln!(user, "Description:\n{desc}").ok();
    }
    writeln!(user, "Branch: {} -> {}", pr.source_branch, pr.target_branch).ok();
    writeln!(user).ok();

    if !linked_tickets.is_empty() {
        writeln!(user, "# Linked tickets\n{}\n", linked_tickets.join(", ")).ok();
    }

    if let Some(skills) = review_skills {
        writeln!(user, "# Review skills\n{skills}\n").ok();
    }

    if let Some(graph) = graph_context {
        if !graph.text.is_empty() {
            writeln!(user, "# Graph context\n{}\n", graph.text).ok();
        }
    }

    if !prior_examples.is_empty() {
        writeln!(user, "# Prior review examples").ok();
        for (i, ex) in prior_examples.iter().enumerate() {
            writeln!(user, "Example {}:\n{}\n", i + 1, ex).ok();
        }
    }

    writeln!(user, "# Diff\n```diff\n{diff_text}\n```\n").ok();
    writeln!(user, "{}", output_contract(diff)).ok();

    Prompt { system, user, truncated }
}

fn build_system_message() -> String {
    let mut s = String::with_capacity(1024);
    writeln!(
        s,
        "You are a senior code reviewer. Review only the diff shown below; do not speculate \
about files that are not part of it."
    )
    .ok();
    writeln!(
        s,
        "You must respond using EXACTLY the wire format described in the user message. \
Do not add markdown headers, do not wrap the response in code fences, and do not add any \
text before `SUMMARY:` or after the `VERDICT:` line."
    )
    .ok();
    s
}

/// Renders the output contract, including at least one full worked example,
/// per the output contract's mandatory rules.
fn output_contract(diff: &Diff) -> String {
    let mut s = String::with_capacity(1024);
    writeln!(s, "# Output format (MANDATORY)").ok();
    writeln!(
        s,
        "Respond with exactly this structure, in this order, and nothing else:"
    )
    .ok();
    writeln!(s, "```").ok();
    writeln!(s, "SUMMARY:").ok();
    writeln!(s, "<2-3 sentence free-form summary>").ok();
    writeln!(s).ok();
    writeln!(s, "[File: <path>, Line: <n>]").ok();
    writeln!(s, "<markdown body, may include fenced code blocks>").ok();
    writeln!(s, "[Confidence: <0.0-1.0>]").ok();
    writeln!(s).ok();
    writeln!(s, "[File: ...]").ok();
    writeln!(s, "...").ok();
    writeln!(s).ok();
    writeln!(s, "VERDICT: approve|request_changes|comment").ok();
    writeln!(s, "```").ok();
    writeln!(s, "Rules:").ok();
    writeln!(
        s,
        "- `<path>` MUST appear verbatim in the diff file list below; never invent a path."
    )
    .ok();
    writeln!(s, "- `<n>` MUST be a changed line of that file (appears with a leading `+` in its hunk).").ok();
    writeln!(s, "- Every comment block MUST include a `[Confidence: X.X]` tag.").ok();
    writeln!(s, "- The `VERDICT:` line is mandatory and MUST be the last line.").ok();
    writeln!(s).ok();
    writeln!(s, "Diff file list: {}", file_list(diff)).ok();
    writeln!(s).ok();
    writeln!(s, "# Worked example").ok();
    writeln!(s, "```").ok();
    writeln!(s, "SUMMARY:").ok();
    writeln!(
        s,
        "This PR adds input validation to the signup handler and fixes an off-by-one error in \
pagination."
    )
    .ok();
    writeln!(s).ok();
    writeln!(s, "[File: src/handlers/signup.rs, Line: 42]").ok();
    writeln!(
        s,
        "`email` is not checked for emptiness before being passed to `send_welcome_email`. \
Consider validating it here."
    )
    .ok();
    writeln!(s, "[Confidence: 0.85]").ok();
    writeln!(s).ok();
    writeln!(s, "VERDICT: comment").ok();
    writeln!(s, "```").ok();
    s
}

fn file_list(diff: &Diff) -> String {
    diff.files
        .iter()
        .map(|f| f.path.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Concatenates the diff file-by-file, truncating once the next file would
/// exceed `max_diff_chars`.
fn render_diff(diff: &Diff, max_diff_chars: usize) -> (String, bool) {
    let mut out = String::new();
    let mut truncated = false;

    for (i, file) in diff.files.iter().enumerate() {
        let mut rendered = String::new();
        writeln!(rendered, "--- {}", file.old_path.as_deref().unwrap_or(&file.path)).ok();
        writeln!(rendered, "+++ {}", file.path).ok();
        for hunk in &file.hunks {
            writeln!(
                rendered,
                "@@ -{},{} +{},{} @@",
                hunk.old_start, hunk.old_lines, hunk.new_start, hunk.new_lines
            )
            .ok();
            for line in &hunk.content {
                writeln!(rendered, "{line}").ok();
            }
        }

        if out.len() + rendered.len() > max_diff_chars {
            let remaining = diff.files.len() - i;
            writeln!(out, "[Diff truncated — {remaining} more files]").ok();
            truncated = true;
            break;
        }
        out.push_str(&rendered);
    }

    (out, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::types::{FileDiff, FileStatus, Hunk};

    fn file(path: &str, lines: usize) -> FileDiff {
        FileDiff {
            path: path.to_string(),
            old_path: None,
            status: FileStatus::Modified,
            additions: lines as u32,
            deletions: 0,
            hunks: vec![Hunk {
                old_start: 1,
                old_lines: 1,
                new_start: 1,
                new_lines: lines as u32,
                content: (0..lines).map(|i| format!("+line {i}")).collect(),
            }],
            is_binary: false,
        }
    }

    #[test]
    fn renders_all_files_when_under_limit() {
        let diff = Diff {
            files: vec![file("a.rs", 3), file("b.rs", 3)],
        };
        let (text, truncated) = render_diff(&diff, DEFAULT_MAX_DIFF_CHARS);
        assert!(!truncated);
        assert!(text.contains("a.rs"));
        assert!(text.contains("b.rs"));
    }

    #[test]
    fn truncates_and_reports_remaining_file_count() {
        let diff = Diff {
            files: vec![file("a.rs", 500), file("b.rs", 500), file("c.rs", 500)],
        };
        let (text, truncated) = render_diff(&diff, 200);
        assert!(truncated);
        assert!(text.contains("more files"));
    }

    #[test]
    fn output_contract_lists_files_verbatim() {
        let diff = Diff {
            files: vec![file("src/lib.rs", 2)],
        };
        let contract = output_contract(&diff);
        assert!(contract.contains("src/lib.rs"));
        assert!(contract.contains("VERDICT:"));
        assert!(contract.contains("[Confidence:"));
    }
}
