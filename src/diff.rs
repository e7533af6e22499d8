//! Diff model: parsing unified diffs into files/hunks and computing
//! changed-line sets / old→new line maps.
//!
//! Handles the hunk-header length-omission case: `@@ -A +B @@` (no comma)
//! parses as length 1 on both sides.

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::ParseError;
use crate::vcs::types::{Diff, Hunk};

/// Parses a unified diff body (hunks only, no `diff --git`/`---`/`+++`
/// headers required) into a sequence of [`Hunk`]s.
///
/// Tolerant of:
/// - Missing file headers (starts scanning at the first `@@`).
/// - `\ No newline at end of file` marker lines (ignored).
/// - Omitted hunk-length fields (`@@ -12 +12 @@` ≡ `@@ -12,1 +12,1 @@`).
pub fn parse_unified_diff(text: &str) -> Vec<Hunk> {
    let mut hunks = Vec::new();
    let mut cur: Option<Hunk> = None;

    for line in text.lines() {
        if line.starts_with("@@") {
            if let Some(h) = cur.take() {
                hunks.push(h);
            }
            if let Some(header) = parse_hunk_header(line) {
                cur = Some(header);
            }
            continue;
        }

        // `\ No newline at end of file` or similar marker lines.
        if line.starts_with("\\ ") {
            continue;
        }

        let Some(h) = cur.as_mut() else {
            // Skip any prelude before the first `@@`.
            continue;
        };
        h.content.push(line.to_string());
    }

    if let Some(h) = cur.take() {
        hunks.push(h);
    }

    hunks
}

/// Parses a single `@@ -oldStart[,oldLines] +newStart[,newLines] @@` header.
fn parse_hunk_header(line: &str) -> Option<Hunk> {
    let inner = line.trim_start_matches('@').trim_end_matches('@').trim();
    let (left, right) = inner.split_once('+')?;
    let left = left.trim().trim_start_matches('-');
    let right = right.trim();
    // Drop anything past the second `@@` / trailing context label.
    let right = right.split_whitespace().next().unwrap_or(right);

    let (old_start, old_lines) = split_start_len(left)?;
    let (new_start, new_lines) = split_start_len(right)?;

    Some(Hunk {
        old_start,
        old_lines,
        new_start,
        new_lines,
        content: Vec::new(),
    })
}

/// Splits `"12,7"` into `(12, 7)`, or `"12"` into `(12, 1)` — omitted length
/// fields mean exactly one line, per unified-diff convention.
fn split_start_len(s: &str) -> Option<(u32, u32)> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some((a, b)) = s.split_once(',') {
        Some((a.parse().ok()?, b.parse().ok()?))
    } else {
        Some((s.parse().ok()?, 1))
    }
}

/// Result of [`parse_unified_diff`] that also validates the header shape,
/// surfacing [`ParseError`] instead of silently skipping malformed headers.
pub fn parse_unified_diff_strict(text: &str) -> Result<Vec<Hunk>, ParseError> {
    let mut hunks = Vec::new();
    let mut cur: Option<Hunk> = None;

    for line in text.lines() {
        if line.starts_with("@@") {
            if let Some(h) = cur.take() {
                hunks.push(h);
            }
            let header = parse_hunk_header(line)
                .ok_or_else(|| ParseError::InvalidHunkHeader(line.to_string()))?;
            cur = Some(header);
            continue;
        }
        if line.starts_with("\\ ") {
            continue;
        }
        if let Some(h) = cur.as_mut() {
            h.content.push(line.to_string());
        }
    }

    match cur {
        Some(h) => hunks.push(h),
        None if hunks.is_empty() => return Err(ParseError::UnexpectedEof),
        None => {}
    }

    Ok(hunks)
}

/// Computes the set of new-side line numbers that were added (`+`) in `hunks`.
///
/// Walks each hunk with a cursor starting at `new_start`: a line beginning
/// with `+` (not `+++`) contributes the cursor value and advances it; a line
/// beginning with `-` (not `---`) does not advance the cursor; any other
/// line (context) advances the cursor without contributing.
pub fn changed_lines(hunks: &[Hunk]) -> BTreeSet<u32> {
    let mut out = BTreeSet::new();
    for hunk in hunks {
        let mut new_line = hunk.new_start;
        for raw in &hunk.content {
            if raw.starts_with("+++") {
                continue;
            }
            if let Some(_rest) = raw.strip_prefix('+') {
                out.insert(new_line);
                new_line += 1;
            } else if raw.starts_with("---") || raw.starts_with('-') {
                // Removed line: old side only, new cursor does not advance.
            } else {
                // Context line (including a bare empty string for a blank
                // context line truncated of its leading space).
                new_line += 1;
            }
        }
    }
    out
}

/// Computes an old-line → new-line map for `hunks`.
///
/// Deleted lines map to `-1`. Context lines map old→new. Pure insertions
/// (added lines) contribute no entry, since they have no old-side line.
pub fn track_line_movement(hunks: &[Hunk]) -> BTreeMap<u32, i64> {
    let mut out = BTreeMap::new();
    for hunk in hunks {
        let mut old_line = hunk.old_start;
        let mut new_line = hunk.new_start;
        for raw in &hunk.content {
            if raw.starts_with("+++") {
                continue;
            }
            if raw.starts_with('+') {
                new_line += 1;
            } else if raw.starts_with("---") {
                // Ignored marker line, not a real diff line.
            } else if raw.starts_with('-') {
                out.insert(old_line, -1);
                old_line += 1;
            } else {
                out.insert(old_line, new_line as i64);
                old_line += 1;
                new_line += 1;
            }
        }
    }
    out
}

/// True iff `(path, line)` falls on a changed new-side line of `diff`.
///
/// Used by VCS adapters as the final guard before `submitReview` calls the
/// platform: inline comments outside the current diff MUST be dropped.
pub fn line_in_diff(diff: &Diff, path: &str, line: i64) -> bool {
    if line < 1 {
        return false;
    }
    let Some(file) = diff.files.iter().find(|f| f.path == path) else {
        return false;
    };
    changed_lines(&file.hunks).contains(&(line as u32))
}

/// Returns the source text at new-side line `line` of `path`, if the diff
/// covers that line (context or addition). Used to snapshot `originalCode`
/// at posting time so later runs can tell whether the anchored code moved.
pub fn line_content(diff: &Diff, path: &str, line: i64) -> Option<String> {
    if line < 1 {
        return None;
    }
    let file = diff.files.iter().find(|f| f.path == path)?;
    let target = line as u32;
    for hunk in &file.hunks {
        let mut new_line = hunk.new_start;
        for raw in &hunk.content {
            if raw.starts_with("+++") {
                continue;
            }
            if let Some(rest) = raw.strip_prefix('+') {
                if new_line == target {
                    return Some(rest.to_string());
                }
                new_line += 1;
            } else if raw.starts_with("---") || raw.starts_with('-') {
                // Removed line: old side only, new cursor does not advance.
            } else {
                let rest = raw.strip_prefix(' ').unwrap_or(raw.as_str());
                if new_line == target {
                    return Some(rest.to_string());
                }
                new_line += 1;
            }
        }
    }
    None
}

/// Heuristic to detect binary patches embedded in a raw unified diff chunk.
pub fn looks_like_binary_patch(s: &str) -> bool {
    s.contains("GIT binary patch")
        || s.starts_with("Binary files ")
        || (s.starts_with("Files ") && s.contains(" differ"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hunk(old_start: u32, new_start: u32, lines: &[&str]) -> Hunk {
        Hunk {
            old_start,
            old_lines: 0,
            new_start,
            new_lines: 0,
            content: lines.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn changed_lines_counts_only_additions() {
        let h = hunk(
            10,
            10,
            &[" context", "+added one", "-removed", " context again", "+added two"],
        );
        let set = changed_lines(&[h]);
        // new cursor: 10(ctx)->11, 11(+added one) contributes 11 ->12,
        // removed doesn't advance new cursor (still 12),
        // 12 (ctx) -> 13, 13 (+added two) contributes 13 -> 14
        assert_eq!(set, BTreeSet::from([11, 13]));
    }

    #[test]
    fn track_line_movement_maps_context_and_deletions() {
        let h = hunk(5, 5, &[" ctx", "-gone", " ctx2", "+new"]);
        let map = track_line_movement(&[h]);
        assert_eq!(map.get(&5), Some(&5));
        assert_eq!(map.get(&6), Some(&-1));
        assert_eq!(map.get(&7), Some(&6));
        // old line 8 (the `+new` line) never existed on the old side.
        assert_eq!(map.get(&8), None);
    }

    #[test]
    fn parses_hunk_header_with_omitted_lengths() {
        let hunks = parse_unified_diff("@@ -12 +34 @@\n context\n+added\n");
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].old_lines, 1);
        assert_eq!(hunks[0].new_lines, 1);
        assert_eq!(hunks[0].old_start, 12);
        assert_eq!(hunks[0].new_start, 34);
    }

    #[test]
    fn parses_multiple_hunks_and_ignores_no_newline_marker() {
        let text = "@@ -1,2 +1,2 @@\n context\n+added\n\\ No newline at end of file\n@@ -10,1 +11,1 @@\n-removed\n";
        let hunks = parse_unified_diff(text);
        assert_eq!(hunks.len(), 2);
        assert_eq!(hunks[0].content, vec![" context", "+added"]);
        assert_eq!(hunks[1].content, vec!["-removed"]);
    }

    #[test]
    fn detects_binary_patch_markers() {
        assert!(looks_like_binary_patch("GIT binary patch\nliteral 10\n"));
        assert!(looks_like_binary_patch("Binary files a/x.png and b/x.png differ\n"));
        assert!(!looks_like_binary_patch("@@ -1,1 +1,1 @@\n-a\n+b\n"));
    }
}
