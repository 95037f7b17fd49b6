// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use serde_json::{json, Value};
use similar::{ChangeTag, TextDiff};
use tracing::debug;

use kestrel_config::AgentMode;

use kestrel_permission::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// Minimum similarity ratio (0–1) for a fuzzy window to be accepted.
const FUZZY_THRESHOLD: f64 = 0.85;

// ── Hunk data structures ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum HunkLine {
    /// Unchanged line — must exist in the file, kept verbatim.
    Context(String),
    /// Line to remove from the file.
    Del(String),
    /// Line to insert into the file.
    Add(String),
}

#[derive(Debug, Clone)]
struct Hunk {
    /// 1-based old-file start line from `@@ -N,...` — used only as an
    /// ambiguity-breaking hint, never for primary location.
    old_start_hint: Option<usize>,
    lines: Vec<HunkLine>,
}

impl Hunk {
    /// Lines that must already be present in the file (Context + Del), in order.
    fn search_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Del(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Strip a leading ` ```diff ` / ` ``` ` markdown fence if present.
fn strip_markdown_fence(diff: &str) -> &str {
    let t = diff.trim_start();
    if t.starts_with("```") {
        if let Some(nl) = t.find('\n') {
            let body = &t[nl + 1..];
            // Trim trailing closing fence
            if let Some(close) = body.rfind("\n```") {
                return &body[..close + 1];
            }
            return body;
        }
    }
    diff
}

/// Parse unified diff hunks from `diff`.
///
/// Accepts:
/// - Standard `@@ -N,M +N,M @@` headers (line numbers are optional hints)
/// - FuDiff-style `@@ @@` (no line numbers)
/// - Diffs wrapped in markdown ` ```diff ` fences
fn parse_hunks(diff: &str) -> Result<Vec<Hunk>, String> {
    let diff = strip_markdown_fence(diff);
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in diff.lines() {
        // File header lines — skip
        if line.starts_with("--- ") || line.starts_with("+++ ") {
            continue;
        }
        // "No newline at end of file" marker — skip
        if line.starts_with("\\ ") {
            continue;
        }
        // Hunk header
        if line.starts_with("@@") {
            if let Some(h) = current.take() {
                if !h.lines.is_empty() {
                    hunks.push(h);
                }
            }
            current = Some(Hunk {
                old_start_hint: parse_old_start(line),
                lines: Vec::new(),
            });
            continue;
        }
        if let Some(ref mut h) = current {
            if let Some(rest) = line.strip_prefix(' ') {
                h.lines.push(HunkLine::Context(rest.to_string()));
            } else if let Some(rest) = line.strip_prefix('-') {
                h.lines.push(HunkLine::Del(rest.to_string()));
            } else if let Some(rest) = line.strip_prefix('+') {
                h.lines.push(HunkLine::Add(rest.to_string()));
            } else if line.is_empty() {
                // A blank diff line with no prefix = context empty line
                h.lines.push(HunkLine::Context(String::new()));
            }
            // Unknown line type — ignore
        }
    }

    if let Some(h) = current {
        if !h.lines.is_empty() {
            hunks.push(h);
        }
    }

    if hunks.is_empty() {
        return Err("No hunks found in diff. Use @@ headers.".to_string());
    }
    Ok(hunks)
}

/// Extract the 1-based old-file start line from `@@ -N[,M] +N[,M] @@`.
/// Returns `None` for FuDiff-style `@@ @@` or any unparseable header.
fn parse_old_start(header: &str) -> Option<usize> {
    // Strip leading @@ and trailing @@ section + optional function name
    let inner = header
        .trim_start_matches('@')
        .trim()
        .split("@@")
        .next()
        .unwrap_or("")
        .trim();
    // inner: "-5,7 +5,6" or "" (FuDiff)
    for part in inner.split_whitespace() {
        if let Some(rest) = part.strip_prefix('-') {
            if let Ok(n) = rest.split(',').next().unwrap_or(rest).parse::<usize>() {
                return Some(n);
            }
        }
    }
    None
}

// ── Matching helpers ──────────────────────────────────────────────────────────

/// Similarity ratio in [0,1] using character-level diff (2×matches / total).
fn similarity_ratio(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let diff = TextDiff::from_chars(a, b);
    let matching: usize = diff
        .iter_all_changes()
        .filter(|c| c.tag() == ChangeTag::Equal)
        .map(|c| c.value().len())
        .sum();
    (matching * 2) as f64 / total as f64
}

/// Minimum leading-space count across non-empty lines.
fn common_indent(lines: &[&str]) -> usize {
    lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0)
}

/// Strip `indent` spaces from the front of every line (trim to 0 if shorter).
fn strip_indent(lines: &[&str], indent: usize) -> Vec<String> {
    lines
        .iter()
        .map(|l| {
            if l.len() >= indent {
                l[indent..].to_string()
            } else {
                l.trim_start().to_string()
            }
        })
        .collect()
}

/// Find where `search_lines` (Context + Del lines from a hunk) appear in
/// `file_lines`. Returns `(pos, indent_delta)` where:
/// - `pos`  — 0-based index of the first matching line
/// - `indent_delta` — spaces to add (positive) or remove (negative) from
///   Add lines when the match required indent normalisation or fuzzy logic
///
/// Strategies (in order):
/// 1. Exact match
/// 2. Indent-normalised match (common indent stripped on both sides)
/// 3. Fuzzy match (≥85 % combined similarity)
///
/// When multiple positions match at the same quality, `hint` (1-based old-file
/// line from the `@@ -N,...` header) picks the closest one.
fn find_hunk_position(
    file_lines: &[String],
    search_lines: &[&str],
    hint: Option<usize>,
) -> Result<(usize, i64), String> {
    // Pure insertion — no context/del lines to locate
    if search_lines.is_empty() {
        let pos = hint
            .map(|h| h.saturating_sub(1).min(file_lines.len()))
            .unwrap_or(file_lines.len());
        return Ok((pos, 0));
    }

    let n = search_lines.len();
    let file_refs: Vec<&str> = file_lines.iter().map(String::as_str).collect();

    if file_refs.len() < n {
        return Err(format!(
            "File has {} lines but hunk needs {} context/deletion lines.",
            file_refs.len(),
            n
        ));
    }

    // ── Strategy 1: exact ────────────────────────────────────────────────────
    let exact: Vec<usize> = (0..=(file_refs.len() - n))
        .filter(|&i| file_refs[i..i + n] == *search_lines)
        .collect();
    if !exact.is_empty() {
        return Ok((pick_best(&exact, hint), 0));
    }

    // ── Strategy 2: indent-normalised ────────────────────────────────────────
    let hunk_indent = common_indent(search_lines) as i64;
    let norm_search = strip_indent(search_lines, hunk_indent as usize);
    let norm_refs: Vec<&str> = norm_search.iter().map(String::as_str).collect();

    let indent_hits: Vec<(usize, i64)> = (0..=(file_refs.len() - n))
        .filter_map(|i| {
            let win = &file_refs[i..i + n];
            let file_ind = common_indent(win) as i64;
            let norm_win = strip_indent(win, file_ind as usize);
            let norm_win_refs: Vec<&str> = norm_win.iter().map(String::as_str).collect();
            if norm_win_refs == norm_refs {
                Some((i, file_ind - hunk_indent))
            } else {
                None
            }
        })
        .collect();

    if !indent_hits.is_empty() {
        let positions: Vec<usize> = indent_hits.iter().map(|(p, _)| *p).collect();
        let best = pick_best(&positions, hint);
        let delta = indent_hits
            .iter()
            .find(|(p, _)| *p == best)
            .map(|(_, d)| *d)
            .unwrap_or(0);
        return Ok((best, delta));
    }

    // ── Strategy 3: fuzzy ────────────────────────────────────────────────────
    let search_joined = search_lines.join("\n");
    let fuzzy_hits: Vec<(f64, usize, i64)> = (0..=(file_refs.len() - n))
        .filter_map(|i| {
            let win = &file_refs[i..i + n];
            let ratio = similarity_ratio(&search_joined, &win.join("\n"));
            if ratio >= FUZZY_THRESHOLD {
                let file_ind = common_indent(win) as i64;
                Some((ratio, i, file_ind - hunk_indent))
            } else {
                None
            }
        })
        .collect();

    if !fuzzy_hits.is_empty() {
        let best_ratio = fuzzy_hits
            .iter()
            .map(|(r, _, _)| *r)
            .fold(0.0_f64, f64::max);
        let best_hits: Vec<_> = fuzzy_hits
            .iter()
            .filter(|(r, _, _)| (r - best_ratio).abs() < 1e-9)
            .collect();
        let positions: Vec<usize> = best_hits.iter().map(|(_, p, _)| *p).collect();
        let best = pick_best(&positions, hint);
        let delta = best_hits
            .iter()
            .find(|(_, p, _)| *p == best)
            .map(|(_, _, d)| *d)
            .unwrap_or(0);
        return Ok((best, delta));
    }

    // ── All strategies failed — build a concise, actionable error ────────────
    let mut msg = String::from("Context not found. Expected:\n");
    for l in search_lines {
        msg.push_str(&format!("  |{l}|\n"));
    }
    let suggestions = find_similar_blocks(&file_refs, search_lines, 1);
    if let Some((ratio, line_no, block)) = suggestions.into_iter().next() {
        msg.push_str(&format!(
            "Nearest match at line {line_no} ({:.0}%):\n",
            ratio * 100.0
        ));
        for l in &block {
            msg.push_str(&format!("  |{l}|\n"));
        }
    }
    msg.push_str("Re-read the file, fix the context lines, and retry.");
    Err(msg)
}

/// When several windows match at equal quality, pick the one closest to `hint`
/// (1-based old-file line).  Falls back to the first match when hint is absent.
fn pick_best(matches: &[usize], hint: Option<usize>) -> usize {
    if matches.len() == 1 {
        return matches[0];
    }
    if let Some(h) = hint {
        let target = h.saturating_sub(1);
        return *matches
            .iter()
            .min_by_key(|&&p| (p as isize - target as isize).unsigned_abs())
            .unwrap_or(&matches[0]);
    }
    matches[0]
}

/// Return up to `limit` windows in `file_lines` most similar to `search_lines`
/// (similarity > 30 %), sorted descending.  Used for error messages.
fn find_similar_blocks(
    file_lines: &[&str],
    search_lines: &[&str],
    limit: usize,
) -> Vec<(f64, usize, Vec<String>)> {
    let n = search_lines.len().max(1);
    if file_lines.len() < n {
        return vec![];
    }
    let search_joined = search_lines.join("\n");
    let mut candidates: Vec<(f64, usize, Vec<String>)> = file_lines
        .windows(n)
        .enumerate()
        .map(|(i, win)| {
            let ratio = similarity_ratio(&search_joined, &win.join("\n"));
            (ratio, i + 1, win.iter().map(|s| s.to_string()).collect())
        })
        .filter(|(r, _, _)| *r > 0.3)
        .collect();
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    candidates.truncate(limit);
    candidates
}

// ── Hunk application ─────────────────────────────────────────────────────────

/// Adjust leading spaces on `line` by `delta` (positive = add, negative = remove).
fn adjust_indent(line: &str, delta: i64) -> String {
    if delta == 0 || line.trim().is_empty() {
        return line.to_string();
    }
    if delta > 0 {
        format!("{}{line}", " ".repeat(delta as usize))
    } else {
        let remove = (-delta) as usize;
        if line.len() >= remove && line[..remove].bytes().all(|b| b == b' ') {
            line[remove..].to_string()
        } else {
            line.trim_start_matches(' ').to_string()
        }
    }
}

/// Apply `hunk` at `pos` (0-based index where its search lines begin).
/// `indent_delta` adjusts Add lines when found via indent-normalised / fuzzy.
fn apply_hunk(file_lines: &[String], hunk: &Hunk, pos: usize, indent_delta: i64) -> Vec<String> {
    let mut result = file_lines[..pos].to_vec();
    let mut file_idx = pos;

    for hl in &hunk.lines {
        match hl {
            HunkLine::Context(_) => {
                // Keep the exact file line (preserves its real indentation).
                result.push(file_lines[file_idx].clone());
                file_idx += 1;
            }
            HunkLine::Del(_) => {
                // Skip file line — deleted.
                file_idx += 1;
            }
            HunkLine::Add(s) => {
                // Insert new line, adjusted for any indent delta.
                result.push(adjust_indent(s, indent_delta));
            }
        }
    }

    result.extend_from_slice(&file_lines[file_idx..]);
    result
}

// ── Tool ──────────────────────────────────────────────────────────────────────

pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by applying unified diff hunks.\n\
         \n\
         DIFF FORMAT\n\
         Each hunk starts with @@ (line numbers are optional hints, not required):\n\
           @@ -OLD_LINE,COUNT +NEW_LINE,COUNT @@\n\
            context line          (space prefix — unchanged)\n\
           -removed line          (minus prefix — deleted from file)\n\
           +added line            (plus prefix — inserted into file)\n\
            context line\n\
         \n\
         Rules:\n\
         • Include 2–3 unchanged context lines before and after every change.\n\
         • Context lines must match the file content exactly (indentation\n\
           differences are corrected automatically).\n\
         • Multiple @@ hunks in one diff apply changes at separate locations.\n\
         • Diffs wrapped in ```diff fences are accepted.\n\
         \n\
         Example — replace one call and add a log line:\n\
         @@ -12,6 +12,7 @@\n\
          fn process(x: u32) -> u32 {\n\
         -    x * 2\n\
         +    log(x);\n\
         +    x * 2\n\
          }\n\
         \n\
         Re-read the file after any previous edit before writing new context."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file to edit"
                },
                "diff": {
                    "type": "string",
                    "description": "Unified diff hunks to apply. Each hunk starts with @@. \
                                    Include 2–3 context lines around every change."
                }
            },
            "required": ["path", "diff"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Agent]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.id, "Missing required parameter: path"),
        };
        let diff_str = match call.args.get("diff").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.id, "Missing required parameter: diff"),
        };

        debug!(path = %path, "edit_file tool");

        let hunks = match parse_hunks(&diff_str) {
            Ok(h) => h,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };

        let had_trailing_newline = content.ends_with('\n');
        let mut file_lines: Vec<String> = content.lines().map(str::to_string).collect();

        for (idx, hunk) in hunks.iter().enumerate() {
            let search = hunk.search_lines();
            match find_hunk_position(&file_lines, &search, hunk.old_start_hint) {
                Ok((pos, delta)) => {
                    file_lines = apply_hunk(&file_lines, hunk, pos, delta);
                }
                Err(e) => {
                    let prefix = if hunks.len() > 1 {
                        format!("Hunk {}: ", idx + 1)
                    } else {
                        String::new()
                    };
                    return ToolOutput::err(&call.id, format!("{prefix}{e}"));
                }
            }
        }

        let mut new_content = file_lines.join("\n");
        if had_trailing_newline {
            new_content.push('\n');
        }

        if let Some(parent) = std::path::Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
        }

        match tokio::fs::write(&path, &new_content).await {
            Ok(_) => ToolOutput::ok(&call.id, "Edit successfully applied"),
            Err(e) => ToolOutput::err(&call.id, format!("Write failed: {e}")),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
