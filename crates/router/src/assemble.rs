//! Context assembly: turn the tiered selection into the output blob.
//!
//! Hot files contribute full content (per-file cap, visible truncation
//! marker), Warm files an outline or the head of the file, Cold files only
//! their path in the trailing `evicted:` manifest.  The running total never
//! exceeds the context budget: the file that would cross it is truncated to
//! fit and everything after it is listed by path only.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use regex::Regex;
use tracing::warn;

use focal_state::{FileId, Tier};

use crate::sources::RepoMap;

/// Bounded parallelism for Hot/Warm content reads.
const MAX_READERS: usize = 8;

/// Warm fallback when no outline is available.
const WARM_HEAD_LINES: usize = 20;

const TRUNCATION_MARKER: &str = "\n… [truncated]";

#[derive(Debug, Clone, Default)]
pub struct AssembleStats {
    pub files_included: usize,
    pub files_truncated: usize,
    pub files_path_only: usize,
    /// Files that vanished from disk between scoring and assembly; their
    /// scores are zeroed by the caller.
    pub missing: Vec<FileId>,
    pub output_chars: usize,
}

/// One file's place in the selection, in emission order.
#[derive(Debug, Clone)]
pub struct Selected {
    pub file: FileId,
    pub tier: Tier,
    pub score: f64,
}

pub fn assemble(
    selection: &[Selected],
    project_root: &Path,
    repo_map: Option<&dyn RepoMap>,
    max_context_chars: usize,
    per_file_chars: usize,
) -> (String, AssembleStats) {
    let mut stats = AssembleStats::default();

    // Read every Hot and Warm body up front with bounded parallelism; the
    // emission loop below is then pure string work.
    let wanted: Vec<&Selected> = selection.iter().filter(|s| s.tier != Tier::Cold).collect();
    let bodies = read_files(&wanted, project_root);

    let evicted: Vec<&str> = selection
        .iter()
        .filter(|s| s.tier == Tier::Cold)
        .map(|s| s.file.as_str())
        .collect();
    let manifest = if evicted.is_empty() {
        String::new()
    } else {
        format!("evicted: {}\n", evicted.join(", "))
    };

    let mut out = String::new();

    for (idx, (selected, body)) in wanted.iter().zip(&bodies).enumerate() {
        let Some(body) = body else {
            warn!(file = %selected.file, "selected file missing on disk — skipping");
            stats.missing.push(selected.file.clone());
            continue;
        };

        let rendered = match selected.tier {
            Tier::Hot => render_hot(selected, body, per_file_chars, &mut stats),
            Tier::Warm => render_warm(selected, body, project_root, repo_map),
            Tier::Cold => unreachable!("cold files are never read"),
        };

        if out.len() + rendered.len() + manifest.len() > max_context_chars {
            // This file crosses the budget: truncate it to fit alongside the
            // path-only tail for everything after it, then stop.
            let tail: String = wanted[idx + 1..]
                .iter()
                .zip(&bodies[idx + 1..])
                .filter(|(_, body)| body.is_some())
                .map(|(s, _)| format!("{}\n", path_only_line(s)))
                .collect();
            stats.files_path_only = tail.lines().count();
            let room = max_context_chars
                .saturating_sub(out.len())
                .saturating_sub(tail.len())
                .saturating_sub(manifest.len());
            out.push_str(&truncate_chars(&rendered, room));
            out.push_str(&tail);
            stats.files_truncated += 1;
            stats.files_included += 1;
            break;
        }

        out.push_str(&rendered);
        stats.files_included += 1;
    }

    let room = max_context_chars.saturating_sub(out.len());
    out.push_str(&truncate_chars(&manifest, room));

    stats.output_chars = out.len();
    (out, stats)
}

fn render_hot(
    selected: &Selected,
    body: &str,
    per_file_chars: usize,
    stats: &mut AssembleStats,
) -> String {
    let clean = strip_reserved_spans(body);
    let mut content = clean.as_ref().to_string();
    if content.len() > per_file_chars {
        content = truncate_chars(&content, per_file_chars);
        content.push_str(TRUNCATION_MARKER);
        stats.files_truncated += 1;
    }
    format!(
        "## {} [hot score={:.2}]\n{}\n\n",
        selected.file, selected.score, content
    )
}

fn render_warm(
    selected: &Selected,
    body: &str,
    project_root: &Path,
    repo_map: Option<&dyn RepoMap>,
) -> String {
    let outline = repo_map
        .and_then(|m| m.outline(&project_root.join(&selected.file)))
        .filter(|o| !o.trim().is_empty());
    let toc = match outline {
        Some(outline) => outline,
        None => head_lines(&strip_reserved_spans(body), WARM_HEAD_LINES),
    };
    if toc.is_empty() {
        // Nothing to outline and an empty file: the header alone.
        format!("## {} [warm score={:.2}]\n\n", selected.file, selected.score)
    } else {
        format!(
            "## {} [warm score={:.2}]\n{}\n\n",
            selected.file, selected.score, toc
        )
    }
}

fn path_only_line(selected: &Selected) -> String {
    format!("## {} [{}]", selected.file, match selected.tier {
        Tier::Hot => "hot, content omitted",
        Tier::Warm => "warm, outline omitted",
        Tier::Cold => "cold",
    })
}

/// First `n` non-blank lines.
fn head_lines(text: &str, n: usize) -> String {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .take(n)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate on a char boundary at or below `max_chars` bytes.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let boundary = text
        .char_indices()
        .take_while(|(i, _)| *i <= max_chars)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[..boundary].to_string()
}

/// Remove `<task-notification>` and `<system-reminder>` spans wherever they
/// appear, including embedded mid-file.
pub fn strip_reserved_spans(body: &str) -> std::borrow::Cow<'_, str> {
    static SPANS: OnceLock<Regex> = OnceLock::new();
    let re = SPANS.get_or_init(|| {
        Regex::new(
            r"(?s)<task-notification>.*?</task-notification>|<system-reminder>.*?</system-reminder>",
        )
        .expect("span regex is valid")
    });
    re.replace_all(body, "")
}

/// Read every selected file relative to `project_root` with at most
/// [`MAX_READERS`] concurrent readers.  `None` marks a missing/unreadable
/// file.  Result order matches input order.
fn read_files(wanted: &[&Selected], project_root: &Path) -> Vec<Option<String>> {
    if wanted.is_empty() {
        return Vec::new();
    }
    let results: Mutex<Vec<Option<String>>> = Mutex::new(vec![None; wanted.len()]);
    let cursor = AtomicUsize::new(0);
    let workers = MAX_READERS.min(wanted.len());

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let idx = cursor.fetch_add(1, Ordering::Relaxed);
                if idx >= wanted.len() {
                    break;
                }
                let content = std::fs::read_to_string(project_root.join(&wanted[idx].file)).ok();
                results.lock().expect("reader poisoned")[idx] = content;
            });
        }
    });

    results.into_inner().expect("reader poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::test_support::StaticOutline;
    use std::fs;

    fn project_with(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    fn pick(file: &str, tier: Tier, score: f64) -> Selected {
        Selected { file: file.into(), tier, score }
    }

    #[test]
    fn hot_gets_content_warm_gets_head_cold_gets_manifest() {
        let dir = project_with(&[
            ("src/a.rs", "fn alpha() {}\n"),
            ("src/b.rs", "fn beta() {}\nfn gamma() {}\n"),
        ]);
        let selection = vec![
            pick("src/a.rs", Tier::Hot, 0.95),
            pick("src/b.rs", Tier::Warm, 0.4),
            pick("src/c.rs", Tier::Cold, 0.1),
        ];
        let (out, stats) = assemble(&selection, dir.path(), None, 20_000, 8_000);

        assert!(out.contains("## src/a.rs [hot score=0.95]"));
        assert!(out.contains("fn alpha() {}"));
        assert!(out.contains("## src/b.rs [warm score=0.40]"));
        assert!(out.contains("fn beta() {}"));
        assert!(out.contains("evicted: src/c.rs"));
        assert_eq!(stats.files_included, 2);
        assert!(stats.missing.is_empty());
    }

    #[test]
    fn warm_uses_outline_when_available() {
        let dir = project_with(&[("src/b.rs", "fn real_body() { secret(); }\n")]);
        let outline = StaticOutline("fn real_body()".into());
        let selection = vec![pick("src/b.rs", Tier::Warm, 0.4)];
        let (out, _) = assemble(&selection, dir.path(), Some(&outline), 20_000, 8_000);
        assert!(out.contains("fn real_body()"));
        assert!(!out.contains("secret()"), "warm files never leak full bodies");
    }

    #[test]
    fn reserved_spans_are_stripped_from_content() {
        let dir = project_with(&[(
            "notes.md",
            "before\n<system-reminder>hidden instructions</system-reminder>\nafter\n<task-notification>done</task-notification>\n",
        )]);
        let selection = vec![pick("notes.md", Tier::Hot, 0.9)];
        let (out, _) = assemble(&selection, dir.path(), None, 20_000, 8_000);
        assert!(out.contains("before"));
        assert!(out.contains("after"));
        assert!(!out.contains("hidden instructions"));
        assert!(!out.contains("task-notification"));
    }

    #[test]
    fn per_file_cap_truncates_with_marker() {
        let big = "x".repeat(10_000);
        let dir = project_with(&[("big.rs", &big)]);
        let selection = vec![pick("big.rs", Tier::Hot, 0.9)];
        let (out, stats) = assemble(&selection, dir.path(), None, 20_000, 8_000);
        assert!(out.contains(TRUNCATION_MARKER.trim_start()));
        assert_eq!(stats.files_truncated, 1);
        assert!(out.len() < 9_000);
    }

    #[test]
    fn context_budget_is_never_exceeded() {
        let body = "y".repeat(6_000);
        let dir = project_with(&[
            ("a.rs", &body),
            ("b.rs", &body),
            ("c.rs", &body),
        ]);
        let selection = vec![
            pick("a.rs", Tier::Hot, 0.9),
            pick("b.rs", Tier::Hot, 0.85),
            pick("c.rs", Tier::Hot, 0.8),
        ];
        let budget = 10_000;
        let (out, stats) = assemble(&selection, dir.path(), None, budget, 8_000);
        // The manifest line may follow the truncation point but the content
        // itself stops at the budget.
        assert!(out.len() <= budget, "output {} exceeds budget {budget}", out.len());
        assert_eq!(stats.files_truncated, 1);
        assert_eq!(stats.files_path_only, 1);
        assert!(out.contains("## c.rs [hot, content omitted]"));
    }

    #[test]
    fn missing_files_are_reported_not_fatal() {
        let dir = project_with(&[("present.rs", "fn here() {}\n")]);
        let selection = vec![
            pick("ghost.rs", Tier::Hot, 0.9),
            pick("present.rs", Tier::Hot, 0.8),
        ];
        let (out, stats) = assemble(&selection, dir.path(), None, 20_000, 8_000);
        assert_eq!(stats.missing, vec!["ghost.rs".to_string()]);
        assert!(out.contains("fn here() {}"));
    }

    #[test]
    fn empty_warm_file_renders_header_only() {
        let dir = project_with(&[("empty.rs", "")]);
        let selection = vec![pick("empty.rs", Tier::Warm, 0.3)];
        let (out, _) = assemble(&selection, dir.path(), None, 20_000, 8_000);
        assert!(out.contains("## empty.rs [warm score=0.30]"));
    }
}
