//! Path resolution for per-project state.
//!
//! Every project gets a state directory under
//! `<home>/projects/<hash>/` where `<hash>` is derived from the canonical
//! project path.  When the project is a linked git worktree, learned and
//! predictor models move to the directory keyed by the *primary* working
//! copy so sibling checkouts share what they learn, while attention state
//! stays per-copy.  Detection asks `git` for its common directory and is
//! best-effort: no git, no repository, or any error means per-copy placement.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{ENV_CONFIG, ENV_HOME};

/// Resolved filesystem layout for one project.
#[derive(Debug, Clone)]
pub struct Paths {
    pub home: PathBuf,
    pub project_root: PathBuf,
    /// Per-working-copy state directory.
    pub project_dir: PathBuf,
    /// Directory for state shared across sibling working copies.  Equals
    /// `project_dir` unless the project is a linked worktree.
    pub shared_dir: PathBuf,
}

impl Paths {
    /// Resolve the layout for `project_root`, honoring `FOCAL_HOME`.
    pub fn resolve(project_root: &Path) -> Result<Self> {
        let home = tool_home()?;
        let project_root = canonical_or_given(project_root);
        let project_dir = home.join("projects").join(project_hash(&project_root));
        let shared_dir = match shared_root(&project_root) {
            Some(shared_root) if shared_root != project_root => {
                debug!(shared = %shared_root.display(), "linked worktree — sharing learned state");
                home.join("projects").join(project_hash(&shared_root))
            }
            _ => project_dir.clone(),
        };
        Ok(Self { home, project_root, project_dir, shared_dir })
    }

    // ── Per-copy files ────────────────────────────────────────────────────────

    pub fn attn_state(&self) -> PathBuf {
        self.project_dir.join("attn_state.json")
    }

    pub fn turns_log(&self) -> PathBuf {
        self.project_dir.join("turns.jsonl")
    }

    pub fn events_log(&self) -> PathBuf {
        self.project_dir.join("events.jsonl")
    }

    pub fn pending_turn(&self) -> PathBuf {
        self.project_dir.join("pending_turn.json")
    }

    pub fn plugin_state(&self, plugin: &str) -> PathBuf {
        self.project_dir.join("plugins").join(format!("{plugin}.json"))
    }

    // ── Shared files ──────────────────────────────────────────────────────────

    pub fn learned_state(&self) -> PathBuf {
        self.shared_dir.join("learned_state.json")
    }

    pub fn predictor_model(&self) -> PathBuf {
        self.shared_dir.join("predictor_model.json")
    }

    // ── Tool-global files ─────────────────────────────────────────────────────

    pub fn keywords_config(&self) -> PathBuf {
        if let Ok(path) = env::var(ENV_CONFIG) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        self.home.join("keywords.json")
    }

    pub fn router_overrides(&self) -> PathBuf {
        self.project_dir.join("router_overrides.json")
    }

    pub fn usage_cache(&self) -> PathBuf {
        self.home.join("usage.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.home.join("logs")
    }
}

/// `$FOCAL_HOME`, or `~/.focal`.
pub fn tool_home() -> Result<PathBuf> {
    if let Ok(home) = env::var(ENV_HOME) {
        if !home.is_empty() {
            return Ok(PathBuf::from(home));
        }
    }
    let user_home = env::var("HOME").context("HOME is not set and FOCAL_HOME not provided")?;
    Ok(PathBuf::from(user_home).join(".focal"))
}

fn canonical_or_given(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// First 16 hex chars of the SHA-256 of the canonical path — short enough to
/// read in a directory listing, long enough to never collide in practice.
pub fn project_hash(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

/// Root of the primary working copy when `project_root` is a linked git
/// worktree; `None` when it is the primary copy, not a repository, or git is
/// unavailable.
fn shared_root(project_root: &Path) -> Option<PathBuf> {
    let out = Command::new("git")
        .args(["rev-parse", "--git-common-dir"])
        .current_dir(project_root)
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let common = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if common.is_empty() {
        return None;
    }
    let common = if Path::new(&common).is_absolute() {
        PathBuf::from(common)
    } else {
        project_root.join(common)
    };
    // The common dir of a primary copy is `<root>/.git`; a linked worktree
    // points somewhere else.
    let common = canonical_or_given(&common);
    if common == project_root.join(".git") {
        return None;
    }
    common.parent().map(canonical_or_given)
}
