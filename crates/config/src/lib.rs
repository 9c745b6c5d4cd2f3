//! Typed configuration for the attention router.
//!
//! Two JSON inputs feed the router: `keywords.json` (prompt-token → file
//! activations) and an optional per-project `router_overrides.json` that can
//! adjust thresholds, decay rates, caps, and the pinned/demoted lists.  Both
//! are validated into plain structs at load time; malformed keyword entries
//! are skipped with a warning and unknown override keys are warned about and
//! ignored, so a bad config never takes the router down.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub mod clock;
pub mod paths;

pub use clock::{Clock, FixedClock, SystemClock};
pub use paths::Paths;

/// `FOCAL_HOME` overrides the tool home directory (default `~/.focal`).
pub const ENV_HOME: &str = "FOCAL_HOME";
/// `FOCAL_CONFIG` overrides the keyword config file location.
pub const ENV_CONFIG: &str = "FOCAL_CONFIG";
/// `FOCAL_DISABLE=1` short-circuits the hook to empty output.
pub const ENV_DISABLE: &str = "FOCAL_DISABLE";

// ── Keyword entries ───────────────────────────────────────────────────────────

/// Content category of a keyword's target files.  Determines the per-turn
/// decay rate applied in the router's first phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Code,
    Prose,
    Markdown,
    Mixed,
}

impl Category {
    pub fn decay(self, rates: &DecayRates) -> f64 {
        match self {
            Category::Code => rates.code,
            Category::Prose => rates.prose,
            Category::Markdown => rates.markdown,
            Category::Mixed => rates.mixed,
        }
    }
}

/// One keyword → file(s) mapping from `keywords.json`.
///
/// `pattern` is matched case-insensitively against whole prompt tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordEntry {
    pub pattern: String,
    pub targets: Vec<String>,
    pub category: Category,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

// ── Tunables ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub hot: f64,
    pub warm: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { hot: 0.8, warm: 0.25 }
    }
}

/// Per-category multiplicative decay applied to every score each turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayRates {
    pub code: f64,
    pub prose: f64,
    pub markdown: f64,
    pub mixed: f64,
}

impl Default for DecayRates {
    fn default() -> Self {
        Self { code: 0.85, prose: 0.70, markdown: 0.75, mixed: 0.80 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Caps {
    pub max_hot: usize,
    pub max_warm: usize,
    pub max_context_chars: usize,
    pub per_file_chars: usize,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            max_hot: 3,
            max_warm: 5,
            max_context_chars: 20_000,
            per_file_chars: 8_000,
        }
    }
}

/// Soft per-turn and per-phase deadlines, in milliseconds.  Exceeding a phase
/// budget returns partial results for that phase and annotates the turn stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Deadlines {
    pub turn_ms: u64,
    pub coactivation_ms: u64,
    pub predictor_ms: u64,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self { turn_ms: 45, coactivation_ms: 8, predictor_ms: 5 }
    }
}

// ── RouterConfig ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub thresholds: Thresholds,
    pub decay: DecayRates,
    pub caps: Caps,
    pub deadlines: Deadlines,
    /// Files that never drop below the Warm threshold.
    pub pinned: Vec<String>,
    /// Files whose score is halved every turn.
    pub demoted: Vec<String>,
    /// Behavioral monitors the supervisor loads, in dispatch order.
    pub plugins: Vec<String>,
    pub keywords: Vec<KeywordEntry>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            decay: DecayRates::default(),
            caps: Caps::default(),
            deadlines: Deadlines::default(),
            pinned: Vec::new(),
            demoted: Vec::new(),
            plugins: vec![
                "loop_breaker".to_string(),
                "verify_first".to_string(),
                "burn_rate".to_string(),
            ],
            keywords: Vec::new(),
        }
    }
}

impl RouterConfig {
    /// Load `keywords.json` (if present) and apply `router_overrides.json`
    /// (if present) on top of the documented defaults.
    pub fn load(keywords_path: &Path, overrides_path: &Path) -> Self {
        let mut config = Self::default();
        config.keywords = load_keywords(keywords_path);
        if overrides_path.exists() {
            match fs::read_to_string(overrides_path)
                .context("reading overrides")
                .and_then(|raw| apply_overrides(&mut config, &raw))
            {
                Ok(()) => {}
                Err(err) => warn!(
                    path = %overrides_path.display(),
                    error = %err,
                    "router overrides unreadable — using defaults"
                ),
            }
        }
        config
    }

    pub fn is_pinned(&self, file: &str) -> bool {
        self.pinned.iter().any(|p| p == file)
    }

    pub fn is_demoted(&self, file: &str) -> bool {
        self.demoted.iter().any(|d| d == file)
    }

    /// Decay rate for `file`, taken from the category of the first keyword
    /// entry that targets it; files no keyword knows about decay as `mixed`.
    pub fn decay_for(&self, file: &str) -> f64 {
        self.keywords
            .iter()
            .find(|k| k.targets.iter().any(|t| t == file))
            .map(|k| k.category.decay(&self.decay))
            .unwrap_or(self.decay.mixed)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parse the keyword file entry-by-entry so one malformed record does not
/// discard the rest.
fn load_keywords(path: &Path) -> Vec<KeywordEntry> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return Vec::new(),
    };
    let values: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
        Ok(values) => values,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "keywords.json is not a JSON array — ignoring");
            return Vec::new();
        }
    };

    let mut entries = Vec::with_capacity(values.len());
    for (idx, value) in values.into_iter().enumerate() {
        match serde_json::from_value::<KeywordEntry>(value) {
            Ok(entry) if entry.pattern.trim().is_empty() || entry.targets.is_empty() => {
                warn!(index = idx, "keyword entry has empty pattern or targets — skipping");
            }
            Ok(mut entry) => {
                entry.pattern = entry.pattern.to_lowercase();
                entries.push(entry);
            }
            Err(err) => {
                warn!(index = idx, error = %err, "malformed keyword entry — skipping");
            }
        }
    }
    entries
}

/// Overrides file: a partial `RouterConfig` without the keyword table.
/// Unknown keys are reported once each and ignored.
fn apply_overrides(config: &mut RouterConfig, raw: &str) -> Result<()> {
    let map: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(raw).context("parsing router_overrides.json")?;

    for (key, value) in map {
        match key.as_str() {
            "thresholds" => config.thresholds = serde_json::from_value(value)?,
            "decay" => config.decay = serde_json::from_value(value)?,
            "caps" => config.caps = serde_json::from_value(value)?,
            "deadlines" => config.deadlines = serde_json::from_value(value)?,
            "pinned" => config.pinned = serde_json::from_value(value)?,
            "demoted" => config.demoted = serde_json::from_value(value)?,
            "plugins" => config.plugins = serde_json::from_value(value)?,
            other => warn!(key = other, "unknown override key — ignoring"),
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
