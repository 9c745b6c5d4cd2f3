//! Undirected weighted graph of files that tend to be used together.
//!
//! Stored as adjacency maps keyed by file path (mirrored per edge), so
//! traversal needs no object identity and serialization is a plain edge
//! list.  Edges reinforce by +0.1 when the two files' recent activation
//! windows overlap enough (Jaccard ≥ 0.25), decay by ×0.995 otherwise, and
//! are pruned once they fall below the floor.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use focal_state::FileId;

pub const REINFORCE_STEP: f64 = 0.1;
pub const DECAY: f64 = 0.995;
pub const PRUNE_EPSILON: f64 = 0.005;
pub const JACCARD_THRESHOLD: f64 = 0.25;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<(FileId, FileId, f64)>", into = "Vec<(FileId, FileId, f64)>")]
pub struct CoactivationGraph {
    adjacency: BTreeMap<FileId, BTreeMap<FileId, f64>>,
}

impl CoactivationGraph {
    pub fn weight(&self, a: &str, b: &str) -> f64 {
        self.adjacency
            .get(a)
            .and_then(|n| n.get(b))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn neighbors(&self, file: &str) -> impl Iterator<Item = (&FileId, f64)> {
        self.adjacency
            .get(file)
            .into_iter()
            .flat_map(|n| n.iter().map(|(f, w)| (f, *w)))
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(|n| n.len()).sum::<usize>() / 2
    }

    fn set(&mut self, a: &str, b: &str, weight: f64) {
        self.adjacency.entry(a.to_string()).or_default().insert(b.to_string(), weight);
        self.adjacency.entry(b.to_string()).or_default().insert(a.to_string(), weight);
    }

    fn remove_edge(&mut self, a: &str, b: &str) {
        for (x, y) in [(a, b), (b, a)] {
            if let Some(n) = self.adjacency.get_mut(x) {
                n.remove(y);
                if n.is_empty() {
                    self.adjacency.remove(x);
                }
            }
        }
    }

    /// Strengthen the `a`–`b` edge by one reinforcement step, creating it if
    /// absent.  Weights cap at 1.0.
    pub fn reinforce(&mut self, a: &str, b: &str) {
        if a == b {
            return;
        }
        let w = (self.weight(a, b) + REINFORCE_STEP).min(1.0);
        self.set(a, b, w);
    }

    /// Decay every edge not in `touched` this cycle; prune what falls below
    /// the floor.  `touched` holds normalized (min, max) pairs.
    pub fn decay_untouched(&mut self, touched: &BTreeSet<(FileId, FileId)>) {
        let mut pairs: Vec<(FileId, FileId)> = Vec::new();
        for (a, neighbors) in &self.adjacency {
            for b in neighbors.keys() {
                if a < b {
                    pairs.push((a.clone(), b.clone()));
                }
            }
        }

        let mut doomed = Vec::new();
        for (a, b) in pairs {
            if touched.contains(&(a.clone(), b.clone())) {
                continue;
            }
            let w = self.weight(&a, &b) * DECAY;
            if w < PRUNE_EPSILON {
                doomed.push((a, b));
            } else {
                self.set(&a, &b, w);
            }
        }
        for (a, b) in doomed {
            self.remove_edge(&a, &b);
        }
    }
}

pub fn edge_key(a: &str, b: &str) -> (FileId, FileId) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Jaccard similarity of two turn-id sets.
pub fn jaccard(a: &BTreeSet<u64>, b: &BTreeSet<u64>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

// ── Serde form: sorted edge list, each edge once ──────────────────────────────

impl From<Vec<(FileId, FileId, f64)>> for CoactivationGraph {
    fn from(edges: Vec<(FileId, FileId, f64)>) -> Self {
        let mut graph = Self::default();
        for (a, b, w) in edges {
            if a != b {
                graph.set(&a, &b, w.clamp(0.0, 1.0));
            }
        }
        graph
    }
}

impl From<CoactivationGraph> for Vec<(FileId, FileId, f64)> {
    fn from(graph: CoactivationGraph) -> Self {
        graph
            .adjacency
            .iter()
            .flat_map(|(a, n)| {
                n.iter()
                    .filter(move |(b, _)| a < *b)
                    .map(move |(b, w)| (a.clone(), b.clone(), *w))
            })
            .collect()
    }
}
