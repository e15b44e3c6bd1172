//! In-process HNSW graph for approximate nearest-neighbor search.
//!
//! Built lazily by the vector store once it crosses its size
//! threshold; searched for a candidate superset that the store
//! re-ranks exactly. Level assignment is seeded from the blake3 hash
//! of each span id instead of a thread RNG, so two builds over the
//! same records produce the same graph.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::span::SpanId;
use crate::vector::cosine;

const M: usize = 16;
const EF_CONSTRUCTION: usize = 100;
const MAX_LEVEL: usize = 16;

pub(crate) struct HnswGraph {
    vectors: Vec<Vec<f32>>,
    /// Per node: neighbor lists for layers 0..=level.
    layers: Vec<Vec<Vec<u32>>>,
    entry: u32,
    max_level: usize,
}

/// Search frontier entry ordered by score descending, index ascending
/// on ties, so heap pops are deterministic.
#[derive(PartialEq, Clone, Copy)]
struct Candidate {
    score: f32,
    idx: u32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.idx.cmp(&self.idx))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl HnswGraph {
    /// Build a graph over `items`. Caller supplies records in span-id
    /// order; ids only seed level assignment.
    pub(crate) fn build<'a, I>(items: I) -> Option<Self>
    where
        I: IntoIterator<Item = (&'a SpanId, &'a Vec<f32>)>,
    {
        let mut graph: Option<HnswGraph> = None;
        for (id, vector) in items {
            let level = level_for(id);
            match graph.as_mut() {
                None => {
                    graph = Some(HnswGraph {
                        vectors: vec![vector.clone()],
                        layers: vec![vec![Vec::new(); level + 1]],
                        entry: 0,
                        max_level: level,
                    });
                }
                Some(g) => g.insert(vector.clone(), level),
            }
        }
        graph
    }

    pub(crate) fn len(&self) -> usize {
        self.vectors.len()
    }

    fn insert(&mut self, vector: Vec<f32>, level: usize) {
        let idx = u32::try_from(self.vectors.len()).unwrap_or(u32::MAX);
        self.vectors.push(vector);
        self.layers.push(vec![Vec::new(); level + 1]);
        let query = self.vectors[idx as usize].clone();

        let mut ep = vec![self.entry];
        for layer in ((level + 1)..=self.max_level).rev() {
            ep = self.greedy_step(&query, &ep, layer);
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let found = self.search_layer(&query, &ep, EF_CONSTRUCTION, layer);
            let neighbors: Vec<u32> = found.iter().take(M).map(|c| c.idx).collect();

            for &n in &neighbors {
                self.layers[idx as usize][layer].push(n);
                self.layers[n as usize][layer].push(idx);
                self.prune(n, layer);
            }
            ep = found.iter().map(|c| c.idx).collect();
            if ep.is_empty() {
                ep = vec![self.entry];
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry = idx;
        }
    }

    /// Keep only the closest links when a node's neighbor list grows
    /// past its cap (2M at layer 0, M above).
    fn prune(&mut self, node: u32, layer: usize) {
        let cap = if layer == 0 { M * 2 } else { M };
        if self.layers[node as usize][layer].len() <= cap {
            return;
        }
        let base = self.vectors[node as usize].clone();
        let mut scored: Vec<Candidate> = self.layers[node as usize][layer]
            .iter()
            .map(|&n| Candidate {
                score: cosine(&base, &self.vectors[n as usize]),
                idx: n,
            })
            .collect();
        scored.sort_unstable_by(|a, b| b.cmp(a));
        scored.truncate(cap);
        self.layers[node as usize][layer] = scored.into_iter().map(|c| c.idx).collect();
    }

    fn greedy_step(&self, query: &[f32], entries: &[u32], layer: usize) -> Vec<u32> {
        let found = self.search_layer(query, entries, 1, layer);
        found.first().map_or_else(|| entries.to_vec(), |c| vec![c.idx])
    }

    /// Best-first search within one layer, returning up to `ef`
    /// candidates sorted by score descending.
    fn search_layer(&self, query: &[f32], entries: &[u32], ef: usize, layer: usize) -> Vec<Candidate> {
        let mut visited: HashSet<u32> = entries.iter().copied().collect();
        let mut frontier: BinaryHeap<Candidate> = BinaryHeap::new();
        // Min-heap over the current best set; the root is the worst
        // kept candidate.
        let mut best: BinaryHeap<std::cmp::Reverse<Candidate>> = BinaryHeap::new();

        for &e in entries {
            let c = Candidate {
                score: cosine(query, &self.vectors[e as usize]),
                idx: e,
            };
            frontier.push(c);
            best.push(std::cmp::Reverse(c));
        }

        while let Some(current) = frontier.pop() {
            let worst = best.peek().map_or(f32::NEG_INFINITY, |r| r.0.score);
            if best.len() >= ef && current.score < worst {
                break;
            }
            let Some(neighbors) = self.layers[current.idx as usize].get(layer) else {
                continue;
            };
            for &n in neighbors {
                if !visited.insert(n) {
                    continue;
                }
                let score = cosine(query, &self.vectors[n as usize]);
                let worst = best.peek().map_or(f32::NEG_INFINITY, |r| r.0.score);
                if best.len() < ef || score > worst {
                    frontier.push(Candidate { score, idx: n });
                    best.push(std::cmp::Reverse(Candidate { score, idx: n }));
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = best.into_iter().map(|r| r.0).collect();
        out.sort_unstable_by(|a, b| b.cmp(a));
        out
    }

    /// Candidate node indices for `query`, best-first, at most `ef`.
    pub(crate) fn search(&self, query: &[f32], ef: usize) -> Vec<u32> {
        if self.vectors.is_empty() {
            return vec![];
        }
        let mut ep = vec![self.entry];
        for layer in (1..=self.max_level).rev() {
            ep = self.greedy_step(query, &ep, layer);
        }
        self.search_layer(query, &ep, ef, 0)
            .into_iter()
            .map(|c| c.idx)
            .collect()
    }
}

fn level_for(id: &SpanId) -> usize {
    let hash = blake3::hash(id.as_str().as_bytes());
    let bits = u64::from_le_bytes(hash.as_bytes()[..8].try_into().unwrap_or_default());
    // Map to (0, 1], then the standard geometric level distribution.
    #[allow(clippy::cast_precision_loss)]
    let u = ((bits >> 11) as f64 + 1.0) / (1u64 << 53) as f64;
    let ml = 1.0 / (M as f64).ln();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let level = (-u.ln() * ml) as usize;
    level.min(MAX_LEVEL)
}
