//! Re-ranking of raw similarity candidates.
//!
//! Raw similarity alone over-surfaces obscure titles, so near-equal scores
//! are broken by vote count:
//!
//! 1. duplicate ids collapse to their highest-scoring occurrence
//! 2. candidates below `acceptance_threshold` are dropped
//! 3. the rest are sorted by similarity and split into tie groups; a group
//!    starts at its highest score and takes every following candidate that
//!    is less than `tie_epsilon` below it
//! 4. the final order is group, then vote count (missing counts as zero),
//!    then similarity, then input position
//! 5. the list is cut to `max_results`
//!
//! The order is total, so ranking an already ranked list returns it unchanged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::search::retriever::SimilarityCandidate;

const DEFAULT_TIE_EPSILON: f32 = 0.01;
const DEFAULT_MAX_RESULTS: usize = 20;

/// Every knob that shapes the final result order.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankingPolicy {
    /// Candidates scoring below this are dropped. Lower it for more recall.
    #[serde(default)]
    pub acceptance_threshold: f32,

    /// Scores closer than this to their group's top score are ranked by votes
    #[serde(default = "default_tie_epsilon")]
    pub tie_epsilon: f32,

    /// Results kept after ranking
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_tie_epsilon() -> f32 {
    DEFAULT_TIE_EPSILON
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

impl Default for RankingPolicy {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.0,
            tie_epsilon: DEFAULT_TIE_EPSILON,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

/// Ranked candidates plus counters for logging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    pub ranked: Vec<SimilarityCandidate>,
    pub duplicates: usize,
    pub below_threshold: usize,
    pub truncated: usize,
}

impl Ranking {
    pub fn ids(&self) -> Vec<i64> {
        self.ranked.iter().map(|c| c.id).collect()
    }
}

fn votes(candidate: &SimilarityCandidate) -> i64 {
    candidate.vote_count.unwrap_or(0)
}

/// Collapses repeated ids, keeping the highest score. Equal scores keep the first.
fn dedupe(candidates: Vec<SimilarityCandidate>) -> (Vec<SimilarityCandidate>, usize) {
    let mut positions: HashMap<i64, usize> = HashMap::with_capacity(candidates.len());
    let mut kept: Vec<SimilarityCandidate> = Vec::with_capacity(candidates.len());
    let mut duplicates = 0;

    for candidate in candidates {
        match positions.get(&candidate.id) {
            Some(&pos) => {
                duplicates += 1;
                // a NaN never wins a comparison, so let any score replace it
                if kept[pos].similarity.is_nan() || candidate.similarity > kept[pos].similarity {
                    kept[pos] = candidate;
                }
            }
            None => {
                positions.insert(candidate.id, kept.len());
                kept.push(candidate);
            }
        }
    }

    (kept, duplicates)
}

/// Applies the full ranking policy to the store's candidates.
pub fn rank(candidates: Vec<SimilarityCandidate>, policy: &RankingPolicy) -> Ranking {
    let (candidates, duplicates) = dedupe(candidates);

    let before = candidates.len();
    let mut entries: Vec<(usize, SimilarityCandidate)> = candidates
        .into_iter()
        // NaN scores fail the comparison and are dropped here
        .filter(|c| c.similarity >= policy.acceptance_threshold)
        .enumerate()
        .collect();
    let below_threshold = before - entries.len();

    entries.sort_by(|(ia, a), (ib, b)| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| ia.cmp(ib))
    });

    let mut groups = Vec::with_capacity(entries.len());
    let mut anchor: Option<f32> = None;
    let mut group = 0usize;
    for (_, candidate) in &entries {
        match anchor {
            Some(top) if top - candidate.similarity < policy.tie_epsilon => {}
            Some(_) => {
                group += 1;
                anchor = Some(candidate.similarity);
            }
            None => anchor = Some(candidate.similarity),
        }
        groups.push(group);
    }

    let mut keyed: Vec<(usize, usize, SimilarityCandidate)> = groups
        .into_iter()
        .zip(entries)
        .map(|(group, (pos, candidate))| (group, pos, candidate))
        .collect();

    keyed.sort_by(|(ga, pa, a), (gb, pb, b)| {
        ga.cmp(gb)
            .then_with(|| votes(b).cmp(&votes(a)))
            .then_with(|| b.similarity.total_cmp(&a.similarity))
            .then_with(|| pa.cmp(pb))
    });

    let mut ranked: Vec<SimilarityCandidate> = keyed.into_iter().map(|(_, _, c)| c).collect();
    let truncated = ranked.len().saturating_sub(policy.max_results);
    ranked.truncate(policy.max_results);

    Ranking {
        ranked,
        duplicates,
        below_threshold,
        truncated,
    }
}
