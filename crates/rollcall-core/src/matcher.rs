//! Nearest-neighbour identity matching.

use crate::registry::IdentityRegistry;
use crate::types::Embedding;

/// Default acceptance threshold, in Euclidean distance units.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Closest reference is strictly under the threshold.
    Accepted { identity: String, distance: f32 },
    /// Closest reference is at or over the threshold.
    Rejected { nearest: String, best_distance: f32 },
    /// No enrolled embeddings of the query's dimension.
    NoCandidates,
}

#[derive(Debug, Clone, Copy)]
pub struct IdentityMatcher {
    threshold: f32,
}

impl Default for IdentityMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl IdentityMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Compare `query` against every enrolled embedding.
    ///
    /// Candidates are visited in registry order (identity insertion order,
    /// then embedding insertion order); on equal distances the first one
    /// visited wins.
    pub fn find_match(&self, query: &Embedding, registry: &IdentityRegistry) -> MatchOutcome {
        let mut best: Option<(&str, f32)> = None;

        for (identity, candidate) in registry.candidates() {
            if candidate.dim() != query.dim() {
                tracing::warn!(
                    identity,
                    expected = query.dim(),
                    actual = candidate.dim(),
                    "skipping reference embedding with mismatched dimension"
                );
                continue;
            }
            let distance = query.euclidean_distance(candidate);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((identity, distance));
            }
        }

        match best {
            None => MatchOutcome::NoCandidates,
            Some((identity, distance)) if distance < self.threshold => MatchOutcome::Accepted {
                identity: identity.to_string(),
                distance,
            },
            Some((identity, distance)) => MatchOutcome::Rejected {
                nearest: identity.to_string(),
                best_distance: distance,
            },
        }
    }
}
