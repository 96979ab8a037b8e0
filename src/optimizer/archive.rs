//! Run-wide archive of non-dominated genomes.

use super::dominance::dominates;
use super::ScoredGenome;

/// Every non-dominated genome seen during a run.
///
/// Points only leave when a newcomer dominates them. Genomes whose objective
/// vector equals an archived one are rejected, so the first genome to reach a
/// vector keeps it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParetoArchive {
    members: Vec<ScoredGenome>,
}

impl ParetoArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds an archive by inserting `entries` in order.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = ScoredGenome>,
    {
        let mut archive = Self::new();
        for entry in entries {
            archive.insert(entry);
        }
        archive
    }

    /// Offers a scored genome; returns whether it was added.
    pub fn insert(&mut self, candidate: ScoredGenome) -> bool {
        let rejected = self.members.iter().any(|member| {
            member.objectives == candidate.objectives
                || dominates(&member.objectives, &candidate.objectives)
        });
        if rejected {
            return false;
        }
        self.members
            .retain(|member| !dominates(&candidate.objectives, &member.objectives));
        self.members.push(candidate);
        true
    }

    /// Offers every entry; returns how many were added.
    pub fn extend<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = ScoredGenome>,
    {
        entries
            .into_iter()
            .map(|entry| self.insert(entry))
            .filter(|&added| added)
            .count()
    }

    pub fn members(&self) -> &[ScoredGenome] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Smallest summed edit distance in the archive.
    pub fn best_total(&self) -> Option<u64> {
        self.members.iter().map(ScoredGenome::total).min()
    }

    /// Best value per objective across the archive.
    pub fn per_objective_best(&self) -> Vec<u32> {
        let Some(first) = self.members.first() else {
            return Vec::new();
        };
        let mut best = first.objectives.clone();
        for member in &self.members[1..] {
            for (slot, &value) in best.iter_mut().zip(member.objectives.iter()) {
                *slot = (*slot).min(value);
            }
        }
        best
    }
}
