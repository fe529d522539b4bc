//! Affinity tiers: pure read-side mapping of a conversation's score onto
//! the badge shown next to the chat partner.
//!
//! The thresholds are fixed so every client reading the same score
//! renders the same tier; no tier state is ever persisted.

use serde::Serialize;

/// Tier boundaries, ascending.  A score below the first boundary is
/// [`AffinityTier::Acquaintances`].
const TIER_THRESHOLDS: [(i64, AffinityTier); 3] = [
    (50, AffinityTier::Bookworms),
    (150, AffinityTier::Confidants),
    (300, AffinityTier::SoulReaders),
];

/// Badge tier of a conversation pair.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AffinityTier {
    Acquaintances,
    Bookworms,
    Confidants,
    SoulReaders,
}

impl AffinityTier {
    /// Tier for a score.  Pure; must be recomputed identically by any
    /// client reading the same score.
    pub fn for_score(score: i64) -> Self {
        let mut tier = AffinityTier::Acquaintances;
        for (threshold, next) in TIER_THRESHOLDS {
            if score >= threshold {
                tier = next;
            }
        }
        tier
    }

    /// Lowest score that maps to this tier.
    pub fn min_score(&self) -> i64 {
        match self {
            Self::Acquaintances => 0,
            Self::Bookworms => 50,
            Self::Confidants => 150,
            Self::SoulReaders => 300,
        }
    }

    /// Label shown in the conversation header.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Acquaintances => "Connaissances",
            Self::Bookworms => "Rats de bibliothèque",
            Self::Confidants => "Confidents",
            Self::SoulReaders => "Âmes lectrices",
        }
    }
}

/// Score plus its derived tier, as handed to the UI.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Affinity {
    pub score: i64,
    pub tier: AffinityTier,
}

impl Affinity {
    pub fn from_score(score: i64) -> Self {
        Self {
            score,
            tier: AffinityTier::for_score(score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_boundaries_are_inclusive() {
        assert_eq!(AffinityTier::for_score(0), AffinityTier::Acquaintances);
        assert_eq!(AffinityTier::for_score(49), AffinityTier::Acquaintances);
        assert_eq!(AffinityTier::for_score(50), AffinityTier::Bookworms);
        assert_eq!(AffinityTier::for_score(149), AffinityTier::Bookworms);
        assert_eq!(AffinityTier::for_score(150), AffinityTier::Confidants);
        assert_eq!(AffinityTier::for_score(299), AffinityTier::Confidants);
        assert_eq!(AffinityTier::for_score(300), AffinityTier::SoulReaders);
        assert_eq!(AffinityTier::for_score(10_000), AffinityTier::SoulReaders);
    }

    #[test]
    fn min_score_round_trips() {
        for tier in [
            AffinityTier::Acquaintances,
            AffinityTier::Bookworms,
            AffinityTier::Confidants,
            AffinityTier::SoulReaders,
        ] {
            assert_eq!(AffinityTier::for_score(tier.min_score()), tier);
        }
    }
}
