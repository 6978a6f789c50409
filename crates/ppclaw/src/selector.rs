//! Weighted relay selection with failure-aware exclusion.

use ppclaw_common::Relay;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use tracing::{debug, info};

/// Relay ids currently considered unusable.
#[derive(Debug, Default, Clone)]
pub struct FailedNodeSet {
    ids: HashSet<String>,
}

impl FailedNodeSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a relay as failed.
    pub fn mark(&mut self, id: &str) {
        self.ids.insert(id.to_string());
    }

    /// Clear the failure mark of a single relay. Returns `true` if it was marked.
    pub fn recover(&mut self, id: &str) -> bool {
        self.ids.remove(id)
    }

    /// Forget every failure.
    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Returns `true` if `id` is marked as failed.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Number of marked relays.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if no relay is marked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Picks a relay with probability proportional to its weight.
pub struct RelaySelector {
    rng: StdRng,
}

impl Default for RelaySelector {
    fn default() -> Self {
        Self::new()
    }
}

impl RelaySelector {
    /// Creates a selector seeded from OS entropy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Creates a deterministic selector.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Pick a relay among those not marked in `failed`.
    ///
    /// When every relay is marked, the failed set is cleared and the first
    /// relay of the list is returned. Returns `None` only for an empty list.
    pub fn pick(&mut self, relays: &[Relay], failed: &mut FailedNodeSet) -> Option<Relay> {
        let eligible: Vec<&Relay> = relays.iter().filter(|r| !failed.contains(&r.id)).collect();

        if eligible.is_empty() {
            let first = relays.first()?;
            if !failed.is_empty() {
                info!(failed = failed.len(), "all relays excluded, resetting failure list");
                failed.clear();
            }
            return Some(first.clone());
        }

        let total: f64 = eligible.iter().map(|r| r.weight).sum();
        if !total.is_finite() || total <= 0.0 {
            return Some(eligible[0].clone());
        }

        let mut draw = self.rng.gen_range(0.0..total);
        for relay in &eligible {
            draw -= relay.weight;
            if draw <= 0.0 {
                debug!(relay = %relay.id, "relay selected");
                return Some((*relay).clone());
            }
        }
        // rounding can leave a sliver above zero after the last subtraction
        Some(eligible[0].clone())
    }
}
