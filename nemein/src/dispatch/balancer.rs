//! Selection rules for routing a submission to one live instance.
//!
//! Every rule is a pure function of the candidate list at call time (plus
//! its own RNG or counter state). The decision math operates on
//! [`InstanceLoad`] snapshots so it can be exercised with literal numbers;
//! the trait impls only sample the instances and map the chosen index back.

use super::instance::Instance;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Point-in-time load sample of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceLoad {
    /// Effective concurrent-execution capacity.
    pub core_size: u32,
    /// Executions currently holding a slot.
    pub running: usize,
    /// Entries waiting in the pending queue.
    pub queued: usize,
    /// Relative share used by the weighted rule.
    pub weight: u32,
}

/// Chooses one instance out of a list of live candidates.
///
/// Returns `None` on empty input; rules never inspect disabled instances
/// because the registry filters them out before calling.
pub trait SelectRule: Send + Sync {
    fn choose(&self, instances: &[Arc<Instance>]) -> Option<Arc<Instance>>;
}

fn sample(instances: &[Arc<Instance>]) -> Vec<InstanceLoad> {
    instances.iter().map(|instance| instance.load()).collect()
}

fn lock_rng(rng: &Mutex<StdRng>) -> MutexGuard<'_, StdRng> {
    rng.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Prefers the instance with the most free slots; once everything is
/// saturated, picks the lowest pending pressure per slot.
#[derive(Debug, Default, Clone, Copy)]
pub struct BestWaitIdle;

impl SelectRule for BestWaitIdle {
    fn choose(&self, instances: &[Arc<Instance>]) -> Option<Arc<Instance>> {
        pick_best_wait_idle(&sample(instances)).map(|index| Arc::clone(&instances[index]))
    }
}

/// Cycles through the candidate list with an atomic position counter.
/// The counter survives across calls but not across process restarts.
#[derive(Debug)]
pub struct RoundRobin {
    position: AtomicI64,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            position: AtomicI64::new(-1),
        }
    }

    fn next_index(&self, len: usize) -> usize {
        let position = self.position.fetch_add(1, Ordering::SeqCst) + 1;
        position.rem_euclid(len as i64) as usize
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectRule for RoundRobin {
    fn choose(&self, instances: &[Arc<Instance>]) -> Option<Arc<Instance>> {
        if instances.is_empty() {
            return None;
        }
        Some(Arc::clone(&instances[self.next_index(instances.len())]))
    }
}

/// Uniform pick over the candidate list.
#[derive(Debug)]
pub struct Random {
    rng: Mutex<StdRng>,
}

impl Random {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Fixed seed, for deterministic tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for Random {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectRule for Random {
    fn choose(&self, instances: &[Arc<Instance>]) -> Option<Arc<Instance>> {
        if instances.is_empty() {
            return None;
        }
        let index = lock_rng(&self.rng).gen_range(0..instances.len());
        Some(Arc::clone(&instances[index]))
    }
}

/// Samples proportionally to each instance's configured weight. Instances
/// with weight 0 are unreachable by this rule.
#[derive(Debug)]
pub struct Weighted {
    rng: Mutex<StdRng>,
}

impl Weighted {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for Weighted {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectRule for Weighted {
    fn choose(&self, instances: &[Arc<Instance>]) -> Option<Arc<Instance>> {
        if instances.is_empty() {
            return None;
        }
        let loads = sample(instances);
        let total: u64 = loads.iter().map(|load| load.weight as u64).sum();
        if total == 0 {
            return None;
        }
        let roll = lock_rng(&self.rng).gen_range(0..total);
        pick_by_weight(&loads, roll).map(|index| Arc::clone(&instances[index]))
    }
}

pub(crate) fn pick_best_wait_idle(loads: &[InstanceLoad]) -> Option<usize> {
    if loads.is_empty() {
        return None;
    }

    let mut most_free: Option<(usize, i64)> = None;
    for (index, load) in loads.iter().enumerate() {
        let free = load.core_size as i64 - load.running as i64;
        if free > 0 {
            match most_free {
                // ties keep the earlier candidate
                Some((_, best)) if best >= free => {}
                _ => most_free = Some((index, free)),
            }
        }
    }
    if let Some((index, _)) = most_free {
        return Some(index);
    }

    let mut least_pressure: Option<(usize, f64)> = None;
    for (index, load) in loads.iter().enumerate() {
        let pressure = (load.running + load.queued) as f64 / load.core_size.max(1) as f64;
        match least_pressure {
            Some((_, best)) if best <= pressure => {}
            _ => least_pressure = Some((index, pressure)),
        }
    }
    least_pressure.map(|(index, _)| index)
}

/// Walks the cumulative weight prefix sums and returns the first index
/// whose sum exceeds `roll`. Callers guarantee `roll < total weight`, so
/// the scan always lands on an entry with positive weight; the residual
/// fallback keeps zero-weight entries unreachable.
pub(crate) fn pick_by_weight(loads: &[InstanceLoad], roll: u64) -> Option<usize> {
    let mut cumulative = 0u64;
    for (index, load) in loads.iter().enumerate() {
        cumulative += load.weight as u64;
        if cumulative > roll {
            return Some(index);
        }
    }
    loads.iter().rposition(|load| load.weight > 0)
}

/// Configuration selector for the built-in rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    #[default]
    BestWaitIdle,
    RoundRobin,
    Random,
    Weighted,
}

impl RuleKind {
    pub fn build(self) -> Arc<dyn SelectRule> {
        match self {
            RuleKind::BestWaitIdle => Arc::new(BestWaitIdle),
            RuleKind::RoundRobin => Arc::new(RoundRobin::new()),
            RuleKind::Random => Arc::new(Random::new()),
            RuleKind::Weighted => Arc::new(Weighted::new()),
        }
    }
}
