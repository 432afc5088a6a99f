//! C6 — Load Balancer policies.
//!
//! Six selection strategies behind one interface: `select(candidates, task)`.
//! Modelled as a tagged enum with a selection method rather than trait
//! objects — the set is fixed and closed; adding a new strategy is a
//! discriminator extension, not an open hierarchy.

use crate::error::{OrchestratorError, Result};
use crate::types::{Node, Task};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    LeastLoaded,
    Random,
    Weighted,
    Hash,
    Capability,
}

impl From<crate::config::BalancerStrategy> for Strategy {
    fn from(value: crate::config::BalancerStrategy) -> Self {
        use crate::config::BalancerStrategy as C;
        match value {
            C::RoundRobin => Strategy::RoundRobin,
            C::LeastLoaded => Strategy::LeastLoaded,
            C::Random => Strategy::Random,
            C::Weighted => Strategy::Weighted,
            C::Hash => Strategy::Hash,
            C::Capability => Strategy::Capability,
        }
    }
}

/// Weighted sum used by `least_loaded`. Fixed coefficients mirror the
/// spec's `load_score = w1*cpu + w2*mem + w3*disk + w4*load + w5*active_tasks`.
fn load_score(node: &Node) -> f64 {
    let t = node.telemetry;
    0.3 * t.cpu as f64 + 0.25 * t.memory as f64 + 0.15 * t.disk as f64 + 0.15 * t.load as f64 + 0.15 * node.active_tasks as f64
}

pub struct LoadBalancer {
    strategy: Strategy,
    round_robin_counter: AtomicUsize,
    weights: Mutex<HashMap<Uuid, f64>>,
}

impl LoadBalancer {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            round_robin_counter: AtomicUsize::new(0),
            weights: Mutex::new(HashMap::new()),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn select<'a>(&self, candidates: &'a [Node], task: &Task) -> Result<&'a Node> {
        if candidates.is_empty() {
            return Err(OrchestratorError::NoCandidates);
        }
        let chosen = match self.strategy {
            Strategy::RoundRobin => self.select_round_robin(candidates),
            Strategy::LeastLoaded => self.select_least_loaded(candidates),
            Strategy::Random => self.select_random(candidates),
            Strategy::Weighted => self.select_weighted(candidates),
            Strategy::Hash => self.select_hash(candidates, task),
            Strategy::Capability => self.select_capability(candidates, task),
        };
        Ok(chosen)
    }

    fn select_round_robin<'a>(&self, candidates: &'a [Node]) -> &'a Node {
        let idx = self.round_robin_counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        &candidates[idx]
    }

    fn select_least_loaded<'a>(&self, candidates: &'a [Node]) -> &'a Node {
        candidates
            .iter()
            .min_by(|a, b| load_score(a).partial_cmp(&load_score(b)).unwrap_or(std::cmp::Ordering::Equal))
            .expect("candidates non-empty, checked by select()")
    }

    fn select_random<'a>(&self, candidates: &'a [Node]) -> &'a Node {
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        &candidates[idx]
    }

    fn select_weighted<'a>(&self, candidates: &'a [Node]) -> &'a Node {
        let weights = self.weights.lock().expect("weights mutex poisoned");
        let node_weights: Vec<f64> = candidates.iter().map(|n| *weights.get(&n.id).unwrap_or(&1.0)).collect();
        let total: f64 = node_weights.iter().sum();
        drop(weights);

        if total <= 0.0 {
            return &candidates[0];
        }
        let mut roll = rand::thread_rng().gen_range(0.0..total);
        for (node, weight) in candidates.iter().zip(node_weights.iter()) {
            if roll < *weight {
                return node;
            }
            roll -= weight;
        }
        candidates.last().expect("candidates non-empty, checked by select()")
    }

    fn select_hash<'a>(&self, candidates: &'a [Node], task: &Task) -> &'a Node {
        let mut hasher = Sha256::new();
        hasher.update(task.id.as_bytes());
        let digest = hasher.finalize();
        let value = u64::from_be_bytes(digest[0..8].try_into().expect("sha256 digest is >= 8 bytes"));
        let idx = (value as usize) % candidates.len();
        &candidates[idx]
    }

    fn select_capability<'a>(&self, candidates: &'a [Node], task: &Task) -> &'a Node {
        if let Some(required) = &task.required_capability {
            if let Some(node) = candidates.iter().find(|n| n.capabilities.contains(required)) {
                return node;
            }
        }
        candidates
            .iter()
            .max_by_key(|n| n.capabilities.len())
            .expect("candidates non-empty, checked by select()")
    }

    /// Out-of-band feedback for the weighted strategy: increment weight on
    /// success, decrement (floor 1) on failure. No-op for other strategies.
    pub fn update_metrics(&self, node_id: Uuid, success: bool, _duration: std::time::Duration) {
        if self.strategy != Strategy::Weighted {
            return;
        }
        let mut weights = self.weights.lock().expect("weights mutex poisoned");
        let weight = weights.entry(node_id).or_insert(1.0);
        if success {
            *weight += 1.0;
        } else {
            *weight = (*weight - 1.0).max(1.0);
        }
    }

    pub fn weight_of(&self, node_id: Uuid) -> f64 {
        *self.weights.lock().expect("weights mutex poisoned").get(&node_id).unwrap_or(&1.0)
    }
}
