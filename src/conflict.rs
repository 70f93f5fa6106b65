// Conflict arbitration between mutually exclusive hooks of one trigger
use crate::error::{ConflictError, Result};
use crate::metadata::HookMetadata;
use crate::priority::{PlanningContext, PriorityCalculator, PriorityScore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::Hasher;
use std::sync::Arc;
use twox_hash::XxHash64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    #[default]
    PriorityBased,
    RoundRobin,
    LoadBased,
    WeightedRandom,
    RegistrationOrder,
}

impl ConflictStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictStrategy::PriorityBased => "priority_based",
            ConflictStrategy::RoundRobin => "round_robin",
            ConflictStrategy::LoadBased => "load_based",
            ConflictStrategy::WeightedRandom => "weighted_random",
            ConflictStrategy::RegistrationOrder => "registration_order",
        }
    }
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of the registration order wins under `registration_order`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationOrder {
    #[default]
    First,
    Last,
}

/// Outcome of one arbitration. `winner` is always one of `candidates`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictResolution {
    pub trigger: String,
    pub candidates: Vec<String>,
    pub winner: String,
    pub losers: Vec<String>,
    pub strategy: ConflictStrategy,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TriggerState {
    rotation: u64,
    random_calls: u64,
}

/// Picks exactly one winner among conflicting candidates.
///
/// Round-robin cursors and weighted-random sequence numbers are kept per
/// trigger behind their own mutex, so arbitration for different triggers
/// never contends.
#[derive(Debug)]
pub struct ConflictResolver {
    calculator: Arc<PriorityCalculator>,
    direction: RegistrationOrder,
    states: DashMap<String, Arc<Mutex<TriggerState>>>,
}

impl ConflictResolver {
    pub fn new(calculator: Arc<PriorityCalculator>) -> Self {
        Self {
            calculator,
            direction: RegistrationOrder::First,
            states: DashMap::new(),
        }
    }

    pub fn with_registration_order(mut self, direction: RegistrationOrder) -> Self {
        self.direction = direction;
        self
    }

    pub fn resolve(
        &self,
        trigger: &str,
        candidates: &[HookMetadata],
        strategy: ConflictStrategy,
        context: &PlanningContext,
    ) -> Result<ConflictResolution> {
        if candidates.is_empty() {
            return Err(ConflictError::NoCandidates {
                trigger: trigger.to_string(),
            }
            .into());
        }

        // Stable cyclic order shared by every strategy
        let mut ordered: Vec<&HookMetadata> = candidates.iter().collect();
        ordered.sort_by(|a, b| {
            a.registration_order
                .cmp(&b.registration_order)
                .then_with(|| a.name.cmp(&b.name))
        });
        ordered.dedup_by(|a, b| a.name == b.name);

        let scores: Vec<PriorityScore> = ordered
            .iter()
            .map(|hook| {
                self.calculator.score(
                    hook,
                    &context.priority_context(&hook.name, context.depth_of(&hook.name)),
                )
            })
            .collect();

        let (index, reason) = match strategy {
            ConflictStrategy::PriorityBased => {
                let index = best_by_score(&scores);
                (
                    index,
                    format!("highest priority score {:.4}", scores[index].priority),
                )
            }
            ConflictStrategy::RoundRobin => {
                let state = self.state(trigger);
                let mut state = state.lock();
                let index = (state.rotation % ordered.len() as u64) as usize;
                state.rotation = state.rotation.wrapping_add(1);
                (
                    index,
                    format!("round robin position {} of {}", index + 1, ordered.len()),
                )
            }
            ConflictStrategy::LoadBased => {
                let load = context.system_load.clamp(0.0, 100.0);
                let costs: Vec<f64> = ordered
                    .iter()
                    .map(|hook| hook.estimated_cpu * (1.0 + load / 100.0) + hook.estimated_memory)
                    .collect();
                let index = (0..ordered.len())
                    .min_by(|&a, &b| {
                        costs[a]
                            .partial_cmp(&costs[b])
                            .unwrap_or(Ordering::Equal)
                            .then_with(|| scores[a].rank(&scores[b]))
                            .then_with(|| a.cmp(&b))
                    })
                    .unwrap_or(0);
                (
                    index,
                    format!("lowest resource cost {:.2} at load {:.0}%", costs[index], load),
                )
            }
            ConflictStrategy::WeightedRandom => {
                let sequence = {
                    let state = self.state(trigger);
                    let mut state = state.lock();
                    let sequence = state.random_calls;
                    state.random_calls = state.random_calls.wrapping_add(1);
                    sequence
                };
                let mut rng = StdRng::seed_from_u64(weighted_seed(trigger, sequence));
                let weights: Vec<f64> = scores.iter().map(|s| s.priority.max(0.0)).collect();
                let index = match WeightedIndex::new(&weights) {
                    Ok(distribution) => distribution.sample(&mut rng),
                    Err(_) => rng.gen_range(0..ordered.len()),
                };
                (
                    index,
                    format!("weighted random draw #{sequence} (score {:.4})", scores[index].priority),
                )
            }
            ConflictStrategy::RegistrationOrder => match self.direction {
                RegistrationOrder::First => (0, "first registered".to_string()),
                RegistrationOrder::Last => (ordered.len() - 1, "last registered".to_string()),
            },
        };

        let winner = ordered[index].name.clone();
        let candidates: Vec<String> = ordered.iter().map(|h| h.name.clone()).collect();
        let losers = candidates
            .iter()
            .filter(|name| **name != winner)
            .cloned()
            .collect();

        tracing::debug!(
            trigger = %trigger,
            strategy = %strategy,
            winner = %winner,
            candidates = candidates.len(),
            "Conflict resolved"
        );

        Ok(ConflictResolution {
            trigger: trigger.to_string(),
            candidates,
            winner,
            losers,
            strategy,
            reason,
            timestamp: Utc::now(),
        })
    }

    /// Resolve candidates given by name against a catalog snapshot
    pub fn resolve_names(
        &self,
        trigger: &str,
        names: &[String],
        catalog: &BTreeMap<String, HookMetadata>,
        strategy: ConflictStrategy,
        context: &PlanningContext,
    ) -> Result<ConflictResolution> {
        let mut candidates = Vec::with_capacity(names.len());
        for name in names {
            let hook = catalog.get(name).ok_or_else(|| ConflictError::Unresolved {
                trigger: trigger.to_string(),
                reason: format!("candidate '{name}' is not registered"),
            })?;
            candidates.push(hook.clone());
        }
        self.resolve(trigger, &candidates, strategy, context)
    }

    /// Calls made so far under `round_robin` for a trigger
    pub fn rotation(&self, trigger: &str) -> u64 {
        self.states
            .get(trigger)
            .map(|state| state.lock().rotation)
            .unwrap_or(0)
    }

    pub fn reset(&self, trigger: &str) {
        self.states.remove(trigger);
    }

    fn state(&self, trigger: &str) -> Arc<Mutex<TriggerState>> {
        self.states
            .entry(trigger.to_string())
            .or_default()
            .value()
            .clone()
    }
}

fn best_by_score(scores: &[PriorityScore]) -> usize {
    // Candidates are already in registration order, so the first of equals wins
    let mut best = 0;
    for (index, score) in scores.iter().enumerate().skip(1) {
        if score.rank(&scores[best]) == Ordering::Less {
            best = index;
        }
    }
    best
}

fn weighted_seed(trigger: &str, sequence: u64) -> u64 {
    let mut hasher = XxHash64::default();
    hasher.write(trigger.as_bytes());
    hasher.write_u64(sequence);
    hasher.finish()
}
