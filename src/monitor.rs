// Rolling performance records and advisory feedback
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};

pub const DEFAULT_WINDOW: usize = 100;
pub const DEFAULT_LOAD_THRESHOLD: f64 = 80.0;
pub const DEFAULT_SLOW_HOOK_THRESHOLD_MS: u64 = 5000;

/// Success rate below which a hook is flagged unreliable
pub const UNRELIABLE_SUCCESS_RATE: f64 = 0.8;

/// Score delta suggested for hooks that are slow or getting less reliable
pub const PRIORITY_NUDGE: f64 = -0.05;

const LOAD_SAMPLES: usize = 60;
const RECENT: usize = 10;
const MIN_SAMPLES: usize = 3;
const TREND_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceRecord {
    pub hook: String,
    pub duration_ms: f64,
    pub success: bool,
    pub cpu_used: f64,
    pub memory_used: f64,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceRecord {
    pub fn new(hook: impl Into<String>, duration_ms: f64, success: bool) -> Self {
        Self {
            hook: hook.into(),
            duration_ms,
            success,
            cpu_used: 0.0,
            memory_used: 0.0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_resources(mut self, cpu_used: f64, memory_used: f64) -> Self {
        self.cpu_used = cpu_used;
        self.memory_used = memory_used;
        self
    }
}

/// History-derived inputs for the priority calculator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookFeedback {
    pub success_rate: f64,
    /// Position of the hook's lifetime execution count among all monitored
    /// hooks, in [0, 1]
    pub frequency_percentile: f64,
    pub average_duration_ms: f64,
    pub executions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Stable,
    Declining,
    InsufficientData,
}

/// Recent half of a window compared with the older half
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    pub hook: String,
    pub samples: usize,
    /// Recent success rate minus older success rate
    pub success_rate_trend: f64,
    /// Recent average latency minus older average latency, in ms
    pub latency_trend: f64,
    pub success_direction: TrendDirection,
    pub latency_direction: TrendDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookStats {
    pub hook: String,
    pub executions: u64,
    pub window_samples: usize,
    pub success_rate: f64,
    pub average_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub recent_average_ms: f64,
    pub recent_success_rate: f64,
}

/// Advisory actions; nothing here mutates stored metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Recommendation {
    ReduceWorkers {
        current: usize,
        suggested: usize,
        average_load: f64,
    },
    NudgePriority {
        hook: String,
        delta: f64,
        reason: String,
    },
    FlagUnreliable {
        hook: String,
        success_rate: f64,
    },
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn success_rate<'a>(records: impl Iterator<Item = &'a PerformanceRecord>) -> f64 {
    mean(records.map(|r| if r.success { 1.0 } else { 0.0 }))
}

#[derive(Debug)]
pub struct PerformanceMonitor {
    window: usize,
    load_threshold: f64,
    slow_hook_threshold_ms: u64,
    records: RwLock<HashMap<String, VecDeque<PerformanceRecord>>>,
    lifetime: RwLock<HashMap<String, u64>>,
    load_samples: Mutex<VecDeque<f64>>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl PerformanceMonitor {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            load_threshold: DEFAULT_LOAD_THRESHOLD,
            slow_hook_threshold_ms: DEFAULT_SLOW_HOOK_THRESHOLD_MS,
            records: RwLock::new(HashMap::new()),
            lifetime: RwLock::new(HashMap::new()),
            load_samples: Mutex::new(VecDeque::with_capacity(LOAD_SAMPLES)),
        }
    }

    pub fn with_load_threshold(mut self, threshold: f64) -> Self {
        self.load_threshold = threshold;
        self
    }

    pub fn with_slow_hook_threshold_ms(mut self, threshold_ms: u64) -> Self {
        self.slow_hook_threshold_ms = threshold_ms;
        self
    }

    /// Add a record, evicting the hook's oldest one once the window is full
    pub fn record(&self, record: PerformanceRecord) {
        tracing::debug!(
            hook = %record.hook,
            duration_ms = record.duration_ms,
            success = record.success,
            "Performance recorded"
        );
        *self.lifetime.write().entry(record.hook.clone()).or_insert(0) += 1;

        let mut records = self.records.write();
        let window = records.entry(record.hook.clone()).or_default();
        window.push_back(record);
        while window.len() > self.window {
            window.pop_front();
        }
    }

    pub fn record_load(&self, load: f64) {
        let mut samples = self.load_samples.lock();
        samples.push_back(load.clamp(0.0, 100.0));
        while samples.len() > LOAD_SAMPLES {
            samples.pop_front();
        }
    }

    pub fn window_of(&self, hook: &str) -> Vec<PerformanceRecord> {
        self.records
            .read()
            .get(hook)
            .map(|w| w.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn trend(&self, hook: &str, window_size: usize) -> TrendReport {
        let records = self.window_of(hook);
        let take = window_size.max(1).min(records.len());
        let recent_window = &records[records.len() - take..];

        if recent_window.len() < 2 {
            return TrendReport {
                hook: hook.to_string(),
                samples: recent_window.len(),
                success_rate_trend: 0.0,
                latency_trend: 0.0,
                success_direction: TrendDirection::InsufficientData,
                latency_direction: TrendDirection::InsufficientData,
            };
        }

        let (older, recent) = recent_window.split_at(recent_window.len() / 2);
        let success_rate_trend = success_rate(recent.iter()) - success_rate(older.iter());
        let older_latency = mean(older.iter().map(|r| r.duration_ms));
        let recent_latency = mean(recent.iter().map(|r| r.duration_ms));
        let latency_trend = recent_latency - older_latency;

        let success_direction = if success_rate_trend > TREND_TOLERANCE {
            TrendDirection::Improving
        } else if success_rate_trend < -TREND_TOLERANCE {
            TrendDirection::Declining
        } else {
            TrendDirection::Stable
        };

        let relative = if older_latency > 0.0 {
            latency_trend / older_latency
        } else {
            0.0
        };
        let latency_direction = if relative > 2.0 * TREND_TOLERANCE {
            TrendDirection::Declining
        } else if relative < -2.0 * TREND_TOLERANCE {
            TrendDirection::Improving
        } else {
            TrendDirection::Stable
        };

        TrendReport {
            hook: hook.to_string(),
            samples: recent_window.len(),
            success_rate_trend,
            latency_trend,
            success_direction,
            latency_direction,
        }
    }

    pub fn stats(&self, hook: &str) -> Option<HookStats> {
        let records = self.window_of(hook);
        if records.is_empty() {
            return None;
        }
        let executions = self.lifetime.read().get(hook).copied().unwrap_or(0);
        let recent = &records[records.len().saturating_sub(RECENT)..];

        Some(HookStats {
            hook: hook.to_string(),
            executions,
            window_samples: records.len(),
            success_rate: success_rate(records.iter()),
            average_ms: mean(records.iter().map(|r| r.duration_ms)),
            min_ms: records
                .iter()
                .map(|r| r.duration_ms)
                .fold(f64::INFINITY, f64::min),
            max_ms: records.iter().map(|r| r.duration_ms).fold(0.0, f64::max),
            recent_average_ms: mean(recent.iter().map(|r| r.duration_ms)),
            recent_success_rate: success_rate(recent.iter()),
        })
    }

    /// Per-hook inputs for the next planning pass
    pub fn feedback(&self) -> HashMap<String, HookFeedback> {
        let counts: Vec<(String, u64)> = self
            .lifetime
            .read()
            .iter()
            .map(|(hook, count)| (hook.clone(), *count))
            .collect();
        let others = counts.len().saturating_sub(1);

        let records = self.records.read();
        counts
            .iter()
            .map(|(hook, count)| {
                let percentile = if others == 0 {
                    0.5
                } else {
                    counts.iter().filter(|(_, c)| c < count).count() as f64 / others as f64
                };
                let window = records.get(hook);
                let feedback = HookFeedback {
                    success_rate: window.map_or(0.5, |w| success_rate(w.iter())),
                    frequency_percentile: percentile,
                    average_duration_ms: window
                        .map_or(0.0, |w| mean(w.iter().map(|r| r.duration_ms))),
                    executions: *count,
                };
                (hook.clone(), feedback)
            })
            .collect()
    }

    pub fn average_load(&self) -> Option<f64> {
        let samples = self.load_samples.lock();
        if samples.is_empty() {
            return None;
        }
        Some(mean(samples.iter().rev().take(RECENT).copied()))
    }

    pub fn recommendations(&self, current_max_workers: usize) -> Vec<Recommendation> {
        let mut actions = Vec::new();

        let sustained = self.load_samples.lock().len() >= MIN_SAMPLES;
        if let Some(average_load) = self.average_load() {
            if sustained && average_load > self.load_threshold && current_max_workers > 1 {
                actions.push(Recommendation::ReduceWorkers {
                    current: current_max_workers,
                    suggested: (current_max_workers * 3 / 4).max(1),
                    average_load,
                });
            }
        }

        let mut hooks: Vec<String> = self.records.read().keys().cloned().collect();
        hooks.sort();
        for hook in hooks {
            let Some(stats) = self.stats(&hook) else {
                continue;
            };
            if stats.window_samples < MIN_SAMPLES {
                continue;
            }

            if stats.success_rate < UNRELIABLE_SUCCESS_RATE {
                actions.push(Recommendation::FlagUnreliable {
                    hook: hook.clone(),
                    success_rate: stats.success_rate,
                });
            }
            if self.trend(&hook, self.window).success_direction == TrendDirection::Declining {
                actions.push(Recommendation::NudgePriority {
                    hook: hook.clone(),
                    delta: PRIORITY_NUDGE,
                    reason: "success rate declining".to_string(),
                });
            }
            if stats.average_ms > self.slow_hook_threshold_ms as f64 {
                actions.push(Recommendation::NudgePriority {
                    hook: hook.clone(),
                    delta: PRIORITY_NUDGE,
                    reason: format!("average latency {:.0}ms", stats.average_ms),
                });
            }
        }

        actions
    }

    /// Sum of suggested priority nudges per hook
    pub fn priority_adjustments(&self) -> HashMap<String, f64> {
        let mut adjustments = HashMap::new();
        for action in self.recommendations(1) {
            if let Recommendation::NudgePriority { hook, delta, .. } = action {
                *adjustments.entry(hook).or_insert(0.0) += delta;
            }
        }
        adjustments
    }

    pub fn monitored_hooks(&self) -> usize {
        self.records.read().len()
    }

    pub fn records_held(&self) -> usize {
        self.records.read().values().map(VecDeque::len).sum()
    }

    /// Lifetime execution counts, ordered by hook name
    pub fn execution_counts(&self) -> BTreeMap<String, u64> {
        self.lifetime
            .read()
            .iter()
            .map(|(hook, count)| (hook.clone(), *count))
            .collect()
    }
}
