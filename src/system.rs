// System resource probing for load-aware planning
use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::System;

/// One reading of machine load
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSample {
    /// Global CPU usage, 0-100
    pub cpu_load: f64,
    /// Memory in use, 0-100
    pub memory_load: f64,
    /// Fraction of memory still available, 0-1
    pub available_fraction: f64,
}

impl ResourceSample {
    /// Load figure fed to the priority calculator: the busier dimension
    pub fn system_load(&self) -> f64 {
        self.cpu_load.max(self.memory_load).clamp(0.0, 100.0)
    }
}

pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> ResourceSample;
}

/// Probe backed by `sysinfo`
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl std::fmt::Debug for SysinfoProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoProbe").finish_non_exhaustive()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&self) -> ResourceSample {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let total = system.total_memory();
        let available = system.available_memory().min(total);
        let (memory_load, available_fraction) = if total == 0 {
            (0.0, 1.0)
        } else {
            let free = available as f64 / total as f64;
            ((1.0 - free) * 100.0, free)
        };

        let sample = ResourceSample {
            cpu_load: f64::from(system.global_cpu_usage()).clamp(0.0, 100.0),
            memory_load,
            available_fraction,
        };
        tracing::trace!(cpu = sample.cpu_load, memory = sample.memory_load, "Sampled system resources");
        sample
    }
}

/// Probe returning a fixed sample
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe {
    sample: ResourceSample,
}

impl StaticProbe {
    pub fn new(cpu_load: f64, memory_load: f64) -> Self {
        Self {
            sample: ResourceSample {
                cpu_load,
                memory_load,
                available_fraction: (1.0 - memory_load / 100.0).clamp(0.0, 1.0),
            },
        }
    }

    pub fn idle() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl ResourceProbe for StaticProbe {
    fn sample(&self) -> ResourceSample {
        self.sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_probe() {
        let sample = StaticProbe::new(30.0, 60.0).sample();
        assert_eq!(sample.system_load(), 60.0);
        assert!((sample.available_fraction - 0.4).abs() < 1e-9);
        assert_eq!(StaticProbe::idle().sample().system_load(), 0.0);
    }

    #[test]
    fn test_sysinfo_probe_stays_in_range() {
        let sample = SysinfoProbe::new().sample();
        assert!((0.0..=100.0).contains(&sample.system_load()));
        assert!((0.0..=1.0).contains(&sample.available_fraction));
    }
}
