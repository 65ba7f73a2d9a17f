// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Concurrency level and per-worker memory for a pool run.
//!
//! [`ResourceBudget::compute`] is pure apart from logging its advisories. Host
//! introspection lives in [`HostCapacity::detect`]; anything it cannot
//! determine is `None`, which disables the corresponding warning instead of
//! failing the run.

use sysinfo::System;

use crate::observability::messages::budget::{CpuOversubscribed, MemoryClamped, WorkersClamped};
use crate::observability::messages::StructuredLog;

/// What to do when more workers are requested than the host has CPUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerClamp {
    /// Keep the requested count and warn.
    #[default]
    Warn,
    /// Reduce the count to the CPU count and log that it happened.
    ClampToCpus,
}

/// Caller's request for one pool run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetRequest {
    pub workers: usize,
    pub memory_mb: u64,
    pub pending_units: usize,
    pub clamp: WorkerClamp,
}

/// Host resources; `None` means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostCapacity {
    pub cpu_count: Option<usize>,
    pub free_memory_mb: Option<u64>,
}

impl HostCapacity {
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Inspect the current host. Never fails.
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .ok();
        Self {
            cpu_count,
            free_memory_mb: free_memory_mb(sys.available_memory(), sys.free_swap()),
        }
    }
}

/// Available RAM plus free swap, in MB. Zero means the platform reported nothing.
pub fn free_memory_mb(available_bytes: u64, free_swap_bytes: u64) -> Option<u64> {
    let total = available_bytes.saturating_add(free_swap_bytes);
    if total == 0 {
        return None;
    }
    Some(((total as f64) / (1024.0 * 1024.0)).round() as u64)
}

/// Adjustment or warning produced while computing a budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    CpuOversubscribed { requested: usize, available: usize },
    WorkersClamped { requested: usize, clamped_to: usize },
    MemoryClamped { requested_mb: u64, available_mb: u64 },
}

impl Advisory {
    fn log(&self) {
        match *self {
            Advisory::CpuOversubscribed {
                requested,
                available,
            } => CpuOversubscribed {
                requested,
                available,
            }
            .log(),
            Advisory::WorkersClamped {
                requested,
                clamped_to,
            } => WorkersClamped {
                requested,
                clamped_to,
            }
            .log(),
            Advisory::MemoryClamped {
                requested_mb,
                available_mb,
            } => MemoryClamped {
                requested_mb,
                available_mb,
            }
            .log(),
        }
    }
}

/// Effective concurrency and memory split for one pool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBudget {
    pub effective_workers: usize,
    pub effective_memory_mb: u64,
    pub per_worker_memory_mb: u64,
    pub advisories: Vec<Advisory>,
}

impl ResourceBudget {
    /// Compute the budget and log every advisory it produced.
    pub fn compute(request: &BudgetRequest, host: &HostCapacity) -> Self {
        let budget = Self::evaluate(request, host);
        for advisory in &budget.advisories {
            advisory.log();
        }
        budget
    }

    /// Same as [`ResourceBudget::compute`] without logging.
    pub fn evaluate(request: &BudgetRequest, host: &HostCapacity) -> Self {
        let mut advisories = Vec::new();

        let mut workers = request.workers;
        if let Some(cpus) = host.cpu_count {
            if workers > cpus {
                match request.clamp {
                    WorkerClamp::Warn => advisories.push(Advisory::CpuOversubscribed {
                        requested: workers,
                        available: cpus,
                    }),
                    WorkerClamp::ClampToCpus => {
                        advisories.push(Advisory::WorkersClamped {
                            requested: workers,
                            clamped_to: cpus,
                        });
                        workers = cpus;
                    }
                }
            }
        }
        let effective_workers = workers.min(request.pending_units);

        let mut effective_memory_mb = request.memory_mb;
        if let Some(free) = host.free_memory_mb {
            if request.memory_mb > free {
                advisories.push(Advisory::MemoryClamped {
                    requested_mb: request.memory_mb,
                    available_mb: free,
                });
                effective_memory_mb = free;
            }
        }

        let per_worker_memory_mb =
            (effective_memory_mb as f64 / effective_workers.max(1) as f64).round() as u64;

        Self {
            effective_workers,
            effective_memory_mb,
            per_worker_memory_mb,
            advisories,
        }
    }

    /// Concurrency to hand to a pool; never zero.
    pub fn pool_concurrency(&self) -> usize {
        self.effective_workers.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(workers: usize, memory_mb: u64, pending_units: usize) -> BudgetRequest {
        BudgetRequest {
            workers,
            memory_mb,
            pending_units,
            clamp: WorkerClamp::Warn,
        }
    }

    #[test]
    fn memory_is_clamped_to_free_capacity() {
        let host = HostCapacity {
            cpu_count: Some(8),
            free_memory_mb: Some(4000),
        };
        let budget = ResourceBudget::compute(&request(4, 10_000, 10), &host);

        assert_eq!(budget.effective_memory_mb, 4000);
        assert_eq!(budget.per_worker_memory_mb, 1000);
        assert_eq!(
            budget.advisories,
            vec![Advisory::MemoryClamped {
                requested_mb: 10_000,
                available_mb: 4000
            }]
        );
    }

    #[test]
    fn workers_limited_by_pending_units() {
        let budget = ResourceBudget::evaluate(&request(8, 300, 3), &HostCapacity::unknown());
        assert_eq!(budget.effective_workers, 3);
        assert_eq!(budget.per_worker_memory_mb, 100);
        assert!(budget.advisories.is_empty());
    }

    #[test]
    fn oversubscription_warns_without_capping() {
        let host = HostCapacity {
            cpu_count: Some(2),
            free_memory_mb: None,
        };
        let budget = ResourceBudget::evaluate(&request(6, 300, 10), &host);
        assert_eq!(budget.effective_workers, 6);
        assert_eq!(
            budget.advisories,
            vec![Advisory::CpuOversubscribed {
                requested: 6,
                available: 2
            }]
        );
    }

    #[test]
    fn explicit_clamp_reduces_workers_and_says_so() {
        let host = HostCapacity {
            cpu_count: Some(2),
            free_memory_mb: None,
        };
        let mut req = request(6, 300, 10);
        req.clamp = WorkerClamp::ClampToCpus;

        let budget = ResourceBudget::evaluate(&req, &host);
        assert_eq!(budget.effective_workers, 2);
        assert_eq!(budget.per_worker_memory_mb, 150);
        assert_eq!(
            budget.advisories,
            vec![Advisory::WorkersClamped {
                requested: 6,
                clamped_to: 2
            }]
        );
    }

    #[test]
    fn no_pending_units_does_not_divide_by_zero() {
        let budget = ResourceBudget::evaluate(&request(4, 300, 0), &HostCapacity::unknown());
        assert_eq!(budget.effective_workers, 0);
        assert_eq!(budget.per_worker_memory_mb, 300);
        assert_eq!(budget.pool_concurrency(), 1);
    }

    #[test]
    fn per_worker_memory_rounds_to_nearest() {
        let budget = ResourceBudget::evaluate(&request(3, 1000, 3), &HostCapacity::unknown());
        assert_eq!(budget.per_worker_memory_mb, 333);
        let budget = ResourceBudget::evaluate(&request(3, 1001, 3), &HostCapacity::unknown());
        assert_eq!(budget.per_worker_memory_mb, 334);
    }

    #[test]
    fn free_memory_sums_available_and_swap() {
        const MB: u64 = 1024 * 1024;
        assert_eq!(free_memory_mb(4000 * MB, 1000 * MB), Some(5000));
        assert_eq!(free_memory_mb(1536 * 1024, 0), Some(2));
        assert_eq!(free_memory_mb(0, 0), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_host_reports_cpus_and_memory() {
        let host = HostCapacity::detect();
        assert!(host.cpu_count.is_some());
        assert!(host.free_memory_mb.is_some());
    }
}
