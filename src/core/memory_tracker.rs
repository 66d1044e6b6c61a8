//! Memory tracking and budget enforcement for GPU resources.
//!
//! Tracks every allocation the device makes (including staging growth) and
//! optionally enforces a budget limit, with particular focus on
//! host-visible memory which is usually the most constrained pool.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use once_cell::sync::OnceCell;

/// Error type for budget enforcement violations.
#[derive(thiserror::Error, Debug)]
pub enum BudgetError {
    #[error("Memory budget exceeded: current {current_bytes} bytes + requested {requested_bytes} bytes would exceed limit of {limit_bytes} bytes (host-visible: {host_visible_bytes} bytes)")]
    BudgetExceeded {
        current_bytes: u64,
        requested_bytes: u64,
        limit_bytes: u64,
        host_visible_bytes: u64,
    },
}

/// Memory usage metrics for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryMetrics {
    /// Total number of tracked buffers
    pub buffer_count: usize,
    /// Total number of tracked textures
    pub texture_count: usize,
    /// Total bytes in all tracked buffers
    pub buffer_bytes: u64,
    /// Total bytes in all tracked textures
    pub texture_bytes: u64,
    /// Total bytes in host-visible resources
    pub host_visible_bytes: u64,
    /// Current memory budget limit in bytes (0 = no limit)
    pub limit_bytes: u64,
    /// Whether current usage is within budget
    pub within_budget: bool,
}

impl MemoryMetrics {
    /// Get total tracked bytes across all resource types.
    pub fn total_bytes(&self) -> u64 {
        self.buffer_bytes + self.texture_bytes
    }
}

/// Central registry for tracking GPU resource memory usage.
///
/// Uses atomic operations for thread-safe tracking without locks.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    buffer_count: AtomicUsize,
    texture_count: AtomicUsize,

    buffer_bytes: AtomicU64,
    texture_bytes: AtomicU64,
    host_visible_bytes: AtomicU64,

    // Budget limit (0 = no limit)
    limit_bytes: AtomicU64,
}

impl ResourceRegistry {
    /// Create a new empty resource registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the memory budget limit in bytes. Zero disables enforcement.
    pub fn set_budget_limit(&self, limit_bytes: u64) {
        self.limit_bytes.store(limit_bytes, Ordering::Relaxed);
    }

    /// Get the current budget limit in bytes.
    pub fn budget_limit(&self) -> u64 {
        self.limit_bytes.load(Ordering::Relaxed)
    }

    /// Check whether an allocation of `size` bytes fits the budget.
    pub fn check_budget(&self, size: u64) -> Result<(), BudgetError> {
        let limit = self.budget_limit();
        if limit == 0 {
            return Ok(());
        }
        let current =
            self.buffer_bytes.load(Ordering::Relaxed) + self.texture_bytes.load(Ordering::Relaxed);
        if current + size > limit {
            return Err(BudgetError::BudgetExceeded {
                current_bytes: current,
                requested_bytes: size,
                limit_bytes: limit,
                host_visible_bytes: self.host_visible_bytes.load(Ordering::Relaxed),
            });
        }
        Ok(())
    }

    /// Track allocation of a buffer.
    pub fn track_buffer_allocation(&self, size: u64, host_visible: bool) {
        self.buffer_count.fetch_add(1, Ordering::Relaxed);
        self.buffer_bytes.fetch_add(size, Ordering::Relaxed);
        if host_visible {
            self.host_visible_bytes.fetch_add(size, Ordering::Relaxed);
        }
    }

    /// Release a previously tracked buffer allocation.
    pub fn free_buffer_allocation(&self, size: u64, host_visible: bool) {
        self.buffer_count.fetch_sub(1, Ordering::Relaxed);
        self.buffer_bytes.fetch_sub(size, Ordering::Relaxed);
        if host_visible {
            self.host_visible_bytes.fetch_sub(size, Ordering::Relaxed);
        }
    }

    /// Track allocation of a texture.
    pub fn track_texture_allocation(&self, size: u64) {
        self.texture_count.fetch_add(1, Ordering::Relaxed);
        self.texture_bytes.fetch_add(size, Ordering::Relaxed);
    }

    /// Release a previously tracked texture allocation.
    pub fn free_texture_allocation(&self, size: u64) {
        self.texture_count.fetch_sub(1, Ordering::Relaxed);
        self.texture_bytes.fetch_sub(size, Ordering::Relaxed);
    }

    /// Snapshot current metrics.
    pub fn get_metrics(&self) -> MemoryMetrics {
        let buffer_bytes = self.buffer_bytes.load(Ordering::Relaxed);
        let texture_bytes = self.texture_bytes.load(Ordering::Relaxed);
        let limit_bytes = self.limit_bytes.load(Ordering::Relaxed);
        MemoryMetrics {
            buffer_count: self.buffer_count.load(Ordering::Relaxed),
            texture_count: self.texture_count.load(Ordering::Relaxed),
            buffer_bytes,
            texture_bytes,
            host_visible_bytes: self.host_visible_bytes.load(Ordering::Relaxed),
            limit_bytes,
            within_budget: limit_bytes == 0 || buffer_bytes + texture_bytes <= limit_bytes,
        }
    }
}

static GLOBAL_TRACKER: OnceCell<ResourceRegistry> = OnceCell::new();

/// Process-wide resource registry shared by all devices.
pub fn global_tracker() -> &'static ResourceRegistry {
    GLOBAL_TRACKER.get_or_init(ResourceRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_and_free_buffer() {
        let registry = ResourceRegistry::new();
        registry.track_buffer_allocation(1024, true);

        let metrics = registry.get_metrics();
        assert_eq!(metrics.buffer_count, 1);
        assert_eq!(metrics.buffer_bytes, 1024);
        assert_eq!(metrics.host_visible_bytes, 1024);

        registry.free_buffer_allocation(1024, true);
        let metrics = registry.get_metrics();
        assert_eq!(metrics.buffer_count, 0);
        assert_eq!(metrics.total_bytes(), 0);
        assert_eq!(metrics.host_visible_bytes, 0);
    }

    #[test]
    fn test_budget_enforcement() {
        let registry = ResourceRegistry::new();
        registry.set_budget_limit(2048);
        registry.track_texture_allocation(1536);

        assert!(registry.check_budget(512).is_ok());
        let err = registry.check_budget(1024).unwrap_err();
        match err {
            BudgetError::BudgetExceeded {
                current_bytes,
                requested_bytes,
                limit_bytes,
                ..
            } => {
                assert_eq!(current_bytes, 1536);
                assert_eq!(requested_bytes, 1024);
                assert_eq!(limit_bytes, 2048);
            }
        }
        assert!(!registry.get_metrics().within_budget || registry.get_metrics().total_bytes() <= 2048);
    }

    #[test]
    fn test_zero_limit_disables_budget() {
        let registry = ResourceRegistry::new();
        registry.track_buffer_allocation(u64::MAX / 4, false);
        assert!(registry.check_budget(u64::MAX / 4).is_ok());
    }
}
