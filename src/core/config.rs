//! Device configuration.
//!
//! A single validated struct covers the knobs the lifecycle core exposes:
//! ring depth, command stream capacity, initial descriptor arena size and
//! the optional memory budget. Serializable so host applications can load
//! it alongside their own settings files.

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};

/// Upper bound on command streams recordable in one frame.
pub const MAX_COMMAND_STREAMS: u32 = 64;

/// Configuration for a [`Device`](crate::device::Device).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Number of frame slots kept alive concurrently (2 for
    /// double-buffering, 3 for triple-buffering).
    pub buffering_depth: u32,
    /// Fixed number of command streams available per frame. Requesting
    /// more is a fatal configuration error.
    pub max_command_streams: u32,
    /// Initial per-stream descriptor arena capacity, in descriptor writes.
    /// Arenas double on exhaustion.
    pub descriptor_arena_capacity: u32,
    /// Optional limit on total tracked GPU memory, in bytes. Zero disables
    /// budget enforcement.
    pub memory_budget_bytes: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            buffering_depth: 2,
            max_command_streams: 16,
            descriptor_arena_capacity: 64,
            memory_budget_bytes: 0,
        }
    }
}

impl DeviceConfig {
    /// Enable triple-buffering for workloads that tolerate an extra frame
    /// of latency in exchange for fewer ring-wrap stalls.
    pub fn with_triple_buffering(mut self) -> Self {
        self.buffering_depth = 3;
        self
    }

    pub fn with_max_command_streams(mut self, count: u32) -> Self {
        self.max_command_streams = count;
        self
    }

    pub fn with_descriptor_arena_capacity(mut self, writes: u32) -> Self {
        self.descriptor_arena_capacity = writes;
        self
    }

    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget_bytes = bytes;
        self
    }

    /// Validate the configuration. Called once at device creation; any
    /// violation is fatal.
    pub fn validate(&self) -> RenderResult<()> {
        if self.buffering_depth < 2 || self.buffering_depth > 3 {
            return Err(RenderError::config(format!(
                "Invalid buffering depth: {}. Must be 2 or 3.",
                self.buffering_depth
            )));
        }
        if self.max_command_streams == 0 || self.max_command_streams > MAX_COMMAND_STREAMS {
            return Err(RenderError::config(format!(
                "Invalid command stream capacity: {}. Must be 1..={}.",
                self.max_command_streams, MAX_COMMAND_STREAMS
            )));
        }
        if self.descriptor_arena_capacity == 0 {
            return Err(RenderError::config(
                "Descriptor arena capacity must be non-zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(DeviceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_depth_bounds_rejected() {
        let mut config = DeviceConfig::default();
        config.buffering_depth = 1;
        assert!(config.validate().is_err());
        config.buffering_depth = 4;
        assert!(config.validate().is_err());
        config.buffering_depth = 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_helpers() {
        let config = DeviceConfig::default()
            .with_triple_buffering()
            .with_max_command_streams(8)
            .with_descriptor_arena_capacity(16)
            .with_memory_budget(256 << 20);
        assert_eq!(config.buffering_depth, 3);
        assert_eq!(config.max_command_streams, 8);
        assert_eq!(config.descriptor_arena_capacity, 16);
        assert!(config.validate().is_ok());
    }
}
