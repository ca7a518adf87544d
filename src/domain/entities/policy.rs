//! Per-request cache policies.
//!
//! Both sets default to empty, which means full caching is permitted.

use serde::{Deserialize, Serialize};

use crate::domain::errors::LeverError;

bitflags::bitflags! {
    /// Memory-cache behavior for a request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MemoryPolicy: u8 {
        /// Skips the memory cache lookup.
        const NO_CACHE = 1 << 0;
        /// Skips storing the final result into the memory cache.
        const NO_STORE = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Disk-cache and network behavior for a request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct NetworkPolicy: u8 {
        /// Skips the disk cache and forces a network load.
        const NO_CACHE = 1 << 0;
        /// Skips storing the response into the disk cache.
        const NO_STORE = 1 << 1;
        /// Forces the request through the disk cache only.
        const OFFLINE = 1 << 2;
    }
}

impl MemoryPolicy {
    /// Parses raw policy bits, rejecting unknown ones.
    ///
    /// # Errors
    /// Returns an argument error if `bits` contains undefined flags.
    pub fn from_index(bits: u8) -> Result<Self, LeverError> {
        Self::from_bits(bits)
            .ok_or_else(|| LeverError::invalid_argument(format!("Invalid memory policy: {bits:#b}")))
    }

    /// Combines a primary policy with any number of additional ones.
    #[must_use]
    pub fn combine(policy: Self, additional: &[Self]) -> Self {
        additional.iter().fold(policy, |acc, p| acc | *p)
    }

    #[must_use]
    pub const fn should_read_from_memory_cache(self) -> bool {
        !self.contains(Self::NO_CACHE)
    }

    #[must_use]
    pub const fn should_write_to_memory_cache(self) -> bool {
        !self.contains(Self::NO_STORE)
    }
}

impl NetworkPolicy {
    /// Parses raw policy bits, rejecting unknown ones.
    ///
    /// # Errors
    /// Returns an argument error if `bits` contains undefined flags.
    pub fn from_index(bits: u8) -> Result<Self, LeverError> {
        Self::from_bits(bits).ok_or_else(|| {
            LeverError::invalid_argument(format!("Invalid network policy: {bits:#b}"))
        })
    }

    /// Combines a primary policy with any number of additional ones.
    #[must_use]
    pub fn combine(policy: Self, additional: &[Self]) -> Self {
        additional.iter().fold(policy, |acc, p| acc | *p)
    }

    #[must_use]
    pub const fn should_read_from_disk_cache(self) -> bool {
        !self.contains(Self::NO_CACHE)
    }

    #[must_use]
    pub const fn should_write_to_disk_cache(self) -> bool {
        !self.contains(Self::NO_STORE)
    }

    #[must_use]
    pub const fn is_offline_only(self) -> bool {
        self.contains(Self::OFFLINE)
    }
}
