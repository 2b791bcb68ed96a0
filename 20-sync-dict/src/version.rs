//! Wrapping version arithmetic.
//!
//! Versions identify the ordinal position of a mutation in the store's
//! history. They live in a bounded space so receivers can compare them with
//! wraparound in mind; once a receiver falls a whole lap behind it has to
//! reconcile with a full resync instead of trusting integer comparison.

use std::fmt;

use thiserror::Error;

/// Sequence number carried on the wire as `current` / `next`.
pub type Version = u16;

/// Largest modulus a 16-bit version can represent.
pub const MAX_MODULUS: u32 = 1 << 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("version modulus must be within 2..=65536, got {0}")]
    ModulusOutOfRange(u32),
}

/// The modulus versions wrap around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionSpace {
    modulus: u32,
}

impl VersionSpace {
    pub fn new(modulus: u32) -> Result<Self, ConfigError> {
        if !(2..=MAX_MODULUS).contains(&modulus) {
            return Err(ConfigError::ModulusOutOfRange(modulus));
        }
        Ok(Self { modulus })
    }

    /// Version that follows `version`, wrapping at the modulus.
    pub fn next(&self, version: Version) -> Version {
        // modulus <= 2^16, so the remainder always fits back into a u16.
        ((u32::from(version) + 1) % self.modulus) as Version
    }

    /// Reduces an arbitrary mutation count to the version it lands on.
    pub fn wrap(&self, count: u64) -> Version {
        (count % u64::from(self.modulus)) as Version
    }
}

impl Default for VersionSpace {
    fn default() -> Self {
        Self {
            modulus: MAX_MODULUS,
        }
    }
}

impl fmt::Display for VersionSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mod {}", self.modulus)
    }
}
