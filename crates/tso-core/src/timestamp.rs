//! Timestamp pair and packed wire codec.
//!
//! A timestamp is a `(physical, logical)` pair: `physical` is wall-clock
//! milliseconds since the Unix epoch, `logical` is a counter within that
//! millisecond. Timestamps are totally ordered lexicographically on the
//! pair, which the field order of [`Timestamp`] encodes directly.
//!
//! # Wire format
//!
//! The packed form is a single `u64`: `(physical << 18) | logical`, giving
//! 46 bits of physical milliseconds and 18 bits of logical counter.
//! [`Timestamp::compose`] range-checks both halves; [`Timestamp::decompose`]
//! is total and exactly inverts any composed value.
//!
//! # Invariants
//!
//! - [INV-TS001] `decompose(compose(t)) == t` for every in-range pair.
//! - [INV-TS002] Packed ordering agrees with pair ordering: for in-range
//!   timestamps, `a < b` iff `compose(a) < compose(b)`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of bits carrying the logical counter in the packed form.
pub const LOGICAL_BITS: u32 = 18;

/// Number of bits carrying the physical milliseconds in the packed form.
pub const PHYSICAL_BITS: u32 = 46;

/// Exclusive upper bound of the logical counter (`2^18`).
pub const MAX_LOGICAL: i64 = 1 << LOGICAL_BITS;

/// Exclusive upper bound of the physical milliseconds (`2^46`).
pub const MAX_PHYSICAL_MS: i64 = 1 << PHYSICAL_BITS;

/// Errors from composing a timestamp into its packed wire form.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TimestampError {
    /// The physical component does not fit in 46 bits.
    #[error("physical milliseconds out of range: {physical}")]
    PhysicalOutOfRange {
        /// The offending physical value.
        physical: i64,
    },

    /// The logical component does not fit in 18 bits.
    #[error("logical counter out of range: {logical}")]
    LogicalOutOfRange {
        /// The offending logical value.
        logical: i64,
    },
}

/// A `(physical, logical)` timestamp.
///
/// The derived `Ord` is lexicographic on `(physical, logical)`, which is the
/// total order clients rely on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Wall-clock milliseconds since the Unix epoch.
    pub physical: i64,
    /// Counter within the physical millisecond.
    pub logical: i64,
}

impl Timestamp {
    /// Creates a timestamp without range validation.
    #[must_use]
    pub const fn new(physical: i64, logical: i64) -> Self {
        Self { physical, logical }
    }

    /// Packs this timestamp into its 64-bit wire form.
    ///
    /// # Errors
    ///
    /// Returns [`TimestampError`] if either component is negative or does
    /// not fit its bit width.
    #[allow(clippy::cast_sign_loss)] // both halves are validated non-negative
    pub const fn compose(self) -> Result<u64, TimestampError> {
        if self.physical < 0 || self.physical >= MAX_PHYSICAL_MS {
            return Err(TimestampError::PhysicalOutOfRange {
                physical: self.physical,
            });
        }
        if self.logical < 0 || self.logical >= MAX_LOGICAL {
            return Err(TimestampError::LogicalOutOfRange {
                logical: self.logical,
            });
        }
        Ok(((self.physical as u64) << LOGICAL_BITS) | self.logical as u64)
    }

    /// Unpacks a 64-bit wire timestamp into its `(physical, logical)` pair.
    ///
    /// Total: every `u64` decomposes into an in-range pair.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)] // 46- and 18-bit values fit in i64
    pub const fn decompose(raw: u64) -> Self {
        Self {
            physical: (raw >> LOGICAL_BITS) as i64,
            logical: (raw & (MAX_LOGICAL as u64 - 1)) as i64,
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.physical, self.logical)
    }
}
