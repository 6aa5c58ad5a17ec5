//! Stable content hashes used as identity keys.
//!
//! Every reflected type, enum, attribute kind, field and archetype is keyed by
//! an FNV-1a hash of its name (or, for archetypes, of its component set). The
//! algorithm has no seed beyond the fixed offset basis, so a hash computed in
//! one process matches the same hash written to disk by another.
//!
//! # Algorithm (FNV-1a)
//!
//! ```text
//! hash = offset_basis
//! for each byte in input:
//!     hash = hash XOR byte
//!     hash = hash * prime        (wrapping)
//! return hash
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// FNV-1a 32-bit offset basis. Also the hash of the empty input.
pub const INIT_HASH32: u32 = 0x811c_9dc5;
/// FNV-1a 32-bit prime.
pub const FNV_PRIME32: u32 = 0x0100_0193;
/// FNV-1a 64-bit offset basis. Also the hash of the empty input.
pub const INIT_HASH64: u64 = 0xcbf2_9ce4_8422_2325;
/// FNV-1a 64-bit prime.
pub const FNV_PRIME64: u64 = 0x0100_0000_01b3;

/// Continue an FNV-1a 32-bit hash from `init` over `bytes`.
#[must_use]
pub const fn fnv1a_32_with(init: u32, bytes: &[u8]) -> u32 {
    let mut hash = init;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(FNV_PRIME32);
        i += 1;
    }
    hash
}

/// Continue an FNV-1a 64-bit hash from `init` over `bytes`.
#[must_use]
pub const fn fnv1a_64_with(init: u64, bytes: &[u8]) -> u64 {
    let mut hash = init;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME64);
        i += 1;
    }
    hash
}

/// FNV-1a 32-bit hash of `bytes`.
#[must_use]
pub const fn fnv1a_32(bytes: &[u8]) -> u32 {
    fnv1a_32_with(INIT_HASH32, bytes)
}

/// FNV-1a 64-bit hash of `bytes`.
#[must_use]
pub const fn fnv1a_64(bytes: &[u8]) -> u64 {
    fnv1a_64_with(INIT_HASH64, bytes)
}

// ---------------------------------------------------------------------------
// Hash32
// ---------------------------------------------------------------------------

/// 32-bit hash identity. Used for field names and enum labels.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hash32(pub u32);

impl Hash32 {
    /// Hash of the empty input.
    pub const EMPTY: Hash32 = Hash32(INIT_HASH32);

    /// Hash arbitrary bytes.
    #[must_use]
    pub const fn of_bytes(bytes: &[u8]) -> Self {
        Self(fnv1a_32(bytes))
    }

    /// Hash the UTF-8 bytes of `name`.
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        Self::of_bytes(name.as_bytes())
    }

    /// Continue hashing `bytes` from this value.
    #[must_use]
    pub const fn chain(self, bytes: &[u8]) -> Self {
        Self(fnv1a_32_with(self.0, bytes))
    }

    /// The raw hash value.
    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({:#010x})", self.0)
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Hash64
// ---------------------------------------------------------------------------

/// 64-bit hash identity. Used for types, enums, attribute kinds and
/// archetypes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hash64(pub u64);

/// Canonical identity of a reflected type.
pub type TypeHash = Hash64;

impl Hash64 {
    /// Hash of the empty input.
    pub const EMPTY: Hash64 = Hash64(INIT_HASH64);

    /// Hash arbitrary bytes.
    #[must_use]
    pub const fn of_bytes(bytes: &[u8]) -> Self {
        Self(fnv1a_64(bytes))
    }

    /// Hash the UTF-8 bytes of `name`.
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        Self::of_bytes(name.as_bytes())
    }

    /// Continue hashing `bytes` from this value.
    #[must_use]
    pub const fn chain(self, bytes: &[u8]) -> Self {
        Self(fnv1a_64_with(self.0, bytes))
    }

    /// Fold another hash into this one (little-endian bytes).
    #[must_use]
    pub const fn chain_hash(self, other: Hash64) -> Self {
        self.chain(&other.0.to_le_bytes())
    }

    /// Fold a `u64` into this hash (little-endian bytes).
    #[must_use]
    pub const fn chain_u64(self, value: u64) -> Self {
        self.chain(&value.to_le_bytes())
    }

    /// Hash identity of a Rust type, derived from [`std::any::type_name`].
    ///
    /// Only stable within one build; reflected types use their registered
    /// name instead.
    #[must_use]
    pub fn of_type<T: ?Sized>() -> Self {
        Self::from_name(std::any::type_name::<T>())
    }

    /// The raw hash value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Hash64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash64({:#018x})", self.0)
    }
}

impl fmt::Display for Hash64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for Hash64 {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<u32> for Hash32 {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
