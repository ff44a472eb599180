//! Connection and reactor-core identifiers

use core::fmt;

/// Handle to a connection stored in a [`ConnArena`](crate::arena::ConnArena).
///
/// `index` selects the arena slot, `generation` distinguishes successive
/// occupants of the same slot. A handle whose generation no longer matches
/// the slot resolves to nothing, so a stale handle can never reach a
/// connection that reused the slot.
///
/// The handle travels through the readiness registration as a `u64` token
/// (see [`ConnId::to_token`]) and through the work queue as-is.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId {
    index: u32,
    generation: u32,
}

impl ConnId {
    /// Create a handle from its parts
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        ConnId { index, generation }
    }

    /// Slot index in the arena
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot occupant
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into the 64-bit readiness token (generation high, index low)
    #[inline]
    pub const fn to_token(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Unpack a readiness token produced by [`ConnId::to_token`]
    #[inline]
    pub const fn from_token(token: u64) -> Self {
        ConnId {
            index: token as u32,
            generation: (token >> 32) as u32,
        }
    }
}

impl fmt::Debug for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnId({}.{})", self.index, self.generation)
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}.{}", self.index, self.generation)
    }
}

/// Ordinal of a reactor core (0..N-1)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[repr(transparent)]
pub struct CoreId(u32);

impl CoreId {
    #[inline]
    pub const fn new(ordinal: u32) -> Self {
        CoreId(ordinal)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Index into the per-core tables
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<usize> for CoreId {
    #[inline]
    fn from(ordinal: usize) -> Self {
        CoreId(ordinal as u32)
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.0)
    }
}
