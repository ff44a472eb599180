//! Platform capability traits
//!
//! These define the interface between the platform-agnostic core and the
//! platform-specific runtime implementations.

use crate::error::AffinityError;

/// CPU affinity control for the calling thread
pub trait CpuAffinity: Send + Sync {
    /// Restrict the calling thread to the `ordinal`-th CPU the process may
    /// run on. Ordinals beyond the allowed set wrap around.
    fn pin_current(&self, ordinal: usize) -> Result<(), AffinityError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}
