//! CPU affinity implementations
//!
//! Only the thread that calls [`CpuAffinity::pin_current`] is narrowed;
//! the launching thread keeps the full mask it started with.

use rookery_core::{AffinityError, CpuAffinity};

/// No-op affinity: used when pinning is disabled or unsupported
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAffinity;

impl CpuAffinity for NoAffinity {
    fn pin_current(&self, _ordinal: usize) -> Result<(), AffinityError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
        use nix::unistd::Pid;

        /// `sched_setaffinity` over the CPUs the process was started with
        #[derive(Debug, Clone)]
        pub struct LinuxAffinity {
            allowed: Vec<usize>,
        }

        impl LinuxAffinity {
            /// Snapshot the calling thread's allowed CPUs.
            pub fn new() -> Self {
                let allowed = match sched_getaffinity(Pid::from_raw(0)) {
                    Ok(set) => (0..CpuSet::count())
                        .filter(|&cpu| set.is_set(cpu).unwrap_or(false))
                        .collect(),
                    Err(_) => Vec::new(),
                };
                Self { allowed }
            }

            /// CPUs available for pinning
            pub fn allowed(&self) -> &[usize] {
                &self.allowed
            }

            /// CPU that `ordinal` maps to
            pub fn cpu_for(&self, ordinal: usize) -> Option<usize> {
                if self.allowed.is_empty() {
                    return None;
                }
                Some(self.allowed[ordinal % self.allowed.len()])
            }
        }

        impl Default for LinuxAffinity {
            fn default() -> Self {
                Self::new()
            }
        }

        impl CpuAffinity for LinuxAffinity {
            fn pin_current(&self, ordinal: usize) -> Result<(), AffinityError> {
                let cpu = self.cpu_for(ordinal).ok_or(AffinityError::Unsupported)?;
                let mut set = CpuSet::new();
                set.set(cpu)
                    .map_err(|e| AffinityError::Rejected { cpu, errno: e as i32 })?;
                sched_setaffinity(Pid::from_raw(0), &set)
                    .map_err(|e| AffinityError::Rejected { cpu, errno: e as i32 })
            }

            fn name(&self) -> &'static str {
                "sched_setaffinity"
            }
        }

        /// Affinity control for reactor workers
        pub fn platform_affinity(pin: bool) -> Box<dyn CpuAffinity> {
            if pin {
                Box::new(LinuxAffinity::new())
            } else {
                Box::new(NoAffinity)
            }
        }
    } else {
        /// Affinity control for reactor workers
        pub fn platform_affinity(_pin: bool) -> Box<dyn CpuAffinity> {
            Box::new(NoAffinity)
        }
    }
}
