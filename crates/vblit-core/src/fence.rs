use std::fmt;

/// Completion token returned by a composition call.
///
/// Wraps a pointer-sized GPU sync handle; zero means the work has already
/// completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fence(usize);

impl Fence {
    pub const NULL: Fence = Fence(0);

    pub const fn from_raw(raw: usize) -> Self {
        Fence(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "fence(null)")
        } else {
            write!(f, "fence({:#x})", self.0)
        }
    }
}

/// Outcome of a CPU-side fence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    AlreadySignaled,
    ConditionSatisfied,
    TimeoutExpired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_fence() {
        assert!(Fence::NULL.is_null());
        assert!(Fence::default().is_null());
        assert!(!Fence::from_raw(0x10).is_null());
        assert_eq!(Fence::from_raw(0x10).to_string(), "fence(0x10)");
    }
}
