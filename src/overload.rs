use std::sync::atomic::{AtomicBool, Ordering};

/// Process-scoped detector for host overload.
///
/// A tracer configured to ignore overload never consults this.
pub trait OverloadDetector: Send + Sync {
    fn overloaded(&self) -> bool;
}

/// Detector for hosts without overload monitoring wired in.
#[derive(Debug, Default)]
pub struct NoOverload;

impl OverloadDetector for NoOverload {
    fn overloaded(&self) -> bool {
        false
    }
}

/// Shared boolean flag set by the embedding process.
#[derive(Debug, Default)]
pub struct OverloadFlag {
    flag: AtomicBool,
}

impl OverloadFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, overloaded: bool) {
        self.flag.store(overloaded, Ordering::Relaxed);
    }
}

impl OverloadDetector for OverloadFlag {
    fn overloaded(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
