use std::{sync::Arc, time::Instant};

use parking_lot::Mutex;

/// Monotonic millisecond clock.
///
/// All timing in the core (scheduler deadlines, executor delay deadlines,
/// de-dup timestamps) flows through one of these. The system clock is
/// anchored to an `Instant` taken at construction, so it never observes
/// wall-clock adjustment and never decreases. The manual variant is for
/// tests.
#[derive(Clone)]
pub struct Clock {
    inner: Arc<Inner>,
}

enum Inner {
    System { epoch: Instant },
    Manual { now_ms: Mutex<u64> },
}

impl Clock {
    /// Clock anchored to the process start.
    pub fn system() -> Self {
        Self {
            inner: Arc::new(Inner::System {
                epoch: Instant::now(),
            }),
        }
    }

    /// Manually advanced clock starting at `start_ms`.
    pub fn manual(start_ms: u64) -> Self {
        Self {
            inner: Arc::new(Inner::Manual {
                now_ms: Mutex::new(start_ms),
            }),
        }
    }

    /// Milliseconds since the clock's epoch. Strictly non-decreasing.
    pub fn now_ms(&self) -> u64 {
        match &*self.inner {
            Inner::System { epoch } => epoch.elapsed().as_millis() as u64,
            Inner::Manual { now_ms } => *now_ms.lock(),
        }
    }

    /// Advance a manual clock. No-op on the system clock.
    pub fn advance(&self, ms: u64) {
        if let Inner::Manual { now_ms } = &*self.inner {
            *now_ms.lock() += ms;
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}
