use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

/// Externally owned "time expired" flag.  The owner sets it; editors only
/// ever see it through a read-only [`LockSignal`].
///
/// Every engage is also counted, so an engage that is released again before
/// the editor next looks is still observed.
#[derive(Clone, Default)]
pub struct TimeLock {
    expired: Arc<AtomicBool>,
    engagements: Arc<AtomicU64>,
}

impl TimeLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_expired(&self, expired: bool) {
        if expired {
            self.engagements.fetch_add(1, Ordering::AcqRel);
        }
        self.expired.store(expired, Ordering::Release);
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    pub fn signal(&self) -> LockSignal {
        LockSignal {
            expired: Some(Arc::clone(&self.expired)),
            engagements: Some(Arc::clone(&self.engagements)),
        }
    }
}

/// Read-only view of a [`TimeLock`].  The default signal is never asserted.
#[derive(Clone, Default)]
pub struct LockSignal {
    expired: Option<Arc<AtomicBool>>,
    engagements: Option<Arc<AtomicU64>>,
}

impl LockSignal {
    pub fn is_expired(&self) -> bool {
        self.expired.as_ref().is_some_and(|f| f.load(Ordering::Acquire))
    }

    /// How many times the lock has been engaged so far.
    pub fn engagements(&self) -> u64 {
        self.engagements.as_ref().map_or(0, |n| n.load(Ordering::Acquire))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockTransition {
    Engaged,
    Released,
}

/// Edge detector over a [`LockSignal`].  Callers run [`sync`](Self::sync)
/// at the top of every mutating entry point, until it returns `None`, and
/// react only to transitions.
#[derive(Default)]
pub struct LockController {
    signal: LockSignal,
    engaged: bool,
    /// Engage count last seen on `signal`.
    seen: u64,
}

impl LockController {
    pub fn new(signal: LockSignal) -> Self {
        let seen = signal.engagements();
        Self { signal, engaged: false, seen }
    }

    /// Swap the observed signal; the next `sync` reports any resulting edge.
    pub fn observe(&mut self, signal: LockSignal) {
        self.seen = signal.engagements();
        self.signal = signal;
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    /// Next transition to react to.  An engage that was already released
    /// again is reported as `Engaged`, and the following call as `Released`.
    pub fn sync(&mut self) -> Option<LockTransition> {
        let count = self.signal.engagements();
        if count != self.seen {
            self.seen = count;
            if !self.engaged {
                self.engaged = true;
                return Some(LockTransition::Engaged);
            }
        }
        let now = self.signal.is_expired();
        if now == self.engaged {
            return None;
        }
        self.engaged = now;
        Some(if now { LockTransition::Engaged } else { LockTransition::Released })
    }
}
