//! Single-use guard shared by release handles and completion callbacks.

use std::sync::atomic::{AtomicBool, Ordering};

/// Lets exactly one caller through, no matter how many times it is tried.
#[derive(Debug, Default)]
pub struct Once {
    fired: AtomicBool,
}

impl Once {
    /// Creates an unfired guard.
    pub const fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
        }
    }

    /// Returns `true` for the first call only.
    pub fn fire(&self) -> bool {
        self.fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether [`fire`](Self::fire) already succeeded.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fires_only_once() {
        let once = Once::new();
        assert!(!once.has_fired());
        assert!(once.fire());
        assert!(!once.fire());
        assert!(once.has_fired());
    }

    #[test]
    fn only_one_thread_wins() {
        let once = Arc::new(Once::new());
        let winners: usize = (0..8)
            .map(|_| {
                let once = Arc::clone(&once);
                std::thread::spawn(move || once.fire())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
    }
}
