//! Validity flag for the engine's tools cache

use std::sync::atomic::{AtomicU64, Ordering};

const VALID: u64 = 1;

/// Lock-free "may use cached tools" flag.
///
/// The flag and an invalidation epoch share one atomic word
/// (`epoch << 1 | valid`). File watchers call [`invalidate`](Self::invalidate);
/// a request takes a [`snapshot`](Self::snapshot) before the engine runs and
/// may [`revalidate`](Self::revalidate) afterwards, which only succeeds if
/// nothing was invalidated in between.
#[derive(Debug, Default)]
pub struct CacheValidity {
    state: AtomicU64,
}

impl CacheValidity {
    /// Start out invalid: nothing has been cached yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current `(valid, epoch)` pair.
    pub fn snapshot(&self) -> (bool, u64) {
        let state = self.state.load(Ordering::Acquire);
        (state & VALID == VALID, state >> 1)
    }

    /// Whether cached tools may be used right now.
    pub fn is_valid(&self) -> bool {
        self.snapshot().0
    }

    /// Clear the flag and start a new epoch.
    ///
    /// Returns `true` if the flag was set before this call.
    pub fn invalidate(&self) -> bool {
        let previous = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                Some(((state >> 1) + 1) << 1)
            })
            .unwrap_or_else(|state| state);
        previous & VALID == VALID
    }

    /// Set the flag, unless the epoch moved on since `epoch` was observed.
    ///
    /// Returns `true` if the flag is now set.
    pub fn revalidate(&self, epoch: u64) -> bool {
        let expected = epoch << 1;
        match self.state.compare_exchange(
            expected,
            expected | VALID,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(current) => current == expected | VALID,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_invalid() {
        let validity = CacheValidity::new();
        assert_eq!(validity.snapshot(), (false, 0));
    }

    #[test]
    fn test_revalidate_then_invalidate() {
        let validity = CacheValidity::new();
        assert!(validity.revalidate(0));
        assert!(validity.is_valid());

        assert!(validity.invalidate(), "first invalidation sees the flag set");
        assert!(!validity.invalidate(), "second one finds it already cleared");
        assert_eq!(validity.snapshot(), (false, 2));
    }

    #[test]
    fn test_revalidate_with_stale_epoch_fails() {
        let validity = CacheValidity::new();
        let (_, epoch) = validity.snapshot();

        // A file changed while the build was running
        validity.invalidate();

        assert!(!validity.revalidate(epoch));
        assert!(!validity.is_valid());

        let (_, epoch) = validity.snapshot();
        assert!(validity.revalidate(epoch));
    }

    #[test]
    fn test_revalidate_is_idempotent() {
        let validity = CacheValidity::new();
        assert!(validity.revalidate(0));
        assert!(validity.revalidate(0));
        assert_eq!(validity.snapshot(), (true, 0));
    }
}
