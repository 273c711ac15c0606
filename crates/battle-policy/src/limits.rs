use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{GuardError, Result};

#[derive(Debug)]
struct LimiterInner {
    active: AtomicUsize,
    max: usize,
}

/// Shared ceiling on concurrently allocated PTYs.
///
/// Clones share one counter; independent limiters do not interact, so tests can
/// create their own instead of touching process-wide state.
#[derive(Debug, Clone)]
pub struct PtyLimiter {
    inner: Arc<LimiterInner>,
}

impl PtyLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                active: AtomicUsize::new(0),
                max: max.max(1),
            }),
        }
    }

    /// Reserve one slot, failing when the ceiling is reached
    pub fn try_acquire(&self) -> Result<PtyPermit> {
        let mut current = self.inner.active.load(Ordering::Acquire);
        loop {
            if current >= self.inner.max {
                return Err(GuardError::ResourceLimitExceeded {
                    resource: "concurrent PTYs",
                    limit: self.inner.max,
                });
            }
            match self.inner.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(PtyPermit {
                        inner: Arc::clone(&self.inner),
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Number of permits currently held
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn max(&self) -> usize {
        self.inner.max
    }
}

/// One reserved PTY slot; released on drop
#[derive(Debug)]
pub struct PtyPermit {
    inner: Arc<LimiterInner>,
}

impl Drop for PtyPermit {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permits_are_bounded_and_released() {
        let limiter = PtyLimiter::new(2);
        let a = limiter.try_acquire().unwrap();
        let _b = limiter.try_acquire().unwrap();
        assert_eq!(limiter.active(), 2);
        assert!(matches!(
            limiter.try_acquire(),
            Err(GuardError::ResourceLimitExceeded { limit: 2, .. })
        ));

        drop(a);
        assert_eq!(limiter.active(), 1);
        assert!(limiter.try_acquire().is_ok());
    }

    #[test]
    fn test_independent_limiters_do_not_share_counts() {
        let first = PtyLimiter::new(1);
        let second = PtyLimiter::new(1);
        let _held = first.try_acquire().unwrap();
        assert!(second.try_acquire().is_ok());
        assert!(first.clone().try_acquire().is_err());
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_max() {
        let limiter = PtyLimiter::new(4);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || limiter.try_acquire().ok())
            })
            .collect();
        let permits: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(permits.len(), 4);
        assert_eq!(limiter.active(), 4);
    }
}
