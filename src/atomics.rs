//! Atomic cells used on the observe path.
//!
//! Counters, gauges, and histograms are updated with plain atomic operations
//! or short CAS loops over a 64-bit bit pattern, so observers never suspend
//! each other. We always require an atomic integer of that size regardless of
//! whether the standard library exposes one for the target architecture.

use std::sync::atomic::Ordering;

#[cfg(target_pointer_width = "32")]
pub use portable_atomic::AtomicU64;
#[cfg(not(target_pointer_width = "32"))]
pub use std::sync::atomic::AtomicU64;

/// A lock-free IEEE-754 double cell.
///
/// The value is stored as its bit pattern inside an [`AtomicU64`]. `add`,
/// `max_to`, and `min_to` are CAS loops over that pattern: they retry on
/// contention but never block, which keeps `inc`/`observe` in the nanosecond
/// range even with many observer threads.
#[derive(Debug, Default)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    /// Creates a new cell holding `value`.
    pub fn new(value: f64) -> Self {
        Self { bits: AtomicU64::new(value.to_bits()) }
    }

    /// Loads the current value.
    pub fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Stores `value`, replacing whatever was there.
    pub fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// Adds `delta` to the current value.
    pub fn add(&self, delta: f64) {
        let _ = self.bits.fetch_update(Ordering::AcqRel, Ordering::Relaxed, |curr| {
            let output = f64::from_bits(curr) + delta;
            Some(output.to_bits())
        });
    }

    /// Sets the cell to `value` iff `value` is greater than the current value.
    pub fn max_to(&self, value: f64) {
        let _ = self.bits.fetch_update(Ordering::AcqRel, Ordering::Relaxed, |curr| {
            if value > f64::from_bits(curr) {
                Some(value.to_bits())
            } else {
                None
            }
        });
    }

    /// Sets the cell to `value` iff `value` is smaller than the current value.
    pub fn min_to(&self, value: f64) {
        let _ = self.bits.fetch_update(Ordering::AcqRel, Ordering::Relaxed, |curr| {
            if value < f64::from_bits(curr) {
                Some(value.to_bits())
            } else {
                None
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::AtomicF64;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_load_store() {
        let cell = AtomicF64::new(0.0);
        assert_eq!(cell.load(), 0.0);

        cell.store(-3.14);
        assert_eq!(cell.load(), -3.14);

        cell.store(f64::INFINITY);
        assert_eq!(cell.load(), f64::INFINITY);
    }

    #[test]
    fn test_add() {
        let cell = AtomicF64::new(1.0);
        cell.add(3.2);
        assert_eq!(cell.load(), 4.2);
        cell.add(-0.2);
        assert_eq!(cell.load(), 4.0);
    }

    #[test]
    fn test_max_to() {
        let cell = AtomicF64::new(100.0);
        cell.max_to(10.0);
        assert_eq!(cell.load(), 100.0);
        cell.max_to(100.0);
        assert_eq!(cell.load(), 100.0);
        cell.max_to(101.5);
        assert_eq!(cell.load(), 101.5);
    }

    #[test]
    fn test_min_to() {
        let cell = AtomicF64::new(100.0);
        cell.min_to(500.0);
        assert_eq!(cell.load(), 100.0);
        cell.min_to(100.0);
        assert_eq!(cell.load(), 100.0);
        cell.min_to(99.0);
        assert_eq!(cell.load(), 99.0);
    }

    #[test]
    fn test_concurrent_add() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 10_000;

        let cell = Arc::new(AtomicF64::new(0.0));
        let handles = (0..THREADS)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    for _ in 0..PER_THREAD {
                        cell.add(1.0);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().expect("observer thread panicked");
        }

        assert_eq!(cell.load(), (THREADS * PER_THREAD) as f64);
    }
}
