//! Monotonic millisecond timestamps on a fixed-width wrapping counter.
//!
//! The clock is a u32 counter of milliseconds since boot, so it overflows
//! after ~49.7 days of uptime. All age arithmetic wraps: when `now` has
//! overflowed past an older timestamp, the elapsed time is still correct.

/// A point on the monotonic millisecond clock.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub struct Millis(u32);

impl Millis {
    pub const fn new(value: u32) -> Self {
        Millis(value)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Elapsed milliseconds since `earlier`. Wrapping subtraction: valid
    /// even when the counter overflowed between `earlier` and `self`.
    pub fn elapsed_since(self, earlier: Millis) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// The point `ms` milliseconds after `self`, modulo the counter width.
    pub fn wrapping_add(self, ms: u32) -> Millis {
        Millis(self.0.wrapping_add(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_without_overflow() {
        let earlier = Millis::new(10_000);
        let now = Millis::new(17_500);
        assert_eq!(now.elapsed_since(earlier), 7_500);
    }

    #[test]
    fn elapsed_across_overflow() {
        // Timestamp just before the counter maximum, now just after wrap.
        let earlier = Millis::new(u32::MAX - 999);
        let now = Millis::new(2_000);
        assert_eq!(now.elapsed_since(earlier), 3_000);
    }

    #[test]
    fn elapsed_zero() {
        let t = Millis::new(42);
        assert_eq!(t.elapsed_since(t), 0);
    }

    #[test]
    fn wrapping_add_wraps() {
        let t = Millis::new(u32::MAX);
        assert_eq!(t.wrapping_add(1).value(), 0);
    }
}
