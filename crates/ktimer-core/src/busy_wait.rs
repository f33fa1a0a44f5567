//! Calibrated spin delay for waits shorter than a tick.

use std::hint::black_box;

/// Iterate a trivial loop `loops` times. Non-positive counts return at once.
///
/// Never inlined: code alignment changes the cost of an iteration, and the
/// calibration is only valid if every caller runs the same machine code.
#[inline(never)]
pub fn busy_wait(loops: i64) {
    let mut remaining = loops;
    while remaining > 0 {
        remaining = black_box(remaining) - 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_nonpositive_is_noop() {
        busy_wait(0);
        busy_wait(-100);
    }

    #[test]
    #[ignore = "Timing test - wall-clock comparison"]
    fn test_cost_grows_with_count() {
        // Warm up, then compare a short and a much longer run.
        busy_wait(10_000);

        let start = Instant::now();
        busy_wait(1_000);
        let short = start.elapsed();

        let start = Instant::now();
        busy_wait(10_000_000);
        let long = start.elapsed();

        assert!(long > short);
    }
}
