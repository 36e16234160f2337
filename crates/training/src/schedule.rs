//! Piecewise-constant learning-rate schedule keyed to epoch position.

/// Fractional position of a 1-based epoch within the configured total.
pub fn epoch_fraction(epoch: usize, total_epochs: usize) -> f64 {
    (epoch.saturating_sub(1)) as f64 / total_epochs.max(1) as f64
}

/// Rate divisors {1, 10, 100, 1000} at fraction thresholds
/// {0%, 40%, 70%, 90%} of the run.
pub fn schedule_rate(base: f64, fraction: f64) -> f64 {
    if fraction < 0.40 {
        base
    } else if fraction < 0.70 {
        base / 10.0
    } else if fraction < 0.90 {
        base / 100.0
    } else {
        base / 1000.0
    }
}
