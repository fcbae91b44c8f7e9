use std::time::{Duration, Instant};

/// Render a `Duration` with two decimals and an adaptive unit (`1.94ms`, `2.34s`).
pub fn fmt_duration(d: Duration) -> String {
    format!("{d:.2?}")
}

/// Warn when the time since `start` exceeds `threshold`.
pub fn log_if_slow(start: Instant, threshold: Duration, label: &str) {
    let elapsed = start.elapsed();
    if elapsed > threshold {
        tracing::warn!(
            duration = fmt_duration(elapsed),
            threshold = fmt_duration(threshold),
            "slow operation: {label}"
        );
    }
}

/// Split a comma-separated list, trimming blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
