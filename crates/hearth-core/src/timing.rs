use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Time an operation at the call site, returning its result alongside the
/// elapsed duration. Explicit wrapping instead of cross-cutting
/// instrumentation: the caller decides what is worth measuring.
pub async fn timed<T, F>(label: &str, operation: F) -> (T, Duration)
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let value = operation.await;
    let elapsed = start.elapsed();
    debug!(label, elapsed_ms = elapsed.as_millis() as u64, "timed operation");
    (value, elapsed)
}

/// Synchronous variant for pure computations.
pub fn timed_sync<T>(label: &str, operation: impl FnOnce() -> T) -> (T, Duration) {
    let start = Instant::now();
    let value = operation();
    let elapsed = start.elapsed();
    debug!(label, elapsed_ms = elapsed.as_millis() as u64, "timed operation");
    (value, elapsed)
}
