use std::time::Instant;

use chrono::Utc;
use tracing::info;

/// Wraps an outbound request with start/finish records on the dedicated
/// timing target, independent of the call's own error type.
pub async fn log_request_timing<T, E, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    info!(
        target: "studio.timing",
        "event=request provider={} model={} operation={} started_at={}",
        provider,
        model,
        operation,
        started_at.to_rfc3339()
    );

    let result = call().await;
    let status = if result.is_ok() { "success" } else { "error" };

    let completed_at = Utc::now();
    let duration = started_perf.elapsed().as_secs_f64();
    info!(
        target: "studio.timing",
        "event=response provider={} model={} operation={} completed_at={} duration_s={:.3} status={}",
        provider,
        model,
        operation,
        completed_at.to_rfc3339(),
        duration,
        status
    );

    result
}
