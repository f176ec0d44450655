use std::time::Duration;
use tracing::trace;

// Trace-based counters; the Prometheus recorder is rendered at /metrics.

pub fn inc_requests(route: &'static str) {
    trace!(
        target: "chatbay.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn group_elapsed(index: usize, attempts: u32, elapsed_ms: u128) {
    trace!(
        target: "chatbay.metrics",
        group = index,
        attempts = attempts,
        elapsed_ms = elapsed_ms as u64,
        "group_elapsed"
    );
}

pub fn retry_scheduled(attempt: u32, wait: Duration) {
    trace!(
        target: "chatbay.metrics",
        attempt = attempt,
        wait_ms = wait.as_millis() as u64,
        "vision_retry_scheduled"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target: "chatbay.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}
