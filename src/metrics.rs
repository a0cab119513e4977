use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Histogram, register_counter, register_counter_vec, register_histogram,
};

lazy_static! {
    pub static ref DECISIONS_TOTAL: CounterVec = register_counter_vec!(
        "token_gate_decisions_total",
        "Gate decisions by outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref STORE_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "token_gate_store_errors_total",
        "Token store failures by kind",
        &["kind"]
    )
    .unwrap();
    pub static ref VALIDATION_LATENCY: Histogram = register_histogram!(
        "token_gate_validation_latency_seconds",
        "Time spent validating a token against the store"
    )
    .unwrap();
    pub static ref UPSTREAM_REQUESTS: Counter = register_counter!(
        "token_gate_upstream_requests_total",
        "Requests forwarded upstream"
    )
    .unwrap();
    pub static ref UPSTREAM_FAILURES: Counter = register_counter!(
        "token_gate_upstream_failures_total",
        "Forwarded requests that failed"
    )
    .unwrap();
}
