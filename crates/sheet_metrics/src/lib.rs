//! Thin `prometheus`-backed counters/gauges/histograms, one module per
//! pipeline component. Call sites reach for a named helper function rather
//! than touching a `prometheus::Registry` directly.

use std::sync::LazyLock;

use prometheus::{
    register_histogram_vec,
    register_int_counter_vec,
    register_int_gauge_vec,
    HistogramVec,
    IntCounterVec,
    IntGaugeVec,
};

macro_rules! counter {
    ($name:ident, $metric:literal, $help:literal, $labels:expr) => {
        static $name: LazyLock<IntCounterVec> =
            LazyLock::new(|| register_int_counter_vec!($metric, $help, $labels).unwrap());
    };
}

macro_rules! gauge {
    ($name:ident, $metric:literal, $help:literal, $labels:expr) => {
        static $name: LazyLock<IntGaugeVec> =
            LazyLock::new(|| register_int_gauge_vec!($metric, $help, $labels).unwrap());
    };
}

macro_rules! histogram {
    ($name:ident, $metric:literal, $help:literal, $labels:expr) => {
        static $name: LazyLock<HistogramVec> =
            LazyLock::new(|| register_histogram_vec!($metric, $help, $labels).unwrap());
    };
}

pub mod rate_limiter {
    use super::*;

    counter!(ACQUIRE_GRANTED, "rate_limiter_acquire_granted_total", "Grants issued by key kind", &["bucket_kind"]);
    counter!(ACQUIRE_DENIED, "rate_limiter_acquire_denied_total", "Denials by key kind", &["bucket_kind"]);

    pub fn log_granted(bucket_kind: &str) {
        ACQUIRE_GRANTED.with_label_values(&[bucket_kind]).inc();
    }

    pub fn log_denied(bucket_kind: &str) {
        ACQUIRE_DENIED.with_label_values(&[bucket_kind]).inc();
    }
}

pub mod circuit_breaker {
    use super::*;

    counter!(TRIPPED, "circuit_breaker_tripped_total", "Times a breaker opened", &["endpoint"]);
    counter!(REJECTED, "circuit_breaker_rejected_total", "Calls rejected while open", &["endpoint"]);
    counter!(RECOVERED, "circuit_breaker_recovered_total", "Times a breaker closed from half_open", &["endpoint"]);
    counter!(RETRY_ATTEMPT, "retry_attempt_total", "Retry attempts issued", &["endpoint"]);

    pub fn log_tripped(endpoint: &str) {
        TRIPPED.with_label_values(&[endpoint]).inc();
    }

    pub fn log_rejected(endpoint: &str) {
        REJECTED.with_label_values(&[endpoint]).inc();
    }

    pub fn log_recovered(endpoint: &str) {
        RECOVERED.with_label_values(&[endpoint]).inc();
    }

    pub fn log_retry_attempt(endpoint: &str) {
        RETRY_ATTEMPT.with_label_values(&[endpoint]).inc();
    }
}

pub mod dedup_merge {
    use super::*;

    counter!(DEDUP_HIT, "dedup_join_total", "Requests that joined an in-flight call", &["endpoint"]);
    counter!(DEDUP_MISS, "dedup_factory_total", "Requests that started a new factory call", &["endpoint"]);
    counter!(MERGED_REQUESTS, "merger_merged_requests_total", "Requests folded into a merged read", &["sheet"]);
    counter!(MERGER_API_CALLS, "merger_api_calls_total", "Remote calls issued by the merger", &["sheet"]);

    pub fn log_dedup_hit(endpoint: &str) {
        DEDUP_HIT.with_label_values(&[endpoint]).inc();
    }

    pub fn log_dedup_miss(endpoint: &str) {
        DEDUP_MISS.with_label_values(&[endpoint]).inc();
    }

    pub fn log_merged_requests(sheet: &str, n: u64) {
        MERGED_REQUESTS.with_label_values(&[sheet]).inc_by(n);
    }

    pub fn log_merger_api_call(sheet: &str) {
        MERGER_API_CALLS.with_label_values(&[sheet]).inc();
    }
}

pub mod transaction {
    use super::*;

    counter!(COMMITTED, "transaction_committed_total", "Transactions committed", &["isolation"]);
    counter!(ROLLED_BACK, "transaction_rolled_back_total", "Transactions rolled back", &["isolation"]);
    counter!(FAILED, "transaction_failed_total", "Transactions failed without rollback", &["isolation"]);
    gauge!(ACTIVE, "transaction_active", "Currently active transactions", &["documentId"]);

    pub fn log_committed(isolation: &str) {
        COMMITTED.with_label_values(&[isolation]).inc();
    }

    pub fn log_rolled_back(isolation: &str) {
        ROLLED_BACK.with_label_values(&[isolation]).inc();
    }

    pub fn log_failed(isolation: &str) {
        FAILED.with_label_values(&[isolation]).inc();
    }

    pub fn set_active(document_id: &str, count: i64) {
        ACTIVE.with_label_values(&[document_id]).set(count);
    }
}

pub mod snapshot {
    use super::*;

    counter!(CREATED, "snapshot_created_total", "Snapshots created by kind", &["kind"]);
    counter!(RESTORED, "snapshot_restored_total", "Snapshots restored", &["kind"]);
    counter!(GC, "snapshot_gc_total", "Snapshots garbage collected", &["reason"]);
    histogram!(PAYLOAD_BYTES, "snapshot_payload_bytes", "Snapshot payload size", &["kind"]);

    pub fn log_created(kind: &str, payload_bytes: u64) {
        CREATED.with_label_values(&[kind]).inc();
        PAYLOAD_BYTES.with_label_values(&[kind]).observe(payload_bytes as f64);
    }

    pub fn log_restored(kind: &str) {
        RESTORED.with_label_values(&[kind]).inc();
    }

    pub fn log_gc(reason: &str) {
        GC.with_label_values(&[reason]).inc();
    }
}

pub mod batch_compiler {
    use super::*;

    counter!(CALLS_ISSUED, "batch_calls_issued_total", "Remote calls issued by the compiler", &["endpoint_family"]);
    counter!(VERIFY_MISMATCH, "batch_verify_mismatch_total", "Post-write verification mismatches", &["endpoint_family"]);
    histogram!(MUTATIONS_PER_CALL, "batch_mutations_per_call", "Mutations folded into one call", &["endpoint_family"]);

    pub fn log_call_issued(endpoint_family: &str, mutation_count: usize) {
        CALLS_ISSUED.with_label_values(&[endpoint_family]).inc();
        MUTATIONS_PER_CALL
            .with_label_values(&[endpoint_family])
            .observe(mutation_count as f64);
    }

    pub fn log_verify_mismatch(endpoint_family: &str) {
        VERIFY_MISMATCH.with_label_values(&[endpoint_family]).inc();
    }
}

pub mod session_store {
    use super::*;

    gauge!(SESSIONS_ACTIVE, "sessions_active", "Currently tracked sessions", &["_unused"]);
    counter!(SESSIONS_EVICTED, "sessions_evicted_total", "Sessions evicted for exceeding per-user cap", &["_unused"]);
    counter!(TASKS_CREATED, "tasks_created_total", "Tasks created", &["_unused"]);
    counter!(TASKS_CANCELLED, "tasks_cancelled_total", "Tasks cancelled", &["_unused"]);
    counter!(EVENTS_APPENDED, "events_appended_total", "Events appended to a stream", &["_unused"]);
    counter!(EVENTS_EVICTED, "events_evicted_total", "Events evicted for exceeding bounds", &["reason"]);

    pub fn set_sessions_active(count: i64) {
        SESSIONS_ACTIVE.with_label_values(&["_"]).set(count);
    }

    pub fn log_session_evicted() {
        SESSIONS_EVICTED.with_label_values(&["_"]).inc();
    }

    pub fn log_task_created() {
        TASKS_CREATED.with_label_values(&["_"]).inc();
    }

    pub fn log_task_cancelled() {
        TASKS_CANCELLED.with_label_values(&["_"]).inc();
    }

    pub fn log_event_appended() {
        EVENTS_APPENDED.with_label_values(&["_"]).inc();
    }

    pub fn log_event_evicted(reason: &str) {
        EVENTS_EVICTED.with_label_values(&[reason]).inc();
    }
}

pub mod impact_analyzer {
    use super::*;

    counter!(ANALYZED, "impact_analyzed_total", "Impact analyses run, by severity", &["severity"]);
    gauge!(GRAPH_CACHE_SIZE, "dependency_graph_cache_size", "Cached dependency graphs", &["_unused"]);

    pub fn log_analyzed(severity: &str) {
        ANALYZED.with_label_values(&[severity]).inc();
    }

    pub fn set_graph_cache_size(count: i64) {
        GRAPH_CACHE_SIZE.with_label_values(&["_"]).set(count);
    }
}

pub mod audit {
    use super::*;

    counter!(RECORDED, "audit_recorded_total", "Audit events recorded, by outcome", &["outcome"]);
    counter!(SINK_FAILURES, "audit_sink_failures_total", "Failures writing to the audit sink", &["_unused"]);
    counter!(RBAC_DENIED, "rbac_denied_total", "RBAC checks that denied an action", &["role"]);

    pub fn log_recorded(outcome: &str) {
        RECORDED.with_label_values(&[outcome]).inc();
    }

    pub fn log_sink_failure() {
        SINK_FAILURES.with_label_values(&["_"]).inc();
    }

    pub fn log_rbac_denied(role: &str) {
        RBAC_DENIED.with_label_values(&[role]).inc();
    }
}

pub mod access_pattern {
    use super::*;

    counter!(ACCESSES_RECORDED, "access_pattern_accesses_recorded_total", "Accesses recorded into the sliding window", &["_unused"]);
    counter!(PATTERNS_DETECTED, "access_pattern_patterns_detected_total", "New repeated subsequences promoted to patterns", &["length"]);
    counter!(PATTERNS_EVICTED, "access_pattern_patterns_evicted_total", "Patterns evicted for aging out", &["_unused"]);
    counter!(PREDICTIONS_EMITTED, "access_pattern_predictions_emitted_total", "Predictions emitted, by strategy", &["strategy"]);

    pub fn log_access_recorded() {
        ACCESSES_RECORDED.with_label_values(&["_"]).inc();
    }

    pub fn log_pattern_detected(length: usize) {
        PATTERNS_DETECTED.with_label_values(&[&length.to_string()]).inc();
    }

    pub fn log_pattern_evicted() {
        PATTERNS_EVICTED.with_label_values(&["_"]).inc();
    }

    pub fn log_prediction_emitted(strategy: &str) {
        PREDICTIONS_EMITTED.with_label_values(&[strategy]).inc();
    }
}
