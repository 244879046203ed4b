#![allow(missing_docs)] // lazy_static items dont play nicely with docstrings

//! # metrics
//!
//! contains statistics for server metrics
use std::time::Instant;

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, IntGauge, register_int_counter_vec, register_int_gauge};

/// label for a request that completed with a 2xx status
pub const OUTCOME_OK: &str = "ok";
/// label for a 4xx response
pub const OUTCOME_CLIENT_ERROR: &str = "client_error";
/// label for a 5xx response
pub const OUTCOME_SERVER_ERROR: &str = "server_error";

lazy_static! {
    /// When the server started
    pub static ref START_TIME: Instant = Instant::now();

    /// server uptime (seconds)
    pub static ref UPTIME: IntGauge = register_int_gauge!("uptime", "server uptime (seconds)").unwrap();

    /// count of handled api requests by operation & outcome
    pub static ref HTTP_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "item_requests",
        "item api requests by operation and outcome",
        &["operation", "outcome"]
    )
    .unwrap();

    /// # of items currently held by the store
    pub static ref ITEMS_TOTAL: IntGauge =
        register_int_gauge!("items_total", "count of items currently stored").unwrap();
}

/// bump the request counter for `operation` with the outcome class of `status`
pub fn record_request(operation: &str, status: u16) {
    let outcome = match status {
        500..=u16::MAX => OUTCOME_SERVER_ERROR,
        400..=499 => OUTCOME_CLIENT_ERROR,
        _ => OUTCOME_OK,
    };
    HTTP_REQUESTS
        .with_label_values(&[operation, outcome])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_classes() {
        let before = HTTP_REQUESTS
            .with_label_values(&["metrics_test", OUTCOME_CLIENT_ERROR])
            .get();
        record_request("metrics_test", 404);
        record_request("metrics_test", 400);
        record_request("metrics_test", 201);
        assert_eq!(
            HTTP_REQUESTS
                .with_label_values(&["metrics_test", OUTCOME_CLIENT_ERROR])
                .get(),
            before + 2
        );
        assert!(
            HTTP_REQUESTS
                .with_label_values(&["metrics_test", OUTCOME_OK])
                .get()
                >= 1
        );
    }
}
