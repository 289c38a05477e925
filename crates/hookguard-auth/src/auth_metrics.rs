//! Guard metrics for observability
//!
//! Enable with the `metrics` feature flag. Requires a `metrics` recorder
//! to be installed (e.g., via `metrics-exporter-prometheus`).
//!
//! ## Metrics Provided
//!
//! - `hookguard_tokens_issued_total` - Counter for issued tokens (labels: kind)
//! - `hookguard_token_validations_total` - Counter for validations (labels: outcome)
//! - `hookguard_rate_limited_total` - Counter for denied admissions (labels: key_type)
//! - `hookguard_oauth_exchanges_total` - Counter for provider exchanges (labels: outcome)

#[cfg(feature = "metrics")]
use ::metrics::{counter, describe_counter};

#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static INIT: Once = Once::new();

/// Initialize metric descriptions. Call once at startup.
///
/// Idempotent; only the first call registers descriptions.
#[cfg(feature = "metrics")]
pub fn init_metrics() {
    INIT.call_once(|| {
        describe_counter!("hookguard_tokens_issued_total", "Total tokens issued");
        describe_counter!(
            "hookguard_token_validations_total",
            "Total bearer token validations by outcome"
        );
        describe_counter!(
            "hookguard_rate_limited_total",
            "Total requests denied by the rate limiter"
        );
        describe_counter!(
            "hookguard_oauth_exchanges_total",
            "Total authorization code exchanges by outcome"
        );
    });
}

#[cfg(feature = "metrics")]
pub(crate) fn record_token_issued(kind: &'static str) {
    counter!("hookguard_tokens_issued_total", "kind" => kind).increment(1);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_validation(outcome: &'static str) {
    counter!("hookguard_token_validations_total", "outcome" => outcome).increment(1);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_rate_limited(key_type: &str) {
    counter!(
        "hookguard_rate_limited_total",
        "key_type" => key_type.to_owned()
    )
    .increment(1);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_exchange(outcome: &'static str) {
    counter!("hookguard_oauth_exchanges_total", "outcome" => outcome).increment(1);
}

// No-op versions when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
#[allow(missing_docs)]
pub fn init_metrics() {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_token_issued(_kind: &'static str) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_validation(_outcome: &'static str) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_rate_limited(_key_type: &str) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_exchange(_outcome: &'static str) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_idempotent() {
        init_metrics();
        init_metrics();
    }

    #[test]
    fn test_recorders_do_not_panic() {
        record_token_issued("access");
        record_validation("expired");
        record_rate_limited("ip");
        record_exchange("success");
    }
}
