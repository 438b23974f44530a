use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{opts, register_int_counter, Encoder, IntCounter, TextEncoder};

pub static PAYLOADS_STORED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "sigmap_payloads_stored_total",
        "Total number of payloads accepted and stored"
    ))
    .unwrap()
});

pub static PAYLOAD_FETCHES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "sigmap_payload_fetches_total",
        "Total number of payloads served by endpoint"
    ))
    .unwrap()
});

pub static SELF_HEAL_DELETES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "sigmap_self_heal_deletes_total",
        "Total number of stored entries deleted after failing read-path verification"
    ))
    .unwrap()
});

pub static REQUESTS_THROTTLED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "sigmap_requests_throttled_total",
        "Total number of requests refused by the concurrency throttle"
    ))
    .unwrap()
});

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
