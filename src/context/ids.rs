//! Identifier generation.
//!
//! Correlation ids are UUID v4 strings. Trace ids are 128-bit and span ids
//! 64-bit lowercase hex, matching what Jaeger-style viewers expect.

use uuid::Uuid;

pub fn correlation_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn span_id() -> String {
    // All-zero span ids are invalid in most trace viewers.
    let mut id = fastrand::u64(..);
    while id == 0 {
        id = fastrand::u64(..);
    }
    format!("{:016x}", id)
}
