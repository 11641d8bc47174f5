use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Method-name prefix a peer uses to answer a correlated request.
pub const RESPONSE_PREFIX: &str = "response_";

/// Field merged into request `args` to carry the correlation id.
pub const CORRELATION_FIELD: &str = "correlation_id";

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Unique identifier used to match a `send_and_receive` reply to its request.
///
/// Carried in-band inside the request `args`; the peer echoes it back as the
/// method name `response_<id>`.
///
/// # Format
///
/// `<millis since epoch>-<sequence>-<random>` in lowercase hex, for example
/// `18f3c2a1b40-2a-9c1e04d7`. The sequence is process-wide and monotonic, so
/// two ids generated by the same process never collide; the random fragment
/// separates processes that start in the same millisecond.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    // ---

    /// Generate a new unique correlation ID.
    pub fn generate() -> Self {
        // ---
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let random = Uuid::new_v4().simple().to_string();

        Self(format!("{millis:x}-{seq:x}-{}", &random[..8]))
    }

    /// Borrow the correlation ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Method name the peer must use when replying to this request.
    pub fn response_method(&self) -> String {
        format!("{RESPONSE_PREFIX}{}", self.0)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
