//! Request ID generation for API request tracing.

use uuid::Uuid;

/// Response header carrying the ID assigned to an API request.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generate a new request ID (UUID v4).
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}
