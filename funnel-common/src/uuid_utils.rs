//! UUID utilities

use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Random per-tab session token
pub fn new_session_id() -> String {
    generate().to_string()
}
