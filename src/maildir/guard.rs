use crate::error::{Result, StoreError};

/// Checks an externally supplied message filename before it is joined
/// onto any store path.
pub fn validate(name: &str) -> Result<&str> {
    let reason = if name.is_empty() {
        Some("empty")
    } else if name.contains('/') || name.contains('\\') {
        Some("path separator")
    } else if name.contains("..") {
        Some("parent reference")
    } else if name.contains('\0') {
        Some("null byte")
    } else if name.starts_with('.') {
        Some("hidden name")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidIdentifier(format!("{} ({})", name.escape_debug(), reason))),
        None => Ok(name),
    }
}
