//! Channel addressing
//!
//! A logical session path `P` is reached through `P/subscribe` and
//! `P/publish`. Both sides strip the suffix to recover `P`.

pub const SUBSCRIBE_SUFFIX: &str = "/subscribe";
pub const PUBLISH_SUFFIX: &str = "/publish";

/// Recover the logical session path from a physical channel address.
///
/// Only one suffix is stripped; anything else is returned unchanged.
pub fn derive_logical_path(path: &str) -> &str {
    path.strip_suffix(SUBSCRIBE_SUFFIX)
        .or_else(|| path.strip_suffix(PUBLISH_SUFFIX))
        .unwrap_or(path)
}

pub fn subscribe_path(logical: &str) -> String {
    format!("{}{}", logical, SUBSCRIBE_SUFFIX)
}

pub fn publish_path(logical: &str) -> String {
    format!("{}{}", logical, PUBLISH_SUFFIX)
}
