//! Identifier helpers.
//!
//! Audit rows and correlation ids use UUIDv7 so they sort by creation time;
//! accounts keep random v4 ids.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}

/// Correlation id tying a request's gate decision, handler outcome and audit
/// rows together.
pub fn correlation_id() -> Uuid {
    uuidv7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_are_v7_and_ordered() {
        let a = correlation_id();
        let b = correlation_id();
        assert_eq!(a.get_version(), Some(uuid::Version::SortRand));
        assert!(b >= a);
    }
}
