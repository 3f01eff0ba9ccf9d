//! Error types for capacity changes
//!
//! Empty and full queues are not errors: they are reported as `None` or as
//! the rejected value handed back in `Err`. The only request a queue can
//! refuse is a capacity change.

use thiserror::Error;

/// A rejected `set_capacity` request
///
/// The queue is left exactly as it was when one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CapacityError {
    /// The requested capacity is larger than the storage reserved at compile time.
    #[error("requested capacity {requested} exceeds the maximum capacity {max}")]
    ExceedsMaximum { requested: usize, max: usize },
    /// Another thread is resizing the same queue right now.
    #[error("another capacity change is already in progress")]
    ResizeInProgress,
    /// The queue holds more elements than a resize can carry over.
    #[error("queue holds {size} elements, too many to keep across the resize")]
    NotEmpty { size: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_limits() {
        let err = CapacityError::ExceedsMaximum { requested: 11, max: 10 };
        assert_eq!(
            err.to_string(),
            "requested capacity 11 exceeds the maximum capacity 10"
        );
        assert_eq!(
            CapacityError::NotEmpty { size: 3 }.to_string(),
            "queue holds 3 elements, too many to keep across the resize"
        );
    }
}
