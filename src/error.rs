//! Error types for cache operations.

use std::fmt;

/// Errors that can occur during cache operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// Every slot in the pool is referenced, so nothing can be recycled.
    /// The pool is statically sized and there is no wait-for-free-slot
    /// path; callers must treat this as unrecoverable.
    Exhausted,

    /// The disk backend failed a block read or write. Backend failures are
    /// opaque to the cache and never retried.
    Device,

    /// The cache was configured with a zero slot count, bucket count, or
    /// block size.
    InvalidConfig,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "no evictable slot in the pool"),
            Self::Device => write!(f, "disk backend error"),
            Self::InvalidConfig => write!(f, "invalid cache configuration"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_all_variants() {
        assert_eq!(
            format!("{}", CacheError::Exhausted),
            "no evictable slot in the pool"
        );
        assert_eq!(format!("{}", CacheError::Device), "disk backend error");
        assert_eq!(
            format!("{}", CacheError::InvalidConfig),
            "invalid cache configuration"
        );
    }

    #[test]
    fn test_error_is_error_trait() {
        fn assert_error<E: std::error::Error>() {}
        assert_error::<CacheError>();
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(CacheError::Exhausted, CacheError::Exhausted);
        assert_ne!(CacheError::Exhausted, CacheError::Device);
    }
}
