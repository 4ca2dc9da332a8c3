//! Unified error handling for the onair crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while maintaining the ability to use
//! domain-specific errors when needed.
//!
//! # Architecture
//!
//! - [`OnairErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use onair::error::{Error, OnairErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Will retry ({})", err.category());
//!     } else {
//!         eprintln!("Fatal error: {}", err);
//!     }
//! }
//! ```

use std::fmt;

use thiserror::Error;

pub use crate::feed::FeedError;
pub use crate::scheduler::error::SchedulerError;
pub use crate::storage::StoreError;

/// Common trait for all onair error types
pub trait OnairErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Feed fetches and other HTTP traffic
    Network,
    /// Malformed feed documents and JSON
    Parsing,
    /// Store and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Scheduler lifecycle errors
    Scheduler,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Parsing => "parsing",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
        };
        f.write_str(name)
    }
}

impl OnairErrorTrait for SchedulerError {
    fn is_recoverable(&self) -> bool {
        SchedulerError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::FeedUnavailable { .. } => ErrorCategory::Network,
            Self::Persistence { .. } | Self::WriteConflict { .. } => ErrorCategory::Storage,
            Self::EmptyFeed { .. }
            | Self::TimelineOverflow { .. }
            | Self::ChannelEnumeration { .. } => ErrorCategory::Scheduler,
        }
    }
}

impl OnairErrorTrait for FeedError {
    fn is_recoverable(&self) -> bool {
        self.is_transient()
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Unavailable { .. } => ErrorCategory::Network,
            Self::Malformed { .. } => ErrorCategory::Parsing,
            Self::NoSources(_) => ErrorCategory::Config,
        }
    }
}

impl OnairErrorTrait for StoreError {
    fn is_recoverable(&self) -> bool {
        self.is_retryable()
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }
}

/// Unified error type for the onair crate
#[derive(Error, Debug)]
pub enum Error {
    /// Scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Feed source errors
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    /// Store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl OnairErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Scheduler(e) => OnairErrorTrait::is_recoverable(e),
            Self::Feed(e) => e.is_recoverable(),
            Self::Store(e) => e.is_recoverable(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Scheduler(e) => e.category(),
            Self::Feed(e) => e.category(),
            Self::Store(e) => e.category(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelId;

    #[test]
    fn test_error_category() {
        let err = Error::Feed(FeedError::unavailable("https://x", "timeout"));
        assert_eq!(err.category(), ErrorCategory::Network);

        let err = Error::Scheduler(SchedulerError::persistence(&ChannelId::from("a"), "down"));
        assert_eq!(err.category(), ErrorCategory::Storage);
        assert_eq!(err.category().to_string(), "storage");
    }

    #[test]
    fn test_is_recoverable() {
        let err: Error = SchedulerError::empty_feed(&ChannelId::from("a")).into();
        assert!(err.is_recoverable());

        let err: Error = StoreError::Conflict {
            channel_id: ChannelId::from("a"),
            sequence: 3,
        }
        .into();
        assert!(!err.is_recoverable());

        let err: Error = StoreError::unavailable("connection reset").into();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_timeline_overflow_is_scheduler_category() {
        let err: Error = SchedulerError::timeline_overflow(&ChannelId::from("a"), "ep").into();
        assert_eq!(err.category(), ErrorCategory::Scheduler);
    }
}
