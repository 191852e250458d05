//! Error types for gator.

use thiserror::Error;

use crate::config::ConfigError;
use crate::dates::DateParseError;
use crate::db::StoreError;
use crate::fetcher::FetchError;

#[derive(Error, Debug)]
pub enum Error {
    /// The scheduler found no feed to fetch.
    #[error("no feeds to fetch")]
    NoFeeds,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] DateParseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A command was given arguments it cannot use.
    #[error("{0}")]
    Usage(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Store(StoreError::NotFound(_)))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::Store(StoreError::Duplicate(_)))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_feeds_display() {
        assert_eq!(Error::NoFeeds.to_string(), "no feeds to fetch");
    }

    #[test]
    fn test_store_errors_are_transparent() {
        let err: Error = StoreError::NotFound("user \"bob\"".to_string()).into();
        assert_eq!(err.to_string(), "user \"bob\" not found");
        assert!(err.is_not_found());
        assert!(!err.is_duplicate());
    }

    #[test]
    fn test_duplicate_classification() {
        let err: Error = StoreError::Duplicate("feed https://a.example.com".to_string()).into();
        assert!(err.is_duplicate());
        assert_eq!(err.to_string(), "feed https://a.example.com already exists");
    }

    #[test]
    fn test_fetch_error_conversion() {
        let err: Error = FetchError::Cancelled.into();
        assert!(matches!(err, Error::Fetch(FetchError::Cancelled)));
    }
}
