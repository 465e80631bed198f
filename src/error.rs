//! Error taxonomy shared by the Catalog Store, Provider Adapter, and HLS
//! Fetcher boundaries. Everything else in the crate uses `anyhow::Result`.

use thiserror::Error;

/// The error kinds the core distinguishes, independent of which component
/// raised them. Callers (the Scheduler, the Reconciliation Service) match on
/// `kind()` rather than downcasting, so a job's terminal error survives past
/// the `run_fn` boundary without losing its classification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("playlist expired: {0}")]
    PlaylistExpired(String),

    #[error("playlist unavailable: {0}")]
    PlaylistUnavailable(String),

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("cancelled")]
    Cancelled,

    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("config error: {0}")]
    ConfigError(String),
}

impl CoreError {
    /// Stable, lowercase kind tag, e.g. for log fields or a future HTTP
    /// surface's error code. Not used for control flow inside the core.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::Duplicate(_) => "duplicate",
            CoreError::ProviderUnavailable(_) => "provider_unavailable",
            CoreError::PlaylistExpired(_) => "playlist_expired",
            CoreError::PlaylistUnavailable(_) => "playlist_unavailable",
            CoreError::FetchFailed(_) => "fetch_failed",
            CoreError::Cancelled => "cancelled",
            CoreError::StorageFailure(_) => "storage_failure",
            CoreError::ConfigError(_) => "config_error",
        }
    }

    /// Whether a job failing with this error is worth revisiting on the next
    /// reconciliation tick. `Cancelled` and `ConfigError` are not: the former
    /// was intentional, the latter needs operator intervention.
    pub fn is_transient(&self) -> bool {
        !matches!(self, CoreError::Cancelled | CoreError::ConfigError(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_per_variant() {
        assert_eq!(CoreError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(CoreError::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn cancelled_and_config_error_are_not_transient() {
        assert!(!CoreError::Cancelled.is_transient());
        assert!(!CoreError::ConfigError("no db_dir".into()).is_transient());
        assert!(CoreError::FetchFailed("exit 1".into()).is_transient());
    }
}
