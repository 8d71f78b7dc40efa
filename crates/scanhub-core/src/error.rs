use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Error taxonomy surfaced by the coordinator core (spec §7).
///
/// Each variant maps onto exactly one HTTP status in `scanhub-server`; database
/// constraint violations are translated into `DuplicateScan`/`NotFound` at the store
/// boundary rather than leaking here.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("a scan already exists for this name and version")]
    DuplicateScan,

    #[error("no such scan")]
    NotFound,

    #[error("operation not valid in the scan's current state")]
    WrongState,

    #[error("caller does not hold the lease for this scan")]
    NotOwned,

    #[error("scan has already been reported")]
    AlreadyReported,

    #[error("rule `{0}` is not part of the current ruleset")]
    UnknownRule(String),

    #[error("ruleset refresh failed; serving last-known snapshot")]
    RulesetStale(#[source] anyhow::Error),

    #[error("reporter service call failed")]
    ReporterFailure(#[source] anyhow::Error),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoordinatorError {
    /// True for errors that indicate the caller should retry without changing the
    /// request (pool exhaustion, connection loss) rather than a 4xx-class rejection.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Database(sqlx::Error::PoolTimedOut)
                | CoordinatorError::Database(sqlx::Error::Io(_))
        )
    }
}
