//! Crate-wide error types.

use crate::serper::SearchError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad job parameters at creation time. Nothing is persisted.
    #[error("invalid job parameters: {0}")]
    Validation(String),

    /// A new job's worst-case cost would cross the hard daily ceiling.
    #[error(
        "daily budget exceeded: estimated cost ${estimated_cost:.2}, remaining budget ${remaining:.2}"
    )]
    BudgetExceeded { estimated_cost: f64, remaining: f64 },

    /// Transient store failure; the affected operation may be retried.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] sqlx::Error),

    /// Permanent store-level failure (constraint or row-shape violation).
    #[error("storage invariant violated: {0}")]
    StorageInvariant(String),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        let permanent = match &err {
            sqlx::Error::Database(db) => db.constraint().is_some(),
            sqlx::Error::RowNotFound
            | sqlx::Error::TypeNotFound { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_) => true,
            _ => false,
        };
        if permanent {
            Error::StorageInvariant(err.to_string())
        } else {
            Error::StorageUnavailable(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_error_message_names_both_figures() {
        let err = Error::BudgetExceeded {
            estimated_cost: 2.0,
            remaining: 0.75,
        };
        let msg = err.to_string();
        assert!(msg.contains("$2.00"), "missing estimate in {msg}");
        assert!(msg.contains("$0.75"), "missing remaining budget in {msg}");
    }

    #[test]
    fn row_not_found_is_permanent() {
        let err = Error::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, Error::StorageInvariant(_)));
    }

    #[test]
    fn pool_timeout_is_transient() {
        let err = Error::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }
}
