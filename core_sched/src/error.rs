use sched_schema::{EnvelopeError, SessionId};
use thiserror::Error;

use crate::repository::RepositoryError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("session {0} is not turn-based")]
    NotTurnBased(SessionId),
    #[error("turn shift must be a positive number of turns, got {0}")]
    InvalidTurnShift(i64),
}

impl SchedulerError {
    /// Caller mistakes, as opposed to infrastructure failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SchedulerError::SessionNotFound(_)
                | SchedulerError::NotTurnBased(_)
                | SchedulerError::InvalidTurnShift(_)
        )
    }

    /// Infrastructure failures that leave the work worth trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::Store(_) | SchedulerError::Repository(RepositoryError::Unavailable(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outages_are_retryable_and_bad_data_is_not() {
        assert!(SchedulerError::from(StoreError::Unavailable("down".into())).is_retryable());
        assert!(
            SchedulerError::from(RepositoryError::Unavailable("down".into())).is_retryable()
        );
        assert!(!SchedulerError::from(RepositoryError::CommandNotFound("c1".into())).is_retryable());
        assert!(!SchedulerError::InvalidTurnShift(0).is_retryable());
        assert!(SchedulerError::InvalidTurnShift(0).is_validation());
    }
}
