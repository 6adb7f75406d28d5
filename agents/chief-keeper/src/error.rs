use std::time::Duration;

use crate::chain::ChainCommunicationError;

/// Errors raised while deciding, submitting or tracking a lift.
#[derive(Debug, thiserror::Error)]
pub enum KeeperError {
    #[error("Chain communication error {0}")]
    ChainCommunicationError(#[from] ChainCommunicationError),
    #[error("Signing error: {0}")]
    SigningError(String),
    #[error("Transaction error: {0}")]
    TxSubmissionError(String),
    #[error("Invalid transaction manager state: {0}")]
    InvalidState(String),
}

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ChainCommunicationError {
    fn is_retryable(&self) -> bool {
        match self {
            ChainCommunicationError::Timeout(_) | ChainCommunicationError::RpcError(_) => true,
            ChainCommunicationError::ContractError(_)
            | ChainCommunicationError::TxRejected(_)
            | ChainCommunicationError::NonceConsumed(_)
            | ChainCommunicationError::Other(_) => false,
        }
    }
}

impl IsRetryable for KeeperError {
    fn is_retryable(&self) -> bool {
        match self {
            KeeperError::ChainCommunicationError(err) => err.is_retryable(),
            // broadcast failures are usually the node rejecting a replacement
            // or a flaky connection; both clear up by the next tick
            KeeperError::TxSubmissionError(_) => true,
            KeeperError::SigningError(_) | KeeperError::InvalidState(_) => false,
        }
    }
}

/// Delay before the next tick after `consecutive_failures` failed ticks in a row.
///
/// `base * 2^(failures - 1)`, never longer than the regular tick interval.
pub fn retry_backoff(consecutive_failures: u32, base: Duration, interval: Duration) -> Duration {
    if consecutive_failures == 0 {
        return interval;
    }
    let exponent = consecutive_failures.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .unwrap_or(interval)
        .min(interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_retryable() {
        let err = KeeperError::from(ChainCommunicationError::Timeout(Duration::from_secs(10)));
        assert!(err.is_retryable());
    }

    #[test]
    fn invalid_state_is_not_retryable() {
        let err = KeeperError::InvalidState("a lift is already in flight".to_owned());
        assert!(!err.is_retryable());
    }

    #[test]
    fn backoff_grows_and_is_capped_by_interval() {
        let base = Duration::from_secs(1);
        let interval = Duration::from_secs(30);

        assert_eq!(retry_backoff(0, base, interval), interval);
        assert_eq!(retry_backoff(1, base, interval), Duration::from_secs(1));
        assert_eq!(retry_backoff(2, base, interval), Duration::from_secs(2));
        assert_eq!(retry_backoff(5, base, interval), Duration::from_secs(16));
        assert_eq!(retry_backoff(6, base, interval), interval);
        assert_eq!(retry_backoff(u32::MAX, base, interval), interval);
    }
}
