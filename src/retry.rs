//! Retry policies, consulted when every sender failed for a report.

use std::sync::Arc;

use crate::config::RetryPolicyKind;
use crate::sender::{ReportSender, SenderError};

/// One sender's failure for one report.
#[derive(Debug)]
pub struct FailedSender {
    pub sender: String,
    pub error: SenderError,
}

/// Decides whether a report that no sender delivered stays for a later run.
pub trait RetryPolicy: Send + Sync {
    /// `true` keeps the report in the approved folder, `false` deletes it.
    fn should_retry_send(&self, senders: &[Arc<dyn ReportSender>], failed: &[FailedSender]) -> bool;
}

/// Retries whenever every configured sender failed.
///
/// There is no retry count: a report that can never be delivered is retried
/// on every run until the user clears it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {
    fn should_retry_send(&self, senders: &[Arc<dyn ReportSender>], failed: &[FailedSender]) -> bool {
        !senders.is_empty() && senders.len() == failed.len()
    }
}

/// Retries only when at least one failure may go away by itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransientRetryPolicy;

impl RetryPolicy for TransientRetryPolicy {
    fn should_retry_send(&self, _senders: &[Arc<dyn ReportSender>], failed: &[FailedSender]) -> bool {
        failed.iter().any(|f| f.error.is_retryable())
    }
}

/// Never retries.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverRetryPolicy;

impl RetryPolicy for NeverRetryPolicy {
    fn should_retry_send(&self, _senders: &[Arc<dyn ReportSender>], _failed: &[FailedSender]) -> bool {
        false
    }
}

pub fn policy_for(kind: RetryPolicyKind) -> Arc<dyn RetryPolicy> {
    match kind {
        RetryPolicyKind::Default => Arc::new(DefaultRetryPolicy),
        RetryPolicyKind::Transient => Arc::new(TransientRetryPolicy),
        RetryPolicyKind::Never => Arc::new(NeverRetryPolicy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::NullSender;

    fn senders(n: usize) -> Vec<Arc<dyn ReportSender>> {
        (0..n).map(|_| Arc::new(NullSender) as Arc<dyn ReportSender>).collect()
    }

    fn failure(error: SenderError) -> FailedSender {
        FailedSender {
            sender: "http".into(),
            error,
        }
    }

    #[test]
    fn default_retries_when_all_failed() {
        let failed = vec![
            failure(SenderError::Transport("connection refused".into())),
            failure(SenderError::Rejected("bad request".into())),
        ];
        assert!(DefaultRetryPolicy.should_retry_send(&senders(2), &failed));
        assert!(!DefaultRetryPolicy.should_retry_send(&senders(3), &failed));
        assert!(!DefaultRetryPolicy.should_retry_send(&senders(0), &[]));
    }

    #[test]
    fn transient_looks_at_the_errors() {
        let permanent = vec![failure(SenderError::Rejected("bad request".into()))];
        let transient = vec![failure(SenderError::Status {
            status: 503,
            message: "unavailable".into(),
        })];

        assert!(!TransientRetryPolicy.should_retry_send(&senders(1), &permanent));
        assert!(TransientRetryPolicy.should_retry_send(&senders(1), &transient));
    }

    #[test]
    fn never_gives_up_immediately() {
        let failed = vec![failure(SenderError::Transport("timeout".into()))];
        assert!(!NeverRetryPolicy.should_retry_send(&senders(1), &failed));
    }
}
