//! Failure notification boundary.
//!
//! A job that dies (failed, expired, cancelled) produces no results and
//! needs a human decision to resubmit. The [`Notifier`] trait is where an
//! alerting integration would plug in; the default implementation records
//! the event in the operational log.

use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// A job reached a terminal state without producing results.
    async fn critical(&self, project: &str, job_id: &str, message: &str);
}

/// Log-only notifier.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn critical(&self, project: &str, job_id: &str, message: &str) {
        tracing::error!(project, job_id, "CRITICAL: {}", message);
    }
}
