//! Publish configuration.

use hoist_common::HoistPaths;

use crate::control::CvmfsServer;
use crate::retry::RetryPolicy;
use crate::transaction::{AbortPolicy, TransactionManager};

/// Publish configuration options.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Paths for the store spool and root.
    pub paths: HoistPaths,
    /// Store control program.
    pub store_command: String,
    /// Handling of failed lingering-transaction aborts.
    pub abort_policy: AbortPolicy,
    /// Re-checks while waiting for an image path to materialize.
    pub retry: RetryPolicy,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            paths: HoistPaths::new(),
            store_command: CvmfsServer::DEFAULT_PROGRAM.to_string(),
            abort_policy: AbortPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PublishConfig {
    /// Set the paths.
    #[must_use]
    pub fn with_paths(mut self, paths: HoistPaths) -> Self {
        self.paths = paths;
        self
    }

    /// Set the store control program.
    #[must_use]
    pub fn with_store_command(mut self, program: impl Into<String>) -> Self {
        self.store_command = program.into();
        self
    }

    /// Set the abort policy.
    #[must_use]
    pub const fn with_abort_policy(mut self, policy: AbortPolicy) -> Self {
        self.abort_policy = policy;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Store control configured from these settings.
    #[must_use]
    pub fn store_control(&self) -> CvmfsServer {
        CvmfsServer::new(&self.store_command, self.paths.clone())
    }

    /// Transaction manager driving [`PublishConfig::store_control`].
    #[must_use]
    pub fn transaction_manager(&self) -> TransactionManager<CvmfsServer> {
        TransactionManager::with_abort_policy(self.store_control(), self.abort_policy)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;

    #[test]
    fn default_config() {
        let config = PublishConfig::default();
        assert_eq!(config.store_command, "cvmfs_server");
        assert_eq!(config.abort_policy, AbortPolicy::BestEffort);
        assert_eq!(config.retry.attempts, 1);
    }

    #[test]
    fn builder_pattern() {
        let config = PublishConfig::default()
            .with_paths(HoistPaths::new().with_spool("/srv/spool"))
            .with_store_command("/opt/bin/cvmfs_server")
            .with_abort_policy(AbortPolicy::FailFast)
            .with_retry(RetryPolicy::exponential(3, Duration::from_secs(1)));

        assert_eq!(config.abort_policy, AbortPolicy::FailFast);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(
            config.store_control().lock_file("r.org"),
            PathBuf::from("/srv/spool/r.org/in_transaction.lock")
        );
    }
}
