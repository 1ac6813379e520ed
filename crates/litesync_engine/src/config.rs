//! Configuration for replications.

use litesync_protocol::{Direction, FeedScope};
use std::collections::BTreeMap;
use std::time::Duration;

/// How long a replication lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Stop after catching up with the feed.
    Oneshot,
    /// Stay running indefinitely, awaiting further changes.
    Continuous,
}

/// What to do when the local and remote checkpoint mirrors disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPolicy {
    /// The local checkpoint wins. Default: the local write is the
    /// authoritative record of what was actually committed.
    TrustLocal,
    /// The remote mirror wins.
    TrustRemote,
    /// Discard both and resynchronize from the beginning of history.
    FullResync,
}

/// A credential reference handed to the transport collaborator.
///
/// Resolution (turning this into request headers or a session) happens in
/// the transport; the engine only carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authenticator {
    /// HTTP basic credentials.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// A bearer token.
    Bearer {
        /// Token value.
        token: String,
    },
    /// A pre-established session cookie.
    SessionCookie {
        /// Cookie name.
        name: String,
        /// Cookie value.
        value: String,
    },
}

/// Configuration for a replication.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Remote endpoint URL.
    pub remote_url: String,
    /// Replication direction.
    pub direction: Direction,
    /// One-shot or continuous.
    pub lifecycle: Lifecycle,
    /// Document scope (filter, doc IDs, channels).
    pub scope: FeedScope,
    /// Extra HTTP headers sent with every request.
    pub headers: BTreeMap<String, String>,
    /// Credentials for the remote.
    pub authenticator: Option<Authenticator>,
    /// Maximum number of changes per batch.
    pub batch_size: u32,
    /// Retry behavior for transient failures.
    pub retry: RetryConfig,
    /// Checkpoint reconciliation policy.
    pub checkpoint_policy: CheckpointPolicy,
    /// Consecutive undecodable responses tolerated before the failure is
    /// classified fatal.
    pub max_protocol_failures: u32,
}

impl ReplicationConfig {
    /// Creates a configuration for a remote endpoint and direction.
    pub fn new(remote_url: impl Into<String>, direction: Direction) -> Self {
        Self {
            remote_url: remote_url.into(),
            direction,
            lifecycle: Lifecycle::Oneshot,
            scope: FeedScope::default(),
            headers: BTreeMap::new(),
            authenticator: None,
            batch_size: 100,
            retry: RetryConfig::default(),
            checkpoint_policy: CheckpointPolicy::TrustLocal,
            max_protocol_failures: 3,
        }
    }

    /// Sets the lifecycle.
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Sets the filter function name.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.scope.filter = Some(filter.into());
        self
    }

    /// Sets the filter parameters.
    pub fn with_filter_params(
        mut self,
        params: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        self.scope.filter_params = params;
        self
    }

    /// Sets the document-ID allowlist.
    pub fn with_doc_ids(mut self, doc_ids: Vec<String>) -> Self {
        self.scope.doc_ids = Some(doc_ids);
        self
    }

    /// Sets the channel allowlist.
    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.scope.channels = Some(channels);
        self
    }

    /// Sets extra HTTP headers.
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the authenticator.
    pub fn with_authenticator(mut self, authenticator: Authenticator) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the checkpoint reconciliation policy.
    pub fn with_checkpoint_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.checkpoint_policy = policy;
        self
    }

    /// Returns true if the replication is continuous.
    pub fn is_continuous(&self) -> bool {
        self.lifecycle == Lifecycle::Continuous
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts for one batch; `None` retries
    /// indefinitely (the usual choice for continuous replications).
    pub max_attempts: Option<u32>,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with a bounded number of attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::default()
        }
    }

    /// Creates a configuration that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(0),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay for a given attempt (1-indexed).
    ///
    /// Attempt 1 waits `initial_delay`; each further attempt multiplies the
    /// delay, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter.
            let jitter = capped * 0.25 * pseudo_jitter();
            Duration::from_secs_f64(capped + jitter)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

/// Simple deterministic "jitter" (no external RNG dependency).
fn pseudo_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = ReplicationConfig::new("https://sync.example.com/db", Direction::Pull)
            .with_lifecycle(Lifecycle::Continuous)
            .with_channels(vec!["news".into()])
            .with_batch_size(25);

        assert_eq!(config.remote_url, "https://sync.example.com/db");
        assert!(config.direction.is_pull());
        assert!(config.is_continuous());
        assert_eq!(config.scope.channels, Some(vec!["news".to_string()]));
        assert_eq!(config.batch_size, 25);
    }

    #[test]
    fn defaults_are_oneshot_and_unfiltered() {
        let config = ReplicationConfig::new("https://sync.example.com/db", Direction::Push);
        assert!(!config.is_continuous());
        assert!(config.scope.is_unfiltered());
        assert_eq!(config.checkpoint_policy, CheckpointPolicy::TrustLocal);
        assert_eq!(config.max_protocol_failures, 3);
    }

    #[test]
    fn retry_delay_growth() {
        let retry = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_max_delay(Duration::from_secs(10));
        let retry = RetryConfig {
            add_jitter: false,
            ..retry
        };

        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_respects_cap() {
        let retry = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        // Even with a large multiplier, never exceeds cap plus jitter.
        let delay = retry.delay_for_attempt(6);
        assert!(delay <= Duration::from_millis(6250));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let retry = RetryConfig::default().with_initial_delay(Duration::from_millis(100));
        let delay = retry.delay_for_attempt(1);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(125));
    }
}
