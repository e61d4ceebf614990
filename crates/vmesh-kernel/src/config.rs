//! Kernel tunables.

use std::time::Duration;

/// Timing and capacity knobs, consumed read-only by the kernel.
///
/// The heartbeat timeout and election timeout are independent; a crash takes
/// two heartbeat timeouts to detect while a graceful leave is immediate.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// How often we emit a liveness probe.
    pub heartbeat_interval: Duration,
    /// Silence before a peer is suspected; twice this before it is failed.
    pub heartbeat_timeout: Duration,
    /// How long an election waits for OK or a COORDINATOR announcement.
    pub election_timeout: Duration,
    /// Repeat count for group-reliable broadcasts.
    pub group_repeats: u32,
    /// Gap between group-reliable repeats.
    pub group_repeat_delay: Duration,
    /// Attempts for acked point-to-point sends.
    pub retry_count: u32,
    /// Wait for an ack before each retry.
    pub retry_delay: Duration,
    /// How long a joiner waits for a bootstrap snapshot.
    pub join_timeout: Duration,
    /// Hold-back buffer bound.
    pub holdback_capacity: usize,
    /// Recent-id cache bound for duplicate suppression.
    pub dedupe_capacity: usize,
    /// Depth of the delivery queue handed to the application.
    pub delivery_queue: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(2),
            heartbeat_timeout: Duration::from_secs(6),
            election_timeout: Duration::from_secs(5),
            group_repeats: 3,
            group_repeat_delay: Duration::from_millis(100),
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
            join_timeout: Duration::from_secs(5),
            holdback_capacity: 1024,
            dedupe_capacity: 4096,
            delivery_queue: 256,
        }
    }
}

impl KernelConfig {
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::new()
    }
}

/// Builder for [`KernelConfig`].
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: KernelConfig::default(),
        }
    }

    pub fn heartbeat_interval(mut self, value: Duration) -> Self {
        self.config.heartbeat_interval = value;
        self
    }

    pub fn heartbeat_timeout(mut self, value: Duration) -> Self {
        self.config.heartbeat_timeout = value;
        self
    }

    pub fn election_timeout(mut self, value: Duration) -> Self {
        self.config.election_timeout = value;
        self
    }

    pub fn group_repeats(mut self, count: u32) -> Self {
        self.config.group_repeats = count;
        self
    }

    pub fn group_repeat_delay(mut self, value: Duration) -> Self {
        self.config.group_repeat_delay = value;
        self
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.config.retry_count = count;
        self
    }

    pub fn retry_delay(mut self, value: Duration) -> Self {
        self.config.retry_delay = value;
        self
    }

    pub fn join_timeout(mut self, value: Duration) -> Self {
        self.config.join_timeout = value;
        self
    }

    pub fn holdback_capacity(mut self, value: usize) -> Self {
        self.config.holdback_capacity = value;
        self
    }

    pub fn dedupe_capacity(mut self, value: usize) -> Self {
        self.config.dedupe_capacity = value;
        self
    }

    pub fn delivery_queue(mut self, value: usize) -> Self {
        self.config.delivery_queue = value;
        self
    }

    pub fn build(self) -> KernelConfig {
        self.config
    }
}

impl Default for KernelConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = KernelConfig::builder()
            .heartbeat_interval(Duration::from_millis(250))
            .retry_count(5)
            .build();
        assert_eq!(config.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(config.retry_count, 5);
        assert_eq!(config.group_repeats, 3);
    }
}
