use std::time::Duration;
use typed_builder::TypedBuilder;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 5000;
pub const DEFAULT_MAX_CODE_ATTEMPTS: u32 = 8;

/// Tunables of [`ShortenerService`](crate::ShortenerService).
#[derive(Debug, Clone, TypedBuilder)]
pub struct ShortenerSettings {
    /// Largest batch accepted by `shorten_batch`.
    #[builder(default = DEFAULT_MAX_BATCH_SIZE)]
    pub max_batch_size: usize,
    #[builder(default = Duration::from_secs(2))]
    pub operation_timeout: Duration,
    #[builder(default = Duration::from_secs(1))]
    pub healthcheck_timeout: Duration,
    /// How many fresh codes to try before giving up on a collision streak.
    #[builder(default = DEFAULT_MAX_CODE_ATTEMPTS)]
    pub max_code_attempts: u32,
}

impl Default for ShortenerSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Tunables of [`DeleteCoalescer`](crate::DeleteCoalescer).
#[derive(Debug, Clone, TypedBuilder)]
pub struct CoalescerSettings {
    #[builder(default = Duration::from_secs(1))]
    pub flush_interval: Duration,
    /// Requests held by the queue before `enqueue` starts waiting.
    #[builder(default = 256)]
    pub queue_capacity: usize,
}

impl Default for CoalescerSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}
