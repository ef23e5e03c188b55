use std::time::Duration;

use uuid::Uuid;

/// Poll interval after any activity.
pub const INITIAL_POLL_DELAY: Duration = Duration::from_millis(100);

/// Idle steps. Each entry is (idle for at least, poll every). Ordered by
/// idle time; the last step is the ceiling.
pub const BACKOFF_STEPS: [(Duration, Duration); 3] = [
    (Duration::from_secs(1), Duration::from_millis(250)),
    (Duration::from_secs(2), Duration::from_millis(500)),
    (Duration::from_secs(3), Duration::from_millis(1000)),
];

/// How long a sqlite reservation holds its row before another dequeue may
/// claim it again.
#[cfg(feature = "sqlite")]
pub const DEFAULT_RESERVATION_LEASE: Duration = Duration::from_secs(5 * 60);

/// Namespace for subscription ids derived from consumer names.
pub const SUBSCRIPTION_NAMESPACE: Uuid = Uuid::from_u128(0x5c1b_7a0e_4f3d_4b8e_9a6c_2d1f_0e3b_7c95);
