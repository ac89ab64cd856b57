use std::time::Duration;

/// Chunk size used when streaming file-backed bodies.
pub const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// Worker count used when the available parallelism cannot be determined.
pub const FALLBACK_POOL_SIZE: usize = 4;

/// Expected response statuses for a request when no check is configured.
pub const DEFAULT_OK_STATUS: std::ops::RangeInclusive<u16> = 200..=399;

/// Upper bound on an injection profile's total length and on a run's
/// maximum duration, so start times stay representable as instants.
pub const MAX_RUN_DURATION: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Length of generated multipart boundaries.
pub const MULTIPART_BOUNDARY_LEN: usize = 30;

/// All-buffered multipart bodies up to this size are joined into one buffer.
pub const MULTIPART_INLINE_LIMIT: usize = 64 * 1024;

/// Timer wake-ups later than this past their deadline are logged.
pub const LATE_TIMER_WARNING: Duration = Duration::from_millis(50);

pub const METRIC_USERS: &str = "surge_users_total";
pub const METRIC_REQUESTS: &str = "surge_requests_total";
pub const METRIC_REQUEST_LATENCY: &str = "surge_request_latency_seconds";
