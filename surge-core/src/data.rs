use pdatastructs::tdigest::{TDigest, K1};
use std::fmt;
use std::time::Duration;
use tracing::error;

const TDIGEST_BACKLOG_SIZE: usize = 100;

/// Request latency distribution of a run.
#[derive(Debug, Clone)]
pub struct LatencyDigest {
    digest: TDigest<K1>,
    count: u64,
    max: Duration,
}

impl Default for LatencyDigest {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyDigest {
    pub fn new() -> Self {
        Self {
            digest: default_tdigest(),
            count: 0,
            max: Duration::ZERO,
        }
    }

    pub fn insert(&mut self, latency: Duration) {
        self.digest.insert(latency.as_secs_f64());
        self.count += 1;
        self.max = self.max.max(latency);
    }

    pub fn extend(&mut self, latencies: &[Duration]) {
        for latency in latencies {
            self.insert(*latency);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn quantile(&self, quantile: f64) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }

        let secs = self.digest.quantile(quantile);

        // NOTE: TDigest can hand back NaN for degenerate inputs.
        let secs = if secs.is_finite() {
            secs.max(0.)
        } else {
            error!("NaN latency quantile; reporting zero.");
            0.
        };

        Duration::from_secs_f64(secs)
    }
}

impl fmt::Display for LatencyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p50={:?}, p90={:?}, p99={:?}, max={:?}",
            self.quantile(0.5),
            self.quantile(0.9),
            self.quantile(0.99),
            self.max,
        )
    }
}

fn default_tdigest() -> TDigest<K1> {
    TDigest::new(K1::new(10.), TDIGEST_BACKLOG_SIZE)
}
