use super::Schedule;
use crate::executor::StartQueue;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, instrument, trace, warn};

// Events handed over back to back before giving the runtime a turn.
const BURST: u64 = 1024;

/// Owns the schedule for one run and hands each event to the executor no
/// earlier than its due time.
pub(crate) struct Injector {
    schedule: Schedule,
    cancel: CancellationToken,
}

impl Injector {
    pub fn new(schedule: Schedule, cancel: CancellationToken) -> Self {
        Self { schedule, cancel }
    }

    #[instrument(name = "injector", skip_all)]
    pub async fn run(self, starts: StartQueue) -> u64 {
        let mut injected = 0u64;
        for event in self.schedule {
            if event.at > Instant::now() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = sleep_until(event.at) => {}
                }
            } else if injected % BURST == BURST - 1 {
                tokio::task::yield_now().await;
            }

            if self.cancel.is_cancelled() {
                break;
            }

            trace!(
                "Starting user {} of {} at +{:?}",
                event.user_id,
                event.scenario.name(),
                event.offset
            );
            starts.submit(event, &self.cancel).await;
            injected += 1;
        }

        info!("Injection complete after {injected} users.");
        injected
    }
}
