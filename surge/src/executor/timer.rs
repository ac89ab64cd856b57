use super::{Continuation, Reporter};
use futures_util::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use surge_core::LATE_TIMER_WARNING;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::time::delay_queue::Key;
use tokio_util::time::DelayQueue;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

type Registration = (Instant, Continuation);

/// The one timer every worker parks paused users on.
///
/// Registration goes through a channel so it is safe from any worker; the
/// queue itself lives in a single task.
#[derive(Clone)]
pub(crate) struct TimerSource {
    registrations: mpsc::UnboundedSender<Registration>,
    reporter: Arc<Reporter>,
}

impl TimerSource {
    pub fn spawn(
        resumes: async_channel::Sender<Continuation>,
        reporter: Arc<Reporter>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(rx, resumes, reporter.clone(), cancel));
        let source = Self {
            registrations: tx,
            reporter,
        };
        (source, task)
    }

    pub fn register(&self, deadline: Instant, continuation: Continuation) {
        if let Err(mpsc::error::SendError((_, continuation))) =
            self.registrations.send((deadline, continuation))
        {
            // NOTE: The timer task only goes away once the run is stopping.
            self.reporter.abort(continuation.run);
        }
    }
}

async fn run(
    mut registrations: mpsc::UnboundedReceiver<Registration>,
    resumes: async_channel::Sender<Continuation>,
    reporter: Arc<Reporter>,
    cancel: CancellationToken,
) {
    let mut queue: DelayQueue<Continuation> = DelayQueue::new();
    let mut keys: HashSet<Key> = HashSet::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            registration = registrations.recv() => match registration {
                Some((deadline, continuation)) => {
                    keys.insert(queue.insert_at(continuation, deadline));
                }
                None => break,
            },
            Some(expired) = queue.next(), if !queue.is_empty() => {
                keys.remove(&expired.key());
                let deadline = expired.deadline();
                let continuation = expired.into_inner();

                let now = Instant::now();
                if now < deadline {
                    keys.insert(queue.insert_at(continuation, deadline));
                    continue;
                }

                let late = now - deadline;
                if late > LATE_TIMER_WARNING {
                    warn!("Timer fired {late:?} late; the worker pool may be saturated.");
                }

                if let Err(err) = resumes.try_send(continuation) {
                    reporter.abort(err.into_inner().run);
                }
            }
        }
    }

    let pending = keys.len();
    for key in keys.drain() {
        reporter.abort(queue.remove(&key).into_inner().run);
    }
    registrations.close();
    while let Ok((_, continuation)) = registrations.try_recv() {
        reporter.abort(continuation.run);
    }
    debug!("Timer source stopped with {pending} pending wake-ups.");
}
