use super::{Continuation, Reporter, Resume, UserRun};
use crate::action::{ActionError, Exchange};
use crate::transport::{IoHandle, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Waits on in-flight requests off the worker pool and queues the user for
/// resumption once the response, an error or the timeout arrives.
#[derive(Clone)]
pub(crate) struct CompletionSource {
    tracker: TaskTracker,
    resumes: async_channel::Sender<Continuation>,
    reporter: Arc<Reporter>,
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl CompletionSource {
    pub fn new(
        tracker: TaskTracker,
        resumes: async_channel::Sender<Continuation>,
        reporter: Arc<Reporter>,
        cancel: CancellationToken,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            tracker,
            resumes,
            reporter,
            cancel,
            timeout,
        }
    }

    pub fn register(&self, run: UserRun, handle: IoHandle, exchange: Exchange) {
        let resumes = self.resumes.clone();
        let reporter = self.reporter.clone();
        let cancel = self.cancel.clone();
        let timeout = self.timeout;

        self.tracker.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = wait_for(handle, timeout) => Some(result),
            };

            match result {
                Some(result) => {
                    let continuation = Continuation {
                        run,
                        resume: Resume::Exchange { exchange, result },
                    };
                    if let Err(err) = resumes.try_send(continuation) {
                        reporter.abort(err.into_inner().run);
                    }
                }
                None => {
                    trace!("Dropping in-flight {} of user {}", exchange.name(), run.session.user_id());
                    reporter.abort(run);
                }
            }
        });
    }
}

async fn wait_for(handle: IoHandle, timeout: Option<Duration>) -> Result<Response, ActionError> {
    match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, handle).await {
            Ok(result) => result.map_err(ActionError::from),
            Err(_) => Err(ActionError::Timeout(timeout)),
        },
        None => handle.await.map_err(ActionError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    #[tokio::test(start_paused = true)]
    async fn slow_response_times_out() {
        let handle: IoHandle = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Response::with_status(200))
        }
        .boxed();
        let result = wait_for(handle, Some(Duration::from_secs(1))).await;
        assert!(matches!(result, Err(ActionError::Timeout(_))));
    }

    #[tokio::test]
    async fn transport_error_passes_through() {
        let handle: IoHandle =
            async { Err(crate::transport::TransportError::new("reset")) }.boxed();
        let result = wait_for(handle, None).await;
        assert!(matches!(result, Err(ActionError::Transport(_))));
    }
}
