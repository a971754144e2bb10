//! HTTP polling loop.
//!
//! While push is primary the loop pulls sparsely (`pull_interval_enhance`)
//! to catch events the socket dropped; those are reported as `missed`. When
//! push is down it pulls at `pull_interval` and carries the whole load.

use crate::client::Inner;
use crate::error::{ClientError, ClientResult};
use crate::events::Notification;
use crate::http::HttpClient;
use crate::promises::Deferred;
use crate::state::{PollState, SubState};
use crate::transport::PushConnector;
use rtlink_protocol::Via;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullSummary {
    /// Events in the response.
    pub received: usize,
    /// Events admitted by deduplication.
    pub admitted: usize,
    /// Admitted events push should have delivered.
    pub missed: usize,
    /// Watermark after the pull.
    pub since: Option<i64>,
}

impl<P: PushConnector, H: HttpClient> Inner<P, H> {
    /// (Re)starts the loop at the cadence of the current polling state.
    pub(crate) fn start_polling(self: &Arc<Self>) {
        self.poll.cancel();
        if self.states().polling == PollState::Offline {
            return;
        }
        let weak = Arc::downgrade(self);

        self.poll.spawn(async move {
            loop {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Err(err) = inner.pull().await {
                    debug!(error = %err, "pull failed");
                }
                let interval = {
                    let config = inner.config.read();
                    match inner.states().polling {
                        PollState::Full => config.pull_interval,
                        PollState::Medium => config.pull_interval_enhance,
                        PollState::Connecting | PollState::Offline => return,
                    }
                };
                drop(inner);
                tokio::time::sleep(interval).await;
            }
        });
    }

    pub(crate) fn stop_polling(self: &Arc<Self>) {
        self.poll.cancel();
        self.set_state(SubState::Polling(PollState::Offline));
    }

    /// Pulls once; callers arriving while a pull is in flight share it.
    pub(crate) async fn pull(self: &Arc<Self>) -> ClientResult<PullSummary> {
        let (operation, deferred) = {
            let mut session = self.session.lock();
            if let Some(operation) = session.pull.clone() {
                (operation, None)
            } else {
                let deferred = Deferred::new();
                let operation = deferred.operation();
                session.pull = Some(operation.clone());
                (operation, Some(deferred))
            }
        };

        if let Some(deferred) = deferred {
            let inner = Arc::clone(self);
            let epoch = self.epoch();
            // the request runs detached so a dropped caller cannot strand
            // the other waiters
            tokio::spawn(async move {
                let result = inner.pull_once(epoch).await;
                {
                    let mut session = inner.session.lock();
                    if inner.epoch() == epoch {
                        session.pull = None;
                    }
                }
                match result {
                    Ok(summary) => deferred.resolve(summary),
                    Err(err) => deferred.reject(err),
                };
            });
        }

        operation.wait().await
    }

    async fn pull_once(self: &Arc<Self>, epoch: u64) -> ClientResult<PullSummary> {
        let (rooms, since) = {
            let session = self.session.lock();
            (session.rooms.iter().cloned().collect::<Vec<_>>(), session.watermark)
        };
        let enhanced = self.states().polling != PollState::Full;

        let response = self
            .api
            .fetch_pull_events(&self.endpoint(), &rooms, since, enhanced)
            .await
            .inspect_err(|err| warn!(error = %err, "pull request failed"))?;
        if self.epoch() != epoch {
            return Err(ClientError::Cancelled);
        }
        if response.skipped > 0 {
            debug!(skipped = response.skipped, "pull response contained undecodable events");
        }

        let mut summary = PullSummary {
            received: response.events.len(),
            ..Default::default()
        };
        for event in response.events {
            let event = event.with_via(Via::Polling);
            let missed = self.states().polling != PollState::Full;
            let record = missed.then(|| event.clone());
            if self.admit(epoch, event) {
                summary.admitted += 1;
                if let Some(record) = record {
                    summary.missed += 1;
                    self.bus.trigger(&Notification::Missed(record));
                }
            }
        }

        summary.since = {
            let mut session = self.session.lock();
            if self.epoch() == epoch {
                if let Some(next) = response.since {
                    if session.watermark.map_or(true, |current| next > current) {
                        session.watermark = Some(next);
                    }
                }
            }
            session.watermark
        };
        debug!(
            received = summary.received,
            admitted = summary.admitted,
            missed = summary.missed,
            "pull completed"
        );
        Ok(summary)
    }
}
