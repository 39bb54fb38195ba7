//! Update poller: long-polls the source platform with a monotonic cursor and feeds each batch to
//! the event router.
//!
//! Fetch failures never stop the loop. The cursor stays where it was, the poller backs off
//! (doubling up to a ceiling) and asks again. Only the cancellation token ends `run`.

use crate::config::SourceConfig;
use crate::platform::{PlatformError, SourcePlatform, Update};
use crate::router::EventRouter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Watermark of consumed updates: id of the last consumed update + 1. Never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor(i64);

impl Cursor {
    pub fn new(offset: i64) -> Self {
        Self(offset)
    }

    pub fn offset(&self) -> i64 {
        self.0
    }

    /// Move past the highest id in `ids`. An empty batch leaves the cursor unchanged.
    pub fn advance(&mut self, ids: impl IntoIterator<Item = i64>) {
        if let Some(max) = ids.into_iter().max() {
            self.0 = self.0.max(max + 1);
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("fetching updates at offset {offset} failed: {source}")]
pub struct PollError {
    pub offset: i64,
    #[source]
    pub source: PlatformError,
}

#[derive(Debug, Clone)]
pub struct PollerOptions {
    /// Long-poll budget for steady-state fetches.
    pub timeout_secs: u64,
    /// Discard updates that piled up while the relay was offline.
    pub skip_backlog: bool,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            skip_backlog: true,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl From<&SourceConfig> for PollerOptions {
    fn from(source: &SourceConfig) -> Self {
        Self {
            // A zero long-poll timeout would spin against the Bot API.
            timeout_secs: source.poll_timeout_secs.max(1),
            skip_backlog: source.skip_backlog,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(source.max_backoff_secs.max(1)),
        }
    }
}

/// Exponential backoff between failed fetches.
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

pub struct UpdatePoller {
    source: Arc<dyn SourcePlatform>,
    router: Arc<EventRouter>,
    options: PollerOptions,
    cursor: Cursor,
    cancel: CancellationToken,
}

impl UpdatePoller {
    pub fn new(
        source: Arc<dyn SourcePlatform>,
        router: Arc<EventRouter>,
        options: PollerOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            router,
            options,
            cursor: Cursor::default(),
            cancel,
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Spawn `run` on the runtime. The task ends only when the cancellation token fires.
    pub fn start(mut self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Clear the backlog (when enabled), then poll until cancelled.
    pub async fn run(&mut self) {
        let cancel = self.cancel.clone();
        let mut backoff = Backoff::new(self.options.initial_backoff, self.options.max_backoff);

        if self.options.skip_backlog && !self.clear_backlog(&cancel, &mut backoff).await {
            log::info!("poller: cancelled during backlog clearing");
            return;
        }

        log::info!(
            "poller: long-polling from offset {} (timeout {}s)",
            self.cursor.offset(),
            self.options.timeout_secs
        );
        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                r = self.fetch(self.options.timeout_secs) => r,
            };
            match fetched {
                Ok(updates) => {
                    backoff.reset();
                    if updates.is_empty() {
                        continue;
                    }
                    let max_id = updates.iter().map(|u| u.update_id).max();
                    log::debug!("poller: received {} update(s)", updates.len());
                    // Handler tasks are detached; the next fetch does not wait for them. Waiting
                    // for a free handler slot still has to give way to cancellation.
                    let dispatched = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => false,
                        _ = self.router.dispatch_batch(updates) => true,
                    };
                    if !dispatched {
                        break;
                    }
                    self.cursor.advance(max_id);
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    log::warn!("poller: {}; retrying in {:?}", e, delay);
                    if !sleep_or_cancel(&cancel, delay).await {
                        break;
                    }
                }
            }
        }
        log::info!("poller: stopped at offset {}", self.cursor.offset());
    }

    async fn fetch(&self, timeout_secs: u64) -> Result<Vec<Update>, PollError> {
        let offset = self.cursor.offset();
        self.source
            .fetch_updates(offset, timeout_secs)
            .await
            .map_err(|source| PollError { offset, source })
    }

    /// Fetch with a zero timeout until an empty batch comes back, discarding everything seen.
    /// Returns false if cancelled first.
    async fn clear_backlog(&mut self, cancel: &CancellationToken, backoff: &mut Backoff) -> bool {
        let mut discarded = 0usize;
        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                r = self.fetch(0) => r,
            };
            match fetched {
                Ok(updates) if updates.is_empty() => {
                    if discarded > 0 {
                        log::info!("poller: skipped {} backlog update(s)", discarded);
                    }
                    backoff.reset();
                    return true;
                }
                Ok(updates) => {
                    backoff.reset();
                    discarded += updates.len();
                    self.cursor.advance(updates.iter().map(|u| u.update_id));
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    log::warn!("poller: backlog {}; retrying in {:?}", e, delay);
                    if !sleep_or_cancel(cancel, delay).await {
                        return false;
                    }
                }
            }
        }
    }
}

/// Sleep for `delay`; false if the token fired first.
async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
