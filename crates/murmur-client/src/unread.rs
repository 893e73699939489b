//! Client-side unread notification counter.
//!
//! The counter fetches the server's count on sign-in, re-polls on a fixed
//! interval while signed in, and applies local decrements immediately when
//! the user reads notifications. The server value always wins on the next
//! fetch. Observers subscribe to a `watch` channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::error::ClientError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Where the counter gets the authoritative count from.
#[async_trait]
pub trait UnreadSource: Send + Sync + 'static {
    async fn fetch_unread(&self) -> Result<u64, ClientError>;
}

#[async_trait]
impl UnreadSource for ApiClient {
    async fn fetch_unread(&self) -> Result<u64, ClientError> {
        self.unread_count().await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnreadState {
    /// Signed out, or signed in but not fetched yet. Reads as zero.
    #[default]
    Unknown,
    Synced(u64),
}

impl UnreadState {
    pub fn count(self) -> u64 {
        match self {
            Self::Unknown => 0,
            Self::Synced(n) => n,
        }
    }
}

/// Marks one signed-in stretch of the counter. Capture it before a request
/// whose reply carries a count, and hand it back with that count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

#[derive(Clone)]
pub struct UnreadCounter {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn UnreadSource>,
    interval: Duration,
    state: watch::Sender<UnreadState>,
    session: Mutex<SessionSlot>,
}

/// Bumped on every sign-in and sign-out. A fetch only lands if the
/// generation it started under is still the live one.
#[derive(Default)]
struct SessionSlot {
    generation: u64,
    signed_in: bool,
    poller: Option<CancellationToken>,
}

impl UnreadCounter {
    pub fn new(source: Arc<dyn UnreadSource>) -> Self {
        Self::with_interval(source, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_interval(source: Arc<dyn UnreadSource>, interval: Duration) -> Self {
        let (state, _) = watch::channel(UnreadState::Unknown);
        Self {
            inner: Arc::new(Inner {
                source,
                interval,
                state,
                session: Mutex::new(SessionSlot::default()),
            }),
        }
    }

    pub fn current(&self) -> UnreadState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<UnreadState> {
        self.inner.state.subscribe()
    }

    /// Fetch the count right away, then keep polling until `sign_out`.
    /// Signing in again restarts the poller.
    pub async fn sign_in(&self) {
        let (generation, cancel) = {
            let mut slot = self.inner.slot();
            if let Some(previous) = slot.poller.take() {
                previous.cancel();
            }
            slot.generation += 1;
            slot.signed_in = true;
            let cancel = CancellationToken::new();
            slot.poller = Some(cancel.clone());
            (slot.generation, cancel)
        };

        self.refresh_for(generation).await;
        self.spawn_poller(generation, cancel);
    }

    /// Reset to `Unknown` and stop polling. Fetches still in flight are discarded.
    pub fn sign_out(&self) {
        let mut slot = self.inner.slot();
        if let Some(poller) = slot.poller.take() {
            poller.cancel();
        }
        slot.generation += 1;
        slot.signed_in = false;
        self.inner.state.send_replace(UnreadState::Unknown);
    }

    /// On-demand fetch. Does nothing while signed out.
    pub async fn refresh(&self) -> UnreadState {
        let generation = {
            let slot = self.inner.slot();
            if !slot.signed_in {
                return UnreadState::Unknown;
            }
            slot.generation
        };
        self.refresh_for(generation).await;
        self.current()
    }

    /// Optimistically drop the count by `k`, never below zero.
    pub fn mark_read(&self, k: u64) {
        self.inner.state.send_if_modified(|state| match *state {
            UnreadState::Synced(n) if k > 0 && n > 0 => {
                *state = UnreadState::Synced(n.saturating_sub(k));
                true
            }
            _ => false,
        });
    }

    pub fn generation(&self) -> Generation {
        Generation(self.inner.slot().generation)
    }

    /// Adopt a count the server reported as a side effect of another call.
    /// Dropped if the session has changed since `generation` was taken.
    pub fn apply_server_count_for(&self, generation: Generation, n: u64) {
        let slot = self.inner.slot();
        if slot.signed_in && slot.generation == generation.0 {
            self.inner.state.send_replace(UnreadState::Synced(n));
        } else {
            debug!("Discarding unread count reported for an ended session");
        }
    }

    async fn refresh_for(&self, generation: u64) {
        match self.inner.source.fetch_unread().await {
            Ok(n) => {
                let slot = self.inner.slot();
                if slot.signed_in && slot.generation == generation {
                    self.inner.state.send_replace(UnreadState::Synced(n));
                } else {
                    debug!("Discarding unread count fetched for an ended session");
                }
            }
            Err(e) => warn!("Failed to refresh unread count: {}", e),
        }
    }

    fn spawn_poller(&self, generation: u64, cancel: CancellationToken) {
        let interval = self.inner.interval;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        UnreadCounter { inner }.refresh_for(generation).await;
                    }
                }
            }
            debug!("Unread poller stopped");
        });
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(poller) = self.slot().poller.take() {
            poller.cancel();
        }
    }
}
