use std::{future::Future, sync::Arc};

use futures::{stream::BoxStream, StreamExt as _};
use tokio::task::JoinHandle;

use crate::{config::LocationConfig, dl::DlSyncMutex};

use super::{Heading, Location, LocationStore, PermissionStatus, SourceError};

pub type PositionStream = BoxStream<'static, Result<Location, SourceError>>;
pub type HeadingStream = BoxStream<'static, Result<Heading, SourceError>>;

/// Platform positioning API. Dropping a returned stream must release the
/// underlying hardware subscription.
pub trait PositioningProvider: Send + Sync + 'static {
    fn request_foreground_permission(&self) -> impl Future<Output = PermissionStatus> + Send;

    fn watch_position(
        &self,
        config: &LocationConfig,
    ) -> impl Future<Output = Result<PositionStream, SourceError>> + Send;

    fn watch_heading(&self) -> impl Future<Output = Result<HeadingStream, SourceError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Position,
    Heading,
}
impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionKind::Position => write!(f, "position"),
            SubscriptionKind::Heading => write!(f, "heading"),
        }
    }
}

#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Idle,
    Starting,
    Active(JoinHandle<()>),
}

/// At most one subscription of one kind. `generation` changes on every stop,
/// so a pump or a pending start from an older generation knows it is stale.
#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    state: SlotState,
}

/// Owns the hardware subscriptions: at most one position and one heading
/// stream at any time. Demand accounting lives in the supervisor; this type
/// only starts, pumps and stops.
#[derive(Debug)]
pub struct LocationSource<P> {
    provider: Arc<P>,
    position: Arc<DlSyncMutex<Slot>>,
    heading: Arc<DlSyncMutex<Slot>>,
}

/// Permission to start one subscription, handed out by [`LocationSource::claim`].
#[derive(Debug)]
#[must_use = "a claim must be passed to start_* or the slot stays in Starting"]
pub struct StartClaim {
    kind: SubscriptionKind,
    generation: u64,
}

impl<P: PositioningProvider> LocationSource<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            position: Arc::new(DlSyncMutex::new(Slot::default())),
            heading: Arc::new(DlSyncMutex::new(Slot::default())),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn slot(&self, kind: SubscriptionKind) -> &Arc<DlSyncMutex<Slot>> {
        match kind {
            SubscriptionKind::Position => &self.position,
            SubscriptionKind::Heading => &self.heading,
        }
    }

    /// Reserve the slot if nothing is running or starting. Synchronous so the
    /// caller can decide under its own lock.
    pub fn claim(&self, kind: SubscriptionKind) -> Option<StartClaim> {
        let mut slot = self.slot(kind).lock();
        match slot.state {
            SlotState::Idle => {
                slot.state = SlotState::Starting;
                Some(StartClaim {
                    kind,
                    generation: slot.generation,
                })
            }
            SlotState::Starting | SlotState::Active(_) => None,
        }
    }

    pub async fn start_position(
        &self,
        claim: StartClaim,
        config: &LocationConfig,
        store: &Arc<LocationStore>,
    ) -> Result<(), SourceError> {
        debug_assert_eq!(claim.kind, SubscriptionKind::Position);
        let opened = self.provider.watch_position(config).await;
        let store = Arc::clone(store);
        self.install(claim, opened, move |l| store.set_location(l))
    }

    pub async fn start_heading(
        &self,
        claim: StartClaim,
        store: &Arc<LocationStore>,
    ) -> Result<(), SourceError> {
        debug_assert_eq!(claim.kind, SubscriptionKind::Heading);
        let opened = self.provider.watch_heading().await;
        let store = Arc::clone(store);
        self.install(claim, opened, move |h| store.set_heading(h))
    }

    fn install<T: Send + 'static>(
        &self,
        claim: StartClaim,
        opened: Result<BoxStream<'static, Result<T, SourceError>>, SourceError>,
        publish: impl Fn(T) + Send + 'static,
    ) -> Result<(), SourceError> {
        let kind = claim.kind;
        let slot_ref = self.slot(kind);
        let mut slot = slot_ref.lock();
        let current = slot.generation == claim.generation
            && matches!(slot.state, SlotState::Starting);

        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                if current {
                    slot.state = SlotState::Idle;
                }
                tracing::warn!("failed to start {kind} subscription: {e}");
                return Err(e);
            }
        };

        if !current {
            // stopped while the provider was starting; dropping the stream releases it
            tracing::debug!("{kind} subscription stopped before it started");
            return Ok(());
        }

        let handle = tokio::spawn(pump(
            kind,
            Arc::clone(slot_ref),
            claim.generation,
            stream,
            publish,
        ));
        slot.state = SlotState::Active(handle);
        tracing::info!("{kind} subscription started");
        Ok(())
    }

    /// Synchronously tear down the subscription of `kind`, if any.
    pub fn stop(&self, kind: SubscriptionKind) {
        let mut slot = self.slot(kind).lock();
        slot.generation += 1;
        match std::mem::take(&mut slot.state) {
            SlotState::Idle => {}
            SlotState::Starting => tracing::debug!("{kind} subscription cancelled while starting"),
            SlotState::Active(handle) => {
                handle.abort();
                tracing::info!("{kind} subscription stopped");
            }
        }
    }

    pub fn is_active(&self, kind: SubscriptionKind) -> bool {
        matches!(self.slot(kind).lock().state, SlotState::Active(_))
    }
}

async fn pump<T>(
    kind: SubscriptionKind,
    slot: Arc<DlSyncMutex<Slot>>,
    generation: u64,
    mut stream: BoxStream<'static, Result<T, SourceError>>,
    publish: impl Fn(T),
) {
    let is_current = || slot.lock().generation == generation;

    while let Some(item) = stream.next().await {
        match item {
            Ok(v) => {
                if !is_current() {
                    return;
                }
                publish(v);
            }
            Err(e) => {
                tracing::warn!("{kind} subscription failed, tearing down: {e}");
                break;
            }
        }
    }

    let mut slot = slot.lock();
    if slot.generation == generation {
        tracing::info!("{kind} subscription ended");
        slot.generation += 1;
        slot.state = SlotState::Idle;
    }
}
