use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use crate::{config::LocationConfig, dl::DlSyncMutex, Error};

use super::{
    source::SubscriptionKind, LocationSource, LocationStore, PermissionStatus, PositioningProvider,
};

#[derive(Debug, Default)]
struct Demand {
    position: usize,
    heading: usize,
}
impl Demand {
    fn get_mut(&mut self, kind: SubscriptionKind) -> &mut usize {
        match kind {
            SubscriptionKind::Position => &mut self.position,
            SubscriptionKind::Heading => &mut self.heading,
        }
    }
}

#[derive(Debug, Default)]
struct PermissionGate {
    status: Option<PermissionStatus>,
}

/// Lifecycle owner of the location hardware.
///
/// Consumers signal demand with [`enable`](Self::enable) /
/// [`disable`](Self::disable). The hardware subscription runs iff permission
/// was granted and net demand is positive; heading has its own count.
#[derive(Debug)]
pub struct LocationSupervisor<P> {
    source: LocationSource<P>,
    store: Arc<LocationStore>,
    config: LocationConfig,

    // lock order: demand -> source slot
    demand: DlSyncMutex<Demand>,

    permission: tokio::sync::Mutex<PermissionGate>,
    // bumped every time a prompt completes; lets waiters reuse its answer
    permission_epoch: AtomicU64,
    permission_denied: AtomicBool,
}

impl<P: PositioningProvider> LocationSupervisor<P> {
    pub fn new(provider: Arc<P>, config: LocationConfig) -> Self {
        Self::with_store(provider, config, Arc::new(LocationStore::new()))
    }

    pub fn with_store(provider: Arc<P>, config: LocationConfig, store: Arc<LocationStore>) -> Self {
        Self {
            source: LocationSource::new(provider),
            store,
            config,
            demand: DlSyncMutex::new(Demand::default()),
            permission: tokio::sync::Mutex::new(PermissionGate::default()),
            permission_epoch: AtomicU64::new(0),
            permission_denied: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<LocationStore> {
        &self.store
    }

    pub fn config(&self) -> &LocationConfig {
        &self.config
    }

    /// Add one unit of location demand. Resolves once the subscription is
    /// running or another caller is starting it, or with `Denied` if the user
    /// refused permission. Denied demand is still counted and must be matched
    /// by a `disable()`; demand whose start failed with an error is not.
    pub async fn enable(&self) -> Result<PermissionStatus, Error> {
        self.add_demand(SubscriptionKind::Position).await
    }

    pub fn disable(&self) {
        self.remove_demand(SubscriptionKind::Position);
    }

    pub async fn enable_heading(&self) -> Result<PermissionStatus, Error> {
        self.add_demand(SubscriptionKind::Heading).await
    }

    pub fn disable_heading(&self) {
        self.remove_demand(SubscriptionKind::Heading);
    }

    pub fn permission_denied(&self) -> bool {
        self.permission_denied.load(Ordering::Acquire)
    }

    /// `Err(PermissionDenied)` while the last prompt was refused.
    pub fn check_permission(&self) -> Result<(), Error> {
        if self.permission_denied() {
            return Err(Error::PermissionDenied);
        }
        Ok(())
    }

    pub fn demand(&self) -> usize {
        self.demand.lock().position
    }

    pub fn heading_demand(&self) -> usize {
        self.demand.lock().heading
    }

    pub fn is_running(&self) -> bool {
        self.source.is_active(SubscriptionKind::Position)
    }

    pub fn is_heading_running(&self) -> bool {
        self.source.is_active(SubscriptionKind::Heading)
    }

    /// Drop all demand, stop both subscriptions and forget the snapshots.
    pub fn shutdown(&self) {
        let mut demand = self.demand.lock();
        for kind in [SubscriptionKind::Position, SubscriptionKind::Heading] {
            *demand.get_mut(kind) = 0;
            self.source.stop(kind);
        }
        drop(demand);
        self.store.clear();
        tracing::info!("location supervisor shut down");
    }

    async fn add_demand(&self, kind: SubscriptionKind) -> Result<PermissionStatus, Error> {
        {
            let mut demand = self.demand.lock();
            let n = demand.get_mut(kind);
            *n += 1;
            tracing::debug!("{kind} demand -> {n}");
        }

        let status = self.ensure_permission().await;
        if status == PermissionStatus::Denied {
            return Ok(status);
        }

        // claim under the demand lock so a concurrent disable() either sees
        // the claim and cancels it, or runs first and we see zero demand
        let claim = {
            let demand = self.demand.lock();
            let n = match kind {
                SubscriptionKind::Position => demand.position,
                SubscriptionKind::Heading => demand.heading,
            };
            if n == 0 {
                return Ok(status);
            }
            self.source.claim(kind)
        };
        let Some(claim) = claim else {
            // running, or another enable() is starting it
            return Ok(status);
        };

        let started = match kind {
            SubscriptionKind::Position => {
                self.source
                    .start_position(claim, &self.config, &self.store)
                    .await
            }
            SubscriptionKind::Heading => self.source.start_heading(claim, &self.store).await,
        };
        if let Err(e) = started {
            // a caller that got an error owes no disable()
            let mut demand = self.demand.lock();
            let n = demand.get_mut(kind);
            *n = n.saturating_sub(1);
            tracing::debug!("{kind} demand -> {n} after failed start");
            return Err(e.into());
        }
        Ok(status)
    }

    fn remove_demand(&self, kind: SubscriptionKind) {
        let mut demand = self.demand.lock();
        let n = demand.get_mut(kind);
        if *n == 0 {
            tracing::warn!("{kind} disable() without matching enable()");
            return;
        }
        *n -= 1;
        tracing::debug!("{kind} demand -> {n}");
        if *n == 0 {
            self.source.stop(kind);
        }
    }

    async fn ensure_permission(&self) -> PermissionStatus {
        let seen = self.permission_epoch.load(Ordering::Acquire);
        let mut gate = self.permission.lock().await;

        if gate.status == Some(PermissionStatus::Granted) {
            return PermissionStatus::Granted;
        }
        if let Some(status) = gate.status {
            if self.permission_epoch.load(Ordering::Acquire) != seen {
                // a prompt finished while we were queued on the gate
                return status;
            }
        }

        tracing::info!("requesting foreground location permission");
        let status = self.source.provider().request_foreground_permission().await;
        gate.status = Some(status);
        self.permission_epoch.fetch_add(1, Ordering::AcqRel);
        let denied = status == PermissionStatus::Denied;
        self.permission_denied.store(denied, Ordering::Release);
        if denied {
            tracing::warn!("location permission denied");
        }
        status
    }
}
