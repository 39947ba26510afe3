//! Versioned route-assignment state machine.
//!
//! Every transition is a round trip through the [`SyncGateway`]; local state
//! changes only after the service accepted it. Mutations are admitted one at
//! a time by a [`BusyGate`] and run on their own task, so a caller that stops
//! waiting does not lose a result the service already applied.
//!
//! Each operation that can change the record takes a sequence number when it
//! is issued. A response is applied only if nothing issued after it has been
//! applied yet, so the latest issued answer wins regardless of arrival order.

pub mod guard;

use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tokio::sync::broadcast;

use crate::{
    directions::DirectionsCache,
    dl::{DlSyncMutex, DlSyncRwLock},
    gateway::{AssignRouteRequest, GatewayError, RouteDecisionRequest, SyncGateway},
    models::{Id, Route, RouteAssignment, RouteSection, RouteState, Truck, VersionTriplet},
    Error, HashMap,
};

pub use guard::{BusyGate, BusyGuard};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteEvent {
    /// Local record replaced by the server's; `None` when the truck has none.
    Fetched(Option<RouteAssignment>),
    Assigned(RouteAssignment),
    Accepted(RouteAssignment),
    Declined(Id<Route>),
    Completed(Id<Route>),
    Cleared,
}

#[derive(Debug, Default)]
struct Record {
    assignment: Option<RouteAssignment>,
    // sequence number of the last operation whose response was applied
    applied_seq: u64,
}

#[derive(Debug)]
pub struct RouteAssignmentStateMachine<G> {
    inner: Arc<Inner<G>>,
}

#[derive(Debug)]
struct Inner<G> {
    gateway: Arc<G>,
    directions: Arc<DirectionsCache>,
    record: DlSyncRwLock<Record>,
    issued: AtomicU64,
    busy: BusyGate,
    events: broadcast::Sender<RouteEvent>,
    // reused by every retry of the same completion until the service acks it
    completion_keys: DlSyncMutex<HashMap<Id<Route>, String>>,
}

/// Run a mutation to completion on its own task.
async fn detach<T: Send + 'static>(
    op: &'static str,
    fut: impl Future<Output = Result<T, Error>> + Send + 'static,
) -> Result<T, Error> {
    match tokio::spawn(fut).await {
        Ok(r) => r,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(Error::NetworkFailure(format!("{op} did not finish: {e}"))),
    }
}

impl<G: SyncGateway> RouteAssignmentStateMachine<G> {
    pub fn new(gateway: Arc<G>, directions: Arc<DirectionsCache>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                gateway,
                directions,
                record: DlSyncRwLock::new(Record::default()),
                issued: AtomicU64::new(0),
                busy: BusyGate::new(),
                events,
                completion_keys: DlSyncMutex::new(HashMap::default()),
            }),
        }
    }

    pub fn current(&self) -> Option<RouteAssignment> {
        self.inner.current()
    }

    pub fn state(&self) -> RouteState {
        self.inner
            .record
            .read()
            .assignment
            .as_ref()
            .map_or(RouteState::Unassigned, |a| a.state)
    }

    pub fn is_trip_active(&self) -> bool {
        self.inner.directions.is_trip_active()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.is_busy()
    }

    pub fn events(&self) -> broadcast::Receiver<RouteEvent> {
        self.inner.events.subscribe()
    }

    /// Ask the server for the truck's assignment and adopt it. `NotFound`
    /// clears the local record before it is returned.
    pub async fn fetch_assigned_route(
        &self,
        truck_id: Id<Truck>,
    ) -> Result<RouteAssignment, Error> {
        let inner = &self.inner;
        let seq = inner.issue();
        match inner.gateway.fetch_assigned_route(truck_id).await {
            Ok(a) => {
                tracing::info!("truck {truck_id}: route {} is {}", a.route_id, a.state);
                inner.apply_read(seq, Some(a.clone()));
                Ok(a)
            }
            Err(GatewayError::NotFound(what)) => {
                tracing::info!("truck {truck_id}: no assignment");
                inner.apply_read(seq, None);
                Err(Error::NotFound(what))
            }
            Err(e) => {
                tracing::warn!("fetching assignment for {truck_id} failed: {e}");
                Err(e.into())
            }
        }
    }

    pub async fn assign(
        &self,
        route_id: Id<Route>,
        route_section_id: Id<RouteSection>,
        truck_id: Id<Truck>,
    ) -> Result<RouteAssignment, Error> {
        let busy = self.inner.busy.try_enter("assign")?;

        if let Some(cur) = self.current() {
            if cur.truck_id == truck_id && cur.state.is_active() {
                return Err(Error::Conflict(
                    "truck already holds an active assignment, fetch and reconcile first",
                ));
            }
        }

        let req = AssignRouteRequest {
            route_id,
            route_section_id,
            truck_id,
        };
        let seq = self.inner.issue();
        let inner = Arc::clone(&self.inner);
        detach("assign", async move {
            let _busy = busy;
            inner.finish_assign(seq, req).await
        })
        .await
    }

    /// Assigned → Accepted. `version` is forwarded untouched; on
    /// `StaleVersion` nothing changes and the caller must re-fetch.
    pub async fn accept(
        &self,
        route_id: Id<Route>,
        route_section_id: Id<RouteSection>,
        version: VersionTriplet,
    ) -> Result<RouteAssignment, Error> {
        let busy = self.inner.busy.try_enter("accept")?;
        self.inner.check_decidable(route_id, "accept")?;

        let req = RouteDecisionRequest {
            route_id,
            route_section_id,
            version,
        };
        let seq = self.inner.issue();
        let inner = Arc::clone(&self.inner);
        detach("accept", async move {
            let _busy = busy;
            inner.finish_accept(seq, req).await
        })
        .await
    }

    /// Assigned → Declined, with the same version discipline as `accept`. The
    /// local assignment and its directions are dropped on success.
    pub async fn decline(
        &self,
        route_id: Id<Route>,
        route_section_id: Id<RouteSection>,
        version: VersionTriplet,
    ) -> Result<(), Error> {
        let busy = self.inner.busy.try_enter("decline")?;
        self.inner.check_decidable(route_id, "decline")?;

        let req = RouteDecisionRequest {
            route_id,
            route_section_id,
            version,
        };
        let seq = self.inner.issue();
        let inner = Arc::clone(&self.inner);
        detach("decline", async move {
            let _busy = busy;
            inner.finish_decline(seq, req).await
        })
        .await
    }

    /// Accepted → Completed. Completing an already completed or unknown route
    /// is an ack. Retries after a failed attempt carry the same idempotency
    /// key.
    pub async fn complete(&self, route_id: Id<Route>) -> Result<(), Error> {
        let busy = self.inner.busy.try_enter("complete")?;

        if let Some(a) = self.current().filter(|a| a.route_id == route_id) {
            match a.state {
                RouteState::Completed => {
                    tracing::debug!("route {route_id} already completed");
                    return Ok(());
                }
                RouteState::Accepted => {}
                state => return Err(Error::InvalidTransition { state, op: "complete" }),
            }
        }

        let key = self.inner.completion_key(route_id);
        let seq = self.inner.issue();
        let inner = Arc::clone(&self.inner);
        detach("complete", async move {
            let _busy = busy;
            inner.finish_complete(seq, route_id, key).await
        })
        .await
    }

    /// Fetch sections and along-route entities of `route_id` and install them
    /// as the current directions.
    pub async fn load_directions(&self, route_id: Id<Route>) -> Result<Arc<Route>, Error> {
        self.inner.load_directions(route_id).await
    }

    /// Forget the assignment and its directions (logout). In-flight responses
    /// issued before this are not applied.
    pub fn clear(&self) {
        let inner = &self.inner;
        let seq = inner.issue();
        {
            let mut rec = inner.record.write();
            rec.applied_seq = rec.applied_seq.max(seq);
            rec.assignment = None;
        }
        inner.completion_keys.lock().clear();
        inner.directions.clear_directions();
        inner.directions.set_trip_active(false);
        tracing::info!("route state cleared");
        inner.emit(RouteEvent::Cleared);
    }
}

impl<G: SyncGateway> Inner<G> {
    fn current(&self) -> Option<RouteAssignment> {
        self.record.read().assignment.clone()
    }

    fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn emit(&self, ev: RouteEvent) {
        tracing::debug!("route event: {ev:?}");
        // no receivers is fine
        let _ = self.events.send(ev);
    }

    /// Run `f` on the record unless an operation issued after `seq` has
    /// already been applied.
    fn apply<R>(
        &self,
        seq: u64,
        op: &'static str,
        f: impl FnOnce(&mut Option<RouteAssignment>) -> R,
    ) -> Option<R> {
        let mut rec = self.record.write();
        if seq < rec.applied_seq {
            tracing::warn!(
                "{op} response #{seq} superseded by #{}, not applied",
                rec.applied_seq
            );
            return None;
        }
        rec.applied_seq = seq;
        Some(f(&mut rec.assignment))
    }

    fn apply_read(&self, seq: u64, fetched: Option<RouteAssignment>) -> bool {
        if self
            .apply(seq, "fetch", |rec| *rec = fetched.clone())
            .is_none()
        {
            return false;
        }

        match &fetched {
            Some(a) if a.state.is_active() => {
                if self.directions.route_id().is_some_and(|r| r != a.route_id) {
                    self.directions.clear_directions();
                }
            }
            _ => self.directions.clear_directions(),
        }
        self.directions
            .set_trip_active(fetched.as_ref().is_some_and(|a| a.is_trip_active()));
        self.emit(RouteEvent::Fetched(fetched));
        true
    }

    fn check_decidable(&self, route_id: Id<Route>, op: &'static str) -> Result<(), Error> {
        let rec = self.record.read();
        match &rec.assignment {
            None => Err(Error::NotFound("no route assigned")),
            Some(a) if a.route_id != route_id => {
                Err(Error::NotFound("route is not the current assignment"))
            }
            Some(a) if a.state != RouteState::Assigned => {
                Err(Error::InvalidTransition { state: a.state, op })
            }
            Some(_) => Ok(()),
        }
    }

    fn completion_key(&self, route_id: Id<Route>) -> String {
        self.completion_keys
            .lock()
            .entry(route_id)
            .or_insert_with(|| ulid::Ulid::new().to_string())
            .clone()
    }

    async fn finish_assign(
        &self,
        seq: u64,
        req: AssignRouteRequest,
    ) -> Result<RouteAssignment, Error> {
        let a = self.gateway.assign_route(&req).await?;
        let (route_id, truck_id) = (req.route_id, req.truck_id);

        if self.apply(seq, "assign", |rec| *rec = Some(a.clone())).is_none() {
            return Ok(a);
        }
        if self.directions.route_id().is_some_and(|r| r != route_id) {
            self.directions.clear_directions();
        }
        self.directions.set_trip_active(false);
        tracing::info!("truck {truck_id} assigned route {route_id}");
        self.emit(RouteEvent::Assigned(a.clone()));
        Ok(a)
    }

    async fn finish_accept(
        &self,
        seq: u64,
        req: RouteDecisionRequest,
    ) -> Result<RouteAssignment, Error> {
        let route_id = req.route_id;
        let a = match self.gateway.accept_route(&req).await {
            Ok(a) => a,
            Err(GatewayError::StaleVersion) => {
                tracing::info!("accept {route_id} rejected: stale version {}", req.version);
                return Err(Error::StaleVersion);
            }
            Err(e) => return Err(e.into()),
        };

        if self.apply(seq, "accept", |rec| *rec = Some(a.clone())).is_none() {
            return Ok(a);
        }
        self.directions.set_trip_active(a.is_trip_active());
        if self.directions.route_id() != Some(route_id) {
            if let Err(e) = self.load_directions(route_id).await {
                tracing::warn!("route {route_id} accepted but directions unavailable: {e}");
            }
        }
        self.directions.select_first_section();

        tracing::info!("route {route_id} accepted");
        self.emit(RouteEvent::Accepted(a.clone()));
        Ok(a)
    }

    async fn finish_decline(&self, seq: u64, req: RouteDecisionRequest) -> Result<(), Error> {
        let route_id = req.route_id;
        match self.gateway.decline_route(&req).await {
            Ok(()) => {}
            Err(GatewayError::StaleVersion) => {
                tracing::info!("decline {route_id} rejected: stale version {}", req.version);
                return Err(Error::StaleVersion);
            }
            Err(e) => return Err(e.into()),
        }

        if self.apply(seq, "decline", |rec| *rec = None).is_none() {
            return Ok(());
        }
        self.directions.clear_route(route_id);
        self.directions.set_trip_active(false);
        tracing::info!("route {route_id} declined");
        self.emit(RouteEvent::Declined(route_id));
        Ok(())
    }

    async fn finish_complete(
        &self,
        seq: u64,
        route_id: Id<Route>,
        key: String,
    ) -> Result<(), Error> {
        self.gateway.complete_route(route_id, &key).await?;
        self.completion_keys.lock().remove(&route_id);

        let was_current = self.apply(seq, "complete", |rec| match rec.as_mut() {
            Some(a) if a.route_id == route_id => {
                a.state = RouteState::Completed;
                true
            }
            _ => false,
        });
        let Some(was_current) = was_current else {
            return Ok(());
        };
        self.directions.clear_route(route_id);
        if was_current {
            self.directions.set_trip_active(false);
        }
        tracing::info!("route {route_id} completed");
        self.emit(RouteEvent::Completed(route_id));
        Ok(())
    }

    async fn load_directions(&self, route_id: Id<Route>) -> Result<Arc<Route>, Error> {
        let route = self.gateway.fetch_directions(route_id).await?;

        if let Some(a) = self.current() {
            if a.route_id != route_id {
                tracing::warn!(
                    "directions for {route_id} arrived after assignment moved to {}, not installed",
                    a.route_id
                );
                return Ok(Arc::new(route));
            }
        }
        tracing::debug!("directions for {route_id}: {} sections", route.sections.len());
        self.directions.set_directions(route);
        self.directions
            .route()
            .ok_or(Error::NotFound("directions cleared while loading"))
    }
}
