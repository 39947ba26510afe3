use std::sync::Arc;

use crate::{
    config::LocationConfig,
    directions::DirectionsCache,
    gateway::SyncGateway,
    location::{
        LocationStore, LocationSupervisor, PermissionStatus, PositioningProvider, Subscription,
    },
    models::{Id, RouteAssignment, RouteState, Truck},
    progress::ProgressTracker,
    route::RouteAssignmentStateMachine,
    Error,
};

/// One explicitly owned instance of everything the app shares: the location
/// multiplexer, the route state machine, the directions cache and the
/// progress tracker, wired together.
#[derive(Debug)]
pub struct Engine<P, G> {
    pub location: Arc<LocationSupervisor<P>>,
    pub route: Arc<RouteAssignmentStateMachine<G>>,
    pub directions: Arc<DirectionsCache>,
    pub progress: Arc<ProgressTracker>,
    _progress_sub: Subscription,
}

impl<P: PositioningProvider, G: SyncGateway> Engine<P, G> {
    pub fn new(provider: Arc<P>, gateway: Arc<G>, config: LocationConfig) -> Self {
        let directions = Arc::new(DirectionsCache::new());
        let location = Arc::new(LocationSupervisor::new(provider, config));
        let route = Arc::new(RouteAssignmentStateMachine::new(
            gateway,
            Arc::clone(&directions),
        ));
        let progress = Arc::new(ProgressTracker::new(Arc::clone(&directions)));
        let progress_sub = progress.attach(location.store());

        Self {
            location,
            route,
            directions,
            progress,
            _progress_sub: progress_sub,
        }
    }

    pub fn store(&self) -> &Arc<LocationStore> {
        self.location.store()
    }

    /// Rebuild local state from the server after launch or resume. An
    /// accepted route gets its directions loaded with the assigned section
    /// selected. `Ok(None)` when the truck has no assignment.
    pub async fn resume(&self, truck_id: Id<Truck>) -> Result<Option<RouteAssignment>, Error> {
        let a = match self.route.fetch_assigned_route(truck_id).await {
            Ok(a) => a,
            Err(Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if a.state == RouteState::Accepted {
            self.route.load_directions(a.route_id).await?;
            if self
                .directions
                .set_selected_route_section_id(a.route_section_id)
                .is_err()
            {
                tracing::warn!(
                    "assigned section {} is not part of route {}, keeping first section",
                    a.route_section_id,
                    a.route_id
                );
            }
        }
        tracing::info!("resumed truck {truck_id} on route {} ({})", a.route_id, a.state);
        Ok(Some(a))
    }

    /// Start location tracking for this engine. Denied permission is
    /// reported as `PermissionDenied` and leaves the demand registered until
    /// [`stop_tracking`](Self::stop_tracking).
    pub async fn start_tracking(&self) -> Result<(), Error> {
        match self.location.enable().await? {
            PermissionStatus::Granted => Ok(()),
            PermissionStatus::Denied => Err(Error::PermissionDenied),
        }
    }

    pub fn stop_tracking(&self) {
        self.location.disable();
    }

    /// Forget everything tied to the signed-in driver.
    pub fn logout(&self) {
        self.route.clear();
        self.progress.reset();
        self.location.shutdown();
    }
}
