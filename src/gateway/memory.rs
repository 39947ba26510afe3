use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crate::{
    dl::DlSyncMutex,
    models::{Id, Route, RouteAssignment, RouteState, Truck, VersionTriplet},
    HashMap,
};

use super::{AssignRouteRequest, GatewayError, Result, RouteDecisionRequest, SyncGateway};

/// A call as it reached the service, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    FetchAssignedRoute(Id<Truck>),
    Assign(AssignRouteRequest),
    Accept(RouteDecisionRequest),
    Decline(RouteDecisionRequest),
    Complete {
        route_id: Id<Route>,
        idempotency_key: String,
    },
    FetchDirections(Id<Route>),
}

#[derive(Debug)]
enum Fault {
    /// The request never reaches the service.
    Lost(GatewayError),
    /// The service applies the request, the response is lost.
    ResponseDropped(GatewayError),
}

#[derive(Debug, Default)]
struct ServiceState {
    routes: HashMap<Id<Route>, (Route, VersionTriplet)>,
    assignments: HashMap<Id<Truck>, RouteAssignment>,
}

impl ServiceState {
    fn by_route(&mut self, route_id: Id<Route>) -> Option<&mut RouteAssignment> {
        self.assignments
            .values_mut()
            .find(|a| a.route_id == route_id && a.state != RouteState::Declined)
    }

    fn decide(&mut self, req: &RouteDecisionRequest) -> Result<&mut RouteAssignment> {
        let current = self
            .routes
            .get(&req.route_id)
            .map(|(_, v)| *v)
            .ok_or(GatewayError::NotFound("route not found"))?;
        let a = self
            .by_route(req.route_id)
            .ok_or(GatewayError::NotFound("no such assignment"))?;
        if a.state != RouteState::Assigned {
            return Err(GatewayError::Conflict);
        }
        if req.version != current {
            return Err(GatewayError::StaleVersion);
        }
        Ok(a)
    }
}

/// Authoritative route service kept in memory. Implements the same contract
/// as the HTTP service, including version checks and idempotent completion,
/// and can inject latency and faults.
#[derive(Debug, Default)]
pub struct InMemoryRouteService {
    state: DlSyncMutex<ServiceState>,
    faults: DlSyncMutex<VecDeque<Fault>>,
    requests: DlSyncMutex<Vec<Request>>,
    latency_ms: AtomicU64,
}

impl InMemoryRouteService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `route` with `version` as its current fuel-plan triplet.
    pub fn add_route(&self, route: Route, version: VersionTriplet) {
        self.state
            .lock()
            .routes
            .insert(route.route_id, (route, version));
    }

    /// The fuel plan of `route_id` was re-validated: `version` becomes current
    /// and every open assignment of the route carries it.
    pub fn revalidate(&self, route_id: Id<Route>, version: VersionTriplet) {
        let mut state = self.state.lock();
        if let Some((_, v)) = state.routes.get_mut(&route_id) {
            *v = version;
        }
        for a in state.assignments.values_mut() {
            if a.route_id == route_id && a.state.is_active() {
                a.version = version;
            }
        }
        tracing::debug!("route {route_id} revalidated to {version}");
    }

    /// Install an assignment as if another client had created it.
    pub fn seed_assignment(&self, assignment: RouteAssignment) {
        self.state
            .lock()
            .assignments
            .insert(assignment.truck_id, assignment);
    }

    pub fn assignment(&self, truck_id: Id<Truck>) -> Option<RouteAssignment> {
        self.state.lock().assignments.get(&truck_id).cloned()
    }

    pub fn current_version(&self, route_id: Id<Route>) -> Option<VersionTriplet> {
        self.state.lock().routes.get(&route_id).map(|(_, v)| *v)
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Release);
    }

    /// The next request is lost before the service sees it.
    pub fn fail_next(&self, e: GatewayError) {
        self.faults.lock().push_back(Fault::Lost(e));
    }

    /// The next request is applied but its response is lost.
    pub fn drop_next_response(&self, e: GatewayError) {
        self.faults.lock().push_back(Fault::ResponseDropped(e));
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    async fn call<T: Send>(
        &self,
        req: Request,
        f: impl FnOnce(&mut ServiceState) -> Result<T> + Send,
    ) -> Result<T> {
        tracing::debug!("route service <- {req:?}");
        self.requests.lock().push(req);

        let fault = self.faults.lock().pop_front();
        let res = match fault {
            None => f(&mut *self.state.lock()),
            Some(Fault::Lost(e)) => Err(e),
            Some(Fault::ResponseDropped(e)) => {
                let applied = f(&mut *self.state.lock());
                tracing::debug!("route service dropped response (applied: {})", applied.is_ok());
                Err(e)
            }
        };

        // the request is applied on arrival; only the response is late
        let latency = self.latency_ms.load(Ordering::Acquire);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        res
    }
}

impl SyncGateway for InMemoryRouteService {
    async fn fetch_assigned_route(&self, truck_id: Id<Truck>) -> Result<RouteAssignment> {
        self.call(Request::FetchAssignedRoute(truck_id), |s| {
            s.assignments
                .get(&truck_id)
                .filter(|a| a.state != RouteState::Declined)
                .cloned()
                .ok_or(GatewayError::NotFound("no route assigned to truck"))
        })
        .await
    }

    async fn assign_route(&self, req: &AssignRouteRequest) -> Result<RouteAssignment> {
        self.call(Request::Assign(req.clone()), |s| {
            let (route, version) = s
                .routes
                .get(&req.route_id)
                .ok_or(GatewayError::NotFound("route not found"))?;
            if route.section(req.route_section_id).is_none() {
                return Err(GatewayError::NotFound("route section not found"));
            }
            if s.assignments
                .get(&req.truck_id)
                .is_some_and(|a| a.state.is_active())
            {
                return Err(GatewayError::Conflict);
            }
            let a = RouteAssignment {
                route_id: req.route_id,
                route_section_id: req.route_section_id,
                truck_id: req.truck_id,
                version: *version,
                state: RouteState::Assigned,
            };
            s.assignments.insert(req.truck_id, a.clone());
            Ok(a)
        })
        .await
    }

    async fn accept_route(&self, req: &RouteDecisionRequest) -> Result<RouteAssignment> {
        self.call(Request::Accept(req.clone()), |s| {
            let a = s.decide(req)?;
            a.state = RouteState::Accepted;
            Ok(a.clone())
        })
        .await
    }

    async fn decline_route(&self, req: &RouteDecisionRequest) -> Result<()> {
        self.call(Request::Decline(req.clone()), |s| {
            let a = s.decide(req)?;
            a.state = RouteState::Declined;
            Ok(())
        })
        .await
    }

    async fn complete_route(&self, route_id: Id<Route>, idempotency_key: &str) -> Result<()> {
        let req = Request::Complete {
            route_id,
            idempotency_key: idempotency_key.to_owned(),
        };
        self.call(req, |s| {
            let Some(a) = s.by_route(route_id) else {
                return Ok(());
            };
            match a.state {
                RouteState::Accepted => {
                    a.state = RouteState::Completed;
                    Ok(())
                }
                RouteState::Completed => Ok(()),
                _ => Err(GatewayError::Conflict),
            }
        })
        .await
    }

    async fn fetch_directions(&self, route_id: Id<Route>) -> Result<Route> {
        self.call(Request::FetchDirections(route_id), |s| {
            s.routes
                .get(&route_id)
                .map(|(r, _)| r.clone())
                .ok_or(GatewayError::NotFound("route not found"))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directions::tests::sample_route;

    fn service() -> InMemoryRouteService {
        let s = InMemoryRouteService::new();
        s.add_route(
            sample_route("r1", &["s1", "s2"]),
            VersionTriplet::new("fp1", "v1", "rv1"),
        );
        s
    }

    fn assign_req(truck: &str) -> AssignRouteRequest {
        AssignRouteRequest {
            route_id: Id::from("r1"),
            route_section_id: Id::from("s1"),
            truck_id: Id::from(truck),
        }
    }

    #[tokio::test]
    async fn assign_then_conflict() {
        let s = service();
        let a = s.assign_route(&assign_req("T")).await.unwrap();
        assert_eq!(a.state, RouteState::Assigned);
        assert_eq!(a.version, VersionTriplet::new("fp1", "v1", "rv1"));
        assert!(matches!(
            s.assign_route(&assign_req("T")).await,
            Err(GatewayError::Conflict)
        ));
    }

    #[tokio::test]
    async fn accept_checks_version_after_revalidation() {
        let s = service();
        s.assign_route(&assign_req("T")).await.unwrap();
        s.revalidate(Id::from("r1"), VersionTriplet::new("fp1", "v2", "rv1"));

        let mut req = RouteDecisionRequest {
            route_id: Id::from("r1"),
            route_section_id: Id::from("s1"),
            version: VersionTriplet::new("fp1", "v1", "rv1"),
        };
        assert!(matches!(
            s.accept_route(&req).await,
            Err(GatewayError::StaleVersion)
        ));
        assert_eq!(
            s.assignment(Id::from("T")).unwrap().state,
            RouteState::Assigned
        );

        req.version = s.fetch_assigned_route(Id::from("T")).await.unwrap().version;
        let a = s.accept_route(&req).await.unwrap();
        assert_eq!(a.state, RouteState::Accepted);
    }

    #[tokio::test]
    async fn complete_is_idempotent_and_survives_dropped_response() {
        let s = service();
        let a = s.assign_route(&assign_req("T")).await.unwrap();
        s.accept_route(&RouteDecisionRequest {
            route_id: a.route_id,
            route_section_id: a.route_section_id,
            version: a.version,
        })
        .await
        .unwrap();

        s.drop_next_response(GatewayError::Unavailable("timeout".to_owned()));
        assert!(s.complete_route(Id::from("r1"), "k1").await.is_err());
        s.complete_route(Id::from("r1"), "k1").await.unwrap();
        s.complete_route(Id::from("r1"), "k2").await.unwrap();
        s.complete_route(Id::from("never-assigned"), "k3").await.unwrap();
        assert_eq!(
            s.assignment(Id::from("T")).unwrap().state,
            RouteState::Completed
        );
        assert_eq!(s.requests().len(), 6);
    }

    #[tokio::test]
    async fn lost_request_is_not_applied() {
        let s = service();
        s.fail_next(GatewayError::Unavailable("offline".to_owned()));
        assert!(s.assign_route(&assign_req("T")).await.is_err());
        assert!(s.assignment(Id::from("T")).is_none());
    }
}
