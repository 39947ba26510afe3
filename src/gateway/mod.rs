//! Request/response contract with the remote route service.
//!
//! The service is authoritative for assignments and fuel-plan versions. No
//! call is retried here; retry policy belongs to the caller.

mod http;
mod memory;

use std::future::Future;

pub use http::HttpSyncGateway;
pub use memory::{InMemoryRouteService, Request};

use crate::models::{Id, Route, RouteAssignment, RouteSection, Truck, VersionTriplet};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    NotFound(&'static str),
    #[error("truck already holds an active assignment")]
    Conflict,
    #[error("version triplet does not match the server")]
    StaleVersion,
    #[error("unexpected status code ({0})")]
    Status(reqwest::StatusCode),
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("route service unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRouteRequest {
    pub route_id: Id<Route>,
    pub route_section_id: Id<RouteSection>,
    pub truck_id: Id<Truck>,
}

/// Body of accept and decline. The triplet is forwarded exactly as the client
/// last received it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDecisionRequest {
    pub route_id: Id<Route>,
    pub route_section_id: Id<RouteSection>,
    #[serde(flatten)]
    pub version: VersionTriplet,
}

pub trait SyncGateway: Send + Sync + 'static {
    fn fetch_assigned_route(
        &self,
        truck_id: Id<Truck>,
    ) -> impl Future<Output = Result<RouteAssignment>> + Send;

    /// `Conflict` if the truck already holds an Assigned or Accepted route.
    fn assign_route(
        &self,
        req: &AssignRouteRequest,
    ) -> impl Future<Output = Result<RouteAssignment>> + Send;

    /// `StaleVersion` if the triplet is not the server's current one.
    fn accept_route(
        &self,
        req: &RouteDecisionRequest,
    ) -> impl Future<Output = Result<RouteAssignment>> + Send;

    fn decline_route(&self, req: &RouteDecisionRequest) -> impl Future<Output = Result<()>> + Send;

    /// Idempotent; completing an absent or completed route is an ack.
    /// `idempotency_key` must be the same for every retry of one completion.
    fn complete_route(
        &self,
        route_id: Id<Route>,
        idempotency_key: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn fetch_directions(&self, route_id: Id<Route>) -> impl Future<Output = Result<Route>> + Send;
}
