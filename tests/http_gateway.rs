//! HTTP gateway against a fake route service.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tollroute::{
    gateway::{
        AssignRouteRequest, GatewayError, HttpSyncGateway, RouteDecisionRequest, SyncGateway,
    },
    models::{Id, Route, RouteAssignment, RouteSection, RouteState, VersionTriplet},
    Coordinate, Error,
};

#[derive(Clone, Default)]
struct Fake {
    idempotency_keys: Arc<Mutex<Vec<String>>>,
}

fn assignment(truck: &str, state: RouteState) -> RouteAssignment {
    RouteAssignment {
        route_id: Id::from("r1"),
        route_section_id: Id::from("s1"),
        truck_id: Id::from(truck),
        version: VersionTriplet::new("fp1", "v2", "rv1"),
        state,
    }
}

async fn get_assignment(
    Path(truck): Path<String>,
) -> Result<Json<RouteAssignment>, StatusCode> {
    match truck.as_str() {
        "T" => Ok(Json(assignment("T", RouteState::Assigned))),
        "broken" => Err(StatusCode::INTERNAL_SERVER_ERROR),
        _ => Err(StatusCode::NOT_FOUND),
    }
}

async fn post_assign(
    Json(req): Json<AssignRouteRequest>,
) -> Result<Json<RouteAssignment>, StatusCode> {
    if req.truck_id == Id::from("busy-truck") {
        return Err(StatusCode::CONFLICT);
    }
    Ok(Json(assignment(req.truck_id.resolve(), RouteState::Assigned)))
}

async fn post_accept(
    Json(req): Json<RouteDecisionRequest>,
) -> Result<Json<RouteAssignment>, StatusCode> {
    if req.version != VersionTriplet::new("fp1", "v2", "rv1") {
        return Err(StatusCode::PRECONDITION_FAILED);
    }
    Ok(Json(assignment("T", RouteState::Accepted)))
}

async fn post_decline(Json(req): Json<RouteDecisionRequest>) -> StatusCode {
    if req.version != VersionTriplet::new("fp1", "v2", "rv1") {
        return StatusCode::PRECONDITION_FAILED;
    }
    StatusCode::NO_CONTENT
}

async fn post_complete(
    State(fake): State<Fake>,
    Path(route): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    let Some(key) = headers.get("Idempotency-Key").and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST;
    };
    fake.idempotency_keys.lock().push(key.to_owned());
    if route == "r1" {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn get_directions(Path(route): Path<String>) -> Result<Json<Route>, StatusCode> {
    if route != "r1" {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(Route {
        route_id: Id::from("r1"),
        sections: vec![RouteSection {
            route_section_id: Id::from("s1"),
            drive_time_secs: 3600,
            geometry: vec![Coordinate::new(1.0, 2.0), Coordinate::new(1.5, 2.5)],
        }],
        tolls: vec![],
        weigh_stations: vec![],
    }))
}

async fn serve() -> (HttpSyncGateway, Fake) {
    let fake = Fake::default();
    let app = Router::new()
        .route("/trucks/:truck_id/route-assignment", get(get_assignment))
        .route("/route-assignments", post(post_assign))
        .route("/route-assignments/accept", post(post_accept))
        .route("/route-assignments/decline", post(post_decline))
        .route("/routes/:route_id/complete", post(post_complete))
        .route("/routes/:route_id/directions", get(get_directions))
        .with_state(fake.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let gw = HttpSyncGateway::new(&format!("http://{addr}/")).unwrap();
    (gw, fake)
}

fn decision(validator: &str) -> RouteDecisionRequest {
    RouteDecisionRequest {
        route_id: Id::from("r1"),
        route_section_id: Id::from("s1"),
        version: VersionTriplet::new("fp1", validator, "rv1"),
    }
}

#[tokio::test]
async fn fetch_maps_found_and_missing() {
    let (gw, _) = serve().await;

    let a = gw.fetch_assigned_route(Id::from("T")).await.unwrap();
    assert_eq!(a, assignment("T", RouteState::Assigned));

    let e = gw.fetch_assigned_route(Id::from("nobody")).await.unwrap_err();
    assert!(matches!(e, GatewayError::NotFound(_)));

    let e = gw.fetch_assigned_route(Id::from("broken")).await.unwrap_err();
    assert!(matches!(e, GatewayError::Status(s) if s == StatusCode::INTERNAL_SERVER_ERROR));
    assert!(matches!(Error::from(e), Error::NetworkFailure(_)));
}

#[tokio::test]
async fn assign_conflict_is_409() {
    let (gw, _) = serve().await;
    let req = AssignRouteRequest {
        route_id: Id::from("r1"),
        route_section_id: Id::from("s1"),
        truck_id: Id::from("busy-truck"),
    };
    let e = gw.assign_route(&req).await.unwrap_err();
    assert!(matches!(e, GatewayError::Conflict));
    assert!(matches!(Error::from(e), Error::Conflict(_)));
}

#[tokio::test]
async fn stale_version_is_412() {
    let (gw, _) = serve().await;
    assert!(matches!(
        gw.accept_route(&decision("v1")).await,
        Err(GatewayError::StaleVersion)
    ));
    assert!(matches!(
        gw.decline_route(&decision("v1")).await,
        Err(GatewayError::StaleVersion)
    ));

    let a = gw.accept_route(&decision("v2")).await.unwrap();
    assert_eq!(a.state, RouteState::Accepted);
    gw.decline_route(&decision("v2")).await.unwrap();
}

#[tokio::test]
async fn complete_forwards_idempotency_key_and_acks_unknown_routes() {
    let (gw, fake) = serve().await;
    gw.complete_route(Id::from("r1"), "01J9ZK").await.unwrap();
    gw.complete_route(Id::from("r1"), "01J9ZK").await.unwrap();
    gw.complete_route(Id::from("gone"), "01J9ZM").await.unwrap();

    let keys = fake.idempotency_keys.lock().clone();
    assert_eq!(keys, ["01J9ZK", "01J9ZK", "01J9ZM"]);
}

#[tokio::test]
async fn directions_round_trip() {
    let (gw, _) = serve().await;
    let r = gw.fetch_directions(Id::from("r1")).await.unwrap();
    assert_eq!(r.sections.len(), 1);
    assert_eq!(r.total_drive_time_secs(), 3600);
    assert!(matches!(
        gw.fetch_directions(Id::from("r404")).await,
        Err(GatewayError::NotFound(_))
    ));
}

#[tokio::test]
async fn unreachable_service_is_a_network_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let gw = HttpSyncGateway::new(&format!("http://{addr}")).unwrap();
    let e = gw.fetch_assigned_route(Id::from("T")).await.unwrap_err();
    assert!(matches!(e, GatewayError::Reqwest(_)));
    assert!(matches!(Error::from(e), Error::NetworkFailure(_)));
}
