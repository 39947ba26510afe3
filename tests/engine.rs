//! Engine wiring: resume from the server, drive along the route, logout.

mod common;

use std::sync::Arc;

use common::{deliver, fix, settle, FakeProvider};
use tollroute::{
    config::{LocationConfig, Platform},
    gateway::InMemoryRouteService,
    location::PermissionStatus,
    models::{
        Id, Route, RouteAssignment, RouteSection, RouteState, Toll, VersionTriplet, WeighStation,
    },
    progress::ProgressEvent,
    Coordinate, Engine, Error,
};

fn corridor() -> Route {
    let s1: Id<RouteSection> = Id::from("i80-w");
    let s2: Id<RouteSection> = Id::from("i80-e");
    Route {
        route_id: Id::from("i80"),
        sections: vec![
            RouteSection {
                route_section_id: s1,
                drive_time_secs: 1800,
                geometry: vec![Coordinate::new(41.0, -96.0), Coordinate::new(41.0, -95.9)],
            },
            RouteSection {
                route_section_id: s2,
                drive_time_secs: 1800,
                geometry: vec![Coordinate::new(41.0, -95.9), Coordinate::new(41.0, -95.8)],
            },
        ],
        tolls: vec![Toll {
            id: Id::from("i80-toll"),
            route_section: s1,
            name: "Missouri River bridge".to_owned(),
            position: Coordinate::new(41.0, -95.95),
            cost_cents: 300,
        }],
        weigh_stations: vec![WeighStation {
            id: Id::from("i80-scale"),
            route_section: s2,
            name: "Council Bluffs scale".to_owned(),
            position: Coordinate::new(41.0, -95.85),
        }],
    }
}

type TestEngine = Engine<FakeProvider, InMemoryRouteService>;

fn engine(
    permission: PermissionStatus,
) -> (Arc<FakeProvider>, Arc<InMemoryRouteService>, TestEngine) {
    let provider = Arc::new(FakeProvider::new(permission));
    let service = Arc::new(InMemoryRouteService::new());
    service.add_route(corridor(), VersionTriplet::new("fp", "val", "rv"));
    let e = Engine::new(
        Arc::clone(&provider),
        Arc::clone(&service),
        LocationConfig::for_platform(Platform::Ios),
    );
    (provider, service, e)
}

#[tokio::test]
async fn resume_restores_accepted_trip_with_assigned_section() {
    let (_p, service, e) = engine(PermissionStatus::Granted);
    service.seed_assignment(RouteAssignment {
        route_id: Id::from("i80"),
        route_section_id: Id::from("i80-e"),
        truck_id: Id::from("T"),
        version: VersionTriplet::new("fp", "val", "rv"),
        state: RouteState::Accepted,
    });

    let a = e.resume(Id::from("T")).await.unwrap().unwrap();
    assert_eq!(a.state, RouteState::Accepted);
    assert!(e.route.is_trip_active());
    assert_eq!(e.directions.selected_route_section_id(), Some(Id::from("i80-e")));
    assert_eq!(e.directions.visible_weigh_stations().len(), 1);
    assert!(e.directions.visible_tolls().is_empty());
}

#[tokio::test]
async fn resume_without_assignment_is_none() {
    let (_p, _s, e) = engine(PermissionStatus::Granted);
    assert_eq!(e.resume(Id::from("T")).await, Ok(None));
    assert_eq!(e.route.state(), RouteState::Unassigned);
}

#[tokio::test]
async fn driving_the_route_reports_progress() {
    let (provider, _s, e) = engine(PermissionStatus::Granted);
    let a = e
        .route
        .assign(Id::from("i80"), Id::from("i80-w"), Id::from("T"))
        .await
        .unwrap();
    e.route
        .accept(a.route_id, a.route_section_id, a.version)
        .await
        .unwrap();
    let mut progress = e.progress.events();

    e.start_tracking().await.unwrap();
    settle().await;
    for lon in [-96.0, -95.95, -95.9, -95.85, -95.8] {
        deliver(&provider, e.store(), fix(41.0, lon)).await;
    }

    let mut seen = vec![];
    while let Ok(ev) = progress.try_recv() {
        seen.push(ev);
    }
    assert!(matches!(&seen[0], ProgressEvent::ArrivedAtToll(t) if t.cost_cents == 300));
    assert_eq!(
        seen[1],
        ProgressEvent::SectionCompleted {
            completed: Id::from("i80-w"),
            next: Id::from("i80-e"),
        }
    );
    assert!(matches!(&seen[2], ProgressEvent::ArrivedAtWeighStation(_)));
    assert_eq!(seen[3], ProgressEvent::RouteFinished(Id::from("i80")));
    assert_eq!(seen.len(), 4);

    e.route.complete(a.route_id).await.unwrap();
    assert!(!e.route.is_trip_active());
    e.stop_tracking();
    settle().await;
    assert_eq!(provider.live_position(), 0);
}

#[tokio::test]
async fn denied_permission_surfaces_as_error() {
    let (provider, _s, e) = engine(PermissionStatus::Denied);
    assert_eq!(e.start_tracking().await, Err(Error::PermissionDenied));
    assert!(e.location.permission_denied());
    assert_eq!(provider.live_position(), 0);
    e.stop_tracking();
}

#[tokio::test]
async fn logout_clears_everything() {
    let (provider, _s, e) = engine(PermissionStatus::Granted);
    let a = e
        .route
        .assign(Id::from("i80"), Id::from("i80-w"), Id::from("T"))
        .await
        .unwrap();
    e.route
        .accept(a.route_id, a.route_section_id, a.version)
        .await
        .unwrap();
    e.start_tracking().await.unwrap();
    settle().await;
    deliver(&provider, e.store(), fix(41.0, -96.0)).await;

    e.logout();
    settle().await;
    assert_eq!(e.route.state(), RouteState::Unassigned);
    assert!(e.directions.route().is_none());
    assert!(!e.route.is_trip_active());
    assert!(e.store().get_snapshot().is_none());
    assert_eq!(provider.live_position(), 0);
    assert_eq!(e.progress.travelled_meters(), 0.0);
}
