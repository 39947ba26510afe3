use std::sync::Arc;

use anyhow::Context as _;
use tollroute::{
    config::{LocationConfig, Platform},
    gateway::{HttpSyncGateway, InMemoryRouteService, SyncGateway},
    location::ReplayProvider,
    models::{Id, Route, RouteSection, RouteState, Toll, Truck, VersionTriplet, WeighStation},
    progress::ProgressEvent,
    Coordinate, Engine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let v = std::env::var_os("V").is_some();
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", if v { "debug" } else { "info" });
    }
    tracing_subscriber::fmt::init();

    let config = LocationConfig::from_env(Platform::current())?;
    let truck: Id<Truck> = std::env::var("TRUCK_ID")
        .unwrap_or_else(|_| "truck-1".to_owned())
        .as_str()
        .into();
    let replay = std::env::var("REPLAY_FILE")
        .ok()
        .map(ReplayProvider::from_file)
        .transpose()?;

    if let Ok(url) = std::env::var("ROUTE_SERVICE_URL") {
        let gateway = HttpSyncGateway::new(&url)?;
        let provider = replay.context("REPLAY_FILE is required with ROUTE_SERVICE_URL")?;
        let engine = Engine::new(Arc::new(provider), Arc::new(gateway), config);
        return drive(engine, truck).await;
    }

    let route = demo_route();
    let provider = match replay {
        Some(p) => p,
        None => ReplayProvider::new(track_along(&route)),
    };
    let service = InMemoryRouteService::new();
    service.add_route(route.clone(), VersionTriplet::new("fp-1", "val-1", "rv-1"));

    let engine = Engine::new(Arc::new(provider), Arc::new(service), config);
    if engine.resume(truck).await?.is_none() {
        let first = route.sections[0].route_section_id;
        let a = engine.route.assign(route.route_id, first, truck).await?;
        engine
            .route
            .accept(a.route_id, a.route_section_id, a.version)
            .await?;
    }
    drive(engine, truck).await
}

async fn drive<G: SyncGateway>(
    engine: Engine<ReplayProvider, G>,
    truck: Id<Truck>,
) -> anyhow::Result<()> {
    let Some(a) = engine.resume(truck).await? else {
        tracing::info!("truck {truck} has no route");
        return Ok(());
    };
    if a.state != RouteState::Accepted {
        tracing::info!("route {} is {}, nothing to drive", a.route_id, a.state);
        return Ok(());
    }

    let mut route_events = engine.route.events();
    tokio::spawn(async move {
        while let Ok(ev) = route_events.recv().await {
            tracing::info!("route: {ev:?}");
        }
    });

    let mut progress = engine.progress.events();
    engine.start_tracking().await?;

    loop {
        tokio::select! {
            ev = progress.recv() => match ev {
                Ok(ProgressEvent::RouteFinished(route_id)) => {
                    engine.route.complete(route_id).await?;
                    break;
                }
                Ok(ev) => tracing::info!("progress: {ev:?}"),
                Err(e) => {
                    tracing::warn!("progress events: {e}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!(
        "drove {:.0}m, state {}",
        engine.progress.travelled_meters(),
        engine.route.state()
    );
    engine.stop_tracking();
    engine.logout();
    Ok(())
}

fn demo_route() -> Route {
    let a = Coordinate::new(35.6812, 139.7671);
    let b = Coordinate::new(35.6897, 139.7003);
    let c = Coordinate::new(35.6580, 139.7016);
    let s1: Id<RouteSection> = "demo-s1".into();
    let s2: Id<RouteSection> = "demo-s2".into();
    Route {
        route_id: "demo-route".into(),
        sections: vec![
            RouteSection {
                route_section_id: s1,
                drive_time_secs: 900,
                geometry: vec![a, b],
            },
            RouteSection {
                route_section_id: s2,
                drive_time_secs: 600,
                geometry: vec![b, c],
            },
        ],
        tolls: vec![Toll {
            id: "demo-toll".into(),
            route_section: s1,
            name: "Shinjuku".to_owned(),
            position: midpoint(a, b),
            cost_cents: 1320,
        }],
        weigh_stations: vec![WeighStation {
            id: "demo-scale".into(),
            route_section: s2,
            name: "Shibuya scale".to_owned(),
            position: midpoint(b, c),
        }],
    }
}

fn midpoint(a: Coordinate, b: Coordinate) -> Coordinate {
    Coordinate::new(
        (a.latitude + b.latitude) / 2.0,
        (a.longitude + b.longitude) / 2.0,
    )
}

/// Fixes every ~10% of each section's straight-line geometry.
fn track_along(route: &Route) -> Vec<Coordinate> {
    let mut track = vec![];
    for section in &route.sections {
        for w in section.geometry.windows(2) {
            let (from, to) = (w[0], w[1]);
            for i in 0..=10 {
                let t = f64::from(i) / 10.0;
                track.push(Coordinate::new(
                    from.latitude + (to.latitude - from.latitude) * t,
                    from.longitude + (to.longitude - from.longitude) * t,
                ));
            }
        }
    }
    track
}
