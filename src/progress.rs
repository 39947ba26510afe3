use std::sync::{Arc, Weak};

use tokio::sync::broadcast;

use crate::{
    directions::{filter_by_section, DirectionsCache, SectionAdvance},
    dl::DlSyncMutex,
    location::{Location, LocationStore, Subscription},
    models::{Id, Route, RouteSection, Toll, WeighStation},
    Coordinate, HashSet,
};

crate::conf_env!(static ARRIVAL_RADIUS_METERS: f64 = {
    from: "ARRIVAL_RADIUS_METERS",
    default: "50",
});

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    ArrivedAtToll(Toll),
    ArrivedAtWeighStation(WeighStation),
    SectionCompleted {
        completed: Id<RouteSection>,
        next: Id<RouteSection>,
    },
    RouteFinished(Id<Route>),
}

#[derive(Debug, Default)]
struct ProgressState {
    route: Option<Id<Route>>,
    section: Option<Id<RouteSection>>,
    reached_tolls: HashSet<Id<Toll>>,
    reached_weigh_stations: HashSet<Id<WeighStation>>,
    finished: bool,
    last: Option<Coordinate>,
    travelled_meters: f64,
}
impl ProgressState {
    fn enter_section(&mut self, section: Id<RouteSection>) {
        self.section = Some(section);
        self.reached_tolls.clear();
        self.reached_weigh_stations.clear();
    }
}

/// Turns live location into trip progress: arrival at tolls and weigh
/// stations of the selected section, and section transitions.
#[derive(Debug)]
pub struct ProgressTracker {
    directions: Arc<DirectionsCache>,
    radius_meters: f64,
    state: DlSyncMutex<ProgressState>,
    events: broadcast::Sender<ProgressEvent>,
}

impl ProgressTracker {
    pub fn new(directions: Arc<DirectionsCache>) -> Self {
        Self::with_radius(directions, *ARRIVAL_RADIUS_METERS)
    }

    pub fn with_radius(directions: Arc<DirectionsCache>, radius_meters: f64) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            directions,
            radius_meters,
            state: DlSyncMutex::new(ProgressState::default()),
            events,
        }
    }

    /// Evaluate every location published to `store` until the returned
    /// subscription is dropped.
    pub fn attach(self: &Arc<Self>, store: &LocationStore) -> Subscription {
        let weak: Weak<Self> = Arc::downgrade(self);
        store.subscribe(move |l| {
            if let Some(t) = weak.upgrade() {
                t.evaluate(l);
            }
        })
    }

    pub fn events(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Distance covered on the current route since its first evaluated fix.
    pub fn travelled_meters(&self) -> f64 {
        self.state.lock().travelled_meters
    }

    pub fn reset(&self) {
        *self.state.lock() = ProgressState::default();
    }

    pub fn evaluate(&self, location: &Location) -> Vec<ProgressEvent> {
        if !self.directions.is_trip_active() {
            return vec![];
        }
        let Some((route, Some(selected))) = self.directions.snapshot() else {
            return vec![];
        };
        let Some(section) = route.section(selected) else {
            return vec![];
        };
        let here = location.coord();
        let mut out = vec![];

        let mut st = self.state.lock();
        if st.route != Some(route.route_id) {
            *st = ProgressState {
                route: Some(route.route_id),
                ..Default::default()
            };
        }
        if st.finished {
            return out;
        }
        if st.section != Some(selected) {
            st.enter_section(selected);
        }
        if let Some(prev) = st.last {
            st.travelled_meters += prev.distance_meters(here);
        }
        st.last = Some(here);

        for toll in filter_by_section(&route.tolls, Some(selected)) {
            if here.is_within(toll.position, self.radius_meters) && st.reached_tolls.insert(toll.id)
            {
                tracing::info!("arrived at toll {}", toll.name);
                out.push(ProgressEvent::ArrivedAtToll(toll));
            }
        }
        for ws in filter_by_section(&route.weigh_stations, Some(selected)) {
            if here.is_within(ws.position, self.radius_meters)
                && st.reached_weigh_stations.insert(ws.id)
            {
                tracing::info!("arrived at weigh station {}", ws.name);
                out.push(ProgressEvent::ArrivedAtWeighStation(ws));
            }
        }

        let at_end = section
            .geometry
            .last()
            .is_some_and(|end| here.is_within(*end, self.radius_meters));
        if at_end {
            match self.directions.select_next_section() {
                SectionAdvance::Moved(next) => {
                    tracing::info!("section {selected} completed, now on {next}");
                    st.enter_section(next);
                    out.push(ProgressEvent::SectionCompleted {
                        completed: selected,
                        next,
                    });
                }
                SectionAdvance::AtEnd => {
                    tracing::info!("route {} finished", route.route_id);
                    st.finished = true;
                    out.push(ProgressEvent::RouteFinished(route.route_id));
                }
                SectionAdvance::NoDirections => {}
            }
        }
        drop(st);

        for ev in &out {
            let _ = self.events.send(ev.clone());
        }
        out
    }
}
