use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    dl::DlSyncRwLock,
    models::{AlongRoute, Id, Route, RouteSection, Toll, WeighStation},
    Error,
};

/// Entities of `items` that belong to `selected`. Nothing is visible without a
/// selection.
pub fn filter_by_section<T: AlongRoute + Clone>(
    items: &[T],
    selected: Option<Id<RouteSection>>,
) -> Vec<T> {
    let Some(selected) = selected else {
        return vec![];
    };
    items
        .iter()
        .filter(|x| x.route_section() == selected)
        .cloned()
        .collect()
}

#[derive(Debug, Clone)]
struct Directions {
    route: Arc<Route>,
    selected: Option<Id<RouteSection>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionAdvance {
    Moved(Id<RouteSection>),
    /// The selected section was the last one; selection is unchanged.
    AtEnd,
    NoDirections,
}

/// Route geometry of the active trip and the section cursor used to filter
/// what is drawn along it.
///
/// The route and the selection live under one lock, so a reader never sees a
/// selection that points into a different (or cleared) route.
#[derive(Debug, Default)]
pub struct DirectionsCache {
    inner: DlSyncRwLock<Option<Directions>>,
    trip_active: AtomicBool,
}

impl DirectionsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `route` and select its first section.
    pub fn set_directions(&self, route: Route) {
        let selected = route.sections.first().map(|s| s.route_section_id);
        if selected.is_none() {
            tracing::warn!("route {} has no sections", route.route_id);
        }
        tracing::debug!("directions set for route {}", route.route_id);
        *self.inner.write() = Some(Directions {
            route: Arc::new(route),
            selected,
        });
    }

    pub fn clear_directions(&self) {
        *self.inner.write() = None;
    }

    /// Clear only if the cached directions belong to `route_id`.
    pub fn clear_route(&self, route_id: Id<Route>) -> bool {
        let mut inner = self.inner.write();
        if inner.as_ref().is_some_and(|d| d.route.route_id == route_id) {
            *inner = None;
            return true;
        }
        false
    }

    pub fn route(&self) -> Option<Arc<Route>> {
        self.inner.read().as_ref().map(|d| Arc::clone(&d.route))
    }

    pub fn route_id(&self) -> Option<Id<Route>> {
        self.inner.read().as_ref().map(|d| d.route.route_id)
    }

    /// Route and selection read together.
    pub fn snapshot(&self) -> Option<(Arc<Route>, Option<Id<RouteSection>>)> {
        self.inner
            .read()
            .as_ref()
            .map(|d| (Arc::clone(&d.route), d.selected))
    }

    pub fn selected_route_section_id(&self) -> Option<Id<RouteSection>> {
        self.inner.read().as_ref().and_then(|d| d.selected)
    }

    pub fn selected_section(&self) -> Option<RouteSection> {
        let inner = self.inner.read();
        let d = inner.as_ref()?;
        d.route.section(d.selected?).cloned()
    }

    /// Move the cursor. Ids that are not a section of the cached route are
    /// rejected and leave the selection as it was.
    pub fn set_selected_route_section_id(&self, id: Id<RouteSection>) -> Result<(), Error> {
        let mut inner = self.inner.write();
        let Some(d) = inner.as_mut() else {
            return Err(Error::NotFound("no directions loaded"));
        };
        if d.route.section(id).is_none() {
            return Err(Error::NotFound("route section not found"));
        }
        d.selected = Some(id);
        Ok(())
    }

    pub fn select_first_section(&self) -> Option<Id<RouteSection>> {
        let mut inner = self.inner.write();
        let d = inner.as_mut()?;
        d.selected = d.route.sections.first().map(|s| s.route_section_id);
        d.selected
    }

    pub fn select_next_section(&self) -> SectionAdvance {
        let mut inner = self.inner.write();
        let Some(d) = inner.as_mut() else {
            return SectionAdvance::NoDirections;
        };
        let sections = &d.route.sections;
        let next = match d.selected {
            None => sections.first(),
            Some(cur) => sections
                .iter()
                .position(|s| s.route_section_id == cur)
                .and_then(|i| sections.get(i + 1)),
        };
        match next {
            Some(s) => {
                d.selected = Some(s.route_section_id);
                SectionAdvance::Moved(s.route_section_id)
            }
            None => SectionAdvance::AtEnd,
        }
    }

    pub fn visible_tolls(&self) -> Vec<Toll> {
        let inner = self.inner.read();
        match inner.as_ref() {
            Some(d) => filter_by_section(&d.route.tolls, d.selected),
            None => vec![],
        }
    }

    pub fn visible_weigh_stations(&self) -> Vec<WeighStation> {
        let inner = self.inner.read();
        match inner.as_ref() {
            Some(d) => filter_by_section(&d.route.weigh_stations, d.selected),
            None => vec![],
        }
    }

    pub fn set_trip_active(&self, active: bool) {
        let was = self.trip_active.swap(active, Ordering::AcqRel);
        if was != active {
            tracing::info!("trip active: {active}");
        }
    }

    pub fn is_trip_active(&self) -> bool {
        self.trip_active.load(Ordering::Acquire)
    }
}
