use std::{borrow::Cow, hash::Hash, marker::PhantomData, str::FromStr, sync::LazyLock};

use derivative::Derivative;
use thiserror::Error;

use crate::{ConcurrentHashMap, Coordinate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteState {
    Unassigned,
    Assigned,
    Accepted,
    Declined,
    Completed,
}
impl RouteState {
    /// Assigned or Accepted; the truck cannot take another route.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Assigned | Self::Accepted)
    }
}
#[derive(Debug, Error)]
pub enum RouteStateParseError {
    #[error("failed to parse route state")]
    Error,
}
impl std::fmt::Display for RouteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RouteState::Unassigned => "UNASSIGNED",
            RouteState::Assigned => "ASSIGNED",
            RouteState::Accepted => "ACCEPTED",
            RouteState::Declined => "DECLINED",
            RouteState::Completed => "COMPLETED",
        };
        write!(f, "{s}")
    }
}
impl FromStr for RouteState {
    type Err = RouteStateParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use RouteState::*;
        let r = match s {
            "UNASSIGNED" => Unassigned,
            "ASSIGNED" => Assigned,
            "ACCEPTED" => Accepted,
            "DECLINED" => Declined,
            "COMPLETED" => Completed,
            _ => return Err(RouteStateParseError::Error),
        };
        Ok(r)
    }
}

#[derive(Derivative)]
#[derivative(
    Debug(bound = ""),
    Clone(bound = ""),
    Copy(bound = ""),
    Hash(bound = ""),
    PartialEq(bound = ""),
    Eq(bound = "")
)]
pub struct Id<T>(Symbol, PhantomData<fn() -> T>);
impl<T> serde::Serialize for Id<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}
impl<'de, T> serde::Deserialize<'de> for Id<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::new_from(Symbol::deserialize(deserializer)?))
    }
}
impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.resolve())
    }
}
impl<T> From<&str> for Id<T> {
    fn from(s: &str) -> Self {
        Self::new_from(Symbol::new_from_ref(s))
    }
}
impl<T> Id<T> {
    pub fn new_from(s: Symbol) -> Self {
        Id(s, PhantomData)
    }
    pub fn resolve(&self) -> &'static str {
        self.0.resolve()
    }
}

static STRING_TABLE: LazyLock<ConcurrentHashMap<&'static str, ()>> =
    LazyLock::new(Default::default);

/// Interned string. Ids are compared and hashed a lot (every location update
/// filters along-route entities by section id), so each distinct string is
/// stored once and compared by pointer.
#[derive(Debug, Clone, Copy)]
pub struct Symbol(&'static str);
impl PartialEq<Symbol> for Symbol {
    fn eq(&self, other: &Symbol) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}
impl Eq for Symbol {}
impl Hash for Symbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}
impl Symbol {
    fn new_from_inner(s: Cow<'_, str>) -> Self {
        if let Some(st) = STRING_TABLE.get(s.as_ref()) {
            return Symbol(*st.key());
        }
        let stored: &'static str = String::leak(s.into_owned());
        // a racing insert of the same string wins; ours stays leaked
        let entry = STRING_TABLE.entry(stored).or_insert(());
        Symbol(*entry.key())
    }

    pub fn new_from_ref(s: &str) -> Self {
        Self::new_from_inner(s.into())
    }
    pub fn new_from(s: String) -> Self {
        Self::new_from_inner(s.into())
    }

    #[inline(always)]
    pub fn resolve(&self) -> &'static str {
        self.0
    }
}
impl serde::Serialize for Symbol {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.resolve().serialize(serializer)
    }
}
impl<'de> serde::Deserialize<'de> for Symbol {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <Cow<'de, str>>::deserialize(deserializer)?;
        Ok(Self::new_from_inner(s))
    }
}

pub enum Truck {}
pub enum FuelPlan {}
pub enum FuelPlanValidator {}
pub enum FuelRouteVersion {}

/// `(fuelPlanId, fuelPlanValidatorId, fuelRouteVersionId)`. Opaque to the
/// client: it is forwarded exactly as last received and only the server
/// decides whether it is still current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionTriplet {
    pub fuel_plan_id: Id<FuelPlan>,
    pub fuel_plan_validator_id: Id<FuelPlanValidator>,
    pub fuel_route_version_id: Id<FuelRouteVersion>,
}
impl VersionTriplet {
    pub fn new(plan: &str, validator: &str, route_version: &str) -> Self {
        Self {
            fuel_plan_id: plan.into(),
            fuel_plan_validator_id: validator.into(),
            fuel_route_version_id: route_version.into(),
        }
    }
}
impl std::fmt::Display for VersionTriplet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.fuel_plan_id, self.fuel_plan_validator_id, self.fuel_route_version_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteAssignment {
    pub route_id: Id<Route>,
    pub route_section_id: Id<RouteSection>,
    pub truck_id: Id<Truck>,
    #[serde(flatten)]
    pub version: VersionTriplet,
    pub state: RouteState,
}
impl RouteAssignment {
    pub fn is_trip_active(&self) -> bool {
        self.state == RouteState::Accepted
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSection {
    pub route_section_id: Id<RouteSection>,
    pub drive_time_secs: u64,
    pub geometry: Vec<Coordinate>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub route_id: Id<Route>,
    pub sections: Vec<RouteSection>,
    #[serde(default)]
    pub tolls: Vec<Toll>,
    #[serde(default)]
    pub weigh_stations: Vec<WeighStation>,
}
impl Route {
    pub fn section(&self, id: Id<RouteSection>) -> Option<&RouteSection> {
        self.sections.iter().find(|s| s.route_section_id == id)
    }
    pub fn total_drive_time_secs(&self) -> u64 {
        self.sections.iter().map(|s| s.drive_time_secs).sum()
    }
}

/// Something drawn along the route and shown only for its own section.
pub trait AlongRoute {
    fn route_section(&self) -> Id<RouteSection>;
    fn position(&self) -> Coordinate;
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toll {
    pub id: Id<Toll>,
    pub route_section: Id<RouteSection>,
    pub name: String,
    pub position: Coordinate,
    pub cost_cents: i64,
}
impl AlongRoute for Toll {
    fn route_section(&self) -> Id<RouteSection> {
        self.route_section
    }
    fn position(&self) -> Coordinate {
        self.position
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeighStation {
    pub id: Id<WeighStation>,
    pub route_section: Id<RouteSection>,
    pub name: String,
    pub position: Coordinate,
}
impl AlongRoute for WeighStation {
    fn route_section(&self) -> Id<RouteSection> {
        self.route_section
    }
    fn position(&self) -> Coordinate {
        self.position
    }
}
