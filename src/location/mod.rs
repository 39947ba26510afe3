pub mod replay;
pub mod source;
pub mod store;
pub mod supervisor;

use chrono::{DateTime, Utc};

use crate::Coordinate;

pub use replay::ReplayProvider;
pub use source::{
    HeadingStream, LocationSource, PositionStream, PositioningProvider, SubscriptionKind,
};
pub use store::{LocationStore, Subscription};
pub use supervisor::LocationSupervisor;

/// One position fix. Never mutated after it is published; a newer fix
/// replaces it wholesale.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// meters
    pub accuracy: f32,
    pub heading: Option<f32>,
    /// m/s
    pub speed: Option<f32>,
    pub timestamp: DateTime<Utc>,
}
impl Location {
    pub fn coord(&self) -> Coordinate {
        Coordinate {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heading {
    pub magnetic: f32,
    pub true_heading: Option<f32>,
    pub accuracy: Option<f32>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SourceError(pub String);
