use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use futures::{stream, StreamExt as _};

use crate::{config::LocationConfig, Coordinate};

use super::{
    Heading, HeadingStream, Location, PermissionStatus, PositionStream, PositioningProvider,
    SourceError,
};

/// Positioning provider that plays back a recorded track, one fix per
/// `minIntervalMs`. Stands in for device hardware in the demo binary and on
/// desktop.
#[derive(Debug, Clone)]
pub struct ReplayProvider {
    track: Arc<[Coordinate]>,
    live: Arc<AtomicUsize>,
    speed_mps: f32,
}

struct LiveGuard(Arc<AtomicUsize>);
impl LiveGuard {
    fn new(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(live))
    }
}
impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ReplayProvider {
    pub fn new(track: Vec<Coordinate>) -> Self {
        Self {
            track: track.into(),
            live: Arc::new(AtomicUsize::new(0)),
            speed_mps: 22.0,
        }
    }

    /// Load a JSON array of `{"latitude": .., "longitude": ..}`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SourceError(format!("reading {}: {e}", path.display())))?;
        let track: Vec<Coordinate> = serde_json::from_str(&raw)
            .map_err(|e| SourceError(format!("parsing {}: {e}", path.display())))?;
        if track.is_empty() {
            return Err(SourceError(format!("{} holds no fixes", path.display())));
        }
        tracing::info!("loaded {} fixes from {}", track.len(), path.display());
        Ok(Self::new(track))
    }

    /// Streams currently open, position and heading together.
    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    fn legs(&self) -> impl Iterator<Item = (Coordinate, Option<f64>)> + Send + 'static {
        let track = Arc::clone(&self.track);
        (0..track.len()).map(move |i| {
            let here = track[i];
            let bearing = track.get(i + 1).map(|next| here.bearing_to(*next));
            (here, bearing)
        })
    }
}

impl PositioningProvider for ReplayProvider {
    async fn request_foreground_permission(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }

    async fn watch_position(&self, config: &LocationConfig) -> Result<PositionStream, SourceError> {
        if self.track.is_empty() {
            return Err(SourceError("empty track".to_owned()));
        }
        let every = Duration::from_millis(config.min_interval_ms);
        let speed = self.speed_mps;
        let guard = LiveGuard::new(&self.live);

        let s = stream::iter(self.legs())
            .then(move |(c, bearing)| async move {
                tokio::time::sleep(every).await;
                Ok(Location {
                    latitude: c.latitude,
                    longitude: c.longitude,
                    accuracy: 5.0,
                    heading: bearing.map(|b| b as f32),
                    speed: Some(speed),
                    timestamp: Utc::now(),
                })
            })
            .map(move |x| {
                let _live = &guard;
                x
            });
        Ok(s.boxed())
    }

    async fn watch_heading(&self) -> Result<HeadingStream, SourceError> {
        let guard = LiveGuard::new(&self.live);
        let s = stream::iter(self.legs())
            .filter_map(|(_, bearing)| async move { bearing })
            .then(|b| async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(Heading {
                    magnetic: b as f32,
                    true_heading: Some(b as f32),
                    accuracy: None,
                    timestamp: Utc::now(),
                })
            })
            .map(move |x| {
                let _live = &guard;
                x
            });
        Ok(s.boxed())
    }
}
