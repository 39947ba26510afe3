//! Scripted positioning provider shared by the integration tests.

#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use futures::StreamExt as _;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use tollroute::{
    config::LocationConfig,
    location::{
        Heading, HeadingStream, Location, LocationStore, PermissionStatus, PositionStream,
        PositioningProvider, SourceError,
    },
};

type Feed<T> = Mutex<Option<mpsc::UnboundedSender<Result<T, SourceError>>>>;

/// Counts open streams; the count drops when a stream is dropped.
struct Live(Arc<AtomicUsize>);
impl Live {
    fn new(n: &Arc<AtomicUsize>) -> Self {
        n.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(n))
    }
}
impl Drop for Live {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct FakeProvider {
    permission: Mutex<PermissionStatus>,
    prompt_delay: Duration,
    prompts: AtomicUsize,
    position_starts: AtomicUsize,
    fail_next_start: AtomicBool,
    position_feed: Feed<Location>,
    heading_feed: Feed<Heading>,
    live_position: Arc<AtomicUsize>,
    live_heading: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn new(permission: PermissionStatus) -> Self {
        Self::with_prompt_delay(permission, Duration::ZERO)
    }

    pub fn with_prompt_delay(permission: PermissionStatus, prompt_delay: Duration) -> Self {
        Self {
            permission: Mutex::new(permission),
            prompt_delay,
            prompts: AtomicUsize::new(0),
            position_starts: AtomicUsize::new(0),
            fail_next_start: AtomicBool::new(false),
            position_feed: Mutex::new(None),
            heading_feed: Mutex::new(None),
            live_position: Arc::new(AtomicUsize::new(0)),
            live_heading: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// What the user answers on the next prompt.
    pub fn set_permission(&self, p: PermissionStatus) {
        *self.permission.lock() = p;
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn position_starts(&self) -> usize {
        self.position_starts.load(Ordering::SeqCst)
    }

    pub fn live_position(&self) -> usize {
        self.live_position.load(Ordering::SeqCst)
    }

    pub fn live_heading(&self) -> usize {
        self.live_heading.load(Ordering::SeqCst)
    }

    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    /// Emit a fix on the open position stream. False if none is open.
    pub fn push(&self, location: Location) -> bool {
        self.position_feed
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(location)).is_ok())
    }

    pub fn push_error(&self, msg: &str) -> bool {
        self.position_feed
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(Err(SourceError(msg.to_owned()))).is_ok())
    }

    pub fn push_heading(&self, magnetic: f32) -> bool {
        let h = Heading {
            magnetic,
            true_heading: None,
            accuracy: None,
            timestamp: Utc::now(),
        };
        self.heading_feed
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(h)).is_ok())
    }
}

impl PositioningProvider for FakeProvider {
    async fn request_foreground_permission(&self) -> PermissionStatus {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if !self.prompt_delay.is_zero() {
            tokio::time::sleep(self.prompt_delay).await;
        }
        *self.permission.lock()
    }

    async fn watch_position(
        &self,
        _config: &LocationConfig,
    ) -> Result<PositionStream, SourceError> {
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(SourceError("location services unavailable".to_owned()));
        }
        self.position_starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.position_feed.lock() = Some(tx);
        let live = Live::new(&self.live_position);
        Ok(UnboundedReceiverStream::new(rx)
            .map(move |x| {
                let _live = &live;
                x
            })
            .boxed())
    }

    async fn watch_heading(&self) -> Result<HeadingStream, SourceError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.heading_feed.lock() = Some(tx);
        let live = Live::new(&self.live_heading);
        Ok(UnboundedReceiverStream::new(rx)
            .map(move |x| {
                let _live = &live;
                x
            })
            .boxed())
    }
}

pub fn fix(lat: f64, lon: f64) -> Location {
    Location {
        latitude: lat,
        longitude: lon,
        accuracy: 4.0,
        heading: None,
        speed: Some(20.0),
        timestamp: Utc::now(),
    }
}

/// Let spawned pumps and aborted tasks run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Push `location` and wait until the store has published it.
pub async fn deliver(provider: &FakeProvider, store: &LocationStore, location: Location) {
    let mut rx = store.watch();
    let _ = rx.borrow_and_update();
    assert!(provider.push(location), "no position stream open");
    tokio::time::timeout(Duration::from_secs(5), rx.changed())
        .await
        .expect("fix not delivered")
        .expect("store dropped");
}
