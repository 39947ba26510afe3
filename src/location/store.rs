use std::sync::{Arc, Weak};

use chrono::{TimeDelta, Utc};
use derivative::Derivative;
use futures::Stream;
use tokio::sync::watch;
use tokio_stream::{wrappers::WatchStream, StreamExt as _};

use crate::dl::DlSyncMutex;

use super::{Heading, Location};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}
impl<T> Listeners<T> {
    fn new() -> Self {
        Self {
            next_id: 0,
            entries: vec![],
        }
    }
}

/// Latest value of one signal plus the callbacks interested in it.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
struct SnapshotCell<T> {
    #[derivative(Debug = "ignore")]
    value: watch::Sender<Option<T>>,
    #[derivative(Debug = "ignore")]
    listeners: Arc<DlSyncMutex<Listeners<T>>>,
}

impl<T: Clone + Send + Sync + 'static> SnapshotCell<T> {
    fn new() -> Self {
        Self {
            value: watch::Sender::new(None),
            listeners: Arc::new(DlSyncMutex::new(Listeners::new())),
        }
    }

    fn get(&self) -> Option<T> {
        self.value.borrow().clone()
    }

    fn publish(&self, v: T) {
        self.value.send_replace(Some(v.clone()));

        // snapshot the list so listeners may (un)subscribe from inside the callback
        let listeners: Vec<Listener<T>> = {
            let l = self.listeners.lock();
            l.entries.iter().map(|(_, f)| Arc::clone(f)).collect()
        };
        for f in listeners {
            f(&v);
        }
    }

    fn reset(&self) {
        self.value.send_replace(None);
    }

    fn subscribe(&self, f: Listener<T>) -> Subscription {
        let id = {
            let mut l = self.listeners.lock();
            let id = l.next_id;
            l.next_id += 1;
            l.entries.push((id, f));
            id
        };
        let weak: Weak<DlSyncMutex<Listeners<T>>> = Arc::downgrade(&self.listeners);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(l) = weak.upgrade() {
                    l.lock().entries.retain(|(i, _)| *i != id);
                }
            })),
        }
    }

    fn listener_count(&self) -> usize {
        self.listeners.lock().entries.len()
    }
}

/// Handle returned by [`LocationStore::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes the listener"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}
impl Subscription {
    /// Idempotent; later calls and the eventual drop do nothing.
    pub fn unsubscribe(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}
impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.remove.is_some() {
            write!(f, "Subscription(active)")
        } else {
            write!(f, "Subscription(unsubscribed)")
        }
    }
}

/// The single shared view of the vehicle's position and heading.
///
/// There is exactly one store per engine; it is handed to consumers as an
/// `Arc`. Reads never block on the hardware: they copy the last published
/// value. Writers are the [`LocationSource`](super::LocationSource) pumps.
#[derive(Debug)]
pub struct LocationStore {
    location: SnapshotCell<Location>,
    heading: SnapshotCell<Heading>,
}

impl LocationStore {
    pub fn new() -> Self {
        Self {
            location: SnapshotCell::new(),
            heading: SnapshotCell::new(),
        }
    }

    pub fn get_snapshot(&self) -> Option<Location> {
        self.location.get()
    }

    pub fn get_heading(&self) -> Option<Heading> {
        self.heading.get()
    }

    /// `listener` runs synchronously on the publishing task after every new
    /// location, in registration order.
    pub fn subscribe(&self, listener: impl Fn(&Location) + Send + Sync + 'static) -> Subscription {
        self.location.subscribe(Arc::new(listener))
    }

    pub fn subscribe_heading(
        &self,
        listener: impl Fn(&Heading) + Send + Sync + 'static,
    ) -> Subscription {
        self.heading.subscribe(Arc::new(listener))
    }

    /// Receiver for async consumers. A slow reader may miss intermediate
    /// fixes but always sees the latest one on its next read.
    pub fn watch(&self) -> watch::Receiver<Option<Location>> {
        self.location.value.subscribe()
    }

    pub fn location_stream(&self) -> impl Stream<Item = Location> + Send + 'static {
        WatchStream::new(self.watch()).filter_map(|x| x)
    }

    /// Whether the last fix is younger than `max_age`.
    pub fn is_fresh(&self, max_age: TimeDelta) -> bool {
        self.get_snapshot()
            .is_some_and(|l| Utc::now().signed_duration_since(l.timestamp) <= max_age)
    }

    pub fn set_location(&self, location: Location) {
        tracing::trace!(
            "location: {:.6},{:.6} ±{}m",
            location.latitude,
            location.longitude,
            location.accuracy
        );
        self.location.publish(location);
    }

    pub fn set_heading(&self, heading: Heading) {
        self.heading.publish(heading);
    }

    /// Forget both snapshots (logout). Listeners are not called.
    pub fn clear(&self) {
        self.location.reset();
        self.heading.reset();
    }

    pub fn listener_count(&self) -> usize {
        self.location.listener_count()
    }
}
