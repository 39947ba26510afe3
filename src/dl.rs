//! Lock wrappers that report long lock holds and, with the `dl` feature,
//! turn a lock that cannot be acquired into a panic with a trimmed backtrace
//! instead of a silent hang.

use core::fmt;
use std::{
    ops::{Deref, DerefMut},
    time::{Duration, Instant},
};

use backtrace::{BacktraceFmt, BacktraceFrame, BytesOrWideString};
use parking_lot::{Mutex, RwLock};

#[derive(Debug, Default)]
pub struct DlSyncRwLock<T>(RwLock<T>);

impl<T> DlSyncRwLock<T> {
    pub const fn new(v: T) -> Self {
        Self(RwLock::new(v))
    }
    pub fn read(&self) -> impl Deref<Target = T> + '_ {
        #[cfg(feature = "dl")]
        let guard = with_timeout(|d| self.0.try_read_for(d));
        #[cfg(not(feature = "dl"))]
        let guard = self.0.read();
        guard
    }
    pub fn write(&self) -> impl DerefMut<Target = T> + '_ {
        #[cfg(feature = "dl")]
        let guard = with_timeout(|d| self.0.try_write_for(d));
        #[cfg(not(feature = "dl"))]
        let guard = self.0.write();
        TrackedRef::new(guard)
    }
}

#[derive(Debug, Default)]
pub struct DlSyncMutex<T>(Mutex<T>);

impl<T> DlSyncMutex<T> {
    pub const fn new(v: T) -> Self {
        Self(Mutex::new(v))
    }
    pub fn lock(&self) -> impl DerefMut<Target = T> + '_ {
        #[cfg(feature = "dl")]
        let guard = with_timeout(|d| self.0.try_lock_for(d));
        #[cfg(not(feature = "dl"))]
        let guard = self.0.lock();
        TrackedRef::new(guard)
    }
}

crate::conf_env!(static DL_WARN_LOCKHOLD_MS: u64 = {
    from: "DL_WARN_LOCKHOLD_MS",
    default: "200",
});

#[cfg(feature = "dl")]
crate::conf_env!(static DL_TIMEOUT_MS: u64 = {
    from: "DL_TIMEOUT_MS",
    default: "10000",
});

struct TrackedRef<T>(T, Instant);
impl<T> TrackedRef<T> {
    fn new(v: T) -> Self {
        Self(v, Instant::now())
    }
}
impl<T> Drop for TrackedRef<T> {
    fn drop(&mut self) {
        let e = self.1.elapsed();
        if e > Duration::from_millis(*DL_WARN_LOCKHOLD_MS) {
            let bt = get_bt();
            let e = e.as_millis();
            tracing::warn!("lock held {e}ms in:\n{bt}")
        }
    }
}
impl<D: Deref> Deref for TrackedRef<D> {
    type Target = D::Target;
    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}
impl<D: DerefMut> DerefMut for TrackedRef<D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

#[cfg(feature = "dl")]
fn with_timeout<G>(acquire: impl FnOnce(Duration) -> Option<G>) -> G {
    let Some(g) = acquire(Duration::from_millis(*DL_TIMEOUT_MS)) else {
        let bt = get_bt();
        panic!("lock cannot acquired\n{bt}");
    };
    g
}

/// Backtrace reduced to this crate's frames; runs of foreign frames are
/// collapsed into a marker line.
fn get_bt() -> String {
    let bt = backtrace::Backtrace::new();

    let mut frames = vec![vec![]];
    for frame in bt.frames() {
        let useful = frame
            .symbols()
            .iter()
            .flat_map(|x| x.name().and_then(|x| x.as_str()))
            .any(|x| x.contains(env!("CARGO_CRATE_NAME")));
        if !useful {
            if frames.last().is_some_and(|f| !f.is_empty()) {
                frames.push(vec![]);
            }
            continue;
        }
        if let Some(last) = frames.last_mut() {
            last.push(frame);
        }
    }
    frames.retain(|f| !f.is_empty());

    let mut buf = String::new();
    let len = frames.len();
    for (i, frames) in frames.into_iter().enumerate() {
        buf.push_str(&format!("{:?}", CustomDebug(frames)));
        if i != len - 1 {
            buf.push_str("--- collapsed ---\n");
        }
    }
    return buf;

    struct CustomDebug<'a>(Vec<&'a BacktraceFrame>);
    impl std::fmt::Debug for CustomDebug<'_> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let mut pp = |fmt: &mut fmt::Formatter<'_>, path: BytesOrWideString<'_>| {
                fmt::Display::fmt(&path, fmt)
            };
            let mut f = BacktraceFmt::new(f, backtrace::PrintFmt::Short, &mut pp);
            f.add_context()?;
            for frame in &self.0 {
                f.frame().backtrace_frame(frame)?;
            }
            f.finish()
        }
    }
}
