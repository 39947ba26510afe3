use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::Error;

/// Admits one mutating route operation at a time.
#[derive(Debug, Clone, Default)]
pub struct BusyGate(Arc<AtomicBool>);

impl BusyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Err(Busy)` if another operation holds the gate. Never waits.
    pub fn try_enter(&self, op: &'static str) -> Result<BusyGuard, Error> {
        if self
            .0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("{op} rejected: busy");
            return Err(Error::Busy);
        }
        Ok(BusyGuard {
            gate: Arc::clone(&self.0),
            op,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
#[must_use = "hold this until the operation has been applied"]
pub struct BusyGuard {
    gate: Arc<AtomicBool>,
    op: &'static str,
}
impl BusyGuard {
    pub fn op(&self) -> &'static str {
        self.op
    }
}
impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.gate.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_entry_is_busy_until_first_drops() {
        let gate = BusyGate::new();
        let g = gate.try_enter("accept").unwrap();
        assert_eq!(g.op(), "accept");
        assert!(gate.is_busy());
        assert_eq!(gate.try_enter("decline").unwrap_err(), Error::Busy);
        drop(g);
        assert!(!gate.is_busy());
        let _g = gate.try_enter("decline").unwrap();
    }
}
