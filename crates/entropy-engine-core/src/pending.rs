//! Pending computation handles and the in-flight tracker.
//!
//! A backend that cannot produce a value immediately hands back a pending
//! handle. Handles support readiness checks, success inspection and blocking
//! retrieval with an optional timeout. A composite handle aggregates several
//! sub-computations and applies its combination formula only in `get`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::normalize::CacheKey;

/// Capability set of an in-flight computation.
pub trait PendingCompute: Send + Sync {
    /// Whether the computation has finished (successfully or not).
    fn ready(&self) -> bool;

    /// Whether the computation finished with a value. Not ready implies not
    /// successful.
    fn successful(&self) -> bool;

    /// Block until completion or until `timeout` elapses. Returns whether
    /// the computation is now ready.
    fn wait(&self, timeout: Option<Duration>) -> bool;

    /// Retrieve the value, blocking up to `timeout` (indefinitely if none).
    fn get(&self, timeout: Option<Duration>) -> EngineResult<f64>;
}

/// Shared handle to an in-flight computation.
pub type PendingValue = Arc<dyn PendingCompute>;

/// A single write-once result slot, fulfilled by a worker thread.
pub struct PendingCell {
    // Failed computations are kept as messages so results stay cloneable.
    state: Mutex<Option<Result<f64, String>>>,
    cond: Condvar,
}

impl PendingCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(None),
            cond: Condvar::new(),
        })
    }

    /// Fulfill the cell. Later calls are ignored; the first result wins.
    pub fn fulfill(&self, result: EngineResult<f64>) {
        let mut state = self.state.lock();
        if state.is_none() {
            *state = Some(result.map_err(|e| e.to_string()));
            self.cond.notify_all();
        }
    }
}

impl PendingCompute for PendingCell {
    fn ready(&self) -> bool {
        self.state.lock().is_some()
    }

    fn successful(&self) -> bool {
        matches!(*self.state.lock(), Some(Ok(_)))
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.state.lock();
        match timeout {
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while state.is_none() {
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while state.is_none() {
                    self.cond.wait(&mut state);
                }
            }
        }
        state.is_some()
    }

    fn get(&self, timeout: Option<Duration>) -> EngineResult<f64> {
        if !self.wait(timeout) {
            return Err(EngineError::NotReady);
        }
        match self.state.lock().as_ref() {
            Some(Ok(value)) => Ok(*value),
            Some(Err(message)) => Err(EngineError::Failed(message.clone())),
            None => Err(EngineError::NotReady),
        }
    }
}

/// An already-computed value wearing the pending interface, so composite
/// handles can mix immediate and asynchronous constituents.
pub struct ReadyValue(pub f64);

impl PendingCompute for ReadyValue {
    fn ready(&self) -> bool {
        true
    }

    fn successful(&self) -> bool {
        true
    }

    fn wait(&self, _timeout: Option<Duration>) -> bool {
        true
    }

    fn get(&self, _timeout: Option<Duration>) -> EngineResult<f64> {
        Ok(self.0)
    }
}

/// Aggregates several pending sub-computations; `get` applies the
/// combination formula to the constituent values.
pub struct CompositePending {
    parts: Vec<PendingValue>,
    combine: Box<dyn Fn(&[f64]) -> f64 + Send + Sync>,
}

impl CompositePending {
    pub fn new(
        parts: Vec<PendingValue>,
        combine: impl Fn(&[f64]) -> f64 + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            parts,
            combine: Box::new(combine),
        })
    }
}

impl PendingCompute for CompositePending {
    fn ready(&self) -> bool {
        self.parts.iter().all(|p| p.ready())
    }

    fn successful(&self) -> bool {
        self.parts.iter().all(|p| p.successful())
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        self.parts.iter().all(|p| p.wait(timeout))
    }

    fn get(&self, timeout: Option<Duration>) -> EngineResult<f64> {
        let mut values = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            values.push(part.get(timeout)?);
        }
        Ok((self.combine)(&values))
    }
}

/// In-flight computations keyed by (function namespace, cache key).
///
/// Process-local and in-memory only; resolved values are persisted by the
/// shutdown consolidation, never the tracker itself.
#[derive(Default)]
pub struct PendingTracker {
    inner: Mutex<HashMap<(String, CacheKey), PendingValue>>,
}

impl PendingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an in-flight computation.
    pub fn register(&self, namespace: &str, key: CacheKey, handle: PendingValue) {
        debug!(namespace, %key, "tracking pending result");
        self.inner
            .lock()
            .insert((namespace.to_string(), key), handle);
    }

    /// The handle for an in-flight duplicate, if any.
    pub fn lookup(&self, namespace: &str, key: &CacheKey) -> Option<PendingValue> {
        self.inner
            .lock()
            .get(&(namespace.to_string(), key.clone()))
            .cloned()
    }

    /// Number of outstanding handles.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every outstanding handle, for consolidation.
    pub fn drain(&self) -> Vec<((String, CacheKey), PendingValue)> {
        self.inner.lock().drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{ArgValue, CacheKey};

    fn key(n: f64) -> CacheKey {
        CacheKey::from_bindings(&[("N", ArgValue::Float(n))], Some(15))
    }

    #[test]
    fn cell_lifecycle() {
        let cell = PendingCell::new();
        assert!(!cell.ready());
        assert!(!cell.successful());
        assert!(matches!(
            cell.get(Some(Duration::from_millis(10))),
            Err(EngineError::NotReady)
        ));

        cell.fulfill(Ok(3.25));
        assert!(cell.ready());
        assert!(cell.successful());
        assert_eq!(cell.get(None).unwrap(), 3.25);
    }

    #[test]
    fn first_fulfillment_wins() {
        let cell = PendingCell::new();
        cell.fulfill(Ok(1.0));
        cell.fulfill(Ok(2.0));
        assert_eq!(cell.get(None).unwrap(), 1.0);
    }

    #[test]
    fn failed_cell_is_ready_but_not_successful() {
        let cell = PendingCell::new();
        cell.fulfill(Err(EngineError::Retryable("nan".into())));
        assert!(cell.ready());
        assert!(!cell.successful());
        assert!(matches!(cell.get(None), Err(EngineError::Failed(_))));
    }

    #[test]
    fn cell_wakes_blocked_reader() {
        let cell = PendingCell::new();
        let writer = Arc::clone(&cell);
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            writer.fulfill(Ok(7.0));
        });
        assert_eq!(cell.get(Some(Duration::from_secs(5))).unwrap(), 7.0);
        thread.join().unwrap();
    }

    #[test]
    fn composite_aggregates_readiness_and_success() {
        let h = PendingCell::new();
        let h_on = PendingCell::new();
        let palpha = 0.25;
        let composite = CompositePending::new(
            vec![
                h.clone() as PendingValue,
                h_on.clone() as PendingValue,
                Arc::new(ReadyValue(2.0)),
            ],
            move |values| values[0] - palpha * values[1] - (1.0 - palpha) * values[2],
        );

        assert!(!composite.ready());
        h.fulfill(Ok(4.0));
        assert!(!composite.ready());
        h_on.fulfill(Ok(8.0));
        assert!(composite.ready());
        assert!(composite.successful());
        // 4 - 0.25*8 - 0.75*2 = 0.5
        assert_eq!(composite.get(None).unwrap(), 0.5);
    }

    #[test]
    fn composite_fails_if_any_part_fails() {
        let bad = PendingCell::new();
        bad.fulfill(Err(EngineError::Retryable("zero partial".into())));
        let composite = CompositePending::new(
            vec![Arc::new(ReadyValue(1.0)) as PendingValue, bad as PendingValue],
            |values| values.iter().sum(),
        );
        assert!(composite.ready());
        assert!(!composite.successful());
        assert!(composite.get(None).is_err());
    }

    #[test]
    fn tracker_deduplicates_in_flight_requests() {
        let tracker = PendingTracker::new();
        let cell = PendingCell::new();
        tracker.register("H_external.1a2b", key(1.0), cell.clone());

        assert!(tracker.lookup("H_external.1a2b", &key(1.0)).is_some());
        assert!(tracker.lookup("H_external.1a2b", &key(2.0)).is_none());
        assert!(tracker.lookup("H_OFF_external.ffff", &key(1.0)).is_none());

        let drained = tracker.drain();
        assert_eq!(drained.len(), 1);
        assert!(tracker.is_empty());
    }
}
