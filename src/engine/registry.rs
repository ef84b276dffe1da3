// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Correlation registry: outstanding requests this peer issued.
//!
//! Each entry owns the sending half of a oneshot channel. Whoever removes the
//! entry from the map (a response, the deadline sweep, a cancellation or the
//! connection teardown) is the only party that can complete it, which is what
//! gives at-most-once resolution per id.
//!
//! Deadlines are tracked in a min-heap next to the map. Heap entries are never
//! removed eagerly; `sweep` discards any whose id has already been retired or
//! re-registered with a different deadline.

use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use crate::errors::{InvokeError, RegistryError};
use crate::observability::messages::{dispatch::RequestTimedOut, StructuredLog};

pub type InvokeResult = Result<Value, InvokeError>;

/// A request awaiting its response.
struct PendingRequest {
    deadline: Instant,
    created_at: Instant,
    timeout: Duration,
    responder: oneshot::Sender<InvokeResult>,
}

#[derive(Default)]
struct RegistryState {
    pending: HashMap<String, PendingRequest>,
    deadlines: BinaryHeap<Reverse<(Instant, String)>>,
}

#[derive(Default)]
pub struct CorrelationRegistry {
    state: Mutex<RegistryState>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a new outstanding request that expires `timeout` from now.
    pub fn register(&self, id: &str, timeout: Duration) -> Result<PendingHandle, RegistryError> {
        let mut state = self.state();
        if state.pending.contains_key(id) {
            return Err(RegistryError::DuplicateId(id.to_string()));
        }

        let created_at = Instant::now();
        let deadline = created_at + timeout;
        let (responder, receiver) = oneshot::channel();

        state.pending.insert(
            id.to_string(),
            PendingRequest {
                deadline,
                created_at,
                timeout,
                responder,
            },
        );
        state.deadlines.push(Reverse((deadline, id.to_string())));

        Ok(PendingHandle {
            id: id.to_string(),
            receiver,
        })
    }

    /// Complete the pending request `id` with `result`.
    ///
    /// Returns `false` and does nothing when `id` is unknown or already
    /// retired, which is how duplicate and late responses are absorbed.
    pub fn resolve(&self, id: &str, result: InvokeResult) -> bool {
        let entry = self.state().pending.remove(id);
        match entry {
            Some(pending) => {
                // The caller may have stopped waiting; that is not an error here.
                let _ = pending.responder.send(result);
                true
            }
            None => false,
        }
    }

    /// Expire every entry whose deadline is at or before `now`.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut expired = Vec::new();
        {
            let mut state = self.state();
            while let Some(Reverse((deadline, _))) = state.deadlines.peek() {
                if *deadline > now {
                    break;
                }
                let Some(Reverse((deadline, id))) = state.deadlines.pop() else {
                    break;
                };
                let live = state
                    .pending
                    .get(&id)
                    .is_some_and(|pending| pending.deadline == deadline);
                if live {
                    if let Some(pending) = state.pending.remove(&id) {
                        expired.push((id, pending));
                    }
                }
            }
        }

        let count = expired.len();
        for (id, pending) in expired {
            RequestTimedOut {
                request_id: &id,
                timeout: pending.timeout,
                waited: now.saturating_duration_since(pending.created_at),
            }
            .log();
            let _ = pending.responder.send(Err(InvokeError::Timeout {
                id,
                after: pending.timeout,
            }));
        }
        count
    }

    /// Forget `id` without completing it; the caller has gone away.
    pub fn cancel(&self, id: &str) -> bool {
        self.state().pending.remove(id).is_some()
    }

    /// Reject every outstanding request, used when the connection ends.
    pub fn fail_all<F>(&self, make_error: F) -> usize
    where
        F: Fn() -> InvokeError,
    {
        let drained: Vec<PendingRequest> = {
            let mut state = self.state();
            state.deadlines.clear();
            state.pending.drain().map(|(_, pending)| pending).collect()
        };

        let count = drained.len();
        for pending in drained {
            let _ = pending.responder.send(Err(make_error()));
        }
        count
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state().pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().pending.is_empty()
    }
}

/// Waits for the resolution of one registered request.
#[derive(Debug)]
pub struct PendingHandle {
    id: String,
    receiver: oneshot::Receiver<InvokeResult>,
}

impl PendingHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for PendingHandle {
    type Output = InvokeResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            // A dropped sender means the entry was cancelled out from under us.
            received.unwrap_or(Err(InvokeError::ConnectionClosed))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_resolve_completes_handle() {
        let registry = CorrelationRegistry::new();
        let handle = registry.register("a", Duration::from_secs(5)).unwrap();

        assert!(registry.resolve("a", Ok(json!(3))));
        assert_eq!(handle.await, Ok(json!(3)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_second_resolution_is_a_no_op() {
        let registry = CorrelationRegistry::new();
        let handle = registry.register("a", Duration::from_secs(5)).unwrap();

        assert!(registry.resolve("a", Ok(json!("first"))));
        assert!(!registry.resolve("a", Ok(json!("second"))));
        assert_eq!(registry.sweep(Instant::now() + Duration::from_secs(60)), 0);
        assert_eq!(handle.await, Ok(json!("first")));
    }

    #[tokio::test]
    async fn test_unknown_id_is_ignored() {
        let registry = CorrelationRegistry::new();
        let handle = registry.register("known", Duration::from_secs(5)).unwrap();

        assert!(!registry.resolve("unknown", Ok(json!(1))));
        assert!(!registry.resolve("unknown", Err(InvokeError::ConnectionClosed)));
        assert_eq!(registry.len(), 1);

        registry.resolve("known", Ok(json!(2)));
        assert_eq!(handle.await, Ok(json!(2)));
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let registry = CorrelationRegistry::new();
        let _handle = registry.register("a", Duration::from_secs(5)).unwrap();

        assert_eq!(
            registry.register("a", Duration::from_secs(5)).unwrap_err(),
            RegistryError::DuplicateId("a".to_string())
        );
    }

    #[tokio::test]
    async fn test_sweep_expires_only_past_deadlines() {
        let registry = CorrelationRegistry::new();
        let short = registry.register("short", Duration::from_millis(10)).unwrap();
        let _long = registry.register("long", Duration::from_secs(60)).unwrap();

        assert_eq!(registry.sweep(Instant::now() + Duration::from_secs(1)), 1);
        assert!(registry.contains("long"));
        assert!(!registry.contains("short"));

        match short.await {
            Err(InvokeError::Timeout { id, after }) => {
                assert_eq!(id, "short");
                assert_eq!(after, Duration::from_millis(10));
            }
            other => panic!("Expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reused_id_is_not_expired_by_stale_deadline() {
        let registry = CorrelationRegistry::new();
        let first = registry.register("a", Duration::from_millis(1)).unwrap();
        registry.resolve("a", Ok(json!(1)));
        assert_eq!(first.await, Ok(json!(1)));

        let second = registry.register("a", Duration::from_secs(60)).unwrap();
        assert_eq!(registry.sweep(Instant::now() + Duration::from_secs(1)), 0);
        assert!(registry.contains("a"));

        registry.resolve("a", Ok(json!(2)));
        assert_eq!(second.await, Ok(json!(2)));
    }

    #[tokio::test]
    async fn test_cancel_removes_without_delivery() {
        let registry = CorrelationRegistry::new();
        let handle = registry.register("a", Duration::from_secs(5)).unwrap();

        assert!(registry.cancel("a"));
        assert!(!registry.cancel("a"));
        assert!(!registry.resolve("a", Ok(json!(1))));
        assert_eq!(handle.await, Err(InvokeError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_fail_all_rejects_everything() {
        let registry = CorrelationRegistry::new();
        let handles: Vec<PendingHandle> = (0..3)
            .map(|i| registry.register(&format!("req-{}", i), Duration::from_secs(5)).unwrap())
            .collect();

        assert_eq!(registry.fail_all(|| InvokeError::ConnectionClosed), 3);
        assert!(registry.is_empty());
        for handle in handles {
            assert_eq!(handle.await, Err(InvokeError::ConnectionClosed));
        }
    }

    #[tokio::test]
    async fn test_timeout_fires_after_deadline_within_sweep_interval() {
        let registry = Arc::new(CorrelationRegistry::new());
        let timeout = Duration::from_millis(100);
        let sweep_interval = Duration::from_millis(10);

        let sweeper = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(sweep_interval);
                loop {
                    ticker.tick().await;
                    registry.sweep(Instant::now());
                }
            })
        };

        let started = Instant::now();
        let handle = registry.register("slow", timeout).unwrap();
        let result = handle.await;
        let waited = started.elapsed();
        sweeper.abort();

        assert!(matches!(result, Err(InvokeError::Timeout { .. })));
        assert!(waited >= timeout, "resolved early: {:?}", waited);
        assert!(waited < timeout + Duration::from_millis(500), "resolved late: {:?}", waited);
    }

    #[test]
    fn test_concurrent_resolve_and_sweep_deliver_once() {
        let registry = Arc::new(CorrelationRegistry::new());
        let ids: Vec<String> = (0..200).map(|i| format!("req-{}", i)).collect();
        let mut handles: Vec<PendingHandle> = ids
            .iter()
            .map(|id| registry.register(id, Duration::ZERO).unwrap())
            .collect();

        let resolvers: Vec<_> = (0..4)
            .map(|worker| {
                let registry = registry.clone();
                let ids = ids.clone();
                std::thread::spawn(move || {
                    ids.iter()
                        .filter(|id| registry.resolve(id, Ok(json!(worker))))
                        .count()
                })
            })
            .collect();
        let sweepers: Vec<_> = (0..2)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.sweep(Instant::now() + Duration::from_secs(1)))
            })
            .collect();

        let resolved: usize = resolvers.into_iter().map(|t| t.join().unwrap()).sum();
        let expired: usize = sweepers.into_iter().map(|t| t.join().unwrap()).sum();

        assert_eq!(resolved + expired, ids.len());
        assert!(registry.is_empty());
        for handle in handles.iter_mut() {
            // Every handle has exactly one value waiting; none was dropped.
            assert!(handle.receiver.try_recv().is_ok(), "{} never resolved", handle.id());
        }
    }
}
