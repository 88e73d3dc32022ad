//! A fixed roster of N slots bounding how many background intelligence
//! pipelines run concurrently. Two-layer cancellation: a cooperative
//! [`CancellationToken`] checked at the pipeline's checkpoints, and a
//! hard [`JoinHandle::abort`] that unblocks a stuck network wait.
//!
//! Grounded directly on `core/worker_pool.py`'s `WorkerPool`; the
//! semaphore-plus-slot-table design and the "stale completion only
//! clears its own binding" race guard are carried over unchanged.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct Slot {
    session_id: Option<String>,
    cancel_token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl Slot {
    fn empty() -> Self {
        Slot { session_id: None, cancel_token: None, handle: None }
    }

    fn reset(&mut self) {
        self.session_id = None;
        self.cancel_token = None;
        self.handle = None;
    }
}

struct Inner {
    slots: Vec<Slot>,
    session_map: HashMap<String, usize>,
}

/// Bounded background-task pool. `N` slots are shared across all
/// sessions; assignment beyond `N` concurrent pipelines blocks (FIFO)
/// on the semaphore until one frees up.
pub struct WorkerPool {
    num_workers: usize,
    semaphore: Arc<Semaphore>,
    inner: Arc<Mutex<Inner>>,
}

impl WorkerPool {
    pub fn new(num_workers: usize) -> Self {
        let slots = (0..num_workers).map(|_| Slot::empty()).collect();
        WorkerPool {
            num_workers,
            semaphore: Arc::new(Semaphore::new(num_workers)),
            inner: Arc::new(Mutex::new(Inner { slots, session_map: HashMap::new() })),
        }
    }

    /// Acquire a free slot (queueing FIFO if all are busy), bind it to
    /// `session_id`, and spawn `make_future` with a fresh cancellation
    /// token. Returns the worker index assigned.
    pub async fn assign<F, Fut>(
        &self,
        session_id: &str,
        cancel_token: CancellationToken,
        make_future: F,
    ) -> usize
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker pool semaphore closed");

        let worker_id = {
            let mut inner = self.inner.lock().expect("worker pool mutex poisoned");
            let idx = inner
                .slots
                .iter()
                .position(|s| s.session_id.is_none())
                .expect("semaphore guarantees a free slot");
            inner.slots[idx].session_id = Some(session_id.to_string());
            inner.slots[idx].cancel_token = Some(cancel_token.clone());
            inner.session_map.insert(session_id.to_string(), idx);
            idx
        };

        let fut = make_future(cancel_token);
        let guard = SlotGuard {
            inner: self.inner.clone(),
            permit: Some(permit),
            worker_id,
            session_id: session_id.to_string(),
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        });

        self.inner
            .lock()
            .expect("worker pool mutex poisoned")
            .slots[worker_id]
            .handle = Some(handle);

        info!(worker_id, session_id, "worker assigned");
        worker_id
    }

    pub fn get_worker_for_session(&self, session_id: &str) -> Option<usize> {
        self.inner
            .lock()
            .expect("worker pool mutex poisoned")
            .session_map
            .get(session_id)
            .copied()
    }

    /// Idempotent. Sets the cooperative cancellation token and hard-aborts
    /// the task. Returns the old token if a worker was bound.
    pub fn abort_session(&self, session_id: &str) -> Option<CancellationToken> {
        let mut inner = self.inner.lock().expect("worker pool mutex poisoned");
        let worker_id = *inner.session_map.get(session_id)?;
        let slot = &inner.slots[worker_id];
        if slot.session_id.as_deref() != Some(session_id) {
            inner.session_map.remove(session_id);
            return None;
        }
        let old_token = slot.cancel_token.clone();
        if let Some(token) = &old_token {
            token.cancel();
        }
        if let Some(handle) = &slot.handle {
            handle.abort();
        }
        warn!(worker_id, session_id, "aborting worker for superseding request");
        old_token
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn busy_count(&self) -> usize {
        self.inner
            .lock()
            .expect("worker pool mutex poisoned")
            .slots
            .iter()
            .filter(|s| s.session_id.is_some())
            .count()
    }
}

/// Only clear a slot's binding if it still refers to the session that
/// was assigned to it — guards the "slot reassigned between abort and
/// task completion" race from spec §4.8.
fn release_slot(inner: &Arc<Mutex<Inner>>, worker_id: usize, session_id: &str) {
    let mut inner = inner.lock().expect("worker pool mutex poisoned");
    if inner.slots[worker_id].session_id.as_deref() == Some(session_id) {
        inner.session_map.remove(session_id);
        inner.slots[worker_id].reset();
    }
}

/// Releases the slot binding and the semaphore permit on drop — runs
/// whether the spawned task finishes normally or is hard-aborted, since
/// dropping an aborted task's future also drops its locals.
struct SlotGuard {
    inner: Arc<Mutex<Inner>>,
    permit: Option<OwnedSemaphorePermit>,
    worker_id: usize,
    session_id: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        release_slot(&self.inner, self.worker_id, &self.session_id);
        self.permit.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn assign_runs_task_and_frees_slot_on_completion() {
        let pool = WorkerPool::new(2);
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        pool.assign("S1", CancellationToken::new(), move |_token| async move {
            ran2.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(pool.busy_count(), 0);
    }

    #[tokio::test]
    async fn abort_session_cancels_cooperative_token_and_task() {
        let pool = WorkerPool::new(2);
        let observed_cancelled = Arc::new(AtomicUsize::new(0));
        let observed2 = observed_cancelled.clone();
        pool.assign("S1", CancellationToken::new(), move |token| async move {
            token.cancelled().await;
            observed2.fetch_add(1, Ordering::SeqCst);
            // Simulate a long-running stage so the hard abort matters too.
            tokio::time::sleep(Duration::from_secs(30)).await;
        })
        .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let old_token = pool.abort_session("S1");
        assert!(old_token.is_some());
        assert!(old_token.unwrap().is_cancelled());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(observed_cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abort_session_is_idempotent_for_unknown_session() {
        let pool = WorkerPool::new(2);
        assert!(pool.abort_session("ghost").is_none());
    }

    #[tokio::test]
    async fn get_worker_for_session_reflects_current_binding() {
        let pool = WorkerPool::new(2);
        assert!(pool.get_worker_for_session("S1").is_none());
        pool.assign("S1", CancellationToken::new(), |_| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
        })
        .await;
        assert!(pool.get_worker_for_session("S1").is_some());
    }

    #[tokio::test]
    async fn third_assignment_queues_until_a_slot_frees() {
        let pool = Arc::new(WorkerPool::new(1));
        let p1 = pool.clone();
        p1.assign("S1", CancellationToken::new(), |_| async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
        })
        .await;
        assert_eq!(pool.busy_count(), 1);

        let p2 = pool.clone();
        let started = std::time::Instant::now();
        p2.assign("S2", CancellationToken::new(), |_| async move {}).await;
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
