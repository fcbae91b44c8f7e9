//! In-flight request deduplication.
//!
//! Concurrent callers asking for the same key share one upstream fetch and
//! all observe its result, success or failure. The fetch runs on its own
//! task, so it completes even when every caller has gone away. Its entry
//! disappears as soon as it settles, so the next caller after settlement
//! triggers a fresh fetch instead of replaying an old result.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinError;
use tracing::{debug, trace, warn};

type SharedRequest<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;
type PendingMap<T, E> = DashMap<String, PendingRequest<T, E>>;

struct PendingRequest<T, E> {
    /// Distinguishes this fetch from a later one under the same key after `clear`.
    id: u64,
    future: SharedRequest<T, E>,
}

pub struct RequestDeduplicator<T, E> {
    pending: Arc<PendingMap<T, E>>,
    next_id: AtomicU64,
}

impl<T, E> Default for RequestDeduplicator<T, E> {
    fn default() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T, E> RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `request_fn` for `key`, or join the fetch already in flight.
    ///
    /// `request_fn` is called at most once per in-flight window. Its future is
    /// spawned onto the tokio runtime; a panic inside it reaches every caller
    /// as `E::from(JoinError)`.
    pub async fn deduplicate<F, Fut>(&self, key: &str, request_fn: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let future = match self.pending.entry(key.to_owned()) {
            Entry::Occupied(entry) => {
                debug!(key, "joining in-flight request");
                entry.get().future.clone()
            }
            Entry::Vacant(entry) => {
                let request = request_fn();
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let forget = ForgetOnSettle {
                    pending: Arc::downgrade(&self.pending),
                    key: key.to_owned(),
                    id,
                };
                let future = spawn_request(request, forget);
                entry.insert(PendingRequest {
                    id,
                    future: future.clone(),
                });
                trace!(key, id, "request registered");
                future
            }
        };

        future.await
    }

    /// Forget every in-flight request. Running fetches are not cancelled.
    pub fn clear(&self) {
        self.pending.clear();
    }

    /// Number of requests currently in flight.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Removes its pending entry when dropped, unless a newer fetch replaced it.
///
/// Lives inside the spawned task, so it fires however the task ends.
struct ForgetOnSettle<T, E> {
    pending: Weak<PendingMap<T, E>>,
    key: String,
    id: u64,
}

impl<T, E> Drop for ForgetOnSettle<T, E> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.upgrade() {
            pending.remove_if(&self.key, |_, entry| entry.id == self.id);
        }
        trace!(key = %self.key, id = self.id, "request settled");
    }
}

fn spawn_request<T, E, Fut>(request: Fut, forget: ForgetOnSettle<T, E>) -> SharedRequest<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let key = forget.key.clone();
    let task = tokio::spawn(async move {
        let _forget = forget;
        request.await
    });

    async move {
        match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(key = %key, error = %e, "deduplicated request task failed");
                Err(E::from(e))
            }
        }
    }
    .boxed()
    .shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Failure(String);

    impl From<JoinError> for Failure {
        fn from(e: JoinError) -> Self {
            Failure(e.to_string())
        }
    }

    fn fail(reason: &str) -> Failure {
        Failure(reason.to_owned())
    }

    type Dedup = RequestDeduplicator<u32, Failure>;

    fn counted(
        calls: &Arc<AtomicUsize>,
        delay_ms: u64,
        result: Result<u32, Failure>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, Failure>> {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                result
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn concurrent_calls_share_one_fetch() {
        let dedup = Dedup::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            dedup.deduplicate("k", counted(&calls, 20, Ok(7))),
            dedup.deduplicate("k", counted(&calls, 20, Ok(8))),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a, Ok(7));
        assert_eq!(b, Ok(7));
        assert!(dedup.is_empty());
    }

    #[tokio::test]
    async fn concurrent_calls_share_one_failure() {
        let dedup = Dedup::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            dedup.deduplicate("k", counted(&calls, 20, Err(fail("boom")))),
            dedup.deduplicate("k", counted(&calls, 20, Ok(1))),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a, Err(fail("boom")));
        assert_eq!(b, Err(fail("boom")));
    }

    #[tokio::test]
    async fn distinct_keys_fetch_independently() {
        let dedup = Dedup::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            dedup.deduplicate("a", counted(&calls, 10, Ok(1))),
            dedup.deduplicate("b", counted(&calls, 10, Ok(2))),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!((a, b), (Ok(1), Ok(2)));
    }

    #[tokio::test]
    async fn settled_request_is_forgotten() {
        let dedup = Dedup::new();
        let calls = Arc::new(AtomicUsize::new(0));

        assert_eq!(dedup.deduplicate("k", counted(&calls, 0, Ok(1))).await, Ok(1));
        assert_eq!(dedup.deduplicate("k", counted(&calls, 0, Ok(2))).await, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_request_is_forgotten() {
        let dedup = Dedup::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = dedup
            .deduplicate("k", counted(&calls, 0, Err(fail("down"))))
            .await;
        assert_eq!(first, Err(fail("down")));

        let retry = dedup.deduplicate("k", counted(&calls, 0, Ok(3))).await;
        assert_eq!(retry, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn len_tracks_in_flight_requests() {
        let dedup = Dedup::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut fut = Box::pin(dedup.deduplicate("k", counted(&calls, 20, Ok(1))));
        assert!(futures::poll!(&mut fut).is_pending());
        assert_eq!(dedup.len(), 1);

        assert_eq!(fut.await, Ok(1));
        assert_eq!(dedup.len(), 0);
    }

    #[tokio::test]
    async fn clear_starts_fresh_and_old_fetch_keeps_new_entry() {
        let dedup = Dedup::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut old = Box::pin(dedup.deduplicate("k", counted(&calls, 10, Ok(1))));
        assert!(futures::poll!(&mut old).is_pending());

        dedup.clear();
        assert!(dedup.is_empty());

        let mut new = Box::pin(dedup.deduplicate("k", counted(&calls, 60, Ok(2))));
        assert!(futures::poll!(&mut new).is_pending());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The old fetch settling must not remove the newer entry.
        assert_eq!(old.await, Ok(1));
        assert_eq!(dedup.len(), 1);

        assert_eq!(new.await, Ok(2));
        assert!(dedup.is_empty());
    }

    // -- cancellation and panics --

    #[tokio::test]
    async fn dropped_caller_does_not_cancel_the_fetch() {
        let dedup = Dedup::new();
        let finished = Arc::new(AtomicBool::new(false));

        let flag = finished.clone();
        let mut caller = Box::pin(dedup.deduplicate("k", move || async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<u32, Failure>(1)
        }));
        assert!(futures::poll!(&mut caller).is_pending());
        drop(caller);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(dedup.is_empty());

        // The next caller starts over instead of joining a stalled fetch.
        let calls = Arc::new(AtomicUsize::new(0));
        assert_eq!(dedup.deduplicate("k", counted(&calls, 0, Ok(2))).await, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    async fn explode() -> Result<u32, Failure> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        panic!("upstream exploded");
    }

    #[tokio::test]
    async fn panicking_fetch_fails_every_caller_and_is_forgotten() {
        let dedup = Dedup::new();

        let (a, b) = tokio::join!(
            dedup.deduplicate("k", explode),
            dedup.deduplicate("k", || async { Ok::<u32, Failure>(5) }),
        );

        assert!(a.is_err());
        assert_eq!(a, b);
        assert!(dedup.is_empty());
    }
}
