//! Keyed single-flight execution with bounded parallelism.
//!
//! Concurrent calls for the same key share one in-flight computation; the
//! work runs on a spawned task so that a cancelled waiter never cancels the
//! computation for the others. An optional semaphore caps how many
//! computations across all keys run at once.

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

type SharedFlight<T> = Shared<BoxFuture<'static, T>>;

pub struct FlightGroup<T: Clone + Send + Sync + 'static> {
    inflight: DashMap<String, SharedFlight<T>>,
    permits: Option<Arc<Semaphore>>,
}

impl<T: Clone + Send + Sync + 'static> FlightGroup<T> {
    /// A group whose computations are capped at `parallelism` at a time.
    pub fn bounded(parallelism: usize) -> Self {
        FlightGroup {
            inflight: DashMap::new(),
            permits: Some(Arc::new(Semaphore::new(parallelism.max(1)))),
        }
    }

    /// A group that only deduplicates, without a parallelism cap.
    pub fn unbounded() -> Self {
        FlightGroup {
            inflight: DashMap::new(),
            permits: None,
        }
    }

    /// Runs `work` for `key`, or joins an identical call already underway.
    /// The result is not retained once every waiter has received it;
    /// callers memoise where needed.
    pub async fn run<F>(&self, key: &str, work: F) -> T
    where
        F: Future<Output = T> + Send + 'static,
    {
        let flight = match self.inflight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(e) => e.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let permits = self.permits.clone();
                let handle = tokio::spawn(async move {
                    let _permit = match &permits {
                        Some(sem) => Some(
                            sem.clone()
                                .acquire_owned()
                                .await
                                .expect("flight semaphore closed"),
                        ),
                        None => None,
                    };
                    work.await
                });
                let shared = async move { handle.await.expect("flight task panicked") }
                    .boxed()
                    .shared();
                v.insert(shared.clone());
                shared
            }
        };

        let out = flight.await;
        self.inflight.remove(key);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_calls_share_one_run() {
        let group = Arc::new(FlightGroup::<usize>::bounded(4));
        let runs = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let group = group.clone();
            let runs = runs.clone();
            tasks.push(tokio::spawn(async move {
                group
                    .run("k", async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        7usize
                    })
                    .await
            }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap(), 7);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_run_separately() {
        let group = Arc::new(FlightGroup::<String>::bounded(4));
        let a = group.run("a", async { "a".to_string() }).await;
        let b = group.run("b", async { "b".to_string() }).await;
        assert_eq!((a.as_str(), b.as_str()), ("a", "b"));
    }

    #[tokio::test]
    async fn test_parallelism_is_capped() {
        let group = Arc::new(FlightGroup::<usize>::bounded(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let group = group.clone();
            let active = active.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                group
                    .run(&format!("k{i}"), async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        i
                    })
                    .await
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_cancel_work() {
        let group = Arc::new(FlightGroup::<usize>::bounded(4));
        let done = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let group = group.clone();
            let done = done.clone();
            tokio::spawn(async move {
                group
                    .run("k", async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        done.fetch_add(1, Ordering::SeqCst);
                        1usize
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();
        let _ = waiter.await;

        // generation keeps running on its own task
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
