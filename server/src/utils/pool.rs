//! Fixed-size worker pool fed through a bounded queue.

use std::{future::Future, sync::Arc};

use tokio::{
    sync::{Mutex, mpsc},
    task::JoinSet,
};
use tracing::{error, trace};

#[derive(Debug, thiserror::Error)]
#[error("task pool is closed")]
pub struct PoolClosed<T>(pub T);

/// Runs `handler` over submitted items on `size` workers. At most
/// `capacity` items wait in the queue; `submit` blocks while it is full.
/// Each item runs on its own task so a panicking item is logged and dropped
/// without taking its worker down.
pub struct TaskPool<T, R> {
    sender: mpsc::Sender<T>,
    workers: JoinSet<Vec<R>>,
}

impl<T, R> TaskPool<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub fn new<F, Fut>(size: usize, capacity: usize, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<T>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let handler = Arc::new(handler);
        let mut workers = JoinSet::new();

        for worker in 0..size.max(1) {
            let receiver = receiver.clone();
            let handler = handler.clone();
            workers.spawn(async move {
                let mut results = Vec::new();
                loop {
                    let next = receiver.lock().await.recv().await;
                    let Some(item) = next else {
                        break;
                    };

                    match tokio::spawn(handler(item)).await {
                        Ok(result) => results.push(result),
                        Err(err) => error!(worker, error = %err, "task pool item panicked"),
                    }
                }
                trace!(worker, processed = results.len(), "task pool worker finished");
                results
            });
        }

        Self { sender, workers }
    }

    /// Queues an item, waiting for space. Fails only if every worker is gone.
    pub async fn submit(&self, item: T) -> Result<(), PoolClosed<T>> {
        self.sender
            .send(item)
            .await
            .map_err(|err| PoolClosed(err.0))
    }

    /// Closes the input side and waits for every queued and in-flight item.
    pub async fn join(self) -> Vec<R> {
        let Self {
            sender,
            mut workers,
        } = self;
        drop(sender);

        let mut results = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(batch) => results.extend(batch),
                Err(err) => error!(error = %err, "task pool worker failed"),
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[tokio::test]
    async fn join_returns_every_result() {
        let pool = TaskPool::new(3, 3, |value: u32| async move { value * 2 });
        for value in 0..10 {
            pool.submit(value).await.unwrap();
        }

        let mut results = pool.join().await;
        results.sort_unstable();

        assert_eq!(results, (0..10).map(|v| v * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_pool_size() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let pool = {
            let active = active.clone();
            let peak = peak.clone();
            TaskPool::new(3, 1, move |_: usize| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            })
        };
        for item in 0..12 {
            pool.submit(item).await.unwrap();
        }
        assert_eq!(pool.join().await.len(), 12);

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency was {peak}");
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn panicking_item_does_not_stop_siblings() {
        let pool = TaskPool::new(2, 2, |value: u32| async move {
            if value == 3 {
                panic!("boom");
            }
            value
        });
        for value in 0..6 {
            pool.submit(value).await.unwrap();
        }

        let mut results = pool.join().await;
        results.sort_unstable();

        assert_eq!(results, vec![0, 1, 2, 4, 5]);
    }
}
