//! Generic batching pipeline
//!
//! Single-consumer accumulator behind an unbounded channel, parameterized
//! by a `(min_size, max_size, max_wait)` policy and partitioned by
//! destination shard. A partition flushes up to `max_size` items as soon
//! as it holds at least `min_size` items or `max_wait` has elapsed since
//! its last flush: bounded latency under low load, bounded batch overhead
//! under high load. The sink call happens on the consumer task, so
//! producers never wait on I/O, and items within a partition flush in
//! enqueue order.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use store_bus::ShardIndex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};
use wallet_core::BatchPolicy;

/// Destination of a pipeline's flushed batches
#[async_trait]
pub trait BatchSink<T: Send>: Send + 'static {
    /// Deliver one batch for one partition
    async fn flush(&mut self, partition: ShardIndex, items: Vec<T>);
}

/// Producer side of a pipeline
pub struct BatcherHandle<T> {
    name: &'static str,
    tx: mpsc::UnboundedSender<(ShardIndex, T)>,
}

impl<T> Clone for BatcherHandle<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<T> BatcherHandle<T> {
    /// Queue an item for a partition
    pub fn push(&self, partition: ShardIndex, item: T) {
        if self.tx.send((partition, item)).is_err() {
            warn!(pipeline = self.name, "pipeline closed, dropping item");
        }
    }
}

struct PartitionState<T> {
    items: VecDeque<T>,
    /// Flush-by time: last flush (or creation) plus max_wait
    deadline: Instant,
}

/// Consumer loop state of one pipeline
struct Batcher<T, K> {
    name: &'static str,
    policy: BatchPolicy,
    sink: K,
    rx: mpsc::UnboundedReceiver<(ShardIndex, T)>,
    partitions: HashMap<ShardIndex, PartitionState<T>>,
}

/// Spawn a pipeline; the consumer exits (after draining) once every
/// handle clone is dropped
pub fn spawn<T, K>(
    name: &'static str,
    policy: BatchPolicy,
    sink: K,
) -> (BatcherHandle<T>, JoinHandle<()>)
where
    T: Send + 'static,
    K: BatchSink<T>,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let batcher = Batcher {
        name,
        policy,
        sink,
        rx,
        partitions: HashMap::new(),
    };
    let join = tokio::spawn(batcher.run());
    (BatcherHandle { name, tx }, join)
}

impl<T, K> Batcher<T, K>
where
    T: Send + 'static,
    K: BatchSink<T>,
{
    async fn run(mut self) {
        debug!(pipeline = self.name, "batch pipeline started");
        loop {
            match self.next_deadline() {
                Some(deadline) => {
                    tokio::select! {
                        received = self.rx.recv() => match received {
                            Some((partition, item)) => self.accept(partition, item).await,
                            None => break,
                        },
                        _ = sleep_until(deadline) => self.flush_due().await,
                    }
                }
                None => match self.rx.recv().await {
                    Some((partition, item)) => self.accept(partition, item).await,
                    None => break,
                },
            }
        }
        self.drain().await;
        debug!(pipeline = self.name, "batch pipeline stopped");
    }

    async fn accept(&mut self, partition: ShardIndex, item: T) {
        let deadline = Instant::now() + self.policy.max_wait();
        self.partitions
            .entry(partition)
            .or_insert_with(|| PartitionState {
                items: VecDeque::new(),
                deadline,
            })
            .items
            .push_back(item);
        self.flush_due().await;
    }

    /// Earliest flush-by time among partitions holding items
    fn next_deadline(&self) -> Option<Instant> {
        self.partitions
            .values()
            .filter(|p| !p.items.is_empty())
            .map(|p| p.deadline)
            .min()
    }

    async fn flush_due(&mut self) {
        let now = Instant::now();
        let partitions: Vec<ShardIndex> = self.partitions.keys().copied().collect();
        for partition in partitions {
            loop {
                let batch = {
                    let Some(state) = self.partitions.get_mut(&partition) else {
                        break;
                    };
                    let due = !state.items.is_empty()
                        && (state.items.len() >= self.policy.min_size || now >= state.deadline);
                    if !due {
                        break;
                    }
                    let take = state.items.len().min(self.policy.max_size.max(1));
                    state.deadline = Instant::now() + self.policy.max_wait();
                    state.items.drain(..take).collect::<Vec<_>>()
                };
                self.sink.flush(partition, batch).await;
            }
        }
    }

    /// Flush everything left, policy aside; runs once on shutdown
    async fn drain(&mut self) {
        let partitions: Vec<ShardIndex> = self.partitions.keys().copied().collect();
        for partition in partitions {
            loop {
                let batch = {
                    let Some(state) = self.partitions.get_mut(&partition) else {
                        break;
                    };
                    if state.items.is_empty() {
                        break;
                    }
                    let take = state.items.len().min(self.policy.max_size.max(1));
                    state.items.drain(..take).collect::<Vec<_>>()
                };
                self.sink.flush(partition, batch).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct RecordingSink {
        flushes: Arc<Mutex<Vec<(ShardIndex, Vec<u32>)>>>,
    }

    #[async_trait]
    impl BatchSink<u32> for RecordingSink {
        async fn flush(&mut self, partition: ShardIndex, items: Vec<u32>) {
            self.flushes.lock().unwrap().push((partition, items));
        }
    }

    fn policy(min_size: usize, max_size: usize, max_wait_us: u64) -> BatchPolicy {
        BatchPolicy {
            min_size,
            max_size,
            max_wait_us,
        }
    }

    async fn wait_until(sink: &RecordingSink, want_flushes: usize) {
        for _ in 0..200 {
            if sink.flushes.lock().unwrap().len() >= want_flushes {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("pipeline never flushed");
    }

    #[tokio::test]
    async fn test_flush_at_min_size() {
        let sink = RecordingSink::default();
        let (handle, _join) = spawn("test", policy(3, 8, 1_000_000), sink.clone());

        handle.push(0, 1);
        handle.push(0, 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sink.flushes.lock().unwrap().is_empty());

        handle.push(0, 3);
        wait_until(&sink, 1).await;
        assert_eq!(sink.flushes.lock().unwrap()[0], (0, vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_flush_at_deadline() {
        let sink = RecordingSink::default();
        let (handle, _join) = spawn("test", policy(100, 8, 30_000), sink.clone());

        handle.push(0, 1);
        handle.push(0, 2);
        wait_until(&sink, 1).await;
        assert_eq!(sink.flushes.lock().unwrap()[0], (0, vec![1, 2]));
    }

    #[tokio::test]
    async fn test_max_size_bounds_batches() {
        let sink = RecordingSink::default();
        let (handle, _join) = spawn("test", policy(0, 2, 1_000_000), sink.clone());

        for i in 0..5 {
            handle.push(0, i);
        }
        wait_until(&sink, 3).await;

        let flushes = sink.flushes.lock().unwrap();
        let flat: Vec<u32> = flushes.iter().flat_map(|(_, items)| items.clone()).collect();
        assert_eq!(flat, vec![0, 1, 2, 3, 4]);
        assert!(flushes.iter().all(|(_, items)| items.len() <= 2));
    }

    #[tokio::test]
    async fn test_partitions_flush_independently() {
        let sink = RecordingSink::default();
        let (handle, _join) = spawn("test", policy(2, 8, 1_000_000), sink.clone());

        handle.push(0, 1);
        handle.push(1, 10);
        handle.push(1, 11);
        wait_until(&sink, 1).await;

        // partition 1 reached min_size, partition 0 still waits
        {
            let flushes = sink.flushes.lock().unwrap();
            assert_eq!(flushes[0], (1, vec![10, 11]));
        }

        handle.push(0, 2);
        wait_until(&sink, 2).await;
        assert_eq!(sink.flushes.lock().unwrap()[1], (0, vec![1, 2]));
    }

    #[tokio::test]
    async fn test_drain_on_shutdown() {
        let sink = RecordingSink::default();
        let (handle, join) = spawn("test", policy(100, 8, 60_000_000), sink.clone());

        handle.push(0, 1);
        handle.push(2, 2);
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(handle);
        join.await.unwrap();

        let flushes = sink.flushes.lock().unwrap();
        let mut all: Vec<u32> = flushes.iter().flat_map(|(_, items)| items.clone()).collect();
        all.sort_unstable();
        assert_eq!(all, vec![1, 2]);
    }
}
