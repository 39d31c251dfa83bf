// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Many-producer, single-consumer hand-off queue.
//!
//! Producers push into one buffer per thread index (or a single shared buffer
//! when no index function is configured). The consumer swaps each buffer out,
//! processes it without holding the lock, and splices back whatever it chose
//! to keep ahead of anything pushed in the meantime. FIFO order holds per
//! buffer only.

use parking_lot::Mutex;
use std::sync::Arc;

/// Maps the calling thread to a shard index
pub type ThreadIndexFn = Arc<dyn Fn() -> usize + Send + Sync>;

/// What to do with the item just processed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueAction {
    /// Leave it queued for the next pass
    Keep,
    /// Drop it from the queue
    Remove,
}

pub struct MultiQueue<T> {
    shards: Box<[Mutex<Vec<T>>]>,
    thread_index: Option<ThreadIndexFn>,
}

impl<T> MultiQueue<T> {
    /// Single lock-guarded buffer
    pub fn new() -> Self {
        Self::with_shards(1, None)
    }

    /// One buffer per thread index. Without an index function every producer
    /// shares the first buffer.
    pub fn with_shards(count: usize, thread_index: Option<ThreadIndexFn>) -> Self {
        let count = if thread_index.is_some() { count.max(1) } else { 1 };
        let shards = (0..count).map(|_| Mutex::new(Vec::new())).collect();
        Self {
            shards,
            thread_index,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn push(&self, item: T) {
        let index = match &self.thread_index {
            Some(thread_index) => thread_index() % self.shards.len(),
            None => 0,
        };
        self.shards[index].lock().push(item);
    }

    /// Visit every queued item, removing the ones `f` is done with.
    ///
    /// Items pushed while `f` runs (including by `f` itself) are kept for the
    /// next pass. Returns the number of removed items.
    pub fn process<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&mut T) -> QueueAction,
    {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut items = std::mem::take(&mut *shard.lock());
            if items.is_empty() {
                continue;
            }

            let before = items.len();
            items.retain_mut(|item| f(item) == QueueAction::Keep);
            removed += before - items.len();

            if !items.is_empty() {
                let mut queued = shard.lock();
                items.append(&mut queued);
                *queued = items;
            }
        }
        removed
    }

    /// Take every queued item, shard by shard
    pub fn drain(&self) -> Vec<T> {
        let mut drained = Vec::new();
        for shard in self.shards.iter() {
            drained.append(&mut shard.lock());
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.lock().is_empty())
    }
}

impl<T> Default for MultiQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    thread_local! {
        static THREAD_INDEX: Cell<usize> = const { Cell::new(0) };
    }

    fn thread_index() -> ThreadIndexFn {
        Arc::new(|| THREAD_INDEX.with(|index| index.get()))
    }

    #[test]
    fn test_single_buffer_is_fifo() {
        let queue = MultiQueue::new();
        for i in 0..5 {
            queue.push(i);
        }
        assert_eq!(queue.drain(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_process_keeps_deferred_items_in_order() {
        let queue = MultiQueue::new();
        for i in 0..6 {
            queue.push(i);
        }

        let removed = queue.process(|item| {
            if *item % 2 == 0 {
                QueueAction::Remove
            } else {
                QueueAction::Keep
            }
        });

        assert_eq!(removed, 3);
        queue.push(10);
        assert_eq!(queue.drain(), vec![1, 3, 5, 10]);
    }

    #[test]
    fn test_items_pushed_during_processing_wait_for_next_pass() {
        let queue = MultiQueue::new();
        queue.push(1);

        let mut seen = Vec::new();
        queue.process(|item| {
            seen.push(*item);
            queue.push(*item + 1);
            QueueAction::Remove
        });

        assert_eq!(seen, vec![1]);
        assert_eq!(queue.drain(), vec![2]);
    }

    #[test]
    fn test_without_index_function_uses_one_shard() {
        let queue: MultiQueue<u8> = MultiQueue::with_shards(8, None);
        assert_eq!(queue.shard_count(), 1);
    }

    #[test]
    fn test_sharded_producers() {
        let queue = MultiQueue::with_shards(4, Some(thread_index()));
        assert_eq!(queue.shard_count(), 4);

        std::thread::scope(|scope| {
            for producer in 0..4usize {
                let queue = &queue;
                scope.spawn(move || {
                    THREAD_INDEX.with(|index| index.set(producer));
                    for i in 0..250 {
                        queue.push((producer, i));
                    }
                });
            }
        });

        let items = queue.drain();
        assert_eq!(items.len(), 1000);
        for producer in 0..4 {
            let sequence: Vec<usize> = items
                .iter()
                .filter(|(p, _)| *p == producer)
                .map(|(_, i)| *i)
                .collect();
            assert_eq!(sequence, (0..250).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_concurrent_push_while_processing() {
        let queue = MultiQueue::new();
        let processed = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            let producer = scope.spawn(|| {
                for i in 0..500 {
                    queue.push(i);
                }
            });

            while !producer.is_finished() {
                queue.process(|_| {
                    processed.fetch_add(1, Ordering::Relaxed);
                    QueueAction::Remove
                });
            }
        });

        queue.process(|_| {
            processed.fetch_add(1, Ordering::Relaxed);
            QueueAction::Remove
        });
        assert_eq!(processed.load(Ordering::Relaxed), 500);
    }
}
