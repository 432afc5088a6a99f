//! C5 — Priority Task Queue.
//!
//! Two internal lists: a priority tier sorted non-increasingly by priority,
//! and a normal tier in FIFO order. A single mutex guards both; a
//! [`tokio::sync::Notify`] wakes waiters on every successful enqueue so
//! `dequeue` never has to poll.

use crate::error::{OrchestratorError, Result};
use crate::types::Task;
use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};

struct Lists {
    priority: VecDeque<Task>,
    normal: VecDeque<Task>,
}

pub struct PriorityTaskQueue {
    lists: Mutex<Lists>,
    notify: Notify,
    max_size: usize,
    priority_enabled: bool,
}

impl PriorityTaskQueue {
    pub fn new(max_size: usize, priority_enabled: bool) -> Self {
        Self {
            lists: Mutex::new(Lists {
                priority: VecDeque::new(),
                normal: VecDeque::new(),
            }),
            notify: Notify::new(),
            max_size,
            priority_enabled,
        }
    }

    pub async fn size(&self) -> usize {
        let lists = self.lists.lock().await;
        lists.priority.len() + lists.normal.len()
    }

    /// Appends to the tail of the normal list.
    pub async fn enqueue(&self, task: Task) -> Result<()> {
        let mut lists = self.lists.lock().await;
        if lists.priority.len() + lists.normal.len() >= self.max_size {
            return Err(OrchestratorError::QueueFull);
        }
        lists.normal.push_back(task);
        drop(lists);
        self.notify.notify_one();
        Ok(())
    }

    /// Inserts into the priority list ahead of the first entry with a lower
    /// priority (i.e. keeps the list sorted non-increasingly), or appends if
    /// none is lower. Falls back to [`Self::enqueue`] when priority handling
    /// is disabled by config.
    pub async fn enqueue_priority(&self, task: Task) -> Result<()> {
        if !self.priority_enabled {
            return self.enqueue(task).await;
        }
        let mut lists = self.lists.lock().await;
        if lists.priority.len() + lists.normal.len() >= self.max_size {
            return Err(OrchestratorError::QueueFull);
        }
        let position = lists.priority.iter().position(|t| t.priority < task.priority);
        match position {
            Some(idx) => lists.priority.insert(idx, task),
            None => lists.priority.push_back(task),
        }
        drop(lists);
        self.notify.notify_one();
        Ok(())
    }

    /// Returns the head of the priority list if non-empty, else the head of
    /// the normal list, else `None` immediately (does not block).
    pub async fn try_dequeue(&self) -> Option<Task> {
        let mut lists = self.lists.lock().await;
        lists.priority.pop_front().or_else(|| lists.normal.pop_front())
    }

    /// Blocks until a task is available or `shutdown` fires.
    pub async fn dequeue(&self, shutdown: &mut tokio::sync::broadcast::Receiver<()>) -> Option<Task> {
        loop {
            if let Some(task) = self.try_dequeue().await {
                return Some(task);
            }
            tokio::select! {
                _ = self.notify.notified() => continue,
                _ = shutdown.recv() => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn task(priority: i32) -> Task {
        Task::new("vuln_scan".to_string(), HashMap::new(), priority)
    }

    #[tokio::test]
    async fn priority_order_is_non_increasing() {
        let queue = PriorityTaskQueue::new(10, true);
        queue.enqueue_priority(task(0)).await.unwrap();
        queue.enqueue_priority(task(10)).await.unwrap();
        queue.enqueue_priority(task(5)).await.unwrap();

        let first = queue.try_dequeue().await.unwrap();
        let second = queue.try_dequeue().await.unwrap();
        let third = queue.try_dequeue().await.unwrap();

        assert_eq!(first.priority, 10);
        assert_eq!(second.priority, 5);
        assert_eq!(third.priority, 0);
    }

    #[tokio::test]
    async fn equal_priority_preserves_insertion_order() {
        let queue = PriorityTaskQueue::new(10, true);
        let t1 = task(5);
        let t1_id = t1.id;
        queue.enqueue_priority(t1).await.unwrap();
        queue.enqueue_priority(task(5)).await.unwrap();

        let first = queue.try_dequeue().await.unwrap();
        assert_eq!(first.id, t1_id);
    }

    #[tokio::test]
    async fn priority_tier_drains_before_normal_tier() {
        let queue = PriorityTaskQueue::new(10, true);
        queue.enqueue(task(0)).await.unwrap();
        queue.enqueue_priority(task(1)).await.unwrap();

        let first = queue.try_dequeue().await.unwrap();
        assert_eq!(first.priority, 1);
    }

    #[tokio::test]
    async fn full_queue_rejects_enqueue() {
        let queue = PriorityTaskQueue::new(1, true);
        queue.enqueue(task(0)).await.unwrap();
        let result = queue.enqueue_priority(task(1)).await;
        assert!(matches!(result, Err(OrchestratorError::QueueFull)));
    }

    #[tokio::test]
    async fn dequeue_on_empty_queue_returns_none_without_blocking_forever() {
        let queue = PriorityTaskQueue::new(10, true);
        assert!(queue.try_dequeue().await.is_none());
    }

    #[tokio::test]
    async fn disabled_priority_falls_back_to_fifo() {
        let queue = PriorityTaskQueue::new(10, false);
        queue.enqueue_priority(task(10)).await.unwrap();
        queue.enqueue_priority(task(0)).await.unwrap();

        let first = queue.try_dequeue().await.unwrap();
        assert_eq!(first.priority, 10); // FIFO: first in, first out regardless of priority value
    }
}
