//! # Scheduler Queues
//!
//! The three containers a non-running task can occupy, one per blocked
//! state: per-priority ready queues (`Ready`), the time-ordered delay
//! queue (`Delayed`), and the suspend set (`Suspended`). All are
//! fixed-capacity `heapless` structures sized by `MAX_TASKS`; a task
//! occupies at most one slot across all of them, so pushes cannot fail.

use heapless::{Deque, Vec};

use crate::config::{MAX_CORES, MAX_PRIORITIES, MAX_TASKS};
use crate::task::TaskId;

// ---------------------------------------------------------------------------
// Ready queues
// ---------------------------------------------------------------------------

/// One FIFO queue per priority level per core.
///
/// `enqueue` appends at the tail; `dequeue_highest` pops the head of the
/// highest non-empty level. Round-robin rotation is expressed by the
/// scheduler re-enqueuing a preempted or yielding task at the tail of
/// its own level.
pub struct ReadyQueueSet {
    queues: [[Deque<TaskId, MAX_TASKS>; MAX_PRIORITIES]; MAX_CORES],
}

impl ReadyQueueSet {
    pub const fn new() -> Self {
        const LEVEL: Deque<TaskId, MAX_TASKS> = Deque::new();
        const CORE: [Deque<TaskId, MAX_TASKS>; MAX_PRIORITIES] = [LEVEL; MAX_PRIORITIES];
        Self {
            queues: [CORE; MAX_CORES],
        }
    }

    /// Append a task at the tail of its priority level on `core`.
    pub fn enqueue(&mut self, core: usize, priority: u8, id: TaskId) {
        let result = self.queues[core][priority as usize].push_back(id);
        debug_assert!(result.is_ok());
    }

    /// Pop the head of the highest non-empty level on `core`.
    pub fn dequeue_highest(&mut self, core: usize) -> Option<TaskId> {
        for level in self.queues[core].iter_mut().rev() {
            if let Some(id) = level.pop_front() {
                return Some(id);
            }
        }
        None
    }

    /// Priority and head task of the highest non-empty level on `core`,
    /// without removing it.
    pub fn peek_highest(&self, core: usize) -> Option<(u8, TaskId)> {
        for (priority, level) in self.queues[core].iter().enumerate().rev() {
            if let Some(id) = level.front() {
                return Some((priority as u8, *id));
            }
        }
        None
    }

    /// Extract a task from whichever level currently holds it,
    /// preserving the order of the remaining entries. Returns the core
    /// whose queue held it.
    pub fn remove(&mut self, id: TaskId) -> Option<usize> {
        for core in 0..MAX_CORES {
            for level in self.queues[core].iter_mut() {
                let mut found = false;
                for _ in 0..level.len() {
                    if let Some(head) = level.pop_front() {
                        if head == id {
                            found = true;
                        } else {
                            let result = level.push_back(head);
                            debug_assert!(result.is_ok());
                        }
                    }
                }
                if found {
                    return Some(core);
                }
            }
        }
        None
    }

    /// Whether any level on any core holds the task.
    pub fn contains(&self, id: TaskId) -> bool {
        self.queues
            .iter()
            .flatten()
            .any(|level| level.iter().any(|t| *t == id))
    }

    /// Number of ready tasks queued on `core`.
    pub fn len(&self, core: usize) -> usize {
        self.queues[core].iter().map(Deque::len).sum()
    }

    pub fn is_empty(&self, core: usize) -> bool {
        self.len(core) == 0
    }
}

// ---------------------------------------------------------------------------
// Delay queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct DelayEntry {
    wake_tick: u64,
    id: TaskId,
}

/// Time-ordered queue of delayed tasks, ascending by `wake_tick`.
/// Entries with equal wake ticks keep insertion order.
pub struct DelayQueue {
    entries: Vec<DelayEntry, MAX_TASKS>,
}

impl DelayQueue {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert a task at its ordered position.
    pub fn insert(&mut self, id: TaskId, wake_tick: u64) {
        let position = self
            .entries
            .iter()
            .position(|e| e.wake_tick > wake_tick)
            .unwrap_or(self.entries.len());
        let result = self.entries.insert(position, DelayEntry { wake_tick, id });
        debug_assert!(result.is_ok());
    }

    /// Remove and return, in ascending-wake order, every task with
    /// `wake_tick <= now`.
    pub fn drain_expired(&mut self, now: u64) -> Vec<TaskId, MAX_TASKS> {
        let mut expired = Vec::new();
        while self
            .entries
            .first()
            .is_some_and(|e| e.wake_tick <= now)
        {
            let entry = self.entries.remove(0);
            let result = expired.push(entry.id);
            debug_assert!(result.is_ok());
        }
        expired
    }

    /// Extract a task regardless of its wake tick (suspend/delete paths).
    pub fn remove(&mut self, id: TaskId) -> bool {
        match self.entries.iter().position(|e| e.id == id) {
            Some(position) => {
                self.entries.remove(position);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Wake tick of the earliest entry, if any.
    pub fn next_wake(&self) -> Option<u64> {
        self.entries.first().map(|e| e.wake_tick)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Suspend set
// ---------------------------------------------------------------------------

/// Membership set of suspended tasks. A suspended task's preserved
/// `wake_tick` stays in its TCB, not here.
pub struct SuspendSet {
    members: Vec<TaskId, MAX_TASKS>,
}

impl SuspendSet {
    pub const fn new() -> Self {
        Self {
            members: Vec::new(),
        }
    }

    /// Record a task as suspended. Inserting an existing member is a no-op.
    pub fn insert(&mut self, id: TaskId) {
        if !self.contains(id) {
            let result = self.members.push(id);
            debug_assert!(result.is_ok());
        }
    }

    /// Remove a task; returns whether it was a member.
    pub fn remove(&mut self, id: TaskId) -> bool {
        match self.members.iter().position(|t| *t == id) {
            Some(position) => {
                self.members.remove(position);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.members.iter().any(|t| *t == id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
