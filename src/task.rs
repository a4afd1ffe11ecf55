//! # Task Control Block
//!
//! Defines the task model for Quantos. Each task owns a fixed stack
//! region, a saved execution context, and the scheduling attributes the
//! kernel consults on every dispatch decision.
//!
//! ## Task state machine
//!
//! ```text
//!   ┌──────────┐      dispatch        ┌─────────┐
//!   │  Ready   │ ───────────────────► │ Running │
//!   └──────────┘                      └─────────┘
//!        ▲  ▲      preempt / yield         │
//!        │  └──────────────────────────────┤
//!        │                                 │ delay / delay_until
//!        │ tick expiry                ┌────▼─────┐
//!        └─────────────────────────── │ Delayed  │
//!                                     └──────────┘
//!   suspend: Ready | Running | Delayed ──► Suspended
//!   resume:  Suspended ──► Ready | Delayed
//!   delete:  any ──► Deleted (reclaimed once, deferred if running)
//! ```
//!
//! Handles are weak references: a `TaskHandle` pairs a slot index with a
//! generation counter, so a handle held across the task's deletion is
//! detected by the store instead of reaching freed state.

use crate::config::{DEFAULT_STACK_SIZE, DEFAULT_TIME_SLICE, MAX_TASKS};
use crate::error::KernelError;
use crate::stack::StackRegion;

/// Task entry point. Tasks never return; they end their life via
/// `kernel::exit_current()` or by being deleted.
pub type TaskEntry = extern "C" fn() -> !;

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task in the scheduler's state machine.
///
/// A task appears in exactly one of {a ready queue, the delay queue,
/// the suspend set} while `Ready`, `Delayed` or `Suspended`, and in
/// none of them while `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Runnable and waiting in a ready queue.
    Ready,
    /// Currently executing on a core.
    Running,
    /// Blocked in the delay queue until `wake_tick`.
    Delayed,
    /// Excluded from scheduling until explicitly resumed.
    Suspended,
    /// Deleted; unreachable from any queue, resources reclaimed once.
    Deleted,
}

// ---------------------------------------------------------------------------
// Core affinity
// ---------------------------------------------------------------------------

/// Static core placement, fixed at creation time.
///
/// An `Any` task is eligible for whichever core goes idle first; a
/// `Pinned` task only ever enters its own core's ready queues. There is
/// no work-stealing between busy cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreAffinity {
    /// May run on any core.
    Any,
    /// May only run on the given core.
    Pinned(u8),
}

impl CoreAffinity {
    /// Check whether this placement permits the given core.
    #[inline]
    pub fn allows(&self, core: usize) -> bool {
        match *self {
            CoreAffinity::Any => true,
            CoreAffinity::Pinned(c) => c as usize == core,
        }
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Index of a task's slot in the TCB store. Stable for the task's
/// lifetime; reused (with a bumped generation) after reclamation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(u8);

impl TaskId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u8)
    }

    /// Slot index in the TCB store.
    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Weak reference to a task: slot index plus the slot generation at the
/// time the task was created. Resolved through the TCB store on every
/// operation; stale handles are reported as `InvalidHandle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    pub(crate) id: TaskId,
    pub(crate) generation: u16,
}

// ---------------------------------------------------------------------------
// Task configuration (immutable after creation, except priority)
// ---------------------------------------------------------------------------

/// Creation-time parameters for a task. Only the priority may change
/// after creation (via `set_priority`).
#[derive(Debug, Clone, Copy)]
pub struct TaskConfig {
    /// Scheduling priority in `[0, MAX_PRIORITIES)`; higher wins.
    pub priority: u8,
    /// Requested stack size in bytes. `0` selects `DEFAULT_STACK_SIZE`.
    pub stack_size: usize,
    /// Static core placement.
    pub affinity: CoreAffinity,
    /// Round-robin time slice in ticks. `0` selects `DEFAULT_TIME_SLICE`.
    pub time_slice: u32,
}

impl TaskConfig {
    /// Returns the effective time slice, falling back to the system default.
    #[inline]
    pub const fn effective_time_slice(&self) -> u32 {
        if self.time_slice > 0 {
            self.time_slice
        } else {
            DEFAULT_TIME_SLICE
        }
    }

    /// Returns the effective stack size, falling back to the system default.
    #[inline]
    pub const fn effective_stack_size(&self) -> usize {
        if self.stack_size > 0 {
            self.stack_size
        } else {
            DEFAULT_STACK_SIZE
        }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            priority: 1,
            stack_size: DEFAULT_STACK_SIZE,
            affinity: CoreAffinity::Any,
            time_slice: DEFAULT_TIME_SLICE,
        }
    }
}

// ---------------------------------------------------------------------------
// Observable snapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of a task, returned by `lookup`. Holds no
/// references into kernel state.
#[derive(Debug, Clone, Copy)]
pub struct TaskInfo {
    pub handle: TaskHandle,
    pub priority: u8,
    pub state: TaskState,
    pub wake_tick: Option<u64>,
    pub affinity: CoreAffinity,
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB) — the per-task record the scheduler owns.
///
/// TCBs live in a fixed-size array inside the TCB store; the stack they
/// describe lives in the stack arena. The saved stack pointer is only
/// meaningful while the task is not `Running` — while it runs, the real
/// context lives in the processor registers.
pub struct Tcb {
    /// Slot index, immutable for the task's lifetime.
    pub id: TaskId,

    /// Slot generation, bumped each time the slot is reclaimed.
    pub generation: u16,

    /// Current scheduling priority. Mutable at runtime.
    pub priority: u8,

    /// Current execution state.
    pub state: TaskState,

    /// Absolute tick at which a `Delayed` task becomes `Ready`. Also
    /// preserved across suspension of a delayed task so `resume` can
    /// re-join the delay queue. Meaningless in other states.
    pub wake_tick: Option<u64>,

    /// Static core placement, set at creation.
    pub affinity: CoreAffinity,

    /// Arena region backing this task's stack. `None` only for free slots.
    pub stack: Option<StackRegion>,

    /// Saved stack pointer (PSP). Updated on every context switch;
    /// points into the task's arena region.
    pub stack_pointer: *mut u32,

    /// Configured time slice in ticks.
    pub time_slice: u32,

    /// Remaining ticks in the current slice. `0` means the slice has
    /// expired and equal-priority rotation is due.
    pub slice_remaining: u32,

    /// Core this task last ran on (or was admitted to). Used to keep
    /// unpinned tasks sticky when no core is idle.
    pub last_core: u8,

    /// Entry point, kept for diagnostics and restart-free stack init.
    pub entry: Option<TaskEntry>,

    /// Whether this slot is allocated.
    active: bool,
}

// Safety: the raw stack_pointer always points into the kernel-owned
// stack arena, and all TCB access is serialized by the scheduler lock.
unsafe impl Send for Tcb {}
unsafe impl Sync for Tcb {}

impl Tcb {
    /// An unallocated slot. Used to initialize the static TCB array.
    pub const EMPTY: Tcb = Tcb {
        id: TaskId::new(0),
        generation: 0,
        priority: 0,
        state: TaskState::Deleted,
        wake_tick: None,
        affinity: CoreAffinity::Any,
        stack: None,
        stack_pointer: core::ptr::null_mut(),
        time_slice: 0,
        slice_remaining: 0,
        last_core: 0,
        entry: None,
        active: false,
    };

    /// Whether this slot currently holds a live task.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The weak handle naming this task at its current generation.
    #[inline]
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            id: self.id,
            generation: self.generation,
        }
    }

    /// Reload the round-robin slice. Called when the task is dispatched.
    #[inline]
    pub fn reset_slice(&mut self) {
        self.slice_remaining = self.time_slice;
    }

    /// Snapshot the externally observable fields.
    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            handle: self.handle(),
            priority: self.priority,
            state: self.state,
            wake_tick: self.wake_tick,
            affinity: self.affinity,
        }
    }
}

// ---------------------------------------------------------------------------
// TCB store
// ---------------------------------------------------------------------------

/// Fixed-slot store owning every TCB. Slots are recycled after
/// reclamation with their generation bumped, which is what invalidates
/// outstanding handles.
pub struct TcbStore {
    slots: [Tcb; MAX_TASKS],
}

impl TcbStore {
    pub const fn new() -> Self {
        Self {
            slots: [Tcb::EMPTY; MAX_TASKS],
        }
    }

    /// Claim a free slot and initialize it for a new `Ready` task.
    ///
    /// The stack region and saved context are filled in by the caller
    /// after arena allocation succeeds, so a failed stack allocation can
    /// release the slot without having published anything.
    pub fn allocate(
        &mut self,
        entry: TaskEntry,
        priority: u8,
        affinity: CoreAffinity,
        time_slice: u32,
    ) -> Result<TaskId, KernelError> {
        let slot = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, t)| !t.active)
            .ok_or(KernelError::OutOfMemory)?;

        let (index, tcb) = slot;
        tcb.id = TaskId::new(index);
        tcb.priority = priority;
        tcb.state = TaskState::Ready;
        tcb.wake_tick = None;
        tcb.affinity = affinity;
        tcb.stack = None;
        tcb.stack_pointer = core::ptr::null_mut();
        tcb.time_slice = time_slice;
        tcb.slice_remaining = time_slice;
        tcb.last_core = match affinity {
            CoreAffinity::Pinned(c) => c,
            CoreAffinity::Any => 0,
        };
        tcb.entry = Some(entry);
        tcb.active = true;

        Ok(tcb.id)
    }

    /// Return a slot to the free pool, invalidating all handles to the
    /// task that occupied it. The caller has already detached the task
    /// from every queue and freed its stack region.
    pub fn release(&mut self, id: TaskId) {
        let tcb = &mut self.slots[id.index()];
        tcb.active = false;
        tcb.state = TaskState::Deleted;
        tcb.stack = None;
        tcb.stack_pointer = core::ptr::null_mut();
        tcb.wake_tick = None;
        tcb.entry = None;
        tcb.generation = tcb.generation.wrapping_add(1);
    }

    /// Resolve a weak handle to a live task id.
    ///
    /// Rejects never-valid indices, stale generations, and tasks already
    /// marked `Deleted` (including those awaiting deferred reclamation).
    pub fn resolve(&self, handle: TaskHandle) -> Result<TaskId, KernelError> {
        let index = handle.id.index();
        if index >= MAX_TASKS {
            return Err(KernelError::InvalidHandle);
        }
        let tcb = &self.slots[index];
        if !tcb.active
            || tcb.generation != handle.generation
            || tcb.state == TaskState::Deleted
        {
            return Err(KernelError::InvalidHandle);
        }
        Ok(tcb.id)
    }

    #[inline]
    pub fn get(&self, id: TaskId) -> &Tcb {
        &self.slots[id.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, id: TaskId) -> &mut Tcb {
        &mut self.slots[id.index()]
    }

    /// Iterate over all allocated slots.
    pub fn iter_active(&self) -> impl Iterator<Item = &Tcb> {
        self.slots.iter().filter(|t| t.active)
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn spin() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    #[test]
    fn allocate_initializes_ready_task() {
        let mut store = TcbStore::new();
        let id = store
            .allocate(spin, 3, CoreAffinity::Pinned(1), 5)
            .unwrap();

        let tcb = store.get(id);
        assert!(tcb.is_active());
        assert_eq!(tcb.state, TaskState::Ready);
        assert_eq!(tcb.priority, 3);
        assert_eq!(tcb.affinity, CoreAffinity::Pinned(1));
        assert_eq!(tcb.slice_remaining, 5);
        assert_eq!(tcb.last_core, 1);
        assert!(tcb.wake_tick.is_none());
    }

    #[test]
    fn exhaustion_reports_out_of_memory() {
        let mut store = TcbStore::new();
        for _ in 0..MAX_TASKS {
            store.allocate(spin, 1, CoreAffinity::Any, 0).unwrap();
        }
        assert_eq!(
            store.allocate(spin, 1, CoreAffinity::Any, 0),
            Err(KernelError::OutOfMemory)
        );
    }

    #[test]
    fn release_invalidates_handle_and_recycles_slot() {
        let mut store = TcbStore::new();
        let id = store.allocate(spin, 2, CoreAffinity::Any, 0).unwrap();
        let handle = store.get(id).handle();
        assert_eq!(store.resolve(handle), Ok(id));

        store.release(id);
        assert_eq!(store.resolve(handle), Err(KernelError::InvalidHandle));

        // Slot is reused under a new generation; the old handle stays dead.
        let id2 = store.allocate(spin, 4, CoreAffinity::Any, 0).unwrap();
        assert_eq!(id2, id);
        assert_eq!(store.resolve(handle), Err(KernelError::InvalidHandle));
        assert_eq!(store.resolve(store.get(id2).handle()), Ok(id2));
    }

    #[test]
    fn resolve_rejects_deleted_before_reclamation() {
        let mut store = TcbStore::new();
        let id = store.allocate(spin, 2, CoreAffinity::Any, 0).unwrap();
        let handle = store.get(id).handle();

        // Deferred-delete window: marked Deleted, slot not yet released.
        store.get_mut(id).state = TaskState::Deleted;
        assert_eq!(store.resolve(handle), Err(KernelError::InvalidHandle));
    }

    #[test]
    fn affinity_allows() {
        assert!(CoreAffinity::Any.allows(0));
        assert!(CoreAffinity::Any.allows(1));
        assert!(CoreAffinity::Pinned(1).allows(1));
        assert!(!CoreAffinity::Pinned(1).allows(0));
    }

    #[test]
    fn config_defaults_apply() {
        let config = TaskConfig {
            priority: 1,
            stack_size: 0,
            affinity: CoreAffinity::Any,
            time_slice: 0,
        };
        assert_eq!(config.effective_time_slice(), DEFAULT_TIME_SLICE);
        assert_eq!(config.effective_stack_size(), DEFAULT_STACK_SIZE);
    }
}
