//! # Scheduler
//!
//! Core scheduling logic for Quantos: a preemptive, priority-based
//! multitasking scheduler with cooperative delay and suspend/resume
//! semantics.
//!
//! ## Selection rule
//!
//! Invoked on every tick and on any state-changing call, per core:
//!
//! 1. Look at the head of the highest non-empty ready queue.
//! 2. Preempt the running task if the head has strictly higher
//!    priority, or equal priority with the running task's round-robin
//!    slice expired.
//! 3. A preempted or yielding task re-enters the tail of its own
//!    priority level; a task that just blocked (`Delayed`, `Suspended`,
//!    `Deleted`) does not re-enter any ready queue.
//! 4. With nothing ready, the core's idle task runs, so selection never
//!    comes up empty.
//!
//! ## Tick handling
//!
//! Each tick advances the logical clock by one, charges the running
//! tasks' slices, promotes every expired delay-queue entry into its
//! ready queue (ascending wake order), then re-runs the selection rule
//! on each online core.
//!
//! The actual hand-over of the CPU happens in `context_switch`, called
//! from the PendSV path on hardware and directly by host tests. The
//! scheduler lock is never held across it; a switch is only ever
//! *pended* from inside a critical section.

use crate::config::{IDLE_STACK_SIZE, MAX_CORES, MAX_PRIORITIES, SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::dispatch;
use crate::error::KernelError;
use crate::queue::{DelayQueue, ReadyQueueSet, SuspendSet};
use crate::stack::StackArena;
use crate::task::{
    CoreAffinity, TaskConfig, TaskEntry, TaskHandle, TaskId, TaskInfo, TaskState, TcbStore,
};

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central scheduler state: TCB store, stack arena, the three
/// queue structures, and per-core dispatch bookkeeping. Stored as a
/// single global in `kernel.rs`; every mutation funnels through the
/// kernel's critical-section discipline.
pub struct Scheduler {
    /// All task control blocks.
    tcbs: TcbStore,

    /// Arena backing every task stack.
    arena: StackArena,

    /// Per-priority FIFO ready queues, one set per core.
    ready: ReadyQueueSet,

    /// Tasks blocked until a future tick, ascending by wake tick.
    delayed: DelayQueue,

    /// Tasks excluded from scheduling until resumed.
    suspended: SuspendSet,

    /// Task currently dispatched on each core.
    running: [Option<TaskId>; MAX_CORES],

    /// Per-core idle fallback. Never enters a ready queue.
    idle: [Option<TaskId>; MAX_CORES],

    /// Cores that have been started and may dispatch tasks.
    online: [bool; MAX_CORES],

    /// Cores with a context switch pended but not yet taken.
    switch_pending: [bool; MAX_CORES],

    /// Monotonic logical clock, advanced once per tick interrupt.
    ticks: u64,

    /// CPU clock in Hz, read once at init and used for SysTick reload.
    cpu_freq_hz: u32,

    /// Tick rate in Hz.
    tick_rate_hz: u32,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tcbs: TcbStore::new(),
            arena: StackArena::new(),
            ready: ReadyQueueSet::new(),
            delayed: DelayQueue::new(),
            suspended: SuspendSet::new(),
            running: [None; MAX_CORES],
            idle: [None; MAX_CORES],
            online: [false; MAX_CORES],
            switch_pending: [false; MAX_CORES],
            ticks: 0,
            cpu_freq_hz: SYSTEM_CLOCK_HZ,
            tick_rate_hz: TICK_HZ,
        }
    }

    /// Override the timing configuration. Read once, before `start_core`.
    pub fn configure(&mut self, cpu_freq_hz: u32, tick_rate_hz: u32) {
        self.cpu_freq_hz = cpu_freq_hz;
        self.tick_rate_hz = tick_rate_hz;
    }

    /// SysTick reload value for the configured tick rate.
    pub fn systick_reload(&self) -> u32 {
        self.cpu_freq_hz / self.tick_rate_hz
    }

    /// Create the per-core idle tasks. Must run before any core starts,
    /// so the selection rule always has a fallback.
    pub fn init(&mut self) -> Result<(), KernelError> {
        for core in 0..MAX_CORES {
            if self.idle[core].is_some() {
                continue;
            }
            let id = self
                .tcbs
                .allocate(idle_entry, 0, CoreAffinity::Pinned(core as u8), 0)?;
            let region = match self.arena.alloc(IDLE_STACK_SIZE) {
                Ok(region) => region,
                Err(e) => {
                    self.tcbs.release(id);
                    return Err(e);
                }
            };
            let sp = dispatch::init_context(self.arena.region_mut(region), idle_entry);
            let tcb = self.tcbs.get_mut(id);
            tcb.stack = Some(region);
            tcb.stack_pointer = sp;
            self.idle[core] = Some(id);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Task lifecycle
    // -----------------------------------------------------------------------

    /// Register a new task. The task enters `Ready` and may preempt a
    /// running task immediately.
    ///
    /// Fails with `OutOfMemory` if no TCB slot is free or the stack
    /// arena cannot satisfy the request; on failure no shared queue has
    /// been touched.
    pub fn create_task(
        &mut self,
        entry: TaskEntry,
        config: TaskConfig,
    ) -> Result<TaskHandle, KernelError> {
        let priority = config.priority.min((MAX_PRIORITIES - 1) as u8);
        let id = self.tcbs.allocate(
            entry,
            priority,
            config.affinity,
            config.effective_time_slice(),
        )?;

        let region = match self.arena.alloc(config.effective_stack_size()) {
            Ok(region) => region,
            Err(e) => {
                self.tcbs.release(id);
                return Err(e);
            }
        };

        let sp = dispatch::init_context(self.arena.region_mut(region), entry);
        let tcb = self.tcbs.get_mut(id);
        tcb.stack = Some(region);
        tcb.stack_pointer = sp;
        let handle = tcb.handle();

        log::debug!(
            "task {} created: priority {}, {} byte stack",
            id.index(),
            priority,
            region.len()
        );

        self.admit(id);
        Ok(handle)
    }

    /// Delete a task in any state.
    ///
    /// A non-running target is unlinked from its queue and reclaimed
    /// immediately. A running target (including self-deletion) is only
    /// marked `Deleted` here; its stack and slot are reclaimed at the
    /// context switch away from it, once the dispatcher is guaranteed
    /// off that stack.
    pub fn delete(&mut self, handle: TaskHandle) -> Result<(), KernelError> {
        let id = self.tcbs.resolve(handle)?;
        match self.tcbs.get(id).state {
            TaskState::Running => {
                self.tcbs.get_mut(id).state = TaskState::Deleted;
                log::debug!("task {} deleted (reclamation deferred)", id.index());
                if let Some(core) = self.core_of(id) {
                    self.request_switch(core);
                }
            }
            TaskState::Ready => {
                self.ready.remove(id);
                self.reclaim(id);
            }
            TaskState::Delayed => {
                self.delayed.remove(id);
                self.reclaim(id);
            }
            TaskState::Suspended => {
                self.suspended.remove(id);
                self.reclaim(id);
            }
            TaskState::Deleted => {}
        }
        Ok(())
    }

    /// Delete the task running on `core` (self-deletion path).
    pub fn delete_current(&mut self, core: usize) {
        let Some(current) = self.running[core] else {
            return;
        };
        if Some(current) == self.idle[core] {
            return;
        }
        self.tcbs.get_mut(current).state = TaskState::Deleted;
        log::debug!("task {} exited (reclamation deferred)", current.index());
        self.request_switch(core);
    }

    fn reclaim(&mut self, id: TaskId) {
        if let Some(region) = self.tcbs.get(id).stack {
            self.arena.free(region);
        }
        self.tcbs.release(id);
        log::trace!("task {} reclaimed", id.index());
    }

    // -----------------------------------------------------------------------
    // Delay
    // -----------------------------------------------------------------------

    /// Block the task running on `core` for `ticks` ticks, relative to
    /// now. Repeated relative delays accumulate drift equal to the
    /// task's own execution time each cycle; that is the contract, not
    /// a defect. `delay(0)` degenerates to a yield.
    pub fn delay(&mut self, core: usize, ticks: u64) {
        if ticks == 0 {
            self.yield_now(core);
            return;
        }
        let Some(current) = self.running[core] else {
            return;
        };
        if Some(current) == self.idle[core] {
            // idle must stay runnable
            return;
        }
        let wake_tick = self.ticks + ticks;
        let tcb = self.tcbs.get_mut(current);
        tcb.state = TaskState::Delayed;
        tcb.wake_tick = Some(wake_tick);
        self.delayed.insert(current, wake_tick);
        log::trace!("task {} delayed until tick {}", current.index(), wake_tick);
        self.request_switch(core);
    }

    /// Block the task running on `core` until `last_wake + period`,
    /// returning the new reference tick for the next call.
    ///
    /// If that instant has already passed — the task overran its period
    /// — the call does not block and instead advances the reference to
    /// the smallest `last_wake + k*period` beyond the current tick,
    /// silently absorbing the missed period(s).
    pub fn delay_until(&mut self, core: usize, last_wake: u64, period: u64) -> u64 {
        if period == 0 {
            self.yield_now(core);
            return last_wake;
        }
        let wake_tick = last_wake + period;
        if wake_tick > self.ticks {
            if let Some(current) = self.running[core] {
                if Some(current) != self.idle[core] {
                    let tcb = self.tcbs.get_mut(current);
                    tcb.state = TaskState::Delayed;
                    tcb.wake_tick = Some(wake_tick);
                    self.delayed.insert(current, wake_tick);
                    log::trace!(
                        "task {} periodic wait until tick {}",
                        current.index(),
                        wake_tick
                    );
                    self.request_switch(core);
                }
            }
            wake_tick
        } else {
            let missed = (self.ticks - last_wake) / period;
            last_wake + (missed + 1) * period
        }
    }

    // -----------------------------------------------------------------------
    // Suspend / resume
    // -----------------------------------------------------------------------

    /// Exclude a task from scheduling until `resume`. Suspending an
    /// already-suspended task is a silent no-op. A delayed task keeps
    /// its wake tick for later use; a running task is descheduled at
    /// the forced reschedule (it cannot suspend itself and keep
    /// running).
    pub fn suspend(&mut self, handle: TaskHandle) -> Result<(), KernelError> {
        let id = self.tcbs.resolve(handle)?;
        match self.tcbs.get(id).state {
            TaskState::Suspended => {}
            TaskState::Ready => {
                self.ready.remove(id);
                self.tcbs.get_mut(id).state = TaskState::Suspended;
                self.suspended.insert(id);
                log::trace!("task {} suspended", id.index());
            }
            TaskState::Delayed => {
                self.delayed.remove(id);
                // wake_tick stays in the TCB for resume
                self.tcbs.get_mut(id).state = TaskState::Suspended;
                self.suspended.insert(id);
                log::trace!("task {} suspended (delay pending)", id.index());
            }
            TaskState::Running => {
                self.tcbs.get_mut(id).state = TaskState::Suspended;
                self.suspended.insert(id);
                log::trace!("task {} suspended while running", id.index());
                if let Some(core) = self.core_of(id) {
                    self.request_switch(core);
                }
            }
            // resolve() rejects deleted tasks
            TaskState::Deleted => {}
        }
        Ok(())
    }

    /// Return a suspended task to scheduling. If its preserved wake
    /// tick is still in the future it rejoins the delay queue there;
    /// otherwise it becomes ready immediately and a preemption check
    /// runs. Resuming a non-suspended task is a silent no-op.
    pub fn resume(&mut self, handle: TaskHandle) -> Result<(), KernelError> {
        let id = self.tcbs.resolve(handle)?;
        if self.tcbs.get(id).state != TaskState::Suspended {
            return Ok(());
        }
        self.suspended.remove(id);
        match self.tcbs.get(id).wake_tick {
            Some(wake_tick) if wake_tick > self.ticks => {
                self.tcbs.get_mut(id).state = TaskState::Delayed;
                self.delayed.insert(id, wake_tick);
                log::trace!("task {} resumed into delay until {}", id.index(), wake_tick);
            }
            _ => {
                self.tcbs.get_mut(id).wake_tick = None;
                log::trace!("task {} resumed", id.index());
                self.admit(id);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Priority
    // -----------------------------------------------------------------------

    /// Change a task's priority, effective immediately: a ready task is
    /// re-queued at its new level, and if the change now outranks a
    /// running task the preemption check runs synchronously rather than
    /// waiting for the next tick.
    pub fn set_priority(&mut self, handle: TaskHandle, priority: u8) -> Result<(), KernelError> {
        let id = self.tcbs.resolve(handle)?;
        let priority = priority.min((MAX_PRIORITIES - 1) as u8);
        let state = self.tcbs.get(id).state;
        self.tcbs.get_mut(id).priority = priority;
        log::trace!("task {} priority set to {}", id.index(), priority);
        match state {
            TaskState::Ready => {
                if let Some(core) = self.ready.remove(id) {
                    self.ready.enqueue(core, priority, id);
                    self.preemption_check(core);
                }
            }
            TaskState::Running => {
                // lowering below a queued task must preempt as well
                if let Some(core) = self.core_of(id) {
                    self.preemption_check(core);
                }
            }
            _ => {}
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Yield and dispatch
    // -----------------------------------------------------------------------

    /// Voluntarily hand over the CPU on `core`. The running task
    /// rotates to the tail of its own priority level.
    pub fn yield_now(&mut self, core: usize) {
        let Some(current) = self.running[core] else {
            return;
        };
        if Some(current) == self.idle[core] {
            if !self.ready.is_empty(core) {
                self.request_switch(core);
            }
            return;
        }
        self.request_switch(core);
    }

    /// Bring a core online and dispatch its first task. Requires
    /// `init()` to have run.
    pub fn start_core(&mut self, core: usize) -> Option<TaskId> {
        debug_assert!(self.idle[core].is_some());
        self.online[core] = true;
        self.context_switch(core)
    }

    /// Perform the context-switch decision for `core`: park the
    /// outgoing task according to its state, pick the next one, and
    /// mark it running. Returns the newly running task.
    ///
    /// On hardware this runs in the PendSV path; host tests call it
    /// directly to stand in for the switch.
    pub fn context_switch(&mut self, core: usize) -> Option<TaskId> {
        self.switch_pending[core] = false;

        if let Some(prev) = self.running[core].take() {
            match self.tcbs.get(prev).state {
                TaskState::Running => {
                    // preempted or yielded: tail of its own level
                    let tcb = self.tcbs.get_mut(prev);
                    tcb.state = TaskState::Ready;
                    tcb.reset_slice();
                    tcb.last_core = core as u8;
                    if Some(prev) != self.idle[core] {
                        let priority = tcb.priority;
                        self.ready.enqueue(core, priority, prev);
                    }
                }
                TaskState::Deleted => {
                    // the dispatcher has saved off this stack; reclaim now
                    self.reclaim(prev);
                }
                // Delayed and Suspended tasks are already parked
                _ => {}
            }
        }

        let next = match self.ready.dequeue_highest(core) {
            Some(id) => id,
            None => self.idle[core]?,
        };

        let tcb = self.tcbs.get_mut(next);
        tcb.state = TaskState::Running;
        tcb.reset_slice();
        tcb.last_core = core as u8;
        self.running[core] = Some(next);
        log::trace!("core {}: dispatch task {}", core, next.index());
        Some(next)
    }

    /// Store the saved stack pointer of the task being switched away
    /// from. Called from the context-switch path before selection.
    pub fn save_context(&mut self, core: usize, psp: *mut u32) {
        if let Some(current) = self.running[core] {
            self.tcbs.get_mut(current).stack_pointer = psp;
        }
    }

    // -----------------------------------------------------------------------
    // Tick handling
    // -----------------------------------------------------------------------

    /// Advance the logical clock by one tick: charge running slices,
    /// promote expired delays in ascending-wake order, then re-run the
    /// selection rule on every online core.
    pub fn tick(&mut self) {
        self.ticks += 1;

        for core in 0..MAX_CORES {
            if !self.online[core] {
                continue;
            }
            let Some(current) = self.running[core] else {
                continue;
            };
            if Some(current) == self.idle[core] {
                continue;
            }
            let tcb = self.tcbs.get_mut(current);
            if tcb.slice_remaining > 0 {
                tcb.slice_remaining -= 1;
            }
        }

        let expired = self.delayed.drain_expired(self.ticks);
        for id in expired {
            self.tcbs.get_mut(id).wake_tick = None;
            log::trace!("task {} woke at tick {}", id.index(), self.ticks);
            self.admit(id);
        }

        for core in 0..MAX_CORES {
            if self.online[core] {
                self.preemption_check(core);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Admission and selection
    // -----------------------------------------------------------------------

    /// Make a task ready: enqueue it on the core its affinity selects
    /// and run the preemption check there.
    fn admit(&mut self, id: TaskId) {
        let core = match self.tcbs.get(id).affinity {
            CoreAffinity::Pinned(core) => core as usize,
            CoreAffinity::Any => self.pick_core(id),
        };
        let tcb = self.tcbs.get_mut(id);
        tcb.state = TaskState::Ready;
        tcb.last_core = core as u8;
        let priority = tcb.priority;
        self.ready.enqueue(core, priority, id);
        self.preemption_check(core);
    }

    /// Placement for an unpinned task: the first idle online core, or
    /// failing that the core it last ran on. Busy cores are never
    /// raided on its behalf.
    fn pick_core(&self, id: TaskId) -> usize {
        for core in 0..MAX_CORES {
            if self.online[core] && self.core_is_idle(core) {
                return core;
            }
        }
        let last = self.tcbs.get(id).last_core as usize;
        if self.online[last] || !self.online.iter().any(|o| *o) {
            last
        } else {
            self.online.iter().position(|o| *o).unwrap_or(0)
        }
    }

    fn core_is_idle(&self, core: usize) -> bool {
        self.running[core].is_none() || self.running[core] == self.idle[core]
    }

    fn core_of(&self, id: TaskId) -> Option<usize> {
        (0..MAX_CORES).find(|&core| self.running[core] == Some(id))
    }

    /// Pend a context switch on `core` if the head of its highest
    /// non-empty ready queue outranks the running task.
    fn preemption_check(&mut self, core: usize) {
        if self.online[core] && self.should_preempt(core) {
            self.request_switch(core);
        }
    }

    fn should_preempt(&self, core: usize) -> bool {
        let Some((priority, _)) = self.ready.peek_highest(core) else {
            return false;
        };
        match self.running[core] {
            None => true,
            Some(current) => {
                if Some(current) == self.idle[core] {
                    return true;
                }
                let tcb = self.tcbs.get(current);
                if tcb.state != TaskState::Running {
                    // current has blocked or been deleted under us
                    return true;
                }
                priority > tcb.priority
                    || (priority == tcb.priority && tcb.slice_remaining == 0)
            }
        }
    }

    fn request_switch(&mut self, core: usize) {
        self.switch_pending[core] = true;
        dispatch::pend_switch(core);
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    /// Current logical time in ticks.
    #[inline]
    pub fn now(&self) -> u64 {
        self.ticks
    }

    /// Snapshot a task's externally observable state.
    pub fn lookup(&self, handle: TaskHandle) -> Result<TaskInfo, KernelError> {
        let id = self.tcbs.resolve(handle)?;
        Ok(self.tcbs.get(id).info())
    }

    /// Handle of the task running on `core`, or `None` while idle.
    pub fn current(&self, core: usize) -> Option<TaskHandle> {
        let current = self.running[core]?;
        if Some(current) == self.idle[core] {
            return None;
        }
        Some(self.tcbs.get(current).handle())
    }

    /// Whether a context switch is pended on `core`.
    #[inline]
    pub fn switch_pending(&self, core: usize) -> bool {
        self.switch_pending[core]
    }

    /// Saved stack pointer of a task, for the dispatcher.
    pub fn stack_pointer_of(&self, id: TaskId) -> *mut u32 {
        self.tcbs.get(id).stack_pointer
    }
}

/// Per-core fallback task: waits for the next interrupt forever.
extern "C" fn idle_entry() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_TIME_SLICE, MAX_TASKS, STACK_ARENA_SIZE};
    use crate::stack::ARENA_BLOCKS;

    extern "C" fn spin() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn sched() -> Scheduler {
        let mut s = Scheduler::new();
        s.init().unwrap();
        s
    }

    fn pinned(priority: u8) -> TaskConfig {
        TaskConfig {
            priority,
            stack_size: 512,
            affinity: CoreAffinity::Pinned(0),
            time_slice: 0,
        }
    }

    /// Take the pended switch on `core`, as PendSV would.
    fn settle(s: &mut Scheduler, core: usize) {
        if s.switch_pending(core) {
            s.context_switch(core);
        }
    }

    /// Advance `n` ticks, taking pended switches after each.
    fn advance(s: &mut Scheduler, n: u64) {
        for _ in 0..n {
            s.tick();
            settle(s, 0);
            settle(s, 1);
        }
    }

    fn state_of(s: &Scheduler, handle: TaskHandle) -> TaskState {
        s.lookup(handle).unwrap().state
    }

    /// Each live non-idle task must sit in exactly the container its
    /// state implies — never two, never zero, except `Running`.
    fn assert_containers(s: &Scheduler) {
        let idle = s.idle;
        for tcb in s.tcbs.iter_active() {
            if idle.contains(&Some(tcb.id)) {
                continue;
            }
            let in_ready = s.ready.contains(tcb.id);
            let in_delay = s.delayed.contains(tcb.id);
            let in_suspend = s.suspended.contains(tcb.id);
            match tcb.state {
                TaskState::Ready => {
                    assert!(in_ready && !in_delay && !in_suspend);
                }
                TaskState::Delayed => {
                    assert!(!in_ready && in_delay && !in_suspend);
                }
                TaskState::Suspended => {
                    assert!(!in_ready && !in_delay && in_suspend);
                }
                TaskState::Running | TaskState::Deleted => {
                    assert!(!in_ready && !in_delay && !in_suspend);
                }
            }
        }
    }

    #[test]
    fn idle_runs_when_no_tasks() {
        let mut s = sched();
        let first = s.start_core(0).unwrap();
        assert_eq!(Some(first), s.idle[0]);
        assert!(s.current(0).is_none());
        advance(&mut s, 5);
        assert_eq!(s.running[0], s.idle[0]);
    }

    #[test]
    fn highest_priority_ready_task_is_selected() {
        let mut s = sched();
        let low = s.create_task(spin, pinned(2)).unwrap();
        let high = s.create_task(spin, pinned(5)).unwrap();
        s.start_core(0);

        assert_eq!(state_of(&s, high), TaskState::Running);
        assert_eq!(state_of(&s, low), TaskState::Ready);
        assert_eq!(s.current(0), Some(high));
        assert_containers(&s);
    }

    #[test]
    fn configure_overrides_systick_reload() {
        let mut s = Scheduler::new();
        s.configure(48_000_000, 1000);
        assert_eq!(s.systick_reload(), 48_000);
    }

    #[test]
    fn exactly_one_running_task_per_core() {
        let mut s = sched();
        s.create_task(
            spin,
            TaskConfig {
                affinity: CoreAffinity::Pinned(1),
                ..pinned(3)
            },
        )
        .unwrap();
        s.create_task(spin, pinned(3)).unwrap();
        s.start_core(0);
        s.start_core(1);

        for core in 0..MAX_CORES {
            let running = s
                .tcbs
                .iter_active()
                .filter(|t| t.state == TaskState::Running && t.last_core as usize == core)
                .count();
            assert_eq!(running, 1);
        }
        assert_containers(&s);
    }

    #[test]
    fn new_higher_priority_task_preempts_immediately() {
        let mut s = sched();
        let low = s.create_task(spin, pinned(2)).unwrap();
        s.start_core(0);
        assert_eq!(state_of(&s, low), TaskState::Running);

        let high = s.create_task(spin, pinned(5)).unwrap();
        assert!(s.switch_pending(0));
        settle(&mut s, 0);

        assert_eq!(state_of(&s, high), TaskState::Running);
        assert_eq!(state_of(&s, low), TaskState::Ready);
        assert_containers(&s);
    }

    #[test]
    fn round_robin_rotates_at_slice_expiry_in_ready_order() {
        let mut s = sched();
        let a = s.create_task(spin, pinned(3)).unwrap();
        let b = s.create_task(spin, pinned(3)).unwrap();
        s.start_core(0);

        // First creation wins the first turn.
        assert_eq!(state_of(&s, a), TaskState::Running);

        // No rotation before the slice expires.
        advance(&mut s, DEFAULT_TIME_SLICE as u64 - 1);
        assert_eq!(state_of(&s, a), TaskState::Running);

        advance(&mut s, 1);
        assert_eq!(state_of(&s, b), TaskState::Running);
        assert_eq!(state_of(&s, a), TaskState::Ready);

        advance(&mut s, DEFAULT_TIME_SLICE as u64);
        assert_eq!(state_of(&s, a), TaskState::Running);
        assert_containers(&s);
    }

    #[test]
    fn yield_rotates_within_priority_level() {
        let mut s = sched();
        let a = s.create_task(spin, pinned(3)).unwrap();
        let b = s.create_task(spin, pinned(3)).unwrap();
        s.start_core(0);
        assert_eq!(state_of(&s, a), TaskState::Running);

        s.yield_now(0);
        settle(&mut s, 0);
        assert_eq!(state_of(&s, b), TaskState::Running);
        assert_eq!(state_of(&s, a), TaskState::Ready);

        s.yield_now(0);
        settle(&mut s, 0);
        assert_eq!(state_of(&s, a), TaskState::Running);
    }

    #[test]
    fn delayed_high_priority_task_preempts_on_wake() {
        // spec scenario: priorities 1 and 3, 500-tick delay
        let mut s = sched();
        let low = s.create_task(spin, pinned(1)).unwrap();
        let high = s.create_task(spin, pinned(3)).unwrap();
        s.start_core(0);
        assert_eq!(state_of(&s, high), TaskState::Running);

        s.delay(0, 500);
        settle(&mut s, 0);
        assert_eq!(state_of(&s, high), TaskState::Delayed);
        assert_eq!(state_of(&s, low), TaskState::Running);
        assert_containers(&s);

        advance(&mut s, 499);
        assert_eq!(state_of(&s, high), TaskState::Delayed);
        assert_eq!(state_of(&s, low), TaskState::Running);

        advance(&mut s, 1);
        assert_eq!(s.now(), 500);
        assert_eq!(state_of(&s, high), TaskState::Running);
        assert_eq!(state_of(&s, low), TaskState::Ready);
        assert_containers(&s);
    }

    #[test]
    fn relative_delay_accumulates_execution_drift() {
        let mut s = sched();
        let worker = s.create_task(spin, pinned(2)).unwrap();
        s.start_core(0);

        // Each cycle: e = 5 ticks of execution, then a 100-tick delay.
        // Wake instants land at n * 105, not n * 100.
        for cycle in 1..=3u64 {
            advance(&mut s, 5);
            s.delay(0, 100);
            settle(&mut s, 0);
            assert_eq!(state_of(&s, worker), TaskState::Delayed);

            while state_of(&s, worker) != TaskState::Running {
                advance(&mut s, 1);
            }
            assert_eq!(s.now(), cycle * 105);
        }
    }

    #[test]
    fn delay_until_holds_a_stable_period() {
        let mut s = sched();
        let worker = s.create_task(spin, pinned(2)).unwrap();
        s.start_core(0);

        // Variable execution time below the period must not shift the
        // wake instants off the T, 2T, 3T grid.
        let mut last_wake = 0;
        for (cycle, execution) in [3u64, 7, 5].iter().enumerate() {
            advance(&mut s, *execution);
            last_wake = s.delay_until(0, last_wake, 100);
            settle(&mut s, 0);
            assert_eq!(last_wake, (cycle as u64 + 1) * 100);

            while state_of(&s, worker) != TaskState::Running {
                advance(&mut s, 1);
            }
            assert_eq!(s.now(), last_wake);
        }
    }

    #[test]
    fn delay_until_absorbs_missed_periods_without_blocking() {
        let mut s = sched();
        let worker = s.create_task(spin, pinned(2)).unwrap();
        s.start_core(0);

        // Overrun: 250 ticks of execution against a 100-tick period.
        advance(&mut s, 250);
        let last_wake = s.delay_until(0, 0, 100);

        assert_eq!(last_wake, 300);
        assert_eq!(state_of(&s, worker), TaskState::Running);
        assert!(s.delayed.is_empty());
        assert!(!s.switch_pending(0));
    }

    #[test]
    fn delay_zero_behaves_as_yield() {
        let mut s = sched();
        let a = s.create_task(spin, pinned(3)).unwrap();
        let b = s.create_task(spin, pinned(3)).unwrap();
        s.start_core(0);
        assert_eq!(state_of(&s, a), TaskState::Running);

        s.delay(0, 0);
        settle(&mut s, 0);
        assert_eq!(state_of(&s, b), TaskState::Running);
        assert_eq!(state_of(&s, a), TaskState::Ready);
    }

    #[test]
    fn suspend_and_resume_are_idempotent() {
        let mut s = sched();
        let victim = s.create_task(spin, pinned(1)).unwrap();
        let boss = s.create_task(spin, pinned(3)).unwrap();
        s.start_core(0);
        assert_eq!(state_of(&s, boss), TaskState::Running);

        // Resuming a never-suspended task changes nothing.
        s.resume(victim).unwrap();
        assert_eq!(state_of(&s, victim), TaskState::Ready);
        assert_containers(&s);

        s.suspend(victim).unwrap();
        assert_eq!(state_of(&s, victim), TaskState::Suspended);
        s.suspend(victim).unwrap();
        assert_eq!(state_of(&s, victim), TaskState::Suspended);
        assert_eq!(s.suspended.len(), 1);
        assert_containers(&s);

        s.resume(victim).unwrap();
        assert_eq!(state_of(&s, victim), TaskState::Ready);
        s.resume(victim).unwrap();
        assert_eq!(state_of(&s, victim), TaskState::Ready);
        assert_containers(&s);
    }

    #[test]
    fn suspending_running_task_deschedules_it() {
        let mut s = sched();
        let low = s.create_task(spin, pinned(1)).unwrap();
        let high = s.create_task(spin, pinned(3)).unwrap();
        s.start_core(0);
        assert_eq!(state_of(&s, high), TaskState::Running);

        s.suspend(high).unwrap();
        assert!(s.switch_pending(0));
        settle(&mut s, 0);

        assert_eq!(state_of(&s, high), TaskState::Suspended);
        assert_eq!(state_of(&s, low), TaskState::Running);
        assert_containers(&s);
    }

    #[test]
    fn suspended_delayed_task_keeps_its_wake_tick() {
        let mut s = sched();
        let worker = s.create_task(spin, pinned(2)).unwrap();
        s.start_core(0);

        s.delay(0, 100);
        settle(&mut s, 0);
        s.suspend(worker).unwrap();
        assert_eq!(state_of(&s, worker), TaskState::Suspended);
        assert_eq!(s.lookup(worker).unwrap().wake_tick, Some(100));
        assert_containers(&s);

        // Resumed before the wake tick: back into the delay queue.
        advance(&mut s, 50);
        s.resume(worker).unwrap();
        assert_eq!(state_of(&s, worker), TaskState::Delayed);
        assert_containers(&s);

        advance(&mut s, 50);
        assert_eq!(state_of(&s, worker), TaskState::Running);
    }

    #[test]
    fn resume_after_wake_tick_passed_is_immediate() {
        let mut s = sched();
        let worker = s.create_task(spin, pinned(2)).unwrap();
        s.start_core(0);

        s.delay(0, 100);
        settle(&mut s, 0);
        s.suspend(worker).unwrap();

        advance(&mut s, 200);
        s.resume(worker).unwrap();
        settle(&mut s, 0);
        assert_eq!(state_of(&s, worker), TaskState::Running);
        assert_eq!(s.lookup(worker).unwrap().wake_tick, None);
    }

    #[test]
    fn priority_change_takes_effect_immediately() {
        let mut s = sched();
        let a = s.create_task(spin, pinned(3)).unwrap();
        let b = s.create_task(spin, pinned(1)).unwrap();
        s.start_core(0);
        assert_eq!(state_of(&s, a), TaskState::Running);

        s.set_priority(b, 5).unwrap();
        assert!(s.switch_pending(0));
        settle(&mut s, 0);
        assert_eq!(state_of(&s, b), TaskState::Running);
        assert_eq!(state_of(&s, a), TaskState::Ready);

        // Lowering the running task below a queued one preempts too.
        s.set_priority(b, 0).unwrap();
        settle(&mut s, 0);
        assert_eq!(state_of(&s, a), TaskState::Running);
        assert_containers(&s);
    }

    #[test]
    fn delete_ready_task_reclaims_immediately() {
        let mut s = sched();
        let a = s.create_task(spin, pinned(3)).unwrap();
        let b = s.create_task(spin, pinned(1)).unwrap();
        s.start_core(0);

        let free_before = s.arena.free_blocks();
        s.delete(b).unwrap();
        assert!(s.arena.free_blocks() > free_before);
        assert_eq!(s.lookup(b).unwrap_err(), KernelError::InvalidHandle);
        assert_containers(&s);

        // Remaining task unaffected.
        assert_eq!(state_of(&s, a), TaskState::Running);
    }

    #[test]
    fn deleting_running_task_defers_stack_reclamation() {
        let mut s = sched();
        let worker = s.create_task(spin, pinned(2)).unwrap();
        s.start_core(0);
        assert_eq!(state_of(&s, worker), TaskState::Running);

        let free_before = s.arena.free_blocks();
        s.delete(worker).unwrap();

        // Marked deleted, but the stack survives until the switch away.
        assert_eq!(s.lookup(worker).unwrap_err(), KernelError::InvalidHandle);
        assert_eq!(s.arena.free_blocks(), free_before);
        assert!(s.switch_pending(0));

        settle(&mut s, 0);
        assert!(s.arena.free_blocks() > free_before);
        assert_eq!(s.running[0], s.idle[0]);
        assert_containers(&s);
    }

    #[test]
    fn self_exit_defers_like_cross_delete() {
        let mut s = sched();
        let worker = s.create_task(spin, pinned(2)).unwrap();
        s.start_core(0);

        let free_before = s.arena.free_blocks();
        s.delete_current(0);
        assert_eq!(s.arena.free_blocks(), free_before);
        settle(&mut s, 0);
        assert!(s.arena.free_blocks() > free_before);
        assert_eq!(s.lookup(worker).unwrap_err(), KernelError::InvalidHandle);
    }

    #[test]
    fn stale_handle_is_rejected_after_slot_reuse() {
        let mut s = sched();
        let old = s.create_task(spin, pinned(2)).unwrap();
        s.delete(old).unwrap();

        let new = s.create_task(spin, pinned(2)).unwrap();
        assert_eq!(s.suspend(old).unwrap_err(), KernelError::InvalidHandle);
        assert_eq!(s.delete(old).unwrap_err(), KernelError::InvalidHandle);
        assert!(s.lookup(new).is_ok());
        assert_containers(&s);
    }

    #[test]
    fn failed_creation_leaves_scheduler_untouched() {
        let mut s = sched();
        s.create_task(spin, pinned(2)).unwrap();
        s.start_core(0);

        let free_before = s.arena.free_blocks();
        let ready_before = s.ready.len(0);
        let result = s.create_task(
            spin,
            TaskConfig {
                stack_size: STACK_ARENA_SIZE + 1,
                ..pinned(4)
            },
        );

        assert_eq!(result.unwrap_err(), KernelError::OutOfMemory);
        assert_eq!(s.arena.free_blocks(), free_before);
        assert_eq!(s.ready.len(0), ready_before);
        assert!(!s.switch_pending(0));
    }

    #[test]
    fn tcb_exhaustion_reports_out_of_memory() {
        let mut s = sched();
        // Two slots are taken by the idle tasks.
        for _ in 0..(MAX_TASKS - MAX_CORES) {
            s.create_task(
                spin,
                TaskConfig {
                    stack_size: 256,
                    ..pinned(1)
                },
            )
            .unwrap();
        }
        assert_eq!(
            s.create_task(spin, pinned(1)).unwrap_err(),
            KernelError::OutOfMemory
        );
        assert!(s.arena.free_blocks() <= ARENA_BLOCKS);
    }

    #[test]
    fn unpinned_task_lands_on_first_idle_core() {
        let mut s = sched();
        s.start_core(0);
        s.start_core(1);

        let a = s.create_task(spin, pinned(3)).unwrap();
        settle(&mut s, 0);
        assert_eq!(state_of(&s, a), TaskState::Running);

        // Core 0 is busy, core 1 idle: the unpinned task goes there.
        let b = s
            .create_task(
                spin,
                TaskConfig {
                    affinity: CoreAffinity::Any,
                    ..pinned(3)
                },
            )
            .unwrap();
        settle(&mut s, 1);
        assert_eq!(state_of(&s, b), TaskState::Running);
        assert_eq!(s.lookup(b).unwrap().affinity, CoreAffinity::Any);

        // Both cores busy: the next unpinned task queues rather than
        // raiding a busy core.
        let c = s
            .create_task(
                spin,
                TaskConfig {
                    affinity: CoreAffinity::Any,
                    ..pinned(1)
                },
            )
            .unwrap();
        assert_eq!(state_of(&s, c), TaskState::Ready);
        assert_eq!(state_of(&s, a), TaskState::Running);
        assert_eq!(state_of(&s, b), TaskState::Running);
        assert_containers(&s);
    }

    #[test]
    fn pinned_task_never_migrates() {
        let mut s = sched();
        s.start_core(0);
        s.start_core(1);

        let a = s.create_task(spin, pinned(3)).unwrap();
        let b = s.create_task(spin, pinned(2)).unwrap();
        settle(&mut s, 0);

        // Core 1 sits idle, but the pinned lower-priority task stays
        // queued on core 0.
        assert_eq!(state_of(&s, a), TaskState::Running);
        assert_eq!(state_of(&s, b), TaskState::Ready);
        assert_eq!(s.ready.len(1), 0);
        assert_eq!(s.running[1], s.idle[1]);
    }
}
