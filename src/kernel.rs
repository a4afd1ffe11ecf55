//! # Kernel
//!
//! Top-level kernel initialization and public API for Quantos.
//!
//! The kernel owns the single global `Scheduler` instance — created
//! once at startup and alive for the device's lifetime — and funnels
//! every mutation through the scheduler lock. Context switches are
//! never performed with the lock held; operations only *pend* a switch,
//! which the dispatcher takes after the critical section closes.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()        ← Create per-core idle tasks
//!         ├─► kernel::create_task() ← Register tasks (×N)
//!         └─► kernel::start()       ← Launch scheduler (no return)
//!               ├─► Configure SysTick
//!               ├─► Set interrupt priorities
//!               └─► Dispatch first task via arch::start_first_task()
//! ```

use crate::error::KernelError;
use crate::scheduler::Scheduler;
use crate::sync;
use crate::task::{TaskConfig, TaskEntry, TaskHandle, TaskInfo};

// ---------------------------------------------------------------------------
// Global scheduler instance
// ---------------------------------------------------------------------------

/// Global scheduler instance.
///
/// # Safety
/// All access goes through `with_scheduler` (thread mode, lock held) or
/// the `isr_*` entry points (handler mode, serialized by exception
/// priority — SysTick and PendSV share the lowest priority and cannot
/// preempt one another or a masked critical section).
static mut SCHEDULER: Scheduler = Scheduler::new();

/// Access the global scheduler within the scheduler lock.
fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    sync::critical_section(|_cs| {
        // Safety: interrupts are masked for the duration of the closure,
        // so no ISR can observe the scheduler mid-mutation.
        unsafe { f(&mut *core::ptr::addr_of_mut!(SCHEDULER)) }
    })
}

/// The core the calling task is executing on. The Cortex-M4 port is
/// single-core; hosts drive additional cores through the `Scheduler`
/// value directly.
#[inline]
fn current_core() -> usize {
    0
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the kernel: create the per-core idle tasks so selection
/// always has a fallback. Must be called before `create_task` or
/// `start`.
pub fn init() -> Result<(), KernelError> {
    with_scheduler(|s| s.init())
}

/// Override the timing configuration (CPU clock and tick rate). Read
/// once; call before `start`.
pub fn configure(cpu_freq_hz: u32, tick_rate_hz: u32) {
    with_scheduler(|s| s.configure(cpu_freq_hz, tick_rate_hz));
}

/// Create a new task and register it with the scheduler.
///
/// The task enters `Ready` immediately; if it outranks the running
/// task it preempts without waiting for the next tick.
///
/// # Errors
/// `OutOfMemory` if no TCB slot is free or the stack arena cannot
/// satisfy `config.stack_size`. No scheduler state is touched on
/// failure.
pub fn create_task(entry: TaskEntry, config: TaskConfig) -> Result<TaskHandle, KernelError> {
    with_scheduler(|s| s.create_task(entry, config))
}

/// Voluntarily yield the CPU. The calling task rotates to the tail of
/// its own priority level.
pub fn yield_now() {
    with_scheduler(|s| s.yield_now(current_core()));
}

/// Block the calling task for `ticks` ticks relative to now.
///
/// Repeated relative delays drift by the task's own execution and
/// preemption latency each cycle; use [`delay_until`] for a stable
/// period.
pub fn delay(ticks: u64) {
    with_scheduler(|s| s.delay(current_core(), ticks));
}

/// Block the calling task until `last_wake + period` and return the
/// new reference tick for the next call. If the instant has already
/// passed the call returns immediately, advancing the reference past
/// the missed period(s).
pub fn delay_until(last_wake: u64, period: u64) -> u64 {
    with_scheduler(|s| s.delay_until(current_core(), last_wake, period))
}

/// Exclude a task from scheduling until [`resume`]. Suspending an
/// already-suspended task is a silent no-op.
pub fn suspend(handle: TaskHandle) -> Result<(), KernelError> {
    with_scheduler(|s| s.suspend(handle))
}

/// Return a suspended task to scheduling. Resuming a task that is not
/// suspended is a silent no-op.
pub fn resume(handle: TaskHandle) -> Result<(), KernelError> {
    with_scheduler(|s| s.resume(handle))
}

/// Change a task's priority, effective immediately.
pub fn set_priority(handle: TaskHandle, priority: u8) -> Result<(), KernelError> {
    with_scheduler(|s| s.set_priority(handle, priority))
}

/// Delete a task in any state. Deleting the running task defers stack
/// reclamation to the switch away from it.
pub fn delete(handle: TaskHandle) -> Result<(), KernelError> {
    with_scheduler(|s| s.delete(handle))
}

/// Current logical time in ticks since `start`.
pub fn now() -> u64 {
    with_scheduler(|s| s.now())
}

/// Handle of the calling task, or `None` from the idle context.
pub fn current_task() -> Option<TaskHandle> {
    with_scheduler(|s| s.current(current_core()))
}

/// Snapshot a task's externally observable state.
pub fn lookup(handle: TaskHandle) -> Result<TaskInfo, KernelError> {
    with_scheduler(|s| s.lookup(handle))
}

/// Hold the calling task for at least `ticks` ticks by polling the
/// logical clock, re-blocking one tick at a time.
///
/// This is the busy-wait pattern supervisors use to watch a peer while
/// holding it suspended. It trades latency and wakeups for the ability
/// to run code between polls; prefer [`delay`] when nothing needs
/// observing.
pub fn spin_delay(ticks: u64) {
    let start = now();
    loop {
        // yield first, so spin_delay(0) still gives up the CPU once
        yield_now();
        if now().wrapping_sub(start) >= ticks {
            break;
        }
        delay(1);
    }
}

/// Start the scheduler on core 0. **Does not return.**
///
/// Configures the SysTick timer at the configured tick rate, lowers
/// SysTick/PendSV priority, brings core 0 online, and launches its
/// first task. After this call the system is fully preemptive.
///
/// Spins forever if `init()` was never called (no idle fallback).
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    use crate::arch::cortex_m4;

    let reload = with_scheduler(|s| s.systick_reload());
    cortex_m4::configure_systick(&mut core_peripherals.SYST, reload);
    cortex_m4::set_interrupt_priorities();

    let first_sp = with_scheduler(|s| {
        s.start_core(0)
            .map(|first| s.stack_pointer_of(first) as *const u32)
    });

    match first_sp {
        Some(sp) => unsafe { cortex_m4::start_first_task(sp) },
        None => loop {
            cortex_m::asm::wfi();
        },
    }
}

/// Delete the calling task and wait to be switched away. **Does not
/// return.** The task's stack and TCB slot are reclaimed at the next
/// dispatch on this core.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn exit_current() -> ! {
    with_scheduler(|s| s.delete_current(current_core()));
    // PendSV is pended; it takes the core as soon as we leave here
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// ISR entry points (handler mode, arch port only)
// ---------------------------------------------------------------------------

/// Scheduler tick. Called from the SysTick handler at `tick_rate_hz`.
///
/// # Safety
/// Must only be called from the SysTick exception, which runs at the
/// same (lowest) priority as PendSV and therefore cannot interleave
/// with it or with a masked critical section.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub(crate) unsafe fn isr_tick() {
    let scheduler = &mut *core::ptr::addr_of_mut!(SCHEDULER);
    scheduler.tick();
}

/// Context-switch decision. Called from the PendSV handler with the
/// outgoing task's stacked PSP; returns the incoming task's PSP.
///
/// # Safety
/// Must only be called from the PendSV exception. Same serialization
/// argument as [`isr_tick`].
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub(crate) unsafe fn isr_switch_context(psp: *mut u32) -> *mut u32 {
    let scheduler = &mut *core::ptr::addr_of_mut!(SCHEDULER);
    scheduler.save_context(0, psp);
    match scheduler.context_switch(0) {
        Some(next) => scheduler.stack_pointer_of(next),
        None => psp,
    }
}
