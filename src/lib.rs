//! # Quantos
//!
//! A preemptive, priority-based multitasking kernel core for ARM
//! Cortex-M4 microcontrollers, with cooperative delay and
//! suspend/resume semantics.
//!
//! ## Overview
//!
//! Quantos schedules a fixed set of tasks across per-priority FIFO
//! ready queues:
//!
//! - **Priority preemption** — the highest-priority ready task always
//!   runs; a task becoming ready preempts immediately, not at the next
//!   tick.
//! - **Round-robin within a level** — equal-priority tasks rotate in
//!   ready order when their time slice expires or they yield.
//! - **Two delay disciplines** — relative `delay` (drifts by the
//!   caller's own execution time, by contract) and periodic
//!   `delay_until` (drift-free, absorbs overruns).
//! - **Suspend/resume** — idempotent exclusion from scheduling that
//!   preserves a pending wake tick across the suspension.
//! - **Static core pinning** — tasks are pinned at creation or float
//!   to whichever core goes idle first; busy cores are never raided.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Application Tasks                     │
//! ├──────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                   │
//! │   init() · create_task() · start() · delay() · suspend() │
//! ├───────────────┬───────────────────┬──────────────────────┤
//! │  Scheduler    │   Queues          │  Sync                │
//! │  scheduler.rs │   queue.rs        │  sync.rs             │
//! │  ─ tick()     │   ─ ready set     │  ─ scheduler lock    │
//! │  ─ select     │   ─ delay queue   │                      │
//! │  ─ switch     │   ─ suspend set   │                      │
//! ├───────────────┴─────────┬─────────┴──────────────────────┤
//! │   Task Model (task.rs)  │   Stack Arena (stack.rs)       │
//! │   TCB · handles · state │   fixed blocks · free map      │
//! ├─────────────────────────┴────────────────────────────────┤
//! │        Dispatcher (dispatch.rs) · Port (arch/)           │
//! │        initial frames · PendSV · SysTick                 │
//! ├──────────────────────────────────────────────────────────┤
//! │              ARM Cortex-M4 Hardware (Thumb-2)            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: all state is statically allocated
//! - **Fixed-size TCB array** behind generation-counted weak handles
//! - **Stack arena**: per-task stacks carved from one block map and
//!   returned only after deferred reclamation
//! - **Scheduler lock**: one critical-section discipline around every
//!   queue and TCB mutation, never held across a context switch
//!
//! The scheduler core is architecture-independent and unit-tested on
//! the host; only `arch/` and the launch path touch Cortex-M hardware.

#![no_std]

pub mod arch;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod kernel;
pub mod queue;
pub mod scheduler;
pub mod stack;
pub mod sync;
pub mod task;
