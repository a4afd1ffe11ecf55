//! # Quantos Configuration
//!
//! Compile-time constants governing the scheduler and system behavior.
//! All capacity limits are fixed at compile time — no dynamic allocation.
//! Run-time timing (CPU clock, tick rate) may be overridden once before
//! `kernel::start()` via `kernel::configure()`.

/// Maximum number of tasks the system can manage simultaneously,
/// including the per-core idle tasks. This bounds the static TCB array
/// and the capacity of every scheduler queue.
pub const MAX_TASKS: usize = 16;

/// Number of distinct priority levels. Task priorities live in
/// `[0, MAX_PRIORITIES)`; a larger number means a more important task.
pub const MAX_PRIORITIES: usize = 8;

/// Number of schedulable cores. The Cortex-M4 port dispatches core 0
/// only; core 1 exists for the static-pinning model and runs where the
/// platform actually brings a second core online.
pub const MAX_CORES: usize = 2;

/// SysTick frequency in Hz. Determines scheduler tick granularity.
/// Higher values give finer scheduling precision at the cost of
/// increased interrupt overhead.
pub const TICK_HZ: u32 = 1000;

/// Default time slice in ticks. A task runs for this many ticks before
/// equal-priority round-robin rotation becomes eligible.
pub const DEFAULT_TIME_SLICE: u32 = 10;

/// Total size in bytes of the arena all task stacks are carved from.
/// Task creation fails with `OutOfMemory` once it is exhausted.
pub const STACK_ARENA_SIZE: usize = 16 * 1024;

/// Allocation granularity of the stack arena. Requested stack sizes
/// are rounded up to a whole number of blocks.
pub const STACK_BLOCK_SIZE: usize = 256;

/// Default per-task stack size in bytes. Must be large enough for the
/// deepest call chain plus the hardware exception frame (32 bytes)
/// and the software-saved context (32 bytes for R4–R11).
pub const DEFAULT_STACK_SIZE: usize = 1024;

/// Stack size for the per-core idle tasks. Idle does nothing but wait
/// for interrupts, so a single arena block suffices.
pub const IDLE_STACK_SIZE: usize = 256;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;
