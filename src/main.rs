//! # Quantos Demo Firmware
//!
//! Exercises the kernel with six tasks covering the classic scheduler
//! behaviors:
//!
//! | Task | Priority | Affinity | Behavior |
//! |------|----------|----------|----------|
//! | `worker_task` | 1 | core 0 | ticks a counter every second; gets suspended |
//! | `supervisor_task` | 3 | core 0 | every ~3 s suspends the worker for 3 s, polling |
//! | `drift_task` | 2 | any | 1 s relative delay — period drifts by execution time |
//! | `periodic_task` | 2 | any | 1 s `delay_until` — period stays on the tick grid |
//! | `transient_task` | 2 | core 0 | five beats, then deletes itself |
//!
//! The supervisor/worker pair shows priority preemption plus
//! suspend/resume from a peer; the drift/periodic pair makes the two
//! delay disciplines directly comparable on a logic analyzer or via a
//! serial sink wired to the counters.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use core::cell::Cell;

    use cortex_m_rt::entry;
    use critical_section::Mutex;
    use panic_halt as _;

    use quantos::config::TICK_HZ;
    use quantos::kernel;
    use quantos::task::{CoreAffinity, TaskConfig, TaskHandle};

    /// One second's worth of ticks.
    const SECOND: u64 = TICK_HZ as u64;

    /// Handle of the low-priority worker, shared so the supervisor can
    /// suspend and resume it.
    static WORKER: Mutex<Cell<Option<TaskHandle>>> = Mutex::new(Cell::new(None));

    // -----------------------------------------------------------------------
    // Task entry points
    // -----------------------------------------------------------------------

    /// Low-priority worker. Advances a heartbeat once a second; goes
    /// quiet whenever the supervisor holds it suspended.
    extern "C" fn worker_task() -> ! {
        let mut heartbeat: u32 = 0;
        loop {
            heartbeat = heartbeat.wrapping_add(1);
            kernel::delay(SECOND);
        }
    }

    /// High-priority supervisor. Runs twice a second; every sixth
    /// iteration it suspends the worker for three seconds, watching the
    /// clock with a polling wait, then resumes it.
    extern "C" fn supervisor_task() -> ! {
        let mut iteration: u32 = 0;
        loop {
            if iteration % 6 == 0 {
                let worker = critical_section::with(|cs| WORKER.borrow(cs).get());
                if let Some(worker) = worker {
                    kernel::suspend(worker).ok();
                    kernel::spin_delay(3 * SECOND);
                    kernel::resume(worker).ok();
                }
            }
            kernel::delay(SECOND / 2);
            iteration = iteration.wrapping_add(1);
        }
    }

    /// Relative-delay task. Each cycle delays one second *after* its
    /// work, so the observed period is a second plus the work — the
    /// drift is the demonstration.
    extern "C" fn drift_task() -> ! {
        let mut samples: u32 = 0;
        loop {
            for _ in 0..5000 {
                samples = samples.wrapping_add(1);
            }
            kernel::delay(SECOND);
        }
    }

    /// Periodic task. Same work as `drift_task`, but anchored to an
    /// absolute wake grid — it fires at 1 s, 2 s, 3 s … regardless of
    /// how long each cycle's work takes.
    extern "C" fn periodic_task() -> ! {
        let mut samples: u32 = 0;
        let mut last_wake = kernel::now();
        loop {
            for _ in 0..5000 {
                samples = samples.wrapping_add(1);
            }
            last_wake = kernel::delay_until(last_wake, SECOND);
        }
    }

    /// Short-lived task: five heartbeats, then self-deletion. Its stack
    /// returns to the arena at the switch away.
    extern "C" fn transient_task() -> ! {
        for _ in 0..5 {
            kernel::delay(SECOND);
        }
        kernel::exit_current()
    }

    // -----------------------------------------------------------------------
    // Entry point
    // -----------------------------------------------------------------------

    #[entry]
    fn main() -> ! {
        let cp = cortex_m::Peripherals::take().unwrap();

        kernel::init().expect("Failed to initialize kernel");

        let worker = kernel::create_task(
            worker_task,
            TaskConfig {
                priority: 1,
                stack_size: 1024,
                affinity: CoreAffinity::Pinned(0),
                time_slice: 10,
            },
        )
        .expect("Failed to create worker_task");
        critical_section::with(|cs| WORKER.borrow(cs).set(Some(worker)));

        kernel::create_task(
            supervisor_task,
            TaskConfig {
                priority: 3,
                stack_size: 1024,
                affinity: CoreAffinity::Pinned(0),
                time_slice: 10,
            },
        )
        .expect("Failed to create supervisor_task");

        kernel::create_task(
            drift_task,
            TaskConfig {
                priority: 2,
                stack_size: 1024,
                affinity: CoreAffinity::Any,
                time_slice: 10,
            },
        )
        .expect("Failed to create drift_task");

        kernel::create_task(
            periodic_task,
            TaskConfig {
                priority: 2,
                stack_size: 1024,
                affinity: CoreAffinity::Any,
                time_slice: 10,
            },
        )
        .expect("Failed to create periodic_task");

        kernel::create_task(
            transient_task,
            TaskConfig {
                priority: 2,
                stack_size: 1024,
                affinity: CoreAffinity::Pinned(0),
                time_slice: 5,
            },
        )
        .expect("Failed to create transient_task");

        // Start the scheduler — does not return
        kernel::start(cp)
    }
}

// Host builds get a stub so the binary target compiles alongside the
// unit-testable library.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() {}
