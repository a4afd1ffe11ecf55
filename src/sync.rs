//! # Synchronization Primitives
//!
//! The scheduler lock. All shared scheduler state is mutated inside a
//! critical section, held for the shortest possible span and never
//! across a context switch — switches are only pended from inside and
//! taken after the section closes.
//!
//! On the Cortex-M4 target the implementation comes from `cortex-m`'s
//! `critical-section-single-core` feature (interrupts masked); host
//! test builds get the std implementation from the `critical-section`
//! dev-dependency.

use critical_section::CriticalSection;

/// Execute a closure within a critical section.
///
/// # Performance
/// Keep critical sections as short as possible to minimize interrupt
/// latency. The Cortex-M4's interrupt tail-chaining makes short
/// critical sections relatively inexpensive.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}
