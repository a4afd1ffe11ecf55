//! # Error Taxonomy
//!
//! The kernel has exactly two reportable error conditions. Everything
//! else — suspending an already-suspended task, resuming a task that was
//! never suspended — is a defined, silent, idempotent outcome rather
//! than an error.

/// Errors reported synchronously to the caller. The kernel never
/// retries on the caller's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Task creation failed: no free TCB slot, or the stack arena could
    /// not satisfy the requested stack size. Shared scheduler state is
    /// left untouched.
    OutOfMemory,
    /// The operation targeted a handle that was never valid, refers to a
    /// deleted task, or outlived the task's slot (stale generation).
    InvalidHandle,
}
