//! # Kernel Errors
//!
//! A small, fixed taxonomy matching the failure modes the core can
//! actually produce. The core never panics or unwinds on these — every
//! failure is a `Result::Err`, a silent no-op (documented at the call
//! site), or — for the one true programmer-error precondition — a halt.

/// Errors returned by the kernel facade and scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The arena has no free block large enough to satisfy the request.
    OutOfMemory,
    /// The handle does not refer to a live task/mutex — it was already
    /// removed/destroyed, or never existed.
    InvalidHandle,
    /// `remove_task` was called with a handle equal to the currently
    /// running task. Not supported — a task that wants to exit must park
    /// itself (e.g. suspend forever) rather than free its own stack out
    /// from under itself.
    RemoveCurrentTask,
}
