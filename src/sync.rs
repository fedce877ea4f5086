//! # Synchronization Primitives
//!
//! Interrupt-safe critical section abstractions for the Cortex-M4.
//! All shared scheduler and arena state must be accessed within a critical
//! section to prevent data races between task context, the kernel facade,
//! and the SysTick/PendSV handlers.

use cortex_m::interrupt;

/// Execute a closure within a critical section (interrupts disabled).
///
/// This is the sole mechanism for safely accessing shared mutable kernel
/// state. Interrupts are disabled on entry and restored on exit, ensuring
/// atomicity of the enclosed operation. Critical sections are not
/// reentrant and must never be entered from user task code directly —
/// only the kernel facade in [`crate::kernel`] opens one per call.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|_cs| {
///     // Access shared state safely
/// });
/// ```
///
/// # Performance
/// Keep critical sections as short as possible to minimize interrupt latency.
/// The Cortex-M4's interrupt tail-chaining makes short critical sections
/// relatively inexpensive.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&interrupt::CriticalSection) -> R,
{
    interrupt::free(f)
}
