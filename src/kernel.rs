//! # Kernel
//!
//! Top-level kernel initialization and the public API surface. Every
//! function here wraps its scheduler-mutating work in a single
//! [`sync::critical_section`] call, mirroring the one-critical-section-
//! per-facade-call convention the whole API is built on; any call that
//! leaves the scheduler needing a reschedule follows up with
//! `cortex_m4::trigger_pendsv()` *outside* that critical section, since
//! PendSV only actually preempts once interrupts are re-enabled.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()        ← Configure the arena-backed scheduler
//!         ├─► kernel::add_task()    ← Register tasks (×N)
//!         └─► kernel::start()       ← Launch the scheduler (no return)
//!               ├─► Paint the idle context's stack
//!               ├─► Configure SysTick, set interrupt priorities
//!               └─► jump_to_os() into the idle context (or first task)
//! ```

use crate::arch::cortex_m4::{self, CortexM4, KernelScheduler};
use crate::config::{IDLE_STACK_BYTES, TICKS_PER_SECOND};
use crate::error::Error;
use crate::scheduler::MutexHandle;
use crate::sync;
use crate::task::TaskHandle;

// ---------------------------------------------------------------------------
// Global scheduler instance
// ---------------------------------------------------------------------------

/// Global scheduler instance.
///
/// # Safety
/// Accessed via `SCHEDULER_PTR`, set once by `init()`. All access is
/// either through a critical section or from ISR context, where the
/// lowest-priority PendSV/SysTick handlers are themselves serialized
/// against each other and against the one thread of task execution.
static mut SCHEDULER: KernelScheduler = KernelScheduler::new();

/// Raw pointer to the global scheduler, used by the port layer's naked
/// exception handlers, which cannot reach a `static mut` through a safe
/// reference from assembly-adjacent code.
#[no_mangle]
pub static mut SCHEDULER_PTR: *mut KernelScheduler = core::ptr::null_mut();

/// Backing storage for the idle context's stack — the remainder of
/// [`crate::config::AVAILABLE_RAM`] left over after the arena.
static mut IDLE_STACK: [u8; IDLE_STACK_BYTES] = [0u8; IDLE_STACK_BYTES];

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the kernel. Must be called before any other kernel
/// function, exactly once, from the main thread.
pub fn init() {
    unsafe {
        SCHEDULER = KernelScheduler::new();
        SCHEDULER_PTR = &mut SCHEDULER as *mut KernelScheduler;
        (*SCHEDULER_PTR).init();
    }
}

/// Create a new task.
///
/// `entry` must be a function that never returns. `stack_size` is
/// rounded up to the port's minimum if given a smaller value. Fails with
/// [`Error::OutOfMemory`] if the arena has no block large enough.
pub fn add_task(entry: extern "C" fn() -> !, stack_size: usize) -> Result<TaskHandle, Error> {
    sync::critical_section(|_cs| unsafe { (*SCHEDULER_PTR).add_task(entry, stack_size) })
}

/// Remove a task, freeing its arena allocation.
///
/// Fails with [`Error::RemoveCurrentTask`] if `handle` names the task
/// that is currently calling this function — a task cannot free its own
/// stack out from under itself; it should `suspend()` instead.
pub fn remove_task(handle: TaskHandle) -> Result<(), Error> {
    sync::critical_section(|_cs| unsafe { (*SCHEDULER_PTR).remove_task(handle) })
}

/// Start the kernel. **Does not return.**
///
/// Paints the idle context's stack, configures the SysTick timer, sets
/// interrupt priorities, and launches into whichever context the
/// scheduler currently resolves to — a task if one was already added, or
/// the idle loop otherwise.
///
/// # Safety
/// - `init()` must have been called first.
/// - Must be called from the main thread, not from an ISR.
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    let entry_sp = sync::critical_section(|_cs| unsafe {
        let idle_base = IDLE_STACK.as_mut_ptr();
        let idle_sp = CortexM4::init_stack(idle_base, IDLE_STACK_BYTES, cortex_m4::idle_entry);
        (*SCHEDULER_PTR).set_idle_stack_pointer(idle_sp);
        (*SCHEDULER_PTR).switch_context()
    });

    cortex_m4::configure_systick(&mut core_peripherals.SYST);
    cortex_m4::set_interrupt_priorities();

    unsafe { cortex_m4::jump_to_os(entry_sp) }
}

/// Voluntarily give up the remainder of the current task's time slice.
pub fn yield_now() {
    sync::critical_section(|_cs| unsafe { (*SCHEDULER_PTR).yield_now() });
    cortex_m4::trigger_pendsv();
}

/// Put the calling task to sleep for approximately `ms` milliseconds.
/// Rounds down to the nearest tick; `0` degrades to a plain `yield_now`.
pub fn sleep(ms: u32) {
    let ticks = ms * TICKS_PER_SECOND / 1000;
    sync::critical_section(|_cs| unsafe { (*SCHEDULER_PTR).sleep_current(ticks) });
    cortex_m4::trigger_pendsv();
}

/// Suspend the calling task indefinitely. Only a `signal()` on its
/// handle (from another task) makes it runnable again.
pub fn suspend() {
    sync::critical_section(|_cs| unsafe { (*SCHEDULER_PTR).suspend_current() });
    cortex_m4::trigger_pendsv();
}

/// Wake a task parked by `suspend()`. A no-op if the task is not
/// currently suspended.
pub fn signal(handle: TaskHandle) -> Result<(), Error> {
    sync::critical_section(|_cs| unsafe { (*SCHEDULER_PTR).signal(handle) })
}

/// Create a new mutex.
pub fn create_mutex() -> Result<MutexHandle, Error> {
    sync::critical_section(|_cs| unsafe { (*SCHEDULER_PTR).create_mutex() })
}

/// Lock a mutex, blocking the calling task if it is already held.
///
/// An uncontended lock returns without suspending the caller (spec §5:
/// this is not one of the documented suspension points), so PendSV is only
/// pended when the scheduler actually parked the caller on the mutex's
/// waiter list — otherwise `PendSV`/`do_context_switch` would rotate the
/// run queue unconditionally on a call that was supposed to run to
/// completion.
///
/// # Safety of the precondition
/// Calling this with no task currently running (e.g. from the idle loop
/// or before any task has been created) halts the system — there is no
/// context to resume once the lock becomes available.
pub fn lock_mutex(handle: MutexHandle) -> Result<(), Error> {
    let (result, needs_reschedule) = sync::critical_section(|_cs| unsafe {
        let result = (*SCHEDULER_PTR).lock_mutex(handle);
        (result, (*SCHEDULER_PTR).needs_reschedule())
    });
    if needs_reschedule {
        cortex_m4::trigger_pendsv();
    }
    result
}

/// Unlock a mutex, handing it directly to the next waiter if one is
/// parked on it.
pub fn unlock_mutex(handle: MutexHandle) -> Result<(), Error> {
    sync::critical_section(|_cs| unsafe { (*SCHEDULER_PTR).unlock_mutex(handle) })
}

/// Destroy a mutex. Silently does nothing if it is currently locked.
pub fn destroy_mutex(handle: MutexHandle) -> Result<(), Error> {
    sync::critical_section(|_cs| unsafe { (*SCHEDULER_PTR).destroy_mutex(handle) })
}
