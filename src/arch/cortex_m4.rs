//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Implements context switching via PendSV, SysTick timer configuration,
//! and interrupt management. Everything the scheduler itself needs from a
//! port is captured by [`crate::arch::ContextSwitch`], implemented here by
//! [`CortexM4`]; the PendSV/SysTick handlers below reach the scheduler
//! through the raw [`crate::kernel::SCHEDULER_PTR`] set up by `kernel::init`,
//! since a naked exception handler cannot call through a vtable.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): Used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): Used by tasks in Thread mode
//!
//! On exception entry, the hardware automatically stacks R0–R3, R12, LR, PC,
//! and xPSR onto the process stack. The PendSV handler manually saves and
//! restores R4–R11, which completes the full context save/restore.
//!
//! ## Interrupt Priorities
//!
//! - SysTick: Priority 0xFF (lowest) — can be preempted
//! - PendSV: Priority 0xFF (lowest) — runs only when no other ISR is active
//!
//! Both are set to the lowest priority to ensure that PendSV doesn't
//! preempt other interrupt handlers, maintaining real-time guarantees.

use core::arch::asm;

use cortex_m::peripheral::syst::SystClkSource;

use crate::arch::ContextSwitch;
use crate::config::{SYSTEM_CLOCK_HZ, TICKS_PER_SECOND};
use crate::scheduler::Scheduler;

/// The Cortex-M4 [`ContextSwitch`] implementation.
pub struct CortexM4;

impl ContextSwitch for CortexM4 {
    unsafe fn init_stack(
        stack_base: *mut u8,
        stack_size: usize,
        entry: extern "C" fn() -> !,
    ) -> *mut u32 {
        init_stack_frame(stack_base, stack_size, entry as u32)
    }

    fn min_stack_size() -> usize {
        // 16 registers (8 hardware-stacked + 8 software-saved) plus a
        // small amount of headroom for the task's own call depth before
        // it yields for the first time.
        16 * 4 + 64
    }

    fn halt() -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }
}

/// The concrete scheduler type instantiated by this port.
pub type KernelScheduler = Scheduler<CortexM4>;

// ---------------------------------------------------------------------------
// Stack frame construction
// ---------------------------------------------------------------------------

/// Paint a fake exception frame at the top of a task's stack so that the
/// first "return" from PendSV (or, for the very first task, the
/// hand-rolled launch in `jump_to_os`) starts executing `entry`.
///
/// ## Stack Layout (top = high address, growing down)
///
/// ```text
/// [Hardware stacked frame]   <- initial PSP points here
///   xPSR  (Thumb bit set)
///   PC    (task entry point)
///   LR    (task_exit)
///   R12   (0)
///   R3    (0)
///   R2    (0)
///   R1    (0)
///   R0    (0)
/// [Software saved context]
///   R11   (0)
///   R10   (0)
///   R9    (0)
///   R8    (0)
///   R7    (0)
///   R6    (0)
///   R5    (0)
///   R4    (0)              <- stack pointer after init
/// ```
unsafe fn init_stack_frame(stack_base: *mut u8, stack_size: usize, entry: u32) -> *mut u32 {
    let stack_top = stack_base as usize + stack_size;
    let aligned_top = stack_top & !0x07;

    // 16 registers, 4 bytes each.
    let frame_ptr = (aligned_top - 16 * 4) as *mut u32;

    for i in 0..8 {
        *frame_ptr.add(i) = 0; // R4..R11
    }
    *frame_ptr.add(8) = 0; // R0
    *frame_ptr.add(9) = 0; // R1
    *frame_ptr.add(10) = 0; // R2
    *frame_ptr.add(11) = 0; // R3
    *frame_ptr.add(12) = 0; // R12
    *frame_ptr.add(13) = task_exit as u32; // LR — return address if the task returns
    *frame_ptr.add(14) = entry; // PC — task entry point
    *frame_ptr.add(15) = 0x0100_0000; // xPSR — Thumb bit set

    frame_ptr
}

/// Fallback for tasks whose entry function returns (entry points are
/// `extern "C" fn() -> !`, so this should be unreachable). Halts rather
/// than falling off into undefined memory.
extern "C" fn task_exit() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer for the scheduler tick.
///
/// Sets up SysTick to fire at [`TICKS_PER_SECOND`] using the processor
/// clock. Each tick triggers `SysTick` which calls `Scheduler::tick()`.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICKS_PER_SECOND - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// PendSV trigger
// ---------------------------------------------------------------------------

/// Trigger a PendSV exception to perform a context switch.
///
/// PendSV is the standard Cortex-M mechanism for deferred context
/// switching: it fires at the lowest priority, so it only runs once no
/// other ISR is active and interrupts have been re-enabled. Every kernel
/// operation that mutates scheduler state and needs a reschedule calls
/// this exactly once, after leaving its critical section.
#[inline]
pub fn trigger_pendsv() {
    // ICSR address: 0xE000_ED04, PENDSVSET = bit 28
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Set PendSV and SysTick to the lowest interrupt priority.
///
/// This ensures context switches (PendSV) never preempt application-level
/// ISRs, and SysTick doesn't interfere with higher-priority interrupts.
/// Both use priority 0xFF (lowest on Cortex-M4 with 4 priority bits = 0xF0).
pub fn set_interrupt_priorities() {
    unsafe {
        // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
        // Bits [23:16] = PendSV priority
        // Bits [31:24] = SysTick priority
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3);
        let val = val | (0xFF << 16) | (0xFF << 24);
        core::ptr::write_volatile(shpr3, val);
    }
}

// ---------------------------------------------------------------------------
// Boot into the idle context
// ---------------------------------------------------------------------------

/// Switch to PSP and branch into the idle context. Called once from
/// `kernel::start()` and never returns — from this point on, control only
/// ever returns to `main` through a reset.
///
/// There is no separate idle task function: the idle stack frame is
/// painted with the same `init_stack_frame` used for ordinary tasks,
/// entry set to a trivial `wfi` loop, so `current == None` in the
/// scheduler always resolves to a valid, already-initialized context here.
///
/// # Safety
/// Must only be called once, with the stack pointer `kernel::start`
/// painted for the idle context.
pub unsafe fn jump_to_os(psp: *const u32) -> ! {
    asm!(
        // Skip the 8 software-saved registers; PSP should point at the
        // hardware-stacked frame before the exception-return-style pop.
        "adds r0, #32",
        "msr psp, r0",

        // Use PSP in Thread mode (CONTROL.SPSEL = 1).
        "movs r0, #2",
        "msr control, r0",
        "isb",

        "pop {{r0-r3, r12}}",
        "pop {{r4}}",  // LR, discarded — idle loop never returns
        "pop {{r5}}",  // PC — idle entry point
        "pop {{r6}}",  // xPSR, discarded — set by the processor

        "cpsie i",
        "bx r5",

        in("r0") psp,
        options(noreturn)
    );
}

/// The idle loop's entry point: wait-for-interrupt forever. SysTick and
/// any other enabled interrupt will still fire and run to completion;
/// PendSV preempts this loop the moment a task becomes runnable.
pub extern "C" fn idle_entry() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler — performs the actual context switch.
///
/// ## Sequence
/// 1. Save R4–R11 onto the current context's stack (PSP)
/// 2. Store the updated PSP into the scheduler (current task, or idle)
/// 3. Call the scheduler to select the next context
/// 4. Load the next context's PSP
/// 5. Restore R4–R11 from the new context's stack
/// 6. Return from exception (hardware restores R0–R3, R12, LR, PC, xPSR)
///
/// # Safety
/// This is a naked function called directly by the NVIC. It must follow
/// the exact Cortex-M4 exception entry/exit convention.
#[no_mangle]
#[naked]
pub unsafe extern "C" fn PendSV() {
    asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",

        "bl {save_context}", // save_context(r0: *mut u32)
        "bl {do_schedule}",  // returns new PSP in r0

        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",

        "ldr r0, =0xFFFFFFFD",
        "bx r0",

        save_context = sym save_current_context,
        do_schedule = sym do_context_switch,
        options(noreturn)
    );
}

/// Save the outgoing context's stack pointer. Called from `PendSV`.
///
/// # Safety
/// Called from assembly context with interrupts disabled, after
/// `kernel::init` has set `SCHEDULER_PTR`.
#[no_mangle]
unsafe extern "C" fn save_current_context(psp: *mut u32) {
    (*crate::kernel::SCHEDULER_PTR).save_stack_pointer(psp);
}

/// Perform the scheduling decision and return the new context's PSP.
/// Called from `PendSV`.
///
/// # Safety
/// Called from assembly context, after `kernel::init` has set
/// `SCHEDULER_PTR`.
#[no_mangle]
unsafe extern "C" fn do_context_switch() -> *mut u32 {
    (*crate::kernel::SCHEDULER_PTR).switch_context()
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler — scheduler tick entry point.
///
/// Called at [`TICKS_PER_SECOND`] frequency. Advances sleeping tasks and
/// the current task's time slice, then triggers PendSV if a context
/// switch is needed.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    let scheduler = &mut *crate::kernel::SCHEDULER_PTR;
    scheduler.tick();

    if scheduler.needs_reschedule() {
        trigger_pendsv();
    }
}
