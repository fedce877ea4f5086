//! # Task Control Block
//!
//! Defines the task model: the per-task state the scheduler threads through
//! its run queue, wait list, and mutex waiter lists, plus the opaque
//! [`TaskHandle`] users hold instead of a raw pointer.
//!
//! Every task's TCB and stack are carved out of the kernel arena together as
//! one allocation — there is no static task table and no fixed task limit;
//! the arena's free space is the only limit.

use core::ptr::NonNull;

use crate::config::ARENA_ALIGN;

// ---------------------------------------------------------------------------
// Delay state
// ---------------------------------------------------------------------------

/// Replaces a sentinel value in a plain tick counter (e.g. "delay == -1
/// means suspended forever") with a type that can't represent an invalid
/// state. A task is in exactly one of these at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayState {
    /// No delay in effect; eligible to run when scheduled.
    Runnable,
    /// Sleeping; decremented once per tick, transitions to `Runnable` when
    /// it reaches zero.
    SleepingFor(u32),
    /// Suspended indefinitely. Only a `signal()` on this task's handle
    /// clears it back to `Runnable`; ticks do not touch it.
    SuspendedForever,
}

// ---------------------------------------------------------------------------
// Scheduling state
// ---------------------------------------------------------------------------

/// Which list a task currently lives on, orthogonal to `DelayState`.
///
/// A task is `Ready` or `Running` while its `DelayState` is `Runnable`; it
/// moves to `Waiting` the moment its `DelayState` becomes `SleepingFor` or
/// `SuspendedForever`, and to `BlockedOnMutex` while parked on a mutex's
/// waiter list. Exactly one of the scheduler's lists (running, waiting, or
/// a given mutex's waiters) owns a task's link fields at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Waiting,
    BlockedOnMutex,
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB).
///
/// Allocated from the kernel arena alongside its stack; never moved once
/// allocated (the scheduler and the port layer hold raw pointers to it, and
/// `stack_pointer` is read/written directly by the PendSV handler).
pub struct TaskControlBlock {
    /// Bumped every time this slot is reused by a new task, so a stale
    /// [`TaskHandle`] from a freed task can be detected rather than
    /// silently operating on whatever now occupies the memory.
    pub generation: u32,

    pub state: TaskState,
    pub delay: DelayState,

    /// Saved stack pointer. Valid only while this task is not `Running`;
    /// the PendSV handler reads/writes it directly on every switch.
    pub stack_pointer: *mut u32,

    /// Base address and length of this task's stack allocation, kept
    /// alongside the live `stack_pointer` so `stack-paint` tooling can scan
    /// from the low end forward to find the high-water mark.
    pub stack_base: *mut u8,
    pub stack_size: usize,

    /// Intrusive doubly-linked list pointers. Whichever list currently owns
    /// this task (the scheduler's running list, its waiting list, or a
    /// mutex's waiter list) threads through these — never more than one at
    /// once, so a single pair of links suffices.
    pub prev: Option<NonNull<TaskControlBlock>>,
    pub next: Option<NonNull<TaskControlBlock>>,

    /// The mutex this task is parked on, set only while `state ==
    /// BlockedOnMutex`. Type-erased to `()` to avoid a dependency cycle
    /// with `scheduler`, which casts it back to `*mut MutexObject` when it
    /// needs to unlink a task from the mutex's waiter list (e.g. on
    /// `remove_task`).
    pub waiting_mutex: Option<NonNull<()>>,
}

// Safety: TaskControlBlock is only ever reached through the arena, itself
// only touched from within a critical section; stack_pointer/stack_base
// always point into this task's own arena allocation.
unsafe impl Send for TaskControlBlock {}
unsafe impl Sync for TaskControlBlock {}

impl TaskControlBlock {
    /// Initialize a freshly arena-allocated TCB in place. `stack_pointer`
    /// must already have been set up by the port layer's `init_stack`
    /// before this task is ever switched to.
    pub fn init(
        &mut self,
        generation: u32,
        stack_pointer: *mut u32,
        stack_base: *mut u8,
        stack_size: usize,
    ) {
        self.generation = generation;
        self.state = TaskState::Ready;
        self.delay = DelayState::Runnable;
        self.stack_pointer = stack_pointer;
        self.stack_base = stack_base;
        self.stack_size = stack_size;
        self.prev = None;
        self.next = None;
        self.waiting_mutex = None;
    }

    #[inline]
    pub fn is_runnable(&self) -> bool {
        matches!(self.delay, DelayState::Runnable)
    }

    /// Paint the unused portion of this task's stack with a sentinel byte.
    /// Called once, right after `init_stack`, before the task ever runs.
    #[cfg(feature = "stack-paint")]
    pub fn paint_stack(&mut self) {
        use crate::config::STACK_PAINT_BYTE;
        let used_from = self.stack_pointer as *mut u8;
        let mut p = self.stack_base;
        while (p as usize) < used_from as usize {
            unsafe {
                p.write(STACK_PAINT_BYTE);
                p = p.add(1);
            }
        }
    }

    /// Count untouched bytes from the low end of this task's stack: scans
    /// forward from `stack_base` while bytes still carry the paint
    /// sentinel, stopping at the first byte a task has actually written.
    /// Requires `stack-paint`, since without it the region was never
    /// painted and every byte is indistinguishable from "touched".
    #[cfg(feature = "stack-paint")]
    pub fn high_water_mark(&self) -> usize {
        use crate::config::STACK_PAINT_BYTE;
        let mut untouched = 0usize;
        let mut p = self.stack_base;
        while untouched < self.stack_size {
            if unsafe { p.read() } != STACK_PAINT_BYTE {
                break;
            }
            untouched += 1;
            unsafe { p = p.add(1) };
        }
        self.stack_size - untouched
    }
}

/// The TCB's own footprint within a task's combined arena allocation,
/// rounded up to `ARENA_ALIGN` so the stack region that follows it starts
/// aligned.
pub const fn tcb_region_size() -> usize {
    (core::mem::size_of::<TaskControlBlock>() + ARENA_ALIGN - 1) & !(ARENA_ALIGN - 1)
}

/// Total arena bytes a task of the given stack size needs: the TCB itself
/// plus the stack, both rounded up so the arena's own per-block alignment
/// holds for whatever follows.
pub const fn allocation_size(stack_size: usize) -> usize {
    let stack = (stack_size + ARENA_ALIGN - 1) & !(ARENA_ALIGN - 1);
    tcb_region_size() + stack
}

// ---------------------------------------------------------------------------
// Opaque task handle
// ---------------------------------------------------------------------------

/// An opaque, copyable token identifying a task.
///
/// Carries a generation counter alongside the raw pointer so that reusing a
/// freed task's arena slot for a new task is detectable: a handle minted
/// before the free no longer resolves once the slot's generation has moved
/// on, instead of silently acting on an unrelated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    pub(crate) ptr: NonNull<TaskControlBlock>,
    pub(crate) generation: u32,
}

impl TaskHandle {
    pub(crate) fn new(ptr: NonNull<TaskControlBlock>, generation: u32) -> Self {
        Self { ptr, generation }
    }

    /// Resolve to a live `TaskControlBlock`, or `None` if the handle is
    /// stale (its slot has since been freed and reused, or freed and not
    /// yet reused).
    ///
    /// # Safety
    /// Caller must hold the critical section that serializes all TCB
    /// access.
    pub(crate) unsafe fn resolve(&self) -> Option<NonNull<TaskControlBlock>> {
        if self.ptr.as_ref().generation == self.generation {
            Some(self.ptr)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tcb() -> TaskControlBlock {
        TaskControlBlock {
            generation: 0,
            state: TaskState::Ready,
            delay: DelayState::Runnable,
            stack_pointer: core::ptr::null_mut(),
            stack_base: core::ptr::null_mut(),
            stack_size: 0,
            prev: None,
            next: None,
            waiting_mutex: None,
        }
    }

    #[test]
    fn init_resets_to_runnable_ready() {
        let mut tcb = make_tcb();
        tcb.delay = DelayState::SuspendedForever;
        tcb.state = TaskState::BlockedOnMutex;
        let sp = 0x2000_1000 as *mut u32;
        let base = 0x2000_0000 as *mut u8;
        tcb.init(7, sp, base, 256);

        assert_eq!(tcb.generation, 7);
        assert_eq!(tcb.state, TaskState::Ready);
        assert_eq!(tcb.delay, DelayState::Runnable);
        assert!(tcb.is_runnable());
        assert_eq!(tcb.stack_pointer, sp);
        assert_eq!(tcb.stack_base, base);
        assert_eq!(tcb.stack_size, 256);
        assert!(tcb.prev.is_none());
        assert!(tcb.next.is_none());
    }

    #[test]
    fn is_runnable_false_while_sleeping_or_suspended() {
        let mut tcb = make_tcb();
        tcb.delay = DelayState::SleepingFor(5);
        assert!(!tcb.is_runnable());
        tcb.delay = DelayState::SuspendedForever;
        assert!(!tcb.is_runnable());
        tcb.delay = DelayState::Runnable;
        assert!(tcb.is_runnable());
    }

    #[test]
    fn handle_resolves_only_against_matching_generation() {
        let mut tcb = make_tcb();
        tcb.init(1, core::ptr::null_mut(), core::ptr::null_mut(), 0);
        let ptr = NonNull::from(&mut tcb);
        let handle = TaskHandle::new(ptr, 1);

        unsafe {
            assert!(handle.resolve().is_some());
        }

        // Simulate the slot being freed and reused by a new task.
        tcb.init(2, core::ptr::null_mut(), core::ptr::null_mut(), 0);
        unsafe {
            assert!(handle.resolve().is_none());
        }
    }

    #[test]
    fn allocation_size_covers_tcb_and_rounded_stack() {
        let size = allocation_size(100);
        assert!(size >= core::mem::size_of::<TaskControlBlock>() + 100);
        assert_eq!(size % ARENA_ALIGN, 0);
    }

    #[cfg(feature = "stack-paint")]
    #[test]
    fn high_water_mark_reports_untouched_bytes_after_paint() {
        let mut stack = [0u8; 64];
        let mut tcb = make_tcb();
        // sp sits 16 bytes below the top: that much is "used" by the
        // initial frame, the rest should paint over as untouched.
        let base = stack.as_mut_ptr();
        let sp = unsafe { base.add(48) } as *mut u32;
        tcb.init(1, sp, base, 64);
        tcb.paint_stack();

        assert_eq!(tcb.high_water_mark(), 16);

        // Simulate the task having actually written into the stack a
        // little further down than its initial frame.
        unsafe { base.add(20).write(0x42) };
        assert_eq!(tcb.high_water_mark(), 64 - 20);
    }
}
