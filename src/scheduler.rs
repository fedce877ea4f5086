//! # Scheduler
//!
//! The preemptive round-robin core: a run queue, a wait list for sleeping
//! and suspended tasks, and mutexes with FIFO wait queues, all carved out
//! of one arena and threaded together with intrusive doubly-linked lists.
//!
//! ## Scheduling Algorithm
//!
//! At each SysTick tick:
//! 1. Every sleeping task's remaining delay is decremented; any that hits
//!    zero moves from the wait list back onto the run queue.
//! 2. The running task's time-slice counter is decremented; if it hits
//!    zero, a reschedule is requested.
//!
//! A reschedule (`switch_context`) requeues the outgoing task at the tail
//! of the run queue (unless some other operation has already moved it
//! elsewhere — sleeping, suspended, or blocked on a mutex) and dequeues
//! the new head. There is no separate idle task: when the run queue is
//! empty, `current` is simply `None` and the port layer resumes the
//! pre-painted idle stack instead.
//!
//! ## Mutexes
//!
//! A mutex lock either succeeds immediately or parks the calling task on
//! the mutex's own FIFO waiter list and requests a reschedule. Unlock
//! hands the mutex directly to the next waiter (if any) without forcing
//! an immediate reschedule — the newly runnable waiter is picked up by
//! the ordinary round-robin rotation.

use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr::NonNull;

use crate::arch::ContextSwitch;
use crate::arena::KernelArena;
use crate::config::TIME_SLICE_TICKS;
use crate::error::Error;
use crate::task::{self, DelayState, TaskControlBlock, TaskHandle, TaskState};

// ---------------------------------------------------------------------------
// Intrusive task list
// ---------------------------------------------------------------------------

/// A FIFO doubly-linked list of tasks, threaded through each
/// `TaskControlBlock`'s own `prev`/`next` fields. A task belongs to at
/// most one list at a time (the run queue, the wait list, or a single
/// mutex's waiter list), so one pair of link fields suffices for all of
/// them.
pub(crate) struct TaskList {
    head: Option<NonNull<TaskControlBlock>>,
    tail: Option<NonNull<TaskControlBlock>>,
}

impl TaskList {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// # Safety
    /// `node` must not already belong to this or any other list.
    pub(crate) unsafe fn push_back(&mut self, mut node: NonNull<TaskControlBlock>) {
        node.as_mut().prev = self.tail;
        node.as_mut().next = None;
        match self.tail {
            Some(mut tail) => tail.as_mut().next = Some(node),
            None => self.head = Some(node),
        }
        self.tail = Some(node);
    }

    /// # Safety
    /// `node` must not already belong to this or any other list.
    pub(crate) unsafe fn push_front(&mut self, mut node: NonNull<TaskControlBlock>) {
        node.as_mut().next = self.head;
        node.as_mut().prev = None;
        match self.head {
            Some(mut head) => head.as_mut().prev = Some(node),
            None => self.tail = Some(node),
        }
        self.head = Some(node);
    }

    /// # Safety
    /// The list must be non-empty.
    pub(crate) unsafe fn pop_front(&mut self) -> Option<NonNull<TaskControlBlock>> {
        let mut head = self.head?;
        self.head = head.as_mut().next;
        match self.head {
            Some(mut new_head) => new_head.as_mut().prev = None,
            None => self.tail = None,
        }
        head.as_mut().prev = None;
        head.as_mut().next = None;
        Some(head)
    }

    /// Unlink an arbitrary node from this list.
    ///
    /// # Safety
    /// `node` must currently belong to this list.
    pub(crate) unsafe fn remove(&mut self, mut node: NonNull<TaskControlBlock>) {
        let prev = node.as_ref().prev;
        let next = node.as_ref().next;

        match prev {
            Some(mut p) => p.as_mut().next = next,
            None => self.head = next,
        }
        match next {
            Some(mut n) => n.as_mut().prev = prev,
            None => self.tail = prev,
        }

        node.as_mut().prev = None;
        node.as_mut().next = None;
    }
}

// ---------------------------------------------------------------------------
// Mutex
// ---------------------------------------------------------------------------

/// A mutex, arena-allocated alongside tasks. Never moved once allocated —
/// `TaskControlBlock::waiting_mutex` holds a raw pointer into it while a
/// task is parked on its waiter list.
pub struct MutexObject {
    generation: u32,
    locked: bool,
    owner: Option<NonNull<TaskControlBlock>>,
    waiters: TaskList,
}

/// An opaque, copyable handle to a mutex, generation-guarded the same way
/// [`TaskHandle`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexHandle {
    ptr: NonNull<MutexObject>,
    generation: u32,
}

impl MutexHandle {
    /// # Safety
    /// Caller must hold the critical section that serializes all mutex
    /// access.
    unsafe fn resolve(&self) -> Option<NonNull<MutexObject>> {
        if self.ptr.as_ref().generation == self.generation {
            Some(self.ptr)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// The scheduler proper. Generic over the target port (`C`) so that every
/// method except the handful that hand out raw stack pointers for the
/// port's naked exception handlers to consume is ordinary, host-testable
/// `core` code.
pub struct Scheduler<C: ContextSwitch> {
    arena: KernelArena,
    running: TaskList,
    waiting: TaskList,
    current: Option<NonNull<TaskControlBlock>>,
    idle_sp: *mut u32,
    tick_count: u64,
    slice_ticks: u32,
    needs_reschedule: bool,
    next_generation: u32,
    _port: PhantomData<C>,
}

// Safety: every field is either Copy data or a pointer into the arena,
// which is itself only ever touched from within a critical section.
unsafe impl<C: ContextSwitch> Send for Scheduler<C> {}

impl<C: ContextSwitch> Scheduler<C> {
    pub const fn new() -> Self {
        Self {
            arena: KernelArena::new(),
            running: TaskList::new(),
            waiting: TaskList::new(),
            current: None,
            idle_sp: core::ptr::null_mut(),
            tick_count: 0,
            slice_ticks: TIME_SLICE_TICKS,
            needs_reschedule: false,
            next_generation: 0,
            _port: PhantomData,
        }
    }

    /// Prepare the arena for allocation. Must be called exactly once,
    /// before the first `add_task`/`create_mutex`.
    pub fn init(&mut self) {
        self.arena.init();
    }

    /// Record the stack pointer the port painted for the idle context.
    /// Whatever `init_stack` produced for it is resumed whenever the run
    /// queue is empty.
    pub fn set_idle_stack_pointer(&mut self, sp: *mut u32) {
        self.idle_sp = sp;
    }

    fn next_generation(&mut self) -> u32 {
        self.next_generation = self.next_generation.wrapping_add(1);
        if self.next_generation == 0 {
            self.next_generation = 1;
        }
        self.next_generation
    }

    /// Move a task onto the run queue as `Ready`/`Runnable`. If the
    /// scheduler was idling (no task currently running), this requests an
    /// immediate reschedule so the newly runnable task doesn't wait for
    /// the next tick.
    fn enqueue_running(&mut self, mut node: NonNull<TaskControlBlock>) {
        unsafe {
            node.as_mut().state = TaskState::Ready;
            node.as_mut().delay = DelayState::Runnable;
            node.as_mut().waiting_mutex = None;
            self.running.push_back(node);
        }
        if self.current.is_none() {
            self.needs_reschedule = true;
        }
    }

    // -----------------------------------------------------------------
    // Task lifecycle
    // -----------------------------------------------------------------

    /// Allocate and register a new task.
    pub fn add_task(
        &mut self,
        entry: extern "C" fn() -> !,
        stack_size: usize,
    ) -> Result<TaskHandle, Error> {
        let stack_size = stack_size.max(C::min_stack_size());
        let total = task::allocation_size(stack_size);
        let raw = self.arena.alloc(total).ok_or(Error::OutOfMemory)?;

        let tcb_ptr = raw as *mut TaskControlBlock;
        let stack_base = unsafe { raw.add(task::tcb_region_size()) };
        let rounded_stack_size = total - task::tcb_region_size();

        let sp = unsafe { C::init_stack(stack_base, rounded_stack_size, entry) };
        let generation = self.next_generation();

        unsafe {
            tcb_ptr.write(TaskControlBlock {
                generation,
                state: TaskState::Ready,
                delay: DelayState::Runnable,
                stack_pointer: sp,
                stack_base,
                stack_size: rounded_stack_size,
                prev: None,
                next: None,
                waiting_mutex: None,
            });
        }

        let node = NonNull::new(tcb_ptr).expect("arena never returns a null pointer");

        #[cfg(feature = "stack-paint")]
        unsafe {
            (*node.as_ptr()).paint_stack();
        }

        // Newly created tasks go to the head of the run queue, not the
        // tail: the most recently added task is the next one scheduled,
        // matching the original's `add_task_to_head` and the ordering
        // guarantee in the task-lifecycle contract. Subsequent rotations
        // requeue outgoing tasks at the tail as usual (`enqueue_running`).
        unsafe { self.running.push_front(node) };
        if self.current.is_none() {
            self.needs_reschedule = true;
        }

        #[cfg(feature = "defmt")]
        defmt::debug!("scheduler: add_task generation={=u32}, stack={=usize}B", generation, rounded_stack_size);

        Ok(TaskHandle::new(node, generation))
    }

    /// Remove a task and free its arena allocation.
    ///
    /// Removing the currently running task is not supported — a task that
    /// wants to exit should suspend itself forever instead.
    pub fn remove_task(&mut self, handle: TaskHandle) -> Result<(), Error> {
        let ptr = unsafe { handle.resolve() }.ok_or(Error::InvalidHandle)?;

        if self.current == Some(ptr) {
            return Err(Error::RemoveCurrentTask);
        }

        let state = unsafe { ptr.as_ref().state };
        unsafe {
            match state {
                TaskState::Ready => self.running.remove(ptr),
                TaskState::Waiting => self.waiting.remove(ptr),
                TaskState::BlockedOnMutex => {
                    let mutex_ptr = ptr
                        .as_ref()
                        .waiting_mutex
                        .expect("BlockedOnMutex task always records its mutex")
                        .cast::<MutexObject>();
                    (*mutex_ptr.as_ptr()).waiters.remove(ptr);
                }
                TaskState::Running => unreachable!("current-task case handled above"),
            }
        }

        unsafe {
            (*ptr.as_ptr()).generation = 0;
        }
        self.arena.free(ptr.as_ptr() as *mut u8);

        #[cfg(feature = "defmt")]
        defmt::debug!("scheduler: remove_task generation={=u32}", handle.generation);

        Ok(())
    }

    // -----------------------------------------------------------------
    // Tick / reschedule
    // -----------------------------------------------------------------

    /// Called once per SysTick interrupt.
    pub fn tick(&mut self) {
        self.tick_count += 1;

        let mut cursor = self.waiting.head;
        while let Some(node) = cursor {
            let next = unsafe { node.as_ref().next };

            if let DelayState::SleepingFor(remaining) = unsafe { node.as_ref().delay } {
                let remaining = remaining - 1;
                if remaining == 0 {
                    unsafe { self.waiting.remove(node) };
                    self.enqueue_running(node);
                } else {
                    unsafe { (*node.as_ptr()).delay = DelayState::SleepingFor(remaining) };
                }
            }

            cursor = next;
        }

        if self.current.is_some() {
            if self.slice_ticks > 0 {
                self.slice_ticks -= 1;
            }
            if self.slice_ticks == 0 {
                self.needs_reschedule = true;
            }
        }
    }

    pub fn needs_reschedule(&self) -> bool {
        self.needs_reschedule
    }

    /// Called from the PendSV handler (or, on the host, directly by
    /// tests) to persist the outgoing context's stack pointer.
    pub(crate) fn save_stack_pointer(&mut self, sp: *mut u32) {
        match self.current {
            Some(mut ptr) => unsafe { ptr.as_mut().stack_pointer = sp },
            None => self.idle_sp = sp,
        }
    }

    /// Called from the PendSV handler to pick the next context and return
    /// its stack pointer. Requeues the outgoing task at the tail of the
    /// run queue, unless `sleep_current`/`suspend_current`/`lock_mutex`
    /// already moved it onto the waiting list or a mutex's waiter list —
    /// those paths leave `current` pointing at the blocking task (rather
    /// than clearing it) specifically so `save_stack_pointer` still has
    /// somewhere to write the live stack pointer before this runs; once it
    /// lands here, only a task whose state is still `Running` belongs back
    /// on the run queue.
    pub(crate) fn switch_context(&mut self) -> *mut u32 {
        if let Some(prev) = self.current.take() {
            if unsafe { prev.as_ref().state } == TaskState::Running {
                self.enqueue_running(prev);
            }
        }

        self.needs_reschedule = false;

        match unsafe { self.running.pop_front() } {
            Some(mut next) => {
                unsafe { next.as_mut().state = TaskState::Running };
                self.current = Some(next);
                self.slice_ticks = TIME_SLICE_TICKS;
                #[cfg(feature = "defmt")]
                defmt::trace!("scheduler: rotate, generation={=u32}", unsafe {
                    next.as_ref().generation
                });
                unsafe { next.as_ref().stack_pointer }
            }
            None => {
                self.current = None;
                #[cfg(feature = "defmt")]
                defmt::trace!("scheduler: rotate, run queue empty, idling");
                self.idle_sp
            }
        }
    }

    /// Voluntarily give up the remainder of the current time slice.
    pub fn yield_now(&mut self) {
        self.needs_reschedule = true;
    }

    // -----------------------------------------------------------------
    // Sleep / suspend / signal
    // -----------------------------------------------------------------

    /// Put the calling (current) task to sleep for `ticks` SysTick
    /// periods. `ticks == 0` degrades to a plain `yield_now`.
    ///
    /// Deliberately leaves `self.current` pointing at the sleeping task
    /// rather than clearing it to `None`: the context hasn't actually been
    /// saved yet at this point (that happens later, from PendSV, via
    /// `save_stack_pointer`), and that save must land in the task's own
    /// `stack_pointer` field, not in `idle_sp`. `switch_context` is what
    /// finally clears `current` once the save has landed.
    pub fn sleep_current(&mut self, ticks: u32) {
        if ticks == 0 {
            self.yield_now();
            return;
        }
        if let Some(mut cur) = self.current {
            unsafe {
                cur.as_mut().state = TaskState::Waiting;
                cur.as_mut().delay = DelayState::SleepingFor(ticks);
                self.waiting.push_back(cur);
            }
            self.needs_reschedule = true;
        }
    }

    /// Suspend the calling (current) task indefinitely. Only `signal` on
    /// its handle makes it runnable again.
    ///
    /// Leaves `self.current` set, for the same reason `sleep_current` does.
    pub fn suspend_current(&mut self) {
        if let Some(mut cur) = self.current {
            unsafe {
                cur.as_mut().state = TaskState::Waiting;
                cur.as_mut().delay = DelayState::SuspendedForever;
                self.waiting.push_back(cur);
            }
            self.needs_reschedule = true;
        }
    }

    /// Wake a task parked by `suspend`. A no-op if the task is not
    /// currently suspended (e.g. it's merely sleeping, or already
    /// runnable) — `signal` only resurrects `SuspendedForever` tasks.
    pub fn signal(&mut self, handle: TaskHandle) -> Result<(), Error> {
        let ptr = unsafe { handle.resolve() }.ok_or(Error::InvalidHandle)?;

        if unsafe { ptr.as_ref().delay } != DelayState::SuspendedForever {
            return Ok(());
        }

        unsafe { self.waiting.remove(ptr) };
        self.enqueue_running(ptr);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Mutexes
    // -----------------------------------------------------------------

    pub fn create_mutex(&mut self) -> Result<MutexHandle, Error> {
        let raw = self
            .arena
            .alloc(size_of::<MutexObject>())
            .ok_or(Error::OutOfMemory)?;
        let generation = self.next_generation();
        let mutex_ptr = raw as *mut MutexObject;
        unsafe {
            mutex_ptr.write(MutexObject {
                generation,
                locked: false,
                owner: None,
                waiters: TaskList::new(),
            });
        }
        let node = NonNull::new(mutex_ptr).expect("arena never returns a null pointer");
        Ok(MutexHandle {
            ptr: node,
            generation,
        })
    }

    /// Lock a mutex. Always returns `Ok` from the caller's perspective —
    /// if contended, the calling task is parked on the mutex's waiter
    /// list and a reschedule is requested; by the time it runs again, the
    /// mutex has already been handed to it by the owner's `unlock_mutex`.
    ///
    /// Calling this with no task currently running (i.e. from the idle
    /// context) is a precondition violation with no way to block and
    /// resume later; the kernel halts.
    pub fn lock_mutex(&mut self, handle: MutexHandle) -> Result<(), Error> {
        let Some(cur) = self.current else {
            C::halt();
        };

        let mut mutex_ptr = unsafe { handle.resolve() }.ok_or(Error::InvalidHandle)?;
        let mutex = unsafe { mutex_ptr.as_mut() };

        if !mutex.locked {
            mutex.locked = true;
            mutex.owner = Some(cur);
            return Ok(());
        }

        // `self.current` stays `Some(cur)` rather than being cleared here:
        // the context save that belongs to this task hasn't happened yet
        // (PendSV does it later, via `save_stack_pointer`), and that save
        // must land in `cur`'s own `stack_pointer` field, not `idle_sp`.
        let mut blocking = cur;
        unsafe {
            blocking.as_mut().state = TaskState::BlockedOnMutex;
            blocking.as_mut().delay = DelayState::Runnable;
            blocking.as_mut().waiting_mutex = Some(mutex_ptr.cast());
            mutex.waiters.push_back(blocking);
        }
        self.needs_reschedule = true;

        #[cfg(feature = "defmt")]
        defmt::trace!("scheduler: mutex contended, task parked on waiter list");

        Ok(())
    }

    /// Unlock a mutex. Hands it directly to the next waiter (if any)
    /// without forcing a reschedule — the waiter is picked up by the
    /// ordinary round-robin rotation.
    pub fn unlock_mutex(&mut self, handle: MutexHandle) -> Result<(), Error> {
        let mut mutex_ptr = unsafe { handle.resolve() }.ok_or(Error::InvalidHandle)?;
        let mutex = unsafe { mutex_ptr.as_mut() };

        match unsafe { mutex.waiters.pop_front() } {
            Some(next) => {
                mutex.owner = Some(next);
                self.enqueue_running(next);
                #[cfg(feature = "defmt")]
                defmt::trace!("scheduler: mutex unlock handed off to next waiter");
            }
            None => {
                mutex.locked = false;
                mutex.owner = None;
            }
        }
        Ok(())
    }

    /// Destroy a mutex. Silently does nothing if it is currently locked
    /// (and therefore may still have an owner or waiters depending on
    /// it) rather than returning an error — there is no way to report
    /// failure back through a fire-and-forget teardown call, and
    /// forcibly destroying a contended mutex would leave its waiters
    /// parked forever.
    pub fn destroy_mutex(&mut self, handle: MutexHandle) -> Result<(), Error> {
        let mutex_ptr = unsafe { handle.resolve() }.ok_or(Error::InvalidHandle)?;
        if unsafe { mutex_ptr.as_ref().locked } {
            return Ok(());
        }
        unsafe {
            (*mutex_ptr.as_ptr()).generation = 0;
        }
        self.arena.free(mutex_ptr.as_ptr() as *mut u8);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::test_double::NullContextSwitch;

    type TestScheduler = Scheduler<NullContextSwitch>;

    extern "C" fn dummy_entry() -> ! {
        loop {}
    }

    fn new_scheduler() -> TestScheduler {
        let mut s = TestScheduler::new();
        s.init();
        s.set_idle_stack_pointer(0x1000 as *mut u32);
        s
    }

    #[test]
    fn add_task_then_switch_context_selects_it() {
        let mut s = new_scheduler();
        let h = s.add_task(dummy_entry, 128).unwrap();
        assert!(!s.needs_reschedule()); // current is None only until switch_context runs

        let sp = s.switch_context();
        assert_ne!(sp, s.idle_sp);
        assert_eq!(s.current, unsafe { h.resolve() });
    }

    #[test]
    fn round_robin_rotates_through_all_tasks() {
        // add_task prepends, so the most recently added task (c) is the
        // first one scheduled; subsequent rotation is ordinary FIFO.
        let mut s = new_scheduler();
        let a = s.add_task(dummy_entry, 128).unwrap();
        let b = s.add_task(dummy_entry, 128).unwrap();
        let c = s.add_task(dummy_entry, 128).unwrap();

        s.switch_context(); // -> c
        assert_eq!(s.current, unsafe { c.resolve() });
        s.switch_context(); // -> b
        assert_eq!(s.current, unsafe { b.resolve() });
        s.switch_context(); // -> a
        assert_eq!(s.current, unsafe { a.resolve() });
        s.switch_context(); // wraps back to c
        assert_eq!(s.current, unsafe { c.resolve() });
    }

    #[test]
    fn idle_runs_when_run_queue_empty() {
        let mut s = new_scheduler();
        let sp = s.switch_context();
        assert_eq!(sp, s.idle_sp);
        assert!(s.current.is_none());
    }

    #[test]
    fn tick_expires_slice_and_requests_reschedule() {
        let mut s = new_scheduler();
        s.add_task(dummy_entry, 128).unwrap();
        s.switch_context();
        assert!(!s.needs_reschedule());

        for _ in 0..TIME_SLICE_TICKS {
            s.tick();
        }
        assert!(s.needs_reschedule());
    }

    #[test]
    fn sleep_moves_current_to_waiting_and_wakes_after_n_ticks() {
        let mut s = new_scheduler();
        let h = s.add_task(dummy_entry, 128).unwrap();
        s.switch_context();
        s.sleep_current(3);
        // current still points at the sleeping task: the port's save
        // hasn't run yet (simulated by the next switch_context call below),
        // and it must land in h's own stack_pointer, not idle_sp.
        assert_eq!(s.current, unsafe { h.resolve() });
        assert!(s.needs_reschedule());

        // idle runs while asleep
        s.switch_context();
        assert!(s.current.is_none());

        s.tick();
        s.tick();
        assert!(!s.running_contains(unsafe { h.resolve() }.unwrap()));
        s.tick(); // third tick wakes it
        assert!(s.running_contains(unsafe { h.resolve() }.unwrap()));
    }

    #[test]
    fn sleep_zero_degrades_to_yield() {
        let mut s = new_scheduler();
        s.add_task(dummy_entry, 128).unwrap();
        s.switch_context();
        s.sleep_current(0);
        assert!(s.current.is_some());
        assert!(s.needs_reschedule());
    }

    #[test]
    fn suspend_then_signal_round_trip() {
        let mut s = new_scheduler();
        let h = s.add_task(dummy_entry, 128).unwrap();
        s.switch_context();
        s.suspend_current();
        // Still set until the next switch_context simulates the port
        // actually saving this task's context and rotating away from it.
        assert_eq!(s.current, unsafe { h.resolve() });

        s.switch_context();
        assert!(s.current.is_none());

        // Ticking does not wake a SuspendedForever task.
        for _ in 0..1000 {
            s.tick();
        }
        assert!(!s.running_contains(unsafe { h.resolve() }.unwrap()));

        s.signal(h).unwrap();
        assert!(s.running_contains(unsafe { h.resolve() }.unwrap()));
    }

    #[test]
    fn signal_is_noop_on_non_suspended_task() {
        let mut s = new_scheduler();
        let h = s.add_task(dummy_entry, 128).unwrap();
        // Task is Ready, not suspended.
        s.signal(h).unwrap();
        assert!(s.running_contains(unsafe { h.resolve() }.unwrap()));
    }

    #[test]
    fn mutex_uncontended_lock_unlock() {
        let mut s = new_scheduler();
        s.add_task(dummy_entry, 128).unwrap();
        s.switch_context();

        let m = s.create_mutex().unwrap();
        s.lock_mutex(m).unwrap();
        assert!(unsafe { m.resolve() }.unwrap().as_ref().locked);
        s.unlock_mutex(m).unwrap();
        assert!(!unsafe { m.resolve() }.unwrap().as_ref().locked);
    }

    #[test]
    fn mutex_contention_parks_blocked_task_and_hands_off_fifo() {
        let mut s = new_scheduler();
        // a is added last, so it lands at the run-queue head and runs first.
        let b = s.add_task(dummy_entry, 128).unwrap();
        let a = s.add_task(dummy_entry, 128).unwrap();

        let m = s.create_mutex().unwrap();

        s.switch_context(); // current = a
        assert_eq!(s.current, unsafe { a.resolve() });
        s.lock_mutex(m).unwrap(); // a owns it

        s.switch_context(); // current = b (a requeued behind b... order: after a ran, enqueue_running(a) then pop b)
        assert_eq!(s.current, unsafe { b.resolve() });
        s.lock_mutex(m).unwrap(); // b blocks
        // current still names b — the block doesn't clear it until the
        // next switch_context simulates the port's save-then-rotate.
        assert_eq!(s.current, unsafe { b.resolve() });

        s.switch_context(); // a runs again
        assert_eq!(s.current, unsafe { a.resolve() });

        s.unlock_mutex(m).unwrap(); // hands off to b
        assert!(s.running_contains(unsafe { b.resolve() }.unwrap()));
        assert!(unsafe { m.resolve() }.unwrap().as_ref().locked);
        assert_eq!(unsafe { m.resolve() }.unwrap().as_ref().owner, unsafe {
            b.resolve()
        });
    }

    #[test]
    fn mutex_unlock_releases_three_waiters_in_fifo_order() {
        // Scenario S3: three tasks queue on a mutex already held by a
        // fourth; three unlocks must hand it off in queueing order.
        let mut s = new_scheduler();
        let t3 = s.add_task(dummy_entry, 128).unwrap();
        let t2 = s.add_task(dummy_entry, 128).unwrap();
        let t1 = s.add_task(dummy_entry, 128).unwrap();
        let holder = s.add_task(dummy_entry, 128).unwrap();

        let m = s.create_mutex().unwrap();

        s.switch_context(); // current = holder (last-prepended of the four)
        assert_eq!(s.current, unsafe { holder.resolve() });
        s.lock_mutex(m).unwrap();

        for t in [t1, t2, t3] {
            s.switch_context();
            assert_eq!(s.current, unsafe { t.resolve() });
            s.lock_mutex(m).unwrap();
            // Still set to the now-blocked task until the next
            // switch_context simulates the port's save-then-rotate.
            assert_eq!(s.current, unsafe { t.resolve() });
        }

        // All three now parked on the mutex's waiter list in t1, t2, t3
        // order. Switch back to the holder to unlock.
        s.switch_context();
        assert_eq!(s.current, unsafe { holder.resolve() });

        s.unlock_mutex(m).unwrap();
        assert_eq!(
            unsafe { m.resolve() }.unwrap().as_ref().owner,
            unsafe { t1.resolve() }
        );

        s.unlock_mutex(m).unwrap();
        assert_eq!(
            unsafe { m.resolve() }.unwrap().as_ref().owner,
            unsafe { t2.resolve() }
        );

        s.unlock_mutex(m).unwrap();
        assert_eq!(
            unsafe { m.resolve() }.unwrap().as_ref().owner,
            unsafe { t3.resolve() }
        );

        // No waiters left — the fourth unlock simply releases the lock.
        s.unlock_mutex(m).unwrap();
        assert!(!unsafe { m.resolve() }.unwrap().as_ref().locked);
    }

    #[test]
    fn destroy_locked_mutex_is_silent_noop() {
        let mut s = new_scheduler();
        s.add_task(dummy_entry, 128).unwrap();
        s.switch_context();

        let m = s.create_mutex().unwrap();
        s.lock_mutex(m).unwrap();
        assert!(s.destroy_mutex(m).is_ok());
        // Still resolvable — destruction was a no-op.
        assert!(unsafe { m.resolve() }.is_some());
    }

    #[test]
    fn remove_current_task_is_rejected() {
        let mut s = new_scheduler();
        let h = s.add_task(dummy_entry, 128).unwrap();
        s.switch_context();
        assert_eq!(s.remove_task(h), Err(Error::RemoveCurrentTask));
    }

    #[test]
    fn remove_waiting_task_frees_its_slot_for_reuse() {
        let mut s = new_scheduler();
        s.add_task(dummy_entry, 128).unwrap();
        s.switch_context();
        let sleeper = s.add_task(dummy_entry, 128).unwrap();

        // Move it to the wait list without scheduling it.
        unsafe { s.running.remove(sleeper.ptr) };
        unsafe {
            sleeper.ptr.as_ptr().as_mut().unwrap().state = TaskState::Waiting;
            sleeper.ptr.as_ptr().as_mut().unwrap().delay = DelayState::SleepingFor(50);
            s.waiting.push_back(sleeper.ptr);
        }

        assert!(s.remove_task(sleeper).is_ok());
        assert!(unsafe { sleeper.resolve() }.is_none());
    }

    #[test]
    fn stale_handle_after_removal_is_invalid() {
        let mut s = new_scheduler();
        s.add_task(dummy_entry, 128).unwrap();
        s.switch_context();
        let victim = s.add_task(dummy_entry, 128).unwrap();

        unsafe { s.running.remove(victim.ptr) };
        unsafe {
            victim.ptr.as_ptr().as_mut().unwrap().state = TaskState::Waiting;
            s.waiting.push_back(victim.ptr);
        }
        s.remove_task(victim).unwrap();

        assert_eq!(s.remove_task(victim), Err(Error::InvalidHandle));
    }

    impl<C: ContextSwitch> Scheduler<C> {
        fn running_contains(&self, target: NonNull<TaskControlBlock>) -> bool {
            let mut cursor = self.running.head;
            while let Some(n) = cursor {
                if n == target {
                    return true;
                }
                cursor = unsafe { n.as_ref().next };
            }
            false
        }
    }
}
