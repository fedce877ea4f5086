//! # nanokernel demo firmware
//!
//! Exercises every facade entry point against a Cortex-M4 target: two
//! independent "blinker" tasks driven by [`kernel::sleep`], a pair of tasks
//! serializing on a shared mutex, and a suspend/signal handshake between a
//! worker and a dispatcher.
//!
//! There is no GPIO driver in scope here (see `spec.md` §1, out of scope) —
//! "pin" state is simulated with a couple of `AtomicBool`s so the demo can
//! run, and be inspected, on any Cortex-M4 part without a HAL dependency.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicBool, Ordering};

use cortex_m_rt::entry;
use panic_halt as _;

#[cfg(feature = "defmt")]
use defmt_rtt as _;

use nanokernel::kernel;
use nanokernel::scheduler::MutexHandle;
use nanokernel::task::TaskHandle;

// ---------------------------------------------------------------------------
// Simulated pin state (blinker demo, scenario S1)
// ---------------------------------------------------------------------------

static PIN_A: AtomicBool = AtomicBool::new(false);
static PIN_B: AtomicBool = AtomicBool::new(false);

/// Toggles `PIN_A` at ~1 Hz, independent of every other task.
extern "C" fn blinker_a() -> ! {
    loop {
        let v = !PIN_A.load(Ordering::Relaxed);
        PIN_A.store(v, Ordering::Relaxed);
        kernel::sleep(500);
    }
}

/// Toggles `PIN_B` at ~1 Hz. Runs concurrently with `blinker_a` under
/// ordinary round-robin rotation — no synchronization between the two.
extern "C" fn blinker_b() -> ! {
    loop {
        let v = !PIN_B.load(Ordering::Relaxed);
        PIN_B.store(v, Ordering::Relaxed);
        kernel::sleep(500);
    }
}

// ---------------------------------------------------------------------------
// Mutex mutual exclusion demo (scenario S2)
// ---------------------------------------------------------------------------

static mut SHARED_MUTEX: Option<MutexHandle> = None;
static EXCLUSIVE_PIN: AtomicBool = AtomicBool::new(false);

/// Locks the shared mutex, raises `EXCLUSIVE_PIN`, holds it briefly, lowers
/// it, then unlocks — repeatedly. Paired with `mutex_task_b`, this
/// demonstrates that the two critical sections never overlap: whichever
/// task is blocked on `lock_mutex` simply doesn't run until the other
/// calls `unlock_mutex`.
extern "C" fn mutex_task_a() -> ! {
    loop {
        let m = unsafe { SHARED_MUTEX.unwrap() };
        kernel::lock_mutex(m).ok();
        EXCLUSIVE_PIN.store(true, Ordering::Relaxed);
        kernel::sleep(100);
        EXCLUSIVE_PIN.store(false, Ordering::Relaxed);
        kernel::unlock_mutex(m).ok();
        kernel::sleep(100);
    }
}

extern "C" fn mutex_task_b() -> ! {
    loop {
        let m = unsafe { SHARED_MUTEX.unwrap() };
        kernel::lock_mutex(m).ok();
        EXCLUSIVE_PIN.store(true, Ordering::Relaxed);
        kernel::sleep(100);
        EXCLUSIVE_PIN.store(false, Ordering::Relaxed);
        kernel::unlock_mutex(m).ok();
        kernel::sleep(100);
    }
}

// ---------------------------------------------------------------------------
// Suspend/signal handshake (scenario S5)
// ---------------------------------------------------------------------------

static mut WORKER_HANDLE: Option<TaskHandle> = None;
static WORKER_RUNS: AtomicBool = AtomicBool::new(false);

/// Parks itself with `suspend()` until `dispatcher` wakes it with
/// `signal()`, does a unit of work, then suspends again.
extern "C" fn worker() -> ! {
    loop {
        kernel::suspend();
        WORKER_RUNS.store(true, Ordering::Relaxed);
    }
}

/// Wakes `worker` roughly twice a second.
extern "C" fn dispatcher() -> ! {
    loop {
        kernel::sleep(300);
        let h = unsafe { WORKER_HANDLE.unwrap() };
        kernel::signal(h).ok();
    }
}

// ---------------------------------------------------------------------------
// setup() — creates every task before the scheduler is started
// ---------------------------------------------------------------------------

/// Called once, after `kernel::init()` and before `kernel::start()`. Must
/// create at least one task; this demo creates six, spanning every
/// blocking primitive the facade exposes.
fn setup() {
    kernel::add_task(blinker_a, 256).expect("blinker_a");
    kernel::add_task(blinker_b, 256).expect("blinker_b");

    let mutex = kernel::create_mutex().expect("create_mutex");
    unsafe { SHARED_MUTEX = Some(mutex) };
    kernel::add_task(mutex_task_a, 256).expect("mutex_task_a");
    kernel::add_task(mutex_task_b, 256).expect("mutex_task_b");

    let worker_handle = kernel::add_task(worker, 256).expect("worker");
    unsafe { WORKER_HANDLE = Some(worker_handle) };
    kernel::add_task(dispatcher, 256).expect("dispatcher");
}

#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();

    kernel::init();
    setup();
    kernel::start(cp)
}
