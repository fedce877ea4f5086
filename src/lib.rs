//! # nanokernel
//!
//! A minimal preemptive, time-sliced round-robin microkernel for
//! resource-constrained single-core microcontrollers (hundreds of bytes to a
//! few kilobytes of RAM, no MMU, no OS services).
//!
//! ## Overview
//!
//! Every task, stack, and synchronization object the kernel ever hands out
//! is carved from one statically-sized RAM arena — there is no heap, no
//! `alloc`, and no fixed task-table limit beyond the arena's free space.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │      init() · add_task() · start() · sleep/suspend     │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │   Arena allocator  │  Sync Primitives  │
//! │  scheduler.rs│   arena.rs         │  sync.rs          │
//! │  ─ tick()    │   ─ alloc()        │  ─ critical_section│
//! │  ─ switch()  │   ─ free()         │                   │
//! │  ─ mutex ops │                    │                   │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │              Task Model (task.rs)                       │
//! │    TCB · TaskHandle · DelayState · TaskState            │
//! ├────────────────────────────────────────────────────────┤
//! │            Arch Port (arch/cortex_m4.rs)                │
//! │    PendSV · SysTick · Context Switch · Stack Init       │
//! ├────────────────────────────────────────────────────────┤
//! │         ARM Cortex-M4 Hardware (Thumb-2)                │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling Model
//!
//! Cooperative plus time-sliced preemptive round robin, no priorities. A
//! task leaves the CPU at exactly four points: its time slice expires on a
//! tick, it calls [`kernel::yield_now`], it calls [`kernel::sleep`] or
//! [`kernel::suspend`], or it blocks on a contended mutex via
//! [`kernel::lock_mutex`]. All other kernel calls run to completion without
//! suspending the caller. See [`scheduler`] for the full state machine.
//!
//! ## Memory Model
//!
//! - **No heap, no `alloc`**: pure `core`, one static byte arena
//!   ([`arena`]) sized by [`config::DYNAMIC_RAM`].
//! - **No fixed task table**: a task's TCB and stack are one arena
//!   allocation ([`task`]); the only limit is free arena space.
//! - **Critical sections**: [`sync::critical_section`], built on
//!   `cortex_m::interrupt::free`, guard every arena and scheduler mutation.
#![no_std]

pub mod arch;
pub mod arena;
pub mod config;
pub mod error;
pub mod kernel;
pub mod scheduler;
pub mod sync;
pub mod task;
