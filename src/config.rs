//! # Kernel Configuration
//!
//! Compile-time constants governing the arena, scheduler, and port layer.
//! Everything the kernel touches is sized at compile time — no dynamic
//! allocation outside the arena itself.

/// Total bytes of RAM the kernel may use: the arena plus the idle stack.
/// Must be large enough for `DYNAMIC_RAM` plus a usable idle stack.
pub const AVAILABLE_RAM: usize = 4096;

/// Bytes carved out of `AVAILABLE_RAM` for the dynamic arena (tasks,
/// mutexes). The remainder (`AVAILABLE_RAM - DYNAMIC_RAM`) becomes the
/// idle stack used when no task is runnable.
pub const DYNAMIC_RAM: usize = 3072;

/// Bytes reserved for the idle stack once the arena is carved out.
pub const IDLE_STACK_BYTES: usize = AVAILABLE_RAM - DYNAMIC_RAM;

/// Round-robin time slice length in milliseconds.
pub const TIME_SLICE_MS: u32 = 10;

/// SysTick frequency in Hz. Determines scheduler tick granularity; also
/// the unit `sleep()` converts milliseconds into.
pub const TICKS_PER_SECOND: u32 = 1000;

/// `TIME_SLICE_MS` expressed in ticks, the unit the scheduler actually
/// counts down in.
pub const TIME_SLICE_TICKS: u32 = TIME_SLICE_MS * TICKS_PER_SECOND / 1000;

/// Arena blocks (and every payload pointer the arena returns) are aligned
/// to this many bytes — the widest scalar alignment the target ABI cares
/// about (8 bytes covers `u64`/`f64` and the Cortex-M4 AAPCS stack
/// requirement).
pub const ARENA_ALIGN: usize = 8;

/// System clock frequency in Hz, used to derive the SysTick reload value.
/// Default matches a Cortex-M4 running from its internal HSI oscillator.
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Byte pattern used to paint freshly allocated task stacks when the
/// `stack-paint` feature is enabled, so external tooling can measure
/// high-water usage after the fact.
#[cfg(feature = "stack-paint")]
pub const STACK_PAINT_BYTE: u8 = 0xA5;
