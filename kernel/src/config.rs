//! Boot-time configuration surface.
//!
//! Centralizes the tunables that would otherwise be scattered magic numbers,
//! the way the teacher centralizes its heap geometry and slab size classes
//! in `mm/heap.rs`.

/// PIT channel-0 frequency, in Hz. Also the heartbeat log interval.
pub const PIT_FREQUENCY_HZ: u32 = 100;

/// Depth of the PS/2 keyboard event ring buffer. Must be a power of two.
pub const KEYBOARD_RING_SIZE: usize = 64;

/// Virtual base address of the kernel heap, placed just above the
/// identity-mapped region reserved for bootstrapping.
pub const HEAP_START: usize = 0x0100_0000;

/// Kernel heap size in bytes: a 256-page (1 MiB) contiguous region.
pub const HEAP_SIZE: usize = 256 * 4096;

/// Remapped PIC vector base for the master controller (IRQ0..7).
pub const PIC_MASTER_VECTOR_BASE: u8 = 0x20;

/// Remapped PIC vector base for the slave controller (IRQ8..15).
pub const PIC_SLAVE_VECTOR_BASE: u8 = 0x28;

/// Upper bound on how much RAM `mm::paging` will identity-map, regardless
/// of how much the Multiboot memory map reports.
pub const MAX_IDENTITY_MAP_BYTES: u32 = 256 * 1024 * 1024;
