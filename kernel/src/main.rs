//! Kernel image entry point.
//!
//! The actual entry symbol is `_start`, emitted by
//! [`ferrite_kernel::arch::x86::multiboot`]'s `global_asm!` block, which
//! sets up a boot stack and calls `kernel_main` in
//! [`ferrite_kernel::bootstrap`]. This binary crate exists only to pull the
//! library (and therefore that assembly) into the final link; the panic
//! handler and allocator error handler both live in the library so there's
//! exactly one definition of each across the link.

#![no_std]
#![no_main]

extern crate ferrite_kernel;
