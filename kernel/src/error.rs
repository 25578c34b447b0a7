//! Typed error surface for the kernel core.
//!
//! Replaces the original C code's bare `0`/`-1`/`NULL` return conventions
//! with proper `Result`s, in the spirit of the teacher's `src/error.rs`.

use core::fmt;

/// Physical memory manager errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "memory manager errors must be handled, not silently discarded"]
pub enum MmError {
    /// No free page satisfied the request.
    OutOfMemory,
    /// No contiguous run of the requested length was found.
    NoContiguousRun { requested_pages: usize },
    /// A zero-length contiguous allocation was requested.
    ZeroLengthRequest,
    /// An address passed to `free_page` was not page-aligned.
    Misaligned { addr: u32 },
}

impl fmt::Display for MmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmError::OutOfMemory => write!(f, "out of physical memory"),
            MmError::NoContiguousRun { requested_pages } => {
                write!(f, "no contiguous run of {requested_pages} pages available")
            }
            MmError::ZeroLengthRequest => write!(f, "zero-length contiguous allocation request"),
            MmError::Misaligned { addr } => write!(f, "address {addr:#x} is not page-aligned"),
        }
    }
}

/// Paging errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "paging errors must be handled, not silently discarded"]
pub enum PagingError {
    /// Backing the page table for a mapping ran out of physical memory.
    OutOfMemory,
}

impl fmt::Display for PagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PagingError::OutOfMemory => write!(f, "failed to allocate a page table frame"),
        }
    }
}

/// Heap allocator errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "heap errors must be handled, not silently discarded"]
pub enum HeapError {
    /// The heap has not been initialized, or initialization failed.
    Uninitialized,
    /// No free block large enough for the request was found.
    OutOfMemory { requested: usize },
    /// `calloc`'s `count * size` would overflow.
    SizeOverflow,
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::Uninitialized => write!(f, "heap is not initialized"),
            HeapError::OutOfMemory { requested } => {
                write!(f, "heap has no free block of at least {requested} bytes")
            }
            HeapError::SizeOverflow => write!(f, "allocation size overflowed"),
        }
    }
}

/// Top-level kernel error, aggregating every subsystem's error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    Mm(MmError),
    Paging(PagingError),
    Heap(HeapError),
    /// The Multiboot magic value or flags did not match what boot requires.
    InvalidMultiboot { magic: u32 },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::Mm(e) => write!(f, "{e}"),
            KernelError::Paging(e) => write!(f, "{e}"),
            KernelError::Heap(e) => write!(f, "{e}"),
            KernelError::InvalidMultiboot { magic } => {
                write!(f, "invalid multiboot magic {magic:#x}")
            }
        }
    }
}

impl From<MmError> for KernelError {
    fn from(e: MmError) -> Self {
        KernelError::Mm(e)
    }
}

impl From<PagingError> for KernelError {
    fn from(e: PagingError) -> Self {
        KernelError::Paging(e)
    }
}

impl From<HeapError> for KernelError {
    fn from(e: HeapError) -> Self {
        KernelError::Heap(e)
    }
}
