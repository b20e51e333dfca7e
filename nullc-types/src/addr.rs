//! Tagged addresses in place of raw machine pointers.
//!
//! The original engine stores a real pointer in every register/stack slot
//! that holds a reference and recovers the owning heap block by walking
//! back from that pointer. We cannot do that safely in Rust: the data
//! stack, the heap arena and the globals region are three independent
//! `Vec<u8>` buffers, not one address space.
//!
//! Instead every "pointer" value is an [`Addr`]: a 64-bit tagged offset.
//! Offsets below [`Addr::STACK_TAG`] are heap-arena-relative (and are what
//! the GC's base-pointer oracle resolves); offsets at or above the tag are
//! data-stack-relative. `0` is the null pointer in both spaces, matching the
//! source's convention that pointers `<= 0x10000` are treated as unmanaged.

use core::fmt;

/// Pointer width the linked program was compiled for.
///
/// Field order of composite reference types (`auto-ref` in particular)
/// depends on this, to preserve natural alignment of the trailing type id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PointerWidth {
    /// 32-bit target.
    Four = 4,
    /// 64-bit target.
    Eight = 8,
}

impl PointerWidth {
    /// Size in bytes.
    pub const fn bytes(self) -> usize {
        self as u8 as usize
    }
}

/// The pointer width this build of the execution core targets.
///
/// The source supports both; this port only materializes the 64-bit layout
/// (see `DESIGN.md`), so the lowering pass and the GC agree on `Eight`
/// everywhere a layout decision depends on it.
pub const NULLC_PTR_SIZE: PointerWidth = PointerWidth::Eight;

/// A tagged offset standing in for a raw pointer.
///
/// - `Addr::NULL` (`0`) is null in every space.
/// - Values in `1..0x10000` are the "unmanageable" guard range: never a
///   valid block start, reject-and-ignore for the GC and for loads.
/// - Values in `0x10000..STACK_TAG` are heap-arena byte offsets.
/// - Values in `STACK_TAG..TEMP_TAG` are data-stack byte offsets, recovered
///   by subtracting `STACK_TAG`.
/// - Values `>= TEMP_TAG` are temp-stack byte offsets, recovered by
///   subtracting `TEMP_TAG`. The temp stack is a fourth memory region
///   (cross-call argument/return transport, §4.1) that never holds a
///   program-visible pointer value itself; this tag only ever appears as
///   the probe address the interpreter feeds the GC's conservative
///   temp-stack scan, never as a value a program can read back.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Addr(u64);

impl Addr {
    /// Null pointer, valid in every space.
    pub const NULL: Self = Self(0);

    /// Upper bound (exclusive) of the reserved "unmanageable" guard range.
    /// Mirrors the source's `0x00010000` constant used to keep closure
    /// upvalue offsets from being mistaken for heap references.
    pub const UNMANAGEABLE_LIMIT: u64 = 0x0001_0000;

    /// Addresses at or above this tag (and below [`Self::TEMP_TAG`]) are
    /// data-stack-relative.
    pub const STACK_TAG: u64 = 1 << 48;

    /// Addresses at or above this tag are temp-stack-relative.
    pub const TEMP_TAG: u64 = 1 << 49;

    /// Build a heap-arena-relative address.
    pub const fn heap(offset: u64) -> Self {
        Self(offset)
    }

    /// Build a data-stack-relative address.
    pub const fn stack(offset: u64) -> Self {
        Self(Self::STACK_TAG + offset)
    }

    /// Build a temp-stack-relative address.
    pub const fn temp(offset: u64) -> Self {
        Self(Self::TEMP_TAG + offset)
    }

    /// Raw bit pattern, as stored in a register or memory slot.
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Reinterpret a raw bit pattern (e.g. read back out of memory) as an address.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Whether this is the null pointer.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Whether this falls in the reserved guard range (never a valid block).
    pub const fn is_unmanageable(self) -> bool {
        self.0 > 0 && self.0 < Self::UNMANAGEABLE_LIMIT
    }

    /// Whether this address names a data-stack location.
    pub const fn is_stack(self) -> bool {
        self.0 >= Self::STACK_TAG && self.0 < Self::TEMP_TAG
    }

    /// Whether this address names a temp-stack location.
    pub const fn is_temp(self) -> bool {
        self.0 >= Self::TEMP_TAG
    }

    /// Whether this address names a heap-arena location eligible for GC marking.
    pub const fn is_heap_candidate(self) -> bool {
        self.0 >= Self::UNMANAGEABLE_LIMIT && self.0 < Self::STACK_TAG
    }

    /// Byte offset into the heap arena. Only meaningful when [`Self::is_heap_candidate`].
    pub const fn heap_offset(self) -> u64 {
        self.0
    }

    /// Byte offset into the data stack. Only meaningful when [`Self::is_stack`].
    pub const fn stack_offset(self) -> u64 {
        self.0 - Self::STACK_TAG
    }

    /// Byte offset into the temp stack. Only meaningful when [`Self::is_temp`].
    pub const fn temp_offset(self) -> u64 {
        self.0 - Self::TEMP_TAG
    }

    /// Address advanced by `delta` bytes within the same space.
    pub const fn offset(self, delta: u64) -> Self {
        Self(self.0.wrapping_add(delta))
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Addr(null)")
        } else if self.is_stack() {
            write!(f, "Addr(stack+{:#x})", self.stack_offset())
        } else if self.is_temp() {
            write!(f, "Addr(temp+{:#x})", self.temp_offset())
        } else {
            write!(f, "Addr(heap+{:#x})", self.0)
        }
    }
}
