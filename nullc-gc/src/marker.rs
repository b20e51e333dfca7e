use bitflags::bitflags;
use nullc_types::TypeIndex;

bitflags! {
    /// Per-block flags, matching the source's `OBJECT_*` bits. The source
    /// packs these into the low byte of a word stored just before the
    /// block; we keep a [`MarkerWord`] in the heap's sorted side table
    /// instead (see `nullc-types::Addr` docs), so there's no packing
    /// pressure and the flag bits stay exactly as named.
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct GcFlags: u8 {
        /// Reached by the current mark pass.
        const VISIBLE = 1 << 0;
        const FREED = 1 << 1;
        const FINALIZABLE = 1 << 2;
        const FINALIZED = 1 << 3;
        /// Block holds an array, not a single instance.
        const ARRAY = 1 << 4;
    }
}

/// A heap block's GC bookkeeping: its flags and the type it was allocated
/// as (needed to re-derive a stack-discovered pointer's pointee type, and
/// to walk its members when marking).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MarkerWord {
    pub flags: GcFlags,
    pub type_index: TypeIndex,
}

impl MarkerWord {
    pub const fn new(type_index: TypeIndex, array: bool) -> Self {
        let flags = if array {
            GcFlags::ARRAY
        } else {
            GcFlags::empty()
        };
        Self { flags, type_index }
    }

    pub const fn is_visible(&self) -> bool {
        self.flags.contains(GcFlags::VISIBLE)
    }

    pub fn mark_visible(&mut self) {
        self.flags.insert(GcFlags::VISIBLE);
    }

    pub const fn is_array(&self) -> bool {
        self.flags.contains(GcFlags::ARRAY)
    }
}
