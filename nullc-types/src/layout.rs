//! Fixed byte layouts of the composite GC-visible reference values
//! (function-ref, unsized-array-ref, auto-ref, auto-array). Lowering emits
//! field loads/stores at these offsets and the GC mark engine walks them
//! the same way, so the two must never disagree.
//!
//! Only the 64-bit layout (`PointerWidth::Eight`, see [`crate::NULLC_PTR_SIZE`])
//! is materialized.

/// `{ context_ptr: Addr, function_id: i32 }`.
pub mod function_ref {
    pub const CONTEXT_PTR_OFFSET: u64 = 0;
    pub const FUNCTION_ID_OFFSET: u64 = 8;
    pub const SIZE: u32 = 16;
}

/// `{ element_ptr: Addr, length: i32 }`.
pub mod unsized_array_ref {
    pub const ELEMENT_PTR_OFFSET: u64 = 0;
    pub const LENGTH_OFFSET: u64 = 8;
    pub const SIZE: u32 = 16;
}

/// `{ type_id: i32, target_ptr: Addr }`. The type id comes first and is
/// padded out to 8 bytes so the trailing pointer keeps natural alignment.
pub mod auto_ref {
    pub const TYPE_ID_OFFSET: u64 = 0;
    pub const TARGET_PTR_OFFSET: u64 = 8;
    pub const SIZE: u32 = 16;
}

/// `{ type_id: i32, element_ptr: Addr, length: i32 }`.
pub mod auto_array {
    pub const TYPE_ID_OFFSET: u64 = 0;
    pub const ELEMENT_PTR_OFFSET: u64 = 8;
    pub const LENGTH_OFFSET: u64 = 16;
    pub const SIZE: u32 = 24;
}
