//! Atomic value-layout types shared by every subsystem of the execution core.
//!
//! These are the smallest building blocks the metadata tables, the lowering
//! pass, the interpreter and the GC all agree on bit-for-bit: index newtypes,
//! the four-lane register word, and the tagged [`Addr`] used in place of a
//! raw machine pointer.
#![cfg_attr(not(feature = "std"), no_std)]

mod addr;
mod index;
pub mod layout;
mod register;

pub use addr::{
    Addr,
    PointerWidth,
    NULLC_PTR_SIZE,
};
pub use index::{
    FunctionIndex,
    GlobalIndex,
    LocalCloseListId,
    LocalIndex,
    TypeIndex,
};
pub use register::RegisterWord;

/// Generic machine word; the native size of an integer/pointer lane.
pub type Word = u64;

/// Sentinel used throughout the linker tables to mean "absent" (`~0u`).
pub const NONE: u32 = u32::MAX;

/// Same sentinel, widened, for 64-bit-indexed tables.
pub const NONE64: u64 = u64::MAX;

/// `~0` array length, meaning "unsized array" (see [`crate::addr`] module docs).
pub const UNSIZED_ARRAY_LEN: u32 = u32::MAX;
