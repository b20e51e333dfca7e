//! Read-only view of a linked NULLC program: type, function, local and
//! global descriptor tables, the interned symbol and source blobs, and the
//! RegVM code array produced by lowering. Every other crate in the
//! execution core (GC, tree evaluator, interpreter) borrows a `&Metadata`
//! rather than reaching for global state.

mod descriptor;
mod hash;
mod metadata;
mod source;

pub use descriptor::{
    FunctionDescriptor,
    FunctionRef,
    GlobalRef,
    GlobalVarDescriptor,
    LocalDescriptor,
    LocalKind,
    MemberEntry,
    NativeTrampoline,
    PrimitiveKind,
    TypeCategory,
    TypeDescriptor,
    TypeFlags,
};
pub use hash::{
    string_hash,
    AUTO_ARRAY_NAME_HASH,
    AUTO_REF_NAME_HASH,
};
pub use metadata::{
    Metadata,
    MetadataError,
    ModuleDescriptor,
};
pub use source::{
    SourceLocation,
    SourceMap,
};
