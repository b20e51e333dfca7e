use bitflags::bitflags;
use nullc_types::{
    FunctionIndex,
    GlobalIndex,
    LocalCloseListId,
    TypeIndex,
    UNSIZED_ARRAY_LEN,
};

/// How a type's members (or an array's elements) should be visited: plain
/// data, nested array, a reference, a function value, or a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeCategory {
    None,
    Array,
    Pointer,
    Function,
    Class,
}

/// The primitive a `None`-category type actually stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrimitiveKind {
    Void,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Complex,
}

bitflags! {
    /// Type-level flags. Only `EXTENDABLE` (polymorphic base classes) is
    /// load-bearing for the execution core; the rest round out the source's
    /// flag word so a linked program's bit pattern still round-trips.
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct TypeFlags: u32 {
        /// Instances carry a runtime type id at offset 0 and may be the
        /// static type of a polymorphic call site.
        const EXTENDABLE = 1 << 0;
        const HAS_POINTERS = 1 << 1;
        const HAS_FINALIZER = 1 << 2;
    }
}

/// A linked type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TypeDescriptor {
    pub index: TypeIndex,
    pub size: u32,
    pub category: TypeCategory,
    pub primitive: PrimitiveKind,
    /// Element type (arrays/pointers) or return type (functions).
    pub subtype: TypeIndex,
    /// `~0` means unsized array.
    pub array_length: u32,
    pub member_count: u32,
    pub member_offset: u32,
    /// Count of `member_count` entries (logically reordered first) that are
    /// GC-relevant: the mark engine only ever walks these.
    pub pointer_count: u32,
    pub flags: TypeFlags,
    pub name_hash: u32,
    pub name_offset: u32,
}

impl TypeDescriptor {
    /// Whether `array_length` encodes "unsized".
    pub const fn is_unsized_array(&self) -> bool {
        self.array_length == UNSIZED_ARRAY_LEN
    }

    pub const fn is_extendable(&self) -> bool {
        self.flags.contains(TypeFlags::EXTENDABLE)
    }

    pub const fn is_auto_ref(&self) -> bool {
        self.name_hash == crate::hash::AUTO_REF_NAME_HASH
    }

    pub const fn is_auto_array(&self) -> bool {
        self.name_hash == crate::hash::AUTO_ARRAY_NAME_HASH
    }
}

/// One class member: its type and byte offset within the owning class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemberEntry {
    pub type_index: TypeIndex,
    pub offset: u32,
}

/// An external-call trampoline pair: opaque indices into the host's native
/// function table. The C-ABI bridge that actually resolves and invokes
/// these is out of scope for the execution core (§1); the interpreter only
/// needs to know a function has one, and look it up through
/// [`crate::NativeTrampoline`] when dispatching a call with no RegVM body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NativeTrampoline {
    pub bind: u32,
    pub call: u32,
}

/// A linked function descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionDescriptor {
    pub name_offset: u32,
    pub param_count: u32,
    /// Includes parameters.
    pub local_count: u32,
    /// Upvalue count.
    pub external_count: u32,
    pub offset_to_first_local: u32,
    /// Entry instruction index; `~0` if external (no RegVM body).
    pub reg_vm_address: u32,
    pub reg_vm_code_size: u32,
    /// Register-file size required on entry.
    pub reg_vm_registers: u32,
    /// Argument frame size, in bytes, as pushed by the caller.
    pub bytes_to_pop: u32,
    /// Total data-stack frame size, in bytes.
    pub stack_size: u32,
    /// Enclosing class, `TypeIndex::NONE` if none.
    pub parent_type: TypeIndex,
    /// Enclosing closure type, `TypeIndex::NONE` if none.
    pub context_type: TypeIndex,
    pub is_coroutine: bool,
    pub native: Option<NativeTrampoline>,
}

impl FunctionDescriptor {
    pub const fn is_external(&self) -> bool {
        self.reg_vm_address == nullc_types::NONE
    }
}

/// What role a local plays in its owning frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LocalKind {
    Param,
    Local,
    Extern,
}

/// A linked local (or parameter, or upvalue) descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalDescriptor {
    pub kind: LocalKind,
    pub type_index: TypeIndex,
    /// Byte offset relative to the current data-stack frame.
    pub offset: u32,
    pub size: u32,
    pub name_offset: u32,
    pub close_list_id: LocalCloseListId,
}

/// A linked global variable descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GlobalVarDescriptor {
    pub type_index: TypeIndex,
    /// Byte offset relative to the global data region at the data-stack base.
    pub offset: u32,
    pub name_offset: u32,
}

/// Just so call sites naming a global by table position read clearly.
pub type GlobalRef = GlobalIndex;
/// Just so call sites naming a function by table position read clearly.
pub type FunctionRef = FunctionIndex;
