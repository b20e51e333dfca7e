use core::fmt::Write as _;

use nullc_asm::RegVmCmd;
use nullc_types::{
    FunctionIndex,
    GlobalIndex,
    LocalIndex,
    TypeIndex,
};

use crate::descriptor::{
    FunctionDescriptor,
    GlobalVarDescriptor,
    LocalDescriptor,
    LocalKind,
    MemberEntry,
    TypeDescriptor,
};
use crate::source::SourceMap;

/// A linked module's name, for `nullcEnumerateModules`-style queries.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModuleDescriptor {
    pub name_offset: u32,
}

/// Error returned by a [`Metadata`] lookup that was handed a bad index.
///
/// The execution core treats a bad index from already-linked bytecode as a
/// configuration bug, not a recoverable runtime trap; callers that can
/// reach one from untrusted input should validate before indexing.
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("type index {0:?} out of range")]
    BadType(TypeIndex),
    #[error("function index {0:?} out of range")]
    BadFunction(FunctionIndex),
    #[error("local index {0:?} out of range")]
    BadLocal(LocalIndex),
    #[error("global index {0:?} out of range")]
    BadGlobal(GlobalIndex),
}

/// The read-only, process-wide view of a linked NULLC program: type
/// descriptors, function descriptors, local descriptors, global variable
/// descriptors, the interned symbol and source tables, and the RegVM code
/// array. Every other component (GC, interpreter, tree evaluator) consults
/// this through a shared `&Metadata` rather than a global/TLS singleton.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub types: Vec<TypeDescriptor>,
    pub members: Vec<MemberEntry>,
    pub functions: Vec<FunctionDescriptor>,
    pub locals: Vec<LocalDescriptor>,
    pub globals: Vec<GlobalVarDescriptor>,
    pub modules: Vec<ModuleDescriptor>,
    pub symbols: Vec<u8>,
    pub source: Vec<u8>,
    pub source_map: SourceMap,
    pub code: Vec<RegVmCmd>,
    /// Long/double literals materialized by `rviImmLong`/`rviImmDouble`,
    /// indexed by their instruction's `argument` field (raw bits; `f64`
    /// constants are stored via `to_bits`/`from_bits`). Shared across every
    /// function in the module, since Lowering interns rather than
    /// duplicating equal constants.
    pub constants: Vec<u64>,
    pub global_var_size: u32,
    pub offset_to_global_code: u32,
}

impl Metadata {
    pub fn type_list(&self) -> &[TypeDescriptor] {
        &self.types
    }

    pub fn get_type(&self, index: TypeIndex) -> Result<&TypeDescriptor, MetadataError> {
        self.types
            .get(index.index())
            .ok_or(MetadataError::BadType(index))
    }

    pub fn get_function(&self, index: FunctionIndex) -> Result<&FunctionDescriptor, MetadataError> {
        self.functions
            .get(index.index())
            .ok_or(MetadataError::BadFunction(index))
    }

    pub fn get_local(&self, index: LocalIndex) -> Result<&LocalDescriptor, MetadataError> {
        self.locals
            .get(index.index())
            .ok_or(MetadataError::BadLocal(index))
    }

    pub fn get_global(&self, index: GlobalIndex) -> Result<&GlobalVarDescriptor, MetadataError> {
        self.globals
            .get(index.index())
            .ok_or(MetadataError::BadGlobal(index))
    }

    /// The constant pool entry named by an `rviImmLong`/`rviImmDouble`
    /// instruction's `argument` field.
    pub fn constant(&self, index: u32) -> u64 {
        self.constants.get(index as usize).copied().unwrap_or(0)
    }

    /// `members[member_offset .. member_offset + member_count]`, in
    /// declaration order.
    pub fn member_list(&self, type_index: TypeIndex) -> &[MemberEntry] {
        let Ok(ty) = self.get_type(type_index) else {
            return &[];
        };
        let start = ty.member_offset as usize;
        let end = start + ty.member_count as usize;
        self.members.get(start..end).unwrap_or(&[])
    }

    /// The prefix of [`Self::member_list`] the mark engine should follow:
    /// the first `pointer_count` entries are the GC-relevant members.
    pub fn pointer_members(&self, type_index: TypeIndex) -> &[MemberEntry] {
        let Ok(ty) = self.get_type(type_index) else {
            return &[];
        };
        let all = self.member_list(type_index);
        all.get(..ty.pointer_count as usize).unwrap_or(all)
    }

    /// `locals[offset_to_first_local .. +local_count]` for a function,
    /// parameters first (declaration order).
    pub fn locals_for_function(&self, function: FunctionIndex) -> &[LocalDescriptor] {
        let Ok(f) = self.get_function(function) else {
            return &[];
        };
        let start = f.offset_to_first_local as usize;
        let end = start + f.local_count as usize;
        self.locals.get(start..end).unwrap_or(&[])
    }

    fn read_name(&self, offset: u32) -> &str {
        let start = offset as usize;
        let end = self.symbols[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| start + p)
            .unwrap_or(self.symbols.len());
        core::str::from_utf8(&self.symbols[start..end]).unwrap_or("<invalid utf8>")
    }

    pub fn type_name(&self, index: TypeIndex) -> &str {
        self.get_type(index)
            .map(|t| self.read_name(t.name_offset))
            .unwrap_or("<bad type>")
    }

    pub fn function_name(&self, index: FunctionIndex) -> &str {
        self.get_function(index)
            .map(|f| self.read_name(f.name_offset))
            .unwrap_or("<bad function>")
    }

    pub fn local_name(&self, index: LocalIndex) -> &str {
        self.get_local(index)
            .map(|l| self.read_name(l.name_offset))
            .unwrap_or("<bad local>")
    }

    pub fn global_name(&self, index: GlobalIndex) -> &str {
        self.get_global(index)
            .map(|g| self.read_name(g.name_offset))
            .unwrap_or("<bad global>")
    }

    /// Whether `address` is the entry of the synthetic "global code"
    /// function (top-level module initialization), i.e. `run` was called
    /// with `function_id == ~0`.
    pub fn is_global_code_address(&self, address: u32) -> bool {
        address == self.offset_to_global_code
    }

    /// Resolves an instruction address to the function it falls within, by
    /// linear scan over `regVmAddress..+regVmCodeSize` ranges (functions
    /// don't overlap, so this could be a binary search over a sorted
    /// side-index; kept linear since the table is small and this is only
    /// ever called on the error/debug path).
    pub fn convert_address_to_function(&self, address: u32) -> Option<FunctionIndex> {
        self.functions.iter().position(|f| {
            !f.is_external()
                && address >= f.reg_vm_address
                && address < f.reg_vm_address + f.reg_vm_code_size
        }).map(|i| FunctionIndex::new(i as u32))
    }

    /// Writes one stack-frame line (and, if requested, one line per local)
    /// in the exact wire format of §6:
    /// `<funcname> (line N: at <source snippet>)\r\n`, optionally followed
    /// by `param|local|extern <i>: <typename> <name> (at base|local|closure+<off> size <sz>)\r\n`.
    pub fn print_stack_frame(&self, address: u32, with_locals: bool) -> String {
        let mut out = String::new();

        if self.is_global_code_address(address) {
            let _ = write!(out, "global code");
        } else if let Some(func) = self.convert_address_to_function(address) {
            let _ = write!(out, "{}", self.function_name(func));
        } else {
            let _ = write!(out, "<unknown>");
        }

        let location = self.source_map.lookup(address);
        let line = location.map(|l| l.line).unwrap_or(0);
        let snippet = location
            .and_then(|l| self.source_snippet(l.source_offset))
            .unwrap_or_default();
        let _ = write!(out, " (line {line}: at {snippet})\r\n");

        if with_locals {
            if let Some(func) = self.convert_address_to_function(address) {
                for (i, local) in self.locals_for_function(func).iter().enumerate() {
                    let kind = match local.kind {
                        LocalKind::Param => "param",
                        LocalKind::Local => "local",
                        LocalKind::Extern => "extern",
                    };
                    let base = match local.kind {
                        LocalKind::Extern => "closure",
                        _ => "base",
                    };
                    let _ = write!(
                        out,
                        "{kind} {i}: {} {} (at {base}+{} size {})\r\n",
                        self.type_name(local.type_index),
                        self.read_name(local.name_offset),
                        local.offset,
                        local.size,
                    );
                }
            }
        }

        out
    }

    /// One line of source text starting at `offset`, trimmed of the
    /// trailing newline, for the stack-frame printer.
    fn source_snippet(&self, offset: u32) -> Option<String> {
        let start = offset as usize;
        if start > self.source.len() {
            return None;
        }
        let end = self.source[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| start + p)
            .unwrap_or(self.source.len());
        Some(
            core::str::from_utf8(&self.source[start..end])
                .unwrap_or("")
                .trim()
                .to_string(),
        )
    }
}
