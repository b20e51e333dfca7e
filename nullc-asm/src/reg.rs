use core::fmt;

/// Identifier of a RegVM register-file slot.
///
/// The first [`RegId::COUNT`] registers are reserved scope bases, always
/// live, never allocated to an SSA value; the linear-scan allocator in the
/// lowering pass only ever hands out registers at or above that count.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegId(u8);

impl RegId {
    /// Base of the currently executing frame's globals region.
    pub const GLOBALS: Self = Self(0);
    /// Base of the currently executing frame's locals region on the data stack.
    pub const FRAME: Self = Self(1);
    /// Base of the function's constant pool.
    pub const CONSTANTS: Self = Self(2);
    /// Base of the register file itself (used by `getAddr` to address a
    /// register's bytes as memory, e.g. to take the address of a composite
    /// local materialized in registers).
    pub const REGISTERS: Self = Self(3);

    /// Number of reserved scope-base registers.
    pub const COUNT: u8 = 4;

    /// First register id available to the linear-scan allocator.
    pub const FIRST_ALLOCATABLE: Self = Self(Self::COUNT);

    /// One past the highest representable register id.
    pub const MAX: u8 = u8::MAX;

    /// Wrap a raw register index.
    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    /// Raw register index, usable to index the register file `Vec`.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw register index as stored on the wire.
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Whether this names one of the four reserved scope-base registers.
    pub const fn is_scope_base(self) -> bool {
        self.0 < Self::COUNT
    }
}

impl fmt::Debug for RegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => write!(f, "rvrrGlobals"),
            1 => write!(f, "rvrrFrame"),
            2 => write!(f, "rvrrConstants"),
            3 => write!(f, "rvrrRegisters"),
            n => write!(f, "r{n}"),
        }
    }
}

impl From<u8> for RegId {
    fn from(index: u8) -> Self {
        Self(index)
    }
}
