use core::fmt;

use crate::Addr;

/// A single register-file slot / data-stack word.
///
/// The source gives every register four lanes (`int`, `long`, `double`,
/// `ptr`) over the same eight bytes; which lane an instruction touches is
/// determined by the instruction's opcode, not by the value's static type.
/// We model that as one `u64` of raw bits with typed accessors, rather than
/// four overlapping fields, since Rust has no portable register union.
#[derive(Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegisterWord(u64);

impl RegisterWord {
    /// The zero word (also the default-initialized state of a fresh frame).
    pub const ZERO: Self = Self(0);

    /// Raw bit pattern.
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Reinterpret a raw bit pattern as a register word.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Read the low 4 bytes as `i32`.
    pub const fn as_i32(self) -> i32 {
        self.0 as i32
    }

    /// Read all 8 bytes as `i64`.
    pub const fn as_i64(self) -> i64 {
        self.0 as i64
    }

    /// Read the low 4 bytes as `f32`, via the `dtof`/`itod` conversion ops
    /// rather than a bit reinterpretation (floats are always carried widened
    /// to `f64` in a register, per the source's `RegVmRegister` union).
    pub const fn as_f64(self) -> f64 {
        f64::from_bits(self.0)
    }

    /// Read as a tagged address.
    pub const fn as_addr(self) -> Addr {
        Addr::from_bits(self.0)
    }

    /// Build a word from the `int` lane.
    pub const fn from_i32(value: i32) -> Self {
        Self(value as u32 as u64)
    }

    /// Build a word from the `long` lane.
    pub const fn from_i64(value: i64) -> Self {
        Self(value as u64)
    }

    /// Build a word from the `double` lane.
    pub const fn from_f64(value: f64) -> Self {
        Self(value.to_bits())
    }

    /// Build a word from the `ptr` lane.
    pub const fn from_addr(addr: Addr) -> Self {
        Self(addr.to_bits())
    }
}

impl fmt::Debug for RegisterWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegisterWord({:#018x})", self.0)
    }
}

impl From<i32> for RegisterWord {
    fn from(value: i32) -> Self {
        Self::from_i32(value)
    }
}

impl From<i64> for RegisterWord {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

impl From<f64> for RegisterWord {
    fn from(value: f64) -> Self {
        Self::from_f64(value)
    }
}

impl From<Addr> for RegisterWord {
    fn from(value: Addr) -> Self {
        Self::from_addr(value)
    }
}
