//! Free-function instruction builders, for tests and for the lowering pass.
//!
//! Mirrors the teacher's `op::` convention: one short function per common
//! opcode shape, so call sites read like assembly (`op::add_int(dst, a, b)`)
//! instead of spelling out `RegVmCmd { .. }` every time.

use crate::{
    cmd::RegVmCmd,
    opcode::RvOp,
    reg::RegId,
};

macro_rules! op3 {
    ($name:ident, $code:expr) => {
        /// `$rA = $rB <op> $rC`.
        pub fn $name(ra: RegId, rb: RegId, rc: RegId) -> RegVmCmd {
            RegVmCmd::new($code, ra, rb, rc, 0)
        }
    };
}

macro_rules! op2_arg {
    ($name:ident, $code:expr) => {
        pub fn $name(ra: RegId, rb: RegId, argument: u32) -> RegVmCmd {
            RegVmCmd::new($code, ra, rb, RegId::new(0), argument)
        }
    };
}

op3!(add_int, RvOp::AddInt);
op3!(sub_int, RvOp::SubInt);
op3!(mul_int, RvOp::MulInt);
op3!(div_int, RvOp::DivInt);
op3!(mod_int, RvOp::ModInt);
op3!(add_long, RvOp::AddLong);
op3!(sub_long, RvOp::SubLong);
op3!(mul_long, RvOp::MulLong);
op3!(div_long, RvOp::DivLong);
op3!(mod_long, RvOp::ModLong);
op3!(add_double, RvOp::AddDouble);
op3!(sub_double, RvOp::SubDouble);
op3!(mul_double, RvOp::MulDouble);
op3!(div_double, RvOp::DivDouble);
op3!(bit_and_int, RvOp::BitAndInt);
op3!(bit_or_int, RvOp::BitOrInt);
op3!(bit_xor_int, RvOp::BitXorInt);
op3!(shl_int, RvOp::ShlInt);
op3!(shr_int, RvOp::ShrInt);
op3!(less_int, RvOp::LessInt);
op3!(greater_int, RvOp::GreaterInt);
op3!(less_equal_int, RvOp::LessEqualInt);
op3!(greater_equal_int, RvOp::GreaterEqualInt);
op3!(equal_int, RvOp::EqualInt);
op3!(not_equal_int, RvOp::NotEqualInt);
op3!(bit_and_long, RvOp::BitAndLong);
op3!(bit_or_long, RvOp::BitOrLong);
op3!(bit_xor_long, RvOp::BitXorLong);
op3!(shl_long, RvOp::ShlLong);
op3!(shr_long, RvOp::ShrLong);
op3!(less_long, RvOp::LessLong);
op3!(greater_long, RvOp::GreaterLong);
op3!(less_equal_long, RvOp::LessEqualLong);
op3!(greater_equal_long, RvOp::GreaterEqualLong);
op3!(equal_long, RvOp::EqualLong);
op3!(not_equal_long, RvOp::NotEqualLong);
op3!(less_double, RvOp::LessDouble);
op3!(greater_double, RvOp::GreaterDouble);
op3!(less_equal_double, RvOp::LessEqualDouble);
op3!(greater_equal_double, RvOp::GreaterEqualDouble);
op3!(equal_double, RvOp::EqualDouble);
op3!(not_equal_double, RvOp::NotEqualDouble);
op3!(pow_int, RvOp::PowInt);
op3!(pow_long, RvOp::PowLong);
op3!(pow_double, RvOp::PowDouble);

macro_rules! op2 {
    ($name:ident, $code:expr) => {
        /// `$rA = <op> $rB`.
        pub fn $name(ra: RegId, rb: RegId) -> RegVmCmd {
            RegVmCmd::new($code, ra, rb, RegId::new(0), 0)
        }
    };
}

op2!(neg_int, RvOp::NegInt);
op2!(neg_long, RvOp::NegLong);
op2!(neg_double, RvOp::NegDouble);
op2!(bit_not_int, RvOp::BitNotInt);
op2!(bit_not_long, RvOp::BitNotLong);
op2!(logical_not_int, RvOp::LogicalNotInt);
op2!(logical_not_long, RvOp::LogicalNotLong);
op2!(logical_not_pointer, RvOp::LogicalNotPointer);
op2!(double_to_int, RvOp::DoubleToInt);
op2!(double_to_long, RvOp::DoubleToLong);
op2!(double_to_float, RvOp::DoubleToFloat);
op2!(int_to_double, RvOp::IntToDouble);
op2!(long_to_double, RvOp::LongToDouble);
op2!(int_to_long, RvOp::IntToLong);
op2!(long_to_int, RvOp::LongToInt);

op2_arg!(load_byte, RvOp::LoadByte);
op2_arg!(load_word, RvOp::LoadWord);
op2_arg!(load_dword, RvOp::LoadDword);
op2_arg!(load_long, RvOp::LoadLong);
op2_arg!(load_float, RvOp::LoadFloat);
op2_arg!(load_double, RvOp::LoadDouble);
op2_arg!(store_byte, RvOp::StoreByte);
op2_arg!(store_word, RvOp::StoreWord);
op2_arg!(store_dword, RvOp::StoreDword);
op2_arg!(store_long, RvOp::StoreLong);
op2_arg!(store_float, RvOp::StoreFloat);
op2_arg!(store_double, RvOp::StoreDouble);
op2_arg!(get_addr, RvOp::GetAddr);

/// `$rA = $rB != 0 ? $rA : $rA` commit form: `$rA = $rB` iff `$rC != 0`.
pub fn mov_if_non_zero(ra: RegId, rb: RegId, rc: RegId) -> RegVmCmd {
    RegVmCmd::new(RvOp::MovIfNonZero, ra, rb, rc, 0)
}

/// `$rA = $rB` iff `$rC == 0`.
pub fn mov_if_zero(ra: RegId, rb: RegId, rc: RegId) -> RegVmCmd {
    RegVmCmd::new(RvOp::MovIfZero, ra, rb, rc, 0)
}

/// Unsized-array element address: `$rB` holds `{element_ptr, length}`;
/// bounds-checks `$rC` against the embedded length.
pub fn index_unsized(ra: RegId, rb: RegId, rc: RegId, element_size: u32) -> RegVmCmd {
    RegVmCmd::new(RvOp::IndexUnsized, ra, rb, rc, element_size)
}

/// `$rA = argument as i32`.
pub fn imm_int(ra: RegId, argument: i32) -> RegVmCmd {
    RegVmCmd::new(RvOp::ImmInt, ra, RegId::new(0), RegId::new(0), argument as u32)
}

/// `$rA = constants[constant_index]`, reinterpreted as `i64`.
pub fn imm_long(ra: RegId, constant_index: u32) -> RegVmCmd {
    RegVmCmd::new(RvOp::ImmLong, ra, RegId::new(0), RegId::new(0), constant_index)
}

/// `$rA = constants[constant_index]`, reinterpreted as `f64`.
pub fn imm_double(ra: RegId, constant_index: u32) -> RegVmCmd {
    RegVmCmd::new(RvOp::ImmDouble, ra, RegId::new(0), RegId::new(0), constant_index)
}

/// Pushes a 4-byte immediate directly onto the temp stack, with no
/// register round-trip.
pub fn push_imm(value: i32) -> RegVmCmd {
    RegVmCmd::new(RvOp::PushImm, RegId::new(0), RegId::new(0), RegId::new(0), value as u32)
}

/// Pushes `constants[constant_index]` onto the temp stack as 8 bytes.
pub fn push_imm_long(constant_index: u32) -> RegVmCmd {
    RegVmCmd::new(RvOp::PushImmLong, RegId::new(0), RegId::new(0), RegId::new(0), constant_index)
}

/// `$rA = $rB`.
pub fn mov(ra: RegId, rb: RegId) -> RegVmCmd {
    RegVmCmd::new(RvOp::Mov, ra, rb, RegId::new(0), 0)
}

/// Sized-array element address: `$rA = $rB + $rC * elementSize`.
pub fn index(ra: RegId, rb: RegId, rc: RegId, array_size: u16, element_size: u16) -> RegVmCmd {
    RegVmCmd::new(
        RvOp::Index,
        ra,
        rb,
        rc,
        crate::pack::pack_index_arg(array_size, element_size),
    )
}

/// Unconditional jump; `argument` is a block id before the fixup pass runs,
/// an absolute instruction index after.
pub fn jump(target: u32) -> RegVmCmd {
    RegVmCmd::new(RvOp::Jump, RegId::new(0), RegId::new(0), RegId::new(0), target)
}

/// Jump to `target` if `$rA == 0`.
pub fn jump_if_zero(ra: RegId, target: u32) -> RegVmCmd {
    RegVmCmd::new(RvOp::JumpIfZero, ra, RegId::new(0), RegId::new(0), target)
}

/// Jump to `target` if `$rA != 0`.
pub fn jump_if_not_zero(ra: RegId, target: u32) -> RegVmCmd {
    RegVmCmd::new(RvOp::JumpIfNotZero, ra, RegId::new(0), RegId::new(0), target)
}

/// Call the function named by `function_id`. `kind` is a [`crate::opcode::RvReturnKind`].
pub fn call(ra: RegId, kind: u8, function_id: u32) -> RegVmCmd {
    RegVmCmd::new(RvOp::Call, ra, RegId::new(kind), RegId::new(0), function_id)
}

/// Pop the current frame, reading the result (if any) from `ra`.
pub fn ret(ra: RegId, kind: u8, size: u32) -> RegVmCmd {
    RegVmCmd::new(RvOp::Return, ra, RegId::new(kind), RegId::new(0), size)
}

/// Call through a function-ref held in `$rB` (`{context_ptr, function_id}`,
/// occupying `rB` and `rB+1`). `kind` is a [`crate::opcode::RvReturnKind`],
/// carried in `rC` since `rB` already names the callee.
pub fn call_ptr(ra: RegId, rb: RegId, kind: u8) -> RegVmCmd {
    RegVmCmd::new(RvOp::CallPtr, ra, rb, RegId::new(kind), 0)
}

/// Validates that the composite about to be returned (its address in `$rA`)
/// does not alias the current frame.
pub fn check_return_address(ra: RegId) -> RegVmCmd {
    RegVmCmd::new(RvOp::CheckReturnAddress, ra, RegId::new(0), RegId::new(0), 0)
}

/// Push `size` bytes of `$rA` onto the temp stack.
pub fn push_temp(ra: RegId, size: u32) -> RegVmCmd {
    RegVmCmd::new(RvOp::PushTemp, ra, RegId::new(0), RegId::new(0), size)
}

/// Pop `size` bytes off the temp stack into `$rA`.
pub fn pop_temp(ra: RegId, size: u32) -> RegVmCmd {
    RegVmCmd::new(RvOp::PopTemp, ra, RegId::new(0), RegId::new(0), size)
}

/// Downcast the `auto-ref` in `$rB` to `type_index`, writing the narrowed
/// pointer into `$rA`.
pub fn convert_ptr(ra: RegId, rb: RegId, type_index: u32) -> RegVmCmd {
    RegVmCmd::new(RvOp::ConvertPtr, ra, rb, RegId::new(0), type_index)
}

/// `$rA = type_index` as a typeid literal.
pub fn type_id(ra: RegId, type_index: u32) -> RegVmCmd {
    RegVmCmd::new(RvOp::TypeId, ra, RegId::new(0), RegId::new(0), type_index)
}

/// `$rA = { context: $rB, function_id }`.
pub fn func_addr(ra: RegId, rb: RegId, function_id: u32) -> RegVmCmd {
    RegVmCmd::new(RvOp::FuncAddr, ra, rb, RegId::new(0), function_id)
}

/// Zero-fills `size` bytes at `base(rB) + $rC`.
pub fn set_range(rb: RegId, rc: RegId, size: u32) -> RegVmCmd {
    RegVmCmd::new(RvOp::SetRange, RegId::new(0), rb, rc, size)
}
