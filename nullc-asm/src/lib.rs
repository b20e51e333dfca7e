//! RegVM instruction encoding: opcodes, register ids, panic reasons and the
//! bit-packed instruction argument conventions.
#![cfg_attr(not(feature = "std"), no_std)]

mod cmd;
mod opcode;
pub mod pack;
mod panic_reason;
mod reg;

pub mod op;

pub use cmd::RegVmCmd;
pub use opcode::{
    RvOp,
    RvReturnKind,
};
pub use panic_reason::PanicReason;
pub use reg::RegId;

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::*;

    /// Testable Property 6: the packed index argument carries both fields
    /// through the wire format unchanged, for any bound/stride pair.
    #[quickcheck]
    fn index_argument_round_trips_for_any_field_values(array_size: u16, element_size: u16) -> bool {
        pack::unpack_index_arg(pack::pack_index_arg(array_size, element_size))
            == (array_size, element_size)
    }

    #[test]
    fn round_trips_through_the_wire_format() {
        let cmd = RegVmCmd::new(RvOp::AddInt, RegId::new(10), RegId::new(4), RegId::new(5), 0);
        let bytes = cmd.to_bytes();
        assert_eq!(bytes.len(), RegVmCmd::LEN);
        assert_eq!(RegVmCmd::from_bytes(bytes), Some(cmd));
    }

    #[test]
    fn rejects_unknown_opcode_bytes() {
        let mut bytes = RegVmCmd::new(RvOp::Nop, RegId::new(0), RegId::new(0), RegId::new(0), 0)
            .to_bytes();
        bytes[0] = 0xaa;
        assert_eq!(RegVmCmd::from_bytes(bytes), None);
    }

    #[test]
    fn index_argument_packs_and_unpacks() {
        let packed = pack::pack_index_arg(16, 4);
        assert_eq!(pack::unpack_index_arg(packed), (16, 4));
    }

    #[test]
    fn break_opcode_is_reserved_for_the_debugger() {
        assert_eq!(RvOp::BREAK_OPCODE, 0xcc);
        assert_eq!(RvOp::from_u8(0xcc), Some(RvOp::Break));
    }

    #[test]
    fn scope_base_registers_are_reserved() {
        assert!(RegId::GLOBALS.is_scope_base());
        assert!(RegId::FRAME.is_scope_base());
        assert!(RegId::CONSTANTS.is_scope_base());
        assert!(RegId::REGISTERS.is_scope_base());
        assert!(!RegId::FIRST_ALLOCATABLE.is_scope_base());
    }
}
