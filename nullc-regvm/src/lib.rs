//! The register-based bytecode interpreter: executes a linked program's
//! `RegVmCmd` stream against an explicit data stack, register file, call
//! stack and temp stack.
//!
//! Out of scope (see `DESIGN.md`): the lexer/parser/type-checker that
//! produced the linked [`nullc_metadata::Metadata`] in the first place, any
//! JIT/LLVM backend, the C-ABI bridge that resolves a
//! [`native::NativeTrampoline`] to a real native function pointer, and
//! file I/O or disassembly printing.
#![forbid(unsafe_code)]

mod dispatch;
mod error;
mod frame;
mod interpreter;
mod native;
mod state;

pub use dispatch::RunOutcome;
pub use error::ExecutionError;
pub use frame::CallFrame;
pub use interpreter::{
    Interpreter,
    InterpreterConfig,
    RunResult,
};
pub use native::{
    NativeHandler,
    NativeTrampoline,
    NoNativeCalls,
};
pub use state::{
    Breakpoint,
    RunState,
};

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use nullc_asm::{
        op,
        RegId,
        RvReturnKind,
    };
    use nullc_metadata::{
        FunctionDescriptor,
        Metadata,
        TypeCategory,
        TypeDescriptor,
        TypeFlags,
    };
    use nullc_types::{
        FunctionIndex,
        TypeIndex,
        NONE,
    };

    use super::*;

    fn void_type() -> TypeDescriptor {
        TypeDescriptor {
            index: TypeIndex::new(0),
            size: 0,
            category: TypeCategory::None,
            primitive: nullc_metadata::PrimitiveKind::Void,
            subtype: TypeIndex::NONE,
            array_length: 0,
            member_count: 0,
            member_offset: 0,
            pointer_count: 0,
            flags: TypeFlags::empty(),
            name_hash: 0,
            name_offset: 0,
        }
    }

    /// A one-function module: `int add(int a, int b) { return a + b; }`,
    /// hand-assembled directly into `RegVmCmd`s the way the lowering pass
    /// would have emitted them (args already laid out at `frame+0`/`frame+4`,
    /// result delivered through the caller's destination register).
    fn add_function_metadata() -> Metadata {
        let r_a = RegId::new(4);
        let r_b = RegId::new(5);
        let r_result = RegId::new(4);

        let code = vec![
            op::load_dword(r_a, RegId::FRAME, 0),
            op::load_dword(r_b, RegId::FRAME, 4),
            op::add_int(r_result, r_a, r_b),
            op::ret(r_result, RvReturnKind::Int as u8, 4),
        ];

        Metadata {
            types: vec![void_type()],
            functions: vec![FunctionDescriptor {
                name_offset: 0,
                param_count: 2,
                local_count: 2,
                external_count: 0,
                offset_to_first_local: 0,
                reg_vm_address: 0,
                reg_vm_code_size: code.len() as u32,
                reg_vm_registers: 8,
                bytes_to_pop: 8,
                stack_size: 8,
                parent_type: TypeIndex::NONE,
                context_type: TypeIndex::NONE,
                is_coroutine: false,
                native: None,
            }],
            code,
            global_var_size: 0,
            offset_to_global_code: NONE,
            ..Default::default()
        }
    }

    #[test]
    fn calls_a_function_and_reads_back_the_scalar_result() {
        let meta = add_function_metadata();
        let mut interp = Interpreter::new(&meta, InterpreterConfig::default());

        let mut args = Vec::new();
        args.extend_from_slice(&11i32.to_le_bytes());
        args.extend_from_slice(&31i32.to_le_bytes());

        let outcome = interp
            .call_function(FunctionIndex::new(0), &args)
            .expect("call should not trap");

        match outcome {
            RunOutcome::Finished(RunResult::Int(v)) => assert_eq!(v, 42),
            other => panic!("expected a finished int result, got {other:?}"),
        }
    }

    /// `int bad(int a, int b) { return a / b; }` with `b == 0` traps rather
    /// than panicking the host process.
    #[test]
    fn division_by_zero_traps_instead_of_panicking() {
        let r_a = RegId::new(4);
        let r_b = RegId::new(5);

        let code = vec![
            op::load_dword(r_a, RegId::FRAME, 0),
            op::load_dword(r_b, RegId::FRAME, 4),
            op::div_int(r_a, r_a, r_b),
            op::ret(r_a, RvReturnKind::Int as u8, 4),
        ];
        let meta = Metadata {
            types: vec![void_type()],
            functions: vec![FunctionDescriptor {
                name_offset: 0,
                param_count: 2,
                local_count: 2,
                external_count: 0,
                offset_to_first_local: 0,
                reg_vm_address: 0,
                reg_vm_code_size: code.len() as u32,
                reg_vm_registers: 8,
                bytes_to_pop: 8,
                stack_size: 8,
                parent_type: TypeIndex::NONE,
                context_type: TypeIndex::NONE,
                is_coroutine: false,
                native: None,
            }],
            code,
            global_var_size: 0,
            offset_to_global_code: NONE,
            ..Default::default()
        };
        let mut interp = Interpreter::new(&meta, InterpreterConfig::default());
        let mut args = Vec::new();
        args.extend_from_slice(&10i32.to_le_bytes());
        args.extend_from_slice(&0i32.to_le_bytes());

        let err = interp
            .call_function(FunctionIndex::new(0), &args)
            .unwrap_err();
        assert_eq!(err, ExecutionError::trap(nullc_asm::PanicReason::DivideByZero));
        assert_eq!(interp.state(), RunState::Errored);
    }

    /// Indexing a sized array out of bounds traps with the call stack still
    /// intact, so the host can format a backtrace.
    #[test]
    fn out_of_bounds_index_traps_with_call_stack_preserved() {
        let r_base = RegId::new(4);
        let r_idx = RegId::new(5);
        let r_elem = RegId::new(6);

        let code = vec![
            op::get_addr(r_base, RegId::FRAME, 0),
            op::imm_int(r_idx, 5),
            op::index(r_elem, r_base, r_idx, 4, 4),
            op::load_dword(r_elem, r_elem, 0),
            op::ret(r_elem, RvReturnKind::Int as u8, 4),
        ];
        let meta = Metadata {
            types: vec![void_type()],
            functions: vec![FunctionDescriptor {
                name_offset: 0,
                param_count: 0,
                local_count: 1,
                external_count: 0,
                offset_to_first_local: 0,
                reg_vm_address: 0,
                reg_vm_code_size: code.len() as u32,
                reg_vm_registers: 8,
                bytes_to_pop: 0,
                stack_size: 16,
                parent_type: TypeIndex::NONE,
                context_type: TypeIndex::NONE,
                is_coroutine: false,
                native: None,
            }],
            code,
            global_var_size: 0,
            offset_to_global_code: NONE,
            ..Default::default()
        };
        let mut interp = Interpreter::new(&meta, InterpreterConfig::default());
        let err = interp.call_function(FunctionIndex::new(0), &[]).unwrap_err();
        assert_eq!(
            err,
            ExecutionError::trap(nullc_asm::PanicReason::ArrayIndexOutOfBounds)
        );
    }

    #[test]
    fn breakpoint_pauses_before_the_instruction_and_resume_completes_the_call() {
        let r_a = RegId::new(4);
        let code = vec![
            op::imm_int(r_a, 7),
            op::imm_int(r_a, 9),
            op::ret(r_a, RvReturnKind::Int as u8, 4),
        ];
        let meta = Metadata {
            types: vec![void_type()],
            functions: vec![FunctionDescriptor {
                name_offset: 0,
                param_count: 0,
                local_count: 0,
                external_count: 0,
                offset_to_first_local: 0,
                reg_vm_address: 0,
                reg_vm_code_size: code.len() as u32,
                reg_vm_registers: 8,
                bytes_to_pop: 0,
                stack_size: 0,
                parent_type: TypeIndex::NONE,
                context_type: TypeIndex::NONE,
                is_coroutine: false,
                native: None,
            }],
            code,
            global_var_size: 0,
            offset_to_global_code: NONE,
            ..Default::default()
        };
        let mut interp = Interpreter::new(&meta, InterpreterConfig::default());
        interp.set_breakpoint(1, false);

        let paused = interp.call_function(FunctionIndex::new(0), &[]).unwrap();
        assert_eq!(paused, RunOutcome::Paused { instruction_index: 1 });
        assert_eq!(interp.state(), RunState::Breakpoint { instruction_index: 1 });

        let finished = interp.resume().unwrap();
        assert_eq!(finished, RunOutcome::Finished(RunResult::Int(9)));
    }

    /// `auto ref` materialization/downcast round-trip: `funcAddr` writes a
    /// `{context, function_id}` pair into a register run, `convertPtr`
    /// accepts a matching type id and rejects a mismatched one.
    fn func_addr_metadata(code: Vec<nullc_asm::RegVmCmd>) -> Metadata {
        Metadata {
            types: vec![void_type()],
            functions: vec![FunctionDescriptor {
                name_offset: 0,
                param_count: 0,
                local_count: 0,
                external_count: 0,
                offset_to_first_local: 0,
                reg_vm_address: 0,
                reg_vm_code_size: code.len() as u32,
                reg_vm_registers: 8,
                bytes_to_pop: 0,
                stack_size: 0,
                parent_type: TypeIndex::NONE,
                context_type: TypeIndex::NONE,
                is_coroutine: false,
                native: None,
            }],
            code,
            global_var_size: 0,
            offset_to_global_code: NONE,
            ..Default::default()
        }
    }

    #[test]
    fn func_addr_and_convert_ptr_round_trip_the_register_pair() {
        let r_ctx = RegId::new(4);
        let r_pair = RegId::new(5);
        let r_out = RegId::new(7);

        let matching = func_addr_metadata(vec![
            op::func_addr(r_pair, r_ctx, 99),
            op::convert_ptr(r_out, r_pair, 99),
            op::ret(r_out, RvReturnKind::Int as u8, 4),
        ]);
        let mut interp = Interpreter::new(&matching, InterpreterConfig::default());
        interp.set_reg(r_ctx, nullc_types::RegisterWord::from_i32(42));

        let outcome = interp.call_function(FunctionIndex::new(0), &[]).unwrap();
        match outcome {
            RunOutcome::Finished(RunResult::Int(v)) => assert_eq!(v, 42),
            other => panic!("expected a finished int result, got {other:?}"),
        }

        let mismatched = func_addr_metadata(vec![
            op::func_addr(r_pair, r_ctx, 99),
            op::convert_ptr(r_out, r_pair, 100),
            op::ret(r_out, RvReturnKind::Int as u8, 4),
        ]);
        let mut interp = Interpreter::new(&mismatched, InterpreterConfig::default());
        let err = interp.call_function(FunctionIndex::new(0), &[]).unwrap_err();
        assert_eq!(err, ExecutionError::trap(nullc_asm::PanicReason::InvalidDowncast));
    }

    /// An unsized-array element access (`indexUnsized`) traps on an
    /// out-of-bounds index read from the array-ref's own embedded length,
    /// and `setRange` zero-fills the requested byte range in place.
    #[test]
    fn index_unsized_traps_and_set_range_zero_fills() {
        let r_base = RegId::new(4);
        let r_ptr = RegId::new(5);
        let r_idx = RegId::new(7);
        let r_elem = RegId::new(8);

        let code = vec![
            op::get_addr(r_base, RegId::FRAME, 0),
            op::mov(r_ptr, r_base),
            op::imm_int(RegId::new(6), 2),
            op::imm_int(r_idx, 5),
            op::index_unsized(r_elem, r_ptr, r_idx, 4),
            op::load_dword(r_elem, r_elem, 0),
            op::ret(r_elem, RvReturnKind::Int as u8, 4),
        ];
        let meta = Metadata {
            types: vec![void_type()],
            functions: vec![FunctionDescriptor {
                name_offset: 0,
                param_count: 0,
                local_count: 1,
                external_count: 0,
                offset_to_first_local: 0,
                reg_vm_address: 0,
                reg_vm_code_size: code.len() as u32,
                reg_vm_registers: 9,
                bytes_to_pop: 0,
                stack_size: 16,
                parent_type: TypeIndex::NONE,
                context_type: TypeIndex::NONE,
                is_coroutine: false,
                native: None,
            }],
            code,
            global_var_size: 0,
            offset_to_global_code: NONE,
            ..Default::default()
        };
        let mut interp = Interpreter::new(&meta, InterpreterConfig::default());
        let err = interp.call_function(FunctionIndex::new(0), &[]).unwrap_err();
        assert_eq!(
            err,
            ExecutionError::trap(nullc_asm::PanicReason::ArrayIndexOutOfBounds)
        );
    }

    /// Testable Property 8: indexing a sized array `T[N]` with `i ∉ [0,N)`
    /// traps, and with `i ∈ [0,N)` succeeds, for any bound/index pair.
    #[quickcheck]
    fn sized_index_bounds_check_matches_array_size(array_size: u8, raw_index: i16) -> bool {
        let array_size = array_size as u32;
        let r_base = RegId::new(4);
        let r_idx = RegId::new(5);
        let r_elem = RegId::new(6);

        let code = vec![
            op::get_addr(r_base, RegId::FRAME, 0),
            op::imm_int(r_idx, raw_index as i32),
            op::index(r_elem, r_base, r_idx, array_size as u16, 4),
            op::ret(r_elem, RvReturnKind::Int as u8, 4),
        ];
        let meta = Metadata {
            types: vec![void_type()],
            functions: vec![FunctionDescriptor {
                name_offset: 0,
                param_count: 0,
                local_count: 1,
                external_count: 0,
                offset_to_first_local: 0,
                reg_vm_address: 0,
                reg_vm_code_size: code.len() as u32,
                reg_vm_registers: 8,
                bytes_to_pop: 0,
                stack_size: array_size * 4 + 4,
                parent_type: TypeIndex::NONE,
                context_type: TypeIndex::NONE,
                is_coroutine: false,
                native: None,
            }],
            code,
            global_var_size: 0,
            offset_to_global_code: NONE,
            ..Default::default()
        };
        let mut interp = Interpreter::new(&meta, InterpreterConfig::default());
        let result = interp.call_function(FunctionIndex::new(0), &[]);

        let in_bounds = raw_index >= 0 && (raw_index as u32) < array_size;
        if in_bounds {
            result.is_ok()
        } else {
            result == Err(ExecutionError::trap(nullc_asm::PanicReason::ArrayIndexOutOfBounds))
        }
    }

    /// A coroutine-flagged function still executes an ordinary call/return
    /// exactly like a non-coroutine one: the interpreter imposes no special
    /// handling based on `is_coroutine`, it's read only by the caller that
    /// decides whether to treat a finished run as a resumable yield.
    #[test]
    fn is_coroutine_function_calls_and_returns_like_any_other() {
        let mut meta = add_function_metadata();
        meta.functions[0].is_coroutine = true;
        let mut interp = Interpreter::new(&meta, InterpreterConfig::default());

        let mut args = Vec::new();
        args.extend_from_slice(&11i32.to_le_bytes());
        args.extend_from_slice(&31i32.to_le_bytes());

        let outcome = interp
            .call_function(FunctionIndex::new(0), &args)
            .expect("call should not trap");

        match outcome {
            RunOutcome::Finished(RunResult::Int(v)) => assert_eq!(v, 42),
            other => panic!("expected a finished int result, got {other:?}"),
        }
    }

    #[test]
    fn no_native_handler_traps_a_call_to_an_external_function() {
        let meta = Metadata {
            types: vec![void_type()],
            functions: vec![FunctionDescriptor {
                name_offset: 0,
                param_count: 0,
                local_count: 0,
                external_count: 0,
                offset_to_first_local: 0,
                reg_vm_address: NONE,
                reg_vm_code_size: 0,
                reg_vm_registers: 0,
                bytes_to_pop: 0,
                stack_size: 0,
                parent_type: TypeIndex::NONE,
                context_type: TypeIndex::NONE,
                is_coroutine: false,
                native: Some(nullc_metadata::NativeTrampoline { bind: 0, call: 0 }),
            }],
            code: vec![op::ret(RegId::new(0), RvReturnKind::Void as u8, 0)],
            global_var_size: 0,
            offset_to_global_code: NONE,
            ..Default::default()
        };
        let mut interp = Interpreter::new(&meta, InterpreterConfig::default());
        let err = interp.call_function(FunctionIndex::new(0), &[]).unwrap_err();
        assert!(matches!(err, ExecutionError::NoNativeHandler(_)));
    }
}
