//! Opcode dispatch, the call/return protocol, and the `run`/`resume` driver
//! loop.
//!
//! Grounded in the teacher's `ExecuteVM`/`ExecuteFunction` pairing: one
//! big-match single-step function, called in a loop that stops to check
//! breakpoints and cooperative cancellation at every instruction boundary.

use nullc_asm::{
    PanicReason,
    RegId,
    RegVmCmd,
    RvOp,
    RvReturnKind,
};
use nullc_types::{
    Addr,
    FunctionIndex,
    RegisterWord,
};

use crate::error::ExecutionError;
use crate::frame::CallFrame;
use crate::interpreter::{
    align16,
    Interpreter,
    RunResult,
};
use crate::native::NativeHandler;
use crate::state::RunState;

/// Register-window size reserved for the synthetic top-level "global code"
/// frame, which has no [`nullc_metadata::FunctionDescriptor`] of its own to
/// read a window size out of.
pub(crate) const GLOBAL_CODE_REGISTER_WINDOW: u32 = 256;

/// Coarse recursion guard on top of the data/register-stack byte bounds,
/// so a pathological zero-frame-size recursive function can't grow
/// `call_stack` unboundedly before either of those trip.
const MAX_CALL_DEPTH: usize = 4096;

fn trap(reason: PanicReason) -> ExecutionError {
    ExecutionError::trap(reason)
}

/// Outcome of [`Interpreter::resume`]/[`Interpreter::run_global_code`]/
/// [`Interpreter::call_function`]: either the invocation ran to completion,
/// or it stopped early at an armed breakpoint (not an error — `resume` picks
/// back up from here).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunOutcome {
    Finished(RunResult),
    Paused { instruction_index: u32 },
}

enum StepOutcome {
    Continue,
    Finished(RunResult),
}

impl<'m, N: NativeHandler> Interpreter<'m, N> {
    /// Runs the module's top-level initialization code (globals'
    /// constructors and the statements at file scope), from whatever
    /// instruction the interpreter is currently parked at (its
    /// `offset_to_global_code` entry, on a freshly constructed instance).
    pub fn run_global_code(&mut self) -> Result<RunOutcome, ExecutionError> {
        if self.metadata().code.is_empty() {
            return Err(ExecutionError::EmptyCode);
        }
        let floor = self.call_stack_depth();
        self.execute_until(floor)
    }

    /// Calls `function` with `args` (the exact argument-frame bytes the
    /// lowering pass would have pushed: declaration order, context last)
    /// and runs it to completion or the next breakpoint.
    pub fn call_function(
        &mut self,
        function: FunctionIndex,
        args: &[u8],
    ) -> Result<RunOutcome, ExecutionError> {
        if self.metadata().code.is_empty() {
            return Err(ExecutionError::EmptyCode);
        }
        let floor = self.call_stack_depth();
        self.temp_push(args);

        let is_external = self
            .metadata()
            .get_function(function)
            .map(|f| f.is_external())
            .map_err(|_| trap(PanicReason::InvalidFunctionPointer))?;

        if is_external {
            self.do_external_call(function, RegId::new(0), RvReturnKind::Composite)?;
            let size = self.temp_stack_top_raw();
            let result = RunResult::Composite(size);
            self.set_result(result);
            return Ok(RunOutcome::Finished(result));
        }

        self.enter_function(function)?;
        self.execute_until(floor)
    }

    /// Continues execution after a [`RunOutcome::Paused`] (or after
    /// [`Interpreter::stop`] quenched a prior run before it finished).
    pub fn resume(&mut self) -> Result<RunOutcome, ExecutionError> {
        let floor = self.active_floor();
        self.execute_until(floor)
    }

    fn execute_until(&mut self, floor_depth: usize) -> Result<RunOutcome, ExecutionError> {
        self.set_active_floor(floor_depth);
        self.set_state(RunState::Running);
        self.clear_cancel();

        loop {
            if self.cancel_requested() {
                self.clear_cancel();
                self.set_state(RunState::Idle);
                return Ok(RunOutcome::Finished(self.result()));
            }

            let pc = self.program_counter();
            let bypassing = self.take_resume_bypass() == Some(pc);
            if !bypassing {
                if let Some(bp) = self.breakpoint_at(pc).copied() {
                    if bp.one_hit {
                        self.clear_one_hit(bp.instruction_index);
                    }
                    self.set_resume_bypass(bp.instruction_index);
                    self.set_state(RunState::Breakpoint {
                        instruction_index: bp.instruction_index,
                    });
                    tracing::trace!(instruction_index = bp.instruction_index, "breakpoint hit");
                    return Ok(RunOutcome::Paused {
                        instruction_index: bp.instruction_index,
                    });
                }
            }

            match self.step(floor_depth) {
                Ok(StepOutcome::Continue) => continue,
                Ok(StepOutcome::Finished(result)) => {
                    self.set_result(result);
                    self.set_state(RunState::Idle);
                    return Ok(RunOutcome::Finished(result));
                }
                Err(err) => {
                    tracing::error!(pc = self.program_counter(), %err, "RegVM trap");
                    self.set_last_error(Some(err.clone()));
                    self.set_state(RunState::Errored);
                    return Err(err);
                }
            }
        }
    }

    fn step(&mut self, floor_depth: usize) -> Result<StepOutcome, ExecutionError> {
        let pc = self.program_counter();
        let cmd = *self
            .metadata()
            .code
            .get(pc as usize)
            .ok_or_else(|| trap(PanicReason::FunctionDidNotReturn))?;

        match cmd.code {
            RvOp::Nop | RvOp::Break => {}

            RvOp::LoadByte => {
                let addr = self.resolve_base(cmd.rb)?.offset(cmd.argument as u64);
                let b = self.read_bytes(addr, 1)?[0] as i8 as i32;
                self.set_reg(cmd.ra, RegisterWord::from_i32(b));
            }
            RvOp::LoadWord => {
                let addr = self.resolve_base(cmd.rb)?.offset(cmd.argument as u64);
                let bytes = self.read_bytes(addr, 2)?;
                let v = i16::from_le_bytes([bytes[0], bytes[1]]) as i32;
                self.set_reg(cmd.ra, RegisterWord::from_i32(v));
            }
            RvOp::LoadDword => {
                let addr = self.resolve_base(cmd.rb)?.offset(cmd.argument as u64);
                let bytes = self.read_bytes(addr, 4)?;
                let v = i32::from_le_bytes(bytes.try_into().unwrap());
                self.set_reg(cmd.ra, RegisterWord::from_i32(v));
            }
            RvOp::LoadLong => {
                let addr = self.resolve_base(cmd.rb)?.offset(cmd.argument as u64);
                let bytes = self.read_bytes(addr, 8)?;
                let v = i64::from_le_bytes(bytes.try_into().unwrap());
                self.set_reg(cmd.ra, RegisterWord::from_i64(v));
            }
            RvOp::LoadFloat => {
                let addr = self.resolve_base(cmd.rb)?.offset(cmd.argument as u64);
                let bytes = self.read_bytes(addr, 4)?;
                let v = f32::from_le_bytes(bytes.try_into().unwrap()) as f64;
                self.set_reg(cmd.ra, RegisterWord::from_f64(v));
            }
            RvOp::LoadDouble => {
                let addr = self.resolve_base(cmd.rb)?.offset(cmd.argument as u64);
                let bytes = self.read_bytes(addr, 8)?;
                let v = f64::from_le_bytes(bytes.try_into().unwrap());
                self.set_reg(cmd.ra, RegisterWord::from_f64(v));
            }
            RvOp::StoreByte => {
                let addr = self.resolve_base(cmd.rb)?.offset(cmd.argument as u64);
                let v = self.reg(cmd.ra).as_i32() as i8;
                self.write_bytes(addr, &v.to_le_bytes())?;
            }
            RvOp::StoreWord => {
                let addr = self.resolve_base(cmd.rb)?.offset(cmd.argument as u64);
                let v = self.reg(cmd.ra).as_i32() as i16;
                self.write_bytes(addr, &v.to_le_bytes())?;
            }
            RvOp::StoreDword => {
                let addr = self.resolve_base(cmd.rb)?.offset(cmd.argument as u64);
                let v = self.reg(cmd.ra).as_i32();
                self.write_bytes(addr, &v.to_le_bytes())?;
            }
            RvOp::StoreLong => {
                let addr = self.resolve_base(cmd.rb)?.offset(cmd.argument as u64);
                let v = self.reg(cmd.ra).as_i64();
                self.write_bytes(addr, &v.to_le_bytes())?;
            }
            RvOp::StoreFloat => {
                let addr = self.resolve_base(cmd.rb)?.offset(cmd.argument as u64);
                let v = self.reg(cmd.ra).as_f64() as f32;
                self.write_bytes(addr, &v.to_le_bytes())?;
            }
            RvOp::StoreDouble => {
                let addr = self.resolve_base(cmd.rb)?.offset(cmd.argument as u64);
                let v = self.reg(cmd.ra).as_f64();
                self.write_bytes(addr, &v.to_le_bytes())?;
            }

            RvOp::ImmInt => {
                self.set_reg(cmd.ra, RegisterWord::from_i32(cmd.argument as i32));
            }
            RvOp::ImmLong => {
                let bits = self.metadata().constant(cmd.argument);
                self.set_reg(cmd.ra, RegisterWord::from_i64(bits as i64));
            }
            RvOp::ImmDouble => {
                let bits = self.metadata().constant(cmd.argument);
                self.set_reg(cmd.ra, RegisterWord::from_f64(f64::from_bits(bits)));
            }

            RvOp::GetAddr => {
                let addr = self.resolve_base(cmd.rb)?.offset(cmd.argument as u64);
                self.set_reg(cmd.ra, RegisterWord::from_addr(addr));
            }
            RvOp::Index => {
                let (array_size, element_size) = nullc_asm::pack::unpack_index_arg(cmd.argument);
                let index = self.reg(cmd.rc).as_i32();
                if array_size != 0 && (index < 0 || index as u32 >= array_size as u32) {
                    return Err(trap(PanicReason::ArrayIndexOutOfBounds));
                }
                let base = self.resolve_base(cmd.rb)?;
                let addr = base.offset(index as i64 as u64 * element_size as u64);
                self.set_reg(cmd.ra, RegisterWord::from_addr(addr));
            }
            RvOp::IndexUnsized => {
                let element_ptr = self.reg(cmd.rb).as_addr();
                let length = self.reg(RegId::new(cmd.rb.raw() + 1)).as_i32();
                let index = self.reg(cmd.rc).as_i32();
                if index < 0 || index >= length {
                    return Err(trap(PanicReason::ArrayIndexOutOfBounds));
                }
                let addr = element_ptr.offset(index as u64 * cmd.argument as u64);
                self.set_reg(cmd.ra, RegisterWord::from_addr(addr));
            }

            RvOp::Mov => {
                self.set_reg(cmd.ra, self.reg(cmd.rb));
            }
            RvOp::MovIfNonZero => {
                if self.reg(cmd.rc).as_i32() != 0 {
                    self.set_reg(cmd.ra, self.reg(cmd.rb));
                }
            }
            RvOp::MovIfZero => {
                if self.reg(cmd.rc).as_i32() == 0 {
                    self.set_reg(cmd.ra, self.reg(cmd.rb));
                }
            }

            RvOp::DoubleToInt => {
                let v = self.reg(cmd.rb).as_f64() as i32;
                self.set_reg(cmd.ra, RegisterWord::from_i32(v));
            }
            RvOp::DoubleToLong => {
                let v = self.reg(cmd.rb).as_f64() as i64;
                self.set_reg(cmd.ra, RegisterWord::from_i64(v));
            }
            RvOp::DoubleToFloat => {
                let v = self.reg(cmd.rb).as_f64() as f32 as f64;
                self.set_reg(cmd.ra, RegisterWord::from_f64(v));
            }
            RvOp::IntToDouble => {
                let v = self.reg(cmd.rb).as_i32() as f64;
                self.set_reg(cmd.ra, RegisterWord::from_f64(v));
            }
            RvOp::LongToDouble => {
                let v = self.reg(cmd.rb).as_i64() as f64;
                self.set_reg(cmd.ra, RegisterWord::from_f64(v));
            }
            RvOp::IntToLong => {
                let v = self.reg(cmd.rb).as_i32() as i64;
                self.set_reg(cmd.ra, RegisterWord::from_i64(v));
            }
            RvOp::LongToInt => {
                let v = self.reg(cmd.rb).as_i64() as i32;
                self.set_reg(cmd.ra, RegisterWord::from_i32(v));
            }

            RvOp::AddInt => self.binop_i32(cmd, i32::wrapping_add),
            RvOp::SubInt => self.binop_i32(cmd, i32::wrapping_sub),
            RvOp::MulInt => self.binop_i32(cmd, i32::wrapping_mul),
            RvOp::DivInt => self.divmod_i32(cmd, i32::wrapping_div)?,
            RvOp::ModInt => self.divmod_i32(cmd, i32::wrapping_rem)?,
            RvOp::PowInt => self.binop_i32(cmd, wrapping_pow_i32),
            RvOp::NegInt => {
                let v = self.reg(cmd.rb).as_i32().wrapping_neg();
                self.set_reg(cmd.ra, RegisterWord::from_i32(v));
            }

            RvOp::AddLong => self.binop_i64(cmd, i64::wrapping_add),
            RvOp::SubLong => self.binop_i64(cmd, i64::wrapping_sub),
            RvOp::MulLong => self.binop_i64(cmd, i64::wrapping_mul),
            RvOp::DivLong => self.divmod_i64(cmd, i64::wrapping_div)?,
            RvOp::ModLong => self.divmod_i64(cmd, i64::wrapping_rem)?,
            RvOp::PowLong => self.binop_i64(cmd, wrapping_pow_i64),
            RvOp::NegLong => {
                let v = self.reg(cmd.rb).as_i64().wrapping_neg();
                self.set_reg(cmd.ra, RegisterWord::from_i64(v));
            }

            RvOp::AddDouble => self.binop_f64(cmd, |a, b| a + b),
            RvOp::SubDouble => self.binop_f64(cmd, |a, b| a - b),
            RvOp::MulDouble => self.binop_f64(cmd, |a, b| a * b),
            RvOp::DivDouble => self.binop_f64(cmd, |a, b| a / b),
            RvOp::PowDouble => self.binop_f64(cmd, f64::powf),
            RvOp::NegDouble => {
                let v = -self.reg(cmd.rb).as_f64();
                self.set_reg(cmd.ra, RegisterWord::from_f64(v));
            }

            RvOp::BitAndInt => self.binop_i32(cmd, |a, b| a & b),
            RvOp::BitOrInt => self.binop_i32(cmd, |a, b| a | b),
            RvOp::BitXorInt => self.binop_i32(cmd, |a, b| a ^ b),
            RvOp::ShlInt => self.binop_i32(cmd, |a, b| a.wrapping_shl(b as u32 & 31)),
            RvOp::ShrInt => self.binop_i32(cmd, |a, b| a.wrapping_shr(b as u32 & 31)),
            RvOp::BitNotInt => {
                let v = !self.reg(cmd.rb).as_i32();
                self.set_reg(cmd.ra, RegisterWord::from_i32(v));
            }
            RvOp::BitAndLong => self.binop_i64(cmd, |a, b| a & b),
            RvOp::BitOrLong => self.binop_i64(cmd, |a, b| a | b),
            RvOp::BitXorLong => self.binop_i64(cmd, |a, b| a ^ b),
            RvOp::ShlLong => self.binop_i64(cmd, |a, b| a.wrapping_shl(b as u32 & 63)),
            RvOp::ShrLong => self.binop_i64(cmd, |a, b| a.wrapping_shr(b as u32 & 63)),
            RvOp::BitNotLong => {
                let v = !self.reg(cmd.rb).as_i64();
                self.set_reg(cmd.ra, RegisterWord::from_i64(v));
            }

            RvOp::LessInt => self.cmp_i32(cmd, |a, b| a < b),
            RvOp::GreaterInt => self.cmp_i32(cmd, |a, b| a > b),
            RvOp::LessEqualInt => self.cmp_i32(cmd, |a, b| a <= b),
            RvOp::GreaterEqualInt => self.cmp_i32(cmd, |a, b| a >= b),
            RvOp::EqualInt => self.cmp_i32(cmd, |a, b| a == b),
            RvOp::NotEqualInt => self.cmp_i32(cmd, |a, b| a != b),
            RvOp::LessLong => self.cmp_i64(cmd, |a, b| a < b),
            RvOp::GreaterLong => self.cmp_i64(cmd, |a, b| a > b),
            RvOp::LessEqualLong => self.cmp_i64(cmd, |a, b| a <= b),
            RvOp::GreaterEqualLong => self.cmp_i64(cmd, |a, b| a >= b),
            RvOp::EqualLong => self.cmp_i64(cmd, |a, b| a == b),
            RvOp::NotEqualLong => self.cmp_i64(cmd, |a, b| a != b),
            RvOp::LessDouble => self.cmp_f64(cmd, |a, b| a < b),
            RvOp::GreaterDouble => self.cmp_f64(cmd, |a, b| a > b),
            RvOp::LessEqualDouble => self.cmp_f64(cmd, |a, b| a <= b),
            RvOp::GreaterEqualDouble => self.cmp_f64(cmd, |a, b| a >= b),
            RvOp::EqualDouble => self.cmp_f64(cmd, |a, b| a == b),
            RvOp::NotEqualDouble => self.cmp_f64(cmd, |a, b| a != b),

            RvOp::LogicalNotInt => {
                let v = (self.reg(cmd.rb).as_i32() == 0) as i32;
                self.set_reg(cmd.ra, RegisterWord::from_i32(v));
            }
            RvOp::LogicalNotLong => {
                let v = (self.reg(cmd.rb).as_i64() == 0) as i32;
                self.set_reg(cmd.ra, RegisterWord::from_i32(v));
            }
            RvOp::LogicalNotPointer => {
                let v = self.reg(cmd.rb).as_addr().is_null() as i32;
                self.set_reg(cmd.ra, RegisterWord::from_i32(v));
            }

            RvOp::Jump => {
                self.set_pc(cmd.argument);
                return Ok(StepOutcome::Continue);
            }
            RvOp::JumpIfZero => {
                if self.reg(cmd.ra).as_i32() == 0 {
                    self.set_pc(cmd.argument);
                    return Ok(StepOutcome::Continue);
                }
            }
            RvOp::JumpIfNotZero => {
                if self.reg(cmd.ra).as_i32() != 0 {
                    self.set_pc(cmd.argument);
                    return Ok(StepOutcome::Continue);
                }
            }

            RvOp::Call => {
                self.do_call(cmd)?;
                return Ok(StepOutcome::Continue);
            }
            RvOp::CallPtr => {
                self.do_call_ptr(cmd)?;
                return Ok(StepOutcome::Continue);
            }
            RvOp::Return => {
                if let Some(result) = self.do_return(cmd, floor_depth)? {
                    return Ok(StepOutcome::Finished(result));
                }
                return Ok(StepOutcome::Continue);
            }

            RvOp::PushTemp => {
                let size = cmd.argument;
                if size <= 8 {
                    let bits = self.reg(cmd.ra).to_bits();
                    self.temp_push(&bits.to_le_bytes()[..size as usize]);
                } else {
                    let addr = self.resolve_base(cmd.ra)?;
                    let bytes = self.read_bytes(addr, size)?.to_vec();
                    self.temp_push(&bytes);
                }
            }
            RvOp::PushImm => {
                self.temp_push(&cmd.argument.to_le_bytes());
            }
            RvOp::PushImmLong => {
                let bits = self.metadata().constant(cmd.argument);
                self.temp_push(&bits.to_le_bytes());
            }
            RvOp::PopTemp => {
                let size = cmd.argument;
                if size <= 8 {
                    let bytes = self.temp_pop(size).to_vec();
                    let mut buf = [0u8; 8];
                    buf[..size as usize].copy_from_slice(&bytes);
                    self.set_reg(cmd.ra, RegisterWord::from_bits(u64::from_le_bytes(buf)));
                } else {
                    let bytes = self.temp_pop(size).to_vec();
                    let addr = self.resolve_base(cmd.ra)?;
                    self.write_bytes(addr, &bytes)?;
                }
            }

            RvOp::TypeId => {
                self.set_reg(cmd.ra, RegisterWord::from_i32(cmd.argument as i32));
            }
            RvOp::FuncAddr => {
                let context = self.reg(cmd.rb);
                self.set_reg(cmd.ra, context);
                self.set_reg(
                    RegId::new(cmd.ra.raw() + 1),
                    RegisterWord::from_i32(cmd.argument as i32),
                );
            }
            RvOp::ConvertPtr => {
                let type_id = self.reg(cmd.rb).as_i32();
                if type_id != cmd.argument as i32 {
                    return Err(trap(PanicReason::InvalidDowncast));
                }
                let target = self.reg(RegId::new(cmd.rb.raw() + 1));
                self.set_reg(cmd.ra, target);
            }

            RvOp::SetRange => {
                let base = self.resolve_base(cmd.rb)?;
                let offset = self.reg(cmd.rc).as_i32() as i64 as u64;
                self.zero_bytes(base.offset(offset), cmd.argument)?;
            }

            RvOp::CheckReturnAddress => {
                let addr = self.reg(cmd.ra).as_addr();
                if addr.is_stack() {
                    let frame_start = self.frame_base().stack_offset();
                    let frame_end = self.data_stack_top() as u64;
                    let offset = addr.stack_offset();
                    if offset >= frame_start && offset < frame_end {
                        return Err(trap(PanicReason::ReturnOfStackReference));
                    }
                }
            }
        }

        self.set_pc(pc + 1);
        Ok(StepOutcome::Continue)
    }

    // --- arithmetic helpers -----------------------------------------------

    fn binop_i32(&mut self, cmd: RegVmCmd, f: impl Fn(i32, i32) -> i32) {
        let v = f(self.reg(cmd.rb).as_i32(), self.reg(cmd.rc).as_i32());
        self.set_reg(cmd.ra, RegisterWord::from_i32(v));
    }

    fn divmod_i32(
        &mut self,
        cmd: RegVmCmd,
        f: impl Fn(i32, i32) -> i32,
    ) -> Result<(), ExecutionError> {
        let rhs = self.reg(cmd.rc).as_i32();
        if rhs == 0 {
            return Err(trap(PanicReason::DivideByZero));
        }
        let v = f(self.reg(cmd.rb).as_i32(), rhs);
        self.set_reg(cmd.ra, RegisterWord::from_i32(v));
        Ok(())
    }

    fn binop_i64(&mut self, cmd: RegVmCmd, f: impl Fn(i64, i64) -> i64) {
        let v = f(self.reg(cmd.rb).as_i64(), self.reg(cmd.rc).as_i64());
        self.set_reg(cmd.ra, RegisterWord::from_i64(v));
    }

    fn divmod_i64(
        &mut self,
        cmd: RegVmCmd,
        f: impl Fn(i64, i64) -> i64,
    ) -> Result<(), ExecutionError> {
        let rhs = self.reg(cmd.rc).as_i64();
        if rhs == 0 {
            return Err(trap(PanicReason::DivideByZero));
        }
        let v = f(self.reg(cmd.rb).as_i64(), rhs);
        self.set_reg(cmd.ra, RegisterWord::from_i64(v));
        Ok(())
    }

    fn binop_f64(&mut self, cmd: RegVmCmd, f: impl Fn(f64, f64) -> f64) {
        let v = f(self.reg(cmd.rb).as_f64(), self.reg(cmd.rc).as_f64());
        self.set_reg(cmd.ra, RegisterWord::from_f64(v));
    }

    fn cmp_i32(&mut self, cmd: RegVmCmd, f: impl Fn(i32, i32) -> bool) {
        let v = f(self.reg(cmd.rb).as_i32(), self.reg(cmd.rc).as_i32()) as i32;
        self.set_reg(cmd.ra, RegisterWord::from_i32(v));
    }

    fn cmp_i64(&mut self, cmd: RegVmCmd, f: impl Fn(i64, i64) -> bool) {
        let v = f(self.reg(cmd.rb).as_i64(), self.reg(cmd.rc).as_i64()) as i32;
        self.set_reg(cmd.ra, RegisterWord::from_i32(v));
    }

    fn cmp_f64(&mut self, cmd: RegVmCmd, f: impl Fn(f64, f64) -> bool) {
        let v = f(self.reg(cmd.rb).as_f64(), self.reg(cmd.rc).as_f64()) as i32;
        self.set_reg(cmd.ra, RegisterWord::from_i32(v));
    }

    // --- calls / returns ----------------------------------------------------

    fn do_call(&mut self, cmd: RegVmCmd) -> Result<(), ExecutionError> {
        let function = FunctionIndex::new(cmd.argument);
        let kind = RvReturnKind::from_u8(cmd.rb.raw()).unwrap_or(RvReturnKind::Void);
        self.dispatch_call(function, cmd.ra, kind)
    }

    fn do_call_ptr(&mut self, cmd: RegVmCmd) -> Result<(), ExecutionError> {
        let context = self.reg(cmd.rb);
        let function_id = self.reg(RegId::new(cmd.rb.raw() + 1)).as_i32();
        let kind = RvReturnKind::from_u8(cmd.rc.raw()).unwrap_or(RvReturnKind::Void);
        if function_id < 0 {
            return Err(trap(PanicReason::InvalidFunctionPointer));
        }
        let function = FunctionIndex::new(function_id as u32);
        if self.metadata().get_function(function).is_err() {
            return Err(trap(PanicReason::InvalidFunctionPointer));
        }
        self.temp_push(&context.to_bits().to_le_bytes());
        self.dispatch_call(function, cmd.ra, kind)
    }

    fn dispatch_call(
        &mut self,
        function: FunctionIndex,
        dst: RegId,
        kind: RvReturnKind,
    ) -> Result<(), ExecutionError> {
        let is_external = self
            .metadata()
            .get_function(function)
            .map(|f| f.is_external())
            .map_err(|_| trap(PanicReason::InvalidFunctionPointer))?;

        if is_external {
            self.do_external_call(function, dst, kind)?;
            self.set_pc(self.program_counter() + 1);
            return Ok(());
        }

        if self.call_stack_depth() >= MAX_CALL_DEPTH {
            return Err(trap(PanicReason::StackOverflow));
        }

        let frame = CallFrame {
            function: self.current_function(),
            frame_base: self.frame_base(),
            return_instruction: self.program_counter() + 1,
            caller_reg_file_base: self.reg_file_base_raw(),
            caller_data_stack_top: self.data_stack_top(),
            caller_window_size: self.current_window_size(),
            call_dst: dst,
            call_dst_kind: kind,
        };
        self.push_call_frame(frame);
        self.enter_function(function)
    }

    /// Transfers control into `function`'s body: pops its argument bytes
    /// off the temp stack into a freshly opened data-stack frame, zeroes the
    /// uninitialized tail, opens the callee's register window, and jumps
    /// `pc` to its entry. Shared by [`Self::dispatch_call`] and
    /// [`Self::call_function`] (which bypasses `dispatch_call`'s
    /// `CallFrame`/external handling for the host's own top-level entry).
    fn enter_function(&mut self, function: FunctionIndex) -> Result<(), ExecutionError> {
        let func = self
            .metadata()
            .get_function(function)
            .map_err(|_| trap(PanicReason::InvalidFunctionPointer))?
            .clone();

        let bytes_to_pop = func.bytes_to_pop;
        let stack_size = align16(func.stack_size).max(bytes_to_pop);

        let new_frame_base_offset = self.data_stack_top();
        if (new_frame_base_offset as u64) + (stack_size as u64) > self.data_stack_len() as u64 {
            return Err(trap(PanicReason::StackOverflow));
        }
        let new_reg_file_base = self.reg_file_base_raw() + self.current_window_size();
        if (new_reg_file_base as u64) + (func.reg_vm_registers as u64)
            > self.register_file_len() as u64
        {
            return Err(trap(PanicReason::StackOverflow));
        }

        let args = self.temp_pop(bytes_to_pop).to_vec();
        let new_frame_base = Addr::stack(new_frame_base_offset as u64);
        self.write_bytes(new_frame_base, &args)?;
        let tail_len = stack_size - bytes_to_pop;
        if tail_len > 0 {
            self.zero_bytes(new_frame_base.offset(bytes_to_pop as u64), tail_len)?;
        }

        self.set_data_stack_top(new_frame_base_offset + stack_size);
        self.set_reg_file_base(new_reg_file_base);
        self.set_current_window_size(func.reg_vm_registers);
        self.set_frame(Some(function), new_frame_base);
        self.set_pc(func.reg_vm_address);
        Ok(())
    }

    fn do_return(
        &mut self,
        cmd: RegVmCmd,
        floor_depth: usize,
    ) -> Result<Option<RunResult>, ExecutionError> {
        let kind = RvReturnKind::from_u8(cmd.rb.raw()).unwrap_or(RvReturnKind::Void);
        let result = match kind {
            RvReturnKind::Void => RunResult::Void,
            RvReturnKind::Int => RunResult::Int(self.reg(cmd.ra).as_i32()),
            RvReturnKind::Long => RunResult::Long(self.reg(cmd.ra).as_i64()),
            RvReturnKind::Double => RunResult::Double(self.reg(cmd.ra).as_f64()),
            RvReturnKind::Composite => RunResult::Composite(cmd.argument),
        };

        if self.call_stack_depth() == floor_depth {
            return Ok(Some(result));
        }

        let frame = self
            .pop_call_frame()
            .expect("call stack depth checked non-empty above floor_depth");
        self.set_frame(frame.function, frame.frame_base);
        self.set_reg_file_base(frame.caller_reg_file_base);
        self.set_data_stack_top(frame.caller_data_stack_top);
        self.set_current_window_size(frame.caller_window_size);
        self.set_pc(frame.return_instruction);

        match result {
            RunResult::Void | RunResult::Composite(_) => {}
            RunResult::Int(v) => self.set_reg(frame.call_dst, RegisterWord::from_i32(v)),
            RunResult::Long(v) => self.set_reg(frame.call_dst, RegisterWord::from_i64(v)),
            RunResult::Double(v) => self.set_reg(frame.call_dst, RegisterWord::from_f64(v)),
        }

        Ok(None)
    }

    /// Hands a call with no RegVM body off to the installed
    /// [`NativeHandler`]. `bytesToPop` argument bytes are already sitting at
    /// the top of the temp stack (pushed by the caller's `pushTemp`/`pushImm`
    /// sequence, or directly by [`Self::call_function`]); the handler
    /// overwrites that same range with its result in place.
    fn do_external_call(
        &mut self,
        function: FunctionIndex,
        dst: RegId,
        kind: RvReturnKind,
    ) -> Result<(), ExecutionError> {
        let func = self
            .metadata()
            .get_function(function)
            .map_err(|_| trap(PanicReason::InvalidFunctionPointer))?
            .clone();
        let trampoline = func.native.ok_or(ExecutionError::NoNativeHandler(function))?;
        let bytes_to_pop = func.bytes_to_pop;

        let start = self.temp_stack_top_raw() - bytes_to_pop;
        let mut buf = self.temp_peek_mut(start, bytes_to_pop).to_vec();
        let written = self
            .native_mut()
            .call(trampoline, &mut buf)
            .map_err(|detail| trap_with(PanicReason::InvalidFunctionPointer, detail))?;
        self.set_temp_stack_top(start);

        match kind {
            RvReturnKind::Void => {}
            RvReturnKind::Composite => {
                self.temp_push(&buf[..written as usize]);
            }
            RvReturnKind::Int => {
                let v = i32::from_le_bytes(buf[0..4].try_into().unwrap());
                self.set_reg(dst, RegisterWord::from_i32(v));
            }
            RvReturnKind::Long => {
                let v = i64::from_le_bytes(buf[0..8].try_into().unwrap());
                self.set_reg(dst, RegisterWord::from_i64(v));
            }
            RvReturnKind::Double => {
                let v = f64::from_bits(u64::from_le_bytes(buf[0..8].try_into().unwrap()));
                self.set_reg(dst, RegisterWord::from_f64(v));
            }
        }
        Ok(())
    }
}

fn trap_with(reason: PanicReason, detail: impl core::fmt::Display) -> ExecutionError {
    ExecutionError::trap_detail(reason, detail)
}

fn wrapping_pow_i32(base: i32, exp: i32) -> i32 {
    if exp < 0 {
        return 0;
    }
    let mut result = 1i32;
    let mut b = base;
    let mut e = exp as u32;
    while e > 0 {
        if e & 1 == 1 {
            result = result.wrapping_mul(b);
        }
        b = b.wrapping_mul(b);
        e >>= 1;
    }
    result
}

fn wrapping_pow_i64(base: i64, exp: i64) -> i64 {
    if exp < 0 {
        return 0;
    }
    let mut result = 1i64;
    let mut b = base;
    let mut e = exp as u64;
    while e > 0 {
        if e & 1 == 1 {
            result = result.wrapping_mul(b);
        }
        b = b.wrapping_mul(b);
        e >>= 1;
    }
    result
}
