use std::collections::HashMap;

use nullc_asm::{
    RegId,
    RvOp,
    RvReturnKind,
};
use nullc_gc::{
    GcHeap,
    GcHost,
    MarkerWord,
};
use nullc_metadata::Metadata;
use nullc_types::{
    Addr,
    FunctionIndex,
    RegisterWord,
};

use crate::error::ExecutionError;
use crate::frame::CallFrame;
use crate::native::{
    NativeHandler,
    NoNativeCalls,
};
use crate::state::{
    Breakpoint,
    RunState,
};

pub(crate) fn align16(size: u32) -> u32 {
    (size + 15) & !15
}

/// Fixed capacities the interpreter is sized with at construction, mirroring
/// `minStackSize` et al. from §4.1: the data stack, register file and temp
/// stack are each a single pre-allocated region; growing past the bound is
/// a `StackOverflow` trap, never a realloc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterConfig {
    pub min_stack_size: u32,
    pub min_register_count: u32,
    pub min_temp_stack_size: u32,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            min_stack_size: 1 << 20,
            min_register_count: 1 << 16,
            min_temp_stack_size: 1 << 16,
        }
    }
}

/// Outcome of a completed `run`: which register lane the result lives in,
/// if any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunResult {
    Void,
    Int(i32),
    Long(i64),
    Double(f64),
    /// Composite results are left on the temp stack for the host to read
    /// with [`Interpreter::temp_stack_bytes`]; this just reports the size.
    Composite(u32),
}

/// Executes `RegVmCmd` streams against an explicit register file, data
/// stack, call stack and temp stack, per §4.1.
///
/// Holds every memory region the [`GcHost`] seam needs to scan at once
/// (globals live inside the data stack itself, at offset `0`, per §3's
/// "globals ... zeroed at interpreter init"), unlike [`GcHeap`]'s
/// standalone single-arena implementation.
pub struct Interpreter<'m, N = NoNativeCalls> {
    meta: &'m Metadata,
    native: N,

    data_stack: Vec<u8>,
    data_stack_top: u32,

    register_file: Vec<RegisterWord>,
    reg_file_base: u32,

    temp_stack: Vec<u8>,
    temp_stack_top: u32,

    heap: GcHeap,

    call_stack: Vec<CallFrame>,
    current_function: Option<FunctionIndex>,
    frame_base: Addr,
    pc: u32,
    /// Register-window size of whatever is currently executing (a function's
    /// `reg_vm_registers`, or [`crate::dispatch::GLOBAL_CODE_REGISTER_WINDOW`]
    /// for the synthetic top-level frame) — where the *next* call's window
    /// starts.
    current_window_size: u32,

    state: RunState,
    breakpoints: HashMap<u32, Breakpoint>,
    has_breakpoints: bool,
    /// Cooperative cancellation: set by [`Self::stop`], checked at every
    /// instruction boundary. Mirrors §5's `callContinue=false` quench.
    cancel_requested: bool,
    /// Instruction index to skip the breakpoint check at on the very next
    /// dispatch, set when [`Self::resume`]-ing off a pause so a still-armed
    /// breakpoint doesn't immediately re-trigger before any progress is made.
    resume_bypass: Option<u32>,
    /// Call-stack depth `run`/`call_function` was invoked at; a `return`
    /// that would pop below it ends that invocation instead.
    active_floor: usize,

    last_error: Option<ExecutionError>,
    result: RunResult,
}

impl<'m> Interpreter<'m, NoNativeCalls> {
    /// Build an interpreter with no native-call support; any `call` to an
    /// external function traps.
    pub fn new(meta: &'m Metadata, config: InterpreterConfig) -> Self {
        Self::with_native(meta, config, NoNativeCalls)
    }
}

impl<'m, N: NativeHandler> Interpreter<'m, N> {
    pub fn with_native(meta: &'m Metadata, config: InterpreterConfig, native: N) -> Self {
        let data_stack = vec![0u8; config.min_stack_size as usize];
        let globals_top = align16(meta.global_var_size).min(config.min_stack_size);

        Self {
            meta,
            native,
            data_stack,
            data_stack_top: globals_top,
            register_file: vec![RegisterWord::ZERO; config.min_register_count as usize],
            reg_file_base: 0,
            temp_stack: vec![0u8; config.min_temp_stack_size as usize],
            temp_stack_top: 0,
            heap: GcHeap::new(),
            call_stack: Vec::new(),
            current_function: None,
            frame_base: Addr::stack(globals_top as u64),
            pc: meta.offset_to_global_code,
            current_window_size: crate::dispatch::GLOBAL_CODE_REGISTER_WINDOW,
            state: RunState::Idle,
            breakpoints: HashMap::new(),
            has_breakpoints: false,
            cancel_requested: false,
            resume_bypass: None,
            active_floor: 0,
            last_error: None,
            result: RunResult::Void,
        }
    }

    pub fn metadata(&self) -> &'m Metadata {
        self.meta
    }

    pub fn heap(&self) -> &GcHeap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut GcHeap {
        &mut self.heap
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn last_error(&self) -> Option<&ExecutionError> {
        self.last_error.as_ref()
    }

    pub fn result(&self) -> RunResult {
        self.result
    }

    pub fn program_counter(&self) -> u32 {
        self.pc
    }

    /// Bytes currently sitting at the top of the temp stack. Used by the
    /// host to read back a composite call/run result after reading
    /// [`Self::result`]'s reported size.
    pub fn temp_stack_bytes(&self, size: u32) -> &[u8] {
        let start = self.temp_stack_top as usize - size as usize;
        &self.temp_stack[start..start + size as usize]
    }

    // --- breakpoints -----------------------------------------------------

    pub fn set_breakpoint(&mut self, instruction_index: u32, one_hit: bool) {
        let original_opcode = self
            .meta
            .code
            .get(instruction_index as usize)
            .map(|c| c.code)
            .unwrap_or(RvOp::Nop);
        self.breakpoints.insert(
            instruction_index,
            Breakpoint {
                instruction_index,
                original_opcode,
                one_hit,
            },
        );
        self.has_breakpoints = true;
    }

    pub fn remove_breakpoint(&mut self, instruction_index: u32) {
        self.breakpoints.remove(&instruction_index);
        self.has_breakpoints = !self.breakpoints.is_empty();
    }

    /// Cooperative stop request, checked at the next instruction boundary.
    /// Mirrors §5's "nested `nullcRunFunction` invocations set
    /// `callContinue=false`".
    pub fn stop(&mut self) {
        self.cancel_requested = true;
    }

    // --- call-stack walk (consumed by the GC and by error formatting) ---

    /// `(function, frame_base)` pairs, bottom (outermost) to top
    /// (currently executing), skipping the synthetic top-level frame
    /// (its state is already covered by the globals root).
    pub fn frames_bottom_up(&self) -> impl Iterator<Item = (FunctionIndex, Addr)> + '_ {
        self.call_stack
            .iter()
            .map(|f| (f.function, f.frame_base))
            .chain(std::iter::once((self.current_function, self.frame_base)))
            .filter_map(|(f, base)| f.map(|f| (f, base)))
    }

    /// Instruction addresses bottom-to-top, for [`Metadata::print_stack_frame`].
    pub fn return_addresses(&self) -> impl Iterator<Item = u32> + '_ {
        self.call_stack
            .iter()
            .map(|f| f.return_instruction)
            .chain(std::iter::once(self.pc))
    }

    /// Every pointer-width temp-stack slot in the live range
    /// `[0, temp_stack_top)`, conservatively scanned per §4.4 root (c).
    fn temp_stack_roots(&self) -> impl Iterator<Item = Addr> + '_ {
        let ptr_size = nullc_types::NULLC_PTR_SIZE.bytes() as u32;
        (0..self.temp_stack_top)
            .step_by(ptr_size as usize)
            .filter(move |off| off + ptr_size <= self.temp_stack_top)
            .map(|off| Addr::temp(off as u64))
    }

    /// Runs one full mark pass over this interpreter's live state.
    pub fn mark(&mut self) {
        let globals_base = Addr::stack(0);
        let frames: Vec<_> = self.frames_bottom_up().collect();
        let temp_roots: Vec<_> = self.temp_stack_roots().collect();
        let meta = self.meta;
        nullc_gc::mark_all(self, meta, globals_base, frames, temp_roots);
    }

    // --- raw memory access (shared by load/store, GetAddr, the GC host) -

    fn heap_in_bounds(&self, addr: Addr, len: u32) -> bool {
        let start = addr.heap_offset().saturating_sub(Addr::UNMANAGEABLE_LIMIT);
        start + len as u64 <= self.heap.len() as u64
    }

    fn stack_in_bounds(&self, addr: Addr, len: u32) -> bool {
        let start = addr.stack_offset();
        start + len as u64 <= self.data_stack.len() as u64
    }

    fn temp_in_bounds(&self, addr: Addr, len: u32) -> bool {
        let start = addr.temp_offset();
        start + len as u64 <= self.temp_stack.len() as u64
    }

    pub(crate) fn read_bytes(&self, addr: Addr, len: u32) -> Result<&[u8], ExecutionError> {
        if addr.is_stack() {
            if !self.stack_in_bounds(addr, len) {
                return Err(ExecutionError::trap(nullc_asm::PanicReason::NullPointerAccess));
            }
            let start = addr.stack_offset() as usize;
            Ok(&self.data_stack[start..start + len as usize])
        } else if addr.is_temp() {
            if !self.temp_in_bounds(addr, len) {
                return Err(ExecutionError::trap(nullc_asm::PanicReason::NullPointerAccess));
            }
            let start = addr.temp_offset() as usize;
            Ok(&self.temp_stack[start..start + len as usize])
        } else if addr.is_heap_candidate() && self.heap_in_bounds(addr, len) {
            Ok(self.heap.bytes_at(addr, len as usize))
        } else {
            Err(ExecutionError::trap(nullc_asm::PanicReason::NullPointerAccess))
        }
    }

    pub(crate) fn write_bytes(&mut self, addr: Addr, bytes: &[u8]) -> Result<(), ExecutionError> {
        let len = bytes.len() as u32;
        if addr.is_stack() {
            if !self.stack_in_bounds(addr, len) {
                return Err(ExecutionError::trap(nullc_asm::PanicReason::NullPointerAccess));
            }
            let start = addr.stack_offset() as usize;
            self.data_stack[start..start + bytes.len()].copy_from_slice(bytes);
            Ok(())
        } else if addr.is_heap_candidate() && self.heap_in_bounds(addr, len) {
            self.heap.write_bytes(addr, bytes);
            Ok(())
        } else {
            Err(ExecutionError::trap(nullc_asm::PanicReason::NullPointerAccess))
        }
    }

    pub(crate) fn zero_bytes(&mut self, addr: Addr, len: u32) -> Result<(), ExecutionError> {
        if addr.is_stack() {
            if !self.stack_in_bounds(addr, len) {
                return Err(ExecutionError::trap(nullc_asm::PanicReason::NullPointerAccess));
            }
            let start = addr.stack_offset() as usize;
            self.data_stack[start..start + len as usize].fill(0);
            Ok(())
        } else if addr.is_heap_candidate() && self.heap_in_bounds(addr, len) {
            let zeros = vec![0u8; len as usize];
            self.heap.write_bytes(addr, &zeros);
            Ok(())
        } else {
            Err(ExecutionError::trap(nullc_asm::PanicReason::NullPointerAccess))
        }
    }

    /// Resolves a load/store/`getAddr` base register: one of the four
    /// reserved scope bases, or (any other id) the address *held in* that
    /// register — the computed-pointer case, e.g. a field address produced
    /// by a prior `index`/`getAddr`.
    pub(crate) fn resolve_base(&self, base_reg: RegId) -> Result<Addr, ExecutionError> {
        match base_reg {
            RegId::GLOBALS => Ok(Addr::stack(0)),
            RegId::FRAME => Ok(self.frame_base),
            RegId::CONSTANTS | RegId::REGISTERS => {
                Err(ExecutionError::UnsupportedAddressSpace(base_reg))
            }
            other => Ok(self.reg(other).as_addr()),
        }
    }

    pub(crate) fn reg(&self, id: RegId) -> RegisterWord {
        self.register_file[self.reg_file_base as usize + id.index()]
    }

    pub(crate) fn set_reg(&mut self, id: RegId, value: RegisterWord) {
        self.register_file[self.reg_file_base as usize + id.index()] = value;
    }

    pub(crate) fn native_mut(&mut self) -> &mut N {
        &mut self.native
    }

    pub(crate) fn frame_base(&self) -> Addr {
        self.frame_base
    }

    pub(crate) fn current_function(&self) -> Option<FunctionIndex> {
        self.current_function
    }

    pub(crate) fn call_stack_depth(&self) -> usize {
        self.call_stack.len()
    }

    pub(crate) fn push_call_frame(&mut self, frame: CallFrame) {
        self.call_stack.push(frame);
    }

    pub(crate) fn pop_call_frame(&mut self) -> Option<CallFrame> {
        self.call_stack.pop()
    }

    pub(crate) fn set_frame(&mut self, function: Option<FunctionIndex>, base: Addr) {
        self.current_function = function;
        self.frame_base = base;
    }

    pub(crate) fn data_stack_len(&self) -> u32 {
        self.data_stack.len() as u32
    }

    pub(crate) fn data_stack_top(&self) -> u32 {
        self.data_stack_top
    }

    pub(crate) fn set_data_stack_top(&mut self, top: u32) {
        self.data_stack_top = top;
    }

    pub(crate) fn reg_file_base_raw(&self) -> u32 {
        self.reg_file_base
    }

    pub(crate) fn register_file_len(&self) -> u32 {
        self.register_file.len() as u32
    }

    pub(crate) fn set_reg_file_base(&mut self, base: u32) {
        self.reg_file_base = base;
    }

    pub(crate) fn temp_stack_len(&self) -> u32 {
        self.temp_stack.len() as u32
    }

    pub(crate) fn temp_stack_top_raw(&self) -> u32 {
        self.temp_stack_top
    }

    pub(crate) fn set_temp_stack_top(&mut self, top: u32) {
        self.temp_stack_top = top;
    }

    pub(crate) fn temp_push(&mut self, bytes: &[u8]) {
        let start = self.temp_stack_top as usize;
        self.temp_stack[start..start + bytes.len()].copy_from_slice(bytes);
        self.temp_stack_top += bytes.len() as u32;
    }

    pub(crate) fn temp_pop(&mut self, len: u32) -> &[u8] {
        self.temp_stack_top -= len;
        let start = self.temp_stack_top as usize;
        &self.temp_stack[start..start + len as usize]
    }

    pub(crate) fn temp_peek_mut(&mut self, offset: u32, len: u32) -> &mut [u8] {
        let start = offset as usize;
        &mut self.temp_stack[start..start + len as usize]
    }

    pub(crate) fn set_state(&mut self, state: RunState) {
        self.state = state;
    }

    pub(crate) fn set_last_error(&mut self, error: Option<ExecutionError>) {
        self.last_error = error;
    }

    pub(crate) fn set_result(&mut self, result: RunResult) {
        self.result = result;
    }

    pub(crate) fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    pub(crate) fn breakpoint_at(&self, index: u32) -> Option<&Breakpoint> {
        if !self.has_breakpoints {
            return None;
        }
        self.breakpoints.get(&index)
    }

    pub(crate) fn clear_one_hit(&mut self, index: u32) {
        self.breakpoints.remove(&index);
        self.has_breakpoints = !self.breakpoints.is_empty();
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub(crate) fn clear_cancel(&mut self) {
        self.cancel_requested = false;
    }

    pub(crate) fn current_window_size(&self) -> u32 {
        self.current_window_size
    }

    pub(crate) fn set_current_window_size(&mut self, size: u32) {
        self.current_window_size = size;
    }

    pub(crate) fn take_resume_bypass(&mut self) -> Option<u32> {
        self.resume_bypass.take()
    }

    pub(crate) fn set_resume_bypass(&mut self, index: u32) {
        self.resume_bypass = Some(index);
    }

    pub(crate) fn active_floor(&self) -> usize {
        self.active_floor
    }

    pub(crate) fn set_active_floor(&mut self, floor: usize) {
        self.active_floor = floor;
    }
}

impl<'m, N: NativeHandler> GcHost for Interpreter<'m, N> {
    fn read_addr(&self, at: Addr) -> Addr {
        self.read_bytes(at, 8)
            .map(|b| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(b);
                Addr::from_bits(u64::from_le_bytes(buf))
            })
            .unwrap_or(Addr::NULL)
    }

    fn read_u32(&self, at: Addr) -> u32 {
        self.read_bytes(at, 4)
            .map(|b| {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(b);
                u32::from_le_bytes(buf)
            })
            .unwrap_or(0)
    }

    fn base_of(&self, target: Addr) -> Option<Addr> {
        self.heap.base_of(target)
    }

    fn marker(&self, block: Addr) -> Option<MarkerWord> {
        self.heap.marker(block)
    }

    fn set_marker(&mut self, block: Addr, marker: MarkerWord) {
        self.heap.set_marker(block, marker)
    }
}
