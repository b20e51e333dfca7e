use nullc_asm::{
    RegId,
    RvReturnKind,
};
use nullc_types::{
    Addr,
    FunctionIndex,
};

/// One activation record on the call stack: the caller's own identity and
/// the state to restore once the callee returns.
///
/// `function`/`frame_base` name the *caller* (`None` for the synthetic
/// top-level "global code" frame, which has no function descriptor and no
/// locals of its own — its state lives in the globals region instead). The
/// source recovers a frame's base by accumulating aligned `bytesToPop`
/// during a stack walk; this port stores it directly at call time instead,
/// since the interpreter already has it on hand when it builds the frame
/// and recomputing it later would just be re-deriving a value no one
/// discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    pub function: Option<FunctionIndex>,
    pub frame_base: Addr,
    /// Instruction index to resume the caller at.
    pub return_instruction: u32,
    /// Caller's register-file window base, restored on return.
    pub caller_reg_file_base: u32,
    /// Caller's data-stack top, restored on return.
    pub caller_data_stack_top: u32,
    /// Caller's register-window size, restored on return (needed to size
    /// the *next* call's window, not just to address the caller's own
    /// registers).
    pub caller_window_size: u32,
    /// Register in the *caller's* (now-restored) window that should
    /// receive the callee's result, and which lane/size to read it as.
    /// Unused for `Void`/`Composite` (the latter's bytes travel back over
    /// the temp stack instead).
    pub call_dst: RegId,
    pub call_dst_kind: RvReturnKind,
}
