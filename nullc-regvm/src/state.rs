use nullc_asm::RvOp;

/// Coarse run state, mirroring the teacher's `Debugger` state machine but
/// re-keyed to this port's sparse breakpoint map rather than in-place
/// opcode patching (see `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Nothing is executing; either fresh or a prior `run` returned.
    Idle,
    Running,
    /// Paused at `instruction_index` because it carries a breakpoint.
    Breakpoint { instruction_index: u32 },
    /// The last `run` ended in a trap; `getExecError` has the message.
    Errored,
}

/// A single breakpoint, addressed by instruction index.
///
/// The source overwrites the target instruction with the reserved
/// `rviBreakpoint` opcode and restores `original_opcode` on resume. Doing
/// that here would mean mutating the shared, `Clone`-cheap `Metadata::code`
/// in place; instead this port keeps the code array immutable and consults
/// a sparse `instruction_index -> Breakpoint` map before dispatching each
/// instruction (see §9 Redesign Flags). `original_opcode` is kept anyway —
/// not to restore the bytecode, but so a hit can report which real opcode
/// it preempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
    pub instruction_index: u32,
    pub original_opcode: RvOp,
    /// Removed after firing once, rather than persisting.
    pub one_hit: bool,
}
