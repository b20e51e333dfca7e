use nullc_asm::PanicReason;
use nullc_asm::RegId;

/// Failure of a `run`. Mirrors §7's two effect classes: a [`Self::Trap`]
/// is a recoverable runtime error reported to the host through
/// `getExecError`; the other variants are configuration errors detected
/// before any instruction executes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("code array is empty")]
    EmptyCode,

    #[error("function {0:?} has no RegVM body (external call with no native handler installed)")]
    NoNativeHandler(nullc_types::FunctionIndex),

    /// `getAddr` named a scope-base register this port doesn't model as
    /// addressable memory. Only `rvrrGlobals`/`rvrrFrame` are; see
    /// `DESIGN.md` for why `rvrrConstants`/`rvrrRegisters` aren't.
    #[error("getAddr base {0:?} is not an addressable memory space")]
    UnsupportedAddressSpace(RegId),

    #[error("{message}")]
    Trap {
        reason: PanicReason,
        message: String,
    },
}

impl ExecutionError {
    pub fn trap(reason: PanicReason) -> Self {
        let message = reason.to_string();
        Self::Trap { reason, message }
    }

    pub fn trap_detail(reason: PanicReason, detail: impl core::fmt::Display) -> Self {
        Self::Trap {
            reason,
            message: format!("{reason}: {detail}"),
        }
    }

    /// Whether this failure is a recoverable runtime trap (as opposed to a
    /// pre-run configuration error), i.e. whether it gets a call-stack
    /// trace appended.
    pub fn is_trap(&self) -> bool {
        matches!(self, Self::Trap { .. })
    }
}
