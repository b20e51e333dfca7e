use core::fmt;

/// Reason a RegVM `run` was aborted with a trap.
///
/// These are exactly the recoverable runtime errors of §7: each terminates
/// the current `run`, is reported to the host through `getExecError`, and
/// (if this is the outermost run) gets a formatted call-stack trace
/// appended after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
#[non_exhaustive]
pub enum PanicReason {
    /// Integer division or modulo by zero.
    DivideByZero = 0x01,
    /// Dereferenced a null pointer.
    NullPointerAccess = 0x02,
    /// `a[i]` with `i` outside `[0, length)`.
    ArrayIndexOutOfBounds = 0x03,
    /// `convertPtr` target type does not match the `auto-ref`'s runtime type.
    InvalidDowncast,
    /// A called function fell off its body without executing a `return`.
    FunctionDidNotReturn,
    /// `callPtr` through a `function-ref` whose `function_id` does not name
    /// a function (zeroed/uninitialized closure).
    InvalidFunctionPointer,
    /// Register file or data stack would grow past its configured bound.
    StackOverflow,
    /// `__newS`/`__newA` could not satisfy the requested allocation.
    AllocationFailure,
    /// A composite value about to be returned aliases the callee's own
    /// stack frame (see [`crate::opcode::RvOp::CheckReturnAddress`]).
    ReturnOfStackReference,
}

impl fmt::Display for PanicReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::DivideByZero => "integer divide by zero",
            Self::NullPointerAccess => "null pointer access",
            Self::ArrayIndexOutOfBounds => "array index out of bounds",
            Self::InvalidDowncast => "failed auto-ref downcast",
            Self::FunctionDidNotReturn => "function didn't return a value",
            Self::InvalidFunctionPointer => "invalid function pointer",
            Self::StackOverflow => "stack overflow",
            Self::AllocationFailure => "allocation failed",
            Self::ReturnOfStackReference => "returning a reference to a stack-allocated object",
        };
        f.write_str(msg)
    }
}
