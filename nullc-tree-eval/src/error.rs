/// Why constant folding gave up on a (sub)expression.
///
/// The source distinguishes `Report` (non-critical: this particular node
/// can't be folded, try the next one / fall back to runtime evaluation)
/// from `ReportCritical` (the expression is definitely invalid — undefined
/// behavior class, like a null-pointer store — so stop speculating
/// entirely). We keep that distinction as a field rather than two
/// functions returning the same `Option<Literal>`, since every caller
/// needs to check it before deciding whether to keep trying sibling
/// expressions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ErrorKind {
    #[error("instruction limit reached")]
    InstructionLimitReached,
    #[error("stack depth limit reached")]
    StackDepthLimitReached,
    #[error("single variable memory limit")]
    VariableMemoryLimitReached,
    #[error("total variable memory limit")]
    TotalMemoryLimitReached,
    #[error("store to null pointer")]
    StoreToNullPointer,
    #[error("load from null pointer")]
    LoadFromNullPointer,
    #[error("integer divide by zero")]
    DivideByZero,
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("unknown intrinsic '{0}'")]
    UnknownIntrinsic(String),
    #[error("{0}")]
    Other(String),
}

impl ErrorKind {
    /// Whether this error class is a definite-UB abort (stop folding
    /// anything further) versus a "couldn't fold this one, move on"
    /// result.
    pub const fn is_critical(&self) -> bool {
        matches!(
            self,
            ErrorKind::StoreToNullPointer
                | ErrorKind::LoadFromNullPointer
                | ErrorKind::DivideByZero
        )
    }
}

/// One reported failure plus whether it should halt the whole fold.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub kind: ErrorKind,
    pub critical: bool,
}

impl EvalError {
    pub fn new(kind: ErrorKind) -> Self {
        let critical = kind.is_critical();
        Self { kind, critical }
    }

    /// Force-mark critical regardless of `kind`'s default, for call sites
    /// that know more about context than the error itself does (e.g. the
    /// source's budget checks always call plain `Report`, never
    /// `ReportCritical`, even though running out of instructions aborts
    /// the fold just as surely).
    pub fn non_critical(kind: ErrorKind) -> Self {
        Self {
            kind,
            critical: false,
        }
    }

    pub fn critical(kind: ErrorKind) -> Self {
        Self {
            kind,
            critical: true,
        }
    }
}

impl core::fmt::Display for EvalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for EvalError {}
