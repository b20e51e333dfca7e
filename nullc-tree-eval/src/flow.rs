use crate::literal::Literal;

/// What a folded node produced: a plain value, or one of the non-local
/// control-flow signals a statement-position node can raise. Kept separate
/// from [`crate::EvalError`] because none of these are failures — a
/// `break` reaching its loop is the expected, successful outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Value(Literal),
    Break(u32),
    Continue(u32),
    Return(Literal),
    Yield(Literal),
}

impl Flow {
    /// Unwraps a flow that's required to already be resolved to a plain
    /// value, the way an expression-position operand must be — arithmetic
    /// can't embed a `break`. `Return`/`Yield` still unwrap to their
    /// carried value, since a folded `return`/`yield` used as a value (the
    /// evaluator's own top-level result) is meaningful; only `Break`/
    /// `Continue` escaping into a value position is a genuine error.
    pub fn into_value(self) -> Result<Literal, &'static str> {
        match self {
            Flow::Value(v) | Flow::Return(v) | Flow::Yield(v) => Ok(v),
            Flow::Break(_) => Err("break used in value position"),
            Flow::Continue(_) => Err("continue used in value position"),
        }
    }
}
