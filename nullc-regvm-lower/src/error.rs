/// Failure of a single function's lowering. Per the source, this aborts
/// lowering of that function only; the caller decides whether the whole
/// module compile fails or a spill strategy is attempted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LowerError {
    /// The linear-scan allocator ran past register 255 with nothing free
    /// to reuse.
    #[error("register overflow while lowering function {function}")]
    RegisterOverflow { function: u32 },

    /// A jump/branch instruction named a block with no assigned entry
    /// instruction index — a malformed input module, not a resource limit.
    #[error("jump target block {block} was never lowered")]
    UnresolvedBlock { block: u32 },
}
