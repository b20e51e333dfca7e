use std::collections::HashMap;

use crate::error::{
    ErrorKind,
    EvalError,
};
use crate::literal::MemoryBlockId;

/// The budgets that bound a single constant-fold attempt, directly
/// grounded in the source's `ExpressionEvalContext` counters. None of
/// these are configurable per-call; they're fixed per evaluator instance
/// so repeated folds within one compilation see the same ceiling.
#[derive(Debug, Clone, Copy)]
pub struct Budgets {
    pub instructions: u32,
    pub stack_depth: u32,
    pub total_memory: u32,
    pub variable_memory: u32,
}

impl Default for Budgets {
    fn default() -> Self {
        // The source's own defaults (`NULLC_PTR_SIZE`-independent);
        // generous enough for real constant expressions, small enough to
        // bound a pathological `for` unrolled at compile time.
        Self {
            instructions: 64 * 1024,
            stack_depth: 256,
            total_memory: 4 * 1024 * 1024,
            variable_memory: 256 * 1024,
        }
    }
}

/// Compile-time evaluator state: instruction/depth/memory budgets, the
/// evaluator's own scratch heap for `Literal::Pointer` storage, and a
/// free list of abandoned blocks reused by size before allocating fresh
/// ones (mirrors `AllocateTypeStorage`'s scan of `ctx.abandonedMemory`).
#[derive(Debug)]
pub struct EvalContext {
    budgets: Budgets,
    instruction: u32,
    stack_depth: u32,
    total_memory: u32,
    blocks: Vec<Vec<u8>>,
    /// Free blocks keyed by size, so a same-sized reuse is O(1) instead of
    /// the source's linear scan — the linear scan was never load-bearing,
    /// just whatever `FastVector` gave it for free.
    abandoned: HashMap<u32, Vec<MemoryBlockId>>,
    /// Which `yield` (0-indexed, in evaluation order) a coroutine resume is
    /// fast-forwarding to; every `yield` reached before it is a no-op.
    yield_target: u32,
    /// How many `yield` nodes have been reached so far this resume.
    yield_seen: u32,
}

impl EvalContext {
    pub fn new(budgets: Budgets) -> Self {
        Self {
            budgets,
            instruction: 0,
            stack_depth: 0,
            total_memory: 0,
            blocks: Vec::new(),
            abandoned: HashMap::new(),
            yield_target: 0,
            yield_seen: 0,
        }
    }

    /// Charges one instruction against the budget; `Err` once exhausted.
    pub fn charge_instruction(&mut self) -> Result<(), EvalError> {
        if self.instruction >= self.budgets.instructions {
            tracing::warn!(limit = self.budgets.instructions, "instruction budget exhausted");
            return Err(EvalError::non_critical(ErrorKind::InstructionLimitReached));
        }
        self.instruction += 1;
        Ok(())
    }

    /// Runs `body` one recursion level deeper, charging the stack-depth
    /// budget for the duration — the fold's recursive-descent analogue of
    /// the source's `stackFrames` bound.
    pub fn with_recursion<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<T, EvalError>,
    ) -> Result<T, EvalError> {
        if self.stack_depth >= self.budgets.stack_depth {
            tracing::warn!(limit = self.budgets.stack_depth, "stack depth budget exhausted");
            return Err(EvalError::non_critical(ErrorKind::StackDepthLimitReached));
        }
        self.stack_depth += 1;
        let result = body(self);
        self.stack_depth -= 1;
        result
    }

    /// Allocates zeroed storage of `size` bytes, reusing an abandoned
    /// block of the exact same size if one is free.
    pub fn allocate_storage(&mut self, size: u32) -> Result<MemoryBlockId, EvalError> {
        if let Some(free) = self.abandoned.get_mut(&size) {
            if let Some(id) = free.pop() {
                self.blocks[id.0 as usize].iter_mut().for_each(|b| *b = 0);
                return Ok(id);
            }
        }

        if size > self.budgets.variable_memory {
            tracing::warn!(size, limit = self.budgets.variable_memory, "single allocation exceeds variable memory limit");
            return Err(EvalError::non_critical(ErrorKind::VariableMemoryLimitReached));
        }
        if self.total_memory + size > self.budgets.total_memory {
            tracing::warn!(
                requested = size,
                used = self.total_memory,
                limit = self.budgets.total_memory,
                "total memory budget exhausted"
            );
            return Err(EvalError::non_critical(ErrorKind::TotalMemoryLimitReached));
        }

        self.total_memory += size;
        let id = MemoryBlockId(self.blocks.len() as u32);
        self.blocks.push(vec![0u8; size as usize]);
        Ok(id)
    }

    /// Returns a block to the free list for reuse, without shrinking the
    /// backing `Vec` (its slot in `self.blocks` stays valid).
    pub fn free_storage(&mut self, block: MemoryBlockId) {
        let size = self.blocks[block.0 as usize].len() as u32;
        self.abandoned.entry(size).or_default().push(block);
    }

    pub fn block_size(&self, block: MemoryBlockId) -> u32 {
        self.blocks[block.0 as usize].len() as u32
    }

    pub fn read_block(&self, block: MemoryBlockId, offset: u32, len: u32) -> &[u8] {
        let start = offset as usize;
        &self.blocks[block.0 as usize][start..start + len as usize]
    }

    pub fn write_block(&mut self, block: MemoryBlockId, offset: u32, data: &[u8]) {
        let start = offset as usize;
        self.blocks[block.0 as usize][start..start + data.len()].copy_from_slice(data);
    }

    pub fn instructions_used(&self) -> u32 {
        self.instruction
    }

    pub fn total_memory_used(&self) -> u32 {
        self.total_memory
    }

    /// Begins evaluating a coroutine body for the resume that should
    /// suspend again at its `target`-th `yield` (0-indexed), fast-forwarding
    /// through every earlier one as a no-op.
    pub fn begin_coroutine_resume(&mut self, target: u32) {
        self.yield_target = target;
        self.yield_seen = 0;
    }

    pub fn yield_target(&self) -> u32 {
        self.yield_target
    }

    pub fn yield_seen(&self) -> u32 {
        self.yield_seen
    }

    /// Records that a `yield` node was reached; returns whether this is the
    /// one the current resume should actually suspend at.
    pub fn advance_yield(&mut self) -> bool {
        let at_target = self.yield_seen == self.yield_target;
        self.yield_seen += 1;
        at_target
    }
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::new(Budgets::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_budget_is_enforced() {
        let mut ctx = EvalContext::new(Budgets {
            instructions: 2,
            ..Budgets::default()
        });
        assert!(ctx.charge_instruction().is_ok());
        assert!(ctx.charge_instruction().is_ok());
        assert_eq!(
            ctx.charge_instruction().unwrap_err().kind,
            ErrorKind::InstructionLimitReached
        );
    }

    #[test]
    fn freed_block_is_reused_before_allocating_fresh() {
        let mut ctx = EvalContext::new(Budgets::default());
        let a = ctx.allocate_storage(16).unwrap();
        ctx.free_storage(a);
        let before = ctx.total_memory_used();
        let b = ctx.allocate_storage(16).unwrap();
        assert_eq!(a, b);
        assert_eq!(ctx.total_memory_used(), before);
    }

    #[test]
    fn coroutine_resume_fast_forwards_through_earlier_yields() {
        let mut ctx = EvalContext::default();
        ctx.begin_coroutine_resume(2);
        assert!(!ctx.advance_yield());
        assert!(!ctx.advance_yield());
        assert!(ctx.advance_yield());
        assert!(!ctx.advance_yield());
    }

    #[test]
    fn variable_memory_limit_rejects_oversized_allocation() {
        let mut ctx = EvalContext::new(Budgets {
            variable_memory: 8,
            ..Budgets::default()
        });
        assert_eq!(
            ctx.allocate_storage(16).unwrap_err().kind,
            ErrorKind::VariableMemoryLimitReached
        );
    }
}
