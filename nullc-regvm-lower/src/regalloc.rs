//! Per-function linear-scan register allocator, grounded in
//! `RegVmLoweredFunction`'s `GetRegister`/`FreeRegister`/`AllocateRegister`
//! family (`InstructionTreeRegVmLower.h`).

use std::collections::HashMap;

use nullc_asm::RegId;

use crate::error::LowerError;
use crate::ir::ValueId;

/// Tracks which physical registers are free, which are delayed-free, and
/// which SSA value (if any) currently owns each live register.
#[derive(Debug)]
pub struct RegisterAllocator {
    function: u32,
    next: u16,
    free: Vec<RegId>,
    delayed_free: Vec<RegId>,
    /// Registers holding a materialized constant, freed in a batch once
    /// the instruction that consumed them is done (`FreeConstantRegisters`).
    constant: Vec<RegId>,
    assignments: HashMap<ValueId, Vec<RegId>>,
    high_water: u16,
}

impl RegisterAllocator {
    pub fn new(function: u32) -> Self {
        Self {
            function,
            next: RegId::FIRST_ALLOCATABLE.raw() as u16,
            free: Vec::new(),
            delayed_free: Vec::new(),
            constant: Vec::new(),
            assignments: HashMap::new(),
            high_water: RegId::FIRST_ALLOCATABLE.raw() as u16,
        }
    }

    /// Highest register index ever handed out; becomes the function's
    /// `reg_vm_registers`.
    pub fn registers_used(&self) -> u32 {
        self.high_water as u32
    }

    /// Pops a freed register or bumps the watermark; `RegisterOverflow`
    /// once the register file (`0..=255`) is exhausted.
    pub fn get_register(&mut self) -> Result<RegId, LowerError> {
        if let Some(reg) = self.free.pop() {
            return Ok(reg);
        }
        if self.next > RegId::MAX as u16 {
            return Err(LowerError::RegisterOverflow {
                function: self.function,
            });
        }
        let reg = RegId::new(self.next as u8);
        self.next += 1;
        self.high_water = self.high_water.max(self.next);
        Ok(reg)
    }

    /// Allocates a run of `count` registers for `value` (not necessarily
    /// contiguous — composite fields are addressed individually, each in
    /// its own register, matching the source's per-field lowering).
    pub fn allocate_value(&mut self, value: ValueId, count: u8) -> Result<Vec<RegId>, LowerError> {
        let mut regs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            regs.push(self.get_register()?);
        }
        self.assignments.insert(value, regs.clone());
        Ok(regs)
    }

    /// Binds `value` to a specific, already-allocated register run (used
    /// by phi-web propagation, which forces every member onto one run).
    pub fn bind_value(&mut self, value: ValueId, regs: Vec<RegId>) {
        self.assignments.insert(value, regs);
    }

    pub fn registers_of(&self, value: ValueId) -> Option<&[RegId]> {
        self.assignments.get(&value).map(Vec::as_slice)
    }

    /// Marks `reg` delayed-free: it becomes reusable only after
    /// [`Self::commit_delayed_frees`] runs at the end of the current
    /// instruction's lowering step, so that step may read `reg` as an
    /// input and write a fresh value to it in the same emission.
    pub fn free_register(&mut self, reg: RegId) {
        self.delayed_free.push(reg);
    }

    pub fn free_value(&mut self, value: ValueId) {
        if let Some(regs) = self.assignments.remove(&value) {
            for reg in regs {
                self.free_register(reg);
            }
        }
    }

    pub fn commit_delayed_frees(&mut self) {
        self.free.append(&mut self.delayed_free);
    }

    /// Registers a scratch register holding a materialized constant, freed
    /// in a batch by [`Self::free_constant_registers`].
    pub fn track_constant_register(&mut self, reg: RegId) {
        self.constant.push(reg);
    }

    pub fn free_constant_registers(&mut self) {
        let mut drained = std::mem::take(&mut self.constant);
        for reg in drained.drain(..) {
            self.free.push(reg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ValueId;

    #[test]
    fn reuses_a_freed_register_before_bumping_the_watermark() {
        let mut alloc = RegisterAllocator::new(0);
        let a = alloc.allocate_value(ValueId(0), 1).unwrap()[0];
        alloc.free_register(a);
        alloc.commit_delayed_frees();
        let b = alloc.allocate_value(ValueId(1), 1).unwrap()[0];
        assert_eq!(a, b);
        assert_eq!(alloc.registers_used(), RegId::FIRST_ALLOCATABLE.raw() as u32 + 1);
    }

    #[test]
    fn delayed_free_is_not_reusable_until_committed() {
        let mut alloc = RegisterAllocator::new(0);
        let a = alloc.allocate_value(ValueId(0), 1).unwrap()[0];
        alloc.free_register(a);
        let b = alloc.allocate_value(ValueId(1), 1).unwrap()[0];
        assert_ne!(a, b);
    }

    #[test]
    fn exhausting_the_register_file_overflows() {
        let mut alloc = RegisterAllocator::new(7);
        let span = RegId::MAX as u32 - RegId::FIRST_ALLOCATABLE.raw() as u32 + 1;
        for i in 0..span {
            alloc.allocate_value(ValueId(i), 1).unwrap();
        }
        let err = alloc.allocate_value(ValueId(span), 1).unwrap_err();
        assert_eq!(err, LowerError::RegisterOverflow { function: 7 });
    }

    #[test]
    fn composite_value_gets_one_register_per_field() {
        let mut alloc = RegisterAllocator::new(0);
        let regs = alloc.allocate_value(ValueId(0), 3).unwrap();
        assert_eq!(regs.len(), 3);
        assert_eq!(alloc.registers_of(ValueId(0)).unwrap(), regs.as_slice());
    }
}
