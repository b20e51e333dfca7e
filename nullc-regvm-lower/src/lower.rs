//! Block-by-block lowering: walks each function in layout order, assigns
//! registers, emits [`RegVmCmd`]s, and back-patches jump targets once every
//! block's address is known (spec.md §4.2, "Block lowering"/"Finalization").

use std::collections::HashMap;

use nullc_asm::{
    op,
    RegId,
    RegVmCmd,
    RvOp,
    RvReturnKind,
};
use nullc_metadata::{
    SourceLocation,
    SourceMap,
};
use nullc_types::layout;

use crate::error::LowerError;
use crate::ir::{
    operands,
    BinOp,
    BlockId,
    CompositeShape,
    Function,
    Instr,
    Module,
    ValueDef,
    ValueId,
    VmType,
};
use crate::phi::legalize_phis;
use crate::regalloc::RegisterAllocator;

/// One function's lowered code plus the linker-table fields it produces.
#[derive(Debug)]
pub struct LoweredFunction {
    pub reg_vm_address: u32,
    pub reg_vm_code_size: u32,
    pub reg_vm_registers: u32,
    pub frame_size: u32,
}

/// A whole module's lowered code, laid out back to back, ready to become
/// `Metadata::code`/`Metadata::constants`.
#[derive(Debug)]
pub struct LoweredModule {
    pub code: Vec<RegVmCmd>,
    pub constants: Vec<u64>,
    pub functions: Vec<LoweredFunction>,
    pub source_map: SourceMap,
}

/// Lowers every function in `module`, then patches jump targets and the
/// leading `rviJmp` at offset 0 to `global_code_entry`.
pub fn lower_module(module: &mut Module, global_code_entry: u32) -> Result<LoweredModule, LowerError> {
    tracing::debug!(functions = module.functions.len(), "lowering module");
    let mut code = Vec::new();
    let mut constants = Vec::new();
    let mut source_map = SourceMap::default();
    let mut functions = Vec::with_capacity(module.functions.len());

    for (index, func) in module.functions.iter_mut().enumerate() {
        let phi_count = legalize_phis(func).len();
        if phi_count > 0 {
            tracing::trace!(function = index, phi_count, "legalized phis");
        }
        let base = code.len() as u32;
        let lowered = lower_function(index as u32, func, base, &mut constants).inspect_err(|err| {
            tracing::debug!(function = index, %err, "lowering failed");
        })?;
        for location in lowered.locations {
            source_map.push(location);
        }
        functions.push(LoweredFunction {
            reg_vm_address: base,
            reg_vm_code_size: lowered.code.len() as u32,
            reg_vm_registers: lowered.registers_used,
            frame_size: func.frame_size,
        });
        code.extend(lowered.code);
    }

    if code.first().map(|c| c.code) == Some(RvOp::Jump) {
        code[0] = op::jump(global_code_entry);
    }

    Ok(LoweredModule {
        code,
        constants,
        functions,
        source_map,
    })
}

struct FunctionLowering {
    code: Vec<RegVmCmd>,
    locations: Vec<SourceLocation>,
    registers_used: u32,
}

/// Interns a long/double constant (by raw bits), reusing an existing
/// matching entry rather than duplicating it.
fn intern_constant(constants: &mut Vec<u64>, bits: u64) -> u32 {
    if let Some(pos) = constants.iter().position(|&c| c == bits) {
        return pos as u32;
    }
    constants.push(bits);
    (constants.len() - 1) as u32
}

fn lower_function(
    function_index: u32,
    func: &Function,
    base_address: u32,
    constants: &mut Vec<u64>,
) -> Result<FunctionLowering, LowerError> {
    let mut alloc = RegisterAllocator::new(function_index);
    let mut code = Vec::new();
    let mut locations = Vec::new();
    // (position in `code`, target block) to back-patch once every block's
    // address is known.
    let mut fixups: Vec<(usize, BlockId)> = Vec::new();
    let mut block_addr = HashMap::new();
    let last_use = compute_last_use(func);

    for (block_idx, block) in func.blocks.iter().enumerate() {
        let block_id = BlockId(block_idx as u32);
        block_addr.insert(block_id, base_address + code.len() as u32);
        let next_block = func.blocks.get(block_idx + 1).map(|_| BlockId(block_idx as u32 + 1));

        for &value_id in &block.values {
            let def = func.value(value_id);
            locations.push(SourceLocation {
                instruction: base_address + code.len() as u32,
                source_offset: 0,
                line: value_id.index() as u32,
            });

            lower_value(
                func,
                &mut alloc,
                value_id,
                def,
                next_block,
                &mut code,
                &mut fixups,
                constants,
            )?;

            for operand in operands(&def.instr) {
                if last_use.get(&operand) == Some(&value_id) {
                    alloc.free_value(operand);
                }
            }
            alloc.commit_delayed_frees();
        }
    }

    for (at, target) in fixups {
        let addr = *block_addr
            .get(&target)
            .ok_or(LowerError::UnresolvedBlock { block: target.0 })?;
        code[at].argument = addr;
    }

    Ok(FunctionLowering {
        code,
        locations,
        registers_used: alloc.registers_used(),
    })
}

/// The last instruction (by layout order) that consumes each value, so its
/// register can be freed right after that instruction is lowered.
fn compute_last_use(func: &Function) -> HashMap<ValueId, ValueId> {
    let mut last = HashMap::new();
    for block in &func.blocks {
        for &value_id in &block.values {
            for operand in operands(&func.value(value_id).instr) {
                last.insert(operand, value_id);
            }
        }
    }
    last
}

fn composite_fields(shape: CompositeShape) -> Vec<(u32, bool)> {
    // (byte offset, is_pointer_width)
    use layout::*;
    match shape {
        CompositeShape::FunctionRef => vec![
            (function_ref::CONTEXT_PTR_OFFSET as u32, true),
            (function_ref::FUNCTION_ID_OFFSET as u32, false),
        ],
        CompositeShape::UnsizedArrayRef => vec![
            (unsized_array_ref::ELEMENT_PTR_OFFSET as u32, true),
            (unsized_array_ref::LENGTH_OFFSET as u32, false),
        ],
        CompositeShape::AutoRef => vec![
            (auto_ref::TYPE_ID_OFFSET as u32, false),
            (auto_ref::TARGET_PTR_OFFSET as u32, true),
        ],
        CompositeShape::AutoArray => vec![
            (auto_array::TYPE_ID_OFFSET as u32, false),
            (auto_array::ELEMENT_PTR_OFFSET as u32, true),
            (auto_array::LENGTH_OFFSET as u32, false),
        ],
        CompositeShape::Opaque { registers } => (0..registers).map(|i| (i as u32 * 8, true)).collect(),
    }
}

fn lower_value(
    func: &Function,
    alloc: &mut RegisterAllocator,
    value_id: ValueId,
    def: &ValueDef,
    next_block: Option<BlockId>,
    code: &mut Vec<RegVmCmd>,
    fixups: &mut Vec<(usize, BlockId)>,
    constants: &mut Vec<u64>,
) -> Result<(), LowerError> {
    match &def.instr {
        Instr::ConstInt(v) => {
            let reg = alloc.allocate_value(value_id, 1)?[0];
            code.push(op::imm_int(reg, *v));
        }
        Instr::ConstLong(v) => {
            let reg = alloc.allocate_value(value_id, 1)?[0];
            let idx = intern_constant(constants, *v as u64);
            code.push(op::imm_long(reg, idx));
        }
        Instr::ConstDouble(v) => {
            let reg = alloc.allocate_value(value_id, 1)?[0];
            let idx = intern_constant(constants, v.to_bits());
            code.push(op::imm_double(reg, idx));
        }
        Instr::LoadLocal { offset } => {
            lower_load_local(alloc, value_id, def.ty, *offset, code)?;
        }
        Instr::StoreLocal { offset, value } => {
            lower_store_local(func, alloc, *value, *offset, code)?;
        }
        Instr::Binary { op: bin_op, lhs, rhs } => {
            let lhs_reg = reg_of(alloc, *lhs)?[0];
            let rhs_reg = reg_of(alloc, *rhs)?[0];
            let dst = alloc.allocate_value(value_id, 1)?[0];
            code.push(lower_binary(*bin_op, func.value(*lhs).ty, dst, lhs_reg, rhs_reg));
        }
        Instr::Phi { .. } => unreachable!("phis are legalized away before lowering"),
        Instr::Call { function, args } => {
            for &arg in args {
                push_argument(func, alloc, arg, code, constants)?;
            }
            let kind = return_kind(&def.ty);
            let dst = match def.ty {
                VmType::Void | VmType::Composite { .. } => RegId::new(0),
                _ => alloc.allocate_value(value_id, 1)?[0],
            };
            code.push(op::call(dst, kind as u8, function.raw()));
            if let VmType::Composite { .. } = def.ty {
                let regs = alloc.allocate_value(value_id, def.ty.register_count())?;
                for reg in regs {
                    code.push(op::pop_temp(reg, 8));
                }
            }
        }
        Instr::Index { base, index, element_size, array_size } => {
            let base_reg = reg_of(alloc, *base)?[0];
            let index_reg = reg_of(alloc, *index)?[0];
            let dst = alloc.allocate_value(value_id, 1)?[0];
            let bound = array_size.unwrap_or(0) as u16;
            code.push(op::index(dst, base_reg, index_reg, bound, (*element_size) as u16));
        }
        Instr::ConvertPointer { value, target_type } => {
            let src = reg_of(alloc, *value)?[0];
            let dst = alloc.allocate_value(value_id, 1)?[0];
            code.push(op::convert_ptr(dst, src, target_type.raw()));
        }
        Instr::Jump { target } => {
            if Some(*target) != next_block {
                fixups.push((code.len(), *target));
                code.push(op::jump(target.0));
            }
        }
        Instr::Branch { cond, if_true, if_false } => {
            let cond_reg = reg_of(alloc, *cond)?[0];
            if Some(*if_false) == next_block {
                fixups.push((code.len(), *if_true));
                code.push(op::jump_if_not_zero(cond_reg, if_true.0));
            } else if Some(*if_true) == next_block {
                fixups.push((code.len(), *if_false));
                code.push(op::jump_if_zero(cond_reg, if_false.0));
            } else {
                fixups.push((code.len(), *if_true));
                code.push(op::jump_if_not_zero(cond_reg, if_true.0));
                fixups.push((code.len(), *if_false));
                code.push(op::jump(if_false.0));
            }
        }
        Instr::Return { value } => {
            let (kind, ra, size) = match value {
                None => (RvReturnKind::Void, RegId::new(0), 0),
                Some(v) => {
                    let ty = func.value(*v).ty;
                    match ty {
                        VmType::Composite { .. } => {
                            let regs = reg_of(alloc, *v)?.to_vec();
                            for &r in &regs {
                                code.push(op::push_temp(r, 8));
                            }
                            (RvReturnKind::Composite, RegId::new(0), regs.len() as u32 * 8)
                        }
                        _ => (return_kind(&ty), reg_of(alloc, *v)?[0], 0),
                    }
                }
            };
            code.push(op::ret(ra, kind as u8, size));
        }
    }
    Ok(())
}

fn reg_of(alloc: &RegisterAllocator, value: ValueId) -> Result<&[RegId], LowerError> {
    Ok(alloc
        .registers_of(value)
        .expect("operand lowered before its definition (not in layout/dominance order)"))
}

fn return_kind(ty: &VmType) -> RvReturnKind {
    match ty {
        VmType::Void => RvReturnKind::Void,
        VmType::Int => RvReturnKind::Int,
        VmType::Long | VmType::Pointer => RvReturnKind::Long,
        VmType::Double => RvReturnKind::Double,
        VmType::Composite { .. } => RvReturnKind::Composite,
    }
}

fn lower_binary(op: BinOp, operand_ty: VmType, dst: RegId, a: RegId, b: RegId) -> RegVmCmd {
    use crate::ir::BinOp::*;
    match operand_ty {
        VmType::Double => match op {
            Add => op::add_double(dst, a, b),
            Sub => op::sub_double(dst, a, b),
            Mul => op::mul_double(dst, a, b),
            Div => op::div_double(dst, a, b),
            Less => op::less_double(dst, a, b),
            Greater => op::greater_double(dst, a, b),
            LessEqual => op::less_equal_double(dst, a, b),
            GreaterEqual => op::greater_equal_double(dst, a, b),
            Equal => op::equal_double(dst, a, b),
            NotEqual => op::not_equal_double(dst, a, b),
            Mod | BitAnd | BitOr | BitXor | Shl | Shr => {
                unreachable!("no double bitwise/modulo opcode; rejected ahead of lowering")
            }
        },
        VmType::Long | VmType::Pointer => match op {
            Add => op::add_long(dst, a, b),
            Sub => op::sub_long(dst, a, b),
            Mul => op::mul_long(dst, a, b),
            Div => op::div_long(dst, a, b),
            Mod => op::mod_long(dst, a, b),
            BitAnd => op::bit_and_long(dst, a, b),
            BitOr => op::bit_or_long(dst, a, b),
            BitXor => op::bit_xor_long(dst, a, b),
            Shl => op::shl_long(dst, a, b),
            Shr => op::shr_long(dst, a, b),
            Less => op::less_long(dst, a, b),
            Greater => op::greater_long(dst, a, b),
            LessEqual => op::less_equal_long(dst, a, b),
            GreaterEqual => op::greater_equal_long(dst, a, b),
            Equal => op::equal_long(dst, a, b),
            NotEqual => op::not_equal_long(dst, a, b),
        },
        _ => match op {
            Add => op::add_int(dst, a, b),
            Sub => op::sub_int(dst, a, b),
            Mul => op::mul_int(dst, a, b),
            Div => op::div_int(dst, a, b),
            Mod => op::mod_int(dst, a, b),
            BitAnd => op::bit_and_int(dst, a, b),
            BitOr => op::bit_or_int(dst, a, b),
            BitXor => op::bit_xor_int(dst, a, b),
            Shl => op::shl_int(dst, a, b),
            Shr => op::shr_int(dst, a, b),
            Less => op::less_int(dst, a, b),
            Greater => op::greater_int(dst, a, b),
            LessEqual => op::less_equal_int(dst, a, b),
            GreaterEqual => op::greater_equal_int(dst, a, b),
            Equal => op::equal_int(dst, a, b),
            NotEqual => op::not_equal_int(dst, a, b),
        },
    }
}

fn lower_load_local(
    alloc: &mut RegisterAllocator,
    value_id: ValueId,
    ty: VmType,
    offset: u32,
    code: &mut Vec<RegVmCmd>,
) -> Result<(), LowerError> {
    match ty {
        VmType::Void => {}
        VmType::Int => {
            let reg = alloc.allocate_value(value_id, 1)?[0];
            code.push(op::load_dword(reg, RegId::FRAME, offset));
        }
        VmType::Long | VmType::Pointer => {
            let reg = alloc.allocate_value(value_id, 1)?[0];
            code.push(op::load_long(reg, RegId::FRAME, offset));
        }
        VmType::Double => {
            let reg = alloc.allocate_value(value_id, 1)?[0];
            code.push(op::load_double(reg, RegId::FRAME, offset));
        }
        VmType::Composite { shape, .. } => {
            let regs = alloc.allocate_value(value_id, shape.register_count())?;
            for (reg, (field_offset, is_ptr)) in regs.into_iter().zip(composite_fields(shape)) {
                if is_ptr {
                    code.push(op::load_long(reg, RegId::FRAME, offset + field_offset));
                } else {
                    code.push(op::load_dword(reg, RegId::FRAME, offset + field_offset));
                }
            }
        }
    }
    Ok(())
}

fn lower_store_local(
    func: &Function,
    alloc: &mut RegisterAllocator,
    value: ValueId,
    offset: u32,
    code: &mut Vec<RegVmCmd>,
) -> Result<(), LowerError> {
    let ty = func.value(value).ty;
    match ty {
        VmType::Void => {}
        VmType::Int => {
            let reg = reg_of(alloc, value)?[0];
            code.push(op::store_dword(reg, RegId::FRAME, offset));
        }
        VmType::Long | VmType::Pointer => {
            let reg = reg_of(alloc, value)?[0];
            code.push(op::store_long(reg, RegId::FRAME, offset));
        }
        VmType::Double => {
            let reg = reg_of(alloc, value)?[0];
            code.push(op::store_double(reg, RegId::FRAME, offset));
        }
        VmType::Composite { shape, .. } => {
            let regs = reg_of(alloc, value)?.to_vec();
            for (reg, (field_offset, is_ptr)) in regs.into_iter().zip(composite_fields(shape)) {
                if is_ptr {
                    code.push(op::store_long(reg, RegId::FRAME, offset + field_offset));
                } else {
                    code.push(op::store_dword(reg, RegId::FRAME, offset + field_offset));
                }
            }
        }
    }
    Ok(())
}

/// Pushes one call argument to the temp stack, in declaration order; a
/// constant argument uses the dedicated `pushImm`/`pushImmq` forms instead
/// of round-tripping through a scratch register.
fn push_argument(
    func: &Function,
    alloc: &mut RegisterAllocator,
    value: ValueId,
    code: &mut Vec<RegVmCmd>,
    constants: &mut Vec<u64>,
) -> Result<(), LowerError> {
    match &func.value(value).instr {
        Instr::ConstInt(v) => {
            code.push(op::push_imm(*v));
            return Ok(());
        }
        Instr::ConstLong(v) => {
            let idx = intern_constant(constants, *v as u64);
            code.push(op::push_imm_long(idx));
            return Ok(());
        }
        _ => {}
    }

    let ty = func.value(value).ty;
    match ty {
        VmType::Composite { .. } => {
            for &reg in reg_of(alloc, value)? {
                code.push(op::push_temp(reg, 8));
            }
        }
        _ => {
            let reg = reg_of(alloc, value)?[0];
            let size = if matches!(ty, VmType::Int) { 4 } else { 8 };
            code.push(op::push_temp(reg, size));
        }
    }
    Ok(())
}
