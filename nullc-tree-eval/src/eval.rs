use nullc_metadata::{
    Metadata,
    TypeCategory,
};
use nullc_types::{
    FunctionIndex,
    TypeIndex,
};

use crate::context::EvalContext;
use crate::error::{
    ErrorKind,
    EvalError,
};
use crate::expr::{
    Arena,
    BinaryOp,
    ConstExpr,
    NodeId,
    UnaryOp,
};
use crate::flow::Flow;
use crate::literal::{
    Literal,
    MemoryBlockId,
};

/// Folds `node` to a [`Literal`], the way a single non-coroutine constant
/// expression is evaluated: a trailing `return`/`yield` resolves to its
/// carried value, and a `break`/`continue` that escapes every enclosing
/// loop is an error rather than a silently-swallowed signal.
pub fn evaluate(
    ctx: &mut EvalContext,
    meta: &Metadata,
    arena: &Arena,
    node: NodeId,
) -> Result<Literal, EvalError> {
    match eval_flow(ctx, meta, arena, node)? {
        Flow::Value(v) | Flow::Return(v) | Flow::Yield(v) => Ok(v),
        Flow::Break(_) => Err(EvalError::critical(ErrorKind::Other("break escaped every enclosing loop".into()))),
        Flow::Continue(_) => Err(EvalError::critical(ErrorKind::Other("continue escaped every enclosing loop".into()))),
    }
}

/// Resumes a coroutine body, fast-forwarding through every `yield` before
/// the `resume_at`-th one (0-indexed) as a no-op and returning the `Flow`
/// reached at or after it — `Flow::Yield` if it suspended again,
/// `Flow::Return`/`Flow::Value` if the body ran to completion instead.
pub fn evaluate_coroutine(
    ctx: &mut EvalContext,
    meta: &Metadata,
    arena: &Arena,
    node: NodeId,
    resume_at: u32,
) -> Result<Flow, EvalError> {
    ctx.begin_coroutine_resume(resume_at);
    eval_flow(ctx, meta, arena, node)
}

/// Folds `node` (and its operands, recursively) to a [`Flow`], or the
/// first error hit. Every recursive step charges both the instruction and
/// stack-depth budgets, matching `AddInstruction` plus the source's
/// implicit native call-stack bound on recursive evaluation.
fn eval_flow(
    ctx: &mut EvalContext,
    meta: &Metadata,
    arena: &Arena,
    node: NodeId,
) -> Result<Flow, EvalError> {
    ctx.charge_instruction()?;

    ctx.with_recursion(|ctx| match arena.get(node).clone() {
        ConstExpr::Literal(value) => Ok(Flow::Value(value)),
        ConstExpr::TypeOf(type_index) => Ok(Flow::Value(Literal::TypeLiteral(type_index))),
        ConstExpr::TypeCount => Ok(Flow::Value(Literal::Int(meta.type_list().len() as i32))),
        ConstExpr::Unary { op, operand } => {
            let value = eval_value(ctx, meta, arena, operand)?;
            eval_unary(op, value).map(Flow::Value)
        }
        ConstExpr::Binary { op, lhs, rhs } => {
            let lhs = eval_value(ctx, meta, arena, lhs)?;
            let rhs = eval_value(ctx, meta, arena, rhs)?;
            eval_binary(op, lhs, rhs).map(Flow::Value)
        }
        ConstExpr::Block(statements) => {
            let mut last = Literal::Void;
            for statement in statements {
                match eval_flow(ctx, meta, arena, statement)? {
                    Flow::Value(v) => last = v,
                    other => return Ok(other),
                }
            }
            Ok(Flow::Value(last))
        }
        ConstExpr::If { cond, then_branch, else_branch } => {
            let cond = expect_bool(eval_value(ctx, meta, arena, cond)?)?;
            if cond {
                eval_flow(ctx, meta, arena, then_branch)
            } else if let Some(else_branch) = else_branch {
                eval_flow(ctx, meta, arena, else_branch)
            } else {
                Ok(Flow::Value(Literal::Void))
            }
        }
        ConstExpr::Loop { cond, body } => {
            loop {
                if let Some(cond) = cond {
                    if !expect_bool(eval_value(ctx, meta, arena, cond)?)? {
                        break;
                    }
                }
                match eval_flow(ctx, meta, arena, body)? {
                    Flow::Value(_) => {}
                    Flow::Continue(0) => continue,
                    Flow::Continue(n) => return Ok(Flow::Continue(n - 1)),
                    Flow::Break(0) => break,
                    Flow::Break(n) => return Ok(Flow::Break(n - 1)),
                    other @ (Flow::Return(_) | Flow::Yield(_)) => return Ok(other),
                }
            }
            Ok(Flow::Value(Literal::Void))
        }
        ConstExpr::Break(depth) => Ok(Flow::Break(depth)),
        ConstExpr::Continue(depth) => Ok(Flow::Continue(depth)),
        ConstExpr::Return(value) => {
            let value = match value {
                Some(node) => eval_value(ctx, meta, arena, node)?,
                None => Literal::Void,
            };
            Ok(Flow::Return(value))
        }
        ConstExpr::Yield(value) => {
            let value = match value {
                Some(node) => eval_value(ctx, meta, arena, node)?,
                None => Literal::Void,
            };
            if ctx.advance_yield() {
                Ok(Flow::Yield(value))
            } else {
                // Fast-forwarding through an already-resumed-past yield: the
                // source's InstructionTreeVmEval skips straight past these,
                // they never contribute a value to the surrounding block.
                Ok(Flow::Value(Literal::Void))
            }
        }
        ConstExpr::Intrinsic { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_value(ctx, meta, arena, arg)?);
            }
            eval_intrinsic(ctx, meta, &name, &values).map(Flow::Value)
        }
    })
}

/// Evaluates `node` in a position that must already be a plain value —
/// arithmetic operands, conditions, intrinsic arguments — converting a
/// `break`/`continue` that surfaces there into an error instead of letting
/// it silently vanish.
fn eval_value(
    ctx: &mut EvalContext,
    meta: &Metadata,
    arena: &Arena,
    node: NodeId,
) -> Result<Literal, EvalError> {
    eval_flow(ctx, meta, arena, node)?
        .into_value()
        .map_err(|msg| EvalError::critical(ErrorKind::Other(msg.to_string())))
}

fn expect_bool(value: Literal) -> Result<bool, EvalError> {
    match value {
        Literal::Bool(b) => Ok(b),
        other => Err(EvalError::non_critical(ErrorKind::TypeMismatch {
            expected: "bool",
            found: other.type_name(),
        })),
    }
}

fn expect_type(value: &Literal) -> Result<TypeIndex, EvalError> {
    match value {
        Literal::TypeLiteral(t) => Ok(*t),
        other => Err(EvalError::non_critical(ErrorKind::TypeMismatch {
            expected: "typeid",
            found: other.type_name(),
        })),
    }
}

fn expect_i32(value: &Literal) -> Result<i32, EvalError> {
    value.as_i64().map(|v| v as i32).ok_or_else(|| {
        EvalError::non_critical(ErrorKind::TypeMismatch {
            expected: "integer",
            found: value.type_name(),
        })
    })
}

/// A pointer literal's block/offset, with `Null` reported separately since
/// several intrinsics treat a null argument as a valid passthrough rather
/// than an error.
fn expect_pointer(value: &Literal) -> Result<(MemoryBlockId, u32), EvalError> {
    match value {
        Literal::Pointer { block, offset, .. } => Ok((*block, *offset)),
        other => Err(EvalError::non_critical(ErrorKind::TypeMismatch {
            expected: "pointer",
            found: other.type_name(),
        })),
    }
}

fn read_u32(ctx: &EvalContext, block: MemoryBlockId, offset: u32) -> u32 {
    let bytes = ctx.read_block(block, offset, 4);
    u32::from_le_bytes(bytes.try_into().expect("4-byte field"))
}

fn read_i32(ctx: &EvalContext, block: MemoryBlockId, offset: u32) -> i32 {
    read_u32(ctx, block, offset) as i32
}

fn write_u32(ctx: &mut EvalContext, block: MemoryBlockId, offset: u32, value: u32) {
    ctx.write_block(block, offset, &value.to_le_bytes());
}

fn write_i32(ctx: &mut EvalContext, block: MemoryBlockId, offset: u32, value: i32) {
    write_u32(ctx, block, offset, value as u32);
}

/// A compile-time-allocated-block analogue of a raw pointer field: the
/// target block id, with `u32::MAX` standing in for null since real block
/// ids never reach that value within one fold's memory budget.
fn read_ref(ctx: &EvalContext, block: MemoryBlockId, offset: u32) -> Option<(MemoryBlockId, u32)> {
    let target_block = read_u32(ctx, block, offset);
    if target_block == u32::MAX {
        return None;
    }
    Some((MemoryBlockId(target_block), read_u32(ctx, block, offset + 4)))
}

fn write_ref(ctx: &mut EvalContext, block: MemoryBlockId, offset: u32, target: Option<(MemoryBlockId, u32)>) {
    match target {
        Some((target_block, target_offset)) => {
            write_u32(ctx, block, offset, target_block.0);
            write_u32(ctx, block, offset + 4, target_offset);
        }
        None => {
            write_u32(ctx, block, offset, u32::MAX);
            write_u32(ctx, block, offset + 4, 0);
        }
    }
}

/// Dispatches one of the fixed compiler intrinsics the linker wires every
/// NULLC module against (`__newS`/`__newA` for `new`, `auto_array`/
/// `array_copy` for array-to-array assignment, `assert_derived_from_base`
/// for a checked downcast, `__assertCoroutine`/`isCoroutineReset` and
/// `__closeUpvalue` for coroutine/closure support). Unrecognized names are
/// a genuine error, not a silent no-op: the linker never emits a call to
/// an intrinsic this evaluator doesn't know how to fold.
fn eval_intrinsic(ctx: &mut EvalContext, meta: &Metadata, name: &str, args: &[Literal]) -> Result<Literal, EvalError> {
    match name {
        // `new T` on a single instance: size in bytes -> a zeroed block.
        "__newS" => {
            let size = expect_i32(args.get(0).ok_or_else(missing_arg)?)?;
            let block = ctx.allocate_storage(size as u32)?;
            Ok(Literal::Pointer { block, offset: 0, size: size as u32 })
        }
        // `new T[n]`: element size and count -> a zeroed block sized for
        // the whole array.
        "__newA" => {
            let element_size = expect_i32(args.get(0).ok_or_else(missing_arg)?)?;
            let count = expect_i32(args.get(1).ok_or_else(missing_arg)?)?;
            let size = (element_size as u32).saturating_mul(count as u32);
            let block = ctx.allocate_storage(size)?;
            Ok(Literal::Pointer { block, offset: 0, size })
        }
        // Materializes an `auto[]` reference: `{ type_id, element_ptr, length }`.
        "auto_array" => {
            let type_index = expect_type(args.get(0).ok_or_else(missing_arg)?)?;
            let (element_block, element_offset) = expect_pointer(args.get(1).ok_or_else(missing_arg)?)?;
            let length = expect_i32(args.get(2).ok_or_else(missing_arg)?)?;

            let block = ctx.allocate_storage(nullc_types::layout::auto_array::SIZE)?;
            write_i32(ctx, block, nullc_types::layout::auto_array::TYPE_ID_OFFSET as u32, type_index.raw() as i32);
            write_ref(
                ctx,
                block,
                nullc_types::layout::auto_array::ELEMENT_PTR_OFFSET as u32,
                Some((element_block, element_offset)),
            );
            write_i32(ctx, block, nullc_types::layout::auto_array::LENGTH_OFFSET as u32, length);
            Ok(Literal::Pointer { block, offset: 0, size: nullc_types::layout::auto_array::SIZE })
        }
        // `auto[] dst = src;`: same element type, `dst` at least as long,
        // element-wise copy; same location is a no-op.
        "array_copy" => {
            let (dst_block, dst_offset) = expect_pointer(args.get(0).ok_or_else(missing_arg)?)?;
            let (src_block, src_offset) = expect_pointer(args.get(1).ok_or_else(missing_arg)?)?;

            let dst_type = read_i32(ctx, dst_block, dst_offset + nullc_types::layout::auto_array::TYPE_ID_OFFSET as u32);
            let src_type = read_i32(ctx, src_block, src_offset + nullc_types::layout::auto_array::TYPE_ID_OFFSET as u32);
            if dst_type != src_type {
                return Err(EvalError::critical(ErrorKind::Other("array_copy: element type mismatch".into())));
            }

            let dst_len = read_i32(ctx, dst_block, dst_offset + nullc_types::layout::auto_array::LENGTH_OFFSET as u32);
            let src_len = read_i32(ctx, src_block, src_offset + nullc_types::layout::auto_array::LENGTH_OFFSET as u32);
            if dst_len < src_len {
                return Err(EvalError::critical(ErrorKind::Other("array_copy: destination array too small".into())));
            }

            let dst_elem = read_ref(ctx, dst_block, dst_offset + nullc_types::layout::auto_array::ELEMENT_PTR_OFFSET as u32);
            let src_elem = read_ref(ctx, src_block, src_offset + nullc_types::layout::auto_array::ELEMENT_PTR_OFFSET as u32);
            if dst_elem == src_elem {
                return Ok(Literal::Void);
            }

            let element_type = meta
                .get_type(TypeIndex::new(dst_type as u32))
                .map_err(|e| EvalError::critical(ErrorKind::Other(e.to_string())))?
                .subtype;
            let element_size = meta
                .get_type(element_type)
                .map_err(|e| EvalError::critical(ErrorKind::Other(e.to_string())))?
                .size;
            let total_bytes = element_size * src_len.max(0) as u32;

            if let (Some((sb, so)), Some((db, do_))) = (src_elem, dst_elem) {
                let bytes = ctx.read_block(sb, so, total_bytes).to_vec();
                ctx.write_block(db, do_, &bytes);
            }
            Ok(Literal::Void)
        }
        // Checked downcast: walks the `subtype` base-class chain looking
        // for `base`; a null pointer always passes.
        "assert_derived_from_base" => {
            let target = args.get(0).ok_or_else(missing_arg)?;
            let base = expect_type(args.get(1).ok_or_else(missing_arg)?)?;
            if target.is_null() {
                return Ok(Literal::Bool(true));
            }
            let (block, offset) = expect_pointer(target)?;
            let mut current = TypeIndex::new(read_i32(ctx, block, offset + nullc_types::layout::auto_ref::TYPE_ID_OFFSET as u32) as u32);
            loop {
                if current == base {
                    return Ok(Literal::Bool(true));
                }
                let descriptor = meta
                    .get_type(current)
                    .map_err(|e| EvalError::critical(ErrorKind::Other(e.to_string())))?;
                if descriptor.category != TypeCategory::Class || descriptor.subtype.is_none() {
                    return Ok(Literal::Bool(false));
                }
                current = descriptor.subtype;
            }
        }
        // Validates a `funcAddr` reference targets a coroutine function
        // before the interpreter is asked to resume it.
        "__assertCoroutine" => {
            let (block, offset) = expect_pointer(args.get(0).ok_or_else(missing_arg)?)?;
            let function_id = read_i32(ctx, block, offset + nullc_types::layout::function_ref::FUNCTION_ID_OFFSET as u32);
            let descriptor = meta
                .get_function(FunctionIndex::new(function_id as u32))
                .map_err(|e| EvalError::critical(ErrorKind::Other(e.to_string())))?;
            if !descriptor.is_coroutine {
                return Err(EvalError::critical(ErrorKind::Other("target function is not a coroutine".into())));
            }
            Ok(Literal::Bool(true))
        }
        // True until the coroutine's first resume point has been reached,
        // i.e. this is a fresh (never-yielded) coroutine instance.
        "isCoroutineReset" => {
            let (block, offset) = expect_pointer(args.get(0).ok_or_else(missing_arg)?)?;
            let function_id = read_i32(ctx, block, offset + nullc_types::layout::function_ref::FUNCTION_ID_OFFSET as u32);
            meta.get_function(FunctionIndex::new(function_id as u32))
                .map_err(|e| EvalError::critical(ErrorKind::Other(e.to_string())))?;
            Ok(Literal::Bool(ctx.yield_seen() == 0))
        }
        // Copies a captured variable's current value into every open
        // upvalue still pointing at its stack slot, detaching each from
        // that slot (`target = copy; next = None`), and keeps walking past
        // the match since more than one upvalue can capture the same
        // variable. Takes the same four-argument shape as the source's
        // `offsetToCopy`/`copySize` pair, but since our upvalue record has
        // no inline storage slot to copy into at `upvalue + offsetToCopy`,
        // the detached copy is a fresh block instead; `args[2]`
        // (`offsetToCopy`) is accepted for call-site parity and unused.
        "__closeUpvalue" => {
            let head = args.get(0).ok_or_else(missing_arg)?;
            let variable = expect_pointer(args.get(1).ok_or_else(missing_arg)?)?;
            let copy_size = expect_i32(args.get(3).ok_or_else(missing_arg)?)? as u32;

            if head.is_null() {
                return Ok(Literal::Void);
            }
            let (mut block, mut offset) = expect_pointer(head)?;
            loop {
                const TARGET_OFFSET: u32 = 0;
                const NEXT_OFFSET: u32 = 8;

                let target = read_ref(ctx, block, offset + TARGET_OFFSET);
                let next = read_ref(ctx, block, offset + NEXT_OFFSET);

                if target == Some(variable) {
                    let bytes = ctx.read_block(variable.0, variable.1, copy_size).to_vec();
                    let copy = ctx.allocate_storage(copy_size)?;
                    ctx.write_block(copy, 0, &bytes);
                    write_ref(ctx, block, offset + TARGET_OFFSET, Some((copy, 0)));
                    write_ref(ctx, block, offset + NEXT_OFFSET, None);
                }

                match next {
                    Some((next_block, next_offset)) => {
                        block = next_block;
                        offset = next_offset;
                    }
                    None => break,
                }
            }
            Ok(Literal::Void)
        }
        other => Err(EvalError::non_critical(ErrorKind::UnknownIntrinsic(other.to_string()))),
    }
}

fn missing_arg() -> EvalError {
    EvalError::critical(ErrorKind::Other("intrinsic called with too few arguments".into()))
}

fn eval_unary(op: UnaryOp, value: Literal) -> Result<Literal, EvalError> {
    match (op, &value) {
        (UnaryOp::Neg, Literal::Int(v)) => Ok(Literal::Int(v.wrapping_neg())),
        (UnaryOp::Neg, Literal::Long(v)) => Ok(Literal::Long(v.wrapping_neg())),
        (UnaryOp::Neg, Literal::Float(v)) => Ok(Literal::Float(-v)),
        (UnaryOp::Neg, Literal::Double(v)) => Ok(Literal::Double(-v)),
        (UnaryOp::Not, Literal::Bool(v)) => Ok(Literal::Bool(!v)),
        (UnaryOp::BitNot, Literal::Int(v)) => Ok(Literal::Int(!v)),
        (UnaryOp::BitNot, Literal::Long(v)) => Ok(Literal::Long(!v)),
        _ => Err(EvalError::non_critical(ErrorKind::TypeMismatch {
            expected: "numeric or bool operand",
            found: value.type_name(),
        })),
    }
}

fn eval_binary(op: BinaryOp, lhs: Literal, rhs: Literal) -> Result<Literal, EvalError> {
    use BinaryOp::*;

    if matches!(op, LogicalAnd | LogicalOr) {
        let (Literal::Bool(l), Literal::Bool(r)) = (&lhs, &rhs) else {
            return Err(EvalError::non_critical(ErrorKind::TypeMismatch {
                expected: "bool",
                found: if matches!(lhs, Literal::Bool(_)) {
                    rhs.type_name()
                } else {
                    lhs.type_name()
                },
            }));
        };
        return Ok(Literal::Bool(match op {
            LogicalAnd => *l && *r,
            LogicalOr => *l || *r,
            _ => unreachable!(),
        }));
    }

    if let (Some(l), Some(r)) = (lhs.as_f64(), rhs.as_f64()) {
        if matches!(lhs, Literal::Float(_) | Literal::Double(_))
            || matches!(rhs, Literal::Float(_) | Literal::Double(_))
        {
            return eval_float_binary(op, l, r);
        }
    }

    if let (Some(l), Some(r)) = (lhs.as_i64(), rhs.as_i64()) {
        return eval_int_binary(op, l, r, matches!(lhs, Literal::Long(_)) || matches!(rhs, Literal::Long(_)));
    }

    Err(EvalError::non_critical(ErrorKind::TypeMismatch {
        expected: "numeric operands",
        found: if lhs.as_i64().is_none() {
            lhs.type_name()
        } else {
            rhs.type_name()
        },
    }))
}

fn eval_float_binary(op: BinaryOp, l: f64, r: f64) -> Result<Literal, EvalError> {
    use BinaryOp::*;
    let result = match op {
        Add => Literal::Double(l + r),
        Sub => Literal::Double(l - r),
        Mul => Literal::Double(l * r),
        Div => Literal::Double(l / r),
        Eq => Literal::Bool(l == r),
        NotEq => Literal::Bool(l != r),
        Less => Literal::Bool(l < r),
        LessEq => Literal::Bool(l <= r),
        Greater => Literal::Bool(l > r),
        GreaterEq => Literal::Bool(l >= r),
        Mod | BitAnd | BitOr | BitXor | Shl | Shr => {
            return Err(EvalError::non_critical(ErrorKind::TypeMismatch {
                expected: "integer operands",
                found: "double",
            }))
        }
        LogicalAnd | LogicalOr => unreachable!("handled by caller"),
    };
    Ok(result)
}

fn eval_int_binary(op: BinaryOp, l: i64, r: i64, widen_to_long: bool) -> Result<Literal, EvalError> {
    use BinaryOp::*;

    let wrap = |v: i64| -> Literal {
        if widen_to_long {
            Literal::Long(v)
        } else {
            Literal::Int(v as i32)
        }
    };

    match op {
        Add => Ok(wrap(l.wrapping_add(r))),
        Sub => Ok(wrap(l.wrapping_sub(r))),
        Mul => Ok(wrap(l.wrapping_mul(r))),
        Div => {
            if r == 0 {
                // Integer division by zero is the one arithmetic fault the
                // source treats as undefined behavior rather than a
                // recoverable "can't fold this" result.
                Err(EvalError::critical(ErrorKind::DivideByZero))
            } else {
                Ok(wrap(l.wrapping_div(r)))
            }
        }
        Mod => {
            if r == 0 {
                Err(EvalError::critical(ErrorKind::DivideByZero))
            } else {
                Ok(wrap(l.wrapping_rem(r)))
            }
        }
        BitAnd => Ok(wrap(l & r)),
        BitOr => Ok(wrap(l | r)),
        BitXor => Ok(wrap(l ^ r)),
        Shl => Ok(wrap(l.wrapping_shl(r as u32))),
        Shr => Ok(wrap(l.wrapping_shr(r as u32))),
        Eq => Ok(Literal::Bool(l == r)),
        NotEq => Ok(Literal::Bool(l != r)),
        Less => Ok(Literal::Bool(l < r)),
        LessEq => Ok(Literal::Bool(l <= r)),
        Greater => Ok(Literal::Bool(l > r)),
        GreaterEq => Ok(Literal::Bool(l >= r)),
        LogicalAnd | LogicalOr => unreachable!("handled by caller"),
    }
}

#[cfg(test)]
mod tests {
    use nullc_metadata::{
        PrimitiveKind,
        TypeCategory,
        TypeDescriptor,
        TypeFlags,
    };
    use nullc_types::TypeIndex;

    use super::*;

    fn meta_with_types(count: usize) -> Metadata {
        let mut meta = Metadata::default();
        meta.types = (0..count)
            .map(|i| TypeDescriptor {
                index: TypeIndex::new(i as u32),
                size: 4,
                category: TypeCategory::None,
                primitive: PrimitiveKind::Int,
                subtype: TypeIndex::NONE,
                array_length: 0,
                member_count: 0,
                member_offset: 0,
                pointer_count: 0,
                flags: TypeFlags::empty(),
                name_hash: 0,
                name_offset: 0,
            })
            .collect();
        meta
    }

    #[test]
    fn folds_arithmetic_expression() {
        let mut arena = Arena::new();
        let two = arena.push(ConstExpr::Literal(Literal::Int(2)));
        let three = arena.push(ConstExpr::Literal(Literal::Int(3)));
        let sum = arena.push(ConstExpr::Binary {
            op: BinaryOp::Add,
            lhs: two,
            rhs: three,
        });

        let mut ctx = EvalContext::default();
        let meta = Metadata::default();
        assert_eq!(evaluate(&mut ctx, &meta, &arena, sum).unwrap(), Literal::Int(5));
    }

    #[test]
    fn division_by_zero_is_critical() {
        let mut arena = Arena::new();
        let one = arena.push(ConstExpr::Literal(Literal::Int(1)));
        let zero = arena.push(ConstExpr::Literal(Literal::Int(0)));
        let div = arena.push(ConstExpr::Binary {
            op: BinaryOp::Div,
            lhs: one,
            rhs: zero,
        });

        let mut ctx = EvalContext::default();
        let meta = Metadata::default();
        let err = evaluate(&mut ctx, &meta, &arena, div).unwrap_err();
        assert!(err.critical);
        assert_eq!(err.kind, ErrorKind::DivideByZero);
    }

    #[test]
    fn type_count_reads_linked_program_metadata() {
        let mut arena = Arena::new();
        let node = arena.push(ConstExpr::TypeCount);
        let mut ctx = EvalContext::default();
        let meta = meta_with_types(7);
        let result = evaluate(&mut ctx, &meta, &arena, node).unwrap();
        assert_eq!(result, Literal::Int(7));
    }

    #[test]
    fn instruction_budget_halts_deep_recursion() {
        let mut arena = Arena::new();
        let mut node = arena.push(ConstExpr::Literal(Literal::Int(1)));
        for _ in 0..10 {
            node = arena.push(ConstExpr::Unary {
                op: UnaryOp::Neg,
                operand: node,
            });
        }

        let mut ctx = EvalContext::new(crate::context::Budgets {
            instructions: 3,
            ..Default::default()
        });
        let meta = Metadata::default();
        let err = evaluate(&mut ctx, &meta, &arena, node).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InstructionLimitReached);
    }

    #[test]
    fn if_with_a_false_condition_takes_the_else_branch() {
        let mut arena = Arena::new();
        let cond = arena.push(ConstExpr::Literal(Literal::Bool(false)));
        let then_branch = arena.push(ConstExpr::Literal(Literal::Int(1)));
        let else_branch = arena.push(ConstExpr::Literal(Literal::Int(2)));
        let node = arena.push(ConstExpr::If { cond, then_branch, else_branch: Some(else_branch) });

        let mut ctx = EvalContext::default();
        let meta = Metadata::default();
        assert_eq!(evaluate(&mut ctx, &meta, &arena, node).unwrap(), Literal::Int(2));
    }

    #[test]
    fn array_copy_copies_elements_from_a_same_typed_source() {
        let mut meta = meta_with_types(2);
        // types[1] is the array type; its subtype names the element type.
        meta.types[1].subtype = TypeIndex::new(0);

        let mut arena = Arena::new();
        let src_elems_alloc = arena.push(ConstExpr::Intrinsic { name: "__newA".into(), args: vec![
            arena_literal(&mut arena, Literal::Int(4)),
            arena_literal(&mut arena, Literal::Int(2)),
        ] });
        let dst_elems_alloc = arena.push(ConstExpr::Intrinsic { name: "__newA".into(), args: vec![
            arena_literal(&mut arena, Literal::Int(4)),
            arena_literal(&mut arena, Literal::Int(2)),
        ] });

        let mut ctx = EvalContext::default();
        let src_elems = evaluate(&mut ctx, &meta, &arena, src_elems_alloc).unwrap();
        let Literal::Pointer { block: src_elem_block, .. } = src_elems else { panic!("expected pointer") };
        ctx.write_block(src_elem_block, 0, &7i32.to_le_bytes());
        ctx.write_block(src_elem_block, 4, &9i32.to_le_bytes());

        let dst_elems = evaluate(&mut ctx, &meta, &arena, dst_elems_alloc).unwrap();

        let array_type = arena.push(ConstExpr::TypeOf(TypeIndex::new(1)));
        let src_elems_node = arena.push(ConstExpr::Literal(src_elems));
        let len_node = arena.push(ConstExpr::Literal(Literal::Int(2)));
        let src_array = arena.push(ConstExpr::Intrinsic {
            name: "auto_array".into(),
            args: vec![array_type, src_elems_node, len_node],
        });
        let dst_elems_node = arena.push(ConstExpr::Literal(dst_elems));
        let dst_array = arena.push(ConstExpr::Intrinsic {
            name: "auto_array".into(),
            args: vec![array_type, dst_elems_node, len_node],
        });
        let copy = arena.push(ConstExpr::Intrinsic { name: "array_copy".into(), args: vec![dst_array, src_array] });

        evaluate(&mut ctx, &meta, &arena, copy).unwrap();

        let Literal::Pointer { block: dst_elem_block, .. } = dst_elems else { panic!("expected pointer") };
        let first = i32::from_le_bytes(ctx.read_block(dst_elem_block, 0, 4).try_into().unwrap());
        let second = i32::from_le_bytes(ctx.read_block(dst_elem_block, 4, 4).try_into().unwrap());
        assert_eq!((first, second), (7, 9));
    }

    fn arena_literal(arena: &mut Arena, value: Literal) -> NodeId {
        arena.push(ConstExpr::Literal(value))
    }

    #[test]
    fn loop_with_a_false_condition_never_runs_its_body() {
        let mut arena = Arena::new();
        let cond = arena.push(ConstExpr::Literal(Literal::Bool(false)));
        let unreached = arena.push(ConstExpr::Return(None));
        let body = arena.push(ConstExpr::Block(vec![unreached]));
        let lp = arena.push(ConstExpr::Loop { cond: Some(cond), body });

        let mut ctx = EvalContext::default();
        let meta = Metadata::default();
        assert_eq!(evaluate(&mut ctx, &meta, &arena, lp).unwrap(), Literal::Void);
    }

    #[test]
    fn loop_break_stops_iteration_immediately() {
        let mut arena = Arena::new();
        let cond = arena.push(ConstExpr::Literal(Literal::Bool(true)));
        let brk = arena.push(ConstExpr::Break(0));
        let body = arena.push(ConstExpr::Block(vec![brk]));
        let lp = arena.push(ConstExpr::Loop { cond: Some(cond), body });
        let result_node = arena.push(ConstExpr::Literal(Literal::Int(42)));
        let block = arena.push(ConstExpr::Block(vec![lp, result_node]));

        let mut ctx = EvalContext::default();
        let meta = Metadata::default();
        assert_eq!(evaluate(&mut ctx, &meta, &arena, block).unwrap(), Literal::Int(42));
    }

    #[test]
    fn return_inside_a_block_short_circuits_remaining_statements() {
        let mut arena = Arena::new();
        let ret_value = arena.push(ConstExpr::Literal(Literal::Int(1)));
        let ret = arena.push(ConstExpr::Return(Some(ret_value)));
        let unreached = arena.push(ConstExpr::Literal(Literal::Int(99)));
        let block = arena.push(ConstExpr::Block(vec![ret, unreached]));

        let mut ctx = EvalContext::default();
        let meta = Metadata::default();
        assert_eq!(evaluate(&mut ctx, &meta, &arena, block).unwrap(), Literal::Int(1));
    }

    #[test]
    fn coroutine_resume_suspends_at_the_requested_yield_and_skips_earlier_ones() {
        let mut arena = Arena::new();
        let one = arena.push(ConstExpr::Literal(Literal::Int(1)));
        let two = arena.push(ConstExpr::Literal(Literal::Int(2)));
        let y0 = arena.push(ConstExpr::Yield(Some(one)));
        let y1 = arena.push(ConstExpr::Yield(Some(two)));
        let three = arena.push(ConstExpr::Literal(Literal::Int(3)));
        let body = arena.push(ConstExpr::Block(vec![y0, y1, three]));

        let mut ctx = EvalContext::default();
        let meta = Metadata::default();

        let first = evaluate_coroutine(&mut ctx, &meta, &arena, body, 0).unwrap();
        assert_eq!(first, Flow::Yield(Literal::Int(1)));

        let second = evaluate_coroutine(&mut ctx, &meta, &arena, body, 1).unwrap();
        assert_eq!(second, Flow::Yield(Literal::Int(2)));
    }

    #[test]
    fn unknown_intrinsic_name_is_reported() {
        let mut arena = Arena::new();
        let node = arena.push(ConstExpr::Intrinsic { name: "__notARealIntrinsic".into(), args: vec![] });

        let mut ctx = EvalContext::default();
        let meta = Metadata::default();
        let err = evaluate(&mut ctx, &meta, &arena, node).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownIntrinsic("__notARealIntrinsic".into()));
    }

    #[test]
    fn new_s_allocates_a_zeroed_block_of_the_requested_size() {
        let mut arena = Arena::new();
        let size = arena.push(ConstExpr::Literal(Literal::Int(16)));
        let node = arena.push(ConstExpr::Intrinsic { name: "__newS".into(), args: vec![size] });

        let mut ctx = EvalContext::default();
        let meta = Metadata::default();
        let result = evaluate(&mut ctx, &meta, &arena, node).unwrap();
        match result {
            Literal::Pointer { size, .. } => assert_eq!(size, 16),
            other => panic!("expected a pointer literal, got {other:?}"),
        }
    }

    #[test]
    fn assert_derived_from_base_walks_the_subtype_chain() {
        let mut meta = meta_with_types(3);
        meta.types[1].category = TypeCategory::Class;
        meta.types[1].subtype = TypeIndex::new(0);
        meta.types[2].category = TypeCategory::Class;
        meta.types[2].subtype = TypeIndex::NONE;

        let mut arena = Arena::new();
        let size = arena.push(ConstExpr::Literal(Literal::Int(8)));
        let alloc = arena.push(ConstExpr::Intrinsic { name: "__newS".into(), args: vec![size] });
        let type_id = arena.push(ConstExpr::TypeOf(TypeIndex::new(1)));
        let base = arena.push(ConstExpr::TypeOf(TypeIndex::new(0)));
        let wrong_base = arena.push(ConstExpr::TypeOf(TypeIndex::new(2)));

        let mut ctx = EvalContext::default();
        let ptr = evaluate(&mut ctx, &meta, &arena, alloc).unwrap();
        let Literal::Pointer { block, .. } = ptr else { panic!("expected pointer") };
        write_i32(&mut ctx, block, nullc_types::layout::auto_ref::TYPE_ID_OFFSET as u32, 1);

        let ptr_node = arena.push(ConstExpr::Literal(ptr.clone()));
        let ok = arena.push(ConstExpr::Intrinsic {
            name: "assert_derived_from_base".into(),
            args: vec![ptr_node, type_id],
        });
        let base_ok = arena.push(ConstExpr::Intrinsic {
            name: "assert_derived_from_base".into(),
            args: vec![ptr_node, base],
        });
        let base_bad = arena.push(ConstExpr::Intrinsic {
            name: "assert_derived_from_base".into(),
            args: vec![ptr_node, wrong_base],
        });

        assert_eq!(evaluate(&mut ctx, &meta, &arena, ok).unwrap(), Literal::Bool(true));
        assert_eq!(evaluate(&mut ctx, &meta, &arena, base_ok).unwrap(), Literal::Bool(true));
        assert_eq!(evaluate(&mut ctx, &meta, &arena, base_bad).unwrap(), Literal::Bool(false));
    }

    #[test]
    fn assert_derived_from_base_passes_a_null_pointer_through() {
        let mut arena = Arena::new();
        let null_node = arena.push(ConstExpr::Literal(Literal::Null));
        let base = arena.push(ConstExpr::TypeOf(TypeIndex::new(0)));
        let node = arena.push(ConstExpr::Intrinsic {
            name: "assert_derived_from_base".into(),
            args: vec![null_node, base],
        });

        let mut ctx = EvalContext::default();
        let meta = meta_with_types(1);
        assert_eq!(evaluate(&mut ctx, &meta, &arena, node).unwrap(), Literal::Bool(true));
    }

    #[test]
    fn assert_coroutine_rejects_an_ordinary_function() {
        let mut meta = Metadata::default();
        meta.types = vec![TypeDescriptor {
            index: TypeIndex::new(0),
            size: 0,
            category: TypeCategory::None,
            primitive: PrimitiveKind::Void,
            subtype: TypeIndex::NONE,
            array_length: 0,
            member_count: 0,
            member_offset: 0,
            pointer_count: 0,
            flags: TypeFlags::empty(),
            name_hash: 0,
            name_offset: 0,
        }];
        meta.functions = vec![nullc_metadata::FunctionDescriptor {
            name_offset: 0,
            param_count: 0,
            local_count: 0,
            external_count: 0,
            offset_to_first_local: 0,
            reg_vm_address: 0,
            reg_vm_code_size: 0,
            reg_vm_registers: 0,
            bytes_to_pop: 0,
            stack_size: 0,
            parent_type: TypeIndex::NONE,
            context_type: TypeIndex::NONE,
            is_coroutine: false,
            native: None,
        }];

        let mut arena = Arena::new();
        let size = arena.push(ConstExpr::Literal(Literal::Int(nullc_types::layout::function_ref::SIZE as i32)));
        let alloc = arena.push(ConstExpr::Intrinsic { name: "__newS".into(), args: vec![size] });

        let mut ctx = EvalContext::default();
        let ptr = evaluate(&mut ctx, &meta, &arena, alloc).unwrap();
        let Literal::Pointer { block, .. } = ptr else { panic!("expected pointer") };
        write_i32(&mut ctx, block, nullc_types::layout::function_ref::FUNCTION_ID_OFFSET as u32, 0);

        let ptr_node = arena.push(ConstExpr::Literal(ptr));
        let node = arena.push(ConstExpr::Intrinsic { name: "__assertCoroutine".into(), args: vec![ptr_node] });
        let err = evaluate(&mut ctx, &meta, &arena, node).unwrap_err();
        assert!(err.critical);
    }

    #[test]
    fn close_upvalue_copies_the_variable_and_detaches_the_upvalue() {
        let mut arena = Arena::new();
        let var_size = arena.push(ConstExpr::Literal(Literal::Int(4)));
        let var_alloc = arena.push(ConstExpr::Intrinsic { name: "__newS".into(), args: vec![var_size] });
        let upvalue_size = arena.push(ConstExpr::Literal(Literal::Int(16)));
        let upvalue_alloc = arena.push(ConstExpr::Intrinsic { name: "__newS".into(), args: vec![upvalue_size] });

        let mut ctx = EvalContext::default();
        let meta = Metadata::default();

        let variable = evaluate(&mut ctx, &meta, &arena, var_alloc).unwrap();
        let Literal::Pointer { block: var_block, .. } = variable else { panic!("expected pointer") };
        ctx.write_block(var_block, 0, &42i32.to_le_bytes());

        let upvalue = evaluate(&mut ctx, &meta, &arena, upvalue_alloc).unwrap();
        let Literal::Pointer { block: upvalue_block, .. } = upvalue else { panic!("expected pointer") };
        write_ref(&mut ctx, upvalue_block, 0, Some((var_block, 0)));
        write_ref(&mut ctx, upvalue_block, 8, None);

        let head_node = arena.push(ConstExpr::Literal(upvalue));
        let var_node = arena.push(ConstExpr::Literal(variable));
        let offset_node = arena.push(ConstExpr::Literal(Literal::Int(0)));
        let size_node = arena.push(ConstExpr::Literal(Literal::Int(4)));
        let close = arena.push(ConstExpr::Intrinsic {
            name: "__closeUpvalue".into(),
            args: vec![head_node, var_node, offset_node, size_node],
        });

        evaluate(&mut ctx, &meta, &arena, close).unwrap();

        let new_target = read_ref(&ctx, upvalue_block, 0).expect("still points somewhere");
        assert_ne!(new_target, (var_block, 0));
        let copied = i32::from_le_bytes(ctx.read_block(new_target.0, new_target.1, 4).try_into().unwrap());
        assert_eq!(copied, 42);
    }
}
