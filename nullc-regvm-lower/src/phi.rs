//! Phi legalization: the RegVM has no in-built phi, so before register
//! allocation every phi of type T gets a frame slot, each predecessor's
//! terminator grows a store of its incoming value, and the phi itself
//! becomes a load at the block head (spec.md §4.2, "Phi legalization").

use crate::ir::{
    Function,
    Instr,
    ValueDef,
};

/// A frame slot carved out for one legalized phi (or, per the same
/// scheme, any cross-block multi-consumer value — see `DESIGN.md` for why
/// this pass only legalizes phis proper).
#[derive(Debug, Clone, Copy)]
pub struct FrameSlot {
    pub offset: u32,
    pub size: u32,
}

/// Rewrites every `Phi` in `func` into a frame-slot load, inserting a
/// matching store at each predecessor's terminator. Returns the slots
/// allocated, in legalization order.
pub fn legalize_phis(func: &mut Function) -> Vec<FrameSlot> {
    let mut slots = Vec::new();

    let phi_sites: Vec<_> = func
        .blocks
        .iter()
        .enumerate()
        .flat_map(|(block_idx, block)| {
            block.values.iter().copied().filter_map(move |value| {
                matches!(func.value(value).instr, Instr::Phi { .. })
                    .then_some((crate::ir::BlockId(block_idx as u32), value))
            })
        })
        .collect();

    for (_block, phi_value) in phi_sites {
        let def = func.value(phi_value).clone();
        let Instr::Phi { incoming } = def.instr else {
            unreachable!("filtered to Phi above");
        };

        let size = def.ty.register_count() as u32 * 8;
        let offset = func.frame_size;
        func.frame_size += size;
        slots.push(FrameSlot { offset, size });

        for (pred, value) in incoming {
            func.insert_before_terminator(
                pred,
                ValueDef {
                    instr: Instr::StoreLocal { offset, value },
                    ty: crate::ir::VmType::Void,
                },
            );
        }

        func.value_mut(phi_value).instr = Instr::LoadLocal { offset };
    }

    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        Block,
        BlockId,
        Instr,
        ValueDef,
        VmType,
    };

    /// `entry -> {left, right} -> join`, join has a phi over a value
    /// defined differently on each arm.
    fn diamond_with_phi() -> Function {
        let entry = Block::default();
        let mut func = Function::new(entry);

        let left = func.push_block(vec![BlockId(0)]);
        let right = func.push_block(vec![BlockId(0)]);
        let join = func.push_block(vec![left, right]);

        let cond = func.push_value(
            BlockId(0),
            ValueDef {
                instr: Instr::ConstInt(1),
                ty: VmType::Int,
            },
        );
        func.push_value(
            BlockId(0),
            ValueDef {
                instr: Instr::Branch {
                    cond,
                    if_true: left,
                    if_false: right,
                },
                ty: VmType::Void,
            },
        );

        let ten = func.push_value(
            left,
            ValueDef {
                instr: Instr::ConstInt(10),
                ty: VmType::Int,
            },
        );
        func.push_value(
            left,
            ValueDef {
                instr: Instr::Jump { target: join },
                ty: VmType::Void,
            },
        );

        let twenty = func.push_value(
            right,
            ValueDef {
                instr: Instr::ConstInt(20),
                ty: VmType::Int,
            },
        );
        func.push_value(
            right,
            ValueDef {
                instr: Instr::Jump { target: join },
                ty: VmType::Void,
            },
        );

        let phi = func.push_value(
            join,
            ValueDef {
                instr: Instr::Phi {
                    incoming: vec![(left, ten), (right, twenty)],
                },
                ty: VmType::Int,
            },
        );
        func.push_value(
            join,
            ValueDef {
                instr: Instr::Return { value: Some(phi) },
                ty: VmType::Void,
            },
        );

        func
    }

    #[test]
    fn phi_becomes_a_load_at_the_block_head() {
        let mut func = diamond_with_phi();
        let join = BlockId(3);
        let phi_value = func.blocks[join.index()].values[0];

        legalize_phis(&mut func);

        assert!(matches!(func.value(phi_value).instr, Instr::LoadLocal { .. }));
    }

    #[test]
    fn each_predecessor_gets_a_store_before_its_terminator() {
        let mut func = diamond_with_phi();
        let left = BlockId(1);
        let right = BlockId(2);

        legalize_phis(&mut func);

        for pred in [left, right] {
            let values = &func.blocks[pred.index()].values;
            let terminator = *values.last().unwrap();
            assert!(matches!(func.value(terminator).instr, Instr::Jump { .. }));
            let store = values[values.len() - 2];
            assert!(matches!(func.value(store).instr, Instr::StoreLocal { .. }));
        }
    }

    #[test]
    fn legalizing_grows_the_frame_by_the_phis_register_width() {
        let mut func = diamond_with_phi();
        assert_eq!(func.frame_size, 0);
        let slots = legalize_phis(&mut func);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].size, 8);
        assert_eq!(func.frame_size, 8);
    }
}
