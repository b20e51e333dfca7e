//! Precise, stop-the-world mark phase for the NULLC execution core.
//!
//! Operates over a [`GcHost`] — the seam the interpreter implements across
//! its globals region, data stack, temp stack and heap — and a [`Metadata`]
//! view of the linked program. Does not sweep: freeing unreached blocks is
//! the allocator's job, driven by [`GcHeap::unreached_blocks`].

mod heap;
mod mark;
mod marker;

pub use heap::{
    BlockRecord,
    GcHeap,
};
pub use mark::{
    check_array,
    check_class,
    check_function,
    check_variable,
    mark_all,
    mark_pointer,
    GcHost,
    RootInfo,
};
pub use marker::{
    GcFlags,
    MarkerWord,
};

#[cfg(test)]
mod tests {
    use nullc_metadata::{
        FunctionDescriptor,
        GlobalVarDescriptor,
        LocalKind,
        Metadata,
        PrimitiveKind,
        TypeCategory,
        TypeDescriptor,
        TypeFlags,
    };
    use nullc_types::{
        Addr,
        TypeIndex,
        UNSIZED_ARRAY_LEN,
    };

    use super::*;

    fn int_type() -> TypeDescriptor {
        TypeDescriptor {
            index: TypeIndex::new(0),
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
        }
    }

    fn unsized_int_array_type() -> TypeDescriptor {
        TypeDescriptor {
            index: TypeIndex::new(1),
            size: nullc_types::layout::unsized_array_ref::SIZE,
            category: TypeCategory::Array,
            primitive: PrimitiveKind::Void,
            subtype: TypeIndex::new(0),
            array_length: UNSIZED_ARRAY_LEN,
            member_count: 0,
            member_offset: 0,
            pointer_count: 1,
            flags: TypeFlags::empty(),
            name_hash: 1,
            name_offset: 0,
        }
    }

    fn array_ref_type() -> TypeDescriptor {
        TypeDescriptor {
            index: TypeIndex::new(2),
            size: nullc_types::layout::unsized_array_ref::SIZE,
            category: TypeCategory::Pointer,
            primitive: PrimitiveKind::Void,
            subtype: TypeIndex::new(1),
            array_length: 0,
            member_count: 0,
            member_offset: 0,
            pointer_count: 1,
            flags: TypeFlags::empty(),
            name_hash: 2,
            name_offset: 0,
        }
    }

    /// S4: an unsized `int[]` referenced only from a global gets marked
    /// VISIBLE; a second, unreferenced one does not.
    #[test]
    fn unreferenced_array_is_not_marked() {
        let mut heap = GcHeap::new();

        // The array-ref itself lives inside the reachable block; the
        // backing elements live in a second block it points to.
        let elements_reachable = heap.allocate(12, TypeIndex::new(0), true);
        let array_ref_reachable = heap.allocate(nullc_types::layout::unsized_array_ref::SIZE, TypeIndex::new(1), false);
        heap.write_addr(
            array_ref_reachable.offset(nullc_types::layout::unsized_array_ref::ELEMENT_PTR_OFFSET),
            elements_reachable,
        );
        heap.write_u32(
            array_ref_reachable.offset(nullc_types::layout::unsized_array_ref::LENGTH_OFFSET),
            3,
        );

        let elements_unreachable = heap.allocate(12, TypeIndex::new(0), true);

        let mut meta = Metadata::default();
        meta.types = vec![int_type(), unsized_int_array_type(), array_ref_type()];
        meta.globals = vec![GlobalVarDescriptor {
            type_index: TypeIndex::new(2),
            offset: 0,
            name_offset: 0,
        }];

        // The global region is itself a heap block here (rather than a
        // real stack/globals buffer) purely to keep this test within
        // `GcHeap`'s own `GcHost` impl; the global slot holds a pointer to
        // the array-ref block.
        let globals_region = heap.allocate(8, TypeIndex::NONE, false);
        heap.write_addr(globals_region, array_ref_reachable);

        mark_all(
            &mut heap,
            &meta,
            globals_region,
            core::iter::empty(),
            core::iter::empty(),
        );

        let reachable_marker = heap.marker(array_ref_reachable).unwrap();
        assert!(reachable_marker.is_visible());
        let elements_marker = heap.marker(elements_reachable).unwrap();
        assert!(elements_marker.is_visible());
        let unreachable_marker = heap.marker(elements_unreachable).unwrap();
        assert!(!unreachable_marker.is_visible());
    }

    #[test]
    fn temp_stack_word_keeps_a_block_alive() {
        let mut heap = GcHeap::new();
        let block = heap.allocate(8, TypeIndex::new(0), false);

        let temp_stack_region = heap.allocate(8, TypeIndex::NONE, false);
        heap.write_addr(temp_stack_region, block);

        let meta = Metadata::default();

        mark_all(
            &mut heap,
            &meta,
            Addr::heap(Addr::UNMANAGEABLE_LIMIT),
            core::iter::empty(),
            core::iter::once(temp_stack_region),
        );

        assert!(heap.marker(block).unwrap().is_visible());
    }

    #[test]
    fn reset_marks_clears_visibility_between_passes() {
        let mut heap = GcHeap::new();
        let block = heap.allocate(8, TypeIndex::new(0), false);
        let mut marker = heap.marker(block).unwrap();
        marker.mark_visible();
        heap.set_marker(block, marker);
        assert!(heap.marker(block).unwrap().is_visible());

        heap.reset_marks();
        assert!(!heap.marker(block).unwrap().is_visible());
    }

    #[test]
    fn function_descriptor_with_no_body_is_external() {
        let external = FunctionDescriptor {
            name_offset: 0,
            param_count: 0,
            local_count: 0,
            external_count: 0,
            offset_to_first_local: 0,
            reg_vm_address: nullc_types::NONE,
            reg_vm_code_size: 0,
            reg_vm_registers: 0,
            bytes_to_pop: 0,
            stack_size: 0,
            parent_type: TypeIndex::NONE,
            context_type: TypeIndex::NONE,
            is_coroutine: false,
            native: None,
        };
        assert!(external.is_external());
        let _ = LocalKind::Param;
    }
}
