use nullc_metadata::{
    FunctionDescriptor,
    Metadata,
    TypeCategory,
    TypeDescriptor,
};
use nullc_types::{
    layout,
    Addr,
    FunctionIndex,
    TypeIndex,
};

use crate::marker::MarkerWord;

/// A pending `{ pointer, type }` pair queued for member-by-member marking
/// on the next worklist round, mirroring the source's `GC::RootInfo`.
#[derive(Debug, Clone, Copy)]
pub struct RootInfo {
    pub ptr: Addr,
    pub type_index: TypeIndex,
}

/// The seam between the mark engine and whatever owns the live memory
/// spaces it reads from (globals, data stack, temp stack, heap). The
/// interpreter implements this once, over all its memory regions at once;
/// [`crate::GcHeap`] implements it standalone for heap-only testing.
pub trait GcHost {
    /// Reads a pointer-width value stored at `at`.
    fn read_addr(&self, at: Addr) -> Addr;
    /// Reads a 4-byte value (array length, runtime type id) stored at `at`.
    fn read_u32(&self, at: Addr) -> u32;
    /// The base-pointer oracle: start of the block containing `target`, or
    /// `None` if `target` isn't an address the allocator ever returned.
    fn base_of(&self, target: Addr) -> Option<Addr>;
    /// The marker word of the block starting at `block`.
    fn marker(&self, block: Addr) -> Option<MarkerWord>;
    fn set_marker(&mut self, block: Addr, marker: MarkerWord);
}

fn looks_like_heap_pointer(candidate: Addr) -> bool {
    !candidate.is_null() && !candidate.is_unmanageable() && !candidate.is_stack()
}

/// Marks the block that the pointer stored at `ptr` refers to. If
/// previously unmarked and its pointee type is non-trivial, queues the
/// pointee for member marking on the next round.
pub fn mark_pointer<H: GcHost>(
    host: &mut H,
    meta: &Metadata,
    ptr: Addr,
    ty: &TypeDescriptor,
    take_subtype: bool,
    next: &mut Vec<RootInfo>,
) {
    let target = host.read_addr(ptr);
    if !looks_like_heap_pointer(target) {
        return;
    }

    if ty.subtype.is_none() {
        return;
    }

    let Some(base) = host.base_of(target) else {
        return;
    };
    let Some(marker) = host.marker(base) else {
        return;
    };
    if marker.is_visible() {
        return;
    }

    let mut marked = marker;
    marked.mark_visible();
    host.set_marker(base, marked);

    if ty.category != TypeCategory::None {
        let next_type = if take_subtype { ty.subtype } else { ty.index };
        next.push(RootInfo {
            ptr: target,
            type_index: next_type,
        });
    }
}

fn mark_block_if_unmarked<H: GcHost>(host: &mut H, target: Addr) -> Option<bool> {
    let base = host.base_of(target)?;
    let marker = host.marker(base)?;
    if marker.is_visible() {
        return Some(false);
    }
    let mut marked = marker;
    marked.mark_visible();
    host.set_marker(base, marked);
    Some(true)
}

/// Walks an array value: sized, unsized, or the type-erased `auto[]`.
pub fn check_array<H: GcHost>(
    host: &mut H,
    meta: &Metadata,
    ptr: Addr,
    ty: &TypeDescriptor,
    next: &mut Vec<RootInfo>,
) {
    let (element_type_index, element_ptr, size) = if ty.is_auto_array() {
        let type_id = TypeIndex::new(host.read_u32(ptr.offset(layout::auto_array::TYPE_ID_OFFSET)));
        let data_ptr = host.read_addr(ptr.offset(layout::auto_array::ELEMENT_PTR_OFFSET));
        if !looks_like_heap_pointer(data_ptr) {
            return;
        }
        match mark_block_if_unmarked(host, data_ptr) {
            Some(true) => {}
            _ => return,
        }
        let length = host.read_u32(ptr.offset(layout::auto_array::LENGTH_OFFSET));
        (type_id, data_ptr, length)
    } else if ty.is_unsized_array() {
        let data_ptr = host.read_addr(ptr.offset(layout::unsized_array_ref::ELEMENT_PTR_OFFSET));
        let length = host.read_u32(ptr.offset(layout::unsized_array_ref::LENGTH_OFFSET));
        if !looks_like_heap_pointer(data_ptr) {
            return;
        }
        match mark_block_if_unmarked(host, data_ptr) {
            Some(true) => {}
            _ => return,
        }
        (ty.subtype, data_ptr, length)
    } else {
        (ty.subtype, ptr, ty.array_length)
    };

    let element_type = meta
        .get_type(element_type_index)
        .expect("array element type index out of range");
    if element_type.pointer_count == 0 {
        return;
    }

    let mut cursor = element_ptr;
    for _ in 0..size {
        match element_type.category {
            TypeCategory::None => break,
            TypeCategory::Array => check_array(host, meta, cursor, element_type, next),
            TypeCategory::Pointer => mark_pointer(host, meta, cursor, element_type, true, next),
            TypeCategory::Function => check_function(host, meta, cursor, next),
            TypeCategory::Class => check_class(host, meta, cursor, element_type, next),
        }
        cursor = cursor.offset(element_type.size as u64);
    }
}

/// Walks a class value: plain members, the type-erased `auto ref`, or
/// `auto[]` (deferred to [`check_array`]).
pub fn check_class<H: GcHost>(
    host: &mut H,
    meta: &Metadata,
    ptr: Addr,
    ty: &TypeDescriptor,
    next: &mut Vec<RootInfo>,
) {
    if ty.is_auto_ref() {
        let runtime_type = TypeIndex::new(host.read_u32(ptr.offset(layout::auto_ref::TYPE_ID_OFFSET)));
        let target = host.read_addr(ptr.offset(layout::auto_ref::TARGET_PTR_OFFSET));
        if !looks_like_heap_pointer(target) {
            return;
        }
        match mark_block_if_unmarked(host, target) {
            Some(true) => {}
            _ => return,
        }
        let real_type = meta
            .get_type(runtime_type)
            .expect("auto ref runtime type id out of range");
        check_variable(host, meta, target, real_type, next);
        return;
    }

    if ty.is_auto_array() {
        check_array(host, meta, ptr, ty, next);
        return;
    }

    for member in meta.pointer_members(ty.index) {
        let member_type = meta
            .get_type(member.type_index)
            .expect("class member type index out of range");
        check_variable(host, meta, ptr.offset(member.offset as u64), member_type, next);
    }
}

/// Walks a function value's closure context, if it has one and the
/// function isn't external.
pub fn check_function<H: GcHost>(
    host: &mut H,
    meta: &Metadata,
    ptr: Addr,
    next: &mut Vec<RootInfo>,
) {
    let context = host.read_addr(ptr.offset(layout::function_ref::CONTEXT_PTR_OFFSET));
    if context.is_null() {
        return;
    }

    let function_id = FunctionIndex::new(host.read_u32(ptr.offset(layout::function_ref::FUNCTION_ID_OFFSET)));
    let Ok(func) = meta.get_function(function_id) else {
        return;
    };
    if func.is_external() {
        return;
    }

    if !func.context_type.is_none() {
        let context_type = meta
            .get_type(func.context_type)
            .expect("function context type index out of range");
        mark_pointer(
            host,
            meta,
            ptr.offset(layout::function_ref::CONTEXT_PTR_OFFSET),
            context_type,
            false,
            next,
        );
    }
}

/// Dispatches on `ty.category` to the right `check_*` helper; resolves the
/// runtime type first if `ty` is `extendable` (polymorphic).
pub fn check_variable<H: GcHost>(
    host: &mut H,
    meta: &Metadata,
    ptr: Addr,
    ty: &TypeDescriptor,
    next: &mut Vec<RootInfo>,
) {
    let real_type = if ty.is_extendable() {
        let runtime_type = TypeIndex::new(host.read_u32(ptr));
        meta.get_type(runtime_type)
            .expect("extendable object's runtime type id out of range")
    } else {
        ty
    };

    if real_type.pointer_count == 0 {
        return;
    }

    match ty.category {
        TypeCategory::None => {}
        TypeCategory::Array => check_array(host, meta, ptr, ty, next),
        TypeCategory::Pointer => mark_pointer(host, meta, ptr, ty, true, next),
        TypeCategory::Function => check_function(host, meta, ptr, next),
        TypeCategory::Class => check_class(host, meta, ptr, real_type, next),
    }
}

/// Drains `curr` by visiting every queued root, alternating with `next`
/// until a round produces nothing new.
fn drain_worklist<H: GcHost>(host: &mut H, meta: &Metadata, mut curr: Vec<RootInfo>) {
    let mut next = Vec::new();
    while !curr.is_empty() {
        for root in curr.drain(..) {
            let ty = meta
                .get_type(root.type_index)
                .expect("queued root type index out of range");
            check_variable(host, meta, root.ptr, ty, &mut next);
        }
        core::mem::swap(&mut curr, &mut next);
    }
}

fn mark_frame<H: GcHost>(
    host: &mut H,
    meta: &Metadata,
    function: FunctionIndex,
    frame_base: Addr,
    next: &mut Vec<RootInfo>,
) {
    let func: &FunctionDescriptor = meta
        .get_function(function)
        .expect("call-stack walker returned unknown function");

    for local in meta.locals_for_function(function) {
        let ty = meta
            .get_type(local.type_index)
            .expect("local type index out of range");
        check_variable(host, meta, frame_base.offset(local.offset as u64), ty, next);
    }

    if !func.context_type.is_none() {
        let context_type = meta
            .get_type(func.context_type)
            .expect("function context type index out of range");
        let ptr_size = nullc_types::NULLC_PTR_SIZE.bytes() as u32;
        let context_addr = frame_base.offset((func.bytes_to_pop - ptr_size) as u64);
        mark_pointer(host, meta, context_addr, context_type, false, next);
    }
}

fn mark_temp_stack_word<H: GcHost>(host: &mut H, meta: &Metadata, at: Addr, next: &mut Vec<RootInfo>) {
    let candidate = host.read_addr(at);
    if !looks_like_heap_pointer(candidate) {
        return;
    }
    let Some(base) = host.base_of(candidate) else {
        return;
    };
    let Some(marker) = host.marker(base) else {
        return;
    };
    if marker.is_visible() {
        return;
    }
    let mut marked = marker;
    marked.mark_visible();
    host.set_marker(base, marked);

    let ty = meta
        .get_type(marker.type_index)
        .expect("heap block marker type index out of range");
    if ty.category != TypeCategory::None {
        next.push(RootInfo {
            ptr: base,
            type_index: marker.type_index,
        });
    }
}

/// Runs one full stop-the-world mark pass: globals, every live call
/// frame's locals and closure context, then every conservatively-scanned
/// temp-stack word, followed by the worklist alternation over whatever
/// those roots reach.
///
/// `frames` is bottom-to-top, as produced by the interpreter's call-stack
/// walker; `temp_stack_words` yields the address of each pointer-width
/// slot in the temp stack's live range.
pub fn mark_all<H: GcHost>(
    host: &mut H,
    meta: &Metadata,
    globals_base: Addr,
    frames: impl IntoIterator<Item = (FunctionIndex, Addr)>,
    temp_stack_words: impl IntoIterator<Item = Addr>,
) {
    let mut next = Vec::new();

    for global in &meta.globals {
        let ty = meta
            .get_type(global.type_index)
            .expect("global type index out of range");
        check_variable(host, meta, globals_base.offset(global.offset as u64), ty, &mut next);
    }

    for (function, frame_base) in frames {
        mark_frame(host, meta, function, frame_base, &mut next);
    }

    for word in temp_stack_words {
        mark_temp_stack_word(host, meta, word, &mut next);
    }

    drain_worklist(host, meta, next);
}
