use nullc_types::{
    Addr,
    TypeIndex,
};

use crate::marker::MarkerWord;

/// One allocation's entry in the heap's sorted side table: where it starts,
/// how big it is, and its GC bookkeeping.
///
/// The source recovers this by walking backwards from a raw pointer to a
/// marker word stashed just before the block. Our heap is one `Vec<u8>`
/// arena addressed by [`Addr`] offsets, so instead we keep every block's
/// extent in a side table sorted by `start` and binary-search it — the
/// arena-offset analogue of the source's `GetBasePointer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRecord {
    pub start: Addr,
    pub size: u32,
    pub marker: MarkerWord,
}

impl BlockRecord {
    fn contains(&self, addr: Addr) -> bool {
        let start = self.start.heap_offset();
        let end = start + self.size as u64;
        let probe = addr.heap_offset();
        probe >= start && probe < end
    }
}

/// The managed heap arena: one contiguous byte buffer plus the block side
/// table used to recover a block's start and type from any interior
/// pointer, without ever materializing a raw machine pointer.
#[derive(Debug, Default)]
pub struct GcHeap {
    bytes: Vec<u8>,
    /// Kept sorted by `start` at all times; allocation always appends, so
    /// this holds without re-sorting.
    blocks: Vec<BlockRecord>,
}

impl GcHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Appends a fresh, zeroed block and records it in the side table.
    /// Returns the block's base address.
    pub fn allocate(&mut self, size: u32, type_index: TypeIndex, is_array: bool) -> Addr {
        let start = Addr::heap(self.bytes.len() as u64 + Addr::UNMANAGEABLE_LIMIT);
        self.bytes.resize(self.bytes.len() + size as usize, 0);
        self.blocks.push(BlockRecord {
            start,
            size,
            marker: MarkerWord::new(type_index, is_array),
        });
        start
    }

    /// The base address of the block containing `target`, if any. This is
    /// the oracle the mark engine uses in place of raw base-pointer
    /// arithmetic: `None` means `target` is a dangling, stack, or
    /// non-pointer word, and marking stops there.
    pub fn base_of(&self, target: Addr) -> Option<Addr> {
        if !target.is_heap_candidate() {
            return None;
        }
        let probe = target.heap_offset();
        let idx = match self
            .blocks
            .binary_search_by_key(&probe, |b| b.start.heap_offset())
        {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        let block = &self.blocks[idx];
        block.contains(target).then_some(block.start)
    }

    fn index_of(&self, block_start: Addr) -> Option<usize> {
        self.blocks
            .binary_search_by_key(&block_start.heap_offset(), |b| b.start.heap_offset())
            .ok()
    }

    pub fn marker(&self, block_start: Addr) -> Option<MarkerWord> {
        self.index_of(block_start).map(|i| self.blocks[i].marker)
    }

    pub fn set_marker(&mut self, block_start: Addr, marker: MarkerWord) {
        if let Some(i) = self.index_of(block_start) {
            self.blocks[i].marker = marker;
        }
    }

    pub fn blocks(&self) -> &[BlockRecord] {
        &self.blocks
    }

    /// Clears every block's `VISIBLE` flag, ready for the next mark pass.
    pub fn reset_marks(&mut self) {
        for block in &mut self.blocks {
            block.marker.flags.remove(crate::marker::GcFlags::VISIBLE);
        }
    }

    /// Block start addresses with a stale `VISIBLE` flag cleared and not
    /// re-set by the pass just run — the sweep phase's free list. Sweeping
    /// the freed bytes themselves is outside the execution core's scope
    /// (it belongs to the allocator, not the mark engine).
    pub fn unreached_blocks(&self) -> impl Iterator<Item = Addr> + '_ {
        self.blocks
            .iter()
            .filter(|b| !b.marker.is_visible())
            .map(|b| b.start)
    }

    fn offset(&self, addr: Addr) -> usize {
        (addr.heap_offset() - Addr::UNMANAGEABLE_LIMIT) as usize
    }

    pub fn read_addr(&self, at: Addr) -> Addr {
        let start = self.offset(at);
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.bytes[start..start + 8]);
        Addr::from_bits(u64::from_le_bytes(buf))
    }

    pub fn write_addr(&mut self, at: Addr, value: Addr) {
        let start = self.offset(at);
        self.bytes[start..start + 8].copy_from_slice(&value.to_bits().to_le_bytes());
    }

    pub fn read_u32(&self, at: Addr) -> u32 {
        let start = self.offset(at);
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.bytes[start..start + 4]);
        u32::from_le_bytes(buf)
    }

    pub fn write_u32(&mut self, at: Addr, value: u32) {
        let start = self.offset(at);
        self.bytes[start..start + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn bytes_at(&self, at: Addr, len: usize) -> &[u8] {
        let start = self.offset(at);
        &self.bytes[start..start + len]
    }

    /// Raw byte write of arbitrary length, for the 1/2-byte lanes
    /// (`storeByte`/`storeWord`) and zero-fill that `write_u32`/`write_addr`
    /// don't cover.
    pub fn write_bytes(&mut self, at: Addr, bytes: &[u8]) {
        let start = self.offset(at);
        self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

impl crate::mark::GcHost for GcHeap {
    fn read_addr(&self, at: Addr) -> Addr {
        GcHeap::read_addr(self, at)
    }

    fn read_u32(&self, at: Addr) -> u32 {
        GcHeap::read_u32(self, at)
    }

    fn base_of(&self, target: Addr) -> Option<Addr> {
        GcHeap::base_of(self, target)
    }

    fn marker(&self, block: Addr) -> Option<MarkerWord> {
        GcHeap::marker(self, block)
    }

    fn set_marker(&mut self, block: Addr, marker: MarkerWord) {
        GcHeap::set_marker(self, block, marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_then_find_base_from_interior_address() {
        let mut heap = GcHeap::new();
        let base = heap.allocate(16, TypeIndex::new(3), false);
        let interior = base.offset(5);
        assert_eq!(heap.base_of(interior), Some(base));
    }

    #[test]
    fn base_of_rejects_addresses_outside_any_block() {
        let mut heap = GcHeap::new();
        heap.allocate(16, TypeIndex::new(3), false);
        let past_end = Addr::heap(Addr::UNMANAGEABLE_LIMIT + 100);
        assert_eq!(heap.base_of(past_end), None);
    }

    #[test]
    fn stack_addresses_never_resolve_to_a_heap_block() {
        let mut heap = GcHeap::new();
        heap.allocate(16, TypeIndex::new(3), false);
        assert_eq!(heap.base_of(Addr::stack(0)), None);
    }

    #[test]
    fn read_write_addr_round_trips() {
        let mut heap = GcHeap::new();
        let base = heap.allocate(8, TypeIndex::new(0), false);
        let target = Addr::heap(Addr::UNMANAGEABLE_LIMIT + 999);
        heap.write_addr(base, target);
        assert_eq!(heap.read_addr(base), target);
    }
}
