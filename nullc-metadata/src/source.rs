/// Maps one instruction index to a byte offset and line number in the
/// `exSource` text blob, for the stack-frame printer and error traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceLocation {
    pub instruction: u32,
    pub source_offset: u32,
    pub line: u32,
}

/// Source-location table, ordered by instruction index (as produced by
/// Lowering). Lookups are a binary search for "last entry at or before".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceMap {
    entries: Vec<SourceLocation>,
}

impl SourceMap {
    pub fn new(mut entries: Vec<SourceLocation>) -> Self {
        entries.sort_by_key(|e| e.instruction);
        Self { entries }
    }

    pub fn push(&mut self, location: SourceLocation) {
        self.entries.push(location);
    }

    /// The source location covering `instruction`, if any instruction at or
    /// before it was recorded.
    pub fn lookup(&self, instruction: u32) -> Option<&SourceLocation> {
        match self
            .entries
            .binary_search_by_key(&instruction, |e| e.instruction)
        {
            Ok(idx) => Some(&self.entries[idx]),
            Err(0) => None,
            Err(idx) => Some(&self.entries[idx - 1]),
        }
    }
}
