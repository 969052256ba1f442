use crate::util::mem::Address;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryBlock {
    pub start: Address,
    pub size: usize,
}

impl MemoryBlock {
    pub fn end(&self) -> Address {
        self.start.offset(self.size)
    }
}

/// Free heap blocks kept in decreasing size order (ties by address).
///
/// Allocation is best fit: the smallest block that can hold the request is
/// split, and the remainder goes back into the list.
pub struct MemoryBlockList {
    blocks: Vec<MemoryBlock>,
}

impl MemoryBlockList {
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    pub fn with_block(start: Address, size: usize) -> Self {
        let mut list = Self::new();
        list.insert(MemoryBlock { start, size });
        list
    }

    pub fn blocks(&self) -> &[MemoryBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn free_bytes(&self) -> usize {
        self.blocks.iter().map(|block| block.size).sum()
    }

    pub fn largest(&self) -> usize {
        self.blocks.first().map(|block| block.size).unwrap_or(0)
    }

    fn insert(&mut self, block: MemoryBlock) {
        if block.size == 0 {
            return;
        }
        let index = self.blocks.partition_point(|b| {
            b.size > block.size || (b.size == block.size && b.start < block.start)
        });
        self.blocks.insert(index, block);
    }

    pub fn fetch_best_fit(&mut self, size: usize) -> Option<Address> {
        let fits = self.blocks.partition_point(|block| block.size >= size);
        if fits == 0 {
            return None;
        }
        let smallest = self.blocks[fits - 1].size;
        let index = self.blocks.partition_point(|block| block.size > smallest);
        let block = self.blocks.remove(index);
        self.insert(MemoryBlock {
            start: block.start.offset(size),
            size: block.size - size,
        });
        Some(block.start)
    }

    /// Removes `[start, start + size)` from the block that begins at `start`.
    pub fn take(&mut self, start: Address, size: usize) -> bool {
        let index = match self
            .blocks
            .iter()
            .position(|block| block.start == start && block.size >= size)
        {
            Some(index) => index,
            None => return false,
        };
        let block = self.blocks.remove(index);
        self.insert(MemoryBlock {
            start: block.start.offset(size),
            size: block.size - size,
        });
        true
    }

    /// Returns a span to the list, merging it with the free blocks that
    /// touch it.
    pub fn release(&mut self, start: Address, size: usize) {
        let mut merged = MemoryBlock { start, size };
        for block in self.blocks.iter() {
            if block.start < merged.end() && merged.start < block.end() {
                fatal!("double free of {} ({} bytes)", start, size);
            }
        }
        if let Some(index) = self.blocks.iter().position(|b| b.end() == merged.start) {
            let before = self.blocks.remove(index);
            merged = MemoryBlock {
                start: before.start,
                size: before.size + merged.size,
            };
        }
        if let Some(index) = self.blocks.iter().position(|b| b.start == merged.end()) {
            let after = self.blocks.remove(index);
            merged.size += after.size;
        }
        self.insert(merged);
    }

    pub fn rebuild<I: IntoIterator<Item = MemoryBlock>>(&mut self, blocks: I) {
        self.blocks.clear();
        for block in blocks {
            self.insert(block);
        }
    }
}

impl Default for MemoryBlockList {
    fn default() -> Self {
        Self::new()
    }
}
