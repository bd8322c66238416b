// src/gcode/queue.rs - Fixed pool of blocks split into free, pending and active
use super::block::Block;

/// Index of a slot in a `BlockQueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockId(usize);

/// `N` block slots, each owned by exactly one of three sets: the free list,
/// the pending FIFO, or the single active slot. Links are slot indices, so
/// nothing is allocated after construction.
pub struct BlockQueue<const N: usize> {
    blocks: [Block; N],
    next: [Option<BlockId>; N],
    free: Option<BlockId>,
    pending_head: Option<BlockId>,
    pending_tail: Option<BlockId>,
    pending_len: usize,
    active: Option<BlockId>,
}

impl<const N: usize> BlockQueue<N> {
    pub fn new() -> Self {
        let mut next = [None; N];
        for (i, link) in next.iter_mut().enumerate() {
            *link = (i + 1 < N).then_some(BlockId(i + 1));
        }
        Self {
            blocks: std::array::from_fn(|_| Block::default()),
            next,
            free: (N > 0).then_some(BlockId(0)),
            pending_head: None,
            pending_tail: None,
            pending_len: 0,
            active: None,
        }
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn has_free(&self) -> bool {
        self.free.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending_len
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.pending_head.is_none()
    }

    /// Move `block` into a free slot at the tail of the pending FIFO.
    /// Hands the block back when every slot is in use.
    pub fn enqueue(&mut self, block: Block) -> Result<BlockId, Block> {
        let Some(id) = self.free else {
            return Err(block);
        };
        self.free = self.next[id.0].take();
        self.blocks[id.0] = block;
        match self.pending_tail {
            Some(tail) => self.next[tail.0] = Some(id),
            None => self.pending_head = Some(id),
        }
        self.pending_tail = Some(id);
        self.pending_len += 1;
        Ok(id)
    }

    /// Pop the head of the pending FIFO into the active slot. Does nothing
    /// while another block is active.
    pub fn activate(&mut self) -> Option<&Block> {
        if self.active.is_some() {
            return None;
        }
        let id = self.pending_head?;
        self.pending_head = self.next[id.0].take();
        if self.pending_head.is_none() {
            self.pending_tail = None;
        }
        self.pending_len -= 1;
        self.active = Some(id);
        Some(&self.blocks[id.0])
    }

    pub fn active(&self) -> Option<&Block> {
        self.active.map(|id| &self.blocks[id.0])
    }

    /// Return the active block to the free list.
    pub fn retire(&mut self) -> bool {
        match self.active.take() {
            Some(id) => {
                self.release(id);
                true
            }
            None => false,
        }
    }

    /// Drop every pending block and the active one.
    pub fn clear(&mut self) {
        self.retire();
        while let Some(id) = self.pending_head {
            self.pending_head = self.next[id.0].take();
            self.release(id);
        }
        self.pending_tail = None;
        self.pending_len = 0;
    }

    /// Pending blocks from head to tail.
    pub fn pending(&self) -> impl Iterator<Item = &Block> {
        std::iter::successors(self.pending_head, |id| self.next[id.0]).map(|id| &self.blocks[id.0])
    }

    fn release(&mut self, id: BlockId) {
        self.next[id.0] = self.free;
        self.free = Some(id);
    }
}

impl<const N: usize> Default for BlockQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
