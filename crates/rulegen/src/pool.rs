//! Arena for rule elements.
//!
//! Slots live in fixed-size blocks which are never reallocated, a handle is just the slot index
//! plus the generation the slot had when it was handed out. Releasing to a tag drops every slot
//! allocated after the tag and bumps the generation of those indices, so a handle that outlived
//! its phase is caught by the generation check instead of silently aliasing a newer element.

use std::fmt::Debug;

use crate::ast::ElemNode;

const BLOCK_SIZE: usize = 256;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElemHandle {
    index: u32,
    generation: u32,
}

impl ElemHandle {
    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl Debug for ElemHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ElemHandle")
            .field(&self.index)
            .field(&self.generation)
            .finish()
    }
}

/// Checkpoint returned by [`RuleElemPool::tag`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PoolTag {
    len: u32,
    depth: u32,
}

struct Slot {
    node: ElemNode,
    generation: u32,
}

pub struct RuleElemPool {
    blocks: Vec<Vec<Slot>>,
    len: u32,
    // survives releases, the next generation for every index that was ever used
    generations: Vec<u32>,
    tags: Vec<PoolTag>,
    reserved: Option<u32>,
}

impl Default for RuleElemPool {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleElemPool {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            len: 0,
            generations: Vec::new(),
            tags: Vec::new(),
            reserved: None,
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots allocated before the first tag, these are never released.
    pub fn reserved_len(&self) -> usize {
        self.reserved.unwrap_or(self.len) as usize
    }

    pub fn alloc(&mut self, node: ElemNode) -> ElemHandle {
        let index = self.len;
        assert!(index < u32::MAX, "Rule element pool is exhausted");

        let block = index as usize / BLOCK_SIZE;
        if block == self.blocks.len() {
            self.blocks.push(Vec::with_capacity(BLOCK_SIZE));
        }

        if self.generations.len() <= index as usize {
            self.generations.push(0);
        }
        let generation = self.generations[index as usize];

        let slots = &mut self.blocks[block];
        debug_assert!(slots.len() < BLOCK_SIZE);
        slots.push(Slot { node, generation });

        self.len += 1;
        ElemHandle { index, generation }
    }

    pub fn tag(&mut self) -> PoolTag {
        if self.reserved.is_none() {
            self.reserved = Some(self.len);
        }
        let tag = PoolTag {
            len: self.len,
            depth: self.tags.len() as u32,
        };
        self.tags.push(tag);
        log::debug!("pool tag #{} at {}", tag.depth, tag.len);
        tag
    }

    /// Drops everything allocated since `tag`, along with any tags pushed after it.
    pub fn release_to_tag(&mut self, tag: PoolTag) {
        assert!(
            self.tags.get(tag.depth as usize) == Some(&tag),
            "Releasing a tag that is not live: {tag:?}"
        );
        debug_assert!(tag.len >= self.reserved.unwrap_or(0));

        self.tags.truncate(tag.depth as usize);

        for index in tag.len..self.len {
            self.generations[index as usize] += 1;
        }

        let keep_blocks = (tag.len as usize).div_ceil(BLOCK_SIZE);
        self.blocks.truncate(keep_blocks);
        if let Some(last) = self.blocks.last_mut() {
            let in_last = tag.len as usize - (keep_blocks - 1) * BLOCK_SIZE;
            last.truncate(in_last);
        }

        log::debug!(
            "pool released {} slots back to tag #{}",
            self.len - tag.len,
            tag.depth
        );
        self.len = tag.len;
    }

    pub fn is_live(&self, handle: ElemHandle) -> bool {
        handle.index < self.len && self.slot(handle.index).generation == handle.generation
    }

    pub fn try_get(&self, handle: ElemHandle) -> Option<&ElemNode> {
        self.is_live(handle).then(|| &self.slot(handle.index).node)
    }

    #[track_caller]
    pub fn get(&self, handle: ElemHandle) -> &ElemNode {
        debug_assert!(self.is_live(handle), "Stale handle {handle:?}");
        &self.slot(handle.index).node
    }

    #[track_caller]
    pub fn get_mut(&mut self, handle: ElemHandle) -> &mut ElemNode {
        debug_assert!(self.is_live(handle), "Stale handle {handle:?}");
        let index = handle.index as usize;
        &mut self.blocks[index / BLOCK_SIZE][index % BLOCK_SIZE].node
    }

    fn slot(&self, index: u32) -> &Slot {
        let index = index as usize;
        &self.blocks[index / BLOCK_SIZE][index % BLOCK_SIZE]
    }
}

impl std::ops::Index<ElemHandle> for RuleElemPool {
    type Output = ElemNode;
    fn index(&self, index: ElemHandle) -> &Self::Output {
        self.get(index)
    }
}

impl std::ops::IndexMut<ElemHandle> for RuleElemPool {
    fn index_mut(&mut self, index: ElemHandle) -> &mut Self::Output {
        self.get_mut(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ElemNode, RuleElem};

    fn leaf(c: char) -> ElemNode {
        ElemNode::new(RuleElem::Char(c))
    }

    #[test]
    fn release_restores_size() {
        let mut pool = RuleElemPool::new();
        for i in 0..300 {
            pool.alloc(leaf(char::from(b'a' + (i % 26) as u8)));
        }
        let tag = pool.tag();
        for _ in 0..700 {
            pool.alloc(leaf('x'));
        }
        assert_eq!(pool.len(), 1000);

        pool.release_to_tag(tag);
        assert_eq!(pool.len(), 300);
        assert_eq!(pool.reserved_len(), 300);
    }

    #[test]
    fn handles_are_stable_across_growth() {
        let mut pool = RuleElemPool::new();
        let first = pool.alloc(leaf('q'));
        for _ in 0..(BLOCK_SIZE * 3) {
            pool.alloc(leaf('z'));
        }
        assert_eq!(pool[first].elem, RuleElem::Char('q'));
    }

    #[test]
    fn released_handles_go_stale() {
        let mut pool = RuleElemPool::new();
        let shared = pool.alloc(leaf('s'));
        let tag = pool.tag();
        let temp = pool.alloc(leaf('t'));
        pool.release_to_tag(tag);

        let reused = pool.alloc(leaf('u'));
        assert_eq!(temp.index(), reused.index());
        assert!(!pool.is_live(temp));
        assert!(pool.try_get(temp).is_none());
        assert!(pool.is_live(reused));
        assert!(pool.is_live(shared));
    }

    #[test]
    fn nested_tags_release_in_order() {
        let mut pool = RuleElemPool::new();
        pool.alloc(leaf('a'));
        let outer = pool.tag();
        pool.alloc(leaf('b'));
        let inner = pool.tag();
        pool.alloc(leaf('c'));

        pool.release_to_tag(inner);
        assert_eq!(pool.len(), 2);
        pool.release_to_tag(outer);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    #[should_panic]
    fn releasing_dead_tag_panics() {
        let mut pool = RuleElemPool::new();
        let outer = pool.tag();
        let inner = pool.tag();
        pool.release_to_tag(outer);
        pool.release_to_tag(inner);
    }
}
