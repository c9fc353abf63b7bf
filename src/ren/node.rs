// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/node.rs

// Fixed-size node pools. Series stubs and cell pairings are carved
// out of segments of equal-sized slots, with freed slots threaded
// onto a free list for reuse.

// <>

use std::fmt;

/// Handle to a series stub in the series pool
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesId(pub u32);

/// Handle to a two-cell pairing in the pair pool
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairId(pub u32);

impl fmt::Debug for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#s{}", self.0)
    }
}

impl fmt::Debug for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#p{}", self.0)
    }
}

const NODE_FLAG_NODE: u8 = 0x80;
const NODE_FLAG_FREE: u8 = 0x40;
const NODE_FLAG_CELL: u8 = 0x01;

enum_and_tryfrom! {
    /// Leading byte every node reports; the free pattern can never
    /// begin a valid UTF-8 sequence
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u8)]
    pub enum NodeByte {
        Free = NODE_FLAG_NODE | NODE_FLAG_FREE,
        Series = NODE_FLAG_NODE,
        Cell = NODE_FLAG_NODE | NODE_FLAG_CELL,
    }
}

impl NodeByte {
    #[inline(always)]
    pub fn free_p(self) -> bool {
        self as u8 & NODE_FLAG_FREE != 0
    }

    #[inline(always)]
    pub fn cell_p(self) -> bool {
        self as u8 & NODE_FLAG_CELL != 0
    }
}

/// Anything which may occupy a pool slot
pub trait Node {
    const BYTE: NodeByte;
}

enum Slot<T> {
    Free { next: Option<u32> },
    Live(T),
}

/// Segmented allocator of same-sized nodes
pub struct Pool<T> {
    name: &'static str,
    segments: Vec<Box<[Slot<T>]>>,
    units: usize,
    free: Option<u32>,
    live: usize,
}

impl<T: Node> Pool<T> {
    pub fn new(name: &'static str, units: usize) -> Self {
        Self {
            name,
            segments: Vec::new(),
            units: units.max(1),
            free: None,
            live: 0,
        }
    }

    /// Adds a segment, threading its slots onto the free list
    fn grow(&mut self) {
        let base = (self.segments.len() * self.units) as u32;
        let units = self.units as u32;
        let old_free = self.free;

        let segment: Box<[Slot<T>]> = (0..units)
            .map(|i| Slot::Free {
                next: if i + 1 < units {
                    Some(base + i + 1)
                } else {
                    old_free
                },
            })
            .collect();

        if cfg!(feature = "memdbg") {
            log::trace!("{} pool grew to {} segments", self.name, self.segments.len() + 1);
        }

        self.segments.push(segment);
        self.free = Some(base);
    }

    #[inline(always)]
    fn locate(&self, id: u32) -> (usize, usize) {
        (id as usize / self.units, id as usize % self.units)
    }

    /// Places an item in a free slot and returns its index
    pub fn alloc(&mut self, item: T) -> u32 {
        let id = match self.free {
            Some(id) => id,
            None => {
                self.grow();
                match self.free {
                    Some(id) => id,
                    None => unreachable!("pool growth produced no free slot"),
                }
            }
        };

        let (seg, pos) = self.locate(id);
        let slot = &mut self.segments[seg][pos];

        self.free = match slot {
            Slot::Free { next } => *next,
            Slot::Live(_) => panic!("{} pool free list reached a live node", self.name),
        };

        *slot = Slot::Live(item);
        self.live += 1;

        if cfg!(feature = "memdbg") {
            log::trace!("{} pool alloc {}", self.name, id);
        }

        id
    }

    /// Returns a slot to the free list, handing back what it held
    pub fn free(&mut self, id: u32) -> Option<T> {
        let (seg, pos) = self.locate(id);
        let slot = self.segments.get_mut(seg)?.get_mut(pos)?;

        if let Slot::Free { .. } = slot {
            return None;
        }

        let old = std::mem::replace(slot, Slot::Free { next: self.free });
        self.free = Some(id);
        self.live -= 1;

        if cfg!(feature = "memdbg") {
            log::trace!("{} pool free {}", self.name, id);
        }

        match old {
            Slot::Live(item) => Some(item),
            Slot::Free { .. } => None,
        }
    }

    #[inline(always)]
    pub fn get(&self, id: u32) -> Option<&T> {
        let (seg, pos) = self.locate(id);
        match self.segments.get(seg)?.get(pos)? {
            Slot::Live(item) => Some(item),
            Slot::Free { .. } => None,
        }
    }

    #[inline(always)]
    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        let (seg, pos) = self.locate(id);
        match self.segments.get_mut(seg)?.get_mut(pos)? {
            Slot::Live(item) => Some(item),
            Slot::Free { .. } => None,
        }
    }

    /// Reads the leading byte of whatever occupies a slot
    pub fn node_byte(&self, id: u32) -> NodeByte {
        match self.get(id) {
            Some(_) => T::BYTE,
            None => NodeByte::Free,
        }
    }

    /// Indices of every occupied slot, in address order
    pub fn live_ids(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.live);
        for (s, seg) in self.segments.iter().enumerate() {
            for (p, slot) in seg.iter().enumerate() {
                if let Slot::Live(_) = slot {
                    out.push((s * self.units + p) as u32);
                }
            }
        }
        out
    }

    #[inline(always)]
    pub fn live(&self) -> usize {
        self.live
    }

    pub fn capacity(&self) -> usize {
        self.segments.len() * self.units
    }
}

#[cfg(test)]
mod pool_tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, PartialEq)]
    struct Dummy(u32);

    impl Node for Dummy {
        const BYTE: NodeByte = NodeByte::Cell;
    }

    #[test]
    fn free_byte_is_not_utf8_lead() {
        assert!(std::str::from_utf8(&[NodeByte::Free as u8]).is_err());
        assert!(NodeByte::Free.free_p());
        assert!(!NodeByte::Series.free_p());
        assert!(NodeByte::Cell.cell_p());
    }

    #[test]
    fn reuses_freed_slots() {
        let mut pool = Pool::new("test", 4);
        let a = pool.alloc(Dummy(1));
        let b = pool.alloc(Dummy(2));
        assert_eq!(pool.live(), 2);
        assert_eq!(pool.free(a), Some(Dummy(1)));
        assert_eq!(pool.node_byte(a), NodeByte::Free);
        assert_eq!(pool.node_byte(b), NodeByte::Cell);
        let c = pool.alloc(Dummy(3));
        assert_eq!(a, c);
        assert_eq!(pool.capacity(), 4);
    }

    #[test]
    fn double_free_is_refused() {
        let mut pool = Pool::new("test", 2);
        let a = pool.alloc(Dummy(1));
        assert!(pool.free(a).is_some());
        assert!(pool.free(a).is_none());
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn grows_by_segments() {
        let mut pool = Pool::new("test", 3);
        let ids: Vec<u32> = (0..7).map(|i| pool.alloc(Dummy(i))).collect();
        assert_eq!(pool.capacity(), 9);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(pool.get(*id), Some(&Dummy(i as u32)));
        }
        assert_eq!(pool.live_ids().len(), 7);
    }

    proptest! {
        #[test]
        fn live_count_matches_model(ops in proptest::collection::vec(any::<(bool, u8)>(), 1..200)) {
            let mut pool = Pool::new("prop", 8);
            let mut model: Vec<u32> = Vec::new();

            for (alloc, pick) in ops {
                if alloc || model.is_empty() {
                    model.push(pool.alloc(Dummy(pick as u32)));
                } else {
                    let id = model.swap_remove(pick as usize % model.len());
                    prop_assert!(pool.free(id).is_some());
                }
                prop_assert_eq!(pool.live(), model.len());
            }

            let mut live = pool.live_ids();
            live.sort();
            model.sort();
            prop_assert_eq!(live, model);
        }
    }
}
