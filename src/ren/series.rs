// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/series.rs

// Series stubs: the fixed-size record every array, string, binary,
// context and action is built from. Content is either a single
// inline cell or a dynamic buffer; arrays end implicitly at their
// length, where reads yield END.

// <>

use bitflags::bitflags;

use super::action::Dispatcher;
use super::cell::{Cell, CellFlags, Payload, END, MAX_INLINE_QUOTES};
use super::error::{AccessError, Error, ScriptError};
use super::interp::Interp;
use super::kind::Kind;
use super::node::{Node, NodeByte, PairId, SeriesId};
use super::symtab::Sym;

bitflags! {
    /// Flags fixed when the series is made (or managed)
    #[derive(Default)]
    pub struct SeriesFlags: u32 {
        /// Lifetime is decided by the collector
        const MANAGED = 1 << 0;
        /// Reached during the current mark phase
        const MARKED = 1 << 1;
        /// Kept alive regardless of reachability (API handles)
        const ROOT = 1 << 2;
        /// Capacity may never change
        const FIXED_SIZE = 1 << 3;
        /// Grow capacity by doubling
        const POWER_OF_2 = 1 << 4;
        /// Never use the singular inline form
        const ALWAYS_DYNAMIC = 1 << 5;
        const LINK_NODE_NEEDS_MARK = 1 << 6;
        const MISC_NODE_NEEDS_MARK = 1 << 7;
        /// Keylist used by more than one context; copy before growing
        const KEYLIST_SHARED = 1 << 8;
        const VARLIST = 1 << 9;
        const PARAMLIST = 1 << 10;
        const DETAILS = 1 << 11;
        /// Varlist belongs to a running frame
        const STACK_LIFETIME = 1 << 12;
        /// Single-use API instruction, freed when a feed consumes it
        const API_INSTRUCTION = 1 << 13;
        /// API handle released once a feed consumes it
        const API_RELEASE = 1 << 14;
    }
}

bitflags! {
    /// Flags which may change over the series' life
    #[derive(Default)]
    pub struct SeriesInfo: u32 {
        /// At least one iteration holds the series; see `holds`
        const HOLD = 1 << 0;
        /// Content has been taken away (frame ended, data freed)
        const INACCESSIBLE = 1 << 1;
        /// Permanently read-only
        const FROZEN = 1 << 2;
        /// Read-only until unprotected
        const PROTECTED = 1 << 3;
    }
}

/// Where a context's keys come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Keylist(SeriesId),
    /// Varlist of a running frame, whose keys are its action's params
    Frame { serial: u64, keylist: SeriesId },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Link {
    None,
    KeySource(KeySource),
    /// Keylist this one was copied from
    Ancestor(SeriesId),
    /// Paramlist of the innermost action implementation
    Underlying(SeriesId),
    /// Varlist holding specialized argument values
    Exemplar(Option<SeriesId>),
    File(Sym),
    /// Serial of the frame owning an API handle; zero for none
    Owner(u64),
    Pair(PairId),
}

#[derive(Debug, Clone, Copy)]
pub enum Misc {
    None,
    Line(u32),
    /// Metadata object for a context
    Meta(SeriesId),
    Dispatcher(Dispatcher),
    Action(super::action::ActionFlags),
    /// Quote adjustment applied by an API instruction
    Quoting(i32),
}

#[derive(Debug)]
pub enum Content {
    Singular(Cell),
    Cells(Vec<Cell>),
    Bytes(Vec<u8>),
    Text(String),
    Inaccessible,
}

/// Series stub; occupies one slot of the series pool
#[derive(Debug)]
pub struct Stub {
    pub flags: SeriesFlags,
    pub info: SeriesInfo,
    /// Count of active iterations holding the series
    pub holds: u16,
    /// Usable units before the buffer must expand
    pub rest: usize,
    pub link: Link,
    pub misc: Misc,
    pub content: Content,
}

impl Node for Stub {
    const BYTE: NodeByte = NodeByte::Series;
}

impl Stub {
    pub fn new(content: Content, flags: SeriesFlags) -> Self {
        let rest = match &content {
            Content::Singular(_) => 1,
            Content::Cells(v) => v.capacity(),
            Content::Bytes(b) => b.capacity(),
            Content::Text(s) => s.capacity(),
            Content::Inaccessible => 0,
        };
        Stub {
            flags,
            info: SeriesInfo::empty(),
            holds: 0,
            rest,
            link: Link::None,
            misc: Misc::None,
            content,
        }
    }

    #[inline(always)]
    pub fn dynamic_p(&self) -> bool {
        !matches!(self.content, Content::Singular(_))
    }

    #[inline(always)]
    pub fn managed_p(&self) -> bool {
        self.flags.contains(SeriesFlags::MANAGED)
    }

    pub fn len(&self) -> usize {
        match &self.content {
            Content::Singular(c) => usize::from(!c.end_p()),
            Content::Cells(v) => v.len(),
            Content::Bytes(b) => b.len(),
            Content::Text(s) => s.chars().count(),
            Content::Inaccessible => 0,
        }
    }

    pub fn cells(&self) -> &[Cell] {
        match &self.content {
            Content::Singular(c) if !c.end_p() => std::slice::from_ref(c),
            Content::Cells(v) => v,
            _ => &[],
        }
    }

    pub fn cells_mut(&mut self) -> &mut [Cell] {
        match &mut self.content {
            Content::Singular(c) if !c.end_p() => std::slice::from_mut(c),
            Content::Cells(v) => v,
            _ => &mut [],
        }
    }

    /// Cell at an index, or END past the tail
    #[inline(always)]
    pub fn at(&self, index: usize) -> Cell {
        self.cells().get(index).copied().unwrap_or(END)
    }
}

/// Pairs with the two cells of a pairing node
#[derive(Debug)]
pub struct Pairing(pub [Cell; 2]);

impl Node for Pairing {
    const BYTE: NodeByte = NodeByte::Cell;
}

/// What a freed series reads as: inaccessible, with no content
pub(crate) const DECAYED: Stub = Stub {
    flags: SeriesFlags::empty(),
    info: SeriesInfo::INACCESSIBLE,
    holds: 0,
    rest: 0,
    link: Link::None,
    misc: Misc::None,
    content: Content::Inaccessible,
};

static DECAYED_STUB: Stub = DECAYED;

fn dangling(id: SeriesId) -> &'static Stub {
    log::error!("access to freed series {:?}", id);
    &DECAYED_STUB
}

impl Interp {
    /// Allocates a stub and charges it against the collection ballast
    pub(crate) fn alloc_series(&mut self, stub: Stub) -> SeriesId {
        let units = stub.rest.max(1);
        self.charge_ballast(units);
        SeriesId(self.series.alloc(stub))
    }

    #[inline(always)]
    pub(crate) fn stub(&self, id: SeriesId) -> &Stub {
        match self.series.get(id.0) {
            Some(s) => s,
            None => dangling(id),
        }
    }

    #[inline(always)]
    pub(crate) fn stub_mut(&mut self, id: SeriesId) -> &mut Stub {
        match self.series.get_mut(id.0) {
            Some(s) => s,
            None => {
                log::error!("write to freed series {:?}", id);
                self.decayed = DECAYED;
                &mut self.decayed
            }
        }
    }

    pub(crate) fn make_array(&mut self, capacity: usize, managed: bool) -> SeriesId {
        self.make_array_from(Vec::with_capacity(capacity), managed)
    }

    pub(crate) fn make_array_from(&mut self, cells: Vec<Cell>, managed: bool) -> SeriesId {
        let flags = if managed {
            SeriesFlags::MANAGED | SeriesFlags::POWER_OF_2
        } else {
            SeriesFlags::POWER_OF_2
        };
        self.alloc_series(Stub::new(Content::Cells(cells), flags))
    }

    /// One-cell array using the inline form
    pub(crate) fn make_singular(&mut self, cell: Cell, flags: SeriesFlags) -> SeriesId {
        self.alloc_series(Stub::new(Content::Singular(cell), flags))
    }

    pub(crate) fn make_text(&mut self, s: &str) -> SeriesId {
        self.alloc_series(Stub::new(
            Content::Text(String::from(s)),
            SeriesFlags::MANAGED,
        ))
    }

    pub(crate) fn make_binary(&mut self, bytes: Vec<u8>) -> SeriesId {
        self.alloc_series(Stub::new(Content::Bytes(bytes), SeriesFlags::MANAGED))
    }

    /// Hands the series to the collector
    pub(crate) fn manage(&mut self, id: SeriesId) {
        self.stub_mut(id).flags.insert(SeriesFlags::MANAGED);
    }

    /// Frees a series the collector does not know about
    pub(crate) fn free_unmanaged(&mut self, id: SeriesId) {
        debug_assert!(!self.stub(id).managed_p());
        self.free_series(id);
    }

    pub(crate) fn free_series(&mut self, id: SeriesId) {
        self.faults.remove(&id);
        self.series.free(id.0);
    }

    #[inline(always)]
    pub(crate) fn arr_len(&self, id: SeriesId) -> usize {
        self.stub(id).len()
    }

    #[inline(always)]
    pub(crate) fn arr_at(&self, id: SeriesId, index: usize) -> Cell {
        self.stub(id).at(index)
    }

    pub(crate) fn arr_cells(&self, id: SeriesId) -> &[Cell] {
        self.stub(id).cells()
    }

    /// Text content of a string series
    pub(crate) fn text(&self, id: SeriesId) -> &str {
        match &self.stub(id).content {
            Content::Text(s) => s,
            _ => "",
        }
    }

    /// Characters of a string, tag or file cell from its index on
    pub(crate) fn series_text(&self, cell: &Cell) -> String {
        match cell.as_series() {
            Some((s, i)) => self.text(s).chars().skip(i).collect(),
            None => String::new(),
        }
    }

    pub(crate) fn bytes(&self, id: SeriesId) -> &[u8] {
        match &self.stub(id).content {
            Content::Bytes(b) => b,
            _ => &[],
        }
    }

    /// Refuses modification of held, frozen, protected or freed series
    pub(crate) fn ensure_mutable(&self, id: SeriesId) -> Result<(), Error> {
        let stub = self.stub(id);
        if stub.info.contains(SeriesInfo::INACCESSIBLE) {
            return Err(ScriptError::Inaccessible.into());
        }
        if stub.info.intersects(SeriesInfo::FROZEN | SeriesInfo::PROTECTED) {
            return Err(AccessError::Protected(String::from("series")).into());
        }
        if stub.holds > 0 {
            return Err(ScriptError::SeriesHeld.into());
        }
        Ok(())
    }

    /// Makes room for `delta` more units, doubling where allowed
    pub(crate) fn expand(&mut self, id: SeriesId, delta: usize) -> Result<(), Error> {
        let stub = self.stub(id);
        let needed = stub.len() + delta;
        if needed <= stub.rest && stub.dynamic_p() {
            return Ok(());
        }
        if stub.flags.contains(SeriesFlags::FIXED_SIZE) {
            return Err(ScriptError::OutOfRange(String::from("fixed-size series")).into());
        }

        let grown = if stub.flags.contains(SeriesFlags::POWER_OF_2) {
            needed.next_power_of_two().max(4)
        } else {
            needed
        };
        let extra = grown.saturating_sub(stub.rest);

        let stub = self.stub_mut(id);
        if let Content::Singular(c) = stub.content {
            let mut v = Vec::with_capacity(grown);
            if !c.end_p() {
                v.push(c);
            }
            stub.content = Content::Cells(v);
        } else {
            match &mut stub.content {
                Content::Cells(v) => v.reserve(grown - v.len()),
                Content::Bytes(b) => b.reserve(grown - b.len()),
                Content::Text(s) => s.reserve(grown - s.len().min(grown)),
                _ => {}
            }
        }
        stub.rest = grown;
        self.charge_ballast(extra);
        Ok(())
    }

    pub(crate) fn arr_push(&mut self, id: SeriesId, cell: Cell) -> Result<(), Error> {
        self.ensure_mutable(id)?;
        self.expand(id, 1)?;
        if let Content::Cells(v) = &mut self.stub_mut(id).content {
            v.push(cell);
        }
        Ok(())
    }

    /// Splices cells in at an index (clamped to the tail)
    pub(crate) fn arr_insert(
        &mut self,
        id: SeriesId,
        index: usize,
        cells: &[Cell],
    ) -> Result<(), Error> {
        self.ensure_mutable(id)?;
        self.expand(id, cells.len())?;
        if let Content::Cells(v) = &mut self.stub_mut(id).content {
            let at = index.min(v.len());
            v.splice(at..at, cells.iter().copied());
        }
        Ok(())
    }

    pub(crate) fn arr_remove(&mut self, id: SeriesId, index: usize, count: usize) -> Result<(), Error> {
        self.ensure_mutable(id)?;
        if let Content::Cells(v) = &mut self.stub_mut(id).content {
            let from = index.min(v.len());
            let to = (index + count).min(v.len());
            v.drain(from..to);
        }
        Ok(())
    }

    /// Adds a text fragment at an index in characters
    pub(crate) fn text_insert(&mut self, id: SeriesId, index: usize, s: &str) -> Result<(), Error> {
        self.ensure_mutable(id)?;
        self.expand(id, s.len())?;
        if let Content::Text(t) = &mut self.stub_mut(id).content {
            let at = t.char_indices().nth(index).map(|(b, _)| b).unwrap_or(t.len());
            t.insert_str(at, s);
        }
        Ok(())
    }

    /// Adds bytes at a byte index
    pub(crate) fn binary_insert(&mut self, id: SeriesId, index: usize, b: &[u8]) -> Result<(), Error> {
        self.ensure_mutable(id)?;
        self.expand(id, b.len())?;
        if let Content::Bytes(v) = &mut self.stub_mut(id).content {
            let at = index.min(v.len());
            v.splice(at..at, b.iter().copied());
        }
        Ok(())
    }

    /// Takes an iteration hold; the series refuses modification until released
    pub(crate) fn hold(&mut self, id: SeriesId) {
        let stub = self.stub_mut(id);
        stub.holds += 1;
        stub.info.insert(SeriesInfo::HOLD);
    }

    pub(crate) fn release_hold(&mut self, id: SeriesId) {
        if let Some(stub) = self.series.get_mut(id.0) {
            stub.holds = stub.holds.saturating_sub(1);
            if stub.holds == 0 {
                stub.info.remove(SeriesInfo::HOLD);
            }
        }
    }

    /// Drops the content of a series; later access fails instead of crashing
    pub(crate) fn decay(&mut self, id: SeriesId) {
        let stub = self.stub_mut(id);
        stub.content = Content::Inaccessible;
        stub.rest = 0;
        stub.info.insert(SeriesInfo::INACCESSIBLE);
    }

    /// Exchanges the content of two series of the same width
    pub(crate) fn swap_content(&mut self, a: SeriesId, b: SeriesId) {
        if a == b {
            return;
        }
        let taken = std::mem::replace(&mut self.stub_mut(a).content, Content::Inaccessible);
        let rest_a = self.stub(a).rest;
        let rest_b = self.stub(b).rest;

        let other = std::mem::replace(&mut self.stub_mut(b).content, taken);
        self.stub_mut(b).rest = rest_a;
        let stub = self.stub_mut(a);
        stub.content = other;
        stub.rest = rest_b;
    }

    /// Shallow copy of an array from an index
    pub(crate) fn copy_array_at(&mut self, id: SeriesId, index: usize, managed: bool) -> SeriesId {
        let cells: Vec<Cell> = self
            .arr_cells(id)
            .iter()
            .skip(index)
            .map(|c| c.fresh())
            .collect();
        self.make_array_from(cells, managed)
    }

    /// Quote level of a cell, inline or in a pairing
    pub(crate) fn quote_depth(&self, cell: &Cell) -> u32 {
        if cell.deep_quoted_p() {
            if let Payload::Quoted { pair } = cell.payload {
                if let Some(p) = self.pairs.get(pair.0) {
                    return p.0[1].as_integer().unwrap_or(0) as u32;
                }
            }
            return 0;
        }
        cell.inline_quotes()
    }

    /// The cell beneath all its quote levels
    pub(crate) fn unquoted_base(&self, cell: Cell) -> Cell {
        if cell.deep_quoted_p() {
            if let Payload::Quoted { pair } = cell.payload {
                if let Some(p) = self.pairs.get(pair.0) {
                    return p.0[0];
                }
            }
        }
        cell.with_inline_quotes(0)
    }

    fn quoted_to(&mut self, base: Cell, depth: u32) -> Cell {
        if depth <= MAX_INLINE_QUOTES {
            return base.with_inline_quotes(depth);
        }
        let id = self.pairs.alloc(Pairing([base, Cell::integer(depth as i64)]));
        self.charge_ballast(2);
        let mut cell = Cell::quoted_pair(base.mirror(), PairId(id));
        cell.flags = base.flags & CellFlags::NEWLINE_BEFORE;
        cell
    }

    /// Adds quote levels, moving to a pairing past the inline maximum
    pub(crate) fn quotify(&mut self, cell: Cell, levels: u32) -> Cell {
        if levels == 0 {
            return cell;
        }
        let depth = self.quote_depth(&cell) + levels;
        let base = self.unquoted_base(cell);
        self.quoted_to(base, depth)
    }

    /// Removes up to `levels` quote levels
    pub(crate) fn unquotify(&mut self, cell: Cell, levels: u32) -> Cell {
        if levels == 0 {
            return cell;
        }
        let depth = self.quote_depth(&cell).saturating_sub(levels);
        let base = self.unquoted_base(cell);
        self.quoted_to(base, depth)
    }

    pub(crate) fn series_kind_name(&self, id: SeriesId) -> &'static str {
        match self.stub(id).content {
            Content::Text(_) => Kind::Text.name(),
            Content::Bytes(_) => Kind::Binary.name(),
            _ => Kind::Block.name(),
        }
    }
}

#[cfg(test)]
mod series_tests {
    use super::*;
    use crate::ren::interp::InterpConfig;

    fn interp() -> Interp {
        Interp::new(InterpConfig::default())
    }

    #[test]
    fn arrays_end_at_length() {
        let mut it = interp();
        let a = it.make_array_from(vec![Cell::integer(1), Cell::integer(2)], false);
        assert_eq!(it.arr_len(a), 2);
        assert!(it.arr_at(a, 2).end_p());
        assert_eq!(it.arr_at(a, 1).as_integer(), Some(2));
        it.free_unmanaged(a);
    }

    #[test]
    fn singular_expands_to_dynamic() {
        let mut it = interp();
        let s = it.make_singular(Cell::integer(5), SeriesFlags::empty());
        assert!(!it.stub(s).dynamic_p());
        it.arr_push(s, Cell::integer(6)).unwrap();
        assert!(it.stub(s).dynamic_p());
        assert_eq!(it.arr_len(s), 2);
        assert_eq!(it.arr_at(s, 0).as_integer(), Some(5));
    }

    #[test]
    fn fixed_size_refuses_growth() {
        let mut it = interp();
        let a = it.make_array(2, false);
        it.stub_mut(a).flags.insert(SeriesFlags::FIXED_SIZE);
        it.stub_mut(a).rest = 2;
        it.arr_push(a, Cell::blank()).unwrap();
        it.arr_push(a, Cell::blank()).unwrap();
        assert!(it.arr_push(a, Cell::blank()).is_err());
    }

    #[test]
    fn holds_block_modification() {
        let mut it = interp();
        let a = it.make_array(4, false);
        it.hold(a);
        it.hold(a);
        assert_eq!(
            it.arr_push(a, Cell::blank()),
            Err(Error::Script(ScriptError::SeriesHeld))
        );
        it.release_hold(a);
        assert!(it.arr_push(a, Cell::blank()).is_err());
        it.release_hold(a);
        assert!(it.arr_push(a, Cell::blank()).is_ok());
    }

    #[test]
    fn decayed_series_fail_cleanly() {
        let mut it = interp();
        let a = it.make_array_from(vec![Cell::integer(1)], false);
        it.decay(a);
        assert_eq!(it.arr_len(a), 0);
        assert_eq!(
            it.arr_push(a, Cell::blank()),
            Err(Error::Script(ScriptError::Inaccessible))
        );
    }

    #[test]
    fn swapping_content() {
        let mut it = interp();
        let a = it.make_array_from(vec![Cell::integer(1)], false);
        let b = it.make_text("abc");
        it.swap_content(a, b);
        assert_eq!(it.text(a), "abc");
        assert_eq!(it.arr_at(b, 0).as_integer(), Some(1));
    }

    #[test]
    fn text_inserts_by_character() {
        let mut it = interp();
        let t = it.make_text("héllo");
        it.text_insert(t, 2, "-").unwrap();
        assert_eq!(it.text(t), "hé-llo");
        it.text_insert(t, 99, "!").unwrap();
        assert_eq!(it.text(t), "hé-llo!");
    }
}

#[cfg(test)]
mod decayed_tests {
    use super::*;
    use crate::ren::error::ScriptError;
    use crate::ren::interp::InterpConfig;

    #[test]
    fn freed_series_read_as_inaccessible() {
        let mut it = Interp::new(InterpConfig::default());
        let arr = it.make_array_from(vec![Cell::integer(1)], false);
        it.free_series(arr);
        assert!(it.stub(arr).info.contains(SeriesInfo::INACCESSIBLE));
        assert!(it.arr_at(arr, 0).end_p());
        assert_eq!(it.arr_push(arr, Cell::blank()), Err(ScriptError::Inaccessible.into()));

        it.stub_mut(arr).misc = Misc::Line(3);
        assert!(it.series.get(arr.0).is_none());
        assert!(matches!(it.stub(arr).misc, Misc::None));
    }
}
