// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/cell.rs

// The fixed-size value cell: a kind byte with packed quote level, a
// flag header, a binding and a payload.

// <>

use bitflags::bitflags;

use super::device::EventType;
use super::kind::{Kind, Typeset, QUOTE_SHIFT};
use super::node::{PairId, SeriesId};
use super::symtab::Sym;

bitflags! {
    /// Header bits of a cell
    #[derive(Default)]
    pub struct CellFlags: u32 {
        /// Keep the cell alive regardless of reachability (API handles)
        const ROOT = 1 << 0;
        const PROTECTED = 1 << 1;
        /// The cell lives in a frame and dies with it
        const STACK_LIFETIME = 1 << 2;
        /// Produced directly from source without evaluation
        const UNEVALUATED = 1 << 3;
        const NEWLINE_BEFORE = 1 << 4;
        /// Argument has already passed its typecheck
        const ARG_MARKED_CHECKED = 1 << 5;
        /// Output slot holds a value from a previous step
        const OUT_MARKED_STALE = 1 << 6;
        /// Iteration marked this element for removal
        const MARKED_REMOVE = 1 << 7;
        /// Variable slot reused from a previous binding
        const VAR_MARKED_REUSE = 1 << 8;
        /// Action value is to be run with its left argument taken
        const ENFIXED = 1 << 9;
        /// Fetched value is a temporary, not a pointer into an array
        const FETCHED_MARKED_TEMPORARY = 1 << 10;
    }
}

/// What a bindable cell's words are looked up in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Unbound,
    /// Bound to a context varlist
    Specific(SeriesId),
    /// Bound to an action paramlist; resolved through a frame specifier
    Relative(SeriesId),
}

impl Default for Binding {
    fn default() -> Self {
        Binding::Unbound
    }
}

/// How a parameter takes its argument from the callsite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamClass {
    /// Evaluate one full expression, with enfix lookahead
    Normal,
    /// Evaluate without enfix lookahead
    Tight,
    /// Take the next value literally
    HardQuote,
    /// Take the next value literally unless it is a group or get-word/path
    SoftQuote,
    /// Switch for the parameters following it
    Refinement,
    /// Not taken from the callsite
    Local,
    /// Filled with a definitional RETURN for the frame
    Return,
}

bitflags! {
    #[derive(Default)]
    pub struct ParamFlags: u8 {
        /// Not visible to callers; set by specialization
        const HIDDEN = 1 << 0;
        /// May be null when the callsite runs out of values
        const ENDABLE = 1 << 1;
        /// Hard quote which yields null instead of failing on type mismatch
        const SKIPPABLE = 1 << 2;
        /// Blank argument makes the whole call return null
        const NOOP_IF_BLANK = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    None,
    Logic(bool),
    Integer(i64),
    Decimal(f64),
    Char(char),
    Datatype(Kind),
    Typeset(Typeset),
    Handle(usize),
    Series {
        series: SeriesId,
        index: usize,
    },
    Word {
        sym: Sym,
        index: usize,
    },
    Context {
        varlist: SeriesId,
        phase: Option<SeriesId>,
    },
    Action {
        paramlist: SeriesId,
        details: SeriesId,
    },
    Param {
        sym: Sym,
        class: ParamClass,
        types: Typeset,
        flags: ParamFlags,
    },
    Quoted {
        pair: PairId,
    },
    Event {
        what: EventType,
        port: Option<SeriesId>,
    },
}

/// A single value slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    /// Kind plus quote level times QUOTE_SHIFT, or Quoted beyond that
    kind_byte: u8,
    /// The kind beneath any quoting
    mirror: Kind,
    pub flags: CellFlags,
    pub extra: Binding,
    pub payload: Payload,
}

/// Highest quote level packed into the kind byte itself
pub const MAX_INLINE_QUOTES: u32 = 3;

/// Immutable terminator, read wherever an array runs out
pub const END: Cell = Cell::of(Kind::End, Payload::None);

impl Default for Cell {
    fn default() -> Self {
        END
    }
}

impl Cell {
    #[inline(always)]
    pub const fn of(kind: Kind, payload: Payload) -> Self {
        Cell {
            kind_byte: kind as u8,
            mirror: kind,
            flags: CellFlags::empty(),
            extra: Binding::Unbound,
            payload,
        }
    }

    #[inline(always)]
    pub const fn end() -> Self {
        END
    }

    #[inline(always)]
    pub const fn nulled() -> Self {
        Cell::of(Kind::Nulled, Payload::None)
    }

    #[inline(always)]
    pub const fn void() -> Self {
        Cell::of(Kind::Void, Payload::None)
    }

    #[inline(always)]
    pub const fn blank() -> Self {
        Cell::of(Kind::Blank, Payload::None)
    }

    #[inline(always)]
    pub const fn logic(b: bool) -> Self {
        Cell::of(Kind::Logic, Payload::Logic(b))
    }

    #[inline(always)]
    pub const fn integer(i: i64) -> Self {
        Cell::of(Kind::Integer, Payload::Integer(i))
    }

    #[inline(always)]
    pub const fn decimal(d: f64) -> Self {
        Cell::of(Kind::Decimal, Payload::Decimal(d))
    }

    pub const fn char(c: char) -> Self {
        Cell::of(Kind::Char, Payload::Char(c))
    }

    pub const fn datatype(k: Kind) -> Self {
        Cell::of(Kind::Datatype, Payload::Datatype(k))
    }

    pub const fn typeset(ts: Typeset) -> Self {
        Cell::of(Kind::Typeset, Payload::Typeset(ts))
    }

    pub const fn handle(h: usize) -> Self {
        Cell::of(Kind::Handle, Payload::Handle(h))
    }

    pub const fn event(what: EventType, port: Option<SeriesId>) -> Self {
        Cell::of(Kind::Event, Payload::Event { what, port })
    }

    #[inline(always)]
    pub const fn series(kind: Kind, series: SeriesId, index: usize) -> Self {
        Cell::of(kind, Payload::Series { series, index })
    }

    /// Unbound word of any word kind
    pub const fn word(kind: Kind, sym: Sym) -> Self {
        Cell::of(kind, Payload::Word { sym, index: 0 })
    }

    pub const fn bound_word(kind: Kind, sym: Sym, binding: Binding, index: usize) -> Self {
        let mut cell = Cell::of(kind, Payload::Word { sym, index });
        cell.extra = binding;
        cell
    }

    pub const fn context(kind: Kind, varlist: SeriesId, phase: Option<SeriesId>) -> Self {
        Cell::of(kind, Payload::Context { varlist, phase })
    }

    pub const fn action(paramlist: SeriesId, details: SeriesId, binding: Binding) -> Self {
        let mut cell = Cell::of(Kind::Action, Payload::Action { paramlist, details });
        cell.extra = binding;
        cell
    }

    pub const fn param(sym: Sym, class: ParamClass, types: Typeset, flags: ParamFlags) -> Self {
        Cell::of(
            Kind::Typeset,
            Payload::Param {
                sym,
                class,
                types,
                flags,
            },
        )
    }

    /// Cell standing for a deep quote held in a pairing
    pub(super) const fn quoted_pair(mirror: Kind, pair: PairId) -> Self {
        Cell {
            kind_byte: Kind::Quoted as u8,
            mirror,
            flags: CellFlags::empty(),
            extra: Binding::Unbound,
            payload: Payload::Quoted { pair },
        }
    }

    /// Kind as seen by typechecks; Quoted for any quoted value
    #[inline(always)]
    pub fn kind(&self) -> Kind {
        if self.kind_byte == self.mirror as u8 {
            self.mirror
        } else {
            Kind::Quoted
        }
    }

    /// Kind beneath all quote levels
    #[inline(always)]
    pub fn mirror(&self) -> Kind {
        self.mirror
    }

    /// Quote levels encoded directly in the kind byte
    #[inline(always)]
    pub fn inline_quotes(&self) -> u32 {
        (self.kind_byte / QUOTE_SHIFT) as u32
    }

    #[inline(always)]
    pub fn deep_quoted_p(&self) -> bool {
        self.kind_byte == Kind::Quoted as u8 && self.mirror != Kind::Quoted
    }

    /// Adjusts the inline quote level; callers handle levels past the maximum
    pub(super) fn with_inline_quotes(mut self, depth: u32) -> Self {
        debug_assert!(depth <= MAX_INLINE_QUOTES);
        self.kind_byte = self.mirror as u8 + (depth as u8) * QUOTE_SHIFT;
        self
    }

    /// Reinterprets an unquoted cell as another kind with the same payload
    pub fn rekind(mut self, kind: Kind) -> Self {
        debug_assert!(self.inline_quotes() == 0 && !self.deep_quoted_p());
        self.kind_byte = kind as u8;
        self.mirror = kind;
        self
    }

    #[inline(always)]
    pub fn end_p(&self) -> bool {
        self.kind_byte == Kind::End as u8
    }

    #[inline(always)]
    pub fn nulled_p(&self) -> bool {
        self.kind_byte == Kind::Nulled as u8
    }

    #[inline(always)]
    pub fn void_p(&self) -> bool {
        self.kind_byte == Kind::Void as u8
    }

    #[inline(always)]
    pub fn blank_p(&self) -> bool {
        self.kind_byte == Kind::Blank as u8
    }

    #[inline(always)]
    pub fn action_p(&self) -> bool {
        self.kind_byte == Kind::Action as u8
    }

    #[inline(always)]
    pub fn quoted_p(&self) -> bool {
        self.kind() == Kind::Quoted
    }

    /// Conditional truth; void must be rejected before asking
    #[inline(always)]
    pub fn truthy_p(&self) -> bool {
        match self.kind() {
            Kind::Nulled | Kind::Blank | Kind::End => false,
            Kind::Logic => self.payload != Payload::Logic(false),
            _ => true,
        }
    }

    #[inline(always)]
    pub fn falsey_p(&self) -> bool {
        !self.truthy_p()
    }

    /// Output is stale: nothing written since the expression began
    #[inline(always)]
    pub fn stale_p(&self) -> bool {
        self.end_p() || self.flags.contains(CellFlags::OUT_MARKED_STALE)
    }

    /// Copy without the per-slot header bits
    pub fn fresh(mut self) -> Self {
        self.flags.remove(
            CellFlags::OUT_MARKED_STALE
                | CellFlags::ARG_MARKED_CHECKED
                | CellFlags::ROOT
                | CellFlags::STACK_LIFETIME
                | CellFlags::UNEVALUATED
                | CellFlags::MARKED_REMOVE
                | CellFlags::FETCHED_MARKED_TEMPORARY
                | CellFlags::VAR_MARKED_REUSE,
        );
        self
    }

    pub fn with_flags(mut self, flags: CellFlags) -> Self {
        self.flags.insert(flags);
        self
    }

    pub fn as_logic(&self) -> Option<bool> {
        match self.payload {
            Payload::Logic(b) if self.kind() == Kind::Logic => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.payload {
            Payload::Integer(i) if self.kind() == Kind::Integer => Some(i),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<f64> {
        match self.payload {
            Payload::Decimal(d) if self.kind() == Kind::Decimal => Some(d),
            Payload::Integer(i) if self.kind() == Kind::Integer => Some(i as f64),
            _ => None,
        }
    }

    pub fn as_series(&self) -> Option<(SeriesId, usize)> {
        match self.payload {
            Payload::Series { series, index } => Some((series, index)),
            _ => None,
        }
    }

    /// Symbol of an unquoted or quoted word
    pub fn as_word(&self) -> Option<Sym> {
        match self.payload {
            Payload::Word { sym, .. } => Some(sym),
            _ => None,
        }
    }

    pub fn as_context(&self) -> Option<SeriesId> {
        match self.payload {
            Payload::Context { varlist, .. } => Some(varlist),
            _ => None,
        }
    }

    pub fn as_action(&self) -> Option<(SeriesId, SeriesId)> {
        match self.payload {
            Payload::Action { paramlist, details } if self.action_p() => {
                Some((paramlist, details))
            }
            _ => None,
        }
    }

    pub fn as_datatype(&self) -> Option<Kind> {
        match self.payload {
            Payload::Datatype(k) if self.kind() == Kind::Datatype => Some(k),
            _ => None,
        }
    }

    /// Name, class, types and flags of a parameter cell
    pub fn as_param(&self) -> Option<(Sym, ParamClass, Typeset, ParamFlags)> {
        match self.payload {
            Payload::Param {
                sym,
                class,
                types,
                flags,
            } => Some((sym, class, types, flags)),
            _ => None,
        }
    }

    pub fn set_index(&mut self, index: usize) {
        if let Payload::Series { index: i, .. } = &mut self.payload {
            *i = index;
        }
    }

    pub fn index(&self) -> usize {
        match self.payload {
            Payload::Series { index, .. } => index,
            Payload::Word { index, .. } => index,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod cell_tests {
    use super::*;

    #[test]
    fn inline_quoting() {
        let one = Cell::integer(1);
        assert_eq!(one.kind(), Kind::Integer);

        let q = one.with_inline_quotes(2);
        assert_eq!(q.kind(), Kind::Quoted);
        assert_eq!(q.mirror(), Kind::Integer);
        assert_eq!(q.inline_quotes(), 2);
        assert_eq!(q.as_integer(), None);

        let back = q.with_inline_quotes(0);
        assert_eq!(back.as_integer(), Some(1));
    }

    #[test]
    fn truthiness() {
        assert!(Cell::nulled().falsey_p());
        assert!(Cell::blank().falsey_p());
        assert!(Cell::logic(false).falsey_p());
        assert!(Cell::logic(true).truthy_p());
        assert!(Cell::integer(0).truthy_p());
        assert!(Cell::logic(false).with_inline_quotes(1).truthy_p());
    }

    #[test]
    fn stale_outputs() {
        assert!(END.stale_p());
        let marked = Cell::integer(3).with_flags(CellFlags::OUT_MARKED_STALE);
        assert!(marked.stale_p());
        assert!(!marked.fresh().stale_p());
        assert_eq!(marked.fresh().as_integer(), Some(3));
    }

    #[test]
    fn rekind_keeps_payload() {
        let w = Cell::word(Kind::Word, Sym(7));
        let s = w.rekind(Kind::SetWord);
        assert_eq!(s.kind(), Kind::SetWord);
        assert_eq!(s.as_word(), Some(Sym(7)));
    }
}
