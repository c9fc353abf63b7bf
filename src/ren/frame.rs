// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/frame.rs

// Evaluator frames, the data stack and the guard stack. Frames live in
// a vector; a frame's prior is simply the one below it. Action frames
// own a varlist, taken from a reuse list when one is free and stolen
// into an ordinary heap context if anything managed it while running.

// <>

use bitflags::bitflags;

use super::action::Action;
use super::cell::{Binding, Cell};
use super::error::{EvalResult, InternalError};
use super::feed::FeedId;
use super::interp::{Guard, Interp};
use super::kind::Kind;
use super::node::SeriesId;
use super::series::{Content, KeySource, Link, SeriesFlags, SeriesInfo};
use super::symtab::Sym;

pub type FrameId = usize;

bitflags! {
    #[derive(Default)]
    pub struct EvalFlags: u16 {
        /// Keep stepping until the feed runs out
        const TO_END = 1 << 0;
        /// Do not run enfix functions after the first value
        const NO_LOOKAHEAD = 1 << 1;
        /// Frame gathers one argument for the frame below it
        const FULFILLING_ARG = 1 << 2;
        /// Filling in refinement arguments out of callsite order
        const DOING_PICKUPS = 1 << 3;
        /// Action was invoked with a left-hand argument
        const RUNNING_ENFIX = 1 << 4;
        /// Arguments come from the data stack rather than the feed
        const APPLYING = 1 << 5;
        /// A blank argument short-circuits the call to null
        const NOOP = 1 << 6;
    }
}

/// A refinement named at the callsite, in callsite order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefineRequest {
    pub sym: Sym,
    /// Parameter index once matched out of order
    pub param: Option<usize>,
    pub consumed: bool,
}

#[derive(Debug)]
pub struct Frame {
    pub feed: FeedId,
    pub prior: Option<FrameId>,
    pub out: Cell,
    pub spare: Cell,
    pub flags: EvalFlags,
    /// Data stack height when the frame began
    pub dsp_orig: usize,
    /// Feed position where the current expression started
    pub expr_index: usize,
    pub serial: u64,
    pub tick: u64,

    /// Action as invoked, and the phase currently running
    pub original: Option<Action>,
    pub phase: Option<Action>,
    pub binding: Binding,
    pub label: Option<Sym>,
    pub varlist: Option<SeriesId>,
    /// Parameter being fulfilled
    pub param: usize,
    /// Exemplar supplying specialized arguments
    pub special: Option<SeriesId>,
    pub refines: Vec<RefineRequest>,
    /// Argument waiting for a deferred enfix to complete it
    pub defer: Option<usize>,
    /// Data stack slot of the next applied argument
    pub apply_at: Option<usize>,
}

impl Interp {
    /// Pushes a plain evaluation frame on a feed
    pub(crate) fn push_frame(&mut self, feed: FeedId, flags: EvalFlags) -> EvalResult<FrameId> {
        if self.frames.len() >= self.config.stack_limit {
            return Err(InternalError::StackOverflow.into());
        }

        let prior = self.frames.len().checked_sub(1);
        let serial = self.serial();
        let expr_index = self.feed_position(feed);
        self.frames.push(Frame {
            feed,
            prior,
            out: Cell::end(),
            spare: Cell::end(),
            flags,
            dsp_orig: self.ds.len(),
            expr_index,
            serial,
            tick: self.tick,
            original: None,
            phase: None,
            binding: Binding::Unbound,
            label: None,
            varlist: None,
            param: 0,
            special: None,
            refines: Vec::new(),
            defer: None,
            apply_at: None,
        });

        if cfg!(feature = "stkdbg") {
            log::trace!("push frame {} (depth {})", serial, self.frames.len());
        }

        Ok(self.frames.len() - 1)
    }

    /// Pops the top frame, disposing of its varlist
    pub(crate) fn drop_frame(&mut self, f: FrameId) {
        debug_assert_eq!(f + 1, self.frames.len());
        let frame = match self.frames.pop() {
            Some(frame) => frame,
            None => return,
        };

        if cfg!(feature = "stkdbg") {
            log::trace!("drop frame {} (depth {})", frame.serial, self.frames.len());
        }

        self.ds.truncate(frame.dsp_orig.max(1));

        if let Some(varlist) = frame.varlist {
            self.retire_varlist(varlist);
        }
    }

    #[inline(always)]
    pub(crate) fn frame(&self, f: FrameId) -> &Frame {
        &self.frames[f]
    }

    #[inline(always)]
    pub(crate) fn frame_mut(&mut self, f: FrameId) -> &mut Frame {
        &mut self.frames[f]
    }

    /// Varlist of an action frame
    pub(crate) fn frame_varlist(&self, f: FrameId) -> EvalResult<SeriesId> {
        match self.frames[f].varlist {
            Some(v) => Ok(v),
            None => Err(InternalError::Panic(format!("frame {} is not running an action", f)).into()),
        }
    }

    /// Argument slot of an action frame; END when it has no arguments
    #[inline(always)]
    pub(crate) fn arg(&self, f: FrameId, index: usize) -> Cell {
        match self.frames[f].varlist {
            Some(v) => self.var(v, index),
            None => Cell::end(),
        }
    }

    pub(crate) fn set_arg(&mut self, f: FrameId, index: usize, value: Cell) {
        let varlist = match self.frames[f].varlist {
            Some(v) => v,
            None => {
                log::error!("argument {} set on frame {} with no varlist", index, f);
                return;
            }
        };
        if let Some(slot) = self.stub_mut(varlist).cells_mut().get_mut(index) {
            *slot = value;
        }
    }

    /// Takes a varlist for an action's frame, reusing a retired one if possible
    pub(crate) fn acquire_varlist(&mut self, keylist: SeriesId, len: usize, serial: u64) -> SeriesId {
        let varlist = match self.reuse.pop() {
            Some(v) => v,
            None => self.make_array(len + 1, false),
        };

        let mut cells = match std::mem::replace(&mut self.stub_mut(varlist).content, Content::Inaccessible) {
            Content::Cells(v) => v,
            _ => Vec::with_capacity(len + 1),
        };
        cells.clear();
        cells.push(Cell::context(Kind::Frame, varlist, Some(keylist)));
        cells.resize(len + 1, Cell::nulled());

        let stub = self.stub_mut(varlist);
        stub.rest = cells.capacity();
        stub.content = Content::Cells(cells);
        stub.flags = SeriesFlags::VARLIST | SeriesFlags::STACK_LIFETIME | SeriesFlags::LINK_NODE_NEEDS_MARK;
        stub.info = SeriesInfo::empty();
        stub.holds = 0;
        stub.link = Link::KeySource(KeySource::Frame { serial, keylist });
        varlist
    }

    /// Ends a frame's hold on its varlist
    fn retire_varlist(&mut self, varlist: SeriesId) {
        let stub = self.stub_mut(varlist);
        if stub.managed_p() {
            // something took a reference; it lives on as a heap context
            let keylist = match stub.link {
                Link::KeySource(KeySource::Frame { keylist, .. }) => keylist,
                Link::KeySource(KeySource::Keylist(k)) => k,
                _ => return,
            };
            stub.link = Link::KeySource(KeySource::Keylist(keylist));
            stub.flags.remove(SeriesFlags::STACK_LIFETIME);
        } else {
            if let Content::Cells(v) = &mut stub.content {
                v.clear();
            }
            self.reuse.push(varlist);
        }
    }

    /// Whether a frame with this serial is still on the stack
    pub(crate) fn frame_alive_p(&self, serial: u64) -> bool {
        self.frames.iter().any(|f| f.serial == serial)
    }

    /// Action frame running with the given varlist
    pub(crate) fn frame_for_varlist(&self, varlist: SeriesId) -> Option<FrameId> {
        self.frames.iter().rposition(|f| f.varlist == Some(varlist))
    }

    /// Innermost running action frame at or beneath `f`
    pub(crate) fn action_frame_at(&self, f: FrameId) -> Option<FrameId> {
        let mut cur = Some(f);
        while let Some(i) = cur {
            if self.frames[i].original.is_some() {
                return Some(i);
            }
            cur = self.frames[i].prior;
        }
        None
    }

    /// Labels of the action frames from `f` down, for error reports
    pub(crate) fn frame_labels(&self, f: FrameId) -> Vec<Sym> {
        let mut out = Vec::new();
        let mut cur = Some(f.min(self.frames.len().saturating_sub(1)));
        if self.frames.is_empty() {
            return out;
        }
        while let Some(i) = cur {
            if let Some(label) = self.frames[i].label {
                if self.frames[i].original.is_some() {
                    out.push(label);
                }
            }
            cur = self.frames[i].prior;
        }
        out
    }

    /// Source text around where the frame's current expression started
    pub(crate) fn near_text(&self, f: FrameId) -> Option<String> {
        let frame = self.frames.get(f)?;
        let fd = self.feeds.get(frame.feed)?;
        let start = frame.expr_index;
        let stop = self.feed_position(frame.feed).max(start + 1);
        let cells = self.arr_cells(fd.array);
        if start >= cells.len() {
            return None;
        }
        let parts: Vec<String> = cells[start..stop.min(cells.len())]
            .iter()
            .take(8)
            .map(|c| self.mold(c))
            .collect();
        Some(parts.join(" "))
    }

    #[inline(always)]
    pub(crate) fn ds_push(&mut self, cell: Cell) {
        self.ds.push(cell);
    }

    pub(crate) fn ds_pop(&mut self) -> Option<Cell> {
        if self.ds.len() > 1 {
            self.ds.pop()
        } else {
            None
        }
    }

    /// Current data stack height; zero means empty
    #[inline(always)]
    pub(crate) fn dsp(&self) -> usize {
        self.ds.len() - 1
    }

    pub(crate) fn guard_series(&mut self, id: SeriesId) {
        self.guarded.push(Guard::Series(id));
    }

    pub(crate) fn unguard_series(&mut self, id: SeriesId) {
        if let Some(pos) = self
            .guarded
            .iter()
            .rposition(|g| matches!(g, Guard::Series(s) if *s == id))
        {
            self.guarded.remove(pos);
        }
    }

    pub(crate) fn guard_cell(&mut self, cell: Cell) {
        self.guarded.push(Guard::Cell(cell));
    }

    pub(crate) fn unguard_cell(&mut self) {
        if let Some(pos) = self.guarded.iter().rposition(|g| matches!(g, Guard::Cell(_))) {
            self.guarded.remove(pos);
        }
    }

    /// Stack heights, for putting everything back after a rescue
    pub(crate) fn stack_mark(&self) -> (usize, usize, usize, usize) {
        (self.frames.len(), self.feeds.len(), self.ds.len(), self.guarded.len())
    }

    /// Unwinds frames and feeds abandoned above a mark
    pub(crate) fn unwind_to(&mut self, mark: (usize, usize, usize, usize)) {
        let (frames, feeds, ds, guarded) = mark;
        while self.frames.len() > frames {
            let f = self.frames.len() - 1;
            self.drop_frame(f);
        }
        while self.feeds.len() > feeds {
            let fd = self.feeds.len() - 1;
            self.drop_feed(fd);
        }
        self.ds.truncate(ds.max(1));
        self.guarded.truncate(guarded);
    }
}

#[cfg(test)]
mod frame_tests {
    use super::*;
    use crate::ren::interp::InterpConfig;

    #[test]
    fn varlists_are_reused_unless_managed() {
        let mut it = Interp::new(InterpConfig::default());
        let keylist = it.make_array(4, true);

        let v1 = it.acquire_varlist(keylist, 3, 1);
        assert_eq!(it.arr_len(v1), 4);
        assert!(it.arr_at(v1, 2).nulled_p());
        it.retire_varlist(v1);

        let v2 = it.acquire_varlist(keylist, 1, 2);
        assert_eq!(v1, v2);
        assert_eq!(it.arr_len(v2), 2);
        it.manage(v2);
        it.retire_varlist(v2);
        assert!(!it.stub(v2).flags.contains(SeriesFlags::STACK_LIFETIME));
        assert_eq!(it.stub(v2).link, Link::KeySource(KeySource::Keylist(keylist)));

        let v3 = it.acquire_varlist(keylist, 1, 3);
        assert_ne!(v3, v2);
    }

    #[test]
    fn data_stack_bottom_is_poisoned() {
        let mut it = Interp::new(InterpConfig::default());
        assert_eq!(it.dsp(), 0);
        assert!(it.ds_pop().is_none());
        it.ds_push(Cell::integer(1));
        assert_eq!(it.dsp(), 1);
        assert_eq!(it.ds_pop().and_then(|c| c.as_integer()), Some(1));
    }

    #[test]
    fn stack_limit_is_enforced() {
        let mut config = InterpConfig::default();
        config.stack_limit = 8;
        let mut it = Interp::new(config);
        let r = it.do_string("f: func [n] [f n + 1] f 1");
        assert_eq!(
            r,
            Err(crate::ren::error::Error::Internal(InternalError::StackOverflow))
        );
        assert!(it.frames.is_empty());
        assert!(it.do_string("1").is_ok());
    }
}
