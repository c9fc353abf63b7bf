// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/api.rs

// Host embedding API. Calls take a sequence of source fragments and
// value handles, which are spliced into the evaluation as it reaches
// them.
// Handles are root series; a handle made while a frame is running
// belongs to that frame and is freed by the collector once the frame
// has ended.

// <>

use super::cell::Cell;
use super::error::{Error, Fault, Result, ScriptError};
use super::interp::{Interp, Promise};
use super::kind::Kind;
use super::node::SeriesId;
use super::series::{Link, Misc, SeriesFlags};

/// Handle to a value held for the host
#[derive(Debug, PartialEq, Eq)]
pub struct RebValue {
    id: SeriesId,
}

/// Single-use splicing instruction, consumed by the call it is passed to
#[derive(Debug, PartialEq, Eq)]
pub struct RebInstruction {
    id: SeriesId,
}

/// One argument of an API call
#[derive(Debug)]
pub enum RebArg<'a> {
    /// Source text, scanned and spliced in
    Utf8(&'a str),
    /// Value of a handle, spliced as if written at that point
    Value(&'a RebValue),
    /// Handle released as soon as its value is spliced
    Release(RebValue),
    Instruction(RebInstruction),
}

impl<'a> From<&'a str> for RebArg<'a> {
    fn from(s: &'a str) -> Self {
        RebArg::Utf8(s)
    }
}

impl<'a> From<&'a RebValue> for RebArg<'a> {
    fn from(v: &'a RebValue) -> Self {
        RebArg::Value(v)
    }
}

impl From<RebInstruction> for RebArg<'_> {
    fn from(i: RebInstruction) -> Self {
        RebArg::Instruction(i)
    }
}

/// What a feed makes of one API argument
#[derive(Debug)]
pub(crate) enum FeedItem {
    Utf8(String),
    Cell(Cell),
    Instruction(SeriesId),
    Release(SeriesId),
}

impl Interp {
    /// Fails for a handle whose series has been freed
    pub(crate) fn feed_item(&self, arg: &RebArg) -> Result<FeedItem> {
        let id = match arg {
            RebArg::Utf8(s) => return Ok(FeedItem::Utf8(s.to_string())),
            RebArg::Value(h) => h.id,
            RebArg::Release(h) => h.id,
            RebArg::Instruction(i) => i.id,
        };
        self.live_handle(id)?;
        Ok(match arg {
            RebArg::Value(h) => FeedItem::Cell(self.arr_at(h.id, 0)),
            RebArg::Release(h) => FeedItem::Release(h.id),
            RebArg::Instruction(i) => FeedItem::Instruction(i.id),
            RebArg::Utf8(s) => FeedItem::Utf8(s.to_string()),
        })
    }

    fn live_handle(&self, id: SeriesId) -> Result<()> {
        match self.series.get(id.0) {
            Some(stub) if stub.flags.contains(SeriesFlags::ROOT) => Ok(()),
            _ => {
                log::warn!("API handle {:?} used after release", id);
                Err(ScriptError::Inaccessible.into())
            }
        }
    }

    /// Root cell owned by the innermost running frame, if any
    fn make_handle(&mut self, cell: Cell) -> RebValue {
        let owner = self.frames.last().map_or(0, |f| f.serial);
        let id = self.make_singular(cell.fresh(), SeriesFlags::MANAGED | SeriesFlags::ROOT);
        self.stub_mut(id).link = Link::Owner(owner);
        log::trace!("API handle {:?} owned by frame {}", id, owner);
        RebValue { id }
    }

    fn make_instruction(&mut self, value: &RebValue, quoting: i32) -> RebInstruction {
        let cell = self.reb_cell(value).unwrap_or_else(|_| Cell::nulled());
        let id = self.make_array_from(vec![cell], true);
        let stub = self.stub_mut(id);
        stub.flags.insert(SeriesFlags::ROOT | SeriesFlags::API_INSTRUCTION);
        stub.misc = Misc::Quoting(quoting);
        RebInstruction { id }
    }

    fn run_api(&mut self, args: &[RebArg]) -> Result<Option<Cell>> {
        let feed = self.push_variadic_feed(args)?;
        let result = self
            .do_feed_to_end(feed)
            .map(|out| if out.end_p() { Cell::void() } else { out });
        let fault = self.feeds[feed].fault.take();
        self.drop_feed(feed);
        let finished = self.finish_top_level(result);
        match fault {
            Some(error) => Err(error),
            None => finished,
        }
    }

    /// The value behind a handle
    pub fn reb_cell(&self, value: &RebValue) -> Result<Cell> {
        self.live_handle(value.id)?;
        Ok(self.arr_at(value.id, 0))
    }

    /// Evaluates now; None stands for null
    pub fn reb_value(&mut self, args: &[RebArg]) -> Result<Option<RebValue>> {
        Ok(self.run_api(args)?.map(|c| self.make_handle(c)))
    }

    /// Evaluates for effect only
    pub fn reb_elide(&mut self, args: &[RebArg]) -> Result<()> {
        self.run_api(args).map(|_| ())
    }

    /// Evaluates to a truth value; void is an error
    pub fn reb_did(&mut self, args: &[RebArg]) -> Result<bool> {
        match self.run_api(args)? {
            None => Ok(false),
            Some(c) if c.void_p() => Err(ScriptError::VoidConditional.into()),
            Some(c) => Ok(c.truthy_p()),
        }
    }

    /// Queues an evaluation for `run_promises`; never runs it here
    pub fn reb_promise(&mut self, args: &[RebArg]) -> Result<u64> {
        let code = self.reify_api_args(args)?;
        let id = self.next_promise;
        self.next_promise += 1;
        self.promises.push_back(Promise { id, code });
        log::debug!("promise {} queued", id);
        Ok(id)
    }

    /// Result of a promise once it has run
    pub fn reb_promise_result(&mut self, id: u64) -> Option<Result<Option<Cell>>> {
        self.promise_results.remove(&id)
    }

    pub fn reb_unbox_integer(&mut self, args: &[RebArg]) -> Result<i64> {
        let v = self.run_api(args)?;
        match v.and_then(|c| c.as_integer()) {
            Some(i) => Ok(i),
            None => Err(ScriptError::TypeMismatch {
                expected: String::from("integer!"),
                found: v.map_or("null", |c| c.kind().name()).to_string(),
            }
            .into()),
        }
    }

    /// Spelling of a string or word result
    pub fn reb_spell(&mut self, args: &[RebArg]) -> Result<String> {
        let v = self.run_api(args)?;
        match v {
            Some(c) if c.kind().any_string_p() => Ok(self.form(&c)),
            Some(c) if c.kind().any_word_p() => Ok(c
                .as_word()
                .map(|s| self.sym_name(s).to_string())
                .unwrap_or_default()),
            other => Err(ScriptError::TypeMismatch {
                expected: String::from("any-string! or any-word!"),
                found: other.map_or("null", |c| c.kind().name()).to_string(),
            }
            .into()),
        }
    }

    /// Instruction splicing a value with one more quote level, so it
    /// evaluates to itself
    pub fn reb_q(&mut self, value: &RebValue) -> RebInstruction {
        self.make_instruction(value, 1)
    }

    /// Instruction splicing a value with one quote level removed
    pub fn reb_u(&mut self, value: &RebValue) -> RebInstruction {
        self.make_instruction(value, -1)
    }

    /// Marks a handle for release by the call it is passed to
    pub fn reb_r(&mut self, value: RebValue) -> RebArg<'static> {
        self.stub_mut(value.id).flags.insert(SeriesFlags::API_RELEASE);
        RebArg::Release(value)
    }

    pub fn reb_release(&mut self, value: RebValue) {
        if self.series.get(value.id.0).is_some() {
            self.free_series(value.id);
        }
    }

    /// Runs host code, turning any failure into an ERROR! handle
    pub fn reb_rescue<T>(
        &mut self,
        body: impl FnOnce(&mut Interp) -> Result<T>,
    ) -> std::result::Result<T, RebValue> {
        let mark = self.stack_mark();
        match body(self) {
            Ok(v) => Ok(v),
            Err(error) => {
                self.unwind_to(mark);
                let value = self.fault_to_value(Fault {
                    error,
                    context: None,
                });
                Err(self.make_handle(value))
            }
        }
    }

    /// Evaluates code which must end by failing or throwing
    pub fn reb_jumps(&mut self, args: &[RebArg]) -> Error {
        match self.run_api(args) {
            Err(e) => e,
            Ok(v) => {
                let shown = v.map_or_else(|| String::from("null"), |c| self.mold(&c));
                log::warn!("API code meant to jump finished with {}", shown);
                ScriptError::BadValue(format!("code did not fail or throw: {}", shown)).into()
            }
        }
    }

    /// Message of an ERROR! handle, such as one from `reb_rescue`
    pub fn reb_error_message(&self, value: &RebValue) -> Option<String> {
        let cell = self.reb_cell(value).ok()?;
        if cell.kind() != Kind::Error {
            return None;
        }
        let ctx = cell.as_context()?;
        let msg = self.context_field(ctx, "message")?;
        Some(self.form(&msg))
    }
}

#[cfg(test)]
mod api_tests {
    use super::*;
    use crate::ren::frame::EvalFlags;
    use crate::ren::interp::InterpConfig;

    #[test]
    fn values_and_unboxing() {
        let mut it = Interp::new(InterpConfig::default());
        assert_eq!(it.reb_unbox_integer(&["1 +".into(), "2".into()]), Ok(3));
        let b = it.reb_value(&["[1 2 3]".into()]).unwrap().unwrap();
        assert_eq!(it.reb_unbox_integer(&["length-of".into(), (&b).into()]), Ok(3));
        assert_eq!(it.reb_spell(&["mold".into(), (&b).into()]).unwrap(), "[1 2 3]");
        assert!(it.reb_value(&["null".into()]).unwrap().is_none());
        assert_eq!(it.reb_did(&["1 < 2".into()]), Ok(true));
        it.reb_release(b);
    }

    #[test]
    fn quoting_instructions() {
        let mut it = Interp::new(InterpConfig::default());
        let w = it.reb_value(&["'foo".into()]).unwrap().unwrap();
        let q = it.reb_q(&w);
        assert_eq!(it.reb_spell(&["form type-of".into(), q.into()]).unwrap(), "word!");

        let quoted = it.reb_value(&["quote 'a".into()]).unwrap().unwrap();
        let u = it.reb_u(&quoted);
        assert_eq!(it.reb_unbox_integer(&["a: 10".into(), u.into()]), Ok(10));
    }

    #[test]
    fn released_handles_are_freed() {
        let mut it = Interp::new(InterpConfig::default());
        let v = it.reb_value(&["7".into()]).unwrap().unwrap();
        let id = v.id;
        let r = it.reb_r(v);
        assert_eq!(it.reb_unbox_integer(&["1 +".into(), r]), Ok(8));
        // the slot may be reused, but never by another handle
        assert!(it.series.get(id.0).map_or(true, |s| !s.flags.contains(SeriesFlags::ROOT)));
    }

    #[test]
    fn promises_run_later() {
        let mut it = Interp::new(InterpConfig::default());
        let id = it.reb_promise(&["1 + 1".into()]).unwrap();
        assert!(it.reb_promise_result(id).is_none());
        it.run_promises();
        let r = it.reb_promise_result(id).unwrap().unwrap().unwrap();
        assert_eq!(r.as_integer(), Some(2));
    }

    #[test]
    fn rescue_and_jumps() {
        let mut it = Interp::new(InterpConfig::default());
        let ok = it.reb_rescue(|it| it.reb_unbox_integer(&["2 * 2".into()]));
        assert_eq!(ok.ok(), Some(4));

        let err = it
            .reb_rescue(|it| it.reb_unbox_integer(&["1 / 0".into()]))
            .unwrap_err();
        assert_eq!(it.reb_error_message(&err).unwrap(), "attempt to divide by zero");
        assert_eq!(it.reb_cell(&err).unwrap().kind(), Kind::Error);

        assert_eq!(it.reb_jumps(&["fail \"x\"".into()]), Error::User(String::from("x")));
        assert!(matches!(
            it.reb_jumps(&["1".into()]),
            Error::Script(ScriptError::BadValue(_))
        ));
    }

    #[test]
    fn handles_die_with_their_frame() {
        let mut it = Interp::new(InterpConfig::default());
        let arr = it.make_array(0, true);
        let feed = it.push_feed(arr, 0, None);
        let f = it.push_frame(feed, EvalFlags::empty()).unwrap();
        let h = it.make_handle(Cell::integer(1));
        let id = h.id;

        it.recycle();
        assert!(it.series.get(id.0).is_some());

        it.drop_frame(f);
        it.drop_feed(feed);
        it.recycle();
        assert!(it.series.get(id.0).is_none());
    }
}

#[cfg(test)]
mod variadic_tests {
    use super::*;
    use crate::ren::interp::InterpConfig;

    #[test]
    fn collection_during_a_call_keeps_unreached_arguments() {
        let mut it = Interp::new(InterpConfig::default());
        let b = it.reb_value(&["copy [1 2 3]".into()]).unwrap().unwrap();
        let r = it.reb_r(b);
        assert_eq!(it.reb_unbox_integer(&["recycle".into(), "length-of".into(), r]), Ok(3));
        assert_eq!(
            it.reb_unbox_integer(&["recycle".into(), "1 +".into(), "2".into()]),
            Ok(3)
        );
    }

    #[test]
    fn later_arguments_are_scanned_when_reached() {
        let mut it = Interp::new(InterpConfig::default());
        assert!(it.reb_elide(&["x: 1".into(), "x: x + 1".into()]).is_ok());
        assert_eq!(it.reb_unbox_integer(&["x".into()]), Ok(2));
        assert!(it.reb_elide(&["y: 10".into(), "[".into()]).is_err());
        assert_eq!(it.reb_unbox_integer(&["y".into()]), Ok(10));
    }

    #[test]
    fn reevaluation_splices_ahead_of_unreached_arguments() {
        let mut it = Interp::new(InterpConfig::default());
        assert_eq!(it.reb_unbox_integer(&["reeval :add 1".into(), "2".into()]), Ok(3));
    }

    #[test]
    fn released_handles_are_rejected() {
        let mut it = Interp::new(InterpConfig::default());
        let v = it.reb_value(&["5".into()]).unwrap().unwrap();
        let stale = RebValue { id: v.id };
        it.reb_release(v);
        assert_eq!(it.reb_cell(&stale), Err(ScriptError::Inaccessible.into()));
        assert_eq!(
            it.reb_unbox_integer(&["1 +".into(), (&stale).into()]),
            Err(ScriptError::Inaccessible.into())
        );
    }
}
