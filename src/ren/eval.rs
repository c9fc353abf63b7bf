// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/eval.rs

// The evaluator. One step takes the value at the feed position,
// evaluates it (gathering arguments for actions from the same feed),
// then looks ahead for enfix functions which want the result as their
// left argument.

// <>

use super::action::{Action, ActionFlags, Bounce};
use super::cell::{Binding, Cell, CellFlags, ParamClass, ParamFlags};
use super::context::Specifier;
use super::error::{Escape, EvalResult, InternalError, ScriptError};
use super::feed::{FeedFlags, FeedId};
use super::frame::{EvalFlags, FrameId, RefineRequest};
use super::interp::{Interp, Thrown};
use super::kind::Kind;
use super::node::SeriesId;
use super::series::SeriesFlags;
use super::symtab::Sym;

/// What a step did to its frame's output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ran {
    Value,
    /// Output untouched
    Invisible,
}

/// Whether arguments after a refinement are gathered now, later or never
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Used,
    Unused,
    Pickup,
}

impl Interp {
    /// Evaluates an array from an index to its end; void if nothing was produced
    pub(crate) fn do_array_at(&mut self, array: SeriesId, index: usize, specifier: Specifier) -> EvalResult<Cell> {
        let out = self.do_array_raw(array, index, specifier)?;
        Ok(if out.end_p() { Cell::void() } else { out })
    }

    /// As `do_array_at`, but END when every expression was invisible
    pub(crate) fn do_array_raw(&mut self, array: SeriesId, index: usize, specifier: Specifier) -> EvalResult<Cell> {
        let feed = self.push_feed(array, index, specifier);
        let result = self.do_feed_to_end(feed);
        self.drop_feed(feed);
        result
    }

    /// Evaluates a block or group value, respecting its binding
    pub(crate) fn do_block(&mut self, block: &Cell, specifier: Specifier) -> EvalResult<Cell> {
        match block.as_series() {
            Some((series, index)) => {
                let spec = self.derive_specifier(specifier, block);
                self.do_array_at(series, index, spec)
            }
            None => Err(ScriptError::BadValue(self.mold(block)).into()),
        }
    }

    pub(crate) fn do_feed_to_end(&mut self, feed: FeedId) -> EvalResult<Cell> {
        let f = self.push_frame(feed, EvalFlags::TO_END)?;
        let mut result = Ok(());
        while !self.feed_at_end(feed) {
            if let Err(e) = self.eval_step(f) {
                result = Err(e);
                break;
            }
        }
        let out = self.frames[f].out;
        self.drop_frame(f);
        result?;
        Ok(if out.end_p() { out } else { out.fresh() })
    }

    /// Evaluates one expression of the frame's feed into its output
    pub(crate) fn eval_step(&mut self, f: FrameId) -> EvalResult<()> {
        match self.eval_step_inner(f) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.contextualize(f, e)),
        }
    }

    fn eval_step_inner(&mut self, f: FrameId) -> EvalResult<()> {
        self.poll_signals()?;

        self.tick += 1;
        let feed = self.frames[f].feed;
        self.frames[f].expr_index = self.feed_position(feed);
        self.frames[f].tick = self.tick;

        if cfg!(feature = "stkdbg") {
            let cur = self.feeds[feed].current;
            log::trace!("tick {}: {}", self.tick, self.mold(&cur));
        }

        // a lookup cached before the last step ran code may be stale
        self.forget_gotten(feed);
        self.start_new_expression(f);
        let (current, gotten) = self.take_current(feed);
        self.reevaluate(f, current, gotten)
    }

    /// Checks for halt requests and pending collections between steps
    fn poll_signals(&mut self) -> EvalResult<()> {
        if self.countdown > 1 {
            self.countdown -= 1;
            return Ok(());
        }
        self.countdown = self.config.signal_interval.max(1);

        if self.halt_requested_p() {
            log::info!("halt requested");
            self.thrown = Thrown {
                label: self.builtins.halt,
                arg: Cell::nulled(),
            };
            return Err(Escape::Thrown);
        }

        if self.gc.pending && !self.gc.disabled {
            self.recycle();
        }
        Ok(())
    }

    /// Marks the output stale, unless the expression opens with an
    /// invisible which is to leave the previous result visible
    fn start_new_expression(&mut self, f: FrameId) {
        let feed = self.frames[f].feed;
        let keep = match self.lookup_current(feed) {
            Some(v) if v.action_p() && !v.flags.contains(CellFlags::ENFIXED) => {
                self.act_flags_of(&v).contains(ActionFlags::IS_INVISIBLE)
            }
            _ => false,
        };
        let out = &mut self.frames[f].out;
        if !keep && !out.end_p() {
            out.flags.insert(CellFlags::OUT_MARKED_STALE);
        }
    }

    /// Variable lookup of the feed's current word, cached until the next fetch
    pub(crate) fn lookup_current(&mut self, feed: FeedId) -> Option<Cell> {
        let (current, specifier, gotten) = {
            let fd = &self.feeds[feed];
            (fd.current, fd.specifier, fd.gotten)
        };
        if gotten.is_some() {
            return gotten;
        }
        if current.kind() != Kind::Word {
            return None;
        }
        let value = self.try_get_var(&current, specifier)?;
        self.feeds[feed].gotten = Some(value);
        Some(value)
    }

    /// Evaluates a value as if it came next in the frame's feed
    pub(crate) fn reevaluate(&mut self, f: FrameId, mut current: Cell, mut gotten: Option<Cell>) -> EvalResult<()> {
        let feed = self.frames[f].feed;
        loop {
            let ran = match self.lookback_quote(f, &current)? {
                Some(ran) => ran,
                None => self.evaluate_current(f, current, gotten)?,
            };

            // an invisible with nothing before it lets the next value
            // complete the expression
            if ran == Ran::Invisible && self.frames[f].out.stale_p() && !self.feed_at_end(feed) {
                self.forget_gotten(feed);
                current = self.take_current(feed).0;
                gotten = None;
                continue;
            }
            break;
        }
        self.post_switch(f)
    }

    /// Runs an enfix function which quotes its left argument, if one is next
    fn lookback_quote(&mut self, f: FrameId, current: &Cell) -> EvalResult<Option<Ran>> {
        let feed = self.frames[f].feed;
        let next = self.feeds[feed].current;
        let specifier = self.feeds[feed].specifier;
        let (action, label, refines) = match next.kind() {
            Kind::Word => match self.lookup_current(feed) {
                Some(v) if v.action_p() && v.flags.contains(CellFlags::ENFIXED) => (v, next.as_word(), Vec::new()),
                _ => return Ok(None),
            },
            Kind::Path => match self.enfix_refinement_path(&next, specifier) {
                Some(found) => found,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        let flags = self.act_flags_of(&action);
        if !flags.contains(ActionFlags::QUOTES_FIRST) {
            return Ok(None);
        }

        if matches!(current.kind(), Kind::Path | Kind::GetPath) {
            return Ok(None);
        }

        // a prefix action which quotes its own first argument takes priority
        let prefix = match current.kind() {
            Kind::Action => Some(*current),
            Kind::Word => self.try_get_var(current, specifier),
            _ => None,
        };
        if let Some(p) = prefix {
            if p.action_p()
                && !p.flags.contains(CellFlags::ENFIXED)
                && self.act_flags_of(&p).contains(ActionFlags::QUOTES_FIRST)
            {
                return Ok(None);
            }
        }

        if flags.contains(ActionFlags::SKIPPABLE_FIRST) {
            let paramlist = match action.as_action() {
                Some((p, _)) => p,
                None => return Ok(None),
            };
            match self.first_visible_param(paramlist) {
                Some((_, _, types, _)) if types.contains(current.kind()) => {}
                _ => return Ok(None),
            }
        }

        self.fetch_next(feed);
        let left = self
            .derelativize(*current, specifier)
            .fresh()
            .with_flags(CellFlags::UNEVALUATED);
        self.run_action(f, action, label, Some(left), refines).map(Some)
    }

    /// A path like `default/only`: an enfix action's word followed only by
    /// refinement words, so it can be looked at without running anything
    fn enfix_refinement_path(&mut self, path: &Cell, specifier: Specifier) -> Option<(Cell, Option<Sym>, Vec<Sym>)> {
        let (series, index) = path.as_series()?;
        let spec = self.derive_specifier(specifier, path);
        let items: Vec<Cell> = self.arr_cells(series).iter().skip(index).copied().collect();
        let (head, rest) = items.split_first()?;
        if head.kind() != Kind::Word || rest.iter().any(|c| c.kind() != Kind::Word) {
            return None;
        }
        let action = self.try_get_var(head, spec)?;
        if !action.action_p() || !action.flags.contains(CellFlags::ENFIXED) {
            return None;
        }
        let refines = rest.iter().filter_map(|c| c.as_word()).collect();
        Some((action, head.as_word(), refines))
    }

    fn evaluate_current(&mut self, f: FrameId, current: Cell, gotten: Option<Cell>) -> EvalResult<Ran> {
        let feed = self.frames[f].feed;
        let specifier = self.feeds[feed].specifier;

        match current.kind() {
            Kind::End => Ok(Ran::Invisible),

            Kind::Action => {
                let lookback = if current.flags.contains(CellFlags::ENFIXED) {
                    Some(Cell::end())
                } else {
                    None
                };
                self.run_action(f, current.fresh(), None, lookback, Vec::new())
            }

            Kind::Word => {
                let value = match gotten {
                    Some(v) => v,
                    None => self.get_var(&current, specifier)?,
                };
                let sym = current.as_word();

                if value.action_p() {
                    if value.flags.contains(CellFlags::ENFIXED) {
                        // nothing on the left at the start of an expression
                        return self.run_action(f, value, sym, Some(Cell::end()), Vec::new());
                    }
                    let refines = self.spaced_refinements(feed, &value);
                    return self.run_action(f, value, sym, None, refines);
                }
                if value.nulled_p() {
                    return Err(ScriptError::NoValue(self.mold(&current)).into());
                }
                if value.void_p() {
                    return Err(ScriptError::NeedNonVoid(self.mold(&current)).into());
                }
                self.frames[f].out = value.fresh();
                Ok(Ran::Value)
            }

            Kind::SetWord => {
                if self.feed_at_end(feed) {
                    return Err(ScriptError::NeedNonEnd(self.mold(&current)).into());
                }
                let value = self.eval_child(f, EvalFlags::empty())?;
                let value = if value.end_p() { Cell::void() } else { value.fresh() };
                self.set_word_var(&current, specifier, value)?;
                self.forget_gotten(feed);
                self.frames[f].out = value;
                Ok(Ran::Value)
            }

            Kind::GetWord => {
                let value = self.get_var(&current, specifier)?;
                self.escape_value(&value);
                self.frames[f].out = value.fresh();
                Ok(Ran::Value)
            }

            Kind::Group => {
                let (series, index) = match current.as_series() {
                    Some(s) => s,
                    None => return Err(ScriptError::BadValue(self.mold(&current)).into()),
                };
                let spec = self.derive_specifier(specifier, &current);
                let out = self.do_array_raw(series, index, spec)?;
                if out.end_p() {
                    return Ok(Ran::Invisible);
                }
                self.frames[f].out = out;
                Ok(Ran::Value)
            }

            Kind::Path | Kind::SetPath | Kind::GetPath => self.eval_path(f, current, specifier),

            Kind::Quoted => {
                let value = self.derelativize(current, specifier);
                let value = self.unquotify(value, 1);
                self.frames[f].out = value.fresh();
                Ok(Ran::Value)
            }

            _ => {
                let value = self.derelativize(current, specifier);
                self.frames[f].out = value.fresh().with_flags(CellFlags::UNEVALUATED);
                Ok(Ran::Value)
            }
        }
    }

    /// Runs one step of a new frame on the same feed and hands back its output
    pub(crate) fn eval_child(&mut self, f: FrameId, flags: EvalFlags) -> EvalResult<Cell> {
        let feed = self.frames[f].feed;
        let child = self.push_frame(feed, flags)?;
        let result = self.eval_step(child);
        let out = self.frames[child].out;
        self.drop_frame(child);
        result?;
        Ok(out)
    }

    /// Refinements written after an action's word which name its refinements
    fn spaced_refinements(&mut self, feed: FeedId, action: &Cell) -> Vec<Sym> {
        let paramlist = match action.as_action() {
            Some((p, _)) => p,
            None => return Vec::new(),
        };
        let mut out = Vec::new();
        loop {
            let cur = self.feeds[feed].current;
            if cur.kind() != Kind::Refinement {
                break;
            }
            let sym = match cur.as_word() {
                Some(s) => s,
                None => break,
            };
            match self.find_param(paramlist, sym) {
                Some(i) if self.act_param(paramlist, i).1 == ParamClass::Refinement => {
                    out.push(sym);
                    self.fetch_next(feed);
                }
                _ => break,
            }
        }
        out
    }

    /// A value fetched out of a running frame must keep that frame's varlist
    pub(crate) fn escape_value(&mut self, value: &Cell) {
        let varlist = match value.extra {
            Binding::Specific(v) if value.action_p() || value.kind().any_array_p() => v,
            _ => match value.payload {
                super::cell::Payload::Context { varlist, .. } => varlist,
                _ => return,
            },
        };
        if self.stub(varlist).flags.contains(SeriesFlags::STACK_LIFETIME) && !self.stub(varlist).managed_p() {
            self.manage(varlist);
        }
    }

    /// Gives enfix functions after the completed value their turn
    pub(crate) fn post_switch(&mut self, f: FrameId) -> EvalResult<()> {
        let feed = self.frames[f].feed;
        loop {
            self.forget_gotten(feed);
            if self.feeds[feed].flags.contains(FeedFlags::NO_LOOKAHEAD) {
                self.feeds[feed].flags.remove(FeedFlags::NO_LOOKAHEAD);
                return Ok(());
            }

            let next = self.feeds[feed].current;
            if next.kind() != Kind::Word {
                return Ok(());
            }
            let action = match self.lookup_current(feed) {
                Some(v) if v.action_p() && v.flags.contains(CellFlags::ENFIXED) => v,
                _ => return Ok(()),
            };
            let flags = self.act_flags_of(&action);
            if flags.contains(ActionFlags::QUOTES_FIRST) {
                return Ok(());
            }

            let frame_flags = self.frames[f].flags;
            if frame_flags.contains(EvalFlags::NO_LOOKAHEAD) && !flags.contains(ActionFlags::IS_INVISIBLE) {
                return Ok(());
            }

            // deferring enfix waits for the argument's owner to complete;
            // the second time it is seen it runs wherever it is
            if flags.contains(ActionFlags::DEFERS_LOOKBACK)
                && frame_flags.contains(EvalFlags::FULFILLING_ARG)
                && !self.feeds[feed].flags.contains(FeedFlags::DEFERRING_ENFIX)
            {
                if let Some(p) = self.frames[f].prior {
                    let param = self.frames[p].param;
                    if self.frames[p].defer.is_none() && param > 0 && !self.param_endable_p(p, param) {
                        self.frames[p].defer = Some(param);
                        self.feeds[feed].flags.insert(FeedFlags::DEFERRING_ENFIX);
                        return Ok(());
                    }
                }
            }
            self.feeds[feed].flags.remove(FeedFlags::DEFERRING_ENFIX);

            let label = next.as_word();
            self.fetch_next(feed);
            let out = self.frames[f].out;
            let left = if out.stale_p() { Cell::end() } else { out };
            self.run_action(f, action, label, Some(left), Vec::new())?;
        }
    }

    fn param_endable_p(&self, a: FrameId, param: usize) -> bool {
        match self.frames[a].original {
            Some(act) => self.act_param(act.paramlist, param).3.contains(ParamFlags::ENDABLE),
            None => true,
        }
    }

    fn push_action_frame(
        &mut self,
        feed: FeedId,
        act: Action,
        binding: Binding,
        label: Option<Sym>,
        refines: Vec<Sym>,
    ) -> EvalResult<FrameId> {
        let a = self.push_frame(feed, EvalFlags::empty())?;
        let len = self.act_num_params(act.paramlist);
        let serial = self.frames[a].serial;
        let varlist = self.acquire_varlist(act.paramlist, len, serial);
        let special = self.act_exemplar(act.details);

        let frame = &mut self.frames[a];
        frame.original = Some(act);
        frame.phase = Some(act);
        frame.binding = binding;
        frame.label = label;
        frame.varlist = Some(varlist);
        frame.special = special;
        frame.refines = refines
            .into_iter()
            .map(|sym| RefineRequest {
                sym,
                param: None,
                consumed: false,
            })
            .collect();
        Ok(a)
    }

    /// Calls an action, gathering its arguments from the frame's feed
    pub(crate) fn run_action(
        &mut self,
        f: FrameId,
        action: Cell,
        label: Option<Sym>,
        lookback: Option<Cell>,
        refines: Vec<Sym>,
    ) -> EvalResult<Ran> {
        let act = match Action::from_cell(&action) {
            Some(a) => a,
            None => return Err(ScriptError::BadValue(self.mold(&action)).into()),
        };
        let feed = self.frames[f].feed;
        let a = self.push_action_frame(feed, act, action.extra, label, refines)?;
        self.frames[a].expr_index = self.frames[f].expr_index;
        if lookback.is_some() {
            self.frames[a].flags.insert(EvalFlags::RUNNING_ENFIX);
        }

        let result = match self.fulfill_args(a, lookback) {
            Ok(()) => self.dispatch_frame(a),
            Err(e) => Err(e),
        };
        let result = match result {
            Err(e) => Err(self.contextualize(a, e)),
            ok => ok,
        };

        let out = self.frames[a].out;
        self.drop_frame(a);

        match result? {
            Ran::Value => {
                self.frames[f].out = out;
                Ok(Ran::Value)
            }
            Ran::Invisible => Ok(Ran::Invisible),
        }
    }

    /// Calls an action with arguments already evaluated, in parameter order
    pub(crate) fn apply_action(&mut self, action: Cell, args: &[Cell]) -> EvalResult<Cell> {
        let act = match Action::from_cell(&action) {
            Some(a) => a,
            None => return Err(ScriptError::BadValue(self.mold(&action)).into()),
        };
        let base = self.ds.len();
        for arg in args {
            self.ds_push(*arg);
        }

        let feed = self.push_feed(self.empty_array, 0, None);
        let result = self.apply_in_feed(feed, act, action.extra, base);
        self.drop_feed(feed);
        self.ds.truncate(base.max(1));
        result
    }

    fn apply_in_feed(&mut self, feed: FeedId, act: Action, binding: Binding, base: usize) -> EvalResult<Cell> {
        let a = self.push_action_frame(feed, act, binding, None, Vec::new())?;
        self.frames[a].flags.insert(EvalFlags::APPLYING);
        self.frames[a].apply_at = Some(base);

        let result = match self.fulfill_args(a, None) {
            Ok(()) => self.dispatch_frame(a),
            Err(e) => Err(e),
        };
        let result = match result {
            Err(e) => Err(self.contextualize(a, e)),
            ok => ok,
        };
        let out = self.frames[a].out;
        self.drop_frame(a);

        match result? {
            Ran::Value => Ok(out),
            Ran::Invisible => Ok(Cell::void()),
        }
    }

    /// Runs the action behind a FRAME! with a copy of its variables
    pub(crate) fn do_frame_value(&mut self, frame: &Cell) -> EvalResult<Cell> {
        let (varlist, phase) = match frame.payload {
            super::cell::Payload::Context {
                varlist,
                phase: Some(phase),
            } if frame.kind() == Kind::Frame => (varlist, phase),
            _ => return Err(ScriptError::BadValue(self.mold(frame)).into()),
        };
        let action = self.arr_at(phase, 0);
        let act = match Action::from_cell(&action) {
            Some(a) => a,
            None => return Err(ScriptError::BadValue(self.mold(frame)).into()),
        };

        let feed = self.push_feed(self.empty_array, 0, None);
        let result = self.do_frame_in_feed(feed, act, varlist);
        self.drop_feed(feed);
        result
    }

    fn do_frame_in_feed(&mut self, feed: FeedId, act: Action, source: SeriesId) -> EvalResult<Cell> {
        let a = self.push_action_frame(feed, act, Binding::Unbound, None, Vec::new())?;
        let n = self.act_num_params(act.paramlist);
        let varlist = match self.frame_varlist(a) {
            Ok(v) => v,
            Err(e) => {
                self.drop_frame(a);
                return Err(e);
            }
        };

        let mut result = Ok(());
        for i in 1..=n {
            let (_, class, _, pflags) = self.act_param(act.paramlist, i);
            let value = if pflags.contains(ParamFlags::HIDDEN) {
                match self.frames[a].special {
                    Some(ex) => self.var(ex, i).with_flags(CellFlags::ARG_MARKED_CHECKED),
                    None => Cell::nulled(),
                }
            } else {
                match class {
                    ParamClass::Return => self.make_return(varlist),
                    ParamClass::Local => Cell::nulled(),
                    _ if i < self.arr_len(source) => self.var(source, i).fresh(),
                    _ => Cell::nulled(),
                }
            };
            self.set_arg(a, i, value);
        }
        for i in 1..=n {
            if let Err(e) = self.typecheck_arg(a, i) {
                result = Err(e);
                break;
            }
        }

        let result = match result {
            Ok(()) => self.dispatch_frame(a),
            Err(e) => Err(e),
        };
        let result = match result {
            Err(e) => Err(self.contextualize(a, e)),
            ok => ok,
        };
        let out = self.frames[a].out;
        self.drop_frame(a);

        match result? {
            Ran::Value => Ok(out),
            Ran::Invisible => Ok(Cell::void()),
        }
    }

    fn label_name(&self, a: FrameId) -> String {
        match self.frames[a].label {
            Some(sym) => self.sym_name(sym).to_string(),
            None => String::from("anonymous"),
        }
    }

    /// Fills every parameter of a fresh action frame
    fn fulfill_args(&mut self, a: FrameId, mut lookback: Option<Cell>) -> EvalResult<()> {
        let paramlist = match self.frames[a].original {
            Some(act) => act.paramlist,
            None => return Ok(()),
        };
        let n = self.act_num_params(paramlist);
        let special = self.frames[a].special;
        let varlist = self.frame_varlist(a)?;
        let mut gate = Gate::Used;

        for i in 1..=n {
            self.frames[a].param = i;
            let (sym, class, _, pflags) = self.act_param(paramlist, i);

            if pflags.contains(ParamFlags::HIDDEN) {
                let value = match special {
                    Some(ex) => self.var(ex, i),
                    None => Cell::nulled(),
                };
                if class == ParamClass::Refinement {
                    gate = if value.truthy_p() { Gate::Used } else { Gate::Unused };
                }
                self.set_arg(a, i, value.with_flags(CellFlags::ARG_MARKED_CHECKED));
                continue;
            }

            match class {
                ParamClass::Local => {
                    self.set_arg(a, i, Cell::nulled());
                    continue;
                }
                ParamClass::Return => {
                    let ret = self.make_return(varlist);
                    self.set_arg(a, i, ret.with_flags(CellFlags::ARG_MARKED_CHECKED));
                    continue;
                }
                ParamClass::Refinement => {
                    gate = self.claim_refinement(a, i, sym);
                    continue;
                }
                _ => {}
            }

            match gate {
                Gate::Unused => {
                    self.set_arg(a, i, Cell::nulled().with_flags(CellFlags::ARG_MARKED_CHECKED));
                    continue;
                }
                Gate::Pickup => {
                    self.set_arg(a, i, Cell::nulled());
                    continue;
                }
                Gate::Used => {}
            }

            if let Some(left) = lookback.take() {
                let value = if left.end_p() {
                    if !pflags.contains(ParamFlags::ENDABLE) {
                        return Err(ScriptError::NoArg(self.label_name(a), self.sym_name(sym).to_string()).into());
                    }
                    Cell::nulled()
                } else {
                    left
                };
                self.set_arg(a, i, value);
                self.typecheck_arg(a, i)?;
                continue;
            }

            self.fulfill_arg(a, i)?;
        }

        // a deferred enfix will complete the argument from the caller's side
        if let Some(d) = self.frames[a].defer.take() {
            self.typecheck_arg(a, d)?;
        }

        self.do_pickups(a)?;

        if let Some(req) = self.frames[a].refines.iter().find(|r| !r.consumed) {
            let name = self.sym_name(req.sym).to_string();
            return Err(ScriptError::BadRefine(name).into());
        }
        Ok(())
    }

    /// Decides the fate of the arguments following a refinement parameter
    fn claim_refinement(&mut self, a: FrameId, i: usize, sym: Sym) -> Gate {
        let symtab = &self.symtab;
        let refines = &mut self.frames[a].refines;

        let first_open = refines.iter().position(|r| !r.consumed && r.param.is_none());
        if let Some(k) = first_open {
            if symtab.same_p(refines[k].sym, sym) {
                refines[k].consumed = true;
                self.set_arg(a, i, Cell::logic(true));
                return Gate::Used;
            }
        }

        // named later at the callsite: its arguments come after the others
        if let Some(req) = refines
            .iter_mut()
            .find(|r| !r.consumed && r.param.is_none() && symtab.same_p(r.sym, sym))
        {
            req.param = Some(i);
            self.set_arg(a, i, Cell::logic(true));
            return Gate::Pickup;
        }

        self.set_arg(a, i, Cell::nulled());
        Gate::Unused
    }

    /// Gathers arguments of refinements used out of parameter order
    fn do_pickups(&mut self, a: FrameId) -> EvalResult<()> {
        let paramlist = match self.frames[a].original {
            Some(act) => act.paramlist,
            None => return Ok(()),
        };
        let n = self.act_num_params(paramlist);

        self.frames[a].flags.insert(EvalFlags::DOING_PICKUPS);
        let mut k = 0;
        while k < self.frames[a].refines.len() {
            let req = self.frames[a].refines[k];
            k += 1;
            let p = match req.param {
                Some(p) if !req.consumed => p,
                _ => continue,
            };
            self.frames[a].refines[k - 1].consumed = true;

            for i in p + 1..=n {
                let (_, class, _, pflags) = self.act_param(paramlist, i);
                match class {
                    ParamClass::Refinement | ParamClass::Local | ParamClass::Return => break,
                    _ => {}
                }
                if pflags.contains(ParamFlags::HIDDEN) {
                    continue;
                }
                self.frames[a].param = i;
                self.fulfill_arg(a, i)?;
            }
        }
        self.frames[a].flags.remove(EvalFlags::DOING_PICKUPS);

        if let Some(d) = self.frames[a].defer.take() {
            self.typecheck_arg(a, d)?;
        }
        Ok(())
    }

    /// Takes one argument from the callsite according to its parameter class
    fn fulfill_arg(&mut self, a: FrameId, i: usize) -> EvalResult<()> {
        if let Some(d) = self.frames[a].defer {
            self.resume_deferred(a, d)?;
        }

        if self.frames[a].flags.contains(EvalFlags::APPLYING) {
            let k = self.frames[a].apply_at.unwrap_or(usize::MAX);
            let value = if k < self.frames[a].dsp_orig {
                self.ds[k]
            } else {
                Cell::nulled()
            };
            self.frames[a].apply_at = Some(k.saturating_add(1));
            self.set_arg(a, i, value);
            return self.typecheck_arg(a, i);
        }

        let paramlist = match self.frames[a].original {
            Some(act) => act.paramlist,
            None => return Ok(()),
        };
        let (sym, class, types, pflags) = self.act_param(paramlist, i);
        let feed = self.frames[a].feed;

        if self.feed_at_end(feed) {
            if pflags.contains(ParamFlags::ENDABLE) {
                self.set_arg(a, i, Cell::nulled().with_flags(CellFlags::ARG_MARKED_CHECKED));
                return Ok(());
            }
            return Err(ScriptError::NoArg(self.label_name(a), self.sym_name(sym).to_string()).into());
        }

        let specifier = self.feeds[feed].specifier;
        let value = match class {
            ParamClass::Normal | ParamClass::Tight => {
                let mut flags = EvalFlags::FULFILLING_ARG;
                if class == ParamClass::Tight {
                    flags |= EvalFlags::NO_LOOKAHEAD;
                }
                let out = self.eval_child(a, flags)?;
                let out = if out.end_p() { Cell::void() } else { out };
                if self.frames[a].defer == Some(i) {
                    self.set_arg(a, i, out);
                    return Ok(());
                }
                out
            }
            ParamClass::HardQuote => {
                let current = self.feeds[feed].current;
                let value = self.derelativize(current, specifier).fresh();
                if pflags.contains(ParamFlags::SKIPPABLE) && !types.contains(value.kind()) {
                    self.set_arg(a, i, Cell::nulled().with_flags(CellFlags::ARG_MARKED_CHECKED));
                    return Ok(());
                }
                self.fetch_next(feed);
                value.with_flags(CellFlags::UNEVALUATED)
            }
            ParamClass::SoftQuote => {
                let current = self.feeds[feed].current;
                match current.kind() {
                    Kind::Group | Kind::GetWord | Kind::GetPath => {
                        let out = self.eval_child(a, EvalFlags::FULFILLING_ARG | EvalFlags::NO_LOOKAHEAD)?;
                        if out.end_p() {
                            Cell::void()
                        } else {
                            out
                        }
                    }
                    _ => {
                        let value = self.derelativize(current, specifier).fresh();
                        self.fetch_next(feed);
                        value.with_flags(CellFlags::UNEVALUATED)
                    }
                }
            }
            ParamClass::Refinement | ParamClass::Local | ParamClass::Return => return Ok(()),
        };

        self.set_arg(a, i, value);
        self.typecheck_arg(a, i)
    }

    /// Lets a deferred enfix function finish the argument it was waiting on
    fn resume_deferred(&mut self, a: FrameId, d: usize) -> EvalResult<()> {
        let feed = self.frames[a].feed;
        self.frames[a].defer = None;
        self.feeds[feed].flags.remove(FeedFlags::DEFERRING_ENFIX);

        let child = self.push_frame(feed, EvalFlags::empty())?;
        self.frames[child].out = self.arg(a, d);
        let result = self.post_switch(child);
        let out = self.frames[child].out;
        self.drop_frame(child);
        result?;

        self.set_arg(a, d, if out.end_p() { Cell::void() } else { out.fresh() });
        self.typecheck_arg(a, d)
    }

    /// Checks an argument against its parameter's types
    pub(crate) fn typecheck_arg(&mut self, a: FrameId, i: usize) -> EvalResult<()> {
        let paramlist = match self.frames[a].original {
            Some(act) => act.paramlist,
            None => return Ok(()),
        };
        let (sym, class, types, pflags) = self.act_param(paramlist, i);
        match class {
            ParamClass::Refinement | ParamClass::Local | ParamClass::Return => return Ok(()),
            _ => {}
        }
        let arg = self.arg(a, i);
        if arg.flags.contains(CellFlags::ARG_MARKED_CHECKED) {
            return Ok(());
        }

        let kind = arg.kind();
        let ok = if kind == Kind::Blank && pflags.contains(ParamFlags::NOOP_IF_BLANK) {
            self.frames[a].flags.insert(EvalFlags::NOOP);
            true
        } else {
            types.contains(kind) || (kind == Kind::Nulled && pflags.contains(ParamFlags::ENDABLE))
        };

        if !ok {
            return Err(ScriptError::ExpectArg {
                action: self.label_name(a),
                param: self.sym_name(sym).to_string(),
                found: kind.name().to_string(),
            }
            .into());
        }

        self.set_arg(a, i, arg.with_flags(CellFlags::ARG_MARKED_CHECKED));
        Ok(())
    }

    fn typecheck_all(&mut self, a: FrameId) -> EvalResult<()> {
        let paramlist = match self.frames[a].original {
            Some(act) => act.paramlist,
            None => return Ok(()),
        };
        for i in 1..=self.act_num_params(paramlist) {
            if self.act_param(paramlist, i).3.contains(ParamFlags::HIDDEN) {
                continue;
            }
            self.typecheck_arg(a, i)?;
        }
        Ok(())
    }

    /// Runs the phase's dispatcher until it settles on a result
    fn dispatch_frame(&mut self, a: FrameId) -> EvalResult<Ran> {
        if self.frames[a].flags.contains(EvalFlags::NOOP) {
            self.frames[a].out = Cell::nulled();
            return Ok(Ran::Value);
        }

        loop {
            let phase = match self.frames[a].phase {
                Some(p) => p,
                None => return Ok(Ran::Invisible),
            };
            let dispatcher = match self.act_dispatcher(phase.details) {
                Some(d) => d,
                None => {
                    let msg = format!("action {:?} has no dispatcher", phase.details);
                    return Err(InternalError::Panic(msg).into());
                }
            };
            self.frames[a].out = Cell::end();

            match dispatcher(self, a) {
                Ok(Bounce::Out) => break,
                Ok(Bounce::Immediate) => {
                    let feed = self.frames[a].feed;
                    self.feeds[feed].flags.insert(FeedFlags::NO_LOOKAHEAD);
                    break;
                }
                Ok(Bounce::Invisible) => return Ok(Ran::Invisible),
                Ok(Bounce::Redo { checked }) => {
                    if checked {
                        self.typecheck_all(a)?;
                    }
                    continue;
                }
                Err(Escape::Thrown) => match self.catch_at_frame(a) {
                    Some(ran) => {
                        if ran == Ran::Invisible {
                            return Ok(Ran::Invisible);
                        }
                        break;
                    }
                    None => return Err(Escape::Thrown),
                },
                Err(e) => return Err(e),
            }
        }

        self.run_pipeline(a)?;

        let out = &mut self.frames[a].out;
        if out.end_p() {
            *out = Cell::void();
        }
        Ok(Ran::Value)
    }

    /// Catches a RETURN or UNWIND aimed at this frame
    fn catch_at_frame(&mut self, a: FrameId) -> Option<Ran> {
        let label = self.thrown.label;
        let varlist = self.frames[a].varlist?;
        if label.extra != Binding::Specific(varlist) {
            return None;
        }

        if self.same_action_p(&label, &self.builtins.return_) {
            let arg = self.clear_thrown();
            let invisible = match self.frames[a].original {
                Some(act) => self.act_flags(act.paramlist).contains(ActionFlags::IS_INVISIBLE),
                None => false,
            };
            if invisible {
                return Some(Ran::Invisible);
            }
            self.frames[a].out = arg;
            return Some(Ran::Value);
        }
        if self.same_action_p(&label, &self.builtins.unwind) {
            let arg = self.clear_thrown();
            self.frames[a].out = arg;
            return Some(Ran::Value);
        }
        None
    }

    /// Passes the result through actions a chain left on the data stack
    fn run_pipeline(&mut self, a: FrameId) -> EvalResult<()> {
        let base = self.frames[a].dsp_orig;
        while self.ds.len() > base {
            let next = match self.ds_pop() {
                Some(c) => c,
                None => break,
            };
            let input = self.frames[a].out;
            let input = if input.end_p() { Cell::void() } else { input };
            let result = self.apply_action(next, &[input])?;
            self.frames[a].out = result;
        }
        Ok(())
    }
}

#[cfg(test)]
mod eval_tests {
    use crate::ren::error::{Error, ScriptError};
    use crate::ren::interp::{Interp, InterpConfig};

    fn run(code: &str) -> Option<i64> {
        let mut it = Interp::new(InterpConfig::default());
        it.do_string(code).unwrap().and_then(|c| c.as_integer())
    }

    fn fails(code: &str) -> Error {
        let mut it = Interp::new(InterpConfig::default());
        it.do_string(code).unwrap_err()
    }

    #[test]
    fn inert_values_evaluate_to_the_last() {
        assert_eq!(run("1 2 3"), Some(3));
        let mut it = Interp::new(InterpConfig::default());
        assert!(it.do_string("").unwrap().unwrap().void_p());
    }

    #[test]
    fn enfix_is_left_to_right() {
        assert_eq!(run("1 + 2 * 3"), Some(9));
        assert_eq!(run("1 + (2 * 3)"), Some(7));
        assert_eq!(run("x: 10 x + 1"), Some(11));
    }

    #[test]
    fn invisibles_do_not_disturb_results() {
        assert_eq!(run("1 comment \"x\""), Some(1));
        assert_eq!(run("x: comment \"x\" 10 x"), Some(10));
        assert_eq!(run("1 comment \"x\" + 2"), Some(3));
        assert_eq!(run("(1) (elide 2)"), Some(1));
    }

    #[test]
    fn unset_and_end_errors() {
        assert!(matches!(
            fails("no-such-word"),
            Error::Script(ScriptError::NoValue(_))
        ));
        assert!(matches!(fails("x:"), Error::Script(ScriptError::NeedNonEnd(_))));
        assert!(matches!(fails("add 1"), Error::Script(ScriptError::NoArg(..))));
        assert!(matches!(
            fails("add 1 \"a\""),
            Error::Script(ScriptError::ExpectArg { .. })
        ));
    }

    #[test]
    fn refinements_in_any_order() {
        assert_eq!(
            run("f: func [/a x /b y] [either a [either b [x * 10 + y] [x]] [y]] f/b/a 1 2"),
            Some(21)
        );
        assert_eq!(run("f: func [/a x /b y] [either a [x] [y]] f/b 5"), Some(5));
        assert!(matches!(
            fails("f: func [/a x] [x] f/q 1"),
            Error::Script(ScriptError::BadRefine(_))
        ));
    }

    #[test]
    fn spaced_refinements_follow_the_word() {
        assert_eq!(run("case /all [true [1] true [2]]"), Some(2));
    }

    #[test]
    fn left_quoting_enfix() {
        assert_eq!(run("x: default [10] x"), Some(10));
        assert_eq!(run("x: 1 x: default [10] x"), Some(1));
    }

    #[test]
    fn deferred_enfix_waits_for_the_whole_call() {
        assert_eq!(run("if false [1] else [2]"), Some(2));
        let mut it = Interp::new(InterpConfig::default());
        it.capture_output();
        it.do_string("print if false [1] else [2]").unwrap();
        assert_eq!(it.take_output(), "2\n");
    }

    #[test]
    fn tight_parameters_skip_lookahead() {
        assert_eq!(run("f: func [x] [x * 10] f 1 + 2"), Some(30));
        assert_eq!(run("f: func [x [<tight> integer!]] [x * 10] f 1 + 2"), Some(12));
        assert_eq!(run("f: tighten func [x] [x * 10] f 1 + 2"), Some(12));
    }

    #[test]
    fn return_is_definitional() {
        assert_eq!(run("f: func [] [return 1 2] f"), Some(1));
        assert_eq!(run("g: func [b] [do b 3] f: func [] [g [return 1] 2] f"), Some(1));
        assert!(matches!(
            fails("f: func [] [:return] r: f r 1"),
            Error::Script(ScriptError::BadValue(_))
        ));
    }

    #[test]
    fn typed_returns_are_checked() {
        assert!(fails("f: func [return: [integer!]] [return \"a\"] f")
            .to_string()
            .contains("text!"));
        assert_eq!(run("f: func [return: [integer!]] [return 5] f"), Some(5));
    }
}

#[cfg(test)]
mod gotten_cache_tests {
    use crate::ren::interp::{Interp, InterpConfig};

    fn run(code: &str) -> Option<i64> {
        let mut it = Interp::new(InterpConfig::default());
        it.do_string(code).unwrap().and_then(|c| c.as_integer())
    }

    #[test]
    fn assignment_is_seen_by_the_next_read() {
        assert_eq!(run("x: 1 x"), Some(1));
        assert_eq!(run("x: 1 x: x + 1 x"), Some(2));
        assert_eq!(run("x: 1 f: func [] [x: 5] f x"), Some(5));
        assert_eq!(run("x: 0 if true [x: 7] x"), Some(7));
    }

    #[test]
    fn enfix_paths_quote_their_left() {
        assert_eq!(run("x: null x: default/only [10] x"), Some(10));
        assert_eq!(run("x: 3 x: default/only [10] x"), Some(3));
        assert_eq!(run("x: _ x: default/only [10] x"), None);
    }

    #[test]
    fn hijacked_actions_take_their_args_in_order() {
        assert_eq!(
            run("f: func [a b] [a - b] g: func [x y] [x * 10 + y] hijack :f :g f 1 2"),
            Some(12)
        );
    }
}
