// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/function.rs

// Interpreted functions and derived actions. A function body is copied
// with its parameter words made relative to the paramlist, so one body
// serves every call. Derivations (specialize, adapt, enclose, chain,
// hijack, tighten) make new actions sharing the parameter order of the
// action they wrap, and redo the frame into it.

// <>

use super::action::{Action, ActionFlags, Bounce};
use super::cell::{Binding, Cell, CellFlags, ParamClass, ParamFlags, Payload};
use super::error::{EvalResult, ScriptError};
use super::interp::Interp;
use super::kind::Kind;
use super::node::SeriesId;
use super::series::{Content, KeySource, Link, Misc, SeriesFlags};
use super::FrameId;

impl Interp {
    /// Makes words and arrays inside a body refer to the paramlist's
    /// parameters; true if anything inside became relative
    pub(crate) fn relativize_deep(&mut self, array: SeriesId, paramlist: SeriesId) -> bool {
        let mut any = false;
        for i in 0..self.arr_len(array) {
            let cell = self.arr_at(array, i);
            if cell.deep_quoted_p() {
                continue;
            }
            if cell.mirror().any_word_p() {
                let sym = match cell.as_word() {
                    Some(s) => s,
                    None => continue,
                };
                if let Some(index) = self.find_param(paramlist, sym) {
                    if let Some(slot) = self.stub_mut(array).cells_mut().get_mut(i) {
                        slot.extra = Binding::Relative(paramlist);
                        slot.payload = Payload::Word { sym, index };
                    }
                    any = true;
                }
            } else if cell.mirror().any_array_p() {
                if let Some((inner, _)) = cell.as_series() {
                    if inner != array && self.relativize_deep(inner, paramlist) {
                        if let Some(slot) = self.stub_mut(array).cells_mut().get_mut(i) {
                            slot.extra = Binding::Relative(paramlist);
                        }
                        any = true;
                    }
                }
            }
        }
        any
    }

    /// Makes an interpreted function from spec and body blocks
    pub(crate) fn make_function(&mut self, spec: &Cell, body: &Cell, gather_locals: bool) -> EvalResult<Cell> {
        let ((sarr, sidx), (barr, bidx)) = match (spec.as_series(), body.as_series()) {
            (Some(s), Some(b)) => (s, b),
            _ => return Err(ScriptError::BadSpec(self.mold(spec)).into()),
        };
        let mut parsed = self.parse_spec(sarr, sidx, true)?;

        let body_specifier = self.derive_specifier(None, body);
        let copy = self.copy_deep_specific(barr, bidx, body_specifier);

        if gather_locals {
            for sym in self.collect_set_words(copy, 0) {
                let taken = parsed.params.iter().any(|p| match p.as_param() {
                    Some((s, ..)) => self.symtab.same_p(s, sym),
                    None => false,
                });
                if !taken {
                    parsed.params.push(Cell::param(
                        sym,
                        ParamClass::Local,
                        super::kind::Typeset::ANY_VALUE.with(Kind::Nulled),
                        ParamFlags::empty(),
                    ));
                }
            }
        }

        let empty = self.arr_len(copy) == 0;
        let flags = parsed.flags;
        let dispatcher: super::action::Dispatcher = if flags.contains(ActionFlags::IS_INVISIBLE) {
            if empty {
                commenter_dispatcher
            } else {
                elider_dispatcher
            }
        } else if flags.contains(ActionFlags::RETURN_VOID) {
            voider_dispatcher
        } else if empty {
            empty_dispatcher
        } else if flags.contains(ActionFlags::RETURN_TYPED) {
            returner_dispatcher
        } else {
            unchecked_dispatcher
        };

        let act = self.make_action(
            parsed.params,
            flags,
            dispatcher,
            vec![Cell::series(Kind::Block, copy, 0)],
            None,
            None,
        );
        self.relativize_deep(copy, act.paramlist);
        Ok(act.cell(Binding::Unbound))
    }

    /// Runs the body of the phase with the frame's variables
    fn run_body(&mut self, f: FrameId) -> EvalResult<Cell> {
        let phase = match self.frames[f].phase {
            Some(p) => p,
            None => return Ok(Cell::end()),
        };
        let body = self.act_detail(phase.details, 0);
        let varlist = self.frame_varlist(f)?;
        match body.as_series() {
            Some((series, index)) => self.do_array_raw(series, index, Some(varlist)),
            None => Ok(Cell::end()),
        }
    }

    /// Applies a function's declared result type to a returned value
    pub(crate) fn check_return(&mut self, tf: FrameId, value: Cell) -> EvalResult<Cell> {
        let phase = match self.frames[tf].phase {
            Some(p) => p,
            None => return Ok(value),
        };
        let flags = self.act_flags(phase.paramlist);
        if flags.contains(ActionFlags::RETURN_VOID) {
            return Ok(Cell::void());
        }
        if !flags.contains(ActionFlags::RETURN_TYPED) {
            return Ok(value);
        }
        let n = self.act_num_params(phase.paramlist);
        let types = (1..=n).rev().find_map(|i| match self.act_param(phase.paramlist, i) {
            (_, ParamClass::Return, types, _) => Some(types),
            _ => None,
        });
        match types {
            Some(types) if !types.contains(value.kind()) => {
                let action = match self.frames[tf].label {
                    Some(sym) => self.sym_name(sym).to_string(),
                    None => String::from("anonymous"),
                };
                Err(ScriptError::ExpectArg {
                    action,
                    param: String::from("return"),
                    found: value.kind().name().to_string(),
                }
                .into())
            }
            _ => Ok(value),
        }
    }

    /// Exemplar varlist laid out like the action's frame
    pub(crate) fn make_exemplar(&mut self, act: Action) -> SeriesId {
        let n = self.act_num_params(act.paramlist);
        let mut cells = vec![Cell::nulled(); n + 1];
        if let Some(old) = self.act_exemplar(act.details) {
            for (i, slot) in cells.iter_mut().enumerate().skip(1) {
                *slot = self.var(old, i).fresh();
            }
        }
        let ex = self.make_array_from(cells, true);
        let stub = self.stub_mut(ex);
        stub.flags.insert(SeriesFlags::VARLIST | SeriesFlags::LINK_NODE_NEEDS_MARK);
        stub.link = Link::KeySource(KeySource::Keylist(act.paramlist));
        if let Content::Cells(v) = &mut stub.content {
            v[0] = Cell::context(Kind::Frame, ex, Some(act.paramlist));
        }
        ex
    }

    /// Fixes argument values of an action by running a block bound to its frame
    pub(crate) fn specialize(&mut self, action: &Cell, def: &Cell) -> EvalResult<Cell> {
        let act = match Action::from_cell(action) {
            Some(a) => a,
            None => return Err(ScriptError::BadValue(self.mold(action)).into()),
        };
        let exemplar = self.make_exemplar(act);
        self.guard_series(exemplar);

        let result = match def.as_series() {
            Some((series, index)) => {
                let spec = self.derive_specifier(None, def);
                let copy = self.copy_deep_specific(series, index, spec);
                self.bind_deep(copy, exemplar, false);
                self.guard_series(copy);
                let r = self.do_array_at(copy, 0, None);
                self.unguard_series(copy);
                r.map(|_| ())
            }
            None => Err(ScriptError::BadValue(self.mold(def)).into()),
        };
        self.unguard_series(exemplar);
        result?;

        self.finish_specialization(act, action, exemplar)
    }

    /// Action with the named refinements switched on, as for `:action/refine`
    pub(crate) fn specialize_refinements(&mut self, action: &Cell, refines: &[super::symtab::Sym]) -> EvalResult<Cell> {
        let act = match Action::from_cell(action) {
            Some(a) => a,
            None => return Err(ScriptError::BadValue(self.mold(action)).into()),
        };
        let exemplar = self.make_exemplar(act);
        for sym in refines {
            match self.find_param(act.paramlist, *sym) {
                Some(i) if self.act_param(act.paramlist, i).1 == ParamClass::Refinement => {
                    if let Some(slot) = self.stub_mut(exemplar).cells_mut().get_mut(i) {
                        *slot = Cell::logic(true);
                    }
                }
                _ => return Err(ScriptError::BadRefine(self.sym_name(*sym).to_string()).into()),
            }
        }
        self.finish_specialization(act, action, exemplar)
    }

    /// Hides every parameter the exemplar gives a value
    fn finish_specialization(&mut self, act: Action, action: &Cell, exemplar: SeriesId) -> EvalResult<Cell> {
        let params = self.copy_params(act.paramlist, |p| p);
        let mut hidden = Vec::with_capacity(params.len());
        for (i, p) in params.into_iter().enumerate() {
            let value = self.var(exemplar, i + 1);
            let (sym, class, types, mut pflags) = match p.as_param() {
                Some(x) => x,
                None => continue,
            };
            let fixed = match class {
                ParamClass::Local | ParamClass::Return => false,
                _ => !value.nulled_p(),
            };
            if fixed {
                pflags.insert(ParamFlags::HIDDEN);
                if class != ParamClass::Refinement && !types.contains(value.kind()) {
                    return Err(ScriptError::ExpectArg {
                        action: String::from("specialize"),
                        param: self.sym_name(sym).to_string(),
                        found: value.kind().name().to_string(),
                    }
                    .into());
                }
            }
            hidden.push(Cell::param(sym, class, types, pflags));
        }

        let flags = self.act_flags(act.paramlist) - (ActionFlags::QUOTES_FIRST | ActionFlags::SKIPPABLE_FIRST);
        let underlying = self.act_underlying(act.paramlist);
        let new = self.make_action(
            hidden,
            flags,
            passthrough_dispatcher,
            vec![action.fresh()],
            Some(underlying),
            Some(exemplar),
        );
        Ok(new.cell(action.extra))
    }

    /// Derived action sharing the wrapped action's parameters
    fn derive(
        &mut self,
        base: Action,
        details: Vec<Cell>,
        dispatcher: super::action::Dispatcher,
        adjust: impl FnMut(Cell) -> Cell,
    ) -> Action {
        let params = self.copy_params(base.paramlist, adjust);
        let flags = self.act_flags(base.paramlist) - (ActionFlags::QUOTES_FIRST | ActionFlags::SKIPPABLE_FIRST);
        let underlying = self.act_underlying(base.paramlist);
        let exemplar = self.act_exemplar(base.details);
        self.make_action(params, flags, dispatcher, details, Some(underlying), exemplar)
    }

    /// Heap FRAME! holding a copy of a running frame's arguments
    fn copy_frame_context(&mut self, f: FrameId, phase: Action) -> EvalResult<Cell> {
        let varlist = self.frame_varlist(f)?;
        let cells: Vec<Cell> = self.arr_cells(varlist).iter().map(|c| c.fresh()).collect();
        let keylist = match self.frames[f].original {
            Some(orig) => orig.paramlist,
            None => phase.paramlist,
        };
        let copy = self.make_array_from(cells, true);
        let stub = self.stub_mut(copy);
        stub.flags.insert(SeriesFlags::VARLIST | SeriesFlags::LINK_NODE_NEEDS_MARK);
        stub.link = Link::KeySource(KeySource::Keylist(keylist));
        if let Content::Cells(v) = &mut stub.content {
            v[0] = Cell::context(Kind::Frame, copy, Some(phase.paramlist));
        }
        Ok(Cell::context(Kind::Frame, copy, Some(phase.paramlist)))
    }
}

fn unchecked_dispatcher(it: &mut Interp, f: FrameId) -> EvalResult<Bounce> {
    let out = it.run_body(f)?;
    let out = if out.end_p() { Cell::void() } else { out };
    it.ret(f, out)
}

fn returner_dispatcher(it: &mut Interp, f: FrameId) -> EvalResult<Bounce> {
    let out = it.run_body(f)?;
    let out = if out.end_p() { Cell::void() } else { out };
    let out = it.check_return(f, out)?;
    it.ret(f, out)
}

fn voider_dispatcher(it: &mut Interp, f: FrameId) -> EvalResult<Bounce> {
    it.run_body(f)?;
    it.ret(f, Cell::void())
}

fn elider_dispatcher(it: &mut Interp, f: FrameId) -> EvalResult<Bounce> {
    it.run_body(f)?;
    Ok(Bounce::Invisible)
}

fn commenter_dispatcher(_: &mut Interp, _: FrameId) -> EvalResult<Bounce> {
    Ok(Bounce::Invisible)
}

fn empty_dispatcher(it: &mut Interp, f: FrameId) -> EvalResult<Bounce> {
    it.ret(f, Cell::void())
}

/// Redo the frame as the action in the first details slot
fn passthrough_dispatcher(it: &mut Interp, f: FrameId) -> EvalResult<Bounce> {
    let phase = match it.frames[f].phase {
        Some(p) => p,
        None => return Ok(Bounce::Invisible),
    };
    let next = it.act_detail(phase.details, 0);
    it.frames[f].phase = Action::from_cell(&next);
    Ok(Bounce::Redo { checked: false })
}

fn adapter_dispatcher(it: &mut Interp, f: FrameId) -> EvalResult<Bounce> {
    let phase = match it.frames[f].phase {
        Some(p) => p,
        None => return Ok(Bounce::Invisible),
    };
    let prelude = it.act_detail(phase.details, 0);
    let adaptee = it.act_detail(phase.details, 1);
    let varlist = it.frame_varlist(f)?;
    if let Some((series, index)) = prelude.as_series() {
        it.do_array_at(series, index, Some(varlist))?;
    }
    it.frames[f].phase = Action::from_cell(&adaptee);
    Ok(Bounce::Redo { checked: true })
}

fn encloser_dispatcher(it: &mut Interp, f: FrameId) -> EvalResult<Bounce> {
    let phase = match it.frames[f].phase {
        Some(p) => p,
        None => return Ok(Bounce::Invisible),
    };
    let inner = it.act_detail(phase.details, 0);
    let outer = it.act_detail(phase.details, 1);
    let inner_act = match Action::from_cell(&inner) {
        Some(a) => a,
        None => return Err(ScriptError::BadValue(it.mold(&inner)).into()),
    };
    let frame = it.copy_frame_context(f, inner_act)?;
    let out = it.apply_action(outer, &[frame])?;
    it.ret(f, out)
}

fn chainer_dispatcher(it: &mut Interp, f: FrameId) -> EvalResult<Bounce> {
    let phase = match it.frames[f].phase {
        Some(p) => p,
        None => return Ok(Bounce::Invisible),
    };
    let n = it.arr_len(phase.details);
    for k in (1..n).rev() {
        let next = it.act_detail(phase.details, k);
        it.ds_push(next);
    }
    let first = it.act_detail(phase.details, 0);
    it.frames[f].phase = Action::from_cell(&first);
    Ok(Bounce::Redo { checked: false })
}

fn hijacker_dispatcher(it: &mut Interp, f: FrameId) -> EvalResult<Bounce> {
    let phase = match it.frames[f].phase {
        Some(p) => p,
        None => return Ok(Bounce::Invisible),
    };
    let hijacker = it.act_detail(phase.details, 0);
    let act = match Action::from_cell(&hijacker) {
        Some(a) => a,
        None => return Err(ScriptError::BadValue(it.mold(&hijacker)).into()),
    };

    let same_shape = match it.frames[f].original {
        Some(orig) => it.act_underlying(orig.paramlist) == it.act_underlying(act.paramlist),
        None => false,
    };
    if same_shape {
        it.frames[f].phase = Some(act);
        return Ok(Bounce::Redo { checked: true });
    }

    // different parameters: the hijacker gathers them by position
    let out = it.redo_action(f, hijacker)?;
    it.ret(f, out)
}

impl Interp {
    /// Runs `run` with a running frame's arguments, quoted at a rebuilt
    /// callsite in parameter order; used refinements go into a path
    fn redo_action(&mut self, f: FrameId, run: Cell) -> EvalResult<Cell> {
        let paramlist = match self.frames[f].original {
            Some(act) => act.paramlist,
            None => return Ok(Cell::void()),
        };
        let mut run = run.fresh();
        run.flags.remove(CellFlags::ENFIXED);

        let mut head = vec![run];
        let mut args = Vec::new();
        let mut used = true;
        for i in 1..=self.act_num_params(paramlist) {
            let (sym, class, _, pflags) = self.act_param(paramlist, i);
            if pflags.contains(ParamFlags::HIDDEN) {
                continue;
            }
            let arg = self.arg(f, i);
            match class {
                ParamClass::Local | ParamClass::Return => continue,
                ParamClass::Refinement => {
                    used = arg.truthy_p();
                    if used {
                        head.push(Cell::word(Kind::Word, sym));
                    }
                    continue;
                }
                _ if !used => continue,
                _ => {}
            }
            let quoted = self.quotify(arg.fresh(), 1);
            args.push(quoted);
        }

        let first = if head.len() == 1 {
            run
        } else {
            Cell::series(Kind::Path, self.make_array_from(head, true), 0)
        };
        let mut cells = Vec::with_capacity(args.len() + 1);
        cells.push(first);
        cells.extend(args);
        let code = self.make_array_from(cells, true);
        self.guard_series(code);
        let result = self.do_array_at(code, 0, None);
        self.unguard_series(code);
        result
    }
}

ren_native! {
    const FUNCTION_NATIVES;
    it f;

    Prefix "func" "spec [block!] body [block!]" [spec, body] {
        let action = it.make_function(&spec, &body, false)?;
        it.ret(f, action)
    }

    Prefix "function" "spec [block!] body [block!]" [spec, body] {
        let action = it.make_function(&spec, &body, true)?;
        it.ret(f, action)
    }

    Prefix "does" "body [block!]" [body] {
        let spec = it.make_array(0, true);
        let action = it.make_function(&Cell::series(Kind::Block, spec, 0), &body, false)?;
        it.ret(f, action)
    }

    Prefix "specialize" "specializee [action!] def [block!]" [specializee, def] {
        let action = it.specialize(&specializee, &def)?;
        it.ret(f, action)
    }

    Prefix "adapt" "adaptee [action!] prelude [block!]" [adaptee, prelude] {
        let base = match Action::from_cell(&adaptee) {
            Some(a) => a,
            None => return Err(ScriptError::BadValue(it.mold(&adaptee)).into()),
        };
        let (series, index) = match prelude.as_series() {
            Some(s) => s,
            None => return Err(ScriptError::BadValue(it.mold(&prelude)).into()),
        };
        let spec = it.derive_specifier(None, &prelude);
        let copy = it.copy_deep_specific(series, index, spec);
        let new = it.derive(
            base,
            vec![Cell::series(Kind::Block, copy, 0), adaptee.fresh()],
            adapter_dispatcher,
            |p| p,
        );
        it.relativize_deep(copy, new.paramlist);
        it.ret(f, new.cell(Binding::Unbound))
    }

    Prefix "enclose" "inner [action!] outer [action!]" [inner, outer] {
        let base = match Action::from_cell(&inner) {
            Some(a) => a,
            None => return Err(ScriptError::BadValue(it.mold(&inner)).into()),
        };
        let new = it.derive(base, vec![inner.fresh(), outer.fresh()], encloser_dispatcher, |p| p);
        it.ret(f, new.cell(Binding::Unbound))
    }

    Prefix "chain" "pipeline [block!]" [pipeline] {
        let actions = it.reduce_to_vec(&pipeline)?;
        let first = match actions.first().and_then(Action::from_cell) {
            Some(a) => a,
            None => return Err(ScriptError::BadValue(it.mold(&pipeline)).into()),
        };
        if let Some(bad) = actions.iter().find(|a| !a.action_p()) {
            return Err(ScriptError::BadValue(it.mold(bad)).into());
        }
        let new = it.derive(first, actions, chainer_dispatcher, |p| p);
        it.ret(f, new.cell(Binding::Unbound))
    }

    Prefix "hijack" "victim [action!] hijacker [action!]" [victim, hijacker] {
        let act = match Action::from_cell(&victim) {
            Some(a) => a,
            None => return Err(ScriptError::BadValue(it.mold(&victim)).into()),
        };

        // the victim's old behavior lives on in a fresh action
        let saved_details: Vec<Cell> = it.arr_cells(act.details).to_vec();
        let saved_dispatcher = match it.act_dispatcher(act.details) {
            Some(d) => d,
            None => return Err(ScriptError::BadValue(it.mold(&victim)).into()),
        };
        let saved = it.derive(act, saved_details, saved_dispatcher, |p| p);

        let stub = it.stub_mut(act.details);
        stub.content = Content::Cells(vec![hijacker.fresh()]);
        stub.rest = 1;
        stub.misc = Misc::Dispatcher(hijacker_dispatcher);
        stub.link = Link::Exemplar(None);

        it.ret(f, saved.cell(victim.extra))
    }

    Prefix "tighten" "action [action!]" [action] {
        let base = match Action::from_cell(&action) {
            Some(a) => a,
            None => return Err(ScriptError::BadValue(it.mold(&action)).into()),
        };
        let new = it.derive(base, vec![action.fresh()], passthrough_dispatcher, |p| match p.payload {
            Payload::Param {
                sym,
                class: ParamClass::Normal,
                types,
                flags,
            } => Cell::param(sym, ParamClass::Tight, types, flags),
            _ => p,
        });
        it.ret(f, new.cell(action.extra))
    }

    Prefix "enfix" "action [action!]" [action] {
        let cell = it.enfixed(action.fresh());
        it.ret(f, cell)
    }
}

#[cfg(test)]
mod function_tests {
    use crate::ren::interp::{Interp, InterpConfig};

    fn run(code: &str) -> Option<i64> {
        let mut it = Interp::new(InterpConfig::default());
        it.do_string(code).unwrap().and_then(|c| c.as_integer())
    }

    #[test]
    fn functions_share_one_body() {
        assert_eq!(run("sq: func [x] [x * x] (sq 3) + sq 4"), Some(25));
        assert_eq!(run("fact: func [n] [either n = 0 [1] [n * fact n - 1]] fact 5"), Some(120));
    }

    #[test]
    fn closures_keep_their_frame() {
        assert_eq!(run("mk: func [n] [func [] [n]] g: mk 7 g"), Some(7));
    }

    #[test]
    fn function_gathers_locals() {
        let mut it = Interp::new(InterpConfig::default());
        it.do_string("x: 1 f: function [] [x: 2 x] f").unwrap();
        assert_eq!(it.do_string("x").unwrap().and_then(|c| c.as_integer()), Some(1));
        it.do_string("g: func [] [x: 3] g").unwrap();
        assert_eq!(it.do_string("x").unwrap().and_then(|c| c.as_integer()), Some(3));
    }

    #[test]
    fn invisible_and_void_functions() {
        assert_eq!(run("f: func [return: []] [] 1 f"), Some(1));
        assert_eq!(run("f: func [return: []] [10] 1 f"), Some(1));
        let mut it = Interp::new(InterpConfig::default());
        assert!(it.do_string("f: func [return: [<void>]] [10] f").unwrap().unwrap().void_p());
        assert!(it.do_string("f: func [] [] f").unwrap().unwrap().void_p());
    }

    #[test]
    fn specialization_hides_parameters() {
        assert_eq!(run("add10: specialize :add [value2: 10] add10 5"), Some(15));
        assert_eq!(run("a: specialize :add [value2: 10] b: specialize :a [value1: 1] b"), Some(11));
    }

    #[test]
    fn adapt_runs_a_prelude() {
        assert_eq!(run("f: func [x] [x] g: adapt :f [x: x * 2] g 5"), Some(10));
        let mut it = Interp::new(InterpConfig::default());
        assert!(it.do_string("f: func [x [integer!]] [x] g: adapt :f [x: \"no\"] g 5").is_err());
    }

    #[test]
    fn enclose_sees_the_inner_frame() {
        assert_eq!(
            run("f: func [x] [x + 1] g: enclose :f func [fr] [fr/x: 10 (do fr) * 2] g 1"),
            Some(22)
        );
    }

    #[test]
    fn chain_pipes_results() {
        assert_eq!(run("f: chain [:add func [x] [x * 10]] f 1 2"), Some(30));
    }

    #[test]
    fn hijack_redirects_every_reference() {
        assert_eq!(
            run("f: func [x] [x] g: :f old: hijack :f func [x] [x + 100] g 1"),
            Some(101)
        );
        assert_eq!(
            run("f: func [x] [x] old: hijack :f func [y] [y * 2] old 4"),
            Some(4)
        );
        assert_eq!(run("f: func [x] [x] hijack :f func [y] [y * 2] f 4"), Some(8));
    }

    #[test]
    fn enfix_takes_from_the_left() {
        assert_eq!(run("plus: enfix func [a b] [a + b] 1 plus 2"), Some(3));
    }
}
