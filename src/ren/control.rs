// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/control.rs

// Conditionals and evaluation natives. Branches are blocks, actions or
// quoted values; a branch taken by IF or CASE never yields null, so
// null is left to mean that no branch ran.

// <>

use super::action::Bounce;
use super::cell::Cell;
use super::error::{EvalResult, ScriptError};
use super::feed::FeedId;
use super::frame::EvalFlags;
use super::interp::Interp;
use super::kind::Kind;
use super::FrameId;

impl Interp {
    /// Runs a branch; actions receive `arg` if they take an argument
    pub(crate) fn run_branch(&mut self, branch: &Cell, arg: &Cell) -> EvalResult<Cell> {
        match branch.kind() {
            Kind::Block => self.do_block(branch, None),
            Kind::Action => {
                let takes_arg = match branch.as_action() {
                    Some((paramlist, _)) => self.first_visible_param(paramlist).is_some(),
                    None => false,
                };
                if takes_arg {
                    self.apply_action(*branch, &[*arg])
                } else {
                    self.apply_action(*branch, &[])
                }
            }
            Kind::Quoted => Ok(self.unquotify(branch.fresh(), 1)),
            _ => Err(ScriptError::BadValue(self.mold(branch)).into()),
        }
    }

    /// Evaluates one expression of a feed in its own frame; END if the
    /// feed held only invisibles
    pub(crate) fn step_feed(&mut self, feed: FeedId) -> EvalResult<Cell> {
        let f = self.push_frame(feed, EvalFlags::empty())?;
        let result = self.eval_step(f);
        let out = self.frames[f].out;
        self.drop_frame(f);
        result?;
        Ok(if out.end_p() { out } else { out.fresh() })
    }

    /// Evaluates every expression of a block, keeping the values
    pub(crate) fn reduce_to_vec(&mut self, block: &Cell) -> EvalResult<Vec<Cell>> {
        let (series, index) = match block.as_series() {
            Some(s) => s,
            None => return Err(ScriptError::BadValue(self.mold(block)).into()),
        };
        let spec = self.derive_specifier(None, block);

        // values ride the data stack so the collector sees them
        let base = self.ds.len();
        let feed = self.push_feed(series, index, spec);
        let mut result = Ok(());
        while !self.feed_at_end(feed) {
            match self.step_feed(feed) {
                Ok(v) if v.end_p() || v.nulled_p() => {}
                Ok(v) => self.ds_push(v),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.drop_feed(feed);
        let values = self.ds.split_off(base);
        result.map(|()| values)
    }

    fn condition_p(&self, cond: &Cell) -> EvalResult<bool> {
        if cond.void_p() {
            return Err(ScriptError::VoidConditional.into());
        }
        Ok(cond.truthy_p())
    }

    fn case_in_feed(&mut self, f: FrameId, feed: FeedId, all: bool, predicate: Option<Cell>) -> EvalResult<Cell> {
        self.frames[f].out = Cell::nulled();
        while !self.feed_at_end(feed) {
            let cond = self.step_feed(feed)?;
            if cond.end_p() {
                break;
            }
            if self.feed_at_end(feed) {
                // a condition without a branch falls out as the result
                return Ok(cond);
            }

            let (branch, _) = self.take_current(feed);
            let specifier = self.feeds[feed].specifier;
            let branch = self.derelativize(branch, specifier).fresh();
            if !matches!(branch.kind(), Kind::Block | Kind::Action | Kind::Quoted) {
                return Err(ScriptError::BadValue(self.mold(&branch)).into());
            }

            let hit = match predicate {
                Some(p) => {
                    let answer = self.apply_action(p, &[cond])?;
                    self.condition_p(&answer)?
                }
                None => self.condition_p(&cond)?,
            };
            if !hit {
                continue;
            }

            let result = voidify(self.run_branch(&branch, &cond)?);
            self.frames[f].out = result;
            if !all {
                return Ok(result);
            }
        }
        Ok(self.frames[f].out)
    }

    fn switch_in_feed(
        &mut self,
        f: FrameId,
        feed: FeedId,
        value: Cell,
        all: bool,
        predicate: Option<Cell>,
    ) -> EvalResult<Cell> {
        self.frames[f].out = Cell::nulled();
        let mut matched = false;
        while !self.feed_at_end(feed) {
            if self.feeds[feed].current.kind() == Kind::Block {
                let (branch, _) = self.take_current(feed);
                if !matched {
                    continue;
                }
                let specifier = self.feeds[feed].specifier;
                let branch = self.derelativize(branch, specifier).fresh();
                let result = voidify(self.run_branch(&branch, &value)?);
                self.frames[f].out = result;
                if !all {
                    return Ok(result);
                }
                matched = false;
                continue;
            }

            let comparand = self.step_feed(feed)?;
            if comparand.end_p() {
                break;
            }
            if self.feed_at_end(feed) {
                return Ok(comparand);
            }
            if matched {
                continue;
            }
            matched = match predicate {
                Some(p) => self.apply_action(p, &[value, comparand])?.truthy_p(),
                None => self.equal_values(&value, &comparand, false),
            };
        }
        Ok(self.frames[f].out)
    }

    fn default_target_value(&mut self, target: &Cell) -> EvalResult<Cell> {
        match target.kind() {
            Kind::SetWord => Ok(self.try_get_var(target, None).unwrap_or_else(Cell::nulled)),
            _ => {
                let getter = target.fresh().rekind(Kind::GetPath);
                let code = self.make_array_from(vec![getter], true);
                self.do_array_at(code, 0, None)
            }
        }
    }

    fn assign_default(&mut self, target: &Cell, value: Cell) -> EvalResult<()> {
        match target.kind() {
            Kind::SetWord => self.set_word_var(target, None, value),
            _ => {
                let quoted = self.quotify(value, 1);
                let code = self.make_array_from(vec![target.fresh(), quoted], true);
                self.do_array_at(code, 0, None).map(|_| ())
            }
        }
    }

    fn match_p(&mut self, test: &Cell, value: &Cell) -> EvalResult<bool> {
        match test.kind() {
            Kind::Datatype => Ok(test.as_datatype() == Some(value.kind())),
            Kind::Typeset => match test.payload {
                super::cell::Payload::Typeset(ts) => Ok(ts.contains(value.kind())),
                _ => Ok(false),
            },
            Kind::Block => {
                let (series, index) = match test.as_series() {
                    Some(s) => s,
                    None => return Ok(false),
                };
                let spec = self.derive_specifier(None, test);
                let items: Vec<Cell> = self.arr_cells(series).iter().skip(index).copied().collect();
                for item in items {
                    let t = if item.kind() == Kind::Word {
                        self.get_var(&item, spec)?
                    } else {
                        item
                    };
                    if matches!(t.kind(), Kind::Datatype | Kind::Typeset) && self.match_p(&t, value)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Kind::Action => Ok(self.apply_action(*test, &[*value])?.truthy_p()),
            _ => Err(ScriptError::BadValue(self.mold(test)).into()),
        }
    }

    /// Evaluates a value as if it were written at the frame's feed position
    fn reeval_value(&mut self, f: FrameId, value: Cell) -> EvalResult<Bounce> {
        let feed = self.frames[f].feed;
        self.inject_current(feed, value);
        let out = self.eval_child(f, EvalFlags::empty())?;
        if out.end_p() {
            return Ok(Bounce::Invisible);
        }
        self.ret(f, out.fresh())
    }

    fn do_value(&mut self, f: FrameId, source: Cell) -> EvalResult<Bounce> {
        match source.kind() {
            Kind::Nulled => self.ret(f, Cell::nulled()),
            Kind::Block | Kind::Group => {
                let v = self.do_block(&source, None)?;
                self.ret(f, v)
            }
            Kind::Text => {
                let (series, index) = match source.as_series() {
                    Some(s) => s,
                    None => return Err(ScriptError::BadValue(self.mold(&source)).into()),
                };
                let code: String = self.text(series).chars().skip(index).collect();
                let array = self.scan_source(&code, None)?;
                let v = self.do_array_at(array, 0, None)?;
                self.ret(f, v)
            }
            Kind::Frame => {
                let v = self.do_frame_value(&source)?;
                self.ret(f, v)
            }
            Kind::Action => self.reeval_value(f, source),
            _ => Err(ScriptError::BadValue(self.mold(&source)).into()),
        }
    }
}

/// Null branch results become void
fn voidify(v: Cell) -> Cell {
    if v.nulled_p() {
        Cell::void()
    } else {
        v
    }
}

/// Runs `body` over a feed on a block, dropping the feed on every exit
fn with_block_feed<T>(
    it: &mut Interp,
    block: &Cell,
    body: impl FnOnce(&mut Interp, FeedId) -> EvalResult<T>,
) -> EvalResult<T> {
    let (series, index) = match block.as_series() {
        Some(s) => s,
        None => return Err(ScriptError::BadValue(it.mold(block)).into()),
    };
    let spec = it.derive_specifier(None, block);
    let feed = it.push_feed(series, index, spec);
    let result = body(it, feed);
    it.drop_feed(feed);
    result
}

ren_native! {
    const CONTROL_NATIVES;
    it f;

    Prefix "if" "condition [<opt> any-value!] branch [block! action! quoted!]" [condition, branch] {
        if !it.condition_p(&condition)? {
            return it.ret(f, Cell::nulled());
        }
        let v = it.run_branch(&branch, &condition)?;
        it.ret(f, voidify(v))
    }

    Prefix "either" "condition [<opt> any-value!] true-branch [block! action! quoted!] false-branch [block! action! quoted!]" [condition, true_branch, false_branch] {
        let branch = if it.condition_p(&condition)? { true_branch } else { false_branch };
        let v = it.run_branch(&branch, &condition)?;
        it.ret(f, v)
    }

    Defer "else" "optional [<opt> any-value!] branch [block! action! quoted!]" [optional, branch] {
        if !optional.nulled_p() {
            return it.ret(f, optional);
        }
        let v = it.run_branch(&branch, &optional)?;
        it.ret(f, v)
    }

    Defer "then" "optional [<opt> any-value!] branch [block! action! quoted!]" [optional, branch] {
        if optional.nulled_p() {
            return it.ret(f, Cell::nulled());
        }
        let v = it.run_branch(&branch, &optional)?;
        it.ret(f, v)
    }

    Defer "also" "optional [<opt> any-value!] branch [block! action! quoted!]" [optional, branch] {
        if !optional.nulled_p() {
            it.run_branch(&branch, &optional)?;
        }
        it.ret(f, optional)
    }

    Prefix "all" "block [block!]" [block] {
        let v = with_block_feed(it, &block, |it, feed| {
            it.frames[f].out = Cell::void();
            while !it.feed_at_end(feed) {
                let v = it.step_feed(feed)?;
                if v.end_p() || v.void_p() {
                    continue;
                }
                if v.falsey_p() {
                    return Ok(Cell::nulled());
                }
                it.frames[f].out = v;
            }
            Ok(it.frames[f].out)
        })?;
        it.ret(f, v)
    }

    Prefix "any" "block [block!]" [block] {
        let v = with_block_feed(it, &block, |it, feed| {
            while !it.feed_at_end(feed) {
                let v = it.step_feed(feed)?;
                if v.end_p() || v.void_p() {
                    continue;
                }
                if v.truthy_p() {
                    return Ok(v);
                }
            }
            Ok(Cell::nulled())
        })?;
        it.ret(f, v)
    }

    Prefix "case" "cases [block!] /all /predicate pred [action!]" [cases, all, use_predicate, pred] {
        let predicate = if use_predicate.truthy_p() { Some(pred) } else { None };
        let all = all.truthy_p();
        let v = with_block_feed(it, &cases, |it, feed| it.case_in_feed(f, feed, all, predicate))?;
        it.ret(f, v)
    }

    Prefix "switch" "value [<opt> any-value!] cases [block!] /all /predicate pred [action!]" [value, cases, all, use_predicate, pred] {
        let predicate = if use_predicate.truthy_p() { Some(pred) } else { None };
        let all = all.truthy_p();
        let value = value.fresh();
        let v = with_block_feed(it, &cases, |it, feed| it.switch_in_feed(f, feed, value, all, predicate))?;
        it.ret(f, v)
    }

    Enfix "default" "'target [set-word! set-path!] branch [block! action! quoted!] /only" [target, branch, only] {
        let target = target.fresh();
        let current = it.default_target_value(&target)?;
        let unset = current.nulled_p() || current.void_p() || (only.falsey_p() && current.blank_p());
        if !unset {
            return it.ret(f, current);
        }
        let v = it.run_branch(&branch, &current)?;
        it.frames[f].out = v;
        it.assign_default(&target, v)?;
        it.ret(f, v)
    }

    Prefix "match" "test [datatype! typeset! block! action!] value [<opt> any-value!]" [test, value] {
        if !it.match_p(&test, &value)? {
            return it.ret(f, Cell::nulled());
        }
        // a falsey match would read as a failed one
        if value.falsey_p() {
            return it.ret(f, Cell::void());
        }
        it.ret(f, value.fresh())
    }

    Prefix "reeval" "value [<opt> any-value!]" [value] {
        it.reeval_value(f, value.fresh())
    }

    Prefix "eval" "value [<opt> any-value!]" [value] {
        it.reeval_value(f, value.fresh())
    }

    Prefix "do" "source [<opt> block! group! text! frame! action!]" [source] {
        it.do_value(f, source.fresh())
    }

    Prefix "evaluate" "source [<opt> block! group!] /set var [word!]" [source, set, var] {
        if source.nulled_p() {
            return it.ret(f, Cell::nulled());
        }
        let stepped = with_block_feed(it, &source, |it, feed| {
            if it.feed_at_end(feed) {
                return Ok(None);
            }
            let v = it.step_feed(feed)?;
            Ok(Some((v, it.feed_position(feed))))
        })?;
        let (value, position) = match stepped {
            Some(s) => s,
            None => return it.ret(f, Cell::nulled()),
        };
        if set.truthy_p() {
            let stored = if value.end_p() { Cell::void() } else { value };
            it.set_word_var(&var, None, stored)?;
        }
        let mut rest = source.fresh();
        rest.set_index(position);
        it.ret(f, rest)
    }

    Prefix "comment" "return: [] 'discarded [block! text! tag! integer! decimal! char! binary!]" [discarded] {
        Ok(Bounce::Invisible)
    }

    Prefix "elide" "return: [] discarded [<opt> any-value!]" [discarded] {
        Ok(Bounce::Invisible)
    }
}

#[cfg(test)]
mod control_tests {
    use crate::ren::error::{Error, ScriptError};
    use crate::ren::interp::{Interp, InterpConfig};

    fn eval(code: &str) -> (Interp, Option<crate::ren::cell::Cell>) {
        let mut it = Interp::new(InterpConfig::default());
        let v = it.do_string(code).unwrap();
        (it, v)
    }

    fn run(code: &str) -> Option<i64> {
        eval(code).1.and_then(|c| c.as_integer())
    }

    fn molded(code: &str) -> String {
        let (it, v) = eval(code);
        v.map(|c| it.mold(&c)).unwrap_or_else(|| String::from("~null~"))
    }

    #[test]
    fn if_voidifies_null_branches() {
        assert_eq!(run("if true [10]"), Some(10));
        assert_eq!(molded("if false [10]"), "~null~");
        assert_eq!(molded("if true [null]"), "#[void]");
        assert_eq!(molded("either true [null] [1]"), "~null~");
        assert_eq!(run("if 1 '5"), Some(5));
        assert_eq!(run("if 3 func [x] [x * 2]"), Some(6));
    }

    #[test]
    fn void_is_not_a_condition() {
        let mut it = Interp::new(InterpConfig::default());
        assert!(matches!(
            it.do_string("if #[void] [2]"),
            Err(Error::Script(ScriptError::VoidConditional))
        ));
    }

    #[test]
    fn deferred_branches_chain() {
        assert_eq!(run("if false [10] else [20]"), Some(20));
        assert_eq!(run("if true [10] else [20]"), Some(10));
        assert_eq!(run("if true [10] then [20]"), Some(20));
        assert_eq!(run("if true [3] then func [x] [x + 1]"), Some(4));
        assert_eq!(run("x: 0 if true [5] also [x: 1] x"), Some(1));
        assert_eq!(molded("if false [1] then [2]"), "~null~");
    }

    #[test]
    fn all_and_any() {
        assert_eq!(run("all [1 2 3]"), Some(3));
        assert_eq!(molded("all [1 false 3]"), "~null~");
        assert_eq!(molded("all []"), "#[void]");
        assert_eq!(run("any [false null 4 5]"), Some(4));
        assert_eq!(molded("any [false _]"), "~null~");
    }

    #[test]
    fn case_forms() {
        assert_eq!(run("case [false [1] true [2] true [3]]"), Some(2));
        assert_eq!(run("case/all [false [1] true [2] true [3]]"), Some(3));
        assert_eq!(run("case [false [1] 10]"), Some(10));
        assert_eq!(molded("case [false [1]]"), "~null~");
        assert_eq!(run("case/predicate [1 [10] 2 [20]] func [x] [x = 2]"), Some(20));
        assert_eq!(run("n: 0 case/all [true [n: n + 1] false [n: 10] true [n: n + 1]] n"), Some(2));
    }

    #[test]
    fn switch_forms() {
        assert_eq!(run("switch 2 [1 [10] 2 [20]]"), Some(20));
        assert_eq!(run("switch 3 [1 2 [12] 3 4 [34]]"), Some(34));
        assert_eq!(run("switch 9 [1 [10] 99]"), Some(99));
        assert_eq!(molded("switch 9 [1 [10]]"), "~null~");
        assert_eq!(run("switch \"a\" [\"A\" [1]]"), Some(1));
        assert_eq!(run("switch 1 [(0 + 1) [5]]"), Some(5));
        assert_eq!(run("n: 0 switch/all 1 [1 [n: n + 1] 2 [n: 10] 1 [n: n + 1]] n"), Some(2));
    }

    #[test]
    fn default_assigns_unset_targets() {
        let (mut it, v) = eval("x: default [10]");
        assert_eq!(v.and_then(|c| c.as_integer()), Some(10));
        assert_eq!(it.do_string("x").unwrap().and_then(|c| c.as_integer()), Some(10));
        assert_eq!(run("x: 1 x: default [10]"), Some(1));
        assert_eq!(run("x: _ x: default [10]"), Some(10));
        assert_eq!(molded("x: _ x: default/only [10]"), "_");
        assert_eq!(run("o: make object! [a: null] o/a: default [7] o/a"), Some(7));
    }

    #[test]
    fn match_filters() {
        assert_eq!(run("match integer! 10"), Some(10));
        assert_eq!(molded("match integer! \"a\""), "~null~");
        assert_eq!(run("match [text! integer!] 3"), Some(3));
        assert_eq!(molded("match logic! false"), "#[void]");
        assert_eq!(run("match func [x] [x > 1] 5"), Some(5));
    }

    #[test]
    fn reeval_runs_values_in_place() {
        assert_eq!(run("reeval :add 1 2"), Some(3));
        assert_eq!(run("x: 5 reeval first [x]"), Some(5));
        assert_eq!(molded("reeval comment \"x\""), "#[void]");
        assert_eq!(run("eval first [x:] 4 x"), Some(4));
    }

    #[test]
    fn do_and_evaluate() {
        assert_eq!(run("do [1 + 2]"), Some(3));
        assert_eq!(run("do \"2 * 3\""), Some(6));
        assert_eq!(molded("do []"), "#[void]");
        assert_eq!(molded("evaluate [1 + 2 10]"), "[10]");
        assert_eq!(run("evaluate/set [1 + 2 10] 'v v"), Some(3));
        assert_eq!(molded("evaluate []"), "~null~");
    }

    #[test]
    fn reduce_skips_invisibles() {
        assert_eq!(molded("reduce [1 + 1 comment \"x\" 3]"), "[2 3]");
    }
}

#[cfg(test)]
mod predicate_tests {
    use crate::ren::interp::{Interp, InterpConfig};

    fn run(code: &str) -> Option<i64> {
        let mut it = Interp::new(InterpConfig::default());
        it.do_string(code).unwrap().and_then(|c| c.as_integer())
    }

    #[test]
    fn predicate_refinements_take_their_own_argument() {
        assert_eq!(run("switch/predicate 3 [1 [10] 5 [50]] func [a b] [b > a]"), Some(50));
        assert_eq!(run("case/all/predicate [1 [10] 4 [40] 6 [60]] :even?"), Some(60));
        assert_eq!(run("switch/all/predicate 0 [1 [10] 2 [20]] func [a b] [b > a]"), Some(20));
    }
}
