// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/loops.rs

// Looping natives. A body result of null or blank becomes void, so a
// loop returns null only when it was broken out of; a loop whose body
// never ran returns blank.

// <>

use super::cell::Cell;
use super::error::{Escape, EvalResult, ScriptError};
use super::interp::Interp;
use super::kind::Kind;
use super::node::SeriesId;
use super::series::Content;
use super::symtab::Sym;
use super::throw::LoopCatch;
use super::FrameId;

/// Outcome of one run of a loop body
#[derive(Debug, Clone, Copy, PartialEq)]
enum Pass {
    Body(Cell),
    /// CONTINUE, with the value it gave (void if none)
    Continued(Cell),
    Break,
}

impl Pass {
    fn value(self) -> Option<Cell> {
        match self {
            Pass::Body(v) | Pass::Continued(v) => Some(v),
            Pass::Break => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EachMode {
    ForEach,
    MapEach,
    Every,
    RemoveEach,
}

/// Loop variables and the body copy bound to them
struct LoopVars {
    context: SeriesId,
    body: Cell,
    count: usize,
}

fn voidify_loop(v: Cell) -> Cell {
    if v.nulled_p() || v.blank_p() {
        Cell::void()
    } else {
        v
    }
}

impl Interp {
    fn loop_pass(&mut self, body: &Cell) -> EvalResult<Pass> {
        Ok(match self.run_loop_body(body)? {
            Ok(v) => Pass::Body(v),
            Err(LoopCatch::Continue(v)) => Pass::Continued(v),
            Err(LoopCatch::Break) => Pass::Break,
        })
    }

    /// Symbols named by a loop's word or block of words
    fn loop_syms(&mut self, vars: &Cell) -> EvalResult<Vec<Sym>> {
        let mut syms: Vec<Sym> = Vec::new();
        let words: Vec<Cell> = match vars.kind() {
            k if k.any_word_p() => vec![*vars],
            Kind::Block => match vars.as_series() {
                Some((series, index)) => self.arr_cells(series).iter().skip(index).copied().collect(),
                None => Vec::new(),
            },
            _ => return Err(ScriptError::BadValue(self.mold(vars)).into()),
        };
        for w in words {
            let sym = match w.as_word() {
                Some(s) if w.kind().any_word_p() => s,
                _ => return Err(ScriptError::BadValue(self.mold(&w)).into()),
            };
            if syms.iter().any(|s| self.symtab.same_p(*s, sym)) {
                return Err(ScriptError::DupVars(self.sym_name(sym).to_string()).into());
            }
            syms.push(sym);
        }
        if syms.is_empty() {
            return Err(ScriptError::BadValue(self.mold(vars)).into());
        }
        Ok(syms)
    }

    /// Makes a context for the loop variables and binds a copy of the
    /// body to it; both stay guarded until `drop_loop_vars`
    fn bind_loop_vars(&mut self, vars: &Cell, body: &Cell) -> EvalResult<LoopVars> {
        let syms = self.loop_syms(vars)?;
        let (series, index) = match body.as_series() {
            Some(s) => s,
            None => return Err(ScriptError::BadValue(self.mold(body)).into()),
        };

        let context = self.make_context(Kind::Object, syms.len());
        for sym in &syms {
            self.append_to_context(context, *sym, Cell::nulled())?;
        }
        self.guard_series(context);

        let spec = self.derive_specifier(None, body);
        let copy = self.copy_deep_specific(series, index, spec);
        self.bind_syms_deep(copy, context, &syms);
        self.guard_series(copy);

        Ok(LoopVars {
            context,
            body: Cell::series(Kind::Block, copy, 0),
            count: syms.len(),
        })
    }

    fn drop_loop_vars(&mut self, lv: &LoopVars) {
        if let Some((copy, _)) = lv.body.as_series() {
            self.unguard_series(copy);
        }
        self.unguard_series(lv.context);
    }

    /// Runs a loop over loop variables, releasing them on every exit
    fn with_loop_vars(
        &mut self,
        vars: &Cell,
        body: &Cell,
        run: impl FnOnce(&mut Interp, &LoopVars) -> EvalResult<Cell>,
    ) -> EvalResult<Cell> {
        let lv = self.bind_loop_vars(vars, body)?;
        let result = run(self, &lv);
        self.drop_loop_vars(&lv);
        result
    }

    /// Number of positions FOR-EACH and friends visit in a value
    fn each_end(&self, data: &Cell) -> usize {
        match data.kind() {
            k if k.any_array_p() => data.as_series().map_or(0, |(s, _)| self.arr_len(s)),
            k if k.any_string_p() => data.as_series().map_or(0, |(s, _)| self.text(s).chars().count()),
            Kind::Binary => data.as_series().map_or(0, |(s, _)| self.bytes(s).len()),
            k if k.any_context_p() => data.as_context().map_or(0, |c| self.context_len(c) + 1),
            _ => 0,
        }
    }

    fn each_start(&self, data: &Cell) -> usize {
        match data.kind() {
            k if k.any_context_p() => 1,
            _ => data.index(),
        }
    }

    fn each_item(&mut self, data: &Cell, i: usize) -> Cell {
        let (series, _) = match data.as_series() {
            Some(s) => s,
            None => return Cell::nulled(),
        };
        match data.kind() {
            k if k.any_array_p() => {
                let spec = self.derive_specifier(None, data);
                let item = self.arr_at(series, i);
                self.derelativize(item, spec).fresh()
            }
            k if k.any_string_p() => self.text(series).chars().nth(i).map_or_else(Cell::nulled, Cell::char),
            Kind::Binary => self
                .bytes(series)
                .get(i)
                .map_or_else(Cell::nulled, |b| Cell::integer(*b as i64)),
            _ => Cell::nulled(),
        }
    }

    /// Sets the loop variables from the data at `pos`, advancing it
    fn set_each_vars(&mut self, lv: &LoopVars, data: &Cell, pos: &mut usize, end: usize) -> EvalResult<()> {
        if let Some(ctx) = data.as_context() {
            // one variable gets the key; a second gets the value
            let keylist = self.keylist_of(ctx)?;
            let key = match self.key_sym(keylist, *pos) {
                Some(sym) => Cell::word(Kind::Word, sym),
                None => Cell::nulled(),
            };
            self.set_var(lv.context, 1, key)?;
            if lv.count > 1 {
                let value = self.var(ctx, *pos);
                self.set_var(lv.context, 2, value)?;
            }
            for k in 3..=lv.count {
                self.set_var(lv.context, k, Cell::nulled())?;
            }
            *pos += 1;
            return Ok(());
        }
        for k in 1..=lv.count {
            let v = if *pos < end {
                self.each_item(data, *pos)
            } else {
                Cell::nulled()
            };
            self.set_var(lv.context, k, v)?;
            *pos += 1;
        }
        Ok(())
    }

    fn each_core(&mut self, f: FrameId, mode: EachMode, vars: &Cell, data: &Cell, body: &Cell) -> EvalResult<Cell> {
        let series = data.as_series().map(|(s, _)| s);
        if let (EachMode::RemoveEach, Some(s)) = (mode, series) {
            self.ensure_mutable(s)?;
        }

        self.with_loop_vars(vars, body, |it, lv| {
            if let Some(s) = series {
                it.hold(s);
            }
            let mut removals: Vec<usize> = Vec::new();
            let result = it.each_passes(f, mode, lv, data, &mut removals);
            if let Some(s) = series {
                it.release_hold(s);
            }
            // removals apply even when the body failed or threw
            if mode == EachMode::RemoveEach && !removals.is_empty() {
                if let Some(s) = series {
                    it.remove_positions(s, &removals);
                }
            }
            match result? {
                None => Ok(Cell::nulled()),
                Some(_) if mode == EachMode::RemoveEach => Ok(Cell::integer(removals.len() as i64)),
                Some(v) => Ok(v),
            }
        })
    }

    /// Body runs of an each-loop; None when broken out of
    fn each_passes(
        &mut self,
        f: FrameId,
        mode: EachMode,
        lv: &LoopVars,
        data: &Cell,
        removals: &mut Vec<usize>,
    ) -> EvalResult<Option<Cell>> {
        let end = self.each_end(data);
        let mut pos = self.each_start(data);

        let collected = if mode == EachMode::MapEach {
            let arr = self.make_array(0, true);
            self.frames[f].spare = Cell::series(Kind::Block, arr, 0);
            Some(arr)
        } else {
            None
        };
        self.frames[f].out = Cell::blank();
        let mut every_failed = false;

        while pos < end {
            let first = pos;
            self.set_each_vars(lv, data, &mut pos, end)?;
            let pass = self.loop_pass(&lv.body)?;
            let v = match pass.value() {
                Some(v) => v,
                None => return Ok(None),
            };

            match mode {
                EachMode::ForEach => self.frames[f].out = voidify_loop(v),
                EachMode::MapEach => {
                    if !voidify_loop(v).void_p() {
                        if let Some(arr) = collected {
                            self.arr_push(arr, v)?;
                        }
                    }
                }
                EachMode::Every => {
                    if v.void_p() {
                        if let Pass::Continued(_) = pass {
                            continue;
                        }
                        return Err(ScriptError::NeedNonVoid(String::from("every body")).into());
                    }
                    if v.truthy_p() {
                        if !every_failed {
                            self.frames[f].out = v;
                        }
                    } else {
                        every_failed = true;
                        self.frames[f].out = Cell::logic(false);
                    }
                }
                EachMode::RemoveEach => {
                    if v.void_p() {
                        if let Pass::Continued(_) = pass {
                            continue;
                        }
                        return Err(ScriptError::NeedNonVoid(String::from("remove-each body")).into());
                    }
                    if v.truthy_p() {
                        removals.extend(first..pos.min(end));
                    }
                }
            }
        }

        Ok(Some(match collected {
            Some(arr) => Cell::series(Kind::Block, arr, 0),
            None => self.frames[f].out,
        }))
    }

    /// Takes out the given positions of a series in one go
    fn remove_positions(&mut self, series: SeriesId, positions: &[usize]) {
        let keep = |i: usize| positions.binary_search(&i).is_err();
        match &mut self.stub_mut(series).content {
            Content::Cells(v) => {
                let mut i = 0;
                v.retain(|_| {
                    i += 1;
                    keep(i - 1)
                });
            }
            Content::Text(t) => {
                *t = t.chars().enumerate().filter(|(i, _)| keep(*i)).map(|(_, c)| c).collect();
            }
            Content::Bytes(b) => {
                let mut i = 0;
                b.retain(|_| {
                    i += 1;
                    keep(i - 1)
                });
            }
            _ => {}
        }
    }

    /// Common shape of WHILE and WHILE-NOT
    fn while_core(&mut self, f: FrameId, condition: &Cell, body: &Cell, want: bool) -> EvalResult<Cell> {
        self.frames[f].out = Cell::blank();
        loop {
            let cond = self.do_block(condition, None)?;
            if cond.void_p() {
                return Err(ScriptError::VoidConditional.into());
            }
            if cond.truthy_p() != want {
                return Ok(self.frames[f].out);
            }
            match self.loop_pass(body)?.value() {
                Some(v) => self.frames[f].out = voidify_loop(v),
                None => return Ok(Cell::nulled()),
            }
        }
    }

    /// Common shape of UNTIL and UNTIL-NOT
    fn until_core(&mut self, body: &Cell, want: bool) -> EvalResult<Cell> {
        loop {
            let v = match self.loop_pass(body)?.value() {
                Some(v) => v,
                None => return Ok(Cell::nulled()),
            };
            if v.void_p() {
                continue;
            }
            if v.truthy_p() == want {
                return Ok(voidify_loop(v));
            }
        }
    }

    fn count_loop(&mut self, f: FrameId, count: Option<i64>, body: &Cell) -> EvalResult<Cell> {
        self.frames[f].out = Cell::blank();
        let mut n = 0i64;
        while count.map_or(true, |c| n < c) {
            n += 1;
            match self.loop_pass(body)?.value() {
                Some(v) => self.frames[f].out = voidify_loop(v),
                None => return Ok(Cell::nulled()),
            }
        }
        Ok(self.frames[f].out)
    }

    /// Counting loop over a variable, re-reading it after each body run
    fn for_core(&mut self, f: FrameId, lv: &LoopVars, start: Cell, end: Cell, bump: Cell) -> EvalResult<Cell> {
        self.frames[f].out = Cell::blank();
        let decimal = [start, end, bump].iter().any(|c| c.kind() == Kind::Decimal);
        if !decimal {
            if let (Some(i), Some(stop), Some(step)) = (start.as_integer(), end.as_integer(), bump.as_integer()) {
                return self.for_integer(f, lv, i, stop, step);
            }
        }
        let num = |c: &Cell| c.as_integer().map(|i| i as f64).or_else(|| c.as_decimal()).unwrap_or(0.0);
        let (mut i, stop, step) = (num(&start), num(&end), num(&bump));
        if step == 0.0 {
            return Err(ScriptError::OutOfRange(String::from("bump of 0")).into());
        }
        let cell_of = |x: f64| if decimal { Cell::decimal(x) } else { Cell::integer(x as i64) };

        while (step > 0.0 && i <= stop) || (step < 0.0 && i >= stop) {
            self.set_var(lv.context, 1, cell_of(i))?;
            match self.loop_pass(&lv.body)?.value() {
                Some(v) => self.frames[f].out = voidify_loop(v),
                None => return Ok(Cell::nulled()),
            }
            let var = self.var(lv.context, 1);
            i = match var.kind() {
                Kind::Integer | Kind::Decimal => num(&var),
                _ => {
                    return Err(ScriptError::TypeMismatch {
                        expected: String::from("number"),
                        found: var.kind().name().to_string(),
                    }
                    .into())
                }
            };
            i += step;
        }
        Ok(self.frames[f].out)
    }

    /// FOR over integers; stepping past the integer range is an error
    fn for_integer(&mut self, f: FrameId, lv: &LoopVars, mut i: i64, stop: i64, step: i64) -> EvalResult<Cell> {
        if step == 0 {
            return Err(ScriptError::OutOfRange(String::from("bump of 0")).into());
        }
        while (step > 0 && i <= stop) || (step < 0 && i >= stop) {
            self.set_var(lv.context, 1, Cell::integer(i))?;
            match self.loop_pass(&lv.body)?.value() {
                Some(v) => self.frames[f].out = voidify_loop(v),
                None => return Ok(Cell::nulled()),
            }
            let var = self.var(lv.context, 1);
            i = match var.as_integer() {
                Some(i) => i,
                None => {
                    return Err(ScriptError::TypeMismatch {
                        expected: String::from("integer!"),
                        found: var.kind().name().to_string(),
                    }
                    .into())
                }
            };
            if i == stop {
                break;
            }
            i = i.checked_add(step).ok_or(ScriptError::Overflow)?;
        }
        Ok(self.frames[f].out)
    }

    fn for_skip_core(&mut self, f: FrameId, lv: &LoopVars, series: Cell, skip: i64) -> EvalResult<Cell> {
        self.frames[f].out = Cell::blank();
        if skip == 0 {
            return Ok(self.frames[f].out);
        }
        let len = self.each_end(&series) as i64;
        let mut i = if skip > 0 {
            series.index() as i64
        } else {
            len + skip
        };
        while i >= 0 && i < len {
            let mut at = series;
            at.set_index(i as usize);
            self.set_var(lv.context, 1, at)?;
            match self.loop_pass(&lv.body)?.value() {
                Some(v) => self.frames[f].out = voidify_loop(v),
                None => return Ok(Cell::nulled()),
            }
            let var = self.var(lv.context, 1);
            i = match var.as_series() {
                Some((s, index)) if Some(s) == series.as_series().map(|x| x.0) => index as i64,
                _ => return Err(ScriptError::BadValue(self.mold(&var)).into()),
            };
            i += skip;
        }
        Ok(self.frames[f].out)
    }

    fn cycle_core(&mut self, body: &Cell) -> EvalResult<Cell> {
        loop {
            match self.loop_pass(body) {
                Ok(Pass::Break) => return Ok(Cell::nulled()),
                Ok(_) => {}
                Err(Escape::Thrown) if self.same_action_p(&self.thrown.label, &self.builtins.stop) => {
                    return Ok(self.clear_thrown());
                }
                Err(e) => return Err(e),
            }
        }
    }
}

ren_native! {
    const LOOP_NATIVES;
    it f;

    Prefix "loop" "count [<blank> integer! logic!] body [block!]" [count, body] {
        let count = match count.as_logic() {
            Some(true) => None,
            Some(false) => Some(0),
            None => Some(count.as_integer().unwrap_or(0)),
        };
        let v = it.count_loop(f, count, &body)?;
        it.ret(f, v)
    }

    Prefix "repeat" "'word [<skip> word!] count [<blank> integer!] body [block!]" [word, count, body] {
        let n = count.as_integer().unwrap_or(0);
        if word.nulled_p() {
            let v = it.count_loop(f, Some(n), &body)?;
            return it.ret(f, v);
        }
        let v = it.with_loop_vars(&word, &body, |it, lv| {
            it.for_core(f, lv, Cell::integer(1), Cell::integer(n), Cell::integer(1))
        })?;
        it.ret(f, v)
    }

    Prefix "for" "'word [word!] start [integer! decimal!] end [integer! decimal!] bump [integer! decimal!] body [block!]" [word, start, end, bump, body] {
        let v = it.with_loop_vars(&word, &body, |it, lv| it.for_core(f, lv, start, end, bump))?;
        it.ret(f, v)
    }

    Prefix "for-skip" "'word [word!] series [<blank> any-series!] skip [integer!] body [block!]" [word, series, skip, body] {
        let skip = skip.as_integer().unwrap_or(1);
        let series = series.fresh();
        let v = it.with_loop_vars(&word, &body, |it, lv| it.for_skip_core(f, lv, series, skip))?;
        it.ret(f, v)
    }

    Prefix "while" "condition [block!] body [block!]" [condition, body] {
        let v = it.while_core(f, &condition, &body, true)?;
        it.ret(f, v)
    }

    Prefix "while-not" "condition [block!] body [block!]" [condition, body] {
        let v = it.while_core(f, &condition, &body, false)?;
        it.ret(f, v)
    }

    Prefix "until" "body [block!]" [body] {
        let v = it.until_core(&body, true)?;
        it.ret(f, v)
    }

    Prefix "until-not" "body [block!]" [body] {
        let v = it.until_core(&body, false)?;
        it.ret(f, v)
    }

    Prefix "cycle" "body [block!]" [body] {
        let v = it.cycle_core(&body)?;
        it.ret(f, v)
    }

    Prefix "stop" "/with value [<opt> any-value!]" [with, value] {
        let label = it.builtins.stop;
        let value = if with.truthy_p() { value } else { Cell::void() };
        Err(it.throw_value(label, value))
    }

    Prefix "for-each" "'vars [word! block!] data [<blank> any-series! any-context!] body [block!]" [vars, data, body] {
        let v = it.each_core(f, EachMode::ForEach, &vars, &data.fresh(), &body)?;
        it.ret(f, v)
    }

    Prefix "map-each" "'vars [word! block!] data [<blank> any-series! any-context!] body [block!]" [vars, data, body] {
        let v = it.each_core(f, EachMode::MapEach, &vars, &data.fresh(), &body)?;
        it.ret(f, v)
    }

    Prefix "every" "'vars [word! block!] data [<blank> any-series! any-context!] body [block!]" [vars, data, body] {
        let v = it.each_core(f, EachMode::Every, &vars, &data.fresh(), &body)?;
        it.ret(f, v)
    }

    Prefix "remove-each" "'vars [word! block!] data [<blank> any-series!] body [block!]" [vars, data, body] {
        let v = it.each_core(f, EachMode::RemoveEach, &vars, &data.fresh(), &body)?;
        it.ret(f, v)
    }
}

#[cfg(test)]
mod loop_tests {
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
    fn counted_loops() {
        assert_eq!(run("loop 3 [x: 1 + 2] x"), Some(3));
        assert_eq!(run("n: 0 loop 4 [n: n + 1]"), Some(4));
        assert_eq!(molded("loop 0 [1]"), "_");
        assert_eq!(molded("loop false [1]"), "_");
        assert_eq!(run("n: 0 loop true [n: n + 1 if n = 5 [break]] n"), Some(5));
        assert_eq!(molded("loop 2 [null]"), "#[void]");
    }

    #[test]
    fn repeat_with_and_without_a_word() {
        assert_eq!(run("s: 0 repeat i 4 [s: s + i] s"), Some(10));
        assert_eq!(run("s: 0 repeat 3 [s: s + 1] s"), Some(3));
        assert_eq!(molded("repeat 3 [break]"), "~null~");
        assert_eq!(molded("repeat i 10 [if i = 2 [break] i]"), "~null~");
    }

    #[test]
    fn for_counts_and_reads_back() {
        assert_eq!(run("s: 0 for i 1 10 3 [s: s + i] s"), Some(22));
        assert_eq!(run("s: 0 for i 3 1 -1 [s: s * 10 + i] s"), Some(321));
        assert_eq!(run("n: 0 for i 1 10 1 [n: n + 1 i: i + 1] n"), Some(5));
        assert_eq!(molded("for i 1 2 0.5 [i]"), "2.0");
    }

    #[test]
    fn for_skip_walks_positions() {
        assert_eq!(run("s: 0 for-skip p [1 2 3 4 5] 2 [s: s + first p] s"), Some(9));
    }

    #[test]
    fn while_and_until() {
        assert_eq!(run("n: 0 while [n < 5] [n: n + 1] n"), Some(5));
        assert_eq!(molded("while [null] [1]"), "_");
        assert_eq!(molded("while [true] [break]"), "~null~");
        assert_eq!(run("n: 0 while-not [n = 3] [n: n + 1]"), Some(3));
        assert_eq!(run("n: 0 until [n: n + 1 n = 3] n"), Some(3));
        assert_eq!(run("n: 0 until [n: n + 1 if n < 3 [continue] true] n"), Some(3));
        assert_eq!(run("n: 0 until-not [n: n + 1 n < 4] n"), Some(4));
    }

    #[test]
    fn continue_supplies_body_results() {
        assert_eq!(run("for-each x [1 2 3] [if x = 3 [continue/with 99] x]"), Some(99));
        assert_eq!(molded("map-each x [1 2 3 4] [if odd? x [continue] x]"), "[2 4]");
    }

    #[test]
    fn cycle_stops() {
        assert_eq!(run("n: 0 cycle [n: n + 1 if n = 4 [stop/with n * 2]]"), Some(8));
        assert_eq!(molded("cycle [break]"), "~null~");
        assert_eq!(molded("cycle [stop]"), "#[void]");
    }

    #[test]
    fn each_loops() {
        assert_eq!(run("for-each x [1 2 3] [x * 10]"), Some(30));
        assert_eq!(run("s: 0 for-each [a b] [1 2 3 4] [s: s + (a * b)] s"), Some(14));
        assert_eq!(molded("map-each x [1 2 3] [x * x]"), "[1 4 9]");
        assert_eq!(molded("map-each x [1 2 3] [if x <> 2 [x]]"), "[1 3]");
        assert_eq!(molded("for-each x _ [x]"), "~null~");
        assert_eq!(molded("for-each x [] [x]"), "_");
        assert_eq!(molded("s: copy \"\" for-each c \"abc\" [append s c] s"), "\"abc\"");
        assert_eq!(
            molded("b: copy [] for-each [k v] make object! [a: 1 b: 2] [append b v] b"),
            "[1 2]"
        );
    }

    #[test]
    fn every_wants_all_truthy() {
        assert_eq!(run("every x [1 2 3] [x]"), Some(3));
        assert_eq!(molded("every x [1 2 3] [x <> 2]"), "#[false]");
        let mut it = Interp::new(InterpConfig::default());
        assert!(matches!(
            it.do_string("every x [1 2] [comment \"nothing\"]"),
            Err(Error::Script(ScriptError::NeedNonVoid(_)))
        ));
    }

    #[test]
    fn remove_each_applies_at_the_end() {
        let (mut it, v) = eval("remove-each x data: copy [1 2 3 4] [x > 2]");
        assert_eq!(v.and_then(|c| c.as_integer()), Some(2));
        let data = it.do_string("data").unwrap().unwrap();
        assert_eq!(it.mold(&data), "[1 2]");

        assert_eq!(molded("s: copy \"abcab\" remove-each c s [c = #\"a\"] s"), "\"bcb\"");

        // the series is held while the body runs
        let mut it = Interp::new(InterpConfig::default());
        assert!(matches!(
            it.do_string("d: copy [1 2] remove-each x d [append d 3 true]"),
            Err(Error::Script(ScriptError::SeriesHeld))
        ));
        let d = it.do_string("d").unwrap().unwrap();
        assert_eq!(it.mold(&d), "[1 2]");

        // removals made before a failure still happen
        let mut it = Interp::new(InterpConfig::default());
        assert!(it.do_string("d: copy [1 2 3] remove-each x d [if x = 3 [fail \"stop\"] x = 1]").is_err());
        let d = it.do_string("d").unwrap().unwrap();
        assert_eq!(it.mold(&d), "[2 3]");
    }

    #[test]
    fn break_from_repeat_is_null() {
        assert_eq!(molded("n: 5 repeat i n [if i = 2 [break]]"), "~null~");
    }
}

#[cfg(test)]
mod integer_for_tests {
    use crate::ren::error::{Error, ScriptError};
    use crate::ren::interp::{Interp, InterpConfig};

    fn run(code: &str) -> Result<Option<i64>, Error> {
        let mut it = Interp::new(InterpConfig::default());
        Ok(it.do_string(code)?.and_then(|c| c.as_integer()))
    }

    #[test]
    fn sums_and_reads_back_the_total() {
        assert_eq!(run("x: 0 for i 1 10 1 [x: x + i] x"), Ok(Some(55)));
    }

    #[test]
    fn stays_exact_past_double_precision() {
        assert_eq!(
            run("x: 0 for i 9007199254740993 9007199254740993 1 [x: i] x"),
            Ok(Some(9007199254740993))
        );
        assert_eq!(
            run("n: 0 for i 9007199254740992 9007199254740995 1 [n: n + 1] n"),
            Ok(Some(4))
        );
    }

    #[test]
    fn ends_at_the_integer_bounds() {
        assert_eq!(
            run("x: 0 for i 9223372036854775806 9223372036854775807 1 [x: i] x"),
            Ok(Some(i64::MAX))
        );
        assert_eq!(
            run("x: 0 for i -9223372036854775807 -9223372036854775808 -1 [x: i] x"),
            Ok(Some(i64::MIN))
        );
        assert_eq!(
            run("for i 9223372036854775806 9223372036854775807 2 [i]"),
            Err(Error::Script(ScriptError::Overflow))
        );
    }
}
