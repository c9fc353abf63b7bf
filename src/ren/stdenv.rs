// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/stdenv.rs

// Standard library natives: math, comparison, logic, output, series
// access, MAKE, variables and error trapping. The series verbs COPY,
// APPEND, INSERT, LENGTH-OF, PICK and FIND are generic and are
// answered by a dispatcher chosen from the type of their first
// argument.

// <>

use std::cmp::Ordering;

use super::action::{Action, Bounce};
use super::cell::{Cell, Payload};
use super::error::{Error, Escape, EvalResult, Fault, InternalError, ScriptError};
use super::interp::Interp;
use super::kind::Kind;
use super::node::SeriesId;
use super::path::PathStep;
use super::series::{Content, SeriesFlags};
use super::FrameId;

/// Operations shared by several types, each type answering its own way
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verb {
    Copy,
    Append,
    Insert,
    Length,
    Pick,
    Find,
}

impl Verb {
    fn name(self) -> &'static str {
        match self {
            Verb::Copy => "copy",
            Verb::Append => "append",
            Verb::Insert => "insert",
            Verb::Length => "length-of",
            Verb::Pick => "pick",
            Verb::Find => "find",
        }
    }
}

/// Implementation of the generic verbs for one family of types
type TypeDispatcher = fn(&mut Interp, FrameId, Verb) -> EvalResult<Bounce>;

fn type_dispatcher(kind: Kind) -> Option<TypeDispatcher> {
    match kind {
        k if k.any_array_p() => Some(array_verb),
        k if k.any_string_p() => Some(string_verb),
        Kind::Binary => Some(binary_verb),
        k if k.any_context_p() => Some(context_verb),
        _ => None,
    }
}

// argument positions of the generic verbs
const APPEND_VALUE: usize = 2;
const APPEND_PART: usize = 3;
const APPEND_LIMIT: usize = 4;
const APPEND_ONLY: usize = 5;
const APPEND_DUP: usize = 6;
const APPEND_COUNT: usize = 7;
const COPY_PART: usize = 2;
const COPY_LIMIT: usize = 3;
const COPY_DEEP: usize = 4;
const PICK_PICKER: usize = 2;
const FIND_VALUE: usize = 2;
const FIND_ONLY: usize = 3;
const FIND_CASE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Dec(f64),
}

impl Num {
    fn of(cell: &Cell) -> Option<Num> {
        match cell.payload {
            Payload::Integer(i) if cell.kind() == Kind::Integer => Some(Num::Int(i)),
            Payload::Decimal(d) if cell.kind() == Kind::Decimal => Some(Num::Dec(d)),
            _ => None,
        }
    }

    fn to_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Dec(d) => d,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MathOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

fn arithmetic(op: MathOp, a: &Cell, b: &Cell) -> EvalResult<Cell> {
    let (x, y) = match (Num::of(a), Num::of(b)) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            let bad = if Num::of(a).is_none() { a } else { b };
            return Err(ScriptError::TypeMismatch {
                expected: String::from("any-number!"),
                found: bad.kind().name().to_string(),
            }
            .into());
        }
    };

    if let (Num::Int(i), Num::Int(j)) = (x, y) {
        let r = match op {
            MathOp::Add => i.checked_add(j),
            MathOp::Subtract => i.checked_sub(j),
            MathOp::Multiply => i.checked_mul(j),
            MathOp::Divide => {
                if j == 0 {
                    return Err(ScriptError::ZeroDivide.into());
                }
                if i % j != 0 {
                    return Ok(Cell::decimal(i as f64 / j as f64));
                }
                i.checked_div(j)
            }
        };
        return r.map(Cell::integer).ok_or_else(|| ScriptError::Overflow.into());
    }

    let (i, j) = (x.to_f64(), y.to_f64());
    let r = match op {
        MathOp::Add => i + j,
        MathOp::Subtract => i - j,
        MathOp::Multiply => i * j,
        MathOp::Divide => {
            if j == 0.0 {
                return Err(ScriptError::ZeroDivide.into());
            }
            i / j
        }
    };
    if !r.is_finite() {
        return Err(ScriptError::Overflow.into());
    }
    Ok(Cell::decimal(r))
}

fn fold_case(s: &str, case: bool) -> Vec<char> {
    if case {
        s.chars().collect()
    } else {
        s.chars().flat_map(char::to_lowercase).collect()
    }
}

fn window_find<T: PartialEq>(hay: &[T], needle: &[T], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return if from <= hay.len() { Some(from) } else { None };
    }
    if from >= hay.len() {
        return None;
    }
    hay[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn int_arg(cell: &Cell) -> usize {
    cell.as_integer().map_or(0, |n| n.max(0) as usize)
}

impl Interp {
    /// Value equality; the lax form ignores case and compares numbers
    /// of different kinds by value
    pub(crate) fn equal_values(&self, a: &Cell, b: &Cell, strict: bool) -> bool {
        if a.quoted_p() || b.quoted_p() {
            if self.quote_depth(a) != self.quote_depth(b) {
                return false;
            }
            let (x, y) = (self.unquoted_base(*a), self.unquoted_base(*b));
            return self.equal_values(&x, &y, strict);
        }

        let (ka, kb) = (a.kind(), b.kind());
        if !strict && ka.any_number_p() && kb.any_number_p() {
            return match (Num::of(a), Num::of(b)) {
                (Some(Num::Int(i)), Some(Num::Int(j))) => i == j,
                (Some(x), Some(y)) => x.to_f64() == y.to_f64(),
                _ => false,
            };
        }
        if ka != kb && !(!strict && ka.any_word_p() && kb.any_word_p()) {
            return false;
        }

        match ka {
            Kind::Nulled | Kind::Void | Kind::Blank | Kind::End => true,
            Kind::Char => match (a.payload, b.payload) {
                (Payload::Char(x), Payload::Char(y)) if strict => x == y,
                (Payload::Char(x), Payload::Char(y)) => x.to_lowercase().eq(y.to_lowercase()),
                _ => false,
            },
            k if k.any_word_p() => match (a.as_word(), b.as_word()) {
                (Some(x), Some(y)) if strict => x == y,
                (Some(x), Some(y)) => self.symtab.same_p(x, y),
                _ => false,
            },
            k if k.any_string_p() => {
                let (x, y) = (self.series_text(a), self.series_text(b));
                fold_case(&x, strict) == fold_case(&y, strict)
            }
            Kind::Binary => match (a.as_series(), b.as_series()) {
                (Some((s, i)), Some((t, j))) => {
                    let (x, y) = (self.bytes(s), self.bytes(t));
                    x.get(i..).unwrap_or(&[]) == y.get(j..).unwrap_or(&[])
                }
                _ => false,
            },
            k if k.any_array_p() => match (a.as_series(), b.as_series()) {
                (Some((s, i)), Some((t, j))) => {
                    let x = self.arr_cells(s).get(i..).unwrap_or(&[]);
                    let y = self.arr_cells(t).get(j..).unwrap_or(&[]);
                    x.len() == y.len() && x.iter().zip(y).all(|(p, q)| self.equal_values(p, q, strict))
                }
                _ => false,
            },
            k if k.any_context_p() => a.as_context() == b.as_context(),
            Kind::Action => self.same_action_p(a, b),
            _ => a.payload == b.payload,
        }
    }

    /// Ordering of two numbers, texts or characters
    fn compare_values(&self, a: &Cell, b: &Cell) -> EvalResult<Ordering> {
        if let (Some(x), Some(y)) = (Num::of(a), Num::of(b)) {
            return Ok(match (x, y) {
                (Num::Int(i), Num::Int(j)) => i.cmp(&j),
                _ => x.to_f64().partial_cmp(&y.to_f64()).unwrap_or(Ordering::Equal),
            });
        }
        match (a.kind(), b.kind()) {
            (ka, kb) if ka.any_string_p() && kb.any_string_p() => {
                let (x, y) = (self.series_text(a), self.series_text(b));
                Ok(fold_case(&x, false).cmp(&fold_case(&y, false)))
            }
            (Kind::Char, Kind::Char) => match (a.payload, b.payload) {
                (Payload::Char(x), Payload::Char(y)) => Ok(x.cmp(&y)),
                _ => Ok(Ordering::Equal),
            },
            _ => Err(ScriptError::CannotUse(
                format!("comparison with {}", b.kind().name()),
                a.kind().name().to_string(),
            )
            .into()),
        }
    }

    /// Runs a generic verb through the dispatcher for its first argument
    fn generic(&mut self, f: FrameId, verb: Verb) -> EvalResult<Bounce> {
        let first = self.arg(f, 1);
        match type_dispatcher(first.kind()) {
            Some(dispatch) => dispatch(self, f, verb),
            None => Err(ScriptError::CannotUse(
                verb.name().to_string(),
                first.kind().name().to_string(),
            )
            .into()),
        }
    }

    /// Cells APPEND or INSERT adds to an array
    fn insertion_cells(&mut self, f: FrameId) -> EvalResult<Vec<Cell>> {
        let value = self.arg(f, APPEND_VALUE);
        let only = self.arg(f, APPEND_ONLY).truthy_p();
        let mut cells = match value.as_series() {
            Some((series, index)) if !only && value.kind() == Kind::Block => {
                let spec = self.derive_specifier(None, &value);
                let items: Vec<Cell> = self.arr_cells(series).iter().skip(index).copied().collect();
                items.into_iter().map(|c| self.derelativize(c, spec).fresh()).collect()
            }
            _ => vec![value.fresh()],
        };
        self.limit_and_repeat(f, &mut cells)?;
        Ok(cells)
    }

    /// Applies /PART, then /DUP; a repeat count too large to hold fails
    fn limit_and_repeat<T: Clone>(&self, f: FrameId, items: &mut Vec<T>) -> EvalResult<()> {
        if self.arg(f, APPEND_PART).truthy_p() {
            items.truncate(int_arg(&self.arg(f, APPEND_LIMIT)));
        }
        if self.arg(f, APPEND_DUP).truthy_p() {
            let n = int_arg(&self.arg(f, APPEND_COUNT));
            let total = items
                .len()
                .checked_mul(n)
                .ok_or_else(|| ScriptError::OutOfRange(format!("dup count {}", n)))?;
            let mut repeated = Vec::new();
            if repeated.try_reserve_exact(total).is_err() {
                log::warn!("cannot hold {} items for a dup", total);
                return Err(InternalError::NoMemory.into());
            }
            repeated.extend(items.iter().cloned().cycle().take(total));
            *items = repeated;
        }
        Ok(())
    }

    fn copy_limit(&self, f: FrameId) -> Option<usize> {
        if self.arg(f, COPY_PART).truthy_p() {
            Some(int_arg(&self.arg(f, COPY_LIMIT)))
        } else {
            None
        }
    }

    fn pick_value(&mut self, container: &Cell, picker: &Cell) -> EvalResult<Cell> {
        match self.pick_step(container, picker)? {
            PathStep::Out(v) => Ok(v),
            PathStep::Reference(series, index) => {
                let v = self.arr_at(series, index);
                if self.stub(series).flags.contains(SeriesFlags::VARLIST) {
                    return Ok(v);
                }
                let spec = self.derive_specifier(None, container);
                Ok(self.derelativize(v, spec).fresh())
            }
            PathStep::Unhandled => Err(ScriptError::BadPath(self.mold(container), self.mold(picker)).into()),
        }
    }

    /// Reads a word or path without running any action at its end
    fn get_target(&mut self, f: FrameId, target: &Cell) -> EvalResult<Cell> {
        if target.kind().any_word_p() {
            return self.get_var(target, None);
        }
        self.eval_path(f, target.rekind(Kind::GetPath), None)?;
        Ok(self.frames[f].out)
    }

    fn set_target(&mut self, f: FrameId, target: &Cell, value: Cell) -> EvalResult<()> {
        if target.kind().any_word_p() {
            return self.set_word_var(target, None, value);
        }
        let (series, index) = match target.as_series() {
            Some(s) => s,
            None => return Err(ScriptError::BadValue(self.mold(target)).into()),
        };
        let items: Vec<Cell> = self.arr_cells(series).iter().skip(index).copied().collect();
        if items.len() < 2 {
            return Err(ScriptError::BadValue(self.mold(target)).into());
        }
        let last = items.len() - 1;
        let spec = self.derive_specifier(None, target);
        let picker = self.derelativize(items[last], spec);

        let head = self.make_array_from(items[..last].to_vec(), true);
        self.guard_series(head);
        let mut getter = Cell::series(Kind::GetPath, head, 0);
        getter.extra = target.extra;
        let container = self.eval_path(f, getter, None).map(|_| self.frames[f].out);
        self.unguard_series(head);
        let container = container?;
        self.poke_step(&container, &picker, value)
    }

    fn make_object(&mut self, parent: Option<SeriesId>, def: &Cell) -> EvalResult<Cell> {
        let (series, index) = match def.as_series() {
            Some(s) => s,
            None => return Err(ScriptError::BadValue(self.mold(def)).into()),
        };
        let ctx = match parent {
            Some(p) => self.copy_context(p)?,
            None => self.make_context(Kind::Object, 8),
        };
        for sym in self.collect_set_words(series, index) {
            if self.find_in_context(ctx, sym).is_none() {
                self.append_to_context(ctx, sym, Cell::nulled())?;
            }
        }
        self.guard_series(ctx);

        let spec = self.derive_specifier(None, def);
        let body = self.copy_deep_specific(series, index, spec);
        self.guard_series(body);
        self.bind_deep(body, ctx, false);
        let result = self.do_array_at(body, 0, None);
        self.unguard_series(body);
        self.unguard_series(ctx);

        result?;
        Ok(Cell::context(Kind::Object, ctx, None))
    }

    fn make_value(&mut self, kind: Kind, def: &Cell) -> EvalResult<Cell> {
        match kind {
            Kind::Object => self.make_object(None, def),
            Kind::Frame => {
                let act = match Action::from_cell(def) {
                    Some(a) => a,
                    None => return Err(ScriptError::BadValue(self.mold(def)).into()),
                };
                let ex = self.make_exemplar(act);
                Ok(Cell::context(Kind::Frame, ex, Some(act.paramlist)))
            }
            k if k.any_array_p() => {
                let arr = match def.as_series() {
                    Some((s, i)) if def.kind().any_array_p() => self.copy_array_at(s, i, true),
                    _ => self.make_array(int_arg(def), true),
                };
                Ok(Cell::series(k, arr, 0))
            }
            k if k.any_string_p() => {
                let s = match def.kind() {
                    dk if dk.any_string_p() => self.series_text(def),
                    Kind::Integer => String::new(),
                    _ => self.form(def),
                };
                Ok(Cell::series(k, self.make_text(&s), 0))
            }
            Kind::Binary => {
                let bytes = match def.kind() {
                    dk if dk.any_string_p() => self.series_text(def).into_bytes(),
                    _ => Vec::new(),
                };
                Ok(Cell::series(Kind::Binary, self.make_binary(bytes), 0))
            }
            _ => Err(ScriptError::CannotUse(String::from("make"), kind.name().to_string()).into()),
        }
    }

    fn take_from(&mut self, series_cell: &Cell, last: bool) -> EvalResult<Cell> {
        let (series, index) = match series_cell.as_series() {
            Some(s) => s,
            None => return Ok(Cell::nulled()),
        };
        let len = self.arr_len(series);
        if index >= len {
            return Ok(Cell::nulled());
        }
        let at = if last { len - 1 } else { index };
        let mut cell = *series_cell;
        cell.set_index(at);
        let picked = self.pick_value(&cell, &Cell::integer(1))?;
        self.ensure_mutable(series)?;
        match &mut self.stub_mut(series).content {
            Content::Cells(v) => {
                v.remove(at);
            }
            Content::Text(t) => {
                if let Some((b, _)) = t.char_indices().nth(at) {
                    t.remove(b);
                }
            }
            Content::Bytes(v) => {
                v.remove(at);
            }
            _ => {}
        }
        Ok(picked)
    }

    fn clear_from(&mut self, series: SeriesId, index: usize) -> EvalResult<()> {
        self.ensure_mutable(series)?;
        match &mut self.stub_mut(series).content {
            Content::Cells(v) => v.truncate(index),
            Content::Bytes(v) => v.truncate(index),
            Content::Text(t) => {
                if let Some((b, _)) = t.char_indices().nth(index) {
                    t.truncate(b);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn logic_operands(&mut self, left: &Cell, right: &Cell, short: bool) -> EvalResult<bool> {
        if left.void_p() {
            return Err(ScriptError::VoidConditional.into());
        }
        if left.truthy_p() == short {
            return Ok(short);
        }
        let r = if right.kind() == Kind::Block {
            self.do_block(right, None)?
        } else {
            *right
        };
        if r.void_p() {
            return Err(ScriptError::VoidConditional.into());
        }
        Ok(r.truthy_p())
    }
}

fn array_verb(it: &mut Interp, f: FrameId, verb: Verb) -> EvalResult<Bounce> {
    let series_cell = it.arg(f, 1).fresh();
    let (series, index) = match series_cell.as_series() {
        Some(s) => s,
        None => return Err(ScriptError::BadValue(it.mold(&series_cell)).into()),
    };
    let len = it.arr_len(series);
    let index = index.min(len);

    match verb {
        Verb::Length => it.ret(f, Cell::integer((len - index) as i64)),
        Verb::Copy => {
            let copy = if it.arg(f, COPY_DEEP).truthy_p() {
                let spec = it.derive_specifier(None, &series_cell);
                it.copy_deep_specific(series, index, spec)
            } else {
                it.copy_array_at(series, index, true)
            };
            if let Some(limit) = it.copy_limit(f) {
                if let Content::Cells(v) = &mut it.stub_mut(copy).content {
                    v.truncate(limit);
                }
            }
            it.ret(f, Cell::series(series_cell.kind(), copy, 0))
        }
        Verb::Append | Verb::Insert => {
            if it.arg(f, APPEND_VALUE).nulled_p() {
                return it.ret(f, series_cell);
            }
            let cells = it.insertion_cells(f)?;
            let at = if verb == Verb::Append { len } else { index };
            it.arr_insert(series, at, &cells)?;
            let mut out = series_cell;
            out.set_index(if verb == Verb::Append { 0 } else { at + cells.len() });
            it.ret(f, out)
        }
        Verb::Pick => {
            let picker = it.arg(f, PICK_PICKER);
            let v = it.pick_value(&series_cell, &picker)?;
            it.ret(f, v)
        }
        Verb::Find => {
            let value = it.arg(f, FIND_VALUE);
            let strict = it.arg(f, FIND_CASE).truthy_p();
            let needle: Vec<Cell> = match value.as_series() {
                Some((s, i)) if value.kind() == Kind::Block && it.arg(f, FIND_ONLY).falsey_p() => {
                    it.arr_cells(s).iter().skip(i).copied().collect()
                }
                _ => vec![value],
            };
            let cells = it.arr_cells(series);
            let found = (index..=len.saturating_sub(needle.len())).find(|&at| {
                at + needle.len() <= cells.len()
                    && needle
                        .iter()
                        .zip(&cells[at..])
                        .all(|(n, c)| it.equal_values(c, n, strict))
            });
            match found {
                Some(at) => {
                    let mut out = series_cell;
                    out.set_index(at);
                    it.ret(f, out)
                }
                _ => it.ret(f, Cell::nulled()),
            }
        }
    }
}

fn string_verb(it: &mut Interp, f: FrameId, verb: Verb) -> EvalResult<Bounce> {
    let series_cell = it.arg(f, 1).fresh();
    let (series, index) = match series_cell.as_series() {
        Some(s) => s,
        None => return Err(ScriptError::BadValue(it.mold(&series_cell)).into()),
    };
    let len = it.arr_len(series);
    let index = index.min(len);

    match verb {
        Verb::Length => it.ret(f, Cell::integer((len - index) as i64)),
        Verb::Copy => {
            let mut chars: Vec<char> = it.text(series).chars().skip(index).collect();
            if let Some(limit) = it.copy_limit(f) {
                chars.truncate(limit);
            }
            let s: String = chars.into_iter().collect();
            let copy = it.make_text(&s);
            it.ret(f, Cell::series(series_cell.kind(), copy, 0))
        }
        Verb::Append | Verb::Insert => {
            let value = it.arg(f, APPEND_VALUE);
            if value.nulled_p() {
                return it.ret(f, series_cell);
            }
            let piece = match value.kind() {
                Kind::Char | Kind::Text | Kind::Tag => it.form(&value),
                Kind::Block if it.arg(f, APPEND_ONLY).falsey_p() => match value.as_series() {
                    Some((s, i)) => {
                        let items: Vec<Cell> = it.arr_cells(s).iter().skip(i).copied().collect();
                        items.iter().map(|c| it.form(c)).collect()
                    }
                    None => String::new(),
                },
                _ => it.form(&value),
            };
            let mut chars: Vec<char> = piece.chars().collect();
            it.limit_and_repeat(f, &mut chars)?;
            let piece: String = chars.iter().collect();
            let at = if verb == Verb::Append { len } else { index };
            it.text_insert(series, at, &piece)?;
            let mut out = series_cell;
            out.set_index(if verb == Verb::Append { 0 } else { at + chars.len() });
            it.ret(f, out)
        }
        Verb::Pick => {
            let picker = it.arg(f, PICK_PICKER);
            let v = it.pick_value(&series_cell, &picker)?;
            it.ret(f, v)
        }
        Verb::Find => {
            let value = it.arg(f, FIND_VALUE);
            let case = it.arg(f, FIND_CASE).truthy_p();
            let needle = match value.kind() {
                k if k.any_string_p() => it.series_text(&value),
                _ => it.form(&value),
            };
            let hay = fold_case(it.text(series), case);
            let needle = fold_case(&needle, case);
            match window_find(&hay, &needle, index) {
                Some(at) => {
                    let mut out = series_cell;
                    out.set_index(at);
                    it.ret(f, out)
                }
                None => it.ret(f, Cell::nulled()),
            }
        }
    }
}

fn binary_verb(it: &mut Interp, f: FrameId, verb: Verb) -> EvalResult<Bounce> {
    let series_cell = it.arg(f, 1).fresh();
    let (series, index) = match series_cell.as_series() {
        Some(s) => s,
        None => return Err(ScriptError::BadValue(it.mold(&series_cell)).into()),
    };
    let len = it.arr_len(series);
    let index = index.min(len);

    let bytes_of = |it: &Interp, value: &Cell| -> EvalResult<Vec<u8>> {
        match value.kind() {
            Kind::Integer => match value.as_integer() {
                Some(b) if (0..=255).contains(&b) => Ok(vec![b as u8]),
                _ => Err(ScriptError::OutOfRange(it.mold(value)).into()),
            },
            Kind::Binary => Ok(value
                .as_series()
                .map(|(s, i)| it.bytes(s).get(i..).unwrap_or(&[]).to_vec())
                .unwrap_or_default()),
            k if k.any_string_p() => Ok(it.series_text(value).into_bytes()),
            Kind::Char => Ok(it.form(value).into_bytes()),
            _ => Err(ScriptError::BadValue(it.mold(value)).into()),
        }
    };

    match verb {
        Verb::Length => it.ret(f, Cell::integer((len - index) as i64)),
        Verb::Copy => {
            let mut bytes = it.bytes(series)[index..].to_vec();
            if let Some(limit) = it.copy_limit(f) {
                bytes.truncate(limit);
            }
            let copy = it.make_binary(bytes);
            it.ret(f, Cell::series(Kind::Binary, copy, 0))
        }
        Verb::Append | Verb::Insert => {
            let value = it.arg(f, APPEND_VALUE);
            if value.nulled_p() {
                return it.ret(f, series_cell);
            }
            let mut bytes = bytes_of(it, &value)?;
            it.limit_and_repeat(f, &mut bytes)?;
            let at = if verb == Verb::Append { len } else { index };
            it.binary_insert(series, at, &bytes)?;
            let mut out = series_cell;
            out.set_index(if verb == Verb::Append { 0 } else { at + bytes.len() });
            it.ret(f, out)
        }
        Verb::Pick => {
            let picker = it.arg(f, PICK_PICKER);
            let v = it.pick_value(&series_cell, &picker)?;
            it.ret(f, v)
        }
        Verb::Find => {
            let value = it.arg(f, FIND_VALUE);
            let needle = bytes_of(it, &value)?;
            match window_find(it.bytes(series), &needle, index) {
                Some(at) => {
                    let mut out = series_cell;
                    out.set_index(at);
                    it.ret(f, out)
                }
                None => it.ret(f, Cell::nulled()),
            }
        }
    }
}

fn context_verb(it: &mut Interp, f: FrameId, verb: Verb) -> EvalResult<Bounce> {
    let ctx_cell = it.arg(f, 1).fresh();
    let varlist = match ctx_cell.as_context() {
        Some(v) => v,
        None => return Err(ScriptError::BadValue(it.mold(&ctx_cell)).into()),
    };

    match verb {
        Verb::Length => {
            let n = it.context_words(varlist)?.len();
            it.ret(f, Cell::integer(n as i64))
        }
        Verb::Copy => {
            let copy = it.copy_context(varlist)?;
            it.ret(f, Cell::context(ctx_cell.kind(), copy, None))
        }
        Verb::Pick => {
            let picker = it.arg(f, PICK_PICKER);
            let v = it.pick_value(&ctx_cell, &picker)?;
            it.ret(f, v)
        }
        Verb::Find => {
            let value = it.arg(f, FIND_VALUE);
            let found = value.as_word().and_then(|sym| it.find_in_context(varlist, sym));
            it.ret(f, if found.is_some() { Cell::logic(true) } else { Cell::nulled() })
        }
        Verb::Append => {
            // a block of set-word and value pairs adds or updates fields
            let value = it.arg(f, APPEND_VALUE);
            let (series, index) = match value.as_series() {
                Some(s) if value.kind() == Kind::Block => s,
                _ => return Err(ScriptError::BadValue(it.mold(&value)).into()),
            };
            let spec = it.derive_specifier(None, &value);
            let items: Vec<Cell> = it.arr_cells(series).iter().skip(index).copied().collect();
            for pair in items.chunks(2) {
                let sym = match (pair[0].kind(), pair[0].as_word()) {
                    (Kind::SetWord, Some(sym)) | (Kind::Word, Some(sym)) => sym,
                    _ => return Err(ScriptError::BadValue(it.mold(&pair[0])).into()),
                };
                let v = match pair.get(1) {
                    Some(c) => it.derelativize(*c, spec).fresh(),
                    None => Cell::nulled(),
                };
                match it.find_in_context(varlist, sym) {
                    Some(i) => it.set_var(varlist, i, v)?,
                    None => {
                        it.append_to_context(varlist, sym, v)?;
                    }
                }
            }
            it.ret(f, ctx_cell)
        }
        Verb::Insert => Err(ScriptError::CannotUse(verb.name().to_string(), ctx_cell.kind().name().to_string()).into()),
    }
}

ren_native! {
    const STD_NATIVES;
    it f;

    Prefix "add" "value1 [any-number!] value2 [any-number!]" [value1, value2] {
        let v = arithmetic(MathOp::Add, &value1, &value2)?;
        it.ret(f, v)
    }

    Prefix "subtract" "value1 [any-number!] value2 [any-number!]" [value1, value2] {
        let v = arithmetic(MathOp::Subtract, &value1, &value2)?;
        it.ret(f, v)
    }

    Prefix "multiply" "value1 [any-number!] value2 [any-number!]" [value1, value2] {
        let v = arithmetic(MathOp::Multiply, &value1, &value2)?;
        it.ret(f, v)
    }

    Prefix "divide" "value1 [any-number!] value2 [any-number!]" [value1, value2] {
        let v = arithmetic(MathOp::Divide, &value1, &value2)?;
        it.ret(f, v)
    }

    Enfix "+" "value1 [any-number!] value2 [<tight> any-number!]" [value1, value2] {
        let v = arithmetic(MathOp::Add, &value1, &value2)?;
        it.ret(f, v)
    }

    Enfix "-" "value1 [any-number!] value2 [<tight> any-number!]" [value1, value2] {
        let v = arithmetic(MathOp::Subtract, &value1, &value2)?;
        it.ret(f, v)
    }

    Enfix "*" "value1 [any-number!] value2 [<tight> any-number!]" [value1, value2] {
        let v = arithmetic(MathOp::Multiply, &value1, &value2)?;
        it.ret(f, v)
    }

    Enfix "/" "value1 [any-number!] value2 [<tight> any-number!]" [value1, value2] {
        let v = arithmetic(MathOp::Divide, &value1, &value2)?;
        it.ret(f, v)
    }

    Prefix "odd?" "number [integer!]" [number] {
        let n = number.as_integer().unwrap_or(0);
        it.ret(f, Cell::logic(n % 2 != 0))
    }

    Prefix "even?" "number [integer!]" [number] {
        let n = number.as_integer().unwrap_or(0);
        it.ret(f, Cell::logic(n % 2 == 0))
    }

    Prefix "zero?" "number [any-number!]" [number] {
        let zero = Num::of(&number).map_or(false, |n| n.to_f64() == 0.0);
        it.ret(f, Cell::logic(zero))
    }

    Prefix "equal?" "value1 [<opt> any-value!] value2 [<opt> any-value!]" [value1, value2] {
        let eq = it.equal_values(&value1, &value2, false);
        it.ret(f, Cell::logic(eq))
    }

    Prefix "not-equal?" "value1 [<opt> any-value!] value2 [<opt> any-value!]" [value1, value2] {
        let eq = it.equal_values(&value1, &value2, false);
        it.ret(f, Cell::logic(!eq))
    }

    Prefix "strict-equal?" "value1 [<opt> any-value!] value2 [<opt> any-value!]" [value1, value2] {
        let eq = it.equal_values(&value1, &value2, true);
        it.ret(f, Cell::logic(eq))
    }

    Prefix "lesser?" "value1 [any-value!] value2 [any-value!]" [value1, value2] {
        let o = it.compare_values(&value1, &value2)?;
        it.ret(f, Cell::logic(o == Ordering::Less))
    }

    Prefix "greater?" "value1 [any-value!] value2 [any-value!]" [value1, value2] {
        let o = it.compare_values(&value1, &value2)?;
        it.ret(f, Cell::logic(o == Ordering::Greater))
    }

    Prefix "lesser-or-equal?" "value1 [any-value!] value2 [any-value!]" [value1, value2] {
        let o = it.compare_values(&value1, &value2)?;
        it.ret(f, Cell::logic(o != Ordering::Greater))
    }

    Prefix "greater-or-equal?" "value1 [any-value!] value2 [any-value!]" [value1, value2] {
        let o = it.compare_values(&value1, &value2)?;
        it.ret(f, Cell::logic(o != Ordering::Less))
    }

    Enfix "=" "value1 [<opt> any-value!] value2 [<tight> <opt> any-value!]" [value1, value2] {
        let eq = it.equal_values(&value1, &value2, false);
        it.ret(f, Cell::logic(eq))
    }

    Enfix "<>" "value1 [<opt> any-value!] value2 [<tight> <opt> any-value!]" [value1, value2] {
        let eq = it.equal_values(&value1, &value2, false);
        it.ret(f, Cell::logic(!eq))
    }

    Enfix "==" "value1 [<opt> any-value!] value2 [<tight> <opt> any-value!]" [value1, value2] {
        let eq = it.equal_values(&value1, &value2, true);
        it.ret(f, Cell::logic(eq))
    }

    Enfix "<" "value1 [any-value!] value2 [<tight> any-value!]" [value1, value2] {
        let o = it.compare_values(&value1, &value2)?;
        it.ret(f, Cell::logic(o == Ordering::Less))
    }

    Enfix ">" "value1 [any-value!] value2 [<tight> any-value!]" [value1, value2] {
        let o = it.compare_values(&value1, &value2)?;
        it.ret(f, Cell::logic(o == Ordering::Greater))
    }

    Enfix "<=" "value1 [any-value!] value2 [<tight> any-value!]" [value1, value2] {
        let o = it.compare_values(&value1, &value2)?;
        it.ret(f, Cell::logic(o != Ordering::Greater))
    }

    Enfix ">=" "value1 [any-value!] value2 [<tight> any-value!]" [value1, value2] {
        let o = it.compare_values(&value1, &value2)?;
        it.ret(f, Cell::logic(o != Ordering::Less))
    }

    Prefix "not" "value [<opt> any-value!]" [value] {
        if value.void_p() {
            return Err(ScriptError::VoidConditional.into());
        }
        it.ret(f, Cell::logic(value.falsey_p()))
    }

    Enfix "and" "left [<opt> any-value!] right [<opt> any-value!]" [left, right] {
        let b = it.logic_operands(&left, &right, false)?;
        it.ret(f, Cell::logic(b))
    }

    Enfix "or" "left [<opt> any-value!] right [<opt> any-value!]" [left, right] {
        let b = it.logic_operands(&left, &right, true)?;
        it.ret(f, Cell::logic(b))
    }

    Prefix "print" "line [<opt> any-value!]" [line] {
        let text = match line.kind() {
            Kind::Nulled => return it.ret(f, Cell::nulled()),
            Kind::Block => {
                let values = it.reduce_to_vec(&line)?;
                let parts: Vec<String> = values
                    .iter()
                    .filter(|v| !v.void_p() && !v.blank_p())
                    .map(|v| it.form(v))
                    .collect();
                parts.join(" ")
            }
            _ => it.form(&line),
        };
        it.emit_line(&text);
        it.ret(f, Cell::void())
    }

    Prefix "probe" "value [<opt> any-value!]" [value] {
        let text = it.mold(&value);
        it.emit_line(&text);
        it.ret(f, value)
    }

    Prefix "mold" "value [<opt> any-value!]" [value] {
        let text = it.mold(&value);
        let s = it.make_text(&text);
        it.ret(f, Cell::series(Kind::Text, s, 0))
    }

    Prefix "form" "value [<opt> any-value!]" [value] {
        let text = it.form(&value);
        let s = it.make_text(&text);
        it.ret(f, Cell::series(Kind::Text, s, 0))
    }

    Prefix "type-of" "value [<opt> any-value!]" [value] {
        if value.nulled_p() {
            return it.ret(f, Cell::nulled());
        }
        it.ret(f, Cell::datatype(value.kind()))
    }

    Prefix "quote" "value [any-value!] /depth count [integer!]" [value, depth, count] {
        let levels = if depth.truthy_p() { int_arg(&count) as u32 } else { 1 };
        let v = it.quotify(value.fresh(), levels);
        it.ret(f, v)
    }

    Prefix "the" "'value [any-value!]" [value] {
        // the literal value ends the expression; nothing enfix may take it
        it.frames[f].out = value.fresh();
        Ok(Bounce::Immediate)
    }

    Prefix "unquote" "value [any-value!] /depth count [integer!]" [value, depth, count] {
        let levels = if depth.truthy_p() { int_arg(&count) as u32 } else { 1 };
        if it.quote_depth(&value) < levels {
            return Err(ScriptError::OutOfRange(it.mold(&value)).into());
        }
        let v = it.unquotify(value.fresh(), levels);
        it.ret(f, v)
    }

    Prefix "copy" "value [any-series! any-context!] /part limit [integer!] /deep" [value, part, limit, deep] {
        it.generic(f, Verb::Copy)
    }

    Prefix "append" "series [any-series! any-context!] value [<opt> any-value!] /part limit [integer!] /only /dup count [integer!]" [series, value, part, limit, only, dup, count] {
        it.generic(f, Verb::Append)
    }

    Prefix "insert" "series [any-series! any-context!] value [<opt> any-value!] /part limit [integer!] /only /dup count [integer!]" [series, value, part, limit, only, dup, count] {
        it.generic(f, Verb::Insert)
    }

    Prefix "length-of" "series [<blank> any-series! any-context!]" [series] {
        it.generic(f, Verb::Length)
    }

    Prefix "pick" "location [any-series! any-context!] picker [integer! word!]" [location, picker] {
        it.generic(f, Verb::Pick)
    }

    Prefix "find" "series [<blank> any-series! any-context!] value [<opt> any-value!] /only /case" [series, value, only, case] {
        if value.nulled_p() {
            return it.ret(f, Cell::nulled());
        }
        it.generic(f, Verb::Find)
    }

    Prefix "select" "series [<blank> any-array! any-context!] value [any-value!]" [series, value] {
        if let Some(ctx) = series.as_context() {
            let v = value
                .as_word()
                .and_then(|sym| it.find_in_context(ctx, sym))
                .map_or_else(Cell::nulled, |i| it.var(ctx, i));
            return it.ret(f, v);
        }
        let (s, index) = match series.as_series() {
            Some(s) => s,
            None => return it.ret(f, Cell::nulled()),
        };
        let spec = it.derive_specifier(None, &series);
        let cells = it.arr_cells(s);
        let hit = (index..cells.len()).find(|&k| it.equal_values(&cells[k], &value, false));
        let next = hit.and_then(|k| cells.get(k + 1)).copied();
        let v = match next {
            Some(c) => it.derelativize(c, spec).fresh(),
            None => Cell::nulled(),
        };
        it.ret(f, v)
    }

    Prefix "first" "series [<blank> any-series!]" [series] {
        let v = it.pick_value(&series, &Cell::integer(1))?;
        it.ret(f, v)
    }

    Prefix "last" "series [<blank> any-series!]" [series] {
        let (s, index) = series.as_series().unwrap_or((it.empty_array, 0));
        let len = it.arr_len(s);
        if index >= len {
            return it.ret(f, Cell::nulled());
        }
        let v = it.pick_value(&series, &Cell::integer((len - index) as i64))?;
        it.ret(f, v)
    }

    Prefix "head" "series [any-series!]" [series] {
        let mut out = series.fresh();
        out.set_index(0);
        it.ret(f, out)
    }

    Prefix "tail" "series [any-series!]" [series] {
        let mut out = series.fresh();
        let len = series.as_series().map_or(0, |(s, _)| it.arr_len(s));
        out.set_index(len);
        it.ret(f, out)
    }

    Prefix "next" "series [any-series!]" [series] {
        let mut out = series.fresh();
        let len = series.as_series().map_or(0, |(s, _)| it.arr_len(s));
        out.set_index((series.index() + 1).min(len));
        it.ret(f, out)
    }

    Prefix "back" "series [any-series!]" [series] {
        let mut out = series.fresh();
        out.set_index(series.index().saturating_sub(1));
        it.ret(f, out)
    }

    Prefix "take" "series [<blank> any-series!] /last" [series, last] {
        let v = it.take_from(&series, last.truthy_p())?;
        it.ret(f, v)
    }

    Prefix "clear" "series [any-series!]" [series] {
        if let Some((s, index)) = series.as_series() {
            it.clear_from(s, index)?;
        }
        it.ret(f, series)
    }

    Prefix "empty?" "series [blank! any-series! any-context!]" [series] {
        let empty = match series.kind() {
            Kind::Blank => true,
            k if k.any_context_p() => match series.as_context() {
                Some(c) => it.context_words(c)?.is_empty(),
                None => true,
            },
            _ => series.as_series().map_or(true, |(s, i)| i >= it.arr_len(s)),
        };
        it.ret(f, Cell::logic(empty))
    }

    Prefix "reduce" "value [<opt> any-value!]" [value] {
        if value.kind() != Kind::Block {
            return it.ret(f, value);
        }
        let values = it.reduce_to_vec(&value)?;
        let arr = it.make_array_from(values, true);
        it.ret(f, Cell::series(Kind::Block, arr, 0))
    }

    Prefix "make" "type [datatype! any-context!] def [<opt> any-value!]" [type_, def] {
        let v = match type_.kind() {
            Kind::Datatype => {
                let kind = type_.as_datatype().unwrap_or(Kind::Blank);
                it.make_value(kind, &def)?
            }
            Kind::Object => it.make_object(type_.as_context(), &def)?,
            k => return Err(ScriptError::CannotUse(String::from("make"), k.name().to_string()).into()),
        };
        it.ret(f, v)
    }

    Prefix "get" "source [any-word! any-path!] /any" [source, any] {
        let v = it.get_target(f, &source)?;
        if v.void_p() && any.falsey_p() {
            return Err(ScriptError::NoValue(it.mold(&source)).into());
        }
        it.ret(f, v)
    }

    Prefix "set" "target [any-word! any-path!] value [<opt> any-value!]" [target, value] {
        let value = value.fresh();
        it.frames[f].spare = value;
        it.set_target(f, &target, value)?;
        it.ret(f, value)
    }

    Prefix "recycle" "" [] {
        let freed = it.recycle();
        it.ret(f, Cell::integer((freed.series + freed.pairs) as i64))
    }

    Prefix "null" "" [] {
        it.ret(f, Cell::nulled())
    }

    Prefix "null?" "value [<opt> any-value!]" [value] {
        it.ret(f, Cell::logic(value.nulled_p()))
    }

    Prefix "void?" "value [<opt> any-value!]" [value] {
        it.ret(f, Cell::logic(value.void_p()))
    }

    Prefix "blank?" "value [<opt> any-value!]" [value] {
        it.ret(f, Cell::logic(value.blank_p()))
    }

    Prefix "value?" "value [<opt> any-value!]" [value] {
        it.ret(f, Cell::logic(!value.nulled_p()))
    }

    Prefix "set?" "var [any-word!]" [var] {
        let set = match it.try_get_var(&var, None) {
            Some(v) => !v.nulled_p() && !v.void_p(),
            None => false,
        };
        it.ret(f, Cell::logic(set))
    }

    Prefix "fail" "reason [text! error! block!]" [reason] {
        let fault = match reason.kind() {
            Kind::Error => it.value_to_fault(&reason),
            Kind::Block => {
                let values = it.reduce_to_vec(&reason)?;
                let parts: Vec<String> = values.iter().map(|v| it.form(v)).collect();
                Fault { error: Error::User(parts.join(" ")), context: None }
            }
            _ => Fault { error: Error::User(it.form(&reason)), context: None },
        };
        Err(Escape::Fail(fault))
    }

    Prefix "trap" "code [block! action!]" [code] {
        match it.run_branch(&code, &Cell::nulled()) {
            Ok(_) => it.ret(f, Cell::nulled()),
            Err(Escape::Fail(fault)) => {
                let v = it.fault_to_value(fault);
                it.ret(f, v)
            }
            Err(e) => Err(e),
        }
    }

    Prefix "try" "value [<opt> any-value!]" [value] {
        if value.nulled_p() {
            return it.ret(f, Cell::blank());
        }
        it.ret(f, value)
    }
}

#[cfg(test)]
mod stdenv_tests {
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

    fn fails(code: &str) -> Error {
        let mut it = Interp::new(InterpConfig::default());
        match it.do_string(code) {
            Err(e) => e,
            Ok(v) => panic!("expected failure from {}, got {:?}", code, v),
        }
    }

    #[test]
    fn arithmetic() {
        assert_eq!(run("1 + 2 * 3"), Some(9));
        assert_eq!(run("add 1 multiply 2 3"), Some(7));
        assert_eq!(run("10 / 2"), Some(5));
        assert_eq!(molded("7 / 2"), "3.5");
        assert_eq!(molded("1 + 0.5"), "1.5");
        assert_eq!(fails("1 / 0"), Error::Script(ScriptError::ZeroDivide));
        assert_eq!(fails("9223372036854775807 + 1"), Error::Script(ScriptError::Overflow));
    }

    #[test]
    fn comparisons() {
        assert_eq!(molded("1 = 1.0"), "#[true]");
        assert_eq!(molded("1 == 1.0"), "#[false]");
        assert_eq!(molded("\"abc\" = \"ABC\""), "#[true]");
        assert_eq!(molded("\"abc\" == \"ABC\""), "#[false]");
        assert_eq!(molded("[1 [a]] = [1 [A]]"), "#[true]");
        assert_eq!(molded("2 < 3"), "#[true]");
        assert_eq!(molded("\"b\" > \"a\""), "#[true]");
        assert_eq!(molded("3 <= 3"), "#[true]");
        assert_eq!(molded("'a = 'a"), "#[true]");
        assert_eq!(molded("null = null"), "#[true]");
    }

    #[test]
    fn logic() {
        assert_eq!(molded("not false"), "#[true]");
        assert_eq!(molded("true and false"), "#[false]");
        assert_eq!(molded("false or 1"), "#[true]");
        assert_eq!(molded("x: 0 false and [x: 1] x"), "0");
        assert_eq!(fails("not #[void]"), Error::Script(ScriptError::VoidConditional));
    }

    #[test]
    fn generic_series_verbs() {
        assert_eq!(molded("append [1 2] 3"), "[1 2 3]");
        assert_eq!(molded("append [1] [2 3]"), "[1 2 3]");
        assert_eq!(molded("append/only [1] [2 3]"), "[1 [2 3]]");
        assert_eq!(molded("append/dup [] 0 3"), "[0 0 0]");
        assert_eq!(molded("head insert next [1 3] 2"), "[1 2 3]");
        assert_eq!(molded("append \"ab\" #\"c\""), "\"abc\"");
        assert_eq!(molded("append #{01} 2"), "#{0102}");
        assert_eq!(run("length-of next [a b c]"), Some(2));
        assert_eq!(run("length-of \"abc\""), Some(3));
        assert_eq!(molded("length-of _"), "~null~");
        assert_eq!(run("pick [10 20] 2"), Some(20));
        assert_eq!(molded("find [a b c] 'b"), "[b c]");
        assert_eq!(molded("find [a b c d] [c d]"), "[c d]");
        assert_eq!(molded("find \"Hello\" \"ll\""), "\"llo\"");
        assert_eq!(molded("find/case \"Hello\" \"h\""), "~null~");
        assert_eq!(molded("copy/part [1 2 3] 2"), "[1 2]");
    }

    #[test]
    fn copies_are_independent() {
        assert_eq!(run("a: [1 [2]] b: copy/deep a append b/2 3 length-of a/2"), Some(1));
        assert_eq!(run("a: [1] b: copy a append b 2 length-of a"), Some(1));
    }

    #[test]
    fn context_verbs() {
        assert_eq!(run("o: make object! [a: 1] append o [b: 2] o/b"), Some(2));
        assert_eq!(run("length-of make object! [a: 1 b: 2]"), Some(2));
        assert_eq!(run("o: make object! [a: 1] p: copy o p/a: 5 o/a"), Some(1));
        assert_eq!(molded("find make object! [a: 1] 'a"), "#[true]");
        assert!(matches!(
            fails("insert make object! [] [a: 1]"),
            Error::Script(ScriptError::CannotUse(..))
        ));
    }

    #[test]
    fn series_navigation() {
        assert_eq!(run("first [1 2]"), Some(1));
        assert_eq!(run("last [1 2]"), Some(2));
        assert_eq!(molded("tail [1 2]"), "[]");
        assert_eq!(molded("back tail [1 2]"), "[2]");
        assert_eq!(run("s: [1 2 3] take s"), Some(1));
        assert_eq!(molded("s: [1 2 3] take/last s s"), "[1 2]");
        assert_eq!(molded("s: [1 2 3] clear next s s"), "[1]");
        assert_eq!(molded("empty? []"), "#[true]");
        assert_eq!(run("select [a 1 b 2] 'b"), Some(2));
    }

    #[test]
    fn making_objects() {
        assert_eq!(run("o: make object! [a: 1 b: a + 1] o/b"), Some(2));
        assert_eq!(run("p: make object! [a: 1] c: make p [b: 2] c/a + c/b"), Some(3));
        assert_eq!(run("p: make object! [a: 1] c: make p [a: 5] p/a"), Some(1));
        assert_eq!(molded("make block! 4"), "[]");
    }

    #[test]
    fn frames_from_actions() {
        assert_eq!(run("f: make frame! :add f/value1: 1 f/value2: 2 do f"), Some(3));
    }

    #[test]
    fn variables() {
        assert_eq!(run("x: 5 get 'x"), Some(5));
        assert_eq!(run("set 'x 6 x"), Some(6));
        assert_eq!(run("o: make object! [a: 1] set 'o/a 9 get 'o/a"), Some(9));
        assert_eq!(molded("x: null set? 'x"), "#[false]");
        assert_eq!(molded("null? null"), "#[true]");
        assert_eq!(molded("try null"), "_");
        assert_eq!(molded("type-of 1"), "integer!");
        assert_eq!(molded("quote/depth 1 2"), "''1");
        assert_eq!(molded("unquote first ['a]"), "a");
    }

    #[test]
    fn the_ends_its_expression() {
        assert_eq!(molded("the foo"), "foo");
        assert_eq!(molded("the [a b]"), "[a b]");
        let mut it = Interp::new(InterpConfig::default());
        let r = it.do_string("the 1 + 2");
        assert!(!matches!(r, Ok(Some(c)) if c.as_integer() == Some(3)));
    }

    #[test]
    fn traps_and_failures() {
        assert_eq!(fails("fail \"boom\""), Error::User(String::from("boom")));
        assert_eq!(molded("trap [1 + 1]"), "~null~");
        let (it, v) = eval("trap [fail \"bad\"]");
        let e = v.unwrap();
        assert_eq!(it.form(&e), "** User Error: bad");
        assert_eq!(run("e: trap [1 / 0] catch [trap [fail e] 3]"), Some(3));
        assert_eq!(fails("e: trap [1 / 0] fail e"), Error::Script(ScriptError::ZeroDivide));
    }

    #[test]
    fn print_forms_blocks() {
        let mut it = Interp::new(InterpConfig::default());
        it.capture_output();
        it.do_string("x: 2 print [\"a\" x + 1 _] probe [b]").unwrap();
        assert_eq!(it.take_output(), "a 3\n[b]\n");
    }

    #[test]
    fn recycle_reports_frees() {
        let (_, v) = eval("loop 10 [copy [1 2 3]] recycle");
        assert!(v.and_then(|c| c.as_integer()).unwrap_or(-1) >= 0);
    }
}

#[cfg(test)]
mod dup_tests {
    use crate::ren::error::{Error, InternalError, ScriptError};
    use crate::ren::interp::{Interp, InterpConfig};

    #[test]
    fn huge_dup_counts_fail_instead_of_overflowing() {
        let mut it = Interp::new(InterpConfig::default());
        assert!(matches!(
            it.do_string("append/dup [] [a b c] 9223372036854775807"),
            Err(Error::Script(ScriptError::OutOfRange(_)))
        ));
        assert_eq!(
            it.do_string("append/dup [] [a b] 9223372036854775807"),
            Err(Error::Internal(InternalError::NoMemory))
        );
        assert!(it.do_string("append/dup \"\" \"ab\" 9223372036854775807").is_err());
        let r = it.do_string("append/dup [x] [a b] 2").unwrap().unwrap();
        assert_eq!(it.mold(&r), "[x a b a b]");
    }
}
