// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/path.rs

// Paths. Each step hands the value so far and the next picker to the
// value's type, which answers with a value, a reference to the slot
// holding it, or that it cannot handle the picker. Once a step lands
// on an action, the rest of the path names its refinements.

// <>

use super::cell::Cell;
use super::context::Specifier;
use super::error::{EvalResult, ScriptError};
use super::eval::Ran;
use super::frame::EvalFlags;
use super::interp::Interp;
use super::kind::Kind;
use super::node::SeriesId;
use super::series::SeriesFlags;
use super::symtab::Sym;
use super::FrameId;

/// Answer of a type to one path step
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum PathStep {
    /// The picked value, with no slot behind it
    Out(Cell),
    /// Slot of a context or array holding the picked value
    Reference(SeriesId, usize),
    Unhandled,
}

impl Interp {
    /// Evaluates a path, set-path or get-path at the frame's position
    pub(crate) fn eval_path(&mut self, f: FrameId, path: Cell, specifier: Specifier) -> EvalResult<Ran> {
        let (series, index) = match path.as_series() {
            Some(s) => s,
            None => return Err(ScriptError::BadValue(self.mold(&path)).into()),
        };
        let spec = self.derive_specifier(specifier, &path);
        let items: Vec<Cell> = self.arr_cells(series).iter().skip(index).copied().collect();
        let kind = path.kind();
        if items.is_empty() {
            return Err(ScriptError::BadValue(self.mold(&path)).into());
        }

        // the new value is evaluated before any groups in the path
        let rhs = if kind == Kind::SetPath {
            let feed = self.frames[f].feed;
            if self.feed_at_end(feed) {
                return Err(ScriptError::NeedNonEnd(self.mold(&path)).into());
            }
            let v = self.eval_child(f, EvalFlags::empty())?;
            Some(if v.end_p() { Cell::void() } else { v.fresh() })
        } else {
            None
        };
        if let Some(v) = rhs {
            self.guard_cell(v);
        }
        let result = self.walk_path(f, &path, &items, spec, rhs);
        if rhs.is_some() {
            self.unguard_cell();
        }
        result
    }

    fn walk_path(
        &mut self,
        f: FrameId,
        path: &Cell,
        items: &[Cell],
        spec: Specifier,
        rhs: Option<Cell>,
    ) -> EvalResult<Ran> {
        let kind = path.kind();
        let head = items[0];
        let mut label: Option<Sym> = head.as_word();
        let mut value = match head.kind() {
            Kind::Word => {
                let v = self.get_var(&head, spec)?;
                self.escape_value(&v);
                v
            }
            Kind::Group => self.do_block(&head, spec)?,
            _ => self.derelativize(head, spec),
        };

        let last = items.len() - 1;
        let mut i = 1;
        while i <= last {
            if value.action_p() {
                break;
            }
            let picker = self.path_picker(&items[i], spec)?;

            if let (Some(new), true) = (rhs, i == last) {
                self.poke_step(&value, &picker, new)?;
                self.frames[f].out = new;
                return Ok(Ran::Value);
            }

            value = match self.pick_step(&value, &picker)? {
                PathStep::Out(v) => v,
                PathStep::Reference(series, index) => self.arr_at(series, index),
                PathStep::Unhandled => {
                    return Err(ScriptError::BadPath(self.mold(&value), self.mold(&picker)).into())
                }
            };
            if let Some(sym) = picker.as_word() {
                label = Some(sym);
            }
            i += 1;
        }

        if value.action_p() {
            let mut refines = Vec::new();
            for item in &items[i..] {
                let picker = self.path_picker(item, spec)?;
                match picker.as_word() {
                    Some(sym) if picker.mirror().any_word_p() => refines.push(sym),
                    _ if picker.nulled_p() || picker.blank_p() => {}
                    _ => return Err(ScriptError::BadPath(self.mold(&value), self.mold(&picker)).into()),
                }
            }
            return match kind {
                Kind::SetPath => Err(ScriptError::BadPath(self.mold(path), String::from("action")).into()),
                Kind::GetPath => {
                    let out = if refines.is_empty() {
                        value
                    } else {
                        self.specialize_refinements(&value, &refines)?
                    };
                    self.frames[f].out = out.fresh();
                    Ok(Ran::Value)
                }
                _ => self.run_action(f, value.fresh(), label, None, refines),
            };
        }

        if kind == Kind::SetPath {
            // a set-path ending before its last item never reaches a slot
            return Err(ScriptError::BadPath(self.mold(path), self.mold(&items[last])).into());
        }
        self.frames[f].out = value.fresh();
        Ok(Ran::Value)
    }

    /// Picker value for a path item; groups and get-words are evaluated
    fn path_picker(&mut self, item: &Cell, spec: Specifier) -> EvalResult<Cell> {
        match item.kind() {
            Kind::Group => self.do_block(item, spec),
            Kind::GetWord => self.get_var(item, spec),
            _ => Ok(self.derelativize(*item, spec)),
        }
    }

    /// One step of picking, answered by the type of the container
    pub(crate) fn pick_step(&mut self, container: &Cell, picker: &Cell) -> EvalResult<PathStep> {
        match container.kind() {
            Kind::Object | Kind::Frame | Kind::Error | Kind::Port => {
                let varlist = match container.as_context() {
                    Some(v) => v,
                    None => return Ok(PathStep::Unhandled),
                };
                match picker.as_word() {
                    Some(sym) => match self.find_in_context(varlist, sym) {
                        Some(i) => Ok(PathStep::Reference(varlist, i)),
                        None => Ok(PathStep::Unhandled),
                    },
                    None => Ok(PathStep::Unhandled),
                }
            }
            k if k.any_array_p() => {
                let (series, index) = match container.as_series() {
                    Some(s) => s,
                    None => return Ok(PathStep::Unhandled),
                };
                if let Some(n) = picker.as_integer() {
                    let at = index as i64 + n - 1;
                    if n < 1 || at as usize >= self.arr_len(series) {
                        return Ok(PathStep::Out(Cell::nulled()));
                    }
                    return Ok(PathStep::Reference(series, at as usize));
                }
                if let Some(sym) = picker.as_word() {
                    // select-like: the value after a matching word
                    let cells = self.arr_cells(series);
                    for k in index..cells.len() {
                        if let Some(s) = cells[k].as_word() {
                            if self.symtab.same_p(s, sym) {
                                return Ok(match cells.get(k + 1) {
                                    Some(_) => PathStep::Reference(series, k + 1),
                                    None => PathStep::Out(Cell::nulled()),
                                });
                            }
                        }
                    }
                    return Ok(PathStep::Out(Cell::nulled()));
                }
                Ok(PathStep::Unhandled)
            }
            Kind::Text | Kind::Tag => {
                let (series, index) = match container.as_series() {
                    Some(s) => s,
                    None => return Ok(PathStep::Unhandled),
                };
                match picker.as_integer() {
                    Some(n) if n >= 1 => Ok(PathStep::Out(
                        self.text(series)
                            .chars()
                            .nth(index + n as usize - 1)
                            .map(Cell::char)
                            .unwrap_or_else(Cell::nulled),
                    )),
                    Some(_) => Ok(PathStep::Out(Cell::nulled())),
                    None => Ok(PathStep::Unhandled),
                }
            }
            Kind::Binary => {
                let (series, index) = match container.as_series() {
                    Some(s) => s,
                    None => return Ok(PathStep::Unhandled),
                };
                match picker.as_integer() {
                    Some(n) if n >= 1 => Ok(PathStep::Out(
                        self.bytes(series)
                            .get(index + n as usize - 1)
                            .map(|b| Cell::integer(*b as i64))
                            .unwrap_or_else(Cell::nulled),
                    )),
                    Some(_) => Ok(PathStep::Out(Cell::nulled())),
                    None => Ok(PathStep::Unhandled),
                }
            }
            _ => Ok(PathStep::Unhandled),
        }
    }

    /// Stores through the last step of a set-path
    pub(crate) fn poke_step(&mut self, container: &Cell, picker: &Cell, value: Cell) -> EvalResult<()> {
        match self.pick_step(container, picker)? {
            PathStep::Reference(series, index) => {
                if self.stub(series).flags.contains(SeriesFlags::VARLIST) {
                    self.set_var(series, index, value)?;
                } else {
                    self.ensure_mutable(series)?;
                    if let Some(slot) = self.stub_mut(series).cells_mut().get_mut(index) {
                        *slot = value.fresh();
                    }
                }
                Ok(())
            }
            _ => {
                if let (Some((series, index)), Some(n)) = (container.as_series(), picker.as_integer()) {
                    if container.kind().any_string_p() {
                        if let Some(c) = char_of(&value) {
                            return self.poke_text(series, index, n, c);
                        }
                    }
                }
                Err(ScriptError::BadPath(self.mold(container), self.mold(picker)).into())
            }
        }
    }

    fn poke_text(&mut self, series: SeriesId, index: usize, n: i64, c: char) -> EvalResult<()> {
        self.ensure_mutable(series)?;
        let at = index as i64 + n - 1;
        let len = self.text(series).chars().count() as i64;
        if n < 1 || at >= len {
            return Err(ScriptError::OutOfRange(n.to_string()).into());
        }
        let replaced: String = self
            .text(series)
            .chars()
            .enumerate()
            .map(|(i, ch)| if i as i64 == at { c } else { ch })
            .collect();
        if let super::series::Content::Text(t) = &mut self.stub_mut(series).content {
            *t = replaced;
        }
        Ok(())
    }
}

fn char_of(value: &Cell) -> Option<char> {
    match value.payload {
        super::cell::Payload::Char(c) if value.kind() == Kind::Char => Some(c),
        _ => None,
    }
}

#[cfg(test)]
mod path_tests {
    use crate::ren::error::{Error, ScriptError};
    use crate::ren::interp::{Interp, InterpConfig};

    fn run(code: &str) -> Option<i64> {
        let mut it = Interp::new(InterpConfig::default());
        it.do_string(code).unwrap().and_then(|c| c.as_integer())
    }

    #[test]
    fn picks_from_blocks_and_objects() {
        assert_eq!(run("b: [10 20 30] b/2"), Some(20));
        assert_eq!(run("b: [a 1 b 2] b/b"), Some(2));
        assert_eq!(run("o: make object! [x: 5] o/x"), Some(5));
        assert_eq!(run("o: make object! [i: make object! [j: 6]] o/i/j"), Some(6));
        assert_eq!(run("b: [1 2 3] n: 3 b/:n"), Some(3));
        assert_eq!(run("b: [1 2 3] b/(1 + 1)"), Some(2));
    }

    #[test]
    fn set_paths_store_into_slots() {
        assert_eq!(run("b: [1 2 3] b/2: 20 b/2"), Some(20));
        assert_eq!(run("o: make object! [x: 5] o/x: 7 o/x"), Some(7));
        let mut it = Interp::new(InterpConfig::default());
        assert!(matches!(
            it.do_string("o: make object! [x: 5] o/y: 1"),
            Err(Error::Script(ScriptError::BadPath(..)))
        ));
    }

    #[test]
    fn action_paths_name_refinements() {
        assert_eq!(run("f: func [/a x] [either a [x] [0]] f/a 9"), Some(9));
        assert_eq!(run("f: func [/a x] [either a [x] [0]] g: :f/a g 4"), Some(4));
        assert_eq!(run("o: make object! [f: func [x] [x + 1]] o/f 1"), Some(2));
    }

    #[test]
    fn pokes_characters_into_text() {
        let mut it = Interp::new(InterpConfig::default());
        it.do_string("s: copy \"abc\" s/2: #\"x\"").unwrap();
        let s = it.do_string("s").unwrap().unwrap();
        assert_eq!(it.form(&s), "axc");
    }
}
