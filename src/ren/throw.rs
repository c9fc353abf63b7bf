// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/throw.rs

// Non-local exits. A throw parks its label and value in the interpreter
// and unwinds as `Escape::Thrown`; whoever recognizes the label takes
// the value and clears the slots. RETURN and UNWIND carry the varlist
// of their target frame in the label's binding.

// <>

use super::cell::{Binding, Cell};
use super::error::{Escape, EvalResult, ScriptError};
use super::interp::{Interp, Thrown};
use super::kind::Kind;
use super::node::SeriesId;
use super::FrameId;

/// What a loop does after its body threw
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum LoopCatch {
    Break,
    /// Move to the next iteration; the value stands in for the body's result
    Continue(Cell),
}

impl Interp {
    /// Starts a throw
    pub(crate) fn throw_value(&mut self, label: Cell, arg: Cell) -> Escape {
        if cfg!(feature = "stkdbg") {
            log::trace!("throw {}", self.mold(&label));
        }
        self.thrown = Thrown {
            label: label.fresh(),
            arg: arg.fresh(),
        };
        Escape::Thrown
    }

    /// Ends the throw in flight, handing back its value
    pub(crate) fn clear_thrown(&mut self) -> Cell {
        let arg = self.thrown.arg;
        self.thrown = Thrown {
            label: Cell::end(),
            arg: Cell::end(),
        };
        arg
    }

    /// Claims a BREAK or CONTINUE thrown out of a loop body
    pub(crate) fn catch_loop_throw(&mut self) -> Option<LoopCatch> {
        let label = self.thrown.label;
        if self.same_action_p(&label, &self.builtins.break_) {
            self.clear_thrown();
            return Some(LoopCatch::Break);
        }
        if self.same_action_p(&label, &self.builtins.continue_) {
            let arg = self.clear_thrown();
            return Some(LoopCatch::Continue(arg));
        }
        None
    }

    /// Runs a loop body, turning BREAK and CONTINUE into values
    pub(crate) fn run_loop_body(&mut self, body: &Cell) -> EvalResult<Result<Cell, LoopCatch>> {
        match self.do_block(body, None) {
            Ok(v) => Ok(Ok(v)),
            Err(Escape::Thrown) => match self.catch_loop_throw() {
                Some(caught) => Ok(Err(caught)),
                None => Err(Escape::Thrown),
            },
            Err(e) => Err(e),
        }
    }

    /// Whether the throw in flight is one CATCH/ANY should leave alone
    fn uncatchable_throw_p(&self) -> bool {
        let label = self.thrown.label;
        if !label.action_p() {
            return false;
        }
        let b = &self.builtins;
        [b.return_, b.unwind, b.halt, b.quit]
            .iter()
            .any(|x| self.same_action_p(&label, x))
    }

    /// Whether a CATCH/NAME name matches the label of the throw in flight
    fn throw_name_matches_p(&self, name: &Cell) -> bool {
        let label = self.thrown.label;
        match name.kind() {
            Kind::Block => match name.as_series() {
                Some((series, index)) => self
                    .arr_cells(series)
                    .iter()
                    .skip(index)
                    .any(|n| self.throw_name_matches_p(n)),
                None => false,
            },
            Kind::Word => match (name.as_word(), label.as_word()) {
                (Some(a), Some(b)) => label.kind() == Kind::Word && self.symtab.same_p(a, b),
                _ => false,
            },
            Kind::Action => self.same_action_p(name, &label),
            _ => match (name.as_context(), label.as_context()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Varlist of the frame an UNWIND or stale-checked RETURN is aimed at
    fn unwind_target(&self, f: FrameId, level: &Cell) -> EvalResult<SeriesId> {
        match level.kind() {
            Kind::Frame => match level.as_context() {
                Some(v) if self.frame_for_varlist(v).is_some() => Ok(v),
                _ => Err(ScriptError::BadValue(String::from("frame is not running")).into()),
            },
            Kind::Action => {
                let mut cur = self.frames[f].prior;
                while let Some(i) = cur {
                    if let (Some(orig), Some(v)) = (self.frames[i].original, self.frames[i].varlist) {
                        if Some((orig.paramlist, orig.details)) == level.as_action() {
                            return Ok(v);
                        }
                    }
                    cur = self.frames[i].prior;
                }
                Err(ScriptError::BadValue(self.mold(level)).into())
            }
            _ => {
                let mut count = level.as_integer().unwrap_or(1);
                let mut cur = self.frames[f].prior;
                while let Some(i) = cur {
                    if let Some(v) = self.frames[i].varlist {
                        count -= 1;
                        if count <= 0 {
                            return Ok(v);
                        }
                    }
                    cur = self.frames[i].prior;
                }
                Err(ScriptError::OutOfRange(self.mold(level)).into())
            }
        }
    }
}

ren_native! {
    const THROW_NATIVES;
    it f;

    Prefix "return" "value [<opt> <end> any-value!]" [value] {
        let target = match it.frames[f].binding {
            Binding::Specific(v) => v,
            _ => return Err(ScriptError::BadValue(String::from("return outside of a function")).into()),
        };
        let tf = match it.frame_for_varlist(target) {
            Some(tf) => tf,
            None => {
                return Err(ScriptError::BadValue(String::from("return from a call which has ended")).into())
            }
        };
        let value = it.check_return(tf, value.fresh())?;
        let label = it.make_return(target);
        Err(it.throw_value(label, value))
    }

    Prefix "unwind" "level [frame! action! integer!] result [<opt> <end> any-value!]" [level, result] {
        let target = it.unwind_target(f, &level)?;
        let mut label = it.builtins.unwind;
        label.extra = Binding::Specific(target);
        Err(it.throw_value(label, result))
    }

    Prefix "break" "" [] {
        let label = it.builtins.break_;
        Err(it.throw_value(label, Cell::nulled()))
    }

    Prefix "continue" "/with value [<opt> any-value!]" [with, value] {
        let label = it.builtins.continue_;
        let value = if with.truthy_p() { value } else { Cell::void() };
        Err(it.throw_value(label, value))
    }

    Prefix "throw" "value [<opt> any-value!] /name word [word! action! any-context!]" [value, name, word] {
        let label = if name.truthy_p() { word } else { Cell::nulled() };
        Err(it.throw_value(label, value))
    }

    Prefix "catch" "block [block!] /name names [block! word! action! any-context!] /any /quit" [block, name, names, any, quit] {
        match it.do_block(&block, None) {
            Ok(v) => it.ret(f, v),
            Err(Escape::Thrown) => {
                let label = it.thrown.label;
                let caught = if quit.truthy_p() && it.same_action_p(&label, &it.builtins.quit) {
                    true
                } else if it.uncatchable_throw_p() {
                    false
                } else if any.truthy_p() {
                    true
                } else if name.truthy_p() {
                    it.throw_name_matches_p(&names)
                } else {
                    label.nulled_p()
                };
                if !caught {
                    return Err(Escape::Thrown);
                }
                let arg = it.clear_thrown();
                it.ret(f, arg)
            }
            Err(e) => Err(e),
        }
    }

    Prefix "quit" "/with value [<opt> any-value!]" [with, value] {
        let label = it.builtins.quit;
        let value = if with.truthy_p() { value } else { Cell::integer(0) };
        Err(it.throw_value(label, value))
    }

    Prefix "halt" "" [] {
        let label = it.builtins.halt;
        Err(it.throw_value(label, Cell::nulled()))
    }
}

#[cfg(test)]
mod throw_tests {
    use crate::ren::error::{Error, ScriptError};
    use crate::ren::interp::{Interp, InterpConfig};

    fn run(code: &str) -> Option<i64> {
        let mut it = Interp::new(InterpConfig::default());
        it.do_string(code).unwrap().and_then(|c| c.as_integer())
    }

    #[test]
    fn unnamed_and_named_catches() {
        assert_eq!(run("catch [throw 5]"), Some(5));
        assert_eq!(run("catch [1 + 2]"), Some(3));
        assert_eq!(run("catch/name [throw/name 5 'foo] 'foo"), Some(5));
        assert_eq!(run("catch [catch/name [throw 7] 'foo]"), Some(7));
        assert_eq!(run("catch/name [catch [throw/name 8 'foo]] [bar foo]"), Some(8));
        assert_eq!(run("catch/any [throw/name 9 'anything]"), Some(9));
    }

    #[test]
    fn uncaught_throws_are_errors() {
        let mut it = Interp::new(InterpConfig::default());
        assert!(matches!(
            it.do_string("throw 1"),
            Err(Error::Script(ScriptError::NoCatch(_)))
        ));
        assert!(it.thrown.label.end_p());
        assert_eq!(it.do_string("2").unwrap().and_then(|c| c.as_integer()), Some(2));
    }

    #[test]
    fn quit_passes_catch_any() {
        let mut it = Interp::new(InterpConfig::default());
        let r = it.do_string("catch/any [quit/with 3]");
        assert_eq!(r, Err(Error::User(String::from("quit 3"))));
        assert_eq!(run("catch/quit [quit/with 4]"), Some(4));
    }

    #[test]
    fn unwind_targets_a_frame() {
        assert_eq!(
            run("f: func [] [g: func [] [unwind :f 10] g 20] f"),
            Some(10)
        );
        assert_eq!(run("f: func [] [unwind 1 30 40] f"), Some(30));
    }

    #[test]
    fn break_outside_a_loop_is_uncaught() {
        let mut it = Interp::new(InterpConfig::default());
        assert!(matches!(
            it.do_string("break"),
            Err(Error::Script(ScriptError::NoCatch(_)))
        ));
    }
}
