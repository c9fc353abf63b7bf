// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/mod.rs

// Core runtime: cells and series in node pools, a tracing collector,
// bound contexts, actions, and the frame-based evaluator with its
// native library, host API and device layer.

// <>

/// Declares a fieldless enum along with a `TryFrom<u8>` for it
macro_rules! enum_and_tryfrom {
    ($(#[$meta:meta])* $vis:vis enum $name:ident {
        $($(#[$vmeta:meta])* $vname:ident $(= $val:expr)?,)*
    }) => {
        $(#[$meta])*
        $vis enum $name {
            $($(#[$vmeta])* $vname $(= $val)?,)*
        }

        impl std::convert::TryFrom<u8> for $name {
            type Error = ();

            #[inline(always)]
            fn try_from(v: u8) -> Result<Self, ()> {
                match v {
                    $(x if x == $name::$vname as u8 => Ok($name::$vname),)*
                    _ => Err(()),
                }
            }
        }
    }
}

/// Builds a table of natives: name, spec text, mode and dispatcher.
/// Each body sees the interpreter, its frame, and its arguments bound
/// by position, refinements included.
macro_rules! ren_native {
    ( const $array:ident; $it:ident $f:ident;
      $( $mode:ident $name:literal $spec:literal [ $($args:ident),* ] $body:block )+ ) => {
        pub(crate) const $array: &[(
            &str,
            &str,
            $crate::ren::action::NativeMode,
            $crate::ren::action::Dispatcher,
        )] = &[
            $( ($name, $spec, $crate::ren::action::NativeMode::$mode, {
                #[allow(unused_variables, unused_mut)]
                fn native(
                    $it: &mut $crate::ren::interp::Interp,
                    $f: $crate::ren::frame::FrameId,
                ) -> $crate::ren::error::EvalResult<$crate::ren::action::Bounce> {
                    let mut _ind = 0usize;
                    $( _ind += 1; let $args = $it.arg($f, _ind); )*
                    $body
                }
                native
            }), )+
        ];
    };
}

pub mod kind;
pub mod node;
pub mod cell;
pub mod symtab;
pub mod error;
pub mod series;
pub mod interp;
pub mod context;
pub mod feed;
pub mod frame;
pub mod action;
pub mod eval;
pub mod function;
pub mod path;
pub mod throw;
pub mod gc;
pub mod scan;
pub mod mold;
pub mod control;
pub mod loops;
pub mod stdenv;
pub mod api;
pub mod device;

pub use api::{RebArg, RebInstruction, RebValue};
pub use cell::Cell;
pub use error::{Error, Result};
pub use frame::FrameId;
pub use interp::{Interp, InterpConfig};
pub use kind::Kind;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn eval(code: &str) -> Option<Cell> {
        let mut it = Interp::new(InterpConfig::default());
        it.do_string(code).unwrap()
    }

    fn run(code: &str) -> Option<i64> {
        eval(code).and_then(|c| c.as_integer())
    }

    fn molded(code: &str) -> String {
        let mut it = Interp::new(InterpConfig::default());
        match it.do_string(code).unwrap() {
            Some(v) => it.mold(&v),
            None => String::from("~null~"),
        }
    }

    #[test]
    fn if_true() {
        assert_eq!(run("if true [10]"), Some(10));
    }

    #[test]
    fn if_false_is_null() {
        assert!(eval("if false [10]").is_none());
    }

    #[test]
    fn else_takes_null() {
        assert_eq!(run("if false [10] else [20]"), Some(20));
    }

    #[test]
    fn case_stops_at_first() {
        assert_eq!(run("case [false [1] true [2] true [3]]"), Some(2));
    }

    #[test]
    fn case_all_spaced_refinement() {
        assert_eq!(run("case /all [false [1] true [2] true [3]]"), Some(3));
    }

    #[test]
    fn loop_body_sets_variable() {
        assert_eq!(run("loop 3 [x: 1 + 2] x"), Some(3));
    }

    #[test]
    fn for_each_last_body() {
        assert_eq!(run("for-each x [1 2 3] [x * 10]"), Some(30));
    }

    #[test]
    fn map_each_collects() {
        assert_eq!(molded("map-each x [1 2 3] [x * x]"), "[1 4 9]");
    }

    #[test]
    fn remove_each_counts_and_removes() {
        let mut it = Interp::new(InterpConfig::default());
        let n = it.do_string("remove-each x data: copy [1 2 3 4] [x > 2]").unwrap();
        assert_eq!(n.and_then(|c| c.as_integer()), Some(2));
        let data = it.do_string("data").unwrap().unwrap();
        assert_eq!(it.mold(&data), "[1 2]");
    }

    #[test]
    fn catch_plain_throw() {
        assert_eq!(run("catch [throw 5]"), Some(5));
    }

    #[test]
    fn catch_named_throw() {
        assert_eq!(run("catch/name [throw/name 5 'foo] 'foo"), Some(5));
    }

    #[test]
    fn while_never_ran_is_blank() {
        assert_eq!(molded("while [null] [1]"), "_");
    }

    #[test]
    fn default_fills_null() {
        let mut it = Interp::new(InterpConfig::default());
        let v = it.do_string("x: default [10]").unwrap();
        assert_eq!(v.and_then(|c| c.as_integer()), Some(10));
        let eq = it.do_string("x = 10").unwrap().and_then(|c| c.as_logic());
        assert_eq!(eq, Some(true));
    }

    #[test]
    fn break_from_repeat_is_null() {
        assert!(eval("repeat 3 [break]").is_none());
    }

    #[test]
    fn reeval_comment_is_void() {
        assert!(eval("reeval comment \"x\"").map_or(false, |c| c.void_p()));
    }

    #[test]
    fn inert_arrays_give_last_element() {
        assert_eq!(molded("1 \"two\" [three] #\"4\""), "#\"4\"");
    }

    #[test]
    fn frames_unwind_after_throw() {
        let mut it = Interp::new(InterpConfig::default());
        let depth = it.frames.len();
        it.do_string("catch [loop 3 [for-each x [1 2] [throw x]]]").unwrap();
        assert_eq!(it.frames.len(), depth);
        assert!(it.do_string("f: func [] [throw 1] f").is_err());
        assert_eq!(it.frames.len(), depth);
    }

    proptest! {
        #[test]
        fn integer_arithmetic(a in -10_000i64..10_000, b in -10_000i64..10_000) {
            prop_assert_eq!(run(&format!("{} + {}", a, b)), Some(a + b));
            prop_assert_eq!(run(&format!("{} - {}", a, b)), Some(a - b));
            prop_assert_eq!(run(&format!("{} * {}", a, b)), Some(a * b));
            prop_assert_eq!(run(&format!("add {} multiply {} 2", a, b)), Some(a + b * 2));
        }

        #[test]
        fn if_matches_either(cond in any::<bool>(), a in any::<i32>(), b in any::<i32>()) {
            let via_if = run(&format!("if {} [{}] else [{}]", cond, a, b));
            let via_either = run(&format!("either {} [{}] [{}]", cond, a, b));
            prop_assert_eq!(via_if, via_either);
            prop_assert_eq!(via_either, Some(i64::from(if cond { a } else { b })));
        }

        #[test]
        fn remove_each_is_a_filter(xs in proptest::collection::vec(-50i64..50, 0..30), pivot in -50i64..50) {
            let block = xs.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(" ");
            let mut it = Interp::new(InterpConfig::default());
            let code = format!("remove-each x data: copy [{}] [x > {}]", block, pivot);
            let removed = it.do_string(&code).unwrap().and_then(|c| c.as_integer());
            let kept: Vec<i64> = xs.iter().copied().filter(|x| *x <= pivot).collect();
            prop_assert_eq!(removed, Some((xs.len() - kept.len()) as i64));

            let data = it.do_string("data").unwrap().unwrap();
            let expect = kept.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(" ");
            prop_assert_eq!(it.mold(&data), format!("[{}]", expect));
        }
    }
}
