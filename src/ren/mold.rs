// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/mold.rs

// Text renderings of values. MOLD produces source which scans back to
// an equal value where the kind allows; FORM produces the plain text
// PRINT shows.

// <>

use std::fmt;

use super::cell::{Cell, ParamClass, ParamFlags, Payload};
use super::interp::Interp;
use super::kind::Kind;

/// Nesting past which arrays and contexts are elided
const MAX_DEPTH: u8 = 32;

/// Bundles a value with its interpreter for display
pub struct Molded<'a> {
    it: &'a Interp,
    cell: Cell,
    form: bool,
    depth: u8,
}

impl Interp {
    pub fn mold(&self, cell: &Cell) -> String {
        self.display(cell, false).to_string()
    }

    pub fn form(&self, cell: &Cell) -> String {
        self.display(cell, true).to_string()
    }

    /// Displayable view of a value, molded or formed
    pub fn display(&self, cell: &Cell, form: bool) -> Molded<'_> {
        Molded {
            it: self,
            cell: *cell,
            form,
            depth: 0,
        }
    }
}

impl<'a> Molded<'a> {
    fn nested(&self, cell: Cell, form: bool) -> Molded<'a> {
        Molded {
            it: self.it,
            cell,
            form,
            depth: self.depth + 1,
        }
    }

    fn items(&self, f: &mut fmt::Formatter<'_>, sep: &str, form: bool) -> fmt::Result {
        let (series, index) = match self.cell.as_series() {
            Some(s) => s,
            None => return Ok(()),
        };
        if self.depth >= MAX_DEPTH {
            return write!(f, "...");
        }
        for (n, item) in self.it.arr_cells(series).iter().skip(index).enumerate() {
            if n > 0 {
                write!(f, "{}", sep)?;
            }
            write!(f, "{}", self.nested(*item, form))?;
        }
        Ok(())
    }

    fn fields(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let varlist = match self.cell.as_context() {
            Some(v) => v,
            None => return Ok(()),
        };
        if self.depth >= MAX_DEPTH {
            return write!(f, "...");
        }
        let it = self.it;
        let keylist = match it.keylist_of(varlist) {
            Ok(k) => k,
            Err(_) => return write!(f, "..."),
        };
        let mut first = true;
        for i in 1..it.arr_len(keylist) {
            let (sym, class, flags) = match it.arr_at(keylist, i).payload {
                Payload::Param { sym, class, flags, .. } => (sym, class, flags),
                _ => continue,
            };
            if flags.contains(ParamFlags::HIDDEN) || class == ParamClass::Return {
                continue;
            }
            if !first {
                write!(f, " ")?;
            }
            first = false;
            let value = it.var(varlist, i);
            write!(f, "{}: ", it.sym_name(sym))?;
            match value.kind() {
                Kind::Word | Kind::Path | Kind::GetWord | Kind::GetPath | Kind::SetWord | Kind::SetPath => {
                    write!(f, "'{}", self.nested(value, false))?
                }
                _ => write!(f, "{}", self.nested(value, false))?,
            }
        }
        Ok(())
    }

    fn params(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (paramlist, _) = match self.cell.as_action() {
            Some(a) => a,
            None => return Ok(()),
        };
        let it = self.it;
        let mut first = true;
        for i in 1..=it.act_num_params(paramlist) {
            let (sym, class, _, flags) = it.act_param(paramlist, i);
            if flags.contains(ParamFlags::HIDDEN) {
                continue;
            }
            let name = it.sym_name(sym);
            let shown = match class {
                ParamClass::Normal | ParamClass::Tight => name.to_string(),
                ParamClass::HardQuote => format!("'{}", name),
                ParamClass::SoftQuote => format!(":{}", name),
                ParamClass::Refinement => format!("/{}", name),
                ParamClass::Local | ParamClass::Return => continue,
            };
            if !first {
                write!(f, " ")?;
            }
            first = false;
            write!(f, "{}", shown)?;
        }
        Ok(())
    }
}

fn escape_char(c: char) -> String {
    match c {
        '\n' => String::from("^/"),
        '\t' => String::from("^-"),
        '\0' => String::from("^@"),
        '^' => String::from("^^"),
        '"' => String::from("^\""),
        _ => c.to_string(),
    }
}

impl<'a> fmt::Display for Molded<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let it = self.it;
        let cell = self.cell;

        if cell.quoted_p() {
            let depth = it.quote_depth(&cell);
            let base = it.unquoted_base(cell);
            for _ in 0..depth {
                write!(f, "'")?;
            }
            return write!(f, "{}", self.nested(base, false));
        }

        let word = || cell.as_word().map(|s| it.sym_name(s)).unwrap_or("?");

        match cell.kind() {
            Kind::End => write!(f, "~end~"),
            Kind::Nulled => {
                if self.form {
                    Ok(())
                } else {
                    write!(f, "~null~")
                }
            }
            Kind::Void => write!(f, "#[void]"),
            Kind::Blank => write!(f, "_"),
            Kind::Logic => match cell.as_logic() {
                Some(true) => write!(f, "#[true]"),
                _ => write!(f, "#[false]"),
            },
            Kind::Integer => write!(f, "{}", cell.as_integer().unwrap_or(0)),
            Kind::Decimal => write!(f, "{:?}", cell.as_decimal().unwrap_or(0.0)),
            Kind::Char => match cell.payload {
                Payload::Char(c) if self.form => write!(f, "{}", c),
                Payload::Char(c) => write!(f, "#\"{}\"", escape_char(c)),
                _ => write!(f, "#\"?\""),
            },
            Kind::Datatype => write!(f, "{}", cell.as_datatype().map_or("?", |k| k.name())),
            Kind::Typeset => match cell.payload {
                Payload::Typeset(ts) | Payload::Param { types: ts, .. } => {
                    let names: Vec<&str> = ts.kinds().map(|k| k.name()).collect();
                    write!(f, "#[typeset! [{}]]", names.join(" "))
                }
                _ => write!(f, "#[typeset! []]"),
            },
            Kind::Handle => write!(f, "#[handle!]"),
            Kind::Event => match cell.payload {
                Payload::Event { what, .. } => write!(f, "#[event! {}]", what.name()),
                _ => write!(f, "#[event!]"),
            },
            Kind::Text => {
                let (series, index) = cell.as_series().unwrap_or((it.empty_array, 0));
                let s: String = it.text(series).chars().skip(index).collect();
                if self.form {
                    write!(f, "{}", s)
                } else {
                    let escaped: String = s.chars().map(escape_char).collect();
                    write!(f, "\"{}\"", escaped)
                }
            }
            Kind::Tag => {
                let (series, index) = cell.as_series().unwrap_or((it.empty_array, 0));
                let s: String = it.text(series).chars().skip(index).collect();
                write!(f, "<{}>", s)
            }
            Kind::Binary => {
                let (series, index) = cell.as_series().unwrap_or((it.empty_array, 0));
                write!(f, "#{{")?;
                for b in it.bytes(series).iter().skip(index) {
                    write!(f, "{:02X}", b)?;
                }
                write!(f, "}}")
            }
            Kind::Block => {
                if self.form {
                    self.items(f, " ", true)
                } else {
                    write!(f, "[")?;
                    self.items(f, " ", false)?;
                    write!(f, "]")
                }
            }
            Kind::Group => {
                write!(f, "(")?;
                self.items(f, " ", false)?;
                write!(f, ")")
            }
            Kind::Path => self.items(f, "/", false),
            Kind::SetPath => {
                self.items(f, "/", false)?;
                write!(f, ":")
            }
            Kind::GetPath => {
                write!(f, ":")?;
                self.items(f, "/", false)
            }
            Kind::Word => write!(f, "{}", word()),
            Kind::SetWord => write!(f, "{}:", word()),
            Kind::GetWord => write!(f, ":{}", word()),
            Kind::Refinement => write!(f, "/{}", word()),
            Kind::Action => {
                write!(f, "#[action! [")?;
                self.params(f)?;
                write!(f, "]]")
            }
            Kind::Error if self.form => {
                let message = cell
                    .as_context()
                    .and_then(|ctx| it.faults.get(&ctx).map(|e| e.to_string()))
                    .or_else(|| {
                        let ctx = cell.as_context()?;
                        let m = it.context_field(ctx, "message")?;
                        Some(it.form(&m))
                    })
                    .unwrap_or_default();
                write!(f, "** {}", message)
            }
            Kind::Object | Kind::Frame | Kind::Error | Kind::Port => {
                write!(f, "make {} [", cell.kind().name())?;
                self.fields(f)?;
                write!(f, "]")
            }
            Kind::Quoted => write!(f, "'?"),
        }
    }
}

#[cfg(test)]
mod mold_tests {
    use crate::ren::interp::{Interp, InterpConfig};

    fn molded(code: &str) -> String {
        let mut it = Interp::new(InterpConfig::default());
        let v = it.do_string(code).unwrap().unwrap();
        it.mold(&v)
    }

    #[test]
    fn scalars() {
        assert_eq!(molded("10"), "10");
        assert_eq!(molded("1.5"), "1.5");
        assert_eq!(molded("2.0"), "2.0");
        assert_eq!(molded("#\"a\""), "#\"a\"");
        assert_eq!(molded("true"), "#[true]");
        assert_eq!(molded("_"), "_");
        assert_eq!(molded("integer!"), "integer!");
    }

    #[test]
    fn series_and_words() {
        assert_eq!(molded("[a b: :c /d 'e [1] (2)]"), "[a b: :c /d 'e [1] (2)]");
        assert_eq!(molded("\"a^/b\""), "\"a^/b\"");
        assert_eq!(molded("'o/x/1"), "o/x/1");
        assert_eq!(molded("<tag>"), "<tag>");
        assert_eq!(molded("#{00FF}"), "#{00FF}");
        assert_eq!(molded("next [1 2 3]"), "[2 3]");
    }

    #[test]
    fn contexts_and_actions() {
        assert_eq!(molded("make object! [x: 1 y: 'z]"), "make object! [x: 1 y: 'z]");
        assert_eq!(molded("func [a 'b :c /d e <local> z] []"), "#[action! [a 'b :c /d e]]");
    }

    #[test]
    fn forms_are_plain() {
        let mut it = Interp::new(InterpConfig::default());
        let v = it.do_string("[\"a\" [b #\"c\"] 1]").unwrap().unwrap();
        assert_eq!(it.form(&v), "a b c 1");
        let e = it.do_string("trap [1 / 0]").unwrap().unwrap();
        assert_eq!(it.form(&e), "** Script Error: attempt to divide by zero");
    }

    #[test]
    fn deep_quotes() {
        assert_eq!(molded("'''''a"), "''''a");
    }
}
