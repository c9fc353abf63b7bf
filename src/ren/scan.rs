// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/scan.rs

// Source text to arrays. A small recursive descent reader; the kind of
// value is nearly always known from its first character.

// <>

use std::iter::Peekable;
use std::str::Chars;

use super::cell::{Cell, CellFlags};
use super::error::{Result, ScriptError};
use super::interp::Interp;
use super::kind::Kind;
use super::node::SeriesId;
use super::series::{Link, Misc};

struct Scanner<'a> {
    chars: Peekable<Chars<'a>>,
    line: u32,
    /// A newline was passed since the last value
    newline: bool,
    file: Option<super::symtab::Sym>,
}

/// Characters which end a word or number
fn delimiter_p(c: char) -> bool {
    c.is_whitespace() || matches!(c, '[' | ']' | '(' | ')' | '{' | '}' | '"' | ';')
}

impl Interp {
    /// Scans source text into a managed block bound into the library
    pub fn scan_source(&mut self, code: &str, file: Option<&str>) -> Result<SeriesId> {
        let file = file.map(|f| self.intern(f));
        let mut sc = Scanner {
            chars: code.chars().peekable(),
            line: 1,
            newline: false,
            file,
        };
        let cells = sc.read_array(self, None)?;
        let array = sc.finish_array(self, cells, 1);
        let lib = self.lib;
        self.bind_deep(array, lib, true);
        Ok(array)
    }
}

impl<'a> Scanner<'a> {
    fn error(&self, what: &str) -> super::error::Error {
        ScriptError::Syntax(format!("{} on line {}", what, self.line)).into()
    }

    fn finish_array(&self, it: &mut Interp, cells: Vec<Cell>, line: u32) -> SeriesId {
        let array = it.make_array_from(cells, true);
        let stub = it.stub_mut(array);
        stub.misc = Misc::Line(line);
        if let Some(f) = self.file {
            stub.link = Link::File(f);
        }
        array
    }

    /// Skips whitespace and comments, noting newlines
    fn skip_space(&mut self) {
        while let Some(&c) = self.chars.peek() {
            match c {
                '\n' => {
                    self.line += 1;
                    self.newline = true;
                    self.chars.next();
                }
                ';' => {
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                _ if c.is_whitespace() => {
                    self.chars.next();
                }
                _ => break,
            }
        }
    }

    /// Values up to the closing character, or the end of input at top level
    fn read_array(&mut self, it: &mut Interp, close: Option<char>) -> Result<Vec<Cell>> {
        let mut out = Vec::new();
        loop {
            self.skip_space();
            match (self.chars.peek().copied(), close) {
                (None, None) => return Ok(out),
                (None, Some(c)) => return Err(self.error(&format!("missing {}", c))),
                (Some(c), Some(want)) if c == want => {
                    self.chars.next();
                    return Ok(out);
                }
                (Some(c @ (']' | ')')), _) => return Err(self.error(&format!("unexpected {}", c))),
                _ => {
                    let newline = std::mem::replace(&mut self.newline, false);
                    let mut value = self.read_value(it)?;
                    if newline {
                        value.flags.insert(CellFlags::NEWLINE_BEFORE);
                    }
                    out.push(value);
                }
            }
        }
    }

    fn read_value(&mut self, it: &mut Interp) -> Result<Cell> {
        let c = match self.chars.peek() {
            Some(&c) => c,
            None => return Err(self.error("unexpected end")),
        };

        match c {
            '\'' => {
                let mut depth = 0;
                while self.chars.peek() == Some(&'\'') {
                    self.chars.next();
                    depth += 1;
                }
                if self.chars.peek().map_or(true, |c| c.is_whitespace()) {
                    return Err(self.error("nothing to quote"));
                }
                let value = self.read_value(it)?;
                Ok(it.quotify(value, depth))
            }
            '[' | '(' => {
                self.chars.next();
                let line = self.line;
                let (close, kind) = if c == '[' { (']', Kind::Block) } else { (')', Kind::Group) };
                let cells = self.read_array(it, Some(close))?;
                let array = self.finish_array(it, cells, line);
                let value = Cell::series(kind, array, 0);
                self.maybe_path(it, value)
            }
            '"' => {
                self.chars.next();
                let s = self.read_quoted_text()?;
                Ok(Cell::series(Kind::Text, it.make_text(&s), 0))
            }
            '{' => {
                self.chars.next();
                let s = self.read_braced_text()?;
                Ok(Cell::series(Kind::Text, it.make_text(&s), 0))
            }
            '#' => {
                self.chars.next();
                self.read_special(it)
            }
            ':' => {
                self.chars.next();
                let word = self.read_value(it)?;
                match word.kind() {
                    Kind::Word => Ok(word.rekind(Kind::GetWord)),
                    Kind::Path => Ok(word.rekind(Kind::GetPath)),
                    _ => Err(self.error("bad get-word")),
                }
            }
            '/' => {
                self.chars.next();
                match self.chars.peek() {
                    Some(&n) if !delimiter_p(n) && n != '/' => {
                        let name = self.read_token();
                        let sym = it.intern(&name);
                        Ok(Cell::word(Kind::Refinement, sym))
                    }
                    _ => {
                        let sym = it.intern("/");
                        Ok(Cell::word(Kind::Word, sym))
                    }
                }
            }
            '<' => {
                let mut ahead = self.chars.clone();
                ahead.next();
                match ahead.next() {
                    Some(n) if n.is_alphabetic() => {
                        self.chars.next();
                        let mut s = String::new();
                        loop {
                            match self.chars.next() {
                                Some('>') => break,
                                Some('\n') | None => return Err(self.error("unterminated tag")),
                                Some(c) => s.push(c),
                            }
                        }
                        Ok(Cell::series(Kind::Tag, it.make_text(&s), 0))
                    }
                    _ => self.read_word_or_path(it),
                }
            }
            '+' | '-' | '.' => {
                let mut ahead = self.chars.clone();
                ahead.next();
                match ahead.next() {
                    Some(n) if n.is_ascii_digit() => self.read_number(),
                    _ => self.read_word_or_path(it),
                }
            }
            '_' => {
                let mut ahead = self.chars.clone();
                ahead.next();
                match ahead.next() {
                    Some(n) if !delimiter_p(n) => self.read_word_or_path(it),
                    _ => {
                        self.chars.next();
                        Ok(Cell::blank())
                    }
                }
            }
            _ if c.is_ascii_digit() => self.read_number(),
            _ => self.read_word_or_path(it),
        }
    }

    /// Characters up to a delimiter, a slash or a colon
    fn read_token(&mut self) -> String {
        let mut s = String::new();
        while let Some(&c) = self.chars.peek() {
            if delimiter_p(c) || c == '/' || c == ':' {
                break;
            }
            s.push(c);
            self.chars.next();
        }
        s
    }

    fn read_word_or_path(&mut self, it: &mut Interp) -> Result<Cell> {
        let name = self.read_token();
        if name.is_empty() {
            return Err(self.error("unexpected character"));
        }
        let sym = it.intern(&name);
        if self.chars.peek() == Some(&':') {
            self.chars.next();
            return Ok(Cell::word(Kind::SetWord, sym));
        }
        self.maybe_path(it, Cell::word(Kind::Word, sym))
    }

    /// Continues a value into a path if a slash follows it directly
    fn maybe_path(&mut self, it: &mut Interp, head: Cell) -> Result<Cell> {
        if self.chars.peek() != Some(&'/') {
            return Ok(head);
        }
        let line = self.line;
        let mut items = vec![head];
        while self.chars.peek() == Some(&'/') {
            self.chars.next();
            let item = match self.chars.peek().copied() {
                Some('(') => {
                    self.chars.next();
                    let cells = self.read_array(it, Some(')'))?;
                    let array = self.finish_array(it, cells, self.line);
                    Cell::series(Kind::Group, array, 0)
                }
                Some(':') => {
                    self.chars.next();
                    let name = self.read_token();
                    if name.is_empty() {
                        return Err(self.error("bad get-word in path"));
                    }
                    Cell::word(Kind::GetWord, it.intern(&name))
                }
                Some(c) if c.is_ascii_digit() => {
                    let token = self.read_token();
                    match token.parse::<i64>() {
                        Ok(n) => Cell::integer(n),
                        Err(_) => return Err(self.error(&format!("bad path item {}", token))),
                    }
                }
                Some(c) if !delimiter_p(c) && c != '/' => {
                    let name = self.read_token();
                    Cell::word(Kind::Word, it.intern(&name))
                }
                _ => return Err(self.error("empty path item")),
            };
            items.push(item);
        }
        let kind = if self.chars.peek() == Some(&':') {
            self.chars.next();
            Kind::SetPath
        } else {
            Kind::Path
        };
        let array = self.finish_array(it, items, line);
        Ok(Cell::series(kind, array, 0))
    }

    fn read_number(&mut self) -> Result<Cell> {
        let mut s = String::new();
        while let Some(&c) = self.chars.peek() {
            if delimiter_p(c) || c == '/' {
                break;
            }
            s.push(c);
            self.chars.next();
        }
        let clean: String = s.chars().filter(|c| *c != '\'').collect();
        if let Ok(n) = clean.parse::<i64>() {
            return Ok(Cell::integer(n));
        }
        if let Ok(d) = clean.parse::<f64>() {
            return Ok(Cell::decimal(d));
        }
        Err(self.error(&format!("invalid number {}", s)))
    }

    /// Escaped character after a caret
    fn read_escape(&mut self) -> Result<char> {
        match self.chars.next() {
            Some('/') => Ok('\n'),
            Some('-') => Ok('\t'),
            Some('@') => Ok('\0'),
            Some(c) => Ok(c),
            None => Err(self.error("unterminated escape")),
        }
    }

    fn read_quoted_text(&mut self) -> Result<String> {
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some('"') => return Ok(s),
                Some('^') => s.push(self.read_escape()?),
                Some('\n') | None => return Err(self.error("unterminated text")),
                Some(c) => s.push(c),
            }
        }
    }

    fn read_braced_text(&mut self) -> Result<String> {
        let mut s = String::new();
        let mut depth = 1;
        loop {
            match self.chars.next() {
                Some('{') => {
                    depth += 1;
                    s.push('{');
                }
                Some('}') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(s);
                    }
                    s.push('}');
                }
                Some('^') => s.push(self.read_escape()?),
                Some('\n') => {
                    self.line += 1;
                    s.push('\n');
                }
                Some(c) => s.push(c),
                None => return Err(self.error("unterminated text")),
            }
        }
    }

    /// Characters, binaries and construction syntax after a `#`
    fn read_special(&mut self, it: &mut Interp) -> Result<Cell> {
        match self.chars.next() {
            Some('"') => {
                let c = match self.chars.next() {
                    Some('^') => self.read_escape()?,
                    Some(c) => c,
                    None => return Err(self.error("unterminated char")),
                };
                if self.chars.next() != Some('"') {
                    return Err(self.error("bad char"));
                }
                Ok(Cell::char(c))
            }
            Some('{') => {
                let mut hex = String::new();
                loop {
                    match self.chars.next() {
                        Some('}') => break,
                        Some(c) if c.is_ascii_hexdigit() => hex.push(c),
                        Some(c) if c.is_whitespace() => {}
                        _ => return Err(self.error("bad binary")),
                    }
                }
                if hex.len() % 2 != 0 {
                    return Err(self.error("odd binary digits"));
                }
                let bytes = (0..hex.len())
                    .step_by(2)
                    .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
                    .collect::<std::result::Result<Vec<u8>, _>>()
                    .map_err(|_| self.error("bad binary"))?;
                Ok(Cell::series(Kind::Binary, it.make_binary(bytes), 0))
            }
            Some('[') => {
                let mut name = String::new();
                loop {
                    match self.chars.next() {
                        Some(']') => break,
                        Some(c) if !c.is_whitespace() => name.push(c),
                        _ => return Err(self.error("bad construction")),
                    }
                }
                match name.to_ascii_lowercase().as_str() {
                    "true" => Ok(Cell::logic(true)),
                    "false" => Ok(Cell::logic(false)),
                    "void" => Ok(Cell::void()),
                    _ => Err(self.error(&format!("unknown construction #[{}]", name))),
                }
            }
            _ => Err(self.error("bad # syntax")),
        }
    }
}

#[cfg(test)]
mod scan_tests {
    use super::*;
    use crate::ren::interp::InterpConfig;

    fn scan(it: &mut Interp, code: &str) -> Vec<Cell> {
        let arr = it.scan_source(code, None).unwrap();
        it.arr_cells(arr).to_vec()
    }

    #[test]
    fn scalars() {
        let mut it = Interp::new(InterpConfig::default());
        let cells = scan(&mut it, "1 -2 3.5 #\"a\" _ #[true] #[void]");
        assert_eq!(cells[0].as_integer(), Some(1));
        assert_eq!(cells[1].as_integer(), Some(-2));
        assert_eq!(cells[2].as_decimal(), Some(3.5));
        assert_eq!(cells[3].kind(), Kind::Char);
        assert!(cells[4].blank_p());
        assert_eq!(cells[5].as_logic(), Some(true));
        assert!(cells[6].void_p());
    }

    #[test]
    fn words_of_every_kind() {
        let mut it = Interp::new(InterpConfig::default());
        let cells = scan(&mut it, "a b: :c /d + - / < <= <>");
        let kinds: Vec<Kind> = cells.iter().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                Kind::Word,
                Kind::SetWord,
                Kind::GetWord,
                Kind::Refinement,
                Kind::Word,
                Kind::Word,
                Kind::Word,
                Kind::Word,
                Kind::Word,
                Kind::Word,
            ]
        );
        assert_eq!(it.sym_name(cells[8].as_word().unwrap()), "<=");
    }

    #[test]
    fn nested_arrays_and_paths() {
        let mut it = Interp::new(InterpConfig::default());
        let cells = scan(&mut it, "[a (b)] o/x/1 o/x: :o/x b/(1 + 1)");
        assert_eq!(cells[0].kind(), Kind::Block);
        let (inner, _) = cells[0].as_series().unwrap();
        assert_eq!(it.arr_at(inner, 1).kind(), Kind::Group);
        assert_eq!(cells[1].kind(), Kind::Path);
        let (p, _) = cells[1].as_series().unwrap();
        assert_eq!(it.arr_len(p), 3);
        assert_eq!(it.arr_at(p, 2).as_integer(), Some(1));
        assert_eq!(cells[2].kind(), Kind::SetPath);
        assert_eq!(cells[3].kind(), Kind::GetPath);
        let (g, _) = cells[4].as_series().unwrap();
        assert_eq!(it.arr_at(g, 1).kind(), Kind::Group);
    }

    #[test]
    fn text_tags_and_binaries() {
        let mut it = Interp::new(InterpConfig::default());
        let cells = scan(&mut it, "\"a^/b\" {x {y} z} <local> #{0aFF}");
        let (t, _) = cells[0].as_series().unwrap();
        assert_eq!(it.text(t), "a\nb");
        let (b, _) = cells[1].as_series().unwrap();
        assert_eq!(it.text(b), "x {y} z");
        assert_eq!(cells[2].kind(), Kind::Tag);
        let (bin, _) = cells[3].as_series().unwrap();
        assert_eq!(it.bytes(bin), &[0x0a, 0xff]);
    }

    #[test]
    fn quotes_and_newlines() {
        let mut it = Interp::new(InterpConfig::default());
        let cells = scan(&mut it, "'a\n''''b ; comment\n1");
        assert_eq!(cells.len(), 3);
        assert_eq!(it.quote_depth(&cells[0]), 1);
        assert_eq!(it.quote_depth(&cells[1]), 4);
        assert!(cells[1].deep_quoted_p());
        assert!(cells[1].flags.contains(CellFlags::NEWLINE_BEFORE));
        assert!(cells[2].flags.contains(CellFlags::NEWLINE_BEFORE));
    }

    #[test]
    fn words_are_bound_into_the_library() {
        let mut it = Interp::new(InterpConfig::default());
        let cells = scan(&mut it, "brand-new-word");
        assert!(it.get_var(&cells[0], None).unwrap().nulled_p());
    }

    #[test]
    fn reports_syntax_errors() {
        let mut it = Interp::new(InterpConfig::default());
        for bad in ["[1 2", "1 2)", "\"open", "#[maybe]", "12abc"] {
            assert!(matches!(
                it.scan_source(bad, None),
                Err(super::super::error::Error::Script(ScriptError::Syntax(_)))
            ));
        }
    }
}
