// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/context.rs

// Contexts and binding. A context is a varlist (values) paired with a
// keylist (symbols); slot zero of each holds the archetype and the
// rootkey. Words bind specifically to a varlist, or relatively to an
// action paramlist, in which case a frame specifier resolves them.

// <>

use super::cell::{Binding, Cell, ParamClass, ParamFlags, Payload};
use super::error::{AccessError, Error, EvalResult, InternalError, ScriptError};
use super::interp::Interp;
use super::kind::{Kind, Typeset};
use super::node::SeriesId;
use super::series::{Content, KeySource, Link, SeriesFlags, SeriesInfo};
use super::symtab::Sym;

/// Varlist of the frame that resolves relative bindings, if any
pub type Specifier = Option<SeriesId>;

/// Key cell for a plain context field
pub(crate) fn object_key(sym: Sym) -> Cell {
    Cell::param(
        sym,
        ParamClass::Normal,
        Typeset::ANY_VALUE.with(Kind::Nulled),
        ParamFlags::empty(),
    )
}

impl Interp {
    /// Makes an empty managed context with room for `capacity` fields
    pub(crate) fn make_context(&mut self, kind: Kind, capacity: usize) -> SeriesId {
        self.make_context_parts(kind, capacity).0
    }

    /// Varlist and keylist of a new empty context
    fn make_context_parts(&mut self, kind: Kind, capacity: usize) -> (SeriesId, SeriesId) {
        let mut keys = Vec::with_capacity(capacity + 1);
        keys.push(Cell::blank());
        let keylist = self.make_array_from(keys, true);

        let mut vars = Vec::with_capacity(capacity + 1);
        vars.push(Cell::blank());
        let varlist = self.make_array_from(vars, true);

        let stub = self.stub_mut(varlist);
        stub.flags.insert(SeriesFlags::VARLIST | SeriesFlags::LINK_NODE_NEEDS_MARK);
        stub.link = Link::KeySource(KeySource::Keylist(keylist));
        if let Content::Cells(v) = &mut stub.content {
            v[0] = Cell::context(kind, varlist, None);
        }

        (varlist, keylist)
    }

    /// Makes a context holding the given fields, in order
    pub(crate) fn make_context_with(&mut self, kind: Kind, fields: &[(&str, Cell)]) -> SeriesId {
        let (ctx, keylist) = self.make_context_parts(kind, fields.len());
        for (name, value) in fields {
            let sym = self.symtab.get_id(name);
            self.push_field(ctx, keylist, sym, *value);
        }
        ctx
    }

    /// Keylist of a context or frame varlist
    pub(crate) fn keylist_of(&self, varlist: SeriesId) -> Result<SeriesId, Error> {
        match self.stub(varlist).link {
            Link::KeySource(KeySource::Keylist(k)) => Ok(k),
            Link::KeySource(KeySource::Frame { keylist, .. }) => Ok(keylist),
            _ => Err(InternalError::Panic(format!("{:?} is not a varlist", varlist)).into()),
        }
    }

    pub(crate) fn context_kind(&self, varlist: SeriesId) -> Kind {
        self.arr_at(varlist, 0).kind()
    }

    /// Number of fields, not counting the archetype
    pub(crate) fn context_len(&self, varlist: SeriesId) -> usize {
        self.arr_len(varlist).saturating_sub(1)
    }

    pub(crate) fn key_sym(&self, keylist: SeriesId, index: usize) -> Option<Sym> {
        match self.arr_at(keylist, index).payload {
            Payload::Param { sym, .. } => Some(sym),
            _ => None,
        }
    }

    /// Index of a field, matching spellings case-insensitively
    pub(crate) fn find_in_context(&self, varlist: SeriesId, sym: Sym) -> Option<usize> {
        let keylist = self.keylist_of(varlist).ok()?;
        self.find_key(keylist, sym)
    }

    pub(crate) fn find_key(&self, keylist: SeriesId, sym: Sym) -> Option<usize> {
        let canon = self.symtab.canon(sym);
        self.arr_cells(keylist)
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, k)| match k.payload {
                Payload::Param { sym: s, flags, .. } => {
                    !flags.contains(ParamFlags::HIDDEN) && self.symtab.canon(s) == canon
                }
                _ => false,
            })
            .map(|(i, _)| i)
    }

    /// Adds a field, copying the keylist first if other contexts share it
    pub(crate) fn append_to_context(&mut self, varlist: SeriesId, sym: Sym, value: Cell) -> Result<usize, Error> {
        let keylist = self.keylist_of(varlist)?;
        let keylist = if self.stub(keylist).flags.contains(SeriesFlags::KEYLIST_SHARED) {
            let copy = self.copy_array_at(keylist, 0, true);
            self.stub_mut(copy).link = Link::Ancestor(keylist);
            self.stub_mut(varlist).link = Link::KeySource(KeySource::Keylist(copy));
            copy
        } else {
            keylist
        };
        Ok(self.push_field(varlist, keylist, sym, value))
    }

    fn push_field(&mut self, varlist: SeriesId, keylist: SeriesId, sym: Sym, value: Cell) -> usize {
        if let Content::Cells(v) = &mut self.stub_mut(keylist).content {
            v.push(object_key(sym));
        }
        if let Content::Cells(v) = &mut self.stub_mut(varlist).content {
            v.push(value);
        }
        self.charge_ballast(2);

        self.context_len(varlist)
    }

    #[inline(always)]
    pub(crate) fn var(&self, varlist: SeriesId, index: usize) -> Cell {
        self.arr_at(varlist, index)
    }

    pub(crate) fn set_var(&mut self, varlist: SeriesId, index: usize, value: Cell) -> Result<(), Error> {
        let stub = self.stub_mut(varlist);
        if stub.info.contains(SeriesInfo::INACCESSIBLE) {
            return Err(ScriptError::Inaccessible.into());
        }
        if stub.info.intersects(SeriesInfo::PROTECTED | SeriesInfo::FROZEN) {
            return Err(AccessError::Protected(String::from("variable")).into());
        }
        match stub.cells_mut().get_mut(index) {
            Some(slot) => {
                *slot = value.fresh();
                Ok(())
            }
            None => Err(ScriptError::OutOfRange(format!("variable {}", index)).into()),
        }
    }

    /// Field of a context by name
    pub(crate) fn context_field(&self, varlist: SeriesId, name: &str) -> Option<Cell> {
        let sym = self.symtab.lookup_by_name(name)?;
        self.find_in_context(varlist, sym).map(|i| self.var(varlist, i))
    }

    pub(crate) fn lib_set(&mut self, name: &str, value: Cell) {
        let sym = self.symtab.get_id(name);
        match self.find_in_context(self.lib, sym) {
            Some(i) => {
                if let Err(e) = self.set_var(self.lib, i, value) {
                    log::warn!("could not set {}: {}", name, e);
                }
            }
            None => {
                if let Err(e) = self.append_to_context(self.lib, sym, value) {
                    log::warn!("could not add {}: {}", name, e);
                }
            }
        }
    }

    pub(crate) fn lib_get(&self, name: &str) -> Cell {
        self.context_field(self.lib, name)
            .unwrap_or_else(Cell::nulled)
    }

    /// Varlist a bound word or array is looked up in
    pub(crate) fn resolve_binding(&self, binding: Binding, specifier: Specifier) -> Option<SeriesId> {
        match binding {
            Binding::Unbound => None,
            Binding::Specific(v) => Some(v),
            Binding::Relative(_) => specifier,
        }
    }

    /// Location of the variable a word refers to
    pub(crate) fn word_location(&self, word: &Cell, specifier: Specifier) -> EvalResult<(SeriesId, usize)> {
        let (sym, index) = match word.payload {
            Payload::Word { sym, index } => (sym, index),
            _ => return Err(ScriptError::BadValue(self.mold(word)).into()),
        };
        let resolved = self.resolve_binding(word.extra, specifier);
        if let (Binding::Relative(paramlist), Some(v)) = (word.extra, resolved) {
            if !self.frame_of_action_p(v, paramlist) {
                log::error!("relative word {} looked up in {:?}", self.sym_name(sym), v);
                return Err(Error::Internal(InternalError::Panic(format!(
                    "relative word {} used in a frame of another action",
                    self.sym_name(sym)
                )))
                .into());
            }
        }
        match resolved {
            Some(v) if index > 0 && index < self.arr_len(v) => Ok((v, index)),
            Some(_) => Err(ScriptError::Unbound(self.sym_name(sym).to_string()).into()),
            None => {
                if let Binding::Relative(_) = word.extra {
                    return Err(Error::Internal(InternalError::Panic(format!(
                        "relative word {} used without a frame",
                        self.sym_name(sym)
                    )))
                    .into());
                }
                Err(ScriptError::Unbound(self.sym_name(sym).to_string()).into())
            }
        }
    }

    /// Whether a varlist's keys are the parameters of the action a body
    /// was relativized against, or of one built on the same underlying
    /// action
    fn frame_of_action_p(&self, varlist: SeriesId, paramlist: SeriesId) -> bool {
        let keylist = match self.keylist_of(varlist) {
            Ok(k) => k,
            Err(_) => return false,
        };
        keylist == paramlist
            || (self.stub(keylist).flags.contains(SeriesFlags::PARAMLIST)
                && self.act_underlying(keylist) == self.act_underlying(paramlist))
    }

    /// Reads the variable behind a word; null if unset
    pub(crate) fn get_var(&self, word: &Cell, specifier: Specifier) -> EvalResult<Cell> {
        let (v, i) = self.word_location(word, specifier)?;
        if self.stub(v).info.contains(SeriesInfo::INACCESSIBLE) {
            return Err(ScriptError::Inaccessible.into());
        }
        Ok(self.var(v, i))
    }

    /// Lookup that reports problems as None, for enfix peeking
    pub(crate) fn try_get_var(&self, word: &Cell, specifier: Specifier) -> Option<Cell> {
        let (v, i) = self.word_location(word, specifier).ok()?;
        if self.stub(v).info.contains(SeriesInfo::INACCESSIBLE) {
            return None;
        }
        Some(self.var(v, i))
    }

    pub(crate) fn set_word_var(&mut self, word: &Cell, specifier: Specifier, value: Cell) -> EvalResult<()> {
        let (v, i) = self.word_location(word, specifier)?;
        self.set_var(v, i, value)?;
        Ok(())
    }

    /// Turns a relative binding into a specific one using the frame specifier
    pub(crate) fn derelativize(&mut self, mut cell: Cell, specifier: Specifier) -> Cell {
        if let Binding::Relative(_) = cell.extra {
            if let Some(v) = specifier {
                // the value may outlive the frame, so it must keep the varlist
                if !self.stub(v).managed_p() {
                    self.manage(v);
                }
                cell.extra = Binding::Specific(v);
            }
        }
        cell
    }

    /// Specifier for the contents of an array cell found under `parent`
    pub(crate) fn derive_specifier(&self, parent: Specifier, array: &Cell) -> Specifier {
        match array.extra {
            Binding::Unbound => None,
            Binding::Specific(v) => Some(v),
            Binding::Relative(_) => parent,
        }
    }

    /// Binds any words of the array (and nested arrays) found in the context
    pub(crate) fn bind_deep(&mut self, array: SeriesId, varlist: SeriesId, add_missing: bool) {
        let len = self.arr_len(array);
        for i in 0..len {
            let cell = self.arr_at(array, i);
            if cell.deep_quoted_p() {
                continue;
            }
            if cell.mirror().any_word_p() {
                if let Some(sym) = cell.as_word() {
                    let index = match self.find_in_context(varlist, sym) {
                        Some(index) => Some(index),
                        None if add_missing => {
                            self.append_to_context(varlist, sym, Cell::nulled()).ok()
                        }
                        None => None,
                    };
                    if let Some(index) = index {
                        let stub = self.stub_mut(array);
                        if let Some(slot) = stub.cells_mut().get_mut(i) {
                            slot.extra = Binding::Specific(varlist);
                            slot.payload = Payload::Word { sym, index };
                        }
                    }
                }
            } else if cell.mirror().any_array_p() {
                if let Some((inner, _)) = cell.as_series() {
                    if inner != array {
                        self.bind_deep(inner, varlist, add_missing);
                    }
                }
            }
        }
    }

    /// Binds only the listed symbols, used for loop variables
    pub(crate) fn bind_syms_deep(&mut self, array: SeriesId, varlist: SeriesId, syms: &[Sym]) {
        let len = self.arr_len(array);
        for i in 0..len {
            let cell = self.arr_at(array, i);
            if cell.deep_quoted_p() {
                continue;
            }
            if cell.mirror().any_word_p() {
                let sym = match cell.as_word() {
                    Some(s) => s,
                    None => continue,
                };
                if !syms.iter().any(|s| self.symtab.same_p(*s, sym)) {
                    continue;
                }
                if let Some(index) = self.find_in_context(varlist, sym) {
                    if let Some(slot) = self.stub_mut(array).cells_mut().get_mut(i) {
                        slot.extra = Binding::Specific(varlist);
                        slot.payload = Payload::Word { sym, index };
                    }
                }
            } else if cell.mirror().any_array_p() {
                if let Some((inner, _)) = cell.as_series() {
                    if inner != array {
                        self.bind_syms_deep(inner, varlist, syms);
                    }
                }
            }
        }
    }

    /// Deep copy of an array whose relative cells become specific
    pub(crate) fn copy_deep_specific(&mut self, array: SeriesId, index: usize, specifier: Specifier) -> SeriesId {
        let cells: Vec<Cell> = self.arr_cells(array).iter().skip(index).copied().collect();
        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            let mut cell = self.derelativize(cell.fresh(), specifier);
            if cell.mirror().any_array_p() && !cell.deep_quoted_p() {
                if let Some((inner, i)) = cell.as_series() {
                    let inner_spec = self.derive_specifier(specifier, &cell);
                    let copy = self.copy_deep_specific(inner, 0, inner_spec);
                    cell.payload = Payload::Series {
                        series: copy,
                        index: i,
                    };
                    cell.extra = Binding::Unbound;
                }
            }
            out.push(cell);
        }
        self.make_array_from(out, true)
    }

    /// Set-words at the top level of a block, in order of first appearance
    pub(crate) fn collect_set_words(&self, array: SeriesId, index: usize) -> Vec<Sym> {
        let mut out: Vec<Sym> = Vec::new();
        for cell in self.arr_cells(array).iter().skip(index) {
            if cell.kind() == Kind::SetWord {
                if let Some(sym) = cell.as_word() {
                    if !out.iter().any(|s| self.symtab.same_p(*s, sym)) {
                        out.push(sym);
                    }
                }
            }
        }
        out
    }

    /// Shallow copy of a context sharing its keylist
    pub(crate) fn copy_context(&mut self, varlist: SeriesId) -> Result<SeriesId, Error> {
        let keylist = self.keylist_of(varlist)?;
        self.stub_mut(keylist).flags.insert(SeriesFlags::KEYLIST_SHARED);

        let kind = self.context_kind(varlist);
        let mut cells: Vec<Cell> = self.arr_cells(varlist).iter().map(|c| c.fresh()).collect();
        let copy = self.make_array_from(Vec::new(), true);
        if let Some(first) = cells.first_mut() {
            *first = Cell::context(kind, copy, None);
        }
        let stub = self.stub_mut(copy);
        stub.content = Content::Cells(cells);
        stub.rest = stub.len();
        stub.flags.insert(SeriesFlags::VARLIST | SeriesFlags::LINK_NODE_NEEDS_MARK);
        stub.link = Link::KeySource(KeySource::Keylist(keylist));
        Ok(copy)
    }

    /// Symbols of a context's visible fields, in order
    pub(crate) fn context_words(&self, varlist: SeriesId) -> Result<Vec<Sym>, Error> {
        let keylist = self.keylist_of(varlist)?;
        Ok((1..self.arr_len(keylist))
            .filter_map(|i| match self.arr_at(keylist, i).payload {
                Payload::Param { sym, flags, .. } if !flags.contains(ParamFlags::HIDDEN) => Some(sym),
                _ => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod context_tests {
    use super::*;
    use crate::ren::interp::InterpConfig;

    #[test]
    fn append_and_find() {
        let mut it = Interp::new(InterpConfig::default());
        let ctx = it.make_context(Kind::Object, 2);
        let a = it.intern("Alpha");
        let i = it.append_to_context(ctx, a, Cell::integer(1)).unwrap();
        assert_eq!(i, 1);
        let lower = it.intern("alpha");
        assert_eq!(it.find_in_context(ctx, lower), Some(1));
        assert_eq!(it.var(ctx, 1).as_integer(), Some(1));
        assert_eq!(it.context_kind(ctx), Kind::Object);
    }

    #[test]
    fn shared_keylists_copy_on_append() {
        let mut it = Interp::new(InterpConfig::default());
        let ctx = it.make_context_with(Kind::Object, &[("a", Cell::integer(1))]);
        let copy = it.copy_context(ctx).unwrap();
        assert_eq!(it.keylist_of(ctx), it.keylist_of(copy));

        let b = it.intern("b");
        it.append_to_context(copy, b, Cell::integer(2)).unwrap();
        assert_ne!(it.keylist_of(ctx), it.keylist_of(copy));
        assert_eq!(it.context_len(ctx), 1);
        assert_eq!(it.context_len(copy), 2);
        assert_eq!(it.context_field(copy, "a").and_then(|c| c.as_integer()), Some(1));
    }

    #[test]
    fn words_resolve_through_bindings() {
        let mut it = Interp::new(InterpConfig::default());
        let ctx = it.make_context_with(Kind::Object, &[("x", Cell::integer(10))]);
        let x = it.intern("x");
        let arr = it.make_array_from(vec![Cell::word(Kind::Word, x)], true);
        it.bind_deep(arr, ctx, false);
        let w = it.arr_at(arr, 0);
        assert_eq!(w.extra, Binding::Specific(ctx));
        assert_eq!(it.get_var(&w, None).unwrap().as_integer(), Some(10));

        let unbound = Cell::word(Kind::Word, it.intern("nowhere"));
        assert!(it.get_var(&unbound, None).is_err());
    }

    #[test]
    fn set_words_are_collected_once() {
        let mut it = Interp::new(InterpConfig::default());
        let arr = it.scan_source("a: 1 b: 2 A: 3 c", None).unwrap();
        let syms = it.collect_set_words(arr, 0);
        let names: Vec<&str> = syms.iter().map(|s| it.sym_name(*s)).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}

#[cfg(test)]
mod relative_tests {
    use super::*;
    use crate::ren::action::Action;
    use crate::ren::error::{Escape, Fault};
    use crate::ren::interp::InterpConfig;

    fn paramlist_of(it: &Interp, name: &str) -> SeriesId {
        let cell = it.lib_get(name);
        Action::from_cell(&cell).map(|a| a.paramlist).unwrap()
    }

    #[test]
    fn relative_words_need_a_frame_of_their_action() {
        let mut it = Interp::new(InterpConfig::default());
        it.do_string("f: func [a] [a] g: func [b c] [b]").unwrap();
        let (fp, gp) = (paramlist_of(&it, "f"), paramlist_of(&it, "g"));

        let f = it.lib_get("f");
        let details = Action::from_cell(&f).map(|a| a.details).unwrap();
        let (body, _) = it.act_detail(details, 0).as_series().unwrap();
        let word = it.arr_at(body, 0);
        assert_eq!(word.extra, Binding::Relative(fp));

        let own = it.acquire_varlist(fp, it.arr_len(fp) - 1, 90);
        let other = it.acquire_varlist(gp, it.arr_len(gp) - 1, 91);
        assert!(it.word_location(&word, Some(own)).is_ok());
        assert!(matches!(
            it.word_location(&word, Some(other)),
            Err(Escape::Fail(Fault {
                error: Error::Internal(InternalError::Panic(_)),
                ..
            }))
        ));
    }

    #[test]
    fn nested_functions_see_outer_arguments() {
        let mut it = Interp::new(InterpConfig::default());
        let r = it
            .do_string("f: func [a] [g: func [x] [a + x] g 1] f 10")
            .unwrap()
            .unwrap();
        assert_eq!(r.as_integer(), Some(11));
        let r = it
            .do_string("h: adapt :f [a: a * 2] h 10")
            .unwrap()
            .unwrap();
        assert_eq!(r.as_integer(), Some(21));
    }
}
