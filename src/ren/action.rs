// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/action.rs

// Actions. An action is a paramlist (archetype plus one typeset cell
// per parameter) and a details array interpreted by its dispatcher.
// Derived actions keep the parameter order of what they derive from,
// so every phase of a call can share one frame.

// <>

use bitflags::bitflags;

use super::cell::{Binding, Cell, CellFlags, ParamClass, ParamFlags, Payload};
use super::error::{Escape, EvalResult, ScriptError};
use super::frame::FrameId;
use super::interp::Interp;
use super::kind::{Kind, Typeset};
use super::node::SeriesId;
use super::series::{Content, Link, Misc, SeriesFlags, Stub};
use super::symtab::Sym;

bitflags! {
    /// Properties cached on a paramlist when the action is made
    #[derive(Default)]
    pub struct ActionFlags: u16 {
        const IS_NATIVE = 1 << 0;
        /// Leaves the caller's output untouched
        const IS_INVISIBLE = 1 << 1;
        /// Gets a definitional RETURN
        const HAS_RETURN = 1 << 2;
        /// First visible parameter is quoted
        const QUOTES_FIRST = 1 << 3;
        /// First visible parameter may be skipped on type mismatch
        const SKIPPABLE_FIRST = 1 << 4;
        /// As enfix, waits for the expression to its left to complete
        const DEFERS_LOOKBACK = 1 << 5;
        /// Result is typechecked against the RETURN parameter
        const RETURN_TYPED = 1 << 6;
        /// Result is always void
        const RETURN_VOID = 1 << 7;
    }
}

/// Implementation routine of an action
pub type Dispatcher = fn(&mut Interp, FrameId) -> EvalResult<Bounce>;

/// What a dispatcher asks the evaluator to do once it returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bounce {
    /// Result is in the frame's output
    Out,
    /// Nothing was produced; the caller's output stands
    Invisible,
    /// Result is in the output, and no enfix may take it
    Immediate,
    /// Run the frame again with its (possibly new) phase
    Redo { checked: bool },
}

/// Paramlist and details of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub paramlist: SeriesId,
    pub details: SeriesId,
}

impl Action {
    pub fn from_cell(cell: &Cell) -> Option<Action> {
        cell.as_action()
            .map(|(paramlist, details)| Action { paramlist, details })
    }

    pub fn cell(self, binding: Binding) -> Cell {
        Cell::action(self.paramlist, self.details, binding)
    }
}

/// How a native is placed relative to its first argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeMode {
    Prefix,
    Enfix,
    /// Enfix which defers to the completed expression on its left
    Defer,
}

/// Parameter list parsed from a spec block, before it becomes a series
#[derive(Debug, Default)]
pub(crate) struct ParsedSpec {
    pub params: Vec<Cell>,
    pub flags: ActionFlags,
    /// Types allowed for the result, when the spec names them
    pub returns: Option<Typeset>,
}

impl Interp {
    /// Parses a spec block: words, quoted and get-words, refinements,
    /// set-word `return:`, type blocks, tags and description text
    pub(crate) fn parse_spec(&mut self, spec: SeriesId, index: usize, definitional: bool) -> EvalResult<ParsedSpec> {
        let cells: Vec<Cell> = self.arr_cells(spec).iter().skip(index).copied().collect();
        let mut out = ParsedSpec::default();
        let mut locals = false;
        let mut in_refinement = false;
        let mut return_sym: Option<Sym> = None;

        let mut i = 0;
        while i < cells.len() {
            let item = cells[i];
            i += 1;

            match item.kind() {
                Kind::Text => continue,
                Kind::Tag => {
                    let tag = self.series_text(&item);
                    match tag.as_str() {
                        "local" => locals = true,
                        "with" | "static" => locals = true,
                        _ => return Err(ScriptError::BadSpec(format!("<{}>", tag)).into()),
                    }
                    continue;
                }
                Kind::Block => {
                    return Err(ScriptError::BadSpec(String::from("type block without parameter")).into())
                }
                _ => {}
            }

            let sym = match item.as_word() {
                Some(sym) => sym,
                None => return Err(ScriptError::BadSpec(self.mold(&item)).into()),
            };

            // set-word return: takes the type block of the result
            if item.kind() == Kind::SetWord {
                if self.sym_name(self.symtab.canon(sym)) != "return" {
                    return Err(ScriptError::BadSpec(self.mold(&item)).into());
                }
                let mut types = Typeset::ANY_VALUE.with(Kind::Nulled);
                if i < cells.len() && cells[i].kind() == Kind::Block {
                    let (ts, _, tags) = self.parse_type_block(&cells[i])?;
                    i += 1;
                    if ts == Typeset::NONE && tags.is_empty() {
                        out.flags.insert(ActionFlags::IS_INVISIBLE);
                    } else if tags.iter().any(|t| t == "void") {
                        out.flags.insert(ActionFlags::RETURN_VOID);
                    } else {
                        out.flags.insert(ActionFlags::RETURN_TYPED);
                        types = ts;
                    }
                }
                out.returns = Some(types);
                return_sym = Some(sym);
                continue;
            }

            let (class, mut types, mut pflags) = if locals {
                (ParamClass::Local, Typeset::ANY_VALUE.with(Kind::Nulled), ParamFlags::empty())
            } else {
                match item.kind() {
                    Kind::Word => (ParamClass::Normal, Typeset::ANY_VALUE, ParamFlags::empty()),
                    Kind::GetWord => (ParamClass::SoftQuote, Typeset::ANY_VALUE, ParamFlags::empty()),
                    Kind::Refinement => {
                        in_refinement = true;
                        (
                            ParamClass::Refinement,
                            Typeset::of(Kind::Logic).with(Kind::Nulled),
                            ParamFlags::empty(),
                        )
                    }
                    Kind::Quoted if item.mirror() == Kind::Word && item.inline_quotes() == 1 => {
                        (ParamClass::HardQuote, Typeset::ANY_VALUE, ParamFlags::empty())
                    }
                    _ => return Err(ScriptError::BadSpec(self.mold(&item)).into()),
                }
            };
            let mut class = class;

            if class != ParamClass::Refinement
                && class != ParamClass::Local
                && i < cells.len()
                && cells[i].kind() == Kind::Block
            {
                let (ts, extra, tags) = self.parse_type_block(&cells[i])?;
                i += 1;
                types = ts;
                pflags |= extra;
                if tags.iter().any(|t| t == "tight") && class == ParamClass::Normal {
                    class = ParamClass::Tight;
                }
                if pflags.contains(ParamFlags::SKIPPABLE) && class != ParamClass::HardQuote {
                    return Err(ScriptError::BadSpec(String::from("<skip> needs a quoted parameter")).into());
                }
            }

            // refinement arguments may be null when the refinement is unused
            if in_refinement && class != ParamClass::Refinement && class != ParamClass::Local {
                types = types.with(Kind::Nulled);
            }

            if self.spec_has_p(&out.params, sym) {
                return Err(ScriptError::DupVars(self.sym_name(sym).to_string()).into());
            }
            out.params.push(Cell::param(sym, class, types, pflags));
        }

        if definitional {
            let sym = match return_sym {
                Some(s) => s,
                None => self.intern("return"),
            };
            if self.spec_has_p(&out.params, sym) {
                return Err(ScriptError::DupVars(self.sym_name(sym).to_string()).into());
            }
            let types = out.returns.unwrap_or(Typeset::ANY_VALUE.with(Kind::Nulled));
            out.params.push(Cell::param(sym, ParamClass::Return, types, ParamFlags::empty()));
            out.flags.insert(ActionFlags::HAS_RETURN);
        }

        Ok(out)
    }

    fn spec_has_p(&self, params: &[Cell], sym: Sym) -> bool {
        params.iter().any(|p| match p.as_param() {
            Some((s, ..)) => self.symtab.same_p(s, sym),
            None => false,
        })
    }

    /// Reads a type block into a typeset, parameter flags and tag names
    fn parse_type_block(&mut self, block: &Cell) -> EvalResult<(Typeset, ParamFlags, Vec<String>)> {
        let (series, index) = match block.as_series() {
            Some(s) => s,
            None => return Err(ScriptError::BadSpec(self.mold(block)).into()),
        };
        let mut types = Typeset::NONE;
        let mut flags = ParamFlags::empty();
        let mut tags = Vec::new();

        let cells: Vec<Cell> = self.arr_cells(series).iter().skip(index).copied().collect();
        for cell in cells {
            match cell.kind() {
                Kind::Word => {
                    let name = match cell.as_word() {
                        Some(sym) => self.sym_name(sym).to_string(),
                        None => continue,
                    };
                    if let Some(k) = Kind::from_name(&name) {
                        types = types.with(k);
                    } else if let Some(ts) = Typeset::from_name(&name) {
                        types = types.union(ts);
                    } else {
                        return Err(ScriptError::BadSpec(name).into());
                    }
                }
                Kind::Tag => {
                    let tag = self.series_text(&cell);
                    match tag.as_str() {
                        "opt" => types = types.with(Kind::Nulled),
                        "end" => flags.insert(ParamFlags::ENDABLE),
                        "skip" => flags.insert(ParamFlags::SKIPPABLE),
                        "blank" => {
                            flags.insert(ParamFlags::NOOP_IF_BLANK);
                            types = types.with(Kind::Blank);
                        }
                        "void" | "tight" => {}
                        _ => return Err(ScriptError::BadSpec(format!("<{}>", tag)).into()),
                    }
                    tags.push(tag);
                }
                Kind::Text => {}
                _ => return Err(ScriptError::BadSpec(self.mold(&cell)).into()),
            }
        }

        if flags.contains(ParamFlags::ENDABLE) {
            types = types.with(Kind::Nulled);
        }

        Ok((types, flags, tags))
    }

    /// Makes an action from parameter cells, a details array and a dispatcher
    pub(crate) fn make_action(
        &mut self,
        params: Vec<Cell>,
        mut flags: ActionFlags,
        dispatcher: Dispatcher,
        details: Vec<Cell>,
        underlying: Option<SeriesId>,
        exemplar: Option<SeriesId>,
    ) -> Action {
        flags |= first_param_flags(&params);

        let mut cells = Vec::with_capacity(params.len() + 1);
        cells.push(Cell::blank());
        cells.extend(params);
        let paramlist = self.alloc_series(Stub::new(
            Content::Cells(cells),
            SeriesFlags::MANAGED | SeriesFlags::PARAMLIST | SeriesFlags::LINK_NODE_NEEDS_MARK,
        ));

        let details = self.alloc_series(Stub::new(
            Content::Cells(details),
            SeriesFlags::MANAGED | SeriesFlags::DETAILS | SeriesFlags::LINK_NODE_NEEDS_MARK,
        ));

        {
            let stub = self.stub_mut(paramlist);
            stub.link = Link::Underlying(underlying.unwrap_or(paramlist));
            stub.misc = Misc::Action(flags);
            if let Content::Cells(v) = &mut stub.content {
                v[0] = Cell::action(paramlist, details, Binding::Unbound);
            }
        }
        {
            let stub = self.stub_mut(details);
            stub.link = Link::Exemplar(exemplar);
            stub.misc = Misc::Dispatcher(dispatcher);
        }

        Action { paramlist, details }
    }

    #[inline(always)]
    pub(crate) fn act_flags(&self, paramlist: SeriesId) -> ActionFlags {
        match self.stub(paramlist).misc {
            Misc::Action(flags) => flags,
            _ => ActionFlags::empty(),
        }
    }

    pub(crate) fn act_flags_of(&self, cell: &Cell) -> ActionFlags {
        match cell.as_action() {
            Some((paramlist, _)) => self.act_flags(paramlist),
            None => ActionFlags::empty(),
        }
    }

    pub(crate) fn set_act_flags(&mut self, paramlist: SeriesId, flags: ActionFlags) {
        self.stub_mut(paramlist).misc = Misc::Action(flags);
    }

    pub(crate) fn act_dispatcher(&self, details: SeriesId) -> Option<Dispatcher> {
        match self.stub(details).misc {
            Misc::Dispatcher(d) => Some(d),
            _ => None,
        }
    }

    pub(crate) fn act_underlying(&self, paramlist: SeriesId) -> SeriesId {
        match self.stub(paramlist).link {
            Link::Underlying(u) => u,
            _ => paramlist,
        }
    }

    pub(crate) fn act_exemplar(&self, details: SeriesId) -> Option<SeriesId> {
        match self.stub(details).link {
            Link::Exemplar(e) => e,
            _ => None,
        }
    }

    pub(crate) fn act_num_params(&self, paramlist: SeriesId) -> usize {
        self.arr_len(paramlist).saturating_sub(1)
    }

    pub(crate) fn act_param(&self, paramlist: SeriesId, index: usize) -> (Sym, ParamClass, Typeset, ParamFlags) {
        match self.arr_at(paramlist, index).as_param() {
            Some(p) => p,
            None => panic!("{:?} has no parameter {}", paramlist, index),
        }
    }

    /// Details array cell at an index
    pub(crate) fn act_detail(&self, details: SeriesId, index: usize) -> Cell {
        self.arr_at(details, index)
    }

    /// Index of a parameter by name
    pub(crate) fn find_param(&self, paramlist: SeriesId, sym: Sym) -> Option<usize> {
        self.find_key(paramlist, sym)
    }

    /// Actions are the same if they share a paramlist
    pub(crate) fn same_action_p(&self, a: &Cell, b: &Cell) -> bool {
        match (a.as_action(), b.as_action()) {
            (Some((pa, _)), Some((pb, _))) => pa == pb,
            _ => false,
        }
    }

    /// Copy of an action value marked to take its first argument from the left
    pub(crate) fn enfixed(&self, action: Cell) -> Cell {
        action.with_flags(CellFlags::ENFIXED)
    }

    /// The RETURN to place in a frame, bound to that frame
    pub(crate) fn make_return(&self, varlist: SeriesId) -> Cell {
        let mut r = self.builtins.return_.fresh();
        r.flags.remove(CellFlags::ENFIXED);
        r.extra = Binding::Specific(varlist);
        r
    }

    /// Copies parameter cells, optionally changing each one
    pub(crate) fn copy_params(&self, paramlist: SeriesId, mut adjust: impl FnMut(Cell) -> Cell) -> Vec<Cell> {
        self.arr_cells(paramlist)
            .iter()
            .skip(1)
            .map(|c| adjust(*c))
            .collect()
    }

    /// First parameter which callers see, with its index
    pub(crate) fn first_visible_param(&self, paramlist: SeriesId) -> Option<(usize, ParamClass, Typeset, ParamFlags)> {
        (1..=self.act_num_params(paramlist)).find_map(|i| {
            let (_, class, types, flags) = self.act_param(paramlist, i);
            if flags.contains(ParamFlags::HIDDEN) {
                return None;
            }
            match class {
                ParamClass::Local | ParamClass::Return => None,
                _ => Some((i, class, types, flags)),
            }
        })
    }
}

impl Interp {
    /// Makes the native actions and sets them in the library context
    pub(crate) fn register_natives(&mut self) {
        let tables = [
            super::throw::THROW_NATIVES,
            super::control::CONTROL_NATIVES,
            super::loops::LOOP_NATIVES,
            super::function::FUNCTION_NATIVES,
            super::stdenv::STD_NATIVES,
            super::device::PORT_NATIVES,
        ];
        for table in tables {
            for (name, spec, mode, dispatcher) in table.iter() {
                self.make_native(name, spec, *mode, *dispatcher);
            }
        }
    }

    fn make_native(&mut self, name: &str, spec: &str, mode: NativeMode, dispatcher: Dispatcher) {
        let parsed = match self
            .scan_source(spec, None)
            .map_err(Escape::from)
            .and_then(|arr| self.parse_spec(arr, 0, false))
        {
            Ok(p) => p,
            Err(e) => panic!("bad spec for native {}: {}", name, e),
        };

        let mut flags = parsed.flags | ActionFlags::IS_NATIVE;
        if mode == NativeMode::Defer {
            flags |= ActionFlags::DEFERS_LOOKBACK;
        }
        let act = self.make_action(parsed.params, flags, dispatcher, Vec::new(), None, None);
        let mut cell = act.cell(Binding::Unbound);
        if mode != NativeMode::Prefix {
            cell = self.enfixed(cell);
        }

        if cfg!(feature = "memdbg") {
            log::trace!("native {} at {:?}", name, act.paramlist);
        }

        self.natives.push(cell);
        self.lib_set(name, cell);
    }

    /// Writes a dispatcher's result
    #[inline(always)]
    pub(crate) fn ret(&mut self, f: FrameId, value: Cell) -> EvalResult<Bounce> {
        self.frames[f].out = value;
        Ok(Bounce::Out)
    }
}

/// Flags implied by the first visible parameter
fn first_param_flags(params: &[Cell]) -> ActionFlags {
    let first = params.iter().find_map(|p| match p.payload {
        Payload::Param { class, flags, .. } if !flags.contains(ParamFlags::HIDDEN) => match class {
            ParamClass::Local | ParamClass::Return => None,
            _ => Some((class, flags)),
        },
        _ => None,
    });

    match first {
        Some((ParamClass::HardQuote, flags)) | Some((ParamClass::SoftQuote, flags)) => {
            if flags.contains(ParamFlags::SKIPPABLE) {
                ActionFlags::QUOTES_FIRST | ActionFlags::SKIPPABLE_FIRST
            } else {
                ActionFlags::QUOTES_FIRST
            }
        }
        _ => ActionFlags::empty(),
    }
}

#[cfg(test)]
mod action_tests {
    use super::*;
    use crate::ren::interp::InterpConfig;

    fn spec(it: &mut Interp, text: &str, definitional: bool) -> EvalResult<ParsedSpec> {
        let arr = it.scan_source(text, None).unwrap();
        it.parse_spec(arr, 0, definitional)
    }

    #[test]
    fn parses_parameter_classes() {
        let mut it = Interp::new(InterpConfig::default());
        let parsed = spec(&mut it, "a 'b :c /d e [integer!] <local> f", true).unwrap();
        let classes: Vec<ParamClass> = parsed.params.iter().map(|p| p.as_param().unwrap().1).collect();
        assert_eq!(
            classes,
            vec![
                ParamClass::Normal,
                ParamClass::HardQuote,
                ParamClass::SoftQuote,
                ParamClass::Refinement,
                ParamClass::Normal,
                ParamClass::Local,
                ParamClass::Return,
            ]
        );
        let (_, _, e_types, _) = parsed.params[4].as_param().unwrap();
        assert!(e_types.contains(Kind::Integer));
        assert!(e_types.contains(Kind::Nulled));
        assert!(!e_types.contains(Kind::Text));
        assert!(parsed.flags.contains(ActionFlags::HAS_RETURN));
    }

    #[test]
    fn return_specs() {
        let mut it = Interp::new(InterpConfig::default());
        assert!(spec(&mut it, "return: [] x", true)
            .unwrap()
            .flags
            .contains(ActionFlags::IS_INVISIBLE));
        assert!(spec(&mut it, "return: <void> x", true).is_err());
        assert!(spec(&mut it, "return: [<void>] x", true)
            .unwrap()
            .flags
            .contains(ActionFlags::RETURN_VOID));
        let typed = spec(&mut it, "return: [integer!]", true).unwrap();
        assert!(typed.flags.contains(ActionFlags::RETURN_TYPED));
        assert_eq!(typed.returns, Some(Typeset::of(Kind::Integer)));
    }

    #[test]
    fn rejects_duplicates_and_junk() {
        let mut it = Interp::new(InterpConfig::default());
        assert!(matches!(
            spec(&mut it, "a b A", false),
            Err(crate::ren::error::Escape::Fail(_))
        ));
        assert!(spec(&mut it, "a [no-such-type!]", false).is_err());
        assert!(spec(&mut it, "a [<skip> integer!]", false).is_err());
        assert!(spec(&mut it, "'a [<skip> integer!]", false).is_ok());
    }

    #[test]
    fn quoting_first_is_cached() {
        let mut it = Interp::new(InterpConfig::default());
        let parsed = spec(&mut it, "'target [<skip> set-word!] branch", false).unwrap();
        fn nothing(_: &mut Interp, _: FrameId) -> EvalResult<Bounce> {
            Ok(Bounce::Out)
        }
        let act = it.make_action(parsed.params, parsed.flags, nothing, vec![], None, None);
        let flags = it.act_flags(act.paramlist);
        assert!(flags.contains(ActionFlags::QUOTES_FIRST | ActionFlags::SKIPPABLE_FIRST));
        assert_eq!(it.act_num_params(act.paramlist), 2);
        assert_eq!(it.act_underlying(act.paramlist), act.paramlist);
    }
}

#[cfg(test)]
mod spec_tag_tests {
    use super::*;
    use crate::ren::interp::InterpConfig;

    #[test]
    fn tags_are_read_without_brackets() {
        let mut it = Interp::new(InterpConfig::default());
        let arr = it.scan_source("x [<opt> <end> integer!] /y <local> z", None).unwrap();
        let parsed = it.parse_spec(arr, 0, false).unwrap();
        let (_, class, types, flags) = parsed.params[0].as_param().unwrap();
        assert_eq!(class, ParamClass::Normal);
        assert!(types.contains(Kind::Nulled));
        assert!(flags.contains(ParamFlags::ENDABLE));
        assert_eq!(parsed.params[2].as_param().unwrap().1, ParamClass::Local);

        let arr = it.scan_source("a [<tight> integer!] 'b [<skip> word!] c [<blank> block!]", None).unwrap();
        let parsed = it.parse_spec(arr, 0, false).unwrap();
        assert_eq!(parsed.params[0].as_param().unwrap().1, ParamClass::Tight);
        assert!(parsed.params[1].as_param().unwrap().3.contains(ParamFlags::SKIPPABLE));
        assert!(parsed.params[2].as_param().unwrap().3.contains(ParamFlags::NOOP_IF_BLANK));

        let arr = it.scan_source("a [<bogus> integer!]", None).unwrap();
        assert!(it.parse_spec(arr, 0, false).is_err());
    }

    #[test]
    fn every_native_is_registered_at_boot() {
        let it = Interp::new(InterpConfig::default());
        for name in ["return", "case", "switch", "default", "for", "append", "open", "catch"] {
            assert!(it.lib_get(name).action_p(), "{} is not an action", name);
        }
        assert!(!it.natives.is_empty());
    }
}
