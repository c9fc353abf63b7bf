// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/kind.rs

// Datatype kinds and the typesets which parameters check against.

// <>

enum_and_tryfrom! {
    /// Datatype of a cell, stored in the low six bits of its kind byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    #[repr(u8)]
    pub enum Kind {
        /// Array terminator; never a user-visible value
        End = 0,
        /// The absence of a value, as stored in a variable or slot
        Nulled,
        Void,
        Blank,
        Logic,
        Integer,
        Decimal,
        Char,
        Datatype,
        Typeset,
        Handle,
        Event,
        Text,
        Binary,
        Tag,
        Block,
        Group,
        Path,
        SetPath,
        GetPath,
        Word,
        SetWord,
        GetWord,
        Refinement,
        Action,
        Object,
        Frame,
        Error,
        Port,
        /// Wrapper for quote levels the kind byte cannot encode
        Quoted,
    }
}

/// Every kind, in discriminant order
pub const ALL_KINDS: [Kind; 30] = [
    Kind::End,
    Kind::Nulled,
    Kind::Void,
    Kind::Blank,
    Kind::Logic,
    Kind::Integer,
    Kind::Decimal,
    Kind::Char,
    Kind::Datatype,
    Kind::Typeset,
    Kind::Handle,
    Kind::Event,
    Kind::Text,
    Kind::Binary,
    Kind::Tag,
    Kind::Block,
    Kind::Group,
    Kind::Path,
    Kind::SetPath,
    Kind::GetPath,
    Kind::Word,
    Kind::SetWord,
    Kind::GetWord,
    Kind::Refinement,
    Kind::Action,
    Kind::Object,
    Kind::Frame,
    Kind::Error,
    Kind::Port,
    Kind::Quoted,
];

/// Quote levels are packed above the kind in multiples of this
pub const QUOTE_SHIFT: u8 = 64;

impl Kind {
    /// Name of the datatype as seen by user code, e.g. `integer!`
    pub fn name(self) -> &'static str {
        match self {
            Kind::End => "end!",
            Kind::Nulled => "null",
            Kind::Void => "void!",
            Kind::Blank => "blank!",
            Kind::Logic => "logic!",
            Kind::Integer => "integer!",
            Kind::Decimal => "decimal!",
            Kind::Char => "char!",
            Kind::Datatype => "datatype!",
            Kind::Typeset => "typeset!",
            Kind::Handle => "handle!",
            Kind::Event => "event!",
            Kind::Text => "text!",
            Kind::Binary => "binary!",
            Kind::Tag => "tag!",
            Kind::Block => "block!",
            Kind::Group => "group!",
            Kind::Path => "path!",
            Kind::SetPath => "set-path!",
            Kind::GetPath => "get-path!",
            Kind::Word => "word!",
            Kind::SetWord => "set-word!",
            Kind::GetWord => "get-word!",
            Kind::Refinement => "refinement!",
            Kind::Action => "action!",
            Kind::Object => "object!",
            Kind::Frame => "frame!",
            Kind::Error => "error!",
            Kind::Port => "port!",
            Kind::Quoted => "quoted!",
        }
    }

    pub fn from_name(name: &str) -> Option<Kind> {
        ALL_KINDS
            .iter()
            .skip(2)
            .find(|k| k.name().eq_ignore_ascii_case(name))
            .copied()
    }

    #[inline(always)]
    pub fn any_array_p(self) -> bool {
        matches!(
            self,
            Kind::Block | Kind::Group | Kind::Path | Kind::SetPath | Kind::GetPath
        )
    }

    #[inline(always)]
    pub fn any_path_p(self) -> bool {
        matches!(self, Kind::Path | Kind::SetPath | Kind::GetPath)
    }

    #[inline(always)]
    pub fn any_string_p(self) -> bool {
        matches!(self, Kind::Text | Kind::Tag)
    }

    #[inline(always)]
    pub fn any_series_p(self) -> bool {
        self.any_array_p() || self.any_string_p() || self == Kind::Binary
    }

    #[inline(always)]
    pub fn any_word_p(self) -> bool {
        matches!(
            self,
            Kind::Word | Kind::SetWord | Kind::GetWord | Kind::Refinement
        )
    }

    #[inline(always)]
    pub fn any_context_p(self) -> bool {
        matches!(self, Kind::Object | Kind::Frame | Kind::Error | Kind::Port)
    }

    #[inline(always)]
    pub fn any_number_p(self) -> bool {
        matches!(self, Kind::Integer | Kind::Decimal)
    }

    /// Kinds whose cells carry a binding in their extra field
    #[inline(always)]
    pub fn bindable_p(self) -> bool {
        self.any_word_p() || self.any_array_p() || self == Kind::Action
    }

    /// Kinds which evaluate to themselves
    pub fn inert_p(self) -> bool {
        !matches!(
            self,
            Kind::Group
                | Kind::Path
                | Kind::SetPath
                | Kind::GetPath
                | Kind::Word
                | Kind::SetWord
                | Kind::GetWord
                | Kind::Action
                | Kind::Quoted
                | Kind::End
                | Kind::Nulled
        )
    }
}

/// Set of kinds, one bit per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Typeset(pub u64);

impl Typeset {
    pub const NONE: Typeset = Typeset(0);

    /// All kinds a variable may hold except null
    pub const ANY_VALUE: Typeset = Typeset(!0 & !(1 << Kind::End as u8) & !(1 << Kind::Nulled as u8));

    #[inline(always)]
    pub const fn of(kind: Kind) -> Typeset {
        Typeset(1 << kind as u8)
    }

    #[inline(always)]
    pub const fn with(self, kind: Kind) -> Typeset {
        Typeset(self.0 | (1 << kind as u8))
    }

    #[inline(always)]
    pub const fn union(self, other: Typeset) -> Typeset {
        Typeset(self.0 | other.0)
    }

    #[inline(always)]
    pub fn contains(self, kind: Kind) -> bool {
        self.0 & (1 << kind as u8) != 0
    }

    pub fn from_kinds(kinds: &[Kind]) -> Typeset {
        kinds.iter().fold(Typeset::NONE, |ts, k| ts.with(*k))
    }

    pub fn kinds(self) -> impl Iterator<Item = Kind> {
        ALL_KINDS.into_iter().filter(move |k| self.contains(*k))
    }

    /// Looks up the builtin pseudo-types such as `any-series!`
    pub fn from_name(name: &str) -> Option<Typeset> {
        let pred: fn(&Kind) -> bool = match name.to_ascii_lowercase().as_str() {
            "any-value!" => return Some(Typeset::ANY_VALUE),
            "any-array!" => |k| k.any_array_p(),
            "any-series!" => |k| k.any_series_p(),
            "any-string!" => |k| k.any_string_p(),
            "any-word!" => |k| k.any_word_p(),
            "any-path!" => |k| k.any_path_p(),
            "any-context!" => |k| k.any_context_p(),
            "any-number!" => |k| k.any_number_p(),
            _ => return None,
        };

        Some(Typeset(
            ALL_KINDS
                .iter()
                .filter(|k| pred(k))
                .fold(0, |acc, k| acc | (1 << *k as u8)),
        ))
    }
}

#[cfg(test)]
mod kind_tests {
    use super::*;
    use std::convert::TryFrom;

    #[test]
    fn byte_roundtrip() {
        for k in ALL_KINDS {
            assert_eq!(Kind::try_from(k as u8), Ok(k));
        }
        assert!(Kind::try_from(QUOTE_SHIFT - 1).is_err());
    }

    #[test]
    fn kinds_fit_below_quote_shift() {
        assert!((Kind::Quoted as u8) < QUOTE_SHIFT);
    }

    #[test]
    fn names() {
        assert_eq!(Kind::from_name("integer!"), Some(Kind::Integer));
        assert_eq!(Kind::from_name("SET-WORD!"), Some(Kind::SetWord));
        assert_eq!(Kind::from_name("end!"), None);
        assert_eq!(Kind::from_name("integer"), None);
    }

    #[test]
    fn typesets() {
        let ts = Typeset::of(Kind::Block).with(Kind::Action);
        assert!(ts.contains(Kind::Block));
        assert!(!ts.contains(Kind::Group));
        assert!(!Typeset::ANY_VALUE.contains(Kind::Nulled));
        assert!(Typeset::ANY_VALUE.contains(Kind::Void));

        let series = Typeset::from_name("any-series!").unwrap();
        assert!(series.contains(Kind::Text));
        assert!(series.contains(Kind::GetPath));
        assert!(!series.contains(Kind::Word));
        assert_eq!(series.kinds().count(), 8);
    }
}
