// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/symtab.rs

// A table to associate symbol names with efficient internal IDs.
// Every spelling gets its own ID; each ID also knows its canon, the
// ID of the lowercased spelling, so lookups can ignore case.

// <>

use std::collections::HashMap;
use std::fmt;

/// Interned symbol identifier
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sym(pub u32);

impl fmt::Debug for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}", self.0)
    }
}

struct SymEntry {
    name: Box<str>,
    canon: u32,
}

pub struct SymbolTable {
    id_to_nm: Vec<SymEntry>,
    nm_to_id: HashMap<Box<str>, u32>,
}

impl SymbolTable {
    pub fn new(approx_cap: usize) -> Self {
        Self {
            id_to_nm: Vec::with_capacity(approx_cap),
            nm_to_id: HashMap::with_capacity(approx_cap),
        }
    }

    /// Returns the ID for a spelling, interning it if necessary
    pub fn get_id(&mut self, name: &str) -> Sym {
        if let Some(id) = self.nm_to_id.get(name) {
            return Sym(*id);
        }

        let lower = name.to_lowercase();
        let canon = if lower == name {
            self.id_to_nm.len() as u32
        } else {
            self.get_id(&lower).0
        };

        let id = self.id_to_nm.len() as u32;
        self.id_to_nm.push(SymEntry {
            name: name.into(),
            canon,
        });
        self.nm_to_id.insert(name.into(), id);

        id_debug(id, name);

        Sym(id)
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<Sym> {
        self.nm_to_id.get(name).map(|id| Sym(*id))
    }

    pub fn lookup_by_id(&self, sym: Sym) -> Option<&str> {
        self.id_to_nm.get(sym.0 as usize).map(|e| &*e.name)
    }

    /// Spelling of a symbol; unknown IDs spell as the empty string
    #[inline(always)]
    pub fn name(&self, sym: Sym) -> &str {
        self.lookup_by_id(sym).unwrap_or("")
    }

    /// Case-folded identity of a symbol
    #[inline(always)]
    pub fn canon(&self, sym: Sym) -> Sym {
        self.id_to_nm
            .get(sym.0 as usize)
            .map(|e| Sym(e.canon))
            .unwrap_or(sym)
    }

    /// Whether two spellings name the same word
    #[inline(always)]
    pub fn same_p(&self, a: Sym, b: Sym) -> bool {
        a == b || self.canon(a) == self.canon(b)
    }

    pub fn len(&self) -> usize {
        self.id_to_nm.len()
    }
}

fn id_debug(id: u32, name: &str) {
    if cfg!(feature = "memdbg") {
        log::trace!("interned {} as {}", name, id);
    }
}

#[cfg(test)]
mod symtab_tests {
    use super::*;

    #[test]
    fn manysym() {
        let mut tab = SymbolTable::new(100);

        // generates symbols a00 - z99
        let mut acc = String::new();
        for i in 0..2600u32 {
            acc.push((i / 100 + 97) as u8 as char);
            acc.push(((i % 100) / 10 + 48) as u8 as char);
            acc.push(((i % 10) + 48) as u8 as char);

            let id = tab.get_id(&acc);

            acc.clear();

            assert_eq!(id, Sym(i));
        }

        assert_eq!(Some("m13"), tab.lookup_by_id(Sym(1213)));
        assert_eq!(Some(Sym(692)), tab.lookup_by_name("g92"));
        assert_eq!(None, tab.lookup_by_name("g920"));
    }

    #[test]
    fn canon_ignores_case() {
        let mut tab = SymbolTable::new(8);

        let upper = tab.get_id("Foo");
        let lower = tab.lookup_by_name("foo").unwrap();
        assert_ne!(upper, lower);
        assert_eq!(tab.canon(upper), lower);
        assert_eq!(tab.canon(lower), lower);
        let shout = tab.get_id("FOO");
        assert!(tab.same_p(upper, shout));
        assert_eq!(tab.name(upper), "Foo");
        assert_eq!(tab.len(), 3);
    }
}
