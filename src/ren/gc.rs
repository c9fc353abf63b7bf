// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/gc.rs

// Stop-the-world mark and sweep over the series and pair pools. Roots
// are the interpreter's stacks and tables; marking goes through a
// queue rather than recursion. Managed series nothing reached are
// freed, unmanaged ones belong to Rust code and stay.

// <>

use std::collections::HashSet;

use super::cell::{Binding, Cell, Payload};
use super::interp::{Guard, Interp};
use super::node::{PairId, SeriesId};
use super::series::{Content, KeySource, Link, Misc, SeriesFlags};

/// Collector bookkeeping
#[derive(Debug)]
pub(crate) struct GcState {
    /// Automatic and requested collections wait until re-enabled
    pub disabled: bool,
    /// A collection was asked for and runs at the next safe point
    pub pending: bool,
    /// Guards against a collection starting inside another
    active: bool,
    ballast: usize,
    /// Units left to allocate before a collection is requested
    depletion: isize,
    pub recycles: u64,
}

impl GcState {
    pub fn new(ballast: usize, disabled: bool) -> Self {
        Self {
            disabled,
            pending: false,
            active: false,
            ballast,
            depletion: ballast as isize,
            recycles: 0,
        }
    }
}

/// Nodes freed by one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Recycled {
    pub series: usize,
    pub pairs: usize,
}

/// Mark state of one collection
struct Marker {
    queue: Vec<SeriesId>,
    pairs: HashSet<u32>,
}

impl Interp {
    /// Counts an allocation against the ballast, requesting a
    /// collection once it runs out
    pub(crate) fn charge_ballast(&mut self, units: usize) {
        self.gc.depletion -= units as isize;
        if self.gc.depletion <= 0 && !self.gc.pending {
            self.gc.pending = true;
            if cfg!(feature = "memdbg") {
                log::trace!("ballast exhausted; collection pending");
            }
        }
    }

    /// Disables or re-enables collection, returning the previous setting
    pub fn set_gc_disabled(&mut self, disabled: bool) -> bool {
        std::mem::replace(&mut self.gc.disabled, disabled)
    }

    /// Runs a full collection now, unless collection is disabled or one
    /// is already running; then it is left pending
    pub fn recycle(&mut self) -> Recycled {
        if self.gc.disabled || self.gc.active {
            self.gc.pending = true;
            return Recycled::default();
        }
        self.gc.active = true;

        let mut marker = Marker {
            queue: Vec::with_capacity(256),
            pairs: HashSet::new(),
        };
        self.mark_roots(&mut marker);
        self.propagate(&mut marker);
        let freed = self.sweep(&marker);

        if cfg!(feature = "memdbg") {
            self.verify_pools();
        }

        self.gc.recycles += 1;
        self.gc.pending = false;
        self.gc.depletion = self.gc.ballast as isize;
        self.gc.active = false;

        log::debug!(
            "recycle {}: freed {} series and {} pairs, {} series and {} pairs live",
            self.gc.recycles,
            freed.series,
            freed.pairs,
            self.series.live(),
            self.pairs.live()
        );
        freed
    }

    fn mark_roots(&mut self, m: &mut Marker) {
        self.reify_variadic_feeds();

        for id in [self.lib, self.system_port, self.empty_array] {
            m.queue_root(id);
        }
        let b = self.builtins;
        let mut cells: Vec<Cell> = self.natives.clone();
        cells.extend([b.return_, b.break_, b.continue_, b.unwind, b.halt, b.quit, b.stop]);
        cells.extend(self.ds.iter().skip(1).copied());
        cells.push(self.thrown.label);
        cells.push(self.thrown.arg);

        for guard in &self.guarded {
            match guard {
                Guard::Series(id) => m.queue_root(*id),
                Guard::Cell(c) => cells.push(*c),
            }
        }

        for frame in &self.frames {
            cells.push(frame.out);
            cells.push(frame.spare);
            if let Binding::Specific(v) | Binding::Relative(v) = frame.binding {
                m.queue_root(v);
            }
            for act in [frame.original, frame.phase].into_iter().flatten() {
                m.queue_root(act.paramlist);
                m.queue_root(act.details);
            }
            // varlists of running frames are unmanaged, but still roots
            for id in [frame.varlist, frame.special].into_iter().flatten() {
                m.queue_root(id);
            }
        }

        for feed in &self.feeds {
            m.queue_root(feed.array);
            if let Some(s) = feed.specifier {
                m.queue_root(s);
            }
            cells.push(feed.current);
            if let Some(g) = feed.gotten {
                cells.push(g);
            }
        }

        if let Some(ctx) = self.fault_in_flight {
            m.queue_root(ctx);
        }
        for p in &self.promises {
            m.queue_root(p.code);
        }
        for cell in self.promise_results.values().flatten().flatten() {
            cells.push(*cell);
        }
        for id in self.devices.roots() {
            m.queue_root(id);
        }

        // API handles, and whatever Rust code holds in unmanaged series;
        // handles whose owning frame has ended are freed, not marked
        let mut expired = Vec::new();
        for raw in self.series.live_ids() {
            let stub = self.stub(SeriesId(raw));
            if stub.flags.contains(SeriesFlags::ROOT) {
                match stub.link {
                    Link::Owner(serial) if serial != 0 && !self.frame_alive_p(serial) => {
                        expired.push(SeriesId(raw));
                    }
                    _ => m.queue_root(SeriesId(raw)),
                }
            } else if !stub.managed_p() {
                m.queue_root(SeriesId(raw));
            }
        }
        for id in expired {
            log::trace!("freeing API handle {:?} of an ended frame", id);
            self.free_series(id);
        }

        let queued = std::mem::take(&mut m.queue);
        for id in queued {
            self.mark_series(m, id);
        }
        for cell in cells {
            self.mark_cell(m, &cell);
        }
    }

    /// Sets the mark on a series and queues its contents
    fn mark_series(&mut self, m: &mut Marker, id: SeriesId) {
        let stub = match self.series.get_mut(id.0) {
            Some(s) => s,
            None => {
                if cfg!(feature = "memdbg") {
                    self.panic_internal(&format!("reference to freed series {:?}", id));
                }
                return;
            }
        };
        if stub.flags.contains(SeriesFlags::MARKED) {
            return;
        }
        stub.flags.insert(SeriesFlags::MARKED);
        m.queue.push(id);
    }

    fn mark_pair(&mut self, m: &mut Marker, id: PairId) {
        if !m.pairs.insert(id.0) {
            return;
        }
        let cells = match self.pairs.get(id.0) {
            Some(p) => p.0,
            None => return,
        };
        for c in cells.iter() {
            self.mark_cell(m, c);
        }
    }

    fn mark_cell(&mut self, m: &mut Marker, cell: &Cell) {
        if let Binding::Specific(v) | Binding::Relative(v) = cell.extra {
            self.mark_series(m, v);
        }
        match cell.payload {
            Payload::Series { series, .. } => self.mark_series(m, series),
            Payload::Context { varlist, phase } => {
                self.mark_series(m, varlist);
                if let Some(p) = phase {
                    self.mark_series(m, p);
                }
            }
            Payload::Action { paramlist, details } => {
                self.mark_series(m, paramlist);
                self.mark_series(m, details);
            }
            Payload::Quoted { pair } => self.mark_pair(m, pair),
            Payload::Event { port: Some(p), .. } => self.mark_series(m, p),
            _ => {}
        }
    }

    /// Empties the queue, marking everything the queued series refer to
    fn propagate(&mut self, m: &mut Marker) {
        while let Some(id) = m.queue.pop() {
            let (cells, link, misc) = {
                let stub = self.stub(id);
                let cells: Vec<Cell> = match &stub.content {
                    Content::Cells(v) => v.clone(),
                    Content::Singular(c) => vec![*c],
                    _ => Vec::new(),
                };
                (cells, stub.link, stub.misc)
            };

            match link {
                Link::KeySource(KeySource::Keylist(k)) | Link::KeySource(KeySource::Frame { keylist: k, .. }) => {
                    self.mark_series(m, k)
                }
                Link::Ancestor(s) | Link::Underlying(s) | Link::Exemplar(Some(s)) => self.mark_series(m, s),
                Link::Pair(p) => self.mark_pair(m, p),
                _ => {}
            }
            if let Misc::Meta(s) = misc {
                self.mark_series(m, s);
            }

            for cell in cells.iter() {
                if !cell.end_p() {
                    self.mark_cell(m, cell);
                }
            }
        }
    }

    fn sweep(&mut self, m: &Marker) -> Recycled {
        let mut freed = Recycled::default();
        for raw in self.series.live_ids() {
            let id = SeriesId(raw);
            let stub = self.stub_mut(id);
            if stub.flags.contains(SeriesFlags::MARKED) {
                stub.flags.remove(SeriesFlags::MARKED);
            } else if stub.managed_p() {
                self.free_series(id);
                freed.series += 1;
            }
        }
        for raw in self.pairs.live_ids() {
            if !m.pairs.contains(&raw) {
                self.pairs.free(raw);
                freed.pairs += 1;
            }
        }
        freed
    }

    /// Checks that no live series refers to a freed one
    fn verify_pools(&self) {
        for raw in self.series.live_ids() {
            let stub = self.stub(SeriesId(raw));
            for cell in stub.cells() {
                let mut refs: Vec<SeriesId> = Vec::new();
                if let Binding::Specific(v) | Binding::Relative(v) = cell.extra {
                    refs.push(v);
                }
                match cell.payload {
                    Payload::Series { series, .. } => refs.push(series),
                    Payload::Context { varlist, .. } => refs.push(varlist),
                    Payload::Action { paramlist, details } => refs.extend([paramlist, details]),
                    _ => {}
                }
                for r in refs {
                    if self.series.get(r.0).is_none() {
                        self.panic_internal(&format!("{:?} holds dangling {:?}", SeriesId(raw), r));
                    }
                }
            }
        }
        log::trace!("pools verified: {} series", self.series.live());
    }

    /// Unrecoverable internal failure
    pub(crate) fn panic_internal(&self, msg: &str) -> ! {
        log::error!("panic: {}", msg);
        std::process::abort()
    }
}

impl Marker {
    /// Records a root series to be marked once the cells are gathered
    fn queue_root(&mut self, id: SeriesId) {
        self.queue.push(id);
    }
}

#[cfg(test)]
mod gc_tests {
    use super::*;
    use crate::ren::interp::InterpConfig;
    use crate::ren::kind::Kind;
    use proptest::prelude::*;

    fn interp() -> Interp {
        Interp::new(InterpConfig::default())
    }

    #[test]
    fn frees_unreachable_managed_series() {
        let mut it = interp();
        it.recycle();
        let live = it.series.live();

        let a = it.make_array_from(vec![Cell::integer(1)], true);
        let t = it.make_text("garbage");
        assert_eq!(it.series.live(), live + 2);
        let freed = it.recycle();
        assert_eq!(freed.series, 2);
        assert!(it.series.get(a.0).is_none());
        assert!(it.series.get(t.0).is_none());
    }

    #[test]
    fn keeps_guarded_and_unmanaged_series() {
        let mut it = interp();
        let inner = it.make_text("kept");
        let outer = it.make_array_from(vec![Cell::series(Kind::Text, inner, 0)], true);
        let loose = it.make_array(2, false);
        it.guard_series(outer);
        it.recycle();
        assert_eq!(it.text(inner), "kept");
        assert_eq!(it.arr_len(loose), 0);
        it.unguard_series(outer);
        it.recycle();
        assert!(it.series.get(outer.0).is_none());
        assert!(it.series.get(inner.0).is_none());
        it.free_unmanaged(loose);
    }

    #[test]
    fn variables_keep_their_values() {
        let mut it = interp();
        it.do_string("keep: [a [b c] \"d\"] o: make object! [x: 10]").unwrap();
        it.recycle();
        let r = it.do_string("o/x + length-of keep").unwrap().unwrap();
        assert_eq!(r.as_integer(), Some(13));
    }

    #[test]
    fn deep_quotes_live_in_pairs() {
        let mut it = interp();
        let q = it.quotify(Cell::integer(7), 5);
        assert!(q.deep_quoted_p());
        let holder = it.make_array_from(vec![q], true);
        it.guard_series(holder);
        it.recycle();
        assert_eq!(it.pairs.live(), 1);
        assert_eq!(it.quote_depth(&it.arr_at(holder, 0)), 5);
        it.unguard_series(holder);
        let freed = it.recycle();
        assert_eq!(freed.pairs, 1);
    }

    #[test]
    fn disabled_collection_is_left_pending() {
        let mut it = interp();
        it.recycle();
        it.set_gc_disabled(true);
        it.make_text("garbage");
        assert_eq!(it.recycle(), Recycled::default());
        assert!(it.gc.pending);
        it.set_gc_disabled(false);
        assert_eq!(it.recycle().series, 1);
        assert!(!it.gc.pending);
    }

    #[test]
    fn ballast_requests_collection() {
        let mut config = InterpConfig::default();
        config.ballast = 64;
        let mut it = Interp::new(config);
        it.recycle();
        assert!(!it.gc.pending);
        let before = it.gc.recycles;
        it.do_string("loop 50 [copy [1 2 3 4 5 6 7 8]]").unwrap();
        assert!(it.gc.recycles > before);
    }

    proptest! {
        #[test]
        fn second_recycle_frees_nothing(n in 0usize..40, keep in 0usize..40) {
            let mut it = interp();
            let mut kept = Vec::new();
            for i in 0..n {
                let a = it.make_array_from(vec![Cell::integer(i as i64)], true);
                if i < keep {
                    it.guard_series(a);
                    kept.push(a);
                }
            }
            it.recycle();
            prop_assert_eq!(it.recycle(), Recycled::default());
            for (i, a) in kept.iter().enumerate() {
                prop_assert_eq!(it.arr_at(*a, 0).as_integer(), Some(i as i64));
            }
        }
    }
}

#[cfg(test)]
mod root_tests {
    use crate::ren::interp::{Interp, InterpConfig};

    #[test]
    fn globals_survive_collection() {
        let mut it = Interp::new(InterpConfig::default());
        it.do_string("y: 1").unwrap();
        it.recycle();
        it.recycle();
        let y = it.do_string("y").unwrap().unwrap();
        assert_eq!(y.as_integer(), Some(1));
        assert!(it.series.get(it.lib.0).is_some());
        assert!(it.series.get(it.empty_array.0).is_some());
    }

    #[test]
    fn natives_run_after_collection() {
        let mut it = Interp::new(InterpConfig::default());
        it.recycle();
        let r = it.do_string("append copy [1] [2]").unwrap().unwrap();
        assert_eq!(it.mold(&r), "[1 2]");
    }
}
