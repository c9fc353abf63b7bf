// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/feed.rs

// Feeds: the source of values an evaluation consumes. A feed walks an
// array, keeping the value at its position separately so a value can
// be injected ahead of the array (REEVAL) and so lookups of the
// current word are cached between the enfix check and dispatch.
// Feeds made for API calls start out variadic: host arguments are
// scanned and spliced only when evaluation reaches them, until a
// collection turns what is left into an ordinary array.

// <>

use std::collections::VecDeque;

use bitflags::bitflags;

use super::api::{FeedItem, RebArg};
use super::cell::{Cell, CellFlags, END};
use super::context::Specifier;
use super::error::{Error, Result};
use super::interp::Interp;
use super::node::SeriesId;
use super::series::{Misc, SeriesFlags};

bitflags! {
    #[derive(Default)]
    pub struct FeedFlags: u8 {
        /// Next lookahead is suppressed, then the flag clears
        const NO_LOOKAHEAD = 1 << 0;
        /// An argument on this feed is waiting for a deferred enfix
        const DEFERRING_ENFIX = 1 << 1;
        /// The feed holds its array against modification
        const TOOK_HOLD = 1 << 2;
    }
}

pub type FeedId = usize;

#[derive(Debug)]
pub struct Feed {
    /// Value at the feed position; END once exhausted
    pub current: Cell,
    /// Cached variable lookup of `current`, when it is a word
    pub gotten: Option<Cell>,
    pub array: SeriesId,
    /// Index of the value after `current`
    pub index: usize,
    pub specifier: Specifier,
    pub flags: FeedFlags,
    /// Host arguments not reached yet; None once backed by `array`
    pub(crate) variadic: Option<Variadic>,
    /// Scan failure of a host argument, reported when the call finishes
    pub(crate) fault: Option<Error>,
}

/// Unreached part of an API call
#[derive(Debug, Default)]
pub(crate) struct Variadic {
    /// Cells of the last spliced argument not fetched yet
    cells: VecDeque<Cell>,
    items: VecDeque<FeedItem>,
}

impl Interp {
    /// Starts a feed at an index of an array, holding the array while it runs
    pub(crate) fn push_feed(&mut self, array: SeriesId, index: usize, specifier: Specifier) -> FeedId {
        self.hold(array);
        let current = self.arr_at(array, index);
        self.feeds.push(Feed {
            current,
            gotten: None,
            array,
            index: index + 1,
            specifier,
            flags: FeedFlags::TOOK_HOLD,
            variadic: None,
            fault: None,
        });
        self.feeds.len() - 1
    }

    /// Starts a feed over the arguments of an API call
    pub(crate) fn push_variadic_feed(&mut self, args: &[RebArg]) -> Result<FeedId> {
        let mut items = VecDeque::with_capacity(args.len());
        for arg in args {
            items.push_back(self.feed_item(arg)?);
        }
        self.feeds.push(Feed {
            current: END,
            gotten: None,
            array: self.empty_array,
            index: 0,
            specifier: None,
            flags: FeedFlags::empty(),
            variadic: Some(Variadic {
                cells: VecDeque::new(),
                items,
            }),
            fault: None,
        });
        let feed = self.feeds.len() - 1;
        self.fetch_next(feed);
        Ok(feed)
    }

    pub(crate) fn drop_feed(&mut self, feed: FeedId) {
        debug_assert_eq!(feed + 1, self.feeds.len());
        if let Some(fd) = self.feeds.pop() {
            if fd.flags.contains(FeedFlags::TOOK_HOLD) {
                self.release_hold(fd.array);
            }
        }
    }

    #[inline(always)]
    pub(crate) fn feed(&self, feed: FeedId) -> &Feed {
        &self.feeds[feed]
    }

    #[inline(always)]
    pub(crate) fn feed_mut(&mut self, feed: FeedId) -> &mut Feed {
        &mut self.feeds[feed]
    }

    #[inline(always)]
    pub(crate) fn feed_at_end(&self, feed: FeedId) -> bool {
        self.feeds[feed].current.end_p()
    }

    /// Advances to the next value of the array
    pub(crate) fn fetch_next(&mut self, feed: FeedId) {
        if self.feeds[feed].variadic.is_some() {
            let next = self.variadic_next(feed);
            let fd = &mut self.feeds[feed];
            fd.current = next;
            fd.gotten = None;
            return;
        }
        let (array, index) = {
            let fd = &self.feeds[feed];
            (fd.array, fd.index)
        };
        let next = if self.current_end_p(feed) {
            END
        } else {
            self.arr_at(array, index)
        };
        let fd = &mut self.feeds[feed];
        fd.current = next;
        fd.gotten = None;
        if !next.end_p() {
            fd.index += 1;
        }
    }

    fn current_end_p(&self, feed: FeedId) -> bool {
        self.feeds[feed].current.end_p()
    }

    fn variadic_next(&mut self, feed: FeedId) -> Cell {
        loop {
            let item = match self.feeds[feed].variadic.as_mut() {
                None => return END,
                Some(va) => {
                    if let Some(cell) = va.cells.pop_front() {
                        return cell;
                    }
                    match va.items.pop_front() {
                        Some(item) => item,
                        None => return END,
                    }
                }
            };
            match self.splice_item(item) {
                Ok(cells) => {
                    if let Some(va) = self.feeds[feed].variadic.as_mut() {
                        va.cells.extend(cells);
                    }
                }
                Err(error) => {
                    log::debug!("API argument failed to scan: {}", error);
                    let fd = &mut self.feeds[feed];
                    if let Some(va) = fd.variadic.as_mut() {
                        va.cells.clear();
                        va.items.clear();
                    }
                    fd.fault = Some(error);
                    return END;
                }
            }
        }
    }

    /// Makes arrays of the unreached arguments of every variadic feed,
    /// so a collection can trace them
    pub(crate) fn reify_variadic_feeds(&mut self) {
        for feed in 0..self.feeds.len() {
            let va = match self.feeds[feed].variadic.take() {
                Some(va) => va,
                None => continue,
            };
            let mut cells: Vec<Cell> = va.cells.into_iter().collect();
            let mut fault = None;
            for item in va.items {
                if fault.is_some() {
                    break;
                }
                match self.splice_item(item) {
                    Ok(more) => cells.extend(more),
                    Err(error) => fault = Some(error),
                }
            }
            let array = self.make_array_from(cells, true);
            log::trace!("variadic feed {} reified as {:?}", feed, array);
            let fd = &mut self.feeds[feed];
            fd.array = array;
            fd.index = 0;
            if fault.is_some() {
                fd.fault = fault;
            }
        }
    }

    /// Takes the current value and its cached lookup, advancing the feed
    pub(crate) fn take_current(&mut self, feed: FeedId) -> (Cell, Option<Cell>) {
        let (current, gotten) = {
            let fd = &self.feeds[feed];
            (fd.current, fd.gotten)
        };
        self.fetch_next(feed);
        (current, gotten)
    }

    /// Drops the cached lookup of the current word
    #[inline(always)]
    pub(crate) fn forget_gotten(&mut self, feed: FeedId) {
        self.feeds[feed].gotten = None;
    }

    /// Places a value in front of the rest of the feed
    pub(crate) fn inject_current(&mut self, feed: FeedId, value: Cell) {
        let fd = &mut self.feeds[feed];
        let current = fd.current;
        match fd.variadic.as_mut() {
            Some(va) if !current.end_p() => va.cells.push_front(current),
            Some(_) => {}
            None if !current.end_p() => fd.index -= 1,
            None => {}
        }
        fd.current = value.with_flags(CellFlags::FETCHED_MARKED_TEMPORARY);
        fd.gotten = None;
    }

    /// Index in the array of the current value
    pub(crate) fn feed_position(&self, feed: FeedId) -> usize {
        let fd = &self.feeds[feed];
        if fd.current.end_p() {
            self.arr_len(fd.array)
        } else {
            fd.index.saturating_sub(1)
        }
    }

    /// Builds the array an API call's arguments evaluate from, for calls
    /// that run after the host has moved on
    pub(crate) fn reify_api_args(&mut self, args: &[RebArg]) -> Result<SeriesId> {
        let mut items: Vec<FeedItem> = Vec::with_capacity(args.len());
        for arg in args {
            items.push(self.feed_item(arg)?);
        }
        let mut cells: Vec<Cell> = Vec::new();
        for item in items {
            cells.extend(self.splice_item(item)?);
        }
        Ok(self.make_array_from(cells, true))
    }

    /// Cells one API argument contributes, applying instructions and
    /// releasing single-use handles
    fn splice_item(&mut self, item: FeedItem) -> Result<Vec<Cell>> {
        match item {
            FeedItem::Utf8(text) => {
                let scanned = self.scan_source(&text, None)?;
                Ok(self.arr_cells(scanned).to_vec())
            }
            FeedItem::Cell(cell) => Ok(vec![cell.fresh()]),
            FeedItem::Instruction(id) => {
                let delta = match self.stub(id).misc {
                    Misc::Quoting(d) => d,
                    _ => 0,
                };
                let spliced: Vec<Cell> = self.arr_cells(id).to_vec();
                let mut cells = Vec::with_capacity(spliced.len());
                for cell in spliced {
                    cells.push(if delta >= 0 {
                        self.quotify(cell.fresh(), delta as u32)
                    } else {
                        self.unquotify(cell.fresh(), delta.unsigned_abs())
                    });
                }
                self.free_instruction(id);
                Ok(cells)
            }
            FeedItem::Release(handle) => {
                let cell = self.arr_at(handle, 0).fresh();
                self.free_series(handle);
                Ok(vec![cell])
            }
        }
    }

    fn free_instruction(&mut self, id: SeriesId) {
        if self.stub(id).flags.contains(SeriesFlags::API_INSTRUCTION) {
            self.free_series(id);
        }
    }
}

#[cfg(test)]
mod feed_tests {
    use super::*;
    use crate::ren::interp::InterpConfig;

    #[test]
    fn walks_and_injects() {
        let mut it = Interp::new(InterpConfig::default());
        let arr = it.make_array_from(vec![Cell::integer(1), Cell::integer(2)], true);
        let fd = it.push_feed(arr, 0, None);
        assert_eq!(it.feed(fd).current.as_integer(), Some(1));
        assert_eq!(it.feed_position(fd), 0);

        let (one, _) = it.take_current(fd);
        assert_eq!(one.as_integer(), Some(1));
        it.inject_current(fd, Cell::integer(9));
        assert_eq!(it.feed(fd).current.as_integer(), Some(9));

        it.fetch_next(fd);
        assert_eq!(it.feed(fd).current.as_integer(), Some(2));
        it.fetch_next(fd);
        assert!(it.feed_at_end(fd));
        it.fetch_next(fd);
        assert!(it.feed_at_end(fd));

        it.drop_feed(fd);
        assert!(it.arr_push(arr, Cell::blank()).is_ok());
    }

    #[test]
    fn holds_array_while_running() {
        let mut it = Interp::new(InterpConfig::default());
        let arr = it.make_array_from(vec![Cell::integer(1)], true);
        let fd = it.push_feed(arr, 0, None);
        assert!(it.arr_push(arr, Cell::blank()).is_err());
        it.drop_feed(fd);
    }
}

#[cfg(test)]
mod variadic_feed_tests {
    use super::*;
    use crate::ren::interp::InterpConfig;

    fn drain(it: &mut Interp, fd: FeedId) -> Vec<i64> {
        let mut out = Vec::new();
        while !it.feed_at_end(fd) {
            let (cell, _) = it.take_current(fd);
            out.extend(cell.as_integer());
        }
        out
    }

    #[test]
    fn arguments_scan_as_they_are_reached() {
        let mut it = Interp::new(InterpConfig::default());
        let fd = it.push_variadic_feed(&["1 2".into(), "3 [".into()]).unwrap();
        assert_eq!(it.take_current(fd).0.as_integer(), Some(1));
        assert!(it.feed(fd).fault.is_none());
        assert_eq!(drain(&mut it, fd), vec![2]);
        assert!(it.feed(fd).fault.is_some());
        it.drop_feed(fd);
    }

    #[test]
    fn reified_feeds_continue_from_an_array() {
        let mut it = Interp::new(InterpConfig::default());
        let fd = it.push_variadic_feed(&["1 2".into(), "3".into()]).unwrap();
        it.take_current(fd);
        it.reify_variadic_feeds();
        assert!(it.feed(fd).variadic.is_none());
        assert_eq!(it.arr_len(it.feed(fd).array), 2);
        assert_eq!(drain(&mut it, fd), vec![2, 3]);
        it.drop_feed(fd);
    }

    #[test]
    fn injected_values_come_first() {
        let mut it = Interp::new(InterpConfig::default());
        let fd = it.push_variadic_feed(&["1".into(), "2".into()]).unwrap();
        it.inject_current(fd, Cell::integer(9));
        assert_eq!(drain(&mut it, fd), vec![9, 1, 2]);
        it.drop_feed(fd);
    }
}
