// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/interp.rs

// Interpreter state: pools, symbol table, stacks, signals and the
// library context, plus boot and the top-level entry points.

// <>

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::cell::Cell;
use super::device::Devices;
use super::error::{Error, Escape, EvalResult, Fault, Result, ScriptError};
use super::feed::Feed;
use super::frame::Frame;
use super::gc::GcState;
use super::kind::{Kind, Typeset, ALL_KINDS};
use super::node::{Pool, SeriesId};
use super::series::{Pairing, SeriesInfo, Stub, DECAYED};
use super::symtab::{Sym, SymbolTable};

/// Tunables fixed when an interpreter is made
#[derive(Debug, Clone)]
pub struct InterpConfig {
    /// Units allocated between automatic collections
    pub ballast: usize,
    /// Slots per segment of the series pool
    pub series_units: usize,
    /// Slots per segment of the pair pool
    pub pair_units: usize,
    /// Evaluator steps between signal polls
    pub signal_interval: u32,
    /// Maximum frame depth before a stack overflow error
    pub stack_limit: usize,
    /// Start with automatic collection disabled
    pub gc_disabled: bool,
}

impl Default for InterpConfig {
    fn default() -> Self {
        Self {
            ballast: 3_000_000,
            series_units: 256,
            pair_units: 128,
            signal_interval: 1,
            stack_limit: 4096,
            gc_disabled: false,
        }
    }
}

/// Natives matched by identity when catching throws
#[derive(Debug, Clone, Copy)]
pub(crate) struct Builtins {
    pub return_: Cell,
    pub break_: Cell,
    pub continue_: Cell,
    pub unwind: Cell,
    pub halt: Cell,
    pub quit: Cell,
    pub stop: Cell,
}

/// Label and value of the throw in flight
#[derive(Debug, Clone, Copy)]
pub(crate) struct Thrown {
    pub label: Cell,
    pub arg: Cell,
}

/// Values kept alive by the collector while Rust code holds them
#[derive(Debug, Clone, Copy)]
pub(crate) enum Guard {
    Series(SeriesId),
    Cell(Cell),
}

/// Deferred top-level evaluation queued through the API
#[derive(Debug)]
pub(crate) struct Promise {
    pub id: u64,
    pub code: SeriesId,
}

pub struct Interp {
    pub(crate) config: InterpConfig,

    pub(crate) series: Pool<Stub>,
    /// Scratch answered for writes to a freed series
    pub(crate) decayed: Stub,
    pub(crate) pairs: Pool<Pairing>,
    pub(crate) symtab: SymbolTable,

    /// Context all scanned code binds into
    pub(crate) lib: SeriesId,
    /// Port object whose `state` block queues events
    pub(crate) system_port: SeriesId,
    /// Frozen empty array feeding applied calls
    pub(crate) empty_array: SeriesId,
    pub(crate) natives: Vec<Cell>,
    pub(crate) builtins: Builtins,

    pub(crate) frames: Vec<Frame>,
    pub(crate) feeds: Vec<Feed>,
    /// Data stack; slot zero is never a valid value
    pub(crate) ds: Vec<Cell>,
    pub(crate) guarded: Vec<Guard>,
    pub(crate) thrown: Thrown,
    pub(crate) fault_in_flight: Option<SeriesId>,
    /// Rust errors behind ERROR! contexts, so they can be raised again
    pub(crate) faults: HashMap<SeriesId, Error>,
    /// Unmanaged varlists left by finished frames
    pub(crate) reuse: Vec<SeriesId>,

    pub(crate) gc: GcState,
    pub(crate) halt: Arc<AtomicBool>,
    pub(crate) countdown: u32,
    pub(crate) tick: u64,
    pub(crate) next_serial: u64,

    pub(crate) devices: Devices,
    pub(crate) promises: VecDeque<Promise>,
    pub(crate) promise_results: HashMap<u64, Result<Option<Cell>>>,
    pub(crate) next_promise: u64,

    /// Captured PRINT output, when capturing
    pub(crate) captured: Option<String>,
}

impl Interp {
    pub fn new(config: InterpConfig) -> Self {
        let blank = Cell::blank();
        let mut interp = Self {
            series: Pool::new("series", config.series_units),
            decayed: DECAYED,
            pairs: Pool::new("pair", config.pair_units),
            symtab: SymbolTable::new(1024),

            lib: SeriesId(0),
            system_port: SeriesId(0),
            empty_array: SeriesId(0),
            natives: Vec::new(),
            builtins: Builtins {
                return_: blank,
                break_: blank,
                continue_: blank,
                unwind: blank,
                halt: blank,
                quit: blank,
                stop: blank,
            },

            frames: Vec::with_capacity(64),
            feeds: Vec::with_capacity(64),
            ds: vec![Cell::end()],
            guarded: Vec::new(),
            thrown: Thrown {
                label: Cell::end(),
                arg: Cell::end(),
            },
            fault_in_flight: None,
            faults: HashMap::new(),
            reuse: Vec::new(),

            gc: GcState::new(config.ballast, config.gc_disabled),
            halt: Arc::new(AtomicBool::new(false)),
            countdown: config.signal_interval,
            tick: 0,
            next_serial: 1,

            devices: Devices::default(),
            promises: VecDeque::new(),
            promise_results: HashMap::new(),
            next_promise: 1,

            captured: None,
            config,
        };

        interp.boot();
        interp
    }

    fn boot(&mut self) {
        // collection stays off until the library is complete
        let was_disabled = self.gc.disabled;
        self.gc.disabled = true;

        self.lib = self.make_context(Kind::Object, 512);
        self.empty_array = self.make_array(0, true);
        self.stub_mut(self.empty_array).info.insert(SeriesInfo::FROZEN);

        for kind in ALL_KINDS.iter().skip(2) {
            self.lib_set(kind.name(), Cell::datatype(*kind));
        }
        for name in [
            "any-value!",
            "any-series!",
            "any-array!",
            "any-string!",
            "any-word!",
            "any-path!",
            "any-context!",
            "any-number!",
        ] {
            if let Some(ts) = Typeset::from_name(name) {
                self.lib_set(name, Cell::typeset(ts));
            }
        }
        self.lib_set("true", Cell::logic(true));
        self.lib_set("false", Cell::logic(false));
        self.lib_set("on", Cell::logic(true));
        self.lib_set("off", Cell::logic(false));
        self.lib_set("yes", Cell::logic(true));
        self.lib_set("no", Cell::logic(false));
        self.lib_set("blank", Cell::blank());

        self.register_natives();
        self.builtins = Builtins {
            return_: self.lib_get("return"),
            break_: self.lib_get("break"),
            continue_: self.lib_get("continue"),
            unwind: self.lib_get("unwind"),
            halt: self.lib_get("halt"),
            quit: self.lib_get("quit"),
            stop: self.lib_get("stop"),
        };

        let state = self.make_array(8, true);
        self.system_port = self.make_context_with(
            Kind::Port,
            &[
                ("spec", Cell::blank()),
                ("state", Cell::series(Kind::Block, state, 0)),
            ],
        );
        self.lib_set("system-port", Cell::context(Kind::Port, self.system_port, None));

        self.init_devices();

        self.gc.disabled = was_disabled;

        log::debug!(
            "booted: {} symbols, {} natives, {} series live",
            self.symtab.len(),
            self.natives.len(),
            self.series.live()
        );
    }

    /// Interns a spelling
    #[inline(always)]
    pub fn intern(&mut self, name: &str) -> Sym {
        self.symtab.get_id(name)
    }

    #[inline(always)]
    pub fn sym_name(&self, sym: Sym) -> &str {
        self.symtab.name(sym)
    }

    /// Flag which, once set from any thread, halts evaluation at the next poll
    pub fn halt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.halt)
    }

    pub(crate) fn halt_requested_p(&self) -> bool {
        self.halt.load(Ordering::Relaxed)
    }

    pub(crate) fn clear_halt(&self) {
        self.halt.store(false, Ordering::Relaxed);
    }

    /// Next unique serial for frames
    pub(crate) fn serial(&mut self) -> u64 {
        let s = self.next_serial;
        self.next_serial += 1;
        s
    }

    /// Sends PRINT output to an internal buffer instead of stdout
    pub fn capture_output(&mut self) {
        self.captured = Some(String::new());
    }

    pub fn take_output(&mut self) -> String {
        match &mut self.captured {
            Some(s) => std::mem::take(s),
            None => String::new(),
        }
    }

    pub(crate) fn emit_line(&mut self, line: &str) {
        match &mut self.captured {
            Some(s) => {
                s.push_str(line);
                s.push('\n');
            }
            None => println!("{}", line),
        }
    }

    /// Scans and runs source text, yielding the last value (None for null)
    pub fn do_string(&mut self, code: &str) -> Result<Option<Cell>> {
        let array = self.scan_source(code, None)?;
        self.guard_series(array);
        let result = self.do_array_at(array, 0, None);
        self.unguard_series(array);
        self.finish_top_level(result)
    }

    /// Runs a source file
    pub fn run_file(&mut self, path: &str) -> Result<Option<Cell>> {
        let code = std::fs::read_to_string(path)
            .map_err(|e| Error::Script(ScriptError::BadValue(format!("{}: {}", path, e))))?;
        log::info!("running {}", path);
        let array = self.scan_source(&code, Some(path))?;
        self.guard_series(array);
        let result = self.do_array_at(array, 0, None);
        self.unguard_series(array);
        self.finish_top_level(result)
    }

    /// Converts a top-level escape into a host-facing error
    pub(crate) fn finish_top_level(&mut self, result: EvalResult<Cell>) -> Result<Option<Cell>> {
        match result {
            Ok(cell) if cell.nulled_p() => Ok(None),
            Ok(cell) => Ok(Some(cell)),
            Err(esc) => Err(self.escape_to_error(esc)),
        }
    }

    pub(crate) fn escape_to_error(&mut self, esc: Escape) -> Error {
        match esc {
            Escape::Fail(Fault { error, .. }) => {
                self.fault_in_flight = None;
                error
            }
            Escape::Thrown => {
                let label = self.thrown.label;
                let arg = self.thrown.arg;
                self.clear_thrown();
                if self.same_action_p(&label, &self.builtins.halt) {
                    self.clear_halt();
                    return Error::Internal(super::error::InternalError::Halt);
                }
                if self.same_action_p(&label, &self.builtins.quit) {
                    return Error::User(format!("quit {}", self.mold(&arg)));
                }
                Error::Script(ScriptError::NoCatch(self.mold(&label)))
            }
        }
    }

    /// Reads from stdin line by line, printing results
    pub fn repl(&mut self, stream_in: std::io::Stdin) {
        loop {
            let mut input = String::new();
            match stream_in.read_line(&mut input) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    log::error!("read failure: {}", e);
                    break;
                }
            }

            match self.do_string(&input) {
                Ok(Some(v)) if !v.void_p() => println!("== {}", self.mold(&v)),
                Ok(_) => {}
                Err(e) => println!("** {}", e),
            }
        }
    }

    /// Evaluates queued promises in order
    pub fn run_promises(&mut self) {
        while let Some(p) = self.promises.pop_front() {
            let result = self.do_array_at(p.code, 0, None);
            let result = self.finish_top_level(result);
            self.promise_results.insert(p.id, result);
        }
    }
}

#[cfg(test)]
mod interp_tests {
    use super::*;

    #[test]
    fn boots_library() {
        let mut it = Interp::new(InterpConfig::default());
        assert_eq!(it.lib_get("integer!"), Cell::datatype(Kind::Integer));
        assert!(it.lib_get("if").action_p());
        assert!(it.lib_get("else").flags.contains(super::super::cell::CellFlags::ENFIXED));
        assert!(it.builtins.break_.action_p());
        let r = it.do_string("1 + 2").unwrap().unwrap();
        assert_eq!(r.as_integer(), Some(3));
    }

    #[test]
    fn captures_print() {
        let mut it = Interp::new(InterpConfig::default());
        it.capture_output();
        it.do_string(r#"print "hello""#).unwrap();
        assert_eq!(it.take_output(), "hello\n");
    }

    #[test]
    fn halt_handle_stops_evaluation() {
        let mut it = Interp::new(InterpConfig::default());
        it.halt_handle().store(true, Ordering::Relaxed);
        let r = it.do_string("loop 10 [1]");
        assert_eq!(r, Err(Error::Internal(super::super::error::InternalError::Halt)));
        assert!(!it.halt_requested_p());
        assert_eq!(it.do_string("5").unwrap().unwrap().as_integer(), Some(5));
    }
}
