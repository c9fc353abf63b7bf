// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/device.rs

// Port/device request boundary. A port's I/O goes through requests
// submitted to a device, which answers through a table of command
// routines. A request may be left pending; the wait loop polls the
// devices and each completion posts an EVENT! to the system port.

// <>

use std::collections::{HashMap, VecDeque};

use bitflags::bitflags;

use super::cell::Cell;
use super::error::{AccessError, Error, EvalResult, ScriptError};
use super::interp::Interp;
use super::kind::Kind;
use super::node::SeriesId;

/// Polls a blocking read makes before giving up
const READ_POLL_BUDGET: usize = 64;

enum_and_tryfrom! {
    /// Request commands; a device's command table is indexed by these
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u8)]
    pub enum DeviceCommand {
        Open = 0,
        Close,
        Read,
        Write,
        Connect,
        Lookup,
        Modify,
        Create,
        Delete,
        Query,
    }
}

const COMMAND_COUNT: usize = DeviceCommand::Query as usize + 1;

impl DeviceCommand {
    pub fn name(self) -> &'static str {
        match self {
            DeviceCommand::Open => "open",
            DeviceCommand::Close => "close",
            DeviceCommand::Read => "read",
            DeviceCommand::Write => "write",
            DeviceCommand::Connect => "connect",
            DeviceCommand::Lookup => "lookup",
            DeviceCommand::Modify => "modify",
            DeviceCommand::Create => "create",
            DeviceCommand::Delete => "delete",
            DeviceCommand::Query => "query",
        }
    }
}

/// What happened to a port, as carried by an EVENT!
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Open,
    Close,
    Read,
    Wrote,
    Connect,
    Lookup,
    Error,
}

impl EventType {
    pub fn name(self) -> &'static str {
        match self {
            EventType::Open => "open",
            EventType::Close => "close",
            EventType::Read => "read",
            EventType::Wrote => "wrote",
            EventType::Connect => "connect",
            EventType::Lookup => "lookup",
            EventType::Error => "error",
        }
    }

    fn of(command: DeviceCommand) -> EventType {
        match command {
            DeviceCommand::Open => EventType::Open,
            DeviceCommand::Close => EventType::Close,
            DeviceCommand::Read => EventType::Read,
            DeviceCommand::Write => EventType::Wrote,
            DeviceCommand::Connect => EventType::Connect,
            DeviceCommand::Lookup => EventType::Lookup,
            _ => EventType::Error,
        }
    }
}

bitflags! {
    #[derive(Default)]
    pub struct RequestState: u16 {
        const OPEN = 1 << 0;
        const CONNECT = 1 << 1;
        const BIND = 1 << 2;
        const LISTEN = 1 << 3;
        const SEND = 1 << 4;
        const RECEIVE = 1 << 5;
        const ATTEMPT = 1 << 6;
        /// Submitted and awaiting a poll
        const PENDING = 1 << 7;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct RequestModes: u8 {
        const UDP = 1 << 0;
        const LISTEN = 1 << 1;
    }
}

/// One I/O operation on a port
#[derive(Debug)]
pub struct Request {
    pub id: u64,
    pub command: DeviceCommand,
    /// Varlist of the port the request is for
    pub port: SeriesId,
    pub device: usize,
    pub data: Vec<u8>,
    /// Bytes asked for (reads) or offered (writes)
    pub length: usize,
    /// Bytes actually transferred
    pub actual: usize,
    pub state: RequestState,
    pub modes: RequestModes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Done,
    Pending,
}

/// Storage private to a device
#[derive(Debug, Default)]
pub struct DeviceState {
    pub queue: VecDeque<Vec<u8>>,
}

pub type CommandFn = fn(&mut DeviceState, &mut Request) -> Result<DeviceStatus, Error>;

pub struct Device {
    pub name: &'static str,
    commands: [Option<CommandFn>; COMMAND_COUNT],
    /// Completes pending requests, if it can
    poll: Option<CommandFn>,
    state: DeviceState,
}

impl Device {
    fn new(name: &'static str) -> Self {
        Device {
            name,
            commands: [None; COMMAND_COUNT],
            poll: None,
            state: DeviceState::default(),
        }
    }

    fn command(mut self, command: DeviceCommand, f: CommandFn) -> Self {
        self.commands[command as usize] = Some(f);
        self
    }
}

/// A port opened on a device
#[derive(Debug, Clone, Copy)]
struct OpenPort {
    device: usize,
    state: RequestState,
}

#[derive(Default)]
pub struct Devices {
    table: Vec<Device>,
    pending: Vec<Request>,
    open: HashMap<SeriesId, OpenPort>,
    next_request: u64,
}

impl Devices {
    /// Ports the device layer refers to
    pub(crate) fn roots(&self) -> Vec<SeriesId> {
        let mut out: Vec<SeriesId> = self.open.keys().copied().collect();
        out.extend(self.pending.iter().map(|r| r.port));
        out
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.table.iter().position(|d| d.name.eq_ignore_ascii_case(name))
    }

    fn dispatch(&mut self, req: &mut Request) -> Result<DeviceStatus, Error> {
        let dev = match self.table.get_mut(req.device) {
            Some(d) => d,
            None => return Err(ScriptError::BadValue(format!("device {}", req.device)).into()),
        };
        match dev.commands[req.command as usize] {
            Some(cmd) => cmd(&mut dev.state, req),
            None => Err(AccessError::NoDeviceCommand(dev.name.to_string(), req.command.name().to_string()).into()),
        }
    }

    /// One pass over pending requests; returns those now finished
    fn poll(&mut self) -> Vec<(Request, Result<(), Error>)> {
        let mut finished = Vec::new();
        let mut still = Vec::new();
        for mut req in std::mem::take(&mut self.pending) {
            let dev = match self.table.get_mut(req.device) {
                Some(d) => d,
                None => continue,
            };
            let status = match dev.poll {
                Some(poll) => poll(&mut dev.state, &mut req),
                None => Ok(DeviceStatus::Done),
            };
            match status {
                Ok(DeviceStatus::Pending) => still.push(req),
                Ok(DeviceStatus::Done) => {
                    req.state.remove(RequestState::PENDING);
                    finished.push((req, Ok(())));
                }
                Err(e) => finished.push((req, Err(e))),
            }
        }
        self.pending = still;
        finished
    }
}

fn null_done(_: &mut DeviceState, req: &mut Request) -> Result<DeviceStatus, Error> {
    req.actual = req.length;
    Ok(DeviceStatus::Done)
}

fn null_read(_: &mut DeviceState, req: &mut Request) -> Result<DeviceStatus, Error> {
    req.data.clear();
    req.actual = 0;
    Ok(DeviceStatus::Done)
}

/// Discards writes; reads are empty
fn null_device() -> Device {
    Device::new("null")
        .command(DeviceCommand::Open, null_done)
        .command(DeviceCommand::Close, null_done)
        .command(DeviceCommand::Write, null_done)
        .command(DeviceCommand::Read, null_read)
        .command(DeviceCommand::Query, null_done)
}

fn loopback_write(state: &mut DeviceState, req: &mut Request) -> Result<DeviceStatus, Error> {
    state.queue.push_back(std::mem::take(&mut req.data));
    req.actual = req.length;
    Ok(DeviceStatus::Done)
}

fn loopback_read(_: &mut DeviceState, req: &mut Request) -> Result<DeviceStatus, Error> {
    // data only arrives when the device is polled
    req.state.insert(RequestState::RECEIVE);
    Ok(DeviceStatus::Pending)
}

fn loopback_poll(state: &mut DeviceState, req: &mut Request) -> Result<DeviceStatus, Error> {
    if req.command != DeviceCommand::Read {
        return Ok(DeviceStatus::Done);
    }
    match state.queue.pop_front() {
        Some(data) => {
            req.actual = data.len();
            req.data = data;
            req.state.remove(RequestState::RECEIVE);
            Ok(DeviceStatus::Done)
        }
        None => Ok(DeviceStatus::Pending),
    }
}

/// Reads give back what was written, one write per read
fn loopback_device() -> Device {
    let mut dev = Device::new("loopback")
        .command(DeviceCommand::Open, null_done)
        .command(DeviceCommand::Close, null_done)
        .command(DeviceCommand::Write, loopback_write)
        .command(DeviceCommand::Read, loopback_read)
        .command(DeviceCommand::Query, null_done);
    dev.poll = Some(loopback_poll);
    dev
}

impl Interp {
    pub(crate) fn init_devices(&mut self) {
        self.devices.table = vec![null_device(), loopback_device()];
        log::debug!("{} devices ready", self.devices.table.len());
    }

    /// Appends an EVENT! to the system port's queue
    fn post_event(&mut self, what: EventType, port: SeriesId) -> EvalResult<()> {
        let queue = match self.context_field(self.system_port, "state").and_then(|c| c.as_series()) {
            Some((s, _)) => s,
            None => return Ok(()),
        };
        self.arr_push(queue, Cell::event(what, Some(port)))?;
        Ok(())
    }

    fn port_of(&self, port: &Cell) -> EvalResult<(SeriesId, OpenPort)> {
        let varlist = match port.as_context() {
            Some(v) => v,
            None => return Err(ScriptError::BadValue(self.mold(port)).into()),
        };
        match self.devices.open.get(&varlist) {
            Some(op) => Ok((varlist, *op)),
            None => {
                let name = self
                    .context_field(varlist, "spec")
                    .map_or_else(String::new, |s| self.form(&s));
                Err(ScriptError::NotOpen(name).into())
            }
        }
    }

    fn new_request(&mut self, port: SeriesId, device: usize, command: DeviceCommand, data: Vec<u8>) -> Request {
        self.devices.next_request += 1;
        Request {
            id: self.devices.next_request,
            command,
            port,
            device,
            length: data.len(),
            data,
            actual: 0,
            state: RequestState::empty(),
            modes: RequestModes::empty(),
        }
    }

    /// Submits a request; a finished one is returned, a pending one queued
    fn submit(&mut self, mut req: Request) -> EvalResult<Option<Request>> {
        if let Some(op) = self.devices.open.get(&req.port) {
            req.state |= op.state;
        }
        match self.devices.dispatch(&mut req)? {
            DeviceStatus::Done => {
                log::trace!("request {} ({}) done", req.id, req.command.name());
                self.finish_request(&req)?;
                Ok(Some(req))
            }
            DeviceStatus::Pending => {
                log::trace!("request {} ({}) pending", req.id, req.command.name());
                req.state.insert(RequestState::PENDING);
                self.devices.pending.push(req);
                Ok(None)
            }
        }
    }

    fn finish_request(&mut self, req: &Request) -> EvalResult<()> {
        if req.command == DeviceCommand::Read {
            let data = self.make_binary(req.data.clone());
            if let Some(i) = self.symtab.lookup_by_name("data").and_then(|s| self.find_in_context(req.port, s)) {
                self.set_var(req.port, i, Cell::series(Kind::Binary, data, 0))?;
            }
        }
        self.post_event(EventType::of(req.command), req.port)
    }

    /// Polls until nothing is pending or the budget runs out; returns
    /// the number of requests finished
    pub(crate) fn wait_pending(&mut self, budget: usize) -> EvalResult<usize> {
        let mut count = 0;
        for _ in 0..budget {
            if self.devices.pending.is_empty() {
                break;
            }
            for (req, result) in self.devices.poll() {
                match result {
                    Ok(()) => {
                        log::trace!("request {} finished on poll", req.id);
                        self.finish_request(&req)?;
                        count += 1;
                    }
                    Err(e) => {
                        self.post_event(EventType::Error, req.port)?;
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(count)
    }

    fn request_pending_p(&self, id: u64) -> bool {
        self.devices.pending.iter().any(|r| r.id == id)
    }

    fn open_port(&mut self, spec: &Cell) -> EvalResult<Cell> {
        let name = match spec.as_word() {
            Some(sym) => self.sym_name(sym).to_string(),
            None => self.form(spec),
        };
        let device = match self.devices.find(&name) {
            Some(d) => d,
            None => return Err(ScriptError::BadValue(format!("no device named {}", name)).into()),
        };

        let spec_text = self.make_text(&name);
        let port = self.make_context_with(
            Kind::Port,
            &[
                ("spec", Cell::series(Kind::Text, spec_text, 0)),
                ("data", Cell::nulled()),
            ],
        );
        self.guard_series(port);
        let req = self.new_request(port, device, DeviceCommand::Open, Vec::new());
        let result = self.submit(req);
        self.unguard_series(port);
        result?;

        self.devices.open.insert(
            port,
            OpenPort {
                device,
                state: RequestState::OPEN,
            },
        );
        Ok(Cell::context(Kind::Port, port, None))
    }
}

fn data_bytes(it: &Interp, data: &Cell) -> Vec<u8> {
    match data.as_series() {
        Some((s, i)) if data.kind() == Kind::Binary => it.bytes(s).get(i..).unwrap_or(&[]).to_vec(),
        Some((s, i)) => it.text(s).chars().skip(i).collect::<String>().into_bytes(),
        None => Vec::new(),
    }
}

ren_native! {
    const PORT_NATIVES;
    it f;

    Prefix "open" "spec [text! word!]" [spec] {
        let port = it.open_port(&spec)?;
        it.ret(f, port)
    }

    Prefix "close" "port [port!]" [port] {
        let (varlist, op) = it.port_of(&port)?;
        let req = it.new_request(varlist, op.device, DeviceCommand::Close, Vec::new());
        it.submit(req)?;
        it.devices.open.remove(&varlist);
        it.devices.pending.retain(|r| r.port != varlist);
        it.ret(f, port)
    }

    Prefix "write" "port [port!] data [binary! text!]" [port, data] {
        let (varlist, op) = it.port_of(&port)?;
        let bytes = data_bytes(it, &data);
        let mut req = it.new_request(varlist, op.device, DeviceCommand::Write, bytes);
        req.state.insert(RequestState::SEND);
        it.submit(req)?;
        it.ret(f, port)
    }

    Prefix "read" "port [port!] /async" [port, async_] {
        let (varlist, op) = it.port_of(&port)?;
        let req = it.new_request(varlist, op.device, DeviceCommand::Read, Vec::new());
        let id = req.id;
        if let Some(done) = it.submit(req)? {
            let data = it.make_binary(done.data);
            return it.ret(f, Cell::series(Kind::Binary, data, 0));
        }
        if async_.truthy_p() {
            return it.ret(f, port);
        }

        let mut polls = 0;
        while it.request_pending_p(id) && polls < READ_POLL_BUDGET {
            it.wait_pending(1)?;
            polls += 1;
        }
        if it.request_pending_p(id) {
            it.devices.pending.retain(|r| r.id != id);
            let name = it.context_field(varlist, "spec").map_or_else(String::new, |s| it.form(&s));
            return Err(ScriptError::Timeout(name).into());
        }
        let data = it.context_field(varlist, "data").unwrap_or_else(Cell::nulled);
        it.ret(f, data)
    }

    Prefix "query" "port [port!]" [port] {
        let (varlist, op) = it.port_of(&port)?;
        let req = it.new_request(varlist, op.device, DeviceCommand::Query, Vec::new());
        it.submit(req)?;
        let name = it.devices.table[op.device].name;
        let pending = it.devices.pending.iter().filter(|r| r.port == varlist).count();
        let name = Cell::series(Kind::Text, it.make_text(name), 0);
        let info = it.make_context_with(
            Kind::Object,
            &[
                ("device", name),
                ("open", Cell::logic(op.state.contains(RequestState::OPEN))),
                ("pending", Cell::integer(pending as i64)),
            ],
        );
        it.ret(f, Cell::context(Kind::Object, info, None))
    }

    Prefix "wait" "budget [<opt> integer!]" [budget] {
        let budget = budget.as_integer().map_or(READ_POLL_BUDGET, |n| n.max(0) as usize);
        let n = it.wait_pending(budget)?;
        if !it.devices.pending.is_empty() {
            return it.ret(f, Cell::nulled());
        }
        it.ret(f, Cell::integer(n as i64))
    }
}

#[cfg(test)]
mod device_tests {
    use crate::ren::error::{AccessError, Error, ScriptError};
    use crate::ren::interp::{Interp, InterpConfig};

    fn molded(it: &mut Interp, code: &str) -> String {
        match it.do_string(code).unwrap() {
            Some(v) => it.mold(&v),
            None => String::from("~null~"),
        }
    }

    #[test]
    fn loopback_echoes_writes() {
        let mut it = Interp::new(InterpConfig::default());
        assert_eq!(molded(&mut it, "p: open \"loopback\" write p \"hi\" read p"), "#{6869}");
        assert_eq!(molded(&mut it, "write p #{0102} read p"), "#{0102}");
    }

    #[test]
    fn null_device_is_always_done() {
        let mut it = Interp::new(InterpConfig::default());
        assert_eq!(molded(&mut it, "p: open 'null write p \"x\" length-of read p"), "0");
    }

    #[test]
    fn completions_post_events() {
        let mut it = Interp::new(InterpConfig::default());
        let n = molded(&mut it, "p: open \"loopback\" write p #{01} read p length-of system-port/state");
        assert_eq!(n, "3");
        assert_eq!(molded(&mut it, "first system-port/state"), "#[event! open]");
        assert_eq!(molded(&mut it, "last system-port/state"), "#[event! read]");
    }

    #[test]
    fn pending_reads_finish_on_wait() {
        let mut it = Interp::new(InterpConfig::default());
        assert_eq!(molded(&mut it, "p: open \"loopback\" read/async p p/data"), "~null~");
        assert_eq!(molded(&mut it, "q: query p q/pending"), "1");
        assert_eq!(molded(&mut it, "wait 5"), "~null~");
        assert_eq!(molded(&mut it, "write p \"z\" wait 5"), "1");
        assert_eq!(molded(&mut it, "p/data"), "#{7A}");
    }

    #[test]
    fn port_failures() {
        let mut it = Interp::new(InterpConfig::default());
        assert!(matches!(
            it.do_string("read open \"loopback\""),
            Err(Error::Script(ScriptError::Timeout(_)))
        ));
        assert!(matches!(
            it.do_string("p: open 'null close p write p \"x\""),
            Err(Error::Script(ScriptError::NotOpen(_)))
        ));
        assert!(matches!(
            it.do_string("open \"tcp\""),
            Err(Error::Script(ScriptError::BadValue(_)))
        ));
    }

    #[test]
    fn missing_commands_are_access_errors() {
        let mut it = Interp::new(InterpConfig::default());
        let port = it.do_string("open 'null").unwrap().unwrap();
        let (varlist, op) = it.port_of(&port).unwrap();
        let req = it.new_request(varlist, op.device, super::DeviceCommand::Connect, Vec::new());
        assert!(matches!(
            it.submit(req),
            Err(crate::ren::error::Escape::Fail(f))
                if matches!(f.error, Error::Access(AccessError::NoDeviceCommand(..)))
        ));
    }
}
