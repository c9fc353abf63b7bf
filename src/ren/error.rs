// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/ren/error.rs

// Error taxonomy. Failures are ordinary Rust errors until they cross
// a frame boundary, where they gain an ERROR! context recording the
// frame labels and source position they came from.

// <>

use thiserror::Error;

use super::cell::Cell;
use super::interp::Interp;
use super::kind::Kind;
use super::node::SeriesId;
use super::symtab::Sym;
use super::FrameId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("{0} has no value")]
    NoValue(String),
    #[error("{0} word is not bound to a context")]
    Unbound(String),
    #[error("{0} needs a value, not void")]
    NeedNonVoid(String),
    #[error("{0} needs a value after it")]
    NeedNonEnd(String),
    #[error("{0} is missing its {1} argument")]
    NoArg(String, String),
    #[error("{action} does not allow {found} for its {param} argument")]
    ExpectArg {
        action: String,
        param: String,
        found: String,
    },
    #[error("expected {expected}, not {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("value out of range: {0}")]
    OutOfRange(String),
    #[error("duplicate variable specified: {0}")]
    DupVars(String),
    #[error("incompatible or invalid refinement: {0}")]
    BadRefine(String),
    #[error("no catch for throw: {0}")]
    NoCatch(String),
    #[error("invalid argument: {0}")]
    BadValue(String),
    #[error("invalid function spec: {0}")]
    BadSpec(String),
    #[error("cannot use {0} on {1} value")]
    CannotUse(String, String),
    #[error("{0} has no field {1}")]
    BadPath(String, String),
    #[error("void values are neither true nor false")]
    VoidConditional,
    #[error("series is being iterated and cannot be modified")]
    SeriesHeld,
    #[error("series data is no longer accessible")]
    Inaccessible,
    #[error("math or number overflow")]
    Overflow,
    #[error("attempt to divide by zero")]
    ZeroDivide,
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("port is not open: {0}")]
    NotOpen(String),
    #[error("port is not connected: {0}")]
    NotConnected(String),
    #[error("port action timed out: {0}")]
    Timeout(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccessError {
    #[error("protected value or series cannot be modified: {0}")]
    Protected(String),
    #[error("{0} device does not support {1}")]
    NoDeviceCommand(String, String),
    #[error("{0} request failed: {1}")]
    DeviceFailed(String, String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InternalError {
    #[error("stack overflow")]
    StackOverflow,
    #[error("not enough memory")]
    NoMemory,
    #[error("halted by user or script")]
    Halt,
    #[error("{0}")]
    Panic(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("Script Error: {0}")]
    Script(#[from] ScriptError),
    #[error("Access Error: {0}")]
    Access(#[from] AccessError),
    #[error("Internal Error: {0}")]
    Internal(#[from] InternalError),
    #[error("User Error: {0}")]
    User(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Word naming the error's category, as stored in an ERROR! `type`
    pub fn category(&self) -> &'static str {
        match self {
            Error::Script(_) => "script",
            Error::Access(_) => "access",
            Error::Internal(_) => "internal",
            Error::User(_) => "user",
        }
    }

    /// Word naming the specific error, as stored in an ERROR! `id`
    pub fn id(&self) -> &'static str {
        match self {
            Error::Script(e) => match e {
                ScriptError::NoValue(_) => "no-value",
                ScriptError::Unbound(_) => "not-bound",
                ScriptError::NeedNonVoid(_) => "need-non-void",
                ScriptError::NeedNonEnd(_) => "need-non-end",
                ScriptError::NoArg(..) => "no-arg",
                ScriptError::ExpectArg { .. } => "expect-arg",
                ScriptError::TypeMismatch { .. } => "invalid-type",
                ScriptError::OutOfRange(_) => "out-of-range",
                ScriptError::DupVars(_) => "dup-vars",
                ScriptError::BadRefine(_) => "bad-refine",
                ScriptError::NoCatch(_) => "no-catch",
                ScriptError::BadValue(_) => "invalid-arg",
                ScriptError::BadSpec(_) => "bad-func-def",
                ScriptError::CannotUse(..) => "cannot-use",
                ScriptError::BadPath(..) => "bad-path-pick",
                ScriptError::VoidConditional => "void-conditional",
                ScriptError::SeriesHeld => "series-held",
                ScriptError::Inaccessible => "series-data-freed",
                ScriptError::Overflow => "overflow",
                ScriptError::ZeroDivide => "zero-divide",
                ScriptError::Syntax(_) => "syntax",
                ScriptError::NotOpen(_) => "not-open",
                ScriptError::NotConnected(_) => "not-connected",
                ScriptError::Timeout(_) => "timeout",
            },
            Error::Access(e) => match e {
                AccessError::Protected(_) => "protected",
                AccessError::NoDeviceCommand(..) => "no-port-action",
                AccessError::DeviceFailed(..) => "device-failed",
            },
            Error::Internal(e) => match e {
                InternalError::StackOverflow => "stack-overflow",
                InternalError::NoMemory => "no-memory",
                InternalError::Halt => "halt",
                InternalError::Panic(_) => "panic",
            },
            Error::User(_) => "message",
        }
    }

    /// Message without the category prefix
    pub fn message(&self) -> String {
        match self {
            Error::Script(e) => e.to_string(),
            Error::Access(e) => e.to_string(),
            Error::Internal(e) => e.to_string(),
            Error::User(m) => m.clone(),
        }
    }
}

/// A failure in flight; the context is made once the frame chain is known
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error}")]
pub struct Fault {
    pub error: Error,
    pub context: Option<SeriesId>,
}

/// Why an evaluation stopped early
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Escape {
    /// Non-local exit; the label and value wait in the thrown slots
    #[error("uncaught throw")]
    Thrown,
    #[error("{0}")]
    Fail(Fault),
}

pub type EvalResult<T> = std::result::Result<T, Escape>;

impl From<Error> for Escape {
    fn from(error: Error) -> Self {
        Escape::Fail(Fault {
            error,
            context: None,
        })
    }
}

impl From<ScriptError> for Escape {
    fn from(e: ScriptError) -> Self {
        Error::Script(e).into()
    }
}

impl From<AccessError> for Escape {
    fn from(e: AccessError) -> Self {
        Error::Access(e).into()
    }
}

impl From<InternalError> for Escape {
    fn from(e: InternalError) -> Self {
        Error::Internal(e).into()
    }
}

impl Interp {
    /// Builds the ERROR! context for a failure raised beneath a frame
    pub(crate) fn make_error_context(
        &mut self,
        error: &Error,
        where_: &[Sym],
        near: Option<String>,
    ) -> SeriesId {
        let category = self.symtab.get_id(error.category());
        let id = self.symtab.get_id(error.id());
        let message = self.make_text(&error.message());

        let where_cells: Vec<Cell> = where_
            .iter()
            .map(|s| Cell::word(Kind::Word, *s))
            .collect();
        let where_arr = self.make_array_from(where_cells, true);

        let near = match near {
            Some(n) => Cell::series(Kind::Text, self.make_text(&n), 0),
            None => Cell::nulled(),
        };

        let fields = [
            ("type", Cell::word(Kind::Word, category)),
            ("id", Cell::word(Kind::Word, id)),
            ("message", Cell::series(Kind::Text, message, 0)),
            ("near", near),
            ("where", Cell::series(Kind::Block, where_arr, 0)),
        ];

        let ctx = self.make_context_with(Kind::Error, &fields);
        self.faults.insert(ctx, error.clone());
        ctx
    }

    /// Gives a context to a failure passing out of a frame, if it lacks one
    pub(crate) fn contextualize(&mut self, f: FrameId, esc: Escape) -> Escape {
        match esc {
            Escape::Fail(Fault {
                error,
                context: None,
            }) => {
                let where_ = self.frame_labels(f);
                let near = self.near_text(f);
                log::debug!("failure: {} (near {:?})", error, near);
                let ctx = self.make_error_context(&error, &where_, near);
                self.fault_in_flight = Some(ctx);
                Escape::Fail(Fault {
                    error,
                    context: Some(ctx),
                })
            }
            other => other,
        }
    }

    /// Turns a caught failure into an ERROR! value
    pub(crate) fn fault_to_value(&mut self, fault: Fault) -> Cell {
        let ctx = match fault.context {
            Some(ctx) => ctx,
            None => self.make_error_context(&fault.error, &[], None),
        };
        self.fault_in_flight = None;
        Cell::context(Kind::Error, ctx, None)
    }

    /// Recovers the failure an ERROR! value describes, so it may be raised again
    pub(crate) fn value_to_fault(&mut self, err: &Cell) -> Fault {
        match err.as_context() {
            Some(ctx) => Fault {
                error: self
                    .faults
                    .get(&ctx)
                    .cloned()
                    .unwrap_or_else(|| Error::User(String::from("error"))),
                context: Some(ctx),
            },
            None => Fault {
                error: Error::User(self.form(err)),
                context: None,
            },
        }
    }

    /// Report for a failure which nothing caught
    pub fn describe_fault(&self, fault: &Fault) -> String {
        let mut out = fault.error.to_string();
        if let Some(ctx) = fault.context {
            if let Some(near) = self.context_field(ctx, "near") {
                if near.kind() == Kind::Text {
                    out.push_str("\n** Near: ");
                    out.push_str(&self.form(&near));
                }
            }
            if let Some(where_) = self.context_field(ctx, "where") {
                if where_.kind() == Kind::Block {
                    out.push_str("\n** Where: ");
                    out.push_str(&self.form(&where_));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn categories_and_ids() {
        let e: Error = ScriptError::NoValue("x".into()).into();
        assert_eq!(e.category(), "script");
        assert_eq!(e.id(), "no-value");
        assert_eq!(e.message(), "x has no value");
        assert_eq!(e.to_string(), "Script Error: x has no value");

        let e: Error = AccessError::Protected("block".into()).into();
        assert_eq!(e.category(), "access");
    }

    #[test]
    fn escapes_from_errors() {
        let esc: Escape = ScriptError::ZeroDivide.into();
        match esc {
            Escape::Fail(Fault { error, context }) => {
                assert_eq!(error, Error::Script(ScriptError::ZeroDivide));
                assert!(context.is_none());
            }
            Escape::Thrown => panic!("expected failure"),
        }
    }
}
