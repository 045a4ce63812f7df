// (C) 2020 Brandon Lewis
//
// The set of runtime errors. All are catchable; they unwind through the
// interpreter as Results until a `try`/`protect` word or the host's top
// level handles them.

use crate::symbol::Symbol;
use crate::value::{TypeSet, TypeTag};
use thiserror::Error;

// The result of any operation.
pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, Clone, Debug, PartialEq)]
pub enum Error {
    #[error("stack underflow")]
    StackUnderflow,

    #[error("index out of range: {0}")]
    OutOfRange(i64),

    #[error("wrong type for {context}: expected {expect:?}, got {got:?}")]
    WrongType {
        context: &'static str,
        expect: TypeSet,
        got: TypeTag,
    },

    #[error("not found: {0}")]
    NotFound(Symbol),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("operation requires a finite list: {0}")]
    Indefinite(&'static str),

    #[error("inconsistent inheritance")]
    InconsistentInheritance,

    #[error("{0}")]
    Failed(String),

    #[error("user quit")]
    UserQuit,

    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl Error {
    pub fn wrong_type(context: &'static str, expect: TypeSet, got: TypeTag) -> Error {
        Error::WrongType {
            context,
            expect,
            got,
        }
    }

    pub fn failed(msg: impl Into<String>) -> Error {
        Error::Failed(msg.into())
    }
}
