//! A custom coredump uploader error.
use std::fmt;
use std::io;
use std::result;

use thiserror::Error;

#[derive(Error, Debug)]
/// A custom coredump uploader error
pub enum Error {
    /// An IO based error
    IO(io::Error),
    /// External tool (gdb, eu-unstrip) failed or reported diagnostics
    Tool(String),
    /// Debugger output contains no stack frame marker at all
    NoFrames,
    /// Code id is not a valid hex string
    CodeId(String),
    /// Goblin error
    Elf(goblin::error::Error),
    /// Serde json error
    Json(serde_json::Error),
    /// Invalid upload configuration
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::IO(ref err) => write!(f, "{err}"),
            Error::Tool(ref msg) => write!(f, "Tool: {msg}"),
            Error::NoFrames => write!(f, "gdb output error: no stack frames found"),
            Error::CodeId(ref msg) => write!(f, "Code id: {msg}"),
            Error::Elf(ref err) => write!(f, "Goblin: {err}"),
            Error::Json(ref err) => write!(f, "Json: {err}"),
            Error::Config(ref msg) => write!(f, "Config: {msg}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IO(err)
    }
}

impl From<goblin::error::Error> for Error {
    fn from(err: goblin::error::Error) -> Error {
        Error::Elf(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Json(err)
    }
}

impl From<hex::FromHexError> for Error {
    fn from(err: hex::FromHexError) -> Error {
        Error::CodeId(err.to_string())
    }
}

pub type Result<T> = result::Result<T, Error>;
