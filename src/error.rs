// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Error objects and codes

use std::fmt;
use std::io;
use std::error;
use std::result;
use serde::{ser, de};

#[derive(Clone, PartialEq, Debug)]
pub enum ErrorCode {
    // Decoding

    /// Unsupported opcode
    Unsupported(char),
    /// EOF while parsing op argument
    EOFWhileParsing,
    /// Stack underflowed
    StackUnderflow,
    /// Length prefix found negative
    NegativeLength,
    /// String decoding as UTF-8 failed
    StringNotUTF8,
    /// Wrong stack top type for opcode
    InvalidStackTop(&'static str, String),
    /// Value not hashable, but used as dict key or set item
    ValueNotHashable,
    /// Recursive structure found where a tree was required
    Recursive,
    /// REDUCE or NEWOBJ target is not a module global
    UnresolvedGlobal,
    /// The resolver refused a module global
    UnsupportedGlobal(Vec<u8>, Vec<u8>),
    /// A value was missing from the memo
    MissingMemo(u64),
    /// PUT with an id other than the next sequential one
    MemoIdMismatch { expected: u64, found: u64 },
    /// Invalid literal found
    InvalidLiteral(Vec<u8>),
    /// Found trailing bytes after STOP opcode
    TrailingBytes,
    /// Invalid value in pickle stream
    InvalidValue(String),
    /// PROTO header names a protocol newer than we know
    UnsupportedProtocol(u8),
    /// FRAME opcode before the end of the current frame
    FrameMismatch,
    /// Opcode argument extends past the end of the current frame
    FrameOverrun,
    /// Persistent reference without a persistent_load hook
    NoPersistentLoad,
    /// EXT opcode with a code nobody registered
    UnregisteredExtension(i64),
    /// Structure deserialization error (e.g., unknown variant)
    Structure(String),

    // Encoding

    /// Value has no reduction and no dispatch table entry
    Unpicklable(String),
    /// Reduction item source is a plain value where an iterator is required
    NotAnIterator(&'static str, String),
    /// Reduction item source cannot be iterated at all
    NotIterable(&'static str, String),
    /// Global name that cannot be written in the chosen protocol
    InvalidGlobalName(String),
    /// Persistent id token that cannot be written in the chosen protocol
    InvalidPersistentId(String),
    /// Memo grew beyond what binary GET/PUT can address
    MemoTooLarge(u64),
    /// Value nesting exceeded the configured limit
    RecursionLimit(usize),

    // Extension registry

    /// Extension code outside 1..=0x7fffffff
    InvalidExtensionCode(i64),
    /// Code or name pair already registered with a different partner
    ExtensionConflict { code: i64, module: String, name: String },
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ErrorCode::Unsupported(ch) => write!(fmt, "unsupported opcode {:?}", ch),
            ErrorCode::EOFWhileParsing => write!(fmt, "EOF while parsing"),
            ErrorCode::StackUnderflow => write!(fmt, "pickle stack underflow"),
            ErrorCode::NegativeLength => write!(fmt, "negative length prefix"),
            ErrorCode::StringNotUTF8 => write!(fmt, "string is not UTF-8 encoded"),
            ErrorCode::InvalidStackTop(what, ref it) =>
                write!(fmt, "invalid stack top, expected {}, got {}", what, it),
            ErrorCode::ValueNotHashable => write!(fmt, "dict key or set item not hashable"),
            ErrorCode::Recursive => write!(fmt, "recursive structure found"),
            ErrorCode::UnresolvedGlobal => write!(fmt, "unresolved global reference"),
            ErrorCode::UnsupportedGlobal(ref m, ref g) =>
                write!(fmt, "unsupported global: {}.{}",
                       String::from_utf8_lossy(m), String::from_utf8_lossy(g)),
            ErrorCode::MissingMemo(n) => write!(fmt, "missing memo with id {}", n),
            ErrorCode::MemoIdMismatch { expected, found } =>
                write!(fmt, "memo id {} out of sequence, expected {}", found, expected),
            ErrorCode::InvalidLiteral(ref l) =>
                write!(fmt, "literal is invalid: {}", String::from_utf8_lossy(l)),
            ErrorCode::TrailingBytes => write!(fmt, "trailing bytes found"),
            ErrorCode::InvalidValue(ref s) => write!(fmt, "invalid value: {}", s),
            ErrorCode::UnsupportedProtocol(p) => write!(fmt, "unsupported pickle protocol: {}", p),
            ErrorCode::FrameMismatch =>
                write!(fmt, "beginning of a new frame before end of current frame"),
            ErrorCode::FrameOverrun => write!(fmt, "pickle exhausted before end of frame"),
            ErrorCode::NoPersistentLoad =>
                write!(fmt, "persistent id instruction found, but no persistent_load hook set"),
            ErrorCode::UnregisteredExtension(code) =>
                write!(fmt, "unregistered extension code {}", code),
            ErrorCode::Structure(ref s) => fmt.write_str(s),
            ErrorCode::Unpicklable(ref t) => write!(fmt, "cannot pickle {} values", t),
            ErrorCode::NotAnIterator(what, ref t) =>
                write!(fmt, "{} must be an iterator, got {}", what, t),
            ErrorCode::NotIterable(what, ref t) =>
                write!(fmt, "{} must be iterable, got {}", what, t),
            ErrorCode::InvalidGlobalName(ref n) => write!(fmt, "cannot pickle global {:?}", n),
            ErrorCode::InvalidPersistentId(ref t) =>
                write!(fmt, "persistent id must be a single line of ASCII, got {}", t),
            ErrorCode::MemoTooLarge(n) => write!(fmt, "memo id {} too large", n),
            ErrorCode::RecursionLimit(n) =>
                write!(fmt, "maximum nesting depth {} exceeded", n),
            ErrorCode::InvalidExtensionCode(c) => write!(fmt, "extension code {} out of range", c),
            ErrorCode::ExtensionConflict { code, ref module, ref name } =>
                write!(fmt, "extension code {} conflicts with {}.{}", code, module, name),
        }
    }
}

/// This type represents all possible errors that can occur when serializing or
/// deserializing a value.
#[derive(Debug)]
pub enum Error {
    /// Some IO error occurred when serializing or deserializing a value.
    Io(io::Error),
    /// The pickle had some error while interpreting.
    Eval(ErrorCode, usize),
    /// A declared length (first field) at the given offset does not fit
    /// this platform's address space.
    Overflow(u64, usize),
    /// The value could not be pickled.
    Encode(ErrorCode),
    /// The extension registry rejected a change.
    Registry(ErrorCode),
    /// Syntax error while transforming into Rust values.
    Syntax(ErrorCode),
}

impl Error {
    /// The error code, if this is not an I/O or overflow error.
    pub fn code(&self) -> Option<&ErrorCode> {
        match *self {
            Error::Eval(ref code, _) | Error::Encode(ref code) |
            Error::Registry(ref code) | Error::Syntax(ref code) => Some(code),
            Error::Io(_) | Error::Overflow(..) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Error {
        Error::Io(error)
    }
}

pub type Result<T> = result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref error) => error.fmt(fmt),
            Error::Eval(ref code, offset) => write!(fmt, "eval error at offset {}: {}",
                                                    offset, code),
            Error::Overflow(len, offset) =>
                write!(fmt, "length {} at offset {} exceeds the maximum size", len, offset),
            Error::Encode(ref code) => write!(fmt, "pickling error: {}", code),
            Error::Registry(ref code) => write!(fmt, "extension registry error: {}", code),
            Error::Syntax(ref code) => write!(fmt, "decoding error: {}", code)
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Io(ref error) => Some(error),
            _ => None,
        }
    }
}

impl de::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Error {
        Error::Syntax(ErrorCode::Structure(msg.to_string()))
    }
}

impl ser::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Error {
        Error::Syntax(ErrorCode::Structure(msg.to_string()))
    }
}
