// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Opcode metadata and a scanner that walks a pickle without executing it.
//!
//! ```
//! # use pickle_engine::{ops, value_to_vec, SerOptions, Value};
//! let bytes = value_to_vec(&Value::list(vec![Value::I64(1)]), SerOptions::new()).unwrap();
//! let names: Vec<_> = ops::genops(&bytes).map(|op| op.unwrap().info.name).collect();
//! assert_eq!(names, ["PROTO", "EMPTY_LIST", "BINPUT", "BININT1", "APPEND", "STOP"]);
//! ```

use std::fmt;
use std::io;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::consts::*;
use crate::error::{Error, ErrorCode, Result};

/// How an opcode's argument is laid out in the stream.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ArgKind {
    Nothing,
    U8,
    U16,
    I32,
    U32,
    U64,
    /// Big-endian f64.
    Float8,
    /// Newline-terminated text.
    Line,
    /// Two newline-terminated lines (module and name).
    TwoLines,
    /// Data with a u8 length prefix.
    Bytes1,
    /// Data with a u32 length prefix.
    Bytes4,
    /// Data with an i32 length prefix.
    SignedBytes4,
    /// Data with a u64 length prefix.
    Bytes8,
}

/// Static description of one opcode.
#[derive(Debug)]
pub struct OpInfo {
    pub code: u8,
    pub name: &'static str,
    pub arg: ArgKind,
    /// Protocol that introduced the opcode.
    pub proto: u8,
}

macro_rules! ops {
    ($($code:ident $arg:ident $proto:expr),* $(,)?) => {
        &[$(OpInfo { code: $code, name: stringify!($code), arg: ArgKind::$arg, proto: $proto }),*]
    }
}

/// Every opcode of protocols 0 to 5.
pub static OPCODES: &[OpInfo] = ops![
    MARK Nothing 0, STOP Nothing 0, POP Nothing 0, POP_MARK Nothing 1, DUP Nothing 0,
    FLOAT Line 0, INT Line 0, LONG Line 0, NONE Nothing 0, PERSID Line 0,
    STRING Line 0, UNICODE Line 0, APPEND Nothing 0, BUILD Nothing 0,
    GLOBAL TwoLines 0, DICT Nothing 0, GET Line 0, INST TwoLines 0, LIST Nothing 0,
    PUT Line 0, REDUCE Nothing 0, SETITEM Nothing 0, TUPLE Nothing 0,

    BINPERSID Nothing 1, BININT I32 1, BININT1 U8 1, BININT2 U16 1,
    BINSTRING SignedBytes4 1, SHORT_BINSTRING Bytes1 1, BINUNICODE Bytes4 1,
    EMPTY_DICT Nothing 1, APPENDS Nothing 1, EMPTY_LIST Nothing 1, OBJ Nothing 1,
    SETITEMS Nothing 1, EMPTY_TUPLE Nothing 1, BINFLOAT Float8 1, BINPUT U8 1,
    LONG_BINPUT U32 1, BINGET U8 1, LONG_BINGET U32 1,

    PROTO U8 2, NEWOBJ Nothing 2, EXT1 U8 2, EXT2 U16 2, EXT4 I32 2,
    TUPLE1 Nothing 2, TUPLE2 Nothing 2, TUPLE3 Nothing 2, NEWTRUE Nothing 2,
    NEWFALSE Nothing 2, LONG1 Bytes1 2, LONG4 SignedBytes4 2,

    BINBYTES Bytes4 3, SHORT_BINBYTES Bytes1 3,

    SHORT_BINUNICODE Bytes1 4, BINUNICODE8 Bytes8 4, BINBYTES8 Bytes8 4,
    EMPTY_SET Nothing 4, ADDITEMS Nothing 4, FROZENSET Nothing 4,
    NEWOBJ_EX Nothing 4, STACK_GLOBAL Nothing 4, MEMOIZE Nothing 4, FRAME U64 4,

    BYTEARRAY8 Bytes8 5, NEXT_BUFFER Nothing 5, READONLY_BUFFER Nothing 5,
];

/// Look up the description of an opcode byte.
pub fn opcode(code: u8) -> Option<&'static OpInfo> {
    OPCODES.iter().find(|info| info.code == code)
}

/// A decoded opcode argument.
#[derive(Clone, PartialEq, Debug)]
pub enum Arg {
    None,
    Int(i64),
    Float(f64),
    Line(Vec<u8>),
    Lines(Vec<u8>, Vec<u8>),
    Data(Vec<u8>),
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Arg::None => Ok(()),
            Arg::Int(i) => write!(f, "{}", i),
            Arg::Float(x) => write!(f, "{:?}", x),
            Arg::Line(ref l) => write_escaped(f, l),
            Arg::Lines(ref m, ref n) => {
                write_escaped(f, m)?;
                f.write_str(" ")?;
                write_escaped(f, n)
            }
            Arg::Data(ref d) => write_escaped(f, d),
        }
    }
}

fn write_escaped(f: &mut fmt::Formatter, bytes: &[u8]) -> fmt::Result {
    f.write_str("'")?;
    for &b in bytes {
        for c in std::ascii::escape_default(b) {
            fmt::Write::write_char(f, c as char)?;
        }
    }
    f.write_str("'")
}

/// One opcode with its argument and stream offset.
#[derive(Debug)]
pub struct Op {
    pub info: &'static OpInfo,
    pub arg: Arg,
    pub pos: usize,
}

/// Iterator over the opcodes of a pickle; see [`genops`].
pub struct Ops<'a> {
    data: &'a [u8],
    pos: usize,
    done: bool,
}

/// Walk the opcodes of the pickle at the start of `data`, up to and
/// including STOP.  Stops after the first error.
pub fn genops(data: &[u8]) -> Ops {
    Ops { data, pos: 0, done: false }
}

impl<'a> Ops<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(Error::Eval(ErrorCode::EOFWhileParsing, self.data.len()));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn line(&mut self) -> Result<Vec<u8>> {
        match self.data[self.pos..].iter().position(|&b| b == b'\n') {
            Some(len) => {
                let mut line = self.take(len + 1)?.to_vec();
                line.pop();
                Ok(line)
            }
            None => Err(Error::Eval(ErrorCode::EOFWhileParsing, self.data.len())),
        }
    }

    fn data(&mut self, len: u64) -> Result<Arg> {
        if len > (self.data.len() - self.pos) as u64 {
            return Err(Error::Eval(ErrorCode::EOFWhileParsing, self.data.len()));
        }
        Ok(Arg::Data(self.take(len as usize)?.to_vec()))
    }

    fn arg(&mut self, kind: ArgKind) -> Result<Arg> {
        Ok(match kind {
            ArgKind::Nothing => Arg::None,
            ArgKind::U8 => Arg::Int(self.take(1)?[0] as i64),
            ArgKind::U16 => Arg::Int(LittleEndian::read_u16(self.take(2)?) as i64),
            ArgKind::I32 => Arg::Int(LittleEndian::read_i32(self.take(4)?) as i64),
            ArgKind::U32 => Arg::Int(LittleEndian::read_u32(self.take(4)?) as i64),
            ArgKind::U64 => {
                let at = self.pos;
                let n = LittleEndian::read_u64(self.take(8)?);
                if n > i64::MAX as u64 {
                    return Err(Error::Overflow(n, at));
                }
                Arg::Int(n as i64)
            }
            ArgKind::Float8 => Arg::Float(BigEndian::read_f64(self.take(8)?)),
            ArgKind::Line => Arg::Line(self.line()?),
            ArgKind::TwoLines => {
                let module = self.line()?;
                Arg::Lines(module, self.line()?)
            }
            ArgKind::Bytes1 => {
                let len = self.take(1)?[0];
                self.data(len as u64)?
            }
            ArgKind::Bytes4 => {
                let len = LittleEndian::read_u32(self.take(4)?);
                self.data(len as u64)?
            }
            ArgKind::SignedBytes4 => {
                let at = self.pos;
                let len = LittleEndian::read_i32(self.take(4)?);
                if len < 0 {
                    return Err(Error::Eval(ErrorCode::NegativeLength, at));
                }
                self.data(len as u64)?
            }
            ArgKind::Bytes8 => {
                let len = LittleEndian::read_u64(self.take(8)?);
                self.data(len)?
            }
        })
    }

    fn next_op(&mut self) -> Result<Op> {
        let pos = self.pos;
        let code = match self.data.get(pos) {
            Some(&code) => code,
            None => return Err(Error::Eval(ErrorCode::EOFWhileParsing, pos)),
        };
        let info = match opcode(code) {
            Some(info) => info,
            None => return Err(Error::Eval(ErrorCode::Unsupported(code as char), pos)),
        };
        self.pos += 1;
        let arg = self.arg(info.arg)?;
        Ok(Op { info, arg, pos })
    }
}

impl<'a> Iterator for Ops<'a> {
    type Item = Result<Op>;

    fn next(&mut self) -> Option<Result<Op>> {
        if self.done {
            return None;
        }
        let op = self.next_op();
        match op {
            Ok(ref op) if op.info.code == STOP => self.done = true,
            Ok(_) => {}
            Err(_) => self.done = true,
        }
        Some(op)
    }
}

/// Opcodes that consume the topmost mark.
fn pops_mark(code: u8) -> bool {
    matches!(code, TUPLE | LIST | DICT | INST | OBJ | APPENDS | SETITEMS |
             ADDITEMS | FROZENSET | POP_MARK)
}

/// Write a listing of the pickle in `data`: offset, opcode byte, name and
/// argument, indented by the number of open marks.
pub fn dis<W: fmt::Write>(data: &[u8], out: &mut W) -> Result<()> {
    let mut marks = 0usize;
    for op in genops(data) {
        let op = op?;
        if pops_mark(op.info.code) {
            marks = marks.saturating_sub(1);
        }
        let code = std::ascii::escape_default(op.info.code).map(|c| c as char).collect::<String>();
        writeln!(out, "{:6}: {:<4} {}{:<16} {}", op.pos, code, "    ".repeat(marks),
                 op.info.name, op.arg).map_err(fmt_error)?;
        if op.info.code == MARK {
            marks += 1;
        }
    }
    Ok(())
}

fn fmt_error(_: fmt::Error) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::Other, "formatter error"))
}
