// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! The opcode table, grouped by the protocol that introduced each opcode,
//! plus the size thresholds shared by the encoder and decoder.
//!
//! Names follow pickle.py.  Plain constants rather than an enum, because the
//! decoder matches on raw bytes and the encoder writes raw bytes.

/// Highest protocol this crate can write.
pub const HIGHEST_PROTOCOL: u8 = 5;
/// Protocol used by `SerOptions::new()`.
pub const DEFAULT_PROTOCOL: u8 = 3;

/// Number of items per APPENDS / SETITEMS / ADDITEMS batch.
pub const BATCH_SIZE: usize = 1000;
/// A frame is committed once it holds at least this many bytes.
pub const FRAME_SIZE_TARGET: usize = 64 * 1024;
/// FRAME opcode plus its u64 length.
pub const FRAME_HEADER_SIZE: usize = 9;

// Protocol 0 (text) and the stack/memo machinery.
pub const MARK             : u8 = b'(';    // push markobject
pub const STOP             : u8 = b'.';    // end of pickle
pub const POP              : u8 = b'0';    // discard stack top
pub const POP_MARK         : u8 = b'1';    // discard everything above the topmost mark
pub const DUP              : u8 = b'2';    // push stack top again
pub const FLOAT            : u8 = b'F';    // float; decimal line
pub const INT              : u8 = b'I';    // int or bool ("00"/"01"); decimal line
pub const LONG             : u8 = b'L';    // long; decimal line, optional L suffix
pub const NONE             : u8 = b'N';    // None
pub const PERSID           : u8 = b'P';    // persistent reference; token is a line
pub const STRING           : u8 = b'S';    // byte string; quoted, escaped line
pub const UNICODE          : u8 = b'V';    // text; raw-unicode-escaped line
pub const APPEND           : u8 = b'a';    // append stack top to the list below
pub const BUILD            : u8 = b'b';    // apply state to the object below
pub const GLOBAL           : u8 = b'c';    // module line, name line
pub const DICT             : u8 = b'd';    // dict from key/value pairs above mark
pub const GET              : u8 = b'g';    // memo get; decimal line
pub const INST             : u8 = b'i';    // instance; module line, name line, args above mark
pub const LIST             : u8 = b'l';    // list from items above mark
pub const PUT              : u8 = b'p';    // memo put; decimal line
pub const REDUCE           : u8 = b'R';    // callable(*argtuple)
pub const SETITEM          : u8 = b's';    // set one key/value pair on the dict below
pub const TUPLE            : u8 = b't';    // tuple from items above mark

// Protocol 1 (binary).
pub const BINPERSID        : u8 = b'Q';    // persistent reference; token on stack
pub const BININT           : u8 = b'J';    // i32 LE
pub const BININT1          : u8 = b'K';    // u8
pub const BININT2          : u8 = b'M';    // u16 LE
pub const BINSTRING        : u8 = b'T';    // byte string; i32 LE length
pub const SHORT_BINSTRING  : u8 = b'U';    // byte string; u8 length
pub const BINUNICODE       : u8 = b'X';    // UTF-8 text; u32 LE length
pub const EMPTY_DICT       : u8 = b'}';    // {}
pub const APPENDS          : u8 = b'e';    // extend the list below by items above mark
pub const EMPTY_LIST       : u8 = b']';    // []
pub const OBJ              : u8 = b'o';    // instance; class and args above mark
pub const SETITEMS         : u8 = b'u';    // set key/value pairs above mark
pub const EMPTY_TUPLE      : u8 = b')';    // ()
pub const BINFLOAT         : u8 = b'G';    // f64 BE
pub const BINPUT           : u8 = b'q';    // memo put; u8 index
pub const LONG_BINPUT      : u8 = b'r';    // memo put; u32 LE index
pub const BINGET           : u8 = b'h';    // memo get; u8 index
pub const LONG_BINGET      : u8 = b'j';    // memo get; u32 LE index

// Protocol 2.
pub const PROTO            : u8 = b'\x80'; // protocol header; u8 version
pub const NEWOBJ           : u8 = b'\x81'; // cls.__new__(cls, *args)
pub const EXT1             : u8 = b'\x82'; // extension code; u8
pub const EXT2             : u8 = b'\x83'; // extension code; u16 LE
pub const EXT4             : u8 = b'\x84'; // extension code; i32 LE
pub const TUPLE1           : u8 = b'\x85'; // 1-tuple from stack top
pub const TUPLE2           : u8 = b'\x86'; // 2-tuple from two topmost items
pub const TUPLE3           : u8 = b'\x87'; // 3-tuple from three topmost items
pub const NEWTRUE          : u8 = b'\x88'; // True
pub const NEWFALSE         : u8 = b'\x89'; // False
pub const LONG1            : u8 = b'\x8a'; // long; u8 length, two's complement LE
pub const LONG4            : u8 = b'\x8b'; // long; i32 LE length, two's complement LE

// Protocol 3.
pub const BINBYTES         : u8 = b'B';    // bytes; u32 LE length
pub const SHORT_BINBYTES   : u8 = b'C';    // bytes; u8 length

// Protocol 4.
pub const SHORT_BINUNICODE : u8 = b'\x8c'; // UTF-8 text; u8 length
pub const BINUNICODE8      : u8 = b'\x8d'; // UTF-8 text; u64 LE length
pub const BINBYTES8        : u8 = b'\x8e'; // bytes; u64 LE length
pub const EMPTY_SET        : u8 = b'\x8f'; // set()
pub const ADDITEMS         : u8 = b'\x90'; // add items above mark to the set below
pub const FROZENSET        : u8 = b'\x91'; // frozenset from items above mark
pub const NEWOBJ_EX        : u8 = b'\x92'; // cls.__new__(cls, *args, **kwargs)
pub const STACK_GLOBAL     : u8 = b'\x93'; // like GLOBAL, names taken from the stack
pub const MEMOIZE          : u8 = b'\x94'; // memo put at the next free index
pub const FRAME            : u8 = b'\x95'; // frame header; u64 LE length

// Protocol 5.
pub const BYTEARRAY8       : u8 = b'\x96'; // bytearray; u64 LE length
pub const NEXT_BUFFER      : u8 = b'\x97'; // next out-of-band buffer
pub const READONLY_BUFFER  : u8 = b'\x98'; // make stack top read-only
