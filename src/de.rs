// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! # Pickle deserialization
//!
//! Note: Pickles are not a declarative format, but a program for a stack-based
//! VM.  Each value that is decoded is simply put on the stack, and some
//! operations pop items from the stack and construct new data with them.
//!
//! This means that we cannot decode pickles directly with the serde visitor,
//! since we don't know e.g. when a map starts.  Instead, we have to interpret
//! the pickle into an intermediate representation of Python objects (i.e.
//! `value::Value`) and can then deserialize this into other serde-supported
//! data types.
//!
//! The [`Unpickler`] is resumable: input is pushed in with `feed`, and `poll`
//! runs the machine until the pickle is complete or the buffered input ends
//! in the middle of an opcode.  Every opcode reads all of its arguments
//! before it touches the stack, so an incomplete opcode is simply retried
//! once more input has arrived.

use std::cell::RefCell;
use std::char;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::mem;
use std::rc::Rc;
use std::str;
use std::sync::Arc;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use iter_read::IterRead;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::de::DeserializeOwned;

use crate::compat::CompatTable;
use crate::consts::*;
use crate::error::{Error, ErrorCode, Result};
use crate::ext::ExtensionRegistry;
use crate::memo::DecodeMemo;
use crate::resolve::{CallContext, Resolver, TableResolver};
use crate::value::{Global, HashableValue, Heights, Value, dismantle, from_value, measure};

/// Options for deserializing.
#[derive(Clone)]
pub struct DeOptions {
    decode_strings: bool,
    fix_imports: bool,
    lenient_memo: bool,
    recursion_limit: usize,
    resolver: Arc<dyn Resolver>,
    compat: Arc<CompatTable>,
    extensions: Option<Arc<ExtensionRegistry>>,
}

impl Default for DeOptions {
    fn default() -> Self {
        DeOptions {
            decode_strings: false,
            fix_imports: true,
            lenient_memo: false,
            recursion_limit: 500,
            resolver: Arc::new(TableResolver::new()),
            compat: Arc::new(CompatTable::python2()),
            extensions: None,
        }
    }
}

impl DeOptions {
    /// Construct with default options:
    ///
    /// - don't decode strings saved as STRING opcodes (only protocols 0-2) as UTF-8
    /// - map Python 2 module globals to their Python 3 names
    /// - require memo ids in sequence
    /// - reject values nested more than 500 levels deep
    /// - resolve globals with the default `TableResolver`
    pub fn new() -> Self {
        Default::default()
    }

    /// Activate decoding strings saved as STRING.
    pub fn decode_strings(mut self) -> Self {
        self.decode_strings = true;
        self
    }

    /// Resolve module globals exactly as written.
    pub fn no_fix_imports(mut self) -> Self {
        self.fix_imports = false;
        self
    }

    /// Accept PUT opcodes with out-of-sequence ids, as written by Python 2's
    /// cPickle.
    pub fn lenient_memo(mut self) -> Self {
        self.lenient_memo = true;
        self
    }

    /// Maximum nesting depth of decoded values.  Deeper pickles are
    /// rejected before anything recurses into them.
    pub fn recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Fail on globals the default resolver has no constructor for, instead
    /// of creating generic objects.
    pub fn strict_globals(mut self) -> Self {
        self.resolver = Arc::new(TableResolver::new().strict());
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replace the Python 2 rename table.
    pub fn compat_table(mut self, table: Arc<CompatTable>) -> Self {
        self.compat = table;
        self
    }

    /// Resolve EXT opcodes through `registry`.
    pub fn extensions(mut self, registry: Arc<ExtensionRegistry>) -> Self {
        self.extensions = Some(registry);
        self
    }
}

/// Result of running the unpickler on the input buffered so far.
#[derive(Debug)]
pub enum Status {
    /// A pickle was decoded; bytes after its STOP stay buffered.
    Complete(Value),
    /// The input ends inside the pickle; feed more bytes and poll again.
    Incomplete,
}

/// Hook that turns a persistent id token into a value.
pub type PersistentLoad = Box<dyn FnMut(Value) -> Result<Value>>;

/// Decodes pickle streams into Values.
///
/// Stack, marks, frame state and protocol are reset for each pickle.  The
/// memo is kept until `clear_memo`, matching `Pickler`, which keeps its memo
/// across `dump` calls.
pub struct Unpickler {
    options: DeOptions,
    buf: Vec<u8>,
    pos: usize,
    /// Stream offset of `buf[0]`.
    base: usize,
    finished: bool,
    short: bool,
    stack: Vec<Value>,
    stacks: Vec<Vec<Value>>,
    memo: DecodeMemo,
    proto: u8,
    /// Stream offset where the current frame ends.
    frame_end: Option<usize>,
    globals: RefCell<HashMap<(String, String), Rc<Global>>>,
    persistent_load: Option<PersistentLoad>,
    /// Nesting heights of the containers of the current pickle.
    heights: Heights,
}

impl Unpickler {
    pub fn new(options: DeOptions) -> Unpickler {
        let memo = DecodeMemo::new(options.lenient_memo);
        Unpickler {
            options,
            buf: Vec::new(),
            pos: 0,
            base: 0,
            finished: false,
            short: false,
            stack: Vec::with_capacity(128),
            stacks: Vec::with_capacity(16),
            memo,
            proto: 0,
            frame_end: None,
            globals: RefCell::new(HashMap::new()),
            persistent_load: None,
            heights: Heights::new(),
        }
    }

    /// Install the hook that resolves PERSID and BINPERSID tokens.
    pub fn with_persistent_load<F>(mut self, hook: F) -> Self
        where F: FnMut(Value) -> Result<Value> + 'static
    {
        self.persistent_load = Some(Box::new(hook));
        self
    }

    /// Append input.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Mark the end of input.  From now on, a truncated pickle is an error
    /// instead of `Status::Incomplete`.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Number of buffered bytes not consumed yet.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn clear_memo(&mut self) {
        dismantle(self.memo.drain());
    }

    /// Run until the current pickle is complete or the input runs out.
    ///
    /// After an error the unpickler's state is unspecified; discard it.
    pub fn poll(&mut self) -> Result<Status> {
        loop {
            let start = self.pos;
            self.short = false;
            match self.step() {
                Ok(None) => {}
                Ok(Some(value)) => {
                    self.end_pickle();
                    return Ok(Status::Complete(value));
                }
                Err(_) if self.short && !self.finished => {
                    self.pos = start;
                    self.compact();
                    return Ok(Status::Incomplete);
                }
                Err(err) => {
                    self.end_pickle();
                    return Err(err);
                }
            }
        }
    }

    /// Decode one pickle from `rdr`, reading as much as needed.
    ///
    /// Bytes read past the pickle's end stay buffered for the next call.
    pub fn load<R: io::Read>(&mut self, rdr: &mut R) -> Result<Value> {
        let mut chunk = [0; 8192];
        loop {
            if let Status::Complete(value) = self.poll()? {
                return Ok(value);
            }
            match rdr.read(&mut chunk) {
                Ok(0) => self.finish(),
                Ok(n) => self.feed(&chunk[..n]),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }

    /// Make sure neither the buffer nor `rdr` has anything left.
    pub fn end<R: io::Read>(&mut self, rdr: &mut R) -> Result<()> {
        if self.buffered() > 0 {
            return self.error(ErrorCode::TrailingBytes);
        }
        let mut byte = [0];
        loop {
            match rdr.read(&mut byte) {
                Ok(0) => return Ok(()),
                Ok(_) => return self.error(ErrorCode::TrailingBytes),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }

    fn end_pickle(&mut self) {
        let mut discard = mem::take(&mut self.stack);
        for stack in self.stacks.drain(..) {
            discard.extend(stack);
        }
        discard.extend(self.heights.drain().map(|(_, (value, _))| value));
        dismantle(discard);
        self.proto = 0;
        self.frame_end = None;
        self.compact();
    }

    /// Drop consumed input.
    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.base += self.pos;
            self.pos = 0;
        }
    }

    #[inline]
    fn offset(&self) -> usize {
        self.base + self.pos
    }

    /// Execute one opcode.  Returns the result at STOP.
    fn step(&mut self) -> Result<Option<Value>> {
        if let Some(end) = self.frame_end {
            if self.offset() >= end {
                self.frame_end = None;
            }
        }
        match self.read_byte()? {
            // Specials
            STOP => {
                let value = self.pop()?;
                if !self.stack.is_empty() || !self.stacks.is_empty() {
                    return self.error(ErrorCode::InvalidValue(
                        "stack not empty at STOP".into()));
                }
                // Heights tracked so far miss containers that grew after
                // being nested, so measure the result from scratch.
                let limit = self.options.recursion_limit;
                if measure(&mut Heights::new(), &value, limit).is_none() {
                    dismantle(vec![value]);
                    return self.error(ErrorCode::RecursionLimit(limit));
                }
                return Ok(Some(value));
            }
            POP => {
                if self.stack.is_empty() {
                    self.pop_mark()?;
                } else {
                    self.pop()?;
                }
            }
            POP_MARK => { self.pop_mark()?; }
            DUP => { let top = self.top()?.clone(); self.stack.push(top); }
            MARK => {
                let stack = mem::replace(&mut self.stack, Vec::with_capacity(128));
                self.stacks.push(stack);
            }
            PROTO => {
                let proto = self.read_byte()?;
                if proto > HIGHEST_PROTOCOL {
                    return self.error(ErrorCode::UnsupportedProtocol(proto));
                }
                log::trace!("pickle protocol {}", proto);
                self.proto = proto;
            }
            FRAME => {
                if self.frame_end.is_some() {
                    return self.error(ErrorCode::FrameMismatch);
                }
                let len = self.read_u64_length()?;
                log::trace!("frame of {} bytes at offset {}", len, self.offset());
                self.frame_end = Some(self.offset() + len);
            }

            // Memo
            PUT => {
                let id = self.read_memo_id()?;
                self.memo_put(id)?;
            }
            BINPUT => {
                let id = self.read_byte()? as u64;
                self.memo_put(id)?;
            }
            LONG_BINPUT => {
                let id = self.read_u32()? as u64;
                self.memo_put(id)?;
            }
            MEMOIZE => {
                let top = self.top()?.clone();
                self.memo.put(top);
            }
            GET => {
                let id = self.read_memo_id()?;
                self.memo_get(id)?;
            }
            BINGET => {
                let id = self.read_byte()? as u64;
                self.memo_get(id)?;
            }
            LONG_BINGET => {
                let id = self.read_u32()? as u64;
                self.memo_get(id)?;
            }

            // Singletons
            NONE => self.stack.push(Value::None),
            NEWFALSE => self.stack.push(Value::Bool(false)),
            NEWTRUE => self.stack.push(Value::Bool(true)),

            // ASCII-formatted numbers
            INT => {
                let line = self.read_line()?;
                // Handle protocol 1 way of spelling true/false
                let value = match &*line {
                    b"00" => Value::Bool(false),
                    b"01" => Value::Bool(true),
                    _ => self.parse_int(&line)?,
                };
                self.stack.push(value);
            }
            LONG => {
                let mut line = self.read_line()?;
                // Remove "L" suffix.
                if line.last() == Some(&b'L') { line.pop(); }
                let value = self.parse_int(&line)?;
                self.stack.push(value);
            }
            FLOAT => {
                let line = self.read_line()?;
                let value = self.parse_float(&line)?;
                self.stack.push(value);
            }

            // Until-EOL strings
            STRING => {
                let line = self.read_line()?;
                // Remove quotes.
                let len = line.len();
                if len < 2 || line[0] != line[len - 1] || (line[0] != b'"' && line[0] != b'\'') {
                    return self.error(ErrorCode::InvalidLiteral(line));
                }
                let string = self.decode_escaped_string(&line[1..len - 1])?;
                self.stack.push(string);
            }
            UNICODE => {
                let line = self.read_line()?;
                let string = self.decode_escaped_unicode(&line)?;
                self.stack.push(string);
            }

            // Binary-coded numbers
            BINFLOAT => {
                let bytes = self.read_bytes(8)?;
                self.stack.push(Value::F64(BigEndian::read_f64(&bytes)));
            }
            BININT => {
                let value = self.read_i32()?;
                self.stack.push(Value::I64(value as i64));
            }
            BININT1 => {
                let byte = self.read_byte()?;
                self.stack.push(Value::I64(byte as i64));
            }
            BININT2 => {
                let bytes = self.read_bytes(2)?;
                self.stack.push(Value::I64(LittleEndian::read_u16(&bytes) as i64));
            }

            // Length-prefixed longs
            LONG1 => {
                let bytes = self.read_u8_prefixed_bytes()?;
                self.stack.push(decode_long(&bytes));
            }
            LONG4 => {
                let bytes = self.read_i32_prefixed_bytes()?;
                self.stack.push(decode_long(&bytes));
            }

            // Length-prefixed (byte)strings
            SHORT_BINBYTES => {
                let string = self.read_u8_prefixed_bytes()?;
                self.stack.push(Value::Bytes(string));
            }
            BINBYTES => {
                let string = self.read_u32_prefixed_bytes()?;
                self.stack.push(Value::Bytes(string));
            }
            BINBYTES8 | BYTEARRAY8 => {
                let string = self.read_u64_prefixed_bytes()?;
                self.stack.push(Value::Bytes(string));
            }
            SHORT_BINSTRING => {
                let string = self.read_u8_prefixed_bytes()?;
                let decoded = self.decode_string(string)?;
                self.stack.push(decoded);
            }
            BINSTRING => {
                let string = self.read_i32_prefixed_bytes()?;
                let decoded = self.decode_string(string)?;
                self.stack.push(decoded);
            }
            SHORT_BINUNICODE => {
                let string = self.read_u8_prefixed_bytes()?;
                let decoded = self.decode_unicode(string)?;
                self.stack.push(decoded);
            }
            BINUNICODE => {
                let string = self.read_u32_prefixed_bytes()?;
                let decoded = self.decode_unicode(string)?;
                self.stack.push(decoded);
            }
            BINUNICODE8 => {
                let string = self.read_u64_prefixed_bytes()?;
                let decoded = self.decode_unicode(string)?;
                self.stack.push(decoded);
            }

            // Out-of-band buffers
            READONLY_BUFFER => { self.top()?; }
            NEXT_BUFFER => return self.error(ErrorCode::Unsupported(NEXT_BUFFER as char)),

            // Containers
            EMPTY_TUPLE => self.stack.push(Value::tuple(vec![])),
            TUPLE1 => {
                let item = self.pop()?;
                self.push_built(Value::tuple(vec![item]))?;
            }
            TUPLE2 => {
                let item2 = self.pop()?;
                let item1 = self.pop()?;
                self.push_built(Value::tuple(vec![item1, item2]))?;
            }
            TUPLE3 => {
                let item3 = self.pop()?;
                let item2 = self.pop()?;
                let item1 = self.pop()?;
                self.push_built(Value::tuple(vec![item1, item2, item3]))?;
            }
            TUPLE => {
                let items = self.pop_mark()?;
                self.push_built(Value::tuple(items))?;
            }
            EMPTY_LIST => self.stack.push(Value::list(vec![])),
            LIST => {
                let items = self.pop_mark()?;
                self.push_built(Value::list(items))?;
            }
            APPEND => {
                let value = self.pop()?;
                self.extend_top(vec![value])?;
            }
            APPENDS => {
                let items = self.pop_mark()?;
                self.extend_top(items)?;
            }
            EMPTY_DICT => self.stack.push(Value::dict(vec![])),
            DICT => {
                let items = self.pop_mark()?;
                let mut dict = BTreeMap::new();
                for (key, value) in self.pairs(items)? {
                    dict.insert(self.make_hashable(key)?, value);
                }
                self.push_built(Value::Dict(Rc::new(RefCell::new(dict))))?;
            }
            SETITEM => {
                let value = self.pop()?;
                let key = self.pop()?;
                self.set_items_top(vec![(key, value)])?;
            }
            SETITEMS => {
                let items = self.pop_mark()?;
                let pairs = self.pairs(items)?;
                self.set_items_top(pairs)?;
            }
            EMPTY_SET => self.stack.push(Value::set(vec![])),
            FROZENSET => {
                let items = self.pop_mark()?;
                let items = items.into_iter().map(|item| self.make_hashable(item))
                                 .collect::<Result<Vec<_>>>()?;
                self.push_built(Value::frozenset(items))?;
            }
            ADDITEMS => {
                let items = self.pop_mark()?;
                let height = self.items_height(&items)?;
                let items = items.into_iter().map(|item| self.make_hashable(item))
                                 .collect::<Result<Vec<_>>>()?;
                match *self.top()? {
                    Value::Set(ref set) => set.borrow_mut().extend(items),
                    ref other => return self.error(ErrorCode::InvalidStackTop(
                        "set", other.type_name())),
                }
                self.raise_top(height)?;
            }

            // Module globals and extension codes
            GLOBAL => {
                let modname = self.read_line()?;
                let globname = self.read_line()?;
                let global = self.find_global(modname, globname)?;
                self.stack.push(global);
            }
            STACK_GLOBAL => {
                let globname = self.pop_str()?;
                let modname = self.pop_str()?;
                let global = self.find_global(modname.into_bytes(), globname.into_bytes())?;
                self.stack.push(global);
            }
            EXT1 => {
                let code = self.read_byte()? as i64;
                let global = self.find_extension(code)?;
                self.stack.push(global);
            }
            EXT2 => {
                let bytes = self.read_bytes(2)?;
                let global = self.find_extension(LittleEndian::read_u16(&bytes) as i64)?;
                self.stack.push(global);
            }
            EXT4 => {
                let code = self.read_i32()? as i64;
                let global = self.find_extension(code)?;
                self.stack.push(global);
            }

            // Object construction
            REDUCE => {
                let args = self.pop_tuple()?;
                let callable = self.pop()?;
                let value = self.with_context(|ctx| ctx.call(&callable, args))?;
                self.push_built(value)?;
            }
            NEWOBJ => {
                let args = self.pop_tuple()?;
                let cls = self.pop()?;
                let value = self.with_context(|ctx| ctx.new_object(&cls, args, None))?;
                self.push_built(value)?;
            }
            NEWOBJ_EX => {
                let kwargs = self.pop()?;
                let args = self.pop_tuple()?;
                let cls = self.pop()?;
                let value = self.with_context(|ctx| ctx.new_object(&cls, args, Some(kwargs)))?;
                self.push_built(value)?;
            }
            INST => {
                let modname = self.read_line()?;
                let globname = self.read_line()?;
                let args = self.pop_mark()?;
                let cls = self.find_global(modname, globname)?;
                let value = self.instantiate(cls, args)?;
                self.push_built(value)?;
            }
            OBJ => {
                let mut args = self.pop_mark()?;
                if args.is_empty() {
                    return self.error(ErrorCode::StackUnderflow);
                }
                let cls = args.remove(0);
                let value = self.instantiate(cls, args)?;
                self.push_built(value)?;
            }
            BUILD => {
                let state = self.pop()?;
                let height = self.items_height(Some(&state))?;
                let pos = self.offset();
                match *self.top()? {
                    Value::Object(ref obj) => obj.borrow_mut().set_state(state),
                    Value::Host(ref host) => host.set_state(state).map_err(|e| locate(e, pos))?,
                    ref other => return self.error(ErrorCode::InvalidStackTop(
                        "object", other.type_name())),
                }
                self.raise_top(height)?;
            }

            // Persistent references
            PERSID => {
                let line = self.read_line()?;
                let token = match String::from_utf8(line) {
                    Ok(ref s) if s.is_ascii() => Value::String(s.clone()),
                    Ok(s) => return self.error(ErrorCode::InvalidLiteral(s.into_bytes())),
                    Err(e) => return self.error(ErrorCode::InvalidLiteral(e.into_bytes())),
                };
                let value = self.persistent_load(token)?;
                self.push_built(value)?;
            }
            BINPERSID => {
                let token = self.pop()?;
                let value = self.persistent_load(token)?;
                self.push_built(value)?;
            }

            code => return self.error(ErrorCode::Unsupported(code as char)),
        }
        Ok(None)
    }

    fn pop(&mut self) -> Result<Value> {
        match self.stack.pop() {
            Some(v) => Ok(v),
            None    => self.error(ErrorCode::StackUnderflow)
        }
    }

    fn top(&self) -> Result<&Value> {
        match self.stack.last() {
            Some(v) => Ok(v),
            None    => self.error(ErrorCode::StackUnderflow)
        }
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>> {
        match self.stacks.pop() {
            Some(new) => Ok(mem::replace(&mut self.stack, new)),
            None      => self.error(ErrorCode::StackUnderflow)
        }
    }

    fn pop_tuple(&mut self) -> Result<Vec<Value>> {
        match self.pop()? {
            Value::Tuple(items) => Ok(items.to_vec()),
            other => self.error(ErrorCode::InvalidStackTop("tuple", other.type_name())),
        }
    }

    fn pop_str(&mut self) -> Result<String> {
        match self.pop()? {
            Value::String(s) => Ok(s),
            other => self.error(ErrorCode::InvalidStackTop("str", other.type_name())),
        }
    }

    fn pairs(&self, items: Vec<Value>) -> Result<Vec<(Value, Value)>> {
        if items.len() % 2 != 0 {
            return self.error(ErrorCode::InvalidValue("odd number of items for dict".into()));
        }
        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            pairs.push((key, value));
        }
        Ok(pairs)
    }

    /// APPEND(S): extend the list (or list-like object) below the items.
    fn extend_top(&mut self, items: Vec<Value>) -> Result<()> {
        let height = self.items_height(&items)?;
        let pos = self.offset();
        match *self.top()? {
            Value::List(ref list) => list.borrow_mut().extend(items),
            Value::Object(ref obj) => obj.borrow_mut().list_items.extend(items),
            Value::Host(ref host) => host.extend(items).map_err(|e| locate(e, pos))?,
            ref other => return self.error(ErrorCode::InvalidStackTop("list", other.type_name())),
        }
        self.raise_top(height)
    }

    /// SETITEM(S): set items on the dict (or dict-like object) below them.
    fn set_items_top(&mut self, pairs: Vec<(Value, Value)>) -> Result<()> {
        let height = self.items_height(pairs.iter().flat_map(|(k, v)| vec![k, v]))?;
        let pos = self.offset();
        match *self.top()? {
            Value::Dict(ref dict) => {
                let mut hashed = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    hashed.push((self.make_hashable(key)?, value));
                }
                dict.borrow_mut().extend(hashed);
            }
            Value::Object(ref obj) => obj.borrow_mut().dict_items.extend(pairs),
            Value::Host(ref host) => host.set_items(pairs).map_err(|e| locate(e, pos))?,
            ref other => return self.error(ErrorCode::InvalidStackTop("dict", other.type_name())),
        }
        self.raise_top(height)
    }

    /// Nesting height of `value`, checked against the limit.
    fn height(&mut self, value: &Value) -> Result<usize> {
        let limit = self.options.recursion_limit;
        match measure(&mut self.heights, value, limit) {
            Some(height) => Ok(height),
            None => self.error(ErrorCode::RecursionLimit(limit)),
        }
    }

    /// Push a value that was just built from other values.
    fn push_built(&mut self, value: Value) -> Result<()> {
        if let Err(err) = self.height(&value) {
            dismantle(vec![value]);
            return Err(err);
        }
        self.stack.push(value);
        Ok(())
    }

    /// Greatest height among values about to be added to the container on
    /// top of the stack.  The container itself does not count.
    fn items_height<'a, I>(&mut self, items: I) -> Result<usize>
        where I: IntoIterator<Item=&'a Value>
    {
        let top = self.top()?.clone();
        let mut height = 0;
        for item in items {
            if !item.is(&top) {
                height = height.max(self.height(item)?);
            }
        }
        Ok(height)
    }

    /// The container on top of the stack now holds values of `items` height.
    fn raise_top(&mut self, items: usize) -> Result<()> {
        let top = self.top()?.clone();
        let limit = self.options.recursion_limit;
        let height = self.height(&top)?.max(items + 1);
        if height > limit {
            return self.error(ErrorCode::RecursionLimit(limit));
        }
        if let Some(id) = top.identity() {
            self.heights.insert(id, (top, height));
        }
        Ok(())
    }

    fn memo_put(&mut self, id: u64) -> Result<()> {
        let top = self.top()?.clone();
        match self.memo.put_at(id, top) {
            Ok(()) => Ok(()),
            Err(code) => self.error(code),
        }
    }

    fn memo_get(&mut self, id: u64) -> Result<()> {
        match self.memo.get(id) {
            Some(value) => {
                let value = value.clone();
                self.stack.push(value);
                Ok(())
            }
            None => self.error(ErrorCode::MissingMemo(id)),
        }
    }

    fn with_context<T, F>(&self, f: F) -> Result<T>
        where F: FnOnce(&CallContext) -> Result<T>
    {
        let ctx = CallContext::new(&*self.options.resolver, &self.globals);
        f(&ctx).map_err(|e| locate(e, self.offset()))
    }

    /// INST and OBJ: allocate without arguments, call otherwise.
    fn instantiate(&self, cls: Value, args: Vec<Value>) -> Result<Value> {
        if args.is_empty() {
            self.with_context(|ctx| ctx.new_object(&cls, args, None))
        } else {
            self.with_context(|ctx| ctx.call(&cls, args))
        }
    }

    fn find_global(&self, modname: Vec<u8>, globname: Vec<u8>) -> Result<Value> {
        if str::from_utf8(&modname).is_err() || str::from_utf8(&globname).is_err() {
            return self.error(ErrorCode::UnsupportedGlobal(modname, globname));
        }
        let modname = String::from_utf8_lossy(&modname).into_owned();
        let globname = String::from_utf8_lossy(&globname).into_owned();
        let (modname, globname) = if self.proto < 3 && self.options.fix_imports {
            let (m, g) = self.options.compat.to_current(&modname, &globname);
            if m != modname || g != globname {
                log::debug!("reading {}.{} as {}.{}", modname, globname, m, g);
            }
            (m, g)
        } else {
            (modname, globname)
        };
        self.with_context(|ctx| ctx.resolve(&modname, &globname)).map(Value::Global)
    }

    fn find_extension(&self, code: i64) -> Result<Value> {
        let name = self.options.extensions.as_ref()
                       .filter(|_| code > 0)
                       .and_then(|reg| reg.name_for(code as u32))
                       .map(|(m, n)| (m.as_bytes().to_vec(), n.as_bytes().to_vec()));
        match name {
            Some((modname, globname)) => self.find_global(modname, globname),
            None => self.error(ErrorCode::UnregisteredExtension(code)),
        }
    }

    fn persistent_load(&mut self, token: Value) -> Result<Value> {
        let pos = self.offset();
        if let Some(hook) = self.persistent_load.as_mut() {
            return hook(token).map_err(|e| locate(e, pos));
        }
        self.error(ErrorCode::NoPersistentLoad)
    }

    fn make_hashable(&self, value: Value) -> Result<HashableValue> {
        value.into_hashable().map_err(|e| locate(e, self.offset()))
    }

    /// Require `n` more bytes inside the current frame.
    fn check(&mut self, n: usize) -> Result<()> {
        let at = self.offset();
        if let Some(end) = self.frame_end {
            if at + n > end {
                return self.error(ErrorCode::FrameOverrun);
            }
        }
        if self.buf.len() - self.pos < n {
            self.short = true;
            return self.error(ErrorCode::EOFWhileParsing);
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8> {
        self.check(1)?;
        let byte = self.buf[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn read_line(&mut self) -> Result<Vec<u8>> {
        let nl = self.buf[self.pos..].iter().position(|&b| b == b'\n');
        let len = match nl {
            Some(len) => len,
            None => {
                // Fails with FrameOverrun or EOFWhileParsing.
                let wanted = self.buf.len() - self.pos + 1;
                self.check(wanted)?;
                return self.error(ErrorCode::EOFWhileParsing);
            }
        };
        let mut result = self.read_bytes(len + 1)?;
        result.pop();
        if result.last() == Some(&b'\r') { result.pop(); }
        Ok(result)
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        self.check(n)?;
        let result = self.buf[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(result)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(LittleEndian::read_u32(&bytes))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.read_bytes(4)?;
        Ok(LittleEndian::read_i32(&bytes))
    }

    /// A u64 length that must be addressable on this platform.
    fn read_u64_length(&mut self) -> Result<usize> {
        let at = self.offset();
        let bytes = self.read_bytes(8)?;
        let len = LittleEndian::read_u64(&bytes);
        if len > isize::MAX as u64 {
            return Err(Error::Overflow(len, at));
        }
        Ok(len as usize)
    }

    fn read_i32_prefixed_bytes(&mut self) -> Result<Vec<u8>> {
        match self.read_i32()? {
            0          => Ok(vec![]),
            l if l < 0 => self.error(ErrorCode::NegativeLength),
            l          => self.read_bytes(l as usize)
        }
    }

    fn read_u64_prefixed_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u64_length()?;
        self.read_bytes(len)
    }

    fn read_u32_prefixed_bytes(&mut self) -> Result<Vec<u8>> {
        let at = self.offset();
        let len = self.read_u32()?;
        if len as u64 > isize::MAX as u64 {
            return Err(Error::Overflow(len as u64, at));
        }
        self.read_bytes(len as usize)
    }

    fn read_u8_prefixed_bytes(&mut self) -> Result<Vec<u8>> {
        let lenbyte = self.read_byte()?;
        self.read_bytes(lenbyte as usize)
    }

    fn read_memo_id(&mut self) -> Result<u64> {
        let line = self.read_line()?;
        match str::from_utf8(&line).ok().and_then(|s| s.parse::<u64>().ok()) {
            Some(id) => Ok(id),
            None => self.error(ErrorCode::InvalidLiteral(line)),
        }
    }

    fn parse_int(&self, line: &[u8]) -> Result<Value> {
        let text = str::from_utf8(line).unwrap_or("").trim();
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Value::I64(i));
        }
        let digits = text.strip_prefix('+').unwrap_or(text);
        match BigInt::parse_bytes(digits.as_bytes(), 10) {
            Some(i) => Ok(int_value(i)),
            None => self.error(ErrorCode::InvalidLiteral(line.into())),
        }
    }

    fn parse_float(&self, line: &[u8]) -> Result<Value> {
        let text = str::from_utf8(line).unwrap_or("").trim();
        let value = match &*text.to_ascii_lowercase() {
            "nan" | "+nan" | "-nan" => Ok(std::f64::NAN),
            "inf" | "+inf" => Ok(std::f64::INFINITY),
            "-inf" => Ok(std::f64::NEG_INFINITY),
            _ => text.parse::<f64>(),
        };
        match value {
            Ok(f)  => Ok(Value::F64(f)),
            Err(_) => self.error(ErrorCode::InvalidLiteral(line.into()))
        }
    }

    fn decode_string(&self, string: Vec<u8>) -> Result<Value> {
        if self.options.decode_strings {
            self.decode_unicode(string)
        } else {
            Ok(Value::Bytes(string))
        }
    }

    fn decode_escaped_string(&self, s: &[u8]) -> Result<Value> {
        // These are encoded with "normal" Python string escape rules.
        let mut result = Vec::with_capacity(s.len());
        let mut i = 0;
        while i < s.len() {
            let b = s[i];
            i += 1;
            if b != b'\\' {
                result.push(b);
                continue;
            }
            let esc = match s.get(i) {
                Some(&esc) => esc,
                None => return self.error(ErrorCode::InvalidLiteral(s.into())),
            };
            i += 1;
            match esc {
                b'\\' => result.push(b'\\'),
                b'\'' => result.push(b'\''),
                b'"' => result.push(b'"'),
                b'a' => result.push(b'\x07'),
                b'b' => result.push(b'\x08'),
                b't' => result.push(b'\x09'),
                b'n' => result.push(b'\x0a'),
                b'v' => result.push(b'\x0b'),
                b'f' => result.push(b'\x0c'),
                b'r' => result.push(b'\x0d'),
                b'x' => {
                    let hex = s.get(i..i + 2)
                               .and_then(|h| str::from_utf8(h).ok())
                               .and_then(|h| u8::from_str_radix(h, 16).ok());
                    match hex {
                        Some(v) => { result.push(v); i += 2; }
                        None => return self.error(ErrorCode::InvalidLiteral(s.into())),
                    }
                }
                b'0'..=b'7' => {
                    // Up to three octal digits.
                    let mut value = (esc - b'0') as u32;
                    let mut digits = 1;
                    while digits < 3 && i < s.len() && (b'0'..=b'7').contains(&s[i]) {
                        value = value * 8 + (s[i] - b'0') as u32;
                        i += 1;
                        digits += 1;
                    }
                    result.push(value as u8);
                }
                other => {
                    // Unknown escapes are kept verbatim.
                    result.push(b'\\');
                    result.push(other);
                }
            }
        }
        self.decode_string(result)
    }

    fn decode_unicode(&self, string: Vec<u8>) -> Result<Value> {
        match String::from_utf8(string) {
            Ok(v)  => Ok(Value::String(v)),
            Err(_) => self.error(ErrorCode::StringNotUTF8)
        }
    }

    fn decode_escaped_unicode(&self, s: &[u8]) -> Result<Value> {
        // These are encoded with "raw-unicode-escape", which only knows
        // the \uXXXX and \UYYYYYYYY escapes.  The backslash is escaped
        // in this way, too.
        let mut result = String::with_capacity(s.len());
        let mut i = 0;
        while i < s.len() {
            let b = s[i];
            i += 1;
            let nescape = match (b, s.get(i)) {
                (b'\\', Some(&b'u')) => 4,
                (b'\\', Some(&b'U')) => 8,
                _ => {
                    result.push(b as char);
                    continue;
                }
            };
            let digits = s.get(i + 1..i + 1 + nescape)
                          .and_then(|h| str::from_utf8(h).ok())
                          .and_then(|h| u32::from_str_radix(h, 16).ok())
                          .and_then(char::from_u32);
            match digits {
                Some(ch) => result.push(ch),
                None => return self.error(ErrorCode::InvalidLiteral(s.into())),
            }
            i += 1 + nescape;
        }
        Ok(Value::String(result))
    }

    fn error<T>(&self, reason: ErrorCode) -> Result<T> {
        Err(Error::Eval(reason, self.offset()))
    }
}

impl Drop for Unpickler {
    fn drop(&mut self) {
        self.end_pickle();
        self.clear_memo();
    }
}

/// Errors raised by hooks and constructors carry no position; attach one.
fn locate(err: Error, pos: usize) -> Error {
    match err {
        Error::Syntax(code) => Error::Eval(code, pos),
        other => other,
    }
}

fn int_value(i: BigInt) -> Value {
    match i.to_i64() {
        Some(i) => Value::I64(i),
        None => Value::Int(i),
    }
}

/// Two's complement little endian, as written by LONG1 and LONG4.
fn decode_long(bytes: &[u8]) -> Value {
    int_value(BigInt::from_signed_bytes_le(bytes))
}

/// Decodes a value directly from an iterator.
pub fn value_from_iter<I>(iter: I, options: DeOptions) -> Result<Value>
    where I: Iterator<Item=io::Result<u8>>
{
    value_from_reader(IterRead::new(iter), options)
}

/// Decodes a value from a `std::io::Read`.
pub fn value_from_reader<R: io::Read>(mut rdr: R, options: DeOptions) -> Result<Value> {
    let mut unpickler = Unpickler::new(options);
    let value = unpickler.load(&mut rdr)?;
    // Make sure the whole stream has been consumed.
    unpickler.end(&mut rdr)?;
    Ok(value)
}

/// Decodes a value from a byte slice `&[u8]`.
pub fn value_from_slice(v: &[u8], options: DeOptions) -> Result<Value> {
    let mut unpickler = Unpickler::new(options);
    unpickler.feed(v);
    unpickler.finish();
    match unpickler.poll()? {
        Status::Complete(value) => {
            unpickler.end(&mut io::empty())?;
            Ok(value)
        }
        Status::Incomplete => unpickler.error(ErrorCode::EOFWhileParsing),
    }
}

/// Decodes a value directly from an iterator.
pub fn from_iter<I, T>(iter: I, options: DeOptions) -> Result<T>
    where I: Iterator<Item=io::Result<u8>>,
          T: DeserializeOwned
{
    from_value(value_from_iter(iter, options)?)
}

/// Decodes a value from a `std::io::Read`.
pub fn from_reader<R: io::Read, T: DeserializeOwned>(rdr: R, options: DeOptions) -> Result<T> {
    from_value(value_from_reader(rdr, options)?)
}

/// Decodes a value from a byte slice `&[u8]`.
pub fn from_slice<T: DeserializeOwned>(v: &[u8], options: DeOptions) -> Result<T> {
    from_value(value_from_slice(v, options)?)
}
