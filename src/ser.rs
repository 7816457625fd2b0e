// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Pickle serialization
//!
//! The [`Pickler`] walks a [`Value`] graph depth first.  Every value with
//! identity is recorded in the memo right after the opcodes that construct it,
//! and before anything that could refer back to it (list items, dict items,
//! BUILD state), so a second encounter, including one through a cycle, is
//! written as a GET.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;
use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::ser::Serialize;

use crate::compat::CompatTable;
use crate::consts::*;
use crate::error::{Error, ErrorCode, Result};
use crate::ext::ExtensionRegistry;
use crate::frame::Framer;
use crate::memo::EncodeMemo;
use crate::reduce::{reduce_object, Construct, DispatchTable, Reduction, TypeKey};
use crate::value::{Global, Value, to_value};

/// Options for serializing.
#[derive(Clone)]
pub struct SerOptions {
    proto: u8,
    fix_imports: bool,
    recursion_limit: usize,
    dispatch: Option<Arc<DispatchTable>>,
    extensions: Option<Arc<ExtensionRegistry>>,
    compat: Arc<CompatTable>,
}

impl Default for SerOptions {
    fn default() -> Self {
        SerOptions {
            proto: DEFAULT_PROTOCOL,
            fix_imports: true,
            recursion_limit: 500,
            dispatch: None,
            extensions: None,
            compat: Arc::new(CompatTable::python2()),
        }
    }
}

impl SerOptions {
    /// Construct with default options:
    ///
    /// - write protocol 3
    /// - map module globals to their Python 2 names for protocols below 3
    /// - allow 500 levels of nesting
    pub fn new() -> Self {
        Default::default()
    }

    /// Write the given protocol (0 to 5).
    pub fn proto(mut self, proto: u8) -> Self {
        self.proto = proto;
        self
    }

    /// Write protocol 2, the highest one Python 2 understands.
    pub fn proto_v2(self) -> Self {
        self.proto(2)
    }

    pub fn proto_v3(self) -> Self {
        self.proto(3)
    }

    pub fn highest_protocol(self) -> Self {
        self.proto(HIGHEST_PROTOCOL)
    }

    /// Write module globals with their current names, even for protocols
    /// Python 2 can read.
    pub fn no_fix_imports(mut self) -> Self {
        self.fix_imports = false;
        self
    }

    /// Consult `table` before the built-in reductions.
    pub fn dispatch_table(mut self, table: Arc<DispatchTable>) -> Self {
        self.dispatch = Some(table);
        self
    }

    /// Write registered globals as EXT opcodes (protocol 2 and up).
    pub fn extensions(mut self, registry: Arc<ExtensionRegistry>) -> Self {
        self.extensions = Some(registry);
        self
    }

    /// Replace the Python 2 rename table.
    pub fn compat_table(mut self, table: Arc<CompatTable>) -> Self {
        self.compat = table;
        self
    }

    /// Maximum nesting depth of the value graph.
    pub fn recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn protocol(&self) -> u8 {
        self.proto
    }
}

/// Hook that may replace a value by a persistent id token.
pub type PersistentId = Box<dyn FnMut(&Value) -> Result<Option<Value>>>;

/// A structure for serializing values into a pickle stream.
///
/// The memo survives between calls to `dump`, so values written by an
/// earlier `dump` are written as references by later ones; the matching
/// `Unpickler` keeps its memo as well.  `clear_memo` starts over.
pub struct Pickler<W: io::Write> {
    out: Framer<W>,
    options: SerOptions,
    memo: EncodeMemo,
    globals: HashMap<(String, String), Value>,
    persistent_id: Option<PersistentId>,
    depth: usize,
}

impl<W: io::Write> Pickler<W> {
    pub fn new(writer: W, options: SerOptions) -> Pickler<W> {
        Pickler {
            out: Framer::new(writer),
            options,
            memo: EncodeMemo::new(),
            globals: HashMap::new(),
            persistent_id: None,
            depth: 0,
        }
    }

    /// Install a persistent id hook.  A value for which the hook returns
    /// `Some(token)` is written as a reference to `token`; `Some` of an empty
    /// string is a valid token.
    pub fn with_persistent_id<F>(mut self, hook: F) -> Self
        where F: FnMut(&Value) -> Result<Option<Value>> + 'static
    {
        self.persistent_id = Some(Box::new(hook));
        self
    }

    /// Write one complete pickle of `value`.
    ///
    /// On error, the writer may have received a partial pickle, which the
    /// caller has to discard.
    pub fn dump(&mut self, value: &Value) -> Result<()> {
        let proto = self.options.proto;
        if proto > HIGHEST_PROTOCOL {
            return Err(Error::Encode(ErrorCode::UnsupportedProtocol(proto)));
        }
        if proto >= 2 {
            log::trace!("writing protocol {} header", proto);
            self.out.write_all(&[PROTO, proto])?;
        }
        if proto >= 4 {
            self.out.start_framing();
        }
        self.depth = 0;
        let result = self.dump_framed(value);
        if result.is_err() {
            self.out.abort_framing();
        }
        result
    }

    fn dump_framed(&mut self, value: &Value) -> Result<()> {
        self.save(value, true)?;
        self.write_opcode(STOP)?;
        self.out.end_framing()?;
        Ok(())
    }

    /// Forget all memoized values.  The next `dump` writes the same bytes a
    /// fresh pickler would.
    pub fn clear_memo(&mut self) {
        self.memo.clear();
        self.globals.clear();
    }

    /// Unwrap the writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    #[inline]
    fn write_opcode(&mut self, opcode: u8) -> Result<()> {
        self.out.write_all(&[opcode]).map_err(From::from)
    }

    fn write_line(&mut self, opcode: u8, line: &[u8]) -> Result<()> {
        self.out.write_all(&[opcode])?;
        self.out.write_all(line)?;
        self.out.write_all(b"\n").map_err(From::from)
    }

    fn write_get(&mut self, id: u64) -> Result<()> {
        if self.options.proto == 0 {
            return self.write_line(GET, id.to_string().as_bytes());
        }
        if id < 256 {
            self.write_opcode(BINGET)?;
            self.out.write_u8(id as u8)?;
        } else if id <= u32::MAX as u64 {
            self.write_opcode(LONG_BINGET)?;
            self.out.write_u32::<LittleEndian>(id as u32)?;
        } else {
            return Err(Error::Encode(ErrorCode::MemoTooLarge(id)));
        }
        Ok(())
    }

    fn write_put(&mut self, id: u64) -> Result<()> {
        match self.options.proto {
            0 => self.write_line(PUT, id.to_string().as_bytes()),
            4..=HIGHEST_PROTOCOL => self.write_opcode(MEMOIZE),
            _ if id < 256 => {
                self.write_opcode(BINPUT)?;
                self.out.write_u8(id as u8).map_err(From::from)
            }
            _ if id <= u32::MAX as u64 => {
                self.write_opcode(LONG_BINPUT)?;
                self.out.write_u32::<LittleEndian>(id as u32).map_err(From::from)
            }
            _ => Err(Error::Encode(ErrorCode::MemoTooLarge(id))),
        }
    }

    /// Record `value` in the memo and write the matching PUT.
    fn memoize(&mut self, value: &Value) -> Result<()> {
        match self.memo.put(value) {
            Some(id) => self.write_put(id),
            None => Ok(()),
        }
    }

    /// A global the pickler itself refers to, shared so that repeated uses
    /// within one memo become GETs.
    fn intern(&mut self, module: &str, name: &str) -> Value {
        self.globals.entry((module.to_owned(), name.to_owned()))
                    .or_insert_with(|| Value::global(module, name))
                    .clone()
    }

    fn save(&mut self, value: &Value, check_persistent: bool) -> Result<()> {
        self.out.commit_frame(false)?;

        if check_persistent {
            let token = match self.persistent_id {
                Some(ref mut hook) => hook(value)?,
                None => None,
            };
            if let Some(token) = token {
                return self.save_persistent(&token);
            }
        }

        if let Some(id) = self.memo.contains(value) {
            return self.write_get(id);
        }

        self.depth += 1;
        if self.depth > self.options.recursion_limit {
            return Err(Error::Encode(ErrorCode::RecursionLimit(self.options.recursion_limit)));
        }
        let result = self.save_value(value);
        self.depth -= 1;
        result
    }

    fn save_value(&mut self, value: &Value) -> Result<()> {
        if let Some(table) = self.options.dispatch.clone() {
            if let Some(reducer) = TypeKey::of(value).and_then(|key| table.get(&key)) {
                let reduction = reducer(value, self.options.proto)?;
                return self.save_reduce(reduction, Some(value));
            }
        }
        match *value {
            Value::None => self.write_opcode(NONE),
            Value::Bool(b) => self.save_bool(b),
            Value::I64(i) => self.save_int(i),
            Value::Int(ref i) => match i.to_i64() {
                Some(i) => self.save_int(i),
                None => self.save_bigint(i),
            },
            Value::F64(f) => self.save_float(f),
            Value::Bytes(ref b) => self.save_bytes(value, b),
            Value::String(ref s) => self.save_str(s),
            Value::Tuple(ref t) => self.save_tuple(value, t),
            Value::List(ref l) => {
                self.write_container_start(EMPTY_LIST, LIST)?;
                self.memoize(value)?;
                let items = l.borrow().clone();
                self.batch_appends(items.into_iter())
            }
            Value::Dict(ref d) => {
                self.write_container_start(EMPTY_DICT, DICT)?;
                self.memoize(value)?;
                let items: Vec<_> = d.borrow().iter()
                                     .map(|(k, v)| (k.clone().into_value(), v.clone()))
                                     .collect();
                self.batch_setitems(items.into_iter())
            }
            Value::Set(ref s) => {
                let items: Vec<_> = s.borrow().iter().cloned().map(|v| v.into_value()).collect();
                self.save_set(value, items)
            }
            Value::FrozenSet(ref s) => {
                let items: Vec<_> = s.iter().cloned().map(|v| v.into_value()).collect();
                self.save_frozenset(value, items)
            }
            Value::Global(ref g) => self.save_global(g, value),
            Value::Object(ref o) => {
                let reduction = reduce_object(&o.borrow());
                self.save_reduce(reduction, Some(value))
            }
            Value::Host(ref h) => {
                let reduction = h.reduce(self.options.proto)?;
                self.save_reduce(reduction, Some(value))
            }
        }
    }

    fn save_persistent(&mut self, token: &Value) -> Result<()> {
        if self.options.proto >= 1 {
            self.save(token, false)?;
            return self.write_opcode(BINPERSID);
        }
        match *token {
            Value::String(ref s) if s.is_ascii() && !s.contains('\n') =>
                self.write_line(PERSID, s.as_bytes()),
            _ => Err(Error::Encode(ErrorCode::InvalidPersistentId(token.to_string()))),
        }
    }

    fn write_container_start(&mut self, binary: u8, text: u8) -> Result<()> {
        if self.options.proto >= 1 {
            self.write_opcode(binary)
        } else {
            self.write_opcode(MARK)?;
            self.write_opcode(text)
        }
    }

    fn save_bool(&mut self, b: bool) -> Result<()> {
        if self.options.proto >= 2 {
            self.write_opcode(if b { NEWTRUE } else { NEWFALSE })
        } else {
            self.write_line(INT, if b { b"01" } else { b"00" })
        }
    }

    fn save_int(&mut self, i: i64) -> Result<()> {
        let proto = self.options.proto;
        if proto >= 1 {
            if 0 <= i && i <= 0xff {
                self.write_opcode(BININT1)?;
                return self.out.write_u8(i as u8).map_err(From::from);
            } else if 0 <= i && i <= 0xffff {
                self.write_opcode(BININT2)?;
                return self.out.write_u16::<LittleEndian>(i as u16).map_err(From::from);
            } else if i32::MIN as i64 <= i && i <= i32::MAX as i64 {
                self.write_opcode(BININT)?;
                return self.out.write_i32::<LittleEndian>(i as i32).map_err(From::from);
            }
        }
        if proto >= 2 {
            return self.save_bigint(&BigInt::from(i));
        }
        if i32::MIN as i64 <= i && i <= i32::MAX as i64 {
            self.write_line(INT, i.to_string().as_bytes())
        } else {
            self.write_line(LONG, format!("{}L", i).as_bytes())
        }
    }

    fn save_bigint(&mut self, i: &BigInt) -> Result<()> {
        if self.options.proto < 2 {
            return self.write_line(LONG, format!("{}L", i).as_bytes());
        }
        // Zero is encoded with no bytes at all.
        let bytes = if *i == BigInt::from(0) { vec![] } else { i.to_signed_bytes_le() };
        if bytes.len() < 256 {
            self.write_opcode(LONG1)?;
            self.out.write_u8(bytes.len() as u8)?;
        } else if bytes.len() <= i32::MAX as usize {
            self.write_opcode(LONG4)?;
            self.out.write_i32::<LittleEndian>(bytes.len() as i32)?;
        } else {
            return Err(Error::Encode(ErrorCode::Unpicklable("int too large to pickle".into())));
        }
        self.out.write_all(&bytes).map_err(From::from)
    }

    fn save_float(&mut self, f: f64) -> Result<()> {
        if self.options.proto >= 1 {
            self.write_opcode(BINFLOAT)?;
            self.out.write_f64::<BigEndian>(f).map_err(From::from)
        } else {
            self.write_line(FLOAT, float_repr(f).as_bytes())
        }
    }

    fn save_bytes(&mut self, value: &Value, b: &[u8]) -> Result<()> {
        let proto = self.options.proto;
        if proto < 3 {
            // Python 2 has no bytes type; spell it so that Python 3 gets
            // bytes back and Python 2 gets a str.
            let reduction = if b.is_empty() {
                Reduction::call(self.intern("builtins", "bytes"), vec![])
            } else {
                let latin1 = b.iter().map(|&byte| byte as char).collect::<String>();
                Reduction::call(self.intern("_codecs", "encode"),
                                vec![Value::String(latin1), Value::String("latin1".into())])
            };
            return self.save_reduce(reduction, Some(value));
        }
        let len = b.len();
        if len < 256 {
            self.write_opcode(SHORT_BINBYTES)?;
            self.out.write_u8(len as u8)?;
        } else if len as u64 <= u32::MAX as u64 {
            self.write_opcode(BINBYTES)?;
            self.out.write_u32::<LittleEndian>(len as u32)?;
        } else if proto >= 4 {
            self.write_opcode(BINBYTES8)?;
            self.out.write_u64::<LittleEndian>(len as u64)?;
        } else {
            return Err(Error::Encode(ErrorCode::Unpicklable(
                "bytes larger than 4 GiB require protocol 4".into())));
        }
        self.out.write_all(b).map_err(From::from)
    }

    fn save_str(&mut self, s: &str) -> Result<()> {
        let proto = self.options.proto;
        if proto == 0 {
            return self.write_line(UNICODE, &raw_unicode_escape(s));
        }
        let len = s.len();
        if len < 256 && proto >= 4 {
            self.write_opcode(SHORT_BINUNICODE)?;
            self.out.write_u8(len as u8)?;
        } else if len as u64 <= u32::MAX as u64 {
            self.write_opcode(BINUNICODE)?;
            self.out.write_u32::<LittleEndian>(len as u32)?;
        } else if proto >= 4 {
            self.write_opcode(BINUNICODE8)?;
            self.out.write_u64::<LittleEndian>(len as u64)?;
        } else {
            return Err(Error::Encode(ErrorCode::Unpicklable(
                "str larger than 4 GiB requires protocol 4".into())));
        }
        self.out.write_all(s.as_bytes()).map_err(From::from)
    }

    fn save_tuple(&mut self, value: &Value, items: &[Value]) -> Result<()> {
        let proto = self.options.proto;
        if items.is_empty() {
            return if proto >= 1 {
                self.write_opcode(EMPTY_TUPLE)
            } else {
                self.write_opcode(MARK)?;
                self.write_opcode(TUPLE)
            };
        }
        let n = items.len();
        if n <= 3 && proto >= 2 {
            for item in items {
                self.save(item, true)?;
            }
            // An element referred back to the tuple, which has already
            // been built and memoized: drop the elements and use that.
            if let Some(id) = self.memo.contains(value) {
                for _ in 0..n {
                    self.write_opcode(POP)?;
                }
                return self.write_get(id);
            }
            self.write_opcode([TUPLE1, TUPLE2, TUPLE3][n - 1])?;
            return self.memoize(value);
        }
        self.write_opcode(MARK)?;
        for item in items {
            self.save(item, true)?;
        }
        if let Some(id) = self.memo.contains(value) {
            if proto >= 1 {
                self.write_opcode(POP_MARK)?;
            } else {
                // Protocol 0 has no POP_MARK: pop the elements and the mark.
                for _ in 0..=n {
                    self.write_opcode(POP)?;
                }
            }
            return self.write_get(id);
        }
        self.write_opcode(TUPLE)?;
        self.memoize(value)
    }

    fn batch_appends<I: Iterator<Item=Value>>(&mut self, mut items: I) -> Result<()> {
        if self.options.proto == 0 {
            for item in items {
                self.save(&item, true)?;
                self.write_opcode(APPEND)?;
            }
            return Ok(());
        }
        loop {
            let batch: Vec<Value> = items.by_ref().take(BATCH_SIZE).collect();
            let n = batch.len();
            if n > 1 {
                self.write_opcode(MARK)?;
                for item in &batch {
                    self.save(item, true)?;
                }
                self.write_opcode(APPENDS)?;
            } else if n == 1 {
                self.save(&batch[0], true)?;
                self.write_opcode(APPEND)?;
            }
            if n < BATCH_SIZE {
                return Ok(());
            }
        }
    }

    fn batch_setitems<I: Iterator<Item=(Value, Value)>>(&mut self, mut items: I) -> Result<()> {
        if self.options.proto == 0 {
            for (key, value) in items {
                self.save(&key, true)?;
                self.save(&value, true)?;
                self.write_opcode(SETITEM)?;
            }
            return Ok(());
        }
        loop {
            let batch: Vec<(Value, Value)> = items.by_ref().take(BATCH_SIZE).collect();
            let n = batch.len();
            if n > 1 {
                self.write_opcode(MARK)?;
                for (key, value) in &batch {
                    self.save(key, true)?;
                    self.save(value, true)?;
                }
                self.write_opcode(SETITEMS)?;
            } else if n == 1 {
                self.save(&batch[0].0, true)?;
                self.save(&batch[0].1, true)?;
                self.write_opcode(SETITEM)?;
            }
            if n < BATCH_SIZE {
                return Ok(());
            }
        }
    }

    fn save_set(&mut self, value: &Value, items: Vec<Value>) -> Result<()> {
        if self.options.proto < 4 {
            let reduction = Reduction::call(self.intern("builtins", "set"),
                                            vec![Value::list(items)]);
            return self.save_reduce(reduction, Some(value));
        }
        self.write_opcode(EMPTY_SET)?;
        self.memoize(value)?;
        for batch in items.chunks(BATCH_SIZE) {
            self.write_opcode(MARK)?;
            for item in batch {
                self.save(item, true)?;
            }
            self.write_opcode(ADDITEMS)?;
        }
        Ok(())
    }

    fn save_frozenset(&mut self, value: &Value, items: Vec<Value>) -> Result<()> {
        if self.options.proto < 4 {
            let reduction = Reduction::call(self.intern("builtins", "frozenset"),
                                            vec![Value::list(items)]);
            return self.save_reduce(reduction, Some(value));
        }
        self.write_opcode(MARK)?;
        for item in &items {
            self.save(item, true)?;
        }
        if let Some(id) = self.memo.contains(value) {
            self.write_opcode(POP_MARK)?;
            return self.write_get(id);
        }
        self.write_opcode(FROZENSET)?;
        self.memoize(value)
    }

    fn save_global(&mut self, global: &Global, value: &Value) -> Result<()> {
        let proto = self.options.proto;
        if proto >= 2 {
            let code = self.options.extensions.as_ref()
                           .and_then(|reg| reg.code_for(&global.module, &global.name));
            if let Some(code) = code {
                if code <= 0xff {
                    self.write_opcode(EXT1)?;
                    self.out.write_u8(code as u8)?;
                } else if code <= 0xffff {
                    self.write_opcode(EXT2)?;
                    self.out.write_u16::<LittleEndian>(code as u16)?;
                } else {
                    self.write_opcode(EXT4)?;
                    self.out.write_i32::<LittleEndian>(code as i32)?;
                }
                return Ok(());
            }
        }

        if proto >= 4 {
            self.save_str(&global.module)?;
            self.save_str(&global.name)?;
            self.write_opcode(STACK_GLOBAL)?;
        } else if let Some(dot) = global.name.rfind('.') {
            let parent = self.intern(&global.module, &global.name[..dot]);
            let last = Value::String(global.name[dot + 1..].into());
            let reduction = Reduction::call(self.intern("builtins", "getattr"),
                                            vec![parent, last]);
            self.save_reduce(reduction, None)?;
        } else {
            let (module, name) = if proto < 3 && self.options.fix_imports {
                self.options.compat.to_legacy(&global.module, &global.name)
            } else {
                (global.module.clone(), global.name.clone())
            };
            let valid = |s: &str| !s.contains('\n') && (proto >= 3 || s.is_ascii());
            if !valid(&module) || !valid(&name) {
                return Err(Error::Encode(ErrorCode::InvalidGlobalName(
                    format!("{}.{}", module, name))));
            }
            if module != global.module || name != global.name {
                log::debug!("writing {}.{} as {}.{}", global.module, global.name, module, name);
            }
            self.write_opcode(GLOBAL)?;
            self.out.write_all(module.as_bytes())?;
            self.out.write_all(b"\n")?;
            self.out.write_all(name.as_bytes())?;
            self.out.write_all(b"\n")?;
        }
        self.memoize(value)
    }

    /// Write a reduction: construction, memoization of `value`, then state,
    /// then items.
    fn save_reduce(&mut self, reduction: Reduction, value: Option<&Value>) -> Result<()> {
        let proto = self.options.proto;
        let Reduction { construct, state, list_items, dict_items } = reduction;

        match construct {
            Construct::Call { callable, args } => {
                self.save(&callable, true)?;
                self.save(&Value::tuple(args), true)?;
                self.write_opcode(REDUCE)?;
            }
            Construct::NewObj { class, args, kwargs: None } if proto >= 2 => {
                self.save(&Value::Global(class), true)?;
                self.save(&Value::tuple(args), true)?;
                self.write_opcode(NEWOBJ)?;
            }
            Construct::NewObj { class, args, kwargs: Some(kwargs) } if proto >= 4 => {
                self.save(&Value::Global(class), true)?;
                self.save(&Value::tuple(args), true)?;
                self.save(&kwargs, true)?;
                self.write_opcode(NEWOBJ_EX)?;
            }
            Construct::NewObj { class, args, kwargs: Some(kwargs) } => {
                let helper = self.intern("copyreg", "__newobj_ex__");
                let args = vec![Value::Global(class), Value::tuple(args), kwargs];
                self.save(&helper, true)?;
                self.save(&Value::tuple(args), true)?;
                self.write_opcode(REDUCE)?;
            }
            Construct::NewObj { class, args, kwargs: None } => {
                // Protocols 0 and 1 have no NEWOBJ; use the copyreg helpers.
                let (helper, args) = if args.is_empty() {
                    (self.intern("copyreg", "_reconstructor"),
                     vec![Value::Global(class), self.intern("builtins", "object"), Value::None])
                } else {
                    let mut full = Vec::with_capacity(args.len() + 1);
                    full.push(Value::Global(class));
                    full.extend(args);
                    (self.intern("copyreg", "__newobj__"), full)
                };
                self.save(&helper, true)?;
                self.save(&Value::tuple(args), true)?;
                self.write_opcode(REDUCE)?;
            }
        }

        if let Some(value) = value {
            if let Some(id) = self.memo.contains(value) {
                // The arguments referred back to the object: it exists
                // already, so throw away the fresh construction.
                self.write_opcode(POP)?;
                self.write_get(id)?;
            } else {
                self.memoize(value)?;
            }
        }

        if let Some(state) = state {
            self.save(&state, true)?;
            self.write_opcode(BUILD)?;
        }
        if let Some(items) = list_items {
            let items = items.resolve(proto)?;
            self.batch_appends(items)?;
        }
        if let Some(items) = dict_items {
            let items = items.resolve(proto)?;
            self.batch_setitems(items)?;
        }
        Ok(())
    }
}

/// `repr()` of a float as Python writes it.
fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let repr = format!("{:?}", f);
    match repr.find('e') {
        Some(pos) if !repr[pos + 1..].starts_with('-') =>
            format!("{}e+{}", &repr[..pos], &repr[pos + 1..]),
        _ => repr,
    }
}

/// Python's "raw-unicode-escape" codec plus the extra escapes that keep a
/// protocol 0 line intact.
fn raw_unicode_escape(s: &str) -> Vec<u8> {
    let mut result = Vec::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' | '\0' | '\n' | '\r' | '\x1a' =>
                result.extend_from_slice(format!("\\u{:04x}", ch as u32).as_bytes()),
            c if (c as u32) < 0x100 => result.push(c as u8),
            c if (c as u32) < 0x10000 =>
                result.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes()),
            c => result.extend_from_slice(format!("\\U{:08x}", c as u32).as_bytes()),
        }
    }
    result
}

/// Encode the value into a pickle stream.
pub fn value_to_writer<W: io::Write>(writer: &mut W, value: &Value, options: SerOptions)
                                     -> Result<()> {
    Pickler::new(writer, options).dump(value)
}

/// Encode the specified struct into a `[u8]` writer.
#[inline]
pub fn to_writer<W: io::Write, T: Serialize + ?Sized>(writer: &mut W, value: &T,
                                                      options: SerOptions) -> Result<()> {
    value_to_writer(writer, &to_value(value)?, options)
}

/// Encode the value into a `Vec<u8>` buffer.
#[inline]
pub fn value_to_vec(value: &Value, options: SerOptions) -> Result<Vec<u8>> {
    let mut writer = Vec::with_capacity(128);
    value_to_writer(&mut writer, value, options)?;
    Ok(writer)
}

/// Encode the specified struct into a `Vec<u8>` buffer.
#[inline]
pub fn to_vec<T: Serialize + ?Sized>(value: &T, options: SerOptions) -> Result<Vec<u8>> {
    let mut writer = Vec::with_capacity(128);
    to_writer(&mut writer, value, options)?;
    Ok(writer)
}
