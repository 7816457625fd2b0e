// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Binding module globals to constructors during unpickling.
//!
//! A GLOBAL opcode names `module.qualname`; the unpickler asks its
//! [`Resolver`] for a [`Constructor`] and stores it in the resulting
//! [`Global`].  REDUCE, NEWOBJ and friends then dispatch to that constructor.
//!
//! The default [`TableResolver`] knows the handful of builtins that pickles
//! use to spell sets, bytes and copyreg reconstruction, and turns every other
//! class into a generic [`Object`] that remembers how it was built.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};

use crate::error::{Error, ErrorCode, Result};
use crate::reduce::iterate;
use crate::value::{Global, HashableValue, Init, Object, Value};

pub type ConstructorRef = Arc<dyn Constructor>;

/// Something a pickle can call: a class or a factory function.
pub trait Constructor: Send + Sync {
    /// `global(*args)`, for REDUCE and INST/OBJ with arguments.
    fn call(&self, ctx: &CallContext, global: &Rc<Global>, args: Vec<Value>) -> Result<Value>;

    /// `global.__new__(global, *args, **kwargs)`, for NEWOBJ, NEWOBJ_EX and
    /// the copyreg helpers.  The default allocates a generic instance.
    fn new_object(&self, _ctx: &CallContext, global: &Rc<Global>, args: Vec<Value>,
                  kwargs: Option<Value>) -> Result<Value> {
        Ok(Value::object(Object::with_init(global.clone(), Init::New { args, kwargs })))
    }
}

/// Maps `(module, qualname)` to a constructor.  `None` rejects the global.
pub trait Resolver: Send + Sync {
    fn resolve(&self, module: &str, qualname: &str) -> Option<ConstructorRef>;
}

/// What a constructor can reach while it runs: global lookup (with the
/// unpickler's per-stream cache) and instance creation.
pub struct CallContext<'a> {
    resolver: &'a dyn Resolver,
    cache: &'a RefCell<HashMap<(String, String), Rc<Global>>>,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(resolver: &'a dyn Resolver,
                      cache: &'a RefCell<HashMap<(String, String), Rc<Global>>>) -> Self {
        CallContext { resolver, cache }
    }

    /// Resolve `module.qualname`, reusing an earlier resolution if possible.
    pub fn resolve(&self, module: &str, qualname: &str) -> Result<Rc<Global>> {
        let key = (module.to_owned(), qualname.to_owned());
        if let Some(global) = self.cache.borrow().get(&key) {
            return Ok(global.clone());
        }
        let constructor = match self.resolver.resolve(module, qualname) {
            Some(constructor) => constructor,
            None => return Err(Error::Syntax(ErrorCode::UnsupportedGlobal(
                module.as_bytes().to_vec(), qualname.as_bytes().to_vec()))),
        };
        log::trace!("resolved global {}.{}", module, qualname);
        let global = Rc::new(Global::with_constructor(key.0.clone(), key.1.clone(), constructor));
        self.cache.borrow_mut().insert(key, global.clone());
        Ok(global)
    }

    /// The constructor bound to `global`.  Globals that did not come from a
    /// GLOBAL opcode (e.g. from a persistent_load hook) are resolved now.
    pub fn constructor(&self, global: &Rc<Global>) -> Result<(Rc<Global>, ConstructorRef)> {
        if let Some(constructor) = global.constructor() {
            return Ok((global.clone(), constructor.clone()));
        }
        let resolved = self.resolve(&global.module, &global.name)?;
        let constructor = resolved.constructor().cloned().ok_or_else(
            || Error::Syntax(ErrorCode::UnresolvedGlobal))?;
        Ok((resolved, constructor))
    }

    /// `callable(*args)`.
    pub fn call(&self, callable: &Value, args: Vec<Value>) -> Result<Value> {
        let (global, constructor) = self.constructor(expect_global(callable)?)?;
        constructor.call(self, &global, args)
    }

    /// `cls.__new__(cls, *args, **kwargs)`.
    pub fn new_object(&self, cls: &Value, args: Vec<Value>, kwargs: Option<Value>)
                      -> Result<Value> {
        let (global, constructor) = self.constructor(expect_global(cls)?)?;
        constructor.new_object(self, &global, args, kwargs)
    }
}

fn expect_global(value: &Value) -> Result<&Rc<Global>> {
    match *value {
        Value::Global(ref g) => Ok(g),
        _ => Err(Error::Syntax(ErrorCode::UnresolvedGlobal)),
    }
}

/// Constructor for classes without special support: records the call.
#[derive(Clone, Copy, Debug, Default)]
pub struct GenericConstructor;

impl Constructor for GenericConstructor {
    fn call(&self, _ctx: &CallContext, global: &Rc<Global>, args: Vec<Value>) -> Result<Value> {
        Ok(Value::object(Object::with_init(global.clone(), Init::Call(args))))
    }
}

struct FnConstructor<F>(F);

impl<F> Constructor for FnConstructor<F>
    where F: Fn(&CallContext, &Rc<Global>, Vec<Value>) -> Result<Value> + Send + Sync
{
    fn call(&self, ctx: &CallContext, global: &Rc<Global>, args: Vec<Value>) -> Result<Value> {
        (self.0)(ctx, global, args)
    }
}

/// Wrap a closure as a constructor.  NEWOBJ on it creates a generic instance.
pub fn constructor_fn<F>(f: F) -> ConstructorRef
    where F: Fn(&CallContext, &Rc<Global>, Vec<Value>) -> Result<Value> + Send + Sync + 'static
{
    Arc::new(FnConstructor(f))
}

/// The builtins that standard pickles rely on.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Builtin {
    Set,
    FrozenSet,
    List,
    Tuple,
    Dict,
    Bytes,
    ByteArray,
    Str,
    Int,
    Float,
    Bool,
    Object,
    GetAttr,
    CodecsEncode,
    Reconstructor,
    NewObj,
    NewObjEx,
}

impl Builtin {
    pub const ALL: &'static [(&'static str, &'static str, Builtin)] = &[
        ("builtins", "set", Builtin::Set),
        ("builtins", "frozenset", Builtin::FrozenSet),
        ("builtins", "list", Builtin::List),
        ("builtins", "tuple", Builtin::Tuple),
        ("builtins", "dict", Builtin::Dict),
        ("builtins", "bytes", Builtin::Bytes),
        ("builtins", "bytearray", Builtin::ByteArray),
        ("builtins", "str", Builtin::Str),
        ("builtins", "int", Builtin::Int),
        ("builtins", "float", Builtin::Float),
        ("builtins", "bool", Builtin::Bool),
        ("builtins", "object", Builtin::Object),
        ("builtins", "getattr", Builtin::GetAttr),
        ("_codecs", "encode", Builtin::CodecsEncode),
        ("copyreg", "_reconstructor", Builtin::Reconstructor),
        ("copyreg", "__newobj__", Builtin::NewObj),
        ("copyreg", "__newobj_ex__", Builtin::NewObjEx),
    ];
}

fn invalid<T>(msg: String) -> Result<T> {
    Err(Error::Syntax(ErrorCode::InvalidValue(msg)))
}

fn arity(global: &Global, args: &[Value], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        return invalid(format!("{}() takes {} to {} arguments, got {}",
                               global.qualified_name(), min, max, args.len()));
    }
    Ok(())
}

fn hashables(items: Vec<Value>) -> Result<Vec<HashableValue>> {
    items.into_iter().map(Value::into_hashable).collect()
}

fn pairs(value: &Value) -> Result<BTreeMap<HashableValue, Value>> {
    if let Value::Dict(ref d) = *value {
        return Ok(d.borrow().clone());
    }
    let mut map = BTreeMap::new();
    for item in iterate(value, "dict() argument").map_err(into_syntax)? {
        match item {
            Value::Tuple(ref t) if t.len() == 2 => {
                map.insert(t[0].clone().into_hashable()?, t[1].clone());
            }
            other => return invalid(format!("dict() item must be a pair, got {}", other)),
        }
    }
    Ok(map)
}

fn into_syntax(err: Error) -> Error {
    match err {
        Error::Encode(code) => Error::Syntax(code),
        other => other,
    }
}

fn encode_str(s: &str, encoding: &str) -> Result<Vec<u8>> {
    match &*encoding.to_ascii_lowercase().replace('-', "_") {
        "latin1" | "latin_1" | "iso8859_1" | "iso_8859_1" => s.chars().map(|c| {
            if (c as u32) < 256 { Ok(c as u8) } else {
                invalid(format!("character {:?} not encodable in latin-1", c))
            }
        }).collect(),
        "ascii" => s.chars().map(|c| {
            if c.is_ascii() { Ok(c as u8) } else {
                invalid(format!("character {:?} not encodable in ascii", c))
            }
        }).collect(),
        "utf8" | "utf_8" => Ok(s.as_bytes().to_vec()),
        other => invalid(format!("unsupported encoding {:?}", other)),
    }
}

fn to_bytes(global: &Global, args: Vec<Value>) -> Result<Value> {
    arity(global, &args, 0, 2)?;
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (None, _) => Ok(Value::Bytes(vec![])),
        (Some(Value::Bytes(b)), None) => Ok(Value::Bytes(b)),
        (Some(Value::String(s)), Some(Value::String(enc))) =>
            encode_str(&s, &enc).map(Value::Bytes),
        (Some(Value::I64(n)), None) if n >= 0 => {
            let mut zeros = Vec::new();
            match n.to_usize() {
                Some(len) if zeros.try_reserve_exact(len).is_ok() => zeros.resize(len, 0),
                _ => return invalid(format!("bytes() size {} cannot be allocated", n)),
            }
            Ok(Value::Bytes(zeros))
        }
        (Some(other), None) => {
            let items = iterate(&other, "bytes() argument").map_err(into_syntax)?;
            items.into_iter().map(|item| match item {
                Value::I64(i) if 0 <= i && i < 256 => Ok(i as u8),
                v => invalid(format!("bytes() item must be in range(256), got {}", v)),
            }).collect::<Result<Vec<u8>>>().map(Value::Bytes)
        }
        (Some(arg), Some(_)) => invalid(format!("cannot convert {} to bytes with an encoding",
                                                arg.type_name())),
    }
}

fn to_int(value: Value) -> Result<Value> {
    match value {
        Value::Bool(b) => Ok(Value::I64(b as i64)),
        Value::I64(_) | Value::Int(_) => Ok(value),
        Value::F64(f) if f.is_finite() => {
            let f = f.trunc();
            match f.to_i64() {
                Some(i) => Ok(Value::I64(i)),
                None => Ok(Value::Int(BigInt::from_f64(f).unwrap_or_default())),
            }
        }
        Value::String(ref s) => {
            let s = s.trim().replace('_', "");
            match s.parse::<i64>() {
                Ok(i) => Ok(Value::I64(i)),
                Err(_) => match s.parse::<BigInt>() {
                    Ok(i) => Ok(Value::Int(i)),
                    Err(_) => invalid(format!("invalid literal for int(): {:?}", s)),
                },
            }
        }
        other => invalid(format!("int() argument must be a number or string, got {}",
                                 other.type_name())),
    }
}

fn to_float(value: Value) -> Result<Value> {
    match value {
        Value::Bool(b) => Ok(Value::F64(b as i64 as f64)),
        Value::I64(i) => Ok(Value::F64(i as f64)),
        Value::Int(ref i) => Ok(Value::F64(i.to_f64().unwrap_or(std::f64::INFINITY))),
        Value::F64(_) => Ok(value),
        Value::String(ref s) => match &*s.trim().to_ascii_lowercase() {
            "nan" | "+nan" | "-nan" => Ok(Value::F64(std::f64::NAN)),
            "inf" | "+inf" | "infinity" => Ok(Value::F64(std::f64::INFINITY)),
            "-inf" | "-infinity" => Ok(Value::F64(std::f64::NEG_INFINITY)),
            t => t.parse().map(Value::F64).or_else(
                |_| invalid(format!("could not convert string to float: {:?}", s))),
        },
        other => invalid(format!("float() argument must be a number or string, got {}",
                                 other.type_name())),
    }
}

fn truthy(value: &Value) -> bool {
    match *value {
        Value::None => false,
        Value::Bool(b) => b,
        Value::I64(i) => i != 0,
        Value::Int(ref i) => *i != BigInt::from(0),
        Value::F64(f) => f != 0.0,
        Value::Bytes(ref b) => !b.is_empty(),
        Value::String(ref s) => !s.is_empty(),
        Value::List(ref l) => !l.borrow().is_empty(),
        Value::Tuple(ref t) => !t.is_empty(),
        Value::Set(ref s) => !s.borrow().is_empty(),
        Value::FrozenSet(ref s) => !s.is_empty(),
        Value::Dict(ref d) => !d.borrow().is_empty(),
        Value::Global(_) | Value::Object(_) | Value::Host(_) => true,
    }
}

impl Constructor for Builtin {
    fn call(&self, ctx: &CallContext, global: &Rc<Global>, args: Vec<Value>) -> Result<Value> {
        let single = |args: &[Value]| -> Result<()> { arity(global, args, 0, 1) };
        match *self {
            Builtin::Set => {
                single(&args)?;
                let items = match args.first() {
                    Some(arg) => iterate(arg, "set() argument").map_err(into_syntax)?,
                    None => vec![],
                };
                Ok(Value::set(hashables(items)?))
            }
            Builtin::FrozenSet => {
                single(&args)?;
                let items = match args.first() {
                    Some(arg) => iterate(arg, "frozenset() argument").map_err(into_syntax)?,
                    None => vec![],
                };
                Ok(Value::frozenset(hashables(items)?))
            }
            Builtin::List | Builtin::Tuple => {
                single(&args)?;
                let items = match args.first() {
                    Some(arg) => iterate(arg, "sequence argument").map_err(into_syntax)?,
                    None => vec![],
                };
                Ok(if *self == Builtin::List { Value::list(items) } else { Value::tuple(items) })
            }
            Builtin::Dict => {
                single(&args)?;
                match args.first() {
                    Some(arg) => Ok(Value::Dict(Rc::new(RefCell::new(pairs(arg)?)))),
                    None => Ok(Value::dict(vec![])),
                }
            }
            Builtin::Bytes | Builtin::ByteArray => to_bytes(global, args),
            Builtin::Str => {
                single(&args)?;
                match args.into_iter().next() {
                    None => Ok(Value::String(String::new())),
                    Some(Value::String(s)) => Ok(Value::String(s)),
                    Some(other) => Ok(Value::String(other.to_string())),
                }
            }
            Builtin::Int => {
                single(&args)?;
                args.into_iter().next().map_or(Ok(Value::I64(0)), to_int)
            }
            Builtin::Float => {
                single(&args)?;
                args.into_iter().next().map_or(Ok(Value::F64(0.0)), to_float)
            }
            Builtin::Bool => {
                single(&args)?;
                Ok(Value::Bool(args.first().map_or(false, truthy)))
            }
            Builtin::Object => {
                arity(global, &args, 0, 0)?;
                Ok(Value::object(Object::new(global.clone())))
            }
            Builtin::GetAttr => {
                arity(global, &args, 2, 2)?;
                match (&args[0], &args[1]) {
                    (Value::Global(parent), Value::String(attr)) => {
                        let qualname = format!("{}.{}", parent.name, attr);
                        Ok(Value::Global(ctx.resolve(&parent.module, &qualname)?))
                    }
                    (obj, attr) => invalid(format!("cannot look up {} on {}", attr, obj)),
                }
            }
            Builtin::CodecsEncode => {
                arity(global, &args, 1, 2)?;
                let encoding = match args.get(1) {
                    Some(Value::String(enc)) => enc.clone(),
                    None => "utf-8".into(),
                    Some(other) => return invalid(format!("encoding must be str, got {}",
                                                          other.type_name())),
                };
                match args[0] {
                    Value::String(ref s) => encode_str(s, &encoding).map(Value::Bytes),
                    ref other => invalid(format!("cannot encode {}", other.type_name())),
                }
            }
            Builtin::Reconstructor => {
                // _reconstructor(cls, base, state): `state` is only used by
                // non-object bases, which we treat like object.
                arity(global, &args, 2, 3)?;
                ctx.new_object(&args[0], vec![], None)
            }
            Builtin::NewObj => {
                arity(global, &args, 1, usize::MAX)?;
                let mut args = args.into_iter();
                let cls = args.next().unwrap_or(Value::None);
                ctx.new_object(&cls, args.collect(), None)
            }
            Builtin::NewObjEx => {
                arity(global, &args, 3, 3)?;
                let cls_args = iterate(&args[1], "__newobj_ex__ args").map_err(into_syntax)?;
                ctx.new_object(&args[0], cls_args, Some(args[2].clone()))
            }
        }
    }

    fn new_object(&self, ctx: &CallContext, global: &Rc<Global>, args: Vec<Value>,
                  kwargs: Option<Value>) -> Result<Value> {
        match *self {
            // Only the builtin types can be allocated; copyreg helpers and
            // functions cannot.
            Builtin::Set | Builtin::FrozenSet | Builtin::List | Builtin::Tuple |
            Builtin::Dict | Builtin::Bytes | Builtin::ByteArray | Builtin::Str |
            Builtin::Int | Builtin::Float | Builtin::Bool if kwargs.is_none() =>
                self.call(ctx, global, args),
            Builtin::Object =>
                Ok(Value::object(Object::with_init(global.clone(), Init::New { args, kwargs }))),
            _ => invalid(format!("{} cannot be instantiated with __new__",
                                 global.qualified_name())),
        }
    }
}

/// A resolver backed by a name table, with an optional fallback for names
/// not in the table.
#[derive(Clone)]
pub struct TableResolver {
    table: HashMap<(String, String), ConstructorRef>,
    fallback: Option<ConstructorRef>,
}

impl TableResolver {
    /// The builtins, plus generic instances for every other global.
    pub fn new() -> TableResolver {
        let mut table = HashMap::new();
        for &(module, name, builtin) in Builtin::ALL {
            table.insert((module.to_owned(), name.to_owned()),
                         Arc::new(builtin) as ConstructorRef);
        }
        TableResolver { table, fallback: Some(Arc::new(GenericConstructor)) }
    }

    /// Reject globals that are not in the table.
    pub fn strict(mut self) -> TableResolver {
        self.fallback = None;
        self
    }

    /// Use `fallback` for globals that are not in the table.
    pub fn with_fallback(mut self, fallback: ConstructorRef) -> TableResolver {
        self.fallback = Some(fallback);
        self
    }

    pub fn register<M, N>(&mut self, module: M, qualname: N, constructor: ConstructorRef)
        where M: Into<String>, N: Into<String>
    {
        self.table.insert((module.into(), qualname.into()), constructor);
    }

    pub fn unregister(&mut self, module: &str, qualname: &str) -> bool {
        self.table.remove(&(module.to_owned(), qualname.to_owned())).is_some()
    }
}

impl Default for TableResolver {
    fn default() -> Self {
        TableResolver::new()
    }
}

impl fmt::Debug for TableResolver {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TableResolver")
         .field("entries", &self.table.len())
         .field("fallback", &self.fallback.is_some())
         .finish()
    }
}

impl Resolver for TableResolver {
    fn resolve(&self, module: &str, qualname: &str) -> Option<ConstructorRef> {
        match self.table.get(&(module.to_owned(), qualname.to_owned())) {
            Some(constructor) => Some(constructor.clone()),
            None => self.fallback.clone(),
        }
    }
}
