// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Python values: the object graph the pickler walks and the unpickler
//! rebuilds.

use std::any::Any;
use std::fmt;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::mem;
use std::rc::Rc;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

pub use crate::value_impls::{to_value, from_value};

use crate::error::{Error, ErrorCode, Result};
use crate::reduce::Reduction;
use crate::resolve::ConstructorRef;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type DictRef = Rc<RefCell<BTreeMap<HashableValue, Value>>>;
pub type SetRef = Rc<RefCell<BTreeSet<HashableValue>>>;
pub type ObjectRef = Rc<RefCell<Object>>;

/// A node of a Python object graph.
///
/// Primitives are stored inline.  Everything that has identity in Python
/// (containers, instances, classes) lives behind an `Rc`, so that a graph
/// can share subobjects and contain cycles.  Cloning a `Value` clones the
/// reference, not the object; use `Value::is` to test identity and `==` to
/// compare structure.
///
/// Note on integers: the decoder puts all integers that fit into an i64 into
/// `I64`, and uses `BigInt` for the rest.  `I64` and `Int` holding the same
/// number compare equal.
///
/// Cyclic graphs are reference cycles and are not freed automatically.
#[derive(Clone)]
pub enum Value {
    /// None
    None,
    /// Boolean
    Bool(bool),
    /// Short integer
    I64(i64),
    /// Long integer (unbounded length)
    Int(BigInt),
    /// Float
    F64(f64),
    /// Bytestring
    Bytes(Vec<u8>),
    /// Unicode string
    String(String),
    /// List
    List(ListRef),
    /// Tuple
    Tuple(Rc<[Value]>),
    /// Set
    Set(SetRef),
    /// Frozen (immutable) set
    FrozenSet(Rc<BTreeSet<HashableValue>>),
    /// Dictionary (map)
    Dict(DictRef),
    /// Reference to a module global, usually a class or function
    Global(Rc<Global>),
    /// Instance of a class without builtin support
    Object(ObjectRef),
    /// Caller-defined object
    Host(Rc<dyn HostObject>),
}

/// Values usable as dictionary keys and set elements.
///
/// In Rust, the type is *not* hashable, since we use B-tree maps and sets
/// instead of the hash variants.  To be able to put all Value instances
/// into these B-trees, we implement a consistent ordering between all
/// the possible types (see below).
#[derive(Clone)]
pub enum HashableValue {
    /// None
    None,
    /// Boolean
    Bool(bool),
    /// Short integer
    I64(i64),
    /// Long integer
    Int(BigInt),
    /// Float
    F64(f64),
    /// Bytestring
    Bytes(Vec<u8>),
    /// Unicode string
    String(String),
    /// Module global, keyed by name
    Global(Rc<Global>),
    /// Instance, keyed by identity as Python does by default
    Object(ObjectRef),
    /// Tuple
    Tuple(Vec<HashableValue>),
    /// Frozen (immutable) set
    FrozenSet(BTreeSet<HashableValue>),
}

/// A `module.qualname` reference.
///
/// Globals produced by the unpickler carry the constructor the resolver bound
/// to the name; that binding is not part of equality.
#[derive(Clone)]
pub struct Global {
    pub module: String,
    pub name: String,
    constructor: Option<ConstructorRef>,
}

impl Global {
    pub fn new<M: Into<String>, N: Into<String>>(module: M, name: N) -> Global {
        Global { module: module.into(), name: name.into(), constructor: None }
    }

    pub fn with_constructor<M, N>(module: M, name: N, constructor: ConstructorRef) -> Global
        where M: Into<String>, N: Into<String>
    {
        Global { module: module.into(), name: name.into(), constructor: Some(constructor) }
    }

    /// The constructor bound during unpickling, if any.
    pub fn constructor(&self) -> Option<&ConstructorRef> {
        self.constructor.as_ref()
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }
}

impl PartialEq for Global {
    fn eq(&self, other: &Global) -> bool {
        self.module == other.module && self.name == other.name
    }
}

impl Eq for Global {}

impl fmt::Debug for Global {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

/// How an `Object` came into existence.
#[derive(Clone, PartialEq, Debug)]
pub enum Init {
    /// The class was called with these arguments (REDUCE).
    Call(Vec<Value>),
    /// The instance was allocated without running the initializer
    /// (NEWOBJ, NEWOBJ_EX, copyreg helpers).
    New { args: Vec<Value>, kwargs: Option<Value> },
}

/// An instance of a class the unpickler has no special support for.
///
/// It records everything the pickle said about the instance, so that
/// pickling it again reproduces an equivalent stream.
#[derive(Clone, PartialEq, Debug)]
pub struct Object {
    pub class: Rc<Global>,
    pub init: Init,
    /// Argument of BUILD, usually the attribute dict.
    pub state: Option<Value>,
    /// Items added with APPEND/APPENDS, for list subclasses.
    pub list_items: Vec<Value>,
    /// Items added with SETITEM/SETITEMS, for dict subclasses.
    pub dict_items: Vec<(Value, Value)>,
}

impl Object {
    pub fn new(class: Rc<Global>) -> Object {
        Object::with_init(class, Init::New { args: vec![], kwargs: None })
    }

    pub fn with_init(class: Rc<Global>, init: Init) -> Object {
        Object { class, init, state: None, list_items: vec![], dict_items: vec![] }
    }

    /// Apply a BUILD state.  A dict is copied into the instance's own dict,
    /// like `__dict__.update()`; anything else replaces the state.
    pub fn set_state(&mut self, state: Value) {
        if let Value::Dict(ref new) = state {
            if let Some(Value::Dict(ref old)) = self.state {
                if !Rc::ptr_eq(old, new) {
                    let new = new.borrow();
                    old.borrow_mut().extend(new.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                return;
            }
            let copy = Value::dict(new.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
            self.state = Some(copy);
            return;
        }
        self.state = Some(state);
    }
}

/// Capability interface for caller-defined types.
///
/// The pickler consults `reduce` for values without a dispatch table entry;
/// the unpickler calls the mutators when BUILD, APPENDS or SETITEMS target
/// such a value.  Implementations use interior mutability.
pub trait HostObject {
    /// `(module, qualname)` of the Python class this object stands for.
    fn class_name(&self) -> (&str, &str);

    fn as_any(&self) -> &dyn Any;

    fn reduce(&self, _proto: u8) -> Result<Reduction> {
        let (module, name) = self.class_name();
        Err(Error::Encode(ErrorCode::Unpicklable(format!("{}.{}", module, name))))
    }

    fn set_state(&self, _state: Value) -> Result<()> {
        Err(refuse(self.class_name(), "state"))
    }

    fn extend(&self, _items: Vec<Value>) -> Result<()> {
        Err(refuse(self.class_name(), "list items"))
    }

    fn set_items(&self, _items: Vec<(Value, Value)>) -> Result<()> {
        Err(refuse(self.class_name(), "dict items"))
    }
}

fn refuse((module, name): (&str, &str), what: &str) -> Error {
    Error::Syntax(ErrorCode::InvalidValue(format!("{}.{} does not accept {}", module, name, what)))
}

fn values_to_hashable(values: Vec<Value>) -> Result<Vec<HashableValue>> {
    values.into_iter().map(Value::into_hashable).collect()
}

fn hashable_to_values(values: Vec<HashableValue>) -> Vec<Value> {
    values.into_iter().map(HashableValue::into_value).collect()
}

pub(crate) fn addr<T: ?Sized>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc) as *const u8 as usize
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::from(items))
    }

    pub fn dict<I: IntoIterator<Item=(HashableValue, Value)>>(items: I) -> Value {
        Value::Dict(Rc::new(RefCell::new(items.into_iter().collect())))
    }

    pub fn set<I: IntoIterator<Item=HashableValue>>(items: I) -> Value {
        Value::Set(Rc::new(RefCell::new(items.into_iter().collect())))
    }

    pub fn frozenset<I: IntoIterator<Item=HashableValue>>(items: I) -> Value {
        Value::FrozenSet(Rc::new(items.into_iter().collect()))
    }

    pub fn global<M: Into<String>, N: Into<String>>(module: M, name: N) -> Value {
        Value::Global(Rc::new(Global::new(module, name)))
    }

    pub fn object(object: Object) -> Value {
        Value::Object(Rc::new(RefCell::new(object)))
    }

    pub fn host<H: HostObject + 'static>(host: H) -> Value {
        Value::Host(Rc::new(host))
    }

    /// Address of the shared object, for values that have identity.
    pub fn identity(&self) -> Option<usize> {
        match *self {
            Value::List(ref rc) => Some(addr(rc)),
            Value::Tuple(ref rc) => Some(addr(rc)),
            Value::Set(ref rc) => Some(addr(rc)),
            Value::FrozenSet(ref rc) => Some(addr(rc)),
            Value::Dict(ref rc) => Some(addr(rc)),
            Value::Global(ref rc) => Some(addr(rc)),
            Value::Object(ref rc) => Some(addr(rc)),
            Value::Host(ref rc) => Some(addr(rc)),
            _ => None,
        }
    }

    /// Python's `is`: true if both refer to the same shared object.
    pub fn is(&self, other: &Value) -> bool {
        match (self.identity(), other.identity()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Python type name, used in error messages.
    pub fn type_name(&self) -> String {
        match *self {
            Value::None => "NoneType".into(),
            Value::Bool(_) => "bool".into(),
            Value::I64(_) | Value::Int(_) => "int".into(),
            Value::F64(_) => "float".into(),
            Value::Bytes(_) => "bytes".into(),
            Value::String(_) => "str".into(),
            Value::List(_) => "list".into(),
            Value::Tuple(_) => "tuple".into(),
            Value::Set(_) => "set".into(),
            Value::FrozenSet(_) => "frozenset".into(),
            Value::Dict(_) => "dict".into(),
            Value::Global(ref g) => format!("global {}", g.qualified_name()),
            Value::Object(ref o) => o.borrow().class.qualified_name(),
            Value::Host(ref h) => {
                let (module, name) = h.class_name();
                format!("{}.{}", module, name)
            }
        }
    }

    /// Convert the value into a hashable version, if possible.  If not, return
    /// a ValueNotHashable error.
    pub fn into_hashable(self) -> Result<HashableValue> {
        match self {
            Value::None         => Ok(HashableValue::None),
            Value::Bool(b)      => Ok(HashableValue::Bool(b)),
            Value::I64(i)       => Ok(HashableValue::I64(i)),
            Value::Int(i)       => Ok(HashableValue::Int(i)),
            Value::F64(f)       => Ok(HashableValue::F64(f)),
            Value::Bytes(b)     => Ok(HashableValue::Bytes(b)),
            Value::String(s)    => Ok(HashableValue::String(s)),
            Value::Global(g)    => Ok(HashableValue::Global(g)),
            Value::Object(o)    => Ok(HashableValue::Object(o)),
            Value::FrozenSet(v) => Ok(HashableValue::FrozenSet((*v).clone())),
            Value::Tuple(v)     => values_to_hashable(v.to_vec()).map(HashableValue::Tuple),
            _                   => Err(Error::Syntax(ErrorCode::ValueNotHashable))
        }
    }
}

impl HashableValue {
    /// Convert the value into its non-hashable version.  This always works.
    pub fn into_value(self) -> Value {
        match self {
            HashableValue::None         => Value::None,
            HashableValue::Bool(b)      => Value::Bool(b),
            HashableValue::I64(i)       => Value::I64(i),
            HashableValue::Int(i)       => Value::Int(i),
            HashableValue::F64(f)       => Value::F64(f),
            HashableValue::Bytes(b)     => Value::Bytes(b),
            HashableValue::String(s)    => Value::String(s),
            HashableValue::Global(g)    => Value::Global(g),
            HashableValue::Object(o)    => Value::Object(o),
            HashableValue::FrozenSet(v) => Value::FrozenSet(Rc::new(v)),
            HashableValue::Tuple(v)     => Value::tuple(hashable_to_values(v)),
        }
    }
}

impl Value {
    /// Directly contained values that can nest further.  Tuples and
    /// frozensets used as keys or set elements are converted, so that they
    /// count as a level too.
    pub(crate) fn children(&self) -> Vec<Value> {
        fn nests(value: &&Value) -> bool {
            value.identity().is_some()
        }
        let mut out = Vec::new();
        match *self {
            Value::List(ref v) => out.extend(v.borrow().iter().filter(nests).cloned()),
            Value::Tuple(ref v) => out.extend(v.iter().filter(nests).cloned()),
            Value::Set(ref v) => out.extend(v.borrow().iter().filter_map(hashable_child)),
            Value::FrozenSet(ref v) => out.extend(v.iter().filter_map(hashable_child)),
            Value::Dict(ref v) => {
                for (key, value) in v.borrow().iter() {
                    out.extend(hashable_child(key));
                    if nests(&value) {
                        out.push(value.clone());
                    }
                }
            }
            Value::Object(ref o) => {
                let o = o.borrow();
                let (args, kwargs) = match o.init {
                    Init::Call(ref args) => (args, None),
                    Init::New { ref args, ref kwargs } => (args, kwargs.as_ref()),
                };
                let values = args.iter()
                    .chain(kwargs)
                    .chain(o.state.as_ref())
                    .chain(o.list_items.iter())
                    .chain(o.dict_items.iter().flat_map(|(k, v)| Some(k).into_iter().chain(Some(v))));
                out.extend(values.filter(nests).cloned());
            }
            _ => {}
        }
        out
    }
}

fn hashable_child(value: &HashableValue) -> Option<Value> {
    match *value {
        HashableValue::Object(ref o) => Some(Value::Object(o.clone())),
        HashableValue::Tuple(_) | HashableValue::FrozenSet(_) => Some(value.clone().into_value()),
        _ => None,
    }
}

/// Nesting heights by identity.  Entries keep their value alive, so an
/// address is not reused while it is mapped.
pub(crate) type Heights = HashMap<usize, (Value, usize)>;

/// Nesting height of `root`: 0 for scalars, one more than the highest child
/// for everything else.  Heights already in `known` are trusted; everything
/// measured is added.  Edges back into the path being walked are cycles and
/// do not count.  Returns `None` as soon as the height exceeds `limit`.
///
/// The walk keeps its own stack, so it works on graphs of any depth.
pub(crate) fn measure(known: &mut Heights, root: &Value, limit: usize) -> Option<usize> {
    let id = match root.identity() {
        Some(id) => id,
        None => return Some(0),
    };
    if let Some(&(_, height)) = known.get(&id) {
        return Some(height);
    }
    // (node, its children, next child, height so far)
    let mut path = vec![(root.clone(), root.children(), 0, 1)];
    let mut active = HashSet::new();
    active.insert(id);
    loop {
        let (child, parent_height) = {
            let frame = path.last_mut()?;
            if frame.2 == frame.1.len() {
                (None, frame.3)
            } else {
                frame.2 += 1;
                (Some(frame.1[frame.2 - 1].clone()), frame.3)
            }
        };
        match child {
            Some(child) => {
                let cid = child.identity()?;
                if let Some(&(_, height)) = known.get(&cid) {
                    if let Some(frame) = path.last_mut() {
                        frame.3 = parent_height.max(height + 1);
                    }
                } else if active.insert(cid) {
                    if path.len() >= limit {
                        return None;
                    }
                    let children = child.children();
                    path.push((child, children, 0, 1));
                }
            }
            None => {
                let (node, _, _, height) = path.pop()?;
                if height > limit {
                    return None;
                }
                if let Some(nid) = node.identity() {
                    active.remove(&nid);
                    known.insert(nid, (node, height));
                }
                match path.last_mut() {
                    Some(frame) => frame.3 = frame.3.max(height + 1),
                    None => return Some(height),
                }
            }
        }
    }
}

/// Drop `values` without recursion.  Containers that are no longer shared
/// hand their contents to a work list before they go; shared ones are only
/// released.
pub(crate) fn dismantle(values: Vec<Value>) {
    let mut work = values;
    let mut keys: Vec<HashableValue> = Vec::new();
    loop {
        if let Some(value) = work.pop() {
            match value {
                Value::List(rc) => if let Ok(cell) = Rc::try_unwrap(rc) {
                    work.extend(cell.into_inner());
                },
                Value::Tuple(mut rc) => if let Some(items) = Rc::get_mut(&mut rc) {
                    work.extend(items.iter_mut().map(|item| mem::replace(item, Value::None)));
                },
                Value::Set(rc) => if let Ok(cell) = Rc::try_unwrap(rc) {
                    keys.extend(cell.into_inner());
                },
                Value::FrozenSet(rc) => if let Ok(set) = Rc::try_unwrap(rc) {
                    keys.extend(set);
                },
                Value::Dict(rc) => if let Ok(cell) = Rc::try_unwrap(rc) {
                    for (key, value) in cell.into_inner() {
                        keys.push(key);
                        work.push(value);
                    }
                },
                Value::Object(rc) => if let Ok(cell) = Rc::try_unwrap(rc) {
                    let object = cell.into_inner();
                    match object.init {
                        Init::Call(args) => work.extend(args),
                        Init::New { args, kwargs } => {
                            work.extend(args);
                            work.extend(kwargs);
                        }
                    }
                    work.extend(object.state);
                    work.extend(object.list_items);
                    for (key, value) in object.dict_items {
                        work.push(key);
                        work.push(value);
                    }
                },
                _ => {}
            }
        } else if let Some(key) = keys.pop() {
            match key {
                HashableValue::Tuple(items) => keys.extend(items),
                HashableValue::FrozenSet(items) => keys.extend(items),
                HashableValue::Object(o) => work.push(Value::Object(o)),
                _ => {}
            }
        } else {
            return;
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        use self::Value::*;
        match (self, other) {
            (None, None) => true,
            (Bool(a), Bool(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (I64(a), Int(b)) | (Int(b), I64(a)) => BigInt::from(*a) == *b,
            (F64(a), F64(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (String(a), String(b)) => a == b,
            (List(a), List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Tuple(a), Tuple(b)) => Rc::ptr_eq(a, b) || a[..] == b[..],
            (Set(a), Set(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (FrozenSet(a), FrozenSet(b)) => a == b,
            (Dict(a), Dict(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Global(a), Global(b)) => a == b,
            (Object(a), Object(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Host(a), Host(b)) => addr(a) == addr(b),
            _ => false,
        }
    }
}

fn write_bytes(f: &mut fmt::Formatter, b: &[u8]) -> fmt::Result {
    f.write_str("b'")?;
    for &byte in b {
        match byte {
            b'\\' => f.write_str("\\\\")?,
            b'\'' => f.write_str("\\'")?,
            b'\n' => f.write_str("\\n")?,
            b'\r' => f.write_str("\\r")?,
            b'\t' => f.write_str("\\t")?,
            0x20..=0x7e => write!(f, "{}", byte as char)?,
            _ => write!(f, "\\x{:02x}", byte)?,
        }
    }
    f.write_str("'")
}

/// Containers nested deeper than this print as `...`.
const REPR_DEPTH: usize = 100;

/// Writes Python-like reprs.  `active` holds the containers currently being
/// written, so that cycles print as `[...]`.
struct Repr<'a> {
    active: &'a RefCell<Vec<usize>>,
}

impl<'a> Repr<'a> {
    fn enter(&self, id: usize) -> bool {
        let mut active = self.active.borrow_mut();
        if active.contains(&id) {
            false
        } else {
            active.push(id);
            true
        }
    }

    fn leave(&self) {
        self.active.borrow_mut().pop();
    }

    fn elements<'v, I>(&self, f: &mut fmt::Formatter, it: I, prefix: &str, suffix: &str,
                       always_comma: bool) -> fmt::Result
        where I: ExactSizeIterator<Item=&'v Value>
    {
        let len = it.len();
        f.write_str(prefix)?;
        for (i, item) in it.enumerate() {
            self.value(f, item)?;
            if i < len - 1 {
                f.write_str(", ")?;
            } else if always_comma {
                f.write_str(",")?;
            }
        }
        f.write_str(suffix)
    }

    fn hashables<'v, I>(&self, f: &mut fmt::Formatter, it: I, prefix: &str, suffix: &str,
                        always_comma: bool) -> fmt::Result
        where I: ExactSizeIterator<Item=&'v HashableValue>
    {
        let len = it.len();
        f.write_str(prefix)?;
        for (i, item) in it.enumerate() {
            self.hashable(f, item)?;
            if i < len - 1 {
                f.write_str(", ")?;
            } else if always_comma {
                f.write_str(",")?;
            }
        }
        f.write_str(suffix)
    }

    fn value(&self, f: &mut fmt::Formatter, value: &Value) -> fmt::Result {
        if let Some(id) = value.identity() {
            if self.active.borrow().len() >= REPR_DEPTH {
                return f.write_str("...");
            }
            if !self.enter(id) {
                return f.write_str(match *value {
                    Value::List(_) => "[...]",
                    Value::Tuple(_) => "(...)",
                    Value::Dict(_) | Value::Set(_) => "{...}",
                    _ => "<...>",
                });
            }
            let result = self.composite(f, value);
            self.leave();
            return result;
        }
        match *value {
            Value::None          => write!(f, "None"),
            Value::Bool(b)       => write!(f, "{}", if b { "True" } else { "False" }),
            Value::I64(i)        => write!(f, "{}", i),
            Value::Int(ref i)    => write!(f, "{}", i),
            Value::F64(v)        => write!(f, "{:?}", v),
            Value::Bytes(ref b)  => write_bytes(f, b),
            Value::String(ref s) => write!(f, "{:?}", s),
            _ => unreachable!("values with identity are handled above"),
        }
    }

    fn composite(&self, f: &mut fmt::Formatter, value: &Value) -> fmt::Result {
        match *value {
            Value::List(ref v) => self.elements(f, v.borrow().iter(), "[", "]", false),
            Value::Tuple(ref v) => self.elements(f, v.iter(), "(", ")", v.len() == 1),
            Value::FrozenSet(ref v) => self.hashables(f, v.iter(), "frozenset([", "])", false),
            Value::Set(ref v) => {
                let v = v.borrow();
                if v.is_empty() {
                    f.write_str("set()")
                } else {
                    self.hashables(f, v.iter(), "{", "}", false)
                }
            }
            Value::Dict(ref v) => {
                let v = v.borrow();
                f.write_str("{")?;
                for (i, (key, value)) in v.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    self.hashable(f, key)?;
                    f.write_str(": ")?;
                    self.value(f, value)?;
                }
                f.write_str("}")
            }
            Value::Global(ref g) => write!(f, "{}.{}", g.module, g.name),
            Value::Object(ref o) => {
                let o = o.borrow();
                write!(f, "<{}.{} object", o.class.module, o.class.name)?;
                if let Some(ref state) = o.state {
                    f.write_str(": ")?;
                    self.value(f, state)?;
                }
                f.write_str(">")
            }
            Value::Host(ref h) => {
                let (module, name) = h.class_name();
                write!(f, "<{}.{} host object>", module, name)
            }
            _ => unreachable!("primitive values have no identity"),
        }
    }

    fn hashable(&self, f: &mut fmt::Formatter, value: &HashableValue) -> fmt::Result {
        match *value {
            HashableValue::None             => write!(f, "None"),
            HashableValue::Bool(b)          => write!(f, "{}", if b { "True" } else { "False" }),
            HashableValue::I64(i)           => write!(f, "{}", i),
            HashableValue::Int(ref i)       => write!(f, "{}", i),
            HashableValue::F64(v)           => write!(f, "{:?}", v),
            HashableValue::Bytes(ref b)     => write_bytes(f, b),
            HashableValue::String(ref s)    => write!(f, "{:?}", s),
            HashableValue::Global(ref g)    => write!(f, "{}.{}", g.module, g.name),
            HashableValue::Object(ref o)    => self.value(f, &Value::Object(o.clone())),
            HashableValue::Tuple(ref v)     => self.hashables(f, v.iter(), "(", ")", v.len() == 1),
            HashableValue::FrozenSet(ref v) => self.hashables(f, v.iter(), "frozenset([", "])",
                                                              false),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let active = RefCell::new(Vec::new());
        Repr { active: &active }.value(f, self)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for HashableValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let active = RefCell::new(Vec::new());
        Repr { active: &active }.hashable(f, self)
    }
}

impl fmt::Debug for HashableValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl PartialEq for HashableValue {
    fn eq(&self, other: &HashableValue) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HashableValue {}

impl PartialOrd for HashableValue {
    fn partial_cmp(&self, other: &HashableValue) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Implement a (more or less) consistent ordering for `HashableValue`s
/// so that they can be added to dictionaries and sets.
///
/// Also, like in Python, numeric values with the same value (integral or not)
/// must compare equal.
///
/// For other types, we define an ordering between all types A and B so that all
/// objects of type A are always lesser than objects of type B.  This is done
/// similar to Python 2's ordering of different types.  Instances order by
/// address, which is stable for as long as they are alive.
impl Ord for HashableValue {
    fn cmp(&self, other: &HashableValue) -> Ordering {
        use self::HashableValue::*;
        match (self, other) {
            (None, None) => Ordering::Equal,
            (None, _) => Ordering::Less,
            (_, None) => Ordering::Greater,

            (Bool(a), Bool(b)) => a.cmp(b),
            (Bool(b), I64(i)) => (*b as i64).cmp(i),
            (Bool(b), Int(bi)) => BigInt::from(*b as i64).cmp(bi),
            (Bool(b), F64(f)) => float_ord(*b as i64 as f64, *f),

            (I64(i), Bool(b)) => i.cmp(&(*b as i64)),
            (I64(a), I64(b)) => a.cmp(b),
            (I64(i), Int(bi)) => BigInt::from(*i).cmp(bi),
            (I64(i), F64(f)) => float_ord(*i as f64, *f),

            (Int(bi), Bool(b)) => bi.cmp(&BigInt::from(*b as i64)),
            (Int(bi), I64(i)) => bi.cmp(&BigInt::from(*i)),
            (Int(a), Int(b)) => a.cmp(b),
            (Int(bi), F64(f)) => float_bigint_ord(bi, *f),

            (F64(f), Bool(b)) => float_ord(*f, *b as i64 as f64),
            (F64(f), I64(i)) => float_ord(*f, *i as f64),
            (F64(f), Int(bi)) => float_bigint_ord(bi, *f).reverse(),
            (F64(a), F64(b)) => float_ord(*a, *b),

            (Bytes(a), Bytes(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Global(a), Global(b)) => (&a.module, &a.name).cmp(&(&b.module, &b.name)),
            (Object(a), Object(b)) => addr(a).cmp(&addr(b)),
            (FrozenSet(a), FrozenSet(b)) => a.cmp(b),
            (Tuple(a), Tuple(b)) => a.cmp(b),

            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl HashableValue {
    /// Position of the type in the cross-type ordering.
    fn rank(&self) -> u8 {
        match *self {
            HashableValue::None => 0,
            HashableValue::Bool(_) | HashableValue::I64(_) |
            HashableValue::Int(_) | HashableValue::F64(_) => 1,
            HashableValue::Bytes(_) => 2,
            HashableValue::String(_) => 3,
            HashableValue::Global(_) => 4,
            HashableValue::Object(_) => 5,
            HashableValue::FrozenSet(_) => 6,
            HashableValue::Tuple(_) => 7,
        }
    }
}

/// A "reasonable" total ordering for floats.
fn float_ord(f: f64, g: f64) -> Ordering {
    match f.partial_cmp(&g) {
        Some(o) => o,
        None    => Ordering::Less
    }
}

/// Ordering between floats and big integers.
fn float_bigint_ord(bi: &BigInt, g: f64) -> Ordering {
    match bi.to_f64() {
        Some(f) => float_ord(f, g),
        None => if bi.is_positive() { Ordering::Greater } else { Ordering::Less }
    }
}
