// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! The reduction protocol.
//!
//! Anything the pickler cannot write with a dedicated opcode is first
//! decomposed into a [`Reduction`]: how to construct the object, plus
//! optional state and item sources that are applied after construction.
//! The [`DispatchTable`] lets callers override the decomposition per type.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::{Error, ErrorCode, Result};
use crate::value::{Global, HashableValue, Init, Object, Value};

/// How the unpickler should create the object.
pub enum Construct {
    /// `callable(*args)`, written as REDUCE.
    Call { callable: Value, args: Vec<Value> },
    /// `class.__new__(class, *args, **kwargs)` without running the
    /// initializer, written as NEWOBJ / NEWOBJ_EX or a copyreg helper.
    NewObj { class: Rc<Global>, args: Vec<Value>, kwargs: Option<Value> },
}

/// A source of items for APPENDS or SETITEMS after construction.
pub enum Items<T> {
    /// A real iterator.  Accepted by every protocol.
    Iter(Box<dyn Iterator<Item=T>>),
    /// A plain container that can be iterated.  Only protocol 0 accepts
    /// this; binary protocols require `Iter`.
    Iterable(Value),
}

/// The decomposition of a value: construction, then state, then items.
pub struct Reduction {
    pub construct: Construct,
    pub state: Option<Value>,
    pub list_items: Option<Items<Value>>,
    pub dict_items: Option<Items<(Value, Value)>>,
}

impl Reduction {
    pub fn call(callable: Value, args: Vec<Value>) -> Reduction {
        Reduction::from_construct(Construct::Call { callable, args })
    }

    pub fn new_object(class: Rc<Global>, args: Vec<Value>) -> Reduction {
        Reduction::from_construct(Construct::NewObj { class, args, kwargs: None })
    }

    pub fn new_object_ex(class: Rc<Global>, args: Vec<Value>, kwargs: Value) -> Reduction {
        Reduction::from_construct(Construct::NewObj { class, args, kwargs: Some(kwargs) })
    }

    fn from_construct(construct: Construct) -> Reduction {
        Reduction { construct, state: None, list_items: None, dict_items: None }
    }

    pub fn with_state(mut self, state: Value) -> Reduction {
        self.state = Some(state);
        self
    }

    pub fn with_list_items(mut self, items: Items<Value>) -> Reduction {
        self.list_items = Some(items);
        self
    }

    pub fn with_dict_items(mut self, items: Items<(Value, Value)>) -> Reduction {
        self.dict_items = Some(items);
        self
    }
}

impl fmt::Debug for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.construct {
            Construct::Call { ref callable, ref args } =>
                write!(f, "Reduction({}, {:?}", callable, args)?,
            Construct::NewObj { ref class, ref args, .. } =>
                write!(f, "Reduction(new {:?}, {:?}", class, args)?,
        }
        if let Some(ref state) = self.state {
            write!(f, ", state={}", state)?;
        }
        f.write_str(")")
    }
}

impl Items<Value> {
    /// Resolve the source into an iterator, honoring the protocol's
    /// strictness.
    pub(crate) fn resolve(self, proto: u8) -> Result<Box<dyn Iterator<Item=Value>>> {
        match self {
            Items::Iter(iter) => Ok(iter),
            Items::Iterable(value) => {
                if proto > 0 {
                    return Err(Error::Encode(ErrorCode::NotAnIterator(
                        "list items", value.type_name())));
                }
                Ok(Box::new(iterate(&value, "list items")?.into_iter()))
            }
        }
    }
}

impl Items<(Value, Value)> {
    pub(crate) fn resolve(self, proto: u8)
                            -> Result<Box<dyn Iterator<Item=(Value, Value)>>> {
        match self {
            Items::Iter(iter) => Ok(iter),
            Items::Iterable(value) => {
                if proto > 0 {
                    return Err(Error::Encode(ErrorCode::NotAnIterator(
                        "dict items", value.type_name())));
                }
                let pairs: Vec<(Value, Value)> = match value {
                    Value::Dict(ref d) => d.borrow().iter()
                        .map(|(k, v)| (k.clone().into_value(), v.clone()))
                        .collect(),
                    _ => iterate(&value, "dict items")?.into_iter()
                        .map(pair)
                        .collect::<Result<Vec<_>>>()?,
                };
                Ok(Box::new(pairs.into_iter()))
            }
        }
    }
}

/// Items of an iterable container, in iteration order.
pub(crate) fn iterate(value: &Value, what: &'static str) -> Result<Vec<Value>> {
    match *value {
        Value::List(ref l) => Ok(l.borrow().clone()),
        Value::Tuple(ref t) => Ok(t.to_vec()),
        Value::Set(ref s) => Ok(s.borrow().iter().cloned().map(HashableValue::into_value).collect()),
        Value::FrozenSet(ref s) => Ok(s.iter().cloned().map(HashableValue::into_value).collect()),
        Value::Dict(ref d) => Ok(d.borrow().keys().cloned().map(HashableValue::into_value).collect()),
        _ => Err(Error::Encode(ErrorCode::NotIterable(what, value.type_name()))),
    }
}

fn pair(item: Value) -> Result<(Value, Value)> {
    if let Value::Tuple(ref t) = item {
        if t.len() == 2 {
            return Ok((t[0].clone(), t[1].clone()));
        }
    }
    Err(Error::Encode(ErrorCode::NotIterable("dict item pairs", item.type_name())))
}

/// Key of the dispatch table: a value category or a class.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TypeKey {
    List,
    Tuple,
    Dict,
    Set,
    FrozenSet,
    /// Instances (`Object` or `HostObject`) of `module.qualname`.
    Class(String, String),
}

impl TypeKey {
    pub fn class<M: Into<String>, N: Into<String>>(module: M, name: N) -> TypeKey {
        TypeKey::Class(module.into(), name.into())
    }

    /// The key for `value`, if the dispatch table may override it.
    pub fn of(value: &Value) -> Option<TypeKey> {
        match *value {
            Value::List(_) => Some(TypeKey::List),
            Value::Tuple(_) => Some(TypeKey::Tuple),
            Value::Dict(_) => Some(TypeKey::Dict),
            Value::Set(_) => Some(TypeKey::Set),
            Value::FrozenSet(_) => Some(TypeKey::FrozenSet),
            Value::Object(ref o) => {
                let o = o.borrow();
                Some(TypeKey::class(o.class.module.as_str(), o.class.name.as_str()))
            }
            Value::Host(ref h) => {
                let (module, name) = h.class_name();
                Some(TypeKey::class(module, name))
            }
            _ => None,
        }
    }
}

pub type Reducer = Arc<dyn Fn(&Value, u8) -> Result<Reduction> + Send + Sync>;

/// Per-type reducers that take priority over the default decomposition.
///
/// The table is read-only while pickling.  Share it through an `Arc`; to
/// change a shared table, build a new one or synchronize externally.
#[derive(Clone, Default)]
pub struct DispatchTable {
    reducers: HashMap<TypeKey, Reducer>,
}

impl DispatchTable {
    pub fn new() -> DispatchTable {
        DispatchTable::default()
    }

    pub fn register<F>(&mut self, key: TypeKey, reducer: F)
        where F: Fn(&Value, u8) -> Result<Reduction> + Send + Sync + 'static
    {
        self.reducers.insert(key, Arc::new(reducer));
    }

    pub fn unregister(&mut self, key: &TypeKey) -> bool {
        self.reducers.remove(key).is_some()
    }

    pub fn get(&self, key: &TypeKey) -> Option<&Reducer> {
        self.reducers.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }
}

/// Default decomposition of a generic instance: the parts it was built from.
pub(crate) fn reduce_object(object: &Object) -> Reduction {
    let construct = match object.init {
        Init::Call(ref args) => Construct::Call {
            callable: Value::Global(object.class.clone()),
            args: args.clone(),
        },
        Init::New { ref args, ref kwargs } => Construct::NewObj {
            class: object.class.clone(),
            args: args.clone(),
            kwargs: kwargs.clone(),
        },
    };
    let mut reduction = Reduction::from_construct(construct);
    reduction.state = object.state.clone();
    if !object.list_items.is_empty() {
        reduction.list_items = Some(Items::Iter(Box::new(object.list_items.clone().into_iter())));
    }
    if !object.dict_items.is_empty() {
        reduction.dict_items = Some(Items::Iter(Box::new(object.dict_items.clone().into_iter())));
    }
    reduction
}
