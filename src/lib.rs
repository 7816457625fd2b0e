// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Encoder and decoder for Python's pickle format
//!
//! # Pickle format
//!
//! Please see the [Python docs](http://docs.python.org/library/pickle) for
//! details on the Pickle format.
//!
//! This crate reads and writes all Pickle protocols (0 to 5).  Protocol 3 is
//! the default for writing; protocols 0 to 2 remain readable by Python 2, and
//! protocol 4 and up add framing, memoization without explicit ids and compact
//! opcodes for globals, sets and large data.
//!
//! # Object graphs
//!
//! Pickle serializes graphs, not trees.  The [`Value`] type keeps Python's
//! reference semantics: lists, dicts, sets, tuples and instances are shared
//! through `Rc`, so a value can appear at several places, or contain itself.
//! The pickler emits every shared object once and refers back to it through
//! the memo; the unpickler rebuilds the same sharing.
//!
//! ```
//! use pickle_engine::{value_from_slice, value_to_vec, DeOptions, SerOptions, Value};
//!
//! let inner = Value::list(vec![Value::I64(1)]);
//! let outer = Value::tuple(vec![inner.clone(), inner]);
//! let bytes = value_to_vec(&outer, SerOptions::new()).unwrap();
//!
//! let decoded = value_from_slice(&bytes, DeOptions::new()).unwrap();
//! if let Value::Tuple(items) = decoded {
//!     assert!(items[0].is(&items[1]));
//! }
//! ```
//!
//! # Classes and reductions
//!
//! Module globals are looked up through a [`Resolver`](resolve::Resolver).
//! The default [`TableResolver`](resolve::TableResolver) knows the builtin
//! containers and scalars and the copyreg helpers; any other class becomes a
//! generic [`Object`] that records its constructor arguments, state and
//! items, and pickles back to an equivalent stream.
//!
//! On the writing side, values are turned into [`Reduction`]s: by a
//! [`DispatchTable`](reduce::DispatchTable) entry for their type, or by the
//! [`HostObject`] implementation of caller-defined types.  Module globals
//! can be abbreviated to extension codes through an
//! [`ExtensionRegistry`](ext::ExtensionRegistry), and Python 2 module names
//! are translated in both directions by a [`CompatTable`](compat::CompatTable).
//!
//! # Streaming
//!
//! [`Pickler`] writes any number of pickles to one stream and keeps its memo
//! between them.  [`Unpickler`] is push-based: feed it bytes as they arrive
//! and poll it for complete values.
//!
//! # Serde
//!
//! The library exports generic serde (de)serializing functions `to_*` and
//! `from_*`.  It also exports functions that produce or take only the specific
//! `Value` struct exposed by this library, which supports all built-in Python
//! types (notably, long integers, sets and shared references, which serde's
//! generic types don't handle).  These functions, called `value_from_*` and
//! `value_to_*`, will correctly (un)pickle these types.
//!
//! When deserializing, arbitrary Python objects saved using a pickled instance
//! dictionary or `__setstate__` are replaced by that state.
//!
//! *Note on enums:* Enum variants are serialized as Python tuples `(name,
//! [data])` instead of mappings (or a plain string for unit variants), which is
//! the representation selected by e.g. `serde_json`.  On deserialization, both
//! the tuple form and the string/mapping form is accepted.
//!
//! *Note on bytes objects:* when deserializing bytes objects, you have to use a
//! Rust wrapper type that enables deserialization from the serde data model's
//! "bytes" type.  The [`serde_bytes`](https://docs.serde.rs/serde_bytes/) crate
//! provides such wrappers.
//!
//! # Unsupported features
//!
//! - Out-of-band buffers (protocol 5 `NEXT_BUFFER`).
//!
//! # Minimum Supported Rust Version
//!
//! The minimum supported version of the toolchain is 1.58.1.

pub use self::ser::{
    Pickler,
    PersistentId,
    SerOptions,
    to_writer,
    to_vec,
    value_to_writer,
    value_to_vec,
};

pub use self::de::{
    Unpickler,
    PersistentLoad,
    DeOptions,
    Status,
    from_reader,
    from_slice,
    from_iter,
    value_from_reader,
    value_from_slice,
    value_from_iter,
};

pub use self::value::{
    Value,
    HashableValue,
    Global,
    Object,
    Init,
    HostObject,
    to_value,
    from_value,
};

pub use self::reduce::{Construct, DispatchTable, Items, Reduction, TypeKey};
pub use self::consts::{DEFAULT_PROTOCOL, HIGHEST_PROTOCOL};
pub use self::error::{Error, ErrorCode, Result};

pub mod ser;
pub mod de;
pub mod error;
pub mod value;
pub mod ops;
pub mod reduce;
pub mod ext;
pub mod compat;
pub mod resolve;
pub mod consts;
mod memo;
mod frame;
mod value_impls;

#[cfg(test)]
#[path = "../test/mod.rs"]
mod test;
