// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Memo tables for both directions.
//!
//! Both sides hand out ids 0, 1, 2, ... in the order values are first seen,
//! so the id the pickler writes in a PUT is the id the unpickler assigns
//! when it executes that PUT.

use std::collections::{BTreeMap, HashMap};
use std::mem;

use crate::error::ErrorCode;
use crate::value::{Value, dismantle};

/// Pickler memo, keyed by object identity.
///
/// Memoized values are kept alive by the memo, so an address cannot be
/// reused by a temporary while the memo still maps it.
#[derive(Default)]
pub struct EncodeMemo {
    ids: HashMap<usize, u64>,
    values: Vec<Value>,
}

impl EncodeMemo {
    pub fn new() -> EncodeMemo {
        EncodeMemo::default()
    }

    /// Id of `value` if it has been memoized.
    pub fn contains(&self, value: &Value) -> Option<u64> {
        value.identity().and_then(|addr| self.ids.get(&addr).cloned())
    }

    /// Record `value` under the next id.  Values without identity are not
    /// memoized and yield `None`.
    pub fn put(&mut self, value: &Value) -> Option<u64> {
        let addr = value.identity()?;
        let id = self.values.len() as u64;
        self.ids.insert(addr, id);
        self.values.push(value.clone());
        Some(id)
    }

    pub fn get(&self, id: u64) -> Option<&Value> {
        self.values.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.values.clear();
    }
}

/// Unpickler memo, keyed by id.
///
/// In strict mode every PUT must name the next sequential id.  Lenient mode
/// accepts arbitrary ids as older picklers wrote them; out-of-sequence ids go
/// to a sparse side table.
#[derive(Default)]
pub struct DecodeMemo {
    values: Vec<Value>,
    sparse: BTreeMap<u64, Value>,
    lenient: bool,
}

impl DecodeMemo {
    pub fn new(lenient: bool) -> DecodeMemo {
        DecodeMemo { values: Vec::with_capacity(32), sparse: BTreeMap::new(), lenient }
    }

    /// The id the next MEMOIZE will use.
    pub fn next_id(&self) -> u64 {
        (self.values.len() + self.sparse.len()) as u64
    }

    /// Record `value` under the next id (MEMOIZE).
    pub fn put(&mut self, value: Value) -> u64 {
        let id = self.next_id();
        if self.sparse.is_empty() {
            self.values.push(value);
        } else {
            self.sparse.insert(id, value);
        }
        id
    }

    /// Record `value` under an explicit id (PUT, BINPUT, LONG_BINPUT).
    pub fn put_at(&mut self, id: u64, value: Value) -> Result<(), ErrorCode> {
        let expected = self.values.len() as u64;
        if id == expected && self.sparse.is_empty() {
            self.values.push(value);
            return Ok(());
        }
        if !self.lenient {
            return Err(ErrorCode::MemoIdMismatch { expected, found: id });
        }
        log::debug!("memo id {} out of sequence (expected {})", id, expected);
        let replaced = if id < expected {
            Some(mem::replace(&mut self.values[id as usize], value))
        } else {
            self.sparse.insert(id, value)
        };
        dismantle(replaced.into_iter().collect());
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<&Value> {
        match self.values.get(id as usize) {
            Some(value) => Some(value),
            None => self.sparse.get(&id),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len() + self.sparse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty the memo, handing back everything it held.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut values = mem::take(&mut self.values);
        values.extend(mem::take(&mut self.sparse).into_values());
        values
    }
}
