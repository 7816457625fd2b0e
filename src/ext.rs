// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Extension codes: small integers standing in for frequently pickled
//! `module.name` globals (protocol 2 and up).
//!
//! Both sides of a pickle exchange must agree on the registry, so it is
//! passed explicitly through `SerOptions::extensions` and
//! `DeOptions::extensions`.

use std::collections::HashMap;

use crate::error::{Error, ErrorCode, Result};

/// Largest valid extension code.
pub const MAX_EXTENSION_CODE: i64 = 0x7fff_ffff;

/// Bidirectional `code <-> (module, name)` map.
///
/// Lookups take `&self` and the type is `Sync`, so one registry can serve
/// concurrent picklers through an `Arc`.  Changes take `&mut self`; callers
/// that mutate a shared registry must arrange exclusive access themselves.
#[derive(Clone, Debug, Default)]
pub struct ExtensionRegistry {
    by_name: HashMap<(String, String), u32>,
    by_code: HashMap<u32, (String, String)>,
}

impl ExtensionRegistry {
    pub fn new() -> ExtensionRegistry {
        ExtensionRegistry::default()
    }

    /// Register `module.name` under `code`.
    ///
    /// Registering the same pair with the same code again is a no-op.  A code
    /// already bound to another pair, or a pair already bound to another
    /// code, is an error.
    pub fn register(&mut self, module: &str, name: &str, code: i64) -> Result<()> {
        if code < 1 || code > MAX_EXTENSION_CODE {
            return Err(Error::Registry(ErrorCode::InvalidExtensionCode(code)));
        }
        let code = code as u32;
        let key = (module.to_owned(), name.to_owned());
        let old_code = self.by_name.get(&key).cloned();
        let old_key = self.by_code.get(&code);
        if old_code == Some(code) && old_key == Some(&key) {
            return Ok(());
        }
        if let Some(old_code) = old_code {
            return Err(Error::Registry(ErrorCode::ExtensionConflict {
                code: old_code as i64, module: key.0, name: key.1,
            }));
        }
        if let Some((module, name)) = old_key {
            return Err(Error::Registry(ErrorCode::ExtensionConflict {
                code: code as i64, module: module.clone(), name: name.clone(),
            }));
        }
        log::debug!("registering extension code {} for {}.{}", code, key.0, key.1);
        self.by_name.insert(key.clone(), code);
        self.by_code.insert(code, key);
        Ok(())
    }

    /// Remove the binding of `code`, returning the pair it was bound to.
    pub fn unregister(&mut self, code: i64) -> Option<(String, String)> {
        if code < 1 || code > MAX_EXTENSION_CODE {
            return None;
        }
        let key = self.by_code.remove(&(code as u32))?;
        self.by_name.remove(&key);
        log::debug!("unregistered extension code {} ({}.{})", code, key.0, key.1);
        Some(key)
    }

    /// Code for `module.name`, used when pickling.
    pub fn code_for(&self, module: &str, name: &str) -> Option<u32> {
        // Lookup needs owned keys; the table is small and this only runs for
        // globals.
        self.by_name.get(&(module.to_owned(), name.to_owned())).cloned()
    }

    /// `(module, name)` for `code`, used when unpickling.
    pub fn name_for(&self, code: u32) -> Option<(&str, &str)> {
        self.by_code.get(&code).map(|(m, n)| (m.as_str(), n.as_str()))
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}
