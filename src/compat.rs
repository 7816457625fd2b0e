// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Renames between legacy (Python 2) and current (Python 3) module globals.
//!
//! The unpickler maps legacy names to current ones when reading protocol 0-2
//! pickles; the pickler maps the other way when writing them.

use std::collections::HashMap;

/// Legacy module name -> current module name.
const IMPORT_MAPPING: &[(&str, &str)] = &[
    ("__builtin__", "builtins"),
    ("copy_reg", "copyreg"),
    ("Queue", "queue"),
    ("SocketServer", "socketserver"),
    ("ConfigParser", "configparser"),
    ("repr", "reprlib"),
    ("tkFileDialog", "tkinter.filedialog"),
    ("tkSimpleDialog", "tkinter.simpledialog"),
    ("tkColorChooser", "tkinter.colorchooser"),
    ("tkCommonDialog", "tkinter.commondialog"),
    ("Dialog", "tkinter.dialog"),
    ("Tkdnd", "tkinter.dnd"),
    ("tkFont", "tkinter.font"),
    ("tkMessageBox", "tkinter.messagebox"),
    ("ScrolledText", "tkinter.scrolledtext"),
    ("Tkconstants", "tkinter.constants"),
    ("Tix", "tkinter.tix"),
    ("ttk", "tkinter.ttk"),
    ("Tkinter", "tkinter"),
    ("markupbase", "_markupbase"),
    ("_winreg", "winreg"),
    ("thread", "_thread"),
    ("dummy_thread", "_dummy_thread"),
    ("dbhash", "dbm.bsd"),
    ("dumbdbm", "dbm.dumb"),
    ("dbm", "dbm.ndbm"),
    ("gdbm", "dbm.gnu"),
    ("xmlrpclib", "xmlrpc.client"),
    ("SimpleXMLRPCServer", "xmlrpc.server"),
    ("httplib", "http.client"),
    ("htmlentitydefs", "html.entities"),
    ("HTMLParser", "html.parser"),
    ("Cookie", "http.cookies"),
    ("cookielib", "http.cookiejar"),
    ("BaseHTTPServer", "http.server"),
    ("test.test_support", "test.support"),
    ("commands", "subprocess"),
    ("urlparse", "urllib.parse"),
    ("robotparser", "urllib.robotparser"),
    ("urllib2", "urllib.request"),
    ("anydbm", "dbm"),
    ("_abcoll", "collections.abc"),
    ("cPickle", "pickle"),
    ("_elementtree", "xml.etree.ElementTree"),
    ("FileDialog", "tkinter.filedialog"),
    ("SimpleDialog", "tkinter.simpledialog"),
    ("DocXMLRPCServer", "xmlrpc.server"),
    ("SimpleHTTPServer", "http.server"),
    ("CGIHTTPServer", "http.server"),
    ("UserDict", "collections"),
    ("UserList", "collections"),
    ("UserString", "collections"),
    ("whichdb", "dbm"),
    ("StringIO", "io"),
    ("cStringIO", "io"),
];

/// Legacy `(module, name)` -> current `(module, name)`.
const NAME_MAPPING: &[((&str, &str), (&str, &str))] = &[
    (("__builtin__", "xrange"), ("builtins", "range")),
    (("__builtin__", "reduce"), ("functools", "reduce")),
    (("__builtin__", "intern"), ("sys", "intern")),
    (("__builtin__", "unichr"), ("builtins", "chr")),
    (("__builtin__", "unicode"), ("builtins", "str")),
    (("__builtin__", "long"), ("builtins", "int")),
    (("itertools", "izip"), ("builtins", "zip")),
    (("itertools", "imap"), ("builtins", "map")),
    (("itertools", "ifilter"), ("builtins", "filter")),
    (("itertools", "ifilterfalse"), ("itertools", "filterfalse")),
    (("itertools", "izip_longest"), ("itertools", "zip_longest")),
    (("UserDict", "IterableUserDict"), ("collections", "UserDict")),
    (("UserList", "UserList"), ("collections", "UserList")),
    (("string", "ChainMap"), ("collections", "ChainMap")),
    (("whichdb", "whichdb"), ("dbm", "whichdb")),
    (("_socket", "fromfd"), ("socket", "fromfd")),
    (("_multiprocessing", "Connection"), ("multiprocessing.connection", "Connection")),
    (("multiprocessing.process", "Process"), ("multiprocessing.context", "Process")),
    (("urllib", "quote"), ("urllib.parse", "quote")),
    (("urllib", "quote_plus"), ("urllib.parse", "quote_plus")),
    (("urllib", "unquote"), ("urllib.parse", "unquote")),
    (("urllib", "unquote_plus"), ("urllib.parse", "unquote_plus")),
    (("urllib", "urlencode"), ("urllib.parse", "urlencode")),
    (("urllib", "pathname2url"), ("urllib.request", "pathname2url")),
    (("urllib", "url2pathname"), ("urllib.request", "url2pathname")),
    (("urllib", "getproxies"), ("urllib.request", "getproxies")),
    (("urllib", "urlretrieve"), ("urllib.request", "urlretrieve")),
    (("urllib", "urlcleanup"), ("urllib.request", "urlcleanup")),
    (("urllib2", "HTTPError"), ("urllib.error", "HTTPError")),
    (("urllib2", "URLError"), ("urllib.error", "URLError")),
];

/// Python 2 exception classes that moved into `builtins`.
const PYTHON2_EXCEPTIONS: &[&str] = &[
    "ArithmeticError", "AssertionError", "AttributeError", "BaseException",
    "BufferError", "BytesWarning", "DeprecationWarning", "EOFError",
    "EnvironmentError", "Exception", "FloatingPointError", "FutureWarning",
    "GeneratorExit", "IOError", "ImportError", "ImportWarning",
    "IndentationError", "IndexError", "KeyError", "KeyboardInterrupt",
    "LookupError", "MemoryError", "NameError", "NotImplementedError",
    "OSError", "OverflowError", "PendingDeprecationWarning", "ReferenceError",
    "RuntimeError", "RuntimeWarning", "StopIteration", "SyntaxError",
    "SyntaxWarning", "SystemError", "SystemExit", "TabError", "TypeError",
    "UnboundLocalError", "UnicodeDecodeError", "UnicodeEncodeError",
    "UnicodeError", "UnicodeTranslateError", "UnicodeWarning", "UserWarning",
    "ValueError", "Warning", "ZeroDivisionError",
];

type Name = (String, String);

fn name(module: &str, name: &str) -> Name {
    (module.to_owned(), name.to_owned())
}

/// A pair of rename tables and their inverses.
///
/// Whole-name entries take precedence over module entries in both
/// directions.  Inverses are built first-wins, so a current name reached
/// from several legacy names maps back to the first one listed.
#[derive(Clone, Debug, Default)]
pub struct CompatTable {
    imports: HashMap<String, String>,
    names: HashMap<Name, Name>,
    reverse_imports: HashMap<String, String>,
    reverse_names: HashMap<Name, Name>,
}

impl CompatTable {
    /// A table that renames nothing.
    pub fn empty() -> CompatTable {
        CompatTable::default()
    }

    /// The standard Python 2 -> Python 3 renames.
    pub fn python2() -> CompatTable {
        let mut table = CompatTable::empty();
        for &(old, new) in IMPORT_MAPPING {
            table.add_import(old, new);
        }
        for &((om, on), (nm, nn)) in NAME_MAPPING {
            table.add_name((om, on), (nm, nn));
        }
        for exc in PYTHON2_EXCEPTIONS {
            table.add_name(("exceptions", exc), ("builtins", exc));
        }
        // One-way: Python 3 has no StandardError to map back from.
        table.names.insert(name("exceptions", "StandardError"), name("builtins", "Exception"));
        table
    }

    /// Add a module rename and, if the current name has none yet, its inverse.
    pub fn add_import(&mut self, legacy: &str, current: &str) {
        self.imports.insert(legacy.to_owned(), current.to_owned());
        self.reverse_imports.entry(current.to_owned()).or_insert_with(|| legacy.to_owned());
    }

    /// Add a full-name rename and, if the current name has none yet, its inverse.
    pub fn add_name(&mut self, legacy: (&str, &str), current: (&str, &str)) {
        self.names.insert(name(legacy.0, legacy.1), name(current.0, current.1));
        self.reverse_names.entry(name(current.0, current.1))
                          .or_insert_with(|| name(legacy.0, legacy.1));
    }

    /// Map a legacy name to its current spelling (unpickling).
    pub fn to_current(&self, module: &str, qualname: &str) -> (String, String) {
        let key = name(module, qualname);
        if let Some(current) = self.names.get(&key) {
            return current.clone();
        }
        match self.imports.get(module) {
            Some(current) => (current.clone(), key.1),
            None => key,
        }
    }

    /// Map a current name to its legacy spelling (pickling).
    pub fn to_legacy(&self, module: &str, qualname: &str) -> (String, String) {
        let key = name(module, qualname);
        if let Some(legacy) = self.reverse_names.get(&key) {
            return legacy.clone();
        }
        match self.reverse_imports.get(module) {
            Some(legacy) => (legacy.clone(), key.1),
            None => key,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.names.is_empty()
    }
}
