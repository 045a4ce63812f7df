// (C) 2020 Brandon Lewis
//
// Process-wide symbol interning. Symbols compare and hash by identity, so
// table lookup inside the pull path never touches string bytes.

use crate::Handle;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

#[derive(Clone)]
pub struct Symbol(Handle<str>);

lazy_static! {
    static ref INTERN: Mutex<HashMap<String, Symbol>> = Mutex::new(HashMap::new());
}

impl Symbol {
    pub fn new(name: &str) -> Symbol {
        let mut table = INTERN.lock().unwrap();
        if let Some(sym) = table.get(name) {
            return sym.clone();
        }
        let sym = Symbol(Handle::from(name));
        table.insert(name.to_string(), sym.clone());
        sym
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    // The identity that equality and hashing are defined over.
    fn id(&self) -> usize {
        self.0.as_ptr() as usize
    }
}

pub fn sym(name: &str) -> Symbol {
    Symbol::new(name)
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Symbol) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "`{}", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
