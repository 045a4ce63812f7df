// (C) 2020 Brandon Lewis
//
// Prototype records. A Table maps unique symbol keys to values; a
// TableMap interns the key set so many tables with the same schema share
// one hash. A Form is a linearized chain of tables; lookup walks the
// chain head to tail, and multiple inheritance is merged eagerly at
// construction with the monotonic rule.

use crate::error::{Error, Result};
use crate::list::List;
use crate::symbol::Symbol;
use crate::util::hash64;
use crate::value::{TypeTag, Value};
use crate::vm::Thread;
use crate::Handle;

#[derive(Debug)]
pub struct TableMap {
    keys: Vec<Symbol>,
    // open addressing; 0 is empty, otherwise key index + 1
    indices: Vec<usize>,
    mask: usize,
}

impl TableMap {
    pub fn new(keys: Vec<Symbol>) -> Handle<TableMap> {
        if keys.is_empty() {
            return Handle::new(TableMap {
                keys,
                indices: Vec::new(),
                mask: 0,
            });
        }
        let n = 2 * keys.len().next_power_of_two();
        let mask = n - 1;
        let mut indices = vec![0usize; n];
        for (i, key) in keys.iter().enumerate() {
            let mut slot = key_hash(key) as usize & mask;
            while indices[slot] != 0 {
                slot = (slot + 1) & mask;
            }
            indices[slot] = i + 1;
        }
        Handle::new(TableMap {
            keys,
            indices,
            mask,
        })
    }

    pub fn size(&self) -> usize {
        self.keys.len()
    }

    pub fn keys(&self) -> &[Symbol] {
        &self.keys
    }

    pub fn index_of(&self, key: &Symbol) -> Option<usize> {
        if self.keys.is_empty() {
            return None;
        }
        let mut slot = key_hash(key) as usize & self.mask;
        loop {
            let index = self.indices[slot];
            if index == 0 {
                return None;
            }
            if &self.keys[index - 1] == key {
                return Some(index - 1);
            }
            slot = (slot + 1) & self.mask;
        }
    }
}

fn key_hash(key: &Symbol) -> u64 {
    hash64(key.as_str().as_ptr() as u64)
}

#[derive(Debug)]
pub struct Table {
    map: Handle<TableMap>,
    values: Vec<Value>,
}

impl Table {
    pub fn new(map: Handle<TableMap>, values: Vec<Value>) -> Result<Handle<Table>> {
        if map.size() != values.len() {
            return Err(Error::Internal("table keys and values disagree"));
        }
        Ok(Handle::new(Table { map, values }))
    }

    pub fn map(&self) -> &Handle<TableMap> {
        &self.map
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, key: &Symbol) -> Option<Value> {
        self.map.index_of(key).map(|i| self.values[i].clone())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Symbol, &Value)> {
        self.map.keys().iter().zip(self.values.iter())
    }

    pub fn equals(&self, th: &mut Thread, other: &Table) -> Result<bool> {
        if self.size() != other.size() {
            return Ok(false);
        }
        for (key, value) in self.entries() {
            match other.get(key) {
                None => return Ok(false),
                Some(theirs) => {
                    if !value.equals(th, &theirs)? {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    // Key-sorted so that tables over differently-ordered but equal
    // schemas agree.
    pub fn hash(&self) -> i64 {
        let mut entries: Vec<(&Symbol, &Value)> = self.entries().collect();
        entries.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        let mut h: u64 = 0x9e3779b97f4a7c15;
        for (key, value) in entries {
            h = hash64(h ^ key_hash(key));
            h = hash64(h ^ value.hash() as u64);
        }
        h as i64
    }

    pub fn chase(&self, th: &mut Thread, n: i64) -> Result<Handle<Table>> {
        let mut values = Vec::with_capacity(self.values.len());
        for v in &self.values {
            values.push(v.chase(th, n)?);
        }
        Table::new(self.map.clone(), values)
    }
}

#[derive(Debug)]
pub enum Form {
    Empty,
    Cons {
        table: Handle<Table>,
        next: Handle<Form>,
    },
}

impl Form {
    pub fn empty() -> Handle<Form> {
        Handle::new(Form::Empty)
    }

    pub fn cons(table: Handle<Table>, next: Handle<Form>) -> Handle<Form> {
        Handle::new(Form::Cons { table, next })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Form::Empty)
    }

    pub fn get(&self, key: &Symbol) -> Option<Value> {
        let mut form = self;
        loop {
            match form {
                Form::Empty => return None,
                Form::Cons { table, next } => {
                    if let Some(v) = table.get(key) {
                        return Some(v);
                    }
                    form = next.as_ref();
                }
            }
        }
    }

    pub fn tables(&self) -> Vec<Handle<Table>> {
        let mut out = Vec::new();
        let mut form = self;
        while let Form::Cons { table, next } = form {
            out.push(table.clone());
            form = next.as_ref();
        }
        out
    }

    pub fn from_tables(tables: &[Handle<Table>]) -> Handle<Form> {
        let mut form = Form::empty();
        for table in tables.iter().rev() {
            form = Form::cons(table.clone(), form);
        }
        form
    }

    pub fn equals(&self, th: &mut Thread, other: &Form) -> Result<bool> {
        let a = self.tables();
        let b = other.tables();
        if a.len() != b.len() {
            return Ok(false);
        }
        for (x, y) in a.iter().zip(b.iter()) {
            if !Handle::ptr_eq(x, y) && !x.equals(th, y)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn hash(&self) -> i64 {
        let mut h: u64 = 0x517cc1b727220a95;
        for table in self.tables() {
            h = hash64(h ^ table.hash() as u64);
        }
        h as i64
    }

    // Produce a new form with every slot advanced by n elements.
    pub fn chase(&self, th: &mut Thread, n: i64) -> Result<Handle<Form>> {
        match self {
            Form::Empty => Ok(Form::empty()),
            Form::Cons { table, next } => {
                let next = next.chase(th, n)?;
                Ok(Form::cons(table.chase(th, n)?, next))
            }
        }
    }

    // Merge parent chains pairwise with the monotonic rule: take the
    // head of A unless it appears later in B, otherwise the head of B
    // unless it appears later in A, otherwise the orders contradict.
    pub fn linearize(th: &mut Thread, parents: &[Value]) -> Result<Handle<Form>> {
        if parents.is_empty() {
            return Ok(Form::empty());
        }
        if parents.len() == 1 {
            return match &parents[0] {
                Value::Form(f) => Ok(f.clone()),
                _ => Ok(Form::empty()),
            };
        }
        let mut merged = chain_of(th, &parents[0])?;
        for parent in &parents[1..] {
            let other = chain_of(th, parent)?;
            merged = merge2(&merged, &other)?;
        }
        Ok(Form::from_tables(&merged))
    }

    // Interpret a value in parent position: a real means no parent, a
    // form is itself, a callable is applied and its results merged, and
    // a finite stream is merged element-wise.
    pub fn as_parent(th: &mut Thread, v: &Value) -> Result<Handle<Form>> {
        match v {
            Value::Real(_) => Ok(Form::empty()),
            Value::Form(f) => Ok(f.clone()),
            Value::Fun(_) | Value::Prim(_) => {
                let produced = th.apply_collect(v)?;
                Form::linearize(th, &produced)
            }
            Value::List(l) => {
                if !l.is_finite() {
                    return Err(Error::Indefinite("form parent"));
                }
                let packed = List::pack(l, th)?;
                let (array, _) = match packed.segment() {
                    Some(seg) => seg,
                    None => return Err(Error::Internal("packed list did not resolve")),
                };
                Form::linearize(th, array.v())
            }
            other => Err(Error::wrong_type(
                "form parent",
                TypeTag::Real | TypeTag::Form | TypeTag::Fun | TypeTag::Prim | TypeTag::List,
                other.kind(),
            )),
        }
    }
}

fn chain_of(th: &mut Thread, v: &Value) -> Result<Vec<Handle<Table>>> {
    Ok(Form::as_parent(th, v)?.tables())
}

fn has_table(tables: &[Handle<Table>], table: &Handle<Table>) -> bool {
    tables.iter().any(|t| Handle::ptr_eq(t, table))
}

fn merge2(a: &[Handle<Table>], b: &[Handle<Table>]) -> Result<Vec<Handle<Table>>> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let mut i = 0;
    let mut j = 0;
    while i < a.len() && j < b.len() {
        if Handle::ptr_eq(&a[i], &b[j]) {
            out.push(a[i].clone());
            i += 1;
            j += 1;
        } else if !has_table(&b[j + 1..], &a[i]) {
            out.push(a[i].clone());
            i += 1;
        } else if !has_table(&a[i + 1..], &b[j]) {
            out.push(b[j].clone());
            j += 1;
        } else {
            return Err(Error::InconsistentInheritance);
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;
    use crate::symbol::sym;
    use crate::vm::tests::test_thread;

    fn table(pairs: &[(&str, Value)]) -> Handle<Table> {
        let keys = pairs.iter().map(|(k, _)| sym(k)).collect();
        let values = pairs.iter().map(|(_, v)| v.clone()).collect();
        Table::new(TableMap::new(keys), values).unwrap()
    }

    #[test]
    fn test_lookup_walks_chain() {
        let base = Form::cons(table(&[("a", Value::Real(1.0))]), Form::empty());
        let child = Form::cons(
            table(&[("b", Value::Real(2.0)), ("a", Value::Real(3.0))]),
            base,
        );
        assert_eq!(child.get(&sym("a")), Some(Value::Real(3.0)));
        assert_eq!(child.get(&sym("b")), Some(Value::Real(2.0)));
        assert_eq!(child.get(&sym("missing")), None);
    }

    #[test]
    fn test_linearize_merges() {
        let mut th = test_thread();
        let t_base = table(&[("x", Value::Real(0.0))]);
        let t_a = table(&[("a", Value::Real(1.0))]);
        let t_b = table(&[("b", Value::Real(2.0))]);
        let base = Form::from_tables(&[t_base.clone()]);
        let pa = Form::from_tables(&[t_a.clone(), t_base.clone()]);
        let pb = Form::from_tables(&[t_b.clone(), t_base.clone()]);
        let merged = Form::linearize(
            &mut th,
            &[Value::Form(pa), Value::Form(pb), Value::Form(base)],
        )
        .unwrap();
        let chain = merged.tables();
        assert_eq!(chain.len(), 3);
        assert!(Handle::ptr_eq(&chain[0], &t_a));
        assert!(Handle::ptr_eq(&chain[1], &t_b));
        assert!(Handle::ptr_eq(&chain[2], &t_base));
    }

    #[test]
    fn test_linearize_inconsistent() {
        let mut th = test_thread();
        let t_a = table(&[("a", Value::Real(1.0))]);
        let t_b = table(&[("b", Value::Real(2.0))]);
        let ab = Form::from_tables(&[t_a.clone(), t_b.clone()]);
        let ba = Form::from_tables(&[t_b, t_a]);
        let err = Form::linearize(&mut th, &[Value::Form(ab), Value::Form(ba)]).unwrap_err();
        assert_eq!(err, Error::InconsistentInheritance);
    }

    // Form {a: stream [1,2,3...], b: 2}; chase by 2; a's head reads 3
    // and b still reads 2.
    #[test]
    fn test_chase_form() {
        let mut th = test_thread();
        let stream = Value::List(List::from_array(Array::from_floats(vec![
            1.0, 2.0, 3.0, 4.0, 5.0,
        ])));
        let form = Form::cons(
            table(&[("a", stream), ("b", Value::Real(2.0))]),
            Form::empty(),
        );
        let chased = form.chase(&mut th, 2).unwrap();
        let a = match chased.get(&sym("a")).unwrap() {
            Value::List(l) => l,
            _ => panic!("expected list"),
        };
        let mut buf = [0.0; 1];
        a.fillz(&mut th, &mut buf).unwrap();
        assert_eq!(buf[0], 3.0);
        assert_eq!(chased.get(&sym("b")), Some(Value::Real(2.0)));
    }

    #[test]
    fn test_hash_agrees_for_equal_schemas() {
        let a = table(&[("x", Value::Real(1.0)), ("y", Value::Real(2.0))]);
        let b = table(&[("y", Value::Real(2.0)), ("x", Value::Real(1.0))]);
        assert_eq!(a.hash(), b.hash());
    }
}
